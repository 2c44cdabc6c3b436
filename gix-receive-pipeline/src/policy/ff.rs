//! Fast-forward classification of update commands.

use crate::identity::PushingIdentity;
use crate::protocol::{CommandKind, ReasonCode, RefUpdateCommand};
use crate::store::Repository;

/// Reclassify pending updates whose new tip doesn't contain the old one as non-fast-forward.
///
/// Updates with objects unknown to `repo` are rejected on behalf of `identity`, as ancestry can't be determined.
pub fn classify(repo: &dyn Repository, identity: &PushingIdentity, commands: &mut [RefUpdateCommand]) {
    for cmd in commands
        .iter_mut()
        .filter(|cmd| cmd.is_pending() && cmd.kind() == CommandKind::Update)
    {
        if cmd.old() == cmd.new_id() {
            continue;
        }
        match repo.is_ancestor(&cmd.old(), &cmd.new_id()) {
            Ok(true) => {}
            Ok(false) => cmd.mark_non_fast_forward(),
            Err(err) => super::reject(
                cmd,
                ReasonCode::MissingObjects,
                &format!("missing necessary objects: {err}"),
                identity,
                repo.name(),
            ),
        }
    }
}
