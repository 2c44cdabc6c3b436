use crate::identity::PushingIdentity;
use crate::policy::RepositoryPolicy;
use crate::protocol::{CommandKind, RefUpdateCommand};
use crate::store::{Repository, StoreError};

/// Tags every pushed branch tip with an increasing revision number.
pub struct IncrementalTagger<'a> {
    repository: &'a dyn Repository,
    identity: &'a PushingIdentity,
    prefix: &'a str,
    enabled: bool,
}

impl<'a> IncrementalTagger<'a> {
    /// `default_prefix` is used unless `policy` overrides it.
    pub fn new(
        repository: &'a dyn Repository,
        policy: &'a RepositoryPolicy,
        identity: &'a PushingIdentity,
        default_prefix: &'a str,
    ) -> Self {
        Self {
            repository,
            identity,
            prefix: policy.incremental_push_tag_prefix.as_deref().unwrap_or(default_prefix),
            enabled: policy.use_incremental_push_tags,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Tag the new tip of `cmd` if it is an applied branch update, returning the name of the tag.
    ///
    /// Failures are logged.
    pub fn tag(&self, cmd: &RefUpdateCommand) -> Option<String> {
        if !self.enabled || !cmd.is_ok() || cmd.kind() == CommandKind::Delete {
            return None;
        }
        let branch = cmd.branch_name()?;
        match self.create_tag(branch, cmd) {
            Ok(name) => {
                tracing::debug!(repository = self.repository.name(), refname = cmd.name(), tag = name.as_str(), "tagged push");
                Some(name)
            }
            Err(err) => {
                tracing::error!(
                    repository = self.repository.name(),
                    user = self.identity.username.as_str(),
                    refname = cmd.name(),
                    %err,
                    "failed to create incremental push tag"
                );
                None
            }
        }
    }

    fn create_tag(&self, branch: &str, cmd: &RefUpdateCommand) -> Result<String, StoreError> {
        let base = format!("refs/tags/{branch}/{}", self.prefix);
        let next = self
            .repository
            .tags()?
            .iter()
            .filter_map(|tag| tag.name.strip_prefix(base.as_str())?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let name = format!("{base}{next}");
        self.repository.create_annotated_tag(
            &name,
            &cmd.new_id(),
            &self.identity.signature(),
            &format!("Auto-tagged [{branch}] branch on push"),
        )?;
        Ok(name)
    }
}
