use gix_config::File;

use crate::config::{boolean, string, strings, Error};
use crate::policy::{AccessRestriction, RepositoryPolicy};

impl RepositoryPolicy {
    /// Load the policy of repository `name` from its `config`.
    ///
    /// This method parses the following configuration keys:
    /// - `repository.mirror`, `repository.frozen`: refuse all pushes if set
    /// - `repository.bare`: a repository with a working copy refuses pushes (default true)
    /// - `repository.accessRestriction`: `none`, `push`, `clone` or `view`
    /// - `repository.verifyCommitter`
    /// - `repository.incrementalPushTags`, `repository.incrementalPushTagPrefix`
    /// - `repository.preReceiveScript`, `repository.postReceiveScript`: multi-valued
    pub fn from_config(name: impl Into<String>, config: &File<'_>) -> Result<Self, Error> {
        let mut policy = RepositoryPolicy::new(name);
        let flags: [(&'static str, &mut bool); 5] = [
            ("repository.mirror", &mut policy.is_mirror),
            ("repository.frozen", &mut policy.is_frozen),
            ("repository.bare", &mut policy.is_bare),
            ("repository.verifyCommitter", &mut policy.verify_committer),
            ("repository.incrementalPushTags", &mut policy.use_incremental_push_tags),
        ];
        for (key, flag) in flags {
            if let Some(value) = boolean(config, key)? {
                *flag = value;
            }
        }

        let key = "repository.accessRestriction";
        if let Some(value) = string(config, key) {
            policy.access_restriction =
                AccessRestriction::from_config_value(value.trim()).ok_or(Error::AccessRestriction { key, value })?;
        }
        policy.incremental_push_tag_prefix =
            string(config, "repository.incrementalPushTagPrefix").filter(|prefix| !prefix.is_empty());
        policy.pre_receive_scripts = strings(config, "repository.preReceiveScript");
        policy.post_receive_scripts = strings(config, "repository.postReceiveScript");
        Ok(policy)
    }
}
