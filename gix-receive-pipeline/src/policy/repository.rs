/// Who has to authenticate before touching a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessRestriction {
    /// Anonymous users may do everything.
    #[default]
    None,
    /// Pushing requires authentication.
    Push,
    /// Cloning and pushing require authentication.
    Clone,
    /// Even viewing requires authentication.
    View,
}

impl AccessRestriction {
    /// Return `true` if pushing to the repository requires an authenticated user.
    pub fn requires_authenticated_push(self) -> bool {
        self >= AccessRestriction::Push
    }

    /// Parse the configuration value, ignoring case.
    pub fn from_config_value(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "none" | "anonymous" => AccessRestriction::None,
            "push" => AccessRestriction::Push,
            "clone" => AccessRestriction::Clone,
            "view" => AccessRestriction::View,
            _ => return None,
        })
    }
}

/// Per-repository settings governing what a push may do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPolicy {
    pub name: String,
    pub is_mirror: bool,
    pub is_frozen: bool,
    pub is_bare: bool,
    pub access_restriction: AccessRestriction,
    pub verify_committer: bool,
    pub use_incremental_push_tags: bool,
    /// Overrides the globally configured tag prefix.
    pub incremental_push_tag_prefix: Option<String>,
    pub pre_receive_scripts: Vec<String>,
    pub post_receive_scripts: Vec<String>,
}

impl RepositoryPolicy {
    /// A bare, unrestricted repository without any special settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_mirror: false,
            is_frozen: false,
            is_bare: true,
            access_restriction: AccessRestriction::None,
            verify_committer: false,
            use_incremental_push_tags: false,
            incremental_push_tag_prefix: None,
            pre_receive_scripts: Vec::new(),
            post_receive_scripts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restriction_levels_are_ordered() {
        assert!(!AccessRestriction::None.requires_authenticated_push());
        assert!(AccessRestriction::Push.requires_authenticated_push());
        assert!(AccessRestriction::View.requires_authenticated_push());
        assert_eq!(AccessRestriction::from_config_value("Clone"), Some(AccessRestriction::Clone));
        assert_eq!(AccessRestriction::from_config_value("everyone"), None);
    }
}
