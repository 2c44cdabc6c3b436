//! The authenticated user performing a push.

use crate::store::Signature;

/// What a pushing identity is allowed to do in the target repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    pub push: bool,
    pub create_ref: bool,
    pub delete_ref: bool,
    pub rewind_ref: bool,
    pub admin: bool,
    pub owner: bool,
}

impl Permissions {
    /// Every permission granted.
    pub fn all() -> Self {
        Self {
            push: true,
            create_ref: true,
            delete_ref: true,
            rewind_ref: true,
            admin: true,
            owner: true,
        }
    }

    /// Push, create and delete, but no rewinding and no administration.
    pub fn contributor() -> Self {
        Self {
            push: true,
            create_ref: true,
            delete_ref: true,
            ..Self::default()
        }
    }
}

/// An already-authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushingIdentity {
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub permissions: Permissions,
}

impl PushingIdentity {
    pub fn new(username: impl Into<String>, permissions: Permissions) -> Self {
        Self {
            username: username.into(),
            email: None,
            display_name: None,
            permissions,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn can_push(&self) -> bool {
        self.permissions.push
    }

    pub fn can_create_ref(&self) -> bool {
        self.permissions.create_ref
    }

    pub fn can_delete_ref(&self) -> bool {
        self.permissions.delete_ref
    }

    pub fn can_rewind_ref(&self) -> bool {
        self.permissions.rewind_ref
    }

    pub fn can_admin(&self) -> bool {
        self.permissions.admin
    }

    pub fn is_owner(&self) -> bool {
        self.permissions.owner
    }

    /// The display name, or the username if none is set.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    /// Return `true` if a commit identity `name <email>` belongs to this user.
    ///
    /// The name must match the username or display name and the email must match ours,
    /// both ignoring case. Without an email of our own nothing matches.
    pub fn is(&self, name: &str, email: &str) -> bool {
        let Some(own_email) = self.email.as_deref() else {
            return false;
        };
        if name.is_empty() {
            return false;
        }
        let name_matches = same_ignoring_case(name, &self.username)
            || self
                .display_name
                .as_deref()
                .is_some_and(|display| same_ignoring_case(name, display));
        name_matches && same_ignoring_case(email, own_email)
    }

    /// The identity used for reflog entries and tags created on behalf of this user.
    pub fn signature(&self) -> Signature {
        Signature {
            name: self.display_name().to_owned(),
            email: self.email.clone().unwrap_or_default(),
        }
    }
}

fn same_ignoring_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}
