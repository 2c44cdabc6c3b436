//! Script environment management.
//!
//! Builds the environment variables passed to scripts run as subprocesses.

use std::collections::BTreeMap;

use crate::hooks::script::ScriptContext;

/// Builder for the environment of a script process.
#[derive(Debug, Clone, Default)]
pub struct ScriptEnvironment {
    pub repository: String,
    pub user: String,
    pub base_url: Option<String>,
    pub stage: String,
    pub push_options: Vec<String>,
    pub additional_vars: BTreeMap<String, String>,
}

impl ScriptEnvironment {
    /// Take everything from the context scripts receive on stdin.
    pub fn from_context(context: &ScriptContext) -> Self {
        Self {
            repository: context.repository.clone(),
            user: context.user.username.clone(),
            base_url: context.base_url.clone(),
            stage: context.stage.clone(),
            push_options: context.push_options.clone(),
            additional_vars: BTreeMap::new(),
        }
    }

    /// Add an additional environment variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_vars.insert(key.into(), value.into());
        self
    }

    /// Build the environment variables map.
    pub fn build(self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PUSH_REPOSITORY".to_owned(), self.repository);
        env.insert("PUSH_USER".to_owned(), self.user);
        env.insert("PUSH_HOOK_STAGE".to_owned(), self.stage);
        if let Some(url) = self.base_url {
            env.insert("PUSH_BASE_URL".to_owned(), url);
        }

        env.insert("GIT_PUSH_OPTION_COUNT".to_owned(), self.push_options.len().to_string());
        for (i, option) in self.push_options.into_iter().enumerate() {
            env.insert(format!("GIT_PUSH_OPTION_{i}"), option);
        }

        env.extend(self.additional_vars);
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn push_options_are_numbered() {
        let env = ScriptEnvironment {
            repository: "team/app.git".into(),
            user: "alice".into(),
            base_url: Some("https://git.example.com".into()),
            stage: "pre-receive".into(),
            push_options: vec!["ci.skip".into(), "notify=team".into()],
            additional_vars: BTreeMap::new(),
        }
        .with_var("EXTRA", "1")
        .build();

        let expected: BTreeMap<String, String> = [
            ("EXTRA", "1"),
            ("GIT_PUSH_OPTION_0", "ci.skip"),
            ("GIT_PUSH_OPTION_1", "notify=team"),
            ("GIT_PUSH_OPTION_COUNT", "2"),
            ("PUSH_BASE_URL", "https://git.example.com"),
            ("PUSH_HOOK_STAGE", "pre-receive"),
            ("PUSH_REPOSITORY", "team/app.git"),
            ("PUSH_USER", "alice"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        assert_eq!(env, expected);
    }

    #[test]
    fn base_url_is_optional() {
        let env = ScriptEnvironment::default().build();
        assert!(!env.contains_key("PUSH_BASE_URL"));
        assert_eq!(env["GIT_PUSH_OPTION_COUNT"], "0");
    }
}
