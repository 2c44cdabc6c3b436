// Capabilities and push-options negotiated during head-info.

/// Options negotiated by the client for a single push.
///
/// Contains the capability tokens from the first command line and any
/// `push-option=` values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Options {
    /// Space-separated capability tokens as negotiated from the first command line after the `\0`.
    ///
    /// Examples: "report-status", "side-band-64k", "quiet", "agent=gix/1.0"
    pub negotiated: Vec<String>,
    /// Push options provided by the client as lines of the form `push-option=<value>`.
    pub push_options: Vec<String>,
}

impl Options {
    /// Parse capability tokens from a space-separated string (part after the NUL on the first command line).
    ///
    /// Token order is preserved.
    pub fn parse(tokens: &str) -> Self {
        let mut out = Options::default();
        for t in tokens.split(' ').filter(|t| !t.is_empty()) {
            out.negotiated.push(t.to_string());
        }
        out
    }

    /// Add a push-option value (the string after `push-option=`).
    pub fn add_push_option<S: Into<String>>(&mut self, value: S) {
        self.push_options.push(value.into());
    }

    /// Check if a capability token was negotiated, either bare or as `token=<value>`.
    pub fn has(&self, token: &str) -> bool {
        self.negotiated
            .iter()
            .any(|t| t == token || (t.starts_with(token) && t.get(token.len()..=token.len()) == Some("=")))
    }

    /// Whether progress may be sent on the side-band.
    pub fn wants_progress(&self) -> bool {
        (self.has("side-band") || self.has("side-band-64k")) && !self.has("quiet")
    }

    /// Whether the client expects a report-status section.
    pub fn wants_report_status(&self) -> bool {
        self.has("report-status") || self.has("report-status-v2")
    }
}
