//! Driver configuration.

use serde::{Deserialize, Serialize};

/// How a module is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Check independent declaration groups concurrently.
    pub parallel: bool,
    /// Size of a dedicated worker pool. `None` uses the global rayon pool.
    pub threads: Option<usize>,
    /// Record unification and inference steps for each group.
    pub trace_inference: bool,
    /// Report warnings as errors.
    pub deny_warnings: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            threads: None,
            trace_inference: false,
            deny_warnings: false,
        }
    }
}

impl CheckConfig {
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_trace_inference(mut self, trace: bool) -> Self {
        self.trace_inference = trace;
        self
    }

    pub fn with_deny_warnings(mut self, deny: bool) -> Self {
        self.deny_warnings = deny;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: CheckConfig = serde_json::from_str(r#"{"deny_warnings": true}"#).unwrap();
        assert_eq!(config, CheckConfig::default().with_deny_warnings(true));
        assert!(config.parallel);
    }
}
