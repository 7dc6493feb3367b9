//! Runtime configuration.

/// Knobs of a [`Runtime`](crate::Runtime) that do not change semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Label attached to the tracing span of every run.
    pub name: String,
    /// Upper bound on trampoline iterations per interpretation. Exceeding
    /// it fails the run with `Defect::StepLimitExceeded`.
    pub step_limit: Option<u64>,
    /// Emit a `trace!` event for every dispatched effect.
    pub trace_steps: bool,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self {
            name: "weft".to_string(),
            step_limit: None,
            trace_steps: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    pub fn with_trace_steps(mut self, enabled: bool) -> Self {
        self.trace_steps = enabled;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.name, "weft");
        assert_eq!(config.step_limit, None);
        assert!(!config.trace_steps);
    }

    #[test]
    fn test_builder_methods() {
        let config = RuntimeConfig::new()
            .with_name("tests")
            .with_step_limit(100)
            .with_trace_steps(true);
        assert_eq!(config.name, "tests");
        assert_eq!(config.step_limit, Some(100));
        assert!(config.trace_steps);
    }
}
