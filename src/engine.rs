use crate::analyzer::ValidationVerdict;
use crate::config::ResourceLimits;
use crate::errors::Result;
use crate::executor::ExecutionOutcome;
use crate::table::Table;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Per-request overrides of the engine's resource limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Wall clock timeout
    pub timeout: Option<Duration>,
    /// Rows kept in a tabular result
    pub max_rows: Option<usize>,
}

impl ExecutionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// `base` with these overrides applied
    pub fn resolve(&self, base: &ResourceLimits) -> ResourceLimits {
        let mut limits = base.clone();
        if let Some(timeout) = self.timeout {
            limits = limits.with_timeout(timeout);
        }
        if let Some(max_rows) = self.max_rows {
            limits = limits.with_max_rows(max_rows);
        }
        limits
    }
}

/// Capabilities of a sandbox engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Engine name
    pub name: String,
    /// Policy the engine validates against
    pub policy: String,
    /// Name the dataset is bound under
    pub data_binding: String,
    /// Whether chart helpers are reachable
    pub charts: bool,
    pub limits: ResourceLimits,
}

/// Trait for candidate program engines
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Validate a program before execution
    fn validate(&self, program: &str) -> ValidationVerdict;

    /// Validate, then run the program against `data`. Every per-request
    /// failure comes back as an outcome value.
    async fn execute(
        &self,
        program: &str,
        data: Arc<Table>,
        options: &ExecutionOptions,
    ) -> ExecutionOutcome;

    /// Get engine capabilities
    fn capabilities(&self) -> EngineCapabilities;

    /// Shutdown the engine
    async fn shutdown(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_override_limits() {
        let base = ResourceLimits::default();
        let resolved = ExecutionOptions::default()
            .with_timeout(Duration::from_secs(3))
            .with_max_rows(10)
            .resolve(&base);
        assert_eq!(resolved.timeout_ms, 3_000);
        assert_eq!(resolved.max_rows, 10);
        assert_eq!(resolved.max_collection_len, base.max_collection_len);

        assert_eq!(ExecutionOptions::default().resolve(&base), base);
    }
}
