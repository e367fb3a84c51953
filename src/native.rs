use crate::{
    analyzer::{ValidationVerdict, Validator},
    config::ResourceLimits,
    context::ExecutionContext,
    engine::{EngineCapabilities, ExecutionOptions, SandboxEngine},
    errors::Result,
    executor::{self, ExecutionOutcome},
    policy::CapabilityPolicy,
    table::Table,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// In-process engine: validates against the policy, then runs the program on
/// the built-in interpreter
pub struct NativeEngine {
    policy: Arc<CapabilityPolicy>,
    limits: ResourceLimits,
}

impl NativeEngine {
    /// Create an engine for a policy that already passed its startup check
    pub fn new(policy: Arc<CapabilityPolicy>) -> Self {
        Self {
            policy,
            limits: ResourceLimits::default(),
        }
    }

    /// Create with custom resource limits
    pub fn with_limits(policy: Arc<CapabilityPolicy>, limits: ResourceLimits) -> Result<Self> {
        limits.check()?;
        Ok(Self { policy, limits })
    }

    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    fn verdict(&self, program: &str, limits: &ResourceLimits) -> ValidationVerdict {
        Validator::new(&self.policy)
            .with_max_program_bytes(limits.max_program_bytes)
            .validate(program)
    }
}

#[async_trait]
impl SandboxEngine for NativeEngine {
    fn validate(&self, program: &str) -> ValidationVerdict {
        self.verdict(program, &self.limits)
    }

    async fn execute(
        &self,
        program: &str,
        data: Arc<Table>,
        options: &ExecutionOptions,
    ) -> ExecutionOutcome {
        let limits = options.resolve(&self.limits);

        // Validate first
        let verdict = self.verdict(program, &limits);
        if !verdict.accepted {
            info!(
                "[SANDBOX] Program rejected under policy '{}': {} violation(s)",
                self.policy.name,
                verdict.violations.len()
            );
            return ExecutionOutcome::Rejected {
                violations: verdict.violations,
            };
        }

        let context = ExecutionContext::build(&self.policy, data);
        executor::run(program, context, &limits).await
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            name: "Native interpreter".to_string(),
            policy: self.policy.name.clone(),
            data_binding: self.policy.data_binding.clone(),
            charts: self.policy.allows_charts(),
            limits: self.limits.clone(),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        // Runs hold no engine resources
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::NodeKind;

    fn engine() -> NativeEngine {
        NativeEngine::new(Arc::new(CapabilityPolicy::data_analysis()))
    }

    fn data() -> Arc<Table> {
        Arc::new(Table::from_json_str(r#"[{"x": 1}, {"x": 2}]"#).unwrap())
    }

    #[tokio::test]
    async fn test_rejected_program_never_runs() {
        let outcome = engine()
            .execute("import os\nresult = 1", data(), &ExecutionOptions::default())
            .await;
        match outcome {
            ExecutionOutcome::Rejected { violations } => {
                assert!(violations.iter().any(|v| v.node_kind == NodeKind::Import));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accepted_program_runs() {
        let outcome = engine()
            .execute("result = df['x'].max()", data(), &ExecutionOptions::default())
            .await;
        assert!(outcome.is_success());
    }

    #[test]
    fn test_validate_is_idempotent() {
        let engine = engine();
        let program = "result = df.__class__";
        assert_eq!(engine.validate(program), engine.validate(program));
        assert!(!engine.validate(program).accepted);
    }

    #[test]
    fn test_capabilities() {
        let stats = NativeEngine::new(Arc::new(CapabilityPolicy::stats_only()));
        assert!(!stats.capabilities().charts);
        assert!(engine().capabilities().charts);
        assert_eq!(engine().capabilities().data_binding, "df");
        assert!(tokio_test::block_on(engine().shutdown()).is_ok());
    }

    #[test]
    fn test_bad_limits_are_rejected() {
        let limits = ResourceLimits {
            timeout_ms: 0,
            ..ResourceLimits::default()
        };
        assert!(NativeEngine::with_limits(Arc::new(CapabilityPolicy::strict()), limits).is_err());
    }
}
