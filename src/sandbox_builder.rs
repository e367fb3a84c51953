use crate::{
    config::{ResourceLimits, SandboxConfig, SecurityProfile},
    native::NativeEngine,
    policy::{CapabilityPolicy, PolicyManager},
    QuerySandbox, Result,
};
use std::path::PathBuf;
use tracing::info;

/// Options for creating a sandbox
#[derive(Debug, Clone, Default)]
pub struct SandboxOptions {
    /// Profile picking the policy template and default limits
    pub profile: SecurityProfile,
    /// JSON policy file used instead of the profile's template
    pub policy_file: Option<PathBuf>,
    /// Explicit policy, used before `policy_file` and the profile
    pub policy: Option<CapabilityPolicy>,
    /// Custom resource limits
    pub limits: Option<ResourceLimits>,
}

impl SandboxOptions {
    pub fn for_profile(profile: SecurityProfile) -> Self {
        Self {
            profile,
            ..Default::default()
        }
    }

    /// Use a hand-built policy
    pub fn with_policy(mut self, policy: CapabilityPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set custom resource limits
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

impl From<SandboxConfig> for SandboxOptions {
    fn from(config: SandboxConfig) -> Self {
        Self {
            profile: config.profile,
            policy_file: config.policy_file,
            policy: None,
            limits: Some(config.limits),
        }
    }
}

/// Create sandbox with custom options. Fails when the resulting policy or
/// limits do not pass their startup checks.
pub fn create_sandbox_with_options(options: SandboxOptions) -> Result<QuerySandbox> {
    let policy = match (options.policy, &options.policy_file) {
        (Some(policy), _) => {
            policy.check()?;
            std::sync::Arc::new(policy)
        }
        (None, Some(path)) => {
            let mut manager = PolicyManager::new();
            manager.load_policy_file("file", path)?;
            manager.select_policy("file")?;
            manager.effective_policy()?
        }
        (None, None) => {
            let mut manager = PolicyManager::new();
            manager.select_policy(options.profile.policy_id())?;
            manager.effective_policy()?
        }
    };
    let limits = options
        .limits
        .unwrap_or_else(|| options.profile.resource_limits());

    info!(
        "[SANDBOX] Using policy '{}' (data binding '{}', timeout {:?})",
        policy.name,
        policy.data_binding,
        limits.timeout()
    );
    let engine = NativeEngine::with_limits(policy, limits)?;
    Ok(QuerySandbox::new(Box::new(engine)))
}

/// Create default sandbox
pub fn create_default_sandbox() -> Result<QuerySandbox> {
    create_sandbox_with_options(SandboxOptions::default())
}

/// Create sandbox from `QUERYSANDBOX_*` environment variables
pub fn create_sandbox_from_env() -> Result<QuerySandbox> {
    create_sandbox_with_options(SandboxConfig::from_env()?.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SandboxError;
    use std::io::Write;

    #[test]
    fn test_default_sandbox() {
        let sandbox = create_default_sandbox().unwrap();
        let caps = sandbox.capabilities();
        assert_eq!(caps.data_binding, "df");
        assert!(caps.charts);
        assert_eq!(caps.limits, ResourceLimits::default());
    }

    #[test]
    fn test_strict_profile() {
        let sandbox =
            create_sandbox_with_options(SandboxOptions::for_profile(SecurityProfile::Strict)).unwrap();
        assert_eq!(sandbox.capabilities().limits, SecurityProfile::Strict.resource_limits());
        assert!(!sandbox.validate("for x in range(3):\n    print(x)").accepted);
    }

    #[test]
    fn test_policy_file() {
        let policy = CapabilityPolicy::custom(CapabilityPolicy::stats_only())
            .name("From File")
            .data_binding("orders")
            .build()
            .unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&policy).unwrap().as_bytes())
            .unwrap();

        let options = SandboxOptions {
            policy_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let sandbox = create_sandbox_with_options(options).unwrap();
        assert_eq!(sandbox.capabilities().policy, "From File");
        assert_eq!(sandbox.capabilities().data_binding, "orders");
    }

    #[test]
    fn test_misconfigured_policy_is_fatal() {
        let mut policy = CapabilityPolicy::data_analysis();
        policy.allowed_callables.clear();
        let err = create_sandbox_with_options(SandboxOptions::default().with_policy(policy))
            .err()
            .unwrap();
        assert!(matches!(err, SandboxError::PolicyMisconfigured(_)));
    }
}
