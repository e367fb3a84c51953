use crate::errors::{Result, SandboxError};
use crate::policy::CapabilityPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Security profile for candidate program execution
/// Picks the capability policy template and the resource limits
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProfile {
    /// Table queries, numeric helpers, charts, loops and lambdas
    #[default]
    DataAnalysis,

    /// Data analysis without chart construction
    StatsOnly,

    /// Expression-style analysis: no loops, lambdas or item assignment,
    /// tighter limits
    Strict,
}

impl SecurityProfile {
    /// Policy template backing this profile
    pub fn policy(&self) -> CapabilityPolicy {
        match self {
            SecurityProfile::DataAnalysis => CapabilityPolicy::data_analysis(),
            SecurityProfile::StatsOnly => CapabilityPolicy::stats_only(),
            SecurityProfile::Strict => CapabilityPolicy::strict(),
        }
    }

    /// Get resource limits for this profile
    pub fn resource_limits(&self) -> ResourceLimits {
        match self {
            SecurityProfile::DataAnalysis | SecurityProfile::StatsOnly => {
                ResourceLimits::default()
            }
            SecurityProfile::Strict => ResourceLimits {
                timeout_ms: 2_000,
                max_rows: 200,
                max_output_bytes: 16 * 1024,
                max_collection_len: 100_000,
                max_program_bytes: 16 * 1024,
                max_call_depth: 16,
            },
        }
    }

    /// Template id in [`crate::PolicyManager`]
    pub fn policy_id(&self) -> &'static str {
        match self {
            SecurityProfile::DataAnalysis => "data_analysis",
            SecurityProfile::StatsOnly => "stats_only",
            SecurityProfile::Strict => "strict",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "data_analysis" | "default" => Some(SecurityProfile::DataAnalysis),
            "stats_only" | "stats" => Some(SecurityProfile::StatsOnly),
            "strict" => Some(SecurityProfile::Strict),
            _ => None,
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            SecurityProfile::DataAnalysis => "Table queries, numeric helpers and charts",
            SecurityProfile::StatsOnly => "Table queries and numeric helpers, no charts",
            SecurityProfile::Strict => "Expression-style analysis under tight limits",
        }
    }
}

/// Per-run resource limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Wall-clock budget of a run in milliseconds
    pub timeout_ms: u64,
    /// Rows kept in a tabular result before truncation
    pub max_rows: usize,
    /// Printed text kept per run
    pub max_output_bytes: usize,
    /// Longest list, string or range a program may build
    pub max_collection_len: usize,
    /// Largest accepted program text
    pub max_program_bytes: usize,
    /// Deepest nesting of program-defined function calls
    pub max_call_depth: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_rows: 1_000,
            max_output_bytes: 64 * 1024,
            max_collection_len: 1_000_000,
            max_program_bytes: 64 * 1024,
            max_call_depth: 64,
        }
    }
}

impl ResourceLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Rejects limits that would make every run fail
    pub fn check(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(SandboxError::InvalidConfig("timeout_ms must be positive".into()));
        }
        if self.max_rows == 0 || self.max_collection_len == 0 || self.max_program_bytes == 0 {
            return Err(SandboxError::InvalidConfig(
                "max_rows, max_collection_len and max_program_bytes must be positive".into(),
            ));
        }
        if self.max_call_depth == 0 {
            return Err(SandboxError::InvalidConfig("max_call_depth must be positive".into()));
        }
        Ok(())
    }
}

/// Process-wide configuration, read once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub profile: SecurityProfile,
    /// JSON policy file replacing the profile's template
    pub policy_file: Option<PathBuf>,
    pub limits: ResourceLimits,
}

impl SandboxConfig {
    pub fn for_profile(profile: SecurityProfile) -> Self {
        Self {
            profile,
            policy_file: None,
            limits: profile.resource_limits(),
        }
    }

    /// Reads `QUERYSANDBOX_PROFILE`, `QUERYSANDBOX_POLICY_FILE`,
    /// `QUERYSANDBOX_TIMEOUT_SECS` and `QUERYSANDBOX_MAX_ROWS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let profile = match lookup("QUERYSANDBOX_PROFILE") {
            Some(name) => SecurityProfile::parse(&name).ok_or_else(|| {
                SandboxError::InvalidConfig(format!("unknown profile '{}'", name))
            })?,
            None => SecurityProfile::default(),
        };
        let mut config = Self::for_profile(profile);
        config.policy_file = lookup("QUERYSANDBOX_POLICY_FILE")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        if let Some(secs) = lookup("QUERYSANDBOX_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                SandboxError::InvalidConfig(format!("QUERYSANDBOX_TIMEOUT_SECS: '{}'", secs))
            })?;
            config.limits.timeout_ms = secs.saturating_mul(1_000);
        }
        if let Some(rows) = lookup("QUERYSANDBOX_MAX_ROWS") {
            config.limits.max_rows = rows.trim().parse().map_err(|_| {
                SandboxError::InvalidConfig(format!("QUERYSANDBOX_MAX_ROWS: '{}'", rows))
            })?;
        }
        config.limits.check()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.profile, SecurityProfile::DataAnalysis);
        assert_eq!(config.limits, ResourceLimits::default());
        assert!(config.policy_file.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = SandboxConfig::from_lookup(lookup(&[
            ("QUERYSANDBOX_PROFILE", "stats-only"),
            ("QUERYSANDBOX_TIMEOUT_SECS", "3"),
            ("QUERYSANDBOX_MAX_ROWS", "50"),
            ("QUERYSANDBOX_POLICY_FILE", "/etc/qs/policy.json"),
        ]))
        .unwrap();
        assert_eq!(config.profile, SecurityProfile::StatsOnly);
        assert_eq!(config.limits.timeout(), Duration::from_secs(3));
        assert_eq!(config.limits.max_rows, 50);
        assert_eq!(config.policy_file, Some(PathBuf::from("/etc/qs/policy.json")));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(SandboxConfig::from_lookup(lookup(&[("QUERYSANDBOX_PROFILE", "yolo")])).is_err());
        assert!(SandboxConfig::from_lookup(lookup(&[("QUERYSANDBOX_TIMEOUT_SECS", "soon")])).is_err());
        assert!(SandboxConfig::from_lookup(lookup(&[("QUERYSANDBOX_TIMEOUT_SECS", "0")])).is_err());
    }

    #[test]
    fn test_strict_profile_is_tighter() {
        let strict = SecurityProfile::Strict.resource_limits();
        let default = ResourceLimits::default();
        assert!(strict.timeout_ms < default.timeout_ms);
        assert!(strict.max_collection_len < default.max_collection_len);
        assert!(SecurityProfile::Strict.policy().forbids(crate::policy::NodeKind::While));
    }
}
