//! The restricted namespace a candidate program runs inside.

use crate::builtins::lookup_global;
use crate::policy::CapabilityPolicy;
use crate::table::Table;
use crate::value::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

/// The dataset under the policy's data binding plus the helpers the policy
/// names. Built fresh for every run and moved into the run thread.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    bindings: HashMap<String, Value>,
    allowed_attributes: Arc<BTreeSet<String>>,
    data_binding: String,
}

impl ExecutionContext {
    pub fn build(policy: &CapabilityPolicy, data: Arc<Table>) -> Self {
        let mut bindings = HashMap::with_capacity(policy.allowed_callables.len() + 1);
        for name in &policy.allowed_callables {
            match lookup_global(name) {
                Some(helper) => {
                    bindings.insert(name.clone(), helper);
                }
                None => warn!(
                    "[POLICY] Policy '{}' allows '{}' but no helper is registered under that name",
                    policy.name, name
                ),
            }
        }
        bindings.insert(policy.data_binding.clone(), Value::Table(data));
        Self {
            bindings,
            allowed_attributes: Arc::new(policy.allowed_attributes.clone()),
            data_binding: policy.data_binding.clone(),
        }
    }

    pub fn data_binding(&self) -> &str {
        &self.data_binding
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bound identifiers, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn into_parts(self) -> (HashMap<String, Value>, Arc<BTreeSet<String>>) {
        (self.bindings, self.allowed_attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::NodeKind;

    fn data() -> Arc<Table> {
        Arc::new(Table::from_json_str(r#"[{"a": 1}]"#).unwrap())
    }

    #[test]
    fn test_context_holds_only_allowed_names() {
        let policy = CapabilityPolicy::data_analysis();
        let context = ExecutionContext::build(&policy, data());
        for name in context.names() {
            assert!(
                name == policy.data_binding || policy.allowed_callables.contains(name),
                "unexpected binding {}",
                name
            );
        }
        assert!(context.contains("df"));
        assert!(context.contains("len"));
        assert!(context.contains("px"));
        assert!(!context.contains("open"));
    }

    #[test]
    fn test_stats_only_has_no_plotting() {
        let context = ExecutionContext::build(&CapabilityPolicy::stats_only(), data());
        assert!(!context.contains("px"));
        assert!(context.contains("np"));
    }

    #[test]
    fn test_unknown_helpers_are_skipped() {
        let policy = CapabilityPolicy::custom(CapabilityPolicy::strict())
            .data_binding("sales")
            .allow_callable("frobnicate")
            .forbid(NodeKind::Lambda)
            .build()
            .unwrap();
        let context = ExecutionContext::build(&policy, data());
        assert_eq!(context.data_binding(), "sales");
        assert!(context.contains("sales"));
        assert!(!context.contains("frobnicate"));
        assert!(!context.contains("df"));
    }
}
