//! Capability Policy System
//!
//! A policy is the allow-list a candidate program is checked against and the
//! recipe the execution context is built from:
//!
//! 1. **Node kinds** - syntactic constructs that are rejected outright
//! 2. **Templates** - pre-built policies for common deployments
//! 3. **Policy manager** - template selection and JSON policy files
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Policy Manager                                              │
//! │  - Holds templates and policies loaded from JSON files       │
//! │  - Hands out the selected policy as Arc<CapabilityPolicy>    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Capability Policy (immutable after check())                 │
//! │  - data binding, allowed callables, allowed attributes       │
//! │  - forbidden node kinds                                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Node kinds                                                  │
//! │  - imports, dynamic evaluation, reserved names, loops, ...   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything not named by a policy is unreachable: identifiers and attributes
//! are allow-listed, never deny-listed.

use crate::errors::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// NODE KINDS
// ============================================================================

/// A structural construct the validator can flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Import,
    ImportFrom,
    FunctionDef,
    ClassDef,
    Lambda,
    Global,
    Nonlocal,
    Delete,
    With,
    Try,
    Raise,
    Assert,
    Yield,
    Await,
    Return,
    While,
    For,
    Comprehension,
    ItemAssignment,
    AttributeAssignment,
    /// Calls to eval/exec/getattr/open and the other reflective or I/O builtins
    DynamicEvaluation,
    /// Identifiers or attributes starting or ending with `__`
    ReservedName,
    DisallowedAttribute,
    DisallowedCall,
    UnknownName,
    Unparsable,
}

impl NodeKind {
    /// Kinds every policy must forbid. A policy missing one of these fails
    /// [`CapabilityPolicy::check`].
    pub const ALWAYS_FORBIDDEN: [NodeKind; 8] = [
        NodeKind::Import,
        NodeKind::ImportFrom,
        NodeKind::ClassDef,
        NodeKind::Global,
        NodeKind::Nonlocal,
        NodeKind::DynamicEvaluation,
        NodeKind::ReservedName,
        NodeKind::AttributeAssignment,
    ];

    /// Kinds produced by the allow-list walk itself; they are reported whether
    /// or not a policy lists them.
    pub fn is_allow_list_outcome(&self) -> bool {
        matches!(
            self,
            NodeKind::DisallowedAttribute
                | NodeKind::DisallowedCall
                | NodeKind::UnknownName
                | NodeKind::Unparsable
        )
    }

    /// Human-readable description used in violation messages
    pub fn description(&self) -> &'static str {
        match self {
            NodeKind::Import => "import statement",
            NodeKind::ImportFrom => "from-import statement",
            NodeKind::FunctionDef => "function definition",
            NodeKind::ClassDef => "class definition",
            NodeKind::Lambda => "lambda expression",
            NodeKind::Global => "global declaration",
            NodeKind::Nonlocal => "nonlocal declaration",
            NodeKind::Delete => "del statement",
            NodeKind::With => "with statement",
            NodeKind::Try => "try statement",
            NodeKind::Raise => "raise statement",
            NodeKind::Assert => "assert statement",
            NodeKind::Yield => "yield expression",
            NodeKind::Await => "await expression",
            NodeKind::Return => "return statement",
            NodeKind::While => "while loop",
            NodeKind::For => "for loop",
            NodeKind::Comprehension => "comprehension",
            NodeKind::ItemAssignment => "item assignment",
            NodeKind::AttributeAssignment => "attribute assignment",
            NodeKind::DynamicEvaluation => "dynamic evaluation",
            NodeKind::ReservedName => "reserved name",
            NodeKind::DisallowedAttribute => "disallowed attribute",
            NodeKind::DisallowedCall => "disallowed call",
            NodeKind::UnknownName => "unknown name",
            NodeKind::Unparsable => "unparsable program",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Builtins that evaluate code, reflect on objects or reach the host. A call to
/// any of these is a [`NodeKind::DynamicEvaluation`] violation and no policy
/// may allow-list them.
pub const DYNAMIC_EVALUATION_NAMES: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "globals",
    "locals",
    "vars",
    "dir",
    "type",
    "super",
    "object",
    "id",
    "open",
    "input",
    "breakpoint",
    "help",
    "exit",
    "quit",
    "memoryview",
];

/// Whether `name` uses the reserved `__` marker
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with("__") || name.ends_with("__")
}

// ============================================================================
// CAPABILITY SURFACE - names the host registry knows how to bind
// ============================================================================

pub(crate) const BUILTIN_CALLABLES: &[&str] = &[
    "len", "range", "min", "max", "sum", "abs", "round", "sorted", "str", "int", "float", "bool",
    "list", "dict", "tuple", "set", "enumerate", "zip", "print", "any", "all", "reversed",
];

pub(crate) const PLOTTING_CALLABLES: &[&str] = &["px"];
pub(crate) const NUMERIC_CALLABLES: &[&str] = &["np", "pd"];

pub(crate) const TABLE_ATTRIBUTES: &[&str] = &[
    "columns", "shape", "dtypes", "empty", "size", "head", "tail", "sort_values", "groupby",
    "describe", "dropna", "fillna", "nlargest", "nsmallest", "sum", "mean", "median", "min",
    "max", "std", "var", "count", "round", "abs", "rename", "reset_index", "copy", "isnull",
    "notnull", "drop_duplicates", "drop", "corr", "to_dict", "nunique",
];

pub(crate) const SERIES_ATTRIBUTES: &[&str] = &[
    "name", "dtype", "str", "unique", "value_counts", "tolist", "to_list", "astype", "apply",
    "isin", "cumsum", "quantile", "agg",
];

pub(crate) const TEXT_ATTRIBUTES: &[&str] = &[
    "contains", "lower", "upper", "startswith", "endswith", "len", "strip", "lstrip", "rstrip",
    "split", "replace", "join", "title", "capitalize", "find", "format",
];

pub(crate) const COLLECTION_ATTRIBUTES: &[&str] = &[
    "append", "extend", "index", "keys", "values", "items", "get",
];

pub(crate) const PLOTTING_ATTRIBUTES: &[&str] = &[
    "bar", "line", "scatter", "histogram", "pie", "box", "area", "update_layout", "show",
];

pub(crate) const NUMERIC_ATTRIBUTES: &[&str] = &[
    "sqrt", "log", "percentile", "nan", "pi", "DataFrame", "Series",
];

fn names(groups: &[&[&str]]) -> BTreeSet<String> {
    groups
        .iter()
        .flat_map(|g| g.iter())
        .map(|s| s.to_string())
        .collect()
}

// ============================================================================
// CAPABILITY POLICY
// ============================================================================

/// Immutable allow-list a candidate program is validated against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityPolicy {
    /// Human-readable name for this policy
    pub name: String,
    /// Description of what this policy is for
    #[serde(default)]
    pub description: String,
    /// Identifier the dataset is bound to inside the program
    pub data_binding: String,
    /// Top-level identifiers a program may reference or call
    pub allowed_callables: BTreeSet<String>,
    /// Attribute names a program may access
    pub allowed_attributes: BTreeSet<String>,
    /// Constructs rejected wherever they appear
    pub forbidden_node_kinds: BTreeSet<NodeKind>,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::data_analysis()
    }
}

impl CapabilityPolicy {
    /// Startup check. A failure here is fatal: a misconfigured policy must
    /// never reach request handling.
    pub fn check(&self) -> Result<()> {
        if self.allowed_callables.is_empty() {
            return Err(SandboxError::PolicyMisconfigured(format!(
                "policy '{}' has an empty callable allow-list",
                self.name
            )));
        }
        if self.allowed_attributes.is_empty() {
            return Err(SandboxError::PolicyMisconfigured(format!(
                "policy '{}' has an empty attribute allow-list",
                self.name
            )));
        }
        if !is_identifier(&self.data_binding) || is_reserved_name(&self.data_binding) {
            return Err(SandboxError::PolicyMisconfigured(format!(
                "policy '{}' has an invalid data binding '{}'",
                self.name, self.data_binding
            )));
        }
        if self.allowed_callables.contains(&self.data_binding) {
            return Err(SandboxError::PolicyMisconfigured(format!(
                "data binding '{}' collides with an allowed callable",
                self.data_binding
            )));
        }
        let missing: Vec<String> = NodeKind::ALWAYS_FORBIDDEN
            .iter()
            .filter(|kind| !self.forbidden_node_kinds.contains(kind))
            .map(|kind| kind.description().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SandboxError::PolicyMisconfigured(format!(
                "policy '{}' must forbid: {}",
                self.name,
                missing.join(", ")
            )));
        }
        let reflective: Vec<&String> = self
            .allowed_callables
            .iter()
            .chain(self.allowed_attributes.iter())
            .filter(|name| DYNAMIC_EVALUATION_NAMES.contains(&name.as_str()) || is_reserved_name(name))
            .collect();
        if !reflective.is_empty() {
            return Err(SandboxError::PolicyMisconfigured(format!(
                "policy '{}' allow-lists reflective names: {:?}",
                self.name, reflective
            )));
        }
        Ok(())
    }

    pub fn forbids(&self, kind: NodeKind) -> bool {
        self.forbidden_node_kinds.contains(&kind)
    }

    pub fn allows_callable(&self, name: &str) -> bool {
        self.allowed_callables.contains(name)
    }

    pub fn allows_attribute(&self, name: &str) -> bool {
        self.allowed_attributes.contains(name)
    }

    /// Whether chart helpers are reachable under this policy
    pub fn allows_charts(&self) -> bool {
        PLOTTING_CALLABLES.iter().any(|c| self.allows_callable(c))
    }

    // ========================================================================
    // TEMPLATES - Pre-built policies for common use cases
    // ========================================================================

    /// Data analysis mode - tables, numeric helpers and charts (default)
    pub fn data_analysis() -> Self {
        Self {
            name: "Data Analysis".to_string(),
            description: "Table queries, numeric helpers and charts over the loaded dataset."
                .to_string(),
            data_binding: "df".to_string(),
            allowed_callables: names(&[BUILTIN_CALLABLES, PLOTTING_CALLABLES, NUMERIC_CALLABLES]),
            allowed_attributes: names(&[
                TABLE_ATTRIBUTES,
                SERIES_ATTRIBUTES,
                TEXT_ATTRIBUTES,
                COLLECTION_ATTRIBUTES,
                PLOTTING_ATTRIBUTES,
                NUMERIC_ATTRIBUTES,
            ]),
            forbidden_node_kinds: NodeKind::ALWAYS_FORBIDDEN
                .iter()
                .copied()
                .chain([
                    NodeKind::FunctionDef,
                    NodeKind::Delete,
                    NodeKind::With,
                    NodeKind::Try,
                    NodeKind::Raise,
                    NodeKind::Assert,
                    NodeKind::Yield,
                    NodeKind::Await,
                    NodeKind::Return,
                ])
                .collect(),
        }
    }

    /// Stats-only mode - like data analysis, without chart construction
    pub fn stats_only() -> Self {
        let base = Self::data_analysis();
        let plotting = names(&[PLOTTING_CALLABLES, PLOTTING_ATTRIBUTES]);
        Self {
            name: "Stats Only".to_string(),
            description: "Table queries and numeric helpers; no charts.".to_string(),
            allowed_callables: base
                .allowed_callables
                .difference(&plotting)
                .cloned()
                .collect(),
            allowed_attributes: base
                .allowed_attributes
                .difference(&plotting)
                .cloned()
                .collect(),
            ..base
        }
    }

    /// Strict mode - expression-style analysis only: no loops, lambdas,
    /// comprehensions or item assignment
    pub fn strict() -> Self {
        let mut policy = Self::data_analysis();
        policy.name = "Strict".to_string();
        policy.description =
            "Straight-line expressions over the dataset; no loops or local functions.".to_string();
        policy.forbidden_node_kinds.extend([
            NodeKind::While,
            NodeKind::For,
            NodeKind::Lambda,
            NodeKind::Comprehension,
            NodeKind::ItemAssignment,
        ]);
        policy
    }

    /// Create a custom policy starting from a template
    pub fn custom(base: Self) -> CapabilityPolicyBuilder {
        CapabilityPolicyBuilder { policy: base }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Builder for creating custom policies
pub struct CapabilityPolicyBuilder {
    policy: CapabilityPolicy,
}

impl CapabilityPolicyBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.policy.name = name.to_string();
        self
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.policy.description = desc.to_string();
        self
    }

    pub fn data_binding(mut self, name: &str) -> Self {
        self.policy.data_binding = name.to_string();
        self
    }

    pub fn allow_callable(mut self, name: &str) -> Self {
        self.policy.allowed_callables.insert(name.to_string());
        self
    }

    pub fn deny_callable(mut self, name: &str) -> Self {
        self.policy.allowed_callables.remove(name);
        self
    }

    pub fn allow_attribute(mut self, name: &str) -> Self {
        self.policy.allowed_attributes.insert(name.to_string());
        self
    }

    pub fn deny_attribute(mut self, name: &str) -> Self {
        self.policy.allowed_attributes.remove(name);
        self
    }

    pub fn forbid(mut self, kind: NodeKind) -> Self {
        self.policy.forbidden_node_kinds.insert(kind);
        self
    }

    pub fn permit(mut self, kind: NodeKind) -> Self {
        self.policy.forbidden_node_kinds.remove(&kind);
        self
    }

    /// Finish the policy, running the startup check
    pub fn build(self) -> Result<CapabilityPolicy> {
        self.policy.check()?;
        Ok(self.policy)
    }
}

// ============================================================================
// POLICY MANAGER - Loads and manages policies
// ============================================================================

/// Manages policy templates, policy files and the selected policy
pub struct PolicyManager {
    templates: HashMap<String, CapabilityPolicy>,
    selected_policy: String,
}

impl PolicyManager {
    /// Create a new policy manager
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert("data_analysis".to_string(), CapabilityPolicy::data_analysis());
        templates.insert("stats_only".to_string(), CapabilityPolicy::stats_only());
        templates.insert("strict".to_string(), CapabilityPolicy::strict());

        Self {
            templates,
            selected_policy: "data_analysis".to_string(),
        }
    }

    /// Load a policy from a JSON file and register it under `id`
    pub fn load_policy_file(&mut self, id: &str, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let policy: CapabilityPolicy = serde_json::from_str(&content)?;
        policy.check()?;
        tracing::info!("[POLICY] Loaded policy '{}' from {:?}", policy.name, path);
        self.templates.insert(id.to_string(), policy);
        Ok(())
    }

    /// Add a custom template
    pub fn add_template(&mut self, id: &str, policy: CapabilityPolicy) -> Result<()> {
        policy.check()?;
        self.templates.insert(id.to_string(), policy);
        Ok(())
    }

    /// List available templates as (id, description)
    pub fn list_templates(&self) -> Vec<(&str, &str)> {
        let mut listed: Vec<(&str, &str)> = self
            .templates
            .iter()
            .map(|(id, policy)| (id.as_str(), policy.description.as_str()))
            .collect();
        listed.sort();
        listed
    }

    /// Select a policy by id
    pub fn select_policy(&mut self, id: &str) -> Result<()> {
        if self.templates.contains_key(id) {
            self.selected_policy = id.to_string();
            Ok(())
        } else {
            let mut available: Vec<&String> = self.templates.keys().collect();
            available.sort();
            Err(SandboxError::UnknownPolicy(format!(
                "{}. Available: {:?}",
                id, available
            )))
        }
    }

    /// The selected policy, checked and frozen behind an `Arc`
    pub fn effective_policy(&self) -> Result<Arc<CapabilityPolicy>> {
        let policy = self
            .templates
            .get(&self.selected_policy)
            .cloned()
            .unwrap_or_else(CapabilityPolicy::data_analysis);
        policy.check()?;
        Ok(Arc::new(policy))
    }
}

impl Default for PolicyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_templates_pass_startup_check() {
        for policy in [
            CapabilityPolicy::data_analysis(),
            CapabilityPolicy::stats_only(),
            CapabilityPolicy::strict(),
        ] {
            policy.check().unwrap();
        }
    }

    #[test]
    fn test_stats_only_drops_plotting() {
        let policy = CapabilityPolicy::stats_only();
        assert!(!policy.allows_callable("px"));
        assert!(!policy.allows_attribute("bar"));
        assert!(policy.allows_attribute("sum"));
        assert!(!policy.allows_charts());
        assert!(CapabilityPolicy::data_analysis().allows_charts());
    }

    #[test]
    fn test_strict_forbids_loops() {
        let policy = CapabilityPolicy::strict();
        assert!(policy.forbids(NodeKind::While));
        assert!(policy.forbids(NodeKind::Lambda));
        assert!(!CapabilityPolicy::data_analysis().forbids(NodeKind::While));
    }

    #[test]
    fn test_empty_allow_list_is_fatal() {
        let mut policy = CapabilityPolicy::data_analysis();
        policy.allowed_callables.clear();
        assert!(matches!(
            policy.check(),
            Err(SandboxError::PolicyMisconfigured(_))
        ));
    }

    #[test]
    fn test_always_forbidden_kinds_cannot_be_permitted() {
        let result = CapabilityPolicy::custom(CapabilityPolicy::data_analysis())
            .permit(NodeKind::Import)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_reflective_callable_is_rejected() {
        let result = CapabilityPolicy::custom(CapabilityPolicy::data_analysis())
            .allow_callable("getattr")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_builder() {
        let policy = CapabilityPolicy::custom(CapabilityPolicy::data_analysis())
            .name("Sales desk")
            .data_binding("data")
            .deny_callable("print")
            .forbid(NodeKind::While)
            .build()
            .unwrap();

        assert_eq!(policy.name, "Sales desk");
        assert_eq!(policy.data_binding, "data");
        assert!(!policy.allows_callable("print"));
        assert!(policy.forbids(NodeKind::While));
    }

    #[test]
    fn test_invalid_data_binding() {
        let result = CapabilityPolicy::custom(CapabilityPolicy::data_analysis())
            .data_binding("__df__")
            .build();
        assert!(result.is_err());

        let result = CapabilityPolicy::custom(CapabilityPolicy::data_analysis())
            .data_binding("len")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_manager_loads_policy_file() {
        let policy = CapabilityPolicy::custom(CapabilityPolicy::strict())
            .name("From disk")
            .build()
            .unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&policy).unwrap()).unwrap();

        let mut manager = PolicyManager::new();
        manager.load_policy_file("disk", file.path()).unwrap();
        manager.select_policy("disk").unwrap();
        let effective = manager.effective_policy().unwrap();
        assert_eq!(effective.name, "From disk");
        assert!(effective.forbids(NodeKind::For));
    }

    #[test]
    fn test_manager_rejects_unknown_policy() {
        let mut manager = PolicyManager::new();
        assert!(matches!(
            manager.select_policy("yolo"),
            Err(SandboxError::UnknownPolicy(_))
        ));
        assert_eq!(manager.list_templates().len(), 3);
    }
}
