//! Static validation of candidate programs against a capability policy.
//!
//! The validator parses the program text and walks every node. It never runs
//! anything, so a verdict depends only on the text and the policy.

use crate::interpreter::EXCEPTION_NAMES;
use crate::policy::{is_reserved_name, CapabilityPolicy, NodeKind, DYNAMIC_EVALUATION_NAMES};
use crate::syntax::ast::{
    Comprehension, ExceptHandler, Expr, ExprKind, FStringPart, Location, Param, Program, Stmt,
    StmtKind,
};
use crate::syntax::parse_program;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// One reason a program was rejected
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Violation {
    pub node_kind: NodeKind,
    pub location: Location,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub accepted: bool,
    /// Ordered by location, then discovery order
    pub violations: Vec<Violation>,
}

impl ValidationVerdict {
    fn from_violations(mut violations: Vec<Violation>) -> Self {
        violations.sort_by_key(|v| v.location);
        let mut unique: Vec<Violation> = Vec::with_capacity(violations.len());
        for violation in violations {
            if !unique.contains(&violation) {
                unique.push(violation);
            }
        }
        Self {
            accepted: unique.is_empty(),
            violations: unique,
        }
    }

    /// Whether any violation is of `kind`
    pub fn has(&self, kind: NodeKind) -> bool {
        self.violations.iter().any(|v| v.node_kind == kind)
    }

    /// `line 1, column 1: import statement is not allowed (os)` per line
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("{}: {}", v.location, v.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Validates `program` with the default program size limit
pub fn validate(program: &str, policy: &CapabilityPolicy) -> ValidationVerdict {
    Validator::new(policy).validate(program)
}

pub struct Validator<'p> {
    policy: &'p CapabilityPolicy,
    max_program_bytes: usize,
}

impl<'p> Validator<'p> {
    pub fn new(policy: &'p CapabilityPolicy) -> Self {
        Self {
            policy,
            max_program_bytes: crate::config::ResourceLimits::default().max_program_bytes,
        }
    }

    pub fn with_max_program_bytes(mut self, max_program_bytes: usize) -> Self {
        self.max_program_bytes = max_program_bytes;
        self
    }

    pub fn validate(&self, program: &str) -> ValidationVerdict {
        if program.len() > self.max_program_bytes {
            info!(
                "[VALIDATOR] Program rejected: {} bytes exceeds {}",
                program.len(),
                self.max_program_bytes
            );
            return ValidationVerdict::from_violations(vec![Violation {
                node_kind: NodeKind::Unparsable,
                location: Location::new(1, 1),
                message: format!(
                    "program too large ({} bytes, limit {})",
                    program.len(),
                    self.max_program_bytes
                ),
            }]);
        }

        let tree = match parse_program(program) {
            Ok(tree) => tree,
            Err(err) => {
                info!("[VALIDATOR] Program rejected: syntax error at {}", err.loc);
                return ValidationVerdict::from_violations(vec![Violation {
                    node_kind: NodeKind::Unparsable,
                    location: err.loc,
                    message: err.message,
                }]);
            }
        };

        let mut walk = Walk {
            policy: self.policy,
            bound: bound_names(&tree),
            violations: Vec::new(),
        };
        walk.block(&tree.body);
        let verdict = ValidationVerdict::from_violations(walk.violations);
        if verdict.accepted {
            debug!("[VALIDATOR] Program accepted ({} bytes)", program.len());
        } else {
            info!(
                "[VALIDATOR] Program rejected with {} violation(s)",
                verdict.violations.len()
            );
        }
        verdict
    }
}

// ============================================================================
// BOUND NAMES - everything the program binds itself, anywhere
// ============================================================================

fn bound_names(program: &Program) -> HashSet<String> {
    let mut names = HashSet::new();
    for stmt in &program.body {
        bind_stmt(stmt, &mut names);
    }
    names
}

fn bind_target(target: &Expr, names: &mut HashSet<String>) {
    match &target.kind {
        ExprKind::Name(name) => {
            names.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                bind_target(item, names);
            }
        }
        _ => {}
    }
}

fn bind_params(params: &[Param], names: &mut HashSet<String>) {
    for param in params {
        names.insert(param.name.clone());
    }
}

fn bind_stmt(stmt: &Stmt, names: &mut HashSet<String>) {
    match &stmt.kind {
        StmtKind::Expr(expr) => bind_expr(expr, names),
        StmtKind::Assign { targets, value } => {
            for target in targets {
                bind_target(target, names);
            }
            bind_expr(value, names);
        }
        StmtKind::AugAssign { target, value, .. } => {
            bind_target(target, names);
            bind_expr(value, names);
        }
        StmtKind::If { test, body, orelse } => {
            bind_expr(test, names);
            body.iter().chain(orelse).for_each(|s| bind_stmt(s, names));
        }
        StmtKind::For { target, iter, body } => {
            bind_target(target, names);
            bind_expr(iter, names);
            body.iter().for_each(|s| bind_stmt(s, names));
        }
        StmtKind::While { test, body } => {
            bind_expr(test, names);
            body.iter().for_each(|s| bind_stmt(s, names));
        }
        StmtKind::FunctionDef { name, params, body } => {
            names.insert(name.clone());
            bind_params(params, names);
            body.iter().for_each(|s| bind_stmt(s, names));
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            for handler in handlers {
                if let Some(name) = &handler.name {
                    names.insert(name.clone());
                }
                handler.body.iter().for_each(|s| bind_stmt(s, names));
            }
            body.iter()
                .chain(orelse)
                .chain(finalbody)
                .for_each(|s| bind_stmt(s, names));
        }
        StmtKind::With { items, body } => {
            for item in items {
                if let Some(target) = &item.target {
                    bind_target(target, names);
                }
            }
            body.iter().for_each(|s| bind_stmt(s, names));
        }
        StmtKind::ClassDef { body, .. } => body.iter().for_each(|s| bind_stmt(s, names)),
        _ => {}
    }
}

/// Lambda parameters and comprehension targets bind inside expressions
fn bind_expr(expr: &Expr, names: &mut HashSet<String>) {
    let mut stack = vec![expr];
    while let Some(expr) = stack.pop() {
        match &expr.kind {
            ExprKind::Lambda { params, body } => {
                bind_params(params, names);
                stack.push(body);
            }
            ExprKind::ListComp { elt, generators } => {
                generators.iter().for_each(|g| bind_target(&g.target, names));
                stack.push(elt);
                stack.extend(generators.iter().map(|g| &g.iter));
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                generators.iter().for_each(|g| bind_target(&g.target, names));
                stack.push(key);
                stack.push(value);
                stack.extend(generators.iter().map(|g| &g.iter));
            }
            ExprKind::Call { func, args, keywords } => {
                stack.push(func);
                stack.extend(args);
                stack.extend(keywords.iter().map(|k| &k.value));
            }
            ExprKind::Attribute { value, .. } => stack.push(value),
            ExprKind::Subscript { value, index } => {
                stack.push(value);
                stack.push(index);
            }
            ExprKind::Binary { left, right, .. } => {
                stack.push(left);
                stack.push(right);
            }
            ExprKind::Unary { operand, .. } => stack.push(operand),
            ExprKind::BoolOp { values, .. } => stack.extend(values),
            ExprKind::Compare {
                left, comparators, ..
            } => {
                stack.push(left);
                stack.extend(comparators);
            }
            ExprKind::IfExp { test, body, orelse } => {
                stack.push(test);
                stack.push(body);
                stack.push(orelse);
            }
            ExprKind::List(items) | ExprKind::Tuple(items) => stack.extend(items),
            ExprKind::Dict(pairs) => {
                for (k, v) in pairs {
                    stack.push(k);
                    stack.push(v);
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// WALK
// ============================================================================

struct Walk<'p> {
    policy: &'p CapabilityPolicy,
    bound: HashSet<String>,
    violations: Vec<Violation>,
}

impl Walk<'_> {
    fn record(&mut self, kind: NodeKind, location: Location, message: String) {
        self.violations.push(Violation {
            node_kind: kind,
            location,
            message,
        });
    }

    /// Records `kind` when the policy forbids it
    fn construct(&mut self, kind: NodeKind, location: Location) {
        if self.policy.forbids(kind) {
            self.record(kind, location, format!("{} is not allowed", kind.description()));
        }
    }

    fn reserved(&mut self, name: &str, location: Location) -> bool {
        if is_reserved_name(name) {
            self.record(
                NodeKind::ReservedName,
                location,
                format!("reserved name '{}' is not allowed", name),
            );
            return true;
        }
        false
    }

    fn known(&self, name: &str) -> bool {
        name == self.policy.data_binding
            || self.policy.allows_callable(name)
            || self.bound.contains(name)
    }

    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let loc = stmt.loc;
        match &stmt.kind {
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.target(target);
                }
                self.expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target);
                self.expr(value);
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test);
                self.block(body);
                self.block(orelse);
            }
            StmtKind::For { target, iter, body } => {
                self.construct(NodeKind::For, loc);
                self.target(target);
                self.expr(iter);
                self.block(body);
            }
            StmtKind::While { test, body } => {
                self.construct(NodeKind::While, loc);
                self.expr(test);
                self.block(body);
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
            StmtKind::Return(value) => {
                self.construct(NodeKind::Return, loc);
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::Import { modules } => {
                self.record(
                    NodeKind::Import,
                    loc,
                    format!("import statement is not allowed ({})", modules.join(", ")),
                );
            }
            StmtKind::ImportFrom { module, .. } => {
                self.record(
                    NodeKind::ImportFrom,
                    loc,
                    format!("from-import statement is not allowed ({})", module),
                );
            }
            StmtKind::FunctionDef { name, params, body } => {
                self.construct(NodeKind::FunctionDef, loc);
                self.reserved(name, loc);
                self.params(params);
                self.block(body);
            }
            StmtKind::ClassDef { name, bases, body } => {
                self.construct(NodeKind::ClassDef, loc);
                self.reserved(name, loc);
                for base in bases {
                    self.expr(base);
                }
                self.block(body);
            }
            StmtKind::Global(names) => {
                self.construct(NodeKind::Global, loc);
                for name in names {
                    self.reserved(name, loc);
                }
            }
            StmtKind::Nonlocal(names) => {
                self.construct(NodeKind::Nonlocal, loc);
                for name in names {
                    self.reserved(name, loc);
                }
            }
            StmtKind::Delete(targets) => {
                self.construct(NodeKind::Delete, loc);
                for target in targets {
                    self.expr(target);
                }
            }
            StmtKind::With { items, body } => {
                self.construct(NodeKind::With, loc);
                for item in items {
                    self.expr(&item.context);
                    if let Some(target) = &item.target {
                        self.target(target);
                    }
                }
                self.block(body);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.construct(NodeKind::Try, loc);
                self.block(body);
                for handler in handlers {
                    self.handler(handler);
                }
                self.block(orelse);
                self.block(finalbody);
            }
            StmtKind::Raise(exc) => {
                self.construct(NodeKind::Raise, loc);
                if let Some(exc) = exc {
                    self.raised(exc);
                }
            }
            StmtKind::Assert { test, msg } => {
                self.construct(NodeKind::Assert, loc);
                self.expr(test);
                if let Some(msg) = msg {
                    self.expr(msg);
                }
            }
        }
    }

    fn handler(&mut self, handler: &ExceptHandler) {
        if let Some(kind) = &handler.kind {
            let names: Vec<&Expr> = match &kind.kind {
                ExprKind::Tuple(items) => items.iter().collect(),
                _ => vec![kind],
            };
            for name in names {
                match &name.kind {
                    ExprKind::Name(n) if EXCEPTION_NAMES.contains(&n.as_str()) => {}
                    _ => self.expr(name),
                }
            }
        }
        if let Some(name) = &handler.name {
            self.reserved(name, handler.loc);
        }
        self.block(&handler.body);
    }

    /// `raise ValueError("...")` names an exception class, not a callable
    fn raised(&mut self, exc: &Expr) {
        match &exc.kind {
            ExprKind::Name(n) if EXCEPTION_NAMES.contains(&n.as_str()) => {}
            ExprKind::Call {
                func,
                args,
                keywords,
            } if matches!(&func.kind, ExprKind::Name(n) if EXCEPTION_NAMES.contains(&n.as_str())) => {
                for arg in args {
                    self.expr(arg);
                }
                for keyword in keywords {
                    self.expr(&keyword.value);
                }
            }
            _ => self.expr(exc),
        }
    }

    fn params(&mut self, params: &[Param]) {
        for param in params {
            self.reserved(&param.name, param.loc);
            if let Some(default) = &param.default {
                self.expr(default);
            }
        }
    }

    /// Assignment targets: item and attribute stores are constructs of their own
    fn target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.reserved(name, target.loc);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.target(item);
                }
            }
            ExprKind::Subscript { value, index } => {
                self.construct(NodeKind::ItemAssignment, target.loc);
                self.expr(value);
                self.expr(index);
            }
            ExprKind::Attribute { value, attr } => {
                self.record(
                    NodeKind::AttributeAssignment,
                    target.loc,
                    format!("attribute assignment is not allowed ('{}')", attr),
                );
                self.expr(value);
            }
            _ => self.expr(target),
        }
    }

    fn name(&mut self, name: &str, location: Location) {
        if self.reserved(name, location) {
            return;
        }
        if DYNAMIC_EVALUATION_NAMES.contains(&name) {
            self.record(
                NodeKind::DynamicEvaluation,
                location,
                format!("dynamic evaluation is not allowed ('{}')", name),
            );
            return;
        }
        if !self.known(name) {
            self.record(
                NodeKind::UnknownName,
                location,
                format!("name '{}' is not available", name),
            );
        }
    }

    fn generators(&mut self, generators: &[Comprehension]) {
        for generator in generators {
            self.target(&generator.target);
            self.expr(&generator.iter);
            for condition in &generator.ifs {
                self.expr(condition);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        let loc = expr.loc;
        match &expr.kind {
            ExprKind::Const(_) => {}
            ExprKind::FString(parts) => {
                for part in parts {
                    if let FStringPart::Field { expr, .. } = part {
                        self.expr(expr);
                    }
                }
            }
            ExprKind::Name(name) => self.name(name, loc),
            ExprKind::Attribute { value, attr } => {
                self.expr(value);
                if !self.reserved(attr, loc) && !self.policy.allows_attribute(attr) {
                    self.record(
                        NodeKind::DisallowedAttribute,
                        loc,
                        format!("attribute '{}' is not allowed", attr),
                    );
                }
            }
            ExprKind::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part);
                }
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                match &func.kind {
                    ExprKind::Name(name)
                        if !is_reserved_name(name)
                            && !DYNAMIC_EVALUATION_NAMES.contains(&name.as_str())
                            && !self.known(name) =>
                    {
                        self.record(
                            NodeKind::DisallowedCall,
                            func.loc,
                            format!("call to '{}' is not allowed", name),
                        );
                    }
                    _ => self.expr(func),
                }
                for arg in args {
                    self.expr(arg);
                }
                for keyword in keywords {
                    self.reserved(&keyword.name, keyword.loc);
                    self.expr(&keyword.value);
                }
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::BoolOp { values, .. } => {
                for value in values {
                    self.expr(value);
                }
            }
            ExprKind::Compare {
                left, comparators, ..
            } => {
                self.expr(left);
                for comparator in comparators {
                    self.expr(comparator);
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::Dict(pairs) => {
                for (key, value) in pairs {
                    self.expr(key);
                    self.expr(value);
                }
            }
            ExprKind::ListComp { elt, generators } => {
                self.construct(NodeKind::Comprehension, loc);
                self.generators(generators);
                self.expr(elt);
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.construct(NodeKind::Comprehension, loc);
                self.generators(generators);
                self.expr(key);
                self.expr(value);
            }
            ExprKind::Lambda { params, body } => {
                self.construct(NodeKind::Lambda, loc);
                self.params(params);
                self.expr(body);
            }
            ExprKind::Yield(value) => {
                self.construct(NodeKind::Yield, loc);
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            ExprKind::Await(value) => {
                self.construct(NodeKind::Await, loc);
                self.expr(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(src: &str) -> ValidationVerdict {
        validate(src, &CapabilityPolicy::data_analysis())
    }

    fn rejects_with(src: &str, kind: NodeKind) {
        let verdict = check(src);
        assert!(!verdict.accepted, "accepted: {}", src);
        assert!(
            verdict.has(kind),
            "expected {:?} for {:?}, got {:?}",
            kind,
            src,
            verdict.violations
        );
    }

    #[test]
    fn test_accepts_analysis_programs() {
        let programs = [
            "result = df['sales'].sum()",
            "top = df.sort_values('sales', ascending=False).head(5)\nresult = top",
            "by = df.groupby('region')['sales'].mean()\nfig = px.bar(by.reset_index(), x='region', y='sales')",
            "names = [r.upper() for r in df['region'].unique()]\nresult = sorted(names)",
            "total = 0\nfor v in df['sales'].tolist():\n    total += v\nresult = round(total, 2)",
            "total = df['sales'].sum()\nresult = df['sales'].apply(lambda x: x / total)",
            "result = f\"{len(df)} rows\"",
            "counts = {}\ncounts['a'] = 1\nresult = counts",
        ];
        for src in programs {
            let verdict = check(src);
            assert!(verdict.accepted, "{}: {:?}", src, verdict.violations);
        }
    }

    #[test]
    fn test_import_is_rejected_by_construct() {
        let verdict = check("import os\nresult = os.listdir('/')");
        assert!(!verdict.accepted);
        let first = &verdict.violations[0];
        assert_eq!(first.node_kind, NodeKind::Import);
        assert_eq!(first.location, Location::new(1, 1));
        assert!(first.message.contains("os"));
    }

    #[test]
    fn test_each_forbidden_kind_is_reported() {
        rejects_with("from os import path", NodeKind::ImportFrom);
        rejects_with("class A:\n    pass", NodeKind::ClassDef);
        rejects_with("def f():\n    global x\n    x = 1", NodeKind::Global);
        rejects_with("def f():\n    nonlocal x", NodeKind::Nonlocal);
        rejects_with("x = 1\ndel x", NodeKind::Delete);
        rejects_with("with x as y:\n    pass", NodeKind::With);
        rejects_with("try:\n    x = 1\nexcept Exception:\n    pass", NodeKind::Try);
        rejects_with("raise ValueError('no')", NodeKind::Raise);
        rejects_with("assert len(df) > 0", NodeKind::Assert);
        rejects_with("def g():\n    yield 1", NodeKind::Yield);
        rejects_with("async def g():\n    await x", NodeKind::Await);
        rejects_with("result = eval('1 + 1')", NodeKind::DynamicEvaluation);
        rejects_with("f = open", NodeKind::DynamicEvaluation);
        rejects_with("x = df.__class__", NodeKind::ReservedName);
        rejects_with("__builtins__ = 1", NodeKind::ReservedName);
        rejects_with("df.columns = ['a']", NodeKind::AttributeAssignment);
        rejects_with("x = df.to_csv('out.csv')", NodeKind::DisallowedAttribute);
        rejects_with("x = requests.get('http://x')", NodeKind::UnknownName);
        rejects_with("x = spawn('sh')", NodeKind::DisallowedCall);
        rejects_with("result = (", NodeKind::Unparsable);
    }

    #[test]
    fn test_strict_policy_forbids_loops_and_lambdas() {
        let strict = CapabilityPolicy::strict();
        for (src, kind) in [
            ("for i in range(3):\n    pass", NodeKind::For),
            ("while False:\n    pass", NodeKind::While),
            ("f = lambda x: x", NodeKind::Lambda),
            ("x = [i for i in range(3)]", NodeKind::Comprehension),
            ("x = {}\nx['a'] = 1", NodeKind::ItemAssignment),
            ("def f():\n    return 1", NodeKind::Return),
        ] {
            let verdict = validate(src, &strict);
            assert!(verdict.has(kind), "{}: {:?}", src, verdict.violations);
        }
        assert!(validate("result = df['sales'].max()", &strict).accepted);
    }

    #[test]
    fn test_escape_patterns() {
        for src in [
            "x = ().__class__.__bases__[0].__subclasses__()",
            "x = getattr(df, 'to_csv')",
            "x = df.groupby.__globals__",
            "x = [c for c in ().__class__.__mro__]",
            "x = __import__('os')",
            "x = globals()['df']",
            "x = vars()",
            "f = print\nx = f.__self__",
            "x = sys.modules",
        ] {
            let verdict = check(src);
            assert!(!verdict.accepted, "escaped validation: {}", src);
        }
    }

    #[test]
    fn test_exception_names_in_handlers_are_known() {
        let policy = CapabilityPolicy::custom(CapabilityPolicy::data_analysis())
            .permit(NodeKind::Try)
            .build()
            .unwrap();
        let src = "try:\n    x = 1 / 0\nexcept (ZeroDivisionError, KeyError) as e:\n    x = str(e)";
        assert!(validate(src, &policy).accepted);
        assert!(validate("try:\n    x = 1\nexcept Boom:\n    pass", &policy).has(NodeKind::UnknownName));
    }

    #[test]
    fn test_verdict_is_ordered_deduplicated_and_idempotent() {
        let src = "import os\nx = eval('1')\nx = eval('1')\ny = spam";
        let first = check(src);
        let second = check(src);
        assert_eq!(first, second);
        let lines: Vec<usize> = first.violations.iter().map(|v| v.location.line).collect();
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
        assert_eq!(
            first.violations.len(),
            first
                .violations
                .iter()
                .collect::<std::collections::HashSet<_>>()
                .len()
        );
    }

    #[test]
    fn test_oversized_program_is_unparsable() {
        let policy = CapabilityPolicy::data_analysis();
        let verdict = Validator::new(&policy)
            .with_max_program_bytes(16)
            .validate("result = 1 + 2 + 3 + 4 + 5");
        assert_eq!(verdict.violations.len(), 1);
        assert_eq!(verdict.violations[0].node_kind, NodeKind::Unparsable);
        assert!(verdict.violations[0].message.contains("too large"));
    }

    #[test]
    fn test_deep_nesting_is_unparsable() {
        let deep = format!("result = {}1{}", "[".repeat(200), "]".repeat(200));
        let verdict = check(&deep);
        assert_eq!(verdict.violations.len(), 1);
        assert_eq!(verdict.violations[0].node_kind, NodeKind::Unparsable);
        assert!(verdict.violations[0].message.contains("nested too deeply"));
        assert!(check(&format!("result = {}1{}", "[".repeat(20), "]".repeat(20))).accepted);
    }
}
