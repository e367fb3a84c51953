//! Tree-walking interpreter for validated candidate programs.
//!
//! Runs on the run thread owned by the executor. Every statement, loop
//! iteration and comprehension element goes through [`Interpreter::tick`],
//! which observes the run's cancellation flag and the wall-clock deadline.

use crate::builtins::{module_attr, Args};
use crate::chart::ChartSpec;
use crate::config::ResourceLimits;
use crate::fault::{Fault, FaultKind, FaultResult};
use crate::format::{format_value, BoundedText};
use crate::methods::{self, has_method, is_mutating, mutate_in_place, property, series_like};
use crate::ops;
use crate::policy::is_reserved_name;
use crate::syntax::ast::{
    BoolOp, Comprehension, Constant, ExceptHandler, Expr, ExprKind, FStringPart, Keyword, Param,
    Program, Stmt, StmtKind,
};
use crate::table::{Column, Scalar, Table};
use crate::value::{range_len, Dict, Function, FunctionBody, RangeIter, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Deadline checks happen every this many ticks
const DEADLINE_CHECK_INTERVAL: u64 = 128;

pub(crate) const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Exception class names a `try`/`raise` may mention
pub(crate) const EXCEPTION_NAMES: &[&str] = &[
    "Exception",
    "BaseException",
    "ArithmeticError",
    "LookupError",
    "AssertionError",
    "RuntimeError",
    "ZeroDivisionError",
    "TypeError",
    "KeyError",
    "NameError",
    "AttributeError",
    "IndexError",
    "ValueError",
    "OverflowError",
    "NotImplementedError",
];

fn handler_matches(name: &str, kind: FaultKind) -> bool {
    match name {
        "Exception" | "BaseException" => true,
        "ArithmeticError" => matches!(kind, FaultKind::ZeroDivision | FaultKind::Overflow),
        "LookupError" => matches!(kind, FaultKind::KeyError | FaultKind::IndexError),
        "AssertionError" | "RuntimeError" => kind == FaultKind::ValueError,
        other => kind.label() == other,
    }
}

fn raised_kind(name: &str) -> FaultKind {
    match name {
        "ZeroDivisionError" | "ArithmeticError" => FaultKind::ZeroDivision,
        "TypeError" => FaultKind::TypeError,
        "KeyError" | "LookupError" => FaultKind::KeyError,
        "NameError" => FaultKind::NameError,
        "AttributeError" => FaultKind::AttributeError,
        "IndexError" => FaultKind::IndexError,
        "OverflowError" => FaultKind::Overflow,
        "NotImplementedError" => FaultKind::Unsupported,
        _ => FaultKind::ValueError,
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    vars: HashMap<String, Value>,
    /// Function frames stop name lookup; comprehension frames do not
    boundary: bool,
}

impl Frame {
    fn function(vars: HashMap<String, Value>) -> Self {
        Self { vars, boundary: true }
    }

    fn comprehension() -> Self {
        Self {
            vars: HashMap::new(),
            boundary: false,
        }
    }
}

/// Evaluated subscript index
enum Index {
    Item(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

pub struct Interpreter {
    globals: HashMap<String, Value>,
    frames: Vec<Frame>,
    allowed_attributes: Arc<BTreeSet<String>>,
    limits: ResourceLimits,
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
    steps: u64,
    call_depth: usize,
    /// Faults being handled by enclosing `except` blocks, for bare `raise`
    handling: Vec<Fault>,
    output: String,
    output_truncated: bool,
    last_chart: Option<Arc<ChartSpec>>,
}

impl Interpreter {
    pub fn new(
        bindings: HashMap<String, Value>,
        allowed_attributes: Arc<BTreeSet<String>>,
        limits: ResourceLimits,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let deadline = Instant::now().checked_add(limits.timeout());
        Self {
            globals: bindings,
            frames: Vec::new(),
            allowed_attributes,
            limits,
            cancel,
            deadline,
            steps: 0,
            call_depth: 0,
            handling: Vec::new(),
            output: String::new(),
            output_truncated: false,
            last_chart: None,
        }
    }

    pub fn run(&mut self, program: &Program) -> FaultResult<()> {
        match self.exec_block(&program.body)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
            Flow::Break | Flow::Continue => {
                Err(Fault::unsupported("'break' or 'continue' outside a loop"))
            }
        }
    }

    /// Top-level binding after the run
    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Printed text, with a marker when it was cut at the byte cap
    pub fn take_output(&mut self) -> String {
        let mut text = std::mem::take(&mut self.output);
        if self.output_truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }

    pub fn last_chart(&self) -> Option<Arc<ChartSpec>> {
        self.last_chart.clone()
    }

    // ========================================================================
    // RUN-TIME SERVICES
    // ========================================================================

    pub(crate) fn tick(&mut self) -> FaultResult<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Fault::interrupted());
        }
        self.steps += 1;
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.cancel.store(true, Ordering::Relaxed);
                    return Err(Fault::interrupted());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn cap(&self) -> usize {
        self.limits.max_collection_len
    }

    pub(crate) fn check_len(&self, len: usize) -> FaultResult<()> {
        if len > self.cap() {
            return Err(Fault::resource_limit(format!(
                "collection longer than {} elements",
                self.cap()
            )));
        }
        Ok(())
    }

    pub(crate) fn check_text_len(&self, chars: usize) -> FaultResult<()> {
        if chars > self.cap() {
            return Err(Fault::resource_limit(format!(
                "string longer than {} characters",
                self.cap()
            )));
        }
        Ok(())
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        if self.output_truncated {
            return;
        }
        let room = self.limits.max_output_bytes.saturating_sub(self.output.len());
        if text.len() <= room {
            self.output.push_str(text);
            return;
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.output.push_str(&text[..cut]);
        self.output_truncated = true;
    }

    pub(crate) fn record_chart(&mut self, chart: Arc<ChartSpec>) {
        self.last_chart = Some(chart);
    }

    fn note_chart(&mut self, value: &Value) {
        if let Value::Chart(chart) = value {
            self.record_chart(chart.clone());
        }
    }

    /// Collects an iterable, checking the deadline per element
    pub(crate) fn materialize(&mut self, value: &Value) -> FaultResult<Vec<Value>> {
        if let Value::Range { .. } = value {
            self.check_len(range_len(value))?;
        }
        let mut items = Vec::new();
        for item in iterate(value)? {
            self.tick()?;
            if items.len() >= self.cap() {
                return Err(Fault::resource_limit(format!(
                    "collection longer than {} elements",
                    self.cap()
                )));
            }
            items.push(item);
        }
        Ok(items)
    }

    pub(crate) fn call_value(
        &mut self,
        func: &Value,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> FaultResult<Value> {
        match func {
            Value::Builtin(builtin) => self.call_builtin(*builtin, positional, keywords),
            Value::BoundMethod(method) => {
                self.call_method(method.receiver.clone(), &method.name, positional, keywords)
            }
            Value::Function(function) => self.call_function(function, positional, keywords),
            other => Err(Fault::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Arc<Function>,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> FaultResult<Value> {
        if self.call_depth >= self.limits.max_call_depth {
            return Err(Fault::resource_limit("maximum call depth exceeded"));
        }
        if positional.len() > function.params.len() {
            return Err(Fault::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                function.name,
                function.params.len(),
                positional.len()
            )));
        }
        let mut vars = function.captured.clone();
        let mut bound = vec![false; function.params.len()];
        for (i, value) in positional.into_iter().enumerate() {
            vars.insert(function.params[i].0.clone(), value);
            bound[i] = true;
        }
        for (name, value) in keywords {
            let slot = function
                .params
                .iter()
                .position(|(param, _)| *param == name)
                .ok_or_else(|| {
                    Fault::type_error(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        function.name, name
                    ))
                })?;
            if bound[slot] {
                return Err(Fault::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    function.name, name
                )));
            }
            vars.insert(name, value);
            bound[slot] = true;
        }
        for ((name, default), is_bound) in function.params.iter().zip(&bound) {
            if *is_bound {
                continue;
            }
            match default {
                Some(value) => {
                    vars.insert(name.clone(), value.clone());
                }
                None => {
                    return Err(Fault::type_error(format!(
                        "{}() missing required argument: '{}'",
                        function.name, name
                    )))
                }
            }
        }

        self.call_depth += 1;
        self.frames.push(Frame::function(vars));
        let result = match &function.body {
            FunctionBody::Expr(expr) => self.eval(expr),
            FunctionBody::Block(body) => match self.exec_block(body) {
                Ok(Flow::Return(value)) => Ok(value),
                Ok(_) => Ok(Value::None),
                Err(fault) => Err(fault),
            },
        };
        self.frames.pop();
        self.call_depth -= 1;
        result
    }

    // ========================================================================
    // BINDINGS
    // ========================================================================

    fn lookup(&self, name: &str) -> Option<&Value> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.vars.get(name) {
                return Some(value);
            }
            if frame.boundary {
                break;
            }
        }
        self.globals.get(name)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Value> {
        let mut owner = None;
        for (i, frame) in self.frames.iter().enumerate().rev() {
            if frame.vars.contains_key(name) {
                owner = Some(i);
                break;
            }
            if frame.boundary {
                break;
            }
        }
        match owner {
            Some(i) => self.frames[i].vars.get_mut(name),
            None => self.globals.get_mut(name),
        }
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.vars.insert(name.to_string(), value);
            }
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn unbind(&mut self, name: &str) -> FaultResult<()> {
        let removed = match self.frames.last_mut() {
            Some(frame) => frame.vars.remove(name),
            None => self.globals.remove(name),
        };
        removed
            .map(|_| ())
            .ok_or_else(|| name_error(name))
    }

    /// Locals visible from the current frame, for closures
    fn visible_locals(&self) -> HashMap<String, Value> {
        let mut captured = HashMap::new();
        for frame in self.frames.iter().rev() {
            for (name, value) in &frame.vars {
                captured
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
            if frame.boundary {
                break;
            }
        }
        captured
    }

    fn scoped<R>(&mut self, frame: Frame, f: impl FnOnce(&mut Self) -> FaultResult<R>) -> FaultResult<R> {
        self.frames.push(frame);
        let result = f(self);
        self.frames.pop();
        result
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn exec_block(&mut self, body: &[Stmt]) -> FaultResult<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> FaultResult<Flow> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target)?;
                let operand = self.eval(value)?;
                let updated = ops::binary(*op, &current, &operand, self.cap())?;
                drop(current);
                self.assign(target, updated)?;
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy()? { body } else { orelse };
                return self.exec_block(branch);
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                for item in iterate(&iterable)? {
                    self.tick()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::While { test, body } => loop {
                self.tick()?;
                if !self.eval(test)?.truthy()? {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Normal | Flow::Continue => {}
                    flow @ Flow::Return(_) => return Ok(flow),
                }
            },
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::FunctionDef { name, params, body } => {
                let function = Function {
                    name: name.clone(),
                    params: self.eval_params(params)?,
                    body: FunctionBody::Block(Arc::new(body.clone())),
                    captured: self.visible_locals(),
                };
                self.bind(name, Value::Function(Arc::new(function)));
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let outcome = match self.exec_block(body) {
                    Ok(Flow::Normal) => self.exec_block(orelse),
                    Ok(flow) => Ok(flow),
                    Err(fault) => self.handle(fault, handlers),
                };
                if !finalbody.is_empty() {
                    match self.exec_block(finalbody)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                return outcome;
            }
            StmtKind::Raise(exc) => return Err(self.raise(exc.as_ref())?),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy()? {
                    let message = match msg {
                        Some(msg) => self.eval(msg)?.display(),
                        None => "assertion failed".to_string(),
                    };
                    return Err(Fault::value_error(message));
                }
            }
            StmtKind::Import { .. } | StmtKind::ImportFrom { .. } => {
                return Err(Fault::unsupported("imports are not available"))
            }
            StmtKind::ClassDef { .. } => {
                return Err(Fault::unsupported("class definitions are not supported"))
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) => {
                return Err(Fault::unsupported("scope declarations are not supported"))
            }
            StmtKind::With { .. } => {
                return Err(Fault::unsupported("'with' blocks are not supported"))
            }
        }
        Ok(Flow::Normal)
    }

    fn handle(&mut self, fault: Fault, handlers: &[ExceptHandler]) -> FaultResult<Flow> {
        if !fault.kind.is_catchable() {
            return Err(fault);
        }
        let Some(handler) = handlers.iter().find(|h| handler_catches(h, fault.kind)) else {
            return Err(fault);
        };
        if let Some(name) = &handler.name {
            self.bind(name, Value::str(fault.message.clone()));
        }
        self.handling.push(fault);
        let flow = self.exec_block(&handler.body);
        self.handling.pop();
        flow
    }

    fn raise(&mut self, exc: Option<&Expr>) -> FaultResult<Fault> {
        let Some(exc) = exc else {
            return self
                .handling
                .last()
                .cloned()
                .ok_or_else(|| Fault::value_error("no active exception to re-raise"));
        };
        let (name, args) = match &exc.kind {
            ExprKind::Name(name) => (name, &[][..]),
            ExprKind::Call { func, args, .. } => match &func.kind {
                ExprKind::Name(name) => (name, args.as_slice()),
                _ => return Err(Fault::type_error("exceptions must name an exception class")),
            },
            _ => return Err(Fault::type_error("exceptions must name an exception class")),
        };
        if !EXCEPTION_NAMES.contains(&name.as_str()) {
            return Err(Fault::type_error("exceptions must name an exception class"));
        }
        let message = match args.first() {
            Some(arg) => self.eval(arg)?.display(),
            None => String::new(),
        };
        Ok(Fault::new(raised_kind(name), message))
    }

    fn eval_params(&mut self, params: &[Param]) -> FaultResult<Vec<(String, Option<Value>)>> {
        params
            .iter()
            .map(|param| {
                let default = match &param.default {
                    Some(expr) => Some(self.eval(expr)?),
                    None => None,
                };
                Ok((param.name.clone(), default))
            })
            .collect()
    }

    // ========================================================================
    // ASSIGNMENT
    // ========================================================================

    fn assign(&mut self, target: &Expr, value: Value) -> FaultResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let items = self.materialize(&value)?;
                if items.len() != targets.len() {
                    return Err(Fault::value_error(if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    }));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            ExprKind::Subscript { value: container, index } => {
                let (root, mut path) = self.lvalue_path(container)?;
                let last = match self.eval_index(index)? {
                    Index::Item(key) => key,
                    Index::Slice(..) => {
                        return Err(Fault::unsupported("slice assignment is not supported"))
                    }
                };
                path.push(last);
                let cap = self.cap();
                let slot = self.slot_mut(&root).ok_or_else(|| name_error(&root))?;
                let (parents, key) = path.split_at(path.len() - 1);
                with_path(slot, parents, &mut |container: &mut Value| {
                    assign_item(container, &key[0], value.clone(), cap)
                })
            }
            ExprKind::Attribute { .. } => {
                Err(Fault::unsupported("attribute assignment is not supported"))
            }
            _ => Err(Fault::type_error("cannot assign to expression")),
        }
    }

    fn delete(&mut self, target: &Expr) -> FaultResult<()> {
        match &target.kind {
            ExprKind::Name(name) => self.unbind(name),
            ExprKind::Subscript { value, index } => {
                let (root, mut path) = self.lvalue_path(value)?;
                match self.eval_index(index)? {
                    Index::Item(key) => path.push(key),
                    Index::Slice(..) => {
                        return Err(Fault::unsupported("slice deletion is not supported"))
                    }
                }
                let slot = self.slot_mut(&root).ok_or_else(|| name_error(&root))?;
                let (parents, key) = path.split_at(path.len() - 1);
                with_path(slot, parents, &mut |container: &mut Value| {
                    delete_item(container, &key[0])
                })
            }
            _ => Err(Fault::type_error("cannot delete expression")),
        }
    }

    /// `name[i][j]` as the root name and the evaluated keys
    fn lvalue_path(&mut self, expr: &Expr) -> FaultResult<(String, Vec<Value>)> {
        match &expr.kind {
            ExprKind::Name(name) => Ok((name.clone(), Vec::new())),
            ExprKind::Subscript { value, index } => {
                let (root, mut path) = self.lvalue_path(value)?;
                match self.eval_index(index)? {
                    Index::Item(key) => path.push(key),
                    Index::Slice(..) => {
                        return Err(Fault::unsupported("assignment through a slice is not supported"))
                    }
                }
                Ok((root, path))
            }
            _ => Err(Fault::unsupported(
                "only names and subscripts can be updated in place",
            )),
        }
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    pub(crate) fn eval(&mut self, expr: &Expr) -> FaultResult<Value> {
        match &expr.kind {
            ExprKind::Const(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::str(s.clone()),
            }),
            ExprKind::FString(parts) => {
                let cap = self.cap();
                let mut text = BoundedText::new(cap);
                for part in parts {
                    match part {
                        FStringPart::Literal(literal) => text.push_str(literal)?,
                        FStringPart::Field { expr, spec, repr } => {
                            let mut value = self.eval(expr)?;
                            if *repr {
                                value = Value::str(value.repr());
                            }
                            text.push_str(&format_value(&value, spec.as_deref().unwrap_or(""), cap)?)?;
                        }
                    }
                }
                Ok(Value::str(text.finish()))
            }
            ExprKind::Name(name) => self.lookup(name).cloned().ok_or_else(|| name_error(name)),
            ExprKind::Attribute { value, attr } => {
                self.guard_attribute(attr)?;
                let receiver = self.eval(value)?;
                self.attribute(receiver, attr)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.eval(value)?;
                let index = self.eval_index(index)?;
                self.subscript(&container, index)
            }
            ExprKind::Slice { .. } => Err(Fault::type_error("slices are only valid inside []")),
            ExprKind::Call {
                func,
                args,
                keywords,
            } => self.eval_call(func, args, keywords),
            ExprKind::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand)
            }
            ExprKind::Binary { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right, self.cap())
            }
            ExprKind::BoolOp { op, values } => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(value)?;
                    let truthy = last.truthy()?;
                    match op {
                        BoolOp::And if !truthy => return Ok(last),
                        BoolOp::Or if truthy => return Ok(last),
                        _ => {}
                    }
                }
                Ok(last)
            }
            ExprKind::Compare {
                left,
                ops: operators,
                comparators,
            } => {
                let mut left = self.eval(left)?;
                let mut result = Value::Bool(true);
                for (i, (op, right)) in operators.iter().zip(comparators).enumerate() {
                    let right = self.eval(right)?;
                    result = ops::compare(*op, &left, &right)?;
                    if i + 1 < operators.len() && !result.truthy()? {
                        return Ok(result);
                    }
                    left = right;
                }
                Ok(result)
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                self.check_len(items.len())?;
                let values = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<FaultResult<Vec<_>>>()?;
                Ok(match expr.kind {
                    ExprKind::List(_) => Value::list(values),
                    _ => Value::tuple(values),
                })
            }
            ExprKind::Dict(pairs) => {
                self.check_len(pairs.len())?;
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            ExprKind::ListComp { elt, generators } => {
                let cap = self.cap();
                let mut items = Vec::new();
                self.scoped(Frame::comprehension(), |this| {
                    this.comprehension(generators, &mut |this: &mut Interpreter| {
                        if items.len() >= cap {
                            return Err(Fault::resource_limit(format!(
                                "list longer than {} elements",
                                cap
                            )));
                        }
                        items.push(this.eval(elt)?);
                        Ok(())
                    })
                })?;
                Ok(Value::list(items))
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let cap = self.cap();
                let mut dict = Dict::new();
                self.scoped(Frame::comprehension(), |this| {
                    this.comprehension(generators, &mut |this: &mut Interpreter| {
                        let k = this.eval(key)?;
                        let v = this.eval(value)?;
                        dict.insert(k, v)?;
                        if dict.len() > cap {
                            return Err(Fault::resource_limit(format!(
                                "dict longer than {} entries",
                                cap
                            )));
                        }
                        Ok(())
                    })
                })?;
                Ok(Value::dict(dict))
            }
            ExprKind::Lambda { params, body } => Ok(Value::Function(Arc::new(Function {
                name: "<lambda>".to_string(),
                params: self.eval_params(params)?,
                body: FunctionBody::Expr(Arc::new(body.as_ref().clone())),
                captured: self.visible_locals(),
            }))),
            ExprKind::Yield(_) | ExprKind::Await(_) => {
                Err(Fault::unsupported("generators and coroutines are not supported"))
            }
        }
    }

    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Interpreter) -> FaultResult<()>,
    ) -> FaultResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&first.iter)?;
        'items: for item in iterate(&iterable)? {
            self.tick()?;
            self.assign(&first.target, item)?;
            for condition in &first.ifs {
                if !self.eval(condition)?.truthy()? {
                    continue 'items;
                }
            }
            self.comprehension(rest, emit)?;
        }
        Ok(())
    }

    /// Re-checks attribute names against the policy's allow-list
    fn guard_attribute(&self, attr: &str) -> FaultResult<()> {
        if is_reserved_name(attr) || !self.allowed_attributes.contains(attr) {
            return Err(Fault::new(
                FaultKind::AttributeError,
                format!("attribute '{}' is not available", attr),
            ));
        }
        Ok(())
    }

    fn attribute(&mut self, receiver: Value, attr: &str) -> FaultResult<Value> {
        if let Value::Module(module) = receiver {
            return module_attr(module, attr);
        }
        if let Some(value) = property(&receiver, attr) {
            return Ok(value);
        }
        if has_method(&receiver, attr) {
            return Ok(Value::BoundMethod(Arc::new(crate::value::BoundMethod {
                receiver,
                name: attr.to_string(),
            })));
        }
        Err(methods::no_attribute(&receiver, attr))
    }

    fn eval_call(&mut self, func: &Expr, args: &[Expr], keywords: &[Keyword]) -> FaultResult<Value> {
        let ExprKind::Attribute { value: target, attr } = &func.kind else {
            let callee = self.eval(func)?;
            let (positional, keywords) = self.eval_args(args, keywords)?;
            return self.call_value(&callee, positional, keywords);
        };

        self.guard_attribute(attr)?;
        let receiver = self.eval(target)?;
        if let Value::Module(module) = receiver {
            let callee = module_attr(module, attr)?;
            let (positional, keywords) = self.eval_args(args, keywords)?;
            return self.call_value(&callee, positional, keywords);
        }
        if !has_method(&receiver, attr) {
            return match property(&receiver, attr) {
                Some(value) => Err(Fault::type_error(format!(
                    "'{}' object is not callable",
                    value.type_name()
                ))),
                None => Err(methods::no_attribute(&receiver, attr)),
            };
        }
        let (positional, mut keywords) = self.eval_args(args, keywords)?;

        if is_mutating(attr) {
            if let Ok((root, path)) = self.lvalue_path(target) {
                drop(receiver);
                let cap = self.cap();
                let name = attr.clone();
                let mut call = Some(Args::new(attr, positional, keywords));
                let slot = self.slot_mut(&root).ok_or_else(|| name_error(&root))?;
                let result = with_path(slot, &path, &mut |value: &mut Value| match call.take() {
                    Some(args) => mutate_in_place(value, &name, args, cap),
                    None => Ok(Value::None),
                })?;
                self.note_chart(&result);
                return Ok(result);
            }
            let result = self.call_method(receiver, attr, positional, keywords)?;
            self.note_chart(&result);
            return Ok(result);
        }

        let inplace = match keywords.iter().position(|(name, _)| name == "inplace") {
            Some(at) => keywords.remove(at).1.truthy()?,
            None => false,
        };
        let result = self.call_method(receiver, attr, positional, keywords)?;
        if inplace {
            self.assign(target, result)?;
            return Ok(Value::None);
        }
        Ok(result)
    }

    fn eval_args(
        &mut self,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> FaultResult<(Vec<Value>, Vec<(String, Value)>)> {
        let positional = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<FaultResult<Vec<_>>>()?;
        let mut named: Vec<(String, Value)> = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            if named.iter().any(|(name, _)| *name == keyword.name) {
                return Err(Fault::type_error(format!(
                    "keyword argument repeated: {}",
                    keyword.name
                )));
            }
            let value = self.eval(&keyword.value)?;
            named.push((keyword.name.clone(), value));
        }
        Ok((positional, named))
    }

    fn eval_index(&mut self, index: &Expr) -> FaultResult<Index> {
        let ExprKind::Slice { lower, upper, step } = &index.kind else {
            return Ok(Index::Item(self.eval(index)?));
        };
        let mut bound = |part: &Option<Box<Expr>>| -> FaultResult<Option<i64>> {
            match part {
                None => Ok(None),
                Some(expr) => match self.eval(expr)? {
                    Value::None => Ok(None),
                    Value::Int(i) => Ok(Some(i)),
                    Value::Bool(b) => Ok(Some(b as i64)),
                    other => Err(Fault::type_error(format!(
                        "slice indices must be integers or None, not {}",
                        other.type_name()
                    ))),
                },
            }
        };
        let lower = bound(lower)?;
        let upper = bound(upper)?;
        let step = bound(step)?;
        Ok(Index::Slice(lower, upper, step))
    }

    fn subscript(&mut self, container: &Value, index: Index) -> FaultResult<Value> {
        let index = match index {
            Index::Slice(lower, upper, step) => return self.slice(container, lower, upper, step),
            Index::Item(index) => index,
        };
        match container {
            Value::List(items) | Value::Tuple(items) => {
                let i = sequence_index(&index, items.len(), container.type_name())?;
                Ok(items[i].clone())
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let i = sequence_index(&index, chars.len(), "string")?;
                Ok(Value::str(chars[i]))
            }
            Value::Range { start, step, .. } => {
                let i = sequence_index(&index, range_len(container), "range")?;
                Ok(Value::Int(start + step * i as i64))
            }
            Value::Dict(dict) => dict
                .get(&index)?
                .cloned()
                .ok_or_else(|| Fault::key_error(index.repr())),
            Value::Table(table) => table_subscript(table, &index),
            Value::Series(column) => match &index {
                Value::Series(mask) => Ok(Value::series(filter_column(column, mask)?)),
                other => {
                    let position = other
                        .as_int()
                        .filter(|i| !matches!(other, Value::Bool(_)) && *i >= 0 && (*i as usize) < column.len())
                        .ok_or_else(|| Fault::key_error(other.repr()))?;
                    Ok(Value::from_scalar(&column.values[position as usize]))
                }
            },
            Value::GroupBy(grouped) => {
                let (selection, single) = match &index {
                    Value::Str(name) => (vec![name.to_string()], true),
                    Value::List(names) => (
                        names
                            .iter()
                            .map(|n| {
                                n.as_str().map(str::to_string).ok_or_else(|| {
                                    Fault::type_error("column selection must be names")
                                })
                            })
                            .collect::<FaultResult<Vec<_>>>()?,
                        false,
                    ),
                    other => return Err(Fault::key_error(other.repr())),
                };
                for name in &selection {
                    grouped.table.column(name)?;
                }
                let mut selected = grouped.as_ref().clone();
                selected.selection = Some(selection);
                selected.single = single;
                Ok(Value::GroupBy(Arc::new(selected)))
            }
            other => Err(Fault::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn slice(
        &mut self,
        container: &Value,
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    ) -> FaultResult<Value> {
        match container {
            Value::List(items) => Ok(Value::list(pick(items, lower, upper, step)?)),
            Value::Tuple(items) => Ok(Value::tuple(pick(items, lower, upper, step)?)),
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                Ok(Value::str(pick(&chars, lower, upper, step)?.into_iter().collect::<String>()))
            }
            Value::Range { .. } => {
                let items = self.materialize(container)?;
                Ok(Value::list(pick(&items, lower, upper, step)?))
            }
            Value::Table(table) => {
                let rows = slice_indices(table.num_rows(), lower, upper, step)?;
                Ok(Value::table(table.take_rows(&rows)))
            }
            Value::Series(column) => {
                let rows = slice_indices(column.len(), lower, upper, step)?;
                Ok(Value::series(column.take(&rows)))
            }
            other => Err(Fault::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }
}

fn name_error(name: &str) -> Fault {
    Fault::new(FaultKind::NameError, format!("name '{}' is not defined", name))
}

fn handler_catches(handler: &ExceptHandler, kind: FaultKind) -> bool {
    match &handler.kind {
        None => true,
        Some(expr) => match &expr.kind {
            ExprKind::Name(name) => handler_matches(name, kind),
            ExprKind::Tuple(names) => names.iter().any(|n| match &n.kind {
                ExprKind::Name(name) => handler_matches(name, kind),
                _ => false,
            }),
            _ => false,
        },
    }
}

// ============================================================================
// ITERATION
// ============================================================================

pub(crate) enum ValueIter {
    Range(RangeIter),
    Shared(Arc<Vec<Value>>, usize),
    Owned(std::vec::IntoIter<Value>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Range(range) => range.next().map(Value::Int),
            ValueIter::Shared(items, at) => {
                let item = items.get(*at).cloned();
                *at += 1;
                item
            }
            ValueIter::Owned(items) => items.next(),
        }
    }
}

/// Python iteration over a value. Ranges stay lazy.
pub(crate) fn iterate(value: &Value) -> FaultResult<ValueIter> {
    let owned = |items: Vec<Value>| -> FaultResult<ValueIter> {
        Ok(ValueIter::Owned(items.into_iter()))
    };
    match value {
        Value::Range { .. } => Ok(ValueIter::Range(RangeIter::new(value))),
        Value::List(items) | Value::Tuple(items) => Ok(ValueIter::Shared(items.clone(), 0)),
        Value::Str(text) => owned(text.chars().map(Value::str).collect()),
        Value::Dict(dict) => owned(dict.keys().cloned().collect()),
        Value::Series(column) => owned(column.values.iter().map(Value::from_scalar).collect()),
        Value::Table(table) => match series_like(table) {
            Some(column) => owned(column.values.iter().map(Value::from_scalar).collect()),
            None => owned(
                table
                    .value_columns()
                    .iter()
                    .map(|c| Value::str(c.name.as_str()))
                    .collect(),
            ),
        },
        Value::GroupBy(grouped) => {
            let groups = grouped.table.group_indices(&grouped.keys)?;
            owned(
                groups
                    .into_iter()
                    .map(|(key, rows)| {
                        let label = match key.as_slice() {
                            [single] => Value::from_scalar(single),
                            many => Value::tuple(many.iter().map(Value::from_scalar).collect()),
                        };
                        Value::tuple(vec![label, Value::table(grouped.table.take_rows(&rows))])
                    })
                    .collect(),
            )
        }
        other => Err(Fault::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

/// Collects an iterable into a vector of at most `cap` items
pub(crate) fn collect_items(value: &Value, cap: usize) -> FaultResult<Vec<Value>> {
    if let Value::Range { .. } = value {
        if range_len(value) > cap {
            return Err(Fault::resource_limit(format!(
                "collection longer than {} elements",
                cap
            )));
        }
    }
    let mut items = Vec::new();
    for item in iterate(value)? {
        if items.len() >= cap {
            return Err(Fault::resource_limit(format!(
                "collection longer than {} elements",
                cap
            )));
        }
        items.push(item);
    }
    Ok(items)
}

// ============================================================================
// INDEXING HELPERS
// ============================================================================

fn sequence_index(index: &Value, len: usize, what: &str) -> FaultResult<usize> {
    let i = match index {
        Value::Int(i) => *i,
        Value::Bool(b) => *b as i64,
        other => {
            return Err(Fault::type_error(format!(
                "{} indices must be integers, not {}",
                what,
                other.type_name()
            )))
        }
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(Fault::index_error(format!("{} index out of range", what)));
    }
    Ok(resolved as usize)
}

/// Python slice semantics over `len` items
pub(crate) fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> FaultResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Fault::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let mut indices = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |b| clamp(b, 0, len));
        let stop = upper.map_or(len, |b| clamp(b, 0, len));
        let mut i = start;
        while i < stop {
            indices.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |b| clamp(b, -1, len - 1));
        let stop = upper.map_or(-1, |b| clamp(b, -1, len - 1));
        let mut i = start;
        while i > stop {
            indices.push(i as usize);
            i += step;
        }
    }
    Ok(indices)
}

fn pick<T: Clone>(items: &[T], lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> FaultResult<Vec<T>> {
    Ok(slice_indices(items.len(), lower, upper, step)?
        .into_iter()
        .map(|i| items[i].clone())
        .collect())
}

fn bool_mask(mask: &Column, expected: usize) -> FaultResult<Vec<bool>> {
    if mask.len() != expected {
        return Err(Fault::value_error(format!(
            "boolean mask of length {} does not match {} rows",
            mask.len(),
            expected
        )));
    }
    mask.values
        .iter()
        .map(|cell| match cell {
            Scalar::Bool(b) => Ok(*b),
            Scalar::Null => Ok(false),
            _ => Err(Fault::key_error("mask must contain booleans")),
        })
        .collect()
}

fn filter_column(column: &Column, mask: &Column) -> FaultResult<Column> {
    let keep = bool_mask(mask, column.len())?;
    let rows: Vec<usize> = keep
        .iter()
        .enumerate()
        .filter_map(|(i, k)| k.then_some(i))
        .collect();
    Ok(column.take(&rows))
}

fn table_subscript(table: &Arc<Table>, index: &Value) -> FaultResult<Value> {
    match index {
        Value::Str(name) if table.has_column(name) => {
            Ok(Value::series(table.column(name)?.clone()))
        }
        Value::List(names) => {
            let names = names
                .iter()
                .map(|n| {
                    n.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| Fault::key_error(n.repr()))
                })
                .collect::<FaultResult<Vec<_>>>()?;
            let keys = table.key_columns();
            let mut columns = table.columns()[..keys].to_vec();
            for name in &names {
                columns.push(table.column(name)?.clone());
            }
            Ok(Value::table(Table::keyed(columns, keys)?))
        }
        Value::Series(mask) => Ok(Value::table(
            table.filter(&bool_mask(mask, table.num_rows())?)?,
        )),
        label => {
            let (Some(column), Some(cell)) = (series_like(table), label.to_scalar()) else {
                return Err(Fault::key_error(label.repr()));
            };
            let keys = &table.columns()[0];
            keys.values
                .iter()
                .position(|k| !k.is_null() && k.compare(&cell) == std::cmp::Ordering::Equal)
                .map(|row| Value::from_scalar(&column.values[row]))
                .ok_or_else(|| Fault::key_error(label.repr()))
        }
    }
}

/// Walks `path` down from `target` and applies `f` at the end
fn with_path<R>(
    target: &mut Value,
    path: &[Value],
    f: &mut dyn FnMut(&mut Value) -> FaultResult<R>,
) -> FaultResult<R> {
    let Some((key, rest)) = path.split_first() else {
        return f(target);
    };
    match target {
        Value::List(items) => {
            let i = sequence_index(key, items.len(), "list")?;
            with_path(&mut Arc::make_mut(items)[i], rest, f)
        }
        Value::Dict(dict) => {
            let slot = Arc::make_mut(dict)
                .get_mut(key)?
                .ok_or_else(|| Fault::key_error(key.repr()))?;
            with_path(slot, rest, f)
        }
        other => Err(Fault::type_error(format!(
            "'{}' object does not support nested item assignment",
            other.type_name()
        ))),
    }
}

fn assign_item(container: &mut Value, key: &Value, value: Value, cap: usize) -> FaultResult<()> {
    match container {
        Value::List(items) => {
            let i = sequence_index(key, items.len(), "list assignment")?;
            Arc::make_mut(items)[i] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            if dict.len() >= cap && dict.get(key)?.is_none() {
                return Err(Fault::resource_limit(format!(
                    "dict longer than {} entries",
                    cap
                )));
            }
            Arc::make_mut(dict).insert(key.clone(), value)
        }
        Value::Table(table) => {
            let name = key
                .as_str()
                .ok_or_else(|| Fault::type_error("column names must be strings"))?;
            let rows = table.num_rows();
            let cells = match value {
                Value::Series(column) => column.values.clone(),
                Value::List(items) | Value::Tuple(items) => items
                    .iter()
                    .map(crate::builtins::cell_of)
                    .collect::<FaultResult<Vec<_>>>()?,
                scalar => vec![crate::builtins::cell_of(&scalar)?; rows],
            };
            Arc::make_mut(table).set_column(Column::new(name, cells))?;
            Ok(())
        }
        other => Err(Fault::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn delete_item(container: &mut Value, key: &Value) -> FaultResult<()> {
    match container {
        Value::List(items) => {
            let i = sequence_index(key, items.len(), "list assignment")?;
            Arc::make_mut(items).remove(i);
            Ok(())
        }
        Value::Dict(dict) => Arc::make_mut(dict)
            .remove(key)?
            .map(|_| ())
            .ok_or_else(|| Fault::key_error(key.repr())),
        Value::Table(table) => {
            let name = key
                .as_str()
                .ok_or_else(|| Fault::key_error(key.repr()))?
                .to_string();
            let dropped = table.drop_columns(&[name])?;
            *table = Arc::new(dropped);
            Ok(())
        }
        other => Err(Fault::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CapabilityPolicy;
    use crate::syntax::parse_program;
    use serde_json::json;

    fn interpreter_with(data: Option<Table>, limits: ResourceLimits) -> Interpreter {
        let policy = CapabilityPolicy::data_analysis();
        let mut bindings = HashMap::new();
        for name in &policy.allowed_callables {
            if let Some(value) = crate::builtins::lookup_global(name) {
                bindings.insert(name.clone(), value);
            }
        }
        if let Some(table) = data {
            bindings.insert("df".to_string(), Value::table(table));
        }
        Interpreter::new(
            bindings,
            Arc::new(policy.allowed_attributes.clone()),
            limits,
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn run(src: &str) -> FaultResult<Interpreter> {
        let table = Table::from_json(&json!([
            {"region": "North", "sales": 100.0, "units": 3},
            {"region": "South", "sales": 250.5, "units": 7},
            {"region": "North", "sales": 50.0, "units": 1},
        ]))
        .unwrap();
        let mut interp = interpreter_with(Some(table), ResourceLimits::default());
        let program = parse_program(src).unwrap();
        interp.run(&program)?;
        Ok(interp)
    }

    fn result_of(src: &str) -> Value {
        run(src).unwrap().binding("result").cloned().unwrap()
    }

    #[test]
    fn test_arithmetic_and_names() {
        assert_eq!(result_of("x = 2\nresult = x * 3 + 1").repr(), "7");
        assert_eq!(result_of("result = 7 // 2, 7 % -3, 2 ** -1").repr(), "(3, -2, 0.5)");
        assert_eq!(result_of("a, b = 1, 2\na, b = b, a\nresult = [a, b]").repr(), "[2, 1]");
    }

    #[test]
    fn test_control_flow() {
        let src = "total = 0\nfor i in range(10):\n    if i % 2:\n        continue\n    if i > 6:\n        break\n    total += i\nresult = total";
        assert_eq!(result_of(src).repr(), "12");
        let src = "n = 0\nwhile n < 5:\n    n += 1\nresult = n";
        assert_eq!(result_of(src).repr(), "5");
    }

    #[test]
    fn test_functions_and_closures() {
        let src = "def scale(x, factor=2):\n    return x * factor\nresult = [scale(1), scale(2, factor=10)]";
        assert_eq!(result_of(src).repr(), "[2, 20]");
        let src = "k = 3\nf = lambda v: v + k\nresult = sorted([3, 1, 2], key=lambda v: -v) + [f(1)]";
        assert_eq!(result_of(src).repr(), "[3, 2, 1, 4]");
    }

    #[test]
    fn test_recursion_is_capped() {
        let limits = ResourceLimits {
            max_call_depth: 8,
            ..ResourceLimits::default()
        };
        let mut interp = interpreter_with(None, limits);
        let program = parse_program("def f(n):\n    return f(n + 1)\nresult = f(0)").unwrap();
        assert_eq!(interp.run(&program).unwrap_err().kind, FaultKind::ResourceLimit);
    }

    #[test]
    fn test_comprehensions_do_not_leak() {
        let interp = run("result = [i * i for i in range(4) if i != 2]\nd = {k: len(k) for k in ['a', 'bb']}").unwrap();
        assert_eq!(interp.binding("result").unwrap().repr(), "[0, 1, 9]");
        assert_eq!(interp.binding("d").unwrap().repr(), "{'a': 1, 'bb': 2}");
        assert!(interp.binding("i").is_none());
    }

    #[test]
    fn test_item_assignment_is_copy_on_write() {
        let src = "a = [1, 2]\nb = a\nb[0] = 9\nd = {}\nd['x'] = 1\nd['x'] += 1\nresult = (a, b, d)";
        assert_eq!(result_of(src).repr(), "([1, 2], [9, 2], {'x': 2})");
        let src = "rows = []\nfor r in range(3):\n    rows.append(r)\nresult = rows";
        assert_eq!(result_of(src).repr(), "[0, 1, 2]");
    }

    #[test]
    fn test_column_assignment_leaves_dataset_alone() {
        let table = Table::from_json(&json!([{"a": 1}, {"a": 2}])).unwrap();
        let shared = Arc::new(table);
        let mut bindings = HashMap::new();
        bindings.insert("df".to_string(), Value::Table(shared.clone()));
        let policy = CapabilityPolicy::data_analysis();
        let mut interp = Interpreter::new(
            bindings,
            Arc::new(policy.allowed_attributes),
            ResourceLimits::default(),
            Arc::new(AtomicBool::new(false)),
        );
        interp
            .run(&parse_program("df['b'] = df['a'] * 10").unwrap())
            .unwrap();
        assert_eq!(shared.num_columns(), 1);
        let Some(Value::Table(updated)) = interp.binding("df") else {
            panic!("df should still be a table");
        };
        assert_eq!(updated.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_table_queries() {
        assert_eq!(result_of("result = df['sales'].sum()").repr(), "400.5");
        assert_eq!(result_of("result = len(df[df['units'] > 2])").repr(), "2");
        let by_region = result_of("result = df.groupby('region')['sales'].sum()");
        let Value::Table(table) = by_region else {
            panic!("expected table");
        };
        assert_eq!(table.column("sales").unwrap().values[0], Scalar::Float(150.0));
        assert_eq!(result_of("s = df.groupby('region')['units'].sum()\nresult = s['South']").repr(), "7");
        assert_eq!(result_of("result = df.shape").repr(), "(3, 3)");
        assert_eq!(result_of("result = df['region'].nunique()").repr(), "2");
    }

    #[test]
    fn test_negative_head_and_tail() {
        assert_eq!(result_of("result = len(df.head(-1))").repr(), "2");
        assert_eq!(result_of("result = df.tail(-1)['region'].tolist()").repr(), "['South', 'North']");
        assert_eq!(result_of("result = df['units'].head(-2).tolist()").repr(), "[3]");
        assert_eq!(result_of("result = df['units'].tail(-5).tolist()").repr(), "[]");
        assert_eq!(result_of("result = df['units'].tail(2).tolist()").repr(), "[7, 1]");
        assert_eq!(result_of("result = df['units'].nlargest(-1).tolist()").repr(), "[]");
        assert_eq!(result_of("result = len(df.nlargest(-1, 'units'))").repr(), "0");
        assert_eq!(result_of("result = round(1234, -2)").repr(), "1200");
        assert_eq!(result_of("result = round(df['units'] * 100, -2).tolist()").repr(), "[300, 700, 100]");
    }

    #[test]
    fn test_inplace_rebinds_receiver() {
        let src = "df.sort_values('sales', ascending=False, inplace=True)\nresult = df['sales'].tolist()";
        assert_eq!(result_of(src).repr(), "[250.5, 100.0, 50.0]");
    }

    #[test]
    fn test_slicing() {
        assert_eq!(result_of("result = [0, 1, 2, 3, 4][::-2]").repr(), "[4, 2, 0]");
        assert_eq!(result_of("result = 'hello'[1:-1]").repr(), "'ell'");
        assert_eq!(result_of("result = len(df[1:])").repr(), "2");
        assert!(slice_indices(3, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_try_except() {
        let src = "try:\n    x = 1 / 0\nexcept ZeroDivisionError as e:\n    x = str(e)\nresult = x";
        assert!(result_of(src).display().contains("division"));
        let src = "try:\n    x = {}['k']\nexcept (TypeError, LookupError):\n    x = 'missing'\nfinally:\n    y = 1\nresult = (x, y)";
        assert_eq!(result_of(src).repr(), "('missing', 1)");
        let err = run("try:\n    x = 1 / 0\nexcept KeyError:\n    pass").err().unwrap();
        assert_eq!(err.kind, FaultKind::ZeroDivision);
    }

    #[test]
    fn test_faults() {
        assert_eq!(run("x = y + 1").err().unwrap().kind, FaultKind::NameError);
        assert_eq!(run("x = df['missing']").err().unwrap().kind, FaultKind::KeyError);
        assert_eq!(run("x = [1][5]").err().unwrap().kind, FaultKind::IndexError);
        assert_eq!(run("x = 2 ** 200").err().unwrap().kind, FaultKind::Overflow);
        assert_eq!(run("x = 'a' + 1").err().unwrap().kind, FaultKind::TypeError);
    }

    #[test]
    fn test_collection_cap() {
        let limits = ResourceLimits {
            max_collection_len: 100,
            ..ResourceLimits::default()
        };
        let mut interp = interpreter_with(None, limits);
        let program = parse_program("x = list(range(1000))").unwrap();
        assert_eq!(interp.run(&program).unwrap_err().kind, FaultKind::ResourceLimit);
        let program = parse_program("x = 'ab' * 1000").unwrap();
        assert_eq!(interp.run(&program).unwrap_err().kind, FaultKind::ResourceLimit);
    }

    #[test]
    fn test_output_is_capped() {
        let limits = ResourceLimits {
            max_output_bytes: 10,
            ..ResourceLimits::default()
        };
        let mut interp = interpreter_with(None, limits);
        interp
            .run(&parse_program("for i in range(100):\n    print(i)").unwrap())
            .unwrap();
        let text = interp.take_output();
        assert!(text.starts_with("0\n1\n2\n3\n4\n"));
        assert!(text.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_cancel_flag_interrupts_loops() {
        let mut interp = interpreter_with(None, ResourceLimits::default());
        interp.cancel.store(true, Ordering::Relaxed);
        let err = interp
            .run(&parse_program("while True:\n    pass").unwrap())
            .unwrap_err();
        assert_eq!(err.kind, FaultKind::Interrupted);
    }

    #[test]
    fn test_deadline_interrupts_without_watchdog() {
        let limits = ResourceLimits {
            timeout_ms: 50,
            ..ResourceLimits::default()
        };
        let mut interp = interpreter_with(None, limits);
        let err = interp
            .run(&parse_program("try:\n    while True:\n        pass\nexcept Exception:\n    pass").unwrap())
            .unwrap_err();
        assert_eq!(err.kind, FaultKind::Interrupted);
    }

    #[test]
    fn test_attribute_guard() {
        let mut interp = interpreter_with(None, ResourceLimits::default());
        let err = interp
            .run(&parse_program("x = 'a'.__class__").unwrap())
            .unwrap_err();
        assert_eq!(err.kind, FaultKind::AttributeError);
    }

    #[test]
    fn test_fstrings_and_methods() {
        let src = "total = 1234.5\nlabel = 'ok'\nresult = f\"Total: {total:,.2f} ({label.upper()})\"";
        assert_eq!(result_of(src).display(), "Total: 1,234.50 (OK)");
        assert_eq!(result_of("result = '{} of {}'.format(1, 2)").display(), "1 of 2");
        assert_eq!(result_of("label = 'ok'\nresult = f'{label!r} {label!s}'").display(), "'ok' ok");
    }

    #[test]
    fn test_string_growth_is_checked_before_building() {
        let limited = |src: &str| run(src).err().map(|e| e.kind) == Some(FaultKind::ResourceLimit);
        assert!(limited("s = 'a' * 1000000\nresult = s.replace('a', 'b' * 1000000)"));
        assert!(limited("s = 'a' * 1000000\nresult = ''.join([s] * 1000000)"));
        assert!(limited("result = df['region'].str.replace('North', 'N' * 1000000)"));
        assert!(limited("result = '{:>40000000000}'.format(1)"));
        assert!(limited("result = f'{1:999999999d}'"));
        assert!(limited("result = f'{1.5:.40000000000f}'"));
        assert!(limited("result = '%99999999999d' % 1"));
        assert_eq!(result_of("result = 'banana'.replace('an', 'AN', 1)").display(), "bANana");
        assert_eq!(result_of("result = '-'.join(['a', 'b', 'c'])").display(), "a-b-c");
    }

    #[test]
    fn test_most_negative_int_formats() {
        let src = "x = -9223372036854775807 - 1\nresult = f'{x:d}|{x:,}'";
        assert_eq!(
            result_of(src).display(),
            "-9223372036854775808|-9,223,372,036,854,775,808"
        );
    }
}
