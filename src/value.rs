//! Run-time values of the interpreter.
//!
//! Containers sit behind `Arc` so values are cheap to clone and can move into
//! the run thread. Mutation goes through `Arc::make_mut`, which copies on
//! write whenever the container is still shared (the dataset always is).

use crate::chart::{ChartKind, ChartSpec};
use crate::fault::{Fault, FaultResult};
use crate::syntax::ast::{Expr, Stmt};
use crate::table::{format_float, quote_str, Column, Scalar, Table};
use serde_json::{Map, Value as Json};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Tuple(Arc<Vec<Value>>),
    Dict(Arc<Dict>),
    /// Lazy `range(start, stop, step)`
    Range { start: i64, stop: i64, step: i64 },
    Table(Arc<Table>),
    Series(Arc<Column>),
    GroupBy(Arc<GroupBy>),
    /// The `.str` accessor of a series
    StrAccessor(Arc<Column>),
    Chart(Arc<ChartSpec>),
    Builtin(Builtin),
    Module(Module),
    BoundMethod(Arc<BoundMethod>),
    Function(Arc<Function>),
}

/// Helper namespaces bound as top-level names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Px,
    Np,
    Pd,
}

impl Module {
    pub fn name(&self) -> &'static str {
        match self {
            Module::Px => "px",
            Module::Np => "np",
            Module::Pd => "pd",
        }
    }
}

/// Host-implemented callables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Range,
    Min,
    Max,
    Sum,
    Abs,
    Round,
    Sorted,
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Tuple,
    Set,
    Enumerate,
    Zip,
    Print,
    Any,
    All,
    Reversed,
    Chart(ChartKind),
    NpMean,
    NpMedian,
    NpStd,
    NpSum,
    NpMin,
    NpMax,
    NpSqrt,
    NpLog,
    NpAbs,
    NpRound,
    NpPercentile,
    PdDataFrame,
    PdSeries,
}

impl Builtin {
    pub fn name(&self) -> String {
        let name = match self {
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Tuple => "tuple",
            Builtin::Set => "set",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Print => "print",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Reversed => "reversed",
            Builtin::Chart(kind) => return format!("px.{}", kind.name()),
            Builtin::NpMean => "np.mean",
            Builtin::NpMedian => "np.median",
            Builtin::NpStd => "np.std",
            Builtin::NpSum => "np.sum",
            Builtin::NpMin => "np.min",
            Builtin::NpMax => "np.max",
            Builtin::NpSqrt => "np.sqrt",
            Builtin::NpLog => "np.log",
            Builtin::NpAbs => "np.abs",
            Builtin::NpRound => "np.round",
            Builtin::NpPercentile => "np.percentile",
            Builtin::PdDataFrame => "pd.DataFrame",
            Builtin::PdSeries => "pd.Series",
        };
        name.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GroupBy {
    pub table: Arc<Table>,
    pub keys: Vec<String>,
    /// Columns picked with `grouped[...]`; `None` means every non-key column
    pub selection: Option<Vec<String>>,
    /// `grouped['col']` (a single name, not a list) reduces to a series
    pub single: bool,
    pub as_index: bool,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Expr(Arc<Expr>),
    Block(Arc<Vec<Stmt>>),
}

/// A lambda or local `def`
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Option<Value>)>,
    pub body: FunctionBody,
    /// Enclosing local bindings at creation time
    pub captured: HashMap<String, Value>,
}

// ============================================================================
// DICT - insertion ordered, hashed on scalar keys
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DictKey {
    None,
    Int(i64),
    Float(u64),
    Str(String),
    Tuple(Vec<DictKey>),
}

impl DictKey {
    pub(crate) fn from_value(value: &Value) -> FaultResult<Self> {
        let key = match value {
            Value::None => DictKey::None,
            Value::Bool(b) => DictKey::Int(*b as i64),
            Value::Int(i) => DictKey::Int(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => DictKey::Int(*f as i64),
            Value::Float(f) => DictKey::Float(f.to_bits()),
            Value::Str(s) => DictKey::Str(s.to_string()),
            Value::Tuple(items) => DictKey::Tuple(
                items
                    .iter()
                    .map(DictKey::from_value)
                    .collect::<FaultResult<Vec<_>>>()?,
            ),
            other => {
                return Err(Fault::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        };
        Ok(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<DictKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> FaultResult<Option<&Value>> {
        let key = DictKey::from_value(key)?;
        Ok(self.index.get(&key).map(|&slot| &self.entries[slot].1))
    }

    pub fn get_mut(&mut self, key: &Value) -> FaultResult<Option<&mut Value>> {
        let key = DictKey::from_value(key)?;
        Ok(match self.index.get(&key) {
            Some(&slot) => Some(&mut self.entries[slot].1),
            None => None,
        })
    }

    pub fn insert(&mut self, key: Value, value: Value) -> FaultResult<()> {
        let hashed = DictKey::from_value(&key)?;
        match self.index.get(&hashed) {
            Some(&slot) => self.entries[slot].1 = value,
            None => {
                self.index.insert(hashed, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> FaultResult<Option<Value>> {
        let hashed = DictKey::from_value(key)?;
        let Some(slot) = self.index.remove(&hashed) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(slot);
        for position in self.index.values_mut() {
            if *position > slot {
                *position -= 1;
            }
        }
        Ok(Some(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }
}

// ============================================================================
// VALUE HELPERS
// ============================================================================

impl Value {
    pub fn str(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::new(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Arc::new(dict))
    }

    pub fn table(table: Table) -> Self {
        Value::Table(Arc::new(table))
    }

    pub fn series(column: Column) -> Self {
        Value::Series(Arc::new(column))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Table(_) => "DataFrame",
            Value::Series(_) => "Series",
            Value::GroupBy(_) => "DataFrameGroupBy",
            Value::StrAccessor(_) => "StringMethods",
            Value::Chart(_) => "Figure",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::BoundMethod(_) => "method",
            Value::Function(_) => "function",
        }
    }

    pub fn from_scalar(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Null => Value::None,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::Int(*i),
            Scalar::Float(f) => Value::Float(*f),
            Scalar::Str(s) => Value::str(s.clone()),
        }
    }

    /// Cell representation, if this value fits in a table cell
    pub fn to_scalar(&self) -> Option<Scalar> {
        let scalar = match self {
            Value::None => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Int(i) => Scalar::Int(*i),
            Value::Float(f) => Scalar::Float(*f),
            Value::Str(s) => Scalar::Str(s.to_string()),
            _ => return None,
        };
        Some(scalar)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn truthy(&self) -> FaultResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Range { .. } => range_len(self) > 0,
            Value::Table(_) | Value::Series(_) => {
                return Err(Fault::value_error(format!(
                    "The truth value of a {} is ambiguous. Use a.empty, a.any() or a.all().",
                    self.type_name()
                )))
            }
            _ => true,
        })
    }

    /// Python `repr()`
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote_str(s),
            Value::List(items) => format!(
                "[{}]",
                items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
            ),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!(
                "({})",
                items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
            ),
            Value::Dict(d) => format!(
                "{{{}}}",
                d.iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Range { start, stop, step } if *step == 1 => format!("range({}, {})", start, stop),
            Value::Range { start, stop, step } => format!("range({}, {}, {})", start, stop, step),
            Value::Table(t) => t.render(20),
            Value::Series(c) => c.render(20),
            Value::GroupBy(g) => format!("<DataFrameGroupBy by {:?}>", g.keys),
            Value::StrAccessor(_) => "<StringMethods>".to_string(),
            Value::Chart(c) => format!("Figure({})", c.summary()),
            Value::Builtin(b) => format!("<built-in function {}>", b.name()),
            Value::Module(m) => format!("<module '{}'>", m.name()),
            Value::BoundMethod(m) => format!("<bound method {} of {}>", m.name, m.receiver.type_name()),
            Value::Function(f) => format!("<function {}>", f.name),
        }
    }

    /// Python `str()`
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    /// Plain JSON data for values that leave the sandbox
    pub fn to_json(&self) -> Json {
        match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.to_string()),
            Value::List(items) | Value::Tuple(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Range { .. } => Json::Array(
                RangeIter::new(self).map(Json::from).collect(),
            ),
            Value::Dict(d) => {
                let mut map = Map::new();
                for (k, v) in d.iter() {
                    map.insert(k.display(), v.to_json());
                }
                Json::Object(map)
            }
            Value::Table(t) => t.to_records(),
            Value::Series(c) => Json::Array(c.values.iter().map(Scalar::to_json).collect()),
            Value::Chart(c) => serde_json::to_value(c.as_ref()).unwrap_or(Json::Null),
            other => Json::String(other.repr()),
        }
    }
}

pub(crate) fn range_len(value: &Value) -> usize {
    match value {
        Value::Range { start, stop, step } => {
            let (start, stop, step) = (*start as i128, *stop as i128, *step as i128);
            let len = if step > 0 && start < stop {
                (stop - start + step - 1) / step
            } else if step < 0 && start > stop {
                (start - stop - step - 1) / -step
            } else {
                0
            };
            len as usize
        }
        _ => 0,
    }
}

/// Lazy iterator over a `Value::Range`
pub(crate) struct RangeIter {
    next: i64,
    remaining: usize,
    step: i64,
}

impl RangeIter {
    pub(crate) fn new(value: &Value) -> Self {
        match value {
            Value::Range { start, step, .. } => Self {
                next: *start,
                remaining: range_len(value),
                step: *step,
            },
            _ => Self {
                next: 0,
                remaining: 0,
                step: 1,
            },
        }
    }
}

impl Iterator for RangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next;
        self.remaining -= 1;
        self.next = self.next.wrapping_add(self.step);
        Some(current)
    }
}

/// Python `==` for values the program can compare
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| values_equal(p, q))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    matches!(y.get(k), Ok(Some(other)) if values_equal(v, other))
                })
        }
        (Value::Int(x), Value::Int(y)) => x == y,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Python ordering; `None` when the pair is not orderable
pub fn compare_values(a: &Value, b: &Value) -> FaultResult<Ordering> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (p, q) in x.iter().zip(y.iter()) {
                match compare_values(p, q)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).or(Some(Ordering::Equal)),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        Fault::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_matches_python() {
        assert_eq!(Value::Float(400.0).repr(), "400.0");
        assert_eq!(Value::Bool(true).repr(), "True");
        assert_eq!(
            Value::list(vec![Value::str("a"), Value::str("b")]).repr(),
            "['a', 'b']"
        );
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        let mut dict = Dict::new();
        dict.insert(Value::str("k"), Value::Float(0.5)).unwrap();
        assert_eq!(Value::dict(dict).repr(), "{'k': 0.5}");
        assert_eq!(Value::str("x").display(), "x");
    }

    #[test]
    fn test_dict_keys_follow_python_equality() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::str("one")).unwrap();
        dict.insert(Value::Float(1.0), Value::str("uno")).unwrap();
        dict.insert(Value::str("b"), Value::Int(2)).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(
            dict.get(&Value::Bool(true)).unwrap().map(Value::display),
            Some("uno".to_string())
        );
        assert!(dict.insert(Value::list(vec![]), Value::None).is_err());
        dict.remove(&Value::Int(1)).unwrap();
        assert_eq!(dict.get(&Value::str("b")).unwrap().and_then(Value::as_int), Some(2));
    }

    #[test]
    fn test_range_is_lazy() {
        let range = Value::Range {
            start: 0,
            stop: 10,
            step: 3,
        };
        assert_eq!(range_len(&range), 4);
        assert_eq!(RangeIter::new(&range).collect::<Vec<_>>(), vec![0, 3, 6, 9]);
        let backwards = Value::Range {
            start: 5,
            stop: 0,
            step: -2,
        };
        assert_eq!(RangeIter::new(&backwards).collect::<Vec<_>>(), vec![5, 3, 1]);
        let huge = Value::Range {
            start: 0,
            stop: i64::MAX,
            step: 1,
        };
        assert_eq!(range_len(&huge), i64::MAX as usize);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.truthy().unwrap());
        assert!(Value::str("x").truthy().unwrap());
        assert!(!Value::list(vec![]).truthy().unwrap());
        let series = Value::series(Column::new("a", vec![Scalar::Int(1)]));
        assert!(series.truthy().is_err());
    }

    #[test]
    fn test_ordering() {
        assert_eq!(
            compare_values(&Value::Int(1), &Value::Float(1.5)).unwrap(),
            Ordering::Less
        );
        assert!(compare_values(&Value::Int(1), &Value::str("a")).is_err());
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(!values_equal(&Value::Int(2), &Value::str("2")));
    }
}
