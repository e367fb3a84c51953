//! Operator semantics: arithmetic, comparison and membership.
//!
//! Scalars follow Python rules (checked integer arithmetic, floor division
//! and modulo rounding toward negative infinity). Series operate elementwise:
//! nulls propagate, division by zero yields `inf`/`NaN` instead of faulting.

use crate::fault::{Fault, FaultKind, FaultResult};
use crate::format::percent_format;
use crate::syntax::ast::{BinOp, CmpOp, UnaryOp};
use crate::table::{Column, Scalar, Table};
use crate::value::{compare_values, range_len, values_equal, Value};
use std::cmp::Ordering;
use std::sync::Arc;

fn unsupported_operands(op: &str, left: &Value, right: &Value) -> Fault {
    Fault::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn too_long(cap: usize) -> Fault {
    Fault::resource_limit(format!("sequence longer than {} elements", cap))
}

fn text_len(cell: &Scalar) -> usize {
    match cell {
        Scalar::Str(s) => s.chars().count(),
        _ => 0,
    }
}

/// Text a column operation adds on top of the cells it read. Each cell is
/// already bounded by `cap`; this bounds the column as a whole.
pub(crate) struct TextGrowth {
    cap: usize,
    grown: usize,
}

impl TextGrowth {
    pub(crate) fn new(cap: usize) -> Self {
        Self { cap, grown: 0 }
    }

    /// Charges `after - before` characters, failing once the total passes `cap`
    pub(crate) fn charge(&mut self, before: usize, after: usize) -> FaultResult<()> {
        self.grown = self.grown.saturating_add(after.saturating_sub(before));
        if self.grown > self.cap {
            return Err(Fault::resource_limit(format!(
                "column operation would add more than {} characters",
                self.cap
            )));
        }
        Ok(())
    }

    fn cell(&mut self, read: usize, out: Scalar) -> FaultResult<Scalar> {
        self.charge(read, text_len(&out))?;
        Ok(out)
    }
}

// ============================================================================
// BINARY OPERATORS
// ============================================================================

/// `left <op> right`. `cap` bounds the length of strings and sequences the
/// operator may build.
pub fn binary(op: BinOp, left: &Value, right: &Value, cap: usize) -> FaultResult<Value> {
    match (left, right) {
        (Value::Series(a), Value::Series(b)) => {
            if a.len() != b.len() {
                return Err(Fault::value_error(format!(
                    "Can only compare identically-labeled Series objects (lengths {} and {})",
                    a.len(),
                    b.len()
                )));
            }
            let mut growth = TextGrowth::new(cap);
            let values = a
                .values
                .iter()
                .zip(&b.values)
                .map(|(x, y)| growth.cell(text_len(x) + text_len(y), cell_binary(op, x, y, cap)?))
                .collect::<FaultResult<Vec<_>>>()?;
            Ok(Value::series(Column::new(a.name.clone(), values)))
        }
        (Value::Series(a), other) => {
            let rhs = scalar_operand(op, left, other)?;
            let mut growth = TextGrowth::new(cap);
            Ok(Value::series(series_map(a, |x| {
                growth.cell(text_len(x), cell_binary(op, x, &rhs, cap)?)
            })?))
        }
        (other, Value::Series(b)) => {
            let lhs = scalar_operand(op, other, right)?;
            let mut growth = TextGrowth::new(cap);
            Ok(Value::series(series_map(b, |y| {
                growth.cell(text_len(y), cell_binary(op, &lhs, y, cap)?)
            })?))
        }
        (Value::Table(t), other) if other.to_scalar().is_some() => {
            let rhs = scalar_operand(op, left, other)?;
            let mut growth = TextGrowth::new(cap);
            table_map(t, |x| growth.cell(text_len(x), cell_binary(op, x, &rhs, cap)?))
        }
        (other, Value::Table(t)) if other.to_scalar().is_some() => {
            let lhs = scalar_operand(op, other, right)?;
            let mut growth = TextGrowth::new(cap);
            table_map(t, |y| growth.cell(text_len(y), cell_binary(op, &lhs, y, cap)?))
        }
        _ => scalar_binary(op, left, right, cap),
    }
}

fn scalar_operand(op: BinOp, left: &Value, right: &Value) -> FaultResult<Scalar> {
    let operand = if matches!(left, Value::Series(_) | Value::Table(_)) {
        right
    } else {
        left
    };
    operand
        .to_scalar()
        .ok_or_else(|| unsupported_operands(op.symbol(), left, right))
}

pub(crate) fn series_map(
    column: &Column,
    mut f: impl FnMut(&Scalar) -> FaultResult<Scalar>,
) -> FaultResult<Column> {
    let values = column
        .values
        .iter()
        .map(&mut f)
        .collect::<FaultResult<Vec<_>>>()?;
    Ok(Column::new(column.name.clone(), values))
}

fn table_map(table: &Table, mut f: impl FnMut(&Scalar) -> FaultResult<Scalar>) -> FaultResult<Value> {
    let keys = table.key_columns();
    let mut columns = table.columns()[..keys].to_vec();
    for column in table.value_columns() {
        columns.push(series_map(column, &mut f)?);
    }
    Ok(Value::table(Table::keyed(columns, keys)?))
}

/// One cell of an elementwise operation
fn cell_binary(op: BinOp, a: &Scalar, b: &Scalar, cap: usize) -> FaultResult<Scalar> {
    if a.is_null() || b.is_null() {
        return Ok(match (op, a, b) {
            (BinOp::BitAnd, Scalar::Bool(false), _) | (BinOp::BitAnd, _, Scalar::Bool(false)) => {
                Scalar::Bool(false)
            }
            (BinOp::BitAnd | BinOp::BitOr, _, _) => Scalar::Bool(false),
            _ => Scalar::Float(f64::NAN),
        });
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        if y == 0.0 && matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod) {
            let value = match op {
                BinOp::Mod => f64::NAN,
                _ if x == 0.0 || x.is_nan() => f64::NAN,
                _ if x > 0.0 => f64::INFINITY,
                _ => f64::NEG_INFINITY,
            };
            return Ok(Scalar::Float(value));
        }
    }
    let result = scalar_binary(op, &Value::from_scalar(a), &Value::from_scalar(b), cap)?;
    result.to_scalar().ok_or_else(|| {
        Fault::type_error(format!(
            "elementwise {} produced a {}",
            op.symbol(),
            result.type_name()
        ))
    })
}

fn scalar_binary(op: BinOp, left: &Value, right: &Value, cap: usize) -> FaultResult<Value> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b))
            if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) =>
        {
            Ok(Value::Bool(match op {
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                _ => a ^ b,
            }))
        }
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            let (a, b) = (left.as_int().unwrap_or(0), right.as_int().unwrap_or(0));
            int_binary(op, a, b)
        }
        (Value::Int(_) | Value::Bool(_) | Value::Float(_), Value::Int(_) | Value::Bool(_) | Value::Float(_)) => {
            let (a, b) = (left.as_f64().unwrap_or(0.0), right.as_f64().unwrap_or(0.0));
            float_binary(op, a, b).map_err(|err| match err.kind {
                FaultKind::TypeError => unsupported_operands(op.symbol(), left, right),
                _ => err,
            })
        }
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
            if a.chars().count() + b.chars().count() > cap {
                return Err(too_long(cap));
            }
            Ok(Value::str(format!("{}{}", a, b)))
        }
        (Value::Str(template), args) if op == BinOp::Mod => {
            Ok(Value::str(percent_format(template, args, cap)?))
        }
        (Value::Str(s), count @ (Value::Int(_) | Value::Bool(_)))
        | (count @ (Value::Int(_) | Value::Bool(_)), Value::Str(s))
            if op == BinOp::Mul =>
        {
            let n = repeat_count(count, s.chars().count(), cap)?;
            Ok(Value::str(s.repeat(n)))
        }
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) if op == BinOp::Add => {
            if a.len() + b.len() > cap {
                return Err(too_long(cap));
            }
            let joined: Vec<Value> = a.iter().chain(b.iter()).cloned().collect();
            Ok(match left {
                Value::List(_) => Value::list(joined),
                _ => Value::tuple(joined),
            })
        }
        (Value::List(_) | Value::Tuple(_), Value::Int(_) | Value::Bool(_)) if op == BinOp::Mul => {
            repeat_sequence(left, right, cap)
        }
        (Value::Int(_) | Value::Bool(_), Value::List(_) | Value::Tuple(_)) if op == BinOp::Mul => {
            repeat_sequence(right, left, cap)
        }
        _ => Err(unsupported_operands(op.symbol(), left, right)),
    }
}

fn repeat_sequence(seq: &Value, count: &Value, cap: usize) -> FaultResult<Value> {
    let (Value::List(items) | Value::Tuple(items)) = seq else {
        return Err(unsupported_operands("*", seq, count));
    };
    let n = repeat_count(count, items.len(), cap)?;
    let mut repeated = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        repeated.extend(items.iter().cloned());
    }
    Ok(match seq {
        Value::List(_) => Value::list(repeated),
        _ => Value::tuple(repeated),
    })
}

fn repeat_count(count: &Value, unit: usize, cap: usize) -> FaultResult<usize> {
    let n = count.as_int().unwrap_or(0).max(0) as usize;
    match unit.checked_mul(n) {
        Some(total) if total <= cap => Ok(n),
        _ => Err(too_long(cap)),
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> FaultResult<Value> {
    let checked = |r: Option<i64>| r.map(Value::Int).ok_or_else(Fault::overflow);
    match op {
        BinOp::Add => checked(a.checked_add(b)),
        BinOp::Sub => checked(a.checked_sub(b)),
        BinOp::Mul => checked(a.checked_mul(b)),
        BinOp::Div => {
            if b == 0 {
                return Err(Fault::zero_division("division by zero"));
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv | BinOp::Mod if b == 0 => {
            Err(Fault::zero_division("integer division or modulo by zero"))
        }
        BinOp::FloorDiv => {
            let q = a.checked_div(b).ok_or_else(Fault::overflow)?;
            let adjust = a % b != 0 && ((a < 0) != (b < 0));
            checked(if adjust { q.checked_sub(1) } else { Some(q) })
        }
        BinOp::Mod => {
            let r = a.checked_rem(b).ok_or_else(Fault::overflow)?;
            Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(Fault::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| Fault::overflow())?;
            checked(a.checked_pow(exp))
        }
        BinOp::BitAnd => Ok(Value::Int(a & b)),
        BinOp::BitOr => Ok(Value::Int(a | b)),
        BinOp::BitXor => Ok(Value::Int(a ^ b)),
        BinOp::LShift | BinOp::RShift if b < 0 => Err(Fault::value_error("negative shift count")),
        BinOp::LShift => {
            if a == 0 {
                return Ok(Value::Int(0));
            }
            if b >= 63 {
                return Err(Fault::overflow());
            }
            let shifted = a << b;
            if shifted >> b != a {
                return Err(Fault::overflow());
            }
            Ok(Value::Int(shifted))
        }
        BinOp::RShift => Ok(Value::Int(if b >= 64 {
            if a < 0 {
                -1
            } else {
                0
            }
        } else {
            a >> b
        })),
        BinOp::MatMul => Err(Fault::type_error(
            "unsupported operand type(s) for @: 'int' and 'int'",
        )),
    }
}

fn float_binary(op: BinOp, a: f64, b: f64) -> FaultResult<Value> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Fault::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(Fault::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(Fault::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(Fault::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(Fault::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let r = a.powf(b);
            if r.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(Fault::new(FaultKind::Overflow, "numerical result out of range"));
            }
            r
        }
        _ => return Err(Fault::type_error(op.symbol())),
    };
    Ok(Value::Float(result))
}

// ============================================================================
// UNARY OPERATORS
// ============================================================================

pub fn unary(op: UnaryOp, operand: &Value) -> FaultResult<Value> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!operand.truthy()?));
    }
    if let Value::Series(column) = operand {
        let mapped = series_map(column, |cell| {
            if cell.is_null() {
                return Ok(cell.clone());
            }
            let value = unary(op, &Value::from_scalar(cell))?;
            let value = match (op, cell, value) {
                (UnaryOp::Invert, Scalar::Bool(b), _) => Value::Bool(!b),
                (_, _, value) => value,
            };
            value
                .to_scalar()
                .ok_or_else(|| Fault::type_error("elementwise operator produced a non-scalar"))
        })?;
        return Ok(Value::series(mapped));
    }
    let bad = || {
        Fault::type_error(format!(
            "bad operand type for unary {}: '{}'",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Invert => "~",
                UnaryOp::Not => "not",
            },
            operand.type_name()
        ))
    };
    match (op, operand) {
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Value::Int(_) | Value::Bool(_)) => operand
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(Fault::overflow),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Pos, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(operand.as_int().unwrap_or(0))),
        (UnaryOp::Invert, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(!operand.as_int().unwrap_or(0))),
        _ => Err(bad()),
    }
}

// ============================================================================
// COMPARISONS
// ============================================================================

/// One link of a comparison chain. Comparing a series yields a boolean mask.
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> FaultResult<Value> {
    match op {
        CmpOp::In => return Ok(Value::Bool(contains(right, left)?)),
        CmpOp::NotIn => return Ok(Value::Bool(!contains(right, left)?)),
        CmpOp::Is => return Ok(Value::Bool(identical(left, right))),
        CmpOp::IsNot => return Ok(Value::Bool(!identical(left, right))),
        _ => {}
    }
    match (left, right) {
        (Value::Series(a), Value::Series(b)) => {
            if a.len() != b.len() {
                return Err(Fault::value_error(
                    "Can only compare identically-labeled Series objects",
                ));
            }
            let mask = a
                .values
                .iter()
                .zip(&b.values)
                .map(|(x, y)| cell_compare(op, x, y).map(Scalar::Bool))
                .collect::<FaultResult<Vec<_>>>()?;
            Ok(Value::series(Column::new(a.name.clone(), mask)))
        }
        (Value::Series(a), other) => {
            let rhs = other.to_scalar().ok_or_else(|| not_orderable(op, left, right))?;
            Ok(Value::series(series_map(a, |x| cell_compare(op, x, &rhs).map(Scalar::Bool))?))
        }
        (other, Value::Series(b)) => {
            let lhs = other.to_scalar().ok_or_else(|| not_orderable(op, left, right))?;
            Ok(Value::series(series_map(b, |y| cell_compare(op, &lhs, y).map(Scalar::Bool))?))
        }
        _ => {
            let outcome = match op {
                CmpOp::Eq => values_equal(left, right),
                CmpOp::NotEq => !values_equal(left, right),
                _ => {
                    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
                        if a.is_nan() || b.is_nan() {
                            return Ok(Value::Bool(false));
                        }
                    }
                    let ordering = compare_values(left, right)
                        .map_err(|_| not_orderable(op, left, right))?;
                    ordering_matches(op, ordering)
                }
            };
            Ok(Value::Bool(outcome))
        }
    }
}

fn not_orderable(op: CmpOp, left: &Value, right: &Value) -> Fault {
    Fault::type_error(format!(
        "'{}' not supported between instances of '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn ordering_matches(op: CmpOp, ordering: Ordering) -> bool {
    match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::NotEq => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::LtE => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::GtE => ordering != Ordering::Less,
        _ => false,
    }
}

/// Elementwise comparison; any comparison against a null is false except `!=`
fn cell_compare(op: CmpOp, a: &Scalar, b: &Scalar) -> FaultResult<bool> {
    if a.is_null() || b.is_null() {
        return Ok(op == CmpOp::NotEq);
    }
    let ordering = match (a, b) {
        (Scalar::Str(x), Scalar::Str(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    };
    match (ordering, op) {
        (Some(ordering), _) => Ok(ordering_matches(op, ordering)),
        (None, CmpOp::Eq) => Ok(false),
        (None, CmpOp::NotEq) => Ok(true),
        (None, _) => Err(Fault::type_error(format!(
            "'{}' not supported between '{}' and '{}'",
            op.symbol(),
            a.repr(),
            b.repr()
        ))),
    }
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => Arc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Arc::ptr_eq(x, y),
        (Value::Table(x), Value::Table(y)) => Arc::ptr_eq(x, y),
        (Value::Series(x), Value::Series(y)) => Arc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        _ => false,
    }
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> FaultResult<bool> {
    match container {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Str(text) => match item {
            Value::Str(needle) => Ok(text.contains(&**needle)),
            other => Err(Fault::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Dict(dict) => Ok(dict.get(item)?.is_some()),
        Value::Range { start, step, .. } => {
            let Some(n) = item.as_int().or_else(|| {
                item.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            }) else {
                return Ok(false);
            };
            let len = range_len(container) as i128;
            let offset = n as i128 - *start as i128;
            let step = *step as i128;
            Ok(offset % step == 0 && (0..len).contains(&(offset / step)))
        }
        Value::Series(column) => {
            let Some(needle) = item.to_scalar() else {
                return Ok(false);
            };
            Ok(column
                .values
                .iter()
                .any(|cell| !cell.is_null() && cell_compare(CmpOp::Eq, cell, &needle).unwrap_or(false)))
        }
        Value::Table(table) => Ok(item.as_str().is_some_and(|name| table.has_column(name))),
        other => Err(Fault::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 1_000;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    fn series(values: Vec<Scalar>) -> Value {
        Value::series(Column::new("s", values))
    }

    #[test]
    fn test_python_division_rules() {
        assert_eq!(binary(BinOp::FloorDiv, &int(-7), &int(2), CAP).unwrap().as_int(), Some(-4));
        assert_eq!(binary(BinOp::Mod, &int(-7), &int(2), CAP).unwrap().as_int(), Some(1));
        assert_eq!(binary(BinOp::Div, &int(7), &int(2), CAP).unwrap().as_f64(), Some(3.5));
        let err = binary(BinOp::Div, &int(1), &int(0), CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::ZeroDivision);
        let err = binary(BinOp::Mod, &Value::Float(1.0), &int(0), CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::ZeroDivision);
    }

    #[test]
    fn test_integer_overflow_is_a_fault() {
        let err = binary(BinOp::Mul, &int(i64::MAX), &int(2), CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::Overflow);
        let err = binary(BinOp::Pow, &int(10), &int(40), CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::Overflow);
        let err = binary(BinOp::LShift, &int(1), &int(80), CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::Overflow);
        assert_eq!(binary(BinOp::Pow, &int(2), &int(10), CAP).unwrap().as_int(), Some(1024));
    }

    #[test]
    fn test_sequence_building_respects_cap() {
        let err = binary(BinOp::Mul, &Value::str("ab"), &int(600), CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceLimit);
        let err = binary(BinOp::Mul, &Value::list(vec![int(1)]), &int(i64::MAX), CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceLimit);
        let joined = binary(BinOp::Add, &Value::str("a"), &Value::str("b"), CAP).unwrap();
        assert_eq!(joined.display(), "ab");
        let err = binary(BinOp::Add, &Value::str("a"), &int(1), CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::TypeError);
    }

    #[test]
    fn test_column_text_growth_is_bounded() {
        let suffix = Value::str("x".repeat(200));
        let short = series(vec![Scalar::Str("a".into()); 3]);
        let grown = binary(BinOp::Add, &short, &suffix, CAP).unwrap();
        assert!(matches!(grown, Value::Series(c) if c.values.iter().all(|v| text_len(v) == 201)));

        let long = series(vec![Scalar::Str("a".into()); 10]);
        let err = binary(BinOp::Add, &long, &suffix, CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceLimit);
        let err = binary(BinOp::Mul, &long, &int(200), CAP).unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceLimit);
    }

    #[test]
    fn test_series_arithmetic_is_elementwise() {
        let s = series(vec![Scalar::Int(1), Scalar::Null, Scalar::Int(4)]);
        let doubled = binary(BinOp::Mul, &s, &int(2), CAP).unwrap();
        let Value::Series(column) = doubled else {
            panic!("expected series");
        };
        assert_eq!(column.values[0], Scalar::Int(2));
        assert!(column.values[1].is_null());
        assert_eq!(column.values[2], Scalar::Int(8));

        let divided = binary(BinOp::Div, &s, &int(0), CAP).unwrap();
        let Value::Series(column) = divided else {
            panic!("expected series");
        };
        assert_eq!(column.values[0], Scalar::Float(f64::INFINITY));

        let short = series(vec![Scalar::Int(1)]);
        assert!(binary(BinOp::Add, &s, &short, CAP).is_err());
    }

    #[test]
    fn test_series_masks() {
        let s = series(vec![Scalar::Int(1), Scalar::Int(5), Scalar::Null]);
        let mask = compare(CmpOp::Gt, &s, &int(2)).unwrap();
        let Value::Series(column) = &mask else {
            panic!("expected series");
        };
        assert_eq!(
            column.values,
            vec![Scalar::Bool(false), Scalar::Bool(true), Scalar::Bool(false)]
        );
        let inverted = unary(UnaryOp::Invert, &mask).unwrap();
        let Value::Series(column) = &inverted else {
            panic!("expected series");
        };
        assert_eq!(column.values[0], Scalar::Bool(true));
        let both = binary(BinOp::BitAnd, &mask, &inverted, CAP).unwrap();
        let Value::Series(column) = both else {
            panic!("expected series");
        };
        assert!(column.values.iter().all(|v| *v == Scalar::Bool(false)));
    }

    #[test]
    fn test_comparisons_and_membership() {
        assert!(compare(CmpOp::Lt, &int(1), &Value::Float(1.5)).unwrap().truthy().unwrap());
        assert!(compare(CmpOp::Lt, &int(1), &Value::str("a")).is_err());
        let list = Value::list(vec![int(1), Value::str("x")]);
        assert!(contains(&list, &Value::str("x")).unwrap());
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&Value::str("hello"), &int(1)).is_err());
        let range = Value::Range { start: 0, stop: 10, step: 3 };
        assert!(contains(&range, &int(9)).unwrap());
        assert!(!contains(&range, &int(10)).unwrap());
        assert!(compare(CmpOp::Is, &Value::None, &Value::None).unwrap().truthy().unwrap());
        assert_eq!(
            binary(BinOp::Mod, &Value::str("%.1f%%"), &Value::Float(12.34), CAP)
                .unwrap()
                .display(),
            "12.3%"
        );
    }
}
