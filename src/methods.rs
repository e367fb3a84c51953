//! Methods and properties of run-time values.
//!
//! Method names are a closed set per receiver type. The validator already
//! restricts attribute names to the policy's allow-list; the interpreter
//! re-checks that list before any lookup here.

use crate::builtins::{
    cell_of, position_of, round_float, round_int, to_float, to_int, Args, KEYWORD_ONLY,
};
use crate::fault::{Fault, FaultKind, FaultResult};
use crate::format::str_format;
use crate::interpreter::{collect_items, Interpreter};
use crate::ops::{self, series_map, TextGrowth};
use crate::syntax::ast::BinOp;
use crate::table::{Agg, Column, Scalar, Table};
use crate::value::{Builtin, Dict, GroupBy, Value};
use std::sync::Arc;

const STR_METHODS: &[&str] = &[
    "lower", "upper", "strip", "lstrip", "rstrip", "split", "replace", "join", "title",
    "capitalize", "startswith", "endswith", "find", "index", "format",
];

const LIST_METHODS: &[&str] = &["append", "extend", "index"];

const DICT_METHODS: &[&str] = &["keys", "values", "items", "get"];

const TABLE_METHODS: &[&str] = &[
    "head", "tail", "sort_values", "groupby", "describe", "dropna", "fillna", "nlargest",
    "nsmallest", "sum", "mean", "median", "min", "max", "std", "var", "count", "nunique", "round",
    "abs", "rename", "reset_index", "copy", "isnull", "notnull", "drop_duplicates", "drop",
    "corr", "to_dict", "apply",
];

/// Extra methods of a keyed table with a single value column
const KEYED_SERIES_METHODS: &[&str] = &["tolist", "to_list", "items"];

const SERIES_METHODS: &[&str] = &[
    "head", "tail", "sort_values", "sum", "mean", "median", "min", "max", "std", "var", "count",
    "nunique", "round", "abs", "unique", "value_counts", "tolist", "to_list", "astype", "apply",
    "isin", "cumsum", "quantile", "agg", "dropna", "fillna", "isnull", "notnull", "describe",
    "nlargest", "nsmallest", "copy", "to_dict", "items", "drop_duplicates", "reset_index",
    "rename",
];

const TEXT_METHODS: &[&str] = &[
    "contains", "lower", "upper", "startswith", "endswith", "len", "strip", "lstrip", "rstrip",
    "replace", "title", "capitalize", "find",
];

const GROUPBY_METHODS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "std", "var", "nunique", "size", "agg",
];

const CHART_METHODS: &[&str] = &["update_layout", "show"];

/// Methods that update their receiver
const MUTATING_METHODS: &[&str] = &["append", "extend", "update_layout"];

const LAYOUT_COSMETIC_KEYWORDS: &[&str] = &[
    "template", "height", "width", "showlegend", "legend_title", "margin", "font", "bargap",
    "xaxis", "yaxis", "hovermode", "legend",
];

pub(crate) fn no_attribute(value: &Value, name: &str) -> Fault {
    Fault::new(
        FaultKind::AttributeError,
        format!("'{}' object has no attribute '{}'", value.type_name(), name),
    )
}

/// Keyed table with exactly one value column; behaves like a labelled series
pub(crate) fn series_like(table: &Table) -> Option<&Column> {
    match table.value_columns() {
        [column] if table.key_columns() > 0 => Some(column),
        _ => None,
    }
}

pub(crate) fn has_method(value: &Value, name: &str) -> bool {
    let methods: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => &["index"],
        Value::Dict(_) => DICT_METHODS,
        Value::Table(t) => {
            if series_like(t).is_some() && KEYED_SERIES_METHODS.contains(&name) {
                return true;
            }
            TABLE_METHODS
        }
        Value::Series(_) => SERIES_METHODS,
        Value::StrAccessor(_) => TEXT_METHODS,
        Value::GroupBy(_) => GROUPBY_METHODS,
        Value::Chart(_) => CHART_METHODS,
        _ => &[],
    };
    methods.contains(&name)
}

pub(crate) fn is_mutating(name: &str) -> bool {
    MUTATING_METHODS.contains(&name)
}

/// Attribute values that are data rather than methods
pub(crate) fn property(value: &Value, name: &str) -> Option<Value> {
    let property = match (value, name) {
        (Value::Table(t), "columns") => Value::list(
            t.value_columns()
                .iter()
                .map(|c| Value::str(c.name.as_str()))
                .collect(),
        ),
        (Value::Table(t), "shape") => Value::tuple(vec![
            Value::Int(t.num_rows() as i64),
            Value::Int(t.value_columns().len() as i64),
        ]),
        (Value::Table(t), "dtypes") => {
            let mut dtypes = Dict::new();
            for column in t.value_columns() {
                dtypes
                    .insert(Value::str(column.name.as_str()), Value::str(column.dtype().name()))
                    .ok()?;
            }
            Value::dict(dtypes)
        }
        (Value::Table(t), "empty") => {
            Value::Bool(t.num_rows() == 0 || t.value_columns().is_empty())
        }
        (Value::Table(t), "size") => {
            Value::Int((t.num_rows() * t.value_columns().len()) as i64)
        }
        (Value::Series(c), "name") => Value::str(c.name.as_str()),
        (Value::Series(c), "dtype") => Value::str(c.dtype().name()),
        (Value::Series(c), "str") => Value::StrAccessor(c.clone()),
        (Value::Series(c), "shape") => Value::tuple(vec![Value::Int(c.len() as i64)]),
        (Value::Series(c), "empty") => Value::Bool(c.is_empty()),
        (Value::Series(c), "size") => Value::Int(c.len() as i64),
        _ => return None,
    };
    Some(property)
}

/// Runs a receiver-updating method against `target` in place
pub(crate) fn mutate_in_place(target: &mut Value, name: &str, args: Args, cap: usize) -> FaultResult<Value> {
    match (target, name) {
        (Value::List(items), "append") => {
            args.check(1, &[])?;
            let item = args.required(0, "object")?.clone();
            if items.len() >= cap {
                return Err(Fault::resource_limit(format!(
                    "list longer than {} elements",
                    cap
                )));
            }
            Arc::make_mut(items).push(item);
            Ok(Value::None)
        }
        (Value::List(items), "extend") => {
            args.check(1, &[])?;
            let extra = collect_items(args.required(0, "iterable")?, cap)?;
            if items.len() + extra.len() > cap {
                return Err(Fault::resource_limit(format!(
                    "list longer than {} elements",
                    cap
                )));
            }
            Arc::make_mut(items).extend(extra);
            Ok(Value::None)
        }
        (chart @ Value::Chart(_), "update_layout") => {
            let allowed: Vec<&str> = ["title", "xaxis_title", "yaxis_title"]
                .iter()
                .chain(LAYOUT_COSMETIC_KEYWORDS)
                .copied()
                .collect();
            args.check(0, &allowed)?;
            let title = layout_text(args.keyword("title"))?;
            let x_label = layout_text(args.keyword("xaxis_title"))?;
            let y_label = layout_text(args.keyword("yaxis_title"))?;
            if let Value::Chart(spec) = chart {
                *spec = Arc::new(spec.with_layout(title, x_label, y_label));
            }
            Ok(chart.clone())
        }
        (other, _) => Err(no_attribute(other, name)),
    }
}

/// `title="..."` or plotly's `title={"text": "..."}`
fn layout_text(value: Option<&Value>) -> FaultResult<Option<String>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Dict(dict)) => Ok(dict.get(&Value::str("text"))?.map(Value::display)),
        Some(other) => Ok(Some(other.display())),
    }
}

fn column_names(value: &Value, what: &str) -> FaultResult<Vec<String>> {
    match value {
        Value::Str(name) => Ok(vec![name.to_string()]),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    Fault::type_error(format!("{} must be column names", what))
                })
            })
            .collect(),
        other => Err(Fault::type_error(format!(
            "{} must be a column name or a list of names, not {}",
            what,
            other.type_name()
        ))),
    }
}

fn ascending_flags(args: &Args) -> FaultResult<Vec<bool>> {
    match args.keyword("ascending") {
        None => Ok(vec![true]),
        Some(Value::List(items)) | Some(Value::Tuple(items)) => {
            items.iter().map(Value::truthy).collect()
        }
        Some(flag) => Ok(vec![flag.truthy()?]),
    }
}

/// Aggregation named by a string or a builtin (`"sum"`, `sum`, `np.mean`)
fn agg_of(value: &Value) -> FaultResult<Agg> {
    let agg = match value {
        Value::Str(name) => Agg::parse(name),
        Value::Builtin(Builtin::Sum | Builtin::NpSum) => Some(Agg::Sum),
        Value::Builtin(Builtin::Min | Builtin::NpMin) => Some(Agg::Min),
        Value::Builtin(Builtin::Max | Builtin::NpMax) => Some(Agg::Max),
        Value::Builtin(Builtin::Len) => Some(Agg::Size),
        Value::Builtin(Builtin::NpMean) => Some(Agg::Mean),
        Value::Builtin(Builtin::NpMedian) => Some(Agg::Median),
        Value::Builtin(Builtin::NpStd) => Some(Agg::Std),
        _ => None,
    };
    agg.ok_or_else(|| Fault::value_error(format!("unknown aggregation {}", value.repr())))
}

fn agg_name(agg: Agg) -> String {
    format!("{:?}", agg).to_lowercase()
}

/// Rows picked by `head(n)` / `tail(n)`; a negative `n` drops `|n|` rows
/// from the other end
fn head_rows(args: &Args, len: usize, from_end: bool) -> FaultResult<Vec<usize>> {
    args.check(1, &["n"])?;
    let n = args.int(0, "n")?.unwrap_or(5);
    let count = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX).min(len);
    let range = match (n >= 0, from_end) {
        (true, false) => 0..count,
        (false, false) => 0..len - count,
        (true, true) => len - count..len,
        (false, true) => count..len,
    };
    Ok(range.collect())
}

fn sort_column(column: &Column, ascending: bool) -> FaultResult<Column> {
    let table = Table::new(vec![column.clone()])?;
    let sorted = table.sort_by(&[column.name.clone()], &[ascending])?;
    Ok(sorted.columns()[0].clone())
}

fn fill_nulls(column: &Column, fill: &Scalar) -> Column {
    Column::new(
        column.name.clone(),
        column
            .values
            .iter()
            .map(|v| if v.is_null() { fill.clone() } else { v.clone() })
            .collect(),
    )
}

fn null_mask(column: &Column, want_null: bool) -> Column {
    Column::new(
        column.name.clone(),
        column
            .values
            .iter()
            .map(|v| Scalar::Bool(v.is_null() == want_null))
            .collect(),
    )
}

fn round_column(column: &Column, decimals: i64) -> Column {
    Column::new(
        column.name.clone(),
        column
            .values
            .iter()
            .map(|v| match v {
                Scalar::Float(f) => Scalar::Float(round_float(*f, decimals)),
                Scalar::Int(i) => round_int(*i, decimals)
                    .map(Scalar::Int)
                    .unwrap_or_else(|_| Scalar::Float(round_float(*i as f64, decimals))),
                other => other.clone(),
            })
            .collect(),
    )
}

fn abs_column(column: &Column) -> FaultResult<Column> {
    series_map(column, |cell| match cell {
        Scalar::Null => Ok(Scalar::Null),
        Scalar::Float(f) => Ok(Scalar::Float(f.abs())),
        Scalar::Int(i) => i.checked_abs().map(Scalar::Int).ok_or_else(Fault::overflow),
        Scalar::Bool(b) => Ok(Scalar::Int(*b as i64)),
        Scalar::Str(_) => Err(Fault::type_error("bad operand type for abs(): 'str'")),
    })
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_cased = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if previous_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_cased = true;
        } else {
            out.push(c);
            previous_cased = false;
        }
    }
    out
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn strip(text: &str, chars: Option<&str>, left: bool, right: bool) -> String {
    let matches = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let mut out = text;
    if left {
        out = out.trim_start_matches(matches);
    }
    if right {
        out = out.trim_end_matches(matches);
    }
    out.to_string()
}

fn split(text: &str, sep: Option<&str>, maxsplit: i64) -> FaultResult<Vec<String>> {
    match sep {
        Some("") => Err(Fault::value_error("empty separator")),
        Some(sep) if maxsplit < 0 => Ok(text.split(sep).map(str::to_string).collect()),
        Some(sep) => Ok(text
            .splitn(maxsplit as usize + 1, sep)
            .map(str::to_string)
            .collect()),
        None if maxsplit < 0 => Ok(text.split_whitespace().map(str::to_string).collect()),
        None => {
            let mut parts = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() && (parts.len() as i64) < maxsplit {
                match rest.find(char::is_whitespace) {
                    Some(end) => {
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    None => {
                        parts.push(rest.to_string());
                        rest = "";
                    }
                }
            }
            if !rest.is_empty() {
                parts.push(rest.to_string());
            }
            Ok(parts)
        }
    }
}

/// Characters in `text` after replacing up to `limit` occurrences of `old`
fn replaced_len(text: &str, old: &str, new: &str, limit: usize) -> usize {
    let chars = text.chars().count();
    let occurrences = if old.is_empty() {
        chars + 1
    } else {
        text.matches(old).count()
    }
    .min(limit);
    chars
        .saturating_sub(occurrences * old.chars().count())
        .saturating_add(occurrences.saturating_mul(new.chars().count()))
}

/// Python `str.find`: character offset or -1
fn find(text: &str, needle: &str) -> i64 {
    text.find(needle)
        .map(|byte| text[..byte].chars().count() as i64)
        .unwrap_or(-1)
}

fn affix_matches(text: &str, affix: &Value, prefix: bool) -> FaultResult<bool> {
    let candidates: Vec<&str> = match affix {
        Value::Str(s) => vec![&**s],
        Value::Tuple(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| Fault::type_error("tuple for startswith must only contain str"))
            })
            .collect::<FaultResult<_>>()?,
        other => {
            return Err(Fault::type_error(format!(
                "startswith first arg must be str or a tuple of str, not {}",
                other.type_name()
            )))
        }
    };
    Ok(candidates.iter().any(|c| {
        if prefix {
            text.starts_with(c)
        } else {
            text.ends_with(c)
        }
    }))
}

// ============================================================================
// DISPATCH
// ============================================================================

impl Interpreter {
    pub(crate) fn call_method(
        &mut self,
        receiver: Value,
        name: &str,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> FaultResult<Value> {
        let args = Args::new(name, positional, keywords);
        if is_mutating(name) {
            let mut copy = receiver;
            return mutate_in_place(&mut copy, name, args, self.cap());
        }
        match &receiver {
            Value::Str(text) => self.str_method(text, name, &args),
            Value::List(items) | Value::Tuple(items) if name == "index" => {
                args.check(1, &[])?;
                let needle = args.required(0, "value")?;
                position_of(items, needle)
                    .map(|i| Value::Int(i as i64))
                    .ok_or_else(|| Fault::value_error(format!("{} is not in list", needle.repr())))
            }
            Value::Dict(dict) => dict_method(dict, name, &args),
            Value::Table(table) => self.table_method(table, name, &args),
            Value::Series(column) => self.series_method(column, name, &args),
            Value::StrAccessor(column) => text_method(column, name, &args, self.cap()),
            Value::GroupBy(grouped) => group_method(grouped, name, &args),
            Value::Chart(_) if name == "show" => {
                args.check(0, &["renderer", "config"])?;
                Ok(Value::None)
            }
            _ => Err(no_attribute(&receiver, name)),
        }
    }

    fn str_method(&mut self, text: &str, name: &str, args: &Args) -> FaultResult<Value> {
        let string_arg = |index: usize, key: &str| -> FaultResult<String> {
            args.string(index, key)?
                .ok_or_else(|| Fault::type_error(format!("{}() missing required argument: '{}'", name, key)))
        };
        let result = match name {
            "lower" => Value::str(text.to_lowercase()),
            "upper" => Value::str(text.to_uppercase()),
            "title" => Value::str(title_case(text)),
            "capitalize" => Value::str(capitalize(text)),
            "strip" | "lstrip" | "rstrip" => {
                args.check(1, &[])?;
                let chars = args.string(0, "chars")?;
                Value::str(strip(text, chars.as_deref(), name != "rstrip", name != "lstrip"))
            }
            "split" => {
                args.check(2, &["sep", "maxsplit"])?;
                let sep = args.string(0, "sep")?;
                let maxsplit = args.int(1, "maxsplit")?.unwrap_or(-1);
                let parts = split(text, sep.as_deref(), maxsplit)?;
                self.check_len(parts.len())?;
                Value::list(parts.into_iter().map(Value::str).collect())
            }
            "replace" => {
                args.check(3, &[])?;
                let (old, new) = (string_arg(0, "old")?, string_arg(1, "new")?);
                let count = args.int(2, "count")?.unwrap_or(-1);
                let limit = usize::try_from(count).unwrap_or(usize::MAX);
                self.check_text_len(replaced_len(text, &old, &new, limit))?;
                Value::str(text.replacen(&old, &new, limit))
            }
            "join" => {
                args.check(1, &[])?;
                let items = self.materialize(args.required(0, "iterable")?)?;
                let parts = items
                    .iter()
                    .map(|item| {
                        item.as_str().ok_or_else(|| {
                            Fault::type_error(format!(
                                "sequence item: expected str instance, {} found",
                                item.type_name()
                            ))
                        })
                    })
                    .collect::<FaultResult<Vec<&str>>>()?;
                let separators = text.chars().count().saturating_mul(parts.len().saturating_sub(1));
                let total = parts
                    .iter()
                    .fold(separators, |sum, part| sum.saturating_add(part.chars().count()));
                self.check_text_len(total)?;
                Value::str(parts.join(text))
            }
            "startswith" | "endswith" => {
                args.check(1, &[])?;
                Value::Bool(affix_matches(text, args.required(0, "prefix")?, name == "startswith")?)
            }
            "find" | "index" => {
                args.check(1, &[])?;
                let position = find(text, &string_arg(0, "sub")?);
                if position < 0 && name == "index" {
                    return Err(Fault::value_error("substring not found"));
                }
                Value::Int(position)
            }
            "format" => Value::str(str_format(text, args.positional(), args.keywords(), self.cap())?),
            _ => return Err(no_attribute(&Value::str(text), name)),
        };
        Ok(result)
    }

    fn table_method(&mut self, table: &Arc<Table>, name: &str, args: &Args) -> FaultResult<Value> {
        if let Some(agg) = Agg::parse(name).filter(|a| !matches!(a, Agg::Size)) {
            args.check(0, &["numeric_only", "axis"])?;
            if args.keyword("axis").and_then(Value::as_int) == Some(1) {
                return Err(Fault::unsupported("row-wise reductions are not supported"));
            }
            return table_reduce(table, agg);
        }
        let keyed = series_like(table);
        let result = match name {
            "head" | "tail" => {
                let rows = head_rows(args, table.num_rows(), name == "tail")?;
                Value::table(table.take_rows(&rows))
            }
            "sort_values" => {
                args.check(1, &["by", "ascending", "na_position", "kind", "ignore_index"])?;
                let by = match (args.get(0, "by"), keyed) {
                    (Some(by), _) => column_names(by, "by")?,
                    (None, Some(column)) => vec![column.name.clone()],
                    (None, None) => {
                        return Err(Fault::type_error(
                            "sort_values() missing required argument: 'by'",
                        ))
                    }
                };
                Value::table(table.sort_by(&by, &ascending_flags(args)?)?)
            }
            "groupby" => {
                args.check(1, &["by", "as_index", "sort", "dropna"])?;
                let keys = column_names(args.required(0, "by")?, "by")?;
                for key in &keys {
                    table.column(key)?;
                }
                Value::GroupBy(Arc::new(GroupBy {
                    table: table.clone(),
                    keys,
                    selection: None,
                    single: false,
                    as_index: args.flag(KEYWORD_ONLY, "as_index", true)?,
                }))
            }
            "describe" => {
                args.check(0, &["include"])?;
                Value::table(table.describe())
            }
            "dropna" => {
                args.check(0, &["subset", "how", "axis"])?;
                let subset = match args.keyword("subset") {
                    None | Some(Value::None) => None,
                    Some(names) => Some(column_names(names, "subset")?),
                };
                Value::table(table.dropna(subset.as_deref())?)
            }
            "fillna" => {
                args.check(1, &["value"])?;
                let fill = args.required(0, "value")?;
                let filled = table.map_values(|column| {
                    let cell = match fill {
                        Value::Dict(per_column) => {
                            match per_column.get(&Value::str(column.name.as_str())) {
                                Ok(Some(value)) => value.to_scalar(),
                                _ => None,
                            }
                        }
                        other => other.to_scalar(),
                    };
                    Ok(match cell {
                        Some(cell) => fill_nulls(column, &cell),
                        None => column.clone(),
                    })
                })?;
                Value::table(filled)
            }
            "nlargest" | "nsmallest" => {
                args.check(2, &["n", "columns", "keep"])?;
                let n = args.int(0, "n")?.unwrap_or(5).max(0) as usize;
                let by = match (args.get(1, "columns"), keyed) {
                    (Some(columns), _) => column_names(columns, "columns")?,
                    (None, Some(column)) => vec![column.name.clone()],
                    (None, None) => {
                        return Err(Fault::type_error(format!(
                            "{}() missing required argument: 'columns'",
                            name
                        )))
                    }
                };
                let present = table.dropna(Some(&by))?;
                let sorted = present.sort_by(&by, &[name == "nsmallest"])?;
                Value::table(sorted.head(n))
            }
            "round" => {
                args.check(1, &["decimals"])?;
                let decimals = args.int(0, "decimals")?.unwrap_or(0);
                Value::table(table.map_values(|column| Ok(round_column(column, decimals)))?)
            }
            "abs" => {
                args.check(0, &[])?;
                let mut columns = table.columns()[..table.key_columns()].to_vec();
                for column in table.value_columns() {
                    columns.push(abs_column(column)?);
                }
                Value::table(Table::keyed(columns, table.key_columns())?)
            }
            "rename" => {
                args.check(0, &["columns"])?;
                let mapping = match args.keyword("columns") {
                    Some(Value::Dict(mapping)) => mapping
                        .iter()
                        .map(|(from, to)| (from.display(), to.display()))
                        .collect::<Vec<_>>(),
                    _ => return Err(Fault::type_error("rename() expects columns={old: new}")),
                };
                Value::table(table.rename(&mapping)?)
            }
            "reset_index" => {
                args.check(0, &["drop"])?;
                if args.flag(KEYWORD_ONLY, "drop", false)? {
                    let keys: Vec<String> = table.columns()[..table.key_columns()]
                        .iter()
                        .map(|c| c.name.clone())
                        .collect();
                    Value::table(table.drop_columns(&keys)?)
                } else {
                    Value::table(table.reset_index())
                }
            }
            "copy" => {
                args.check(0, &["deep"])?;
                Value::Table(table.clone())
            }
            "isnull" | "notnull" => {
                args.check(0, &[])?;
                let want_null = name == "isnull";
                Value::table(table.map_values(|column| Ok(null_mask(column, want_null)))?)
            }
            "drop_duplicates" => {
                args.check(1, &["subset", "keep"])?;
                if let Some(keep) = args.string(KEYWORD_ONLY, "keep")? {
                    if keep != "first" {
                        return Err(Fault::unsupported("drop_duplicates() only supports keep='first'"));
                    }
                }
                let subset = match args.get(0, "subset") {
                    None | Some(Value::None) => None,
                    Some(names) => Some(column_names(names, "subset")?),
                };
                Value::table(table.drop_duplicates(subset.as_deref())?)
            }
            "drop" => {
                args.check(1, &["labels", "columns", "axis"])?;
                let names = match (args.keyword("columns"), args.get(0, "labels")) {
                    (Some(columns), _) => column_names(columns, "columns")?,
                    (None, Some(labels)) => {
                        let axis = args.keyword("axis");
                        let by_column = matches!(axis, Some(Value::Int(1)))
                            || matches!(axis, Some(Value::Str(a)) if &**a == "columns");
                        if !by_column {
                            return Err(Fault::unsupported(
                                "dropping rows by label is not supported; use a boolean filter",
                            ));
                        }
                        column_names(labels, "labels")?
                    }
                    (None, None) => return Err(Fault::type_error("drop() needs columns=")),
                };
                Value::table(table.drop_columns(&names)?)
            }
            "corr" => {
                args.check(0, &["numeric_only"])?;
                Value::table(table.corr()?)
            }
            "to_dict" => self.table_to_dict(table, args)?,
            "apply" => {
                args.check(1, &["func", "axis"])?;
                let func = args.required(0, "func")?.clone();
                let axis = args.keyword("axis");
                let row_wise = matches!(axis, Some(Value::Int(1)))
                    || matches!(axis, Some(Value::Str(a)) if &**a == "columns");
                if !row_wise {
                    return Err(Fault::unsupported("DataFrame.apply() supports axis=1 only"));
                }
                let names = table.column_names();
                let mut cells = Vec::with_capacity(table.num_rows());
                for r in 0..table.num_rows() {
                    self.tick()?;
                    let mut row = Dict::new();
                    for (name, cell) in names.iter().zip(table.row(r)) {
                        row.insert(Value::str(name.as_str()), Value::from_scalar(&cell))?;
                    }
                    let value = self.call_value(&func, vec![Value::dict(row)], Vec::new())?;
                    cells.push(cell_of(&value)?);
                }
                Value::series(Column::new("", cells))
            }
            "tolist" | "to_list" if keyed.is_some() => {
                args.check(0, &[])?;
                let column = keyed.map(|c| c.values.as_slice()).unwrap_or_default();
                Value::list(column.iter().map(Value::from_scalar).collect())
            }
            "items" if keyed.is_some() => {
                args.check(0, &[])?;
                let labels = &table.columns()[0];
                let values = keyed.map(|c| c.values.as_slice()).unwrap_or_default();
                Value::list(
                    labels
                        .values
                        .iter()
                        .zip(values)
                        .map(|(k, v)| Value::tuple(vec![Value::from_scalar(k), Value::from_scalar(v)]))
                        .collect(),
                )
            }
            _ => return Err(no_attribute(&Value::Table(table.clone()), name)),
        };
        Ok(result)
    }

    fn table_to_dict(&mut self, table: &Table, args: &Args) -> FaultResult<Value> {
        args.check(1, &["orient"])?;
        let orient = args.string(0, "orient")?.unwrap_or_else(|| "dict".to_string());
        if let (Some(column), "dict") = (series_like(table), orient.as_str()) {
            let mut dict = Dict::new();
            for (label, value) in table.columns()[0].values.iter().zip(&column.values) {
                dict.insert(Value::from_scalar(label), Value::from_scalar(value))?;
            }
            return Ok(Value::dict(dict));
        }
        match orient.as_str() {
            "records" => {
                let names = table.column_names();
                let mut records = Vec::with_capacity(table.num_rows());
                for r in 0..table.num_rows() {
                    let mut record = Dict::new();
                    for (name, cell) in names.iter().zip(table.row(r)) {
                        record.insert(Value::str(name.as_str()), Value::from_scalar(&cell))?;
                    }
                    records.push(Value::dict(record));
                }
                Ok(Value::list(records))
            }
            "list" | "dict" => {
                let mut dict = Dict::new();
                for column in table.columns() {
                    let value = if orient == "list" {
                        Value::list(column.values.iter().map(Value::from_scalar).collect())
                    } else {
                        let mut by_row = Dict::new();
                        for (i, cell) in column.values.iter().enumerate() {
                            by_row.insert(Value::Int(i as i64), Value::from_scalar(cell))?;
                        }
                        Value::dict(by_row)
                    };
                    dict.insert(Value::str(column.name.as_str()), value)?;
                }
                Ok(Value::dict(dict))
            }
            other => Err(Fault::value_error(format!("orient '{}' not understood", other))),
        }
    }

    fn series_method(&mut self, column: &Arc<Column>, name: &str, args: &Args) -> FaultResult<Value> {
        if let Some(agg) = Agg::parse(name).filter(|a| !matches!(a, Agg::Size)) {
            args.check(0, &["skipna", "numeric_only"])?;
            return Ok(Value::from_scalar(&column.aggregate(agg)?));
        }
        let result = match name {
            "head" | "tail" => {
                let rows = head_rows(args, column.len(), name == "tail")?;
                Value::series(column.take(&rows))
            }
            "sort_values" => {
                args.check(0, &["ascending", "na_position", "kind", "ignore_index"])?;
                let ascending = ascending_flags(args)?.first().copied().unwrap_or(true);
                Value::series(sort_column(column, ascending)?)
            }
            "nlargest" | "nsmallest" => {
                args.check(1, &["n", "keep"])?;
                let n = args.int(0, "n")?.unwrap_or(5).max(0) as usize;
                let present = Column::new(
                    column.name.clone(),
                    column.values.iter().filter(|v| !v.is_null()).cloned().collect(),
                );
                let sorted = sort_column(&present, name == "nsmallest")?;
                Value::series(sorted.take(&(0..n.min(sorted.len())).collect::<Vec<_>>()))
            }
            "round" => {
                args.check(1, &["decimals"])?;
                Value::series(round_column(column, args.int(0, "decimals")?.unwrap_or(0)))
            }
            "abs" => {
                args.check(0, &[])?;
                Value::series(abs_column(column)?)
            }
            "unique" => {
                args.check(0, &[])?;
                Value::list(column.unique().iter().map(Value::from_scalar).collect())
            }
            "drop_duplicates" => {
                args.check(0, &["keep"])?;
                Value::series(Column::new(column.name.clone(), column.unique()))
            }
            "value_counts" => {
                args.check(0, &["normalize", "ascending", "sort", "dropna"])?;
                let mut counts = column.value_counts();
                if args.flag(KEYWORD_ONLY, "normalize", false)? {
                    let total = column.values.iter().filter(|v| !v.is_null()).count().max(1) as f64;
                    counts = counts.map_values(|c| {
                        Ok(Column::new(
                            "proportion",
                            c.values
                                .iter()
                                .map(|v| Scalar::Float(v.as_f64().unwrap_or(0.0) / total))
                                .collect(),
                        ))
                    })?;
                }
                if args.flag(KEYWORD_ONLY, "ascending", false)? {
                    let value_name = counts.columns()[1].name.clone();
                    counts = counts.sort_by(&[value_name], &[true])?;
                }
                Value::table(counts)
            }
            "tolist" | "to_list" => {
                args.check(0, &[])?;
                Value::list(column.values.iter().map(Value::from_scalar).collect())
            }
            "astype" => {
                args.check(1, &["dtype"])?;
                Value::series(astype(column, args.required(0, "dtype")?)?)
            }
            "apply" => {
                args.check(1, &["func"])?;
                let func = args.required(0, "func")?.clone();
                let mut cells = Vec::with_capacity(column.len());
                for cell in &column.values {
                    self.tick()?;
                    let value = self.call_value(&func, vec![Value::from_scalar(cell)], Vec::new())?;
                    cells.push(cell_of(&value)?);
                }
                Value::series(Column::new(column.name.clone(), cells))
            }
            "isin" => {
                args.check(1, &["values"])?;
                let wanted = self.materialize(args.required(0, "values")?)?;
                let wanted: Vec<Scalar> = wanted.iter().filter_map(Value::to_scalar).collect();
                Value::series(Column::new(
                    column.name.clone(),
                    column
                        .values
                        .iter()
                        .map(|cell| {
                            Scalar::Bool(
                                !cell.is_null()
                                    && wanted
                                        .iter()
                                        .any(|w| cell.compare(w) == std::cmp::Ordering::Equal),
                            )
                        })
                        .collect(),
                ))
            }
            "cumsum" => {
                args.check(0, &[])?;
                let mut running = Value::Int(0);
                let mut cells = Vec::with_capacity(column.len());
                for cell in &column.values {
                    if cell.is_null() {
                        cells.push(Scalar::Null);
                        continue;
                    }
                    running = ops::binary(BinOp::Add, &running, &Value::from_scalar(cell), self.cap())?;
                    cells.push(cell_of(&running)?);
                }
                Value::series(Column::new(column.name.clone(), cells))
            }
            "quantile" => {
                args.check(1, &["q"])?;
                let q = match args.get(0, "q") {
                    None => 0.5,
                    Some(q) => q
                        .as_f64()
                        .ok_or_else(|| Fault::type_error("quantile() q must be a number"))?,
                };
                Value::from_scalar(&column.quantile(q)?)
            }
            "agg" => {
                args.check(1, &["func"])?;
                match args.required(0, "func")? {
                    Value::List(funcs) | Value::Tuple(funcs) => {
                        let mut labels = Vec::with_capacity(funcs.len());
                        let mut values = Vec::with_capacity(funcs.len());
                        for func in funcs.iter() {
                            let agg = agg_of(func)?;
                            labels.push(Scalar::Str(agg_name(agg)));
                            values.push(column.aggregate(agg)?);
                        }
                        Value::table(Table::keyed(
                            vec![
                                Column::new("agg", labels),
                                Column::new(column.name.clone(), values),
                            ],
                            1,
                        )?)
                    }
                    func => Value::from_scalar(&column.aggregate(agg_of(func)?)?),
                }
            }
            "dropna" => {
                args.check(0, &[])?;
                Value::series(Column::new(
                    column.name.clone(),
                    column.values.iter().filter(|v| !v.is_null()).cloned().collect(),
                ))
            }
            "fillna" => {
                args.check(1, &["value"])?;
                let fill = cell_of(args.required(0, "value")?)?;
                Value::series(fill_nulls(column, &fill))
            }
            "isnull" | "notnull" => {
                args.check(0, &[])?;
                Value::series(null_mask(column, name == "isnull"))
            }
            "describe" => {
                args.check(0, &[])?;
                Value::table(column.describe())
            }
            "copy" => {
                args.check(0, &["deep"])?;
                Value::Series(column.clone())
            }
            "to_dict" => {
                args.check(0, &[])?;
                let mut dict = Dict::new();
                for (i, cell) in column.values.iter().enumerate() {
                    dict.insert(Value::Int(i as i64), Value::from_scalar(cell))?;
                }
                Value::dict(dict)
            }
            "items" => {
                args.check(0, &[])?;
                Value::list(
                    column
                        .values
                        .iter()
                        .enumerate()
                        .map(|(i, cell)| Value::tuple(vec![Value::Int(i as i64), Value::from_scalar(cell)]))
                        .collect(),
                )
            }
            "reset_index" => {
                args.check(0, &["drop", "name"])?;
                if args.flag(KEYWORD_ONLY, "drop", false)? {
                    Value::Series(column.clone())
                } else {
                    let name = match args.string(KEYWORD_ONLY, "name")? {
                        Some(name) => name,
                        None if column.name.is_empty() => "0".to_string(),
                        None => column.name.clone(),
                    };
                    let index = (0..column.len()).map(|i| Scalar::Int(i as i64)).collect();
                    Value::table(Table::new(vec![
                        Column::new("index", index),
                        column.as_ref().clone().renamed(name),
                    ])?)
                }
            }
            "rename" => {
                args.check(1, &["index"])?;
                let name = args.required(0, "index")?.display();
                Value::series(column.as_ref().clone().renamed(name))
            }
            _ => return Err(no_attribute(&Value::Series(column.clone()), name)),
        };
        Ok(result)
    }
}

fn table_reduce(table: &Table, agg: Agg) -> FaultResult<Value> {
    if let Some(column) = series_like(table) {
        return Ok(Value::from_scalar(&column.aggregate(agg)?));
    }
    let mut totals = Dict::new();
    for column in table.value_columns() {
        if agg.is_numeric() && !column.dtype().is_numeric() {
            continue;
        }
        match column.aggregate(agg) {
            Ok(value) => totals.insert(Value::str(column.name.as_str()), Value::from_scalar(&value))?,
            Err(_) if matches!(agg, Agg::Min | Agg::Max) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(Value::dict(totals))
}

fn astype(column: &Column, dtype: &Value) -> FaultResult<Column> {
    let target = match dtype {
        Value::Builtin(Builtin::Int) => "int",
        Value::Builtin(Builtin::Float) => "float",
        Value::Builtin(Builtin::Str) => "str",
        Value::Builtin(Builtin::Bool) => "bool",
        Value::Str(name) => match &**name {
            "int" | "int64" | "int32" | "Int64" => "int",
            "float" | "float64" | "float32" => "float",
            "str" | "string" => "str",
            "bool" | "boolean" => "bool",
            "object" | "category" => return Ok(column.clone()),
            other => {
                return Err(Fault::type_error(format!("data type '{}' not understood", other)))
            }
        },
        other => {
            return Err(Fault::type_error(format!(
                "data type {} not understood",
                other.repr()
            )))
        }
    };
    series_map(column, |cell| {
        let value = Value::from_scalar(cell);
        let converted = match (target, cell) {
            ("str", Scalar::Null) => Value::str("nan"),
            ("int", Scalar::Null) => {
                return Err(Fault::value_error(
                    "Cannot convert non-finite values (NA or inf) to integer",
                ))
            }
            (_, Scalar::Null) => return Ok(Scalar::Null),
            ("int", _) => to_int(&value)?,
            ("float", _) => to_float(&value)?,
            ("bool", _) => Value::Bool(value.truthy()?),
            _ => Value::str(cell.render()),
        };
        cell_of(&converted)
    })
}

fn dict_method(dict: &Dict, name: &str, args: &Args) -> FaultResult<Value> {
    match name {
        "keys" | "values" => {
            args.check(0, &[])?;
            let items: Vec<Value> = if name == "keys" {
                dict.keys().cloned().collect()
            } else {
                dict.values().cloned().collect()
            };
            Ok(Value::list(items))
        }
        "items" => {
            args.check(0, &[])?;
            Ok(Value::list(
                dict.iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        "get" => {
            args.check(2, &[])?;
            let key = args.required(0, "key")?;
            Ok(dict
                .get(key)?
                .cloned()
                .or_else(|| args.get(1, "default").cloned())
                .unwrap_or(Value::None))
        }
        _ => Err(no_attribute(&Value::dict(dict.clone()), name)),
    }
}

/// `series.str.<name>(...)`; non-text cells become null
fn text_method(column: &Column, name: &str, args: &Args, cap: usize) -> FaultResult<Value> {
    let pattern = |index: usize, key: &str| -> FaultResult<String> {
        args.string(index, key)?
            .ok_or_else(|| Fault::type_error(format!("{}() missing required argument: '{}'", name, key)))
    };
    let mapped = match name {
        "contains" => {
            args.check(1, &["pat", "case", "na", "regex"])?;
            let pat = pattern(0, "pat")?;
            let case = args.flag(KEYWORD_ONLY, "case", true)?;
            let na = args.flag(KEYWORD_ONLY, "na", false)?;
            let needle = if case { pat.clone() } else { pat.to_lowercase() };
            series_map(column, |cell| {
                Ok(Scalar::Bool(match cell {
                    Scalar::Str(s) if case => s.contains(&needle),
                    Scalar::Str(s) => s.to_lowercase().contains(&needle),
                    _ => na,
                }))
            })?
        }
        "startswith" | "endswith" => {
            args.check(1, &["pat", "na"])?;
            let pat = pattern(0, "pat")?;
            series_map(column, |cell| {
                Ok(match cell {
                    Scalar::Str(s) if name == "startswith" => Scalar::Bool(s.starts_with(&pat)),
                    Scalar::Str(s) => Scalar::Bool(s.ends_with(&pat)),
                    _ => Scalar::Null,
                })
            })?
        }
        "len" => {
            args.check(0, &[])?;
            series_map(column, |cell| {
                Ok(match cell {
                    Scalar::Str(s) => Scalar::Int(s.chars().count() as i64),
                    _ => Scalar::Null,
                })
            })?
        }
        "find" => {
            args.check(1, &["sub"])?;
            let sub = pattern(0, "sub")?;
            series_map(column, |cell| {
                Ok(match cell {
                    Scalar::Str(s) => Scalar::Int(find(s, &sub)),
                    _ => Scalar::Null,
                })
            })?
        }
        "replace" => {
            args.check(2, &["pat", "repl", "regex", "case"])?;
            let (pat, repl) = (pattern(0, "pat")?, pattern(1, "repl")?);
            let mut growth = TextGrowth::new(cap);
            series_map(column, |cell| {
                Ok(match cell {
                    Scalar::Str(s) => {
                        let after = replaced_len(s, &pat, &repl, usize::MAX);
                        if after > cap {
                            return Err(Fault::resource_limit(format!(
                                "string longer than {} characters",
                                cap
                            )));
                        }
                        growth.charge(s.chars().count(), after)?;
                        Scalar::Str(s.replace(&pat, &repl))
                    }
                    _ => Scalar::Null,
                })
            })?
        }
        "lower" | "upper" | "title" | "capitalize" | "strip" | "lstrip" | "rstrip" => {
            args.check(1, &["to_strip"])?;
            let chars = args.string(0, "to_strip")?;
            series_map(column, |cell| {
                Ok(match cell {
                    Scalar::Str(s) => Scalar::Str(match name {
                        "lower" => s.to_lowercase(),
                        "upper" => s.to_uppercase(),
                        "title" => title_case(s),
                        "capitalize" => capitalize(s),
                        _ => strip(s, chars.as_deref(), name != "rstrip", name != "lstrip"),
                    }),
                    _ => Scalar::Null,
                })
            })?
        }
        _ => return Err(no_attribute(&Value::StrAccessor(Arc::new(column.clone())), name)),
    };
    Ok(Value::series(mapped))
}

// ============================================================================
// GROUPBY
// ============================================================================

/// Value columns an aggregation applies to when nothing was selected
fn group_targets(grouped: &GroupBy, agg: Agg) -> Vec<String> {
    match &grouped.selection {
        Some(selection) => selection.clone(),
        None => grouped
            .table
            .columns()
            .iter()
            .filter(|c| !grouped.keys.contains(&c.name))
            .filter(|c| !agg.is_numeric() || c.dtype().is_numeric())
            .map(|c| c.name.clone())
            .collect(),
    }
}

/// Groups, reduces each `(column, agg)` and labels the results
fn group_reduce(grouped: &GroupBy, specs: Vec<(String, Agg, String)>) -> FaultResult<Value> {
    let targets: Vec<(String, Agg)> = specs.iter().map(|(c, a, _)| (c.clone(), *a)).collect();
    let reduced = grouped.table.aggregate(&grouped.keys, &targets)?;
    let keys = grouped.keys.len();
    let mut columns = reduced.columns().to_vec();
    for (column, (_, _, label)) in columns[keys..].iter_mut().zip(&specs) {
        column.name = label.clone();
    }
    let table = Table::keyed(columns, keys)?;
    Ok(Value::table(if grouped.as_index {
        table
    } else {
        table.reset_index()
    }))
}

fn group_method(grouped: &GroupBy, name: &str, args: &Args) -> FaultResult<Value> {
    if name == "size" {
        args.check(0, &[])?;
        let key = grouped.keys.first().cloned().unwrap_or_default();
        return group_reduce(grouped, vec![(key, Agg::Size, "size".to_string())]);
    }
    if let Some(agg) = Agg::parse(name) {
        args.check(0, &["numeric_only"])?;
        let specs = group_targets(grouped, agg)
            .into_iter()
            .map(|column| (column.clone(), agg, column))
            .collect();
        return group_reduce(grouped, specs);
    }
    if name != "agg" {
        return Err(no_attribute(&Value::GroupBy(Arc::new(grouped.clone())), name));
    }

    let mut specs: Vec<(String, Agg, String)> = Vec::new();
    match args.get(0, "func") {
        Some(Value::Dict(per_column)) => {
            for (column, funcs) in per_column.iter() {
                let column = column.display();
                match funcs {
                    Value::List(list) | Value::Tuple(list) => {
                        for func in list.iter() {
                            let agg = agg_of(func)?;
                            specs.push((column.clone(), agg, format!("{}_{}", column, agg_name(agg))));
                        }
                    }
                    func => specs.push((column.clone(), agg_of(func)?, column.clone())),
                }
            }
        }
        Some(Value::List(funcs)) | Some(Value::Tuple(funcs)) => {
            let aggs = funcs.iter().map(agg_of).collect::<FaultResult<Vec<_>>>()?;
            let columns = group_targets(grouped, Agg::Count);
            for column in &columns {
                for agg in &aggs {
                    let label = if grouped.single {
                        agg_name(*agg)
                    } else {
                        format!("{}_{}", column, agg_name(*agg))
                    };
                    specs.push((column.clone(), *agg, label));
                }
            }
        }
        Some(func) => {
            let agg = agg_of(func)?;
            for column in group_targets(grouped, agg) {
                specs.push((column.clone(), agg, column));
            }
        }
        None => {
            for (label, spec) in args.keywords() {
                match spec {
                    Value::Tuple(pair) if pair.len() == 2 => {
                        let column = pair[0].as_str().ok_or_else(|| {
                            Fault::type_error("named aggregation needs (column, aggfunc)")
                        })?;
                        specs.push((column.to_string(), agg_of(&pair[1])?, label.clone()));
                    }
                    _ => {
                        return Err(Fault::type_error(
                            "named aggregation needs (column, aggfunc)",
                        ))
                    }
                }
            }
        }
    }
    if specs.is_empty() {
        return Err(Fault::type_error("agg() needs at least one aggregation"));
    }
    group_reduce(grouped, specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales() -> Arc<Table> {
        Arc::new(
            Table::from_json(&json!([
                {"region": "North", "sales": 10, "units": 1},
                {"region": "South", "sales": 20, "units": 2},
                {"region": "North", "sales": 5, "units": 4},
            ]))
            .unwrap(),
        )
    }

    fn grouped(single: bool, selection: Option<Vec<&str>>) -> GroupBy {
        GroupBy {
            table: sales(),
            keys: vec!["region".to_string()],
            selection: selection.map(|s| s.into_iter().map(String::from).collect()),
            single,
            as_index: true,
        }
    }

    fn no_args() -> Args {
        Args::new("m", Vec::new(), Vec::new())
    }

    #[test]
    fn test_method_sets_per_receiver() {
        assert!(has_method(&Value::str("x"), "lower"));
        assert!(!has_method(&Value::str("x"), "head"));
        assert!(has_method(&Value::Table(sales()), "groupby"));
        assert!(!has_method(&Value::Table(sales()), "tolist"));
        let counts = sales().column("region").unwrap().value_counts();
        assert!(has_method(&Value::table(counts), "tolist"));
    }

    #[test]
    fn test_properties() {
        let table = Value::Table(sales());
        let shape = property(&table, "shape").unwrap();
        assert_eq!(shape.repr(), "(3, 3)");
        let columns = property(&table, "columns").unwrap();
        assert_eq!(columns.repr(), "['region', 'sales', 'units']");
        let series = Value::series(sales().column("sales").unwrap().clone());
        assert_eq!(property(&series, "dtype").unwrap().display(), "int64");
        assert!(matches!(property(&series, "str"), Some(Value::StrAccessor(_))));
        assert!(property(&series, "columns").is_none());
    }

    #[test]
    fn test_group_sum_is_keyed() {
        let result = group_method(&grouped(true, Some(vec!["sales"])), "sum", &no_args()).unwrap();
        let Value::Table(table) = result else {
            panic!("expected table");
        };
        assert_eq!(table.key_columns(), 1);
        assert_eq!(table.column_names(), vec!["region", "sales"]);
        assert_eq!(table.column("sales").unwrap().values, vec![Scalar::Int(15), Scalar::Int(20)]);
        assert!(series_like(&table).is_some());
    }

    #[test]
    fn test_group_agg_forms() {
        let args = Args::new(
            "agg",
            vec![Value::list(vec![Value::str("sum"), Value::str("mean")])],
            Vec::new(),
        );
        let Value::Table(table) = group_method(&grouped(true, Some(vec!["sales"])), "agg", &args).unwrap() else {
            panic!("expected table");
        };
        assert_eq!(table.column_names(), vec!["region", "sum", "mean"]);

        let named = Args::new(
            "agg",
            Vec::new(),
            vec![(
                "total".to_string(),
                Value::tuple(vec![Value::str("units"), Value::str("sum")]),
            )],
        );
        let Value::Table(table) = group_method(&grouped(false, None), "agg", &named).unwrap() else {
            panic!("expected table");
        };
        assert_eq!(table.column_names(), vec!["region", "total"]);

        let size = group_method(&grouped(false, None), "size", &no_args()).unwrap();
        let Value::Table(table) = size else {
            panic!("expected table");
        };
        assert_eq!(table.column("size").unwrap().values, vec![Scalar::Int(2), Scalar::Int(1)]);
    }

    #[test]
    fn test_numeric_group_reduction_skips_text_columns() {
        let mut table = (*sales()).clone();
        table = table
            .with_column(Column::new(
                "rep",
                vec![Scalar::Str("a".into()), Scalar::Str("b".into()), Scalar::Str("c".into())],
            ))
            .unwrap();
        let grouped = GroupBy {
            table: Arc::new(table),
            keys: vec!["region".to_string()],
            selection: None,
            single: false,
            as_index: false,
        };
        let Value::Table(result) = group_method(&grouped, "mean", &no_args()).unwrap() else {
            panic!("expected table");
        };
        assert_eq!(result.column_names(), vec!["region", "sales", "units"]);
        assert_eq!(result.key_columns(), 0);
    }

    #[test]
    fn test_table_reduction_returns_per_column_values() {
        let totals = table_reduce(&sales(), Agg::Sum).unwrap();
        assert_eq!(totals.repr(), "{'sales': 35, 'units': 7}");
        let counts = sales().column("region").unwrap().value_counts();
        assert_eq!(table_reduce(&counts, Agg::Max).unwrap().as_int(), Some(2));
    }

    #[test]
    fn test_str_accessor() {
        let column = sales().column("region").unwrap().clone();
        let args = Args::new("contains", vec![Value::str("nor")], vec![("case".into(), Value::Bool(false))]);
        let Value::Series(mask) = text_method(&column, "contains", &args, 1_000).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(
            mask.values,
            vec![Scalar::Bool(true), Scalar::Bool(false), Scalar::Bool(true)]
        );
    }

    #[test]
    fn test_in_place_mutation() {
        let mut list = Value::list(vec![Value::Int(1)]);
        let shared = list.clone();
        mutate_in_place(
            &mut list,
            "append",
            Args::new("append", vec![Value::Int(2)], Vec::new()),
            10,
        )
        .unwrap();
        assert_eq!(list.repr(), "[1, 2]");
        assert_eq!(shared.repr(), "[1]");
        let err = mutate_in_place(
            &mut list,
            "extend",
            Args::new("extend", vec![Value::list(vec![Value::Int(0); 9])], Vec::new()),
            10,
        )
        .unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceLimit);
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(title_case("hello wORLD-x"), "Hello World-X");
        assert_eq!(capitalize("hELLO"), "Hello");
        assert_eq!(split("a  b c", None, 1).unwrap(), vec!["a", "b c"]);
        assert_eq!(split("a,b,,c", Some(","), -1).unwrap(), vec!["a", "b", "", "c"]);
        assert_eq!(find("héllo", "llo"), 2);
        assert_eq!(strip("xxhixx", Some("x"), true, false), "hixx");
    }

    #[test]
    fn test_replaced_length_is_known_up_front() {
        assert_eq!(replaced_len("banana", "an", "AN", usize::MAX), 6);
        assert_eq!(replaced_len("banana", "a", "", usize::MAX), 3);
        assert_eq!(replaced_len("banana", "a", "xyz", 1), 8);
        assert_eq!(replaced_len("abc", "", "-", usize::MAX), 7);
        assert_eq!(
            replaced_len(&"a".repeat(1_000), "a", &"b".repeat(1_000), usize::MAX),
            1_000_000
        );
    }

    #[test]
    fn test_str_accessor_replace_is_bounded() {
        let column = sales().column("region").unwrap().clone();
        let replace = |repl: String| {
            let args = Args::new("replace", vec![Value::str("o"), Value::str(repl)], Vec::new());
            text_method(&column, "replace", &args, 1_000)
        };
        let Value::Series(replaced) = replace("0".to_string()).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(replaced.values[1], Scalar::Str("S0uth".into()));

        let err = replace("x".repeat(1_000)).unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceLimit);
        let err = replace("x".repeat(400)).unwrap_err();
        assert_eq!(err.kind, FaultKind::ResourceLimit);
        assert!(replace("x".repeat(300)).is_ok());
    }
}
