//! Host registry: builtin functions and the `px`, `np`, `pd` helper
//! namespaces a policy can expose.

use crate::chart::{ChartEncoding, ChartKind, ChartSpec};
use crate::fault::{Fault, FaultKind, FaultResult};
use crate::interpreter::Interpreter;
use crate::ops::{self, series_map};
use crate::syntax::ast::BinOp;
use crate::table::{Agg, Column, Scalar, Table};
use crate::value::{compare_values, range_len, values_equal, Builtin, Dict, DictKey, Module, Value};
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Index that never matches a positional argument
pub(crate) const KEYWORD_ONLY: usize = usize::MAX;

/// Keywords the chart helpers accept but do not encode
const CHART_COSMETIC_KEYWORDS: &[&str] = &[
    "orientation",
    "markers",
    "nbins",
    "barmode",
    "template",
    "height",
    "width",
    "hole",
    "text",
    "text_auto",
    "color_discrete_sequence",
    "hover_data",
    "hover_name",
    "log_x",
    "log_y",
];

const CHART_KEYWORDS: &[&str] = &[
    "data_frame", "x", "y", "color", "title", "names", "values", "labels",
];

/// Value bound for `name` when a policy allow-lists it, if the host knows it
pub(crate) fn lookup_global(name: &str) -> Option<Value> {
    let builtin = match name {
        "len" => Builtin::Len,
        "range" => Builtin::Range,
        "min" => Builtin::Min,
        "max" => Builtin::Max,
        "sum" => Builtin::Sum,
        "abs" => Builtin::Abs,
        "round" => Builtin::Round,
        "sorted" => Builtin::Sorted,
        "str" => Builtin::Str,
        "int" => Builtin::Int,
        "float" => Builtin::Float,
        "bool" => Builtin::Bool,
        "list" => Builtin::List,
        "dict" => Builtin::Dict,
        "tuple" => Builtin::Tuple,
        "set" => Builtin::Set,
        "enumerate" => Builtin::Enumerate,
        "zip" => Builtin::Zip,
        "print" => Builtin::Print,
        "any" => Builtin::Any,
        "all" => Builtin::All,
        "reversed" => Builtin::Reversed,
        "px" => return Some(Value::Module(Module::Px)),
        "np" => return Some(Value::Module(Module::Np)),
        "pd" => return Some(Value::Module(Module::Pd)),
        _ => return None,
    };
    Some(Value::Builtin(builtin))
}

/// `px.bar`, `np.mean`, `np.nan`, ...
pub(crate) fn module_attr(module: Module, attr: &str) -> FaultResult<Value> {
    let builtin = match (module, attr) {
        (Module::Px, name) => ChartKind::parse(name).map(Builtin::Chart),
        (Module::Np, "nan") => return Ok(Value::Float(f64::NAN)),
        (Module::Np, "pi") => return Ok(Value::Float(std::f64::consts::PI)),
        (Module::Np, "mean") => Some(Builtin::NpMean),
        (Module::Np, "median") => Some(Builtin::NpMedian),
        (Module::Np, "std") => Some(Builtin::NpStd),
        (Module::Np, "sum") => Some(Builtin::NpSum),
        (Module::Np, "min") => Some(Builtin::NpMin),
        (Module::Np, "max") => Some(Builtin::NpMax),
        (Module::Np, "sqrt") => Some(Builtin::NpSqrt),
        (Module::Np, "log") => Some(Builtin::NpLog),
        (Module::Np, "abs") => Some(Builtin::NpAbs),
        (Module::Np, "round") => Some(Builtin::NpRound),
        (Module::Np, "percentile") => Some(Builtin::NpPercentile),
        (Module::Pd, "DataFrame") => Some(Builtin::PdDataFrame),
        (Module::Pd, "Series") => Some(Builtin::PdSeries),
        _ => None,
    };
    builtin.map(Value::Builtin).ok_or_else(|| {
        Fault::new(
            FaultKind::AttributeError,
            format!("module '{}' has no attribute '{}'", module.name(), attr),
        )
    })
}

/// Round half to even, like Python's `round` and numpy's `round`
pub(crate) fn round_float(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let factor = 10f64.powi(ndigits.clamp(-308, 308) as i32);
    let scaled = x * factor;
    if !scaled.is_finite() {
        return x;
    }
    scaled.round_ties_even() / factor
}

/// Integer `round(i, ndigits)`: negative `ndigits` round to tens, hundreds, ...
/// with ties to even
pub(crate) fn round_int(i: i64, ndigits: i64) -> FaultResult<i64> {
    if ndigits >= 0 {
        return Ok(i);
    }
    if ndigits < -38 {
        return Ok(0);
    }
    let unit = 10i128.pow(ndigits.unsigned_abs() as u32);
    let (quotient, rest) = (i128::from(i).div_euclid(unit), i128::from(i).rem_euclid(unit));
    let up = 2 * rest > unit || (2 * rest == unit && quotient % 2 != 0);
    let rounded = (quotient + i128::from(up)) * unit;
    i64::try_from(rounded).map_err(|_| Fault::overflow())
}

// ============================================================================
// ARGUMENTS
// ============================================================================

/// Positional and keyword arguments of one call
pub(crate) struct Args {
    name: String,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    pub(crate) fn new(
        name: impl Into<String>,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> Self {
        Self {
            name: name.into(),
            positional,
            keywords,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Rejects extra positional arguments and unknown keywords
    pub(crate) fn check(&self, max_positional: usize, allowed: &[&str]) -> FaultResult<()> {
        if self.positional.len() > max_positional {
            return Err(Fault::type_error(format!(
                "{}() takes at most {} positional arguments ({} given)",
                self.name,
                max_positional,
                self.positional.len()
            )));
        }
        for (key, _) in &self.keywords {
            if !allowed.contains(&key.as_str()) {
                return Err(Fault::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    self.name, key
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub(crate) fn keywords(&self) -> &[(String, Value)] {
        &self.keywords
    }

    pub(crate) fn keyword(&self, key: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Positional argument `index`, or keyword `key`
    pub(crate) fn get(&self, index: usize, key: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.keyword(key))
    }

    pub(crate) fn required(&self, index: usize, key: &str) -> FaultResult<&Value> {
        self.get(index, key).ok_or_else(|| {
            Fault::type_error(format!(
                "{}() missing required argument: '{}'",
                self.name, key
            ))
        })
    }

    pub(crate) fn string(&self, index: usize, key: &str) -> FaultResult<Option<String>> {
        match self.get(index, key) {
            None | Some(Value::None) => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.to_string())),
            Some(other) => Err(Fault::type_error(format!(
                "{}() argument '{}' must be str, not {}",
                self.name,
                key,
                other.type_name()
            ))),
        }
    }

    pub(crate) fn int(&self, index: usize, key: &str) -> FaultResult<Option<i64>> {
        match self.get(index, key) {
            None | Some(Value::None) => Ok(None),
            Some(value) => value.as_int().map(Some).ok_or_else(|| {
                Fault::type_error(format!(
                    "{}() argument '{}' must be int, not {}",
                    self.name,
                    key,
                    value.type_name()
                ))
            }),
        }
    }

    pub(crate) fn flag(&self, index: usize, key: &str, default: bool) -> FaultResult<bool> {
        match self.get(index, key) {
            None => Ok(default),
            Some(value) => value.truthy(),
        }
    }
}

// ============================================================================
// BUILTIN DISPATCH
// ============================================================================

impl Interpreter {
    pub(crate) fn call_builtin(
        &mut self,
        builtin: Builtin,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> FaultResult<Value> {
        let args = Args::new(builtin.name(), positional, keywords);
        match builtin {
            Builtin::Len => {
                args.check(1, &[])?;
                length_of(args.required(0, "obj")?).map(|n| Value::Int(n as i64))
            }
            Builtin::Range => self.range(&args),
            Builtin::Min => self.extremum(&args, Ordering::Less),
            Builtin::Max => self.extremum(&args, Ordering::Greater),
            Builtin::Sum => {
                args.check(2, &["start"])?;
                let iterable = args.required(0, "iterable")?;
                if let Value::Series(column) = iterable {
                    return Ok(Value::from_scalar(&column.aggregate(Agg::Sum)?));
                }
                let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
                for item in self.materialize(iterable)? {
                    total = ops::binary(BinOp::Add, &total, &item, self.cap())?;
                }
                Ok(total)
            }
            Builtin::Abs | Builtin::NpAbs => {
                args.check(1, &[])?;
                elementwise(args.required(0, "x")?, abs_value)
            }
            Builtin::Round => {
                args.check(2, &["ndigits"])?;
                let ndigits = args.int(1, "ndigits")?;
                elementwise(args.required(0, "number")?, |v| round_value(v, ndigits))
            }
            Builtin::NpRound => {
                args.check(2, &["decimals"])?;
                let decimals = args.int(1, "decimals")?.unwrap_or(0);
                elementwise(args.required(0, "a")?, |v| round_value(v, Some(decimals)))
            }
            Builtin::Sorted => {
                args.check(1, &["key", "reverse"])?;
                let items = self.materialize(args.required(0, "iterable")?)?;
                let key = args.keyword("key").filter(|k| !k.is_none()).cloned();
                let reverse = args.flag(KEYWORD_ONLY, "reverse", false)?;
                self.sort_values(items, key.as_ref(), reverse).map(Value::list)
            }
            Builtin::Str => {
                args.check(1, &[])?;
                Ok(Value::str(args.get(0, "object").map(Value::display).unwrap_or_default()))
            }
            Builtin::Int => {
                args.check(1, &[])?;
                args.get(0, "x").map(to_int).unwrap_or(Ok(Value::Int(0)))
            }
            Builtin::Float => {
                args.check(1, &[])?;
                args.get(0, "x").map(to_float).unwrap_or(Ok(Value::Float(0.0)))
            }
            Builtin::Bool => {
                args.check(1, &[])?;
                match args.get(0, "x") {
                    Some(value) => Ok(Value::Bool(value.truthy()?)),
                    None => Ok(Value::Bool(false)),
                }
            }
            Builtin::List | Builtin::Tuple | Builtin::Set | Builtin::Reversed => {
                args.check(1, &[])?;
                let mut items = match args.get(0, "iterable") {
                    Some(iterable) => self.materialize(iterable)?,
                    None => Vec::new(),
                };
                match builtin {
                    Builtin::Tuple => return Ok(Value::tuple(items)),
                    Builtin::Set => items = distinct(items)?,
                    Builtin::Reversed => items.reverse(),
                    _ => {}
                }
                Ok(Value::list(items))
            }
            Builtin::Dict => self.build_dict(&args),
            Builtin::Enumerate => {
                args.check(2, &["start"])?;
                let start = args.int(1, "start")?.unwrap_or(0);
                let items = self.materialize(args.required(0, "iterable")?)?;
                let mut pairs = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let index = start.checked_add(i as i64).ok_or_else(Fault::overflow)?;
                    pairs.push(Value::tuple(vec![Value::Int(index), item]));
                }
                Ok(Value::list(pairs))
            }
            Builtin::Zip => {
                args.check(usize::MAX, &[])?;
                let columns = args
                    .positional()
                    .iter()
                    .map(|iterable| self.materialize(iterable))
                    .collect::<FaultResult<Vec<_>>>()?;
                let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
                Ok(Value::list(
                    (0..rows)
                        .map(|r| Value::tuple(columns.iter().map(|c| c[r].clone()).collect()))
                        .collect(),
                ))
            }
            Builtin::Print => {
                args.check(usize::MAX, &["sep", "end"])?;
                let sep = args.string(KEYWORD_ONLY, "sep")?.unwrap_or_else(|| " ".to_string());
                let end = args.string(KEYWORD_ONLY, "end")?.unwrap_or_else(|| "\n".to_string());
                let line = args
                    .positional()
                    .iter()
                    .map(Value::display)
                    .collect::<Vec<_>>()
                    .join(&sep);
                self.write_output(&format!("{}{}", line, end));
                Ok(Value::None)
            }
            Builtin::Any | Builtin::All => {
                args.check(1, &[])?;
                let want_all = builtin == Builtin::All;
                for item in self.materialize(args.required(0, "iterable")?)? {
                    if item.truthy()? != want_all {
                        return Ok(Value::Bool(!want_all));
                    }
                }
                Ok(Value::Bool(want_all))
            }
            Builtin::Chart(kind) => self.build_chart(kind, &args),
            Builtin::NpMean | Builtin::NpMedian | Builtin::NpStd => {
                args.check(1, &["axis"])?;
                let values = self.numbers(&args, args.required(0, "a")?)?;
                if values.is_empty() {
                    return Ok(Value::Float(f64::NAN));
                }
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                Ok(Value::Float(match builtin {
                    Builtin::NpMean => mean,
                    Builtin::NpStd => {
                        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
                    }
                    _ => quantile(values, 0.5)?,
                }))
            }
            Builtin::NpPercentile => {
                args.check(2, &[])?;
                let q = args
                    .required(1, "q")?
                    .as_f64()
                    .ok_or_else(|| Fault::type_error("np.percentile() q must be a number"))?;
                if !(0.0..=100.0).contains(&q) {
                    return Err(Fault::value_error("Percentiles must be in the range [0, 100]"));
                }
                let values = self.numbers(&args, args.required(0, "a")?)?;
                quantile(values, q / 100.0).map(Value::Float)
            }
            Builtin::NpSum | Builtin::NpMin | Builtin::NpMax => {
                args.check(1, &["axis"])?;
                let fallback = match builtin {
                    Builtin::NpSum => Builtin::Sum,
                    Builtin::NpMin => Builtin::Min,
                    _ => Builtin::Max,
                };
                self.call_builtin(fallback, args.positional().to_vec(), Vec::new())
            }
            Builtin::NpSqrt | Builtin::NpLog => {
                args.check(1, &[])?;
                let f: fn(f64) -> f64 = if builtin == Builtin::NpSqrt { f64::sqrt } else { f64::ln };
                let x = args.required(0, "x")?;
                if let Value::List(items) | Value::Tuple(items) = x {
                    let mapped = items
                        .iter()
                        .map(|item| float_map(item, f))
                        .collect::<FaultResult<Vec<_>>>()?;
                    return Ok(Value::list(mapped));
                }
                elementwise(x, |v| float_map(v, f))
            }
            Builtin::PdDataFrame => self.build_table(&args),
            Builtin::PdSeries => self.build_series(&args),
        }
    }

    fn range(&mut self, args: &Args) -> FaultResult<Value> {
        args.check(3, &[])?;
        let ints = args
            .positional()
            .iter()
            .map(|v| {
                v.as_int().ok_or_else(|| {
                    Fault::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        v.type_name()
                    ))
                })
            })
            .collect::<FaultResult<Vec<i64>>>()?;
        let (start, stop, step) = match ints.as_slice() {
            [stop] => (0, *stop, 1),
            [start, stop] => (*start, *stop, 1),
            [start, stop, step] => (*start, *stop, *step),
            _ => return Err(Fault::type_error("range expected at least 1 argument, got 0")),
        };
        if step == 0 {
            return Err(Fault::value_error("range() arg 3 must not be zero"));
        }
        let range = Value::Range { start, stop, step };
        self.check_len(range_len(&range))?;
        Ok(range)
    }

    fn extremum(&mut self, args: &Args, want: Ordering) -> FaultResult<Value> {
        args.check(usize::MAX, &["key", "default"])?;
        let key = args.keyword("key").filter(|k| !k.is_none()).cloned();
        let items = match args.positional() {
            [] => return Err(Fault::type_error(format!("{} expected at least 1 argument, got 0", args.name()))),
            [Value::Series(column)] if key.is_none() => {
                let agg = if want == Ordering::Less { Agg::Min } else { Agg::Max };
                return Ok(Value::from_scalar(&column.aggregate(agg)?));
            }
            [iterable] => self.materialize(iterable)?,
            many => many.to_vec(),
        };
        if items.is_empty() {
            return args.keyword("default").cloned().ok_or_else(|| {
                Fault::value_error(format!("{}() arg is an empty sequence", args.name()))
            });
        }
        let mut best: Option<(Value, Value)> = None;
        for item in items {
            let rank = match &key {
                Some(f) => self.call_value(f, vec![item.clone()], Vec::new())?,
                None => item.clone(),
            };
            best = match best {
                Some((best_item, best_rank)) if compare_values(&rank, &best_rank)? != want => {
                    Some((best_item, best_rank))
                }
                _ => Some((item, rank)),
            };
        }
        Ok(best.map(|(item, _)| item).unwrap_or(Value::None))
    }

    /// Stable sort on `key(item)` (or the items themselves)
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> FaultResult<Vec<Value>> {
        let ranks = match key {
            Some(f) => items
                .iter()
                .map(|item| self.call_value(f, vec![item.clone()], Vec::new()))
                .collect::<FaultResult<Vec<_>>>()?,
            None => items.clone(),
        };
        let mut order: Vec<usize> = (0..items.len()).collect();
        let mut failure = None;
        order.sort_by(|&a, &b| match compare_values(&ranks[a], &ranks[b]) {
            Ok(ordering) if reverse => ordering.reverse(),
            Ok(ordering) => ordering,
            Err(err) => {
                failure.get_or_insert(err);
                Ordering::Equal
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(order.into_iter().map(|i| items[i].clone()).collect())
    }

    fn build_dict(&mut self, args: &Args) -> FaultResult<Value> {
        args.check(1, &[])?;
        let mut dict = match args.positional().first() {
            None => Dict::new(),
            Some(Value::Dict(source)) => source.as_ref().clone(),
            Some(iterable) => {
                let mut dict = Dict::new();
                for pair in self.materialize(iterable)? {
                    match &pair {
                        Value::List(items) | Value::Tuple(items) if items.len() == 2 => {
                            dict.insert(items[0].clone(), items[1].clone())?;
                        }
                        other => {
                            return Err(Fault::type_error(format!(
                                "cannot convert dictionary update sequence element of type '{}'",
                                other.type_name()
                            )))
                        }
                    }
                }
                dict
            }
        };
        for (key, value) in args.keywords() {
            dict.insert(Value::str(key.clone()), value.clone())?;
        }
        Ok(Value::dict(dict))
    }

    /// `px.<kind>(data_frame, x=, y=, color=, title=, ...)`
    fn build_chart(&mut self, kind: ChartKind, args: &Args) -> FaultResult<Value> {
        let allowed: Vec<&str> = CHART_KEYWORDS
            .iter()
            .chain(CHART_COSMETIC_KEYWORDS)
            .copied()
            .collect();
        args.check(1, &allowed)?;
        let data: Arc<Table> = match args.get(0, "data_frame") {
            Some(Value::Table(table)) => table.clone(),
            Some(Value::Series(column)) => Arc::new(Table::new(vec![column.as_ref().clone()])?),
            Some(other) => {
                return Err(Fault::type_error(format!(
                    "{}() expects a DataFrame, not {}",
                    args.name(),
                    other.type_name()
                )))
            }
            None => {
                return Err(Fault::type_error(format!(
                    "{}() missing required argument: 'data_frame'",
                    args.name()
                )))
            }
        };
        let mut x = args.string(KEYWORD_ONLY, "x")?;
        let mut y = args.string(KEYWORD_ONLY, "y")?;
        if kind == ChartKind::Pie {
            x = x.or(args.string(KEYWORD_ONLY, "names")?);
            y = y.or(args.string(KEYWORD_ONLY, "values")?);
        }
        let label_for = |column: &Option<String>| -> FaultResult<Option<String>> {
            match (args.keyword("labels"), column) {
                (Some(Value::Dict(labels)), Some(name)) => {
                    Ok(labels.get(&Value::str(name.clone()))?.map(Value::display))
                }
                _ => Ok(None),
            }
        };
        let encoding = ChartEncoding {
            x_label: label_for(&x)?,
            y_label: label_for(&y)?,
            x,
            y,
            color: args.string(KEYWORD_ONLY, "color")?,
            title: args.string(KEYWORD_ONLY, "title")?,
        };
        let chart = Arc::new(ChartSpec::build(kind, &data, encoding)?);
        self.record_chart(chart.clone());
        Ok(Value::Chart(chart))
    }

    /// `pd.DataFrame(data, columns=)`
    fn build_table(&mut self, args: &Args) -> FaultResult<Value> {
        args.check(1, &["data", "columns"])?;
        let names = match args.keyword("columns") {
            None | Some(Value::None) => None,
            Some(columns) => Some(
                self.materialize(columns)?
                    .iter()
                    .map(Value::display)
                    .collect::<Vec<_>>(),
            ),
        };
        let table = match args.get(0, "data") {
            None | Some(Value::None) => Table::default(),
            Some(Value::Table(table)) => table.as_ref().clone(),
            Some(Value::Dict(_)) => Table::from_json(&args.required(0, "data")?.to_json())?,
            Some(data) => {
                let rows = self.materialize(data)?;
                match (rows.first(), &names) {
                    (Some(Value::List(_) | Value::Tuple(_)), Some(names)) => {
                        let cells = rows
                            .iter()
                            .map(|row| {
                                self.materialize(row)?
                                    .iter()
                                    .map(cell_of)
                                    .collect::<FaultResult<Vec<_>>>()
                            })
                            .collect::<FaultResult<Vec<_>>>()?;
                        Table::from_rows(names.clone(), cells)?
                    }
                    _ => Table::from_json(&Json::Array(rows.iter().map(Value::to_json).collect()))?,
                }
            }
        };
        self.check_len(table.num_rows())?;
        match names {
            Some(names) if table.column_names() != names => {
                Ok(Value::table(table.select(&names)?))
            }
            _ => Ok(Value::table(table)),
        }
    }

    /// `pd.Series(data, name=)`; a dict becomes a keyed table
    fn build_series(&mut self, args: &Args) -> FaultResult<Value> {
        args.check(1, &["data", "name"])?;
        let name = args.string(KEYWORD_ONLY, "name")?;
        match args.get(0, "data") {
            Some(Value::Dict(dict)) => {
                let keys = dict.keys().map(cell_of).collect::<FaultResult<Vec<_>>>()?;
                let values = dict.values().map(cell_of).collect::<FaultResult<Vec<_>>>()?;
                let table = Table::keyed(
                    vec![
                        Column::new("index", keys),
                        Column::new(name.unwrap_or_else(|| "value".to_string()), values),
                    ],
                    1,
                )?;
                Ok(Value::table(table))
            }
            Some(Value::Series(column)) => Ok(Value::series(match name {
                Some(name) => column.as_ref().clone().renamed(name),
                None => column.as_ref().clone(),
            })),
            Some(data) => {
                let cells = self
                    .materialize(data)?
                    .iter()
                    .map(cell_of)
                    .collect::<FaultResult<Vec<_>>>()?;
                Ok(Value::series(Column::new(name.unwrap_or_default(), cells)))
            }
            None => Ok(Value::series(Column::new(name.unwrap_or_default(), Vec::new()))),
        }
    }

    /// Numbers behind a numpy reduction argument; series nulls are skipped
    fn numbers(&mut self, args: &Args, value: &Value) -> FaultResult<Vec<f64>> {
        let items = match value {
            Value::Series(column) => column
                .values
                .iter()
                .filter(|cell| !cell.is_null())
                .map(Value::from_scalar)
                .collect(),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => vec![value.clone()],
            other => self.materialize(other)?,
        };
        items
            .iter()
            .map(|item| match item {
                Value::None => Ok(f64::NAN),
                other => other.as_f64().ok_or_else(|| {
                    Fault::type_error(format!(
                        "{}() needs numbers, found {}",
                        args.name(),
                        other.type_name()
                    ))
                }),
            })
            .collect()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

pub(crate) fn length_of(value: &Value) -> FaultResult<usize> {
    Ok(match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) | Value::Tuple(items) => items.len(),
        Value::Dict(d) => d.len(),
        Value::Range { .. } => range_len(value),
        Value::Table(t) => t.num_rows(),
        Value::Series(c) | Value::StrAccessor(c) => c.len(),
        Value::GroupBy(g) => g.table.group_indices(&g.keys)?.len(),
        other => {
            return Err(Fault::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    })
}

pub(crate) fn cell_of(value: &Value) -> FaultResult<Scalar> {
    value.to_scalar().ok_or_else(|| {
        Fault::type_error(format!(
            "a table cell cannot hold a {}",
            value.type_name()
        ))
    })
}

/// First-appearance distinct values
fn distinct(items: Vec<Value>) -> FaultResult<Vec<Value>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(DictKey::from_value(&item)?) {
            out.push(item);
        }
    }
    Ok(out)
}

/// Applies `f` to a scalar, or to every cell of a series
fn elementwise(value: &Value, f: impl Fn(&Value) -> FaultResult<Value>) -> FaultResult<Value> {
    match value {
        Value::Series(column) => Ok(Value::series(series_map(column, |cell| {
            if cell.is_null() {
                return Ok(cell.clone());
            }
            cell_of(&f(&Value::from_scalar(cell))?)
        })?)),
        other => f(other),
    }
}

fn abs_value(value: &Value) -> FaultResult<Value> {
    match value {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Int(_) | Value::Bool(_) => value
            .as_int()
            .and_then(i64::checked_abs)
            .map(Value::Int)
            .ok_or_else(Fault::overflow),
        other => Err(Fault::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn round_value(value: &Value, ndigits: Option<i64>) -> FaultResult<Value> {
    match (value, ndigits) {
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (Value::Int(_) | Value::Bool(_), Some(n)) => {
            Ok(Value::Int(round_int(value.as_int().unwrap_or(0), n)?))
        }
        (Value::Float(f), None) => {
            if !f.is_finite() {
                return Err(Fault::value_error(format!("cannot convert float {} to integer", f)));
            }
            let rounded = f.round_ties_even();
            if rounded.abs() >= 9.2e18 {
                return Err(Fault::overflow());
            }
            Ok(Value::Int(rounded as i64))
        }
        (Value::Float(f), Some(n)) => Ok(Value::Float(round_float(*f, n))),
        (other, _) => Err(Fault::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn float_map(value: &Value, f: fn(f64) -> f64) -> FaultResult<Value> {
    match value {
        Value::None => Ok(Value::Float(f64::NAN)),
        other => other
            .as_f64()
            .map(|x| Value::Float(f(x)))
            .ok_or_else(|| Fault::type_error(format!("expected a number, found {}", other.type_name()))),
    }
}

fn quantile(values: Vec<f64>, q: f64) -> FaultResult<f64> {
    let column = Column::new("", values.into_iter().map(Scalar::Float).collect());
    match column.quantile(q)? {
        Scalar::Float(f) => Ok(f),
        other => Ok(other.as_f64().unwrap_or(f64::NAN)),
    }
}

pub(crate) fn to_int(value: &Value) -> FaultResult<Value> {
    match value {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        Value::Float(f) => {
            if f.is_nan() {
                return Err(Fault::value_error("cannot convert float NaN to integer"));
            }
            let truncated = f.trunc();
            if !truncated.is_finite() || truncated.abs() >= 9.2e18 {
                return Err(Fault::new(
                    FaultKind::Overflow,
                    "cannot convert float infinity to integer",
                ));
            }
            Ok(Value::Int(truncated as i64))
        }
        Value::Str(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
            cleaned.parse::<i64>().map(Value::Int).map_err(|_| {
                Fault::value_error(format!(
                    "invalid literal for int() with base 10: {}",
                    Value::Str(s.clone()).repr()
                ))
            })
        }
        other => Err(Fault::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

pub(crate) fn to_float(value: &Value) -> FaultResult<Value> {
    match value {
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            Fault::value_error(format!(
                "could not convert string to float: {}",
                Value::Str(s.clone()).repr()
            ))
        }),
        other => other.as_f64().map(Value::Float).ok_or_else(|| {
            Fault::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

/// Python `==` on lists, for `index()` and friends
pub(crate) fn position_of(items: &[Value], needle: &Value) -> Option<usize> {
    items.iter().position(|item| values_equal(item, needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_knows_helpers() {
        assert!(matches!(lookup_global("len"), Some(Value::Builtin(Builtin::Len))));
        assert!(matches!(lookup_global("px"), Some(Value::Module(Module::Px))));
        assert!(lookup_global("open").is_none());
        assert!(lookup_global("eval").is_none());
        assert!(matches!(
            module_attr(Module::Px, "bar"),
            Ok(Value::Builtin(Builtin::Chart(ChartKind::Bar)))
        ));
        let err = module_attr(Module::Np, "load").unwrap_err();
        assert_eq!(err.kind, FaultKind::AttributeError);
        assert!(module_attr(Module::Np, "nan").unwrap().as_f64().unwrap().is_nan());
    }

    #[test]
    fn test_args_validation() {
        let args = Args::new(
            "head",
            vec![Value::Int(3)],
            vec![("extra".to_string(), Value::None)],
        );
        assert!(args.check(1, &[]).is_err());
        assert!(args.check(1, &["extra"]).is_ok());
        assert!(args.check(0, &["extra"]).is_err());
        assert_eq!(args.int(0, "n").unwrap(), Some(3));
        assert!(args.string(0, "n").is_err());
        assert!(args.required(1, "missing").is_err());
    }

    #[test]
    fn test_rounding_is_half_even() {
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_value(&Value::Float(2.5), None).unwrap().as_int(), Some(2));
        assert_eq!(round_value(&Value::Float(3.5), None).unwrap().as_int(), Some(4));
        assert_eq!(round_float(1234.5678, 1), 1234.6);
        assert_eq!(round_int(1234, -2).unwrap(), 1200);
        assert_eq!(round_int(1250, -2).unwrap(), 1200);
        assert_eq!(round_int(1350, -2).unwrap(), 1400);
        assert_eq!(round_int(-1250, -2).unwrap(), -1200);
        assert_eq!(round_int(7, 3).unwrap(), 7);
        assert_eq!(round_int(i64::MAX, -60).unwrap(), 0);
        assert!(round_int(i64::MAX, -19).is_err());
        assert_eq!(round_value(&Value::Int(1234), Some(-2)).unwrap().repr(), "1200");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(to_int(&Value::str(" 42 ")).unwrap().as_int(), Some(42));
        assert_eq!(to_int(&Value::Float(-3.9)).unwrap().as_int(), Some(-3));
        assert!(to_int(&Value::str("3.5")).is_err());
        assert!(to_int(&Value::Float(f64::NAN)).is_err());
        assert_eq!(to_float(&Value::str("2.5")).unwrap().as_f64(), Some(2.5));
        assert!(to_float(&Value::str("abc")).is_err());
        assert_eq!(
            length_of(&Value::Range { start: 0, stop: 10, step: 2 }).unwrap(),
            5
        );
        assert!(length_of(&Value::Int(1)).is_err());
    }
}
