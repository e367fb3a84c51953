//! Column-oriented table the dataset is loaded into.
//!
//! Tables carry no row index. Operations that produce labelled rows in a
//! dataframe library (group aggregations, `value_counts`, `describe`) put the
//! labels in leading *key columns* instead, so the result is still a plain
//! table the classifier can ship to the UI.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value as Json};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),

    #[error("length mismatch: expected {expected} values, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("{0}")]
    TypeMismatch(String),

    #[error("invalid table: {0}")]
    Invalid(String),
}

pub type TableResult<T> = std::result::Result<T, TableError>;

// ============================================================================
// SCALARS
// ============================================================================

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Hashable identity of a scalar, used for grouping and de-duplication.
/// Integral floats share a key with the matching integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ScalarKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Bool(_) | Scalar::Int(_) | Scalar::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn from_json(value: &Json) -> Self {
        match value {
            Json::Null => Scalar::Null,
            Json::Bool(b) => Scalar::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => n.as_f64().map(Scalar::Float).unwrap_or(Scalar::Null),
            },
            Json::String(s) => Scalar::Str(s.clone()),
            other => Scalar::Str(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Scalar::Null => Json::Null,
            Scalar::Bool(b) => Json::Bool(*b),
            Scalar::Int(i) => json!(i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Scalar::Str(s) => Json::String(s.clone()),
        }
    }

    /// Total order used by sorting: numbers before strings, nulls last
    pub fn compare(&self, other: &Scalar) -> Ordering {
        fn rank(s: &Scalar) -> u8 {
            match s {
                _ if s.is_null() => 2,
                Scalar::Str(_) => 1,
                _ => 0,
            }
        }
        match (rank(self), rank(other)) {
            (0, 0) => match (self, other) {
                (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
                _ => {
                    let a = self.as_f64().unwrap_or(f64::NAN);
                    let b = other.as_f64().unwrap_or(f64::NAN);
                    a.total_cmp(&b)
                }
            },
            (1, 1) => match (self, other) {
                (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
                _ => Ordering::Equal,
            },
            (a, b) => a.cmp(&b),
        }
    }

    /// Python `repr` of the cell
    pub fn repr(&self) -> String {
        match self {
            Scalar::Null => "None".to_string(),
            Scalar::Bool(true) => "True".to_string(),
            Scalar::Bool(false) => "False".to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => format_float(*f),
            Scalar::Str(s) => quote_str(s),
        }
    }

    /// Text shown inside a rendered table
    pub fn render(&self) -> String {
        match self {
            _ if self.is_null() => "NaN".to_string(),
            Scalar::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    pub(crate) fn key(&self) -> ScalarKey {
        match self {
            _ if self.is_null() => ScalarKey::Null,
            Scalar::Bool(b) => ScalarKey::Bool(*b),
            Scalar::Int(i) => ScalarKey::Int(*i),
            Scalar::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => ScalarKey::Int(*f as i64),
            Scalar::Float(f) => ScalarKey::Float(f.to_bits()),
            Scalar::Str(s) => ScalarKey::Str(s.clone()),
            Scalar::Null => ScalarKey::Null,
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Python-style float repr: `400.0`, `0.1`, `1e+20`, `nan`
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", f);
        return match text.split_once('e') {
            Some((mantissa, exp)) => {
                let exp: i32 = exp.parse().unwrap_or(0);
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            None => text,
        };
    }
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Python-style string repr with single quotes unless the text contains one
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

// ============================================================================
// COLUMNS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int64,
    Float64,
    Bool,
    Object,
    Empty,
}

impl DType {
    pub fn name(&self) -> &'static str {
        match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::Object => "object",
            DType::Empty => "empty",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Int64 | DType::Float64 | DType::Bool)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Inferred from the non-null cells
    pub fn dtype(&self) -> DType {
        let mut dtype = DType::Empty;
        for value in self.values.iter().filter(|v| !v.is_null()) {
            let cell = match value {
                Scalar::Bool(_) => DType::Bool,
                Scalar::Int(_) => DType::Int64,
                Scalar::Float(_) => DType::Float64,
                _ => DType::Object,
            };
            dtype = match (dtype, cell) {
                (DType::Empty, cell) => cell,
                (a, b) if a == b => a,
                (DType::Int64, DType::Float64) | (DType::Float64, DType::Int64) => DType::Float64,
                _ => DType::Object,
            };
            if dtype == DType::Object {
                break;
            }
        }
        dtype
    }

    pub fn take(&self, indices: &[usize]) -> Column {
        Column::new(
            self.name.clone(),
            indices
                .iter()
                .filter_map(|&i| self.values.get(i).cloned())
                .collect(),
        )
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Column {
        self.name = name.into();
        self
    }

    pub fn aggregate(&self, agg: Agg) -> TableResult<Scalar> {
        agg.apply(&self.name, &self.values)
    }

    /// Linear-interpolated quantile over the non-null numeric cells
    pub fn quantile(&self, q: f64) -> TableResult<Scalar> {
        if !(0.0..=1.0).contains(&q) {
            return Err(TableError::TypeMismatch(
                "quantiles must be between 0 and 1".to_string(),
            ));
        }
        let values = numbers(&self.name, &self.values)?;
        Ok(Scalar::Float(quantile_of(values, q)))
    }

    /// Distinct cells in first-appearance order
    pub fn unique(&self) -> Vec<Scalar> {
        let mut seen = HashMap::new();
        let mut out = Vec::new();
        for value in &self.values {
            if seen.insert(value.key(), ()).is_none() {
                out.push(value.clone());
            }
        }
        out
    }

    /// Keyed table of distinct non-null values and their counts, most
    /// frequent first
    pub fn value_counts(&self) -> Table {
        let mut order: Vec<(Scalar, i64)> = Vec::new();
        let mut slots: HashMap<ScalarKey, usize> = HashMap::new();
        for value in self.values.iter().filter(|v| !v.is_null()) {
            match slots.get(&value.key()) {
                Some(&slot) => order[slot].1 += 1,
                None => {
                    slots.insert(value.key(), order.len());
                    order.push((value.clone(), 1));
                }
            }
        }
        order.sort_by(|a, b| b.1.cmp(&a.1));
        let (values, counts): (Vec<Scalar>, Vec<Scalar>) = order
            .into_iter()
            .map(|(value, count)| (value, Scalar::Int(count)))
            .unzip();
        Table {
            columns: vec![
                Column::new(self.name.clone(), values),
                Column::new("count", counts),
            ],
            key_columns: 1,
        }
    }

    /// Summary statistics as a keyed table (`stat` labels plus this column)
    pub fn describe(&self) -> Table {
        let (labels, values) = describe_column(self);
        Table {
            columns: vec![
                Column::new("stat", labels.into_iter().map(|l| Scalar::Str(l.to_string())).collect()),
                Column::new(self.name.clone(), values),
            ],
            key_columns: 1,
        }
    }

    /// Pandas-style series rendering
    pub fn render(&self, max_rows: usize) -> String {
        let rows: Vec<usize> = display_rows(self.len(), max_rows);
        let index_width = self.len().saturating_sub(1).to_string().len();
        let cells: Vec<String> = rows
            .iter()
            .map(|&i| self.values[i].render())
            .collect();
        let width = cells.iter().map(|c| c.chars().count()).max().unwrap_or(0);
        let mut out = String::new();
        let mut prev = None;
        for (&i, cell) in rows.iter().zip(&cells) {
            if prev.is_some_and(|p: usize| i > p + 1) {
                out.push_str("...\n");
            }
            out.push_str(&format!("{:<iw$}    {:>w$}\n", i, cell, iw = index_width, w = width));
            prev = Some(i);
        }
        out.push_str(&format!("Name: {}, dtype: {}", self.name, self.dtype().name()));
        out
    }
}

fn numbers(name: &str, values: &[Scalar]) -> TableResult<Vec<f64>> {
    values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                TableError::TypeMismatch(format!("column '{}' is not numeric", name))
            })
        })
        .collect()
}

fn quantile_of(mut values: Vec<f64>, q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = q * (values.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    values[lower] + (values[upper] - values[lower]) * frac
}

fn describe_column(column: &Column) -> (Vec<&'static str>, Vec<Scalar>) {
    let present: Vec<&Scalar> = column.values.iter().filter(|v| !v.is_null()).collect();
    if column.dtype().is_numeric() {
        let nums: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
        let count = nums.len();
        let mean = if count == 0 {
            f64::NAN
        } else {
            nums.iter().sum::<f64>() / count as f64
        };
        let std = sample_variance(&nums).sqrt();
        let stat = |q| Scalar::Float(quantile_of(nums.clone(), q));
        (
            vec!["count", "mean", "std", "min", "25%", "50%", "75%", "max"],
            vec![
                Scalar::Float(count as f64),
                Scalar::Float(mean),
                Scalar::Float(std),
                stat(0.0),
                stat(0.25),
                stat(0.5),
                stat(0.75),
                stat(1.0),
            ],
        )
    } else {
        let counts = column.value_counts();
        let (top, freq) = match counts.columns.first().zip(counts.columns.get(1)) {
            Some((values, freqs)) if !values.is_empty() => {
                (values.values[0].clone(), freqs.values[0].clone())
            }
            _ => (Scalar::Null, Scalar::Null),
        };
        (
            vec!["count", "unique", "top", "freq"],
            vec![
                Scalar::Int(present.len() as i64),
                Scalar::Int(counts.num_rows() as i64),
                top,
                freq,
            ],
        )
    }
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

// ============================================================================
// AGGREGATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agg {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    Std,
    Var,
    Nunique,
    Size,
}

impl Agg {
    pub fn parse(name: &str) -> Option<Self> {
        let agg = match name {
            "sum" => Agg::Sum,
            "mean" => Agg::Mean,
            "median" => Agg::Median,
            "min" => Agg::Min,
            "max" => Agg::Max,
            "count" => Agg::Count,
            "std" => Agg::Std,
            "var" => Agg::Var,
            "nunique" => Agg::Nunique,
            "size" => Agg::Size,
            _ => return None,
        };
        Some(agg)
    }

    /// Whether the aggregation only makes sense over numeric cells
    pub fn is_numeric(&self) -> bool {
        matches!(self, Agg::Sum | Agg::Mean | Agg::Median | Agg::Std | Agg::Var)
    }

    pub fn apply(&self, name: &str, values: &[Scalar]) -> TableResult<Scalar> {
        let present: Vec<&Scalar> = values.iter().filter(|v| !v.is_null()).collect();
        let result = match self {
            Agg::Count => Scalar::Int(present.len() as i64),
            Agg::Size => Scalar::Int(values.len() as i64),
            Agg::Nunique => {
                let mut seen = HashMap::new();
                for value in &present {
                    seen.insert(value.key(), ());
                }
                Scalar::Int(seen.len() as i64)
            }
            Agg::Sum => {
                if present.iter().all(|v| matches!(v, Scalar::Int(_) | Scalar::Bool(_))) {
                    let ints = present.iter().map(|v| match v {
                        Scalar::Int(i) => *i,
                        Scalar::Bool(b) => *b as i64,
                        _ => 0,
                    });
                    match ints.clone().try_fold(0i64, |acc, i| acc.checked_add(i)) {
                        Some(total) => Scalar::Int(total),
                        None => Scalar::Float(ints.map(|i| i as f64).sum()),
                    }
                } else {
                    Scalar::Float(numbers(name, values)?.iter().sum())
                }
            }
            Agg::Mean => {
                let nums = numbers(name, values)?;
                if nums.is_empty() {
                    Scalar::Float(f64::NAN)
                } else {
                    Scalar::Float(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            Agg::Median => Scalar::Float(quantile_of(numbers(name, values)?, 0.5)),
            Agg::Var => Scalar::Float(sample_variance(&numbers(name, values)?)),
            Agg::Std => Scalar::Float(sample_variance(&numbers(name, values)?).sqrt()),
            Agg::Min | Agg::Max => {
                let want = if *self == Agg::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let numeric = present.iter().all(|v| v.is_numeric());
                let textual = present.iter().all(|v| matches!(v, Scalar::Str(_)));
                if !numeric && !textual {
                    return Err(TableError::TypeMismatch(format!(
                        "column '{}' mixes numbers and text",
                        name
                    )));
                }
                present
                    .into_iter()
                    .fold(None::<&Scalar>, |best, v| match best {
                        Some(b) if v.compare(b) != want => Some(b),
                        _ => Some(v),
                    })
                    .cloned()
                    .unwrap_or(Scalar::Float(f64::NAN))
            }
        };
        Ok(result)
    }
}

// ============================================================================
// TABLE
// ============================================================================

/// Rows x named columns, all columns of equal length
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub struct Table {
    columns: Vec<Column>,
    key_columns: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> TableResult<Self> {
        Self::keyed(columns, 0)
    }

    /// Table whose first `key_columns` columns label the rows
    pub fn keyed(columns: Vec<Column>, key_columns: usize) -> TableResult<Self> {
        if let Some(first) = columns.first() {
            let expected = first.len();
            for column in &columns {
                if column.len() != expected {
                    return Err(TableError::LengthMismatch {
                        expected,
                        found: column.len(),
                    });
                }
            }
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self {
            key_columns: key_columns.min(columns.len()),
            columns,
        })
    }

    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Scalar>>) -> TableResult<Self> {
        let mut columns: Vec<Column> = names
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(rows.len())))
            .collect();
        for (r, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(TableError::Invalid(format!(
                    "row {} has {} cells, expected {}",
                    r,
                    row.len(),
                    columns.len()
                )));
            }
            for (column, cell) in columns.iter_mut().zip(row) {
                column.values.push(cell);
            }
        }
        Self::new(columns)
    }

    /// Builds a table from an array of records; columns follow first
    /// appearance and missing cells are null
    pub fn from_records(records: &[Json]) -> TableResult<Self> {
        let mut names: Vec<String> = Vec::new();
        for record in records {
            let Json::Object(map) = record else {
                return Err(TableError::Invalid("records must be JSON objects".to_string()));
            };
            for key in map.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }
        let rows = records
            .iter()
            .map(|record| {
                names
                    .iter()
                    .map(|name| record.get(name).map(Scalar::from_json).unwrap_or(Scalar::Null))
                    .collect()
            })
            .collect();
        Self::from_rows(names, rows)
    }

    /// Accepts an array of records, `{"columns": [...], "rows": [[...]]}` or
    /// an object of equal-length column arrays
    pub fn from_json(value: &Json) -> TableResult<Self> {
        match value {
            Json::Array(records) => Self::from_records(records),
            Json::Object(map) if map.contains_key("columns") && map.contains_key("rows") => {
                let names = match map.get("columns") {
                    Some(Json::Array(names)) => names
                        .iter()
                        .map(|n| match n {
                            Json::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                    _ => return Err(TableError::Invalid("'columns' must be an array".to_string())),
                };
                let rows = match map.get("rows") {
                    Some(Json::Array(rows)) => rows
                        .iter()
                        .map(|row| match row {
                            Json::Array(cells) => Ok(cells.iter().map(Scalar::from_json).collect()),
                            _ => Err(TableError::Invalid("each row must be an array".to_string())),
                        })
                        .collect::<TableResult<Vec<Vec<Scalar>>>>()?,
                    _ => return Err(TableError::Invalid("'rows' must be an array".to_string())),
                };
                Self::from_rows(names, rows)
            }
            Json::Object(map) => {
                let columns = map
                    .iter()
                    .map(|(name, values)| match values {
                        Json::Array(cells) => Ok(Column::new(
                            name.clone(),
                            cells.iter().map(Scalar::from_json).collect(),
                        )),
                        _ => Err(TableError::Invalid(format!(
                            "column '{}' must be an array",
                            name
                        ))),
                    })
                    .collect::<TableResult<Vec<Column>>>()?;
                Self::new(columns)
            }
            _ => Err(TableError::Invalid(
                "expected an array of records or a columns/rows object".to_string(),
            )),
        }
    }

    pub fn from_json_str(text: &str) -> TableResult<Self> {
        let value: Json =
            serde_json::from_str(text).map_err(|e| TableError::Invalid(e.to_string()))?;
        Self::from_json(&value)
    }

    /// `{"columns": [...], "rows": [[...]]}`
    pub fn to_json(&self) -> Json {
        let rows: Vec<Json> = (0..self.num_rows())
            .map(|r| Json::Array(self.columns.iter().map(|c| c.values[r].to_json()).collect()))
            .collect();
        json!({
            "columns": self.column_names(),
            "rows": rows,
        })
    }

    /// One JSON object per row
    pub fn to_records(&self) -> Json {
        Json::Array(
            (0..self.num_rows())
                .map(|r| {
                    let mut record = Map::new();
                    for column in &self.columns {
                        record.insert(column.name.clone(), column.values[r].to_json());
                    }
                    Json::Object(record)
                })
                .collect(),
        )
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn key_columns(&self) -> usize {
        self.key_columns
    }

    /// Columns that are not row labels
    pub fn value_columns(&self) -> &[Column] {
        &self.columns[self.key_columns..]
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> TableResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    pub fn row(&self, index: usize) -> Vec<Scalar> {
        self.columns
            .iter()
            .filter_map(|c| c.values.get(index).cloned())
            .collect()
    }

    pub fn select(&self, names: &[String]) -> TableResult<Table> {
        let columns = names
            .iter()
            .map(|name| self.column(name).cloned())
            .collect::<TableResult<Vec<Column>>>()?;
        Table::new(columns)
    }

    pub fn take_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            key_columns: self.key_columns,
        }
    }

    pub fn filter(&self, mask: &[bool]) -> TableResult<Table> {
        if mask.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                expected: self.num_rows(),
                found: mask.len(),
            });
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        Ok(self.take_rows(&indices))
    }

    pub fn head(&self, n: usize) -> Table {
        let end = n.min(self.num_rows());
        self.take_rows(&(0..end).collect::<Vec<_>>())
    }

    pub fn tail(&self, n: usize) -> Table {
        let rows = self.num_rows();
        let start = rows.saturating_sub(n);
        self.take_rows(&(start..rows).collect::<Vec<_>>())
    }

    /// Replaces the column with the same name, or appends it
    pub fn with_column(&self, column: Column) -> TableResult<Table> {
        let mut table = self.clone();
        table.set_column(column)?;
        Ok(table)
    }

    /// In-place form of [`Table::with_column`]
    pub fn set_column(&mut self, column: Column) -> TableResult<()> {
        if !self.columns.is_empty() && column.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                expected: self.num_rows(),
                found: column.len(),
            });
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(slot) => *slot = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn drop_columns(&self, names: &[String]) -> TableResult<Table> {
        for name in names {
            self.column(name)?;
        }
        let keys_dropped = self.columns[..self.key_columns]
            .iter()
            .filter(|c| names.contains(&c.name))
            .count();
        Ok(Table {
            columns: self
                .columns
                .iter()
                .filter(|c| !names.contains(&c.name))
                .cloned()
                .collect(),
            key_columns: self.key_columns - keys_dropped,
        })
    }

    pub fn rename(&self, mapping: &[(String, String)]) -> TableResult<Table> {
        let columns = self
            .columns
            .iter()
            .map(|c| match mapping.iter().find(|(from, _)| *from == c.name) {
                Some((_, to)) => c.clone().renamed(to.clone()),
                None => c.clone(),
            })
            .collect();
        Table::keyed(columns, self.key_columns)
    }

    /// Key columns become ordinary columns
    pub fn reset_index(&self) -> Table {
        Table {
            columns: self.columns.clone(),
            key_columns: 0,
        }
    }

    /// Applies `f` to every value column, leaving key columns untouched
    pub fn map_values(
        &self,
        mut f: impl FnMut(&Column) -> TableResult<Column>,
    ) -> TableResult<Table> {
        let mut columns = self.columns[..self.key_columns].to_vec();
        for column in self.value_columns() {
            columns.push(f(column)?);
        }
        Table::keyed(columns, self.key_columns)
    }

    /// Stable multi-key sort; nulls sort last in either direction
    pub fn sort_by(&self, by: &[String], ascending: &[bool]) -> TableResult<Table> {
        let keys = by
            .iter()
            .map(|name| self.column(name))
            .collect::<TableResult<Vec<&Column>>>()?;
        let mut indices: Vec<usize> = (0..self.num_rows()).collect();
        indices.sort_by(|&a, &b| {
            for (k, column) in keys.iter().enumerate() {
                let (x, y) = (&column.values[a], &column.values[b]);
                let ordering = match (x.is_null(), y.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    _ => {
                        let asc = ascending.get(k).or(ascending.first()).copied().unwrap_or(true);
                        if asc {
                            x.compare(y)
                        } else {
                            y.compare(x)
                        }
                    }
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(self.take_rows(&indices))
    }

    /// Row indices per distinct key tuple, ordered by key. Rows with a null
    /// key are dropped.
    pub fn group_indices(&self, keys: &[String]) -> TableResult<Vec<(Vec<Scalar>, Vec<usize>)>> {
        let key_columns = keys
            .iter()
            .map(|name| self.column(name))
            .collect::<TableResult<Vec<&Column>>>()?;
        let mut groups: Vec<(Vec<Scalar>, Vec<usize>)> = Vec::new();
        let mut slots: HashMap<Vec<ScalarKey>, usize> = HashMap::new();
        for row in 0..self.num_rows() {
            let key: Vec<Scalar> = key_columns.iter().map(|c| c.values[row].clone()).collect();
            if key.iter().any(Scalar::is_null) {
                continue;
            }
            let hashed: Vec<ScalarKey> = key.iter().map(Scalar::key).collect();
            match slots.get(&hashed) {
                Some(&slot) => groups[slot].1.push(row),
                None => {
                    slots.insert(hashed, groups.len());
                    groups.push((key, vec![row]));
                }
            }
        }
        groups.sort_by(|a, b| {
            a.0.iter()
                .zip(&b.0)
                .map(|(x, y)| x.compare(y))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(groups)
    }

    /// Group by `keys` and reduce each `(column, agg)` target. The result is
    /// keyed by the group columns.
    pub fn aggregate(&self, keys: &[String], targets: &[(String, Agg)]) -> TableResult<Table> {
        let groups = self.group_indices(keys)?;
        let mut columns: Vec<Column> = keys
            .iter()
            .enumerate()
            .map(|(k, name)| {
                Column::new(name.clone(), groups.iter().map(|(key, _)| key[k].clone()).collect())
            })
            .collect();

        let repeated = |name: &String| targets.iter().filter(|(n, _)| n == name).count() > 1;
        for (name, agg) in targets {
            let source = self.column(name)?;
            let values = groups
                .iter()
                .map(|(_, rows)| agg.apply(name, &source.take(rows).values))
                .collect::<TableResult<Vec<Scalar>>>()?;
            let label = if repeated(name) || keys.contains(name) {
                format!("{}_{}", name, format!("{:?}", agg).to_lowercase())
            } else {
                name.clone()
            };
            columns.push(Column::new(label, values));
        }
        Table::keyed(columns, keys.len())
    }

    /// Column-wise summary statistics keyed by a `stat` column
    pub fn describe(&self) -> Table {
        let numeric: Vec<&Column> = self
            .value_columns()
            .iter()
            .filter(|c| c.dtype().is_numeric())
            .collect();
        let chosen: Vec<&Column> = if numeric.is_empty() {
            self.value_columns().iter().collect()
        } else {
            numeric
        };
        let mut labels = Vec::new();
        let mut columns = Vec::new();
        for column in chosen {
            let (l, values) = describe_column(column);
            labels = l;
            columns.push(Column::new(column.name.clone(), values));
        }
        let mut all = vec![Column::new(
            "stat",
            labels.into_iter().map(|l| Scalar::Str(l.to_string())).collect(),
        )];
        all.extend(columns);
        Table {
            columns: all,
            key_columns: 1,
        }
    }

    /// Pairwise Pearson correlation of the numeric value columns
    pub fn corr(&self) -> TableResult<Table> {
        let numeric: Vec<(&str, Vec<f64>)> = self
            .value_columns()
            .iter()
            .filter(|c| c.dtype().is_numeric())
            .map(|c| {
                (
                    c.name.as_str(),
                    c.values.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect(),
                )
            })
            .collect();
        let mut columns = vec![Column::new(
            "column",
            numeric.iter().map(|(n, _)| Scalar::Str(n.to_string())).collect(),
        )];
        for (name, a) in &numeric {
            let values = numeric
                .iter()
                .map(|(_, b)| Scalar::Float(pearson(a, b)))
                .collect();
            columns.push(Column::new(*name, values));
        }
        Table::keyed(columns, 1)
    }

    pub fn drop_duplicates(&self, subset: Option<&[String]>) -> TableResult<Table> {
        let names: Vec<String> = match subset {
            Some(names) => names.to_vec(),
            None => self.column_names(),
        };
        let columns = names
            .iter()
            .map(|n| self.column(n))
            .collect::<TableResult<Vec<&Column>>>()?;
        let mut seen = HashMap::new();
        let keep: Vec<usize> = (0..self.num_rows())
            .filter(|&row| {
                let key: Vec<ScalarKey> = columns.iter().map(|c| c.values[row].key()).collect();
                seen.insert(key, ()).is_none()
            })
            .collect();
        Ok(self.take_rows(&keep))
    }

    /// Drops rows holding a null in any of `subset` (default: every column)
    pub fn dropna(&self, subset: Option<&[String]>) -> TableResult<Table> {
        let columns: Vec<&Column> = match subset {
            Some(names) => names
                .iter()
                .map(|n| self.column(n))
                .collect::<TableResult<Vec<_>>>()?,
            None => self.columns.iter().collect(),
        };
        let keep: Vec<usize> = (0..self.num_rows())
            .filter(|&row| columns.iter().all(|c| !c.values[row].is_null()))
            .collect();
        Ok(self.take_rows(&keep))
    }

    /// Text rendering with head and tail rows once the table is longer than
    /// `max_rows`
    pub fn render(&self, max_rows: usize) -> String {
        if self.columns.is_empty() {
            return "Empty table".to_string();
        }
        let rows = display_rows(self.num_rows(), max_rows);
        let show_index = self.key_columns == 0;
        let index_width = self.num_rows().saturating_sub(1).to_string().len();

        let mut grid: Vec<Vec<String>> = Vec::with_capacity(rows.len() + 1);
        grid.push(self.columns.iter().map(|c| c.name.clone()).collect());
        for &r in &rows {
            grid.push(self.columns.iter().map(|c| c.values[r].render()).collect());
        }
        let widths: Vec<usize> = (0..self.columns.len())
            .map(|c| grid.iter().map(|row| row[c].chars().count()).max().unwrap_or(0))
            .collect();

        let mut out = String::new();
        let mut prev: Option<usize> = None;
        for (line, cells) in grid.iter().enumerate() {
            let row_index = line.checked_sub(1).map(|i| rows[i]);
            if let (Some(r), Some(p)) = (row_index, prev) {
                if r > p + 1 {
                    out.push_str("...\n");
                }
            }
            if show_index {
                match row_index {
                    Some(r) => out.push_str(&format!("{:<w$}", r, w = index_width)),
                    None => out.push_str(&" ".repeat(index_width)),
                }
            }
            let rendered: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:>w$}", cell, w = *w))
                .collect();
            if show_index {
                out.push_str("  ");
            }
            out.push_str(rendered.join("  ").trim_end());
            out.push('\n');
            prev = row_index.or(prev);
        }
        if rows.len() < self.num_rows() {
            out.push_str(&format!(
                "\n[{} rows x {} columns]",
                self.num_rows(),
                self.num_columns()
            ));
        }
        out.trim_end().to_string()
    }
}

/// Rows to show: all of them, or five from each end
fn display_rows(len: usize, max_rows: usize) -> Vec<usize> {
    if len <= max_rows {
        (0..len).collect()
    } else {
        (0..5).chain(len - 5..len).collect()
    }
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(x, y)| (*x, *y))
        .collect();
    let n = pairs.len() as f64;
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let cov: f64 = pairs.iter().map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
    let var_a: f64 = pairs.iter().map(|(x, _)| (x - mean_a).powi(2)).sum();
    let var_b: f64 = pairs.iter().map(|(_, y)| (y - mean_b).powi(2)).sum();
    cov / (var_a * var_b).sqrt()
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl TryFrom<Json> for Table {
    type Error = TableError;

    fn try_from(value: Json) -> TableResult<Self> {
        Table::from_json(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> Table {
        Table::from_json(&json!([
            {"region": "North", "sales": 100, "units": 1.5},
            {"region": "South", "sales": 250, "units": 2.0},
            {"region": "North", "sales": 50, "units": null},
            {"region": "East", "sales": 75, "units": 4.0},
        ]))
        .unwrap()
    }

    #[test]
    fn test_ingest_shapes() {
        let records = sales();
        assert_eq!(records.num_rows(), 4);
        assert_eq!(records.column_names(), vec!["region", "sales", "units"]);

        let round_trip = Table::from_json(&records.to_json()).unwrap();
        assert_eq!(round_trip, records);

        let columnar = Table::from_json(&json!({"a": [1, 2], "b": ["x", "y"]})).unwrap();
        assert_eq!(columnar.num_rows(), 2);

        assert!(Table::from_json(&json!({"a": [1, 2], "b": [1]})).is_err());
        assert!(Table::from_json(&json!("nope")).is_err());
    }

    #[test]
    fn test_dtypes() {
        let table = sales();
        assert_eq!(table.column("region").unwrap().dtype(), DType::Object);
        assert_eq!(table.column("sales").unwrap().dtype(), DType::Int64);
        assert_eq!(table.column("units").unwrap().dtype(), DType::Float64);
    }

    #[test]
    fn test_aggregations() {
        let table = sales();
        let sales = table.column("sales").unwrap();
        assert_eq!(sales.aggregate(Agg::Sum).unwrap(), Scalar::Int(475));
        assert_eq!(sales.aggregate(Agg::Max).unwrap(), Scalar::Int(250));
        assert_eq!(sales.aggregate(Agg::Median).unwrap(), Scalar::Float(87.5));
        let units = table.column("units").unwrap();
        assert_eq!(units.aggregate(Agg::Count).unwrap(), Scalar::Int(3));
        assert_eq!(units.aggregate(Agg::Mean).unwrap(), Scalar::Float(2.5));
        assert!(table.column("region").unwrap().aggregate(Agg::Mean).is_err());
    }

    #[test]
    fn test_group_aggregate_is_keyed_and_sorted() {
        let grouped = sales()
            .aggregate(&["region".to_string()], &[("sales".to_string(), Agg::Sum)])
            .unwrap();
        assert_eq!(grouped.key_columns(), 1);
        assert_eq!(
            grouped.column("region").unwrap().values,
            vec![
                Scalar::Str("East".into()),
                Scalar::Str("North".into()),
                Scalar::Str("South".into())
            ]
        );
        assert_eq!(
            grouped.column("sales").unwrap().values,
            vec![Scalar::Int(75), Scalar::Int(150), Scalar::Int(250)]
        );
    }

    #[test]
    fn test_sort_filter_head() {
        let table = sales();
        let sorted = table.sort_by(&["sales".to_string()], &[false]).unwrap();
        assert_eq!(sorted.column("sales").unwrap().values[0], Scalar::Int(250));
        let filtered = table.filter(&[true, false, true, false]).unwrap();
        assert_eq!(filtered.num_rows(), 2);
        assert_eq!(table.head(2).num_rows(), 2);
        assert_eq!(table.tail(10).num_rows(), 4);
        assert!(table.filter(&[true]).is_err());
    }

    #[test]
    fn test_value_counts() {
        let counts = sales().column("region").unwrap().value_counts();
        assert_eq!(counts.row(0), vec![Scalar::Str("North".into()), Scalar::Int(2)]);
        assert_eq!(counts.num_rows(), 3);
    }

    #[test]
    fn test_python_style_rendering() {
        assert_eq!(format_float(400.0), "400.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(Scalar::Str("a".into()).repr(), "'a'");
        let text = sales().render(20);
        assert!(text.contains("region"));
        assert!(text.contains("North"));
    }

    #[test]
    fn test_long_table_render_elides_middle() {
        let column = Column::new("n", (0..100).map(Scalar::Int).collect());
        let table = Table::new(vec![column]).unwrap();
        let text = table.render(20);
        assert!(text.contains("..."));
        assert!(text.contains("[100 rows x 1 columns]"));
    }
}
