//! Chart specifications produced by the `px` helpers.
//!
//! A chart is plain data: the kind, its encodings and the slice of the table
//! it plots. Rendering happens in the UI.

use crate::table::{Table, TableError, TableResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
    Histogram,
    Pie,
    Box,
    Area,
}

impl ChartKind {
    pub const ALL: [ChartKind; 7] = [
        ChartKind::Bar,
        ChartKind::Line,
        ChartKind::Scatter,
        ChartKind::Histogram,
        ChartKind::Pie,
        ChartKind::Box,
        ChartKind::Area,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Scatter => "scatter",
            ChartKind::Histogram => "histogram",
            ChartKind::Pie => "pie",
            ChartKind::Box => "box",
            ChartKind::Area => "area",
        }
    }
}

/// Column encodings passed to a chart helper
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartEncoding {
    pub x: Option<String>,
    pub y: Option<String>,
    pub color: Option<String>,
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_label: Option<String>,
    /// Only the columns the encodings reference
    pub data: Table,
}

impl ChartSpec {
    pub fn build(kind: ChartKind, source: &Table, encoding: ChartEncoding) -> TableResult<Self> {
        if encoding.x.is_none() && encoding.y.is_none() {
            return Err(TableError::TypeMismatch(format!(
                "px.{} needs at least one of x= or y=",
                kind.name()
            )));
        }
        let mut referenced: Vec<String> = Vec::new();
        for name in [&encoding.x, &encoding.y, &encoding.color].into_iter().flatten() {
            source.column(name)?;
            if !referenced.contains(name) {
                referenced.push(name.clone());
            }
        }
        Ok(Self {
            kind,
            title: encoding.title,
            x: encoding.x,
            y: encoding.y,
            color: encoding.color,
            x_label: encoding.x_label,
            y_label: encoding.y_label,
            data: source.select(&referenced)?,
        })
    }

    /// Copy with layout fields replaced where given
    pub fn with_layout(
        &self,
        title: Option<String>,
        x_label: Option<String>,
        y_label: Option<String>,
    ) -> Self {
        let mut chart = self.clone();
        if title.is_some() {
            chart.title = title;
        }
        if x_label.is_some() {
            chart.x_label = x_label;
        }
        if y_label.is_some() {
            chart.y_label = y_label;
        }
        chart
    }

    /// One-line summary, e.g. `bar chart of sales by region`
    pub fn summary(&self) -> String {
        let mut text = format!("{} chart", self.kind.name());
        match (&self.y, &self.x) {
            (Some(y), Some(x)) => text.push_str(&format!(" of {} by {}", y, x)),
            (Some(only), None) | (None, Some(only)) => text.push_str(&format!(" of {}", only)),
            (None, None) => {}
        }
        if let Some(title) = &self.title {
            text.push_str(&format!(" titled '{}'", title));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Table {
        Table::from_json(&json!([
            {"region": "North", "sales": 10, "units": 1},
            {"region": "South", "sales": 20, "units": 2},
        ]))
        .unwrap()
    }

    #[test]
    fn test_chart_keeps_only_referenced_columns() {
        let chart = ChartSpec::build(
            ChartKind::Bar,
            &table(),
            ChartEncoding {
                x: Some("region".into()),
                y: Some("sales".into()),
                title: Some("Sales".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(chart.data.column_names(), vec!["region", "sales"]);
        assert_eq!(chart.summary(), "bar chart of sales by region titled 'Sales'");

        let json = serde_json::to_value(&chart).unwrap();
        assert_eq!(json["kind"], "bar");
        assert_eq!(json["data"]["columns"], json!(["region", "sales"]));
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let err = ChartSpec::build(
            ChartKind::Line,
            &table(),
            ChartEncoding {
                x: Some("month".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, TableError::MissingColumn("month".into()));
    }

    #[test]
    fn test_layout_update() {
        let chart = ChartSpec::build(
            ChartKind::Pie,
            &table(),
            ChartEncoding {
                x: Some("region".into()),
                y: Some("units".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let retitled = chart.with_layout(Some("Units".into()), None, None);
        assert_eq!(retitled.title.as_deref(), Some("Units"));
        assert_eq!(retitled.x, chart.x);
    }
}
