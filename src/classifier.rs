//! Maps a successful run's captured value and text to a tagged, size-bounded
//! payload for the caller.

use crate::chart::ChartSpec;
use crate::executor::CapturedValue;
use crate::table::Table;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPayload {
    Tabular {
        table: Table,
        total_rows: usize,
        truncated: bool,
    },
    Chart {
        chart: ChartSpec,
    },
    Scalar {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Json>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedResult {
    pub payload: ResultPayload,
    /// Everything the program printed
    pub captured_text: String,
}

impl ClassifiedResult {
    /// `showing first 1000 of 50000 rows` when the table was cut
    pub fn truncation_notice(&self) -> Option<String> {
        match &self.payload {
            ResultPayload::Tabular {
                table,
                total_rows,
                truncated: true,
            } => Some(format!(
                "showing first {} of {} rows",
                table.num_rows(),
                total_rows
            )),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.payload, ResultPayload::Empty)
    }
}

pub fn classify(
    captured_value: Option<CapturedValue>,
    captured_text: String,
    max_rows: usize,
) -> ClassifiedResult {
    let payload = match captured_value {
        Some(CapturedValue::Table(table)) => tabular(table, max_rows),
        Some(CapturedValue::Chart(chart)) => ResultPayload::Chart { chart },
        Some(CapturedValue::Data { value, text }) => match record_table(&value) {
            Some(table) => tabular(table, max_rows),
            None if text.is_empty() => text_payload(&captured_text),
            None => ResultPayload::Scalar {
                text,
                value: Some(value),
            },
        },
        None => text_payload(&captured_text),
    };
    debug!("[SANDBOX] Classified result as {}", payload_kind(&payload));
    ClassifiedResult {
        payload,
        captured_text,
    }
}

fn payload_kind(payload: &ResultPayload) -> &'static str {
    match payload {
        ResultPayload::Tabular { .. } => "tabular",
        ResultPayload::Chart { .. } => "chart",
        ResultPayload::Scalar { .. } => "scalar",
        ResultPayload::Empty => "empty",
    }
}

fn tabular(table: Table, max_rows: usize) -> ResultPayload {
    let total_rows = table.num_rows();
    if total_rows > max_rows {
        ResultPayload::Tabular {
            table: table.head(max_rows),
            total_rows,
            truncated: true,
        }
    } else {
        ResultPayload::Tabular {
            table,
            total_rows,
            truncated: false,
        }
    }
}

fn text_payload(captured_text: &str) -> ResultPayload {
    let text = captured_text.trim_end();
    if text.trim().is_empty() {
        ResultPayload::Empty
    } else {
        ResultPayload::Scalar {
            text: text.to_string(),
            value: None,
        }
    }
}

/// A non-empty array of objects that all share the first object's keys
fn record_table(value: &Json) -> Option<Table> {
    let records = value.as_array()?;
    let first = records.first()?.as_object()?;
    let same_keys = records.iter().all(|record| {
        record.as_object().is_some_and(|object| {
            object.len() == first.len() && first.keys().all(|key| object.contains_key(key))
        })
    });
    if !same_keys {
        return None;
    }
    Table::from_records(records).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, Scalar};
    use serde_json::json;

    fn big_table(rows: usize) -> Table {
        Table::new(vec![
            Column::new("id", (0..rows as i64).map(Scalar::Int).collect()),
            Column::new("even", (0..rows).map(|i| Scalar::Bool(i % 2 == 0)).collect()),
        ])
        .unwrap()
    }

    #[test]
    fn test_large_table_is_truncated() {
        let result = classify(Some(CapturedValue::Table(big_table(50_000))), String::new(), 1_000);
        match &result.payload {
            ResultPayload::Tabular {
                table,
                total_rows,
                truncated,
            } => {
                assert_eq!(table.num_rows(), 1_000);
                assert_eq!(*total_rows, 50_000);
                assert!(*truncated);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(
            result.truncation_notice().as_deref(),
            Some("showing first 1000 of 50000 rows")
        );
    }

    #[test]
    fn test_small_table_is_untouched() {
        let result = classify(Some(CapturedValue::Table(big_table(3))), String::new(), 1_000);
        assert_eq!(
            result.payload,
            ResultPayload::Tabular {
                table: big_table(3),
                total_rows: 3,
                truncated: false,
            }
        );
        assert!(result.truncation_notice().is_none());
    }

    #[test]
    fn test_records_become_a_table() {
        let value = json!([{"a": 1, "b": "x"}, {"b": "y", "a": 2}]);
        let result = classify(
            Some(CapturedValue::Data {
                value,
                text: String::new(),
            }),
            String::new(),
            10,
        );
        match result.payload {
            ResultPayload::Tabular { table, .. } => assert_eq!(table.num_rows(), 2),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_mixed_records_stay_scalar() {
        let value = json!([{"a": 1}, {"b": 2}]);
        let result = classify(
            Some(CapturedValue::Data {
                value: value.clone(),
                text: "[{'a': 1}, {'b': 2}]".into(),
            }),
            String::new(),
            10,
        );
        assert_eq!(
            result.payload,
            ResultPayload::Scalar {
                text: "[{'a': 1}, {'b': 2}]".into(),
                value: Some(value),
            }
        );
    }

    #[test]
    fn test_scalar_and_text() {
        let result = classify(
            Some(CapturedValue::Data {
                value: json!(400.0),
                text: "400.0".into(),
            }),
            "done\n".into(),
            10,
        );
        assert_eq!(
            result.payload,
            ResultPayload::Scalar {
                text: "400.0".into(),
                value: Some(json!(400.0)),
            }
        );
        assert_eq!(result.captured_text, "done\n");

        let printed = classify(None, "total: 3\n".into(), 10);
        assert_eq!(
            printed.payload,
            ResultPayload::Scalar {
                text: "total: 3".into(),
                value: None,
            }
        );
    }

    #[test]
    fn test_non_finite_scalars_are_answers() {
        for text in ["nan", "inf", "-inf"] {
            let result = classify(
                Some(CapturedValue::Data {
                    value: Json::Null,
                    text: text.into(),
                }),
                String::new(),
                10,
            );
            assert_eq!(
                result.payload,
                ResultPayload::Scalar {
                    text: text.into(),
                    value: Some(Json::Null),
                }
            );
        }

        let blank = classify(
            Some(CapturedValue::Data {
                value: json!(""),
                text: String::new(),
            }),
            String::new(),
            10,
        );
        assert!(blank.is_empty());
    }

    #[test]
    fn test_nothing_is_empty() {
        assert!(classify(None, String::new(), 10).is_empty());
        assert!(classify(None, "  \n".into(), 10).is_empty());
    }

    #[test]
    fn test_payload_tag() {
        let json = serde_json::to_value(classify(None, String::new(), 10)).unwrap();
        assert_eq!(json["payload"]["kind"], "empty");
    }
}
