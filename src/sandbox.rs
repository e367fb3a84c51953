//! The request surface: one validate-then-run per question.

use crate::analyzer::{ValidationVerdict, Violation};
use crate::classifier::{classify, ClassifiedResult, ResultPayload};
use crate::engine::{EngineCapabilities, ExecutionOptions, SandboxEngine};
use crate::errors::Result;
use crate::executor::ExecutionOutcome;
use crate::extract::{extract_program, prompt_for_table};
use crate::fault::FaultKind;
use crate::policy::NodeKind;
use crate::syntax::Location;
use crate::table::Table;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// What the caller gets back for one question
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SandboxReply {
    Answer(ClassifiedResult),
    Rejected(ValidationVerdict),
    Timeout,
    RuntimeFault { kind: FaultKind, message: String },
}

impl SandboxReply {
    pub fn label(&self) -> &'static str {
        match self {
            SandboxReply::Answer(_) => "answer",
            SandboxReply::Rejected(_) => "rejected",
            SandboxReply::Timeout => "timeout",
            SandboxReply::RuntimeFault { .. } => "runtime_fault",
        }
    }

    /// Text suitable for showing to the person who asked
    pub fn user_message(&self) -> String {
        match self {
            SandboxReply::Answer(result) => {
                let mut message = match &result.payload {
                    ResultPayload::Tabular { table, .. } => table.render(20),
                    ResultPayload::Chart { chart } => format!("Here is the {}.", chart.summary()),
                    ResultPayload::Scalar { text, .. } => text.clone(),
                    ResultPayload::Empty => "The program ran but produced no result.".to_string(),
                };
                if let Some(notice) = result.truncation_notice() {
                    message.push_str(&format!("\n({})", notice));
                }
                message
            }
            SandboxReply::Rejected(verdict) => {
                let reasons: Vec<&str> = verdict
                    .violations
                    .iter()
                    .map(|v| v.message.as_str())
                    .collect();
                format!("I can't run that: {}", reasons.join("; "))
            }
            SandboxReply::Timeout => {
                "That took too long to run, so I stopped it. Try a narrower question.".to_string()
            }
            SandboxReply::RuntimeFault { kind, message } => {
                format!("The analysis failed with {}: {}", kind.label(), message)
            }
        }
    }
}

/// Validates and runs candidate programs against caller-supplied datasets
pub struct QuerySandbox {
    engine: Box<dyn SandboxEngine>,
}

impl QuerySandbox {
    pub fn new(engine: Box<dyn SandboxEngine>) -> Self {
        Self { engine }
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        self.engine.capabilities()
    }

    /// Static check only, nothing runs
    pub fn validate(&self, program: &str) -> ValidationVerdict {
        self.engine.validate(program)
    }

    pub async fn ask(&self, program: &str, dataset: Arc<Table>) -> SandboxReply {
        self.ask_with(program, dataset, &ExecutionOptions::default()).await
    }

    pub async fn ask_with(
        &self,
        program: &str,
        dataset: Arc<Table>,
        options: &ExecutionOptions,
    ) -> SandboxReply {
        let max_rows = options.resolve(&self.engine.capabilities().limits).max_rows;
        let outcome = self.engine.execute(program, dataset, options).await;
        let reply = match outcome {
            ExecutionOutcome::Success {
                captured_value,
                captured_text,
            } => SandboxReply::Answer(classify(captured_value, captured_text, max_rows)),
            ExecutionOutcome::Rejected { violations } => SandboxReply::Rejected(ValidationVerdict {
                accepted: false,
                violations,
            }),
            ExecutionOutcome::Timeout => SandboxReply::Timeout,
            ExecutionOutcome::RuntimeFault { kind, message } => {
                SandboxReply::RuntimeFault { kind, message }
            }
        };
        info!("[SANDBOX] Request finished: {}", reply.label());
        reply
    }

    /// Extracts the program from a model reply, then behaves like [`Self::ask`]
    pub async fn ask_model_reply(&self, reply_text: &str, dataset: Arc<Table>) -> SandboxReply {
        self.ask_model_reply_with(reply_text, dataset, &ExecutionOptions::default())
            .await
    }

    pub async fn ask_model_reply_with(
        &self,
        reply_text: &str,
        dataset: Arc<Table>,
        options: &ExecutionOptions,
    ) -> SandboxReply {
        match extract_program(reply_text) {
            Some(program) => self.ask_with(&program, dataset, options).await,
            None => SandboxReply::Rejected(ValidationVerdict {
                accepted: false,
                violations: vec![Violation {
                    node_kind: NodeKind::Unparsable,
                    location: Location::new(1, 1),
                    message: "no program found in the reply".to_string(),
                }],
            }),
        }
    }

    /// Prompt asking a model for a program over `dataset`
    pub fn prompt(&self, dataset: &Table, question: &str) -> String {
        prompt_for_table(dataset, question, &self.engine.capabilities().data_binding)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.engine.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeEngine;
    use crate::policy::CapabilityPolicy;
    use crate::table::{Column, Scalar};
    use serde_json::json;
    use std::time::Duration;

    fn sandbox_with_binding(binding: &str) -> QuerySandbox {
        let policy = CapabilityPolicy::custom(CapabilityPolicy::data_analysis())
            .data_binding(binding)
            .build()
            .unwrap();
        QuerySandbox::new(Box::new(NativeEngine::new(Arc::new(policy))))
    }

    fn sales() -> Arc<Table> {
        Arc::new(
            Table::from_json(&json!([
                {"region": "North", "sales": 100.0},
                {"region": "South", "sales": 250.0},
                {"region": "North", "sales": 50.0},
            ]))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_sum_answer() {
        let sandbox = sandbox_with_binding("data");
        let reply = sandbox.ask("result = data[\"sales\"].sum()", sales()).await;
        match &reply {
            SandboxReply::Answer(result) => assert_eq!(
                result.payload,
                ResultPayload::Scalar {
                    text: "400.0".into(),
                    value: Some(json!(400.0)),
                }
            ),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(reply.user_message(), "400.0");
    }

    #[tokio::test]
    async fn test_non_finite_answers_are_shown() {
        let sandbox = sandbox_with_binding("df");
        let data = Arc::new(
            Table::from_json(&json!([
                {"region": "North", "score": null},
                {"region": "South", "score": null},
            ]))
            .unwrap(),
        );
        let cases = [
            ("result = df['score'].mean()", "nan"),
            ("result = float('inf')", "inf"),
            ("result = np.log(0)", "-inf"),
        ];
        for (program, shown) in cases {
            let reply = sandbox.ask(program, Arc::clone(&data)).await;
            match &reply {
                SandboxReply::Answer(result) => assert_eq!(
                    result.payload,
                    ResultPayload::Scalar {
                        text: shown.into(),
                        value: Some(serde_json::Value::Null),
                    }
                ),
                other => panic!("unexpected reply for {}: {:?}", program, other),
            }
            assert_eq!(reply.user_message(), shown);
        }
    }

    #[tokio::test]
    async fn test_import_is_rejected() {
        let sandbox = sandbox_with_binding("df");
        let reply = sandbox.ask("import os\nresult = os.listdir('/')", sales()).await;
        match &reply {
            SandboxReply::Rejected(verdict) => {
                assert!(!verdict.accepted);
                assert!(verdict.has(NodeKind::Import));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        let message = reply.user_message();
        assert!(message.starts_with("I can't run that:"));
        assert!(message.contains("import"));
    }

    #[tokio::test]
    async fn test_large_table_is_capped() {
        let ids: Vec<Scalar> = (0..50_000).map(Scalar::Int).collect();
        let big = Arc::new(Table::new(vec![Column::new("id", ids)]).unwrap());
        let sandbox = sandbox_with_binding("df");
        let reply = sandbox.ask("df_out = df[df['id'] >= 0]", big).await;
        match &reply {
            SandboxReply::Answer(result) => match &result.payload {
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
            },
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(reply.user_message().ends_with("(showing first 1000 of 50000 rows)"));
    }

    #[tokio::test]
    async fn test_timeout_reply() {
        let sandbox = sandbox_with_binding("df");
        let options = ExecutionOptions::default().with_timeout(Duration::from_millis(300));
        let reply = sandbox.ask_with("while True:\n    pass", sales(), &options).await;
        assert_eq!(reply, SandboxReply::Timeout);
        assert!(reply.user_message().starts_with("That took too long"));
    }

    #[tokio::test]
    async fn test_fault_reply() {
        let sandbox = sandbox_with_binding("df");
        let reply = sandbox.ask("result = df['sales'].sum() / 0", sales()).await;
        match &reply {
            SandboxReply::RuntimeFault { kind, .. } => assert_eq!(*kind, FaultKind::ZeroDivision),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(reply.user_message().contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_model_reply() {
        let sandbox = sandbox_with_binding("df");
        let reply_text = "Sure!\n```python\nresult = df.groupby('region')['sales'].sum()\n```\nDone.";
        match sandbox.ask_model_reply(reply_text, sales()).await {
            SandboxReply::Answer(result) => {
                assert!(matches!(result.payload, ResultPayload::Tabular { .. }))
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        match sandbox.ask_model_reply("   ", sales()).await {
            SandboxReply::Rejected(verdict) => assert!(verdict.has(NodeKind::Unparsable)),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let sandbox = Arc::new(sandbox_with_binding("df"));
        let data = sales();
        let mut handles = Vec::new();
        for factor in 1..=4 {
            let sandbox = Arc::clone(&sandbox);
            let data = Arc::clone(&data);
            handles.push(tokio::spawn(async move {
                let program = format!("df['sales'] = df['sales'] * {}\nresult = df['sales'].sum()", factor);
                (factor, sandbox.ask(&program, data).await)
            }));
        }
        for handle in handles {
            let (factor, reply) = handle.await.unwrap();
            assert_eq!(reply.user_message(), format!("{:.1}", 400.0 * factor as f64));
        }
        assert_eq!(*data, *sales());
    }

    #[test]
    fn test_prompt_uses_binding() {
        let sandbox = sandbox_with_binding("sales_table");
        let prompt = sandbox.prompt(&sales(), "Which region sold most?");
        assert!(prompt.contains("named `sales_table`"));
    }
}
