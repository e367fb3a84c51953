use querysandbox::{
    ExecutionOptions, NativeEngine, PolicyManager, QuerySandbox, SandboxConfig, SandboxReply,
    SecurityProfile, Table,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

const FILE_POLICY_ID: &str = "file";

struct WorkerState {
    config: SandboxConfig,
    policies: PolicyManager,
    default_policy_id: String,
}

impl WorkerState {
    fn from_env() -> anyhow::Result<Self> {
        let config = SandboxConfig::from_env()?;
        let mut policies = PolicyManager::new();
        let default_policy_id = match &config.policy_file {
            Some(path) => {
                policies.load_policy_file(FILE_POLICY_ID, path)?;
                FILE_POLICY_ID.to_string()
            }
            None => config.profile.policy_id().to_string(),
        };
        // Fail at startup, not on the first request
        policies.select_policy(&default_policy_id)?;
        policies.effective_policy()?;
        Ok(Self {
            config,
            policies,
            default_policy_id,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "querysandbox_worker=info,querysandbox=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut state = WorkerState::from_env()?;
    tracing::info!(
        "querysandbox-worker starting (profile={:?}, policy={})",
        state.config.profile,
        state.default_policy_id
    );

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("invalid json-rpc line ({} bytes): {}", line.len(), e);
                continue;
            }
        };

        let response = handle_message(&mut state, parsed).await;
        if let Some(resp) = response {
            let s = serde_json::to_string(&resp)?;
            stdout.write_all(s.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

async fn handle_message(state: &mut WorkerState, msg: Value) -> Option<Value> {
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    // Notifications have no id: ignore most, but allow "exit" to terminate.
    if id.is_none() {
        if method == "exit" {
            std::process::exit(0);
        }
        return None;
    }

    let result = match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2025-06-18",
            "serverInfo": {
                "name": "querysandbox worker",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": { "listChanged": false }
            }
        })),
        "tools/list" => Ok(json!({ "tools": tools_list() })),
        "tools/call" => call_tool(state, &params).await,
        "shutdown" => {
            std::process::exit(0);
        }
        _ => Err(json!({
            "code": -32601,
            "message": format!("Method not found: {}", method)
        })),
    };

    Some(match result {
        Ok(v) => json!({ "jsonrpc": "2.0", "result": v, "id": id }),
        Err(err_obj) => json!({ "jsonrpc": "2.0", "error": err_obj, "id": id }),
    })
}

fn tools_list() -> Vec<Value> {
    vec![
        json!({
            "name": "querysandbox.ping",
            "description": "Health check for the query sandbox worker.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        }),
        json!({
            "name": "querysandbox.health",
            "description": "Worker health, version and active policy.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        }),
        json!({
            "name": "run_analysis",
            "description": "Validate and run an analysis program over a JSON dataset.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Program text. Set `result`, `df_out`, `fig` or `output` to return a value." },
                    "model_reply": { "type": "string", "description": "A model reply to extract the program from, used when `code` is absent." },
                    "dataset": { "description": "Array of records, or {\"columns\": [...], \"rows\": [[...]]}." },
                    "policy_id": { "type": "string", "description": "Policy template id (data_analysis, stats_only, strict)." },
                    "timeout_seconds": { "type": "integer", "minimum": 1, "maximum": 600, "description": "Wall-clock timeout for the run." },
                    "max_rows": { "type": "integer", "minimum": 1, "description": "Rows kept in a tabular result." }
                },
                "required": ["dataset"],
                "additionalProperties": false
            }
        }),
    ]
}

async fn call_tool(state: &mut WorkerState, params: &Value) -> std::result::Result<Value, Value> {
    let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
    let args = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    match normalize_tool_name(name).as_str() {
        "querysandbox_ping" => Ok(json!({
            "content": [{ "type": "text", "text": "pong" }],
            "isError": false,
        })),
        "querysandbox_health" => Ok(json!({
            "content": [{ "type": "text", "text": "ok" }],
            "structuredContent": {
                "ok": true,
                "worker": "querysandbox-worker",
                "version": env!("CARGO_PKG_VERSION"),
                "profile": state.config.profile,
                "policy_id": state.default_policy_id,
                "policies": state.policies.list_templates(),
            },
            "isError": false
        })),
        "run_analysis" => run_analysis_call(state, &args).await,
        other => Ok(json!({
            "content": [{ "type": "text", "text": format!("Unknown tool: {}", other) }],
            "isError": true
        })),
    }
}

fn normalize_tool_name(name: &str) -> String {
    name.replace('.', "_").replace('/', "_")
}

fn invalid_params(message: impl Into<String>) -> Value {
    json!({ "code": -32602, "message": message.into() })
}

fn build_sandbox(state: &mut WorkerState, policy_id: &str) -> std::result::Result<QuerySandbox, Value> {
    state
        .policies
        .select_policy(policy_id)
        .map_err(|e| invalid_params(e.to_string()))?;
    let policy = state
        .policies
        .effective_policy()
        .map_err(|e| json!({ "code": -32000, "message": e.to_string() }))?;
    let limits = match SecurityProfile::parse(policy_id) {
        Some(profile) if policy_id != state.default_policy_id => profile.resource_limits(),
        _ => state.config.limits.clone(),
    };
    let engine = NativeEngine::with_limits(policy, limits)
        .map_err(|e| json!({ "code": -32000, "message": e.to_string() }))?;
    Ok(QuerySandbox::new(Box::new(engine)))
}

async fn run_analysis_call(
    state: &mut WorkerState,
    args: &Value,
) -> std::result::Result<Value, Value> {
    let dataset = args
        .get("dataset")
        .ok_or_else(|| invalid_params("Missing required argument: dataset"))?;
    let table = Table::from_json(dataset).map_err(|e| invalid_params(format!("dataset: {}", e)))?;

    let policy_id = args
        .get("policy_id")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| state.default_policy_id.clone());

    let mut options = ExecutionOptions::default();
    if let Some(secs) = args.get("timeout_seconds").and_then(|v| v.as_u64()) {
        options = options.with_timeout(Duration::from_secs(secs.clamp(1, 600)));
    }
    if let Some(rows) = args.get("max_rows").and_then(|v| v.as_u64()) {
        options = options.with_max_rows(rows.max(1) as usize);
    }

    let sandbox = build_sandbox(state, &policy_id)?;
    let data = Arc::new(table);
    let reply = match (
        args.get("code").and_then(|v| v.as_str()),
        args.get("model_reply").and_then(|v| v.as_str()),
    ) {
        (Some(code), _) => sandbox.ask_with(code, data, &options).await,
        (None, Some(reply_text)) => sandbox.ask_model_reply_with(reply_text, data, &options).await,
        (None, None) => return Err(invalid_params("Missing required argument: code or model_reply")),
    };

    let is_error = !matches!(reply, SandboxReply::Answer(_));
    let structured = serde_json::to_value(&reply)
        .map_err(|e| json!({ "code": -32603, "message": e.to_string() }))?;
    Ok(json!({
        "content": [{ "type": "text", "text": reply.user_message() }],
        "structuredContent": {
            "policy_id": policy_id,
            "reply": structured
        },
        "isError": is_error
    }))
}
