use querysandbox::{create_default_sandbox, ExecutionOptions, SandboxReply, Table};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Query Sandbox Chat Demo ===\n");

    let sandbox = create_default_sandbox()?;
    let caps = sandbox.capabilities();
    println!(
        "Engine: {} (policy: {}, dataset bound as `{}`)\n",
        caps.name, caps.policy, caps.data_binding
    );

    let orders = Arc::new(Table::from_json(&serde_json::json!([
        {"region": "North", "product": "Widget", "sales": 120.0, "units": 12},
        {"region": "South", "product": "Widget", "sales": 80.0, "units": 8},
        {"region": "North", "product": "Gadget", "sales": 200.0, "units": 4},
        {"region": "East", "product": "Gadget", "sales": 150.0, "units": 3},
        {"region": "South", "product": "Gizmo", "sales": 50.0, "units": 10}
    ]))?);

    // Example 1: A model reply with a fenced program
    println!("Example 1: Sales by region (model reply)");
    let reply_text = r#"Sure, here is the analysis:

```python
by_region = df.groupby('region')['sales'].sum().reset_index()
df_out = by_region.sort_values('sales', ascending=False)
```
"#;
    show(&sandbox.ask_model_reply(reply_text, Arc::clone(&orders)).await);

    // Example 2: A chart
    println!("Example 2: Chart");
    let code = "fig = px.bar(df, x='region', y='sales', title='Sales by region')";
    show(&sandbox.ask(code, Arc::clone(&orders)).await);

    // Example 3: An escape attempt
    println!("Example 3: Import attempt");
    show(&sandbox.ask("import os\nresult = os.listdir('/')", Arc::clone(&orders)).await);

    // Example 4: A runaway loop
    println!("Example 4: Runaway loop (1s timeout)");
    let options = ExecutionOptions::default().with_timeout(Duration::from_secs(1));
    show(
        &sandbox
            .ask_with("total = 0\nwhile True:\n    total += 1", Arc::clone(&orders), &options)
            .await,
    );

    // Example 5: The prompt a model would receive
    println!("Example 5: Prompt preview");
    println!("{}", sandbox.prompt(&orders, "Which region sold the most?"));

    Ok(())
}

fn show(reply: &SandboxReply) {
    println!("[{}]\n{}\n", reply.label(), reply.user_message());
}
