use std::sync::Arc;
use std::time::Duration;

use judgecraft_core::testing::ScriptedService;
use judgecraft_core::{
    generate_html_report, AgentPanel, Batch, Criterion, JsonlRowSource, ReasoningService,
    VecRowSource,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Example 1: inline rows against a scripted service
    let rows = VecRowSource::from_values(vec![
        json!({"id": 101, "Answer": "The sun is cold and blue."}),
        json!({"id": 102, "Answer": "I understand this is difficult. The treatment is effective."}),
    ])?;

    let service: Arc<dyn ReasoningService> = Arc::new(ScriptedService::judging(json!({
        "score": 1,
        "explanation": "ok",
        "graph_nodes": [{"id": "sun", "type": "claim"}],
        "graph_edges": [{"source": "sun", "target": "cold", "relationship": "IS"}]
    })));
    let panel = AgentPanel::with_service(&Criterion::defaults(), service)?;

    let batch = Batch::builder()
        .row_source(Arc::new(rows))
        .panel(panel.clone())
        .row_delay(Duration::ZERO)
        .build()?;

    let result = batch.run().await?;
    println!("{}", result.summary_table());

    // Example 2: load rows from JSONL if provided, and write an HTML report next to it
    if let Some(path) = std::env::args().nth(1) {
        let batch = Batch::builder()
            .row_source(Arc::new(JsonlRowSource::new(&path)))
            .panel(panel)
            .row_delay(Duration::ZERO)
            .build()?;
        let result = batch.run().await?;
        println!("{}", result.summary_table());
        tokio::fs::write(format!("{path}.html"), generate_html_report(&result)).await?;
    }

    Ok(())
}
