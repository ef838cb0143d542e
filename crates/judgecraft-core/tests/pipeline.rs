use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use judgecraft_core::testing::{
    assert_complete_records, assert_min_pass_rate, assert_no_failed_runs, ChatReply, EventPhase,
    ScriptedService,
};
use judgecraft_core::{
    export, graph, AgentPanel, Batch, BatchResult, Criterion, JsonlRowSource, ReasoningService,
    RowSchema, VecRowSource,
};
use serde_json::{json, Value};

fn sample_rows() -> Vec<Value> {
    vec![
        json!({"id": 101, "Answer": "The sun is cold and blue."}),
        json!({"id": 102, "Answer": "I understand this is difficult. The treatment is effective."}),
    ]
}

fn sun_verdict() -> Value {
    json!({"score": 1, "explanation": "ok", "graph_nodes": [{"id": "sun", "type": "claim"}], "graph_edges": []})
}

async fn run_batch(service: Arc<ScriptedService>, rows: Vec<Value>, workers: usize) -> BatchResult {
    let service: Arc<dyn ReasoningService> = service;
    let panel = AgentPanel::with_service(&Criterion::defaults(), service).unwrap();
    Batch::builder()
        .row_source(Arc::new(VecRowSource::from_values(rows).unwrap()))
        .panel(panel)
        .workers(workers)
        .row_delay(Duration::ZERO)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap()
}

#[tokio::test]
async fn two_rows_pass_every_criterion() {
    let service = Arc::new(ScriptedService::judging(sun_verdict()));
    let result = run_batch(service.clone(), sample_rows(), 3).await;

    assert_eq!(result.rows.len(), 2);
    assert_complete_records(&result).unwrap();
    assert_no_failed_runs(&result).unwrap();
    for name in ["Accuracy", "Completeness", "Empathy"] {
        assert_min_pass_rate(&result, name, 1.0).unwrap();
    }

    for flat in result.flat_rows() {
        for name in ["Accuracy", "Completeness", "Empathy"] {
            assert_eq!(flat[&format!("{name}_grade")], 1);
            assert_eq!(flat[&format!("{name}_reason")], "ok");
            assert_eq!(
                flat[&format!("{name}_graph")],
                r#"{"nodes":[{"id":"sun","type":"claim"}],"edges":[]}"#
            );
        }
    }
    // three agents, two rows: one judgment and two chat turns each
    assert_eq!(service.judgment_calls(), 6);
    assert_eq!(service.chat_calls(), 12);
}

#[tokio::test]
async fn source_fields_are_untouched() {
    let service = Arc::new(ScriptedService::judging(sun_verdict()));
    let input = sample_rows();
    let result = run_batch(service, input.clone(), 3).await;

    for (flat, original) in result.flat_rows().iter().zip(&input) {
        assert_eq!(flat["id"], original["id"]);
        assert_eq!(flat["Answer"], original["Answer"]);
        let keys: Vec<_> = flat.keys().take(2).cloned().collect();
        assert_eq!(keys, ["id", "Answer"]);
    }
}

#[tokio::test(start_paused = true)]
async fn all_agents_start_before_any_finishes() {
    let service = Arc::new(ScriptedService::judging(sun_verdict()).with_latency(Duration::from_millis(200)));
    run_batch(service.clone(), sample_rows()[..1].to_vec(), 3).await;

    let forced: Vec<_> = service.events().into_iter().filter(|e| e.forced).collect();
    let first_finish = forced
        .iter()
        .position(|e| e.phase == EventPhase::Finished)
        .expect("agents finished");
    let started_before = forced[..first_finish]
        .iter()
        .filter(|e| e.phase == EventPhase::Started)
        .count();
    assert_eq!(started_before, 3);
    assert_eq!(service.max_concurrent_chats(), 3);
}

#[tokio::test(start_paused = true)]
async fn pool_of_one_serializes_agents() {
    let service = Arc::new(ScriptedService::judging(sun_verdict()).with_latency(Duration::from_millis(50)));
    let result = run_batch(service.clone(), sample_rows()[..1].to_vec(), 1).await;

    assert_complete_records(&result).unwrap();
    assert_eq!(service.max_concurrent_chats(), 1);
}

#[tokio::test]
async fn failing_service_still_completes_the_batch() {
    let service = Arc::new(ScriptedService::failing("connection refused"));
    let result = run_batch(service, sample_rows(), 3).await;

    assert_eq!(result.rows.len(), 2);
    assert_complete_records(&result).unwrap();
    for row in &result.rows {
        assert_eq!(row.evaluations.len(), 3);
        for record in row.evaluations.values() {
            assert_eq!(record.grade, 0);
            assert!(record.is_failure(), "not marked as failure: {}", record.reason);
            assert!(record.graph.is_empty());
        }
    }
    assert!(assert_no_failed_runs(&result).is_err());
    let accuracy = result.summary.criterion("Accuracy").unwrap();
    assert_eq!(accuracy.failed_runs, 2);
    assert_eq!(accuracy.pass_rate, 0.0);
}

#[tokio::test]
async fn mixed_failures_keep_every_column() {
    let service = Arc::new(
        ScriptedService::judging_raw("this is not json")
            .with_tool_reply("check_accuracy", ChatReply::Text("Looks fine to me.".into()))
            .with_tool_reply("check_empathy", ChatReply::Panic),
    );
    let result = run_batch(service, sample_rows(), 3).await;

    assert_complete_records(&result).unwrap();
    let flat = &result.flat_rows()[0];
    assert_eq!(flat["Accuracy_reason"], "Failed to run");
    assert!(flat["Completeness_reason"].as_str().unwrap().starts_with("Judge crashed:"));
    assert!(flat["Empathy_reason"].as_str().unwrap().starts_with("Error: agent task panicked"));
}

#[tokio::test]
async fn malformed_input_halts_the_batch() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"id": 1, "Answer": "fine"}}"#).unwrap();
    writeln!(file, "not json at all").unwrap();

    let service: Arc<dyn ReasoningService> = Arc::new(ScriptedService::judging(sun_verdict()));
    let panel = AgentPanel::with_service(&Criterion::defaults(), service).unwrap();
    let err = Batch::builder()
        .row_source(Arc::new(JsonlRowSource::new(file.path())))
        .panel(panel)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("line 2"));
}

#[tokio::test]
async fn jsonl_in_graphs_out() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("rows.jsonl");
    let body: String = sample_rows().iter().map(|r| format!("{r}\n")).collect();
    std::fs::write(&input, body).unwrap();

    let service: Arc<dyn ReasoningService> = Arc::new(ScriptedService::judging(json!({
        "score": 0,
        "explanation": "The sun is not cold.",
        "graph_nodes": [],
        "graph_edges": [{"source": "Input Text", "target": "sun", "relationship": "MISSTATES"}]
    })));
    let panel = AgentPanel::with_service(&Criterion::defaults(), service).unwrap();
    let result = Batch::builder()
        .row_source(Arc::new(JsonlRowSource::new(&input)))
        .panel(panel.clone())
        .row_delay(Duration::ZERO)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    let out = dir.path().join("out.jsonl");
    export::write_rows(&out, &result).await.unwrap();
    let rows = export::read_rows(&out).await.unwrap();
    assert_eq!(rows.len(), 2);

    let graphs = dir.path().join("graphs");
    let written = graph::write_row_graphs(&rows, &panel.criterion_names(), &RowSchema::default(), &graphs)
        .await
        .unwrap();
    assert_eq!(written.len(), 2);
    assert!(graphs.join("graph_id_101.dot").exists());
    assert!(graphs.join("graph_id_102.dot").exists());

    let dot = std::fs::read_to_string(graphs.join("graph_id_101.dot")).unwrap();
    assert!(dot.contains("MISSTATES"));
}
