use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use judgecraft_types::{AgentRunRecord, EnrichedRow, Row, RowSchema, Trace};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::agent::AgentPanel;
use crate::protocol::{self, AgentRun};
use crate::trace::collect_traces;

type UnitOutput = (String, Result<AgentRun, Box<dyn Any + Send>>, Vec<Trace>);

/// Judge one row with every agent of the panel.
///
/// Agents run concurrently, at most `workers` at a time, over a pool that
/// lives only for this call. A unit that panics still contributes an error
/// record, so every criterion of the panel ends up in the result.
pub async fn evaluate_row(
    row: &Row,
    schema: &RowSchema,
    panel: &AgentPanel,
    workers: usize,
) -> EnrichedRow {
    let row_id = row.id_label(schema);
    info!(row_id = %row_id, agents = panel.len(), "evaluating row");

    if row.get(&schema.text_field).is_none() {
        warn!(row_id = %row_id, field = %schema.text_field, "row has no text field; judging empty text");
    }
    let text: Arc<str> = Arc::from(row.text(schema));
    let pool = Arc::new(Semaphore::new(workers.max(1)));
    let mut units: JoinSet<UnitOutput> = JoinSet::new();

    for agent in panel.agents() {
        let agent = agent.clone();
        let text = text.clone();
        let pool = pool.clone();
        units.spawn(async move {
            let name = agent.name().to_string();
            let _slot = pool.acquire_owned().await;
            let run = AssertUnwindSafe(protocol::execute(&agent, &text)).catch_unwind();
            let (outcome, traces) = collect_traces(run).await;
            (name, outcome, traces)
        });
    }

    let mut evaluations = BTreeMap::new();
    let mut traces = BTreeMap::new();
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok((name, Ok(run), unit_traces)) => {
                evaluations.insert(name.clone(), run.record);
                if !unit_traces.is_empty() {
                    traces.insert(name, unit_traces);
                }
            }
            Ok((name, Err(panic), unit_traces)) => {
                let message = panic_message(panic.as_ref());
                error!(row_id = %row_id, criterion = %name, panic = %message, "agent task panicked");
                evaluations.insert(
                    name.clone(),
                    AgentRunRecord::errored(format!("agent task panicked: {message}")),
                );
                if !unit_traces.is_empty() {
                    traces.insert(name, unit_traces);
                }
            }
            Err(join_err) => {
                error!(row_id = %row_id, error = %join_err, "agent task did not complete");
            }
        }
    }

    for name in panel.criterion_names() {
        evaluations
            .entry(name)
            .or_insert_with(|| AgentRunRecord::errored("agent task did not complete"));
    }

    info!(row_id = %row_id, "row finished");
    EnrichedRow {
        row: row.clone(),
        evaluations,
        traces,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ReasoningService;
    use crate::testing::{ChatReply, ScriptedService};
    use judgecraft_types::Criterion;
    use serde_json::json;

    fn row() -> Row {
        Row::from_value(json!({"id": 101, "Answer": "The sun is cold and blue."})).unwrap()
    }

    fn panel(service: Arc<ScriptedService>) -> AgentPanel {
        let service: Arc<dyn ReasoningService> = service;
        AgentPanel::with_service(&Criterion::defaults(), service).unwrap()
    }

    #[tokio::test]
    async fn merges_one_record_per_criterion_and_keeps_source_fields() {
        let service = Arc::new(ScriptedService::judging(json!({"score": 1, "explanation": "ok"})));
        let enriched = evaluate_row(&row(), &RowSchema::default(), &panel(service), 3).await;

        assert_eq!(enriched.row, row());
        assert_eq!(enriched.evaluations.len(), 3);
        assert!(enriched.evaluations.values().all(|r| r.grade == 1));
        // two chat turns and one judgment per agent
        assert_eq!(enriched.traces["Accuracy"].len(), 3);
    }

    #[tokio::test]
    async fn panicking_agent_does_not_abort_siblings() {
        let service = Arc::new(
            ScriptedService::judging(json!({"score": 1, "explanation": "ok"}))
                .with_tool_reply("check_completeness", ChatReply::Panic),
        );
        let enriched = evaluate_row(&row(), &RowSchema::default(), &panel(service), 3).await;

        assert_eq!(enriched.evaluations.len(), 3);
        let failed = &enriched.evaluations["Completeness"];
        assert_eq!(failed.grade, 0);
        assert!(failed.reason.starts_with("Error: agent task panicked"));
        assert!(failed.graph.is_empty());
        assert_eq!(enriched.evaluations["Accuracy"].grade, 1);
        assert_eq!(enriched.evaluations["Empathy"].grade, 1);
    }

    #[tokio::test]
    async fn pool_of_one_still_completes_every_agent() {
        let service = Arc::new(ScriptedService::judging(json!({"score": 0})));
        let enriched = evaluate_row(&row(), &RowSchema::default(), &panel(service.clone()), 1).await;
        assert_eq!(enriched.evaluations.len(), 3);
        assert_eq!(service.max_concurrent_chats(), 1);
    }

    #[tokio::test]
    async fn judges_the_configured_text_field() {
        let service = Arc::new(ScriptedService::judging(json!({"score": 1, "explanation": "ok"})));
        let schema = RowSchema { id_field: "id".into(), text_field: "text".into() };
        let row = Row::from_value(json!({"id": 5, "text": "Water boils at 100C."})).unwrap();

        let enriched = evaluate_row(&row, &schema, &panel(service.clone()), 3).await;

        assert!(enriched.evaluations.values().all(|r| r.grade == 1));
        let prompt = service.last_judgment_prompt().unwrap();
        assert!(prompt.contains("Water boils at 100C."), "{prompt}");
    }

    #[tokio::test]
    async fn missing_text_field_is_judged_as_empty() {
        let service = Arc::new(ScriptedService::judging(json!({"score": 0, "explanation": "empty"})));
        let schema = RowSchema { id_field: "id".into(), text_field: "text".into() };

        let enriched = evaluate_row(&row(), &schema, &panel(service.clone()), 3).await;

        assert_eq!(enriched.evaluations.len(), 3);
        assert!(!service.last_judgment_prompt().unwrap().contains("The sun is cold"));
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"bang".to_string()), "bang");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
