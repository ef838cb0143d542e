pub use judgecraft_types::{CallKind, TokenUsage, Trace, TraceBuilder};

// Per-task trace buffer, one per (agent, row) unit
use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static CALL_TRACES: RefCell<Vec<Trace>>;
}

/// Run `fut` with its own trace buffer and return its output with every
/// trace recorded while it ran.
pub async fn collect_traces<F, R>(fut: F) -> (R, Vec<Trace>)
where
    F: Future<Output = R>,
{
    CALL_TRACES
        .scope(RefCell::new(Vec::new()), async move {
            let output = fut.await;
            let collected = CALL_TRACES.with(|buf| buf.take());
            (output, collected)
        })
        .await
}

/// Append a trace to the current unit's buffer. No-op outside `collect_traces`.
pub fn record_trace(trace: Trace) {
    let _ = CALL_TRACES.try_with(|buf| buf.borrow_mut().push(trace));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_trace(model: &str) -> Trace {
        Trace::start(CallKind::Chat, model).finish(json!({"q": 1}), json!({"a": 2}), None)
    }

    #[test]
    fn finished_trace_has_duration_and_no_error() {
        let trace = Trace::start(CallKind::Judgment, "gpt-4o-mini").finish(
            json!({"messages": []}),
            json!({"choices": []}),
            Some(TokenUsage { input_tokens: 10, output_tokens: 5, total_tokens: 15 }),
        );
        assert_eq!(trace.model, "gpt-4o-mini");
        assert!(trace.duration_ms.is_some());
        assert!(trace.error.is_none());

        let failed = Trace::start(CallKind::Chat, "m").finish_with_error(json!({}), "timeout");
        assert_eq!(failed.error.as_deref(), Some("timeout"));
        assert!(failed.response.is_null());
    }

    #[tokio::test]
    async fn recording_outside_a_scope_is_ignored() {
        record_trace(chat_trace("m"));

        let ((), traces) = collect_traces(async {
            record_trace(chat_trace("a"));
            record_trace(chat_trace("b"));
        })
        .await;
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1].model, "b");
    }

    #[tokio::test]
    async fn concurrent_scopes_do_not_share_buffers() {
        let first = tokio::spawn(collect_traces(async {
            record_trace(chat_trace("first"));
            tokio::task::yield_now().await;
            record_trace(chat_trace("first"));
        }));
        let second = tokio::spawn(collect_traces(async {
            record_trace(chat_trace("second"));
        }));

        let ((), first) = first.await.unwrap();
        let ((), second) = second.await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|t| t.model == "first"));
        assert_eq!(second.len(), 1);
    }
}
