//! Test support: a scripted reasoning service and batch assertions.
//!
//! # Example
//! ```ignore
//! #[tokio::test]
//! async fn panel_passes_golden_rows() -> anyhow::Result<()> {
//!     let service = Arc::new(ScriptedService::judging(json!({"score": 1, "explanation": "ok"})));
//!     let panel = AgentPanel::with_service(&Criterion::defaults(), service)?;
//!     let result = Batch::builder()
//!         .row_source(rows)
//!         .panel(panel)
//!         .row_delay(Duration::ZERO)
//!         .build()?
//!         .run()
//!         .await?;
//!
//!     assert_complete_records(&result)?;
//!     assert_min_pass_rate(&result, "Accuracy", 0.8)?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use judgecraft_types::{AgentRunRecord, BatchResult, ToolSpec};
use serde_json::{json, Value};

use crate::service::{
    ChatRequest, ChatResponse, Message, ReasoningService, ResponsePart, ServiceError, ToolCall,
    ToolMode,
};
use crate::trace::{record_trace, CallKind, Trace};

/// How a [`ScriptedService`] answers the forced first turn.
#[derive(Debug, Clone)]
pub enum ChatReply {
    /// Call the offered tool, passing the last user text.
    CallTool,
    /// Call the offered tool with no arguments.
    CallToolWithoutArgs,
    Text(String),
    Empty,
    Fail(String),
    Panic,
}

#[derive(Debug, Clone)]
enum JudgmentReply {
    Raw(String),
    Fail(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Started,
    Finished,
}

/// A chat call observed by the service. `tool` names the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub tool: String,
    pub forced: bool,
    pub phase: EventPhase,
}

#[derive(Default)]
struct Recorded {
    judgment_prompts: Vec<String>,
    chat_modes: Vec<ToolMode>,
    events: Vec<ServiceEvent>,
    max_in_flight: usize,
}

/// Deterministic stand-in for the external reasoning service.
pub struct ScriptedService {
    judgment: JudgmentReply,
    chat: ChatReply,
    tool_replies: HashMap<String, ChatReply>,
    fail_followups: bool,
    latency: Duration,
    in_flight: AtomicUsize,
    recorded: Mutex<Recorded>,
}

impl ScriptedService {
    fn with_replies(judgment: JudgmentReply, chat: ChatReply) -> Self {
        Self {
            judgment,
            chat,
            tool_replies: HashMap::new(),
            fail_followups: false,
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    /// Agents call their tool; every judgment answers `verdict`.
    pub fn judging(verdict: Value) -> Self {
        Self::with_replies(JudgmentReply::Raw(verdict.to_string()), ChatReply::CallTool)
    }

    /// Like [`judging`](Self::judging) with a verbatim judgment body.
    pub fn judging_raw(body: impl Into<String>) -> Self {
        Self::with_replies(JudgmentReply::Raw(body.into()), ChatReply::CallTool)
    }

    /// Every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_replies(JudgmentReply::Fail(message.clone()), ChatReply::Fail(message))
    }

    pub fn with_chat_reply(mut self, reply: ChatReply) -> Self {
        self.chat = reply;
        self
    }

    /// Override the forced-turn reply for the agent owning `tool`.
    pub fn with_tool_reply(mut self, tool: impl Into<String>, reply: ChatReply) -> Self {
        self.tool_replies.insert(tool.into(), reply);
        self
    }

    pub fn fail_followups(mut self) -> Self {
        self.fail_followups = true;
        self
    }

    /// Delay applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn judgment_calls(&self) -> usize {
        self.lock().judgment_prompts.len()
    }

    pub fn last_judgment_prompt(&self) -> Option<String> {
        self.lock().judgment_prompts.last().cloned()
    }

    pub fn chat_calls(&self) -> usize {
        self.lock().chat_modes.len()
    }

    pub fn chat_modes(&self) -> Vec<ToolMode> {
        self.lock().chat_modes.clone()
    }

    pub fn events(&self) -> Vec<ServiceEvent> {
        self.lock().events.clone()
    }

    pub fn max_concurrent_chats(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn wait(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn forced_reply(&self, tool: &str, request: &ChatRequest) -> Result<ChatResponse, ServiceError> {
        let reply = self.tool_replies.get(tool).unwrap_or(&self.chat);
        let parts = match reply {
            ChatReply::CallTool | ChatReply::CallToolWithoutArgs => {
                let arguments = match reply {
                    ChatReply::CallTool => json!({ (ToolSpec::ARGUMENT): last_user_text(request) }),
                    _ => Value::Null,
                };
                vec![ResponsePart::ToolCall(ToolCall {
                    id: format!("call_{tool}"),
                    name: tool.to_string(),
                    arguments,
                })]
            }
            ChatReply::Text(text) => vec![ResponsePart::Text { text: text.clone() }],
            ChatReply::Empty => Vec::new(),
            ChatReply::Fail(message) => return Err(ServiceError::Unavailable(message.clone())),
            ChatReply::Panic => panic!("scripted panic in {tool}"),
        };
        Ok(ChatResponse { parts })
    }

    fn followup_reply(&self) -> Result<ChatResponse, ServiceError> {
        if self.fail_followups {
            return Err(ServiceError::Unavailable("follow-up rejected".into()));
        }
        if let ChatReply::Fail(message) = &self.chat {
            return Err(ServiceError::Unavailable(message.clone()));
        }
        Ok(ChatResponse {
            parts: vec![ResponsePart::Text { text: "Acknowledged.".into() }],
        })
    }
}

fn last_user_text(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find_map(|m| match m {
            Message::User { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[async_trait]
impl ReasoningService for ScriptedService {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate_json(&self, prompt: &str) -> Result<String, ServiceError> {
        let trace = Trace::start(CallKind::Judgment, self.model());
        self.lock().judgment_prompts.push(prompt.to_string());
        self.wait().await;

        let request = json!({ "prompt": prompt });
        match &self.judgment {
            JudgmentReply::Raw(body) => {
                record_trace(trace.finish(request, json!(body), None));
                Ok(body.clone())
            }
            JudgmentReply::Fail(message) => {
                record_trace(trace.finish_with_error(request, message.clone()));
                Err(ServiceError::Unavailable(message.clone()))
            }
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ServiceError> {
        let trace = Trace::start(CallKind::Chat, self.model());
        let tool = request.tools.first().map(|t| t.name.clone()).unwrap_or_default();
        let forced = request.tool_mode == ToolMode::Required;

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut recorded = self.lock();
            recorded.chat_modes.push(request.tool_mode);
            recorded.max_in_flight = recorded.max_in_flight.max(in_flight);
            recorded.events.push(ServiceEvent { tool: tool.clone(), forced, phase: EventPhase::Started });
        }

        self.wait().await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.lock().events.push(ServiceEvent { tool: tool.clone(), forced, phase: EventPhase::Finished });

        let reply = if forced { self.forced_reply(&tool, request) } else { self.followup_reply() };
        let wire = json!({ "tool": tool, "mode": request.tool_mode });
        match &reply {
            Ok(response) => record_trace(trace.finish(wire, json!(response.parts), None)),
            Err(err) => record_trace(trace.finish_with_error(wire, err.to_string())),
        }
        reply
    }
}

/// Every row carries a full grade/reason/graph triple for every criterion of
/// the summary, and every graph column parses to `{nodes: [..], edges: [..]}`.
pub fn assert_complete_records(result: &BatchResult) -> Result<()> {
    for (idx, flat) in result.flat_rows().iter().enumerate() {
        for summary in &result.summary.criteria {
            let name = &summary.criterion;
            let grade = flat.get(&AgentRunRecord::grade_column(name));
            let reason = flat.get(&AgentRunRecord::reason_column(name));
            let graph = flat.get(&AgentRunRecord::graph_column(name));
            let (Some(grade), Some(reason), Some(Value::String(graph))) = (grade, reason, graph) else {
                bail!("row {idx}: incomplete record for {name}");
            };
            if !grade.is_u64() || !reason.is_string() {
                bail!("row {idx}: {name} grade/reason have the wrong type");
            }
            let parsed: Value = serde_json::from_str(graph)?;
            let well_formed = parsed.as_object().is_some_and(|obj| {
                obj.len() == 2
                    && obj.get("nodes").is_some_and(Value::is_array)
                    && obj.get("edges").is_some_and(Value::is_array)
            });
            if !well_formed {
                bail!("row {idx}: {name} graph is not {{nodes, edges}}: {graph}");
            }
        }
    }
    Ok(())
}

/// Pass rate of `criterion` must reach `min_pass_rate`.
pub fn assert_min_pass_rate(result: &BatchResult, criterion: &str, min_pass_rate: f64) -> Result<()> {
    let Some(summary) = result.summary.criterion(criterion) else {
        bail!("criterion {criterion} was not evaluated");
    };
    if summary.pass_rate < min_pass_rate {
        bail!(
            "{criterion}: pass rate {:.1}% is below threshold {:.1}%\n{}",
            summary.pass_rate * 100.0,
            min_pass_rate * 100.0,
            result.summary_table()
        );
    }
    Ok(())
}

/// No record may carry a failure marker.
pub fn assert_no_failed_runs(result: &BatchResult) -> Result<()> {
    let failed: usize = result.summary.criteria.iter().map(|c| c.failed_runs).sum();
    if failed > 0 {
        bail!("{failed} agent run(s) failed\n{}", result.summary_table());
    }
    Ok(())
}
