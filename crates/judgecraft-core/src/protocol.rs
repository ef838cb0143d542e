//! Two-phase conversation run once per (agent, row).
//!
//! ```text
//! Start -> ForcedCallSent -> ToolResolved -> FollowupSent -> Done
//!   \____________\______________\________________\______-> Failed
//! ```
//!
//! The first turn forces a tool call; the callback then produces the
//! record; the second turn hands the tool result back best-effort. Any
//! failure before `ToolResolved` yields a default record, so callers
//! always get a complete [`AgentRunRecord`].

use std::fmt;

use judgecraft_types::AgentRunRecord;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::{Agent, AgentHandle};
use crate::service::{ChatRequest, ChatResponse, Message, ServiceError, ToolMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Start,
    ForcedCallSent,
    ToolResolved,
    FollowupSent,
    Done,
    Failed,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::ForcedCallSent => "forced_call_sent",
            Self::ToolResolved => "tool_resolved",
            Self::FollowupSent => "followup_sent",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("agent reply had no content")]
    EmptyReply,
    #[error("agent replied without calling its tool")]
    NotAToolCall,
}

impl ProtocolError {
    /// Protocol violations get the plain "Failed to run" record; service
    /// errors carry their cause.
    fn into_record(self) -> AgentRunRecord {
        match self {
            ProtocolError::Service(err) => AgentRunRecord::errored(err),
            ProtocolError::EmptyReply | ProtocolError::NotAToolCall => {
                AgentRunRecord::failed_to_run()
            }
        }
    }
}

/// Result of one protocol run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub criterion: String,
    pub record: AgentRunRecord,
    /// `Done` or `Failed`.
    pub state: ProtocolState,
    /// Whether the closing tool-result turn went through.
    pub followup_delivered: bool,
}

/// Conversation history private to one (agent, row) run.
struct Conversation<'a> {
    handle: &'a AgentHandle,
    history: Vec<Message>,
}

impl<'a> Conversation<'a> {
    fn start(handle: &'a AgentHandle) -> Self {
        Self { handle, history: Vec::new() }
    }

    async fn send(&mut self, message: Message, tool_mode: ToolMode) -> Result<ChatResponse, ServiceError> {
        self.history.push(message);
        let request = ChatRequest {
            system: self.handle.persona.clone(),
            messages: self.history.clone(),
            tools: vec![self.handle.tool.clone()],
            tool_mode,
        };
        let reply = self.handle.service().chat(&request).await?;
        self.history.push(Message::Assistant { parts: reply.parts.clone() });
        Ok(reply)
    }
}

struct Machine<'a> {
    criterion: &'a str,
    state: ProtocolState,
}

impl Machine<'_> {
    fn advance(&mut self, next: ProtocolState) {
        debug!(criterion = %self.criterion, from = %self.state, to = %next, "protocol transition");
        self.state = next;
    }

    fn fail(mut self, err: ProtocolError) -> AgentRun {
        warn!(criterion = %self.criterion, state = %self.state, error = %err, "agent run failed");
        self.advance(ProtocolState::Failed);
        AgentRun {
            criterion: self.criterion.to_string(),
            record: err.into_record(),
            state: ProtocolState::Failed,
            followup_delivered: false,
        }
    }
}

/// Run `agent` on `text` with a fresh conversation.
pub async fn execute(agent: &Agent, text: &str) -> AgentRun {
    let mut machine = Machine { criterion: agent.name(), state: ProtocolState::Start };
    let mut conversation = Conversation::start(&agent.handle);

    let reply = match conversation.send(Message::user(text), ToolMode::Required).await {
        Ok(reply) => reply,
        Err(err) => return machine.fail(err.into()),
    };
    machine.advance(ProtocolState::ForcedCallSent);

    if reply.parts.is_empty() {
        return machine.fail(ProtocolError::EmptyReply);
    }
    let call = match reply.leading_tool_call() {
        Some(call) => call.clone(),
        None => return machine.fail(ProtocolError::NotAToolCall),
    };

    let outcome = agent.callback.invoke(&call, text).await;
    let record = outcome.to_record();
    machine.advance(ProtocolState::ToolResolved);

    let result = Message::tool_result(&call, json!({ "result": outcome }));
    let followup_delivered = match conversation.send(result, ToolMode::Auto).await {
        Ok(_) => {
            machine.advance(ProtocolState::FollowupSent);
            true
        }
        Err(err) => {
            warn!(criterion = %agent.name(), error = %err, "tool result turn failed; keeping verdict");
            false
        }
    };

    machine.advance(ProtocolState::Done);
    AgentRun {
        criterion: agent.name().to_string(),
        record,
        state: ProtocolState::Done,
        followup_delivered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentPanel;
    use crate::service::ReasoningService;
    use crate::testing::{ChatReply, ScriptedService};
    use judgecraft_types::{Criterion, EMPTY_GRAPH_JSON, FAILED_TO_RUN};
    use std::sync::Arc;

    fn empathy_agent(service: Arc<ScriptedService>) -> Agent {
        let service: Arc<dyn ReasoningService> = service;
        let criteria = vec![Criterion::defaults().remove(2)];
        AgentPanel::with_service(&criteria, service).unwrap().agents()[0].clone()
    }

    fn passing() -> serde_json::Value {
        serde_json::json!({
            "score": 1,
            "explanation": "warm",
            "graph_nodes": [{"id": "tone", "type": "quality"}],
            "graph_edges": [{"source": "Input Text", "target": "tone", "relationship": "HAS"}]
        })
    }

    #[tokio::test]
    async fn happy_path_reaches_done_with_two_turns() {
        let service = Arc::new(ScriptedService::judging(passing()));
        let run = execute(&empathy_agent(service.clone()), "I hear you.").await;

        assert_eq!(run.state, ProtocolState::Done);
        assert!(run.followup_delivered);
        assert_eq!(run.record.grade, 1);
        assert_eq!(run.record.reason, "warm");
        assert_eq!(run.record.graph.edges[0].relationship, "HAS");
        assert_eq!(service.chat_calls(), 2);
        assert_eq!(service.judgment_calls(), 1);

        let modes = service.chat_modes();
        assert_eq!(modes, [ToolMode::Required, ToolMode::Auto]);
    }

    #[tokio::test]
    async fn text_reply_is_a_protocol_violation() {
        let service = Arc::new(
            ScriptedService::judging(passing()).with_chat_reply(ChatReply::Text("No.".into())),
        );
        let run = execute(&empathy_agent(service.clone()), "text").await;

        assert_eq!(run.state, ProtocolState::Failed);
        assert_eq!(run.record.reason, FAILED_TO_RUN);
        assert_eq!(run.record.grade, 0);
        assert_eq!(run.record.graph.to_json(), EMPTY_GRAPH_JSON);
        assert_eq!(service.judgment_calls(), 0);
    }

    #[tokio::test]
    async fn empty_reply_is_a_protocol_violation() {
        let service = Arc::new(ScriptedService::judging(passing()).with_chat_reply(ChatReply::Empty));
        let run = execute(&empathy_agent(service), "text").await;
        assert_eq!(run.state, ProtocolState::Failed);
        assert_eq!(run.record.reason, FAILED_TO_RUN);
    }

    #[tokio::test]
    async fn service_error_on_forced_call_records_cause() {
        let service = Arc::new(ScriptedService::failing("503 upstream"));
        let run = execute(&empathy_agent(service), "text").await;

        assert_eq!(run.state, ProtocolState::Failed);
        assert!(run.record.reason.starts_with("Error:"));
        assert!(run.record.reason.contains("503 upstream"));
    }

    #[tokio::test]
    async fn failed_followup_keeps_the_verdict() {
        let service = Arc::new(ScriptedService::judging(passing()).fail_followups());
        let run = execute(&empathy_agent(service), "text").await;

        assert_eq!(run.state, ProtocolState::Done);
        assert!(!run.followup_delivered);
        assert_eq!(run.record.grade, 1);
        assert_eq!(run.record.reason, "warm");
    }

    #[tokio::test]
    async fn tool_call_without_arguments_judges_the_row_text() {
        let service = Arc::new(
            ScriptedService::judging(passing()).with_chat_reply(ChatReply::CallToolWithoutArgs),
        );
        execute(&empathy_agent(service.clone()), "the original answer").await;
        assert!(service
            .last_judgment_prompt()
            .unwrap()
            .contains("CONTENT: the original answer"));
    }
}
