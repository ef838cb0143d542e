//! Boundary to the external reasoning service.
//!
//! The core talks to the model through [`ReasoningService`] only: one
//! JSON-mode request for judgments, and conversational turns for agents.
//! Wire formats live in `providers`.

use async_trait::async_trait;
use judgecraft_types::ToolSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed service response: {0}")]
    Malformed(String),

    /// Raised by stub services and by callers that short-circuit a request.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// How the model may use the tools offered with a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// The reply must be a tool call.
    Required,
    /// The model decides.
    Auto,
}

/// A tool invocation returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Parsed arguments; `Value::Null` when the model sent none or sent garbage.
    pub arguments: Value,
}

impl ToolCall {
    /// String argument `name`, if the model supplied one.
    pub fn string_arg(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePart {
    Text { text: String },
    ToolCall(ToolCall),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User { text: String },
    Assistant { parts: Vec<ResponsePart> },
    ToolResult { call_id: String, name: String, content: Value },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User { text: text.into() }
    }

    pub fn tool_result(call: &ToolCall, content: Value) -> Self {
        Message::ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content,
        }
    }
}

/// One conversational turn: persona, full history, offered tools and mode.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub tool_mode: ToolMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub parts: Vec<ResponsePart>,
}

impl ChatResponse {
    /// The first part, when it is a tool call.
    pub fn leading_tool_call(&self) -> Option<&ToolCall> {
        match self.parts.first() {
            Some(ResponsePart::ToolCall(call)) => Some(call),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    fn model(&self) -> &str;

    /// Single-shot request whose answer must be a JSON object; returns the raw text.
    async fn generate_json(&self, prompt: &str) -> Result<String, ServiceError>;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leading_tool_call_requires_tool_call_first() {
        let call = ToolCall {
            id: "c1".into(),
            name: "check_accuracy".into(),
            arguments: json!({"text_content": "x"}),
        };
        let text_first = ChatResponse {
            parts: vec![
                ResponsePart::Text { text: "sure".into() },
                ResponsePart::ToolCall(call.clone()),
            ],
        };
        assert!(text_first.leading_tool_call().is_none());
        assert!(ChatResponse::default().leading_tool_call().is_none());

        let call_first = ChatResponse { parts: vec![ResponsePart::ToolCall(call)] };
        let leading = call_first.leading_tool_call().unwrap();
        assert_eq!(leading.string_arg("text_content"), Some("x"));
    }
}
