use async_trait::async_trait;
use judgecraft_types::ToolSpec;
use serde_json::{json, Value};

use crate::config::ServiceConfig;
use crate::service::{
    ChatRequest, ChatResponse, Message, ReasoningService, ResponsePart, ServiceError, ToolCall,
    ToolMode,
};
use crate::trace::{record_trace, CallKind, TokenUsage, Trace};

/// Chat-completions client for OpenAI and compatible servers (vLLM, llama.cpp, ...).
pub struct OpenAiCompatClient {
    base_url: String,
    model: String,
    judge_model: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(config: &ServiceConfig, api_key: impl Into<String>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            judge_model: config.judge_model().to_string(),
            api_key: api_key.into(),
            temperature: config.temperature,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post(&self, kind: CallKind, model: &str, body: Value) -> Result<Value, ServiceError> {
        let trace = Trace::start(kind, model);
        let result = self.send(&body).await;
        match &result {
            Ok(response) => record_trace(trace.finish(body, response.clone(), usage_of(response))),
            Err(err) => record_trace(trace.finish_with_error(body, err.to_string())),
        }
        result
    }

    async fn send(&self, body: &Value) -> Result<Value, ServiceError> {
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ServiceError::Malformed(format!("response body is not JSON: {e}")))
    }
}

#[async_trait]
impl ReasoningService for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_json(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = json!({
            "model": self.judge_model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "response_format": {"type": "json_object"},
        });
        let response = self.post(CallKind::Judgment, &self.judge_model, body).await?;

        response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Malformed("response missing message content".into()))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ServiceError> {
        let mut messages = vec![json!({"role": "system", "content": request.system})];
        messages.extend(request.messages.iter().map(message_to_wire));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if !request.tools.is_empty() {
            body["tools"] = request.tools.iter().map(tool_to_wire).collect();
            body["tool_choice"] = json!(match request.tool_mode {
                ToolMode::Required => "required",
                ToolMode::Auto => "auto",
            });
        }

        let response = self.post(CallKind::Chat, &self.model, body).await?;
        parse_chat_response(&response)
    }
}

fn tool_to_wire(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": {
                "type": "object",
                "properties": {
                    (ToolSpec::ARGUMENT): {
                        "type": "string",
                        "description": "The full text to be graded.",
                    }
                },
                "required": [ToolSpec::ARGUMENT],
            },
        },
    })
}

fn message_to_wire(message: &Message) -> Value {
    match message {
        Message::User { text } => json!({"role": "user", "content": text}),
        Message::Assistant { parts } => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|p| match p {
                    ResponsePart::Text { text } => Some(text.as_str()),
                    ResponsePart::ToolCall(_) => None,
                })
                .collect();
            let calls: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ResponsePart::ToolCall(call) => Some(json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        },
                    })),
                    ResponsePart::Text { .. } => None,
                })
                .collect();

            let mut wire = json!({
                "role": "assistant",
                "content": if text.is_empty() { Value::Null } else { json!(text.join("\n")) },
            });
            if !calls.is_empty() {
                wire["tool_calls"] = Value::Array(calls);
            }
            wire
        }
        Message::ToolResult { call_id, name, content } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "name": name,
            "content": content.to_string(),
        }),
    }
}

fn parse_chat_response(response: &Value) -> Result<ChatResponse, ServiceError> {
    let message = response
        .pointer("/choices/0/message")
        .ok_or_else(|| ServiceError::Malformed("response missing choices[0].message".into()))?;

    let mut parts = Vec::new();
    let calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for (idx, call) in calls.iter().enumerate() {
        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::Malformed(format!("tool call {idx} has no name")))?;
        let id = call
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("call_{idx}"));
        let arguments = match call.pointer("/function/arguments") {
            Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::Null),
            Some(obj @ Value::Object(_)) => obj.clone(),
            _ => Value::Null,
        };
        parts.push(ResponsePart::ToolCall(ToolCall {
            id,
            name: name.to_string(),
            arguments,
        }));
    }

    // Narration sent alongside tool calls goes after them.
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            parts.push(ResponsePart::Text { text: text.to_string() });
        }
    }

    Ok(ChatResponse { parts })
}

fn usage_of(response: &Value) -> Option<TokenUsage> {
    let usage = response.get("usage")?;
    let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(TokenUsage {
        input_tokens: field("prompt_tokens"),
        output_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    })
}
