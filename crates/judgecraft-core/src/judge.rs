use std::sync::{Arc, OnceLock};

use judgecraft_types::JudgmentResult;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::service::{ReasoningService, ServiceError};

#[derive(Debug, Error)]
enum JudgeError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("response is not valid JSON: {0}")]
    NotJson(serde_json::Error),
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("response has an unexpected shape: {0}")]
    Shape(serde_json::Error),
}

/// Single-shot criterion judgment against the reasoning service.
///
/// Never fails: every error becomes a score-0 [`JudgmentResult::degraded`].
#[derive(Clone)]
pub struct Judge {
    service: Arc<dyn ReasoningService>,
}

impl Judge {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }

    pub async fn judge(
        &self,
        criterion_name: &str,
        criterion_description: &str,
        content: &str,
    ) -> JudgmentResult {
        let prompt = judgment_prompt(criterion_name, criterion_description, content);
        match self.request(&prompt).await {
            Ok(result) => {
                debug!(criterion = %criterion_name, score = result.score, "judgment received");
                result
            }
            Err(err) => {
                warn!(criterion = %criterion_name, error = %err, "judgment degraded");
                JudgmentResult::degraded(err)
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<JudgmentResult, JudgeError> {
        let raw = self.service.generate_json(prompt).await?;
        parse_judgment(&raw)
    }
}

pub fn judgment_prompt(criterion_name: &str, criterion_description: &str, content: &str) -> String {
    format!(
        r#"ROLE: Specialized Evaluator for {criterion_name}.
TASK: Analyze the "Content" against the "Criteria".

CRITERIA DESCRIPTION: {criterion_description}
CONTENT: {content}

OUTPUT FORMAT: Return a valid JSON object with exactly these fields:
1. "score": 1 (Pass) or 0 (Fail).
2. "explanation": A brief explanation.
3. "graph_nodes": A list of objects {{"id": "concept_or_claim", "type": "tag"}}.
   - Extract key concepts from the text relevant to the critique.
4. "graph_edges": A list of objects {{"source": "id", "target": "id", "relationship": "verb"}}.
   - Map the logic. E.g., "Input Text" -> "LACKS" -> "{criterion_name}".
"#
    )
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("fence pattern is valid")
    })
}

fn parse_judgment(raw: &str) -> Result<JudgmentResult, JudgeError> {
    let body = match code_fence().captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    };
    let value: Value = serde_json::from_str(body).map_err(JudgeError::NotJson)?;
    if !value.is_object() {
        return Err(JudgeError::NotAnObject);
    }
    serde_json::from_value(value).map_err(JudgeError::Shape)
}
