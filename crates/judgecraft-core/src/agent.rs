use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use judgecraft_types::{AgentRunRecord, Criterion, GraphEdge, GraphNode, GraphPayload, ToolSpec};
use serde::Serialize;
use tracing::debug;

use crate::judge::Judge;
use crate::service::{ReasoningService, ToolCall};

/// Reusable, read-only half of an agent: persona, forced tool and the
/// service it converses with. Shared across rows.
#[derive(Clone)]
pub struct AgentHandle {
    pub name: String,
    pub tool: ToolSpec,
    pub persona: String,
    service: Arc<dyn ReasoningService>,
}

impl AgentHandle {
    pub fn service(&self) -> &Arc<dyn ReasoningService> {
        &self.service
    }
}

/// Local handler run when the agent calls its grading tool.
#[derive(Clone)]
pub struct ToolCallback {
    criterion_name: String,
    criterion_description: String,
    judge: Judge,
}

/// Payload returned by [`ToolCallback::invoke`] and echoed back to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub status: &'static str,
    pub judgment_score: u8,
    pub judgment_reason: String,
    pub graph_nodes: Vec<GraphNode>,
    pub graph_edges: Vec<GraphEdge>,
}

impl ToolOutcome {
    pub fn to_record(&self) -> AgentRunRecord {
        AgentRunRecord {
            grade: self.judgment_score,
            reason: self.judgment_reason.clone(),
            graph: GraphPayload {
                nodes: self.graph_nodes.clone(),
                edges: self.graph_edges.clone(),
            },
        }
    }
}

impl ToolCallback {
    /// Judge the text the model passed to the tool, or `context_text` when
    /// it passed none. Calls the reasoning service exactly once.
    pub async fn invoke(&self, call: &ToolCall, context_text: &str) -> ToolOutcome {
        debug!(criterion = %self.criterion_name, tool = %call.name, "judging");
        let input = call.string_arg(ToolSpec::ARGUMENT).unwrap_or(context_text);

        let result = self
            .judge
            .judge(&self.criterion_name, &self.criterion_description, input)
            .await;

        ToolOutcome {
            status: "success",
            judgment_score: result.score,
            judgment_reason: result.explanation,
            graph_nodes: result.graph_nodes,
            graph_edges: result.graph_edges,
        }
    }
}

pub fn validator_persona(name: &str, tool: &ToolSpec) -> String {
    format!(
        "ROLE: {name} Validator.\n\
         TASK: You are a classifier.\n\
         1. Receive user text.\n\
         2. IMMEDIATELY call the function '{tool}'.\n\
         3. Pass the user text into the tool's '{arg}' argument.\n",
        tool = tool.name,
        arg = ToolSpec::ARGUMENT,
    )
}

/// Bind a criterion to a validator persona and its grading tool.
pub fn define_agent(
    criterion: &Criterion,
    service: Arc<dyn ReasoningService>,
    judge: Judge,
) -> (AgentHandle, ToolCallback) {
    let handle = AgentHandle {
        name: criterion.name.clone(),
        tool: criterion.tool.clone(),
        persona: validator_persona(&criterion.name, &criterion.tool),
        service,
    };
    let callback = ToolCallback {
        criterion_name: criterion.name.clone(),
        criterion_description: criterion.description.clone(),
        judge,
    };
    (handle, callback)
}

#[derive(Clone)]
pub struct Agent {
    pub handle: AgentHandle,
    pub callback: ToolCallback,
}

impl Agent {
    pub fn name(&self) -> &str {
        &self.handle.name
    }
}

/// The active agents of a batch, one per criterion, in configuration order.
#[derive(Clone)]
pub struct AgentPanel {
    agents: Vec<Agent>,
}

impl AgentPanel {
    /// `chat` drives the agent conversations, `judge` answers the judgment
    /// requests. They may be the same service.
    pub fn new(
        criteria: &[Criterion],
        chat: Arc<dyn ReasoningService>,
        judge: Arc<dyn ReasoningService>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        let judge = Judge::new(judge);
        let mut agents = Vec::with_capacity(criteria.len());
        for criterion in criteria {
            if !seen.insert(criterion.name.as_str()) {
                bail!("duplicate criterion: {}", criterion.name);
            }
            let (handle, callback) = define_agent(criterion, chat.clone(), judge.clone());
            agents.push(Agent { handle, callback });
        }
        Ok(Self { agents })
    }

    pub fn with_service(criteria: &[Criterion], service: Arc<dyn ReasoningService>) -> Result<Self> {
        Self::new(criteria, service.clone(), service)
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn criterion_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
