//! judgecraft-core: multi-agent criterion judging.
//! Each row is judged by one agent per criterion; every agent is forced to
//! call its grading tool, and the verdicts are merged back into the row.
//! See `examples/stub_batch.rs` for a quickstart.

pub mod agent;
pub mod config;
pub mod datasource;
pub mod export;
pub mod graph;
pub mod judge;
pub mod orchestrator;
pub mod protocol;
pub mod providers;
pub mod report;
pub mod runner;
pub mod service;
pub mod testing;
pub mod trace;

pub use agent::{define_agent, Agent, AgentHandle, AgentPanel, ToolCallback, ToolOutcome};
pub use config::{JudgeConfig, ServiceConfig};
pub use datasource::{JsonlRowSource, RowSource, VecRowSource};
pub use graph::CritiqueGraph;
pub use judge::Judge;
pub use orchestrator::evaluate_row;
pub use protocol::{execute, AgentRun, ProtocolState};
pub use providers::OpenAiCompatClient;
pub use report::generate_html_report;
pub use runner::{Batch, BatchBuilder};
pub use service::{ChatRequest, ChatResponse, ReasoningService, ServiceError, ToolMode};

pub use judgecraft_types::{
    AgentRunRecord, BatchResult, BatchSummary, Criterion, CriterionSummary, EnrichedRow,
    GraphEdge, GraphNode, GraphPayload, JudgmentResult, Row, RowSchema, ToolSpec, Trace,
};
