use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tabled::Tabled;

/// Reason recorded when an agent answered without calling its grading tool.
pub const FAILED_TO_RUN: &str = "Failed to run";

/// Prefix of reasons recorded when an agent run errored.
pub const ERROR_PREFIX: &str = "Error:";

/// Prefix of explanations produced by a degraded judgment.
pub const JUDGE_CRASHED_PREFIX: &str = "Judge crashed:";

/// Serialized form of an empty reasoning graph.
pub const EMPTY_GRAPH_JSON: &str = r#"{"nodes":[],"edges":[]}"#;

/// Which kind of reasoning-service call a trace describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
	/// A conversational turn of a criterion agent.
	Chat,
	/// A single-shot JSON judgment request.
	Judgment,
}

/// Trace data for a single call to the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
	pub kind: CallKind,

	/// Model the request was addressed to
	pub model: String,

	pub started_at: SystemTime,

	/// Wall-clock duration of the call in milliseconds
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_ms: Option<u64>,

	/// Request body as sent on the wire
	pub request: Value,

	/// Response body, `null` when the call failed
	pub response: Value,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage: Option<TokenUsage>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
	pub input_tokens: u32,
	pub output_tokens: u32,
	pub total_tokens: u32,
}

impl Trace {
	/// Start timing a call of the given kind.
	pub fn start(kind: CallKind, model: impl Into<String>) -> TraceBuilder {
		TraceBuilder {
			kind,
			model: model.into(),
			started_at: SystemTime::now(),
		}
	}
}

/// In-flight trace; consumed by `finish` or `finish_with_error`.
pub struct TraceBuilder {
	kind: CallKind,
	model: String,
	started_at: SystemTime,
}

impl TraceBuilder {
	fn elapsed_ms(&self) -> Option<u64> {
		SystemTime::now()
			.duration_since(self.started_at)
			.ok()
			.map(|d| d.as_millis() as u64)
	}

	pub fn finish(self, request: Value, response: Value, usage: Option<TokenUsage>) -> Trace {
		let duration_ms = self.elapsed_ms();
		Trace {
			kind: self.kind,
			model: self.model,
			started_at: self.started_at,
			duration_ms,
			request,
			response,
			usage,
			error: None,
		}
	}

	pub fn finish_with_error(self, request: Value, error: impl Into<String>) -> Trace {
		let duration_ms = self.elapsed_ms();
		Trace {
			kind: self.kind,
			model: self.model,
			started_at: self.started_at,
			duration_ms,
			request,
			response: Value::Null,
			usage: None,
			error: Some(error.into()),
		}
	}
}

/// The single grading tool an agent is forced to call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
	pub name: String,
	pub description: String,
}

impl ToolSpec {
	/// Name of the tool's only argument.
	pub const ARGUMENT: &'static str = "text_content";

	pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
		Self { name: name.into(), description: description.into() }
	}
}

/// A named dimension of evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
	pub name: String,
	pub description: String,
	pub tool: ToolSpec,
}

impl Criterion {
	pub fn new(name: impl Into<String>, description: impl Into<String>, tool: ToolSpec) -> Self {
		Self { name: name.into(), description: description.into(), tool }
	}

	/// Accuracy, Completeness and Empathy.
	pub fn defaults() -> Vec<Criterion> {
		vec![
			Criterion::new(
				"Accuracy",
				"Factually accurate, citing correct numbers.",
				ToolSpec::new("check_accuracy", "Validates if the text is factually correct."),
			),
			Criterion::new(
				"Completeness",
				"Addresses every aspect of the question.",
				ToolSpec::new("check_completeness", "Checks if the text answers all parts comprehensively."),
			),
			Criterion::new(
				"Empathy",
				"Tone is warm, understanding, and human-like.",
				ToolSpec::new("check_empathy", "Checks if the tone is appropriate and supportive."),
			),
		]
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
	#[serde(default, deserialize_with = "lenient_label")]
	pub id: String,
	#[serde(rename = "type", default, deserialize_with = "lenient_label")]
	pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
	#[serde(default, deserialize_with = "lenient_label")]
	pub source: String,
	#[serde(default, deserialize_with = "lenient_label")]
	pub target: String,
	#[serde(default = "default_relationship", deserialize_with = "lenient_relationship")]
	pub relationship: String,
}

fn default_relationship() -> String {
	"relates".to_string()
}

impl GraphNode {
	/// A bare string is taken as an untyped node label.
	fn from_loose(value: Value) -> Option<Self> {
		match value {
			Value::String(id) if !id.is_empty() => Some(Self { id, kind: String::new() }),
			object @ Value::Object(_) => serde_json::from_value(object).ok(),
			_ => None,
		}
	}
}

impl GraphEdge {
	fn from_loose(value: Value) -> Option<Self> {
		match value {
			object @ Value::Object(_) => serde_json::from_value(object).ok(),
			_ => None,
		}
	}
}

/// Verdict for one (criterion, content) pair.
///
/// Deserialization is forgiving: missing or `null` fields take their
/// defaults, the score is normalized to 0 or 1, and graph elements that are
/// not usable are dropped without affecting score or explanation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentResult {
	#[serde(default, deserialize_with = "deserialize_score")]
	pub score: u8,
	#[serde(default, deserialize_with = "lenient_label")]
	pub explanation: String,
	#[serde(default, deserialize_with = "lenient_nodes")]
	pub graph_nodes: Vec<GraphNode>,
	#[serde(default, deserialize_with = "lenient_edges")]
	pub graph_edges: Vec<GraphEdge>,
}

impl JudgmentResult {
	/// Score 0 with the failure cause as explanation and an empty graph.
	pub fn degraded(cause: impl fmt::Display) -> Self {
		Self {
			score: 0,
			explanation: format!("{JUDGE_CRASHED_PREFIX} {cause}"),
			graph_nodes: Vec::new(),
			graph_edges: Vec::new(),
		}
	}
}

/// Map any JSON score representation to 0 or 1.
pub fn normalize_score(value: &Value) -> u8 {
	let passed = match value {
		Value::Bool(b) => *b,
		Value::Number(n) => n.as_f64().is_some_and(|x| x >= 1.0),
		Value::String(s) => s.trim().parse::<f64>().is_ok_and(|x| x >= 1.0),
		_ => false,
	};
	u8::from(passed)
}

fn deserialize_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
	let value = Value::deserialize(deserializer)?;
	Ok(normalize_score(&value))
}

fn array_items(value: Value) -> Vec<Value> {
	match value {
		Value::Array(items) => items,
		_ => Vec::new(),
	}
}

fn lenient_nodes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<GraphNode>, D::Error> {
	let items = array_items(Value::deserialize(deserializer)?);
	Ok(items.into_iter().filter_map(GraphNode::from_loose).collect())
}

fn lenient_edges<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<GraphEdge>, D::Error> {
	let items = array_items(Value::deserialize(deserializer)?);
	Ok(items.into_iter().filter_map(GraphEdge::from_loose).collect())
}

fn lenient_label<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
	Ok(match Value::deserialize(deserializer)? {
		Value::String(s) => s,
		Value::Null => String::new(),
		other => other.to_string(),
	})
}

fn lenient_relationship<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
	let label = lenient_label(deserializer)?;
	Ok(if label.is_empty() { default_relationship() } else { label })
}

/// The `{nodes, edges}` pair stored in a `<Criterion>_graph` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphPayload {
	#[serde(default, deserialize_with = "lenient_nodes")]
	pub nodes: Vec<GraphNode>,
	#[serde(default, deserialize_with = "lenient_edges")]
	pub edges: Vec<GraphEdge>,
}

impl GraphPayload {
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty() && self.edges.is_empty()
	}

	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|_| EMPTY_GRAPH_JSON.to_string())
	}
}

/// Outcome of one agent on one row; flattened into three columns on export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunRecord {
	pub grade: u8,
	pub reason: String,
	pub graph: GraphPayload,
}

impl AgentRunRecord {
	pub fn failed_to_run() -> Self {
		Self { grade: 0, reason: FAILED_TO_RUN.to_string(), graph: GraphPayload::default() }
	}

	pub fn errored(cause: impl fmt::Display) -> Self {
		Self {
			grade: 0,
			reason: format!("{ERROR_PREFIX} {cause}"),
			graph: GraphPayload::default(),
		}
	}

	/// True when the reason carries one of the failure markers.
	pub fn is_failure(&self) -> bool {
		self.reason == FAILED_TO_RUN
			|| self.reason.starts_with(ERROR_PREFIX)
			|| self.reason.starts_with(JUDGE_CRASHED_PREFIX)
	}

	pub fn grade_column(criterion: &str) -> String {
		format!("{criterion}_grade")
	}

	pub fn reason_column(criterion: &str) -> String {
		format!("{criterion}_reason")
	}

	pub fn graph_column(criterion: &str) -> String {
		format!("{criterion}_graph")
	}
}

/// Names of the identifier and subject-text fields of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
	#[serde(default = "default_id_field")]
	pub id_field: String,
	#[serde(default = "default_text_field")]
	pub text_field: String,
}

fn default_id_field() -> String {
	"id".to_string()
}

fn default_text_field() -> String {
	"Answer".to_string()
}

impl Default for RowSchema {
	fn default() -> Self {
		Self { id_field: default_id_field(), text_field: default_text_field() }
	}
}

/// One input record: an ordered field name → value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
	fields: Map<String, Value>,
}

impl Row {
	pub fn new(fields: Map<String, Value>) -> Self {
		Self { fields }
	}

	/// `None` unless the value is a JSON object.
	pub fn from_value(value: Value) -> Option<Self> {
		match value {
			Value::Object(fields) => Some(Self { fields }),
			_ => None,
		}
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.fields.get(field)
	}

	pub fn fields(&self) -> &Map<String, Value> {
		&self.fields
	}

	pub fn into_fields(self) -> Map<String, Value> {
		self.fields
	}

	/// Subject text; non-string values are rendered as JSON, missing as "".
	pub fn text(&self, schema: &RowSchema) -> String {
		match self.fields.get(&schema.text_field) {
			Some(Value::String(s)) => s.clone(),
			Some(Value::Null) | None => String::new(),
			Some(other) => other.to_string(),
		}
	}

	pub fn id_label(&self, schema: &RowSchema) -> String {
		match self.fields.get(&schema.id_field) {
			Some(Value::String(s)) => s.clone(),
			Some(Value::Null) | None => "Unknown".to_string(),
			Some(other) => other.to_string(),
		}
	}

	/// Insert the row position as identifier when the row has none.
	pub fn ensure_id(&mut self, schema: &RowSchema, position: usize) {
		if !self.fields.contains_key(&schema.id_field) {
			self.fields.insert(schema.id_field.clone(), Value::from(position));
		}
	}
}

/// A row together with the records of every criterion that judged it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRow {
	pub row: Row,
	pub evaluations: BTreeMap<String, AgentRunRecord>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub traces: BTreeMap<String, Vec<Trace>>,
}

impl EnrichedRow {
	pub fn record(&self, criterion: &str) -> Option<&AgentRunRecord> {
		self.evaluations.get(criterion)
	}

	/// Original fields followed by `<Criterion>_grade`, `_reason` and `_graph`.
	pub fn to_flat_row(&self) -> Map<String, Value> {
		let mut flat = self.row.fields().clone();
		for (criterion, record) in &self.evaluations {
			flat.insert(AgentRunRecord::grade_column(criterion), Value::from(record.grade));
			flat.insert(AgentRunRecord::reason_column(criterion), Value::from(record.reason.clone()));
			flat.insert(AgentRunRecord::graph_column(criterion), Value::from(record.graph.to_json()));
		}
		flat
	}

	fn average_grade(&self) -> f64 {
		if self.evaluations.is_empty() {
			return 0.0;
		}
		let sum: u32 = self.evaluations.values().map(|r| u32::from(r.grade)).sum();
		sum as f64 / self.evaluations.len() as f64
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionSummary {
	pub criterion: String,
	pub passed: usize,
	/// Records carrying a failure marker rather than a real verdict.
	pub failed_runs: usize,
	pub pass_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
	pub total_rows: usize,
	pub criteria: Vec<CriterionSummary>,
}

impl BatchSummary {
	pub fn criterion(&self, name: &str) -> Option<&CriterionSummary> {
		self.criteria.iter().find(|c| c.criterion == name)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
	pub schema: RowSchema,
	pub rows: Vec<EnrichedRow>,
	pub summary: BatchSummary,
}

#[derive(Debug, Clone, Tabled)]
struct SummaryRow {
	id: String,
	grades: String,
	avg_grade: f64,
	text: String,
}

#[derive(Debug, Clone, Tabled)]
struct CriterionRow {
	criterion: String,
	passed: usize,
	failed_runs: usize,
	pass_rate: String,
}

impl BatchResult {
	pub fn summarize(rows: &[EnrichedRow], criteria: &[String]) -> BatchSummary {
		let total_rows = rows.len();
		let criteria = criteria
			.iter()
			.map(|name| {
				let records: Vec<&AgentRunRecord> =
					rows.iter().filter_map(|row| row.record(name)).collect();
				let passed = records.iter().filter(|r| r.grade == 1).count();
				let failed_runs = records.iter().filter(|r| r.is_failure()).count();
				let pass_rate = if total_rows == 0 { 0.0 } else { passed as f64 / total_rows as f64 };
				CriterionSummary { criterion: name.clone(), passed, failed_runs, pass_rate }
			})
			.collect();

		BatchSummary { total_rows, criteria }
	}

	/// Flattened output rows in input order.
	pub fn flat_rows(&self) -> Vec<Map<String, Value>> {
		self.rows.iter().map(EnrichedRow::to_flat_row).collect()
	}

	pub fn summary_table(&self) -> String {
		use tabled::Table;
		let rows: Vec<SummaryRow> = self.rows.iter().map(|er| {
			let grades = er
				.evaluations
				.iter()
				.map(|(name, record)| format!("{name}={}", record.grade))
				.collect::<Vec<_>>()
				.join(" ");
			SummaryRow {
				id: er.row.id_label(&self.schema),
				grades,
				avg_grade: er.average_grade(),
				text: truncate(er.row.text(&self.schema), 64),
			}
		}).collect();

		let criteria: Vec<CriterionRow> = self.summary.criteria.iter().map(|c| CriterionRow {
			criterion: c.criterion.clone(),
			passed: c.passed,
			failed_runs: c.failed_runs,
			pass_rate: format!("{:.1}%", c.pass_rate * 100.0),
		}).collect();

		format!(
			"{}\n\n{}\n\nRows: {}\n",
			Table::new(rows),
			Table::new(criteria),
			self.summary.total_rows
		)
	}
}

fn truncate(s: String, max_len: usize) -> String {
	if s.chars().count() <= max_len {
		return s;
	}
	let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
	truncated.push('…');
	truncated
}
