use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use judgecraft_types::{BatchResult, EnrichedRow, Row, RowSchema};
use tracing::info;

use crate::agent::AgentPanel;
use crate::datasource::RowSource;
use crate::orchestrator::evaluate_row;

pub struct BatchBuilder {
	row_source: Option<Arc<dyn RowSource>>,
	panel: Option<AgentPanel>,
	schema: RowSchema,
	workers: usize,
	row_delay: Duration,
}

impl Default for BatchBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl BatchBuilder {
	pub fn new() -> Self {
		Self {
			row_source: None,
			panel: None,
			schema: RowSchema::default(),
			workers: 3,
			row_delay: Duration::from_secs(1),
		}
	}

	pub fn row_source(mut self, row_source: Arc<dyn RowSource>) -> Self {
		self.row_source = Some(row_source);
		self
	}

	pub fn panel(mut self, panel: AgentPanel) -> Self {
		self.panel = Some(panel);
		self
	}

	pub fn schema(mut self, schema: RowSchema) -> Self {
		self.schema = schema;
		self
	}

	/// Agents in flight per row.
	pub fn workers(mut self, n: usize) -> Self {
		self.workers = n.max(1);
		self
	}

	/// Pause between consecutive rows.
	pub fn row_delay(mut self, delay: Duration) -> Self {
		self.row_delay = delay;
		self
	}

	pub fn build(self) -> Result<Batch> {
		let panel = self.panel.ok_or_else(|| anyhow::anyhow!("panel must be set"))?;
		if panel.is_empty() {
			anyhow::bail!("panel has no agents");
		}
		Ok(Batch {
			row_source: self.row_source.ok_or_else(|| anyhow::anyhow!("row_source must be set"))?,
			panel,
			schema: self.schema,
			workers: self.workers,
			row_delay: self.row_delay,
		})
	}
}

pub struct Batch {
	row_source: Arc<dyn RowSource>,
	panel: AgentPanel,
	schema: RowSchema,
	workers: usize,
	row_delay: Duration,
}

impl Batch {
	pub fn builder() -> BatchBuilder {
		BatchBuilder::new()
	}

	/// Load every row, then judge them one at a time in input order.
	pub async fn run(&self) -> Result<BatchResult> {
		let rows = self.row_source.load().await?;
		info!(rows = rows.len(), criteria = self.panel.len(), "batch started");

		let enriched = self.run_rows(rows).await;
		let summary = BatchResult::summarize(&enriched, &self.panel.criterion_names());
		info!(rows = summary.total_rows, "batch finished");

		Ok(BatchResult {
			schema: self.schema.clone(),
			rows: enriched,
			summary,
		})
	}

	async fn run_rows(&self, rows: Vec<Row>) -> Vec<EnrichedRow> {
		let total = rows.len();
		let mut results = Vec::with_capacity(total);

		for (position, mut row) in rows.into_iter().enumerate() {
			row.ensure_id(&self.schema, position);
			let enriched = evaluate_row(&row, &self.schema, &self.panel, self.workers).await;
			results.push(enriched);

			if position + 1 < total && !self.row_delay.is_zero() {
				tokio::time::sleep(self.row_delay).await;
			}
		}

		results
	}
}
