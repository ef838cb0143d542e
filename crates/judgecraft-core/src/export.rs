use std::path::Path;

use anyhow::{Context, Result};
use judgecraft_types::BatchResult;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::datasource::parse_jsonl_rows;

/// One line of the trace file.
#[derive(Debug, Serialize)]
struct TraceLine<'a> {
    row_id: String,
    criterion: &'a str,
    traces: &'a [judgecraft_types::Trace],
}

pub fn render_jsonl<T: Serialize>(items: &[T]) -> Result<String> {
    let mut out = String::new();
    for item in items {
        out.push_str(&serde_json::to_string(item)?);
        out.push('\n');
    }
    Ok(out)
}

/// Write the flattened rows of `result` in input order, in one go.
pub async fn write_rows(path: &Path, result: &BatchResult) -> Result<()> {
    let body = render_jsonl(&result.flat_rows())?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {:?}", path))
}

/// One line per (row, criterion) that recorded traces.
pub async fn write_traces(path: &Path, result: &BatchResult) -> Result<usize> {
    let mut lines = Vec::new();
    for row in &result.rows {
        let row_id = row.row.id_label(&result.schema);
        for (criterion, traces) in &row.traces {
            lines.push(TraceLine {
                row_id: row_id.clone(),
                criterion,
                traces,
            });
        }
    }
    let body = render_jsonl(&lines)?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(lines.len())
}

/// Read back a file produced by [`write_rows`].
pub async fn read_rows(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    Ok(parse_jsonl_rows(&content)?.into_iter().map(|r| r.into_fields()).collect())
}
