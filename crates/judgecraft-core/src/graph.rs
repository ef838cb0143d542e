//! Merged critique graph of one row.
//!
//! Each criterion contributes its edge list; nodes are shared by label and
//! tagged with the first criterion that mentioned them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use judgecraft_types::{AgentRunRecord, GraphPayload, Row, RowSchema};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

const FALLBACK_COLOR: &str = "#CCCCCC";

/// Fill colour used for nodes first mentioned by `criterion`.
pub fn criterion_color(criterion: &str) -> &'static str {
    match criterion {
        "Accuracy" => "#FF9999",
        "Completeness" => "#99CCFF",
        "Empathy" => "#99FF99",
        _ => FALLBACK_COLOR,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptNode {
    pub label: String,
    pub criterion: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub label: String,
    pub criterion: String,
}

#[derive(Debug, Default)]
pub struct CritiqueGraph {
    graph: DiGraph<ConceptNode, Relation>,
    by_label: HashMap<String, NodeIndex>,
}

impl CritiqueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the `<Criterion>_graph` columns of a flat output row, in the
    /// order of `criteria`. Missing, empty or unparsable columns are skipped.
    pub fn from_flat_row(flat: &Map<String, Value>, criteria: &[String]) -> Self {
        let mut graph = Self::new();
        for criterion in criteria {
            let column = AgentRunRecord::graph_column(criterion);
            let raw = match flat.get(&column) {
                Some(Value::String(s)) if !s.trim().is_empty() => s,
                _ => continue,
            };
            match serde_json::from_str::<GraphPayload>(raw) {
                Ok(payload) => graph.merge(criterion, &payload),
                Err(err) => warn!(column = %column, error = %err, "skipping unparsable graph column"),
            }
        }
        graph
    }

    pub fn merge(&mut self, criterion: &str, payload: &GraphPayload) {
        for edge in &payload.edges {
            self.add_relation(&edge.source, &edge.target, &edge.relationship, criterion);
        }
    }

    /// Edges with an empty endpoint are ignored.
    pub fn add_relation(&mut self, source: &str, target: &str, relationship: &str, criterion: &str) {
        if source.is_empty() || target.is_empty() {
            return;
        }
        let from = self.node(source, criterion);
        let to = self.node(target, criterion);
        self.graph.add_edge(
            from,
            to,
            Relation {
                label: relationship.to_string(),
                criterion: criterion.to_string(),
            },
        );
    }

    fn node(&mut self, label: &str, criterion: &str) -> NodeIndex {
        if let Some(&idx) = self.by_label.get(label) {
            return idx;
        }
        let idx = self.graph.add_node(ConceptNode {
            label: label.to_string(),
            criterion: criterion.to_string(),
        });
        self.by_label.insert(label.to_string(), idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn concept(&self, label: &str) -> Option<&ConceptNode> {
        let idx = self.by_label.get(label)?;
        self.graph.node_weight(*idx)
    }

    /// Graphviz source; nodes are filled by criterion, edges carry their
    /// relationship as label.
    pub fn to_dot(&self, title: &str) -> String {
        let mut dot = String::from("digraph critique {\n");
        dot.push_str(&format!("  label=\"{}\";\n", escape(title)));
        dot.push_str("  node [shape=ellipse, style=filled, fontname=\"sans-serif\"];\n");
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            dot.push_str(&format!(
                "  n{} [label=\"{}\", fillcolor=\"{}\", tooltip=\"{}\"];\n",
                idx.index(),
                escape(&node.label),
                criterion_color(&node.criterion),
                escape(&node.criterion)
            ));
        }
        for edge in self.graph.edge_references() {
            dot.push_str(&format!(
                "  n{} -> n{} [label=\"{}\"];\n",
                edge.source().index(),
                edge.target().index(),
                escape(&edge.weight().label)
            ));
        }
        dot.push_str("}\n");
        dot
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Row id reduced to characters that are safe in a file name.
fn file_label(id: &str) -> String {
    let label: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if label.is_empty() {
        "Unknown".to_string()
    } else {
        label
    }
}

/// Write `graph_id_<id>.dot` into `out_dir` for every flat row whose merged
/// graph is non-empty. Returns the written paths.
pub async fn write_row_graphs(
    rows: &[Map<String, Value>],
    criteria: &[String],
    schema: &RowSchema,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", out_dir))?;

    let mut written = Vec::new();
    for flat in rows {
        let id = Row::new(flat.clone()).id_label(schema);
        let graph = CritiqueGraph::from_flat_row(flat, criteria);
        if graph.is_empty() {
            debug!(row_id = %id, "graph is empty, no file written");
            continue;
        }

        let path = out_dir.join(format!("graph_id_{}.dot", file_label(&id)));
        let dot = graph.to_dot(&format!("Critique Graph for Answer #{id}"));
        tokio::fs::write(&path, dot)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!(row_id = %id, nodes = graph.node_count(), edges = graph.edge_count(), "graph written");
        written.push(path);
    }
    Ok(written)
}
