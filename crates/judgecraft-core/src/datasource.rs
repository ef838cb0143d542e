use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use judgecraft_types::Row;
use serde_json::Value;

#[async_trait]
pub trait RowSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Row>>;
}

pub struct VecRowSource {
    rows: Vec<Row>,
}

impl VecRowSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Rows from JSON objects; fails on the first non-object value.
    pub fn from_values(values: Vec<Value>) -> Result<Self> {
        let rows = values
            .into_iter()
            .enumerate()
            .map(|(idx, v)| Row::from_value(v).ok_or_else(|| anyhow!("Row {}: expected object", idx)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rows })
    }
}

#[async_trait]
impl RowSource for VecRowSource {
    async fn load(&self) -> Result<Vec<Row>> {
        Ok(self.rows.clone())
    }
}

/// Read JSONL where each non-blank line is one JSON object, e.g.
/// `{"id": 101, "Answer": "The sun is cold and blue."}`.
pub struct JsonlRowSource {
    path: PathBuf,
}

impl JsonlRowSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RowSource for JsonlRowSource {
    async fn load(&self) -> Result<Vec<Row>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        parse_jsonl_rows(&content)
    }
}

pub fn parse_jsonl_rows(content: &str) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("Invalid JSON on line {}", idx + 1))?;
        let row = Row::from_value(value).ok_or_else(|| anyhow!("Line {}: expected object", idx + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use judgecraft_types::RowSchema;
    use std::io::Write;

    #[test]
    fn skips_blank_lines_and_keeps_field_order() {
        let rows = parse_jsonl_rows("{\"id\": 1, \"Answer\": \"a\"}\n\n  \n{\"Answer\": \"b\", \"id\": 2}\n").unwrap();
        assert_eq!(rows.len(), 2);
        let keys: Vec<_> = rows[1].fields().keys().cloned().collect();
        assert_eq!(keys, ["Answer", "id"]);
        assert_eq!(rows[1].text(&RowSchema::default()), "b");
    }

    #[test]
    fn reports_line_of_bad_input() {
        let err = parse_jsonl_rows("{\"id\": 1}\n[1,2]\n").unwrap_err();
        assert!(err.to_string().contains("Line 2"));
        let err = parse_jsonl_rows("{oops").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[tokio::test]
    async fn loads_rows_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": 101, "Answer": "The sun is cold and blue."}}"#).unwrap();
        let rows = JsonlRowSource::new(file.path()).load().await.unwrap();
        assert_eq!(rows[0].id_label(&RowSchema::default()), "101");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let source = JsonlRowSource::new("/definitely/not/here.jsonl");
        assert!(source.load().await.is_err());
    }

    #[test]
    fn vec_source_rejects_non_objects() {
        assert!(VecRowSource::from_values(vec![serde_json::json!("text")]).is_err());
    }
}
