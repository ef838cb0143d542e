use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use judgecraft_types::{Criterion, RowSchema};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    /// Agents in flight per row.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pause between rows, for provider rate limits.
    #[serde(default = "default_row_delay_ms")]
    pub row_delay_ms: u64,
    #[serde(default)]
    pub schema: RowSchema,
    #[serde(default = "Criterion::defaults")]
    pub criteria: Vec<Criterion>,
}

fn default_workers() -> usize {
    3
}

fn default_row_delay_ms() -> u64 {
    1000
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            workers: default_workers(),
            row_delay_ms: default_row_delay_ms(),
            schema: RowSchema::default(),
            criteria: Criterion::defaults(),
        }
    }
}

impl JudgeConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: JudgeConfig =
            serde_yaml::from_str(content).context("Invalid judge configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("In {:?}", path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.criteria.is_empty() {
            return Err(anyhow!("at least one criterion must be configured"));
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        Ok(())
    }

    pub fn row_delay(&self) -> Duration {
        Duration::from_millis(self.row_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Model for judgment requests; falls back to `model`.
    #[serde(default)]
    pub judge_model: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            judge_model: None,
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServiceConfig {
    pub fn judge_model(&self) -> &str {
        self.judge_model.as_deref().unwrap_or(&self.model)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Read the API key once, at startup.
    pub fn api_key_from_env(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(anyhow!("{} environment variable not set", self.api_key_env)),
        }
    }
}
