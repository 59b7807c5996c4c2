use crate::config::SourceSettings;
use crate::models::{DailyUsageFact, ModelCost, TokenCounts, UsageFacts};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("usage command timed out after {0:?}")]
    Timeout(Duration),

    #[error("usage command exited with status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("usage command returned unparsable output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Anything that can produce day-keyed usage facts from a start date onwards.
#[async_trait]
pub trait UsageSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_since(&self, since: NaiveDate) -> Result<UsageFacts, SourceError>;
}

#[derive(Debug, Deserialize)]
struct DailyReport {
    #[serde(default)]
    daily: Vec<DailyRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyRow {
    date: NaiveDate,
    #[serde(default)]
    total_cost: f64,
    #[serde(default)]
    models_used: Vec<String>,
    #[serde(default)]
    model_breakdowns: Vec<BreakdownRow>,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_tokens: u64,
    #[serde(default)]
    cache_creation_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BreakdownRow {
    #[serde(default)]
    model_name: String,
    #[serde(default)]
    cost: f64,
}

impl From<DailyRow> for DailyUsageFact {
    fn from(row: DailyRow) -> Self {
        let mut fact = DailyUsageFact::empty(row.date);
        fact.total_cost = row.total_cost.max(0.0);
        fact.models_used.extend(row.models_used);
        fact.tokens = TokenCounts {
            input: row.input_tokens,
            output: row.output_tokens,
            cache_read: row.cache_read_tokens,
            cache_write: row.cache_creation_tokens,
        };
        for b in row.model_breakdowns {
            if !b.model_name.is_empty() {
                fact.models_used.insert(b.model_name.clone());
            }
            fact.model_costs.push(ModelCost {
                model: b.model_name,
                cost: b.cost.max(0.0),
            });
        }
        fact
    }
}

/// Parses the `daily --json` report. A later row for the same date replaces
/// an earlier one.
pub fn parse_daily_report(raw: &str) -> Result<UsageFacts, SourceError> {
    let report: DailyReport = serde_json::from_str(raw.trim())?;
    Ok(report
        .daily
        .into_iter()
        .map(|row| (row.date, DailyUsageFact::from(row)))
        .collect())
}

/// Runs the external usage-reporting CLI as a subprocess with a hard timeout.
pub struct CommandSource {
    settings: SourceSettings,
}

impl CommandSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self { settings }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_seconds.max(1))
    }
}

#[async_trait]
impl UsageSource for CommandSource {
    fn name(&self) -> &str {
        &self.settings.command
    }

    async fn fetch_since(&self, since: NaiveDate) -> Result<UsageFacts, SourceError> {
        let since_arg = since.format("%Y%m%d").to_string();
        tracing::debug!(command = %self.settings.command, since = %since_arg, "fetching usage");

        let child = Command::new(&self.settings.command)
            .args(&self.settings.args)
            .arg("--since")
            .arg(&since_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SourceError::Spawn {
                command: self.settings.command.clone(),
                source,
            })?;

        let timeout = self.timeout();
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| SourceError::Timeout(timeout))?
            .map_err(|source| SourceError::Spawn {
                command: self.settings.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let facts = parse_daily_report(&String::from_utf8_lossy(&output.stdout))?;
        tracing::debug!(days = facts.len(), "usage fetched");
        Ok(facts)
    }
}
