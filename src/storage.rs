use crate::error::AppError;
use crate::models::{HistoryFacts, HistoryRow, UsageFacts};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, types::Type, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Local day-keyed history, written by `sync` and read as the fallback
/// source for days the usage command no longer reports.
pub struct Storage {
    conn: Connection,
}

/// One exported `efficiency_daily` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryExportRow {
    pub date: String,
    pub api_cost_usd: f64,
    pub plan_prorata_usd: f64,
    pub efficiency_ratio: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub models_used: Vec<String>,
    pub week_budget_pct: Option<f64>,
    pub recorded_at: String,
}

/// Inputs for the derived columns written alongside each day.
#[derive(Debug, Clone, Copy)]
pub struct RecordContext {
    pub plan_daily: f64,
    pub week_start: NaiveDate,
    /// Week-to-date cost the `week_budget_pct` column is derived from.
    pub week_cost: f64,
    pub weekly_spend_baseline: f64,
    pub recorded_at: NaiveDateTime,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let this = Self { conn };
        this.init()?;
        Ok(this)
    }

    /// Read path for refreshes: never creates the file or the schema.
    pub fn open_read_only(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    fn init(&self) -> Result<(), AppError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS efficiency_daily (
                date TEXT PRIMARY KEY,
                api_cost_usd REAL,
                plan_prorata_usd REAL,
                efficiency_ratio REAL,
                input_tokens INTEGER,
                output_tokens INTEGER,
                cache_read_tokens INTEGER,
                cache_write_tokens INTEGER,
                models_used TEXT,
                week_budget_pct REAL,
                recorded_at TEXT
            );
            "#,
        )?;
        Ok(())
    }

    /// Days on or after `since`.
    pub fn history_since(&self, since: NaiveDate) -> Result<HistoryFacts, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT date, api_cost_usd, efficiency_ratio FROM efficiency_daily
             WHERE date >= ? ORDER BY date",
        )?;
        let rows = stmt
            .query_map([since.format("%Y-%m-%d").to_string()], |r| {
                let raw: String = r.get(0)?;
                let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
                })?;
                Ok(HistoryRow {
                    date,
                    cost: r.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    ratio: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().map(|row| (row.date, row)).collect())
    }

    /// Upserts one row per fetched day, then stamps the current week's rows
    /// with `min(week_cost / baseline, 1)`. Returns the number of days written.
    pub fn record_days(
        &mut self,
        facts: &UsageFacts,
        ctx: &RecordContext,
    ) -> Result<usize, AppError> {
        let tx = self.conn.transaction()?;
        let recorded_at = ctx.recorded_at.format("%Y-%m-%dT%H:%M:%S").to_string();

        {
            let mut upsert = tx.prepare(
                "INSERT OR REPLACE INTO efficiency_daily
                 (date, api_cost_usd, plan_prorata_usd, efficiency_ratio,
                  input_tokens, output_tokens, cache_read_tokens, cache_write_tokens,
                  models_used, week_budget_pct, recorded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)",
            )?;
            for (day, fact) in facts {
                let ratio = if ctx.plan_daily > 0.0 {
                    fact.total_cost / ctx.plan_daily
                } else {
                    0.0
                };
                let models: Vec<&str> = fact.model_costs.iter().map(|m| m.model.as_str()).collect();
                let models_json = serde_json::to_string(&models)?;
                upsert.execute(params![
                    day.format("%Y-%m-%d").to_string(),
                    round_to(fact.total_cost, 4),
                    round_to(ctx.plan_daily, 4),
                    round_to(ratio, 2),
                    fact.tokens.input as i64,
                    fact.tokens.output as i64,
                    fact.tokens.cache_read as i64,
                    fact.tokens.cache_write as i64,
                    models_json,
                    recorded_at,
                ])?;
            }

            let week_start = ctx.week_start.format("%Y-%m-%d").to_string();
            let week_pct = if ctx.weekly_spend_baseline > 0.0 {
                (ctx.week_cost.max(0.0) / ctx.weekly_spend_baseline).min(1.0)
            } else {
                0.0
            };
            tx.execute(
                "UPDATE efficiency_daily SET week_budget_pct = ? WHERE date >= ?",
                params![round_to(week_pct, 4), week_start],
            )?;
        }

        tx.commit()?;
        Ok(facts.len())
    }

    pub fn export_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string_pretty(&self.export_rows()?)?)
    }

    pub fn export_rows(&self) -> Result<Vec<HistoryExportRow>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT date, api_cost_usd, plan_prorata_usd, efficiency_ratio,
                    input_tokens, output_tokens, cache_read_tokens, cache_write_tokens,
                    models_used, week_budget_pct, recorded_at
             FROM efficiency_daily ORDER BY date DESC",
        )?;

        let rows = stmt
            .query_map([], |r| {
                let models_raw: Option<String> = r.get(8)?;
                let models_used = match models_raw {
                    Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e))
                    })?,
                    None => vec![],
                };
                Ok(HistoryExportRow {
                    date: r.get(0)?,
                    api_cost_usd: r.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    plan_prorata_usd: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    efficiency_ratio: r.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    input_tokens: r.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    output_tokens: r.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    cache_read_tokens: r.get::<_, Option<i64>>(6)?.unwrap_or(0),
                    cache_write_tokens: r.get::<_, Option<i64>>(7)?.unwrap_or(0),
                    models_used,
                    week_budget_pct: r.get(9)?,
                    recorded_at: r.get::<_, Option<String>>(10)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
