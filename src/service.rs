use crate::aggregate::DayLedger;
use crate::calibration::{validate_pct, CalibrationRecord, CalibrationStore};
use crate::config::{calibration_path, history_db_path, AppConfig};
use crate::engine::{AggregateSnapshot, Engine};
use crate::error::AppError;
use crate::models::{CapKind, HistoryFacts, UsageFacts};
use crate::source::{CommandSource, UsageSource};
use crate::storage::{RecordContext, Storage};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const HISTORY_LOOKBACK_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceStatus {
    Fresh { days: usize },
    NoData,
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryStatus {
    Loaded { days: usize },
    Missing,
    Unavailable { reason: String },
}

/// Result of one refresh cycle: the snapshot plus where its inputs came from.
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub snapshot: AggregateSnapshot,
    pub source: SourceStatus,
    pub history: HistoryStatus,
}

impl RefreshReport {
    pub fn is_stale(&self) -> bool {
        !matches!(self.source, SourceStatus::Fresh { .. })
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        match &self.source {
            SourceStatus::Fresh { .. } => {}
            SourceStatus::NoData => {
                out.push("usage source returned no days; showing history only".into())
            }
            SourceStatus::Unavailable { reason } => {
                out.push(format!("usage source unavailable ({reason}); showing history only"))
            }
        }
        if let HistoryStatus::Unavailable { reason } = &self.history {
            out.push(format!("history store unreadable ({reason})"));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationRequest {
    pub all_models_pct: Option<f64>,
    pub primary_pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub week_cost: f64,
    pub primary_week_cost: f64,
    pub updated: Vec<CapKind>,
    pub record: CalibrationRecord,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub source: SourceStatus,
    pub days_written: usize,
    pub week_to_date: f64,
}

/// One refresh pipeline: usage source, history store, calibration, engine.
/// Cheap to clone so a refresh can run on its own task.
#[derive(Clone)]
pub struct MeterService {
    engine: Engine,
    source: Arc<dyn UsageSource>,
    history_db: PathBuf,
    calibration: CalibrationStore,
    since_days: i64,
}

impl MeterService {
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        Ok(Self::with_parts(
            Engine::new(cfg.engine.clone()),
            Arc::new(CommandSource::new(cfg.source.clone())),
            history_db_path(cfg)?,
            CalibrationStore::new(&calibration_path()?),
            cfg.source.since_days,
        ))
    }

    pub fn with_parts(
        engine: Engine,
        source: Arc<dyn UsageSource>,
        history_db: PathBuf,
        calibration: CalibrationStore,
        since_days: i64,
    ) -> Self {
        Self {
            engine,
            source,
            history_db,
            calibration,
            since_days,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn history_db(&self) -> &Path {
        &self.history_db
    }

    async fn fetch_usage(&self, today: NaiveDate) -> (UsageFacts, SourceStatus) {
        let since = today - Duration::days(self.since_days.max(1));
        match self.source.fetch_since(since).await {
            Ok(facts) if facts.is_empty() => {
                tracing::info!(source = self.source.name(), "usage source returned no days");
                (facts, SourceStatus::NoData)
            }
            Ok(facts) => {
                let days = facts.len();
                (facts, SourceStatus::Fresh { days })
            }
            Err(err) => {
                tracing::warn!(source = self.source.name(), error = %err, "usage fetch failed");
                (
                    UsageFacts::new(),
                    SourceStatus::Unavailable {
                        reason: err.to_string(),
                    },
                )
            }
        }
    }

    fn load_history(&self, today: NaiveDate) -> (HistoryFacts, HistoryStatus) {
        if !self.history_db.exists() {
            return (HistoryFacts::new(), HistoryStatus::Missing);
        }
        let since = today - Duration::days(HISTORY_LOOKBACK_DAYS);
        match Storage::open_read_only(&self.history_db).and_then(|s| s.history_since(since)) {
            Ok(history) => {
                let days = history.len();
                (history, HistoryStatus::Loaded { days })
            }
            Err(err) => {
                tracing::warn!(path = %self.history_db.display(), error = %err, "history read failed");
                (
                    HistoryFacts::new(),
                    HistoryStatus::Unavailable {
                        reason: err.to_string(),
                    },
                )
            }
        }
    }

    /// Never fails: every input degrades to empty and the report says so.
    pub async fn refresh(&self, now: NaiveDateTime) -> RefreshReport {
        let today = now.date();
        let (usage, source) = self.fetch_usage(today).await;
        let (history, history_status) = self.load_history(today);
        let calibration = self.calibration.load();

        RefreshReport {
            snapshot: self.engine.snapshot(&usage, &history, &calibration, now),
            source,
            history: history_status,
        }
    }

    /// Derives new limits from provider-reported percentages and this week's
    /// observed cost. Both inputs are checked before anything is written, and
    /// a source that did not answer aborts the calibration: history alone
    /// lags the provider and would understate the week.
    pub async fn calibrate(
        &self,
        request: CalibrationRequest,
        now: NaiveDateTime,
    ) -> Result<CalibrationOutcome, AppError> {
        if request.all_models_pct.is_none() && request.primary_pct.is_none() {
            return Err(AppError::InvalidCalibrationInput(
                "supply at least one of --all-models-pct or --primary-pct".into(),
            ));
        }

        for pct in [request.all_models_pct, request.primary_pct].into_iter().flatten() {
            validate_pct(pct)?;
        }

        let today = now.date();
        let (usage, source) = self.fetch_usage(today).await;
        let reason = match source {
            SourceStatus::Fresh { .. } => None,
            SourceStatus::NoData => Some("no days returned".to_string()),
            SourceStatus::Unavailable { reason } => Some(reason),
        };
        if let Some(reason) = reason {
            return Err(AppError::UsageUnavailable(format!(
                "usage source unavailable ({reason}); cannot calibrate against incomplete week cost"
            )));
        }
        let (history, _) = self.load_history(today);
        let week = self.engine.week(&usage, &history, today);

        let mut record = self.calibration.load();
        let mut updated = Vec::new();
        if let Some(pct) = request.all_models_pct {
            record.calibrate(CapKind::AllModels, pct, week.week_cost, today)?;
            updated.push(CapKind::AllModels);
        }
        if let Some(pct) = request.primary_pct {
            record.calibrate(CapKind::Primary, pct, week.primary_week_cost, today)?;
            updated.push(CapKind::Primary);
        }

        self.calibration.save(&record)?;
        tracing::info!(
            all_models = record.all_models.limit_usd,
            primary = record.primary.limit_usd,
            "calibration saved"
        );

        Ok(CalibrationOutcome {
            week_cost: week.week_cost,
            primary_week_cost: week.primary_week_cost,
            updated,
            record,
            path: self.calibration.path().to_path_buf(),
        })
    }

    /// Copies the usage source's days into the history store. An empty or
    /// failed fetch leaves the store untouched.
    pub async fn sync(&self, now: NaiveDateTime) -> Result<SyncReport, AppError> {
        let today = now.date();
        let (usage, source) = self.fetch_usage(today).await;
        let window = self.engine.week_for(today);
        let no_history = HistoryFacts::new();
        let week_to_date = DayLedger::new(&usage, &no_history).cost_over(window.start, today);

        if usage.is_empty() {
            return Ok(SyncReport {
                source,
                days_written: 0,
                week_to_date,
            });
        }

        let settings = self.engine.settings();
        let mut storage = Storage::open(&self.history_db)?;
        let days_written = storage.record_days(
            &usage,
            &RecordContext {
                plan_daily: settings.plan_daily_usd(),
                week_start: window.start,
                week_cost: week_to_date,
                weekly_spend_baseline: settings.weekly_spend_baseline,
                recorded_at: now,
            },
        )?;
        tracing::info!(days = days_written, path = %self.history_db.display(), "history synced");

        Ok(SyncReport {
            source,
            days_written,
            week_to_date,
        })
    }
}
