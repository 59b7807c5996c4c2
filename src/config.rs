use crate::calendar::ResetSchedule;
use crate::error::AppError;
use crate::projection::{PaceThresholds, SpendThresholds};
use crate::quota::QuotaThresholds;
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "quota-meter";
pub const ENV_PREFIX: &str = "QUOTA_METER";

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("QUOTA_METER_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "quota-meter", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".quota-meter"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub refresh_seconds: u64,
    pub tick_seconds: u64,
    pub history_db: Option<PathBuf>,
    pub source: SourceSettings,
    pub engine: EngineSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            refresh_seconds: 60,
            tick_seconds: 1,
            history_db: None,
            source: SourceSettings::default(),
            engine: EngineSettings::default(),
        }
    }
}

/// How the external usage-reporting command is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub command: String,
    pub args: Vec<String>,
    pub since_days: i64,
    pub timeout_seconds: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            command: "ccusage".into(),
            args: vec!["daily".into(), "--json".into(), "--breakdown".into()],
            since_days: 8,
            timeout_seconds: 30,
        }
    }
}

/// Every tunable the accounting engine reads. Built once per process and
/// handed to [`crate::engine::Engine`]; nothing in the engine reads globals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub week_anchor: NaiveDate,
    pub all_models_reset_hours: i64,
    pub primary_reset_hours: i64,
    pub primary_model_prefix: String,
    pub primary_label: String,
    pub gate_threshold: f64,
    pub protect_threshold: f64,
    pub scheduled_reserve: f64,
    pub weekly_spend_baseline: f64,
    pub spend_high_pct: f64,
    pub spend_heavy_pct: f64,
    pub pace_good_pct: f64,
    pub pace_full_pct: f64,
    pub pace_gate_pct: f64,
    pub smoothing_days: u32,
    pub rolling_days: u32,
    pub primary_fraction_fallback: f64,
    pub plan_monthly_usd: f64,
    pub efficiency_baseline: f64,
    pub efficiency_floor: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            week_anchor: NaiveDate::from_ymd_opt(2026, 2, 7).unwrap_or_default(),
            all_models_reset_hours: 12,
            primary_reset_hours: 26,
            primary_model_prefix: "claude-sonnet".into(),
            primary_label: "sonnet".into(),
            gate_threshold: 0.80,
            protect_threshold: 0.90,
            scheduled_reserve: 0.05,
            weekly_spend_baseline: 55.0,
            spend_high_pct: 75.0,
            spend_heavy_pct: 130.0,
            pace_good_pct: 30.0,
            pace_full_pct: 65.0,
            pace_gate_pct: 85.0,
            smoothing_days: 3,
            rolling_days: 7,
            primary_fraction_fallback: 0.95,
            plan_monthly_usd: 100.0,
            efficiency_baseline: 15.5,
            efficiency_floor: 12.0,
        }
    }
}

impl EngineSettings {
    pub fn reset_schedule(&self) -> ResetSchedule {
        ResetSchedule {
            all_models_offset_hours: self.all_models_reset_hours,
            primary_offset_hours: self.primary_reset_hours,
        }
    }

    pub fn quota_thresholds(&self) -> QuotaThresholds {
        QuotaThresholds {
            gate: self.gate_threshold,
            protect: self.protect_threshold,
            scheduled_reserve: self.scheduled_reserve,
        }
    }

    pub fn spend_thresholds(&self) -> SpendThresholds {
        SpendThresholds {
            baseline: self.weekly_spend_baseline,
            high_pct: self.spend_high_pct,
            heavy_pct: self.spend_heavy_pct,
        }
    }

    pub fn pace_thresholds(&self) -> PaceThresholds {
        PaceThresholds {
            good_pct: self.pace_good_pct,
            full_pct: self.pace_full_pct,
            gate_pct: self.pace_gate_pct,
        }
    }

    pub fn plan_daily_usd(&self) -> f64 {
        self.plan_monthly_usd / 30.0
    }

    fn validate(&self) -> Result<(), AppError> {
        if !(self.gate_threshold > 0.0 && self.gate_threshold <= self.protect_threshold) {
            return Err(AppError::Config(
                "engine.gate_threshold must be positive and not above engine.protect_threshold"
                    .into(),
            ));
        }
        if self.primary_model_prefix.trim().is_empty() {
            return Err(AppError::Config(
                "engine.primary_model_prefix must not be empty".into(),
            ));
        }
        if self.weekly_spend_baseline <= 0.0 || self.plan_monthly_usd <= 0.0 {
            return Err(AppError::Config(
                "engine.weekly_spend_baseline and engine.plan_monthly_usd must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn calibration_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("calibration.toml"))
}

pub fn log_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("quota-meter.log"))
}

pub fn history_db_path(cfg: &AppConfig) -> Result<PathBuf, AppError> {
    match &cfg.history_db {
        Some(path) => Ok(path.clone()),
        None => Ok(data_dir()?.join("history.sqlite")),
    }
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

/// Layers the TOML file (if any) and `QUOTA_METER_*` environment overrides
/// over the built-in defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    let raw = ::config::Config::builder()
        .add_source(
            ::config::File::from(path.to_path_buf())
                .format(::config::FileFormat::Toml)
                .required(false),
        )
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let parsed: AppConfig = raw.try_deserialize()?;
    parsed.engine.validate()?;
    Ok(parsed)
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from(&config_path()?)
}

/// Startup path for the monitor: a broken settings file must not keep the
/// dashboard from running.
pub fn load_config_or_default() -> AppConfig {
    match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!(error = %err, "settings unreadable, using built-in defaults");
            AppConfig::default()
        }
    }
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
