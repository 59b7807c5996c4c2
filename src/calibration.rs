//! Operator-calibrated weekly limits and their provenance.

use crate::error::AppError;
use crate::models::CapKind;
use crate::quota::CapLimits;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_ALL_MODELS_LIMIT: f64 = 607.0;
pub const DEFAULT_PRIMARY_LIMIT: f64 = 789.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapCalibration {
    pub limit_usd: f64,
    pub calibrated_on: Option<NaiveDate>,
    pub observed_pct: Option<f64>,
    pub observed_cost_usd: Option<f64>,
}

impl CapCalibration {
    fn with_limit(limit_usd: f64) -> Self {
        Self {
            limit_usd,
            calibrated_on: None,
            observed_pct: None,
            observed_cost_usd: None,
        }
    }

    fn is_usable(&self) -> bool {
        self.limit_usd.is_finite() && self.limit_usd > 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationRecord {
    pub all_models: CapCalibration,
    pub primary: CapCalibration,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            all_models: CapCalibration::with_limit(DEFAULT_ALL_MODELS_LIMIT),
            primary: CapCalibration::with_limit(DEFAULT_PRIMARY_LIMIT),
        }
    }
}

impl CalibrationRecord {
    pub fn limits(&self) -> CapLimits {
        CapLimits {
            all_models: self.all_models.limit_usd,
            primary: self.primary.limit_usd,
        }
    }

    pub fn cap(&self, cap: CapKind) -> &CapCalibration {
        match cap {
            CapKind::AllModels => &self.all_models,
            CapKind::Primary => &self.primary,
        }
    }

    fn cap_mut(&mut self, cap: CapKind) -> &mut CapCalibration {
        match cap {
            CapKind::AllModels => &mut self.all_models,
            CapKind::Primary => &mut self.primary,
        }
    }

    /// Most recent calibration of either cap.
    pub fn last_calibrated(&self) -> Option<NaiveDate> {
        self.all_models.calibrated_on.max(self.primary.calibrated_on)
    }

    /// Recomputes one cap's limit from the provider-reported percentage and
    /// the locally observed week cost. The other cap is left untouched, and
    /// a rejected input leaves the record unchanged.
    pub fn calibrate(
        &mut self,
        cap: CapKind,
        observed_pct: f64,
        observed_cost: f64,
        today: NaiveDate,
    ) -> Result<f64, AppError> {
        let limit = derive_limit(observed_pct, observed_cost)?;
        *self.cap_mut(cap) = CapCalibration {
            limit_usd: limit,
            calibrated_on: Some(today),
            observed_pct: Some(observed_pct),
            observed_cost_usd: Some(observed_cost),
        };
        Ok(limit)
    }

    fn repair(mut self) -> Self {
        let defaults = Self::default();
        if !self.all_models.is_usable() {
            tracing::warn!(
                limit = self.all_models.limit_usd,
                "stored all-models limit unusable, using default"
            );
            self.all_models = defaults.all_models;
        }
        if !self.primary.is_usable() {
            tracing::warn!(
                limit = self.primary.limit_usd,
                "stored primary limit unusable, using default"
            );
            self.primary = defaults.primary;
        }
        self
    }
}

pub fn validate_pct(observed_pct: f64) -> Result<(), AppError> {
    if !observed_pct.is_finite() || observed_pct <= 0.0 {
        return Err(AppError::InvalidCalibrationInput(format!(
            "percent used must be greater than 0 (got {observed_pct})"
        )));
    }
    Ok(())
}

/// `limit = cost / (pct / 100)`.
pub fn derive_limit(observed_pct: f64, observed_cost: f64) -> Result<f64, AppError> {
    validate_pct(observed_pct)?;
    if !observed_cost.is_finite() || observed_cost <= 0.0 {
        return Err(AppError::InvalidCalibrationInput(format!(
            "no spend recorded for this cap this week (observed ${observed_cost:.2}); \
             calibrate once some usage has been recorded"
        )));
    }
    Ok(observed_cost / (observed_pct / 100.0))
}

#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing record means first run, a corrupt one is
    /// logged and replaced by the defaults.
    pub fn load(&self) -> CalibrationRecord {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return CalibrationRecord::default();
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "calibration unreadable, using defaults");
                return CalibrationRecord::default();
            }
        };

        match toml::from_str::<CalibrationRecord>(&raw) {
            Ok(record) => record.repair(),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "calibration corrupt, using defaults");
                CalibrationRecord::default()
            }
        }
    }

    pub fn save(&self, record: &CalibrationRecord) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(record)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}
