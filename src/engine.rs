use crate::aggregate::{
    efficiency, rolling_cost, today_usage, trend, week_aggregate, DayLedger, Efficiency,
    RollingCost, TodayUsage, TrendPoint, WeekAggregate,
};
use crate::calendar::{current_reset_status, ResetStatus, WeekWindow};
use crate::calibration::CalibrationRecord;
use crate::config::EngineSettings;
use crate::models::{HistoryFacts, UsageFacts};
use crate::projection::{project, spend_pattern, Projection, SpendPattern};
use crate::quota::{account, CapLimits, QuotaAccount};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

const TREND_DAYS: u32 = 7;

/// Everything one refresh cycle knows. Rebuilt from scratch every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateSnapshot {
    pub generated_at: NaiveDateTime,
    pub today: TodayUsage,
    pub rolling: RollingCost,
    pub week: WeekAggregate,
    pub limits: CapLimits,
    pub calibrated_on: Option<NaiveDate>,
    pub quota: QuotaAccount,
    pub spend: SpendPattern,
    pub projection: Projection,
    pub efficiency: Efficiency,
    pub trend: Vec<TrendPoint>,
    pub reset: ResetStatus,
}

/// The accounting pipeline. Holds only its immutable settings; all inputs
/// arrive per call.
#[derive(Debug, Clone)]
pub struct Engine {
    settings: EngineSettings,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn week_for(&self, today: NaiveDate) -> WeekWindow {
        WeekWindow::containing(self.settings.week_anchor, today)
    }

    pub fn reset_status(&self, now: NaiveDateTime) -> ResetStatus {
        let window = self.week_for(now.date());
        current_reset_status(&window, &self.settings.reset_schedule(), now)
    }

    /// Week-to-date totals only; the calibration path needs nothing more.
    pub fn week(
        &self,
        primary: &UsageFacts,
        history: &HistoryFacts,
        today: NaiveDate,
    ) -> WeekAggregate {
        let ledger = DayLedger::new(primary, history);
        week_aggregate(
            &ledger,
            self.week_for(today),
            today,
            &self.settings.primary_model_prefix,
            self.settings.smoothing_days,
        )
    }

    pub fn snapshot(
        &self,
        primary: &UsageFacts,
        history: &HistoryFacts,
        calibration: &CalibrationRecord,
        now: NaiveDateTime,
    ) -> AggregateSnapshot {
        let s = &self.settings;
        let today = now.date();
        let ledger = DayLedger::new(primary, history);
        let plan_daily = s.plan_daily_usd();

        let today_usage = today_usage(&ledger, today);
        let rolling = rolling_cost(&ledger, today, s.rolling_days);
        let week = self.week(primary, history, today);
        let limits = calibration.limits();

        let quota = account(
            week.week_cost,
            week.primary_week_cost,
            &limits,
            &s.quota_thresholds(),
        );
        let spend = spend_pattern(week.week_cost, &s.spend_thresholds());
        let projection = project(
            &week,
            &limits,
            s.primary_fraction_fallback,
            &s.pace_thresholds(),
        );
        let efficiency = efficiency(
            &today_usage,
            &rolling,
            plan_daily,
            s.efficiency_baseline,
            s.efficiency_floor,
        );

        AggregateSnapshot {
            generated_at: now,
            trend: trend(&ledger, today, TREND_DAYS, plan_daily),
            reset: self.reset_status(now),
            today: today_usage,
            rolling,
            week,
            limits,
            calibrated_on: calibration.last_calibrated(),
            quota,
            spend,
            projection,
            efficiency,
        }
    }
}
