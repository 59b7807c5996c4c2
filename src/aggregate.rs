//! Folding day-keyed facts into the sums the accounting stages need.
//!
//! Each day is resolved independently: the primary source wins when it has
//! the day at all (an explicit zero included), the history store fills days
//! the primary source is missing, and a day in neither contributes zero.

use crate::calendar::WeekWindow;
use crate::models::{DailyUsageFact, HistoryFacts, UsageFacts};
use chrono::{Duration, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DaySource {
    Primary,
    History,
    Missing,
}

/// Read-only view over both sources for one refresh cycle.
#[derive(Debug, Clone, Copy)]
pub struct DayLedger<'a> {
    primary: &'a UsageFacts,
    history: &'a HistoryFacts,
}

impl<'a> DayLedger<'a> {
    pub fn new(primary: &'a UsageFacts, history: &'a HistoryFacts) -> Self {
        Self { primary, history }
    }

    pub fn source(&self, date: NaiveDate) -> DaySource {
        if self.primary.contains_key(&date) {
            DaySource::Primary
        } else if self.history.contains_key(&date) {
            DaySource::History
        } else {
            DaySource::Missing
        }
    }

    pub fn fact(&self, date: NaiveDate) -> Option<&'a DailyUsageFact> {
        self.primary.get(&date)
    }

    /// `None` only when neither source knows the day.
    pub fn day_cost(&self, date: NaiveDate) -> Option<f64> {
        match self.primary.get(&date) {
            Some(fact) => Some(fact.total_cost),
            None => self.history.get(&date).map(|row| row.cost),
        }
    }

    /// Ratio stored with a history row, priced at the plan rate of that day.
    pub fn history_ratio(&self, date: NaiveDate) -> f64 {
        self.history.get(&date).map(|row| row.ratio).unwrap_or(0.0)
    }

    pub fn cost_or_zero(&self, date: NaiveDate) -> f64 {
        self.day_cost(date).unwrap_or(0.0)
    }

    /// Class cost comes from the primary source's per-model breakdown; the
    /// history store keeps no breakdown, so a history-filled day adds zero.
    pub fn class_cost(&self, date: NaiveDate, prefix: &str) -> f64 {
        self.primary
            .get(&date)
            .map(|fact| model_class_cost(fact, prefix))
            .unwrap_or(0.0)
    }

    /// Summed cost over `[from, to]`, resolving each day on its own.
    pub fn cost_over(&self, from: NaiveDate, to: NaiveDate) -> f64 {
        from.iter_days()
            .take_while(|day| *day <= to)
            .map(|day| self.cost_or_zero(day))
            .sum()
    }
}

/// Sum of breakdown entries whose model identifier starts with `prefix`.
pub fn model_class_cost(fact: &DailyUsageFact, prefix: &str) -> f64 {
    fact.model_costs
        .iter()
        .filter(|entry| entry.model.starts_with(prefix))
        .map(|entry| entry.cost)
        .sum()
}

/// Mean of the most recent `min(window, days_elapsed)` values of `costs`
/// (ordered oldest first). Zero for an empty selection.
pub fn trailing_average(costs: &[f64], window: usize, days_elapsed: usize) -> f64 {
    let take = window.min(days_elapsed).min(costs.len());
    if take == 0 {
        return 0.0;
    }
    let recent = &costs[costs.len() - take..];
    recent.iter().sum::<f64>() / take as f64
}

#[derive(Debug, Clone, Serialize)]
pub struct TodayUsage {
    pub date: NaiveDate,
    pub cost: f64,
    pub source: DaySource,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollingCost {
    pub days: u32,
    pub cost: f64,
    /// Days in the window that either source knew about.
    pub days_with_data: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekAggregate {
    pub window: WeekWindow,
    pub week_cost: f64,
    pub primary_week_cost: f64,
    pub days_elapsed: i64,
    pub days_remaining: i64,
    pub smoothed_daily: f64,
    pub smoothing_days: u32,
}

impl WeekAggregate {
    /// Share of week cost outside the primary class, in percent.
    pub fn secondary_share_pct(&self) -> f64 {
        if self.week_cost > 0.0 {
            (self.week_cost - self.primary_week_cost) / self.week_cost * 100.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub cost: f64,
    pub ratio: f64,
}

pub fn today_usage(ledger: &DayLedger<'_>, today: NaiveDate) -> TodayUsage {
    let source = ledger.source(today);
    let models = match ledger.fact(today) {
        Some(fact) => fact.models_used.iter().map(|m| short_model_name(m)).collect(),
        None if source == DaySource::History => vec!["(history)".into()],
        None => vec!["no data".into()],
    };
    TodayUsage {
        date: today,
        cost: ledger.cost_or_zero(today),
        source,
        models,
    }
}

/// Cost of the `days` days ending with `today`.
pub fn rolling_cost(ledger: &DayLedger<'_>, today: NaiveDate, days: u32) -> RollingCost {
    let mut cost = 0.0;
    let mut days_with_data = 0;
    for back in 0..i64::from(days) {
        if let Some(day_cost) = ledger.day_cost(today - Duration::days(back)) {
            cost += day_cost;
            days_with_data += 1;
        }
    }
    RollingCost {
        days,
        cost,
        days_with_data,
    }
}

/// Week-to-date totals for the window holding `today`. Days after `today`
/// are never counted, and smoothing never reaches before the window start.
pub fn week_aggregate(
    ledger: &DayLedger<'_>,
    window: WeekWindow,
    today: NaiveDate,
    primary_prefix: &str,
    smoothing_window: u32,
) -> WeekAggregate {
    let mut week_cost = 0.0;
    let mut primary_week_cost = 0.0;
    for day in window.days().take_while(|day| *day <= today) {
        week_cost += ledger.cost_or_zero(day);
        primary_week_cost += ledger.class_cost(day, primary_prefix);
    }

    let days_elapsed = window.days_elapsed(today);
    let elapsed_costs: Vec<f64> = (0..days_elapsed)
        .rev()
        .map(|back| ledger.cost_or_zero(today - Duration::days(back)))
        .collect();
    let smoothing_days = (smoothing_window as i64).min(days_elapsed).max(0) as u32;
    let smoothed_daily =
        trailing_average(&elapsed_costs, smoothing_window as usize, days_elapsed as usize);

    WeekAggregate {
        window,
        week_cost,
        primary_week_cost,
        days_elapsed,
        days_remaining: window.days_remaining(today),
        smoothed_daily,
        smoothing_days,
    }
}

/// One point per day for the `days` days ending with `today`, oldest first.
pub fn trend(
    ledger: &DayLedger<'_>,
    today: NaiveDate,
    days: u32,
    plan_daily: f64,
) -> Vec<TrendPoint> {
    (0..i64::from(days))
        .rev()
        .map(|back| {
            let date = today - Duration::days(back);
            let cost = ledger.cost_or_zero(date);
            let ratio = match ledger.source(date) {
                DaySource::History => ledger.history_ratio(date),
                _ => efficiency_ratio(cost, plan_daily),
            };
            TrendPoint { date, cost, ratio }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EfficiencyTier {
    On,
    Below,
    Low,
}

impl EfficiencyTier {
    pub fn classify(ratio: f64, baseline: f64, floor: f64) -> Self {
        if ratio >= baseline {
            EfficiencyTier::On
        } else if ratio >= floor {
            EfficiencyTier::Below
        } else {
            EfficiencyTier::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EfficiencyTier::On => "ON",
            EfficiencyTier::Below => "BELOW",
            EfficiencyTier::Low => "LOW",
        }
    }
}

/// API-equivalent spend per unit of pro-rata plan price.
pub fn efficiency_ratio(cost: f64, plan_daily: f64) -> f64 {
    if plan_daily > 0.0 {
        cost / plan_daily
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Efficiency {
    pub today_ratio: f64,
    pub today_tier: EfficiencyTier,
    pub rolling_ratio: f64,
    pub rolling_tier: EfficiencyTier,
    pub baseline: f64,
    pub floor: f64,
}

pub fn efficiency(
    today: &TodayUsage,
    rolling: &RollingCost,
    plan_daily: f64,
    baseline: f64,
    floor: f64,
) -> Efficiency {
    let today_ratio = efficiency_ratio(today.cost, plan_daily);
    let rolling_ratio =
        efficiency_ratio(rolling.cost, plan_daily * f64::from(rolling.days_with_data.max(1)));
    Efficiency {
        today_ratio,
        today_tier: EfficiencyTier::classify(today_ratio, baseline, floor),
        rolling_ratio,
        rolling_tier: EfficiencyTier::classify(rolling_ratio, baseline, floor),
        baseline,
        floor,
    }
}

/// `claude-sonnet-4-5-20250929` -> `sonnet-4-5`.
pub fn short_model_name(model: &str) -> String {
    let trimmed = model.strip_prefix("claude-").unwrap_or(model);
    match trimmed.rsplit_once('-') {
        Some((head, tail)) if tail.len() == 8 && tail.chars().all(|c| c.is_ascii_digit()) => {
            head.to_string()
        }
        _ => trimmed.to_string(),
    }
}
