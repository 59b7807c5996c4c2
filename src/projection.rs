//! Spend-pattern deviation and end-of-week projection.

use crate::aggregate::WeekAggregate;
use crate::quota::{utilization_pct, CapLimits};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpendThresholds {
    /// Typical week-to-date spend in USD.
    pub baseline: f64,
    pub high_pct: f64,
    pub heavy_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaceThresholds {
    pub good_pct: f64,
    pub full_pct: f64,
    pub gate_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpendTier {
    Normal,
    High,
    Heavy,
}

impl SpendTier {
    pub fn classify(spend_pct: f64, thresholds: &SpendThresholds) -> Self {
        if spend_pct >= thresholds.heavy_pct {
            SpendTier::Heavy
        } else if spend_pct >= thresholds.high_pct {
            SpendTier::High
        } else {
            SpendTier::Normal
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpendTier::Normal => "NORMAL",
            SpendTier::High => "HIGH",
            SpendTier::Heavy => "HEAVY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PaceTier {
    Light,
    Good,
    Full,
    Gate,
}

impl PaceTier {
    pub fn classify(projected_pct: f64, thresholds: &PaceThresholds) -> Self {
        if projected_pct >= thresholds.gate_pct {
            PaceTier::Gate
        } else if projected_pct >= thresholds.full_pct {
            PaceTier::Full
        } else if projected_pct >= thresholds.good_pct {
            PaceTier::Good
        } else {
            PaceTier::Light
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PaceTier::Light => "LIGHT",
            PaceTier::Good => "GOOD",
            PaceTier::Full => "FULL",
            PaceTier::Gate => "GATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpendPattern {
    pub week_cost: f64,
    pub baseline: f64,
    pub spend_pct: f64,
    pub tier: SpendTier,
}

/// Week-to-date spend against the habitual baseline. Independent of the caps.
pub fn spend_pattern(week_cost: f64, thresholds: &SpendThresholds) -> SpendPattern {
    let spend_pct = if thresholds.baseline > 0.0 {
        week_cost / thresholds.baseline * 100.0
    } else {
        0.0
    };
    SpendPattern {
        week_cost,
        baseline: thresholds.baseline,
        spend_pct,
        tier: SpendTier::classify(spend_pct, thresholds),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Projection {
    pub smoothed_daily: f64,
    pub days_remaining: i64,
    pub projected_total: f64,
    /// Observed primary share of week cost, or the fallback on an empty week.
    pub primary_fraction: f64,
    pub projected_all_models_pct: f64,
    pub projected_primary_pct: f64,
    pub projected_binding_pct: f64,
    pub tier: PaceTier,
}

pub fn project(
    week: &WeekAggregate,
    limits: &CapLimits,
    primary_fraction_fallback: f64,
    thresholds: &PaceThresholds,
) -> Projection {
    let days_remaining = week.days_remaining.max(0);
    let projected_total = week.week_cost + week.smoothed_daily * days_remaining as f64;
    let primary_fraction = if week.week_cost == 0.0 {
        primary_fraction_fallback
    } else {
        week.primary_week_cost / week.week_cost
    };

    let projected_all_models_pct = utilization_pct(projected_total, limits.all_models);
    let projected_primary_pct = utilization_pct(projected_total * primary_fraction, limits.primary);
    let projected_binding_pct = projected_all_models_pct.max(projected_primary_pct);

    Projection {
        smoothed_daily: week.smoothed_daily,
        days_remaining,
        projected_total,
        primary_fraction,
        projected_all_models_pct,
        projected_primary_pct,
        projected_binding_pct,
        tier: PaceTier::classify(projected_binding_pct, thresholds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::WeekWindow;
    use chrono::NaiveDate;

    fn week(week_cost: f64, primary: f64, smoothed: f64, elapsed: i64) -> WeekAggregate {
        WeekAggregate {
            window: WeekWindow {
                start: NaiveDate::from_ymd_opt(2026, 2, 7).expect("date"),
            },
            week_cost,
            primary_week_cost: primary,
            days_elapsed: elapsed,
            days_remaining: 7 - elapsed,
            smoothed_daily: smoothed,
            smoothing_days: elapsed.min(3) as u32,
        }
    }

    fn limits() -> CapLimits {
        CapLimits {
            all_models: 607.0,
            primary: 789.0,
        }
    }

    fn pace() -> PaceThresholds {
        PaceThresholds {
            good_pct: 30.0,
            full_pct: 65.0,
            gate_pct: 85.0,
        }
    }

    fn spend() -> SpendThresholds {
        SpendThresholds {
            baseline: 55.0,
            high_pct: 75.0,
            heavy_pct: 130.0,
        }
    }

    #[test]
    fn spend_pattern_tiers() {
        assert_eq!(spend_pattern(20.0, &spend()).tier, SpendTier::Normal);
        assert_eq!(spend_pattern(45.0, &spend()).tier, SpendTier::High);
        assert_eq!(spend_pattern(72.0, &spend()).tier, SpendTier::Heavy);
        assert!((spend_pattern(110.0, &spend()).spend_pct - 200.0).abs() < 1e-9);
    }

    #[test]
    fn projection_extends_smoothed_spend_over_remaining_days() {
        let p = project(&week(100.0, 80.0, 30.0, 3), &limits(), 0.95, &pace());
        assert_eq!(p.days_remaining, 4);
        assert!((p.projected_total - 220.0).abs() < 1e-9);
        assert!((p.primary_fraction - 0.8).abs() < 1e-9);
        assert!((p.projected_all_models_pct - 220.0 / 607.0 * 100.0).abs() < 1e-9);
        assert!((p.projected_primary_pct - 176.0 / 789.0 * 100.0).abs() < 1e-9);
        assert_eq!(p.projected_binding_pct, p.projected_all_models_pct);
        assert_eq!(p.tier, PaceTier::Good);
    }

    #[test]
    fn empty_week_uses_fallback_fraction() {
        let p = project(&week(0.0, 0.0, 0.0, 1), &limits(), 0.95, &pace());
        assert_eq!(p.primary_fraction, 0.95);
        assert_eq!(p.projected_total, 0.0);
        assert_eq!(p.tier, PaceTier::Light);
    }

    #[test]
    fn last_day_projects_week_to_date_only() {
        let p = project(&week(500.0, 100.0, 90.0, 7), &limits(), 0.95, &pace());
        assert_eq!(p.days_remaining, 0);
        assert!((p.projected_total - 500.0).abs() < 1e-9);
        assert_eq!(p.tier, PaceTier::Full);
    }

    #[test]
    fn primary_projection_can_bind() {
        let tight = CapLimits {
            all_models: 1000.0,
            primary: 200.0,
        };
        let p = project(&week(100.0, 100.0, 20.0, 2), &tight, 0.95, &pace());
        assert!((p.projected_primary_pct - 100.0).abs() < 1e-9);
        assert_eq!(p.projected_binding_pct, p.projected_primary_pct);
        assert_eq!(p.tier, PaceTier::Gate);
    }

    #[test]
    fn pace_tier_boundaries() {
        let t = pace();
        assert_eq!(PaceTier::classify(29.9, &t), PaceTier::Light);
        assert_eq!(PaceTier::classify(30.0, &t), PaceTier::Good);
        assert_eq!(PaceTier::classify(65.0, &t), PaceTier::Full);
        assert_eq!(PaceTier::classify(85.0, &t), PaceTier::Gate);
    }
}
