//! Utilization of the two weekly caps and the gating numbers derived from them.

use crate::models::CapKind;
use serde::{Deserialize, Serialize};

/// Fractions of a cap's limit at which gating starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaThresholds {
    /// Soft gate, e.g. 0.80.
    pub gate: f64,
    /// Hard gate, e.g. 0.90.
    pub protect: f64,
    /// Share of the ALL-MODELS limit held back for scheduled jobs.
    pub scheduled_reserve: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuotaTier {
    Open,
    Gate,
    Protect,
}

impl QuotaTier {
    pub fn classify(utilization_pct: f64, thresholds: &QuotaThresholds) -> Self {
        if utilization_pct >= thresholds.protect * 100.0 {
            QuotaTier::Protect
        } else if utilization_pct >= thresholds.gate * 100.0 {
            QuotaTier::Gate
        } else {
            QuotaTier::Open
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QuotaTier::Open => "OPEN",
            QuotaTier::Gate => "GATE",
            QuotaTier::Protect => "PROTECT",
        }
    }
}

/// Weekly limits for both caps, in USD-equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapLimits {
    pub all_models: f64,
    pub primary: f64,
}

impl CapLimits {
    pub fn get(&self, cap: CapKind) -> f64 {
        match cap {
            CapKind::AllModels => self.all_models,
            CapKind::Primary => self.primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CapStatus {
    pub cap: CapKind,
    pub week_cost: f64,
    pub limit: f64,
    pub utilization_pct: f64,
    pub tier: QuotaTier,
}

impl CapStatus {
    pub fn evaluate(
        cap: CapKind,
        week_cost: f64,
        limit: f64,
        thresholds: &QuotaThresholds,
    ) -> Self {
        let utilization_pct = utilization_pct(week_cost, limit);
        Self {
            cap,
            week_cost,
            limit,
            utilization_pct,
            tier: QuotaTier::classify(utilization_pct, thresholds),
        }
    }
}

pub fn utilization_pct(week_cost: f64, limit: f64) -> f64 {
    if limit > 0.0 {
        week_cost / limit * 100.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaAccount {
    pub all_models: CapStatus,
    pub primary: CapStatus,
    pub binding: CapKind,
    /// Budget left before the soft gate, net of the scheduled-job reserve.
    pub sprint_room: f64,
}

impl QuotaAccount {
    pub fn cap(&self, cap: CapKind) -> &CapStatus {
        match cap {
            CapKind::AllModels => &self.all_models,
            CapKind::Primary => &self.primary,
        }
    }

    pub fn binding_status(&self) -> &CapStatus {
        self.cap(self.binding)
    }

    pub fn binding_pct(&self) -> f64 {
        self.binding_status().utilization_pct
    }
}

/// Evaluates both caps independently and picks the binding one. Each cap's
/// numerator is its own spend subset: total week cost for ALL-MODELS, the
/// primary class's cost for PRIMARY-ONLY.
pub fn account(
    all_models_week_cost: f64,
    primary_week_cost: f64,
    limits: &CapLimits,
    thresholds: &QuotaThresholds,
) -> QuotaAccount {
    let evaluate =
        |cap: CapKind, cost: f64| CapStatus::evaluate(cap, cost, limits.get(cap), thresholds);
    let all_models = evaluate(CapKind::AllModels, all_models_week_cost);
    let primary = evaluate(CapKind::Primary, primary_week_cost);

    let binding = if all_models.utilization_pct >= primary.utilization_pct {
        CapKind::AllModels
    } else {
        CapKind::Primary
    };
    let binding_status = match binding {
        CapKind::AllModels => &all_models,
        CapKind::Primary => &primary,
    };
    let sprint_room = sprint_room(binding_status, limits.get(CapKind::AllModels), thresholds);

    QuotaAccount {
        all_models,
        primary,
        binding,
        sprint_room,
    }
}

/// The reserve is always taken from the ALL-MODELS limit, even when the
/// primary cap binds: scheduled jobs draw from the shared pool.
pub fn sprint_room(binding: &CapStatus, all_models_limit: f64, thresholds: &QuotaThresholds) -> f64 {
    let reserve = all_models_limit * thresholds.scheduled_reserve;
    (binding.limit * thresholds.gate - binding.week_cost - reserve).max(0.0)
}
