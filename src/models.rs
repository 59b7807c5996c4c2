use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Day-keyed usage facts as returned by the usage source.
pub type UsageFacts = BTreeMap<NaiveDate, DailyUsageFact>;

/// Day-keyed rows from the secondary history store.
pub type HistoryFacts = BTreeMap<NaiveDate, HistoryRow>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCost {
    pub model: String,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

/// One calendar day of usage from the primary source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyUsageFact {
    pub date: NaiveDate,
    pub total_cost: f64,
    pub model_costs: Vec<ModelCost>,
    pub models_used: BTreeSet<String>,
    pub tokens: TokenCounts,
}

impl DailyUsageFact {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_cost: 0.0,
            model_costs: vec![],
            models_used: BTreeSet::new(),
            tokens: TokenCounts::default(),
        }
    }
}

/// A cached day from the history store: cost plus the efficiency ratio recorded with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRow {
    pub date: NaiveDate,
    pub cost: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CapKind {
    AllModels,
    Primary,
}

impl CapKind {
    pub fn display_name(self, primary_label: &str) -> String {
        match self {
            CapKind::AllModels => "all-models".into(),
            CapKind::Primary => primary_label.to_string(),
        }
    }

    pub fn other(self) -> Self {
        match self {
            CapKind::AllModels => CapKind::Primary,
            CapKind::Primary => CapKind::AllModels,
        }
    }
}
