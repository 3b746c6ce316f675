//! Audit records for engine decisions
//!
//! Every consequential choice the engine makes (starts, completions,
//! reassignments, cycle migrations, idle waits) is retained as a
//! [`CalculationDecision`] so callers can explain a computed schedule.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Visual severity of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionStatus {
    /// Informative
    Neutral,
    /// Progress, all good
    Positive,
    /// Wait or mild conflict
    Warning,
    /// Error or severe conflict
    Critical,
}

/// One decision or notable event from a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationDecision {
    pub timestamp: NaiveDateTime,
    /// Decision category tag (event type or internal kind)
    pub decision_type: String,
    /// Technical explanation
    pub reason: String,
    /// Explanation phrased for end users
    pub user_friendly_reason: String,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub product_desc: Option<String>,
    /// Structured context for downstream consumers
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    pub status: DecisionStatus,
    pub icon: String,
    #[serde(default)]
    pub start_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub end_date: Option<NaiveDateTime>,
}

impl CalculationDecision {
    /// Minimal decision with empty context
    pub fn new(
        timestamp: NaiveDateTime,
        decision_type: impl Into<String>,
        reason: impl Into<String>,
        user_friendly_reason: impl Into<String>,
        status: DecisionStatus,
        icon: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            decision_type: decision_type.into(),
            reason: reason.into(),
            user_friendly_reason: user_friendly_reason.into(),
            task_name: None,
            product_code: None,
            product_desc: None,
            details: serde_json::Map::new(),
            status,
            icon: icon.into(),
            start_date: None,
            end_date: None,
        }
    }

    /// Attach the task name
    pub fn with_task(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = Some(task_name.into());
        self
    }

    /// Attach one structured detail
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}
