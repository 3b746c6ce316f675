//! Production-flow input model
//!
//! A flow is an ordered list of steps. Each step declares a task, the workers
//! assigned to it (with optional reassignment rules), how many units it must
//! produce, and its standard-dependency and rework-cycle edges, both
//! expressed as indices into the flow.

use crate::error::{ScheduleError, ScheduleResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Static task metadata within a flow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Stable identifier, unique across the flow
    pub id: String,
    pub name: String,
    /// Effort to produce one unit, in minutes
    pub duration_per_unit: f64,
    #[serde(default = "default_skill_level")]
    pub required_skill_level: u32,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub product_code: Option<String>,
    #[serde(default)]
    pub product_desc: Option<String>,
    #[serde(default)]
    pub fabrication_id: Option<String>,
}

fn default_skill_level() -> u32 {
    1
}

/// Condition under which a reassignment rule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionType {
    /// Fires once the source task has finalized `condition_value` units
    AfterUnits,
    /// Fires when the source task completes
    OnFinish,
}

/// How a reassigned worker joins the target task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReassignmentMode {
    /// Open a parallel instance on the target's next free unit
    ParallelJoin,
    /// Join the target's team and recompute its future events
    Replace,
}

/// A per-worker reassignment rule attached to a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassignmentRule {
    pub condition_type: ConditionType,
    #[serde(default)]
    pub condition_value: u32,
    pub target_task_id: String,
    #[serde(default = "default_mode")]
    pub mode: ReassignmentMode,
}

fn default_mode() -> ReassignmentMode {
    ReassignmentMode::ParallelJoin
}

/// A worker slot in a step
///
/// Two wire forms are accepted: the legacy bare name and the record carrying
/// an optional reassignment rule. Both normalize to the same view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerAssignment {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        reassignment_rule: Option<ReassignmentRule>,
    },
}

impl WorkerAssignment {
    pub fn name(&self) -> &str {
        match self {
            WorkerAssignment::Name(name) => name,
            WorkerAssignment::Detailed { name, .. } => name,
        }
    }

    pub fn rule(&self) -> Option<&ReassignmentRule> {
        match self {
            WorkerAssignment::Name(_) => None,
            WorkerAssignment::Detailed {
                reassignment_rule, ..
            } => reassignment_rule.as_ref(),
        }
    }
}

/// One step of a production flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStep {
    pub task: TaskSpec,
    #[serde(default)]
    pub workers: Vec<WorkerAssignment>,
    /// Units this step must produce
    #[serde(default = "default_one")]
    pub trigger_units: u32,
    /// Standard predecessor, as an index into the flow
    #[serde(default)]
    pub previous_task_index: Option<usize>,
    /// Predecessor units required per unit of this step
    #[serde(default = "default_one")]
    pub min_predecessor_units: u32,
    /// Marks a true root of a cycle, seeding it independently of predecessors
    #[serde(default)]
    pub is_cycle_start: bool,
    /// Completions of this step between rework hops
    #[serde(default = "default_one")]
    pub units_per_cycle: u32,
    /// Rework edge: freed workers loop to this flow index
    #[serde(default)]
    pub next_cyclic_task_index: Option<usize>,
    /// Optional wall-clock pinning of this step's start
    #[serde(default)]
    pub scheduled_start_date: Option<NaiveDateTime>,
}

fn default_one() -> u32 {
    1
}

impl FlowStep {
    /// Worker names in declaration order
    pub fn worker_names(&self) -> Vec<String> {
        self.workers
            .iter()
            .map(|w| w.name().to_string())
            .collect()
    }
}

/// A complete production flow
pub type ProductionFlow = Vec<FlowStep>;

/// A worker available to the flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub name: String,
    #[serde(default = "default_skill_level")]
    pub skill_level: u32,
}

impl WorkerProfile {
    pub fn new(name: impl Into<String>, skill_level: u32) -> Self {
        Self {
            name: name.into(),
            skill_level,
        }
    }
}

/// A machine available to the flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineProfile {
    pub id: String,
    #[serde(default)]
    pub process_kind: Option<String>,
}

impl MachineProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            process_kind: None,
        }
    }
}

/// Reject malformed flows before any event is seeded
pub fn validate_flow(flow: &[FlowStep]) -> ScheduleResult<()> {
    if flow.is_empty() {
        return Err(ScheduleError::Configuration(
            "production flow is empty".to_string(),
        ));
    }
    let mut seen_ids = HashSet::new();
    for (index, step) in flow.iter().enumerate() {
        if step.task.id.trim().is_empty() {
            return Err(ScheduleError::Configuration(format!(
                "step {} has an empty task id",
                index
            )));
        }
        if !seen_ids.insert(step.task.id.as_str()) {
            return Err(ScheduleError::Configuration(format!(
                "task id '{}' appears more than once",
                step.task.id
            )));
        }
        if step.task.duration_per_unit < 0.0 || !step.task.duration_per_unit.is_finite() {
            return Err(ScheduleError::Configuration(format!(
                "task '{}' has an invalid duration {}",
                step.task.id, step.task.duration_per_unit
            )));
        }
        if step.trigger_units == 0 {
            return Err(ScheduleError::Configuration(format!(
                "task '{}' must produce at least one unit",
                step.task.id
            )));
        }
        if let Some(dep) = step.previous_task_index {
            if dep >= flow.len() || dep == index {
                return Err(ScheduleError::Configuration(format!(
                    "task '{}' has dependency index {} out of range",
                    step.task.id, dep
                )));
            }
        }
        if let Some(cycle) = step.next_cyclic_task_index {
            if cycle >= flow.len() {
                return Err(ScheduleError::Configuration(format!(
                    "task '{}' has cycle index {} out of range",
                    step.task.id, cycle
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str) -> FlowStep {
        FlowStep {
            task: TaskSpec {
                id: id.to_string(),
                name: id.to_string(),
                duration_per_unit: 10.0,
                required_skill_level: 1,
                machine_id: None,
                department: None,
                product_code: None,
                product_desc: None,
                fabrication_id: None,
            },
            workers: vec![WorkerAssignment::Name("W1".to_string())],
            trigger_units: 1,
            previous_task_index: None,
            min_predecessor_units: 1,
            is_cycle_start: true,
            units_per_cycle: 1,
            next_cyclic_task_index: None,
            scheduled_start_date: None,
        }
    }

    #[test]
    fn test_both_worker_forms_deserialize() {
        let json = r#"[
            "Daniel Sanz",
            {"name": "Maria Gil", "reassignment_rule": {
                "condition_type": "AFTER_UNITS",
                "condition_value": 2,
                "target_task_id": "t2",
                "mode": "PARALLEL_JOIN"
            }}
        ]"#;
        let workers: Vec<WorkerAssignment> = serde_json::from_str(json).unwrap();
        assert_eq!(workers[0].name(), "Daniel Sanz");
        assert!(workers[0].rule().is_none());
        assert_eq!(workers[1].name(), "Maria Gil");
        let rule = workers[1].rule().unwrap();
        assert_eq!(rule.condition_type, ConditionType::AfterUnits);
        assert_eq!(rule.condition_value, 2);
        assert_eq!(rule.mode, ReassignmentMode::ParallelJoin);
    }

    #[test]
    fn test_duplicate_task_ids_rejected() {
        let flow = vec![step("a"), step("a")];
        assert!(matches!(
            validate_flow(&flow),
            Err(ScheduleError::Configuration(_))
        ));
    }

    #[test]
    fn test_dependency_out_of_range_rejected() {
        let mut second = step("b");
        second.previous_task_index = Some(7);
        let flow = vec![step("a"), second];
        assert!(matches!(
            validate_flow(&flow),
            Err(ScheduleError::Configuration(_))
        ));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut bad = step("a");
        bad.task.duration_per_unit = -1.0;
        assert!(validate_flow(&[bad]).is_err());
    }

    #[test]
    fn test_valid_flow_accepted() {
        let mut second = step("b");
        second.previous_task_index = Some(0);
        second.is_cycle_start = false;
        assert!(validate_flow(&[step("a"), second]).is_ok());
    }
}
