//! Saved-flow persistence with stable UUID dependency edges
//!
//! A flow in memory references other steps by index. Indices churn whenever
//! steps are inserted or reordered, so the on-disk form assigns each step a
//! UUID and converts the dependency and cycle edges to UUID references. On
//! load the edges resolve back to indices; any edge whose UUID no longer
//! exists is dropped to `None`.

use crate::error::{ScheduleError, ScheduleResult};
use crate::flow::{FlowStep, TaskSpec, WorkerAssignment};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// On-disk form of one flow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PilaStep {
    pub unique_id: Uuid,
    pub task: TaskSpec,
    #[serde(default)]
    pub workers: Vec<WorkerAssignment>,
    pub trigger_units: u32,
    /// UUID of the standard predecessor, replacing `previous_task_index`
    #[serde(default)]
    pub previous_task_id: Option<Uuid>,
    pub min_predecessor_units: u32,
    pub is_cycle_start: bool,
    /// Optional on the wire; repaired to 1 on load when missing
    #[serde(default)]
    pub units_per_cycle: Option<u32>,
    /// UUID of the cycle target, replacing `next_cyclic_task_index`
    #[serde(default)]
    pub next_cyclic_task_id: Option<Uuid>,
    #[serde(default)]
    pub scheduled_start_date: Option<NaiveDateTime>,
}

/// What a save or load pass observed
#[derive(Debug, Clone, Default)]
pub struct PilaSummary {
    pub steps: usize,
    pub warnings: Vec<String>,
    pub dependency_edges: usize,
    pub cycle_edges: usize,
}

/// Serialize a flow, converting index edges to UUID edges
pub fn save_flow(flow: &[FlowStep]) -> ScheduleResult<(String, PilaSummary)> {
    let mut summary = PilaSummary {
        steps: flow.len(),
        ..Default::default()
    };
    if flow.is_empty() {
        warn!("serializing an empty production flow");
        return Ok(("[]".to_string(), summary));
    }

    let ids: Vec<Uuid> = flow.iter().map(|_| Uuid::new_v4()).collect();
    let mut resolve = |index: Option<usize>, step: usize, label: &str, warnings: &mut Vec<String>| {
        match index {
            None => None,
            Some(i) if i < ids.len() => Some(ids[i]),
            Some(i) => {
                warnings.push(format!("step {}: {} index {} out of range, dropped", step, label, i));
                None
            }
        }
    };

    let mut steps = Vec::with_capacity(flow.len());
    for (position, step) in flow.iter().enumerate() {
        let previous_task_id = resolve(
            step.previous_task_index,
            position,
            "dependency",
            &mut summary.warnings,
        );
        let next_cyclic_task_id = resolve(
            step.next_cyclic_task_index,
            position,
            "cycle",
            &mut summary.warnings,
        );
        if previous_task_id.is_some() {
            summary.dependency_edges += 1;
        }
        if next_cyclic_task_id.is_some() {
            summary.cycle_edges += 1;
        }
        steps.push(PilaStep {
            unique_id: ids[position],
            task: step.task.clone(),
            workers: step.workers.clone(),
            trigger_units: step.trigger_units,
            previous_task_id,
            min_predecessor_units: step.min_predecessor_units,
            is_cycle_start: step.is_cycle_start,
            units_per_cycle: Some(step.units_per_cycle),
            next_cyclic_task_id,
            scheduled_start_date: step.scheduled_start_date,
        });
    }

    let json = serde_json::to_string_pretty(&steps)
        .map_err(|e| ScheduleError::Persistence(format!("serialization failed: {}", e)))?;
    info!(
        steps = summary.steps,
        bytes = json.len(),
        warnings = summary.warnings.len(),
        "production flow serialized"
    );
    Ok((json, summary))
}

/// Deserialize a flow, resolving UUID edges back to indices
///
/// Dangling edges resolve to `None`; a missing `units_per_cycle` is repaired
/// to 1. Both repairs are reported in the summary.
pub fn load_flow(json: &str) -> ScheduleResult<(Vec<FlowStep>, PilaSummary)> {
    let trimmed = json.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        warn!("deserializing an empty production flow");
        return Ok((Vec::new(), PilaSummary::default()));
    }
    let steps: Vec<PilaStep> = serde_json::from_str(trimmed)
        .map_err(|e| ScheduleError::Persistence(format!("parse failed: {}", e)))?;

    let positions: HashMap<Uuid, usize> = steps
        .iter()
        .enumerate()
        .map(|(position, step)| (step.unique_id, position))
        .collect();

    let mut summary = PilaSummary {
        steps: steps.len(),
        ..Default::default()
    };
    let mut flow = Vec::with_capacity(steps.len());
    for (position, step) in steps.into_iter().enumerate() {
        let previous_task_index = match step.previous_task_id {
            None => None,
            Some(id) => match positions.get(&id) {
                Some(index) => {
                    summary.dependency_edges += 1;
                    Some(*index)
                }
                None => {
                    summary
                        .warnings
                        .push(format!("step {}: dangling dependency edge {}, dropped", position, id));
                    None
                }
            },
        };
        let next_cyclic_task_index = match step.next_cyclic_task_id {
            None => None,
            Some(id) => match positions.get(&id) {
                Some(index) => {
                    summary.cycle_edges += 1;
                    Some(*index)
                }
                None => {
                    summary
                        .warnings
                        .push(format!("step {}: dangling cycle edge {}, dropped", position, id));
                    None
                }
            },
        };
        let units_per_cycle = match step.units_per_cycle {
            Some(value) if value >= 1 => value,
            _ => {
                summary
                    .warnings
                    .push(format!("step {}: units_per_cycle missing, defaulting to 1", position));
                1
            }
        };
        flow.push(FlowStep {
            task: step.task,
            workers: step.workers,
            trigger_units: step.trigger_units,
            previous_task_index,
            min_predecessor_units: step.min_predecessor_units,
            is_cycle_start: step.is_cycle_start,
            units_per_cycle,
            next_cyclic_task_index,
            scheduled_start_date: step.scheduled_start_date,
        });
    }
    info!(
        steps = summary.steps,
        warnings = summary.warnings.len(),
        "production flow deserialized"
    );
    Ok((flow, summary))
}
