//! Per-task timeline state
//!
//! One [`TaskTimeline`] exists per flow step. It tracks the concurrent
//! worker-group [`Instance`]s producing units in parallel, the global
//! finalized-unit counter, and the per-unit completion history.

use crate::error::{ScheduleError, ScheduleResult};
use crate::events::EventId;
use crate::flow::FlowStep;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

/// A concrete worker group producing one specific unit of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Globally unique, survives queue-to-disk round trips
    pub id: String,
    pub workers: Vec<String>,
    /// Unit this instance is producing (1-based)
    pub current_unit: u32,
    /// Set once scheduling resolves the real start
    pub start_time: Option<NaiveDateTime>,
    /// The FIN event that will complete this instance
    pub pending_end_event: Option<EventId>,
}

/// One completed unit in a timeline's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedUnit {
    pub unit: u32,
    pub start: Option<NaiveDateTime>,
    pub end: NaiveDateTime,
}

/// What completing one instance's unit means for the task
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// The task's global counter reached its target
    pub task_completed: bool,
    /// Workers of the removed instance; the engine decides their next step
    pub workers_freed: Vec<String>,
}

/// State and progression of a single task over simulated time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTimeline {
    pub id: String,
    pub name: String,
    /// Effort per unit, in minutes
    pub duration_per_unit: f64,
    pub machine_id: Option<String>,
    pub required_skill_level: u32,
    /// Standard predecessor as a flow index
    pub dependency_index: Option<usize>,
    pub scheduled_start_date: Option<NaiveDateTime>,
    /// Target number of units
    pub units_to_produce: u32,
    /// Monotonic count of finalized units, never exceeds the target
    pub units_finalized_total: u32,
    pub active_instances: Vec<Instance>,
    /// Aggregate of every worker ever assigned here (union over instances)
    pub workers_assigned: Vec<String>,
    pub history: Vec<CompletedUnit>,
    /// Ids of this task's pending start events, for cancellation
    pub future_events: Vec<EventId>,
}

impl TaskTimeline {
    /// Build the timeline for one flow step
    pub fn from_step(step: &FlowStep) -> Self {
        Self {
            id: step.task.id.clone(),
            name: step.task.name.clone(),
            duration_per_unit: step.task.duration_per_unit,
            machine_id: step.task.machine_id.clone(),
            required_skill_level: step.task.required_skill_level,
            dependency_index: step.previous_task_index,
            scheduled_start_date: step.scheduled_start_date,
            units_to_produce: step.trigger_units,
            units_finalized_total: 0,
            active_instances: Vec::new(),
            workers_assigned: step.worker_names(),
            history: Vec::new(),
            future_events: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.units_finalized_total >= self.units_to_produce
    }

    /// Least unit greater than the finalized counter that no active instance
    /// is producing, or `None` when the task has no units left
    pub fn next_free_unit(&self) -> Option<u32> {
        let in_progress: HashSet<u32> = self
            .active_instances
            .iter()
            .map(|instance| instance.current_unit)
            .collect();
        let mut unit = self.units_finalized_total + 1;
        while in_progress.contains(&unit) {
            unit += 1;
        }
        (unit <= self.units_to_produce).then_some(unit)
    }

    /// Open a new instance on `unit` with the given worker group
    ///
    /// Used for the first instance of a task and for cycle migrations and
    /// dependency wake-ups. Returns the new instance id.
    pub fn start_initial_instance(
        &mut self,
        workers: Vec<String>,
        start_time: NaiveDateTime,
        unit: u32,
    ) -> String {
        let instance_id = Uuid::new_v4().to_string();
        for worker in &workers {
            if !self.workers_assigned.contains(worker) {
                self.workers_assigned.push(worker.clone());
            }
        }
        info!(
            task = %self.name,
            instance = %instance_id,
            unit,
            ?workers,
            "instance opened"
        );
        self.active_instances.push(Instance {
            id: instance_id.clone(),
            workers,
            current_unit: unit,
            start_time: Some(start_time),
            pending_end_event: None,
        });
        instance_id
    }

    /// Open a single-worker parallel instance on the next free unit
    ///
    /// Returns the new instance id and its unit so the engine can schedule
    /// the start event, or `None` when the task has no work left.
    pub fn add_parallel_instance(
        &mut self,
        worker_id: &str,
        start_time: NaiveDateTime,
    ) -> Option<(String, u32)> {
        if self.is_completed() {
            warn!(
                task = %self.name,
                worker = %worker_id,
                "parallel join refused, task already produced every unit"
            );
            return None;
        }
        let Some(unit) = self.next_free_unit() else {
            warn!(
                task = %self.name,
                worker = %worker_id,
                "parallel join refused, no unit left to claim"
            );
            return None;
        };
        let instance_id =
            self.start_initial_instance(vec![worker_id.to_string()], start_time, unit);
        Some((instance_id, unit))
    }

    pub fn instance(&self, instance_id: &str) -> Option<&Instance> {
        self.active_instances
            .iter()
            .find(|instance| instance.id == instance_id)
    }

    pub fn instance_mut(&mut self, instance_id: &str) -> Option<&mut Instance> {
        self.active_instances
            .iter_mut()
            .find(|instance| instance.id == instance_id)
    }

    /// Finalize the unit of one instance
    ///
    /// Increments the global counter, appends the history record, removes
    /// the instance, and hands its workers back to the caller. Deciding what
    /// the freed workers do next is always the engine's job.
    pub fn complete_instance_unit(
        &mut self,
        instance_id: &str,
        start: Option<NaiveDateTime>,
        end: NaiveDateTime,
    ) -> ScheduleResult<CompletionOutcome> {
        let position = self
            .active_instances
            .iter()
            .position(|instance| instance.id == instance_id)
            .ok_or_else(|| ScheduleError::InstanceNotFound {
                task: self.id.clone(),
                instance: instance_id.to_string(),
            })?;
        let instance = self.active_instances.remove(position);
        self.units_finalized_total += 1;
        self.history.push(CompletedUnit {
            unit: instance.current_unit,
            start: start.or(instance.start_time),
            end,
        });
        let task_completed = self.is_completed();
        info!(
            task = %self.name,
            unit = instance.current_unit,
            total = self.units_finalized_total,
            target = self.units_to_produce,
            "unit finalized"
        );
        Ok(CompletionOutcome {
            task_completed,
            workers_freed: instance.workers,
        })
    }

    /// Drop a worker from the aggregate assignment view
    pub fn remove_assigned_worker(&mut self, worker_id: &str) {
        self.workers_assigned.retain(|worker| worker != worker_id);
    }

    /// Add a worker to the aggregate view; `true` when newly added
    pub fn add_assigned_worker(&mut self, worker_id: &str) -> bool {
        if self.workers_assigned.iter().any(|w| w == worker_id) {
            false
        } else {
            self.workers_assigned.push(worker_id.to_string());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{TaskSpec, WorkerAssignment};
    use chrono::NaiveDate;

    fn timeline(units: u32) -> TaskTimeline {
        TaskTimeline::from_step(&FlowStep {
            task: TaskSpec {
                id: "t1".to_string(),
                name: "Cutting".to_string(),
                duration_per_unit: 10.0,
                required_skill_level: 1,
                machine_id: None,
                department: None,
                product_code: None,
                product_desc: None,
                fabrication_id: None,
            },
            workers: vec![WorkerAssignment::Name("W1".to_string())],
            trigger_units: units,
            previous_task_index: None,
            min_predecessor_units: 1,
            is_cycle_start: true,
            units_per_cycle: 1,
            next_cyclic_task_index: None,
            scheduled_start_date: None,
        })
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 9)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_next_free_unit_skips_units_in_progress() {
        let mut tl = timeline(5);
        tl.start_initial_instance(vec!["W1".to_string()], now(), 1);
        assert_eq!(tl.next_free_unit(), Some(2));
        tl.start_initial_instance(vec!["W2".to_string()], now(), 2);
        assert_eq!(tl.next_free_unit(), Some(3));
    }

    #[test]
    fn test_completion_removes_instance_and_frees_workers() {
        let mut tl = timeline(2);
        let id = tl.start_initial_instance(vec!["W1".to_string(), "W2".to_string()], now(), 1);
        let outcome = tl.complete_instance_unit(&id, Some(now()), now()).unwrap();
        assert!(!outcome.task_completed);
        assert_eq!(outcome.workers_freed, vec!["W1", "W2"]);
        assert!(tl.active_instances.is_empty());
        assert_eq!(tl.units_finalized_total, 1);
        assert_eq!(tl.history.len(), 1);
    }

    #[test]
    fn test_completing_last_unit_reports_task_done() {
        let mut tl = timeline(1);
        let id = tl.start_initial_instance(vec!["W1".to_string()], now(), 1);
        let outcome = tl.complete_instance_unit(&id, None, now()).unwrap();
        assert!(outcome.task_completed);
        assert!(tl.is_completed());
    }

    #[test]
    fn test_completing_unknown_instance_is_an_error() {
        let mut tl = timeline(1);
        assert!(matches!(
            tl.complete_instance_unit("missing", None, now()),
            Err(ScheduleError::InstanceNotFound { .. })
        ));
    }

    #[test]
    fn test_parallel_join_refused_when_done() {
        let mut tl = timeline(1);
        let id = tl.start_initial_instance(vec!["W1".to_string()], now(), 1);
        tl.complete_instance_unit(&id, None, now()).unwrap();
        assert!(tl.add_parallel_instance("W2", now()).is_none());
    }

    #[test]
    fn test_parallel_join_claims_next_unit() {
        let mut tl = timeline(3);
        tl.start_initial_instance(vec!["W1".to_string()], now(), 1);
        let (_, unit) = tl.add_parallel_instance("W2", now()).unwrap();
        assert_eq!(unit, 2);
        assert!(tl.workers_assigned.contains(&"W2".to_string()));
    }
}
