//! Per-resource occupancy calendars and the reassignment-rule registry
//!
//! Tracks, for every worker and machine, the ordered non-overlapping
//! intervals during which it is busy, and answers "when is this resource
//! next free". Mutations and reads are serialized behind one mutex so
//! concurrent observers see consistent state.

use crate::calendar::WorkCalendar;
use crate::error::{ScheduleError, ScheduleResult};
use crate::flow::{ConditionType, ReassignmentMode};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A block of time during which a resource is busy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInterval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub task_id: String,
}

/// Resource category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Worker,
    Machine,
}

/// A pending worker-reassignment rule, keyed by its source task
///
/// Consumed (removed from the registry) at most once, when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReassignment {
    pub worker_id: String,
    pub source_task_id: String,
    pub target_task_id: String,
    pub condition_type: ConditionType,
    pub condition_value: u32,
    pub mode: ReassignmentMode,
}

/// Serializable interior of a [`ResourceCalendar`], used by checkpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceCalendarState {
    workers: HashMap<String, Vec<ResourceInterval>>,
    machines: HashMap<String, Vec<ResourceInterval>>,
    rules: Vec<PendingReassignment>,
}

impl ResourceCalendarState {
    fn intervals(&self, resource_id: &str, kind: ResourceKind) -> Option<&Vec<ResourceInterval>> {
        match kind {
            ResourceKind::Worker => self.workers.get(resource_id),
            ResourceKind::Machine => self.machines.get(resource_id),
        }
    }

    fn intervals_mut(&mut self, resource_id: &str, kind: ResourceKind) -> &mut Vec<ResourceInterval> {
        match kind {
            ResourceKind::Worker => self.workers.entry(resource_id.to_string()).or_default(),
            ResourceKind::Machine => self.machines.entry(resource_id.to_string()).or_default(),
        }
    }
}

/// Occupancy calendars for all workers and machines of a run
pub struct ResourceCalendar {
    calendar: Arc<WorkCalendar>,
    state: Mutex<ResourceCalendarState>,
}

impl ResourceCalendar {
    pub fn new(calendar: Arc<WorkCalendar>) -> Self {
        Self {
            calendar,
            state: Mutex::new(ResourceCalendarState::default()),
        }
    }

    /// Initialize the calendar for a resource; registering twice is a no-op
    pub fn register(&self, resource_id: &str, kind: ResourceKind) {
        let mut state = self.state.lock();
        match kind {
            ResourceKind::Worker => {
                state.workers.entry(resource_id.to_string()).or_default();
            }
            ResourceKind::Machine => {
                state.machines.entry(resource_id.to_string()).or_default();
            }
        }
    }

    /// Category of a known resource; unknown ids are treated as machines
    pub fn kind_of(&self, resource_id: &str) -> ResourceKind {
        if self.state.lock().workers.contains_key(resource_id) {
            ResourceKind::Worker
        } else {
            ResourceKind::Machine
        }
    }

    /// Queue a reassignment rule for later evaluation
    pub fn schedule_reassignment(&self, rule: PendingReassignment) {
        info!(
            worker = %rule.worker_id,
            source = %rule.source_task_id,
            target = %rule.target_task_id,
            "reassignment rule registered"
        );
        self.state.lock().rules.push(rule);
    }

    /// Rules currently pending (mostly useful to tests and checkpoints)
    pub fn pending_rules(&self) -> Vec<PendingReassignment> {
        self.state.lock().rules.clone()
    }

    /// First instant at or after `from` when the resource is both inside
    /// working time and free of recorded intervals
    pub fn next_available(
        &self,
        resource_id: &str,
        from: NaiveDateTime,
        kind: ResourceKind,
    ) -> NaiveDateTime {
        // Copy the intervals out so the search runs outside the lock.
        let intervals: Vec<ResourceInterval> = {
            let state = self.state.lock();
            state
                .intervals(resource_id, kind)
                .cloned()
                .unwrap_or_default()
        };

        let mut proposed = self.calendar.snap_to_working(from);
        loop {
            let conflict = intervals
                .iter()
                .find(|interval| interval.start <= proposed && proposed < interval.end);
            match conflict {
                Some(interval) => {
                    proposed = self.calendar.snap_to_working(interval.end);
                }
                None => return proposed,
            }
        }
    }

    /// Record that a resource is busy on `task_id` during `[start, end)`
    ///
    /// Overlap with an existing interval is a precondition violation.
    pub fn assign(
        &self,
        resource_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        task_id: &str,
        kind: ResourceKind,
    ) -> ScheduleResult<()> {
        let mut state = self.state.lock();
        let intervals = state.intervals_mut(resource_id, kind);
        let overlap = intervals
            .iter()
            .any(|interval| start < interval.end && interval.start < end);
        if overlap {
            debug_assert!(
                false,
                "resource '{}' double-booked during [{}, {})",
                resource_id, start, end
            );
            return Err(ScheduleError::OverlappingInterval {
                resource: resource_id.to_string(),
                start,
                end,
            });
        }
        intervals.push(ResourceInterval {
            start,
            end,
            task_id: task_id.to_string(),
        });
        intervals.sort_by_key(|interval| interval.start);
        debug!(
            resource = %resource_id,
            task = %task_id,
            %start,
            %end,
            "resource assigned"
        );
        Ok(())
    }

    /// Fire every satisfied AFTER_UNITS rule of `task_id` and remove it
    ///
    /// ON_FINISH rules are not evaluated here; the engine handles them
    /// directly at task completion.
    pub fn notify_units_completed(
        &self,
        task_id: &str,
        total_units: u32,
    ) -> Vec<PendingReassignment> {
        let mut state = self.state.lock();
        let (fired, kept): (Vec<_>, Vec<_>) = state.rules.drain(..).partition(|rule| {
            rule.source_task_id == task_id
                && rule.condition_type == ConditionType::AfterUnits
                && rule.condition_value <= total_units
        });
        state.rules = kept;
        for rule in &fired {
            info!(
                worker = %rule.worker_id,
                source = %task_id,
                target = %rule.target_task_id,
                "AFTER_UNITS reassignment fired"
            );
        }
        fired
    }

    /// Consume the ON_FINISH rules of `task_id` owned by just-freed workers
    pub fn take_on_finish_rules(
        &self,
        task_id: &str,
        freed_workers: &[String],
    ) -> Vec<PendingReassignment> {
        let mut state = self.state.lock();
        let (fired, kept): (Vec<_>, Vec<_>) = state.rules.drain(..).partition(|rule| {
            rule.source_task_id == task_id
                && rule.condition_type == ConditionType::OnFinish
                && freed_workers.contains(&rule.worker_id)
        });
        state.rules = kept;
        fired
    }

    /// Recorded intervals of one resource, ordered by start
    pub fn intervals_for(&self, resource_id: &str, kind: ResourceKind) -> Vec<ResourceInterval> {
        self.state
            .lock()
            .intervals(resource_id, kind)
            .cloned()
            .unwrap_or_default()
    }

    /// All registered resource ids of a kind
    pub fn resource_ids(&self, kind: ResourceKind) -> Vec<String> {
        let state = self.state.lock();
        match kind {
            ResourceKind::Worker => state.workers.keys().cloned().collect(),
            ResourceKind::Machine => state.machines.keys().cloned().collect(),
        }
    }

    /// Snapshot the interior state for a checkpoint
    pub fn snapshot_state(&self) -> ResourceCalendarState {
        self.state.lock().clone()
    }

    /// Replace the interior state from a checkpoint
    pub fn restore_state(&self, state: ResourceCalendarState) {
        *self.state.lock() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalendarConfig;
    use chrono::NaiveDate;

    fn dt(d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn resources() -> ResourceCalendar {
        let calendar = Arc::new(WorkCalendar::new(CalendarConfig::default()));
        let resources = ResourceCalendar::new(calendar);
        resources.register("W1", ResourceKind::Worker);
        resources
    }

    #[test]
    fn test_next_available_hops_over_busy_intervals() {
        let res = resources();
        // Monday 2026-03-09
        res.assign("W1", dt(9, 8, 0), dt(9, 9, 0), "a", ResourceKind::Worker)
            .unwrap();
        res.assign("W1", dt(9, 9, 0), dt(9, 10, 0), "b", ResourceKind::Worker)
            .unwrap();
        assert_eq!(
            res.next_available("W1", dt(9, 8, 30), ResourceKind::Worker),
            dt(9, 10, 0)
        );
        assert_eq!(
            res.next_available("W1", dt(9, 10, 0), ResourceKind::Worker),
            dt(9, 10, 0)
        );
    }

    #[test]
    fn test_next_available_snaps_to_working_time() {
        let res = resources();
        // Saturday morning snaps to Monday 08:00
        assert_eq!(
            res.next_available("W1", dt(7, 9, 0), ResourceKind::Worker),
            dt(9, 8, 0)
        );
    }

    #[test]
    fn test_overlapping_assignment_fails() {
        let res = resources();
        res.assign("W1", dt(9, 8, 0), dt(9, 9, 0), "a", ResourceKind::Worker)
            .unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            res.assign("W1", dt(9, 8, 30), dt(9, 9, 30), "b", ResourceKind::Worker)
        }));
        // debug builds assert, release builds return the error
        match result {
            Ok(outcome) => assert!(matches!(
                outcome,
                Err(ScheduleError::OverlappingInterval { .. })
            )),
            Err(_) => {}
        }
    }

    #[test]
    fn test_after_units_rules_fire_once() {
        let res = resources();
        res.schedule_reassignment(PendingReassignment {
            worker_id: "W1".to_string(),
            source_task_id: "a".to_string(),
            target_task_id: "b".to_string(),
            condition_type: ConditionType::AfterUnits,
            condition_value: 2,
            mode: ReassignmentMode::ParallelJoin,
        });
        assert!(res.notify_units_completed("a", 1).is_empty());
        let fired = res.notify_units_completed("a", 2);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].worker_id, "W1");
        // consumed: does not fire again
        assert!(res.notify_units_completed("a", 5).is_empty());
    }

    #[test]
    fn test_on_finish_rules_ignore_other_workers() {
        let res = resources();
        res.schedule_reassignment(PendingReassignment {
            worker_id: "W1".to_string(),
            source_task_id: "a".to_string(),
            target_task_id: "b".to_string(),
            condition_type: ConditionType::OnFinish,
            condition_value: 0,
            mode: ReassignmentMode::Replace,
        });
        assert!(res
            .take_on_finish_rules("a", &["W2".to_string()])
            .is_empty());
        let fired = res.take_on_finish_rules("a", &["W1".to_string()]);
        assert_eq!(fired.len(), 1);
        assert!(res.pending_rules().is_empty());
    }
}
