//! Simulation events and the time-ordered event queue
//!
//! Events drive the whole simulation: the engine drains a binary min-heap
//! keyed on `(timestamp, priority, insertion counter)`. At equal timestamps
//! reassignments run before completions, completions before starts, and idle
//! reports last; among equal keys insertion order wins. This ordering is
//! observable and tested.

use crate::flow::ReassignmentMode;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use tracing::debug;

/// Identifier of a queued event, unique within a run
pub type EventId = u64;

/// ISO-8601 layout used for every datetime that crosses the wire (event
/// payload JSON and store columns); fixed fractional width keeps string
/// comparisons chronological
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Event categories, in queue-priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    ReassignWorker,
    FinishBlock,
    StartUnit,
    IdleTime,
}

impl EventKind {
    /// Tie-break priority at equal timestamps; lower runs first
    pub fn priority(self) -> u8 {
        match self {
            EventKind::ReassignWorker => 0,
            EventKind::FinishBlock => 1,
            EventKind::StartUnit => 2,
            EventKind::IdleTime => 5,
        }
    }

    /// Wire tag used by the temporal store and the audit log
    pub fn tag(self) -> &'static str {
        match self {
            EventKind::ReassignWorker => "REASIGNACION_TRABAJADOR",
            EventKind::FinishBlock => "FIN_BLOQUE_TRABAJO",
            EventKind::StartUnit => "INICIO_UNIDAD",
            EventKind::IdleTime => "TIEMPO_INACTIVO",
        }
    }
}

/// Typed payload of a simulation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    /// Work on one unit of one instance should be scheduled
    StartUnit {
        task_id: String,
        unit: u32,
        instance_id: String,
        #[serde(default)]
        activated_by_cycle: bool,
        #[serde(default)]
        unlocked_by: Option<String>,
        #[serde(default)]
        started_by_date: bool,
        #[serde(default)]
        migrated_workers: Vec<String>,
    },
    /// A scheduled block of work ends and its unit is finalized
    FinishBlock {
        task_id: String,
        unit: u32,
        instance_id: String,
        start: NaiveDateTime,
        workers: Vec<String>,
        machine_id: Option<String>,
        computed_duration: f64,
    },
    /// A worker moves from one task to another
    ReassignWorker {
        worker_id: String,
        source_task_id: String,
        target_task_id: String,
        mode: ReassignmentMode,
        reason: String,
    },
    /// A worker has nothing to do until an upstream delivery
    IdleTime {
        worker: String,
        blocked_task: String,
        wait_minutes: f64,
        waiting_for: String,
        next_unit: u32,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::StartUnit { .. } => EventKind::StartUnit,
            EventPayload::FinishBlock { .. } => EventKind::FinishBlock,
            EventPayload::ReassignWorker { .. } => EventKind::ReassignWorker,
            EventPayload::IdleTime { .. } => EventKind::IdleTime,
        }
    }

    /// Task this event belongs to, when it has one
    pub fn task_id(&self) -> Option<&str> {
        match self {
            EventPayload::StartUnit { task_id, .. } => Some(task_id),
            EventPayload::FinishBlock { task_id, .. } => Some(task_id),
            EventPayload::ReassignWorker { source_task_id, .. } => Some(source_task_id),
            EventPayload::IdleTime { .. } => None,
        }
    }

    /// JSON form persisted in the temporal store's `datos_json` column
    pub fn data_json(&self) -> serde_json::Value {
        match self {
            EventPayload::StartUnit {
                task_id,
                unit,
                instance_id,
                activated_by_cycle,
                unlocked_by,
                started_by_date,
                migrated_workers,
            } => json!({
                "task_id": task_id,
                "unit": unit,
                "instance_id": instance_id,
                "activated_by_cycle": activated_by_cycle,
                "unlocked_by": unlocked_by,
                "started_by_date": started_by_date,
                "migrated_workers": migrated_workers,
            }),
            EventPayload::FinishBlock {
                task_id,
                unit,
                instance_id,
                start,
                workers,
                machine_id,
                computed_duration,
            } => json!({
                "task_id": task_id,
                "unit": unit,
                "instance_id": instance_id,
                "start": start.format(TIMESTAMP_FORMAT).to_string(),
                "workers": workers,
                "machine_id": machine_id,
                "computed_duration": computed_duration,
            }),
            EventPayload::ReassignWorker {
                worker_id,
                source_task_id,
                target_task_id,
                mode,
                reason,
            } => json!({
                "worker_id": worker_id,
                "source_task_id": source_task_id,
                "target_task_id": target_task_id,
                "mode": mode,
                "reason": reason,
            }),
            EventPayload::IdleTime {
                worker,
                blocked_task,
                wait_minutes,
                waiting_for,
                next_unit,
            } => json!({
                "worker": worker,
                "blocked_task": blocked_task,
                "wait_minutes": wait_minutes,
                "waiting_for": waiting_for,
                "next_unit": next_unit,
            }),
        }
    }
}

/// A timestamped event awaiting processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub id: EventId,
    pub timestamp: NaiveDateTime,
    pub payload: EventPayload,
}

impl SimulationEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueEntry {
    timestamp: NaiveDateTime,
    priority: u8,
    seq: u64,
    event: SimulationEvent,
}

impl QueueEntry {
    fn key(&self) -> (NaiveDateTime, u8, u64) {
        (self.timestamp, self.priority, self.seq)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// The engine's future-event queue
///
/// Cancellation is lazy: cancelled ids are swept when they reach the top of
/// the heap, avoiding in-heap updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
    cancelled: HashSet<EventId>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload at `timestamp`; returns the new event's id
    pub fn push(&mut self, timestamp: NaiveDateTime, payload: EventPayload) -> EventId {
        let id = self.next_seq;
        self.next_seq += 1;
        let priority = payload.kind().priority();
        self.heap.push(Reverse(QueueEntry {
            timestamp,
            priority,
            seq: id,
            event: SimulationEvent {
                id,
                timestamp,
                payload,
            },
        }));
        id
    }

    /// Remove and return the minimum live event, discarding cancelled ones
    pub fn pop(&mut self) -> Option<SimulationEvent> {
        while let Some(Reverse(entry)) = self.heap.pop() {
            if self.cancelled.remove(&entry.event.id) {
                debug!(event = entry.event.id, "dropping cancelled event");
                continue;
            }
            return Some(entry.event);
        }
        None
    }

    /// Mark one event for lazy removal
    pub fn cancel(&mut self, id: EventId) {
        self.cancelled.insert(id);
    }

    /// Mark several events for lazy removal
    pub fn cancel_many(&mut self, ids: &[EventId]) {
        for id in ids {
            self.cancelled.insert(*id);
        }
    }

    /// Cancel every pending start/finish event of one task
    pub fn cancel_task_events(&mut self, task_id: &str) -> usize {
        let to_cancel: Vec<EventId> = self
            .heap
            .iter()
            .filter(|Reverse(entry)| !self.cancelled.contains(&entry.event.id))
            .filter(|Reverse(entry)| {
                matches!(
                    &entry.event.payload,
                    EventPayload::StartUnit { task_id: t, .. }
                    | EventPayload::FinishBlock { task_id: t, .. }
                    if t.as_str() == task_id
                )
            })
            .map(|Reverse(entry)| entry.event.id)
            .collect();
        let count = to_cancel.len();
        self.cancel_many(&to_cancel);
        count
    }

    /// Iterate the live (non-cancelled) queued events, in no particular order
    pub fn iter_pending(&self) -> impl Iterator<Item = &SimulationEvent> {
        self.heap
            .iter()
            .map(|Reverse(entry)| &entry.event)
            .filter(|event| !self.cancelled.contains(&event.id))
    }

    /// Count of live queued events
    pub fn pending_len(&self) -> usize {
        self.iter_pending().count()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    /// Monotonic insertion counter (also the next event id)
    pub fn counter(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 9)
            .unwrap()
            .and_hms_opt(8, minute, 0)
            .unwrap()
    }

    fn start_payload(task: &str, unit: u32) -> EventPayload {
        EventPayload::StartUnit {
            task_id: task.to_string(),
            unit,
            instance_id: "i".to_string(),
            activated_by_cycle: false,
            unlocked_by: None,
            started_by_date: false,
            migrated_workers: vec![],
        }
    }

    fn reassign_payload(worker: &str) -> EventPayload {
        EventPayload::ReassignWorker {
            worker_id: worker.to_string(),
            source_task_id: "a".to_string(),
            target_task_id: "b".to_string(),
            mode: ReassignmentMode::ParallelJoin,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_priority_order_at_equal_timestamp() {
        let mut queue = EventQueue::new();
        queue.push(ts(0), start_payload("a", 1));
        queue.push(
            ts(0),
            EventPayload::IdleTime {
                worker: "W1".to_string(),
                blocked_task: "a".to_string(),
                wait_minutes: 10.0,
                waiting_for: "b".to_string(),
                next_unit: 2,
            },
        );
        queue.push(ts(0), reassign_payload("W1"));

        assert_eq!(queue.pop().unwrap().kind(), EventKind::ReassignWorker);
        assert_eq!(queue.pop().unwrap().kind(), EventKind::StartUnit);
        assert_eq!(queue.pop().unwrap().kind(), EventKind::IdleTime);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_insertion_order_breaks_remaining_ties() {
        let mut queue = EventQueue::new();
        let first = queue.push(ts(0), start_payload("a", 1));
        let second = queue.push(ts(0), start_payload("b", 1));
        assert_eq!(queue.pop().unwrap().id, first);
        assert_eq!(queue.pop().unwrap().id, second);
    }

    #[test]
    fn test_timestamp_dominates_priority() {
        let mut queue = EventQueue::new();
        queue.push(ts(1), reassign_payload("W1"));
        let early = queue.push(ts(0), start_payload("a", 1));
        assert_eq!(queue.pop().unwrap().id, early);
    }

    #[test]
    fn test_cancelled_events_are_swept_at_pop() {
        let mut queue = EventQueue::new();
        let doomed = queue.push(ts(0), start_payload("a", 1));
        let kept = queue.push(ts(1), start_payload("a", 2));
        queue.cancel(doomed);
        assert_eq!(queue.pop().unwrap().id, kept);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_cancel_task_events_spares_other_tasks() {
        let mut queue = EventQueue::new();
        queue.push(ts(0), start_payload("a", 1));
        queue.push(ts(0), start_payload("b", 1));
        let cancelled = queue.cancel_task_events("a");
        assert_eq!(cancelled, 1);
        let survivor = queue.pop().unwrap();
        assert_eq!(survivor.payload.task_id(), Some("b"));
    }
}
