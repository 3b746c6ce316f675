//! Checkpoint snapshots of engine state
//!
//! A snapshot captures the clock, the event queue with its insertion
//! counter, every timeline and the resource-calendar state. Restoring a
//! snapshot into an engine built on the same input continues the run with
//! identical outcomes; the round trip is exact.

use crate::error::{ScheduleError, ScheduleResult};
use crate::events::EventQueue;
use crate::resources::ResourceCalendarState;
use crate::timeline::TaskTimeline;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Serialized simulation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub current_time: NaiveDateTime,
    pub queue: EventQueue,
    /// Monotonic insertion counter at capture time
    pub event_counter: u64,
    pub timelines: HashMap<String, TaskTimeline>,
    pub resources: ResourceCalendarState,
}

impl Snapshot {
    pub fn to_json(&self) -> ScheduleResult<String> {
        serde_json::to_string(self)
            .map_err(|e| ScheduleError::Checkpoint(format!("serialization failed: {}", e)))
    }

    pub fn from_json(json: &str) -> ScheduleResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ScheduleError::Checkpoint(format!("deserialization failed: {}", e)))
    }

    pub fn write_to(&self, path: &Path) -> ScheduleResult<()> {
        std::fs::write(path, self.to_json()?)
            .map_err(|e| ScheduleError::Checkpoint(format!("write failed: {}", e)))?;
        info!(path = %path.display(), "checkpoint written");
        Ok(())
    }

    pub fn read_from(path: &Path) -> ScheduleResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ScheduleError::Checkpoint(format!("read failed: {}", e)))?;
        let snapshot = Self::from_json(&json)?;
        info!(path = %path.display(), resumed_at = %snapshot.current_time, "checkpoint loaded");
        Ok(snapshot)
    }
}
