//! Discrete-event production scheduling core
//!
//! This crate computes, for a declarative production flow of inter-dependent
//! tasks with per-unit durations, worker pools, machines, cyclic rework
//! loops and worker-reassignment rules, a concrete per-unit execution
//! timeline that respects a working calendar (shifts, breaks, holidays).
//!
//! The core is four tightly coupled subsystems:
//! - an event engine draining a priority queue against a single logical clock
//! - per-task timelines tracking parallel worker instances
//! - per-resource occupancy calendars with next-available queries
//! - a working-time calculator translating between work minutes and
//!   wall-clock time
//!
//! ```no_run
//! use takt_engine::{
//!     CalendarConfig, EventEngine, SimulationInput, StoreConfig,
//! };
//!
//! # fn demo(flow: takt_engine::ProductionFlow, run_start: chrono::NaiveDateTime)
//! # -> takt_engine::ScheduleResult<()> {
//! let mut engine = EventEngine::new(SimulationInput {
//!     flow,
//!     workers: vec![],
//!     machines: vec![],
//!     calendar: CalendarConfig::default(),
//!     run_start,
//!     store: StoreConfig::InMemory,
//! })?;
//! let outcome = engine.run()?;
//! for row in &outcome.results {
//!     println!("{} unit {} -> {}", row.task_name, row.unit_number, row.end);
//! }
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod calendar;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod flow;
pub mod pila;
pub mod resources;
pub mod store;
pub mod timeline;

pub use audit::{CalculationDecision, DecisionStatus};
pub use calendar::WorkCalendar;
pub use checkpoint::Snapshot;
pub use config::{CalendarConfig, RawCalendarConfig};
pub use engine::{EventEngine, SimulationInput, SimulationOutcome, StarvedTask, UnitResult};
pub use error::{ScheduleError, ScheduleResult};
pub use events::{EventKind, EventPayload, EventQueue, SimulationEvent};
pub use flow::{
    ConditionType, FlowStep, MachineProfile, ProductionFlow, ReassignmentMode, ReassignmentRule,
    TaskSpec, WorkerAssignment, WorkerProfile,
};
pub use resources::{PendingReassignment, ResourceCalendar, ResourceInterval, ResourceKind};
pub use store::{EventFilter, StoreConfig, StoredEvent, TemporalStore};
pub use timeline::{CompletedUnit, CompletionOutcome, Instance, TaskTimeline};
