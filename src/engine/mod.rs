//! Event engine
//!
//! Owns the logical clock, the future-event queue and the per-task
//! timelines. A run seeds start events for the flow's true roots, then
//! drains the queue: each event mutates state, consults the resource
//! calendar and schedules follow-up events. When the queue empties the
//! engine compiles per-unit results and the audit log from the temporal
//! store.

mod handlers;
mod results;

pub use results::UnitResult;

use crate::audit::CalculationDecision;
use crate::calendar::WorkCalendar;
use crate::checkpoint::Snapshot;
use crate::config::CalendarConfig;
use crate::error::ScheduleResult;
use crate::events::{EventPayload, EventQueue, SimulationEvent};
use crate::flow::{validate_flow, FlowStep, MachineProfile, ProductionFlow, WorkerProfile};
use crate::resources::{PendingReassignment, ResourceCalendar, ResourceKind};
use crate::store::{EventFilter, StoreConfig, TemporalStore};
use crate::timeline::TaskTimeline;
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything the caller provides for one run
pub struct SimulationInput {
    pub flow: ProductionFlow,
    pub workers: Vec<WorkerProfile>,
    pub machines: Vec<MachineProfile>,
    pub calendar: CalendarConfig,
    pub run_start: NaiveDateTime,
    pub store: StoreConfig,
}

/// What a run produces
#[derive(Debug)]
pub struct SimulationOutcome {
    /// One row per completed unit per instance
    pub results: Vec<UnitResult>,
    /// Time-sorted engine decisions
    pub audit_log: Vec<CalculationDecision>,
}

/// A task left unfinished when the queue drained
#[derive(Debug, Clone)]
pub struct StarvedTask {
    pub task_name: String,
    pub units_finalized: u32,
    pub units_to_produce: u32,
    /// Predecessor that did not deliver enough units, when there is one
    pub blocked_by: Option<String>,
}

/// Discrete-event scheduling engine
pub struct EventEngine {
    flow: Vec<FlowStep>,
    calendar: Arc<WorkCalendar>,
    resources: ResourceCalendar,
    store: TemporalStore,
    queue: EventQueue,
    now: NaiveDateTime,
    run_start: NaiveDateTime,
    timelines: HashMap<String, TaskTimeline>,
    index_to_task: HashMap<usize, String>,
    task_to_index: HashMap<String, usize>,
    internal_audit: Vec<CalculationDecision>,
    seeded: bool,
}

impl EventEngine {
    /// Validate the input and build the initial simulation state
    pub fn new(input: SimulationInput) -> ScheduleResult<Self> {
        validate_flow(&input.flow)?;

        let calendar = Arc::new(WorkCalendar::new(input.calendar));
        let resources = ResourceCalendar::new(calendar.clone());
        for worker in &input.workers {
            resources.register(&worker.name, ResourceKind::Worker);
        }
        for machine in &input.machines {
            resources.register(&machine.id, ResourceKind::Machine);
        }

        let mut timelines = HashMap::new();
        let mut index_to_task = HashMap::new();
        let mut task_to_index = HashMap::new();
        for (index, step) in input.flow.iter().enumerate() {
            let timeline = TaskTimeline::from_step(step);
            index_to_task.insert(index, timeline.id.clone());
            task_to_index.insert(timeline.id.clone(), index);

            // Workers may appear only in step configs; machines only on
            // tasks. Register both so availability lookups always resolve.
            for worker in &step.workers {
                resources.register(worker.name(), ResourceKind::Worker);
            }
            if let Some(machine_id) = &step.task.machine_id {
                resources.register(machine_id, ResourceKind::Machine);
            }
            for assignment in &step.workers {
                if let Some(rule) = assignment.rule() {
                    resources.schedule_reassignment(PendingReassignment {
                        worker_id: assignment.name().to_string(),
                        source_task_id: step.task.id.clone(),
                        target_task_id: rule.target_task_id.clone(),
                        condition_type: rule.condition_type,
                        condition_value: rule.condition_value,
                        mode: rule.mode,
                    });
                }
            }
            if timeline.workers_assigned.is_empty() && timeline.machine_id.is_none() {
                warn!(
                    task = %timeline.name,
                    "step has neither workers nor a machine and cannot execute"
                );
            }
            timelines.insert(timeline.id.clone(), timeline);
        }
        info!(tasks = timelines.len(), "event engine initialized");

        Ok(Self {
            flow: input.flow,
            calendar,
            resources,
            store: TemporalStore::open(input.store),
            queue: EventQueue::new(),
            now: input.run_start,
            run_start: input.run_start,
            timelines,
            index_to_task,
            task_to_index,
            internal_audit: Vec::new(),
            seeded: false,
        })
    }

    /// Seed start events for every true root of the flow
    ///
    /// A step is a true root iff it is marked `is_cycle_start` and has no
    /// standard predecessor; a cycle-start mark on a step with a predecessor
    /// is logged and ignored.
    fn seed_initial_events(&mut self) {
        if self.seeded {
            return;
        }
        self.seeded = true;

        let candidates: Vec<(usize, bool, bool)> = self
            .flow
            .iter()
            .enumerate()
            .map(|(i, step)| (i, step.is_cycle_start, step.previous_task_index.is_some()))
            .collect();

        let mut root_timestamps = Vec::new();
        for (index, is_cycle_start, has_dependency) in candidates {
            if !is_cycle_start {
                continue;
            }
            let Some(task_id) = self.index_to_task.get(&index).cloned() else {
                continue;
            };
            if has_dependency {
                warn!(
                    index,
                    task = %task_id,
                    "marked as cycle start but has a standard predecessor, not seeded as root"
                );
                continue;
            }
            let (workers, machine_id, scheduled, name) = {
                let Some(timeline) = self.timelines.get(&task_id) else {
                    continue;
                };
                (
                    timeline.workers_assigned.clone(),
                    timeline.machine_id.clone(),
                    timeline.scheduled_start_date,
                    timeline.name.clone(),
                )
            };
            if workers.is_empty() && machine_id.is_none() {
                warn!(task = %name, "root step without workers or machine, skipping seed");
                continue;
            }
            let timestamp = match scheduled {
                Some(date) if date > self.now => date,
                _ => self.now,
            };
            if self.has_future_event(&task_id, 1) {
                warn!(task = %name, "duplicate initial event suppressed");
                continue;
            }
            let instance_id = match self.timelines.get_mut(&task_id) {
                Some(timeline) => timeline.start_initial_instance(workers, timestamp, 1),
                None => continue,
            };
            self.schedule(
                timestamp,
                EventPayload::StartUnit {
                    task_id: task_id.clone(),
                    unit: 1,
                    instance_id,
                    activated_by_cycle: false,
                    unlocked_by: None,
                    started_by_date: true,
                    migrated_workers: vec![],
                },
            );
            info!(task = %name, %timestamp, "root seeded");
            root_timestamps.push(timestamp);
        }

        if root_timestamps.is_empty() {
            warn!("flow has no true roots, nothing will be scheduled");
        } else if let Some(earliest) = root_timestamps.iter().min() {
            if *earliest > self.now {
                info!(from = %self.now, to = %earliest, "advancing clock to the earliest root");
                self.now = *earliest;
            }
        }
    }

    /// Process the next event; `false` once the queue is drained
    ///
    /// Seeds the root events on the first call.
    pub fn step(&mut self) -> bool {
        self.seed_initial_events();
        let Some(event) = self.queue.pop() else {
            return false;
        };
        self.now = event.timestamp;
        debug!(
            event = event.id,
            kind = event.kind().tag(),
            timestamp = %event.timestamp,
            "processing event"
        );
        self.dispatch(&event);
        self.store.record(&event);
        true
    }

    fn dispatch(&mut self, event: &SimulationEvent) {
        match event.payload.clone() {
            EventPayload::StartUnit {
                task_id,
                unit,
                instance_id,
                ..
            } => self.process_start_unit(event.id, task_id, unit, instance_id),
            EventPayload::FinishBlock {
                task_id,
                unit,
                instance_id,
                start,
                ..
            } => self.process_finish_block(task_id, unit, instance_id, start),
            EventPayload::ReassignWorker {
                worker_id,
                source_task_id,
                target_task_id,
                mode,
                reason,
            } => self.process_reassignment(worker_id, source_task_id, target_task_id, mode, reason),
            EventPayload::IdleTime {
                worker,
                blocked_task,
                wait_minutes,
                waiting_for,
                next_unit,
            } => self.process_idle_time(worker, blocked_task, wait_minutes, waiting_for, next_unit),
        }
    }

    /// Run the simulation to completion and compile the outputs
    pub fn run(&mut self) -> ScheduleResult<SimulationOutcome> {
        self.seed_initial_events();
        info!(pending = self.queue.pending_len(), "starting main loop");

        let loop_started = std::time::Instant::now();
        let mut processed: u64 = 0;
        while self.step() {
            processed += 1;
        }
        let elapsed = loop_started.elapsed();
        let throughput = if elapsed.as_secs_f64() > 0.0 {
            processed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            processed,
            elapsed_ms = elapsed.as_millis() as u64,
            events_per_second = throughput as u64,
            finished_at = %self.now,
            "simulation complete"
        );
        if self.queue.pending_len() > 0 {
            warn!(
                remaining = self.queue.pending_len(),
                "queue not empty after main loop"
            );
        }
        for starved in self.starved_tasks() {
            warn!(
                task = %starved.task_name,
                done = starved.units_finalized,
                target = starved.units_to_produce,
                blocked_by = starved.blocked_by.as_deref().unwrap_or("nothing upstream"),
                "task did not reach its unit target"
            );
        }

        self.store.flush();
        let stored = self.store.query(&EventFilter::default())?;
        let results = self.compile_results(&stored);
        let audit_log = self.compile_audit_log(&stored);
        info!(
            results = results.len(),
            audit_entries = audit_log.len(),
            "outputs compiled"
        );
        self.store.close();
        Ok(SimulationOutcome { results, audit_log })
    }

    /// Queue a payload, tracking pending starts on their timeline
    pub(crate) fn schedule(&mut self, timestamp: NaiveDateTime, payload: EventPayload) -> u64 {
        let tracked_task = match &payload {
            EventPayload::StartUnit { task_id, .. } => Some(task_id.clone()),
            _ => None,
        };
        let id = self.queue.push(timestamp, payload);
        if let Some(task_id) = tracked_task {
            if let Some(timeline) = self.timelines.get_mut(&task_id) {
                timeline.future_events.push(id);
            }
        }
        id
    }

    /// Is a live start/finish event already queued for `(task, unit)`?
    pub(crate) fn has_future_event(&self, task_id: &str, unit: u32) -> bool {
        self.queue.iter_pending().any(|event| {
            matches!(
                &event.payload,
                EventPayload::StartUnit { task_id: t, unit: u, .. }
                | EventPayload::FinishBlock { task_id: t, unit: u, .. }
                if t.as_str() == task_id && *u == unit
            )
        })
    }

    /// Wake successors whose dependency on `task_id` is now satisfied
    ///
    /// Already-completed successors propagate the signal transitively so a
    /// long rework chain unblocks in one pass; `visited` guards the
    /// recursion against cycles.
    pub(crate) fn dependency_cascade(&mut self, task_id: &str, visited: &mut HashSet<String>) {
        if !visited.insert(task_id.to_string()) {
            return;
        }
        let Some(pred_index) = self.task_to_index.get(task_id).copied() else {
            return;
        };
        let (pred_total, pred_name) = match self.timelines.get(task_id) {
            Some(timeline) => (timeline.units_finalized_total, timeline.name.clone()),
            None => return,
        };
        let dependents: Vec<String> = self
            .timelines
            .values()
            .filter(|timeline| timeline.id != task_id && timeline.dependency_index == Some(pred_index))
            .map(|timeline| timeline.id.clone())
            .collect();

        for dependent_id in dependents {
            let Some(dependent) = self.timelines.get(&dependent_id) else {
                continue;
            };
            if dependent.is_completed() {
                info!(
                    task = %dependent.name,
                    "successor already complete, propagating dependency signal through it"
                );
                self.dependency_cascade(&dependent_id, visited);
                continue;
            }

            let mut busy: HashSet<u32> = dependent
                .active_instances
                .iter()
                .map(|instance| instance.current_unit)
                .collect();
            for event in self.queue.iter_pending() {
                if let EventPayload::StartUnit { task_id: t, unit, .. }
                | EventPayload::FinishBlock { task_id: t, unit, .. } = &event.payload
                {
                    if t == &dependent_id {
                        busy.insert(*unit);
                    }
                }
            }
            let mut unit = dependent.units_finalized_total + 1;
            while busy.contains(&unit) {
                unit += 1;
            }
            if unit > dependent.units_to_produce {
                continue;
            }

            let Some(dep_index) = self.task_to_index.get(&dependent_id).copied() else {
                continue;
            };
            let min_pred = self.flow[dep_index].min_predecessor_units.max(1);
            let required = (unit - 1) * min_pred + min_pred;
            if pred_total < required {
                debug!(
                    task = %dependent.name,
                    unit,
                    required,
                    available = pred_total,
                    "dependency not yet satisfied, successor keeps sleeping"
                );
                continue;
            }

            let workers = dependent.workers_assigned.clone();
            let machine_id = dependent.machine_id.clone();
            let dependent_name = dependent.name.clone();
            if workers.is_empty() && machine_id.is_none() {
                warn!(task = %dependent_name, "cannot wake task without workers or machine");
                continue;
            }
            if dependent.scheduled_start_date.is_some() {
                info!(
                    task = %dependent_name,
                    "unblocked by dependency, its scheduled start date is ignored"
                );
            }
            info!(
                task = %dependent_name,
                unit,
                predecessor = %pred_name,
                "dependency satisfied, waking successor"
            );
            let instance_id = match self.timelines.get_mut(&dependent_id) {
                Some(timeline) => timeline.start_initial_instance(workers, self.now, unit),
                None => continue,
            };
            self.schedule(
                self.now,
                EventPayload::StartUnit {
                    task_id: dependent_id.clone(),
                    unit,
                    instance_id,
                    activated_by_cycle: false,
                    unlocked_by: Some(task_id.to_string()),
                    started_by_date: false,
                    migrated_workers: vec![],
                },
            );
        }
    }

    /// Tasks that did not reach their target, with the starving predecessor
    pub fn starved_tasks(&self) -> Vec<StarvedTask> {
        self.timelines
            .values()
            .filter(|timeline| !timeline.is_completed())
            .map(|timeline| {
                let blocked_by = timeline
                    .dependency_index
                    .and_then(|index| self.index_to_task.get(&index))
                    .and_then(|id| self.timelines.get(id))
                    .map(|pred| pred.name.clone());
                StarvedTask {
                    task_name: timeline.name.clone(),
                    units_finalized: timeline.units_finalized_total,
                    units_to_produce: timeline.units_to_produce,
                    blocked_by,
                }
            })
            .collect()
    }

    /// Capture the complete simulation state for later resumption
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            current_time: self.now,
            queue: self.queue.clone(),
            event_counter: self.queue.counter(),
            timelines: self.timelines.clone(),
            resources: self.resources.snapshot_state(),
        }
    }

    /// Restore a snapshot taken from an engine built on the same input
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.now = snapshot.current_time;
        self.queue = snapshot.queue;
        self.timelines = snapshot.timelines;
        self.resources.restore_state(snapshot.resources);
        self.seeded = true;
        info!(resumed_at = %self.now, "simulation state restored from snapshot");
    }

    // Accessors, mostly for callers that inspect a finished run.

    pub fn current_time(&self) -> NaiveDateTime {
        self.now
    }

    pub fn run_start(&self) -> NaiveDateTime {
        self.run_start
    }

    pub fn timelines(&self) -> &HashMap<String, TaskTimeline> {
        &self.timelines
    }

    pub fn resource_calendar(&self) -> &ResourceCalendar {
        &self.resources
    }

    pub fn work_calendar(&self) -> &WorkCalendar {
        &self.calendar
    }

    pub fn pending_events(&self) -> usize {
        self.queue.pending_len()
    }
}
