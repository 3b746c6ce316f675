//! Event handlers
//!
//! Each event kind carries its own processing semantics. Handlers are total:
//! any internal failure is logged with context and produces no follow-up
//! events, so a single bad event cannot crash a run. The FIN_BLOQUE handler
//! applies a strict priority chain deciding what freed workers do next.

use super::EventEngine;
use crate::audit::{CalculationDecision, DecisionStatus};
use crate::events::EventPayload;
use crate::flow::ReassignmentMode;
use chrono::NaiveDateTime;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Idle waits below this many minutes are not worth an audit entry
const IDLE_THRESHOLD_MINUTES: f64 = 5.0;

/// Resource waits below this many working minutes are not recorded
const RESOURCE_WAIT_NOTE_MINUTES: f64 = 1.0;

/// Waits beyond this many minutes are flagged as warnings
const WAIT_WARNING_MINUTES: f64 = 60.0;

impl EventEngine {
    /// INICIO_UNIDAD: resolve resource availability and book the work block
    pub(super) fn process_start_unit(
        &mut self,
        event_id: u64,
        task_id: String,
        unit: u32,
        instance_id: String,
    ) {
        if let Some(timeline) = self.timelines.get_mut(&task_id) {
            timeline.future_events.retain(|id| *id != event_id);
        }
        let Some(timeline) = self.timelines.get(&task_id) else {
            warn!(task = %task_id, "start event for unknown task, dropping");
            return;
        };
        if timeline.is_completed() {
            debug!(task = %timeline.name, unit, "task already complete, ignoring start");
            return;
        }
        let Some(instance) = timeline.instance(&instance_id) else {
            warn!(
                task = %timeline.name,
                unit,
                instance = %instance_id,
                "instance not found, probably cancelled, dropping start"
            );
            return;
        };
        let workers = instance.workers.clone();
        let machine_id = timeline.machine_id.clone();
        let task_name = timeline.name.clone();
        let duration_per_unit = timeline.duration_per_unit;
        if workers.is_empty() && machine_id.is_none() {
            error!(
                task = %task_name,
                instance = %instance_id,
                "instance has neither workers nor a machine, cannot schedule"
            );
            return;
        }

        let mut resources_needed: Vec<String> = workers.clone();
        if let Some(machine) = &machine_id {
            resources_needed.push(machine.clone());
        }

        // Resolve the latest next-available moment across every resource.
        let proposed_start = self.now;
        let mut actual_start = proposed_start;
        for resource in &resources_needed {
            let kind = self.resources.kind_of(resource);
            let available = self.resources.next_available(resource, actual_start, kind);
            if available > actual_start {
                actual_start = available;
            }
        }

        // With a machine the duration is fixed; otherwise parallel workers
        // divide the effort.
        let unit_duration = if machine_id.is_some() {
            duration_per_unit
        } else {
            duration_per_unit / workers.len() as f64
        };
        let actual_end = self.calendar.add_work_minutes(actual_start, unit_duration);

        for resource in &resources_needed {
            let kind = self.resources.kind_of(resource);
            if let Err(err) = self
                .resources
                .assign(resource, actual_start, actual_end, &task_id, kind)
            {
                error!(%err, task = %task_name, "resource reservation failed, dropping start event");
                return;
            }
        }

        let wait_minutes = self.calendar.work_minutes_between(proposed_start, actual_start);
        if wait_minutes > RESOURCE_WAIT_NOTE_MINUTES {
            let status = if wait_minutes > WAIT_WARNING_MINUTES {
                DecisionStatus::Warning
            } else {
                DecisionStatus::Neutral
            };
            let decision = CalculationDecision::new(
                self.now,
                "ESPERA_RECURSOS",
                format!(
                    "'{}' waited {:.1} min for {}",
                    task_name,
                    wait_minutes,
                    resources_needed.join(", ")
                ),
                format!(
                    "A delay of {:.1} minutes was caused by busy resources",
                    wait_minutes
                ),
                status,
                "⏳",
            )
            .with_task(task_name.clone())
            .with_detail("wait_minutes", json!(wait_minutes))
            .with_detail("resources", json!(resources_needed));
            self.internal_audit.push(decision);
        }

        if let Some(timeline) = self.timelines.get_mut(&task_id) {
            if let Some(instance) = timeline.instance_mut(&instance_id) {
                instance.start_time = Some(actual_start);
            }
        }
        let fin_id = self.schedule(
            actual_end,
            EventPayload::FinishBlock {
                task_id: task_id.clone(),
                unit,
                instance_id: instance_id.clone(),
                start: actual_start,
                workers: workers.clone(),
                machine_id: machine_id.clone(),
                computed_duration: unit_duration,
            },
        );
        if let Some(timeline) = self.timelines.get_mut(&task_id) {
            if let Some(instance) = timeline.instance_mut(&instance_id) {
                instance.pending_end_event = Some(fin_id);
            }
        }
        info!(
            task = %task_name,
            unit,
            instance = %instance_id,
            start = %actual_start,
            end = %actual_end,
            duration_min = unit_duration,
            "work block scheduled"
        );
    }

    /// FIN_BLOQUE_TRABAJO: finalize the unit and route the freed workers
    ///
    /// The first matching branch wins: ON_FINISH reassignment, then task
    /// completion (with or without a cycle), then AFTER_UNITS reassignment,
    /// then the cycle tick, then plain continuation on the same task. The
    /// dependency cascade runs afterwards in every case.
    pub(super) fn process_finish_block(
        &mut self,
        task_id: String,
        unit: u32,
        instance_id: String,
        start: NaiveDateTime,
    ) {
        let Some(timeline) = self.timelines.get_mut(&task_id) else {
            warn!(task = %task_id, "finish event for unknown task, dropping");
            return;
        };
        if timeline.is_completed() {
            debug!(
                task = %timeline.name,
                unit,
                "completion for a task that already reached its target, dropping"
            );
            return;
        }
        let task_name = timeline.name.clone();
        let outcome = match timeline.complete_instance_unit(&instance_id, Some(start), self.now) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, task = %task_name, unit, "dropping finish event");
                return;
            }
        };
        let total = timeline.units_finalized_total;
        let task_completed = outcome.task_completed;
        let workers_freed = outcome.workers_freed;

        let Some(index) = self.task_to_index.get(&task_id).copied() else {
            warn!(task = %task_id, "task missing from index map");
            return;
        };
        let step = &self.flow[index];
        let units_per_cycle = step.units_per_cycle.max(1);
        let next_cyclic = step.next_cyclic_task_index;
        let min_pred_units = step.min_predecessor_units.max(1);
        let dependency_index = step.previous_task_index;
        let cycle_tick = total % units_per_cycle == 0;

        info!(
            task = %task_name,
            unit,
            total,
            completed = task_completed,
            freed = ?workers_freed,
            "work block finished"
        );

        if task_completed {
            let on_finish = self.resources.take_on_finish_rules(&task_id, &workers_freed);
            if !on_finish.is_empty() {
                // P1: ON_FINISH reassignment wins over everything else.
                info!(task = %task_name, rules = on_finish.len(), "ON_FINISH reassignment fires");
                let ruled: HashSet<String> =
                    on_finish.iter().map(|rule| rule.worker_id.clone()).collect();
                for rule in on_finish {
                    self.schedule(
                        self.now,
                        EventPayload::ReassignWorker {
                            worker_id: rule.worker_id,
                            source_task_id: rule.source_task_id,
                            target_task_id: rule.target_task_id,
                            mode: rule.mode,
                            reason: "ON_FINISH condition met".to_string(),
                        },
                    );
                }
                let unruled: Vec<String> = workers_freed
                    .iter()
                    .filter(|worker| !ruled.contains(*worker))
                    .cloned()
                    .collect();
                if !unruled.is_empty() {
                    self.report_idle_workers(&task_id, &unruled);
                }
            } else if let Some(target_index) = next_cyclic {
                // P2 with a cycle edge: the loop keeps running even though
                // this task reached its target.
                info!(task = %task_name, "task complete, routing workers along the cycle");
                self.cycle_migration(&task_id, &task_name, target_index, workers_freed);
            } else {
                // P2: task done, nothing downstream for these workers.
                let cancelled = self.queue.cancel_task_events(&task_id);
                if cancelled > 0 {
                    info!(task = %task_name, cancelled, "remaining scheduled events cancelled");
                }
                if let Some(timeline) = self.timelines.get_mut(&task_id) {
                    timeline.future_events.clear();
                }
                info!(task = %task_name, freed = ?workers_freed, "task completed, workers released");
                self.report_idle_workers(&task_id, &workers_freed);
            }
        } else {
            // P3: AFTER_UNITS rules fire from the registry exactly once.
            let fired = self.resources.notify_units_completed(&task_id, total);
            let ruled: HashSet<String> = fired.iter().map(|rule| rule.worker_id.clone()).collect();
            let fired_for_freed = workers_freed.iter().any(|worker| ruled.contains(worker));
            for rule in fired {
                self.schedule(
                    self.now,
                    EventPayload::ReassignWorker {
                        worker_id: rule.worker_id,
                        source_task_id: rule.source_task_id,
                        target_task_id: rule.target_task_id,
                        mode: rule.mode,
                        reason: "AFTER_UNITS threshold reached".to_string(),
                    },
                );
            }
            if fired_for_freed {
                info!(task = %task_name, "reassignment takes the freed workers, no continuation");
                // Freed workers without a fired rule stop here too; report
                // them idle so they do not vanish from the record.
                let unruled: Vec<String> = workers_freed
                    .iter()
                    .filter(|worker| !ruled.contains(*worker))
                    .cloned()
                    .collect();
                if !unruled.is_empty() {
                    self.report_idle_workers(&task_id, &unruled);
                }
            } else if let (true, Some(target_index)) = (cycle_tick, next_cyclic) {
                // P4: cycle tick.
                info!(task = %task_name, "cycle tick, migrating freed workers");
                self.cycle_migration(&task_id, &task_name, target_index, workers_freed);
            } else {
                // P5: default continuation on the same task.
                self.continue_on_same_task(
                    &task_id,
                    &task_name,
                    workers_freed,
                    dependency_index,
                    min_pred_units,
                );
            }
        }

        // The cascade always runs so sleeping successors wake up.
        let mut visited = HashSet::new();
        self.dependency_cascade(&task_id, &mut visited);
    }

    /// P5: put the freed workers on the next producible unit of their task
    fn continue_on_same_task(
        &mut self,
        task_id: &str,
        task_name: &str,
        workers_freed: Vec<String>,
        dependency_index: Option<usize>,
        min_pred_units: u32,
    ) {
        let (next_unit, machine_id) = {
            let Some(timeline) = self.timelines.get(task_id) else {
                return;
            };
            (timeline.next_free_unit(), timeline.machine_id.clone())
        };
        let Some(next_unit) = next_unit else {
            info!(task = %task_name, freed = ?workers_freed, "no units left, workers released");
            self.report_idle_workers(task_id, &workers_freed);
            return;
        };
        if workers_freed.is_empty() && machine_id.is_none() {
            debug!(task = %task_name, "no workers freed and no machine, nothing to continue");
            return;
        }

        if let Some(dep_index) = dependency_index {
            let required = (next_unit - 1) * min_pred_units + min_pred_units;
            let blocked = self
                .index_to_task
                .get(&dep_index)
                .and_then(|id| self.timelines.get(id))
                .filter(|predecessor| predecessor.units_finalized_total < required)
                .map(|predecessor| {
                    info!(
                        task = %task_name,
                        unit = next_unit,
                        predecessor = %predecessor.name,
                        required,
                        available = predecessor.units_finalized_total,
                        "continuation blocked, waiting for predecessor units"
                    );
                })
                .is_some();
            if blocked {
                self.report_idle_workers(task_id, &workers_freed);
                return;
            }
        }

        let instance_id = match self.timelines.get_mut(task_id) {
            Some(timeline) => {
                timeline.start_initial_instance(workers_freed.clone(), self.now, next_unit)
            }
            None => return,
        };
        info!(
            task = %task_name,
            unit = next_unit,
            workers = ?workers_freed,
            "freed workers continue on the same task"
        );
        self.schedule(
            self.now,
            EventPayload::StartUnit {
                task_id: task_id.to_string(),
                unit: next_unit,
                instance_id,
                activated_by_cycle: false,
                unlocked_by: None,
                started_by_date: false,
                migrated_workers: vec![],
            },
        );
    }

    /// Route freed workers into the cycle target's next unit
    ///
    /// Shared by P2 (task complete, cycle continues) and P4 (cycle tick).
    pub(super) fn cycle_migration(
        &mut self,
        source_task_id: &str,
        source_name: &str,
        target_index: usize,
        workers: Vec<String>,
    ) {
        let Some(target_id) = self.index_to_task.get(&target_index).cloned() else {
            error!(target_index, "cycle target index is not mapped to a task");
            return;
        };
        let (target_name, next_unit, target_units) = {
            let Some(target) = self.timelines.get(&target_id) else {
                error!(task = %target_id, "cycle target timeline missing");
                return;
            };
            (
                target.name.clone(),
                target.units_finalized_total + 1,
                target.units_to_produce,
            )
        };
        if next_unit > target_units {
            info!(
                target = %target_name,
                workers = ?workers,
                "cycle complete, target produced every unit, workers released"
            );
            self.report_idle_workers(source_task_id, &workers);
            return;
        }
        if self.has_future_event(&target_id, next_unit) {
            warn!(
                target = %target_name,
                unit = next_unit,
                "cycle hop skipped, the unit is already scheduled"
            );
            self.report_idle_workers(source_task_id, &workers);
            return;
        }
        let instance_id = match self.timelines.get_mut(&target_id) {
            Some(timeline) => timeline.start_initial_instance(workers.clone(), self.now, next_unit),
            None => return,
        };
        info!(
            source = %source_name,
            target = %target_name,
            unit = next_unit,
            workers = ?workers,
            "workers migrate along the cycle"
        );
        self.schedule(
            self.now,
            EventPayload::StartUnit {
                task_id: target_id.clone(),
                unit: next_unit,
                instance_id: instance_id.clone(),
                activated_by_cycle: true,
                unlocked_by: None,
                started_by_date: false,
                migrated_workers: workers.clone(),
            },
        );
        let decision = CalculationDecision::new(
            self.now,
            "MIGRATION_CYCLIC",
            format!(
                "Cycle tick on '{}': workers move to '{}' for unit {}",
                source_name, target_name, next_unit
            ),
            "Workers returned to the start of the rework loop".to_string(),
            DecisionStatus::Positive,
            "🔄",
        )
        .with_task(source_name.to_string())
        .with_detail("source_task", json!(source_name))
        .with_detail("target_task", json!(target_name))
        .with_detail("workers", json!(workers))
        .with_detail("new_instance", json!(instance_id));
        self.internal_audit.push(decision);
    }

    /// REASIGNACION_TRABAJADOR: move a worker between tasks
    pub(super) fn process_reassignment(
        &mut self,
        worker_id: String,
        source_task_id: String,
        target_task_id: String,
        mode: ReassignmentMode,
        reason: String,
    ) {
        info!(
            worker = %worker_id,
            source = %source_task_id,
            target = %target_task_id,
            ?mode,
            %reason,
            "reassigning worker"
        );
        if let Some(source) = self.timelines.get_mut(&source_task_id) {
            source.remove_assigned_worker(&worker_id);
        }
        let Some(target) = self.timelines.get_mut(&target_task_id) else {
            warn!(
                target = %target_task_id,
                worker = %worker_id,
                "reassignment target unknown, worker becomes idle"
            );
            return;
        };
        match mode {
            ReassignmentMode::ParallelJoin => {
                let target_name = target.name.clone();
                match target.add_parallel_instance(&worker_id, self.now) {
                    Some((instance_id, unit)) => {
                        self.schedule(
                            self.now,
                            EventPayload::StartUnit {
                                task_id: target_task_id,
                                unit,
                                instance_id,
                                activated_by_cycle: false,
                                unlocked_by: None,
                                started_by_date: false,
                                migrated_workers: vec![],
                            },
                        );
                    }
                    None => {
                        warn!(
                            worker = %worker_id,
                            target = %target_name,
                            "no parallel work available, worker becomes idle"
                        );
                    }
                }
            }
            ReassignmentMode::Replace => {
                if target.add_assigned_worker(&worker_id) {
                    self.recompute_future_events(&target_task_id);
                }
            }
        }
    }

    /// Cancel a task's pending starts and regenerate from current state
    ///
    /// Invoked after a REPLACE-mode reassignment enlarges the team.
    fn recompute_future_events(&mut self, task_id: &str) {
        let (pending, task_name) = {
            let Some(timeline) = self.timelines.get_mut(task_id) else {
                return;
            };
            (
                std::mem::take(&mut timeline.future_events),
                timeline.name.clone(),
            )
        };
        if !pending.is_empty() {
            info!(
                task = %task_name,
                cancelled = pending.len(),
                "cancelling pending starts before recomputing"
            );
            self.queue.cancel_many(&pending);
        }

        let (completed, has_instances, workers, machine_id, next_unit) = {
            let Some(timeline) = self.timelines.get(task_id) else {
                return;
            };
            (
                timeline.is_completed(),
                !timeline.active_instances.is_empty(),
                timeline.workers_assigned.clone(),
                timeline.machine_id.clone(),
                timeline.next_free_unit(),
            )
        };
        if completed {
            return;
        }
        if has_instances {
            debug!(
                task = %task_name,
                "instances already running, the enlarged team applies from the next instance"
            );
            return;
        }
        if workers.is_empty() && machine_id.is_none() {
            warn!(task = %task_name, "cannot regenerate events without workers or a machine");
            return;
        }
        let Some(next_unit) = next_unit else {
            return;
        };
        if self.has_future_event(task_id, next_unit) {
            debug!(task = %task_name, unit = next_unit, "unit already scheduled, nothing to do");
            return;
        }
        let instance_id = match self.timelines.get_mut(task_id) {
            Some(timeline) => timeline.start_initial_instance(workers, self.now, next_unit),
            None => return,
        };
        info!(task = %task_name, unit = next_unit, "events regenerated after team change");
        self.schedule(
            self.now,
            EventPayload::StartUnit {
                task_id: task_id.to_string(),
                unit: next_unit,
                instance_id,
                activated_by_cycle: false,
                unlocked_by: None,
                started_by_date: false,
                migrated_workers: vec![],
            },
        );
    }

    /// Emit TIEMPO_INACTIVO events for workers stuck waiting on a predecessor
    ///
    /// The wait is measured to the predecessor's next FIN_BLOQUE in the
    /// queue; short waits are ignored.
    pub(super) fn report_idle_workers(&mut self, task_id: &str, workers: &[String]) {
        if workers.is_empty() {
            return;
        }
        let (blocked_task, next_unit, pred_id) = {
            let Some(timeline) = self.timelines.get(task_id) else {
                return;
            };
            let Some(dep_index) = timeline.dependency_index else {
                // Nothing upstream to wait for.
                return;
            };
            let Some(pred_id) = self.index_to_task.get(&dep_index) else {
                return;
            };
            (
                timeline.name.clone(),
                timeline.units_finalized_total + 1,
                pred_id.clone(),
            )
        };
        let Some(waiting_for) = self.timelines.get(&pred_id).map(|p| p.name.clone()) else {
            return;
        };

        let next_delivery = self
            .queue
            .iter_pending()
            .filter(|event| event.timestamp > self.now)
            .filter(|event| {
                matches!(
                    &event.payload,
                    EventPayload::FinishBlock { task_id: t, .. } if t == &pred_id
                )
            })
            .map(|event| event.timestamp)
            .min();
        let Some(delivery) = next_delivery else {
            debug!(
                task = %blocked_task,
                predecessor = %waiting_for,
                "no upcoming predecessor delivery found, not reporting idle time"
            );
            return;
        };
        let wait_minutes = (delivery - self.now).num_seconds() as f64 / 60.0;
        if wait_minutes <= IDLE_THRESHOLD_MINUTES {
            debug!(
                task = %blocked_task,
                wait_minutes,
                "wait below idle threshold, not reported"
            );
            return;
        }
        for worker in workers {
            self.schedule(
                self.now,
                EventPayload::IdleTime {
                    worker: worker.clone(),
                    blocked_task: blocked_task.clone(),
                    wait_minutes,
                    waiting_for: waiting_for.clone(),
                    next_unit,
                },
            );
        }
    }

    /// TIEMPO_INACTIVO: record the wait in the audit log
    pub(super) fn process_idle_time(
        &mut self,
        worker: String,
        blocked_task: String,
        wait_minutes: f64,
        waiting_for: String,
        next_unit: u32,
    ) {
        warn!(
            worker = %worker,
            task = %blocked_task,
            wait_minutes,
            waiting_for = %waiting_for,
            "worker idle"
        );
        let decision = CalculationDecision::new(
            self.now,
            "TIEMPO_INACTIVO",
            format!(
                "Worker {} finished work on '{}' and must wait {:.1} minutes for '{}' to deliver its next unit",
                worker, blocked_task, wait_minutes, waiting_for
            ),
            format!(
                "Worker idle {:.1} min waiting for material from {}",
                wait_minutes, waiting_for
            ),
            DecisionStatus::Warning,
            "⏸",
        )
        .with_task(blocked_task.clone())
        .with_detail("worker", json!(worker))
        .with_detail("wait_minutes", json!(wait_minutes))
        .with_detail("blocked_task", json!(blocked_task))
        .with_detail("waiting_for", json!(waiting_for))
        .with_detail("next_unit", json!(next_unit));
        self.internal_audit.push(decision);
    }
}
