//! Result compilation and audit-log derivation
//!
//! After the queue drains, every persisted FIN_BLOQUE event is replayed into
//! one per-unit result row, and all stored events plus the engine's internal
//! decisions become the audit log.

use super::EventEngine;
use crate::audit::{CalculationDecision, DecisionStatus};
use crate::events::TIMESTAMP_FORMAT;
use crate::store::StoredEvent;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// One completed unit of one task, ready for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    pub task_name: String,
    /// "<task> - Unit <n>"
    pub task_detail: String,
    pub department: String,
    pub start: Option<NaiveDateTime>,
    pub end: NaiveDateTime,
    /// Strictly working minutes between start and end
    pub duration_min: f64,
    /// Comma-joined worker names, or "Unassigned"
    pub assigned_workers: String,
    pub worker_list: Vec<String>,
    pub machine_name: String,
    pub product_code: String,
    pub product_desc: String,
    pub unit_number: u32,
    pub fabrication_id: String,
    /// Position of the task in the original flow
    pub flow_index: Option<usize>,
    /// Flow position of the standard predecessor
    pub parent_index: Option<usize>,
    /// "Day N - HH:MM" relative to the earliest start in the run
    pub start_formatted: String,
    pub end_formatted: String,
    /// Workdays spanned by this unit, inclusive
    pub work_days: u32,
}

impl EventEngine {
    /// Build one result row per persisted unit completion
    pub(super) fn compile_results(&self, stored: &[StoredEvent]) -> Vec<UnitResult> {
        let mut rows: Vec<UnitResult> = Vec::new();
        for event in stored
            .iter()
            .filter(|event| event.event_type == "FIN_BLOQUE_TRABAJO")
        {
            let Some(task_id) = event.data.get("task_id").and_then(Value::as_str) else {
                warn!("finish event without task id in store, skipping row");
                continue;
            };
            let Some(index) = self.task_to_index.get(task_id).copied() else {
                warn!(task = %task_id, "finish event references unknown task, skipping row");
                continue;
            };
            let step = &self.flow[index];
            let unit = event
                .data
                .get("unit")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            let start = event
                .data
                .get("start")
                .and_then(Value::as_str)
                .and_then(|s| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok());
            let end = event.timestamp;

            // The real work content of this unit, independent of the duration
            // that was computed at scheduling time.
            let duration_min = start
                .map(|s| self.calendar.work_minutes_between(s, end))
                .unwrap_or(0.0);
            let duration_min = (duration_min * 100.0).round() / 100.0;

            let worker_list: Vec<String> = event
                .data
                .get("workers")
                .and_then(Value::as_array)
                .map(|workers| {
                    workers
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let assigned_workers = if worker_list.is_empty() {
                "Unassigned".to_string()
            } else {
                worker_list.join(", ")
            };
            let machine_name = event
                .data
                .get("machine_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| step.task.machine_id.clone())
                .unwrap_or_else(|| "N/A".to_string());

            rows.push(UnitResult {
                task_name: step.task.name.clone(),
                task_detail: format!("{} - Unit {}", step.task.name, unit),
                department: step
                    .task
                    .department
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
                start,
                end,
                duration_min,
                assigned_workers,
                worker_list,
                machine_name,
                product_code: step
                    .task
                    .product_code
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
                product_desc: step
                    .task
                    .product_desc
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
                unit_number: unit,
                fabrication_id: step
                    .task
                    .fabrication_id
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
                flow_index: Some(index),
                parent_index: step.previous_task_index,
                start_formatted: String::new(),
                end_formatted: String::new(),
                work_days: 0,
            });
        }

        if rows.is_empty() {
            return rows;
        }

        let first_date = rows
            .iter()
            .filter_map(|row| row.start)
            .map(|start| start.date())
            .min()
            .unwrap_or_else(|| self.run_start.date());
        for row in &mut rows {
            match row.start {
                Some(start) => {
                    let day = (start.date() - first_date).num_days() + 1;
                    row.start_formatted = format!("Day {} - {}", day, start.format("%H:%M"));
                    row.work_days = self.calendar.count_workdays(start, row.end);
                }
                None => row.start_formatted = "N/A".to_string(),
            }
            let end_day = (row.end.date() - first_date).num_days() + 1;
            row.end_formatted = format!("Day {} - {}", end_day, row.end.format("%H:%M"));
        }
        rows
    }

    /// Merge stored events and internal decisions into one sorted audit log
    pub(super) fn compile_audit_log(&self, stored: &[StoredEvent]) -> Vec<CalculationDecision> {
        let mut log: Vec<CalculationDecision> = Vec::new();
        for event in stored {
            // Idle events already produced a richer internal decision when
            // they were processed; deriving another here would duplicate it.
            if event.event_type == "TIEMPO_INACTIVO" {
                continue;
            }
            let step = event
                .task_id
                .as_deref()
                .and_then(|task_id| self.task_to_index.get(task_id))
                .map(|index| &self.flow[*index]);
            let task_name = step
                .map(|step| step.task.name.clone())
                .unwrap_or_else(|| "Unknown task".to_string());

            let (reason, user_friendly_reason, icon, status) =
                describe_event(&event.event_type, &event.data, &task_name);

            let details = event
                .data
                .as_object()
                .cloned()
                .unwrap_or_default();
            log.push(CalculationDecision {
                timestamp: event.timestamp,
                decision_type: event.event_type.clone(),
                reason,
                user_friendly_reason,
                task_name: Some(task_name),
                product_code: step.and_then(|step| step.task.product_code.clone()),
                product_desc: step.and_then(|step| step.task.product_desc.clone()),
                details,
                status,
                icon,
                start_date: None,
                end_date: None,
            });
        }
        log.extend(self.internal_audit.iter().cloned());
        log.sort_by_key(|decision| decision.timestamp);
        log
    }
}

/// Event-specific audit wording, icon and severity
fn describe_event(
    event_type: &str,
    data: &Value,
    task_name: &str,
) -> (String, String, String, DecisionStatus) {
    match event_type {
        "INICIO_UNIDAD" => {
            let unit = data.get("unit").and_then(Value::as_u64).unwrap_or(0);
            let unlocked_by = data.get("unlocked_by").and_then(Value::as_str);
            if unlocked_by.is_some() {
                (
                    format!(
                        "Starting unit {} of '{}' (unblocked by a completed dependency)",
                        unit, task_name
                    ),
                    format!(
                        "Unit {} started after its predecessor delivered enough units",
                        unit
                    ),
                    "🔓".to_string(),
                    DecisionStatus::Positive,
                )
            } else {
                (
                    format!("Starting unit {} of '{}'", unit, task_name),
                    format!("Production of unit {} began", unit),
                    "▶".to_string(),
                    DecisionStatus::Positive,
                )
            }
        }
        "FIN_BLOQUE_TRABAJO" => {
            let unit = data.get("unit").and_then(Value::as_u64).unwrap_or(0);
            let duration = data
                .get("computed_duration")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let workers = data
                .get("workers")
                .and_then(Value::as_array)
                .map(|workers| {
                    workers
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            (
                format!(
                    "Completed unit {} of '{}' by {} in {:.1} min",
                    unit, task_name, workers, duration
                ),
                format!("Unit {} finished successfully in {:.1} minutes", unit, duration),
                "✅".to_string(),
                DecisionStatus::Positive,
            )
        }
        "REASIGNACION_TRABAJADOR" => {
            let worker = data
                .get("worker_id")
                .and_then(Value::as_str)
                .unwrap_or("worker");
            let source = data
                .get("source_task_id")
                .and_then(Value::as_str)
                .unwrap_or("N/A");
            let target = data
                .get("target_task_id")
                .and_then(Value::as_str)
                .unwrap_or("N/A");
            let reason = data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("scheduled reassignment");
            (
                format!(
                    "Reassignment: '{}' from '{}' to '{}' ({})",
                    worker, source, target, reason
                ),
                format!("Worker {} was moved to balance the production flow", worker),
                "🔄".to_string(),
                DecisionStatus::Neutral,
            )
        }
        _ => (
            format!("Event '{}' on '{}'", event_type, task_name),
            format!("Processed a '{}' event", event_type),
            "ℹ".to_string(),
            DecisionStatus::Neutral,
        ),
    }
}
