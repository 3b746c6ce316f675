//! Shared builders for the integration suites

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use takt_engine::{
    CalendarConfig, ConditionType, EventEngine, FlowStep, ProductionFlow, ReassignmentMode,
    ReassignmentRule, SimulationInput, StoreConfig, TaskSpec, WorkerAssignment, WorkerProfile,
};

/// Monday 2026-03-02, 08:00
pub fn monday_8am() -> NaiveDateTime {
    date(2026, 3, 2).and_hms_opt(8, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

pub struct StepBuilder {
    step: FlowStep,
}

impl StepBuilder {
    pub fn new(id: &str, duration_per_unit: f64, units: u32) -> Self {
        Self {
            step: FlowStep {
                task: TaskSpec {
                    id: id.to_string(),
                    name: id.to_string(),
                    duration_per_unit,
                    required_skill_level: 1,
                    machine_id: None,
                    department: None,
                    product_code: None,
                    product_desc: None,
                    fabrication_id: None,
                },
                workers: vec![],
                trigger_units: units,
                previous_task_index: None,
                min_predecessor_units: 1,
                is_cycle_start: false,
                units_per_cycle: 1,
                next_cyclic_task_index: None,
                scheduled_start_date: None,
            },
        }
    }

    pub fn worker(mut self, name: &str) -> Self {
        self.step
            .workers
            .push(WorkerAssignment::Name(name.to_string()));
        self
    }

    pub fn worker_with_rule(
        mut self,
        name: &str,
        condition_type: ConditionType,
        condition_value: u32,
        target_task_id: &str,
        mode: ReassignmentMode,
    ) -> Self {
        self.step.workers.push(WorkerAssignment::Detailed {
            name: name.to_string(),
            reassignment_rule: Some(ReassignmentRule {
                condition_type,
                condition_value,
                target_task_id: target_task_id.to_string(),
                mode,
            }),
        });
        self
    }

    pub fn root(mut self) -> Self {
        self.step.is_cycle_start = true;
        self
    }

    pub fn depends_on(mut self, index: usize, min_predecessor_units: u32) -> Self {
        self.step.previous_task_index = Some(index);
        self.step.min_predecessor_units = min_predecessor_units;
        self
    }

    pub fn cycle_to(mut self, index: usize, units_per_cycle: u32) -> Self {
        self.step.next_cyclic_task_index = Some(index);
        self.step.units_per_cycle = units_per_cycle;
        self
    }

    pub fn machine(mut self, id: &str) -> Self {
        self.step.task.machine_id = Some(id.to_string());
        self
    }

    pub fn scheduled(mut self, start: NaiveDateTime) -> Self {
        self.step.scheduled_start_date = Some(start);
        self
    }

    pub fn build(self) -> FlowStep {
        self.step
    }
}

/// Engine over the default calendar (08:00-17:00, 12:00-13:00 break)
pub fn engine_for(flow: ProductionFlow, workers: &[&str], run_start: NaiveDateTime) -> EventEngine {
    engine_with_calendar(flow, workers, run_start, CalendarConfig::default())
}

pub fn engine_with_calendar(
    flow: ProductionFlow,
    workers: &[&str],
    run_start: NaiveDateTime,
    calendar: CalendarConfig,
) -> EventEngine {
    EventEngine::new(SimulationInput {
        flow,
        workers: workers
            .iter()
            .map(|name| WorkerProfile::new(*name, 1))
            .collect(),
        machines: vec![],
        calendar,
        run_start,
        store: StoreConfig::InMemory,
    })
    .expect("engine construction")
}
