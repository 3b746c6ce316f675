//! Randomized invariant checks
//!
//! Generates random calendars-and-flows and asserts the structural
//! guarantees the engine makes regardless of input shape.

mod common;

use common::{engine_for, monday_8am, StepBuilder};
use std::collections::HashSet;
use takt_engine::{CalendarConfig, EventEngine, ResourceKind, WorkCalendar};

#[test]
fn work_minute_arithmetic_round_trips() {
    fastrand::seed(0x5eed);
    let calendar = WorkCalendar::new(CalendarConfig::default());
    for _ in 0..300 {
        let origin = monday_8am()
            + chrono::Duration::days(fastrand::i64(0..365))
            + chrono::Duration::minutes(fastrand::i64(0..1440));
        let minutes = fastrand::f64() * 10_000.0;
        let end = calendar.add_work_minutes(origin, minutes);
        let measured = calendar.work_minutes_between(calendar.snap_to_working(origin), end);
        assert!(
            (measured - minutes).abs() < 1e-3,
            "round trip from {} of {} gave {}",
            origin,
            minutes,
            measured
        );
    }
}

fn assert_structural_invariants(engine: &EventEngine) {
    // Unit counters never exceed their targets, and history matches them
    // with no unit finalized twice.
    for timeline in engine.timelines().values() {
        assert!(
            timeline.units_finalized_total <= timeline.units_to_produce,
            "task '{}' overproduced",
            timeline.name
        );
        assert_eq!(
            timeline.history.len() as u32,
            timeline.units_finalized_total,
            "task '{}' history out of sync",
            timeline.name
        );
        let mut units = HashSet::new();
        for record in &timeline.history {
            assert!(
                units.insert(record.unit),
                "task '{}' finalized unit {} twice",
                timeline.name,
                record.unit
            );
        }
    }
    // Every resource's recorded intervals are pairwise non-overlapping.
    for kind in [ResourceKind::Worker, ResourceKind::Machine] {
        for resource in engine.resource_calendar().resource_ids(kind) {
            let intervals = engine.resource_calendar().intervals_for(&resource, kind);
            for pair in intervals.windows(2) {
                assert!(
                    pair[0].end <= pair[1].start,
                    "resource '{}' double-booked: [{}, {}) overlaps [{}, {})",
                    resource,
                    pair[0].start,
                    pair[0].end,
                    pair[1].start,
                    pair[1].end
                );
            }
        }
    }
}

#[test]
fn random_serial_chains_complete_cleanly() {
    fastrand::seed(0xbeef);
    let pool = ["W1", "W2", "W3", "W4", "W5", "W6"];
    for _ in 0..25 {
        let task_count = fastrand::usize(2..=5);
        let mut flow = Vec::new();
        // units never grow along the chain, so no task is legitimately
        // starved and every timeline must reach its target
        let mut max_units = 4;
        for index in 0..task_count {
            let duration = fastrand::u32(5..=50) as f64;
            let units = fastrand::u32(1..=max_units);
            max_units = units;
            let mut builder = StepBuilder::new(&format!("T{}", index), duration, units);
            // one or two workers drawn from a shared pool
            let first = pool[fastrand::usize(0..pool.len())];
            builder = builder.worker(first);
            if fastrand::bool() {
                let second = pool[fastrand::usize(0..pool.len())];
                if second != first {
                    builder = builder.worker(second);
                }
            }
            if index == 0 {
                builder = builder.root();
            } else {
                builder = builder.depends_on(index - 1, 1);
            }
            flow.push(builder.build());
        }

        let mut engine = engine_for(flow, &pool, monday_8am());
        let outcome = engine.run().unwrap();

        assert_structural_invariants(&engine);
        // with finite serial chains every task must reach its target
        assert!(
            engine.starved_tasks().is_empty(),
            "serial chain starved: {:?}",
            engine.starved_tasks()
        );
        // one result row per finalized unit, each (task, unit) at most once
        let mut pairs = HashSet::new();
        for row in &outcome.results {
            assert!(pairs.insert((row.task_name.clone(), row.unit_number)));
        }
        let expected: u32 = engine
            .timelines()
            .values()
            .map(|timeline| timeline.units_finalized_total)
            .sum();
        assert_eq!(outcome.results.len() as u32, expected);
    }
}

#[test]
fn random_mutual_cycles_terminate() {
    fastrand::seed(0xcafe);
    for _ in 0..20 {
        let a_units = fastrand::u32(1..=4);
        let b_units = fastrand::u32(1..=4);
        let flow = vec![
            StepBuilder::new("A", fastrand::u32(5..=30) as f64, a_units)
                .worker("WA")
                .root()
                .cycle_to(1, 1)
                .build(),
            StepBuilder::new("B", fastrand::u32(5..=30) as f64, b_units)
                .worker("WB")
                .root()
                .cycle_to(0, 1)
                .build(),
        ];
        let mut engine = engine_for(flow, &["WA", "WB"], monday_8am());
        let outcome = engine.run().unwrap();

        assert_structural_invariants(&engine);
        assert_eq!(engine.pending_events(), 0);
        let mut pairs = HashSet::new();
        for row in &outcome.results {
            assert!(
                pairs.insert((row.task_name.clone(), row.unit_number)),
                "duplicate completion in cyclic flow"
            );
        }
    }
}
