#![allow(dead_code)]

use pop_partition::population::{DURATION, END_TIME, HID, LID, PID, START_TIME};
use pop_partition::table::Row;
use pop_partition::{FileNames, PipelineConfig, Population, PopulationOffsets, Table, TableStore, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

pub const DAY: i64 = 86_400;

/// A self-consistent population: dense ids, every visit resolves, every person
/// has a home, and visits are sorted by `(pid, start_time)`.
///
/// Locations carry a two-level admin hierarchy and a `type` column where the
/// first `locations / 4` rows are homes.
pub fn synthetic_population(people: usize, locations: usize, seed: u64) -> Population {
    assert!(locations > 0, "need at least one location");
    let mut rng = StdRng::seed_from_u64(seed);
    let homes = (locations / 4).max(1);

    let location_rows: Vec<Row> = (0..locations)
        .map(|l| {
            let region = l % 3;
            let district = l % 7;
            vec![
                Value::Int(l as i64),
                Value::Text(format!("R{}", region)),
                Value::Text(format!("R{}-D{}", region, district)),
                Value::Text(if l < homes { "home".to_string() } else { "work".to_string() }),
            ]
        })
        .collect();
    let location_table = Table::from_rows(
        "locations",
        columns(&[LID, "admin1", "admin2", "type"]),
        location_rows,
    )
    .unwrap();

    let mut people_rows = Vec::with_capacity(people);
    let mut visit_rows = Vec::new();
    for p in 0..people {
        let home = rng.random_range(0..homes);
        people_rows.push(vec![
            Value::Int(p as i64),
            Value::Int(home as i64),
            Value::Int(rng.random_range(0..90)),
        ]);

        let mut t = rng.random_range(0..3_600);
        let stops = rng.random_range(1..5);
        for stop in 0..stops {
            let lid = if stop == 0 {
                home
            } else {
                rng.random_range(0..locations)
            };
            let duration = rng.random_range(600..14_400);
            visit_rows.push(vec![
                Value::Int(p as i64),
                Value::Int(lid as i64),
                Value::Int(t),
                Value::Int(duration),
                Value::Int(t + duration),
            ]);
            t += duration + rng.random_range(0..1_800);
            if t >= DAY {
                break;
            }
        }
    }

    let people_table = Table::from_rows("people", columns(&[PID, HID, "age"]), people_rows).unwrap();
    let visit_table = Table::from_rows(
        "visits",
        columns(&[PID, LID, START_TIME, DURATION, END_TIME]),
        visit_rows,
    )
    .unwrap();
    Population::new(people_table, location_table, visit_table)
}

/// Map every pid and lid through `id * stride + shift`, leaving gaps in both key spaces.
pub fn with_sparse_ids(population: &Population, stride: i64, shift: i64) -> Population {
    let sparse = |table: &Table, column: &str| -> Table {
        let mut out = table.clone();
        let ids = table.int_column(column).unwrap();
        out.set_column(column, ids.iter().map(|id| Value::Int(id * stride + shift)).collect())
            .unwrap();
        out
    };
    let people = sparse(&sparse(&population.people, PID), HID);
    let locations = sparse(&population.locations, LID);
    let visits = sparse(&sparse(&population.visits, PID), LID);
    Population::new(people, locations, visits)
}

pub fn write_population(dir: &Path, population: &Population) {
    population
        .save(&TableStore::new(dir), &FileNames::default(), &PopulationOffsets::default())
        .unwrap();
}

pub fn read_population(dir: &Path) -> Population {
    Population::load(&TableStore::new(dir), &FileNames::default()).unwrap()
}

/// Small shards and a real worker pool so every join crosses shard boundaries.
pub fn test_config(partitions: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.join.num_partitions = 5;
    config.join.num_workers = 2;
    config.occupancy.num_workers = 2;
    config.planner.num_partitions = partitions;
    config.cluster.num_partitions = partitions;
    config.cluster.admin_columns = vec!["admin1".to_string(), "admin2".to_string()];
    config
}

/// Visit count per value of `column` in the Visits table.
pub fn visit_counts(visits: &Table, column: &str) -> std::collections::BTreeMap<i64, usize> {
    let mut counts = std::collections::BTreeMap::new();
    for id in visits.int_column(column).unwrap() {
        *counts.entry(id).or_insert(0) += 1;
    }
    counts
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}
