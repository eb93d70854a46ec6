//! Per-location occupancy heuristics.
//!
//! For every location we count its visits (`total_visits`) and sweep its visit
//! intervals to find the largest number of simultaneously present visitors
//! (`max_simultaneous_visits`). Locations are independent, so the sweep runs on
//! a worker pool with one group per task.

use crate::config::OccupancyConfig;
use crate::error::{Error, Result};
use crate::table::{Table, Value};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

pub const TOTAL_VISITS: &str = "total_visits";
pub const MAX_SIMULTANEOUS_VISITS: &str = "max_simultaneous_visits";

/// Ordering of an end event and a start event at the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Departures free capacity before arrivals: `[0,10)` and `[10,15)` never overlap.
    #[default]
    EndBeforeStart,
    /// Arrivals are counted before departures: touching intervals overlap at the boundary.
    StartBeforeEnd,
}

/// Heuristics for a single location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Occupancy {
    pub total_visits: u64,
    pub max_simultaneous_visits: u64,
}

/// A visit interval, `end = start + duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

/// Sweep `intervals` and return the occupancy of one location.
///
/// The result does not depend on the order of `intervals`.
pub fn sweep(intervals: &[Interval], tie_break: TieBreak) -> Occupancy {
    // (time, rank, delta); rank orders events sharing a timestamp
    let (end_rank, start_rank) = match tie_break {
        TieBreak::EndBeforeStart => (0u8, 1u8),
        TieBreak::StartBeforeEnd => (1u8, 0u8),
    };
    let mut events: Vec<(i64, u8, i64)> = Vec::with_capacity(intervals.len() * 2);
    for iv in intervals {
        events.push((iv.start, start_rank, 1));
        events.push((iv.end, end_rank, -1));
    }
    events.sort_unstable();

    let mut current = 0i64;
    let mut max = 0i64;
    for (_, _, delta) in events {
        current += delta;
        max = max.max(current);
    }

    Occupancy {
        total_visits: intervals.len() as u64,
        max_simultaneous_visits: max as u64,
    }
}

/// Computes occupancy heuristics over a Visit table.
pub struct OccupancyAnalyzer {
    config: OccupancyConfig,
}

impl OccupancyAnalyzer {
    pub fn new(config: OccupancyConfig) -> Self {
        Self { config }
    }

    /// Group visit intervals by location, validating times on the way.
    pub fn group_visits(visits: &Table) -> Result<HashMap<i64, Vec<Interval>>> {
        let lid = visits.column_index("lid")?;
        let start = visits.column_index("start_time")?;
        let duration = visits.column_index("duration")?;

        let mut groups: HashMap<i64, Vec<Interval>> = HashMap::new();
        for row in 0..visits.len() {
            let s = visits.int_at(row, start)?;
            let d = visits.int_at(row, duration)?;
            if s < 0 || d < 0 {
                return Err(Error::domain(format!(
                    "visit row {}: negative start_time/duration ({}, {})",
                    row, s, d
                )));
            }
            let end = s.checked_add(d).ok_or_else(|| {
                Error::domain(format!("visit row {}: start_time + duration overflows ({}, {})", row, s, d))
            })?;
            groups
                .entry(visits.int_at(row, lid)?)
                .or_default()
                .push(Interval { start: s, end });
        }
        Ok(groups)
    }

    /// Occupancy for every location that appears in `visits`.
    pub fn compute(&self, visits: &Table) -> Result<HashMap<i64, Occupancy>> {
        let started = Instant::now();
        let groups = Self::group_visits(visits)?;
        let tie_break = self.config.tie_break;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_workers.max(1))
            .build()?;
        let results: HashMap<i64, Occupancy> = pool.install(|| {
            groups
                .par_iter()
                .map(|(lid, intervals)| (*lid, sweep(intervals, tie_break)))
                .collect()
        });

        info!(
            locations = results.len(),
            visits = visits.len(),
            workers = self.config.num_workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Computed occupancy heuristics"
        );
        Ok(results)
    }

    /// Return `locations` with fresh `total_visits` / `max_simultaneous_visits` columns.
    ///
    /// Existing heuristic columns are replaced, and locations without visits get
    /// zeros rather than being dropped.
    pub fn annotate(&self, locations: &Table, visits: &Table) -> Result<Table> {
        let occupancy = self.compute(visits)?;
        let lids = locations.int_column("lid")?;

        let mut annotated = locations.clone();
        annotated.drop_columns_if_present(&[TOTAL_VISITS, MAX_SIMULTANEOUS_VISITS]);

        let mut total = Vec::with_capacity(lids.len());
        let mut max = Vec::with_capacity(lids.len());
        let mut unvisited = 0usize;
        for lid in &lids {
            let occ = occupancy.get(lid).copied().unwrap_or_else(|| {
                unvisited += 1;
                Occupancy::default()
            });
            total.push(Value::Int(occ.total_visits as i64));
            max.push(Value::Int(occ.max_simultaneous_visits as i64));
        }
        annotated.set_column(TOTAL_VISITS, total)?;
        annotated.set_column(MAX_SIMULTANEOUS_VISITS, max)?;

        debug!(unvisited, "Locations without visits were given zero heuristics");
        Ok(annotated)
    }
}

/// Dataset-level summary of the heuristics and the person x location matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancySummary {
    pub msv_median: f64,
    pub msv_max: f64,
    pub msv_mean: f64,
    pub msv_mean_sq: f64,
    pub tv_median: f64,
    pub tv_max: f64,
    pub tv_mean: f64,
    pub tv_mean_sq: f64,
    /// Distinct (person, location) pairs.
    pub nnz: usize,
    /// Mean number of distinct locations per visiting person.
    pub annz: f64,
    /// Largest total visit duration at one location.
    pub onenorm: f64,
    /// Frobenius norm of the person x location duration matrix.
    pub frobnorm: f64,
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn moments(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = values.len() as f64;
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    let mean = values.iter().sum::<f64>() / n;
    let mean_sq = values.iter().map(|v| v * v).sum::<f64>() / n;
    (max, mean, mean_sq)
}

/// Summarize an annotated Locations table together with its visits.
pub fn summarize(locations: &Table, visits: &Table) -> Result<OccupancySummary> {
    let mut msv = locations.f64_column(MAX_SIMULTANEOUS_VISITS)?;
    let mut tv = locations.f64_column(TOTAL_VISITS)?;
    let (msv_max, msv_mean, msv_mean_sq) = moments(&msv);
    let (tv_max, tv_mean, tv_mean_sq) = moments(&tv);

    let pid = visits.column_index("pid")?;
    let lid = visits.column_index("lid")?;
    let duration = visits.column_index("duration")?;
    let mut matrix: HashMap<(i64, i64), f64> = HashMap::new();
    for row in 0..visits.len() {
        let key = (visits.int_at(row, pid)?, visits.int_at(row, lid)?);
        *matrix.entry(key).or_insert(0.0) += visits.int_at(row, duration)? as f64;
    }

    let mut per_person: HashMap<i64, usize> = HashMap::new();
    let mut per_location: HashMap<i64, f64> = HashMap::new();
    let mut sum_sq = 0.0;
    for (&(p, l), &d) in &matrix {
        *per_person.entry(p).or_insert(0) += 1;
        *per_location.entry(l).or_insert(0.0) += d;
        sum_sq += d * d;
    }
    let annz = if per_person.is_empty() {
        0.0
    } else {
        matrix.len() as f64 / per_person.len() as f64
    };

    Ok(OccupancySummary {
        msv_median: median(&mut msv),
        msv_max,
        msv_mean,
        msv_mean_sq,
        tv_median: median(&mut tv),
        tv_max,
        tv_mean,
        tv_mean_sq,
        nnz: matrix.len(),
        annz,
        onenorm: per_location.values().cloned().fold(0.0, f64::max),
        frobnorm: sum_sq.sqrt(),
    })
}
