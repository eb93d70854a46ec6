//! Range-partitioned merge-join.
//!
//! Both inputs are cut into `num_partitions` shards using a single set of
//! key-range boundaries computed over the union of their keys, so a key always
//! lands in the shard with the same index on either side. Shard pairs are then
//! joined independently on a bounded worker pool and concatenated. Peak working
//! set is one shard pair per worker instead of the whole join.
//!
//! The result equals an unsharded join as a multiset of rows. Row order is
//! unspecified unless [`JoinOptions::sort_by`] is set.
#![forbid(unsafe_code)]

mod hash_join;
mod shard;

use crate::error::{Error, Result};
use crate::table::{Row, Table};
use rayon::prelude::*;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

pub use shard::KeyBoundaries;

/// Suffix appended to right-side columns whose name collides with a left column.
pub const RIGHT_SUFFIX: &str = "_right";

/// Type of join to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// Emit only matching row pairs.
    Inner,
    /// Emit all left rows; unmatched left rows have NULL right columns.
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
        }
    }
}

/// Key multiplicity the caller expects on each side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Cardinality {
    /// No check.
    #[default]
    ManyToMany,
    /// Keys unique on both sides.
    OneToOne,
    /// Keys unique on the left.
    OneToMany,
    /// Keys unique on the right.
    ManyToOne,
}

impl Cardinality {
    fn left_unique(self) -> bool {
        matches!(self, Cardinality::OneToOne | Cardinality::OneToMany)
    }

    fn right_unique(self) -> bool {
        matches!(self, Cardinality::OneToOne | Cardinality::ManyToOne)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::ManyToMany => write!(f, "many-to-many"),
            Cardinality::OneToOne => write!(f, "one-to-one"),
            Cardinality::OneToMany => write!(f, "one-to-many"),
            Cardinality::ManyToOne => write!(f, "many-to-one"),
        }
    }
}

/// Options controlling join execution.
#[derive(Clone, Debug)]
pub struct JoinOptions {
    pub join_type: JoinType,
    pub validate: Cardinality,
    /// Number of key-range shards per side.
    pub num_partitions: usize,
    /// Size of the worker pool joining shard pairs.
    pub num_workers: usize,
    /// Columns the concatenated output is sorted by; empty leaves order unspecified.
    pub sort_by: Vec<String>,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            join_type: JoinType::Inner,
            validate: Cardinality::ManyToMany,
            num_partitions: 32,
            num_workers: 1,
            sort_by: Vec::new(),
        }
    }
}

impl JoinOptions {
    /// Create options for an inner join with default settings.
    pub fn inner() -> Self {
        Self {
            join_type: JoinType::Inner,
            ..Default::default()
        }
    }

    /// Create options for a left outer join with default settings.
    pub fn left() -> Self {
        Self {
            join_type: JoinType::Left,
            ..Default::default()
        }
    }

    pub fn with_validation(mut self, validate: Cardinality) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_partitions(mut self, num_partitions: usize) -> Self {
        self.num_partitions = num_partitions;
        self
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_sort_by(mut self, columns: &[&str]) -> Self {
        self.sort_by = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Validate join options before execution.
pub fn validate_join_options(options: &JoinOptions) -> Result<()> {
    if options.num_partitions == 0 {
        return Err(Error::domain("join num_partitions must be > 0"));
    }
    if options.num_workers == 0 {
        return Err(Error::domain("join num_workers must be > 0"));
    }
    Ok(())
}

/// Output header: all left columns, then right columns minus the key.
fn output_columns(left: &Table, right: &Table, right_key: usize) -> Vec<String> {
    let mut columns: Vec<String> = left.columns().to_vec();
    for (i, c) in right.columns().iter().enumerate() {
        if i == right_key {
            continue;
        }
        if left.has_column(c) {
            columns.push(format!("{}{}", c, RIGHT_SUFFIX));
        } else {
            columns.push(c.clone());
        }
    }
    columns
}

/// Join `left` and `right` on the integer column `key`.
///
/// Both inputs are consumed: their rows move into the shards, so the only
/// copies made are the joined output rows.
pub fn join(left: Table, right: Table, key: &str, options: &JoinOptions) -> Result<Table> {
    validate_join_options(options)?;
    let started = Instant::now();
    let left_key = left.column_index(key)?;
    let right_key = right.column_index(key)?;
    let columns = output_columns(&left, &right, right_key);

    let left_keys = shard::extract_keys(&left, left_key)?;
    let right_keys = shard::extract_keys(&right, right_key)?;
    let bounds = KeyBoundaries::spanning(&left_keys, &right_keys, options.num_partitions);

    let (left_name, _, left_rows) = left.into_parts();
    let (_, right_columns, right_rows) = right.into_parts();
    let (left_len, right_len) = (left_rows.len(), right_rows.len());
    let left_shards = bounds.split(left_rows, &left_keys);
    let right_shards = bounds.split(right_rows, &right_keys);
    drop((left_keys, right_keys));

    let right_width = right_columns.len();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.num_workers)
        .build()?;

    let shard_results: Vec<Vec<Row>> = pool.install(|| {
        left_shards
            .into_par_iter()
            .zip(right_shards.into_par_iter())
            .enumerate()
            .map(|(shard, (l, r))| {
                let (l_rows, r_rows) = (l.len(), r.len());
                let out = hash_join::join_shard(l, r, left_key, right_key, right_width, options, key)?;
                debug!(
                    shard,
                    left_rows = l_rows,
                    right_rows = r_rows,
                    out_rows = out.len(),
                    "Joined shard pair"
                );
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let rows: Vec<Row> = shard_results
        .into_iter()
        .filter(|r| !r.is_empty())
        .flatten()
        .collect();
    let mut joined = Table::from_rows(left_name, columns, rows)?;
    if !options.sort_by.is_empty() {
        let keys: Vec<&str> = options.sort_by.iter().map(|s| s.as_str()).collect();
        joined.sort_by_columns(&keys)?;
    }

    info!(
        key,
        join_type = %options.join_type,
        validate = %options.validate,
        shards = options.num_partitions,
        workers = options.num_workers,
        left_rows = left_len,
        right_rows = right_len,
        out_rows = joined.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Range-partitioned join complete"
    );
    Ok(joined)
}
