//! Per-shard hash join.
//!
//! Build phase indexes the right shard by key; probe phase walks the left shard
//! in order and emits joined rows. Cardinality checks run here so a violation
//! in any shard aborts the whole join.

use super::{JoinOptions, JoinType};
use crate::error::{Error, Result};
use crate::table::{Row, Value};
use std::collections::HashMap;

pub(super) fn join_shard(
    left: Vec<Row>,
    right: Vec<Row>,
    left_key: usize,
    right_key: usize,
    right_width: usize,
    options: &JoinOptions,
    key_name: &str,
) -> Result<Vec<Row>> {
    // Build
    let mut index: HashMap<i64, Vec<usize>> = HashMap::with_capacity(right.len());
    for (i, row) in right.iter().enumerate() {
        if let Some(k) = row[right_key].as_int() {
            index.entry(k).or_default().push(i);
        }
    }

    if options.validate.right_unique() {
        if let Some((k, rows)) = index.iter().find(|(_, rows)| rows.len() > 1) {
            return Err(Error::cardinality(
                format!(
                    "{} join on '{}': duplicate right key {}",
                    options.validate, key_name, k
                ),
                1,
                rows.len(),
            ));
        }
    }

    if options.validate.left_unique() {
        let mut seen: HashMap<i64, usize> = HashMap::with_capacity(left.len());
        for row in &left {
            if let Some(k) = row[left_key].as_int() {
                let count = seen.entry(k).or_insert(0);
                *count += 1;
                if *count > 1 {
                    return Err(Error::cardinality(
                        format!(
                            "{} join on '{}': duplicate left key {}",
                            options.validate, key_name, k
                        ),
                        1,
                        *count,
                    ));
                }
            }
        }
    }

    // Probe
    let mut out = Vec::with_capacity(left.len());
    for row in left {
        let matches = row[left_key].as_int().and_then(|k| index.get(&k));
        match matches {
            Some(rows) => {
                for &r in rows {
                    let mut joined = row.clone();
                    joined.extend(
                        right[r]
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| *i != right_key)
                            .map(|(_, v)| v.clone()),
                    );
                    out.push(joined);
                }
            }
            None if options.join_type == JoinType::Left => {
                let mut joined = row;
                let pad = right_width.saturating_sub(1);
                joined.extend(std::iter::repeat(Value::Null).take(pad));
                out.push(joined);
            }
            None => {}
        }
    }
    Ok(out)
}
