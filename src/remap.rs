//! Primary-key remapping and foreign-key propagation.
//!
//! A remap assigns new dense ids to one table and records the change as an
//! [`IdUpdate`]. Dependent tables are then rewritten with
//! [`IdRemapper::propagate`], which uses the range-partitioned join so large
//! Visit tables never need a single monolithic merge.

use crate::config::JoinSettings;
use crate::error::{Error, Result};
use crate::join::{self, Cardinality, JoinOptions};
use crate::population::{Population, HID, LID, PID, START_TIME};
use crate::table::{int_table, Table, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const ROW_POSITION: &str = "__row_position";

/// How new ids are chosen for a table's primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdAssignment {
    /// Add a constant to every id.
    Offset(i64),
    /// `order[new_position] = old_row`; the new id of a row is its new position.
    Reorder(Vec<usize>),
}

/// Record of a remap, applied to foreign keys in dependent tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdUpdate {
    Offset(i64),
    Mapping(RemapTable),
}

impl IdUpdate {
    /// Update that undoes this one.
    pub fn inverse(&self) -> IdUpdate {
        match self {
            IdUpdate::Offset(k) => IdUpdate::Offset(-k),
            IdUpdate::Mapping(m) => IdUpdate::Mapping(m.inverse()),
        }
    }
}

/// Bijection between old and new ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapTable {
    old_ids: Vec<i64>,
    new_ids: Vec<i64>,
}

impl RemapTable {
    /// Build a mapping; both columns must be free of duplicates and equally long.
    pub fn new(old_ids: Vec<i64>, new_ids: Vec<i64>) -> Result<Self> {
        if old_ids.len() != new_ids.len() {
            return Err(Error::domain(format!(
                "remap table has {} old ids but {} new ids",
                old_ids.len(),
                new_ids.len()
            )));
        }
        ensure_unique(&old_ids, "old id")?;
        ensure_unique(&new_ids, "new id")?;
        Ok(Self { old_ids, new_ids })
    }

    pub fn len(&self) -> usize {
        self.old_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.old_ids.is_empty()
    }

    pub fn old_ids(&self) -> &[i64] {
        &self.old_ids
    }

    pub fn new_ids(&self) -> &[i64] {
        &self.new_ids
    }

    pub fn inverse(&self) -> RemapTable {
        RemapTable {
            old_ids: self.new_ids.clone(),
            new_ids: self.old_ids.clone(),
        }
    }

    pub fn lookup(&self) -> HashMap<i64, i64> {
        self.old_ids
            .iter()
            .copied()
            .zip(self.new_ids.iter().copied())
            .collect()
    }

    /// Two-column table `(key, new_column)` suitable for joining.
    fn to_table(&self, key: &str, new_column: &str) -> Table {
        let rows: Vec<Vec<i64>> = self
            .old_ids
            .iter()
            .zip(&self.new_ids)
            .map(|(&o, &n)| vec![o, n])
            .collect();
        let refs: Vec<&[i64]> = rows.iter().map(|r| r.as_slice()).collect();
        int_table("remap", &[key, new_column], &refs)
    }
}

fn ensure_unique(ids: &[i64], what: &str) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(*id) {
            return Err(Error::domain(format!("duplicate {} {}", what, id)));
        }
    }
    Ok(())
}

/// Check that `ids` cover `[start, start + n)` exactly once.
pub fn check_dense(ids: &[i64], start: i64, what: &str) -> Result<()> {
    let n = ids.len();
    let mut seen = vec![false; n];
    for &id in ids {
        let pos = id - start;
        if pos < 0 || pos as usize >= n {
            return Err(Error::domain(format!(
                "{}: id {} outside [{}, {})",
                what,
                id,
                start,
                start + n as i64
            )));
        }
        if std::mem::replace(&mut seen[pos as usize], true) {
            return Err(Error::domain(format!("{}: id {} assigned twice", what, id)));
        }
    }
    Ok(())
}

/// Check that `order` is a permutation of `[0, n)`.
pub fn check_permutation(order: &[usize], n: usize) -> Result<()> {
    if order.len() != n {
        return Err(Error::domain(format!(
            "permutation has {} entries for {} elements",
            order.len(),
            n
        )));
    }
    let mut seen = vec![false; n];
    for &i in order {
        if i >= n || std::mem::replace(&mut seen[i], true) {
            return Err(Error::domain(format!(
                "permutation is not a bijection over [0, {}): bad entry {}",
                n, i
            )));
        }
    }
    Ok(())
}

/// Inverse of a permutation: `inverse[order[i]] == i`.
pub fn invert_order(order: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; order.len()];
    for (new, &old) in order.iter().enumerate() {
        inverse[old] = new;
    }
    inverse
}

/// Result of remapping a whole population.
#[derive(Debug, Clone)]
pub struct RemappedPopulation {
    pub population: Population,
    pub person_update: Option<IdUpdate>,
    pub location_update: Option<IdUpdate>,
}

pub struct IdRemapper {
    settings: JoinSettings,
    keep_original_ids: bool,
}

impl IdRemapper {
    pub fn new(settings: JoinSettings) -> Self {
        Self {
            settings,
            keep_original_ids: false,
        }
    }

    /// Record the pre-remap ids in an `old_<id>` column. An existing
    /// `old_<id>` column is never overwritten, so the first remap wins.
    pub fn with_original_ids(mut self, keep: bool) -> Self {
        self.keep_original_ids = keep;
        self
    }

    fn record_original_ids(&self, table: &mut Table, id_column: &str, ids: &[i64]) -> Result<()> {
        let original = format!("old_{}", id_column);
        if !self.keep_original_ids || table.has_column(&original) {
            return Ok(());
        }
        table.set_column(&original, ids.iter().map(|&i| Value::Int(i)).collect())
    }

    fn join_options(&self) -> JoinOptions {
        let validate = if self.settings.validate {
            Cardinality::ManyToOne
        } else {
            Cardinality::ManyToMany
        };
        JoinOptions::left()
            .with_validation(validate)
            .with_partitions(self.settings.num_partitions)
            .with_workers(self.settings.num_workers)
            .with_sort_by(&[ROW_POSITION])
    }

    /// Assign new primary keys to `table`.
    pub fn remap(&self, table: &Table, id_column: &str, assignment: &IdAssignment) -> Result<(Table, IdUpdate)> {
        let ids = table.int_column(id_column)?;
        match assignment {
            IdAssignment::Offset(k) => {
                let new_ids: Vec<i64> = ids.iter().map(|id| id + k).collect();
                check_dense(&new_ids, 0, &format!("{}.{}", table.name(), id_column))?;
                let mut out = table.clone();
                out.set_column(id_column, new_ids.into_iter().map(Value::Int).collect())?;
                Ok((out, IdUpdate::Offset(*k)))
            }
            IdAssignment::Reorder(order) => {
                check_permutation(order, table.len())?;
                let mut out = table.take_rows(order)?;
                let old_ids: Vec<i64> = order.iter().map(|&r| ids[r]).collect();
                let new_ids: Vec<i64> = (0..order.len() as i64).collect();
                self.record_original_ids(&mut out, id_column, &old_ids)?;
                out.set_column(id_column, new_ids.iter().map(|&i| Value::Int(i)).collect())?;
                let mapping = RemapTable::new(old_ids, new_ids)?;
                debug!(table = table.name(), rows = out.len(), "Reindexed primary key");
                Ok((out, IdUpdate::Mapping(mapping)))
            }
        }
    }

    /// Make `id_column` dense, starting at `offset`.
    ///
    /// Already-contiguous ids are shifted and reported as an offset; otherwise
    /// the row position becomes the id, recorded like a reorder.
    pub fn make_contiguous(&self, table: &Table, id_column: &str, offset: i64) -> Result<(Table, IdUpdate)> {
        let ids = table.int_column(id_column)?;
        let contiguous = ids.windows(2).all(|w| w[1] - w[0] == 1);
        if contiguous {
            let shift = offset - ids.first().copied().unwrap_or(0);
            info!(table = table.name(), shift, "Ids already contiguous; shifting");
            let mut out = table.clone();
            out.set_column(id_column, ids.iter().map(|id| Value::Int(id + shift)).collect())?;
            return Ok((out, IdUpdate::Offset(shift)));
        }

        info!(table = table.name(), "Ids not contiguous; using row positions");
        let new_ids: Vec<i64> = (0..ids.len() as i64).map(|i| i + offset).collect();
        let mut out = table.clone();
        self.record_original_ids(&mut out, id_column, &ids)?;
        out.set_column(id_column, new_ids.iter().map(|&i| Value::Int(i)).collect())?;
        Ok((out, IdUpdate::Mapping(RemapTable::new(ids, new_ids)?)))
    }

    /// Rewrite the foreign key `column` of `dependent` according to `update`.
    ///
    /// Row order is preserved. Null references stay Null.
    pub fn propagate(&self, dependent: &Table, column: &str, update: &IdUpdate) -> Result<Table> {
        let col = dependent.column_index(column)?;
        match update {
            IdUpdate::Offset(k) => {
                let values = dependent
                    .rows()
                    .iter()
                    .enumerate()
                    .map(|(r, row)| match &row[col] {
                        Value::Null => Ok(Value::Null),
                        _ => Ok(Value::Int(dependent.int_at(r, col)? + k)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mut out = dependent.clone();
                out.set_column(column, values)?;
                Ok(out)
            }
            IdUpdate::Mapping(mapping) => self.propagate_mapping(dependent, column, mapping),
        }
    }

    fn propagate_mapping(&self, dependent: &Table, column: &str, mapping: &RemapTable) -> Result<Table> {
        let context = format!("{}.{} remap", dependent.name(), column);
        let new_column = format!("__new_{}", column);

        let before = if self.settings.validate {
            Some(group_sizes(dependent, column)?)
        } else {
            None
        };

        let mut input = dependent.clone();
        input.set_column(ROW_POSITION, (0..dependent.len() as i64).map(Value::Int).collect())?;
        let remapper = mapping.to_table(column, &new_column);
        let mut joined = join::join(input, remapper, column, &self.join_options())?;

        if joined.len() != dependent.len() {
            if self.settings.validate {
                return Err(Error::cardinality(context, dependent.len(), joined.len()));
            }
            warn!(
                table = dependent.name(),
                column,
                expected = dependent.len(),
                actual = joined.len(),
                "Remap changed row count"
            );
        }

        let old_idx = joined.column_index(column)?;
        let new_idx = joined.column_index(&new_column)?;
        let mut missing = 0usize;
        let values: Vec<Value> = joined
            .rows()
            .iter()
            .map(|row| {
                if row[new_idx].is_null() && !row[old_idx].is_null() {
                    missing += 1;
                }
                row[new_idx].clone()
            })
            .collect();
        if missing > 0 {
            warn!(table = dependent.name(), column, missing, "References to unmapped keys");
            return Err(Error::cardinality(
                format!("{}: rows referencing unmapped keys", context),
                dependent.len(),
                dependent.len() - missing,
            ));
        }

        joined.set_column(column, values)?;
        joined.drop_column(&new_column)?;
        joined.drop_column(ROW_POSITION)?;

        if let Some(before) = before {
            let after = group_sizes(&joined, column)?;
            let lookup = mapping.lookup();
            for (old, count) in &before {
                let new = lookup.get(old).copied().unwrap_or(*old);
                let post = after.get(&new).copied().unwrap_or(0);
                if post != *count {
                    return Err(Error::cardinality(
                        format!("{}: group size of key {} -> {}", context, old, new),
                        *count,
                        post,
                    ));
                }
            }
            if before.len() != after.len() {
                return Err(Error::cardinality(
                    format!("{}: distinct key count", context),
                    before.len(),
                    after.len(),
                ));
            }
        }

        Ok(joined.with_name(dependent.name()))
    }

    /// Reorder people and/or locations and rewrite every reference to them.
    ///
    /// Visits are re-sorted by `(pid, start_time)` afterwards.
    pub fn remap_population(
        &self,
        population: &Population,
        person_order: Option<&[usize]>,
        location_order: Option<&[usize]>,
    ) -> Result<RemappedPopulation> {
        let mut people = population.people.clone();
        let mut locations = population.locations.clone();
        let mut visits = population.visits.clone();

        let person_update = match person_order {
            Some(order) => {
                let (remapped, update) = self.remap(&people, PID, &IdAssignment::Reorder(order.to_vec()))?;
                people = remapped;
                visits = self.propagate(&visits, PID, &update)?;
                Some(update)
            }
            None => None,
        };

        let location_update = match location_order {
            Some(order) => {
                let (remapped, update) = self.remap(&locations, LID, &IdAssignment::Reorder(order.to_vec()))?;
                locations = remapped;
                visits = self.propagate(&visits, LID, &update)?;
                if people.has_column(HID) {
                    people = self.propagate(&people, HID, &update)?;
                }
                Some(update)
            }
            None => None,
        };

        visits.sort_by_columns(&[PID, START_TIME])?;
        info!(
            people = people.len(),
            locations = locations.len(),
            visits = visits.len(),
            "Remapped population"
        );

        Ok(RemappedPopulation {
            population: Population::new(people, locations, visits),
            person_update,
            location_update,
        })
    }
}

/// Number of rows referencing each non-null key.
fn group_sizes(table: &Table, column: &str) -> Result<HashMap<i64, usize>> {
    let col = table.column_index(column)?;
    let mut sizes = HashMap::new();
    for (r, row) in table.rows().iter().enumerate() {
        if row[col].is_null() {
            continue;
        }
        *sizes.entry(table.int_at(r, col)?).or_insert(0) += 1;
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::int_table;

    fn remapper() -> IdRemapper {
        IdRemapper::new(JoinSettings {
            num_partitions: 3,
            num_workers: 2,
            validate: true,
        })
        .with_original_ids(true)
    }

    #[test]
    fn test_reorder_builds_bijection() {
        let locations = int_table("locations", &["lid", "cap"], &[&[0, 10], &[1, 11], &[2, 12]]);
        let (out, update) = remapper()
            .remap(&locations, "lid", &IdAssignment::Reorder(vec![2, 0, 1]))
            .unwrap();
        assert_eq!(out.int_column("lid").unwrap(), vec![0, 1, 2]);
        assert_eq!(out.int_column("cap").unwrap(), vec![12, 10, 11]);
        match update {
            IdUpdate::Mapping(m) => {
                assert_eq!(m.old_ids(), &[2, 0, 1]);
                assert_eq!(m.new_ids(), &[0, 1, 2]);
            }
            other => panic!("expected mapping, got {:?}", other),
        }
    }

    #[test]
    fn test_reorder_rejects_non_bijection() {
        let t = int_table("t", &["lid"], &[&[0], &[1]]);
        let r = remapper();
        assert!(matches!(
            r.remap(&t, "lid", &IdAssignment::Reorder(vec![0, 0])),
            Err(Error::Domain(_))
        ));
        assert!(matches!(
            r.remap(&t, "lid", &IdAssignment::Reorder(vec![0])),
            Err(Error::Domain(_))
        ));
    }

    #[test]
    fn test_offset_must_land_on_dense_domain() {
        let t = int_table("t", &["pid"], &[&[5], &[6]]);
        let r = remapper();
        let (out, update) = r.remap(&t, "pid", &IdAssignment::Offset(-5)).unwrap();
        assert_eq!(out.int_column("pid").unwrap(), vec![0, 1]);
        assert_eq!(update, IdUpdate::Offset(-5));
        assert!(r.remap(&t, "pid", &IdAssignment::Offset(0)).is_err());
    }

    #[test]
    fn test_propagate_mapping_preserves_order_and_counts() {
        let r = remapper();
        let visits = int_table(
            "visits",
            &["pid", "lid"],
            &[&[0, 2], &[0, 0], &[1, 2], &[2, 1], &[3, 2]],
        );
        let mapping = IdUpdate::Mapping(RemapTable::new(vec![2, 0, 1], vec![0, 1, 2]).unwrap());
        let out = r.propagate(&visits, "lid", &mapping).unwrap();
        assert_eq!(out.columns(), visits.columns());
        assert_eq!(out.int_column("pid").unwrap(), vec![0, 0, 1, 2, 3]);
        assert_eq!(out.int_column("lid").unwrap(), vec![0, 1, 0, 2, 0]);

        let back = r.propagate(&out, "lid", &mapping.inverse()).unwrap();
        assert_eq!(back, visits);
    }

    #[test]
    fn test_propagate_unmapped_key_fails() {
        let visits = int_table("visits", &["lid"], &[&[0], &[7]]);
        let mapping = IdUpdate::Mapping(RemapTable::new(vec![0], vec![0]).unwrap());
        assert!(matches!(
            remapper().propagate(&visits, "lid", &mapping),
            Err(Error::Cardinality { .. })
        ));
    }

    #[test]
    fn test_make_contiguous() {
        let r = remapper();
        let dense = int_table("people", &["pid"], &[&[10], &[11], &[12]]);
        let (out, update) = r.make_contiguous(&dense, "pid", 0).unwrap();
        assert_eq!(update, IdUpdate::Offset(-10));
        assert_eq!(out.int_column("pid").unwrap(), vec![0, 1, 2]);

        let sparse = int_table("locations", &["lid"], &[&[40], &[7], &[19]]);
        let (out, update) = r.make_contiguous(&sparse, "lid", 3).unwrap();
        assert_eq!(out.int_column("lid").unwrap(), vec![3, 4, 5]);
        assert_eq!(out.int_column("old_lid").unwrap(), vec![40, 7, 19]);
        let visits = int_table("visits", &["lid"], &[&[19], &[40]]);
        let visits = r.propagate(&visits, "lid", &update).unwrap();
        assert_eq!(visits.int_column("lid").unwrap(), vec![5, 3]);
    }

    #[test]
    fn test_remap_population_rewrites_all_references() {
        let people = int_table("people", &["pid", "hid"], &[&[0, 1], &[1, 0]]);
        let locations = int_table("locations", &["lid"], &[&[0], &[1]]);
        let visits = int_table(
            "visits",
            &["pid", "lid", "start_time", "duration"],
            &[&[0, 1, 5, 1], &[1, 0, 0, 1], &[0, 0, 1, 1]],
        );
        let population = Population::new(people, locations, visits);
        let out = remapper()
            .remap_population(&population, Some(&[1, 0]), Some(&[1, 0]))
            .unwrap();
        let p = out.population;
        assert_eq!(p.people.int_column("pid").unwrap(), vec![0, 1]);
        // person 1 (home 0) is now person 0 with home 1
        assert_eq!(p.people.int_column("hid").unwrap(), vec![1, 0]);
        assert_eq!(p.visits.int_column("pid").unwrap(), vec![0, 1, 1]);
        assert_eq!(p.visits.int_column("lid").unwrap(), vec![1, 1, 0]);
        assert_eq!(p.visits.int_column("start_time").unwrap(), vec![0, 1, 5]);
    }

    #[test]
    fn test_invert_order() {
        let order = vec![2, 0, 3, 1];
        let inv = invert_order(&order);
        assert_eq!(inv, vec![1, 3, 0, 2]);
        assert!(check_permutation(&inv, 4).is_ok());
    }

    #[test]
    fn test_reorder_round_trip_restores_table() {
        let r = IdRemapper::new(JoinSettings::default());
        let t = int_table("locations", &["lid", "cap"], &[&[0, 10], &[1, 11], &[2, 12]]);
        let order = vec![2, 0, 1];
        let (forward, _) = r.remap(&t, "lid", &IdAssignment::Reorder(order.clone())).unwrap();
        assert!(!forward.has_column("old_lid"));
        let (back, _) = r
            .remap(&forward, "lid", &IdAssignment::Reorder(invert_order(&order)))
            .unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_first_remap_keeps_original_ids() {
        let r = remapper();
        let t = int_table("locations", &["lid"], &[&[0], &[1], &[2]]);
        let (reordered, _) = r.remap(&t, "lid", &IdAssignment::Reorder(vec![2, 0, 1])).unwrap();
        assert_eq!(reordered.int_column("old_lid").unwrap(), vec![2, 0, 1]);

        let mut sparse = reordered.clone();
        sparse
            .set_column("lid", vec![Value::Int(5), Value::Int(9), Value::Int(30)])
            .unwrap();
        let (dense, _) = r.make_contiguous(&sparse, "lid", 0).unwrap();
        assert_eq!(dense.int_column("lid").unwrap(), vec![0, 1, 2]);
        assert_eq!(dense.int_column("old_lid").unwrap(), vec![2, 0, 1]);
    }
}
