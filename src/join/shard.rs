use crate::error::{Error, Result};
use crate::table::{Row, Table, Value};

/// Read the key column, mapping Null to `None` and rejecting non-integers.
pub(super) fn extract_keys(table: &Table, column: usize) -> Result<Vec<Option<i64>>> {
    table
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| match &row[column] {
            Value::Null => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                Error::domain(format!(
                    "{}.{} row {}: join key must be an integer, found '{}'",
                    table.name(),
                    table.columns()[column],
                    i,
                    v
                ))
            }),
        })
        .collect()
}

/// Evenly spaced key-range boundaries shared by both sides of a join.
///
/// Shard `i` covers `[bounds[i], bounds[i + 1])`; the last bound is one past
/// the largest key so the maximum key is never lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBoundaries {
    bounds: Vec<i64>,
}

impl KeyBoundaries {
    /// Boundaries over `[min, max + 1)` of the union of both key sets.
    pub fn spanning(left: &[Option<i64>], right: &[Option<i64>], num_partitions: usize) -> Self {
        let mut keys = left.iter().chain(right.iter()).flatten();
        let (min, max) = match keys.next() {
            Some(&first) => keys.fold((first, first), |(lo, hi), &k| (lo.min(k), hi.max(k))),
            None => (0, 0),
        };
        Self::linspace(min, max, num_partitions)
    }

    pub fn linspace(min: i64, max: i64, num_partitions: usize) -> Self {
        let n = num_partitions.max(1) as i128;
        let lo = min as i128;
        let span = max as i128 + 1 - lo;
        let bounds = (0..=n).map(|i| (lo + span * i / n) as i64).collect();
        Self { bounds }
    }

    pub fn num_shards(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn bounds(&self) -> &[i64] {
        &self.bounds
    }

    /// Shard holding `key`. Null keys go to shard 0 so a left join keeps them.
    pub fn shard_of(&self, key: Option<i64>) -> usize {
        match key {
            None => 0,
            Some(k) => self.bounds[1..self.num_shards()].partition_point(|&b| b <= k),
        }
    }

    /// Move `rows` into shards according to their keys.
    pub fn split(&self, rows: Vec<Row>, keys: &[Option<i64>]) -> Vec<Vec<Row>> {
        let mut shards: Vec<Vec<Row>> = vec![Vec::new(); self.num_shards()];
        for (row, key) in rows.into_iter().zip(keys) {
            shards[self.shard_of(*key)].push(row);
        }
        shards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linspace_covers_max_key() {
        let b = KeyBoundaries::linspace(0, 9, 3);
        assert_eq!(b.bounds(), &[0, 3, 6, 10]);
        assert_eq!(b.shard_of(Some(0)), 0);
        assert_eq!(b.shard_of(Some(2)), 0);
        assert_eq!(b.shard_of(Some(3)), 1);
        assert_eq!(b.shard_of(Some(9)), 2);
        assert_eq!(b.shard_of(None), 0);
    }

    #[test]
    fn test_more_shards_than_keys() {
        let b = KeyBoundaries::linspace(5, 6, 8);
        assert_eq!(b.num_shards(), 8);
        let s5 = b.shard_of(Some(5));
        let s6 = b.shard_of(Some(6));
        assert!(s5 < s6);
        assert!(s6 < 8);
    }

    #[test]
    fn test_spanning_uses_union() {
        let b = KeyBoundaries::spanning(&[Some(4), None], &[Some(-2), Some(11)], 2);
        assert_eq!(b.bounds(), &[-2, 5, 12]);
    }

    #[test]
    fn test_split_moves_rows_by_key() {
        let b = KeyBoundaries::linspace(0, 9, 2);
        let rows: Vec<Row> = [7, 1, 5, 0]
            .iter()
            .map(|&k| vec![Value::Int(k)])
            .collect();
        let keys: Vec<Option<i64>> = vec![Some(7), Some(1), Some(5), None];
        let shards = b.split(rows, &keys);
        assert_eq!(shards[0], vec![vec![Value::Int(1)], vec![Value::Int(0)]]);
        assert_eq!(shards[1], vec![vec![Value::Int(7)], vec![Value::Int(5)]]);
    }

    #[test]
    fn test_single_shard() {
        let b = KeyBoundaries::linspace(0, 100, 1);
        assert_eq!(b.shard_of(Some(100)), 0);
        assert_eq!(b.shard_of(Some(0)), 0);
    }
}
