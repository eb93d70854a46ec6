//! Load-balanced partitioning of an ID space into contiguous ranges.
//!
//! A [`PartitionPlanner`] decides the order elements should be laid out in and
//! where the partition boundaries fall. Applying the order is left to
//! [`IdRemapper`](crate::remap::IdRemapper) so that every foreign key follows.

pub mod folding;
pub mod linear_cut;

use crate::config::{PartitionScheme, PlannerConfig};
use crate::error::{Error, Result};
use crate::population::LID;
use crate::remap::check_permutation;
use crate::table::{Table, Value};
use tracing::info;

pub use folding::{fold_groups, folding_partition, partitions_to_permutation};
pub use linear_cut::linear_cut;

pub const PARTITION_ID: &str = "partition_id";

const ADMIN_HIERARCHY: [&str; 4] = ["admin1", "admin2", "admin3", "admin4"];

/// Aggregate load of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionLoad {
    pub partition: usize,
    pub size: usize,
    pub total_load: f64,
    pub min_load: f64,
    pub max_load: f64,
}

/// Contiguous partitions over positions `[0, len)`, stored as start offsets.
///
/// Partition `i` covers `[offsets[i], offsets[i + 1])`; the last one runs to
/// `len`. Partitions may be empty only when there are more partitions than
/// elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    offsets: Vec<usize>,
    len: usize,
}

impl PartitionAssignment {
    pub fn from_offsets(offsets: Vec<usize>, len: usize) -> Result<Self> {
        if offsets.is_empty() {
            return Err(Error::domain("partition assignment needs at least one partition"));
        }
        if offsets[0] != 0 {
            return Err(Error::domain(format!(
                "partition offsets must start at 0, found {}",
                offsets[0]
            )));
        }
        if let Some(w) = offsets.windows(2).find(|w| w[1] < w[0]) {
            return Err(Error::domain(format!(
                "partition offsets not monotone: {} after {}",
                w[1], w[0]
            )));
        }
        if let Some(&last) = offsets.last() {
            if last > len {
                return Err(Error::domain(format!(
                    "partition offset {} beyond {} elements",
                    last, len
                )));
            }
        }
        Ok(Self { offsets, len })
    }

    /// Build from per-position partition ids, which must be non-decreasing
    /// and use every id from 0 up without gaps.
    pub fn from_partition_ids(ids: &[usize]) -> Result<Self> {
        let mut offsets = Vec::new();
        for (pos, &id) in ids.iter().enumerate() {
            if id == offsets.len() {
                offsets.push(pos);
            } else if id + 1 != offsets.len() {
                return Err(Error::domain(format!(
                    "partition id {} at position {} breaks contiguity",
                    id, pos
                )));
            }
        }
        if offsets.is_empty() {
            offsets.push(0);
        }
        Self::from_offsets(offsets, ids.len())
    }

    /// Consecutive ranges of the given sizes.
    pub(crate) fn from_sizes<I: IntoIterator<Item = usize>>(sizes: I, len: usize) -> Result<Self> {
        let mut offsets = Vec::new();
        let mut start = 0;
        for size in sizes {
            offsets.push(start);
            start += size;
        }
        if start != len {
            return Err(Error::domain(format!(
                "partition sizes cover {} of {} elements",
                start, len
            )));
        }
        Self::from_offsets(offsets, len)
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_partitions(&self) -> usize {
        self.offsets.len()
    }

    pub fn range(&self, partition: usize) -> std::ops::Range<usize> {
        let start = self.offsets[partition];
        let end = self.offsets.get(partition + 1).copied().unwrap_or(self.len);
        start..end
    }

    pub fn sizes(&self) -> Vec<usize> {
        (0..self.num_partitions()).map(|p| self.range(p).len()).collect()
    }

    /// Partition id of every position.
    pub fn partition_ids(&self) -> Vec<usize> {
        let mut ids = Vec::with_capacity(self.len);
        for p in 0..self.num_partitions() {
            ids.extend(std::iter::repeat(p).take(self.range(p).len()));
        }
        ids
    }

    /// Per-partition load statistics; `loads` is indexed by position.
    pub fn load_stats(&self, loads: &[f64]) -> Result<Vec<PartitionLoad>> {
        if loads.len() != self.len {
            return Err(Error::cardinality("partition load column", self.len, loads.len()));
        }
        Ok((0..self.num_partitions())
            .map(|p| {
                let slice = &loads[self.range(p)];
                PartitionLoad {
                    partition: p,
                    size: slice.len(),
                    total_load: slice.iter().sum(),
                    min_load: slice.iter().copied().fold(f64::INFINITY, f64::min),
                    max_load: slice.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect())
    }

    /// Ratio of the heaviest to the lightest partition total. `None` when the
    /// lightest partition carries no load.
    pub fn load_ratio(&self, loads: &[f64]) -> Result<Option<f64>> {
        let stats = self.load_stats(loads)?;
        let max = stats.iter().map(|s| s.total_load).fold(f64::NEG_INFINITY, f64::max);
        let min = stats.iter().map(|s| s.total_load).fold(f64::INFINITY, f64::min);
        Ok(if min > 0.0 { Some(max / min) } else { None })
    }
}

/// Element order plus the partition boundaries over that order.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionPlan {
    /// `order[new_position] = old_row`
    pub order: Vec<usize>,
    pub assignment: PartitionAssignment,
}

impl PartitionPlan {
    /// Write `partition_id` onto a table already laid out in plan order.
    pub fn label(&self, ordered: &mut Table) -> Result<()> {
        if ordered.len() != self.assignment.len() {
            return Err(Error::cardinality(
                format!("{} partition labels", ordered.name()),
                self.assignment.len(),
                ordered.len(),
            ));
        }
        let ids = self
            .assignment
            .partition_ids()
            .into_iter()
            .map(|p| Value::Int(p as i64))
            .collect();
        ordered.set_column(PARTITION_ID, ids)
    }

    /// Reorder `table` by the plan and label every row with its partition.
    pub fn materialize(&self, table: &Table) -> Result<Table> {
        let mut out = table.take_rows(&self.order)?;
        self.label(&mut out)?;
        Ok(out)
    }
}

pub struct PartitionPlanner {
    config: PlannerConfig,
}

impl PartitionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn plan(&self, locations: &Table) -> Result<PartitionPlan> {
        let plan = match self.config.scheme {
            PartitionScheme::Folding => self.plan_folding(locations)?,
            PartitionScheme::LinearCut => self.plan_linear_cut(locations)?,
        };
        check_permutation(&plan.order, locations.len())?;

        let loads = locations.f64_column(&self.config.load_column)?;
        let ordered: Vec<f64> = plan.order.iter().map(|&r| loads[r]).collect();
        let ratio = plan.assignment.load_ratio(&ordered)?;
        info!(
            scheme = ?self.config.scheme,
            rows = locations.len(),
            partitions = plan.assignment.num_partitions(),
            load_column = %self.config.load_column,
            load_ratio = ratio.unwrap_or(f64::INFINITY),
            "Partition plan ready"
        );
        Ok(plan)
    }

    fn plan_folding(&self, locations: &Table) -> Result<PartitionPlan> {
        let p = self.config.num_partitions;
        let sorted = locations.sorted_order(&[self.config.load_column.as_str()], true)?;

        let (layout_input, group_sizes) = match &self.config.group_column {
            Some(column) => {
                let col = locations.column_index(column)?;
                let pattern = self.config.group_pattern.as_str();
                let (first, rest): (Vec<usize>, Vec<usize>) = sorted.iter().partition(|&&r| {
                    locations.value(r, col).to_string().contains(pattern)
                });
                let sizes = vec![first.len(), rest.len()];
                (first.into_iter().chain(rest).collect::<Vec<_>>(), sizes)
            }
            None => {
                let n = sorted.len();
                (sorted, vec![n])
            }
        };

        let partitions = fold_groups(&group_sizes, p)?;
        let assignment =
            PartitionAssignment::from_sizes(partitions.iter().map(|part| part.len()), locations.len())?;
        let permutation = partitions_to_permutation(partitions, locations.len())?;
        let order = permutation.into_iter().map(|i| layout_input[i]).collect();
        Ok(PartitionPlan { order, assignment })
    }

    /// Sort columns for a linear cut: configured, else the admin hierarchy
    /// columns present, else the location id.
    fn linear_sort_columns<'a>(&'a self, locations: &Table) -> Vec<&'a str> {
        if !self.config.sort_by.is_empty() {
            return self.config.sort_by.iter().map(|s| s.as_str()).collect();
        }
        let admin: Vec<&str> = ADMIN_HIERARCHY
            .iter()
            .copied()
            .filter(|c| locations.has_column(c))
            .collect();
        if admin.is_empty() {
            vec![LID]
        } else {
            admin
        }
    }

    fn plan_linear_cut(&self, locations: &Table) -> Result<PartitionPlan> {
        let sort_by = self.linear_sort_columns(locations);
        let order = locations.sorted_order(&sort_by, false)?;
        let loads = locations.f64_column(&self.config.load_column)?;
        let ordered: Vec<f64> = order.iter().map(|&r| loads[r]).collect();
        let offsets = linear_cut(&ordered, self.config.num_partitions)?;
        let assignment = PartitionAssignment::from_offsets(offsets, locations.len())?;
        Ok(PartitionPlan { order, assignment })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::int_table;

    fn locations(loads: &[i64]) -> Table {
        let rows: Vec<Vec<i64>> = loads.iter().enumerate().map(|(i, &l)| vec![i as i64, l]).collect();
        let refs: Vec<&[i64]> = rows.iter().map(|r| r.as_slice()).collect();
        int_table("locations", &["lid", "max_simultaneous_visits"], &refs)
    }

    fn config(scheme: PartitionScheme, p: usize) -> PlannerConfig {
        PlannerConfig {
            scheme,
            num_partitions: p,
            ..Default::default()
        }
    }

    #[test]
    fn test_assignment_from_partition_ids() {
        let a = PartitionAssignment::from_partition_ids(&[0, 0, 1, 2, 2]).unwrap();
        assert_eq!(a.offsets(), &[0, 2, 3]);
        assert_eq!(a.sizes(), vec![2, 1, 2]);
        assert_eq!(a.partition_ids(), vec![0, 0, 1, 2, 2]);
        assert!(PartitionAssignment::from_partition_ids(&[0, 2]).is_err());
        assert!(PartitionAssignment::from_partition_ids(&[0, 1, 0]).is_err());
        assert!(PartitionAssignment::from_partition_ids(&[1]).is_err());
    }

    #[test]
    fn test_assignment_rejects_bad_offsets() {
        assert!(PartitionAssignment::from_offsets(vec![], 3).is_err());
        assert!(PartitionAssignment::from_offsets(vec![1, 2], 3).is_err());
        assert!(PartitionAssignment::from_offsets(vec![0, 2, 1], 3).is_err());
        assert!(PartitionAssignment::from_offsets(vec![0, 4], 3).is_err());
    }

    #[test]
    fn test_load_stats_and_ratio() {
        let a = PartitionAssignment::from_offsets(vec![0, 1], 4).unwrap();
        let stats = a.load_stats(&[10.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(stats[1].total_load, 6.0);
        assert_eq!(stats[1].min_load, 1.0);
        assert_eq!(stats[1].max_load, 3.0);
        assert_eq!(a.load_ratio(&[10.0, 1.0, 2.0, 3.0]).unwrap(), Some(10.0 / 6.0));
    }

    #[test]
    fn test_folding_plan_balances_sorted_loads() {
        let table = locations(&[1, 6, 3, 4, 2, 5]);
        let plan = PartitionPlanner::new(config(PartitionScheme::Folding, 3))
            .plan(&table)
            .unwrap();
        assert_eq!(plan.assignment.sizes(), vec![2, 2, 2]);
        let loads = table.f64_column("max_simultaneous_visits").unwrap();
        let ordered: Vec<f64> = plan.order.iter().map(|&r| loads[r]).collect();
        let totals: Vec<f64> = plan
            .assignment
            .load_stats(&ordered)
            .unwrap()
            .iter()
            .map(|s| s.total_load)
            .collect();
        assert_eq!(totals, vec![7.0, 7.0, 7.0]);
    }

    #[test]
    fn test_grouped_folding_puts_group_first_in_each_partition() {
        let mut table = locations(&[5, 4, 3, 2]);
        table
            .set_column(
                "designation",
                vec!["home".into(), "school".into(), "home".into(), "work".into()],
            )
            .unwrap();
        let cfg = PlannerConfig {
            group_column: Some("designation".to_string()),
            ..config(PartitionScheme::Folding, 2)
        };
        let plan = PartitionPlanner::new(cfg).plan(&table).unwrap();
        let out = plan.materialize(&table).unwrap();
        let designation = out.column_index("designation").unwrap();
        for p in 0..2 {
            let range = plan.assignment.range(p);
            assert_eq!(out.value(range.start, designation).to_string(), "home");
            assert_ne!(out.value(range.end - 1, designation).to_string(), "home");
        }
    }

    #[test]
    fn test_linear_cut_plan_and_materialize() {
        let table = locations(&[10, 1, 1, 1]);
        let plan = PartitionPlanner::new(config(PartitionScheme::LinearCut, 2))
            .plan(&table)
            .unwrap();
        assert_eq!(plan.order, vec![0, 1, 2, 3]);
        assert_eq!(plan.assignment.offsets(), &[0, 1]);
        let out = plan.materialize(&table).unwrap();
        assert_eq!(out.int_column(PARTITION_ID).unwrap(), vec![0, 1, 1, 1]);
    }

    #[test]
    fn test_linear_cut_sorts_by_admin_hierarchy() {
        let table = int_table(
            "locations",
            &["lid", "admin1", "admin2", "max_simultaneous_visits"],
            &[&[0, 2, 0, 1], &[1, 1, 1, 1], &[2, 1, 0, 1], &[3, 2, 1, 1]],
        );
        let plan = PartitionPlanner::new(config(PartitionScheme::LinearCut, 2))
            .plan(&table)
            .unwrap();
        assert_eq!(plan.order, vec![2, 1, 0, 3]);
        assert_eq!(plan.assignment.offsets(), &[0, 2]);
    }

    #[test]
    fn test_linear_cut_too_many_partitions() {
        let table = locations(&[1, 1]);
        assert!(matches!(
            PartitionPlanner::new(config(PartitionScheme::LinearCut, 3)).plan(&table),
            Err(Error::Domain(_))
        ));
    }
}
