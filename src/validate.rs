//! Post-hoc integrity checks and baseline comparison.
//!
//! Every check produces a [`Finding`]; nothing aborts the pass unless the
//! validator runs in strict mode, in which case the first error-level finding
//! is returned as an [`Error`].

use crate::config::{JoinSettings, ValidatorConfig};
use crate::error::{Error, Result};
use crate::join::{self, Cardinality, JoinOptions, RIGHT_SUFFIX};
use crate::population::{Population, PopulationOffsets, LID, PID, START_TIME};
use crate::table::{Table, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    DenseKeys,
    Reference,
    Cardinality,
    Offsets,
    VisitOrder,
    Baseline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub table: String,
    pub column: String,
    /// Offending rows, or zero when the check passed.
    pub count: usize,
    pub message: String,
}

impl Finding {
    fn new(kind: FindingKind, severity: Severity, table: &str, column: &str, count: usize, message: String) -> Self {
        Self {
            kind,
            severity,
            table: table.to_string(),
            column: column.to_string(),
            count,
            message,
        }
    }

    fn into_error(self) -> Error {
        match self.kind {
            FindingKind::Reference => Error::Integrity {
                table: self.table,
                column: self.column,
                missing: self.count,
            },
            FindingKind::Cardinality => Error::Cardinality {
                context: format!("{}.{}: {}", self.table, self.column, self.message),
                expected: 1,
                actual: self.count,
            },
            _ => Error::Domain(format!("{}.{}: {}", self.table, self.column, self.message)),
        }
    }
}

/// Error statistics of one metric column against the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnComparison {
    pub column: String,
    pub shared: usize,
    pub matches: usize,
    pub mean_squared_error: f64,
    pub total_error: f64,
    /// Total error over the baseline column's sum; `None` when that sum is zero.
    pub relative_error: Option<f64>,
    pub computed_only: usize,
    pub computed_only_total: f64,
    pub baseline_only: usize,
    pub baseline_only_total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    pub comparisons: Vec<ColumnComparison>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Warning)
    }

    /// No error-level findings.
    pub fn is_clean(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Unresolved visit references across all reference checks.
    pub fn integrity_violations(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.kind == FindingKind::Reference)
            .map(|f| f.count)
            .sum()
    }
}

pub struct Validator {
    config: ValidatorConfig,
    join: JoinSettings,
}

impl Validator {
    pub fn new(config: ValidatorConfig, join: JoinSettings) -> Self {
        Self { config, join }
    }

    /// Keys equal their row position.
    pub fn check_dense_keys(&self, table: &Table, column: &str) -> Result<Finding> {
        let ids = table.int_column(column)?;
        let bad = ids
            .iter()
            .enumerate()
            .filter(|&(pos, &id)| id != pos as i64)
            .count();
        let first = ids.iter().enumerate().find(|&(pos, &id)| id != pos as i64);
        Ok(match first {
            None => Finding::new(
                FindingKind::DenseKeys,
                Severity::Info,
                table.name(),
                column,
                0,
                format!("{} ids contiguous from 0", ids.len()),
            ),
            Some((pos, id)) => Finding::new(
                FindingKind::DenseKeys,
                Severity::Error,
                table.name(),
                column,
                bad,
                format!("{} rows out of place, first at row {} with id {}", bad, pos, id),
            ),
        })
    }

    /// Every visit resolves to exactly one row of `parent` through `key`.
    pub fn check_references(&self, parent: &Table, visits: &Table, key: &str) -> Result<Finding> {
        let options = JoinOptions::inner()
            .with_validation(Cardinality::OneToMany)
            .with_partitions(self.join.num_partitions)
            .with_workers(self.join.num_workers);
        let joined = match join::join(parent.select(&[key])?, visits.select(&[key])?, key, &options) {
            Ok(joined) => joined,
            Err(Error::Cardinality { context, actual, .. }) => {
                return Ok(Finding::new(
                    FindingKind::Cardinality,
                    Severity::Error,
                    parent.name(),
                    key,
                    actual,
                    context,
                ));
            }
            Err(e) => return Err(e),
        };
        let missing = visits.len().saturating_sub(joined.len());
        let (min, max) = key_range(visits, key)?;
        let range = format!("visit {} range {}..={}", key, min, max);
        Ok(if missing == 0 {
            Finding::new(
                FindingKind::Reference,
                Severity::Info,
                visits.name(),
                key,
                0,
                format!("all {} visits resolve; {}", visits.len(), range),
            )
        } else {
            Finding::new(
                FindingKind::Reference,
                Severity::Error,
                visits.name(),
                key,
                missing,
                format!("{} of {} visits unresolved; {}", missing, visits.len(), range),
            )
        })
    }

    pub fn check_offsets(&self, table: &Table, offsets: &[usize]) -> Finding {
        let problem = if offsets.is_empty() {
            Some("no partition offsets".to_string())
        } else if offsets[0] != 0 {
            Some(format!("first offset is {}", offsets[0]))
        } else if let Some(w) = offsets.windows(2).find(|w| w[1] < w[0]) {
            Some(format!("offset {} follows {}", w[1], w[0]))
        } else if offsets[offsets.len() - 1] > table.len() {
            Some(format!(
                "last offset {} beyond {} rows",
                offsets[offsets.len() - 1],
                table.len()
            ))
        } else {
            None
        };
        match problem {
            None => Finding::new(
                FindingKind::Offsets,
                Severity::Info,
                table.name(),
                "",
                0,
                format!("{} partitions over {} rows", offsets.len(), table.len()),
            ),
            Some(message) => Finding::new(FindingKind::Offsets, Severity::Error, table.name(), "", 1, message),
        }
    }

    /// Visits should be ordered by `(pid, start_time)`.
    pub fn check_visit_order(&self, visits: &Table) -> Result<Finding> {
        let pid = visits.column_index(PID)?;
        let start = visits.column_index(START_TIME)?;
        let key = |r: usize| (&visits.rows()[r][pid], &visits.rows()[r][start]);
        let unsorted = (1..visits.len())
            .filter(|&r| {
                let (pa, sa) = key(r - 1);
                let (pb, sb) = key(r);
                pa.total_cmp(pb).then_with(|| sa.total_cmp(sb)).is_gt()
            })
            .count();
        Ok(if unsorted == 0 {
            Finding::new(
                FindingKind::VisitOrder,
                Severity::Info,
                visits.name(),
                PID,
                0,
                "sorted by (pid, start_time)".to_string(),
            )
        } else {
            Finding::new(
                FindingKind::VisitOrder,
                Severity::Warning,
                visits.name(),
                PID,
                unsorted,
                format!("{} rows out of (pid, start_time) order", unsorted),
            )
        })
    }

    /// Compare per-location metrics to a baseline keyed by the configured
    /// stable identifier.
    pub fn compare_baseline(&self, computed: &Table, baseline: &Table) -> Result<Vec<ColumnComparison>> {
        let key = self.config.baseline_key.as_str();
        let options = JoinOptions::inner()
            .with_validation(Cardinality::OneToOne)
            .with_partitions(self.join.num_partitions)
            .with_workers(self.join.num_workers);
        let shared = join::join(computed.clone(), baseline.clone(), key, &options)?;

        let computed_keys = key_set(computed, key)?;
        let baseline_keys = key_set(baseline, key)?;

        let mut comparisons = Vec::new();
        for column in &self.config.compare_columns {
            if !computed.has_column(column) || !baseline.has_column(column) {
                warn!(column = %column, "Column missing from computed metrics or baseline; skipped");
                continue;
            }
            let ours = shared.f64_column(column)?;
            let theirs = shared.f64_column(&format!("{}{}", column, RIGHT_SUFFIX))?;
            let errors: Vec<f64> = ours.iter().zip(&theirs).map(|(a, b)| (a - b).abs()).collect();
            let matches = errors.iter().filter(|&&e| e <= self.config.epsilon).count();
            let total_error: f64 = errors.iter().sum();
            let mean_squared_error = if errors.is_empty() {
                0.0
            } else {
                errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64
            };
            let baseline_sum: f64 = theirs.iter().sum();
            let relative_error = (baseline_sum != 0.0).then(|| total_error / baseline_sum);

            let (computed_only, computed_only_total) = one_side_total(computed, key, column, &baseline_keys)?;
            let (baseline_only, baseline_only_total) = one_side_total(baseline, key, column, &computed_keys)?;

            comparisons.push(ColumnComparison {
                column: column.clone(),
                shared: errors.len(),
                matches,
                mean_squared_error,
                total_error,
                relative_error,
                computed_only,
                computed_only_total,
                baseline_only,
                baseline_only_total,
            });
        }
        Ok(comparisons)
    }

    fn baseline_findings(&self, comparisons: &[ColumnComparison], table: &str) -> Vec<Finding> {
        comparisons
            .iter()
            .map(|c| {
                let mismatches = c.shared - c.matches;
                let exact = mismatches == 0 && c.computed_only == 0 && c.baseline_only == 0;
                let severity = if exact { Severity::Info } else { Severity::Warning };
                Finding::new(
                    FindingKind::Baseline,
                    severity,
                    table,
                    &c.column,
                    mismatches,
                    format!(
                        "{}/{} shared match; mse {:.3}, total err {:.3}, rel err {}; {} computed-only (total {:.3}), {} baseline-only (total {:.3})",
                        c.matches,
                        c.shared,
                        c.mean_squared_error,
                        c.total_error,
                        c.relative_error.map_or("n/a".to_string(), |r| format!("{:.3}", r)),
                        c.computed_only,
                        c.computed_only_total,
                        c.baseline_only,
                        c.baseline_only_total,
                    ),
                )
            })
            .collect()
    }

    /// Run every check. `computed` is the metrics table compared to `baseline`,
    /// usually the annotated Locations table.
    pub fn validate(
        &self,
        population: &Population,
        offsets: &PopulationOffsets,
        baseline: Option<(&Table, &Table)>,
    ) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();
        report.findings.push(self.check_dense_keys(&population.people, PID)?);
        report.findings.push(self.check_dense_keys(&population.locations, LID)?);
        report
            .findings
            .push(self.check_references(&population.people, &population.visits, PID)?);
        report
            .findings
            .push(self.check_references(&population.locations, &population.visits, LID)?);
        if let Some(o) = &offsets.people {
            report.findings.push(self.check_offsets(&population.people, o));
        }
        if let Some(o) = &offsets.locations {
            report.findings.push(self.check_offsets(&population.locations, o));
        }
        report.findings.push(self.check_visit_order(&population.visits)?);

        if let Some((computed, baseline)) = baseline {
            let key = self.config.baseline_key.as_str();
            if computed.has_column(key) && baseline.has_column(key) {
                match self.compare_baseline(computed, baseline) {
                    Ok(comparisons) => {
                        report
                            .findings
                            .extend(self.baseline_findings(&comparisons, computed.name()));
                        report.comparisons = comparisons;
                    }
                    // duplicate baseline keys
                    Err(Error::Cardinality { context, actual, .. }) => {
                        report.findings.push(Finding::new(
                            FindingKind::Baseline,
                            Severity::Warning,
                            computed.name(),
                            key,
                            actual,
                            format!("comparison skipped: {}", context),
                        ));
                    }
                    Err(e) => return Err(e),
                }
            } else {
                report.findings.push(Finding::new(
                    FindingKind::Baseline,
                    Severity::Warning,
                    computed.name(),
                    key,
                    0,
                    "baseline key missing; comparison skipped".to_string(),
                ));
            }
        }

        for finding in &report.findings {
            match finding.severity {
                Severity::Info => info!(table = %finding.table, check = ?finding.kind, "{}", finding.message),
                Severity::Warning | Severity::Error => warn!(
                    table = %finding.table,
                    check = ?finding.kind,
                    severity = ?finding.severity,
                    count = finding.count,
                    "{}",
                    finding.message
                ),
            }
        }

        if self.config.strict {
            if let Some(first) = report.errors().next() {
                return Err(first.clone().into_error());
            }
        }
        Ok(report)
    }
}

fn key_range(table: &Table, column: &str) -> Result<(Value, Value)> {
    let idx = table.column_index(column)?;
    let mut values = table.rows().iter().map(|r| &r[idx]).filter(|v| !v.is_null());
    let Some(first) = values.next() else {
        return Ok((Value::Null, Value::Null));
    };
    let (min, max) = values.fold((first, first), |(lo, hi), v| {
        (
            if v.total_cmp(lo).is_lt() { v } else { lo },
            if v.total_cmp(hi).is_gt() { v } else { hi },
        )
    });
    Ok((min.clone(), max.clone()))
}

fn key_set(table: &Table, column: &str) -> Result<HashSet<i64>> {
    let idx = table.column_index(column)?;
    (0..table.len())
        .filter(|&r| !table.value(r, idx).is_null())
        .map(|r| table.int_at(r, idx))
        .collect()
}

/// Rows of `table` whose key is absent from `other`, and their column total.
fn one_side_total(table: &Table, key: &str, column: &str, other: &HashSet<i64>) -> Result<(usize, f64)> {
    let key_idx = table.column_index(key)?;
    let col_idx = table.column_index(column)?;
    let mut count = 0;
    let mut total = 0.0;
    for r in 0..table.len() {
        if table.value(r, key_idx).is_null() || other.contains(&table.int_at(r, key_idx)?) {
            continue;
        }
        count += 1;
        total += table.value(r, col_idx).as_f64().unwrap_or(0.0);
    }
    Ok((count, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::int_table;

    fn validator(strict: bool) -> Validator {
        Validator::new(
            ValidatorConfig {
                strict,
                ..Default::default()
            },
            JoinSettings {
                num_partitions: 4,
                num_workers: 2,
                validate: true,
            },
        )
    }

    fn population() -> Population {
        Population::new(
            int_table("people", &["pid"], &[&[0], &[1]]),
            int_table("locations", &["lid"], &[&[0], &[1], &[2]]),
            int_table(
                "visits",
                &["pid", "lid", "start_time", "duration"],
                &[&[0, 2, 0, 5], &[0, 1, 7, 1], &[1, 0, 3, 2]],
            ),
        )
    }

    #[test]
    fn test_consistent_population_is_clean() {
        let offsets = PopulationOffsets {
            people: Some(vec![0, 1]),
            locations: Some(vec![0, 2]),
        };
        let report = validator(true).validate(&population(), &offsets, None).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.integrity_violations(), 0);
        assert_eq!(report.warnings().count(), 0);
    }

    #[test]
    fn test_dangling_visit_reported() {
        let mut p = population();
        p.visits = int_table(
            "visits",
            &["pid", "lid", "start_time", "duration"],
            &[&[0, 2, 0, 5], &[3, 9, 1, 1]],
        );
        let report = validator(false)
            .validate(&p, &PopulationOffsets::default(), None)
            .unwrap();
        assert_eq!(report.integrity_violations(), 2);
        assert!(!report.is_clean());

        let err = validator(true)
            .validate(&p, &PopulationOffsets::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::Integrity { missing: 1, .. }));
    }

    #[test]
    fn test_sparse_keys_reported() {
        let mut p = population();
        p.locations = int_table("locations", &["lid"], &[&[0], &[2], &[1]]);
        let report = validator(false)
            .validate(&p, &PopulationOffsets::default(), None)
            .unwrap();
        let dense = report
            .errors()
            .find(|f| f.kind == FindingKind::DenseKeys)
            .unwrap();
        assert_eq!(dense.table, "locations");
        assert_eq!(dense.count, 2);
    }

    #[test]
    fn test_duplicate_parent_key_is_cardinality_finding() {
        let mut p = population();
        p.people = int_table("people", &["pid"], &[&[0], &[1], &[1]]);
        let report = validator(false)
            .validate(&p, &PopulationOffsets::default(), None)
            .unwrap();
        assert!(report.errors().any(|f| f.kind == FindingKind::Cardinality));
    }

    #[test]
    fn test_bad_offsets_and_unsorted_visits() {
        let mut p = population();
        p.visits.sort_by_columns(&["lid"]).unwrap();
        let offsets = PopulationOffsets {
            people: None,
            locations: Some(vec![0, 5]),
        };
        let report = validator(false).validate(&p, &offsets, None).unwrap();
        assert!(report.errors().any(|f| f.kind == FindingKind::Offsets));
        assert!(report.warnings().any(|f| f.kind == FindingKind::VisitOrder));
    }

    #[test]
    fn test_baseline_comparison() {
        let computed = int_table(
            "locations",
            &["old_lid", "total_visits", "max_simultaneous_visits"],
            &[&[10, 4, 2], &[11, 3, 1], &[12, 5, 5]],
        );
        let baseline = int_table(
            "baseline",
            &["old_lid", "total_visits", "max_simultaneous_visits"],
            &[&[10, 4, 2], &[11, 5, 1], &[13, 7, 7]],
        );
        let comparisons = validator(false).compare_baseline(&computed, &baseline).unwrap();
        assert_eq!(comparisons.len(), 2);
        let tv = &comparisons[0];
        assert_eq!(tv.column, "total_visits");
        assert_eq!(tv.shared, 2);
        assert_eq!(tv.matches, 1);
        assert_eq!(tv.total_error, 2.0);
        assert_eq!(tv.mean_squared_error, 2.0);
        assert_eq!(tv.relative_error, Some(2.0 / 9.0));
        assert_eq!((tv.computed_only, tv.computed_only_total), (1, 5.0));
        assert_eq!((tv.baseline_only, tv.baseline_only_total), (1, 7.0));
        assert_eq!(comparisons[1].matches, 2);

        // never fatal, even in strict mode
        let report = validator(true)
            .validate(&population(), &PopulationOffsets::default(), Some((&computed, &baseline)))
            .unwrap();
        assert!(report.warnings().any(|f| f.kind == FindingKind::Baseline));
        assert_eq!(report.comparisons.len(), 2);
    }

    #[test]
    fn test_duplicate_baseline_key_is_a_warning() {
        let computed = int_table("locations", &["old_lid", "total_visits"], &[&[10, 4]]);
        let baseline = int_table("baseline", &["old_lid", "total_visits"], &[&[10, 4], &[10, 6]]);
        assert!(matches!(
            validator(false).compare_baseline(&computed, &baseline),
            Err(Error::Cardinality { .. })
        ));

        for strict in [false, true] {
            let report = validator(strict)
                .validate(&population(), &PopulationOffsets::default(), Some((&computed, &baseline)))
                .unwrap();
            let skipped = report
                .warnings()
                .find(|f| f.kind == FindingKind::Baseline)
                .unwrap();
            assert_eq!(skipped.column, "old_lid");
            assert_eq!(skipped.count, 2);
            assert!(report.comparisons.is_empty());
            assert_eq!(report.errors().count(), 0);
        }
    }
}
