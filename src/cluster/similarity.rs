use crate::error::{Error, Result};
use crate::population::{Population, LID, PID};
use crate::table::Table;
use std::collections::{BTreeMap, HashMap};

/// Sparse location x person visit-count matrix, indexed by table row.
#[derive(Debug, Clone)]
pub struct VisitMatrix {
    /// location row -> (person row -> visits)
    by_location: Vec<BTreeMap<usize, u32>>,
    /// person row -> distinct location rows, ascending
    by_person: Vec<Vec<usize>>,
    norms: Vec<f64>,
    person_totals: Vec<u64>,
}

fn row_index(table: &Table, column: &str) -> Result<HashMap<i64, usize>> {
    let ids = table.int_column(column)?;
    let mut index = HashMap::with_capacity(ids.len());
    for (row, id) in ids.into_iter().enumerate() {
        if index.insert(id, row).is_some() {
            return Err(Error::domain(format!(
                "{}.{}: duplicate key {}",
                table.name(),
                column,
                id
            )));
        }
    }
    Ok(index)
}

impl VisitMatrix {
    pub fn build(population: &Population) -> Result<Self> {
        let locations = row_index(&population.locations, LID)?;
        let people = row_index(&population.people, PID)?;
        let visits = &population.visits;
        let pid_col = visits.column_index(PID)?;
        let lid_col = visits.column_index(LID)?;

        let mut by_location: Vec<BTreeMap<usize, u32>> = vec![BTreeMap::new(); locations.len()];
        let mut person_totals = vec![0u64; people.len()];
        let (mut missing_pid, mut missing_lid) = (0usize, 0usize);
        for row in 0..visits.len() {
            let pid = visits.int_at(row, pid_col)?;
            let lid = visits.int_at(row, lid_col)?;
            let (Some(&p), Some(&l)) = (people.get(&pid), locations.get(&lid)) else {
                missing_pid += usize::from(!people.contains_key(&pid));
                missing_lid += usize::from(!locations.contains_key(&lid));
                continue;
            };
            *by_location[l].entry(p).or_insert(0) += 1;
            person_totals[p] += 1;
        }
        if missing_pid > 0 {
            return Err(Error::Integrity {
                table: visits.name().to_string(),
                column: PID.to_string(),
                missing: missing_pid,
            });
        }
        if missing_lid > 0 {
            return Err(Error::Integrity {
                table: visits.name().to_string(),
                column: LID.to_string(),
                missing: missing_lid,
            });
        }

        let mut by_person: Vec<Vec<usize>> = vec![Vec::new(); people.len()];
        for (l, row) in by_location.iter().enumerate() {
            for &p in row.keys() {
                by_person[p].push(l);
            }
        }
        let norms = by_location
            .iter()
            .map(|row| row.values().map(|&c| (c as f64) * (c as f64)).sum::<f64>().sqrt())
            .collect();

        Ok(Self {
            by_location,
            by_person,
            norms,
            person_totals,
        })
    }

    pub fn num_locations(&self) -> usize {
        self.by_location.len()
    }

    pub fn num_people(&self) -> usize {
        self.by_person.len()
    }

    /// Total visit count of a person.
    pub fn person_total(&self, person: usize) -> u64 {
        self.person_totals[person]
    }

    /// Distinct locations a person visits.
    pub fn locations_of(&self, person: usize) -> &[usize] {
        &self.by_person[person]
    }

    /// Cosine similarity of `location` to every location sharing a visitor with it.
    /// Only strictly positive similarities are returned.
    pub fn neighbors(&self, location: usize) -> HashMap<usize, f64> {
        let mut dots: HashMap<usize, f64> = HashMap::new();
        for (&person, &count) in &self.by_location[location] {
            for &other in &self.by_person[person] {
                if other == location {
                    continue;
                }
                let other_count = self.by_location[other].get(&person).copied().unwrap_or(0);
                *dots.entry(other).or_insert(0.0) += count as f64 * other_count as f64;
            }
        }
        let norm = self.norms[location];
        dots.into_iter()
            .filter_map(|(other, dot)| {
                let denom = norm * self.norms[other];
                (denom > 0.0 && dot > 0.0).then(|| (other, dot / denom))
            })
            .collect()
    }

    pub fn cosine(&self, a: usize, b: usize) -> f64 {
        let denom = self.norms[a] * self.norms[b];
        if denom == 0.0 {
            return 0.0;
        }
        let dot: f64 = self.by_location[a]
            .iter()
            .filter_map(|(p, &c)| self.by_location[b].get(p).map(|&d| c as f64 * d as f64))
            .sum();
        dot / denom
    }
}
