//! Affinity clustering of locations and people.
//!
//! Locations are grouped either by visit similarity (cosine similarity between
//! rows of the location x person visit-count matrix) or by nested admin codes.
//! People then follow the locations they visit most. The result is a pair of
//! orders plus partition offsets, ready for [`IdRemapper`](crate::remap::IdRemapper).

pub mod geo;
pub mod growth;
pub mod similarity;

use crate::config::{ClusterConfig, ClusterScheme};
use crate::error::{Error, Result};
use crate::partition::PartitionAssignment;
use crate::population::Population;
use growth::ClusterGrowth;
use rand::rngs::StdRng;
use rand::SeedableRng;
use similarity::VisitMatrix;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

pub use growth::GrowthState;

/// Location and person clusters, laid out cluster by cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// `location_order[new_position] = old_row`
    pub location_order: Vec<usize>,
    pub location_assignment: PartitionAssignment,
    /// `people_order[new_position] = old_row`
    pub people_order: Vec<usize>,
    pub people_assignment: PartitionAssignment,
}

impl Clustering {
    fn from_clusters(locations: &[Vec<usize>], people: &[Vec<usize>]) -> Result<Self> {
        let layout = |clusters: &[Vec<usize>]| -> Result<(Vec<usize>, PartitionAssignment)> {
            let order: Vec<usize> = clusters.iter().flatten().copied().collect();
            let assignment =
                PartitionAssignment::from_sizes(clusters.iter().map(|c| c.len()), order.len())?;
            Ok((order, assignment))
        };
        let (location_order, location_assignment) = layout(locations)?;
        let (people_order, people_assignment) = layout(people)?;
        Ok(Self {
            location_order,
            location_assignment,
            people_order,
            people_assignment,
        })
    }
}

/// Assign each person to the non-full location cluster holding the most of
/// the distinct locations they visit.
///
/// People go in descending order of total visits, lower row first on ties;
/// cluster ties go to the lowest index.
pub fn assign_people(
    location_clusters: &[Vec<usize>],
    matrix: &VisitMatrix,
    capacity: usize,
) -> Result<Vec<Vec<usize>>> {
    let num_people = matrix.num_people();
    if num_people > 0 && location_clusters.len() * capacity < num_people {
        return Err(Error::domain(format!(
            "{} clusters of {} cannot hold {} people",
            location_clusters.len(),
            capacity,
            num_people
        )));
    }

    let mut cluster_of = vec![0usize; matrix.num_locations()];
    for (c, cluster) in location_clusters.iter().enumerate() {
        for &l in cluster {
            cluster_of[l] = c;
        }
    }

    let mut order: Vec<usize> = (0..num_people).collect();
    order.sort_by_key(|&p| (Reverse(matrix.person_total(p)), p));

    let mut people_clusters: Vec<Vec<usize>> = vec![Vec::new(); location_clusters.len()];
    let mut matches: HashMap<usize, usize> = HashMap::new();
    for person in order {
        matches.clear();
        for &l in matrix.locations_of(person) {
            *matches.entry(cluster_of[l]).or_insert(0) += 1;
        }
        let mut best: Option<(usize, usize)> = None;
        for (c, members) in people_clusters.iter().enumerate() {
            if members.len() >= capacity {
                continue;
            }
            let m = matches.get(&c).copied().unwrap_or(0);
            if best.map_or(true, |(_, bm)| m > bm) {
                best = Some((c, m));
            }
        }
        let (c, _) = best.ok_or_else(|| Error::domain("every person cluster is full"))?;
        people_clusters[c].push(person);
    }
    Ok(people_clusters)
}

pub struct GraphClusterer {
    config: ClusterConfig,
}

impl GraphClusterer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn validate(&self, population: &Population) -> Result<()> {
        let p = self.config.num_partitions;
        if p == 0 {
            return Err(Error::domain("cluster count must be > 0"));
        }
        if p > population.locations.len() {
            return Err(Error::domain(format!(
                "cannot form {} clusters from {} locations",
                p,
                population.locations.len()
            )));
        }
        Ok(())
    }

    /// Grow `num_partitions` location clusters over the visit-similarity graph.
    pub fn visit_clusters(&self, matrix: &VisitMatrix) -> Vec<Vec<usize>> {
        let n = matrix.num_locations();
        let p = self.config.num_partitions.max(1);
        let per_cluster = n.div_ceil(p);
        let mut growth = ClusterGrowth::new(matrix, StdRng::seed_from_u64(self.config.seed));

        let mut clusters = Vec::with_capacity(p);
        for c in 0..p {
            let target = if c + 1 == p {
                growth.remaining()
            } else {
                per_cluster.min(growth.remaining())
            };
            let cluster = growth.grow(target);
            debug!(cluster = c, size = cluster.len(), "Grew location cluster");
            clusters.push(cluster);
        }
        clusters
    }

    /// Cluster locations by their admin codes.
    pub fn geo_clusters(&self, population: &Population) -> Result<Vec<Vec<usize>>> {
        let locations = &population.locations;
        let columns = self
            .config
            .admin_columns
            .iter()
            .map(|c| locations.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        let codes: Vec<Vec<String>> = (0..locations.len())
            .map(|r| columns.iter().map(|&c| locations.value(r, c).to_string()).collect())
            .collect();
        let capacity = locations.len().div_ceil(self.config.num_partitions.max(1));
        Ok(geo::geo_clusters(&codes, capacity))
    }

    pub fn cluster(&self, population: &Population) -> Result<Clustering> {
        self.validate(population)?;
        let started = Instant::now();
        let matrix = VisitMatrix::build(population)?;

        let location_clusters = match self.config.scheme {
            ClusterScheme::Visit => self.visit_clusters(&matrix),
            ClusterScheme::Geo => self.geo_clusters(population)?,
        };
        let capacity = match self.config.people_capacity {
            Some(c) => c,
            None => matrix.num_people().div_ceil(location_clusters.len().max(1)),
        };
        let people_clusters = assign_people(&location_clusters, &matrix, capacity)?;
        let clustering = Clustering::from_clusters(&location_clusters, &people_clusters)?;

        info!(
            scheme = ?self.config.scheme,
            seed = self.config.seed,
            locations = matrix.num_locations(),
            people = matrix.num_people(),
            clusters = location_clusters.len(),
            people_capacity = capacity,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Clustering complete"
        );
        Ok(clustering)
    }
}
