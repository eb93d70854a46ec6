//! Greedy cluster growth over the visit-similarity graph.

use super::similarity::VisitMatrix;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::trace;

/// Phase of a single cluster's growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthState {
    /// Pick a random unassigned location and start a new path from it.
    Seeding,
    /// Extend the path with the frontier's most similar unassigned location.
    Growing,
    /// The frontier has no connected unassigned location; step back one.
    Backtracking,
    /// Target size reached or nothing left to assign.
    Sealed,
}

/// Unassigned locations with O(1) removal and uniform sampling.
#[derive(Debug)]
struct UnassignedPool {
    items: Vec<usize>,
    position: Vec<Option<usize>>,
}

impl UnassignedPool {
    fn new(n: usize) -> Self {
        Self {
            items: (0..n).collect(),
            position: (0..n).map(Some).collect(),
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn contains(&self, x: usize) -> bool {
        self.position[x].is_some()
    }

    fn remove(&mut self, x: usize) {
        if let Some(pos) = self.position[x].take() {
            self.items.swap_remove(pos);
            if let Some(&moved) = self.items.get(pos) {
                self.position[moved] = Some(pos);
            }
        }
    }

    fn sample(&self, rng: &mut StdRng) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items[rng.random_range(0..self.items.len())])
    }
}

pub struct ClusterGrowth<'a> {
    matrix: &'a VisitMatrix,
    unassigned: UnassignedPool,
    rng: StdRng,
}

impl<'a> ClusterGrowth<'a> {
    pub fn new(matrix: &'a VisitMatrix, rng: StdRng) -> Self {
        Self {
            matrix,
            unassigned: UnassignedPool::new(matrix.num_locations()),
            rng,
        }
    }

    pub fn remaining(&self) -> usize {
        self.unassigned.len()
    }

    /// Most similar unassigned location to `frontier`; ties go to the lowest id.
    fn best_candidate(&self, frontier: usize) -> Option<usize> {
        self.matrix
            .neighbors(frontier)
            .into_iter()
            .filter(|(loc, _)| self.unassigned.contains(*loc))
            .max_by(|(a, sa), (b, sb)| sa.total_cmp(sb).then_with(|| b.cmp(a)))
            .map(|(loc, _)| loc)
    }

    /// Grow one cluster of up to `target` locations.
    pub fn grow(&mut self, target: usize) -> Vec<usize> {
        let mut members = Vec::with_capacity(target);
        let mut path: Vec<usize> = Vec::new();
        let mut state = GrowthState::Seeding;

        loop {
            state = match state {
                GrowthState::Seeding => {
                    if members.len() >= target {
                        GrowthState::Sealed
                    } else {
                        match self.unassigned.sample(&mut self.rng) {
                            Some(seed) => {
                                self.unassigned.remove(seed);
                                members.push(seed);
                                path.clear();
                                path.push(seed);
                                GrowthState::Growing
                            }
                            None => GrowthState::Sealed,
                        }
                    }
                }
                GrowthState::Growing => {
                    if members.len() >= target {
                        GrowthState::Sealed
                    } else {
                        let frontier = path.last().copied();
                        match frontier.and_then(|f| self.best_candidate(f)) {
                            Some(next) => {
                                self.unassigned.remove(next);
                                members.push(next);
                                path.push(next);
                                GrowthState::Growing
                            }
                            None => GrowthState::Backtracking,
                        }
                    }
                }
                GrowthState::Backtracking => {
                    path.pop();
                    if path.is_empty() {
                        trace!(members = members.len(), "Path exhausted; reseeding");
                        GrowthState::Seeding
                    } else {
                        GrowthState::Growing
                    }
                }
                GrowthState::Sealed => break,
            };
        }
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::Population;
    use crate::table::int_table;
    use rand::SeedableRng;

    /// Two disconnected triangles: {0,1,2} share person 0, {3,4,5} share person 1.
    fn matrix() -> VisitMatrix {
        let population = Population::new(
            int_table("people", &["pid"], &[&[0], &[1]]),
            int_table("locations", &["lid"], &[&[0], &[1], &[2], &[3], &[4], &[5]]),
            int_table(
                "visits",
                &["pid", "lid"],
                &[&[0, 0], &[0, 1], &[0, 2], &[1, 3], &[1, 4], &[1, 5]],
            ),
        );
        VisitMatrix::build(&population).unwrap()
    }

    #[test]
    fn test_growth_stays_inside_component() {
        let m = matrix();
        for seed in 0..10 {
            let mut growth = ClusterGrowth::new(&m, StdRng::seed_from_u64(seed));
            let mut first = growth.grow(3);
            first.sort_unstable();
            assert!(first == vec![0, 1, 2] || first == vec![3, 4, 5], "seed {}", seed);
            let mut second = growth.grow(3);
            second.sort_unstable();
            assert_ne!(first, second);
            assert_eq!(growth.remaining(), 0);
        }
    }

    #[test]
    fn test_reseeds_when_component_exhausted() {
        let m = matrix();
        let mut growth = ClusterGrowth::new(&m, StdRng::seed_from_u64(7));
        let cluster = growth.grow(5);
        assert_eq!(cluster.len(), 5);
        assert_eq!(growth.remaining(), 1);
        assert_eq!(growth.grow(2).len(), 1);
        assert!(growth.grow(2).is_empty());
    }

    #[test]
    fn test_same_seed_same_clusters() {
        let m = matrix();
        let a = ClusterGrowth::new(&m, StdRng::seed_from_u64(42)).grow(4);
        let b = ClusterGrowth::new(&m, StdRng::seed_from_u64(42)).grow(4);
        assert_eq!(a, b);
    }

    #[test]
    fn test_pool_remove_and_sample() {
        let mut pool = UnassignedPool::new(4);
        pool.remove(1);
        pool.remove(1);
        assert_eq!(pool.len(), 3);
        assert!(!pool.contains(1));
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            assert_ne!(pool.sample(&mut rng), Some(1));
        }
        for x in [3, 0, 2] {
            pool.remove(x);
        }
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.sample(&mut rng), None);
    }
}
