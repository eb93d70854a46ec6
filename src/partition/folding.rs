//! Folded layout for the k-partitioning problem (Babel, Kellerer & Kotov, 1998).
//!
//! Elements are assumed to be sorted by weight, heaviest first. The layout
//! pairs heavy positions with light ones inside each partition, which bounds the
//! ratio between any two partition totals without looking at the weights.

use crate::error::{Error, Result};
use crate::remap::check_permutation;

/// Fold the virtual `w x P` grid over `[i0, i0 + w * P)`, `w = ceil(n / P)`.
///
/// Returns `P` index lists. Indices at or beyond `i0 + n` come from the
/// partially populated last grid row and must be filled in by
/// [`partitions_to_permutation`] or [`fold_groups`].
pub fn folding_partition(n: usize, num_partitions: usize, i0: usize) -> Result<Vec<Vec<usize>>> {
    if num_partitions == 0 {
        return Err(Error::domain("folding partition needs at least one partition"));
    }
    let p = num_partitions;
    let width = n.div_ceil(p);

    let partitions = (0..p)
        .map(|i| {
            let mut part = Vec::with_capacity(width);
            for j in (0..width.saturating_sub(1)).step_by(2) {
                part.push(i0 + p * (j + 2) - i - 1);
                part.push(i0 + p * j + i);
            }
            if width % 2 == 1 {
                part.push(i0 + (width - 1) * p + i);
            }
            part
        })
        .collect();
    Ok(partitions)
}

/// Replace indices `>= end` with in-range indices taken from the tail of the
/// layout. Partition sizes keep their original cumulative boundaries clamped to
/// the shortened layout, so only the final partitions shrink.
fn fill_out_of_range(partitions: Vec<Vec<usize>>, end: usize) -> Vec<Vec<usize>> {
    let mut cumulative = Vec::with_capacity(partitions.len() + 1);
    cumulative.push(0usize);
    for part in &partitions {
        cumulative.push(cumulative[cumulative.len() - 1] + part.len());
    }

    let mut flat: Vec<usize> = partitions.into_iter().flatten().collect();
    let mut i = 0;
    while i < flat.len() {
        if flat[i] >= end {
            while flat.last().is_some_and(|&x| x >= end) {
                flat.pop();
            }
            if i >= flat.len() {
                break;
            }
            // flat[i] is out of range and the tail is not, so the tail is past i
            if let Some(last) = flat.pop() {
                flat[i] = last;
            }
        }
        i += 1;
    }

    let len = flat.len();
    cumulative
        .windows(2)
        .map(|w| flat[w[0].min(len)..w[1].min(len)].to_vec())
        .collect()
}

/// Flatten a folded layout over `[0, n)` into a permutation.
///
/// `permutation[new_position] = old_position`.
pub fn partitions_to_permutation(partitions: Vec<Vec<usize>>, n: usize) -> Result<Vec<usize>> {
    let permutation: Vec<usize> = fill_out_of_range(partitions, n).into_iter().flatten().collect();
    check_permutation(&permutation, n)?;
    Ok(permutation)
}

/// Fold consecutive groups of elements separately and interleave them so that
/// partition `i` holds partition `i` of every group, in group order.
///
/// `group_sizes` must sum to the number of elements.
pub fn fold_groups(group_sizes: &[usize], num_partitions: usize) -> Result<Vec<Vec<usize>>> {
    let mut merged: Vec<Vec<usize>> = vec![Vec::new(); num_partitions];
    let mut start = 0;
    for &size in group_sizes {
        let layout = folding_partition(size, num_partitions, start)?;
        for (target, part) in merged.iter_mut().zip(fill_out_of_range(layout, start + size)) {
            target.extend(part);
        }
        start += size;
    }
    let flat: Vec<usize> = merged.iter().flatten().copied().collect();
    check_permutation(&flat, start)?;
    Ok(merged)
}
