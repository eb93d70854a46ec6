//! Contiguous load-balanced cuts over elements in their given order.

use crate::error::{Error, Result};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start: usize,
    end: usize,
    load: f64,
    outlier: bool,
}

impl Segment {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Mark elements too heavy to share a partition.
///
/// An element heavier than the mean load per remaining partition is isolated,
/// then the mean is recomputed over what is left until nothing exceeds it.
fn isolate_outliers(loads: &[f64], num_partitions: usize) -> Vec<bool> {
    let mut outlier = vec![false; loads.len()];
    let mut remaining_load: f64 = loads.iter().sum();
    let mut remaining_parts = num_partitions;

    while remaining_parts > 1 {
        let mean = remaining_load / remaining_parts as f64;
        let heavy: Vec<usize> = (0..loads.len())
            .filter(|&i| !outlier[i] && loads[i] > mean)
            .collect();
        if heavy.is_empty() {
            break;
        }
        // each heavy element exceeds the mean, so fewer than remaining_parts qualify
        for i in heavy {
            if remaining_parts == 1 {
                break;
            }
            outlier[i] = true;
            remaining_load -= loads[i];
            remaining_parts -= 1;
        }
    }
    outlier
}

/// Initial segmentation: outliers alone, the rest grouped by cumulative-load bucket.
fn initial_segments(loads: &[f64], outlier: &[bool], budget: usize) -> Vec<Segment> {
    let rest_load: f64 = loads
        .iter()
        .zip(outlier)
        .filter(|(_, o)| !**o)
        .map(|(l, _)| l)
        .sum();
    let mean = if budget > 0 { rest_load / budget as f64 } else { 0.0 };

    let mut segments: Vec<Segment> = Vec::new();
    let mut before = 0.0;
    let mut current: Option<(usize, Segment)> = None;

    for (i, &load) in loads.iter().enumerate() {
        if outlier[i] {
            if let Some((_, seg)) = current.take() {
                segments.push(seg);
            }
            segments.push(Segment {
                start: i,
                end: i + 1,
                load,
                outlier: true,
            });
            continue;
        }
        let bucket = if mean > 0.0 {
            ((before / mean).floor() as usize).min(budget.saturating_sub(1))
        } else {
            0
        };
        before += load;
        match current.as_mut() {
            Some((b, seg)) if *b == bucket => {
                seg.end = i + 1;
                seg.load += load;
            }
            _ => {
                if let Some((_, seg)) = current.take() {
                    segments.push(seg);
                }
                current = Some((
                    bucket,
                    Segment {
                        start: i,
                        end: i + 1,
                        load,
                        outlier: false,
                    },
                ));
            }
        }
    }
    if let Some((_, seg)) = current {
        segments.push(seg);
    }
    segments
}

/// Split the heaviest multi-element segment at its load midpoint.
fn split_heaviest(segments: &mut Vec<Segment>, loads: &[f64]) -> bool {
    let target = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.len() > 1)
        .max_by(|(_, a), (_, b)| a.load.total_cmp(&b.load))
        .map(|(i, _)| i);
    let Some(idx) = target else {
        return false;
    };

    let seg = segments[idx];
    let half = seg.load / 2.0;
    let mut acc = 0.0;
    let mut cut = seg.start + 1;
    for i in seg.start..seg.end - 1 {
        acc += loads[i];
        cut = i + 1;
        if acc >= half {
            break;
        }
    }
    let head_load: f64 = loads[seg.start..cut].iter().sum();
    segments[idx] = Segment {
        end: cut,
        load: head_load,
        ..seg
    };
    segments.insert(
        idx + 1,
        Segment {
            start: cut,
            end: seg.end,
            load: seg.load - head_load,
            outlier: false,
        },
    );
    true
}

/// Merge the lightest adjacent pair, preferring pairs without an outlier.
fn merge_lightest(segments: &mut Vec<Segment>) -> bool {
    let pick = |allow_outliers: bool| {
        segments
            .windows(2)
            .enumerate()
            .filter(|(_, w)| allow_outliers || (!w[0].outlier && !w[1].outlier))
            .min_by(|(_, a), (_, b)| (a[0].load + a[1].load).total_cmp(&(b[0].load + b[1].load)))
            .map(|(i, _)| i)
    };
    let Some(idx) = pick(false).or_else(|| pick(true)) else {
        return false;
    };
    let right = segments.remove(idx + 1);
    let left = &mut segments[idx];
    left.end = right.end;
    left.load += right.load;
    left.outlier = false;
    true
}

/// Cut `loads` (already in partition order) into exactly `num_partitions`
/// contiguous, non-empty ranges. Returns the start offset of each range.
pub fn linear_cut(loads: &[f64], num_partitions: usize) -> Result<Vec<usize>> {
    let n = loads.len();
    if num_partitions == 0 {
        return Err(Error::domain("linear cut needs at least one partition"));
    }
    if num_partitions > n {
        return Err(Error::domain(format!(
            "cannot cut {} elements into {} non-empty partitions",
            n, num_partitions
        )));
    }
    if let Some(bad) = loads.iter().position(|l| !l.is_finite() || *l < 0.0) {
        return Err(Error::domain(format!(
            "element {} has invalid load {}",
            bad, loads[bad]
        )));
    }

    let outlier = isolate_outliers(loads, num_partitions);
    let outliers = outlier.iter().filter(|&&o| o).count();
    let mut segments = initial_segments(loads, &outlier, num_partitions - outliers);
    debug!(
        outliers,
        initial_segments = segments.len(),
        partitions = num_partitions,
        "Linear cut segmentation"
    );

    while segments.len() < num_partitions {
        if !split_heaviest(&mut segments, loads) {
            break;
        }
    }
    while segments.len() > num_partitions {
        if !merge_lightest(&mut segments) {
            break;
        }
    }
    if segments.len() != num_partitions {
        return Err(Error::domain(format!(
            "linear cut produced {} partitions, expected {}",
            segments.len(),
            num_partitions
        )));
    }
    Ok(segments.iter().map(|s| s.start).collect())
}
