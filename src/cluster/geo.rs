//! Geographic clustering by nested administrative codes.

use std::collections::HashMap;

/// Split every group larger than `capacity` into consecutive chunks, in place.
pub fn split_large(groups: Vec<Vec<usize>>, capacity: usize) -> Vec<Vec<usize>> {
    let capacity = capacity.max(1);
    groups
        .into_iter()
        .flat_map(|g| {
            if g.len() > capacity {
                g.chunks(capacity).map(|c| c.to_vec()).collect::<Vec<_>>()
            } else {
                vec![g]
            }
        })
        .collect()
}

/// Move members from the back groups into under-full front groups until all
/// groups but the last hold exactly `capacity` members.
pub fn recombine(mut groups: Vec<Vec<usize>>, capacity: usize) -> Vec<Vec<usize>> {
    groups.retain(|g| !g.is_empty());
    if groups.len() <= 1 {
        return groups;
    }
    let mut front = 0;
    let mut back = groups.len() - 1;
    while front < back {
        let lacking = capacity.saturating_sub(groups[front].len());
        if lacking == 0 {
            front += 1;
            continue;
        }
        let available = groups[back].len();
        if lacking >= available {
            let moved = std::mem::take(&mut groups[back]);
            groups[front].extend(moved);
            back -= 1;
            if lacking == available {
                front += 1;
            }
        } else {
            let moved: Vec<usize> = groups[back].drain(..lacking).collect();
            groups[front].extend(moved);
            front += 1;
        }
    }
    groups.truncate(back + 1);
    groups.retain(|g| !g.is_empty());
    groups
}

/// Group `members` by their code at `depth`, keeping first-seen order.
fn group_by_code(members: &[usize], codes: &[Vec<String>], depth: usize) -> Vec<Vec<usize>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for &m in members {
        let code = codes[m][depth].as_str();
        let slot = *index.entry(code).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(m);
    }
    groups
}

fn cluster_level(members: &[usize], codes: &[Vec<String>], depth: usize, capacity: usize) -> Vec<Vec<usize>> {
    let groups = group_by_code(members, codes, depth);
    let max_depth = codes.first().map_or(0, |c| c.len().saturating_sub(1));
    if depth >= max_depth {
        return recombine(split_large(groups, capacity), capacity);
    }
    let nested = groups
        .iter()
        .flat_map(|g| cluster_level(g, codes, depth + 1, capacity))
        .collect();
    recombine(nested, capacity)
}

/// Cluster elements whose admin codes are `codes[i]` (outermost level first)
/// into groups of `capacity`, keeping administrative areas together where
/// possible. At most one cluster is partially filled.
pub fn geo_clusters(codes: &[Vec<String>], capacity: usize) -> Vec<Vec<usize>> {
    if codes.is_empty() {
        return Vec::new();
    }
    let members: Vec<usize> = (0..codes.len()).collect();
    if codes[0].is_empty() {
        return recombine(split_large(vec![members], capacity), capacity);
    }
    cluster_level(&members, codes, 0, capacity)
}
