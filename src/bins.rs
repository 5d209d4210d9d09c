//! Bin-boundary builder and multicomponent base chooser (`spec.md` §4.4,
//! §4.5), grounded in `ibis::index::divideCounts`/`setBases`
//! (`examples/original_source/storage/warp/src/fastbit-2.0.3/src/index.h`).

use tracing::trace;

/// Divides a value histogram into `k` groups whose counts are close to
/// `total / k`, following the heavy-singleton/recursive-split/smoothing
/// procedure of `spec.md` §4.4.
///
/// `counts[i]` is the number of rows with the `i`-th distinct value, in
/// ascending value order. Returns group boundaries as indices into
/// `counts`: group `g` covers `counts[boundaries[g]..boundaries[g + 1]]`,
/// with `boundaries[0] == 0` and `boundaries[last] == counts.len()`.
pub fn divide_counts(counts: &[u64], k: usize) -> Vec<usize> {
    if counts.is_empty() || k == 0 {
        return vec![0];
    }
    if k >= counts.len() {
        return (0..=counts.len()).collect();
    }

    let total: u64 = counts.iter().sum();
    let mean = (total as f64) / (k as f64);

    let mut boundaries = vec![0usize];
    let mut pos = 0usize;
    let mut groups_left = k;

    while pos < counts.len() && groups_left > 0 {
        if groups_left == 1 {
            boundaries.push(counts.len());
            pos = counts.len();
            break;
        }

        // Heavy singleton: a single value already at or above the mean
        // becomes its own group.
        if (counts[pos] as f64) >= mean {
            pos += 1;
            boundaries.push(pos);
            groups_left -= 1;
            continue;
        }

        let mut acc = 0u64;
        let mut end = pos;
        while end < counts.len() {
            let next_acc = acc + counts[end];
            if (counts[end] as f64) >= mean && acc == 0 {
                // Walked into a heavy singleton; close the current group
                // here and let the next iteration handle it alone.
                break;
            }
            let next_frac = next_acc as f64 / mean;
            if next_frac > 1.4 {
                // Accepting `end` would overshoot 1.4*mean; prefer to close
                // unless the group is still empty (must take at least one).
                if acc == 0 {
                    acc = next_acc;
                    end += 1;
                }
                break;
            }
            acc = next_acc;
            end += 1;
            if acc as f64 >= 0.6 * mean && end < counts.len() {
                let after = acc + counts[end];
                if (after as f64 / mean) > 1.4 {
                    break;
                }
            }
        }
        if end == pos {
            end = pos + 1;
        }
        pos = end;
        boundaries.push(pos);
        groups_left -= 1;
    }

    if pos < counts.len() {
        boundaries.push(counts.len());
    }

    reconcile_group_count(&mut boundaries, k);
    smooth(&mut boundaries, counts);
    trace!(groups = boundaries.len() - 1, requested = k, "divide_counts finished");
    boundaries
}

/// Ensures `boundaries` describes exactly `k` groups by splitting the
/// heaviest group or merging the last two, per `spec.md` §4.4 step 4.
fn reconcile_group_count(boundaries: &mut Vec<usize>, k: usize) {
    loop {
        let groups = boundaries.len() - 1;
        if groups == k {
            return;
        }
        if groups < k {
            // Split the widest group in half.
            let (widest, _) = (0..groups)
                .map(|g| (g, boundaries[g + 1] - boundaries[g]))
                .max_by_key(|&(_, width)| width)
                .unwrap();
            let mid = boundaries[widest] + (boundaries[widest + 1] - boundaries[widest]) / 2;
            if mid == boundaries[widest] || mid == boundaries[widest + 1] {
                // Can't split further (single-element group); give up rather
                // than loop forever.
                return;
            }
            boundaries.insert(widest + 1, mid);
        } else {
            // Merge the last group into its neighbor.
            let n = boundaries.len();
            boundaries.remove(n - 2);
        }
    }
}

/// Final smoothing pass: locates the adjacent pair with the largest weight
/// gap and moves one boundary row at a time across it until moving further
/// would worsen the gap, per `spec.md` §4.4 step 5. Ties in the post-move
/// gap favor the move that reduces the previously heavier side.
fn smooth(boundaries: &mut [usize], counts: &[u64]) {
    let weight = |b: &[usize], g: usize| -> i64 { counts[b[g]..b[g + 1]].iter().sum::<u64>() as i64 };

    loop {
        let groups = boundaries.len() - 1;
        if groups < 2 {
            return;
        }

        let (worst_g, worst_gap) = (0..groups - 1)
            .map(|g| (g, (weight(boundaries, g) - weight(boundaries, g + 1)).abs()))
            .max_by_key(|&(_, gap)| gap)
            .unwrap();
        if worst_gap == 0 {
            return;
        }

        let mut moved_any = false;
        loop {
            let left = weight(boundaries, worst_g);
            let right = weight(boundaries, worst_g + 1);
            let gap = (left - right).abs();
            if gap == 0 {
                break;
            }
            let moved = if left > right {
                // Shrink the heavier left group by handing its last row to the right.
                if boundaries[worst_g + 1] - boundaries[worst_g] <= 1 {
                    false
                } else {
                    let row = counts[boundaries[worst_g + 1] - 1] as i64;
                    let new_gap = ((left - row) - (right + row)).abs();
                    if new_gap < gap {
                        boundaries[worst_g + 1] -= 1;
                        true
                    } else {
                        false
                    }
                }
            } else if boundaries[worst_g + 2] - boundaries[worst_g + 1] <= 1 {
                false
            } else {
                let row = counts[boundaries[worst_g + 1]] as i64;
                let new_gap = ((left + row) - (right - row)).abs();
                if new_gap < gap {
                    boundaries[worst_g + 1] += 1;
                    true
                } else {
                    false
                }
            };
            if !moved {
                break;
            }
            moved_any = true;
        }
        if !moved_any {
            return;
        }
    }
}

/// Chooses per-component radixes for a multicomponent encoding so that
/// `∏ bases ≥ distinct_count`, per `spec.md` §4.5.
///
/// Starts every component at `ceil(distinct_count^(1/components))`, then
/// tightens trailing components to one less while the product still meets
/// `distinct_count`, and finally drops trailing components equal to 1.
pub fn choose_multicomponent_bases(distinct_count: u64, components: usize) -> Vec<u32> {
    if components <= 1 || distinct_count <= 1 {
        return vec![distinct_count.max(1) as u32];
    }
    let base = ceil_root(distinct_count, components as u32);

    // The natural root already bottoms out at the minimum allowed base: a
    // `components`-way split buys nothing over a single equality
    // sub-encoding of the full cardinality, so collapse to the degenerate
    // single-component case instead of emitting `components` bitvector
    // groups of base 2.
    if base <= 2 {
        return vec![distinct_count as u32];
    }
    let mut bases = vec![base; components];

    // Tighten trailing components from the back while the product still
    // covers distinct_count with one less.
    for i in (0..components).rev() {
        if bases[i] <= 2 {
            continue;
        }
        let mut candidate = bases.clone();
        candidate[i] -= 1;
        let product: u128 = candidate.iter().map(|&b| b as u128).product();
        if product >= distinct_count as u128 {
            bases = candidate;
        }
    }

    while bases.last() == Some(&1) {
        bases.pop();
    }
    if bases.is_empty() {
        bases.push(distinct_count.max(1) as u32);
    }
    bases.into_iter().map(|b| b as u32).collect()
}

/// Smallest integer `r` such that `r^exp >= value`, i.e. `ceil(value^(1/exp))`
/// computed without floating-point rounding error.
fn ceil_root(value: u64, exp: u32) -> u64 {
    if value <= 1 {
        return value.max(1);
    }
    let pow = |base: u64| -> u128 {
        let mut acc: u128 = 1;
        for _ in 0..exp {
            acc = acc.saturating_mul(base as u128);
            if acc > value as u128 {
                break;
            }
        }
        acc
    };
    let (mut lo, mut hi) = (1u64, value);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pow(mid) >= value as u128 {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divide_counts_uniform_histogram_balances_groups() {
        let counts = vec![10u64; 100];
        let boundaries = divide_counts(&counts, 10);
        assert_eq!(boundaries.len() - 1, 10);
        let mean = 100.0;
        for g in 0..boundaries.len() - 1 {
            let sum: u64 = counts[boundaries[g]..boundaries[g + 1]].iter().sum();
            assert!((sum as f64) <= 1.4 * mean, "group {g} too heavy: {sum}");
        }
        assert_eq!(*boundaries.last().unwrap(), counts.len());
    }

    #[test]
    fn divide_counts_k_covers_full_range() {
        let counts = vec![1, 2, 3, 40, 1, 1, 1, 1, 1, 1];
        let boundaries = divide_counts(&counts, 4);
        assert_eq!(boundaries[0], 0);
        assert_eq!(*boundaries.last().unwrap(), counts.len());
    }

    #[test]
    fn ceil_root_matches_exact_powers() {
        assert_eq!(ceil_root(1000, 3), 10);
        assert_eq!(ceil_root(1001, 3), 11);
        assert_eq!(ceil_root(8, 3), 2);
        assert_eq!(ceil_root(9, 3), 3);
    }

    #[test]
    fn multicomponent_bases_s3_cardinality_1000_k3() {
        let bases = choose_multicomponent_bases(1000, 3);
        assert_eq!(bases, vec![10, 10, 10]);
    }

    #[test]
    fn multicomponent_bases_s3_cardinality_1001_k3() {
        let bases = choose_multicomponent_bases(1001, 3);
        assert_eq!(bases, vec![11, 10, 10]);
        let product: u64 = bases.iter().map(|&b| b as u64).product();
        assert!(product >= 1001);
    }

    #[test]
    fn multicomponent_bases_s3_cardinality_7_k3_collapses() {
        let bases = choose_multicomponent_bases(7, 3);
        assert_eq!(bases, vec![7]);
    }

    #[test]
    fn multicomponent_bases_never_below_two_except_degenerate() {
        let bases = choose_multicomponent_bases(3, 2);
        assert!(bases.iter().all(|&b| b >= 2) || bases.len() == 1);
    }
}
