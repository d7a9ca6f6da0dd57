//! Segment softmax normalizer
//!
//! Normalizes per-edge logits within each destination's incoming-edge
//! segment, per head:
//!
//! ```text
//! max[s,h] = max_{edge ∈ s} e[edge,h]                       (pass 1: max-reduce)
//! sum[s,h] = Σ_{edge ∈ s} exp(e[edge,h] - max[s,h])         (pass 2: exp-sum-reduce)
//! att[edge,h] = exp(e[edge,h] - max[s,h]) / (sum[s,h] + ε)  (pass 3: normalize)
//! ```
//!
//! Max subtraction keeps every exponent ≤ 0, so large logits cannot
//! overflow. `ε` = [`SOFTMAX_EPS`] only guards the denominator; for a
//! non-empty segment the sum is at least 1.0, so ε never shifts a weight.
//!
//! Empty segments reduce to `max = -inf`, `sum = 0`. No edge reads them, so
//! `-inf` never reaches a weight; they are counted as degenerate.
//!
//! When `seg_id` is sorted ascending (CSR order) the reductions run per
//! segment over contiguous ranges. Otherwise each edge partition reduces
//! into its own `[S, H]` buffer and the partitions are combined.

use super::{check_edge_array, PARALLEL_EDGE_THRESHOLD, PARALLEL_ROW_THRESHOLD, SCATTER_CHUNK};
use crate::graph::{check_indices, CsrGraph};
use crate::{GatError, Result};
use rayon::prelude::*;
use tracing::{debug, trace};

/// Denominator guard for empty segments
pub const SOFTMAX_EPS: f32 = 1e-16;

/// Attention weights plus the number of empty segments encountered
#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxOutput {
    /// `[E, H]`, same edge order as the input logits
    pub weights: Vec<f32>,
    /// Segments with no edges; their aggregated rows are zero
    pub degenerate_segments: usize,
}

/// Softmax of `logits[E, H]` grouped by `seg_id[E]`
///
/// # Errors
/// - `ShapeMismatch` if `logits` is not `[seg_id.len(), heads]`
/// - `InvalidIndex` if any `seg_id` is `>= num_segments`
pub fn segment_softmax(
    logits: &[f32],
    heads: usize,
    seg_id: &[usize],
    num_segments: usize,
) -> Result<SoftmaxOutput> {
    validate(logits, heads, seg_id, num_segments)?;

    if seg_id.windows(2).all(|w| w[0] <= w[1]) {
        let offsets = offsets_from_sorted(seg_id, num_segments);
        return Ok(softmax_contiguous(logits, heads, seg_id, &offsets));
    }

    trace!(edges = seg_id.len(), "segment softmax over unsorted segments");
    let max_val = segment_max(logits, heads, seg_id, num_segments)?;
    let exps = shifted_exp(logits, heads, seg_id, &max_val);
    let sum_val = segment_sum(&exps, heads, seg_id, num_segments)?;

    let mut weights = exps;
    normalize(&mut weights, heads, seg_id, &sum_val);

    let mut counts = vec![0usize; num_segments];
    for &s in seg_id {
        counts[s] += 1;
    }
    let degenerate_segments = counts.iter().filter(|&&c| c == 0).count();
    report_degenerate(degenerate_segments, num_segments);

    Ok(SoftmaxOutput {
        weights,
        degenerate_segments,
    })
}

/// Softmax of logits already in CSR slot order, one segment per row
pub fn segment_softmax_csr(logits: &[f32], heads: usize, csr: &CsrGraph) -> Result<SoftmaxOutput> {
    if heads == 0 {
        return Err(GatError::ShapeMismatch("segment softmax: heads must be positive".into()));
    }
    check_edge_array(logits, csr.num_edges(), heads, "segment_softmax_csr logits")?;
    Ok(softmax_contiguous(logits, heads, csr.row_idx(), csr.row_ptr()))
}

/// Per-segment, per-head maximum `[S, H]`; empty segments hold `-inf`
pub fn segment_max(values: &[f32], heads: usize, seg_id: &[usize], num_segments: usize) -> Result<Vec<f32>> {
    validate(values, heads, seg_id, num_segments)?;
    Ok(partitioned_reduce(
        values,
        heads,
        seg_id,
        num_segments,
        f32::NEG_INFINITY,
        f32::max,
    ))
}

/// Per-segment, per-head sum `[S, H]`; empty segments hold `0`
pub fn segment_sum(values: &[f32], heads: usize, seg_id: &[usize], num_segments: usize) -> Result<Vec<f32>> {
    validate(values, heads, seg_id, num_segments)?;
    Ok(partitioned_reduce(
        values,
        heads,
        seg_id,
        num_segments,
        0.0,
        |a, b| a + b,
    ))
}

fn validate(values: &[f32], heads: usize, seg_id: &[usize], num_segments: usize) -> Result<()> {
    if heads == 0 {
        return Err(GatError::ShapeMismatch("segment softmax: heads must be positive".into()));
    }
    check_edge_array(values, seg_id.len(), heads, "segment values")?;
    check_indices(seg_id, num_segments, "segment_softmax.seg_id")
}

fn offsets_from_sorted(seg_id: &[usize], num_segments: usize) -> Vec<usize> {
    let mut offsets = vec![0usize; num_segments + 1];
    for &s in seg_id {
        offsets[s + 1] += 1;
    }
    for i in 0..num_segments {
        offsets[i + 1] += offsets[i];
    }
    offsets
}

/// Reference point for a segment's exponent; an all `-inf` segment uses 0
#[inline]
fn shift(max: f32) -> f32 {
    if max == f32::NEG_INFINITY {
        0.0
    } else {
        max
    }
}

/// Each edge partition reduces into a private `[S, H]` buffer, then buffers combine
fn partitioned_reduce<F>(
    values: &[f32],
    heads: usize,
    seg_id: &[usize],
    num_segments: usize,
    identity: f32,
    combine: F,
) -> Vec<f32>
where
    F: Fn(f32, f32) -> f32 + Sync + Send,
{
    let len = num_segments * heads;
    let accumulate = |mut acc: Vec<f32>, (edge, &s): (usize, &usize)| {
        for h in 0..heads {
            let slot = &mut acc[s * heads + h];
            *slot = combine(*slot, values[edge * heads + h]);
        }
        acc
    };

    if seg_id.len() < PARALLEL_EDGE_THRESHOLD {
        return seg_id.iter().enumerate().fold(vec![identity; len], accumulate);
    }

    seg_id
        .par_iter()
        .enumerate()
        .with_min_len(SCATTER_CHUNK)
        .fold(|| vec![identity; len], accumulate)
        .reduce(
            || vec![identity; len],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x = combine(*x, y);
                }
                a
            },
        )
}

fn shifted_exp(logits: &[f32], heads: usize, seg_id: &[usize], max_val: &[f32]) -> Vec<f32> {
    let mut exps = vec![0.0f32; logits.len()];
    let fill = |(edge, out): (usize, &mut [f32])| {
        let s = seg_id[edge];
        for h in 0..heads {
            out[h] = (logits[edge * heads + h] - shift(max_val[s * heads + h])).exp();
        }
    };
    if seg_id.len() < PARALLEL_EDGE_THRESHOLD {
        exps.chunks_exact_mut(heads).enumerate().for_each(fill);
    } else {
        exps.par_chunks_exact_mut(heads).enumerate().for_each(fill);
    }
    exps
}

/// In place: `w[edge,h] /= sum[seg,h] + ε`
fn normalize(weights: &mut [f32], heads: usize, seg_id: &[usize], sum_val: &[f32]) {
    let divide = |(edge, w): (usize, &mut [f32])| {
        let s = seg_id[edge];
        for h in 0..heads {
            w[h] /= sum_val[s * heads + h] + SOFTMAX_EPS;
        }
    };
    if seg_id.len() < PARALLEL_EDGE_THRESHOLD {
        weights.chunks_exact_mut(heads).enumerate().for_each(divide);
    } else {
        weights.par_chunks_exact_mut(heads).enumerate().for_each(divide);
    }
}

/// Sorted segments: both reductions run per segment over `offsets[s]..offsets[s+1]`
fn softmax_contiguous(logits: &[f32], heads: usize, seg_id: &[usize], offsets: &[usize]) -> SoftmaxOutput {
    let num_segments = offsets.len() - 1;
    let mut max_val = vec![f32::NEG_INFINITY; num_segments * heads];
    let mut sum_val = vec![0.0f32; num_segments * heads];

    let reduce_max = |(s, max): (usize, &mut [f32])| {
        for edge in offsets[s]..offsets[s + 1] {
            for h in 0..heads {
                max[h] = max[h].max(logits[edge * heads + h]);
            }
        }
    };
    let reduce_sum = |(s, (sum, max)): (usize, (&mut [f32], &[f32]))| {
        for edge in offsets[s]..offsets[s + 1] {
            for h in 0..heads {
                sum[h] += (logits[edge * heads + h] - shift(max[h])).exp();
            }
        }
    };

    if num_segments < PARALLEL_ROW_THRESHOLD {
        max_val.chunks_exact_mut(heads).enumerate().for_each(reduce_max);
        sum_val
            .chunks_exact_mut(heads)
            .zip(max_val.chunks_exact(heads))
            .enumerate()
            .for_each(reduce_sum);
    } else {
        max_val.par_chunks_exact_mut(heads).enumerate().for_each(reduce_max);
        sum_val
            .par_chunks_exact_mut(heads)
            .zip(max_val.par_chunks_exact(heads))
            .enumerate()
            .for_each(reduce_sum);
    }

    let mut weights = shifted_exp(logits, heads, seg_id, &max_val);
    normalize(&mut weights, heads, seg_id, &sum_val);

    let degenerate_segments = offsets.windows(2).filter(|w| w[0] == w[1]).count();
    report_degenerate(degenerate_segments, num_segments);

    SoftmaxOutput {
        weights,
        degenerate_segments,
    }
}

fn report_degenerate(count: usize, num_segments: usize) {
    if count > 0 {
        debug!(
            degenerate = count,
            segments = num_segments,
            "segments without incoming edges produce zero rows"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_csr;

    fn segment_sums(weights: &[f32], heads: usize, seg_id: &[usize], num_segments: usize) -> Vec<f32> {
        let mut sums = vec![0.0f32; num_segments * heads];
        for (edge, &s) in seg_id.iter().enumerate() {
            for h in 0..heads {
                sums[s * heads + h] += weights[edge * heads + h];
            }
        }
        sums
    }

    #[test]
    fn test_uniform_logits_equal_weights() {
        // Segments: node 1 has two edges, node 3 has one, nodes 0 and 2 none
        let out = segment_softmax(&[0.0, 0.0, 0.0], 1, &[1, 1, 3], 4).unwrap();
        assert!((out.weights[0] - 0.5).abs() < 1e-6);
        assert!((out.weights[1] - 0.5).abs() < 1e-6);
        assert!((out.weights[2] - 1.0).abs() < 1e-6);
        assert_eq!(out.degenerate_segments, 2);
    }

    #[test]
    fn test_large_logits_do_not_overflow() {
        let logits = [1000.0, 1001.0, 999.0, -1000.0];
        let out = segment_softmax(&logits, 1, &[0, 0, 0, 1], 2).unwrap();
        assert!(out.weights.iter().all(|w| w.is_finite()));
        let sums = segment_sums(&out.weights, 1, &[0, 0, 0, 1], 2);
        assert!((sums[0] - 1.0).abs() < 1e-6);
        assert!((sums[1] - 1.0).abs() < 1e-6);
        assert!(out.weights[1] > out.weights[0] && out.weights[0] > out.weights[2]);
    }

    #[test]
    fn test_all_negative_infinity_segment_is_zero() {
        let logits = [f32::NEG_INFINITY, f32::NEG_INFINITY, 0.0];
        let out = segment_softmax(&logits, 1, &[0, 0, 1], 2).unwrap();
        assert_eq!(out.weights[0], 0.0);
        assert_eq!(out.weights[1], 0.0);
        assert!((out.weights[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unsorted_matches_sorted() {
        // Two heads, segments interleaved
        let seg = [2, 0, 2, 1, 0, 2];
        let logits: Vec<f32> = (0..12).map(|i| (i as f32 * 0.7).sin() * 3.0).collect();
        let unsorted = segment_softmax(&logits, 2, &seg, 4).unwrap();

        let mut order: Vec<usize> = (0..seg.len()).collect();
        order.sort_by_key(|&e| seg[e]);
        let sorted_seg: Vec<usize> = order.iter().map(|&e| seg[e]).collect();
        let sorted_logits: Vec<f32> = order
            .iter()
            .flat_map(|&e| logits[e * 2..e * 2 + 2].to_vec())
            .collect();
        let sorted = segment_softmax(&sorted_logits, 2, &sorted_seg, 4).unwrap();

        for (pos, &e) in order.iter().enumerate() {
            for h in 0..2 {
                assert!((sorted.weights[pos * 2 + h] - unsorted.weights[e * 2 + h]).abs() < 1e-6);
            }
        }
        assert_eq!(unsorted.degenerate_segments, 1);
        assert_eq!(sorted.degenerate_segments, 1);
    }

    #[test]
    fn test_segment_sums_to_one_parallel() {
        let num_segments = PARALLEL_ROW_THRESHOLD * 2;
        let num_edges = PARALLEL_EDGE_THRESHOLD * 2;
        let heads = 4;
        let seg: Vec<usize> = (0..num_edges).map(|e| (e * 31 + 7) % num_segments).collect();
        let logits: Vec<f32> = (0..num_edges * heads).map(|i| ((i * 17) % 41) as f32 - 20.0).collect();

        let out = segment_softmax(&logits, heads, &seg, num_segments).unwrap();
        let sums = segment_sums(&out.weights, heads, &seg, num_segments);
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5, "segment sum was {}", s);
        }
    }

    #[test]
    fn test_csr_variant_matches_generic() {
        let csr = build_csr(&[0, 1, 2, 3, 0], &[3, 3, 0, 1, 1], 4).unwrap();
        let logits = vec![0.3, -1.2, 2.5, 0.0, 4.0];
        let via_csr = segment_softmax_csr(&logits, 1, &csr).unwrap();
        let via_ids = segment_softmax(&logits, 1, csr.row_idx(), 4).unwrap();
        assert_eq!(via_csr, via_ids);
        assert_eq!(via_csr.degenerate_segments, 1);
    }

    #[test]
    fn test_segment_max_and_sum() {
        let values = [1.0, -2.0, 3.0, 4.0];
        let seg = [1, 0, 1, 1];
        let max = segment_max(&values, 1, &seg, 3).unwrap();
        assert_eq!(max, vec![-2.0, 4.0, f32::NEG_INFINITY]);
        let sum = segment_sum(&values, 1, &seg, 3).unwrap();
        assert_eq!(sum, vec![-2.0, 8.0, 0.0]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            segment_softmax(&[0.0, 0.0], 1, &[0, 2], 2).unwrap_err(),
            GatError::InvalidIndex { position: 1, value: 2, .. }
        ));
        assert!(matches!(
            segment_softmax(&[0.0, 0.0, 0.0], 2, &[0, 1], 2).unwrap_err(),
            GatError::ShapeMismatch(_)
        ));
        assert!(segment_softmax(&[], 0, &[], 1).is_err());
    }

    #[test]
    fn test_eps_does_not_perturb_single_edge() {
        let out = segment_softmax(&[-3.25], 1, &[0], 1).unwrap();
        assert_eq!(out.weights[0], 1.0);
    }
}
