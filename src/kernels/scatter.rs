//! Scatter-reduce aggregation (reference path)
//!
//! ```text
//! out[dst[e],h,:] += att[e,h] * x_proj[src[e],h,:]     for every edge e
//! ```
//!
//! Several edges may target the same destination, so concurrent edge
//! partitions never share an output buffer: each partition accumulates into
//! a private `[N, H*D]` buffer and the buffers are summed afterwards.
//! Accumulation order therefore differs from the CSR path and results agree
//! only within floating-point tolerance.

use super::{check_edge_array, HeadShape, PARALLEL_EDGE_THRESHOLD, SCATTER_CHUNK};
use crate::graph::check_indices;
use crate::{GatError, Result};
use rayon::prelude::*;
use tracing::trace;

/// Weighted scatter-add of source features into destinations
///
/// # Arguments
/// - `att`: Attention weights `[E, H]`, same edge order as `src`/`dst`
/// - `x_proj`: Projected node features `[N, H, D]`
/// - `shape`: Dimensions of `x_proj`
/// - `src`, `dst`: Edge endpoints `[E]`
///
/// # Returns
/// Aggregated features `[N, H*D]`; nodes without incoming edges are zero.
pub fn scatter_reduce(
    att: &[f32],
    x_proj: &[f32],
    shape: HeadShape,
    src: &[usize],
    dst: &[usize],
) -> Result<Vec<f32>> {
    shape.check(x_proj, "scatter_reduce x_proj")?;
    if src.len() != dst.len() {
        return Err(GatError::ShapeMismatch(format!(
            "scatter_reduce: src has {} entries but dst has {}",
            src.len(),
            dst.len()
        )));
    }
    check_edge_array(att, src.len(), shape.heads, "scatter_reduce att")?;
    check_indices(src, shape.nodes, "scatter_reduce.src")?;
    check_indices(dst, shape.nodes, "scatter_reduce.dst")?;

    let (heads, dim, width) = (shape.heads, shape.dim, shape.row_width());
    let num_edges = src.len();
    trace!(edges = num_edges, nodes = shape.nodes, heads, dim, "scatter-reduce");

    let scatter_edge = |mut out: Vec<f32>, edge: usize| {
        let src_row = &x_proj[src[edge] * width..(src[edge] + 1) * width];
        let dst_row = &mut out[dst[edge] * width..(dst[edge] + 1) * width];
        for h in 0..heads {
            let w = att[edge * heads + h];
            let feat = &src_row[h * dim..(h + 1) * dim];
            for (acc, x) in dst_row[h * dim..(h + 1) * dim].iter_mut().zip(feat) {
                *acc += w * x;
            }
        }
        out
    };

    if num_edges < PARALLEL_EDGE_THRESHOLD {
        return Ok((0..num_edges).fold(vec![0.0f32; shape.len()], scatter_edge));
    }

    Ok((0..num_edges)
        .into_par_iter()
        .with_min_len(SCATTER_CHUNK)
        .fold(|| vec![0.0f32; shape.len()], scatter_edge)
        .reduce(
            || vec![0.0f32; shape.len()],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_half_weights() {
        // N=4, H=1, D=1; edges (0,1), (2,1), (1,3)
        let x = vec![10.0, 20.0, 30.0, 40.0];
        let att = vec![0.5, 0.5, 1.0];
        let out = scatter_reduce(&att, &x, HeadShape::new(4, 1, 1), &[0, 2, 1], &[1, 1, 3]).unwrap();
        assert_eq!(out, vec![0.0, 20.0, 0.0, 20.0]);
    }

    #[test]
    fn test_duplicate_edges_both_contribute() {
        let x = vec![2.0, 0.0];
        let att = vec![0.5, 0.5];
        let out = scatter_reduce(&att, &x, HeadShape::new(2, 1, 1), &[0, 0], &[1, 1]).unwrap();
        assert_eq!(out, vec![0.0, 2.0]);
    }

    #[test]
    fn test_heads_kept_separate() {
        // N=2, H=2, D=2; single edge 0 → 1
        let x = vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0];
        let att = vec![1.0, 0.5];
        let out = scatter_reduce(&att, &x, HeadShape::new(2, 2, 2), &[0], &[1]).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.5, 2.0]);
    }

    #[test]
    fn test_invalid_dst_fails() {
        let x = vec![1.0; 4];
        let err = scatter_reduce(&[1.0], &x, HeadShape::new(4, 1, 1), &[0], &[4]).unwrap_err();
        assert!(matches!(err, GatError::InvalidIndex { context: "scatter_reduce.dst", .. }));
    }

    #[test]
    fn test_shape_mismatch() {
        let x = vec![1.0; 4];
        let shape = HeadShape::new(4, 1, 1);
        assert!(matches!(
            scatter_reduce(&[1.0, 1.0], &x, shape, &[0], &[1]).unwrap_err(),
            GatError::ShapeMismatch(_)
        ));
        assert!(matches!(
            scatter_reduce(&[1.0], &x[..3], shape, &[0], &[1]).unwrap_err(),
            GatError::ShapeMismatch(_)
        ));
    }

    #[test]
    fn test_parallel_partitions_sum_correctly() {
        let n = 64;
        let num_edges = PARALLEL_EDGE_THRESHOLD * 3;
        let src: Vec<usize> = (0..num_edges).map(|e| e % n).collect();
        let dst: Vec<usize> = (0..num_edges).map(|e| (e / n) % n).collect();
        let x: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let att = vec![1.0f32; num_edges];

        let out = scatter_reduce(&att, &x, HeadShape::new(n, 1, 1), &src, &dst).unwrap();

        let mut expected = vec![0.0f32; n];
        for e in 0..num_edges {
            expected[dst[e]] += x[src[e]];
        }
        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-2, "{} vs {}", a, b);
        }
    }
}
