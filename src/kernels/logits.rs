//! Attention logit computer
//!
//! Additive attention decomposes the per-edge score into two per-node terms:
//!
//! ```text
//! alpha_src[n,h] = Σ_d x_proj[n,h,d] · a_src[h,d]
//! alpha_dst[n,h] = Σ_d x_proj[n,h,d] · a_dst[h,d]
//! e[edge,h]      = alpha_src[src[edge],h] + alpha_dst[dst[edge],h]
//! ```
//!
//! so logits are gathered per edge in O(E·H) without an `[N,N,H]` score
//! matrix. No nonlinearity is applied here.

use super::{HeadShape, PARALLEL_EDGE_THRESHOLD, PARALLEL_ROW_THRESHOLD};
use crate::graph::check_indices;
use crate::{GatError, Result};
use rayon::prelude::*;
use tracing::trace;

/// Per-node, per-head attention term `[N, H]`
///
/// # Arguments
/// - `x_proj`: Projected node features `[N, H, D]`
/// - `shape`: Dimensions of `x_proj`
/// - `a`: Per-head attention vector `[H, D]`
pub fn node_attention_scores(x_proj: &[f32], shape: HeadShape, a: &[f32]) -> Result<Vec<f32>> {
    shape.check(x_proj, "node_attention_scores x_proj")?;
    if a.len() != shape.row_width() {
        return Err(GatError::ShapeMismatch(format!(
            "attention vector must be [{}, {}], got {} values",
            shape.heads,
            shape.dim,
            a.len()
        )));
    }

    let (heads, dim) = (shape.heads, shape.dim);
    let score_row = |(row, scores): (&[f32], &mut [f32])| {
        for (h, score) in scores.iter_mut().enumerate() {
            let feat = &row[h * dim..(h + 1) * dim];
            let att = &a[h * dim..(h + 1) * dim];
            *score = feat.iter().zip(att).map(|(x, w)| x * w).sum();
        }
    };

    let mut out = vec![0.0f32; shape.nodes * heads];
    if shape.nodes < PARALLEL_ROW_THRESHOLD {
        x_proj
            .chunks_exact(shape.row_width())
            .zip(out.chunks_exact_mut(heads))
            .for_each(score_row);
    } else {
        x_proj
            .par_chunks_exact(shape.row_width())
            .zip(out.par_chunks_exact_mut(heads))
            .for_each(score_row);
    }
    Ok(out)
}

/// Gather per-edge logits `e[E, H]` in the order of `src`/`dst`
///
/// # Errors
/// - `ShapeMismatch` if the alpha arrays are not `[num_nodes, heads]` or
///   `src`/`dst` lengths differ
/// - `InvalidIndex` if any endpoint is outside `[0, num_nodes)`
pub fn edge_logits(
    alpha_src: &[f32],
    alpha_dst: &[f32],
    src: &[usize],
    dst: &[usize],
    num_nodes: usize,
    heads: usize,
) -> Result<Vec<f32>> {
    if heads == 0 {
        return Err(GatError::ShapeMismatch("edge_logits: heads must be positive".into()));
    }
    for (name, alpha) in [("alpha_src", alpha_src), ("alpha_dst", alpha_dst)] {
        if alpha.len() != num_nodes * heads {
            return Err(GatError::ShapeMismatch(format!(
                "{} must be [{}, {}], got {} values",
                name,
                num_nodes,
                heads,
                alpha.len()
            )));
        }
    }
    if src.len() != dst.len() {
        return Err(GatError::ShapeMismatch(format!(
            "edge_logits: src has {} entries but dst has {}",
            src.len(),
            dst.len()
        )));
    }
    check_indices(src, num_nodes, "edge_logits.src")?;
    check_indices(dst, num_nodes, "edge_logits.dst")?;

    let num_edges = src.len();
    trace!(edges = num_edges, heads, "gathering edge logits");

    let gather = |(edge, logit): (usize, &mut [f32])| {
        let s = &alpha_src[src[edge] * heads..(src[edge] + 1) * heads];
        let d = &alpha_dst[dst[edge] * heads..(dst[edge] + 1) * heads];
        for h in 0..heads {
            logit[h] = s[h] + d[h];
        }
    };

    let mut out = vec![0.0f32; num_edges * heads];
    if num_edges < PARALLEL_EDGE_THRESHOLD {
        out.chunks_exact_mut(heads).enumerate().for_each(gather);
    } else {
        out.par_chunks_exact_mut(heads).enumerate().for_each(gather);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_scores_two_heads() {
        // N=2, H=2, D=2
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let a = vec![1.0, 0.0, 0.5, 0.5];
        let scores = node_attention_scores(&x, HeadShape::new(2, 2, 2), &a).unwrap();
        // node 0: h0 = 1, h1 = 3.5; node 1: h0 = 5, h1 = 7.5
        assert_eq!(scores, vec![1.0, 3.5, 5.0, 7.5]);
    }

    #[test]
    fn test_node_scores_shape_errors() {
        let x = vec![0.0; 8];
        assert!(node_attention_scores(&x, HeadShape::new(2, 2, 2), &[0.0; 3]).is_err());
        assert!(node_attention_scores(&x[..7], HeadShape::new(2, 2, 2), &[0.0; 4]).is_err());
    }

    #[test]
    fn test_node_scores_parallel_matches_sequential() {
        let n = PARALLEL_ROW_THRESHOLD + 7;
        let shape = HeadShape::new(n, 3, 4);
        let x: Vec<f32> = (0..shape.len()).map(|i| ((i % 13) as f32) * 0.1 - 0.6).collect();
        let a: Vec<f32> = (0..12).map(|i| i as f32 * 0.05).collect();
        let scores = node_attention_scores(&x, shape, &a).unwrap();
        for node in [0, n / 2, n - 1] {
            for h in 0..3 {
                let expected: f32 = (0..4).map(|d| x[node * 12 + h * 4 + d] * a[h * 4 + d]).sum();
                assert!((scores[node * 3 + h] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_edge_logits_additive() {
        // N=3, H=2
        let alpha_src = vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let alpha_dst = vec![0.1, 0.01, 0.2, 0.02, 0.3, 0.03];
        let e = edge_logits(&alpha_src, &alpha_dst, &[0, 2], &[1, 0], 3, 2).unwrap();
        assert_eq!(e.len(), 4);
        assert!((e[0] - 1.2).abs() < 1e-6);
        assert!((e[1] - 10.02).abs() < 1e-5);
        assert!((e[2] - 3.1).abs() < 1e-6);
        assert!((e[3] - 30.01).abs() < 1e-5);
    }

    #[test]
    fn test_edge_logits_invalid_index() {
        let alpha = vec![0.0; 3];
        let err = edge_logits(&alpha, &alpha, &[0, 1], &[1, 3], 3, 1).unwrap_err();
        assert!(matches!(
            err,
            GatError::InvalidIndex { context: "edge_logits.dst", position: 1, value: 3, num_nodes: 3 }
        ));
    }

    #[test]
    fn test_edge_logits_shape_mismatch() {
        let alpha = vec![0.0; 4];
        assert!(matches!(
            edge_logits(&alpha, &alpha, &[0], &[1], 3, 1).unwrap_err(),
            GatError::ShapeMismatch(_)
        ));
        let alpha = vec![0.0; 3];
        assert!(matches!(
            edge_logits(&alpha, &alpha, &[0, 1], &[1], 3, 1).unwrap_err(),
            GatError::ShapeMismatch(_)
        ));
    }

    #[test]
    fn test_edge_logits_parallel_path() {
        let n = 50;
        let e_count = PARALLEL_EDGE_THRESHOLD + 10;
        let alpha_src: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let alpha_dst: Vec<f32> = (0..n).map(|i| -(i as f32) * 0.5).collect();
        let src: Vec<usize> = (0..e_count).map(|i| i % n).collect();
        let dst: Vec<usize> = (0..e_count).map(|i| (i * 7) % n).collect();
        let e = edge_logits(&alpha_src, &alpha_dst, &src, &dst, n, 1).unwrap();
        for i in [0, e_count / 3, e_count - 1] {
            assert_eq!(e[i], alpha_src[src[i]] + alpha_dst[dst[i]]);
        }
    }
}
