//! CSR-SPMM aggregation (performance path)
//!
//! Per head, the attention weights form a sparse `[N, N]` matrix in CSR
//! layout (`row_ptr`, `col_idx`, values = that head's column of `att`). It
//! multiplies the projected features viewed as a dense `[N, H*D]` matrix:
//!
//! ```text
//! out[d,h,:] = Σ_{i ∈ row_ptr[d]..row_ptr[d+1]} att[i,h] · x_proj[col_idx[i],h,:]
//! ```
//!
//! Every destination row owns its output slice, so rows run in parallel
//! with no synchronization. An empty row leaves its slice at zero.

use super::{check_edge_array, HeadShape, PARALLEL_ROW_THRESHOLD};
use crate::graph::CsrGraph;
use crate::{GatError, Result};
use rayon::prelude::*;
use tracing::trace;

/// Multi-head CSR × dense product
///
/// # Arguments
/// - `csr`: Destination-major adjacency (already index-validated)
/// - `att`: Attention weights `[E, H]` in CSR slot order (see [`CsrGraph::permute_edge_values`])
/// - `x_proj`: Projected node features `[N, H, D]`
/// - `shape`: Dimensions of `x_proj`
///
/// # Returns
/// Aggregated features `[N, H*D]`
pub fn spmm_csr_heads(csr: &CsrGraph, att: &[f32], x_proj: &[f32], shape: HeadShape) -> Result<Vec<f32>> {
    shape.check(x_proj, "spmm_csr_heads x_proj")?;
    if csr.num_nodes() != shape.nodes {
        return Err(GatError::ShapeMismatch(format!(
            "spmm_csr_heads: CSR has {} nodes but features have {}",
            csr.num_nodes(),
            shape.nodes
        )));
    }
    check_edge_array(att, csr.num_edges(), shape.heads, "spmm_csr_heads att")?;

    let (heads, dim, width) = (shape.heads, shape.dim, shape.row_width());
    let (row_ptr, col_idx) = (csr.row_ptr(), csr.col_idx());
    trace!(rows = shape.nodes, nnz = csr.num_edges(), heads, dim, "CSR-SPMM");

    let compute_row = |(d, out_row): (usize, &mut [f32])| {
        for i in row_ptr[d]..row_ptr[d + 1] {
            let col = col_idx[i];
            let in_row = &x_proj[col * width..(col + 1) * width];
            for h in 0..heads {
                let w = att[i * heads + h];
                let out_head = &mut out_row[h * dim..(h + 1) * dim];
                for (acc, x) in out_head.iter_mut().zip(&in_row[h * dim..(h + 1) * dim]) {
                    *acc += w * x;
                }
            }
        }
    };

    let mut out = vec![0.0f32; shape.len()];
    if shape.nodes < PARALLEL_ROW_THRESHOLD {
        out.chunks_exact_mut(width).enumerate().for_each(compute_row);
    } else {
        out.par_chunks_exact_mut(width).enumerate().for_each(compute_row);
    }
    Ok(out)
}

/// Single-valued CSR × dense product `A · X`
///
/// Edge weights come from `csr.values()`, or 1.0 when the CSR carries none.
///
/// # Arguments
/// - `dense`: Row-major `[N, features]`
pub fn spmm_csr(csr: &CsrGraph, dense: &[f32], features: usize) -> Result<Vec<f32>> {
    if features == 0 || dense.len() != csr.num_nodes() * features {
        return Err(GatError::ShapeMismatch(format!(
            "spmm_csr: dense must be [{}, {}], got {} values",
            csr.num_nodes(),
            features,
            dense.len()
        )));
    }

    let (row_ptr, col_idx, values) = (csr.row_ptr(), csr.col_idx(), csr.values());
    let compute_row = |(d, out_row): (usize, &mut [f32])| {
        for i in row_ptr[d]..row_ptr[d + 1] {
            let col = col_idx[i];
            let val = values.map_or(1.0, |v| v[i]);
            for (acc, x) in out_row.iter_mut().zip(&dense[col * features..(col + 1) * features]) {
                *acc += val * x;
            }
        }
    };

    let mut out = vec![0.0f32; dense.len()];
    if csr.num_nodes() < PARALLEL_ROW_THRESHOLD {
        out.chunks_exact_mut(features).enumerate().for_each(compute_row);
    } else {
        out.par_chunks_exact_mut(features).enumerate().for_each(compute_row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_csr, build_csr_weighted};
    use crate::kernels::scatter_reduce;

    #[test]
    fn test_scenario_half_weights() {
        let csr = build_csr(&[0, 2, 1], &[1, 1, 3], 4).unwrap();
        let x = vec![10.0, 20.0, 30.0, 40.0];
        let out = spmm_csr_heads(&csr, &[0.5, 0.5, 1.0], &x, HeadShape::new(4, 1, 1)).unwrap();
        assert_eq!(out, vec![0.0, 20.0, 0.0, 20.0]);
    }

    #[test]
    fn test_matches_scatter_multi_head() {
        let src = [3, 0, 1, 4, 2, 2, 0];
        let dst = [0, 2, 2, 1, 4, 0, 0];
        let shape = HeadShape::new(5, 3, 2);
        let x: Vec<f32> = (0..shape.len()).map(|i| (i as f32 * 0.37).cos()).collect();
        let att: Vec<f32> = (0..src.len() * 3).map(|i| 0.1 + (i % 5) as f32 * 0.2).collect();

        let expected = scatter_reduce(&att, &x, shape, &src, &dst).unwrap();

        let csr = build_csr(&src, &dst, 5).unwrap();
        let att_sorted = csr.permute_edge_values(&att, 3).unwrap();
        let out = spmm_csr_heads(&csr, &att_sorted, &x, shape).unwrap();

        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6);
        }
        // node 3 has no incoming edges
        assert!(out[3 * 6..4 * 6].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_parallel_rows() {
        let n = PARALLEL_ROW_THRESHOLD + 3;
        let src: Vec<usize> = (0..n).collect();
        let dst: Vec<usize> = (0..n).map(|i| (i + 1) % n).collect();
        let csr = build_csr(&src, &dst, n).unwrap();
        let x: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let out = spmm_csr_heads(&csr, &vec![1.0; n], &x, HeadShape::new(n, 1, 1)).unwrap();
        for d in 0..n {
            assert_eq!(out[d], ((d + n - 1) % n) as f32);
        }
    }

    #[test]
    fn test_shape_errors() {
        let csr = build_csr(&[0], &[1], 2).unwrap();
        let shape = HeadShape::new(2, 1, 1);
        assert!(spmm_csr_heads(&csr, &[1.0, 1.0], &[1.0, 2.0], shape).is_err());
        assert!(spmm_csr_heads(&csr, &[1.0], &[1.0, 2.0, 3.0], shape).is_err());
        assert!(spmm_csr_heads(&csr, &[1.0], &[1.0, 2.0, 3.0], HeadShape::new(3, 1, 1)).is_err());
    }

    #[test]
    fn test_weighted_spmm() {
        // A[1,0] = 2, A[1,2] = 3, A[0,2] = 1
        let csr = build_csr_weighted(&[0, 2, 2], &[1, 1, 0], &[2.0, 3.0, 1.0], 3).unwrap();
        let dense = vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let out = spmm_csr(&csr, &dense, 2).unwrap();
        assert_eq!(out, vec![3.0, 30.0, 11.0, 110.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unweighted_spmm_counts_duplicates() {
        let csr = build_csr(&[0, 0], &[1, 1], 2).unwrap();
        let out = spmm_csr(&csr, &[5.0, 7.0], 1).unwrap();
        assert_eq!(out, vec![0.0, 10.0]);
        assert!(spmm_csr(&csr, &[5.0], 1).is_err());
    }
}
