//! Aggregation kernels
//!
//! Host-side numeric kernels over row-major `f32` slices. Each one is a pure
//! function of its inputs: it validates shapes and indices first, then
//! allocates and fills a fresh output buffer.
//!
//! ## Pipeline
//!
//! | Stage | Function | Shapes |
//! |---|---|---|
//! | Node scores | [`node_attention_scores`] | `x_proj[N,H,D]`, `a[H,D]` → `[N,H]` |
//! | Edge logits | [`edge_logits`] | `alpha_src[N,H]`, `alpha_dst[N,H]` → `e[E,H]` |
//! | Normalize | [`segment_softmax`] | `e[E,H]`, `seg_id[E]` → `att[E,H]` |
//! | Aggregate | [`scatter_reduce`] / [`spmm_csr_heads`] | `att[E,H]`, `x_proj[N,H,D]` → `out[N,H*D]` |
//!
//! ## Parallelism
//!
//! Work is split by destination rows (CSR kernels, segment reductions) or by
//! edge ranges (logit gather, scatter-reduce). Inputs below the thresholds
//! below run sequentially to avoid rayon overhead.
//!
//! ## Submodules
//!
//! - [`logits`]: Attention logit computer
//! - [`softmax`]: Segment softmax normalizer
//! - [`scatter`]: Scatter-reduce aggregation (reference path)
//! - [`spmm`]: CSR-SPMM aggregation (performance path)

mod logits;
mod scatter;
mod softmax;
mod spmm;

pub use logits::*;
pub use scatter::*;
pub use softmax::*;
pub use spmm::*;

use crate::{GatError, Result};

/// Edge count below which edge-parallel loops run sequentially
pub const PARALLEL_EDGE_THRESHOLD: usize = 4096;

/// Node count below which row-parallel loops run sequentially
pub const PARALLEL_ROW_THRESHOLD: usize = 256;

/// Edges per partition in the scatter-reduce accumulation
pub(crate) const SCATTER_CHUNK: usize = 8192;

/// Dimensions of a per-head node tensor `[nodes, heads, dim]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadShape {
    pub nodes: usize,
    pub heads: usize,
    pub dim: usize,
}

impl HeadShape {
    pub fn new(nodes: usize, heads: usize, dim: usize) -> Self {
        Self { nodes, heads, dim }
    }

    /// Width of one node row, `heads * dim`
    pub fn row_width(&self) -> usize {
        self.heads * self.dim
    }

    /// Total element count
    pub fn len(&self) -> usize {
        self.nodes * self.row_width()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail with `ShapeMismatch` unless `data` holds exactly `[nodes, heads, dim]`
    pub fn check(&self, data: &[f32], what: &str) -> Result<()> {
        if self.heads == 0 || self.dim == 0 {
            return Err(GatError::ShapeMismatch(format!(
                "{}: heads and dim must be positive, got {:?}",
                what, self
            )));
        }
        if data.len() != self.len() {
            return Err(GatError::ShapeMismatch(format!(
                "{}: expected {} x {} x {} = {} values, got {}",
                what,
                self.nodes,
                self.heads,
                self.dim,
                self.len(),
                data.len()
            )));
        }
        Ok(())
    }
}

/// Fail with `ShapeMismatch` unless a per-edge array is `[num_edges, heads]`
pub(crate) fn check_edge_array(data: &[f32], num_edges: usize, heads: usize, what: &str) -> Result<()> {
    if data.len() != num_edges * heads {
        return Err(GatError::ShapeMismatch(format!(
            "{}: expected {} edges x {} heads = {} values, got {}",
            what,
            num_edges,
            heads,
            num_edges * heads,
            data.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_shape() {
        let shape = HeadShape::new(4, 2, 3);
        assert_eq!(shape.row_width(), 6);
        assert_eq!(shape.len(), 24);
        assert!(shape.check(&[0.0; 24], "x_proj").is_ok());
        assert!(matches!(
            shape.check(&[0.0; 23], "x_proj").unwrap_err(),
            GatError::ShapeMismatch(_)
        ));
        assert!(HeadShape::new(4, 0, 3).check(&[], "x_proj").is_err());
    }

    #[test]
    fn test_check_edge_array() {
        assert!(check_edge_array(&[0.0; 6], 3, 2, "att").is_ok());
        assert!(check_edge_array(&[0.0; 5], 3, 2, "att").is_err());
    }
}
