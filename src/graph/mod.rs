//! Graph representations
//!
//! The aggregation engines consume one of two topologies:
//!
//! - [`EdgeList`]: unordered COO pairs `src[E]`, `dst[E]`. Duplicate pairs
//!   are kept as distinct edges.
//! - [`CsrGraph`]: destination-major CSR (`row_ptr`, `col_idx`), built with
//!   [`build_csr`] or validated from a prebuilt triple.
//!
//! [`GraphRepr`] tags which one a forward pass received, resolved once at
//! call entry.
//!
//! ## Submodules
//!
//! - [`csr`]: CSR conversion and sparse products
//! - [`cache`]: topology-keyed CSR cache shared across forward passes

pub mod cache;
pub mod csr;

pub use cache::{CacheStats, CsrCache, TopologyFingerprint};
pub use csr::{build_csr, build_csr_weighted, spgemm_csr, CsrGraph};

use crate::{GatError, Result};
use candle_core::{DType, Tensor};

/// Graph topology handed to a forward pass
#[derive(Debug, Clone, Copy)]
pub enum GraphRepr<'a> {
    /// Unordered COO edge list
    EdgeList(&'a EdgeList),
    /// Destination-sorted CSR adjacency
    Csr(&'a CsrGraph),
}

impl GraphRepr<'_> {
    /// Number of nodes the topology is defined over
    pub fn num_nodes(&self) -> usize {
        match self {
            Self::EdgeList(edges) => edges.num_nodes(),
            Self::Csr(csr) => csr.num_nodes(),
        }
    }

    /// Number of edges, duplicates included
    pub fn num_edges(&self) -> usize {
        match self {
            Self::EdgeList(edges) => edges.len(),
            Self::Csr(csr) => csr.num_edges(),
        }
    }
}

/// COO edge list: edge `e` runs from `src[e]` to `dst[e]`
///
/// Construction validates lengths and index ranges, so every `EdgeList`
/// in circulation is well-formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeList {
    src: Vec<usize>,
    dst: Vec<usize>,
    num_nodes: usize,
}

impl EdgeList {
    /// Create an edge list over `num_nodes` nodes
    ///
    /// # Errors
    /// - `ShapeMismatch` if `src` and `dst` differ in length or `num_nodes == 0`
    /// - `InvalidIndex` if any endpoint is outside `[0, num_nodes)`
    pub fn new(src: Vec<usize>, dst: Vec<usize>, num_nodes: usize) -> Result<Self> {
        validate_endpoints(&src, &dst, num_nodes)?;
        Ok(Self {
            src,
            dst,
            num_nodes,
        })
    }

    /// Build from `(src, dst)` pairs
    pub fn from_pairs(pairs: &[(usize, usize)], num_nodes: usize) -> Result<Self> {
        let (src, dst): (Vec<usize>, Vec<usize>) = pairs.iter().copied().unzip();
        Self::new(src, dst, num_nodes)
    }

    /// Build from a `[2, E]` integer tensor (row 0 = sources, row 1 = destinations)
    ///
    /// Accepts any integer dtype candle can cast to `i64`.
    pub fn from_tensor(edge_index: &Tensor, num_nodes: usize) -> Result<Self> {
        let (rows, _) = edge_index
            .dims2()
            .map_err(|e| GatError::ShapeMismatch(format!("edge_index must be [2, E]: {}", e)))?;
        if rows != 2 {
            return Err(GatError::ShapeMismatch(format!(
                "edge_index must have 2 rows, got {}",
                rows
            )));
        }

        let rows = edge_index
            .to_dtype(DType::I64)
            .map_err(|e| GatError::Tensor(format!("edge_index cast failed: {}", e)))?
            .to_vec2::<i64>()
            .map_err(|e| GatError::Tensor(format!("edge_index to_vec2 failed: {}", e)))?;

        let src = to_node_indices(&rows[0], num_nodes, "edge_index.src")?;
        let dst = to_node_indices(&rows[1], num_nodes, "edge_index.dst")?;
        Self::new(src, dst, num_nodes)
    }

    pub fn src(&self) -> &[usize] {
        &self.src
    }

    pub fn dst(&self) -> &[usize] {
        &self.dst
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// Edges as `(src, dst)` pairs in submission order
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }

    /// Convert to CSR (see [`build_csr`])
    pub fn to_csr(&self) -> Result<CsrGraph> {
        build_csr(&self.src, &self.dst, self.num_nodes)
    }

    /// Number of incoming edges per node
    pub fn in_degrees(&self) -> Vec<usize> {
        let mut degree = vec![0usize; self.num_nodes];
        for &d in &self.dst {
            degree[d] += 1;
        }
        degree
    }
}

/// Check COO endpoints before any derived buffer is built
pub(crate) fn validate_endpoints(src: &[usize], dst: &[usize], num_nodes: usize) -> Result<()> {
    if num_nodes == 0 {
        return Err(GatError::ShapeMismatch(
            "graph must have at least one node".into(),
        ));
    }
    if src.len() != dst.len() {
        return Err(GatError::ShapeMismatch(format!(
            "src has {} entries but dst has {}",
            src.len(),
            dst.len()
        )));
    }
    check_indices(src, num_nodes, "edge_list.src")?;
    check_indices(dst, num_nodes, "edge_list.dst")
}

pub(crate) fn check_indices(indices: &[usize], num_nodes: usize, context: &'static str) -> Result<()> {
    match indices.iter().position(|&i| i >= num_nodes) {
        Some(position) => Err(GatError::InvalidIndex {
            context,
            position,
            value: indices[position] as i64,
            num_nodes,
        }),
        None => Ok(()),
    }
}

fn to_node_indices(raw: &[i64], num_nodes: usize, context: &'static str) -> Result<Vec<usize>> {
    raw.iter()
        .enumerate()
        .map(|(position, &value)| {
            if value < 0 || value as u64 >= num_nodes as u64 {
                Err(GatError::InvalidIndex {
                    context,
                    position,
                    value,
                    num_nodes,
                })
            } else {
                Ok(value as usize)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_edge_list_from_pairs() {
        let edges = EdgeList::from_pairs(&[(0, 1), (2, 1), (1, 3)], 4).unwrap();
        assert_eq!(edges.src(), &[0, 2, 1]);
        assert_eq!(edges.dst(), &[1, 1, 3]);
        assert_eq!(edges.len(), 3);
        assert_eq!(edges.in_degrees(), vec![0, 2, 0, 1]);
    }

    #[test]
    fn test_length_mismatch() {
        let err = EdgeList::new(vec![0, 1], vec![1], 3).unwrap_err();
        assert!(matches!(err, GatError::ShapeMismatch(_)));
    }

    #[test]
    fn test_zero_nodes_rejected() {
        let err = EdgeList::new(vec![], vec![], 0).unwrap_err();
        assert!(matches!(err, GatError::ShapeMismatch(_)));
    }

    #[test]
    fn test_dst_equal_to_n_is_invalid() {
        let err = EdgeList::new(vec![0, 1], vec![1, 4], 4).unwrap_err();
        match err {
            GatError::InvalidIndex {
                context,
                position,
                value,
                num_nodes,
            } => {
                assert_eq!(context, "edge_list.dst");
                assert_eq!(position, 1);
                assert_eq!(value, 4);
                assert_eq!(num_nodes, 4);
            }
            other => panic!("expected InvalidIndex, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicates_kept() {
        let edges = EdgeList::from_pairs(&[(0, 1), (0, 1)], 2).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges.in_degrees(), vec![0, 2]);
    }

    #[test]
    fn test_from_tensor() {
        let t = Tensor::from_vec(vec![0i64, 2, 1, 1, 1, 3], (2, 3), &Device::Cpu).unwrap();
        let edges = EdgeList::from_tensor(&t, 4).unwrap();
        assert_eq!(edges.src(), &[0, 2, 1]);
        assert_eq!(edges.dst(), &[1, 1, 3]);
    }

    #[test]
    fn test_from_tensor_u32() {
        let t = Tensor::from_vec(vec![0u32, 1, 1, 0], (2, 2), &Device::Cpu).unwrap();
        let edges = EdgeList::from_tensor(&t, 2).unwrap();
        assert_eq!(edges.pairs().collect::<Vec<_>>(), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_from_tensor_negative_index() {
        let t = Tensor::from_vec(vec![0i64, -1, 1, 1], (2, 2), &Device::Cpu).unwrap();
        let err = EdgeList::from_tensor(&t, 2).unwrap_err();
        assert!(matches!(err, GatError::InvalidIndex { value: -1, .. }));
    }

    #[test]
    fn test_from_tensor_wrong_rows() {
        let t = Tensor::from_vec(vec![0i64, 1, 1], (3, 1), &Device::Cpu).unwrap();
        assert!(matches!(
            EdgeList::from_tensor(&t, 2).unwrap_err(),
            GatError::ShapeMismatch(_)
        ));
    }

    #[test]
    fn test_graph_repr_counts() {
        let edges = EdgeList::from_pairs(&[(0, 1), (2, 1), (1, 3)], 4).unwrap();
        let csr = edges.to_csr().unwrap();
        assert_eq!(GraphRepr::EdgeList(&edges).num_edges(), 3);
        assert_eq!(GraphRepr::Csr(&csr).num_edges(), 3);
        assert_eq!(GraphRepr::Csr(&csr).num_nodes(), 4);
    }
}
