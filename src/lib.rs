//! # gat-spmm
//!
//! Graph attention message passing with two interchangeable aggregation
//! engines: a scatter-reduce reference path over an edge list and a
//! Compressed-Sparse-Row (CSR) SPMM kernel path.
//!
//! ## Overview
//!
//! A forward pass takes a node feature matrix `x[N, F_in]` and a graph, and
//! produces `out[N, H*D]`:
//!
//! ```text
//! x ──► x @ W ──► x_proj[N,H,D]
//!                   │
//!                   ├──► alpha_src[N,H], alpha_dst[N,H]
//!                   │          │
//!                   │          ▼
//!                   │    e[E,H] = alpha_src[src] + alpha_dst[dst]
//!                   │          │
//!                   │          ▼
//!                   │    segment softmax by destination ──► att[E,H]
//!                   │          │
//!                   ▼          ▼
//!             scatter-reduce  OR  CSR-SPMM  ──► out[N,H,D] ──► flatten
//! ```
//!
//! Core capabilities:
//!
//! - **Graph**: COO edge lists, CSR conversion and a topology-keyed CSR cache
//! - **Kernels**: attention logits, segment softmax, scatter-reduce, CSR-SPMM
//! - **Layer**: [`layer::GatLayer`] orchestrating one forward pass
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gat_spmm::prelude::*;
//!
//! let device = best_device();
//! let config = GatConfig::new(16, 8, 4).with_seed(42);
//! let layer = GatLayer::new(config, &device)?;
//!
//! let edges = EdgeList::new(vec![0, 2, 1], vec![1, 1, 3], 4)?;
//! let x = Tensor::randn(0.0f32, 1.0, (4, 16), &device)?;
//!
//! // Same layer, both engines, identical inputs
//! let scatter = layer.forward_with(&x, GraphRepr::EdgeList(&edges), AggregationPath::Scatter, None)?;
//! let csr = layer.forward_with(&x, GraphRepr::EdgeList(&edges), AggregationPath::Csr, None)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal tensors for parameters and projections
//! - `cuda`: NVIDIA CUDA tensors for parameters and projections

pub mod graph;
pub mod kernels;
pub mod layer;
pub mod primitives;

// Re-export candle types for convenience
pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for graph attention operations
#[derive(Debug, thiserror::Error)]
pub enum GatError {
    /// Lengths or dimensions of inputs disagree.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An edge endpoint or CSR column index lies outside `[0, num_nodes)`.
    #[error("Invalid index in {context}: entry {position} is {value}, expected < {num_nodes}")]
    InvalidIndex {
        context: &'static str,
        position: usize,
        value: i64,
        num_nodes: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for graph attention operations
pub type Result<T> = std::result::Result<T, GatError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{GatError, Result};

    // Graph representations
    pub use crate::graph::{build_csr, build_csr_weighted, CsrCache, CsrGraph, EdgeList, GraphRepr};

    // Kernels
    pub use crate::kernels::{
        edge_logits, node_attention_scores, scatter_reduce, segment_softmax, spmm_csr,
        spmm_csr_heads, HeadShape, SoftmaxOutput, SOFTMAX_EPS,
    };

    // Layer
    pub use crate::layer::{
        AggregationPath, AggregationStats, GatConfig, GatLayer, GatOutput, GatParams, HeadMerge,
    };

    // Primitives
    pub use crate::primitives::{best_device, cpu_device, dropout_mask, gpu_disabled};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let device = best_device();
        assert!(
            matches!(device, Device::Cpu)
                || matches!(device, Device::Metal(_))
                || matches!(device, Device::Cuda(_))
        );
    }

    #[test]
    fn test_invalid_index_message() {
        let err = crate::GatError::InvalidIndex {
            context: "edge_list.dst",
            position: 2,
            value: 4,
            num_nodes: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("edge_list.dst"));
        assert!(msg.contains("expected < 4"));
    }
}
