//! Graph attention layer
//!
//! [`GatLayer`] wires the kernels into one forward pass:
//!
//! 1. Project `x[N, F_in]` through the shared map `W` to `x_proj[N, H, D]`
//! 2. Per-node attention terms `alpha_src`, `alpha_dst`
//! 3. Per-edge logits, segment softmax by destination, aggregation through
//!    either engine
//! 4. Merge heads (concat or mean) into `pre_dropout`
//! 5. `output = pre_dropout * mask` when the caller supplies a dropout mask
//!
//! ## Choosing an engine
//!
//! | Graph | `AggregationPath` | Engine |
//! |---|---|---|
//! | `EdgeList` | `Auto` / `Scatter` | stable sort by destination, scatter-reduce |
//! | `EdgeList` | `Csr` | cached CSR build, CSR-SPMM |
//! | `Csr` | `Auto` / `Csr` | CSR-SPMM |
//! | `Csr` | `Scatter` | scatter-reduce over the CSR's induced edges |
//!
//! Both engines see identical logits and weights, so their outputs agree
//! within floating-point tolerance.
//!
//! ## Edge order
//!
//! Edges sharing a destination are normalized and accumulated in their
//! submission order. Callers must not rely on this: only the per-destination
//! sums are part of the contract. `GatOutput::attention` is always reported
//! in the caller's edge order.
//!
//! ## Gradients
//!
//! Every stage after the projection is a candle custom op over a host kernel
//! (see `autograd`), so `output.backward()` reaches `W`, `a_src` and `a_dst`
//! through either engine. The per-segment max used to stabilize the softmax
//! is a constant shift and contributes no gradient.

mod autograd;
mod config;
mod params;

pub use config::{AggregationPath, GatConfig, HeadMerge};
pub use params::GatParams;

use crate::graph::{CacheStats, CsrCache, CsrGraph, EdgeList, GraphRepr};
use crate::primitives::leaky_relu;
use crate::{GatError, Result};
use autograd::{Aggregate, EdgeLogits, EdgePlan, NodeScores, SegmentSoftmax};
use candle_core::{DType, Device, Tensor, Var};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// What a forward pass did, for path comparisons and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationStats {
    /// Engine that ran (never `Auto`)
    pub path: AggregationPath,
    pub num_edges: usize,
    /// Destinations with no incoming edges; their rows are zero
    pub degenerate_segments: usize,
    /// CSR cache outcome, `None` when no cache lookup happened
    pub cache_hit: Option<bool>,
}

/// Result of [`GatLayer::forward_with`]
#[derive(Debug, Clone)]
pub struct GatOutput {
    /// `pre_dropout * mask`, or `pre_dropout` when no mask was given
    pub output: Tensor,
    /// Head-merged aggregation `[N, H*D]` (concat) or `[N, D]` (mean)
    pub pre_dropout: Tensor,
    /// Attention weights `[E, H]` in the caller's edge order
    pub attention: Tensor,
    pub stats: AggregationStats,
}

/// Slot-ordered edges plus the caller edge behind each slot
struct Plan {
    edges: Arc<EdgePlan>,
    perm: Vec<usize>,
    cache_hit: Option<bool>,
}

/// One multi-head graph attention layer
#[derive(Debug)]
pub struct GatLayer {
    config: GatConfig,
    params: GatParams,
    cache: CsrCache,
}

impl GatLayer {
    /// Create a layer with freshly initialized parameters on `device`
    pub fn new(config: GatConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let params = GatParams::new(
            config.in_features,
            config.heads,
            config.out_features,
            config.seed,
            device,
        )?;
        Ok(Self {
            config,
            params,
            cache: CsrCache::new(),
        })
    }

    /// Create a layer around existing parameters
    ///
    /// # Errors
    /// `ShapeMismatch` if the parameter shapes disagree with `config`.
    pub fn from_params(config: GatConfig, params: GatParams) -> Result<Self> {
        config.validate()?;
        if params.heads != config.heads
            || params.head_dim != config.out_features
            || params.in_features() != config.in_features
        {
            return Err(GatError::ShapeMismatch(format!(
                "parameters are [{}] -> {} x {}, config expects [{}] -> {} x {}",
                params.in_features(),
                params.heads,
                params.head_dim,
                config.in_features,
                config.heads,
                config.out_features
            )));
        }
        Ok(Self {
            config,
            params,
            cache: CsrCache::new(),
        })
    }

    pub fn config(&self) -> &GatConfig {
        &self.config
    }

    pub fn params(&self) -> &GatParams {
        &self.params
    }

    /// CSR cache counters for this layer
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop the cached CSR so the next CSR-path forward rebuilds it
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// Projected node features `[N, H, D]`
    pub fn project(&self, x: &Tensor) -> Result<Tensor> {
        let (n, f) = x
            .dims2()
            .map_err(|e| GatError::ShapeMismatch(format!("node features must be [N, F_in]: {}", e)))?;
        if f != self.config.in_features {
            return Err(GatError::ShapeMismatch(format!(
                "node features have {} columns, layer expects {}",
                f, self.config.in_features
            )));
        }
        x.to_dtype(DType::F32)
            .and_then(|x| x.matmul(self.params.w.as_tensor()))
            .and_then(|p| p.reshape((n, self.params.heads, self.params.head_dim)))
            .map_err(|e| GatError::Tensor(format!("projection failed: {}", e)))
    }

    /// Forward pass with the configured aggregation path and no dropout
    pub fn forward(&self, x: &Tensor, graph: GraphRepr<'_>) -> Result<Tensor> {
        Ok(self.forward_with(x, graph, self.config.aggregation, None)?.output)
    }

    /// Forward pass with an explicit engine and optional dropout mask
    ///
    /// The mask is applied after head merge and must match the merged
    /// output shape exactly; it is expected to be pre-scaled (see
    /// [`dropout_mask`](crate::primitives::dropout_mask)).
    ///
    /// # Errors
    /// - `ShapeMismatch` if `x` is not `[graph.num_nodes(), in_features]` or
    ///   the mask shape differs from the output
    /// - `Tensor` if a device operation fails
    pub fn forward_with(
        &self,
        x: &Tensor,
        graph: GraphRepr<'_>,
        path: AggregationPath,
        dropout_mask: Option<&Tensor>,
    ) -> Result<GatOutput> {
        let num_nodes = graph.num_nodes();
        let x_proj = self.project(x)?;
        if x_proj.dims()[0] != num_nodes {
            return Err(GatError::ShapeMismatch(format!(
                "node features have {} rows but the graph has {} nodes",
                x_proj.dims()[0],
                num_nodes
            )));
        }
        let out_dims = [num_nodes, self.config.output_width()];
        if let Some(mask) = dropout_mask {
            if mask.dims() != out_dims {
                return Err(GatError::ShapeMismatch(format!(
                    "dropout mask is {:?}, output is {:?}",
                    mask.dims(),
                    out_dims
                )));
            }
        }

        let path = resolve_path(path, &graph);
        debug!(
            ?path,
            nodes = num_nodes,
            edges = graph.num_edges(),
            heads = self.params.heads,
            "GAT forward"
        );

        let plan = self.plan(graph, path)?;
        let edges = Arc::clone(&plan.edges);
        let device = x.device();

        // Kernels run on CPU storage; to_device keeps the graph differentiable
        let x_host = x_proj
            .to_device(&Device::Cpu)
            .and_then(|t| t.contiguous())
            .map_err(|e| GatError::Tensor(format!("host transfer failed: {}", e)))?;
        let alpha_src = node_scores(&x_host, &self.params.a_src)?;
        let alpha_dst = node_scores(&x_host, &self.params.a_dst)?;

        let logits = alpha_src
            .apply_op2(&alpha_dst, EdgeLogits::new(Arc::clone(&edges)))
            .map_err(|e| GatError::Tensor(format!("edge logits failed: {}", e)))?;
        let logits = match self.config.negative_slope {
            Some(slope) => leaky_relu(&logits, slope)?,
            None => logits,
        };
        let att = logits
            .apply_op1(SegmentSoftmax::new(Arc::clone(&edges)))
            .map_err(|e| GatError::Tensor(format!("segment softmax failed: {}", e)))?;
        let features = att
            .apply_op2(&x_host, Aggregate::new(Arc::clone(&edges)))
            .map_err(|e| GatError::Tensor(format!("aggregation failed: {}", e)))?;

        let pre_dropout = self.merge_heads(&features, device)?;
        let output = match dropout_mask {
            Some(mask) => mask
                .to_dtype(DType::F32)
                .and_then(|m| m.to_device(device))
                .and_then(|m| pre_dropout.mul(&m))
                .map_err(|e| GatError::Tensor(format!("dropout mask failed: {}", e)))?,
            None => pre_dropout.clone(),
        };
        let attention = caller_order(&att, &plan.perm)?
            .to_device(device)
            .map_err(|e| GatError::Tensor(format!("attention transfer failed: {}", e)))?;

        Ok(GatOutput {
            output,
            pre_dropout,
            attention,
            stats: AggregationStats {
                path,
                num_edges: edges.num_edges(),
                degenerate_segments: edges.degenerate_segments(),
                cache_hit: plan.cache_hit,
            },
        })
    }

    /// Order edges by destination for the chosen engine
    fn plan(&self, graph: GraphRepr<'_>, path: AggregationPath) -> Result<Plan> {
        let plan = match (graph, path) {
            (GraphRepr::EdgeList(edges), AggregationPath::Csr) => {
                let (csr, cache_hit) = self.csr_for(edges)?;
                Plan {
                    perm: csr.perm().to_vec(),
                    edges: Arc::new(EdgePlan::Csr(csr)),
                    cache_hit,
                }
            }
            (GraphRepr::EdgeList(edges), _) => {
                let perm = sort_by_destination(edges.dst());
                let src = perm.iter().map(|&e| edges.src()[e]).collect();
                let dst = perm.iter().map(|&e| edges.dst()[e]).collect();
                Plan {
                    edges: Arc::new(EdgePlan::Scatter {
                        src,
                        dst,
                        num_nodes: edges.num_nodes(),
                    }),
                    perm,
                    cache_hit: None,
                }
            }
            (GraphRepr::Csr(csr), AggregationPath::Scatter) => Plan {
                edges: Arc::new(EdgePlan::Scatter {
                    src: csr.col_idx().to_vec(),
                    dst: csr.row_idx().to_vec(),
                    num_nodes: csr.num_nodes(),
                }),
                perm: csr.perm().to_vec(),
                cache_hit: None,
            },
            (GraphRepr::Csr(csr), _) => Plan {
                perm: csr.perm().to_vec(),
                edges: Arc::new(EdgePlan::Csr(Arc::new(csr.clone()))),
                cache_hit: None,
            },
        };
        Ok(plan)
    }

    fn csr_for(&self, edges: &EdgeList) -> Result<(Arc<CsrGraph>, Option<bool>)> {
        if self.config.cache_csr {
            let (csr, hit) = self.cache.fetch(edges)?;
            Ok((csr, Some(hit)))
        } else {
            Ok((Arc::new(edges.to_csr()?), None))
        }
    }

    /// `[N, H, D]` host features to `[N, H*D]` or `[N, D]` on `device`
    fn merge_heads(&self, features: &Tensor, device: &Device) -> Result<Tensor> {
        let (nodes, heads, dim) = features
            .dims3()
            .map_err(|e| GatError::ShapeMismatch(format!("aggregated features must be [N, H, D]: {}", e)))?;
        match self.config.head_merge {
            HeadMerge::Concat => features.reshape((nodes, heads * dim)),
            HeadMerge::Mean => features.mean(1),
        }
        .and_then(|t| t.to_device(device))
        .map_err(|e| GatError::Tensor(format!("head merge failed: {}", e)))
    }
}

/// `alpha[N, H]` for one attention vector, computed on the host
fn node_scores(x_host: &Tensor, a: &Var) -> Result<Tensor> {
    a.as_tensor()
        .to_device(&Device::Cpu)
        .and_then(|a| a.contiguous())
        .and_then(|a| x_host.apply_op2(&a, NodeScores))
        .map_err(|e| GatError::Tensor(format!("node attention scores failed: {}", e)))
}

/// Reorder slot-ordered rows back to the caller's edge order
fn caller_order(att: &Tensor, perm: &[usize]) -> Result<Tensor> {
    if perm.is_empty() {
        return Ok(att.clone());
    }
    let mut slot_of = vec![0u32; perm.len()];
    for (slot, &e) in perm.iter().enumerate() {
        slot_of[e] = slot as u32;
    }
    Tensor::from_vec(slot_of, perm.len(), att.device())
        .and_then(|idx| att.index_select(&idx, 0))
        .map_err(|e| GatError::Tensor(format!("attention reorder failed: {}", e)))
}

fn resolve_path(path: AggregationPath, graph: &GraphRepr<'_>) -> AggregationPath {
    match (path, graph) {
        (AggregationPath::Auto, GraphRepr::EdgeList(_)) => AggregationPath::Scatter,
        (AggregationPath::Auto, GraphRepr::Csr(_)) => AggregationPath::Csr,
        (explicit, _) => explicit,
    }
}

/// Stable argsort of edges by destination: sorted position → original edge
fn sort_by_destination(dst: &[usize]) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..dst.len()).collect();
    perm.par_sort_by_key(|&e| dst[e]);
    perm
}
