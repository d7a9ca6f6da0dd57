//! Differentiable wrappers around the host kernels
//!
//! Each stage of the attention pipeline is a candle custom op: the forward
//! runs the host kernel on CPU storage, the backward is written with candle
//! tensor ops (`index_select` / `index_add`), so gradients reach `W`,
//! `a_src` and `a_dst` through either engine.
//!
//! | Op | Inputs | Output | Kernel |
//! |---|---|---|---|
//! | [`NodeScores`] | `x_proj[N,H,D]`, `a[H,D]` | `[N,H]` | `node_attention_scores` |
//! | [`EdgeLogits`] | `alpha_src[N,H]`, `alpha_dst[N,H]` | `[E,H]` | `edge_logits` |
//! | [`SegmentSoftmax`] | `e[E,H]` | `[E,H]` | `segment_softmax(_csr)` |
//! | [`Aggregate`] | `att[E,H]`, `x_proj[N,H,D]` | `[N,H,D]` | `scatter_reduce` / `spmm_csr_heads` |
//!
//! All ops expect contiguous `f32` CPU tensors. Incoming gradients may be
//! strided (e.g. broadcast from `sum_all`), so backward passes make them
//! contiguous before `index_select` / `index_add`.

use crate::graph::CsrGraph;
use crate::kernels::{
    edge_logits, node_attention_scores, scatter_reduce, segment_softmax, segment_softmax_csr,
    spmm_csr_heads, HeadShape,
};
use crate::GatError;
use candle_core::{CpuStorage, CustomOp1, CustomOp2, DType, Device, Layout, Shape, Tensor};
use std::sync::Arc;

type CandleResult<T> = candle_core::Result<T>;

/// Edges in slot order (sorted by destination) and the engine that consumes them
#[derive(Debug)]
pub(crate) enum EdgePlan {
    Scatter {
        src: Vec<usize>,
        dst: Vec<usize>,
        num_nodes: usize,
    },
    Csr(Arc<CsrGraph>),
}

impl EdgePlan {
    pub(crate) fn src(&self) -> &[usize] {
        match self {
            EdgePlan::Scatter { src, .. } => src,
            EdgePlan::Csr(csr) => csr.col_idx(),
        }
    }

    pub(crate) fn dst(&self) -> &[usize] {
        match self {
            EdgePlan::Scatter { dst, .. } => dst,
            EdgePlan::Csr(csr) => csr.row_idx(),
        }
    }

    pub(crate) fn num_nodes(&self) -> usize {
        match self {
            EdgePlan::Scatter { num_nodes, .. } => *num_nodes,
            EdgePlan::Csr(csr) => csr.num_nodes(),
        }
    }

    pub(crate) fn num_edges(&self) -> usize {
        self.dst().len()
    }

    /// Destinations with no incoming edge
    pub(crate) fn degenerate_segments(&self) -> usize {
        let mut seen = vec![false; self.num_nodes()];
        for &d in self.dst() {
            seen[d] = true;
        }
        seen.iter().filter(|s| !**s).count()
    }
}

fn kernel_err(e: GatError) -> candle_core::Error {
    candle_core::Error::Msg(e.to_string())
}

fn host<'a>(storage: &'a CpuStorage, layout: &Layout, what: &str) -> CandleResult<&'a [f32]> {
    let data = match storage {
        CpuStorage::F32(data) => data.as_slice(),
        _ => return Err(candle_core::Error::Msg(format!("{}: expected f32 storage", what))),
    };
    match layout.contiguous_offsets() {
        Some((start, end)) => Ok(&data[start..end]),
        None => Err(candle_core::Error::Msg(format!("{}: input must be contiguous", what))),
    }
}

fn head_shape(layout: &Layout, what: &str) -> CandleResult<HeadShape> {
    match layout.dims() {
        &[nodes, heads, dim] => Ok(HeadShape::new(nodes, heads, dim)),
        dims => Err(candle_core::Error::Msg(format!("{}: expected [N, H, D], got {:?}", what, dims))),
    }
}

fn heads_of(layout: &Layout, what: &str) -> CandleResult<usize> {
    match layout.dims() {
        &[_, heads] => Ok(heads),
        dims => Err(candle_core::Error::Msg(format!("{}: expected [rows, H], got {:?}", what, dims))),
    }
}

fn index_tensor(idx: &[usize], device: &Device) -> CandleResult<Tensor> {
    Tensor::from_iter(idx.iter().map(|&i| i as u32), device)
}

/// `alpha[n, h] = <x_proj[n, h, :], a[h, :]>`
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeScores;

impl CustomOp2 for NodeScores {
    fn name(&self) -> &'static str {
        "gat-node-scores"
    }

    fn cpu_fwd(&self, s1: &CpuStorage, l1: &Layout, s2: &CpuStorage, l2: &Layout) -> CandleResult<(CpuStorage, Shape)> {
        let shape = head_shape(l1, "node scores x_proj")?;
        let x_proj = host(s1, l1, "node scores x_proj")?;
        let a = host(s2, l2, "node scores a")?;
        let scores = node_attention_scores(x_proj, shape, a).map_err(kernel_err)?;
        Ok((CpuStorage::F32(scores), Shape::from((shape.nodes, shape.heads))))
    }

    fn bwd(
        &self,
        x_proj: &Tensor,
        a: &Tensor,
        _res: &Tensor,
        grad_res: &Tensor,
    ) -> CandleResult<(Option<Tensor>, Option<Tensor>)> {
        let g = grad_res.unsqueeze(2)?;
        let grad_x = g.broadcast_mul(&a.unsqueeze(0)?)?;
        let grad_a = g.broadcast_mul(x_proj)?.sum(0)?;
        Ok((Some(grad_x), Some(grad_a)))
    }
}

/// `e[slot, h] = alpha_src[src[slot], h] + alpha_dst[dst[slot], h]`
#[derive(Debug, Clone)]
pub(crate) struct EdgeLogits {
    plan: Arc<EdgePlan>,
}

impl EdgeLogits {
    pub(crate) fn new(plan: Arc<EdgePlan>) -> Self {
        Self { plan }
    }
}

impl CustomOp2 for EdgeLogits {
    fn name(&self) -> &'static str {
        "gat-edge-logits"
    }

    fn cpu_fwd(&self, s1: &CpuStorage, l1: &Layout, s2: &CpuStorage, l2: &Layout) -> CandleResult<(CpuStorage, Shape)> {
        let heads = heads_of(l1, "alpha_src")?;
        let alpha_src = host(s1, l1, "alpha_src")?;
        let alpha_dst = host(s2, l2, "alpha_dst")?;
        let plan = &self.plan;
        let logits = edge_logits(alpha_src, alpha_dst, plan.src(), plan.dst(), plan.num_nodes(), heads)
            .map_err(kernel_err)?;
        Ok((CpuStorage::F32(logits), Shape::from((plan.num_edges(), heads))))
    }

    fn bwd(
        &self,
        alpha_src: &Tensor,
        alpha_dst: &Tensor,
        _res: &Tensor,
        grad_res: &Tensor,
    ) -> CandleResult<(Option<Tensor>, Option<Tensor>)> {
        if self.plan.num_edges() == 0 {
            return Ok((Some(alpha_src.zeros_like()?), Some(alpha_dst.zeros_like()?)));
        }
        let device = grad_res.device();
        let g = grad_res.contiguous()?;
        let src = index_tensor(self.plan.src(), device)?;
        let dst = index_tensor(self.plan.dst(), device)?;
        let grad_src = alpha_src.zeros_like()?.index_add(&src, &g, 0)?;
        let grad_dst = alpha_dst.zeros_like()?.index_add(&dst, &g, 0)?;
        Ok((Some(grad_src), Some(grad_dst)))
    }
}

/// Softmax over each destination's incoming edges, per head
#[derive(Debug, Clone)]
pub(crate) struct SegmentSoftmax {
    plan: Arc<EdgePlan>,
}

impl SegmentSoftmax {
    pub(crate) fn new(plan: Arc<EdgePlan>) -> Self {
        Self { plan }
    }
}

impl CustomOp1 for SegmentSoftmax {
    fn name(&self) -> &'static str {
        "gat-segment-softmax"
    }

    fn cpu_fwd(&self, storage: &CpuStorage, layout: &Layout) -> CandleResult<(CpuStorage, Shape)> {
        let heads = heads_of(layout, "logits")?;
        let logits = host(storage, layout, "logits")?;
        let out = match self.plan.as_ref() {
            EdgePlan::Csr(csr) => segment_softmax_csr(logits, heads, csr),
            EdgePlan::Scatter { dst, num_nodes, .. } => segment_softmax(logits, heads, dst, *num_nodes),
        }
        .map_err(kernel_err)?;
        Ok((CpuStorage::F32(out.weights), Shape::from((self.plan.num_edges(), heads))))
    }

    /// `de = att * (g - sum_{same segment}(att * g))`
    fn bwd(&self, logits: &Tensor, att: &Tensor, grad_res: &Tensor) -> CandleResult<Option<Tensor>> {
        if self.plan.num_edges() == 0 {
            return Ok(Some(logits.zeros_like()?));
        }
        let (_, heads) = att.dims2()?;
        let device = att.device();
        let dst = index_tensor(self.plan.dst(), device)?;
        let weighted = (att * grad_res)?.contiguous()?;
        let sums = Tensor::zeros((self.plan.num_nodes(), heads), DType::F32, device)?.index_add(&dst, &weighted, 0)?;
        let centered = (grad_res - sums.index_select(&dst, 0)?)?;
        Ok(Some((att * centered)?))
    }
}

/// `out[d, h, :] = sum over slots into d of att[slot, h] * x_proj[src[slot], h, :]`
#[derive(Debug, Clone)]
pub(crate) struct Aggregate {
    plan: Arc<EdgePlan>,
}

impl Aggregate {
    pub(crate) fn new(plan: Arc<EdgePlan>) -> Self {
        Self { plan }
    }
}

impl CustomOp2 for Aggregate {
    fn name(&self) -> &'static str {
        "gat-aggregate"
    }

    fn cpu_fwd(&self, s1: &CpuStorage, l1: &Layout, s2: &CpuStorage, l2: &Layout) -> CandleResult<(CpuStorage, Shape)> {
        let att = host(s1, l1, "attention")?;
        let shape = head_shape(l2, "aggregate x_proj")?;
        let x_proj = host(s2, l2, "aggregate x_proj")?;
        let out = match self.plan.as_ref() {
            EdgePlan::Csr(csr) => spmm_csr_heads(csr, att, x_proj, shape),
            EdgePlan::Scatter { src, dst, .. } => scatter_reduce(att, x_proj, shape, src, dst),
        }
        .map_err(kernel_err)?;
        Ok((CpuStorage::F32(out), Shape::from((shape.nodes, shape.heads, shape.dim))))
    }

    fn bwd(
        &self,
        att: &Tensor,
        x_proj: &Tensor,
        _res: &Tensor,
        grad_res: &Tensor,
    ) -> CandleResult<(Option<Tensor>, Option<Tensor>)> {
        if self.plan.num_edges() == 0 {
            return Ok((Some(att.zeros_like()?), Some(x_proj.zeros_like()?)));
        }
        let device = grad_res.device();
        let grad_res = grad_res.contiguous()?;
        let src = index_tensor(self.plan.src(), device)?;
        let dst = index_tensor(self.plan.dst(), device)?;

        // Gradient rows of each edge's destination, [E, H, D]
        let g_dst = grad_res.index_select(&dst, 0)?;
        let grad_att = (&g_dst * x_proj.index_select(&src, 0)?)?.sum(2)?;
        let messages = g_dst.broadcast_mul(&att.unsqueeze(2)?)?.contiguous()?;
        let grad_x = x_proj.zeros_like()?.index_add(&src, &messages, 0)?;
        Ok((Some(grad_att), Some(grad_x)))
    }
}
