//! CSR conversion
//!
//! Destination-major Compressed Sparse Row layout: row `d` lists the sources
//! of every edge that ends at `d`.
//!
//! ```text
//! edges (src → dst):  0→1  2→1  1→3          N = 4
//!
//! row_ptr = [0, 0, 2, 2, 3]     row d spans row_ptr[d]..row_ptr[d+1]
//! col_idx = [0, 2, 1]           sources, grouped by destination
//! perm    = [0, 1, 2]           sorted slot → original edge index
//! ```
//!
//! [`build_csr`] is a stable counting sort: a histogram over destinations,
//! an exclusive prefix sum into `row_ptr`, then a placement pass in original
//! edge order. Edges sharing a destination keep their submission order.

use super::{check_indices, validate_endpoints, EdgeList};
use crate::{GatError, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;

/// Square adjacency in destination-major CSR form
#[derive(Debug, Clone, PartialEq)]
pub struct CsrGraph {
    /// Row offsets `[N+1]`, non-decreasing, `row_ptr[0] = 0`, `row_ptr[N] = E`
    row_ptr: Vec<usize>,
    /// Source node of each edge slot `[E]`
    col_idx: Vec<usize>,
    /// Destination node of each edge slot `[E]` (row index expanded)
    row_idx: Vec<usize>,
    /// Sorted slot → original edge index `[E]`
    perm: Vec<usize>,
    /// Optional edge weights `[E]`, already in slot order
    values: Option<Vec<f32>>,
    num_nodes: usize,
}

/// Build CSR from an unordered edge list
///
/// # Errors
/// - `ShapeMismatch` if `src` and `dst` lengths differ or `num_nodes == 0`
/// - `InvalidIndex` if any endpoint is outside `[0, num_nodes)`
pub fn build_csr(src: &[usize], dst: &[usize], num_nodes: usize) -> Result<CsrGraph> {
    validate_endpoints(src, dst, num_nodes)?;
    Ok(counting_sort(src, dst, None, num_nodes))
}

/// Build CSR carrying per-edge weights
///
/// `values[e]` belongs to edge `e` of the input and is permuted into slot
/// order alongside `col_idx`.
pub fn build_csr_weighted(
    src: &[usize],
    dst: &[usize],
    values: &[f32],
    num_nodes: usize,
) -> Result<CsrGraph> {
    validate_endpoints(src, dst, num_nodes)?;
    if values.len() != src.len() {
        return Err(GatError::ShapeMismatch(format!(
            "edge values have {} entries for {} edges",
            values.len(),
            src.len()
        )));
    }
    Ok(counting_sort(src, dst, Some(values), num_nodes))
}

fn counting_sort(src: &[usize], dst: &[usize], values: Option<&[f32]>, num_nodes: usize) -> CsrGraph {
    let num_edges = src.len();

    // Histogram + exclusive prefix sum
    let mut row_ptr = vec![0usize; num_nodes + 1];
    for &d in dst {
        row_ptr[d + 1] += 1;
    }
    for i in 0..num_nodes {
        row_ptr[i + 1] += row_ptr[i];
    }

    // Stable placement in original edge order
    let mut cursor = row_ptr[..num_nodes].to_vec();
    let mut perm = vec![0usize; num_edges];
    for (edge, &d) in dst.iter().enumerate() {
        perm[cursor[d]] = edge;
        cursor[d] += 1;
    }

    let col_idx: Vec<usize> = perm.iter().map(|&e| src[e]).collect();
    let row_idx: Vec<usize> = perm.iter().map(|&e| dst[e]).collect();
    let values = values.map(|v| perm.iter().map(|&e| v[e]).collect());

    debug!(nodes = num_nodes, edges = num_edges, "built CSR from edge list");

    CsrGraph {
        row_ptr,
        col_idx,
        row_idx,
        perm,
        values,
        num_nodes,
    }
}

impl CsrGraph {
    /// Validate a prebuilt CSR triple
    ///
    /// The slot order of `col_idx` is taken as-is; `perm` is the identity.
    ///
    /// # Errors
    /// - `ShapeMismatch` if `row_ptr` is not `[N+1]`, does not start at 0, decreases,
    ///   or does not end at `col_idx.len()`; or if `values` has the wrong length
    /// - `InvalidIndex` if any `col_idx` entry is outside `[0, N)`
    pub fn from_parts(
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Option<Vec<f32>>,
        num_nodes: usize,
    ) -> Result<Self> {
        if num_nodes == 0 {
            return Err(GatError::ShapeMismatch(
                "graph must have at least one node".into(),
            ));
        }
        if row_ptr.len() != num_nodes + 1 {
            return Err(GatError::ShapeMismatch(format!(
                "row_ptr has {} entries, expected {}",
                row_ptr.len(),
                num_nodes + 1
            )));
        }
        if row_ptr[0] != 0 {
            return Err(GatError::ShapeMismatch(format!(
                "row_ptr must start at 0, starts at {}",
                row_ptr[0]
            )));
        }
        if let Some(row) = row_ptr.windows(2).position(|w| w[1] < w[0]) {
            return Err(GatError::ShapeMismatch(format!(
                "row_ptr decreases at row {}",
                row
            )));
        }
        if row_ptr[num_nodes] != col_idx.len() {
            return Err(GatError::ShapeMismatch(format!(
                "row_ptr ends at {} but col_idx has {} entries",
                row_ptr[num_nodes],
                col_idx.len()
            )));
        }
        if let Some(values) = &values {
            if values.len() != col_idx.len() {
                return Err(GatError::ShapeMismatch(format!(
                    "values have {} entries for {} edges",
                    values.len(),
                    col_idx.len()
                )));
            }
        }
        check_indices(&col_idx, num_nodes, "csr.col_idx")?;

        let mut row_idx = Vec::with_capacity(col_idx.len());
        for (d, w) in row_ptr.windows(2).enumerate() {
            row_idx.extend(std::iter::repeat(d).take(w[1] - w[0]));
        }
        let perm = (0..col_idx.len()).collect();

        Ok(Self {
            row_ptr,
            col_idx,
            row_idx,
            perm,
            values,
            num_nodes,
        })
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }

    /// Destination node of each slot (the expanded row index)
    pub fn row_idx(&self) -> &[usize] {
        &self.row_idx
    }

    /// Sorted slot → original edge index
    pub fn perm(&self) -> &[usize] {
        &self.perm
    }

    pub fn values(&self) -> Option<&[f32]> {
        self.values.as_deref()
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.col_idx.len()
    }

    /// Slot range of row `d`
    pub fn row(&self, d: usize) -> Range<usize> {
        self.row_ptr[d]..self.row_ptr[d + 1]
    }

    /// Incoming-edge sources of node `d`
    pub fn neighbors(&self, d: usize) -> &[usize] {
        &self.col_idx[self.row(d)]
    }

    pub fn in_degree(&self, d: usize) -> usize {
        self.row_ptr[d + 1] - self.row_ptr[d]
    }

    /// Attach edge weights given in slot order
    pub fn with_values(mut self, values: Vec<f32>) -> Result<Self> {
        if values.len() != self.num_edges() {
            return Err(GatError::ShapeMismatch(format!(
                "values have {} entries for {} edges",
                values.len(),
                self.num_edges()
            )));
        }
        self.values = Some(values);
        Ok(self)
    }

    /// Edge list in slot order: `src = col_idx`, `dst = row_idx`
    pub fn induced_edge_list(&self) -> Result<EdgeList> {
        EdgeList::new(self.col_idx.clone(), self.row_idx.clone(), self.num_nodes)
    }

    /// Reorder a per-edge array `[E, width]` from original edge order into slot order
    pub fn permute_edge_values<T: Copy + Send + Sync>(&self, values: &[T], width: usize) -> Result<Vec<T>> {
        self.check_edge_array(values.len(), width)?;
        Ok(self
            .perm
            .par_iter()
            .flat_map_iter(|&e| values[e * width..(e + 1) * width].iter().copied())
            .collect())
    }

    /// Inverse of [`permute_edge_values`](Self::permute_edge_values): slot order back to original edge order
    pub fn unpermute_edge_values<T: Copy + Default>(&self, sorted: &[T], width: usize) -> Result<Vec<T>> {
        self.check_edge_array(sorted.len(), width)?;
        Ok(unpermute_rows(&self.perm, sorted, width))
    }

    fn check_edge_array(&self, len: usize, width: usize) -> Result<()> {
        if width == 0 || len != self.num_edges() * width {
            return Err(GatError::ShapeMismatch(format!(
                "per-edge array has {} entries, expected {} edges x {}",
                len,
                self.num_edges(),
                width
            )));
        }
        Ok(())
    }

    /// Materialise as a dense row-major `[N, N]` matrix, `A[d, s]`
    ///
    /// Missing values count as 1.0; duplicate edges add up.
    pub fn to_dense(&self) -> Vec<f32> {
        let n = self.num_nodes;
        let mut dense = vec![0.0f32; n * n];
        for (slot, (&d, &s)) in self.row_idx.iter().zip(&self.col_idx).enumerate() {
            dense[d * n + s] += self.values.as_ref().map_or(1.0, |v| v[slot]);
        }
        dense
    }
}

/// Scatter rows of `sorted` back to original positions: row `slot` lands at `perm[slot]`
pub(crate) fn unpermute_rows<T: Copy + Default>(perm: &[usize], sorted: &[T], width: usize) -> Vec<T> {
    let mut out = vec![T::default(); sorted.len()];
    for (slot, &e) in perm.iter().enumerate() {
        out[e * width..(e + 1) * width].copy_from_slice(&sorted[slot * width..(slot + 1) * width]);
    }
    out
}

/// Sparse × sparse product `C = A · B` of two CSR adjacencies over the same nodes
///
/// Each output row accumulates into a hash map keyed by column; columns come
/// out sorted ascending. Missing values count as 1.0.
pub fn spgemm_csr(a: &CsrGraph, b: &CsrGraph) -> Result<CsrGraph> {
    if a.num_nodes != b.num_nodes {
        return Err(GatError::ShapeMismatch(format!(
            "spgemm: left has {} nodes, right has {}",
            a.num_nodes, b.num_nodes
        )));
    }

    let value = |g: &CsrGraph, slot: usize| g.values.as_ref().map_or(1.0, |v| v[slot]);

    let rows: Vec<Vec<(usize, f32)>> = (0..a.num_nodes)
        .into_par_iter()
        .map(|i| {
            let mut acc: HashMap<usize, f32> = HashMap::new();
            for j in a.row(i) {
                let k = a.col_idx[j];
                let a_val = value(a, j);
                for m in b.row(k) {
                    *acc.entry(b.col_idx[m]).or_insert(0.0) += a_val * value(b, m);
                }
            }
            let mut row: Vec<(usize, f32)> = acc.into_iter().collect();
            row.sort_unstable_by_key(|&(col, _)| col);
            row
        })
        .collect();

    let mut row_ptr = Vec::with_capacity(a.num_nodes + 1);
    row_ptr.push(0);
    let mut col_idx = Vec::new();
    let mut values = Vec::new();
    for row in rows {
        for (col, val) in row {
            col_idx.push(col);
            values.push(val);
        }
        row_ptr.push(col_idx.len());
    }

    CsrGraph::from_parts(row_ptr, col_idx, Some(values), a.num_nodes)
}
