//! Learned parameters of one attention layer

use crate::primitives::{seeded_rng, xavier_uniform};
use crate::{GatError, Result};
use candle_core::{Device, Tensor, Var};

/// Projection and attention vectors
#[derive(Debug)]
pub struct GatParams {
    /// Number of attention heads
    pub heads: usize,
    /// Output width per head
    pub head_dim: usize,
    /// Shared projection: [in_features, heads * head_dim]
    pub w: Var,
    /// Source-role attention vector: [heads, head_dim]
    pub a_src: Var,
    /// Destination-role attention vector: [heads, head_dim]
    pub a_dst: Var,
}

impl GatParams {
    /// Xavier-uniform initialization from an optional seed
    ///
    /// The three tensors are drawn in order `w`, `a_src`, `a_dst` from one
    /// generator, so a fixed seed reproduces all of them.
    pub fn new(
        in_features: usize,
        heads: usize,
        head_dim: usize,
        seed: Option<u64>,
        device: &Device,
    ) -> Result<Self> {
        if in_features == 0 || heads == 0 || head_dim == 0 {
            return Err(GatError::Config(format!(
                "parameter dimensions must be positive: in={}, heads={}, head_dim={}",
                in_features, heads, head_dim
            )));
        }
        let mut rng = seeded_rng(seed);
        let width = heads * head_dim;

        let w = xavier_uniform(&[in_features, width], in_features, width, &mut rng, device)?;
        let a_src = xavier_uniform(&[heads, head_dim], head_dim, 1, &mut rng, device)?;
        let a_dst = xavier_uniform(&[heads, head_dim], head_dim, 1, &mut rng, device)?;

        Self::from_tensors(w, a_src, a_dst, heads)
    }

    /// Wrap caller-supplied tensors after checking their shapes
    ///
    /// # Errors
    /// `ShapeMismatch` unless `w` is `[F_in, heads * D]` and both attention
    /// vectors are `[heads, D]`.
    pub fn from_tensors(w: Tensor, a_src: Tensor, a_dst: Tensor, heads: usize) -> Result<Self> {
        let (in_features, width) = w
            .dims2()
            .map_err(|e| GatError::ShapeMismatch(format!("projection must be 2-D: {}", e)))?;
        if heads == 0 || width == 0 || width % heads != 0 {
            return Err(GatError::ShapeMismatch(format!(
                "projection width {} is not a positive multiple of {} heads",
                width, heads
            )));
        }
        let head_dim = width / heads;
        for (name, a) in [("a_src", &a_src), ("a_dst", &a_dst)] {
            if a.dims() != [heads, head_dim] {
                return Err(GatError::ShapeMismatch(format!(
                    "{} must be [{}, {}], got {:?}",
                    name,
                    heads,
                    head_dim,
                    a.dims()
                )));
            }
        }
        if in_features == 0 {
            return Err(GatError::ShapeMismatch("projection has no input features".into()));
        }

        let var = |t: Tensor, name: &str| {
            Var::from_tensor(&t).map_err(|e| GatError::Tensor(format!("Failed to create {} var: {}", name, e)))
        };
        Ok(Self {
            heads,
            head_dim,
            w: var(w, "W")?,
            a_src: var(a_src, "a_src")?,
            a_dst: var(a_dst, "a_dst")?,
        })
    }

    /// Input feature width
    pub fn in_features(&self) -> usize {
        self.w.as_tensor().dims()[0]
    }

    /// Get all trainable variables
    pub fn trainable_vars(&self) -> Vec<Var> {
        vec![self.w.clone(), self.a_src.clone(), self.a_dst.clone()]
    }

    /// Total parameter count
    pub fn param_count(&self) -> usize {
        self.w.as_tensor().elem_count()
            + self.a_src.as_tensor().elem_count()
            + self.a_dst.as_tensor().elem_count()
    }
}
