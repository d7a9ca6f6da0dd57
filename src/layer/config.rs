//! Layer configuration

use crate::{GatError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How per-head outputs are combined into the output feature axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadMerge {
    /// Flatten `[N, H, D]` into `[N, H*D]`
    #[default]
    Concat,
    /// Average over heads, `[N, D]`
    Mean,
}

/// Which aggregation engine a forward pass runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPath {
    /// Follow the graph representation: edge list → scatter, CSR → SPMM
    #[default]
    Auto,
    /// Sort by destination, segment softmax, scatter-reduce
    Scatter,
    /// Build (or reuse) CSR, then CSR-SPMM
    Csr,
}

/// Configuration for a [`GatLayer`](super::GatLayer)
///
/// ```ignore
/// let config = GatConfig::new(64, 8, 8)
///     .with_head_merge(HeadMerge::Mean)
///     .with_seed(7);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatConfig {
    /// Input feature width `F_in`
    pub in_features: usize,

    /// Output width per head `D`
    pub out_features: usize,

    /// Attention head count `H`
    pub heads: usize,

    /// Leaky-rectification slope applied to logits before softmax (off when `None`)
    pub negative_slope: Option<f64>,

    /// Head combination after aggregation
    pub head_merge: HeadMerge,

    /// Default engine for [`GatLayer::forward`](super::GatLayer::forward)
    pub aggregation: AggregationPath,

    /// Seed for parameter initialization (entropy when `None`)
    pub seed: Option<u64>,

    /// Reuse CSR structure across forward passes with unchanged topology
    pub cache_csr: bool,
}

impl Default for GatConfig {
    fn default() -> Self {
        Self {
            in_features: 1,
            out_features: 1,
            heads: 1,
            negative_slope: None,
            head_merge: HeadMerge::Concat,
            aggregation: AggregationPath::Auto,
            seed: None,
            cache_csr: true,
        }
    }
}

impl GatConfig {
    /// Create a config with the given dimensions and defaults elsewhere
    pub fn new(in_features: usize, out_features: usize, heads: usize) -> Self {
        Self {
            in_features,
            out_features,
            heads,
            ..Default::default()
        }
    }

    /// Builder: enable leaky rectification of logits
    pub fn with_negative_slope(mut self, slope: f64) -> Self {
        self.negative_slope = Some(slope);
        self
    }

    /// Builder: set head merge mode
    pub fn with_head_merge(mut self, merge: HeadMerge) -> Self {
        self.head_merge = merge;
        self
    }

    /// Builder: set default aggregation path
    pub fn with_aggregation(mut self, path: AggregationPath) -> Self {
        self.aggregation = path;
        self
    }

    /// Builder: set initialization seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builder: enable or disable the CSR cache
    pub fn with_cache_csr(mut self, enabled: bool) -> Self {
        self.cache_csr = enabled;
        self
    }

    /// Width of the merged output
    pub fn output_width(&self) -> usize {
        match self.head_merge {
            HeadMerge::Concat => self.heads * self.out_features,
            HeadMerge::Mean => self.out_features,
        }
    }

    /// Reject zero dimensions and non-finite slopes
    pub fn validate(&self) -> Result<()> {
        if self.in_features == 0 || self.out_features == 0 || self.heads == 0 {
            return Err(GatError::Config(format!(
                "dimensions must be positive: in_features={}, out_features={}, heads={}",
                self.in_features, self.out_features, self.heads
            )));
        }
        if let Some(slope) = self.negative_slope {
            if !slope.is_finite() {
                return Err(GatError::Config(format!("negative_slope must be finite, got {}", slope)));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| GatError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| GatError::Serialization(e.to_string()))
    }
}
