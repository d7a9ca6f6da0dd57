//! Two stacked attention layers
//!
//! Demonstrates: concat heads -> ELU -> dropout -> mean-merged output layer,
//! with a prebuilt CSR shared by both layers.
//!
//! Run with:
//! ```bash
//! cargo run --example two_layer_gat
//! ```

use gat_spmm::prelude::*;
use gat_spmm::primitives::elu;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let device = best_device();

    // Small citation-style graph with self loops
    let src = vec![0, 1, 2, 3, 4, 5, 0, 1, 1, 2, 3, 4, 5, 2];
    let dst = vec![0, 1, 2, 3, 4, 5, 1, 0, 2, 3, 2, 5, 4, 0];
    let csr = build_csr(&src, &dst, 6)?;
    let graph = GraphRepr::Csr(&csr);

    let hidden = GatLayer::new(GatConfig::new(4, 8, 4).with_negative_slope(0.2).with_seed(1), &device)?;
    let output = GatLayer::new(
        GatConfig::new(32, 3, 2)
            .with_negative_slope(0.2)
            .with_head_merge(HeadMerge::Mean)
            .with_seed(2),
        &device,
    )?;

    let x = Tensor::randn(0.0f32, 1.0, (6, 4), &device)?;

    let h = hidden.forward_with(&x, graph, AggregationPath::Auto, None)?;
    let mask = dropout_mask((6, 32), 0.5, &device)?;
    let h = elu(&h.pre_dropout, 1.0)?.mul(&mask)?;

    let out = output.forward_with(&h, graph, AggregationPath::Auto, None)?;

    println!("hidden params: {}", hidden.params().param_count());
    println!("output params: {}", output.params().param_count());
    println!("output shape: {:?}", out.output.dims());
    println!("logits per node:\n{}", out.output);
    println!("stats: {}", serde_json::to_string(&out.stats).unwrap_or_default());

    Ok(())
}
