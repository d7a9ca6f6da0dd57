//! CSR cache across forward passes
//!
//! Demonstrates: a layer loaded from JSON config, repeated passes over one
//! topology (cache hits), then a topology change (rebuild).
//!
//! Run with:
//! ```bash
//! RUST_LOG=gat_spmm=debug cargo run --example cached_topology
//! ```

use gat_spmm::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = GatConfig::from_json_str(
        r#"{
            "in_features": 8,
            "out_features": 4,
            "heads": 2,
            "aggregation": "csr",
            "seed": 7
        }"#,
    )?;
    let device = cpu_device();
    let layer = GatLayer::new(config, &device)?;
    let x = Tensor::randn(0.0f32, 1.0, (5, 8), &device)?;

    let ring = EdgeList::from_pairs(&[(0, 1), (1, 2), (2, 3), (3, 4), (4, 0)], 5)?;
    for step in 0..3 {
        let out = layer.forward_with(&x, GraphRepr::EdgeList(&ring), AggregationPath::Auto, None)?;
        println!("ring pass {}: path={:?} cache_hit={:?}", step, out.stats.path, out.stats.cache_hit);
    }

    // Node 4 loses its in-edge: new fingerprint, rebuild
    let broken = EdgeList::from_pairs(&[(0, 1), (1, 2), (2, 3), (3, 0)], 5)?;
    let out = layer.forward_with(&x, GraphRepr::EdgeList(&broken), AggregationPath::Csr, None)?;
    println!(
        "broken ring: cache_hit={:?} degenerate_segments={}",
        out.stats.cache_hit, out.stats.degenerate_segments
    );

    let stats = layer.cache_stats();
    println!(
        "cache: {} hits, {} misses ({:.0}% hit rate)",
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0
    );

    Ok(())
}
