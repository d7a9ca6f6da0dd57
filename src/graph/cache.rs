//! Topology-keyed CSR cache
//!
//! CSR structural arrays are the only state that outlives a forward pass.
//! The cache keys them by a SHA-256 fingerprint of the edge list, so any
//! change in topology (node count, edge count, or any endpoint) misses and
//! forces a rebuild.
//!
//! ## Concurrency
//!
//! Lookups load the slot through `ArcSwap` without locking. A rebuild takes
//! the write mutex and re-checks the fingerprint before building, so
//! concurrent forward passes on a new topology build it once.

use super::{CsrGraph, EdgeList};
use crate::Result;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// SHA-256 digest of an edge list's topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopologyFingerprint([u8; 32]);

impl TopologyFingerprint {
    /// Hash node count, edge count and every `(src, dst)` pair in order
    pub fn of(edges: &EdgeList) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((edges.num_nodes() as u64).to_le_bytes());
        hasher.update((edges.len() as u64).to_le_bytes());
        for (s, d) in edges.pairs() {
            hasher.update((s as u64).to_le_bytes());
            hasher.update((d as u64).to_le_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Display for TopologyFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sha256:{}", &self.to_hex()[..16])
    }
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct CachedCsr {
    fingerprint: TopologyFingerprint,
    csr: Arc<CsrGraph>,
}

/// Single-slot CSR cache for one layer instance
#[derive(Debug)]
pub struct CsrCache {
    /// Current entry (lock-free reads via `ArcSwap`)
    slot: ArcSwapOption<CachedCsr>,
    /// Serializes rebuilds and invalidation
    write_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for CsrCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrCache {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::new(None),
            write_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the CSR for `edges`, building it if the topology changed
    pub fn get_or_build(&self, edges: &EdgeList) -> Result<Arc<CsrGraph>> {
        self.fetch(edges).map(|(csr, _)| csr)
    }

    /// Like [`get_or_build`](Self::get_or_build), also reporting whether the lookup hit
    pub fn fetch(&self, edges: &EdgeList) -> Result<(Arc<CsrGraph>, bool)> {
        let fingerprint = TopologyFingerprint::of(edges);

        if let Some(csr) = self.lookup(&fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%fingerprint, "CSR cache hit");
            return Ok((csr, true));
        }

        let _guard = self.write_lock.lock();
        // Another writer may have built it while we waited
        if let Some(csr) = self.lookup(&fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((csr, true));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(%fingerprint, nodes = edges.num_nodes(), edges = edges.len(), "CSR cache miss, rebuilding");
        let csr = Arc::new(edges.to_csr()?);
        self.slot.store(Some(Arc::new(CachedCsr {
            fingerprint,
            csr: Arc::clone(&csr),
        })));
        Ok((csr, false))
    }

    fn lookup(&self, fingerprint: &TopologyFingerprint) -> Option<Arc<CsrGraph>> {
        let slot = self.slot.load();
        (*slot)
            .as_ref()
            .filter(|c| &c.fingerprint == fingerprint)
            .map(|c| Arc::clone(&c.csr))
    }

    /// Fingerprint of the cached topology, if any
    pub fn fingerprint(&self) -> Option<TopologyFingerprint> {
        (*self.slot.load()).as_ref().map(|c| c.fingerprint)
    }

    /// Drop the cached CSR
    pub fn invalidate(&self) {
        let _guard = self.write_lock.lock();
        self.slot.store(None);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
