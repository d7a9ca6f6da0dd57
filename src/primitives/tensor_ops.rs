//! Device selection
//!
//! Parameters and the input projection live on whatever device the caller
//! picks. Aggregation kernels run on the host, so a forward pass moves the
//! projected features to the CPU once (a differentiable `to_device`) and
//! moves the result back.
//!
//! ## Forcing CPU
//!
//! ```bash
//! export GAT_SPMM_NO_GPU=1
//! ```

use candle_core::Device;
use tracing::info;

// ============================================================================
// Environment-controlled Device Selection
// ============================================================================

/// Check if GPU is disabled via environment variable.
///
/// Set `GAT_SPMM_NO_GPU=1` to force CPU-only mode.
pub fn gpu_disabled() -> bool {
    std::env::var("GAT_SPMM_NO_GPU")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the best available device for parameters and projections
///
/// Priority:
/// 1. Check `GAT_SPMM_NO_GPU` env var (forces CPU if set)
/// 2. Metal (Apple Silicon)
/// 3. CUDA (NVIDIA GPUs)
/// 4. CPU (fallback)
pub fn best_device() -> Device {
    if gpu_disabled() {
        info!("Using CPU device (GAT_SPMM_NO_GPU set)");
        return Device::Cpu;
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device (Apple Silicon)");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device (NVIDIA GPU)");
            return device;
        }
    }

    info!("Using CPU device");
    Device::Cpu
}

/// Force CPU device, ignoring GPU availability.
pub fn cpu_device() -> Device {
    Device::Cpu
}
