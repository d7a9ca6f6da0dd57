//! Device and tensor primitives
//!
//! Small helpers the layer builds on.
//!
//! ## Submodules
//!
//! - [`tensor_ops`]: Device selection (`GAT_SPMM_NO_GPU`)
//! - [`activations`]: Leaky ReLU, ELU, dropout masks
//! - [`init`]: Seeded Xavier initialization

mod activations;
mod init;
mod tensor_ops;

// Re-export all primitives at module level
pub use activations::*;
pub use init::*;
pub use tensor_ops::*;
