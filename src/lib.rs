//! Fault-aware tree collectives over non-blocking TCP.
//!
//! A fixed-size cohort of workers, each owning a rank in `[0, N)`, runs
//! in-place Allreduce and Broadcast over a coordinator-assigned spanning
//! tree. Collectives are single-threaded and cooperative: progress on every
//! link comes from non-blocking I/O multiplexed through one readiness
//! selector, and a caller-supplied preprocessing loop can run in the gaps.
//! A link fault abandons the collective with a classified error; rebuilding
//! the mesh through the coordinator makes the collective retryable.

pub mod config;
pub mod engine;
pub mod error;
pub mod reduce;
mod topology;
mod tracker;
mod transport;
pub mod types;

pub use config::ArborConfig;
pub use engine::{Engine, LoopExecutor};
pub use error::{ArborError, FaultKind, LinkFault, Result};
pub use reduce::Reducible;
pub use types::{DataType, Rank, ReduceOp};
