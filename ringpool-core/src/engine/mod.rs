//! Engine module - The job pool runtime
//!
//! Queues, the pause gate, the two worker loops and the [`Pool`] that owns
//! them.

mod gate;
mod pool;
mod queue;
mod worker;

pub use pool::{JoinSummary, Pool, PoolBuilder, PoolCloser};
pub use worker::Stage;
