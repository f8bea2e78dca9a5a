//! Resource pools: reusable byte buffers and a bounded task executor

mod buffer;
mod worker;

pub use buffer::{BufferLease, BufferPool, BufferPoolStats};
pub use worker::{BoxError, PoolError, WorkerPool, WorkerPoolStats};
