//! Asynchronous entry points over the synchronous graph executor.

pub mod async_executor;

pub use async_executor::{AsyncGraphExecutor, AsyncGraphOps};
