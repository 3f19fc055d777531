//! Client for a submitted compute task: status polling, cached result
//! retrieval, cancellation, and a retry-driven wait loop.

mod client;
mod data;

pub use client::JobClient;
pub use data::{JobProgress, JobStatus};
