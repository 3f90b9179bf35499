//! Reducer service
//!
//! Collects one partial per worker for each aggregation job, merges them
//! once all have arrived and pushes the result to the coordinator.

pub mod jobs;
pub mod server;

pub use jobs::{JobPhase, JobTable, Submission};
pub use server::{Reducer, ReducerServer};
