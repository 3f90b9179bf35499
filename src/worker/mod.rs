//! Worker node
//!
//! Owns the stores whose partition hash lands on its id, executes directed
//! commands against them and runs the map phase of aggregations.

pub mod link;
pub mod partition;
pub mod processor;
pub mod server;

pub use partition::PartitionedCatalog;
pub use processor::{execute, Execution};
pub use server::{Worker, WorkerServer, WorkerState};
