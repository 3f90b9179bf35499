//! Common utilities and types shared across storegrid

pub mod command;
pub mod config;
pub mod error;
pub mod hash;
pub mod protocol;
pub mod utils;

pub use command::{split_fields, Command, Routing};
pub use config::{Config, CoordinatorConfig, ReducerConfig, WorkerConfig};
pub use error::{Error, Result};
pub use hash::{owner_of, partition_hash, replica_ids};
pub use protocol::{KeyValue, LineStream};
pub use utils::{generate_job_id, parse_duration, retry_with_backoff, with_timeout};
