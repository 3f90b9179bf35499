//! Coordinator
//!
//! The coordinator is responsible for:
//! - Command classification and routing (store-admin, directed, aggregable, broadcast)
//! - Worker membership, id compaction and reload broadcasts
//! - The dynamic admin log replayed to joining workers
//! - Correlating reduced results with waiting clients

pub mod membership;
pub mod placement;
pub mod results;
pub mod server;
pub mod worker_client;

pub use membership::{AdminEvent, Membership};
pub use placement::{Placement, Route};
pub use results::{PendingResult, ResultTable};
pub use server::{CoordState, Coordinator, CoordinatorServer};
