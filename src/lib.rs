//! # storegrid
//!
//! A partitioned store catalog with map/reduce aggregation:
//! - Stores hash-partitioned across workers (BLAKE3, modulo worker count)
//! - Directed commands routed to the owning worker, with best-effort replica pushes
//! - Aggregations mapped on every worker and merged by a reducer
//! - Online repartitioning when workers join or leave
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            clients / managers
//!                   │  COMMAND / payload
//!          ┌────────▼─────────┐
//!          │   Coordinator    │◄──────────────┐
//!          │ routing, members │ REDUCE_RESULT │
//!          │ admin log        │               │
//!          └──┬──────┬─────┬──┘               │
//!             │      │     │                  │
//!       ┌─────▼┐ ┌───▼──┐ ┌▼─────┐     ┌──────┴──┐
//!       │ W 0  │ │ W 1  │ │ W 2  │────►│ Reducer │
//!       └──────┘ └──────┘ └──────┘ map └─────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the services
//! ```bash
//! storegrid-coord serve --bind 0.0.0.0:12345
//! storegrid-reducer serve --bind 0.0.0.0:23456 --coordinator 127.0.0.1:12345
//! storegrid-worker serve --bind 0.0.0.0:20000 \
//!   --coordinator 127.0.0.1:12345 --reducer 127.0.0.1:23456
//! ```
//!
//! ### Send commands
//! ```bash
//! storegrid ADD_STORE --file ./pizzaworld.json
//! storegrid SEARCH FoodCategory=pizzeria
//! storegrid PURCHASE_PRODUCT 'PizzaWorld|Pepperoni|3'
//! storegrid AGGREGATE_SALES_BY_PRODUCT_NAME ProductName=Pepperoni
//! ```

pub mod catalog;
pub mod client;
pub mod common;
pub mod coordinator;
pub mod reducer;
pub mod worker;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, CoordinatorServer};
pub use reducer::{Reducer, ReducerServer};
pub use worker::{Worker, WorkerServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
