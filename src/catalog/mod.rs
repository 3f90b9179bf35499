//! Store catalog: data model and map/reduce rules

pub mod mapping;
pub mod store;

pub use mapping::{
    deleted_products_report, merge_pairs, total_sales, Aggregation, SearchFilter,
    VALUE_SEPARATOR,
};
pub use store::{haversine_km, PriceTier, Product, Store};
