//! Command taxonomy and routing policy

use crate::catalog::Store;
use crate::common::{Error, Result};
use std::fmt;

/// How the coordinator dispatches a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Primary worker answers; reload broadcast and admin log afterwards.
    StoreAdmin,
    /// Exactly one worker, chosen by hashing the target store.
    Directed,
    /// Every worker maps, the reducer merges, the coordinator awaits the result.
    Aggregable,
    /// Every worker, raw replies returned verbatim.
    Broadcast,
}

/// Client/manager commands accepted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    AddStore,
    RemoveStore,
    AddProduct,
    RemoveProduct,
    UpdateProductAmount,
    IncrementProductAmount,
    DecrementProductAmount,
    PurchaseProduct,
    Review,
    Search,
    AggregateSalesByProductName,
    ListStores,
    DeletedProducts,
    /// Anything unrecognised; broadcast as-is.
    Other(String),
}

impl Command {
    /// Case-insensitive parse. Never fails: unknown names become `Other`.
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        match name.to_ascii_uppercase().as_str() {
            "ADD_STORE" => Command::AddStore,
            "REMOVE_STORE" => Command::RemoveStore,
            "ADD_PRODUCT" => Command::AddProduct,
            "REMOVE_PRODUCT" => Command::RemoveProduct,
            "UPDATE_PRODUCT_AMOUNT" => Command::UpdateProductAmount,
            "INCREMENT_PRODUCT_AMOUNT" => Command::IncrementProductAmount,
            "DECREMENT_PRODUCT_AMOUNT" => Command::DecrementProductAmount,
            "PURCHASE_PRODUCT" => Command::PurchaseProduct,
            "REVIEW" => Command::Review,
            "SEARCH" => Command::Search,
            "AGGREGATE_SALES_BY_PRODUCT_NAME" => Command::AggregateSalesByProductName,
            "LIST_STORES" => Command::ListStores,
            "DELETED_PRODUCTS" => Command::DeletedProducts,
            _ => Command::Other(name.to_string()),
        }
    }

    /// Canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Command::AddStore => "ADD_STORE",
            Command::RemoveStore => "REMOVE_STORE",
            Command::AddProduct => "ADD_PRODUCT",
            Command::RemoveProduct => "REMOVE_PRODUCT",
            Command::UpdateProductAmount => "UPDATE_PRODUCT_AMOUNT",
            Command::IncrementProductAmount => "INCREMENT_PRODUCT_AMOUNT",
            Command::DecrementProductAmount => "DECREMENT_PRODUCT_AMOUNT",
            Command::PurchaseProduct => "PURCHASE_PRODUCT",
            Command::Review => "REVIEW",
            Command::Search => "SEARCH",
            Command::AggregateSalesByProductName => "AGGREGATE_SALES_BY_PRODUCT_NAME",
            Command::ListStores => "LIST_STORES",
            Command::DeletedProducts => "DELETED_PRODUCTS",
            Command::Other(name) => name.as_str(),
        }
    }

    pub fn routing(&self) -> Routing {
        match self {
            Command::AddStore | Command::RemoveStore => Routing::StoreAdmin,
            Command::AddProduct
            | Command::RemoveProduct
            | Command::UpdateProductAmount
            | Command::IncrementProductAmount
            | Command::DecrementProductAmount
            | Command::PurchaseProduct
            | Command::Review => Routing::Directed,
            Command::Search
            | Command::AggregateSalesByProductName
            | Command::ListStores
            | Command::DeletedProducts => Routing::Aggregable,
            Command::Other(_) => Routing::Broadcast,
        }
    }

    /// Extract the store a store-admin or directed command targets.
    ///
    /// `ADD_STORE` carries a store JSON document, `REMOVE_STORE` a bare name,
    /// every directed command a pipe-delimited record with the store first.
    pub fn target_store(&self, payload: &str) -> Result<String> {
        let name = match self {
            Command::AddStore => Store::from_json(payload)?.name,
            Command::RemoveStore => payload.trim().to_string(),
            _ if self.routing() == Routing::Directed => payload
                .split('|')
                .next()
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            _ => {
                return Err(Error::invalid_payload(
                    self.as_str(),
                    "command does not target a single store",
                ))
            }
        };
        if name.is_empty() {
            return Err(Error::invalid_payload(self.as_str(), "missing store name"));
        }
        Ok(name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a pipe-delimited payload into exactly `n` trimmed fields.
///
/// The last field keeps any further pipes, so JSON bodies survive.
pub fn split_fields<'a>(command: &Command, payload: &'a str, n: usize) -> Result<Vec<&'a str>> {
    let fields: Vec<&str> = payload.splitn(n, '|').map(str::trim).collect();
    if fields.len() < n || fields.iter().any(|f| f.is_empty()) {
        return Err(Error::invalid_payload(
            command.as_str(),
            format!("expected {} '|'-separated fields", n),
        ));
    }
    Ok(fields)
}
