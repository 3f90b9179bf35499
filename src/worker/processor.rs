//! Worker command pipeline
//!
//! Pure over a [`PartitionedCatalog`]: no I/O, so the server can run it
//! under the catalog lock and do all network work afterwards.

use crate::catalog::{Aggregation, Product, Store};
use crate::common::{split_fields, Command, Error, KeyValue, Result, Routing};
use crate::worker::partition::PartitionedCatalog;

/// Outcome of one command against the local partition.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Answer the coordinator directly.
    Reply(Vec<KeyValue>),
    /// Map output to forward to the reducer.
    Partial(Vec<KeyValue>),
}

impl Execution {
    pub fn pairs(&self) -> &[KeyValue] {
        match self {
            Execution::Reply(pairs) | Execution::Partial(pairs) => pairs,
        }
    }
}

/// Run `command` against the catalog. Client-input failures become a single
/// `ERROR` pair; the connection never sees an `Err`.
pub fn execute(catalog: &mut PartitionedCatalog, command: &Command, payload: &str) -> Execution {
    match command.routing() {
        Routing::Aggregable => {
            let pairs = Aggregation::parse(command, payload)
                .and_then(|agg| agg.map(catalog.owned_stores(), catalog.deleted_products()))
                .unwrap_or_else(|e| vec![KeyValue::error(e.to_string())]);
            Execution::Partial(pairs)
        }
        _ => {
            let pairs = match apply(catalog, command, payload) {
                Ok(pair) => vec![pair],
                Err(e) => {
                    tracing::debug!("{} rejected: {}", command, e);
                    vec![KeyValue::error(e.to_string())]
                }
            };
            Execution::Reply(pairs)
        }
    }
}

fn parse_count(command: &Command, field: &str) -> Result<u32> {
    field.parse().map_err(|_| {
        Error::invalid_payload(command.as_str(), "quantity must be a non-negative integer")
    })
}

fn apply(catalog: &mut PartitionedCatalog, command: &Command, payload: &str) -> Result<KeyValue> {
    match command {
        // Store admin touches the global list whether or not we own the store
        Command::AddStore => {
            let store = Store::from_json(payload)?;
            let name = store.name.clone();
            catalog.add_store(store)?;
            Ok(KeyValue::new(name.clone(), format!("Store {} added.", name)))
        }
        Command::RemoveStore => {
            let name = payload.trim();
            if name.is_empty() {
                return Err(Error::invalid_payload(command.as_str(), "missing store name"));
            }
            catalog.remove_store(name)?;
            Ok(KeyValue::new(name, format!("Store {} removed.", name)))
        }

        Command::AddProduct => {
            let f = split_fields(command, payload, 2)?;
            let product = Product::from_json(f[1])?;
            let message = format!("Product {} added to store {}.", product.name, f[0]);
            catalog.owned_store_mut(f[0])?.add_product(product)?;
            Ok(KeyValue::new(f[0], message))
        }
        Command::RemoveProduct => {
            let f = split_fields(command, payload, 2)?;
            catalog.owned_store_mut(f[0])?.remove_product(f[1])?;
            catalog.record_deletion(f[1]);
            Ok(KeyValue::new(
                f[0],
                format!("Product {} removed from store {}.", f[1], f[0]),
            ))
        }
        Command::UpdateProductAmount => {
            let f = split_fields(command, payload, 3)?;
            let amount = parse_count(command, f[2])?;
            catalog.owned_store_mut(f[0])?.set_amount(f[1], amount)?;
            Ok(KeyValue::new(
                f[0],
                format!(
                    "Product {} amount updated to {} in store {}.",
                    f[1], amount, f[0]
                ),
            ))
        }
        Command::IncrementProductAmount => {
            let f = split_fields(command, payload, 3)?;
            let by = parse_count(command, f[2])?;
            let now = catalog.owned_store_mut(f[0])?.increment_amount(f[1], by)?;
            Ok(KeyValue::new(
                f[0],
                format!(
                    "Product {} amount increased by {} in store {}. New amount: {}.",
                    f[1], by, f[0], now
                ),
            ))
        }
        Command::DecrementProductAmount => {
            let f = split_fields(command, payload, 3)?;
            let by = parse_count(command, f[2])?;
            let store = catalog.owned_store_mut(f[0])?;
            let now = store.decrement_amount(f[1], by).map_err(|e| match e {
                Error::InsufficientStock {
                    requested,
                    available,
                    ..
                } => Error::invalid_payload(
                    command.as_str(),
                    format!(
                        "You cannot remove {} units; only {} available.",
                        requested, available
                    ),
                ),
                other => other,
            })?;
            Ok(KeyValue::new(
                f[0],
                format!(
                    "Product {} amount decreased by {} in store {}. New amount: {}.",
                    f[1], by, f[0], now
                ),
            ))
        }
        Command::PurchaseProduct => {
            let f = split_fields(command, payload, 3)?;
            let quantity = parse_count(command, f[2])?;
            let remaining = catalog.owned_store_mut(f[0])?.purchase(f[1], quantity)?;
            Ok(KeyValue::new(
                f[0],
                format!(
                    "Successfully purchased {} of {} from store {}.|{}",
                    quantity, f[1], f[0], remaining
                ),
            ))
        }
        Command::Review => {
            let f = split_fields(command, payload, 2)?;
            let rating: u32 = f[1]
                .parse()
                .ok()
                .filter(|r| (1..=5).contains(r))
                .ok_or_else(|| {
                    Error::invalid_payload(command.as_str(), "rating must be between 1 and 5")
                })?;
            catalog.owned_store_mut(f[0])?.apply_review(rating);
            Ok(KeyValue::new(
                f[0],
                format!("Gave {} Stars Review for: {}", "*".repeat(rating as usize), f[0]),
            ))
        }

        other => Err(Error::UnknownCommand(other.as_str().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::merge_pairs;

    const PIZZA_WORLD: &str = r#"{"StoreName":"PizzaWorld","FoodCategory":"pizzeria","Stars":4,"NoOfVotes":10,"Products":[{"ProductName":"Pepperoni","ProductType":"pizza","Available Amount":100,"Price":10.0}]}"#;

    fn solo() -> PartitionedCatalog {
        let mut catalog = PartitionedCatalog::new(0, 1);
        let out = execute(&mut catalog, &Command::AddStore, PIZZA_WORLD);
        assert_eq!(
            out,
            Execution::Reply(vec![KeyValue::new("PizzaWorld", "Store PizzaWorld added.")])
        );
        catalog
    }

    fn reply(catalog: &mut PartitionedCatalog, command: Command, payload: &str) -> KeyValue {
        match execute(catalog, &command, payload) {
            Execution::Reply(mut pairs) => {
                assert_eq!(pairs.len(), 1);
                pairs.remove(0)
            }
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[test]
    fn test_purchase_reply_carries_remaining() {
        let mut catalog = solo();
        let kv = reply(&mut catalog, Command::PurchaseProduct, "PizzaWorld|Pepperoni|30");
        assert_eq!(
            kv.value,
            "Successfully purchased 30 of Pepperoni from store PizzaWorld.|70"
        );

        let kv = reply(&mut catalog, Command::PurchaseProduct, "PizzaWorld|Pepperoni|71");
        assert!(kv.is_error());
        let kv = reply(&mut catalog, Command::PurchaseProduct, "PizzaWorld|Pepperoni|x");
        assert!(kv.is_error());

        let kv = reply(&mut catalog, Command::PurchaseProduct, "PizzaWorld|Pepperoni|0");
        assert_eq!(
            kv.value,
            "Successfully purchased 0 of Pepperoni from store PizzaWorld.|70"
        );
    }

    #[test]
    fn test_directed_to_unknown_store() {
        let mut catalog = solo();
        let kv = reply(&mut catalog, Command::Review, "Nowhere|5");
        assert_eq!(kv, KeyValue::error("Store Nowhere not found."));
    }

    #[test]
    fn test_review_bounds() {
        let mut catalog = solo();
        assert!(reply(&mut catalog, Command::Review, "PizzaWorld|0").is_error());
        assert!(reply(&mut catalog, Command::Review, "PizzaWorld|6").is_error());
        let kv = reply(&mut catalog, Command::Review, "PizzaWorld|5");
        assert_eq!(kv.value, "Gave ***** Stars Review for: PizzaWorld");
    }

    #[test]
    fn test_product_admin_and_deleted_report() {
        let mut catalog = solo();
        let kv = reply(
            &mut catalog,
            Command::AddProduct,
            r#"PizzaWorld|{"ProductName":"Salad","ProductType":"salad","Available Amount":5,"Price":4.0}"#,
        );
        assert_eq!(kv.value, "Product Salad added to store PizzaWorld.");

        let kv = reply(&mut catalog, Command::IncrementProductAmount, "PizzaWorld|Salad|5");
        assert!(kv.value.ends_with("New amount: 10."), "{}", kv.value);

        let kv = reply(&mut catalog, Command::DecrementProductAmount, "PizzaWorld|Salad|11");
        assert_eq!(
            kv.value,
            "Invalid data for DECREMENT_PRODUCT_AMOUNT: You cannot remove 11 units; only 10 available."
        );

        let kv = reply(&mut catalog, Command::UpdateProductAmount, "PizzaWorld|Salad|0");
        assert_eq!(kv.value, "Product Salad amount updated to 0 in store PizzaWorld.");

        reply(&mut catalog, Command::RemoveProduct, "PizzaWorld|Salad");
        let partial = execute(&mut catalog, &Command::DeletedProducts, "");
        assert_eq!(
            partial,
            Execution::Partial(vec![KeyValue::new("DELETED_PRODUCTS", "DELETED PRODUCTS: Salad")])
        );
    }

    #[test]
    fn test_aggregations_are_partials() {
        let mut catalog = solo();
        reply(&mut catalog, Command::PurchaseProduct, "PizzaWorld|Pepperoni|4");

        let out = execute(&mut catalog, &Command::Search, "FoodCategory=pizzeria");
        assert!(matches!(out, Execution::Partial(ref p) if p.len() == 1));

        let out = execute(
            &mut catalog,
            &Command::AggregateSalesByProductName,
            "ProductName=Pepperoni",
        );
        let merged = merge_pairs(out.pairs().to_vec());
        assert_eq!(merged["PizzaWorld"], "PizzaWorld: Pepperoni = 4");

        let out = execute(&mut catalog, &Command::Search, "Bogus");
        assert!(out.pairs()[0].is_error());
    }

    #[test]
    fn test_store_admin_updates_global_list_when_not_owner() {
        // Find a worker id in a 2-worker cluster that does not own PizzaWorld
        let owner = crate::common::owner_of("PizzaWorld", 2);
        let mut catalog = PartitionedCatalog::new(1 - owner, 2);
        execute(&mut catalog, &Command::AddStore, PIZZA_WORLD);
        assert_eq!(catalog.store_count(), 1);
        assert!(catalog.owned_names().is_empty());

        // After the owner leaves, the survivor picks the store up
        catalog.reassign(crate::common::protocol::WorkerAssignment {
            worker_id: 0,
            total_workers: 1,
        });
        assert_eq!(catalog.owned_names(), vec!["PizzaWorld".to_string()]);

        let kv = reply(&mut catalog, Command::RemoveStore, "PizzaWorld");
        assert_eq!(kv.value, "Store PizzaWorld removed.");
        assert!(reply(&mut catalog, Command::RemoveStore, "PizzaWorld").is_error());
    }

    #[test]
    fn test_unknown_command() {
        let mut catalog = solo();
        let kv = reply(&mut catalog, Command::Other("PING".into()), "");
        assert_eq!(kv, KeyValue::error("Unknown command: PING"));
    }
}
