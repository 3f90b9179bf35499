//! Per-store map functions and the reducer's merge rule
//!
//! | Command                           | Map output per store                          |
//! |-----------------------------------|-----------------------------------------------|
//! | `SEARCH`                          | `(store, store-json)` if the filter matches   |
//! | `AGGREGATE_SALES_BY_PRODUCT_NAME` | `(store, "<store>: <product> = <qty>")`       |
//! | `LIST_STORES`                     | `("LIST_STORES", store)`                      |
//! | `DELETED_PRODUCTS`                | `("DELETED_PRODUCTS", report)` once per worker|
//!
//! Merging is a union over keys; duplicate keys concatenate with `", "`.

use crate::catalog::Store;
use crate::common::{Command, Error, KeyValue, Result};
use std::collections::BTreeMap;

pub const VALUE_SEPARATOR: &str = ", ";

const SALES_QUERY_PREFIX: &str = "ProductName=";

/// `SEARCH` filter, parsed from `key=value`.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchFilter {
    /// `FoodCategory=<name>`, case-insensitive
    Category(String),
    /// `Stars=<n>`, stores rated at least `n`
    MinStars(u32),
    /// `AvgPrice=<n>`, tier with exactly `n` dollar signs
    PriceTier(usize),
    /// `Radius=<km>,<lon>,<lat>`
    Radius {
        radius_km: f64,
        longitude: f64,
        latitude: f64,
    },
}

impl SearchFilter {
    pub fn parse(payload: &str) -> Result<Self> {
        let bad = |reason: &str| Error::invalid_payload("SEARCH", reason);

        let (key, value) = payload
            .trim()
            .split_once('=')
            .ok_or_else(|| bad("expected <filter>=<value>"))?;
        let value = value.trim();
        if value.is_empty() {
            return Err(bad("empty filter value"));
        }

        let key = key.trim();
        match key.to_ascii_lowercase().as_str() {
            "foodcategory" => Ok(SearchFilter::Category(value.to_string())),
            "stars" => value
                .parse()
                .map(SearchFilter::MinStars)
                .map_err(|_| bad("Stars must be a whole number")),
            "avgprice" => {
                let dollars: usize = if value.chars().all(|c| c == '$') {
                    value.len()
                } else {
                    value
                        .parse()
                        .map_err(|_| bad("AvgPrice must be 1, 2 or 3"))?
                };
                if !(1..=3).contains(&dollars) {
                    return Err(bad("AvgPrice must be 1, 2 or 3"));
                }
                Ok(SearchFilter::PriceTier(dollars))
            }
            "radius" => {
                let parts: Vec<f64> = value
                    .split(',')
                    .map(|p| p.trim().parse::<f64>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| bad("Radius expects <km>,<lon>,<lat>"))?;
                match parts.as_slice() {
                    [radius_km, longitude, latitude] if *radius_km >= 0.0 => {
                        Ok(SearchFilter::Radius {
                            radius_km: *radius_km,
                            longitude: *longitude,
                            latitude: *latitude,
                        })
                    }
                    _ => Err(bad("Radius expects <km>,<lon>,<lat>")),
                }
            }
            _ => Err(bad(&format!("unknown filter {}", key))),
        }
    }

    pub fn matches(&self, store: &Store) -> bool {
        match self {
            SearchFilter::Category(category) => store.category.eq_ignore_ascii_case(category),
            SearchFilter::MinStars(stars) => store.stars >= *stars,
            SearchFilter::PriceTier(dollars) => store.price_tier().dollars() == Some(*dollars),
            SearchFilter::Radius {
                radius_km,
                longitude,
                latitude,
            } => store.distance_km(*latitude, *longitude) <= *radius_km,
        }
    }
}

/// An aggregable command with its parsed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Search(SearchFilter),
    SalesByProduct(String),
    ListStores,
    DeletedProducts,
}

impl Aggregation {
    pub fn parse(command: &Command, payload: &str) -> Result<Self> {
        match command {
            Command::Search => Ok(Aggregation::Search(SearchFilter::parse(payload)?)),
            Command::AggregateSalesByProductName => {
                let product = payload
                    .trim()
                    .strip_prefix(SALES_QUERY_PREFIX)
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        Error::invalid_payload(
                            command.as_str(),
                            "expected ProductName=<value>",
                        )
                    })?;
                Ok(Aggregation::SalesByProduct(product.to_string()))
            }
            Command::ListStores => Ok(Aggregation::ListStores),
            Command::DeletedProducts => Ok(Aggregation::DeletedProducts),
            other => Err(Error::UnknownCommand(format!(
                "{} is not an aggregation",
                other
            ))),
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Aggregation::Search(_) => Command::Search,
            Aggregation::SalesByProduct(_) => Command::AggregateSalesByProductName,
            Aggregation::ListStores => Command::ListStores,
            Aggregation::DeletedProducts => Command::DeletedProducts,
        }
    }

    /// Map over one worker's partition. `deleted` is that worker's deletion log.
    pub fn map<'a>(
        &self,
        stores: impl IntoIterator<Item = &'a Store>,
        deleted: &[String],
    ) -> Result<Vec<KeyValue>> {
        let mut pairs = Vec::new();
        match self {
            Aggregation::Search(filter) => {
                for store in stores {
                    if filter.matches(store) {
                        pairs.push(KeyValue::new(store.name.clone(), store.to_json()?));
                    }
                }
            }
            Aggregation::SalesByProduct(product) => {
                for store in stores {
                    if let Some(qty) = store.sales_for(product) {
                        pairs.push(KeyValue::new(
                            store.name.clone(),
                            format!("{}: {} = {}", store.name, product, qty),
                        ));
                    }
                }
            }
            Aggregation::ListStores => {
                for store in stores {
                    pairs.push(KeyValue::new("LIST_STORES", store.name.clone()));
                }
            }
            Aggregation::DeletedProducts => {
                if let Some(report) = deleted_products_report(deleted) {
                    pairs.push(KeyValue::new("DELETED_PRODUCTS", report));
                }
            }
        }
        Ok(pairs)
    }
}

/// `DELETED PRODUCTS: a, b`, or `None` when nothing was deleted.
pub fn deleted_products_report(deleted: &[String]) -> Option<String> {
    if deleted.is_empty() {
        return None;
    }
    Some(format!("DELETED PRODUCTS: {}", deleted.join(VALUE_SEPARATOR)))
}

/// Union of all partial pairs; values under a repeated key are concatenated
/// in arrival order.
pub fn merge_pairs(pairs: impl IntoIterator<Item = KeyValue>) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for KeyValue { key, value } in pairs {
        merged
            .entry(key)
            .and_modify(|existing| {
                existing.push_str(VALUE_SEPARATOR);
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    merged
}

/// Sum the quantities of a merged `AGGREGATE_SALES_BY_PRODUCT_NAME` result.
pub fn total_sales(merged: &BTreeMap<String, String>) -> u64 {
    merged
        .values()
        .flat_map(|v| v.split(VALUE_SEPARATOR))
        .filter_map(|line| line.rsplit_once(" = "))
        .filter_map(|(_, qty)| qty.trim().parse::<u64>().ok())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Product;

    fn stores() -> Vec<Store> {
        let mut pizza = Store::new("PizzaWorld", "pizzeria", 37.9838, 23.7275)
            .with_products(vec![Product::new("Pepperoni", "pizza", 100, 10.0)])
            .with_rating(4, 10);
        pizza.purchase("Pepperoni", 3).unwrap();

        let souvlaki = Store::new("SouvlakiKing", "souvlaki", 40.6401, 22.9444)
            .with_products(vec![Product::new("Gyros", "wrap", 50, 3.5)])
            .with_rating(2, 5);

        let empty = Store::new("Nothing", "Pizzeria", 37.99, 23.73);
        vec![pizza, souvlaki, empty]
    }

    #[test]
    fn test_search_category_case_insensitive() {
        let agg = Aggregation::parse(&Command::Search, "FoodCategory=PIZZERIA").unwrap();
        let pairs = agg.map(&stores(), &[]).unwrap();
        let names: Vec<_> = pairs.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(names, vec!["PizzaWorld", "Nothing"]);
        let found = Store::from_json(&pairs[0].value).unwrap();
        assert_eq!(found.name, "PizzaWorld");
    }

    #[test]
    fn test_filter_keys_case_insensitive() {
        let agg = Aggregation::parse(&Command::Search, "foodcategory=pizzeria").unwrap();
        assert_eq!(agg.map(&stores(), &[]).unwrap().len(), 2);
        let agg = Aggregation::parse(&Command::Search, "STARS=3").unwrap();
        assert_eq!(agg.map(&stores(), &[]).unwrap().len(), 1);
        assert!(Aggregation::parse(&Command::Search, "avgPrice=1").is_ok());
    }

    #[test]
    fn test_search_min_stars_and_tier() {
        let agg = Aggregation::parse(&Command::Search, "Stars=3").unwrap();
        assert_eq!(agg.map(&stores(), &[]).unwrap().len(), 1);

        let agg = Aggregation::parse(&Command::Search, "AvgPrice=1").unwrap();
        let pairs = agg.map(&stores(), &[]).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key, "SouvlakiKing");

        // The no-products sentinel never matches a numeric tier
        let agg = Aggregation::parse(&Command::Search, "AvgPrice=$$").unwrap();
        let pairs = agg.map(&stores(), &[]).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key, "PizzaWorld");
    }

    #[test]
    fn test_search_radius() {
        let agg = Aggregation::parse(&Command::Search, "Radius=5,23.7275,37.9838").unwrap();
        let pairs = agg.map(&stores(), &[]).unwrap();
        let names: Vec<_> = pairs.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(names, vec!["PizzaWorld", "Nothing"]);

        let agg = Aggregation::parse(&Command::Search, "Radius=0.5,23.7275,37.9838").unwrap();
        assert_eq!(agg.map(&stores(), &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_search_rejects_bad_filters() {
        for payload in ["", "FoodCategory", "Stars=many", "AvgPrice=4", "Radius=1,2", "Color=red"] {
            assert!(
                Aggregation::parse(&Command::Search, payload).is_err(),
                "accepted {:?}",
                payload
            );
        }
    }

    #[test]
    fn test_sales_by_product() {
        let agg = Aggregation::parse(
            &Command::AggregateSalesByProductName,
            "ProductName=Pepperoni",
        )
        .unwrap();
        let pairs = agg.map(&stores(), &[]).unwrap();
        assert_eq!(
            pairs,
            vec![KeyValue::new("PizzaWorld", "PizzaWorld: Pepperoni = 3")]
        );
        assert!(Aggregation::parse(&Command::AggregateSalesByProductName, "Pepperoni").is_err());
    }

    #[test]
    fn test_list_and_deleted() {
        let pairs = Aggregation::ListStores.map(&stores(), &[]).unwrap();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|p| p.key == "LIST_STORES"));

        assert!(Aggregation::DeletedProducts.map(&stores(), &[]).unwrap().is_empty());
        let deleted = vec!["Gyros".to_string(), "Salad".to_string()];
        let pairs = Aggregation::DeletedProducts.map(&stores(), &deleted).unwrap();
        assert_eq!(pairs[0].value, "DELETED PRODUCTS: Gyros, Salad");
    }

    #[test]
    fn test_merge_concatenates_duplicates() {
        let merged = merge_pairs(vec![
            KeyValue::new("LIST_STORES", "A"),
            KeyValue::new("X", "1"),
            KeyValue::new("LIST_STORES", "B"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["LIST_STORES"], "A, B");
        assert_eq!(merged["X"], "1");
    }

    #[test]
    fn test_total_sales() {
        let merged = merge_pairs(vec![
            KeyValue::new("PizzaWorld", "PizzaWorld: Pepperoni = 3"),
            KeyValue::new("Other", "Other: Pepperoni = 12"),
        ]);
        assert_eq!(total_sales(&merged), 15);
        assert_eq!(total_sales(&BTreeMap::new()), 0);
    }
}
