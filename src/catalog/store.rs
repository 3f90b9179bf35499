//! Store and product records
//!
//! JSON field names match the documents managers submit with `ADD_STORE`
//! and `ADD_PRODUCT` (`StoreName`, `Products`, `Available Amount`, ...).
//! Derived fields (average price, price tier) are recomputed on load and
//! whenever the product list changes; they are never trusted from input.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A product offered by one store. Names are unique within a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "ProductName")]
    pub name: String,

    #[serde(rename = "ProductType", default)]
    pub category: String,

    #[serde(rename = "Available Amount", default)]
    pub available: u32,

    #[serde(rename = "Price", default)]
    pub price: f64,
}

impl Product {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        available: u32,
        price: f64,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            available,
            price,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let product: Product = serde_json::from_str(json.trim())?;
        if product.name.trim().is_empty() {
            return Err(Error::invalid_payload("ADD_PRODUCT", "missing ProductName"));
        }
        if !product.price.is_finite() || product.price < 0.0 {
            return Err(Error::invalid_payload("ADD_PRODUCT", "price must be non-negative"));
        }
        Ok(product)
    }
}

/// Average-price bucket of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PriceTier {
    #[serde(rename = "$")]
    Low,
    #[serde(rename = "$$")]
    Medium,
    #[serde(rename = "$$$")]
    High,
    #[default]
    #[serde(rename = "Not any products in the store")]
    NoProducts,
}

impl PriceTier {
    pub fn from_average(average: Option<f64>) -> Self {
        match average {
            None => PriceTier::NoProducts,
            Some(avg) if avg < 5.0 => PriceTier::Low,
            Some(avg) if avg < 15.0 => PriceTier::Medium,
            Some(_) => PriceTier::High,
        }
    }

    /// Number of `$` signs, or `None` for the no-products sentinel.
    pub fn dollars(&self) -> Option<usize> {
        match self {
            PriceTier::Low => Some(1),
            PriceTier::Medium => Some(2),
            PriceTier::High => Some(3),
            PriceTier::NoProducts => None,
        }
    }
}

impl fmt::Display for PriceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dollars() {
            Some(n) => f.write_str(&"$".repeat(n)),
            None => f.write_str("Not any products in the store"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "StoreName")]
    pub name: String,

    #[serde(rename = "Latitude", default)]
    pub latitude: f64,

    #[serde(rename = "Longitude", default)]
    pub longitude: f64,

    #[serde(rename = "FoodCategory", default)]
    pub category: String,

    #[serde(rename = "Stars", default)]
    pub stars: u32,

    #[serde(rename = "NoOfVotes", default)]
    pub votes: u32,

    #[serde(rename = "StoreLogo", default)]
    pub logo: String,

    #[serde(rename = "Products", default)]
    pub products: Vec<Product>,

    #[serde(rename = "TotalRevenue", default)]
    pub revenue: f64,

    /// Product name -> cumulative quantity sold
    #[serde(rename = "Sales", default)]
    pub sales: BTreeMap<String, u64>,

    #[serde(rename = "AveragePrice", default)]
    average_price: f64,

    #[serde(rename = "AveragePriceSymbol", default)]
    price_tier: PriceTier,
}

impl Store {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            category: category.into(),
            stars: 0,
            votes: 0,
            logo: String::new(),
            products: Vec::new(),
            revenue: 0.0,
            sales: BTreeMap::new(),
            average_price: 0.0,
            price_tier: PriceTier::NoProducts,
        }
    }

    pub fn with_products(mut self, products: Vec<Product>) -> Self {
        self.products = products;
        self.refresh_pricing();
        self
    }

    pub fn with_rating(mut self, stars: u32, votes: u32) -> Self {
        self.stars = stars;
        self.votes = votes;
        self
    }

    /// Parse a store document and recompute its derived fields.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut store: Store = serde_json::from_str(json.trim())?;
        store.name = store.name.trim().to_string();
        if store.name.is_empty() {
            return Err(Error::invalid_payload("ADD_STORE", "missing StoreName"));
        }
        let mut seen = std::collections::HashSet::new();
        for product in &store.products {
            if !seen.insert(product.name.as_str()) {
                return Err(Error::ProductExists {
                    store: store.name.clone(),
                    product: product.name.clone(),
                });
            }
        }
        store.refresh_pricing();
        Ok(store)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn average_price(&self) -> f64 {
        self.average_price
    }

    pub fn price_tier(&self) -> PriceTier {
        self.price_tier
    }

    /// Recompute the mean product price and its tier.
    pub fn refresh_pricing(&mut self) {
        if self.products.is_empty() {
            self.average_price = 0.0;
            self.price_tier = PriceTier::NoProducts;
            return;
        }
        let sum: f64 = self.products.iter().map(|p| p.price).sum();
        self.average_price = sum / self.products.len() as f64;
        self.price_tier = PriceTier::from_average(Some(self.average_price));
    }

    pub fn product(&self, name: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.name == name)
    }

    fn product_mut(&mut self, name: &str) -> Result<&mut Product> {
        let store = self.name.clone();
        self.products
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or(Error::ProductNotFound {
                store,
                product: name.to_string(),
            })
    }

    /// Sell `quantity` units. Returns the remaining stock.
    ///
    /// Fails without side effects if the product is unknown or stock is short.
    pub fn purchase(&mut self, product_name: &str, quantity: u32) -> Result<u32> {
        let product = self.product_mut(product_name)?;
        if quantity == 0 {
            return Ok(product.available);
        }
        if product.available < quantity {
            return Err(Error::InsufficientStock {
                product: product_name.to_string(),
                requested: quantity,
                available: product.available,
            });
        }
        product.available -= quantity;
        let remaining = product.available;
        let price = product.price;

        self.revenue += f64::from(quantity) * price;
        *self.sales.entry(product_name.to_string()).or_insert(0) += u64::from(quantity);
        Ok(remaining)
    }

    /// Fold one rating into the running average (integer floor).
    pub fn apply_review(&mut self, rating: u32) {
        let sum = u64::from(self.stars) * u64::from(self.votes) + u64::from(rating);
        let votes = u64::from(self.votes) + 1;
        self.stars = (sum / votes) as u32;
        self.votes += 1;
    }

    pub fn add_product(&mut self, product: Product) -> Result<()> {
        if self.product(&product.name).is_some() {
            return Err(Error::ProductExists {
                store: self.name.clone(),
                product: product.name,
            });
        }
        self.products.push(product);
        self.refresh_pricing();
        Ok(())
    }

    pub fn remove_product(&mut self, name: &str) -> Result<Product> {
        let idx = self
            .products
            .iter()
            .position(|p| p.name == name)
            .ok_or(Error::ProductNotFound {
                store: self.name.clone(),
                product: name.to_string(),
            })?;
        let removed = self.products.remove(idx);
        self.refresh_pricing();
        Ok(removed)
    }

    pub fn set_amount(&mut self, name: &str, amount: u32) -> Result<()> {
        self.product_mut(name)?.available = amount;
        Ok(())
    }

    /// Returns the new stock level.
    pub fn increment_amount(&mut self, name: &str, by: u32) -> Result<u32> {
        let product = self.product_mut(name)?;
        product.available = product.available.checked_add(by).ok_or_else(|| {
            Error::invalid_payload("INCREMENT_PRODUCT_AMOUNT", "amount overflow")
        })?;
        Ok(product.available)
    }

    /// Returns the new stock level. Refuses to go below zero.
    pub fn decrement_amount(&mut self, name: &str, by: u32) -> Result<u32> {
        let product = self.product_mut(name)?;
        if by > product.available {
            return Err(Error::InsufficientStock {
                product: name.to_string(),
                requested: by,
                available: product.available,
            });
        }
        product.available -= by;
        Ok(product.available)
    }

    /// Units of `product` sold so far, if any were.
    pub fn sales_for(&self, product: &str) -> Option<u64> {
        self.sales.get(product).copied().filter(|&qty| qty > 0)
    }

    /// Great-circle distance in km from this store to (`latitude`, `longitude`).
    pub fn distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        haversine_km(self.latitude, self.longitude, latitude, longitude)
    }
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}
