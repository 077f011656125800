//! Price catalog used at checkout.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use domain::{Money, ProductType};
use serde::Deserialize;

use crate::error::SagaError;

/// Trait for looking up the current unit price of a product.
#[async_trait]
pub trait PriceCatalog: Send + Sync {
    async fn unit_price(
        &self,
        product_type: ProductType,
        product_id: &str,
    ) -> Result<Money, SagaError>;
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    product_type: ProductType,
    product_id: String,
    price_cents: i64,
}

/// Fixed price list held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    prices: HashMap<(ProductType, String), Money>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(
        mut self,
        product_type: ProductType,
        product_id: impl Into<String>,
        price: Money,
    ) -> Self {
        self.prices.insert((product_type, product_id.into()), price);
        self
    }

    /// Parses a JSON array of `{product_type, product_id, price_cents}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
        Ok(Self {
            prices: entries
                .into_iter()
                .map(|e| ((e.product_type, e.product_id), Money::from_cents(e.price_cents)))
                .collect(),
        })
    }

    /// Loads a JSON price list from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SagaError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SagaError::InvalidPayload(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        Ok(Self::from_json(&json)?)
    }

    /// A small price list for local runs.
    pub fn sample() -> Self {
        Self::new()
            .with_price(ProductType::Clothes, "TSHIRT-M", Money::from_cents(5000))
            .with_price(ProductType::Clothes, "HOODIE-L", Money::from_cents(8900))
            .with_price(ProductType::Sample, "SAMPLE-1", Money::from_cents(199))
            .with_price(ProductType::Pack, "PACK-01", Money::from_cents(2900))
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[async_trait]
impl PriceCatalog for InMemoryCatalog {
    async fn unit_price(
        &self,
        product_type: ProductType,
        product_id: &str,
    ) -> Result<Money, SagaError> {
        self.prices
            .get(&(product_type, product_id.to_string()))
            .copied()
            .ok_or_else(|| SagaError::ProductNotFound {
                product_type,
                product_id: product_id.to_string(),
            })
    }
}
