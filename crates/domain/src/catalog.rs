//! Product pricing capability.

use std::collections::HashMap;

use async_trait::async_trait;
use common::Money;

use crate::order::{LineRequest, OrderError, OrderLine, ProductId};

/// Source of current unit prices.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn price_of(&self, product_id: &ProductId) -> Option<Money>;
}

/// Prices every requested line, failing on the first unknown product.
pub async fn price_lines<C>(catalog: &C, requests: &[LineRequest]) -> Result<Vec<OrderLine>, OrderError>
where
    C: ProductCatalog + ?Sized,
{
    let mut lines = Vec::with_capacity(requests.len());
    for request in requests {
        let unit_price =
            catalog
                .price_of(&request.product_id)
                .await
                .ok_or_else(|| OrderError::UnknownProduct {
                    product_id: request.product_id.to_string(),
                })?;
        lines.push(OrderLine {
            product_id: request.product_id.clone(),
            quantity: request.quantity,
            unit_price,
        });
    }
    Ok(lines)
}

/// Fixed price list held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    prices: HashMap<ProductId, Money>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_prices<I, P>(prices: I) -> Self
    where
        I: IntoIterator<Item = (P, Money)>,
        P: Into<ProductId>,
    {
        Self {
            prices: prices.into_iter().map(|(p, m)| (p.into(), m)).collect(),
        }
    }

    /// Parses a JSON object of product id to price in cents.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let cents: HashMap<String, i64> = serde_json::from_str(json)?;
        Ok(Self::from_prices(
            cents.into_iter().map(|(p, c)| (p, Money::from_cents(c))),
        ))
    }

    pub fn with_price(mut self, product_id: impl Into<ProductId>, price: Money) -> Self {
        self.prices.insert(product_id.into(), price);
        self
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn price_of(&self, product_id: &ProductId) -> Option<Money> {
        self.prices.get(product_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prices_known_products() {
        let catalog = InMemoryCatalog::new()
            .with_price("A", Money::from_cents(1000))
            .with_price("B", Money::from_cents(500));

        let lines = price_lines(&catalog, &[LineRequest::new("A", 1), LineRequest::new("B", 2)])
            .await
            .unwrap();

        let total: Money = lines.iter().map(OrderLine::line_total).sum();
        assert_eq!(total, Money::from_cents(2000));
    }

    #[tokio::test]
    async fn unknown_product_is_rejected() {
        let catalog = InMemoryCatalog::new().with_price("A", Money::from_cents(1000));
        let result = price_lines(&catalog, &[LineRequest::new("missing", 1)]).await;
        assert!(matches!(result, Err(OrderError::UnknownProduct { .. })));
    }

    #[test]
    fn loads_from_json() {
        let catalog = InMemoryCatalog::from_json(r#"{"SKU-1": 1299, "SKU-2": 50}"#).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(InMemoryCatalog::from_json("[1, 2]").is_err());
    }
}
