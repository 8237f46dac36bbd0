//! Line items exchanged between the order and stock services.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ProductId;

/// Opaque price identifier resolved from the external pricing provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceReference(String);

impl PriceReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for PriceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PriceReference {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PriceReference {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Errors raised when a line item fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("product id is empty")]
    EmptyProductId,

    #[error("price reference is empty for product {product_id}")]
    EmptyPriceReference { product_id: ProductId },

    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: i32 },

    #[error("total quantity for product {product_id} overflows")]
    QuantityOverflow { product_id: ProductId },
}

/// A reservation request line: which product, how many.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemWithQuantity {
    pub product_id: ProductId,
    pub quantity: i32,
}

impl ItemWithQuantity {
    pub fn new(product_id: impl Into<ProductId>, quantity: i32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }

    /// Creates a line, rejecting an empty product id or a negative quantity.
    pub fn new_valid(product_id: impl Into<ProductId>, quantity: i32) -> Result<Self, ItemError> {
        let line = Self::new(product_id, quantity);
        line.validate()?;
        Ok(line)
    }

    pub fn validate(&self) -> Result<(), ItemError> {
        if self.product_id.is_empty() {
            return Err(ItemError::EmptyProductId);
        }
        if self.quantity < 0 {
            return Err(ItemError::InvalidQuantity {
                product_id: self.product_id.clone(),
                quantity: self.quantity,
            });
        }
        Ok(())
    }
}

/// A priced line item snapshot, as stored on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub product_id: ProductId,
    pub display_name: String,
    pub quantity: i32,
    pub price_reference: PriceReference,
}

impl Item {
    pub fn new(
        product_id: impl Into<ProductId>,
        display_name: impl Into<String>,
        quantity: i32,
        price_reference: impl Into<PriceReference>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            display_name: display_name.into(),
            quantity,
            price_reference: price_reference.into(),
        }
    }

    /// An item is valid once its product id and price reference are known.
    pub fn validate(&self) -> Result<(), ItemError> {
        if self.product_id.is_empty() {
            return Err(ItemError::EmptyProductId);
        }
        if self.price_reference.is_empty() {
            return Err(ItemError::EmptyPriceReference {
                product_id: self.product_id.clone(),
            });
        }
        if self.quantity < 0 {
            return Err(ItemError::InvalidQuantity {
                product_id: self.product_id.clone(),
                quantity: self.quantity,
            });
        }
        Ok(())
    }
}

/// Merges lines that reference the same product by summing their quantities.
///
/// Splitting one large request into several duplicate lines must not slip
/// past the stock check, so every reservation is normalised through here.
/// The result is ordered by product id. Fails if a product's total does not
/// fit in an `i32`.
pub fn merge_items(items: &[ItemWithQuantity]) -> Result<Vec<ItemWithQuantity>, ItemError> {
    let mut merged: BTreeMap<&ProductId, i32> = BTreeMap::new();
    for item in items {
        let total = merged.entry(&item.product_id).or_insert(0);
        *total = total
            .checked_add(item.quantity)
            .ok_or_else(|| ItemError::QuantityOverflow {
                product_id: item.product_id.clone(),
            })?;
    }
    Ok(merged
        .into_iter()
        .map(|(product_id, quantity)| ItemWithQuantity {
            product_id: product_id.clone(),
            quantity,
        })
        .collect())
}
