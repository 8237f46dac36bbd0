use common::{Code, ProductId, StatusCode};
use thiserror::Error;

/// A line that could not be satisfied from current stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub product_id: ProductId,
    pub requested: i32,
    pub available: i32,
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (requested {}, available {})",
            self.product_id, self.requested, self.available
        )
    }
}

fn join_shortfalls(failed_on: &[Shortfall]) -> String {
    failed_on
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur when reading or reserving stock.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Malformed or empty reservation request.
    #[error("Invalid reservation request: {0}")]
    Validation(String),

    /// At least one line exceeds the available quantity; nothing was applied.
    #[error("Insufficient stock: {}", join_shortfalls(.failed_on))]
    InsufficientStock { failed_on: Vec<Shortfall> },

    /// An optimistic update found a row at a different version than it read.
    #[error("Stock record {product_id} changed concurrently (expected version {expected_version})")]
    VersionConflict {
        product_id: ProductId,
        expected_version: i64,
    },

    /// The optimistic strategy kept losing races and gave up.
    #[error("Stock reservation lost {attempts} optimistic races in a row")]
    Contention { attempts: u32 },

    /// The pricing provider could not resolve a price reference.
    #[error("Pricing lookup failed for product {product_id}: {reason}")]
    PricingLookup {
        product_id: ProductId,
        reason: String,
    },

    /// Requested products have no stock record.
    #[error("Products not found: {}", .missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    ProductsNotFound { missing: Vec<ProductId> },

    /// The advisory lock is held elsewhere or its backend is unreachable.
    #[error("Advisory lock unavailable for key {key}: {reason}")]
    LockUnavailable { key: String, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StatusCode for InventoryError {
    fn code(&self) -> Code {
        match self {
            InventoryError::Validation(_) => Code::InvalidArgument,
            InventoryError::InsufficientStock { .. } => Code::FailedPrecondition,
            InventoryError::VersionConflict { .. } | InventoryError::Contention { .. } => {
                Code::Aborted
            }
            InventoryError::ProductsNotFound { .. } => Code::NotFound,
            InventoryError::PricingLookup { .. }
            | InventoryError::LockUnavailable { .. }
            | InventoryError::Database(_) => Code::Unavailable,
            InventoryError::Migration(_) => Code::Internal,
        }
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_lists_every_failed_line() {
        let err = InventoryError::InsufficientStock {
            failed_on: vec![
                Shortfall {
                    product_id: "sku-1".into(),
                    requested: 3,
                    available: 2,
                },
                Shortfall {
                    product_id: "sku-2".into(),
                    requested: 1,
                    available: 0,
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock: sku-1 (requested 3, available 2), sku-2 (requested 1, available 0)"
        );
        assert_eq!(err.code(), Code::FailedPrecondition);
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(InventoryError::Contention { attempts: 3 }.is_retryable());
        assert!(
            InventoryError::LockUnavailable {
                key: "k".into(),
                reason: "held".into()
            }
            .is_retryable()
        );
        assert!(
            InventoryError::PricingLookup {
                product_id: "sku-1".into(),
                reason: "timeout".into()
            }
            .is_retryable()
        );
        assert!(!InventoryError::Validation("empty".into()).is_retryable());
    }
}
