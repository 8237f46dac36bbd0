use async_trait::async_trait;
use common::{ItemWithQuantity, ProductId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    InventoryError, Result, StockRecord, VersionedDecrement, record::check_availability,
    store::InventoryStore,
};

/// PostgreSQL-backed inventory store over the `o_stock` table.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<StockRecord> {
        Ok(StockRecord {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: row.try_get("quantity")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn ids_of<'a, I>(product_ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a ProductId>,
    {
        let mut ids: Vec<String> = product_ids
            .into_iter()
            .map(|id| id.as_str().to_owned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Locks the targeted rows in product-id order for the rest of the transaction.
    async fn lock_rows(
        tx: &mut Transaction<'_, Postgres>,
        ids: &[String],
    ) -> Result<Vec<StockRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity, version, updated_at
            FROM o_stock
            WHERE product_id = ANY($1)
            ORDER BY product_id
            FOR UPDATE
            "#,
        )
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    #[tracing::instrument(skip(self))]
    async fn get_stock(&self, product_ids: &[ProductId]) -> Result<Vec<StockRecord>> {
        let ids = Self::ids_of(product_ids);
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity, version, updated_at
            FROM o_stock
            WHERE product_id = ANY($1)
            ORDER BY product_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    #[tracing::instrument(skip(self, requests), fields(lines = requests.len()))]
    async fn decrement_locked(&self, requests: &[ItemWithQuantity]) -> Result<()> {
        let ids = Self::ids_of(requests.iter().map(|r| &r.product_id));
        let mut tx = self.pool.begin().await?;

        let locked = Self::lock_rows(&mut tx, &ids).await?;
        check_availability(&locked, requests)?;

        for request in requests {
            let result = sqlx::query(
                r#"
                UPDATE o_stock
                SET quantity = quantity - $1, updated_at = NOW()
                WHERE product_id = $2 AND quantity >= $1
                "#,
            )
            .bind(request.quantity)
            .bind(request.product_id.as_str())
            .execute(&mut *tx)
            .await?;

            // Rows are locked, so this only trips if the check above was bypassed.
            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(InventoryError::InsufficientStock {
                    failed_on: vec![crate::Shortfall {
                        product_id: request.product_id.clone(),
                        requested: request.quantity,
                        available: 0,
                    }],
                });
            }
        }

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, updates), fields(lines = updates.len()))]
    async fn decrement_versioned(&self, updates: &[VersionedDecrement]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE o_stock
                SET quantity = quantity - $1, version = version + 1, updated_at = NOW()
                WHERE product_id = $2 AND version = $3 AND quantity >= $1
                "#,
            )
            .bind(update.quantity)
            .bind(update.product_id.as_str())
            .bind(update.expected_version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(InventoryError::VersionConflict {
                    product_id: update.product_id.clone(),
                    expected_version: update.expected_version,
                });
            }
        }

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn provision(&self, product_id: &ProductId, quantity: i32) -> Result<StockRecord> {
        if quantity < 0 {
            return Err(InventoryError::Validation(format!(
                "cannot provision negative quantity {quantity} for {product_id}"
            )));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO o_stock (product_id, quantity)
            VALUES ($1, $2)
            ON CONFLICT (product_id)
            DO UPDATE SET quantity = EXCLUDED.quantity,
                          version = o_stock.version + 1,
                          updated_at = NOW()
            RETURNING product_id, quantity, version, updated_at
            "#,
        )
        .bind(product_id.as_str())
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_record(row)
    }
}
