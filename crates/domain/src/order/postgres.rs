use async_trait::async_trait;
use common::{CustomerId, Item, OrderId};
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};

use super::{Order, OrderRepository, OrderStatus, TransitionFn, repository::ensure_forward};
use crate::error::{DomainError, Result};

/// PostgreSQL-backed order repository over the `o_order` table.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a new PostgreSQL order repository.
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

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let status = status.parse::<OrderStatus>().map_err(DomainError::Storage)?;
        let Json(items): Json<Vec<Item>> = row.try_get("items")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id")?),
            customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
            status,
            payment_link: row.try_get("payment_link")?,
            items,
        })
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn create(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO o_order (id, customer_id, status, payment_link, items)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.customer_id.as_str())
        .bind(order.status.as_str())
        .bind(order.payment_link.as_deref())
        .bind(Json(&order.items))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, order_id: OrderId, customer_id: &CustomerId) -> Result<Order> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, status, payment_link, items
            FROM o_order
            WHERE id = $1 AND customer_id = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(customer_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_order(row),
            None => Err(DomainError::NotFound { order_id }),
        }
    }

    #[tracing::instrument(skip(self, transition))]
    async fn update(
        &self,
        order_id: OrderId,
        customer_id: &CustomerId,
        transition: TransitionFn,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, customer_id, status, payment_link, items
            FROM o_order
            WHERE id = $1 AND customer_id = $2
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(customer_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(DomainError::NotFound { order_id });
        };
        let current = Self::row_to_order(row)?;

        // Dropping the transaction on error rolls it back.
        let updated = ensure_forward(&current, transition(current.clone())?)?;

        sqlx::query(
            r#"
            UPDATE o_order
            SET status = $1, payment_link = $2, items = $3, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(updated.status.as_str())
        .bind(updated.payment_link.as_deref())
        .bind(Json(&updated.items))
        .bind(order_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }
}
