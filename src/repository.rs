//! Order repository.
//!
//! Single source of truth for order state. One document per order, items
//! embedded, keyed by order id. Backends: an in-memory map (default, also the
//! test double) and a Redis document store selected via configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use tracing::{info, instrument};

use crate::errors::ServiceError;
use crate::models::{Order, OrderStatus, StatusSource};

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Writes a new order. Calling twice with identical content is idempotent;
    /// an existing order with differing content is a conflict, never a silent
    /// overwrite.
    async fn create(&self, order: Order) -> Result<(), ServiceError>;

    async fn get(&self, order_id: &str) -> Result<Option<Order>, ServiceError>;

    /// Applies a guarded status transition and refreshes `updated_at`.
    async fn update_status(
        &self,
        order_id: &str,
        requested: OrderStatus,
        source: StatusSource,
    ) -> Result<Order, ServiceError>;

    /// Stores the gateway-issued token and promotes the order from
    /// awaiting_gateway to pending_payment in one write.
    async fn attach_payment_token(
        &self,
        order_id: &str,
        token: &str,
    ) -> Result<Order, ServiceError>;

    async fn list_by_table(&self, table_number: &str) -> Result<Vec<Order>, ServiceError>;
    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, ServiceError>;
    async fn list_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, ServiceError>;
}

fn sort_newest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

/// In-memory repository. The default backend, and what the integration tests
/// run against.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<String, Order>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn create(&self, order: Order) -> Result<(), ServiceError> {
        if let Some(existing) = self.orders.get(&order.order_id) {
            if existing.content_eq(&order) {
                return Ok(());
            }
            return Err(ServiceError::Conflict(format!(
                "order {} already exists with different content",
                order.order_id
            )));
        }
        info!(order_id = %order.order_id, status = %order.status, "order persisted");
        self.orders.insert(order.order_id.clone(), order);
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(order_id).map(|entry| entry.clone()))
    }

    #[instrument(skip(self), fields(%order_id, requested = %requested))]
    async fn update_status(
        &self,
        order_id: &str,
        requested: OrderStatus,
        source: StatusSource,
    ) -> Result<Order, ServiceError> {
        let mut entry = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;
        let next = entry.status.transition_to(requested, source)?;
        entry.status = next;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn attach_payment_token(
        &self,
        order_id: &str,
        token: &str,
    ) -> Result<Order, ServiceError> {
        let mut entry = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;
        let next = entry
            .status
            .transition_to(OrderStatus::PendingPayment, StatusSource::Gateway)?;
        entry.status = next;
        entry.payment_token = Some(token.to_string());
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn list_by_table(&self, table_number: &str) -> Result<Vec<Order>, ServiceError> {
        Ok(sort_newest_first(
            self.orders
                .iter()
                .filter(|entry| entry.customer.table_number == table_number)
                .map(|entry| entry.clone())
                .collect(),
        ))
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, ServiceError> {
        Ok(sort_newest_first(
            self.orders
                .iter()
                .filter(|entry| entry.status == status)
                .map(|entry| entry.clone())
                .collect(),
        ))
    }

    async fn list_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, ServiceError> {
        Ok(sort_newest_first(
            self.orders
                .iter()
                .filter(|entry| entry.created_at >= from && entry.created_at <= to)
                .map(|entry| entry.clone())
                .collect(),
        ))
    }
}

/// Redis-backed document store: one JSON document per order plus index sets
/// for the read queries.
pub struct RedisOrderRepository {
    conn: redis::aio::ConnectionManager,
    namespace: String,
}

impl RedisOrderRepository {
    pub async fn connect(client: &redis::Client, namespace: String) -> Result<Self, ServiceError> {
        let conn = client
            .get_tokio_connection_manager()
            .await
            .map_err(|e| ServiceError::Persistence(format!("redis connect failed: {e}")))?;
        Ok(Self { conn, namespace })
    }

    fn order_key(&self, order_id: &str) -> String {
        format!("{}:order:{}", self.namespace, order_id)
    }

    fn table_key(&self, table_number: &str) -> String {
        format!("{}:table:{}", self.namespace, table_number)
    }

    fn status_key(&self, status: OrderStatus) -> String {
        format!("{}:status:{}", self.namespace, status.as_str())
    }

    fn timeline_key(&self) -> String {
        format!("{}:timeline", self.namespace)
    }

    async fn read(&self, order_id: &str) -> Result<Option<Order>, ServiceError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.order_key(order_id))
            .await
            .map_err(persistence)?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(ServiceError::from))
            .transpose()
    }

    async fn write(&self, order: &Order) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(order)?;
        let _: () = conn
            .set(self.order_key(&order.order_id), raw)
            .await
            .map_err(persistence)?;
        Ok(())
    }

    async fn fetch_many(&self, ids: Vec<String>) -> Result<Vec<Order>, ServiceError> {
        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = self.read(&id).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }
}

fn persistence(err: redis::RedisError) -> ServiceError {
    ServiceError::Persistence(format!("redis error: {err}"))
}

#[async_trait]
impl OrderRepository for RedisOrderRepository {
    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn create(&self, order: Order) -> Result<(), ServiceError> {
        if let Some(existing) = self.read(&order.order_id).await? {
            if existing.content_eq(&order) {
                return Ok(());
            }
            return Err(ServiceError::Conflict(format!(
                "order {} already exists with different content",
                order.order_id
            )));
        }

        self.write(&order).await?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .sadd(self.table_key(&order.customer.table_number), &order.order_id)
            .await
            .map_err(persistence)?;
        let _: () = conn
            .sadd(self.status_key(order.status), &order.order_id)
            .await
            .map_err(persistence)?;
        let _: () = conn
            .zadd(
                self.timeline_key(),
                &order.order_id,
                order.created_at.timestamp_millis(),
            )
            .await
            .map_err(persistence)?;
        info!(order_id = %order.order_id, status = %order.status, "order persisted");
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>, ServiceError> {
        self.read(order_id).await
    }

    #[instrument(skip(self), fields(%order_id, requested = %requested))]
    async fn update_status(
        &self,
        order_id: &str,
        requested: OrderStatus,
        source: StatusSource,
    ) -> Result<Order, ServiceError> {
        let mut order = self
            .read(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;
        let old_status = order.status;
        order.status = order.status.transition_to(requested, source)?;
        order.updated_at = Utc::now();
        self.write(&order).await?;

        if old_status != order.status {
            let mut conn = self.conn.clone();
            let _: () = conn
                .srem(self.status_key(old_status), order_id)
                .await
                .map_err(persistence)?;
            let _: () = conn
                .sadd(self.status_key(order.status), order_id)
                .await
                .map_err(persistence)?;
        }
        Ok(order)
    }

    async fn attach_payment_token(
        &self,
        order_id: &str,
        token: &str,
    ) -> Result<Order, ServiceError> {
        let mut order = self
            .read(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;
        let old_status = order.status;
        order.status = order
            .status
            .transition_to(OrderStatus::PendingPayment, StatusSource::Gateway)?;
        order.payment_token = Some(token.to_string());
        order.updated_at = Utc::now();
        self.write(&order).await?;

        if old_status != order.status {
            let mut conn = self.conn.clone();
            let _: () = conn
                .srem(self.status_key(old_status), order_id)
                .await
                .map_err(persistence)?;
            let _: () = conn
                .sadd(self.status_key(order.status), order_id)
                .await
                .map_err(persistence)?;
        }
        Ok(order)
    }

    async fn list_by_table(&self, table_number: &str) -> Result<Vec<Order>, ServiceError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(self.table_key(table_number))
            .await
            .map_err(persistence)?;
        Ok(sort_newest_first(self.fetch_many(ids).await?))
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, ServiceError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(self.status_key(status))
            .await
            .map_err(persistence)?;
        Ok(sort_newest_first(self.fetch_many(ids).await?))
    }

    async fn list_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, ServiceError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.timeline_key())
            .arg(from.timestamp_millis())
            .arg(to.timestamp_millis())
            .query_async(&mut conn)
            .await
            .map_err(persistence)?;
        Ok(sort_newest_first(self.fetch_many(ids).await?))
    }
}
