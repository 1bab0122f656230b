//! Cart store.
//!
//! Carts are keyed by a table-session key and owned by a single store; all
//! mutations go through it, so there is one writer per cart. Every successful
//! mutation persists a full snapshot through the [`CartStorage`] seam, and a
//! corrupt snapshot loads as an empty store rather than failing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{LineItem, OrderTotals, Variant};
use crate::pricing;

/// A menu entry as served by the external menu collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub image: String,
    #[serde(default)]
    pub description: String,
}

/// Lookup-by-id seam against the menu collaborator, used as a fallback when an
/// add-to-cart payload arrives incomplete.
#[async_trait]
pub trait MenuCatalog: Send + Sync {
    async fn get_item(&self, product_id: &str) -> Result<Option<MenuItem>, ServiceError>;
}

/// Catalog backed by a fixed in-memory listing (seeded from config at boot).
pub struct StaticMenuCatalog {
    items: HashMap<String, MenuItem>,
}

impl StaticMenuCatalog {
    pub fn new(items: Vec<MenuItem>) -> Self {
        Self {
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

#[async_trait]
impl MenuCatalog for StaticMenuCatalog {
    async fn get_item(&self, product_id: &str) -> Result<Option<MenuItem>, ServiceError> {
        Ok(self.items.get(product_id).cloned())
    }
}

/// One cart entry. Carries display fields (image, description) that do not
/// survive into the order snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub unit_price: i64,
    pub quantity: u32,
    pub image: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variant: Variant,
}

impl CartItem {
    pub fn identity(&self) -> (&str, &Variant) {
        (&self.product_id, &self.variant)
    }

    pub fn to_line_item(&self) -> LineItem {
        LineItem {
            product_id: self.product_id.clone(),
            name: self.name.clone(),
            unit_price: self.unit_price,
            quantity: self.quantity,
            variant: self.variant.clone(),
        }
    }
}

/// Ordered collection of cart items. Order is display order; totals do not
/// depend on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn line_items(&self) -> Vec<LineItem> {
        self.items.iter().map(CartItem::to_line_item).collect()
    }

    pub fn totals(&self) -> OrderTotals {
        pricing::totals(&self.line_items())
    }
}

/// Durable medium for cart snapshots. Swappable so the store does not care
/// whether snapshots live in a file, memory, or elsewhere.
#[async_trait]
pub trait CartStorage: Send + Sync {
    /// Loads the last snapshot. Implementations must treat a corrupt snapshot
    /// as absent (empty store), not as a failure.
    async fn load(&self) -> Result<HashMap<String, Cart>, ServiceError>;
    async fn persist(&self, snapshot: &HashMap<String, Cart>) -> Result<(), ServiceError>;
}

/// JSON-file snapshot storage.
pub struct JsonFileCartStorage {
    path: PathBuf,
}

impl JsonFileCartStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CartStorage for JsonFileCartStorage {
    async fn load(&self) -> Result<HashMap<String, Cart>, ServiceError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(ServiceError::Persistence(format!(
                    "failed to read cart snapshot {}: {e}",
                    self.path.display()
                )))
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding corrupt cart snapshot");
                Ok(HashMap::new())
            }
        }
    }

    async fn persist(&self, snapshot: &HashMap<String, Cart>) -> Result<(), ServiceError> {
        let raw = serde_json::to_vec(snapshot)?;
        tokio::fs::write(&self.path, raw).await.map_err(|e| {
            ServiceError::Persistence(format!(
                "failed to write cart snapshot {}: {e}",
                self.path.display()
            ))
        })
    }
}

/// In-memory snapshot storage, used in tests and when no snapshot path is
/// configured.
#[derive(Default)]
pub struct InMemoryCartStorage {
    snapshot: Mutex<Option<Vec<u8>>>,
}

impl InMemoryCartStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds the stored bytes, valid JSON or not.
    pub fn with_raw(raw: Vec<u8>) -> Self {
        Self {
            snapshot: Mutex::new(Some(raw)),
        }
    }
}

#[async_trait]
impl CartStorage for InMemoryCartStorage {
    async fn load(&self) -> Result<HashMap<String, Cart>, ServiceError> {
        let guard = self.snapshot.lock().await;
        let Some(raw) = guard.as_ref() else {
            return Ok(HashMap::new());
        };
        match serde_json::from_slice(raw) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!(error = %e, "discarding corrupt cart snapshot");
                Ok(HashMap::new())
            }
        }
    }

    async fn persist(&self, snapshot: &HashMap<String, Cart>) -> Result<(), ServiceError> {
        let raw = serde_json::to_vec(snapshot)?;
        *self.snapshot.lock().await = Some(raw);
        Ok(())
    }
}

/// Add-to-cart payload. May be complete (name + price + image) or just an id,
/// in which case the store resolves the rest from the catalog.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddItemInput {
    pub product_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit_price: Option<i64>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub variant: Variant,
}

impl AddItemInput {
    fn is_complete(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
            && self.image.as_deref().is_some_and(|i| !i.is_empty())
            && self.unit_price.is_some_and(|p| p >= 0)
    }
}

/// Owned, single-writer-per-cart state container.
pub struct CartStore {
    carts: DashMap<String, Cart>,
    storage: Arc<dyn CartStorage>,
    catalog: Arc<dyn MenuCatalog>,
    event_sender: EventSender,
}

impl CartStore {
    /// Loads the persisted snapshot and builds the store.
    pub async fn load(
        storage: Arc<dyn CartStorage>,
        catalog: Arc<dyn MenuCatalog>,
        event_sender: EventSender,
    ) -> Result<Self, ServiceError> {
        let snapshot = storage.load().await?;
        let carts = DashMap::new();
        for (key, cart) in snapshot {
            carts.insert(key, cart);
        }
        info!(carts = carts.len(), "cart store loaded");
        Ok(Self {
            carts,
            storage,
            catalog,
            event_sender,
        })
    }

    /// Adds an item, merging by (product id, variant) identity. Incomplete
    /// payloads fall back to a catalog lookup before failing NotFound.
    #[instrument(skip(self, input), fields(cart_key = %key, product_id = %input.product_id))]
    pub async fn add_item(&self, key: &str, input: AddItemInput) -> Result<Cart, ServiceError> {
        if input.product_id.is_empty() {
            return Err(ServiceError::Validation("item is missing an id".into()));
        }
        input.variant.validate()?;

        let item = if input.is_complete() {
            CartItem {
                product_id: input.product_id.clone(),
                name: input.name.clone().unwrap_or_default(),
                unit_price: input.unit_price.unwrap_or_default(),
                quantity: input.quantity.unwrap_or(1).max(1),
                image: input.image.clone().unwrap_or_default(),
                description: input.description.clone().unwrap_or_default(),
                variant: input.variant.clone(),
            }
        } else {
            let fetched = self
                .catalog
                .get_item(&input.product_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "menu item {} not found",
                        input.product_id
                    ))
                })?;
            CartItem {
                product_id: fetched.id,
                name: fetched.name,
                unit_price: fetched.price,
                quantity: input.quantity.unwrap_or(1).max(1),
                image: fetched.image,
                description: fetched.description,
                variant: input.variant.clone(),
            }
        };

        let cart = {
            let mut entry = self.carts.entry(key.to_string()).or_default();
            match entry
                .items
                .iter_mut()
                .find(|existing| existing.identity() == item.identity())
            {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(item.quantity);
                }
                None => entry.items.push(item.clone()),
            }
            entry.clone()
        };

        self.persist_or_log().await;
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_key: key.to_string(),
                product_id: item.product_id,
            })
            .await;
        Ok(cart)
    }

    /// Sets an item's quantity; zero or below removes the item.
    #[instrument(skip(self, variant), fields(cart_key = %key, %product_id))]
    pub async fn update_quantity(
        &self,
        key: &str,
        product_id: &str,
        variant: &Variant,
        quantity: i64,
    ) -> Result<Cart, ServiceError> {
        if quantity <= 0 {
            return self.remove_item(key, product_id, variant).await;
        }
        let quantity = u32::try_from(quantity)
            .map_err(|_| ServiceError::Validation("quantity out of range".into()))?;

        let cart = {
            let mut entry = self.carts.entry(key.to_string()).or_default();
            if let Some(existing) = entry
                .items
                .iter_mut()
                .find(|item| item.identity() == (product_id, variant))
            {
                existing.quantity = quantity;
            }
            entry.clone()
        };

        self.persist_or_log().await;
        Ok(cart)
    }

    /// Removes the matching item. Absent item is a no-op, not an error.
    pub async fn remove_item(
        &self,
        key: &str,
        product_id: &str,
        variant: &Variant,
    ) -> Result<Cart, ServiceError> {
        let cart = {
            let mut entry = self.carts.entry(key.to_string()).or_default();
            entry
                .items
                .retain(|item| item.identity() != (product_id, variant));
            entry.clone()
        };
        self.persist_or_log().await;
        Ok(cart)
    }

    /// Empties the cart (successful order placement, or explicit user action).
    pub async fn clear(&self, key: &str) -> Result<(), ServiceError> {
        self.carts.remove(key);
        self.persist_or_log().await;
        self.event_sender
            .send_or_log(Event::CartCleared {
                cart_key: key.to_string(),
            })
            .await;
        Ok(())
    }

    /// Returns the cart for a key; a key never seen yields an empty cart.
    pub fn get(&self, key: &str) -> Cart {
        self.carts
            .get(key)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Display totals, computed by the same engine the checkout validation
    /// uses.
    pub fn totals(&self, key: &str) -> OrderTotals {
        self.get(key).totals()
    }

    fn snapshot(&self) -> HashMap<String, Cart> {
        self.carts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    // Snapshot persistence is best-effort: the in-memory mutation has already
    // happened, matching the durable-medium-as-side-effect contract.
    async fn persist_or_log(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.storage.persist(&snapshot).await {
            warn!(error = %e, "cart snapshot persistence failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SpicyLevel;
    use tokio::sync::mpsc;

    fn events() -> EventSender {
        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        EventSender::new(tx)
    }

    async fn store() -> CartStore {
        store_with(Arc::new(InMemoryCartStorage::new()), StaticMenuCatalog::empty()).await
    }

    async fn store_with(storage: Arc<dyn CartStorage>, catalog: StaticMenuCatalog) -> CartStore {
        CartStore::load(storage, Arc::new(catalog), events())
            .await
            .unwrap()
    }

    fn complete_input(id: &str, variant: Variant) -> AddItemInput {
        AddItemInput {
            product_id: id.to_string(),
            name: Some(format!("item {id}")),
            unit_price: Some(12_000),
            image: Some("/img.png".to_string()),
            variant,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn adding_same_identity_merges_quantity() {
        let store = store().await;
        store
            .add_item("T1", complete_input("a", Variant::default()))
            .await
            .unwrap();
        let cart = store
            .add_item("T1", complete_input("a", Variant::default()))
            .await
            .unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn different_variant_is_a_distinct_entry() {
        let store = store().await;
        store
            .add_item("T1", complete_input("a", Variant::default()))
            .await
            .unwrap();
        let cart = store
            .add_item(
                "T1",
                complete_input(
                    "a",
                    Variant {
                        spicy_level: Some(SpicyLevel::Hot),
                        ..Default::default()
                    },
                ),
            )
            .await
            .unwrap();
        assert_eq!(cart.items.len(), 2);
    }

    #[tokio::test]
    async fn update_quantity_zero_removes_item() {
        let store = store().await;
        store
            .add_item("T1", complete_input("a", Variant::default()))
            .await
            .unwrap();
        let cart = store
            .update_quantity("T1", "a", &Variant::default(), 0)
            .await
            .unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn removing_absent_item_is_a_noop() {
        let store = store().await;
        let cart = store
            .remove_item("T1", "ghost", &Variant::default())
            .await
            .unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn incomplete_payload_falls_back_to_catalog() {
        let catalog = StaticMenuCatalog::new(vec![MenuItem {
            id: "nasi-goreng".to_string(),
            name: "Nasi Goreng".to_string(),
            price: 25_000,
            image: "/nasi.png".to_string(),
            description: String::new(),
        }]);
        let store = store_with(Arc::new(InMemoryCartStorage::new()), catalog).await;

        let cart = store
            .add_item(
                "T1",
                AddItemInput {
                    product_id: "nasi-goreng".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cart.items[0].name, "Nasi Goreng");
        assert_eq!(cart.items[0].unit_price, 25_000);

        let missing = store
            .add_item(
                "T1",
                AddItemInput {
                    product_id: "ghost".to_string(),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn corrupt_snapshot_loads_as_empty() {
        let storage = Arc::new(InMemoryCartStorage::with_raw(b"{not json!".to_vec()));
        let store = store_with(storage, StaticMenuCatalog::empty()).await;
        assert!(store.get("T1").is_empty());
    }

    #[tokio::test]
    async fn snapshot_survives_reload() {
        let storage: Arc<dyn CartStorage> = Arc::new(InMemoryCartStorage::new());
        {
            let store =
                CartStore::load(storage.clone(), Arc::new(StaticMenuCatalog::empty()), events())
                    .await
                    .unwrap();
            store
                .add_item("T2", complete_input("a", Variant::default()))
                .await
                .unwrap();
        }
        let reloaded =
            CartStore::load(storage, Arc::new(StaticMenuCatalog::empty()), events())
                .await
                .unwrap();
        assert_eq!(reloaded.get("T2").items.len(), 1);
    }

    #[tokio::test]
    async fn file_storage_round_trips_and_discards_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carts.json");

        let storage = JsonFileCartStorage::new(&path);
        let mut snapshot = HashMap::new();
        snapshot.insert(
            "T3".to_string(),
            Cart {
                items: vec![CartItem {
                    product_id: "a".to_string(),
                    name: "a".to_string(),
                    unit_price: 1_000,
                    quantity: 1,
                    image: "/a.png".to_string(),
                    description: String::new(),
                    variant: Variant::default(),
                }],
            },
        );
        storage.persist(&snapshot).await.unwrap();
        assert_eq!(storage.load().await.unwrap(), snapshot);

        tokio::fs::write(&path, b"garbage").await.unwrap();
        assert!(storage.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn totals_use_the_pricing_engine() {
        let store = store().await;
        let mut input = complete_input("a", Variant::default());
        input.unit_price = Some(15_000);
        input.quantity = Some(2);
        store.add_item("T4", input).await.unwrap();

        let totals = store.totals("T4");
        assert_eq!(totals.subtotal, 30_000);
        assert_eq!(totals.tax, 3_300);
        assert_eq!(totals.grand_total, 35_300);
    }
}
