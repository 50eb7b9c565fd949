use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::store::UserLocks;
use crate::traits::UserStore;
use crate::types::{CartItem, CartTotals, OrderRecord};

/// Why a cart operation or checkout was refused. Each variant carries enough
/// for the front-end to phrase a helpful reply via `user_message`.
#[derive(Debug)]
pub enum OrderError {
    EmptyCart,
    MissingAddress,
    InvalidQuantity { index: usize },
}

impl OrderError {
    /// A reply suitable for showing directly to the user.
    pub fn user_message(&self) -> String {
        match self {
            OrderError::EmptyCart => {
                "Your cart is empty. Use `!order` to browse restaurants first.".to_string()
            }
            OrderError::MissingAddress => {
                "I don't have a delivery address for you yet. Set one with `!address <your address>`.".to_string()
            }
            OrderError::InvalidQuantity { index } => {
                format!("There's no item #{} in your cart.", index + 1)
            }
        }
    }
}

impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderError::EmptyCart => write!(f, "cart is empty"),
            OrderError::MissingAddress => write!(f, "no delivery address on file"),
            OrderError::InvalidQuantity { index } => {
                write!(f, "invalid cart item index {}", index)
            }
        }
    }
}

impl std::error::Error for OrderError {}

/// Cart and checkout operations over the user store. A non-empty cart is
/// always scoped to exactly one restaurant.
pub struct CartLedger {
    store: Arc<dyn UserStore>,
    locks: Arc<UserLocks>,
    config: DeliveryConfig,
}

impl CartLedger {
    pub fn new(store: Arc<dyn UserStore>, locks: Arc<UserLocks>, config: DeliveryConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    /// Add an item. Switching restaurants replaces the whole cart; adding an
    /// item already present bumps its quantity instead of duplicating the line.
    pub async fn add_item(&self, user_id: &str, item: CartItem) -> Vec<CartItem> {
        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;

        if let Some(existing) = rec.cart.first() {
            if existing.restaurant != item.restaurant {
                info!(
                    user_id = %user_id,
                    from = %existing.restaurant,
                    to = %item.restaurant,
                    "Switching restaurants, replacing cart"
                );
                rec.cart.clear();
            }
        }

        match rec
            .cart
            .iter_mut()
            .find(|line| line.item_name == item.item_name)
        {
            Some(line) => line.quantity += item.quantity,
            None => rec.cart.push(item),
        }

        let cart = rec.cart.clone();
        self.store.put(user_id, rec).await;
        cart
    }

    /// Set the quantity of the item at `index` (zero-based). Zero removes the
    /// line.
    pub async fn update_quantity(
        &self,
        user_id: &str,
        index: usize,
        quantity: u32,
    ) -> Result<Vec<CartItem>, OrderError> {
        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        if index >= rec.cart.len() {
            return Err(OrderError::InvalidQuantity { index });
        }
        if quantity == 0 {
            rec.cart.remove(index);
        } else {
            rec.cart[index].quantity = quantity;
        }
        let cart = rec.cart.clone();
        self.store.put(user_id, rec).await;
        Ok(cart)
    }

    pub async fn clear(&self, user_id: &str) {
        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        rec.cart.clear();
        self.store.put(user_id, rec).await;
    }

    pub async fn view(&self, user_id: &str) -> (Vec<CartItem>, CartTotals) {
        let rec = self.store.get(user_id).await;
        let totals = compute_totals(&rec.cart, &self.config);
        (rec.cart, totals)
    }

    /// Place the order: validates cart and address, appends exactly one entry
    /// to the order history, and empties the cart.
    pub async fn checkout(
        &self,
        user_id: &str,
        payment_method: &str,
        special_instructions: &str,
    ) -> Result<OrderRecord, OrderError> {
        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;

        if rec.cart.is_empty() {
            warn!(user_id = %user_id, "Checkout refused: empty cart");
            return Err(OrderError::EmptyCart);
        }
        // An address of "" or whitespace (possible in hand-edited data files)
        // counts as missing.
        let has_address = rec
            .address
            .as_deref()
            .map(str::trim)
            .is_some_and(|a| !a.is_empty());
        if !has_address {
            warn!(user_id = %user_id, "Checkout refused: no address");
            return Err(OrderError::MissingAddress);
        }

        let totals = compute_totals(&rec.cart, &self.config);
        let now = Utc::now();
        let eta_minutes = rand::thread_rng().gen_range(30..=60);
        let order = OrderRecord {
            order_id: Uuid::new_v4().to_string(),
            restaurant: rec.cart[0].restaurant.clone(),
            items: std::mem::take(&mut rec.cart),
            subtotal: totals.subtotal,
            delivery_fee: totals.delivery_fee,
            tax: totals.tax,
            grand_total: totals.grand_total,
            payment_method: payment_method.to_string(),
            special_instructions: special_instructions.to_string(),
            placed_at: now,
            estimated_delivery: now + Duration::minutes(eta_minutes),
        };

        rec.order_history.push(order.clone());
        self.store.put(user_id, rec).await;
        info!(
            user_id = %user_id,
            order_id = %order.order_id,
            restaurant = %order.restaurant,
            total = order.grand_total,
            "Order placed"
        );
        Ok(order)
    }
}

/// Totals over the cart lines. Values stay unrounded; format with `{:.2}`
/// only when rendering.
pub fn compute_totals(cart: &[CartItem], config: &DeliveryConfig) -> CartTotals {
    let subtotal: f64 = cart.iter().map(CartItem::line_total).sum();
    let delivery_fee = if cart.is_empty() {
        0.0
    } else {
        config.delivery_fee
    };
    let tax = subtotal * config.tax_rate;
    CartTotals {
        subtotal,
        delivery_fee,
        tax,
        grand_total: subtotal + delivery_fee + tax,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;

    fn item(restaurant: &str, name: &str, price: f64, quantity: u32) -> CartItem {
        CartItem {
            restaurant: restaurant.to_string(),
            item_name: name.to_string(),
            unit_price: price,
            quantity,
        }
    }

    fn ledger_in(dir: &tempfile::TempDir) -> (CartLedger, Arc<dyn UserStore>) {
        let store: Arc<dyn UserStore> =
            Arc::new(JsonFileStore::new(dir.path().join("data.json")));
        let locks = Arc::new(UserLocks::new());
        (
            CartLedger::new(store.clone(), locks, DeliveryConfig::default()),
            store,
        )
    }

    #[test]
    fn totals_match_fee_and_tax_schedule() {
        let cart = vec![
            item("Green Bowl", "Power Plate", 12.75, 2),
        ];
        let totals = compute_totals(&cart, &DeliveryConfig::default());
        assert!((totals.subtotal - 25.50).abs() < 1e-9);
        assert!((totals.delivery_fee - 3.99).abs() < 1e-9);
        assert!((totals.tax - 1.785).abs() < 1e-9);
        assert!((totals.grand_total - 31.275).abs() < 1e-9);
    }

    #[test]
    fn empty_cart_totals_are_zero() {
        let totals = compute_totals(&[], &DeliveryConfig::default());
        assert_eq!(totals.subtotal, 0.0);
        assert_eq!(totals.delivery_fee, 0.0);
        assert_eq!(totals.grand_total, 0.0);
    }

    #[tokio::test]
    async fn same_item_twice_increments_quantity() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, _store) = ledger_in(&dir);
        ledger.add_item("u1", item("Green Bowl", "Power Plate", 12.5, 1)).await;
        let cart = ledger.add_item("u1", item("Green Bowl", "Power Plate", 12.5, 1)).await;
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].quantity, 2);
    }

    #[tokio::test]
    async fn switching_restaurant_replaces_cart() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, _store) = ledger_in(&dir);
        ledger.add_item("u1", item("Green Bowl", "Power Plate", 12.5, 1)).await;
        let cart = ledger.add_item("u1", item("Iron Wok", "Teriyaki Bowl", 11.0, 1)).await;
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].restaurant, "Iron Wok");
    }

    #[tokio::test]
    async fn quantity_zero_removes_line() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, _store) = ledger_in(&dir);
        ledger.add_item("u1", item("Green Bowl", "Power Plate", 12.5, 1)).await;
        ledger.add_item("u1", item("Green Bowl", "Citrus Salad", 9.0, 1)).await;
        let cart = ledger.update_quantity("u1", 0, 0).await.unwrap();
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].item_name, "Citrus Salad");
    }

    #[tokio::test]
    async fn bad_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, _store) = ledger_in(&dir);
        let err = ledger.update_quantity("u1", 3, 1).await.unwrap_err();
        assert!(matches!(err, OrderError::InvalidQuantity { index: 3 }));
    }

    #[tokio::test]
    async fn checkout_requires_cart_and_address() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, store) = ledger_in(&dir);

        let err = ledger.checkout("u1", "card", "").await.unwrap_err();
        assert!(matches!(err, OrderError::EmptyCart));

        ledger.add_item("u1", item("Green Bowl", "Power Plate", 12.5, 1)).await;
        let err = ledger.checkout("u1", "card", "").await.unwrap_err();
        assert!(matches!(err, OrderError::MissingAddress));

        // Cart must be untouched by the failed attempts.
        assert_eq!(store.get("u1").await.cart.len(), 1);
    }

    #[tokio::test]
    async fn blank_address_is_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, store) = ledger_in(&dir);

        ledger.add_item("u1", item("Green Bowl", "Power Plate", 12.5, 1)).await;

        for blank in ["", "   "] {
            let mut rec = store.get("u1").await;
            rec.address = Some(blank.to_string());
            store.put("u1", rec).await;

            let err = ledger.checkout("u1", "card", "").await.unwrap_err();
            assert!(matches!(err, OrderError::MissingAddress));
        }
        assert!(store.get("u1").await.order_history.is_empty());
    }

    #[tokio::test]
    async fn checkout_appends_one_order_and_clears_cart() {
        let dir = tempfile::tempdir().unwrap();
        let (ledger, store) = ledger_in(&dir);

        let mut rec = store.get("u1").await;
        rec.address = Some("12 Main St".into());
        store.put("u1", rec).await;

        ledger.add_item("u1", item("Green Bowl", "Power Plate", 12.75, 2)).await;
        let order = ledger
            .checkout("u1", "card", "extra napkins")
            .await
            .unwrap();

        assert_eq!(order.restaurant, "Green Bowl");
        assert!((order.grand_total - 31.275).abs() < 1e-9);
        assert_eq!(order.special_instructions, "extra napkins");
        let eta = (order.estimated_delivery - order.placed_at).num_minutes();
        assert!((30..=60).contains(&eta));

        let rec = store.get("u1").await;
        assert!(rec.cart.is_empty());
        assert_eq!(rec.order_history.len(), 1);
        assert_eq!(rec.order_history[0].order_id, order.order_id);
    }
}
