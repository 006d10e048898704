//! Shared in-memory order store.
//!
//! [`OrderStore`] maps order identifiers to [`Order`] records and is shared by
//! every unary call and stream of the service behind an `Arc`. Writes go
//! through a [`RwLock`] so concurrent readers never observe a torn map; lock
//! guards are always released before the caller awaits anything.

use orderflow_tonic_core::{Error, Result, proto::Order};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Process-wide order records keyed by identifier.
///
/// At most one order exists per identifier; the last write wins. Records live
/// until the process exits.
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl OrderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the sample orders shipped with the
    /// service.
    pub fn with_sample_data() -> Self {
        let store = Self::new();
        for order in sample_orders() {
            store.put(order);
        }
        store
    }

    /// Returns a copy of the order stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no order has that identifier.
    pub fn get(&self, id: &str) -> Result<Order> {
        self.orders
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    /// Inserts or replaces the order under its identifier, returning the
    /// previous record if there was one.
    pub fn put(&self, order: Order) -> Option<Order> {
        self.orders.write().insert(order.id.clone(), order)
    }

    /// Returns a snapshot of every order with an item containing `query`.
    ///
    /// The order of the returned records is unspecified.
    pub fn search(&self, query: &str) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|order| order.has_item_matching(query))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}

fn sample_order(id: &str, items: &[&str], destination: &str, price: f32) -> Order {
    Order {
        id: id.to_string(),
        items: items.iter().map(ToString::to_string).collect(),
        description: String::new(),
        price,
        destination: destination.to_string(),
    }
}

/// The orders the service starts with unless seeding is disabled.
pub fn sample_orders() -> Vec<Order> {
    vec![
        sample_order(
            "12",
            &["Fender Telecaster", "Fender Blues Junior"],
            "Balmora",
            2500.00,
        ),
        sample_order("13", &["Boss BD-2"], "Balmora", 140.00),
        sample_order(
            "14",
            &["Gibson Les Paul", "Roland Space Echo RE-201"],
            "Balmora",
            3400.00,
        ),
        sample_order("15", &["Behringer Model-D"], "Seyda Neen", 330.00),
        sample_order(
            "16",
            &["Squier Jazzmaster", "Eventide Space", "Boss RV-5"],
            "Balmora",
            920.00,
        ),
    ]
}
