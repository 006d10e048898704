//! # Shared Order and Shipment Types
//!
//! Constants and helpers layered on top of the generated protobuf messages in
//! [`crate::proto`], so the server and its clients agree on how shipments are
//! labelled and how item searches match.

use crate::proto::{CombinedShipment, Order};

/// Number of order identifiers consumed before in-flight shipments are
/// flushed, unless overridden by server configuration.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Status attached to every shipment while it is being assembled.
pub const SHIPMENT_IN_PROGRESS: &str = "In progress";

impl Order {
    /// Returns `true` if any item name contains `query` as a substring.
    ///
    /// An empty query matches every order.
    #[must_use]
    pub fn has_item_matching(&self, query: &str) -> bool {
        self.items.iter().any(|item| item.contains(query))
    }
}

impl CombinedShipment {
    /// Opens a new in-progress shipment to the order's destination, seeded with
    /// that order.
    #[must_use]
    pub fn open_with(order: Order) -> Self {
        Self {
            id: order.destination.clone(),
            status: SHIPMENT_IN_PROGRESS.to_string(),
            order_list: vec![order],
        }
    }

    /// The destination this shipment is bound for.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.id
    }
}
