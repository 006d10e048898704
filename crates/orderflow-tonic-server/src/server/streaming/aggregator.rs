use crate::server::store::OrderStore;
use core::num::NonZeroUsize;
use orderflow_tonic_core::{
    Error, Result,
    proto::{CombinedShipment, Order},
};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

/// Groups a stream of order identifiers into per-destination shipments.
///
/// Every ingested identifier is resolved against the shared [`OrderStore`] and
/// appended to the in-flight shipment for its destination. Once `batch_size`
/// identifiers have been consumed, every in-flight shipment is handed back to
/// the caller and the batch window starts over. Whatever remains when input
/// ends is drained with [`flush`](Self::flush).
///
/// The aggregator belongs to exactly one stream and is not shared.
///
/// Shipments returned from a single flush are in no particular order.
#[derive(Debug)]
pub struct ShipmentAggregator {
    store: Arc<OrderStore>,
    in_flight: HashMap<String, CombinedShipment>,
    count: usize,
    batch_size: NonZeroUsize,
}

impl ShipmentAggregator {
    pub fn new(store: Arc<OrderStore>, batch_size: NonZeroUsize) -> Self {
        Self {
            store,
            in_flight: HashMap::new(),
            count: 0,
            batch_size,
        }
    }

    /// Adds the order named by `order_id` to the current batch window.
    ///
    /// Returns `Some(shipments)` when this identifier completes the window and
    /// `None` otherwise. The order's destination is read once, here; later
    /// updates to the store do not move it to another shipment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOrder`] if the store has no such order. The
    /// aggregator state is left untouched in that case.
    pub fn ingest(&mut self, order_id: &str) -> Result<Option<Vec<CombinedShipment>>> {
        let order = self.store.get(order_id).map_err(|e| match e {
            Error::NotFound { id } => Error::UnknownOrder { id },
            other => other,
        })?;

        self.push(order);
        self.count += 1;

        if self.count == self.batch_size.get() {
            return Ok(Some(self.flush()));
        }
        Ok(None)
    }

    /// Drains every in-flight shipment regardless of how full the batch
    /// window is, and resets the window.
    ///
    /// Flushing an empty aggregator returns nothing.
    pub fn flush(&mut self) -> Vec<CombinedShipment> {
        self.count = 0;
        self.in_flight.drain().map(|(_, shipment)| shipment).collect()
    }

    /// Number of identifiers consumed in the current batch window.
    pub const fn pending(&self) -> usize {
        self.count
    }

    /// Number of destinations with an open shipment.
    pub fn open_shipments(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    fn push(&mut self, order: Order) {
        match self.in_flight.entry(order.destination.clone()) {
            Entry::Occupied(mut shipment) => shipment.get_mut().order_list.push(order),
            Entry::Vacant(slot) => {
                slot.insert(CombinedShipment::open_with(order));
            }
        }
    }
}
