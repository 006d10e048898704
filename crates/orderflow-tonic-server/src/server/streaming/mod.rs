//! Streaming RPC logic, independent of the tonic service plumbing.
//!
//! - [`aggregator`] - Groups order IDs into per-destination shipment batches.
//! - [`coordinator`] - Drives a `ProcessOrders` stream through its lifecycle.
//! - [`processor`] - Search and update streams over the order store.
//!
//! Everything here works on plain [`futures::Stream`]s and
//! [`tokio::sync::mpsc`] channels, so it can be driven without a transport.

pub mod aggregator;
pub mod coordinator;
pub mod processor;
