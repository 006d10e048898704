//! Server-side components of the order-management service.
//!
//! ## Submodules
//!
//! - [`config`] - CLI / environment configuration.
//! - [`interceptor`] - RPC logging middleware applied around every call.
//! - [`service`] - The tonic `OrderManagement` implementation.
//! - [`store`] - The shared in-memory order store.
//! - [`streaming`] - Shipment batching and the streaming RPC drivers.
//! - [`telemetry`] - Logging, tracing and metrics initialization.
//!
//! These components are wired together in the server's `main.rs`.

pub mod config;
pub mod interceptor;
pub mod service;
pub mod store;
pub mod streaming;
pub mod telemetry;
