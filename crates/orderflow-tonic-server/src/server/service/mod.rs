//! gRPC service implementation.
//!
//! This module contains the client-facing `OrderManagement` implementation.
//! Unary calls are answered inline; streaming calls are handed to the drivers
//! in [`crate::server::streaming`] on their own tasks.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`OrderService`).

pub mod handler;
