//! Shared error and domain types used by both the server and its clients.
//!
//! - [`error`] - The unified [`Error`] enum and its mapping onto
//!   [`tonic::Status`].
//! - [`types`] - Domain constants and convenience methods on the generated
//!   protobuf messages.

pub mod error;
pub mod types;

pub use error::{Error, Result};
