//! Error types for the order-management service.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of the order store, the shipment pipeline and the
//! streaming handlers. It implements `From<Error>` for `tonic::Status` so a
//! failure surfaces to the caller as a single terminal gRPC status.
//!
//! ## Error Cases
//! - `NotFound`: A lookup by identifier missed.
//! - `UnknownOrder`: A `ProcessOrders` stream referenced an order that is not
//!   in the store. Fatal to that stream.
//! - `RequestCancelled`: The client went away or the server is cancelling the
//!   stream.
//! - `TransportWrite`: Writing a response message to the outbound stream
//!   failed.
//! - `Transport`: Receiving from the inbound stream failed.
//! - `InvalidRequest`: The client request was malformed.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the order-management service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// No order is stored under the identifier.
    #[error("Order {id} not found")]
    NotFound { id: String },

    /// An order identifier in a processing stream has no backing order.
    #[error("Unknown order {id}")]
    UnknownOrder { id: String },

    /// The client aborted the request.
    #[error("Request cancelled by client")]
    RequestCancelled,

    /// Sending a response message to the client failed.
    #[error("Transport write error: {context}")]
    TransportWrite { context: String },

    /// Receiving from the client stream failed.
    #[error("Transport error: {0}")]
    Transport(#[from] Status),

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { id } => Status::not_found(format!("Order {id} not found")),
            Error::UnknownOrder { id } => {
                Status::failed_precondition(format!("Order {id} does not exist"))
            }
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::TransportWrite { context } => {
                Status::unavailable(format!("Transport write error: {context}"))
            }
            Error::Transport(status) => status,
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
