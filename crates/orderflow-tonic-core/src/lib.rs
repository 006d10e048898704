#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

/// gRPC service and message definitions generated from
/// `proto/order_management.proto`.
///
/// ## Service
///
/// - `AddOrder` / `GetOrder` - unary store access.
/// - `SearchOrders` - server-streaming substring search over order items.
/// - `UpdateOrders` - client-streaming upserts answered by one summary.
/// - `ProcessOrders` - bidirectional stream of order IDs in, shipments out.
///
/// [`FILE_DESCRIPTOR_SET`] carries the encoded descriptors for gRPC
/// reflection.
pub mod proto {
    tonic::include_proto!("ecommerce");

    /// Encoded file descriptor set of the `ecommerce` package.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("order_management_descriptor");
}
