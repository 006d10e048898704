//! Client-side helpers used by the `order-client` demo.
//!
//! [`CallLogger`] is a tonic interceptor that logs every outgoing call along
//! with the metadata keys it carries. [`with_call_metadata`] wraps a message
//! in a request tagged with the metadata the server logs and echoes in its
//! diagnostics.

use std::time::{SystemTime, UNIX_EPOCH};
use tonic::{
    Request, Status,
    metadata::{Ascii, MetadataValue},
    service::Interceptor,
};

/// Logs each outgoing call before it leaves the channel.
///
/// ```ignore
/// let client = OrderManagementClient::with_interceptor(channel, CallLogger);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CallLogger;

impl Interceptor for CallLogger {
    fn call(&mut self, req: Request<()>) -> Result<Request<()>, Status> {
        let headers = req.metadata().clone().into_headers();
        let keys: Vec<&str> = headers.keys().map(http::HeaderName::as_str).collect();
        tracing::info!(metadata = ?keys, "Outgoing call");
        Ok(req)
    }
}

/// Wraps `message` in a request carrying a `timestamp` (nanoseconds since the
/// Unix epoch), a `kn` pair and the repeated `k1` key alongside `k2`.
pub fn with_call_metadata<T>(message: T) -> Request<T> {
    let mut req = Request::new(message);
    let metadata = req.metadata_mut();

    let now_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    if let Ok(value) = now_ns.to_string().parse::<MetadataValue<Ascii>>() {
        metadata.insert("timestamp", value);
    }
    metadata.insert("kn", MetadataValue::from_static("vn"));
    metadata.append("k1", MetadataValue::from_static("v1"));
    metadata.append("k1", MetadataValue::from_static("v2"));
    metadata.append("k2", MetadataValue::from_static("v3"));
    req
}
