//! RPC logging middleware.
//!
//! [`RpcLogLayer`] wraps the whole gRPC router, so every call (unary or
//! streaming) is logged when it arrives and when its response headers are
//! ready. Stages compose through `tower::ServiceBuilder`; per-message logging
//! for streams happens in the service handler.

use futures::future::BoxFuture;
use http::{HeaderMap, Request, Response};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

const GRPC_STATUS: &str = "grpc-status";

/// Tower layer that logs every RPC passing through the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcLogLayer;

impl<S> Layer<S> for RpcLogLayer {
    type Service = RpcLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcLogService { inner }
    }
}

/// Service produced by [`RpcLogLayer`].
#[derive(Debug, Clone)]
pub struct RpcLogService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RpcLogService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // `self.inner` is the instance that was driven to readiness; keep it
        // for this call and leave the fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = core::mem::replace(&mut self.inner, clone);

        let rpc = req.uri().path().to_owned();
        tracing::info!(rpc = %rpc, "Handling request");
        tracing::debug!(
            rpc = %rpc,
            metadata = ?metadata_keys(req.headers()),
            "Request metadata"
        );

        Box::pin(async move {
            let start = Instant::now();
            let result = inner.call(req).await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(resp) => match grpc_status(resp.headers()) {
                    Some(code) if code != "0" => {
                        tracing::warn!(
                            rpc = %rpc,
                            grpc_status = code,
                            elapsed_ms,
                            "Request failed"
                        );
                    }
                    _ => tracing::info!(rpc = %rpc, elapsed_ms, "Response started"),
                },
                Err(_) => tracing::error!(rpc = %rpc, elapsed_ms, "Transport error"),
            }
            result
        })
    }
}

/// The `grpc-status` carried in the response headers, present only for
/// trailers-only responses (calls rejected before any message was sent).
pub fn grpc_status(headers: &HeaderMap) -> Option<&str> {
    headers.get(GRPC_STATUS).and_then(|v| v.to_str().ok())
}

/// Application metadata keys, i.e. headers that are neither HTTP/2 plumbing
/// nor gRPC protocol fields.
fn metadata_keys(headers: &HeaderMap) -> Vec<&str> {
    headers
        .keys()
        .map(http::HeaderName::as_str)
        .filter(|k| {
            !k.starts_with("grpc-") && !matches!(*k, "content-type" | "te" | "user-agent")
        })
        .collect()
}
