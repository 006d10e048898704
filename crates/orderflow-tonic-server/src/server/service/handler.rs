//! gRPC service implementation for order management.
//!
//! This module defines [`OrderService`], the concrete implementation of the
//! [`OrderManagement`] gRPC service defined in the protobuf specification.
//!
//! ## Responsibilities
//!
//! - Serve unary add/get calls straight from the shared [`OrderStore`].
//! - Spawn one task per server-streaming or bidirectional call and hand it the
//!   sending half of a bounded response channel.
//! - Track in-flight streams and refuse new ones once shutdown has begun.
//! - Cancel every remaining stream after the drain timeout.

use crate::server::{
    config::ServerConfig,
    store::OrderStore,
    streaming::{
        aggregator::ShipmentAggregator, coordinator::process_orders,
        processor::{apply_updates, stream_search_results},
    },
    telemetry::{
        decrement_streams_inflight, increment_requests, increment_stream_errors,
        increment_streams_inflight, record_stream_duration,
    },
};
use core::pin::Pin;
use core::time::Duration;
use ferroid::{base32::Base32UlidExt, id::ULID};
use futures::TryStreamExt;
use orderflow_tonic_core::{
    Error,
    proto::{
        Ack, CombinedShipment, Order, OrderId, SearchQuery,
        order_management_server::OrderManagement,
    },
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{
    Request, Response, Status, Streaming,
    metadata::{Ascii, MetadataMap, MetadataValue},
};
use tracing::Instrument;

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// gRPC order-management service.
///
/// Cloning is cheap: clones share the order store and the stream lifecycle
/// state, so the instance kept by `main` for shutdown controls the one
/// registered with the server.
#[derive(Clone)]
pub struct OrderService {
    config: ServerConfig,
    store: Arc<OrderStore>,
    lifecycle: Arc<Lifecycle>,
}

struct Lifecycle {
    shutdown_token: CancellationToken,
    accepting: AtomicBool,
    streams_inflight: AtomicUsize,
}

/// Marks one running stream. Dropping it releases the slot.
struct StreamGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.lifecycle
            .streams_inflight
            .fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}

impl OrderService {
    pub fn new(config: ServerConfig, store: Arc<OrderStore>) -> Self {
        Self {
            config,
            store,
            lifecycle: Arc::new(Lifecycle {
                shutdown_token: CancellationToken::new(),
                accepting: AtomicBool::new(true),
                streams_inflight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    pub fn streams_inflight(&self) -> usize {
        self.lifecycle.streams_inflight.load(Ordering::Acquire)
    }

    /// Initiates a graceful shutdown.
    ///
    /// - Refuses new streams.
    /// - Waits up to the configured shutdown timeout for running streams to
    ///   finish.
    /// - Cancels whatever is still running; those streams end with
    ///   `CANCELLED`.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new streams ===
        tracing::info!("Refusing new streams");
        self.lifecycle.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for in-flight streams to drain ===
        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.streams_inflight()
        );
        let drained = timeout(self.config.shutdown_timeout, async {
            while self.streams_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight streams drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} streams still active)",
                self.streams_inflight()
            ),
        }

        // === Phase 2: Cancel the remaining streams ===
        self.lifecycle.shutdown_token.cancel();
        tracing::info!("Order service shutdown complete");
    }

    fn open_stream(&self) -> Result<StreamGuard, Error> {
        if !self.lifecycle.accepting.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        self.lifecycle
            .streams_inflight
            .fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        Ok(StreamGuard {
            lifecycle: Arc::clone(&self.lifecycle),
        })
    }

    fn stream_token(&self) -> CancellationToken {
        self.lifecycle.shutdown_token.child_token()
    }
}

#[tonic::async_trait]
impl OrderManagement for OrderService {
    type SearchOrdersStream = ResponseStream<Order>;
    type ProcessOrdersStream = ResponseStream<CombinedShipment>;

    /// Stores an order, assigning a ULID when the client left the identifier
    /// empty, and acknowledges it.
    ///
    /// The response carries `timestamp` and `location` metadata.
    #[tracing::instrument(skip_all, fields(order_id = %req.get_ref().id))]
    async fn add_order(&self, req: Request<Order>) -> Result<Response<Ack>, Status> {
        increment_requests();
        let mut order = req.into_inner();
        if order.id.is_empty() {
            order.id = ULID::now().encode().to_string();
        }

        let id = order.id.clone();
        if self.store.put(order).is_some() {
            tracing::debug!("Replaced existing order {id}");
        }
        tracing::info!("Order {id} added");

        let mut resp = Response::new(Ack {
            value: format!("Order {id} added"),
        });
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        insert_ascii(resp.metadata_mut(), "timestamp", &now_ms.to_string());
        insert_ascii(resp.metadata_mut(), "location", &self.config.server_addr);
        Ok(resp)
    }

    #[tracing::instrument(skip_all, fields(order_id = %req.get_ref().value))]
    async fn get_order(&self, req: Request<OrderId>) -> Result<Response<Order>, Status> {
        increment_requests();
        let order = self.store.get(&req.get_ref().value)?;
        Ok(Response::new(order))
    }

    /// Streams every order with an item containing the query.
    #[tracing::instrument(skip_all, fields(query = %req.get_ref().value))]
    async fn search_orders(
        &self,
        req: Request<SearchQuery>,
    ) -> Result<Response<Self::SearchOrdersStream>, Status> {
        increment_requests();
        let guard = self.open_stream()?;
        let start = Instant::now();
        let query = req.into_inner().value;

        let (resp_tx, resp_rx) = mpsc::channel(self.config.stream_buffer_size);
        let store = Arc::clone(&self.store);
        let cancel = self.stream_token();

        let fut = async move {
            match stream_search_results(store, query, resp_tx, cancel).await {
                Ok(found) => {
                    tracing::debug!("Search finished with {found} matches");
                    record_stream_duration(start.elapsed().as_secs_f64() * 1000.0);
                }
                Err(e) => {
                    increment_stream_errors();
                    tracing::warn!("Search stream failed: {e}");
                }
            }
            drop(guard);
        };
        tokio::spawn(fut.instrument(tracing::info_span!("search_stream")));

        let stream = ReceiverStream::new(resp_rx)
            .inspect_ok(|order| tracing::trace!(order_id = %order.id, "Sending order"));
        Ok(Response::new(Box::pin(stream)))
    }

    /// Upserts every streamed order and answers with a summary once the client
    /// closes its side.
    ///
    /// The call only completes at end-of-input, so the server-wide request
    /// timeout bounds the whole client stream. Shutdown cancels a stream the
    /// client keeps open.
    #[tracing::instrument(skip_all)]
    async fn update_orders(
        &self,
        req: Request<Streaming<Order>>,
    ) -> Result<Response<Ack>, Status> {
        increment_requests();
        let _guard = self.open_stream()?;
        let inbound = req
            .into_inner()
            .inspect_ok(|order| tracing::trace!(order_id = %order.id, "Received order"));

        match apply_updates(inbound, &self.store, self.stream_token()).await {
            Ok(value) => Ok(Response::new(Ack { value })),
            Err(e) => {
                increment_stream_errors();
                tracing::warn!("Update stream failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Groups streamed order IDs into per-destination shipments, streaming
    /// each batch back as it fills and the remainder at end-of-input.
    #[tracing::instrument(skip_all)]
    async fn process_orders(
        &self,
        req: Request<Streaming<OrderId>>,
    ) -> Result<Response<Self::ProcessOrdersStream>, Status> {
        increment_requests();
        let guard = self.open_stream()?;
        let start = Instant::now();

        let inbound = req
            .into_inner()
            .inspect_ok(|id| tracing::trace!(order_id = %id.value, "Received order id"));
        let (resp_tx, resp_rx) = mpsc::channel(self.config.stream_buffer_size);
        let aggregator = ShipmentAggregator::new(Arc::clone(&self.store), self.config.batch_size);
        let cancel = self.stream_token();

        let fut = async move {
            match process_orders(inbound, aggregator, resp_tx, cancel).await {
                Ok(summary) => {
                    tracing::info!(
                        orders = summary.orders_ingested,
                        shipments = summary.shipments_sent,
                        "ProcessOrders stream completed"
                    );
                    record_stream_duration(start.elapsed().as_secs_f64() * 1000.0);
                }
                Err(e) => {
                    increment_stream_errors();
                    tracing::warn!("ProcessOrders stream failed: {e}");
                }
            }
            drop(guard);
        };
        tokio::spawn(fut.instrument(tracing::info_span!("process_orders_stream")));

        let stream = ReceiverStream::new(resp_rx).inspect_ok(|shipment| {
            tracing::trace!(destination = %shipment.destination(), "Sending shipment");
        });
        Ok(Response::new(Box::pin(stream)))
    }
}

fn insert_ascii(metadata: &mut MetadataMap, key: &'static str, value: &str) {
    match value.parse::<MetadataValue<Ascii>>() {
        Ok(value) => {
            metadata.insert(key, value);
        }
        Err(_) => tracing::warn!("Skipping non-ASCII `{key}` metadata"),
    }
}
