use super::aggregator::ShipmentAggregator;
use crate::server::telemetry::{increment_orders_ingested, increment_shipments_flushed};
use core::pin::Pin;
use futures::{Stream, StreamExt};
use orderflow_tonic_core::{
    Error,
    proto::{CombinedShipment, OrderId},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Lifecycle of a single `ProcessOrders` stream.
///
/// `Open -> Receiving -> Flushing -> Closed`, where `Flushing` is skipped when
/// the stream fails. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Receiving,
    Flushing,
    Closed,
}

/// Counters reported once a `ProcessOrders` stream completes successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub orders_ingested: usize,
    pub shipments_sent: usize,
}

/// Drives one `ProcessOrders` stream to completion.
///
/// Reads order identifiers from `inbound` in receipt order, feeds them to the
/// [`ShipmentAggregator`] and writes each completed batch of shipments to
/// `resp_tx`. When the client signals end-of-input, every remaining shipment
/// is flushed and the stream closes successfully.
///
/// # Arguments
///
/// - `inbound`: Order identifiers sent by the client, in order.
/// - `aggregator`: Batching state owned by this stream.
/// - `resp_tx`: Channel feeding the gRPC response stream.
/// - `cancel`: Cancelled by the service on shutdown.
///
/// # Behavior
///
/// - Cancellation is checked before every inbound message. A cancelled token
///   or a closed response channel (client gone) ends the stream with
///   [`Error::RequestCancelled`] and nothing is flushed.
/// - An identifier with no backing order aborts the stream with
///   [`Error::UnknownOrder`]; the partial batch is discarded.
/// - A failed write aborts with [`Error::TransportWrite`]. Shipments already
///   written are not retried or rolled back.
/// - On failure, the error is also sent as the terminal status of the
///   response stream when the client is still listening.
pub async fn process_orders<S>(
    inbound: S,
    aggregator: ShipmentAggregator,
    resp_tx: mpsc::Sender<Result<CombinedShipment, Status>>,
    cancel: CancellationToken,
) -> orderflow_tonic_core::Result<StreamSummary>
where
    S: Stream<Item = Result<OrderId, Status>>,
{
    let mut inbound = core::pin::pin!(inbound);
    let mut coordinator = Coordinator {
        state: StreamState::Open,
        aggregator,
        resp_tx,
        cancel,
        summary: StreamSummary::default(),
    };

    let result = coordinator.drive(inbound.as_mut()).await;
    if let Err(e) = &result {
        coordinator.discard();
        coordinator.surface(e).await;
    }
    coordinator.transition(StreamState::Closed);

    result.map(|()| coordinator.summary)
}

struct Coordinator {
    state: StreamState,
    aggregator: ShipmentAggregator,
    resp_tx: mpsc::Sender<Result<CombinedShipment, Status>>,
    cancel: CancellationToken,
    summary: StreamSummary,
}

impl Coordinator {
    async fn drive<S>(&mut self, mut inbound: Pin<&mut S>) -> orderflow_tonic_core::Result<()>
    where
        S: Stream<Item = Result<OrderId, Status>>,
    {
        self.transition(StreamState::Receiving);

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::RequestCancelled),
                next = inbound.next() => next,
            };
            let Some(msg) = next else { break };

            if self.cancel.is_cancelled() || self.resp_tx.is_closed() {
                tracing::debug!(
                    ingested = self.summary.orders_ingested,
                    "Stream cancelled before processing next order"
                );
                return Err(Error::RequestCancelled);
            }

            let order_id = msg?;
            let batch = self.aggregator.ingest(&order_id.value)?;
            self.summary.orders_ingested += 1;
            increment_orders_ingested();

            if let Some(shipments) = batch {
                self.send_all(shipments).await?;
            }
        }

        self.transition(StreamState::Flushing);
        if self.aggregator.is_empty() {
            tracing::debug!("End of input with no open shipments");
            return Ok(());
        }
        let remaining = self.aggregator.flush();
        self.send_all(remaining).await
    }

    /// Logs what an aborted stream leaves unshipped. The aggregator is dropped
    /// with the coordinator, so nothing is flushed.
    fn discard(&self) {
        if !self.aggregator.is_empty() {
            tracing::debug!(
                pending = self.aggregator.pending(),
                open_shipments = self.aggregator.open_shipments(),
                "Discarding partial batch"
            );
        }
    }

    async fn send_all(
        &mut self,
        shipments: Vec<CombinedShipment>,
    ) -> orderflow_tonic_core::Result<()> {
        for shipment in shipments {
            tracing::info!(
                destination = %shipment.destination(),
                orders = shipment.order_list.len(),
                "Shipping"
            );
            self.resp_tx
                .send(Ok(shipment))
                .await
                .map_err(|e| Error::TransportWrite {
                    context: format!("Failed to forward shipment: {e}"),
                })?;
            self.summary.shipments_sent += 1;
            increment_shipments_flushed(1);
        }
        Ok(())
    }

    /// Best effort: the client may already be gone, in which case the failure
    /// is only logged. Once the stream is cancelled the status is only queued
    /// if the response buffer has room, so a stalled client cannot hold the
    /// task open.
    async fn surface(&self, err: &Error) {
        debug_assert_ne!(
            self.state,
            StreamState::Closed,
            "terminal status must be written before the stream closes"
        );
        if self.resp_tx.is_closed() {
            tracing::debug!("Client disconnected, dropping error: {err}");
            return;
        }
        let status = Err(err.clone().into());
        let sent = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.resp_tx.try_send(status).map_err(|e| e.to_string())
            }
            sent = self.resp_tx.send(status.clone()) => sent.map_err(|e| e.to_string()),
        };
        if let Err(e) = sent {
            tracing::debug!("Response channel failed to forward error: {e}");
        }
    }

    fn transition(&mut self, next: StreamState) {
        debug_assert!(
            self.state != StreamState::Closed,
            "no transitions out of a closed stream"
        );
        tracing::trace!(from = ?self.state, to = ?next, "ProcessOrders state change");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::OrderStore;
    use core::num::NonZeroUsize;
    use futures::stream;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn ids(values: &[&str]) -> Vec<Result<OrderId, Status>> {
        values
            .iter()
            .map(|v| {
                Ok(OrderId {
                    value: (*v).to_string(),
                })
            })
            .collect()
    }

    fn aggregator() -> ShipmentAggregator {
        ShipmentAggregator::new(
            Arc::new(OrderStore::with_sample_data()),
            NonZeroUsize::new(3).unwrap(),
        )
    }

    async fn drain(
        mut rx: mpsc::Receiver<Result<CombinedShipment, Status>>,
    ) -> Vec<Result<CombinedShipment, Status>> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        out
    }

    fn grouped(msgs: &[Result<CombinedShipment, Status>]) -> BTreeMap<String, Vec<String>> {
        msgs.iter()
            .filter_map(|m| m.as_ref().ok())
            .map(|s| {
                (
                    s.id.clone(),
                    s.order_list.iter().map(|o| o.id.clone()).collect(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn full_batch_is_shipped_when_it_fills() {
        let (tx, rx) = mpsc::channel(8);
        let inbound = stream::iter(ids(&["12", "13", "14"]));

        let summary = process_orders(inbound, aggregator(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            summary,
            StreamSummary {
                orders_ingested: 3,
                shipments_sent: 1
            }
        );

        let msgs = drain(rx).await;
        assert_eq!(msgs.len(), 1);
        let shipment = msgs[0].as_ref().unwrap();
        assert_eq!(shipment.id, "Balmora");
        let order_ids: Vec<_> = shipment
            .order_list
            .iter()
            .map(|o| o.id.as_str())
            .collect();
        assert_eq!(order_ids, ["12", "13", "14"]);
    }

    #[tokio::test]
    async fn end_of_input_flushes_partial_batch() {
        let (tx, rx) = mpsc::channel(8);
        let inbound = stream::iter(ids(&["12", "15"]));

        let summary = process_orders(inbound, aggregator(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.shipments_sent, 2);

        let msgs = drain(rx).await;
        let by_dest = grouped(&msgs);
        assert_eq!(by_dest.len(), 2);
        assert_eq!(by_dest["Balmora"], ["12"]);
        assert_eq!(by_dest["Seyda Neen"], ["15"]);
    }

    #[tokio::test]
    async fn empty_input_closes_cleanly() {
        let (tx, rx) = mpsc::channel(8);
        let inbound = stream::iter(ids(&[]));
        let summary = process_orders(inbound, aggregator(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary, StreamSummary::default());
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_order_aborts_without_shipping_the_batch() {
        let (tx, rx) = mpsc::channel(8);
        let inbound = stream::iter(ids(&["12", "99", "13"]));

        let err = process_orders(inbound, aggregator(), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownOrder { ref id } if id == "99"));

        let msgs = drain(rx).await;
        assert_eq!(msgs.len(), 1, "only the terminal error is sent");
        let status = msgs[0].as_ref().unwrap_err();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn cancellation_after_first_order_emits_nothing() {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        // Cancel as the second identifier arrives, i.e. after one was ingested.
        let inbound = stream::iter(ids(&["12", "13", "14"]))
            .enumerate()
            .map(move |(i, msg)| {
                if i == 1 {
                    trigger.cancel();
                }
                msg
            });

        let err = process_orders(inbound, aggregator(), tx, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestCancelled));

        let msgs = drain(rx).await;
        assert!(msgs.iter().all(Result::is_err), "no shipment may be emitted");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].as_ref().unwrap_err().code(), tonic::Code::Cancelled);
    }

    #[tokio::test]
    async fn cancellation_while_waiting_for_input() {
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = process_orders(
            stream::pending::<Result<OrderId, Status>>(),
            aggregator(),
            tx,
            cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::RequestCancelled));
    }

    #[tokio::test]
    async fn client_disconnect_is_treated_as_cancellation() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let err = process_orders(
            stream::iter(ids(&["12"])),
            aggregator(),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::RequestCancelled));
    }

    #[tokio::test]
    async fn write_failure_while_flushing_is_surfaced() {
        let (tx, rx) = mpsc::channel(8);
        // Drop the receiver once the last identifier has been read, so the
        // end-of-input flush hits a closed channel.
        let inbound = stream::iter(ids(&["12", "15"])).chain(
            stream::once(async move { drop(rx) })
                .filter_map(|()| futures::future::ready(None::<Result<OrderId, Status>>)),
        );

        let err = process_orders(inbound, aggregator(), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportWrite { .. }));
    }

    #[tokio::test]
    async fn inbound_transport_error_is_propagated() {
        let (tx, rx) = mpsc::channel(8);
        let mut msgs = ids(&["12"]);
        msgs.push(Err(Status::internal("connection reset")));

        let inbound = stream::iter(msgs);
        let err = process_orders(inbound, aggregator(), tx, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::Transport(status) => assert_eq!(status.code(), tonic::Code::Internal),
            other => panic!("expected transport error, got {other:?}"),
        }

        let out = drain(rx).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].is_err());
    }

    #[tokio::test]
    async fn shipments_follow_their_batches() {
        let (tx, rx) = mpsc::channel(16);
        let inbound = stream::iter(ids(&["12", "15", "13", "16", "14"]));

        let summary = process_orders(inbound, aggregator(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.orders_ingested, 5);

        let msgs: Vec<_> = drain(rx)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        // First batch: {Balmora: 12, 13}, {Seyda Neen: 15}; final: {Balmora: 16, 14}.
        assert_eq!(msgs.len(), 3);
        let (first, last) = msgs.split_at(2);
        let mut first_dest: Vec<_> = first.iter().map(|s| s.id.as_str()).collect();
        first_dest.sort_unstable();
        assert_eq!(first_dest, ["Balmora", "Seyda Neen"]);
        assert_eq!(last[0].id, "Balmora");
        let tail: Vec<_> = last[0]
            .order_list
            .iter()
            .map(|o| o.id.as_str())
            .collect();
        assert_eq!(tail, ["16", "14"]);
    }
}
