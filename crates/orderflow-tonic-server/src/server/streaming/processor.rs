use crate::server::store::OrderStore;
use futures::{Stream, StreamExt};
use orderflow_tonic_core::{Error, proto::Order};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Streams every stored order with an item containing `query` to `resp_tx`.
///
/// The store is snapshotted up front so no lock is held while waiting on the
/// client. Matches are sent in no particular order; no match sends nothing.
///
/// Returns the number of orders sent.
///
/// # Errors
///
/// - [`Error::TransportWrite`] if the response channel closes before every
///   match was sent.
/// - [`Error::RequestCancelled`] if `cancel` fires first, including while
///   blocked on a full response channel. A `CANCELLED` status is queued for
///   the client when there is room for it.
pub async fn stream_search_results(
    store: Arc<OrderStore>,
    query: String,
    resp_tx: mpsc::Sender<Result<Order, Status>>,
    cancel: CancellationToken,
) -> orderflow_tonic_core::Result<usize> {
    let matches = store.search(&query);
    let total = matches.len();

    for order in matches {
        let id = order.id.clone();
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = resp_tx.try_send(Err(Error::RequestCancelled.into()));
                return Err(Error::RequestCancelled);
            }
            sent = resp_tx.send(Ok(order)) => sent,
        };
        sent.map_err(|e| Error::TransportWrite {
            context: format!("Failed to forward order {id}: {e}"),
        })?;
        tracing::debug!(order_id = %id, "Matching order found");
    }

    Ok(total)
}

/// Upserts every order received on `inbound` and returns the summary sent back
/// to the client once the stream ends.
///
/// Receive errors are propagated as-is and no summary is produced; orders
/// stored before the error stay stored. The same holds when `cancel` fires
/// while the client is still sending.
///
/// # Errors
///
/// - [`Error::Transport`] if the inbound stream yields an error.
/// - [`Error::InvalidRequest`] if an order has an empty identifier.
/// - [`Error::RequestCancelled`] if `cancel` fires before end-of-input.
pub async fn apply_updates<S>(
    inbound: S,
    store: &OrderStore,
    cancel: CancellationToken,
) -> orderflow_tonic_core::Result<String>
where
    S: Stream<Item = Result<Order, Status>>,
{
    let mut inbound = core::pin::pin!(inbound);
    let mut processed = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(applied = processed.len(), "Update stream cancelled");
                return Err(Error::RequestCancelled);
            }
            next = inbound.next() => next,
        };
        let Some(msg) = next else { break };

        let order = msg?;
        if order.id.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "Order id must not be empty".to_string(),
            });
        }

        let id = order.id.clone();
        store.put(order);
        tracing::info!(order_id = %id, "Order updated");
        processed.push(id);
    }

    Ok(format!("Orders processed: {}", processed.join(", ")))
}
