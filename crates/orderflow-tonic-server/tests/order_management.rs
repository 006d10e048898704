use futures::{StreamExt, stream};
use orderflow_tonic_core::proto::{
    CombinedShipment, Order, OrderId, SearchQuery,
    order_management_client::OrderManagementClient,
    order_management_server::OrderManagementServer,
};
use orderflow_tonic_server::client::{CallLogger, with_call_metadata};
use orderflow_tonic_server::server::{
    config::ServerConfig, interceptor::RpcLogLayer, service::handler::OrderService,
    store::OrderStore,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{Code, Request, transport::Channel, transport::Server};

struct TestServer {
    addr: SocketAddr,
    service: OrderService,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    async fn start_with(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = OrderService::new(config, Arc::new(OrderStore::with_sample_data()));

        let router = Server::builder()
            .layer(RpcLogLayer)
            .add_service(OrderManagementServer::new(service.clone()));
        let handle = tokio::spawn(async move {
            router
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        Self {
            addr,
            service,
            handle,
        }
    }

    async fn client(&self) -> OrderManagementClient<Channel> {
        OrderManagementClient::connect(format!("http://{}", self.addr))
            .await
            .unwrap()
    }

    async fn wait_for_streams(&self, expected: usize) {
        for _ in 0..200 {
            if self.service.streams_inflight() == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(self.service.streams_inflight(), expected);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn order(id: &str, items: &[&str], destination: &str) -> Order {
    Order {
        id: id.to_string(),
        items: items.iter().map(ToString::to_string).collect(),
        description: String::new(),
        price: 10.0,
        destination: destination.to_string(),
    }
}

fn quick_shutdown() -> ServerConfig {
    ServerConfig {
        shutdown_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    }
}

fn order_ids(ids: &[&str]) -> Vec<OrderId> {
    ids.iter()
        .map(|id| OrderId {
            value: id.to_string(),
        })
        .collect()
}

fn shipment_ids(shipment: &CombinedShipment) -> Vec<&str> {
    shipment.order_list.iter().map(|o| o.id.as_str()).collect()
}

#[tokio::test]
async fn unary_calls_round_trip() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let resp = client
        .add_order(order("101", &["Mooer Micro Looper"], "Vivec"))
        .await
        .unwrap();
    assert!(resp.metadata().get("timestamp").is_some());
    assert!(resp.metadata().get("location").is_some());
    assert_eq!(resp.into_inner().value, "Order 101 added");

    let fetched = client
        .get_order(OrderId {
            value: "101".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(fetched.destination, "Vivec");

    let status = client
        .get_order(OrderId {
            value: "missing".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn search_streams_every_match() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let found: HashSet<String> = client
        .search_orders(SearchQuery {
            value: "Boss".to_string(),
        })
        .await
        .unwrap()
        .into_inner()
        .map(|o| o.unwrap().id)
        .collect()
        .await;
    assert_eq!(found, HashSet::from(["13".to_string(), "16".to_string()]));
}

#[tokio::test]
async fn updates_are_summarized_and_stored() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let updates = vec![
        order("12", &["Coca-Cola Zero", "Big Mac"], "Batumi"),
        order("14", &["Sofa", "Table", "Chair"], "Balmora"),
        order("16", &["Holy Grail"], "Erathia"),
    ];
    let ack = client
        .update_orders(Request::new(stream::iter(updates)))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(ack.value, "Orders processed: 12, 14, 16");
    let stored = server.service.store().get("14").unwrap();
    assert_eq!(stored.destination, "Balmora");
}

#[tokio::test]
async fn process_orders_flushes_full_batches_then_remainder() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    // Every sample order ships to Balmora except 15, bound for Seyda Neen.
    let mut shipments = client
        .process_orders(Request::new(stream::iter(order_ids(&[
            "12", "13", "14", "15", "16",
        ]))))
        .await
        .unwrap()
        .into_inner();

    let mut received = Vec::new();
    while let Some(shipment) = shipments.next().await {
        received.push(shipment.unwrap());
    }

    // The first batch (12, 13, 14) fills a single shipment.
    assert_eq!(received.len(), 3);
    assert_eq!(received[0].id, "Balmora");
    assert_eq!(shipment_ids(&received[0]), ["12", "13", "14"]);

    // The remainder is flushed at end-of-input in no particular order.
    let mut rest: Vec<_> = received[1..]
        .iter()
        .map(|s| (s.id.clone(), shipment_ids(s).join(",")))
        .collect();
    rest.sort();
    assert_eq!(
        rest,
        [
            ("Balmora".to_string(), "16".to_string()),
            ("Seyda Neen".to_string(), "15".to_string()),
        ]
    );
    assert!(received.iter().all(|s| s.status == "In progress"));
}

#[tokio::test]
async fn process_orders_aborts_on_unknown_order() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let mut shipments = client
        .process_orders(Request::new(stream::iter(order_ids(&[
            "12", "nope", "13",
        ]))))
        .await
        .unwrap()
        .into_inner();

    let mut statuses = Vec::new();
    while let Some(msg) = shipments.next().await {
        match msg {
            Ok(shipment) => panic!("unexpected shipment {shipment:?}"),
            Err(status) => statuses.push(status.code()),
        }
    }
    assert_eq!(statuses, [Code::FailedPrecondition]);
}

#[tokio::test]
async fn shutdown_refuses_new_streams() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    server.service.shutdown().await;

    let status = client
        .search_orders(SearchQuery {
            value: "Boss".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);

    // Unary calls are still answered while the server drains.
    assert!(
        client
            .get_order(OrderId {
                value: "12".to_string(),
            })
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn shutdown_cancels_an_open_update_stream() {
    let server = TestServer::start_with(quick_shutdown()).await;
    let mut client = server.client().await;

    // The client sends one order and never closes its side.
    let (tx, rx) = mpsc::channel(4);
    tx.send(order("20", &["Mooer Micro Looper"], "Balmora"))
        .await
        .unwrap();
    let call = tokio::spawn(async move {
        client
            .update_orders(Request::new(ReceiverStream::new(rx)))
            .await
    });
    server.wait_for_streams(1).await;

    server.service.shutdown().await;

    let status = timeout(Duration::from_secs(2), call)
        .await
        .expect("update stream must end after shutdown")
        .unwrap()
        .unwrap_err();
    assert_eq!(status.code(), Code::Cancelled);
    server.wait_for_streams(0).await;
    assert!(server.service.store().get("20").is_ok());
    drop(tx);
}

#[tokio::test]
async fn shutdown_cancels_an_open_process_stream() {
    let server = TestServer::start_with(quick_shutdown()).await;
    let mut client = server.client().await;

    let (tx, rx) = mpsc::channel(4);
    tx.send(OrderId {
        value: "12".to_string(),
    })
    .await
    .unwrap();
    let mut shipments = client
        .process_orders(Request::new(ReceiverStream::new(rx)))
        .await
        .unwrap()
        .into_inner();
    server.wait_for_streams(1).await;

    server.service.shutdown().await;

    let msgs: Vec<_> = timeout(Duration::from_secs(2), async {
        let mut out = Vec::new();
        while let Some(msg) = shipments.next().await {
            out.push(msg);
        }
        out
    })
    .await
    .expect("process stream must end after shutdown");

    // The partial batch is discarded; only the terminal status arrives.
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].as_ref().unwrap_err().code(), Code::Cancelled);
    server.wait_for_streams(0).await;
    drop(tx);
}

#[tokio::test]
async fn intercepted_client_sends_call_metadata() {
    let server = TestServer::start().await;
    let channel = Channel::from_shared(format!("http://{}", server.addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = OrderManagementClient::with_interceptor(channel, CallLogger);

    let ack = client
        .add_order(with_call_metadata(order("102", &["Boss DD-8"], "Vivec")))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(ack.value, "Order 102 added");

    let updates = stream::iter(vec![order("102", &["Boss DD-8"], "Ald-ruhn")]);
    let ack = client
        .update_orders(with_call_metadata(updates))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(ack.value, "Orders processed: 102");
}
