use clap::Parser;
use futures::{StreamExt, stream};
use orderflow_tonic_core::proto::{
    Order, OrderId, SearchQuery, order_management_client::OrderManagementClient,
};
use orderflow_tonic_server::client::{CallLogger, with_call_metadata};
use tonic::{codec::CompressionEncoding, transport::Channel};

/// Walks through every call of the order-management service against a running
/// `orderflow-server`.
#[derive(Parser, Debug)]
#[command(name = "order-client", version, about = "Demo client for orderflow-server")]
struct ClientArgs {
    /// Server endpoint.
    ///
    /// Environment variable: `SERVER_URL`
    #[arg(long, env = "SERVER_URL", default_value_t = String::from("http://127.0.0.1:50051"))]
    server_url: String,

    /// Compress requests and accept compressed responses with zstd.
    #[arg(long, default_value_t = false)]
    zstd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let args = ClientArgs::parse();
    let channel = Channel::from_shared(args.server_url.clone())?
        .connect()
        .await?;
    let mut client = OrderManagementClient::with_interceptor(channel, CallLogger);
    if args.zstd {
        client = client
            .send_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Zstd);
    }
    tracing::info!("Connected to {}", args.server_url);

    // AddOrder
    let resp = client
        .add_order(with_call_metadata(order(
            "101",
            &["Mooer Micro Looper", "Boss DD-8"],
            "Vivec",
            395.00,
        )))
        .await?;
    let timestamp = resp.metadata().get("timestamp").cloned();
    let location = resp.metadata().get("location").cloned();
    tracing::info!(?timestamp, ?location, "AddOrder: {}", resp.into_inner().value);

    // GetOrder
    let fetched = client
        .get_order(with_call_metadata(OrderId {
            value: "101".to_string(),
        }))
        .await?
        .into_inner();
    tracing::info!("GetOrder: {fetched:?}");

    // SearchOrders
    let mut matches = client
        .search_orders(with_call_metadata(SearchQuery {
            value: "Boss".to_string(),
        }))
        .await?
        .into_inner();
    while let Some(found) = matches.next().await {
        let found = found?;
        tracing::info!(order_id = %found.id, "SearchOrders match: {:?}", found.items);
    }

    // UpdateOrders
    let updates = vec![
        order("12", &["Coca-Cola Zero", "Big Mac"], "Batumi", 18.50),
        order("14", &["Sofa", "Table", "Chair"], "Balmora", 1250.00),
        order("16", &["Holy Grail"], "Erathia", 1000.00),
    ];
    let outbound = stream::iter(updates)
        .inspect(|o| tracing::info!(order_id = %o.id, "UpdateOrders: sending order"));
    let ack = client
        .update_orders(with_call_metadata(outbound))
        .await?
        .into_inner();
    tracing::info!("UpdateOrders: {}", ack.value);

    // ProcessOrders
    let ids = ["12", "13", "14"].map(|value| OrderId {
        value: value.to_string(),
    });
    let outbound = stream::iter(ids)
        .inspect(|id| tracing::info!(order_id = %id.value, "ProcessOrders: sending id"));
    let mut shipments = client
        .process_orders(with_call_metadata(outbound))
        .await?
        .into_inner();
    while let Some(shipment) = shipments.next().await {
        let shipment = shipment?;
        let ids: Vec<_> = shipment.order_list.iter().map(|o| o.id.as_str()).collect();
        tracing::info!(
            destination = %shipment.id,
            status = %shipment.status,
            "ProcessOrders: received shipment {ids:?}"
        );
    }
    tracing::info!("ProcessOrders stream closed");

    Ok(())
}

fn order(id: &str, items: &[&str], destination: &str, price: f32) -> Order {
    Order {
        id: id.to_string(),
        items: items.iter().map(ToString::to_string).collect(),
        description: String::new(),
        price,
        destination: destination.to_string(),
    }
}
