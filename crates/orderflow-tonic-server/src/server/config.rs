use anyhow::bail;
use clap::Parser;
use core::num::NonZeroUsize;
use core::time::Duration;
use orderflow_tonic_core::types::DEFAULT_BATCH_SIZE;

/// Runtime configuration for the `orderflow-server` binary.
///
/// These settings control shipment batching, response buffering and the
/// listener of the order-management service. All values are parsed from CLI
/// arguments or environment variables (a `.env` file is honored), with
/// defaults matching the reference deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "orderflow-server",
    version,
    about = "A gRPC service that groups streamed orders into shipments"
)]
pub struct CliArgs {
    /// Number of order IDs consumed by `ProcessOrders` before every in-flight
    /// shipment is flushed back to the client.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Capacity of the response buffer between a stream task and the gRPC
    /// response stream.
    ///
    /// Lower values increase backpressure responsiveness; higher values let a
    /// stream task run further ahead of a slow client.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight streams to drain on shutdown before they
    /// are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Upper bound, in seconds, for producing the response of a single call.
    /// Client supplied `grpc-timeout` headers are honored when shorter.
    ///
    /// Server-streaming and bidirectional calls answer right away and are not
    /// bounded by it. `UpdateOrders` only answers at end-of-input, so this
    /// caps how long a client may keep its update stream open.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout: u64,

    /// Start with an empty order store instead of the sample orders.
    #[arg(long, env = "NO_SEED", default_value_t = false)]
    pub no_seed: bool,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/orderflow.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub batch_size: NonZeroUsize,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub request_timeout: Duration,
    pub seed: bool,
    pub server_addr: String,
    pub uds: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            stream_buffer_size: 8,
            shutdown_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
            seed: true,
            server_addr: String::from("0.0.0.0:50051"),
            uds: false,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let Some(batch_size) = NonZeroUsize::new(args.batch_size) else {
            bail!("BATCH_SIZE must be greater than 0");
        };

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.request_timeout == 0 {
            bail!("REQUEST_TIMEOUT must be greater than 0");
        }

        Ok(Self {
            batch_size,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            request_timeout: Duration::from_secs(args.request_timeout),
            seed: !args.no_seed,
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}
