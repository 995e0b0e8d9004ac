//! Signaling relay binary entry point
//!
//! # Usage
//!
//! ```bash
//! # Two-party rooms on the default port
//! cargo run -p parley-signaling-server
//!
//! # Custom address, unbounded rooms
//! cargo run -p parley-signaling-server -- \
//!   --bind-address 127.0.0.1:9000 \
//!   --room-capacity 0
//! ```

use clap::Parser;
use parley_signaling_server::{ServerConfig, SignalingServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Parley signaling relay
///
/// Assigns offerer/answerer roles and forwards signaling frames between the
/// peers of each room.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080", env = "PARLEY_BIND_ADDRESS")]
    bind_address: String,

    /// WebSocket path rooms are served on
    #[arg(long, default_value = "/signal", env = "PARLEY_SIGNAL_PATH")]
    path: String,

    /// Room joined when the URL names none
    #[arg(long, default_value = "default", env = "PARLEY_DEFAULT_ROOM")]
    default_room: String,

    /// Peers per room (0 = unbounded)
    #[arg(long, default_value_t = 2, env = "PARLEY_ROOM_CAPACITY")]
    room_capacity: usize,

    /// Frames queued per connection
    #[arg(long, default_value_t = 128, env = "PARLEY_OUTBOUND_BUFFER")]
    outbound_buffer: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_address: self.bind_address,
            path: self.path,
            default_room: self.default_room,
            room_capacity: (self.room_capacity > 0).then_some(self.room_capacity),
            outbound_buffer: self.outbound_buffer,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("\nCtrl+C received, shutting down...");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("signaling-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;

    let config = args.into_config();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        path = %config.path,
        default_room = %config.default_room,
        room_capacity = ?config.room_capacity,
        "Parley signaling relay starting"
    );

    let handle = SignalingServer::new(config)?.start().await?;
    info!("Relay running on {}. Press Ctrl+C to shutdown.", handle.local_addr());

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, stopping relay...");
    handle.shutdown().await;
    info!("Signaling relay shut down gracefully");

    Ok(())
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG wins; otherwise info
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}
