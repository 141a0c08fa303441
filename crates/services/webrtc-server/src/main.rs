//! Iris relay server binary entry point
//!
//! Accepts WebSocket signaling on `/signal`, answers WebRTC offers and loops
//! every inbound track back to its sender.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:8080, Google STUN, Redis on localhost
//! cargo run -p iris-relay-server
//!
//! # Custom listener and bus
//! cargo run -p iris-relay-server -- \
//!   --listen-addr 127.0.0.1:9000 \
//!   --redis-url redis://cache:6379 \
//!   --frame-topic camera-frames
//!
//! # Run without frame sampling
//! cargo run -p iris-relay-server -- --no-redis
//! ```

use anyhow::Context;
use clap::Parser;
use iris_webrtc::{
    FramePublisher, FrameSampler, RedisPublisher, RelayConfig, RelayServer, SessionContext,
    TurnServerConfig, WebRtcEngineFactory,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Iris relay server
///
/// WebRTC signaling relay with media loopback and periodic frame sampling.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for HTTP and WebSocket signaling
    #[arg(long, default_value = "0.0.0.0:8080", env = "IRIS_LISTEN_ADDR")]
    listen_addr: SocketAddr,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "IRIS_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// TURN server URL (turn: or turns:)
    #[arg(long, env = "IRIS_TURN_URL", requires = "turn_username", requires = "turn_credential")]
    turn_url: Option<String>,

    /// TURN username
    #[arg(long, env = "IRIS_TURN_USERNAME")]
    turn_username: Option<String>,

    /// TURN credential
    #[arg(long, env = "IRIS_TURN_CREDENTIAL")]
    turn_credential: Option<String>,

    /// Redis URL for sampled frame publishing
    #[arg(long, default_value = "redis://localhost:6379", env = "IRIS_REDIS_URL")]
    redis_url: String,

    /// Milliseconds allowed for reaching Redis at startup and per command
    #[arg(long, default_value_t = 2000, env = "IRIS_REDIS_TIMEOUT_MS")]
    redis_timeout_ms: u64,

    /// Disable frame sampling entirely
    #[arg(long, default_value_t = false, env = "IRIS_NO_REDIS")]
    no_redis: bool,

    /// Pub/sub topic for sampled frames
    #[arg(long, default_value = "video-frames", env = "IRIS_FRAME_TOPIC")]
    frame_topic: String,

    /// Frame sampling interval in milliseconds
    #[arg(long, default_value_t = 5000, env = "IRIS_SAMPLE_INTERVAL_MS")]
    sample_interval_ms: u64,

    /// Seconds a session may negotiate before it is closed (0 disables)
    #[arg(long, default_value_t = 30, env = "IRIS_NEGOTIATION_TIMEOUT_SECS")]
    negotiation_timeout_secs: u64,

    /// Per-packet relay buffer size in bytes
    #[arg(long, default_value_t = 1500, env = "IRIS_RELAY_BUFFER_SIZE")]
    relay_buffer_size: usize,
}

impl Args {
    fn into_config(self) -> RelayConfig {
        let turn_servers = match (self.turn_url, self.turn_username, self.turn_credential) {
            (Some(url), Some(username), Some(credential)) => vec![TurnServerConfig {
                url,
                username,
                credential,
            }],
            _ => vec![],
        };

        RelayConfig {
            listen_addr: self.listen_addr,
            stun_servers: self.stun_servers,
            turn_servers,
            redis_url: (!self.no_redis).then_some(self.redis_url),
            redis_timeout_ms: self.redis_timeout_ms,
            frame_topic: self.frame_topic,
            sample_interval_ms: self.sample_interval_ms,
            negotiation_timeout_secs: self.negotiation_timeout_secs,
            relay_buffer_size: self.relay_buffer_size,
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // First Ctrl+C starts a graceful shutdown, the second one exits
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutting_down = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if shutting_down.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(1);
        }
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("relay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_rx))
}

async fn async_main(args: Args, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Iris relay server starting"
    );

    let config = args.into_config();
    config.validate()?;

    info!(
        listen_addr = %config.listen_addr,
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        frame_topic = %config.frame_topic,
        "Configuration loaded"
    );

    let sampler = build_sampler(&config).await;
    let config = Arc::new(config);
    let engines = Arc::new(WebRtcEngineFactory::new(Arc::clone(&config)));
    let ctx = Arc::new(SessionContext::new(
        Arc::clone(&config),
        engines,
        Arc::new(sampler),
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Iris relay server running on {}", config.listen_addr);

    RelayServer::new(ctx)
        .serve(listener, async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("Shutdown signal received");
        })
        .await?;

    info!("Iris relay server shut down gracefully");
    Ok(())
}

/// Check the bus once; sampling stays off for the whole run if it is down
async fn build_sampler(config: &RelayConfig) -> FrameSampler {
    let publisher: Option<Arc<dyn FramePublisher>> = match &config.redis_url {
        Some(url) => match RedisPublisher::connect(url, config.redis_timeout()).await {
            Ok(publisher) => Some(Arc::new(publisher) as Arc<dyn FramePublisher>),
            Err(e) => {
                warn!("Redis not available: {} (Frame extraction disabled)", e);
                None
            }
        },
        None => {
            info!("Frame extraction disabled");
            None
        }
    };

    FrameSampler::new(publisher, config.frame_topic.clone(), config.sample_interval())
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
