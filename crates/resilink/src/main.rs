//! resilink - command-line client for the resilience layer.
//!
//! Issues HTTP calls through the retrying, caching pipeline and listens on
//! (or sends to) the managed WebSocket.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use resilink::cache::{FileStorage, MemoryStorage, Storage};
use resilink::http::{ReqwestTransport, RequestOptions};
use resilink::socket::{EventKind, TungsteniteFactory};
use resilink::{
    ApiClient, ConnectionManager, Envelope, IdentityProvider, OutboundFrame, ResilinkConfig,
    StaticIdentity, handler,
};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "resilink")]
#[command(about = "Resilient HTTP and WebSocket client")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "RESILINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// GET an endpoint
    Get {
        /// Endpoint path, e.g. /items
        endpoint: String,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },

    /// POST a JSON body to an endpoint
    Post {
        /// Endpoint path
        endpoint: String,

        /// JSON body
        #[arg(short, long, default_value = "{}")]
        body: String,
    },

    /// Check backend health
    Health,

    /// Connect to the WebSocket and print events
    Listen {
        /// User identity to authenticate with
        #[arg(long, env = "RESILINK_USER_ID")]
        user_id: Option<String>,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Send one frame over the WebSocket
    Send {
        /// Frame type
        kind: String,

        /// JSON payload merged into the frame
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// User identity to authenticate with
        #[arg(long, env = "RESILINK_USER_ID")]
        user_id: Option<String>,

        /// Seconds to wait for the connection
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },

    /// Remove cached responses
    CacheClear {
        /// Only remove entries whose key contains this text
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("resilink").join("config.toml"))
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<ResilinkConfig> {
    let mut config = match explicit {
        Some(path) => ResilinkConfig::from_file(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => ResilinkConfig::from_file(&path)?,
            None => ResilinkConfig::default(),
        },
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn open_storage(config: &ResilinkConfig) -> Arc<dyn Storage> {
    let Some(dir) = config.cache.resolve_dir() else {
        warn!("no cache directory available, using in-memory cache");
        return Arc::new(MemoryStorage::new());
    };
    match FileStorage::open(&dir) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cache directory unusable, using in-memory cache");
            Arc::new(MemoryStorage::new())
        }
    }
}

fn build_api(config: &ResilinkConfig, identity: Arc<StaticIdentity>) -> anyhow::Result<ApiClient> {
    let transport = ReqwestTransport::new(config.http.timeout())
        .map_err(|e| resilink::ResilinkError::TransportSetup(e.to_string()))?;
    Ok(resilink::api_client(
        config,
        Arc::new(transport),
        identity,
        open_storage(config),
    )?)
}

fn print_envelope(envelope: &Envelope) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    if !envelope.is_success() {
        bail!("request failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("resilink=info".parse()?))
        .init();

    let cli = Cli::parse();

    if let Commands::InitConfig { output, force } = &cli.command {
        return init_config(output.clone(), *force);
    }

    let config = load_config(cli.config.as_deref())?;
    let identity = Arc::new(StaticIdentity::from_lookup(|key| std::env::var(key).ok()));

    match cli.command {
        Commands::Get {
            endpoint,
            params,
            no_cache,
        } => {
            let api = build_api(&config, identity)?;
            let params: BTreeMap<String, String> = params.into_iter().collect();
            let options = if no_cache {
                RequestOptions::uncached()
            } else {
                RequestOptions::default()
            };
            print_envelope(&api.get(&endpoint, &params, options).await?)?;
        }

        Commands::Post { endpoint, body } => {
            let api = build_api(&config, identity)?;
            let body: Value = serde_json::from_str(&body).context("--body is not valid JSON")?;
            print_envelope(&api.post(&endpoint, body, RequestOptions::default()).await?)?;
        }

        Commands::Health => {
            let api = build_api(&config, identity)?;
            print_envelope(&api.health_check().await?)?;
        }

        Commands::Listen { user_id, duration } => {
            let user_id = user_id.or_else(|| identity.current_user_id());
            listen(&config, user_id, duration).await?;
        }

        Commands::Send {
            kind,
            payload,
            user_id,
            wait,
        } => {
            let payload: Value =
                serde_json::from_str(&payload).context("--payload is not valid JSON")?;
            let frame = OutboundFrame::custom(kind, payload)?;
            let user_id = user_id.or_else(|| identity.current_user_id());
            send_once(&config, user_id, frame, Duration::from_secs(wait)).await?;
        }

        Commands::CacheClear { pattern } => {
            let api = build_api(&config, identity)?;
            let removed = api.clear_cache(pattern.as_deref());
            println!("removed {removed} cached responses");
        }

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn manager(config: &ResilinkConfig, user_id: Option<String>) -> ConnectionManager {
    resilink::connection_manager(config, Arc::new(TungsteniteFactory::default()), user_id)
}

async fn listen(
    config: &ResilinkConfig,
    user_id: Option<String>,
    duration: Option<u64>,
) -> anyhow::Result<()> {
    let manager = manager(config, user_id);
    let gave_up = Arc::new(Notify::new());

    for kind in EventKind::ALL {
        manager.on(
            kind,
            handler(move |payload| println!("{kind}\t{payload}")),
        );
    }
    {
        let gave_up = Arc::clone(&gave_up);
        manager.on(
            EventKind::MaxReconnectsReached,
            handler(move |_| gave_up.notify_one()),
        );
    }

    info!(url = %config.socket.url, "listening");
    manager.connect();

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        () = deadline => info!("duration elapsed"),
        () = gave_up.notified() => warn!("giving up after repeated reconnect failures"),
    }

    if tokio::time::timeout(Duration::from_secs(5), manager.shutdown()).await.is_err() {
        warn!("socket did not finish closing");
    }
    Ok(())
}

async fn send_once(
    config: &ResilinkConfig,
    user_id: Option<String>,
    frame: OutboundFrame,
    wait: Duration,
) -> anyhow::Result<()> {
    let manager = manager(config, user_id);
    let connected = Arc::new(Notify::new());
    {
        let connected = Arc::clone(&connected);
        manager.on(
            EventKind::Connected,
            handler(move |_| connected.notify_one()),
        );
    }

    // Queued until the socket opens, then flushed first.
    manager.send(frame);
    manager.connect();

    let opened = tokio::time::timeout(wait, connected.notified()).await.is_ok();
    let status = manager.status();
    if tokio::time::timeout(wait, manager.shutdown()).await.is_err() {
        warn!(wait_secs = wait.as_secs(), "socket did not finish closing");
    }

    if !opened {
        bail!(
            "could not connect to {} within {}s (state: {})",
            config.socket.url,
            wait.as_secs(),
            status.state
        );
    }
    println!("sent");
    Ok(())
}

fn init_config(output: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = output
        .or_else(default_config_path)
        .context("no config directory available; pass --output")?;

    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&path, ResilinkConfig::default().to_toml()?)?;
    println!("Config written to: {}", path.display());
    Ok(())
}
