mod config;
mod connection;
mod lifecycle;
mod navigation;
mod network;
mod session;
mod telemetry;
mod transport;

use anyhow::Result;
use config::Config;
use connection::ConnectionManager;
use dashlink_shared::{ApStateChange, ConnectionState, DeviceId};
use lifecycle::{SysfsPowerSource, TracingStayAwake};
use network::BroadcastApSource;
use session::{Session, SessionConfig, SessionDeps};
use std::path::Path;
use std::sync::Arc;
use transport::{BtDiscoveryConfig, RfcommConfig, RfcommTransport};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config_path = Config::resolve_path(std::env::args().nth(1));
    let mut config = Config::load(&config_path)?;
    info!("Dashlink starting (config: {})", config_path.display());

    let transport = Arc::new(
        RfcommTransport::new(RfcommConfig {
            channel: config.device.channel,
            discovery: BtDiscoveryConfig::default(),
        })
        .await?,
    );

    let mut device = config.device()?;
    if device.is_none() {
        device = pick_device(&transport, &mut config, &config_path).await;
    }

    let ap_source = Arc::new(BroadcastApSource::default());
    let session = Session::new(
        SessionConfig {
            device,
            poll_interval: config.poll_interval(),
            on_failure: config.connection.on_failure,
            start_destination: config.start_destination()?,
            ..Default::default()
        },
        SessionDeps {
            connection: ConnectionManager::new(transport.clone(), config.connection_config()),
            power: Arc::new(SysfsPowerSource::new(config.lifecycle.power_supply_dir.clone())),
            stay_awake: Arc::new(TracingStayAwake::new()),
            ap_source: ap_source.clone(),
        },
    );

    // Log connection progress for the display
    let mut states = session.connection_states();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match &state {
                ConnectionState::Failed { reason } => warn!("[CONN] {}", reason),
                _ => info!("[CONN] {}", state),
            }
        }
    });

    // Access-point notifications arrive as "<previous> <current>" code pairs on stdin
    let ap_feed = ap_source.clone();
    tokio::spawn(async move {
        if let Err(e) = feed_ap_codes(ap_feed).await {
            debug!("[AP] Stdin feed closed: {}", e);
        }
    });

    session.start_up().await;
    info!(
        "Session started over {}, showing {}",
        session.connection().transport_name(),
        session.navigator().current()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    session.shutdown().await;

    Ok(())
}

/// Scan for an adapter when none is configured and remember the first match
async fn pick_device(
    transport: &RfcommTransport,
    config: &mut Config,
    config_path: &Path,
) -> Option<DeviceId> {
    let found = match transport.start_discovery().await {
        Ok(found) => found,
        Err(e) => {
            warn!("[BT] Discovery did not complete: {}", e);
            return None;
        }
    };
    for candidate in &found {
        info!("[BT] Found {} (rssi {:?})", candidate.id, candidate.rssi);
    }
    let device = found.into_iter().next()?.id;

    config.set_device(&device);
    if let Err(e) = config.save(config_path) {
        error!("Failed to save config: {:#}", e);
    }
    Some(device)
}

async fn feed_ap_codes(source: Arc<BroadcastApSource>) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let codes: Vec<i32> = line
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect();
        match codes.as_slice() {
            [previous, current] => {
                source.notify(ApStateChange::from_codes(*previous, *current));
            }
            _ => debug!("[AP] Ignoring input {:?}", line),
        }
    }
    Ok(())
}
