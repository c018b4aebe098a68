//! presenced daemon.
//!
//! Loads the configuration, populates the device registry with simulated
//! collaborators under the configured identifiers, hosts the presence
//! controller as a managed service, and drives the simulated sensor so the
//! control loop has transitions to react to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use presence_runtime::ServiceManager;

use presenced::config::{AppConfig, PresenceConfig};
use presenced::devices::sim::{SimPlug, SimSensor};
use presenced::devices::{DetectionStatus, DeviceRegistry};
use presenced::service::PresenceService;

/// Presence-triggered smart plug controller
#[derive(Parser, Debug)]
#[command(name = "presenced")]
#[command(about = "Presence-triggered smart plug controller", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "presenced.toml")]
    config: PathBuf,

    /// Seconds between random flips of the simulated sensor
    #[arg(long, default_value_t = 20)]
    sim_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("presenced=info,presence_runtime=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("starting presenced v{}", env!("CARGO_PKG_VERSION"));

    let app_config = AppConfig::load(&args.config)
        .await
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    // Configuration errors are fatal at startup.
    let controller_config = PresenceConfig::from_attrs(&app_config.controller)
        .context("invalid [controller] configuration")?;

    // No sensor or plug protocol lives here; the registry carries simulated
    // devices under the configured identifiers.
    let registry = Arc::new(DeviceRegistry::new());
    let sensor = SimSensor::new(&controller_config.sensor);
    let plug = SimPlug::new(&controller_config.kasa);
    registry.register_sensor(sensor.clone());
    registry.register_plug(plug.clone());

    let manager = ServiceManager::new_shared();
    let handle = manager
        .spawn_with_config(
            PresenceService::new(Arc::clone(&registry)),
            app_config.controller.clone(),
        )
        .await?;
    info!(service_id = %handle.service_id, "presence service spawned");

    tokio::spawn(drive_sim_sensor(
        sensor,
        Duration::from_secs(args.sim_interval.max(1)),
    ));

    shutdown_signal().await;

    info!("shutting down");
    if let Err(e) = manager.shutdown_all().await {
        warn!(error = %e, "services did not shut down cleanly");
    }
    Ok(())
}

/// Randomly flip the simulated sensor between detection states so the demo
/// loop sees presence transitions.
async fn drive_sim_sensor(sensor: Arc<SimSensor>, interval: Duration) {
    let statuses = [
        DetectionStatus::NoTarget,
        DetectionStatus::MovingTarget,
        DetectionStatus::StaticTarget,
        DetectionStatus::MovingAndStaticTargets,
    ];

    loop {
        tokio::time::sleep(interval).await;
        let next = statuses[rand::thread_rng().gen_range(0..statuses.len())];
        info!(status = %next, "simulated sensor update");
        sensor.set_status(next);
    }
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received terminate signal"),
    }
}
