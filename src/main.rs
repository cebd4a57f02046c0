use log::{error, info, warn};
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use scale_telemetry_logger::config::{OperatingMode, ScaleConfig};
use scale_telemetry_logger::export::save_readings;
use scale_telemetry_logger::models::DeviceEndpoint;
use scale_telemetry_logger::network::discovery::PROBE_TIMEOUT_MS;
use scale_telemetry_logger::network::scan_for_scales;
use scale_telemetry_logger::scale::{FrameParser, SessionSettings, SessionSupervisor};
use scale_telemetry_logger::simulator::run_simulator;
use scale_telemetry_logger::utils::format_datetime;

/// Cancel `token` on the first Ctrl+C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping sessions...");
                token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });
}

/// Endpoints to poll: configured ones, or in real mode with nothing
/// configured, whatever the network scan turns up.
async fn resolve_endpoints(
    config: &ScaleConfig,
    cancel: &CancellationToken,
) -> Vec<DeviceEndpoint> {
    if config.mode == OperatingMode::Simulator {
        info!("Running in SIMULATOR mode");
        return config.endpoints();
    }

    info!("Running in REAL DEVICE mode");
    let found = match scan_for_scales(
        &config.scan_subnet,
        &config.scan_ports,
        Duration::from_millis(PROBE_TIMEOUT_MS),
        cancel,
    )
    .await
    {
        Ok(found) => found,
        Err(e) => {
            error!("Network scan failed: {}", e);
            Vec::new()
        }
    };
    if !found.is_empty() {
        info!("Devices detected: {:?}", found);
    }

    let configured = config.endpoints();
    if !configured.is_empty() {
        return configured;
    }
    found
        .into_iter()
        .map(|(host, port)| {
            let name = format!("{}:{}", host, port);
            DeviceEndpoint::new(host, port, name)
        })
        .collect()
}

async fn poll_scales(config: ScaleConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let endpoints = resolve_endpoints(&config, &cancel).await;
    if cancel.is_cancelled() {
        info!("Stopped before polling any scale");
        return Ok(());
    }
    if endpoints.is_empty() {
        warn!("No scales to poll");
        return Ok(());
    }

    let start_time = OffsetDateTime::now_utc();
    info!("Starting capture at: {}", format_datetime(&start_time));

    let supervisor = SessionSupervisor::new(
        endpoints,
        SessionSettings::new(config.session_duration),
        FrameParser::default(),
    );
    let result = supervisor.run(cancel).await;

    info!(
        "Capture complete at: {}",
        format_datetime(&OffsetDateTime::now_utc())
    );

    // Print summary
    for session in &result.sessions {
        info!("Summary for {}:", session.name);
        info!("  Outcome: {}", session.outcome);
        info!("  Stable readings: {}", session.readings);
    }

    match save_readings(&result.readings, &config.export_dir) {
        Ok(Some(path)) => info!("Data saved to {}", path.display()),
        Ok(None) => warn!("No stable readings captured."),
        Err(e) => error!("Failed to save readings: {}", e),
    }

    Ok(())
}

async fn serve_simulator(config: ScaleConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let addr = (config.simulator.host.as_str(), config.simulator.port);
    let listener = TcpListener::bind(addr).await?;
    run_simulator(listener, config.simulator_interval, cancel).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match ScaleConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let result = match std::env::args().nth(1).as_deref() {
        Some("simulate") => serve_simulator(config).await,
        Some(other) => Err(format!("Unknown command '{}', expected 'simulate'", other).into()),
        None => poll_scales(config).await,
    };

    match result {
        Ok(_) => info!("Program completed successfully"),
        Err(e) => {
            error!("Fatal error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
