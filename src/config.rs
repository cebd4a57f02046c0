use log::{debug, info};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::DeviceEndpoint;

const DEFAULT_SIMULATOR_ADDR: &str = "127.0.0.1:4001";
const DEFAULT_SIMULATOR_NAME: &str = "FakeScale";
const DEFAULT_SIMULATOR_INTERVAL_MS: u64 = 2000;
const DEFAULT_SESSION_DURATION_SECS: u64 = 60;
const DEFAULT_SCAN_SUBNET: &str = "192.168.1.0/24";
const DEFAULT_SCAN_PORTS: [u16; 6] = [23, 4001, 4002, 8080, 502, 4196];
const DEFAULT_EXPORT_DIR: &str = "logFiles";

/// Whether sessions target the local simulator or real scales on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Simulator,
    Real,
}

impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulator" => Ok(OperatingMode::Simulator),
            "real" => Ok(OperatingMode::Real),
            other => Err(format!(
                "Unknown SCALE_MODE '{}', expected 'simulator' or 'real'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScaleConfig {
    pub mode: OperatingMode,
    pub devices: Vec<DeviceEndpoint>,
    pub simulator: DeviceEndpoint,
    pub simulator_interval: Duration,
    pub session_duration: Duration,
    pub scan_subnet: String,
    pub scan_ports: Vec<u16>,
    pub export_dir: PathBuf,
}

impl ScaleConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build the configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, Box<dyn std::error::Error>> {
        let mode = match vars.get("SCALE_MODE") {
            Some(value) => value.parse::<OperatingMode>()?,
            None => OperatingMode::Simulator,
        };

        let devices = parse_devices(vars)?;

        let simulator_addr = vars
            .get("SIMULATOR_ADDR")
            .map(String::as_str)
            .unwrap_or(DEFAULT_SIMULATOR_ADDR);
        let (sim_host, sim_port) = parse_host_port(simulator_addr)?;
        let simulator = DeviceEndpoint::new(
            sim_host,
            sim_port,
            vars.get("SIMULATOR_NAME")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SIMULATOR_NAME.to_string()),
        );

        let simulator_interval = Duration::from_millis(parse_number(
            vars,
            "SIMULATOR_INTERVAL_MS",
            DEFAULT_SIMULATOR_INTERVAL_MS,
        )?);
        let session_duration = Duration::from_secs(parse_number(
            vars,
            "SESSION_DURATION_SECS",
            DEFAULT_SESSION_DURATION_SECS,
        )?);

        let scan_subnet = vars
            .get("SCAN_SUBNET")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SCAN_SUBNET.to_string());

        let scan_ports = match vars.get("SCAN_PORTS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| {
                    p.parse::<u16>()
                        .map_err(|_| format!("Invalid port '{}' in SCAN_PORTS", p))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => DEFAULT_SCAN_PORTS.to_vec(),
        };

        let export_dir = PathBuf::from(
            vars.get("EXPORT_DIR")
                .map(String::as_str)
                .unwrap_or(DEFAULT_EXPORT_DIR),
        );

        if mode == OperatingMode::Real && devices.is_empty() {
            info!("No scales configured for real mode, endpoints will come from the network scan");
        }

        Ok(ScaleConfig {
            mode,
            devices,
            simulator,
            simulator_interval,
            session_duration,
            scan_subnet,
            scan_ports,
            export_dir,
        })
    }

    /// Endpoints to poll for the configured mode, before any discovery.
    pub fn endpoints(&self) -> Vec<DeviceEndpoint> {
        match self.mode {
            OperatingMode::Simulator => vec![self.simulator.clone()],
            OperatingMode::Real => self.devices.clone(),
        }
    }
}

fn parse_devices(
    vars: &HashMap<String, String>,
) -> Result<Vec<DeviceEndpoint>, Box<dyn std::error::Error>> {
    let mut devices = Vec::new();

    // Try SCALE_DEVICES format first
    if let Some(list) = vars.get("SCALE_DEVICES") {
        debug!("Found SCALE_DEVICES: '{}'", list);
        for pair in list.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (addr, name) = pair.split_once('=').ok_or_else(|| {
                format!("Expected host:port=Name in SCALE_DEVICES, got '{}'", pair)
            })?;
            let (host, port) = parse_host_port(addr)?;
            let name = name.trim();
            if name.is_empty() {
                return Err(format!("Missing scale name for '{}'", addr.trim()).into());
            }
            devices.push(DeviceEndpoint::new(host, port, name));
        }
    } else {
        // Fallback to individual environment variables, ordered by index
        let mut indexed = Vec::new();
        for (key, value) in vars {
            if let Some(index) = key
                .strip_prefix("SCALE_DEVICE_")
                .and_then(|s| s.strip_suffix("_ADDR"))
            {
                let name_key = format!("SCALE_DEVICE_{}_NAME", index);
                let name = vars
                    .get(&name_key)
                    .cloned()
                    .ok_or_else(|| format!("{} is set but {} is missing", key, name_key))?;
                let (host, port) = parse_host_port(value)?;
                indexed.push((index.to_string(), DeviceEndpoint::new(host, port, name.trim())));
            }
        }
        indexed.sort_by(|a, b| match (a.0.parse::<u32>(), b.0.parse::<u32>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.0.cmp(&b.0),
        });
        devices.extend(indexed.into_iter().map(|(_, device)| device));
    }

    debug!("Total scales configured: {}", devices.len());
    for device in &devices {
        debug!("Scale: {}", device);
    }

    Ok(devices)
}

fn parse_host_port(addr: &str) -> Result<(String, u16), Box<dyn std::error::Error>> {
    let addr = addr.trim();
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("Expected host:port, got '{}'", addr))?;
    if host.is_empty() {
        return Err(format!("Missing host in '{}'", addr).into());
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("Invalid port in '{}'", addr))?;
    Ok((host.to_string(), port))
}

fn parse_number(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, Box<dyn std::error::Error>> {
    match vars.get(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("{} must be a whole number, got '{}'", key, value).into()),
        None => Ok(default),
    }
}
