use std::fmt;
use time::OffsetDateTime;

/// One pollable scale: where to connect and what to call it in logs and exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    pub display_name: String,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, port: u16, display_name: impl Into<String>) -> Self {
        DeviceEndpoint {
            host: host.into(),
            port,
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.display_name, self.host, self.port)
    }
}

/// A stable weight accepted from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: OffsetDateTime,
    pub source_name: String,
    pub weight: f64,
    pub raw_frame: String,
}
