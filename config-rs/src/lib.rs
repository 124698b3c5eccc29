//! config-rs/lib.rs
//! Shared configuration utilities for the calculator workspace
//! Resolves ports, bind addresses and typed settings from the environment

use std::env;
use std::fmt::Display;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Load variables from a `.env` file in the working directory or its parents.
///
/// Runs before logging is initialised so `RUST_LOG` can come from the file;
/// the caller logs the returned path once a subscriber is installed.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenv::dotenv().ok()
}

/// Load variables from a specific env file. Existing variables are not overwritten.
pub fn load_dotenv_from(path: &Path) -> Option<PathBuf> {
    dotenv::from_path(path).ok().map(|_| path.to_path_buf())
}

/// Read a non-empty string variable
pub fn get_env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a typed variable, falling back to `default` when unset or unparsable
pub fn get_env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
{
    match get_env_string(name) {
        Some(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            log::warn!("Invalid value '{}' in {}, using default {}", raw, name, default);
            default
        }),
        None => default,
    }
}

/// Get service port from `<SERVICE>_SERVICE_PORT` with fallback
///
/// # Arguments
/// * `service_name` - The name of the service (e.g., "CALCULATOR")
/// * `default_port` - The port to use if not specified in environment
pub fn get_service_port(service_name: &str, default_port: u16) -> u16 {
    let var_name = format!("{}_SERVICE_PORT", env_prefix(service_name));
    get_env_or(&var_name, default_port)
}

/// Create a SocketAddr for binding a service
///
/// `<SERVICE>_SERVICE_ADDR` overrides everything and may be given as
/// `host:port` or `http://host:port`. Otherwise binds all interfaces on the
/// port from [`get_service_port`].
pub fn get_bind_address(service_name: &str, default_port: u16) -> SocketAddr {
    let var_name = format!("{}_SERVICE_ADDR", env_prefix(service_name));

    if let Some(addr_str) = get_env_string(&var_name) {
        match parse_socket_addr(&addr_str) {
            Some(addr) => return addr,
            None => log::warn!("Invalid address format in {}, using default", var_name),
        }
    }

    let port = get_service_port(service_name, default_port);
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

fn parse_socket_addr(raw: &str) -> Option<SocketAddr> {
    let stripped = raw
        .strip_prefix("http://")
        .or_else(|| raw.strip_prefix("https://"))
        .unwrap_or(raw);
    stripped.trim_end_matches('/').parse::<SocketAddr>().ok()
}

/// Environment variable prefix for a service name ("calculator-service" -> "CALCULATOR_SERVICE")
fn env_prefix(service_name: &str) -> String {
    service_name.replace('-', "_").to_uppercase()
}

/// Per-service view over the helpers above
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    name: String,
}

impl ServiceConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn get_service_port(&self, default_port: u16) -> u16 {
        get_service_port(&self.name, default_port)
    }

    pub fn get_bind_address(&self, default_port: u16) -> SocketAddr {
        get_bind_address(&self.name, default_port)
    }

    /// Deployment environment from `ENV` (e.g. "dev", "prod")
    pub fn environment(&self) -> String {
        get_env_string("ENV").unwrap_or_else(|| "dev".to_string())
    }
}
