//! Service configuration assembled from the environment

use std::net::SocketAddr;

use config_rs::ServiceConfig;

use crate::gemini_client::GeminiConfig;
use crate::validation::MAX_PAYLOAD_SIZE;

pub const SERVICE_NAME: &str = "calculator";
pub const DEFAULT_PORT: u16 = 8900;

#[derive(Debug, Clone)]
pub struct CalculatorConfig {
    pub bind_addr: SocketAddr,
    pub environment: String,
    pub max_payload_size: usize,
    pub gemini: GeminiConfig,
}

impl CalculatorConfig {
    /// Read `CALCULATOR_SERVICE_ADDR`/`CALCULATOR_SERVICE_PORT`, `ENV`,
    /// `MAX_PAYLOAD_SIZE` and the `GEMINI_*` variables.
    pub fn from_env() -> Self {
        let service = ServiceConfig::new(SERVICE_NAME);
        Self {
            bind_addr: service.get_bind_address(DEFAULT_PORT),
            environment: service.environment(),
            max_payload_size: config_rs::get_env_or("MAX_PAYLOAD_SIZE", MAX_PAYLOAD_SIZE),
            gemini: GeminiConfig::from_env(),
        }
    }
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            environment: "dev".to_string(),
            max_payload_size: MAX_PAYLOAD_SIZE,
            gemini: GeminiConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CalculatorConfig::default();
        assert_eq!(config.bind_addr.port(), 8900);
        assert_eq!(config.max_payload_size, 10 * 1024 * 1024);
        assert_eq!(config.environment, "dev");
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert!(config.gemini.api_key.is_none());
    }

    #[test]
    fn test_gemini_overrides() {
        std::env::set_var("GEMINI_MODEL", "gemini-1.5-pro");
        std::env::set_var("GEMINI_MAX_RETRIES", "5");
        let gemini = GeminiConfig::from_env();
        assert_eq!(gemini.model, "gemini-1.5-pro");
        assert_eq!(gemini.max_retries, 5);
        std::env::remove_var("GEMINI_MODEL");
        std::env::remove_var("GEMINI_MAX_RETRIES");
    }
}
