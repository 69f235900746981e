//! Configuration for the coderunner server.
//!
//! This module handles:
//! - The listen address and its `PORT` environment variable
//! - The CORS origin policy and its `CORS_ORIGIN` environment variable
//!
//! Orchestrator-side settings (admission cap, deadlines, work volume) live
//! in `coderunner-core`.

use std::net::SocketAddr;

use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use getset::Getters;
use tower_http::cors::{Any, CorsLayer};

use crate::{ServerError, ServerResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable for the listen port.
pub const PORT_ENV_VAR: &str = "PORT";

/// Environment variable for the allowed CORS origin.
pub const CORS_ORIGIN_ENV_VAR: &str = "CORS_ORIGIN";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default CORS origin: any.
pub const DEFAULT_CORS_ORIGIN: &str = "*";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Settings the adapters need to serve traffic.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Config {
    /// Address to listen on.
    addr: SocketAddr,

    /// Allowed CORS origin, `*` for any.
    cors_origin: String,
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Create a configuration listening on all interfaces.
    pub fn new(port: u16, cors_origin: impl Into<String>) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            cors_origin: cors_origin.into(),
        }
    }

    /// Load the configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> ServerResult<Self> {
        let port = match std::env::var(PORT_ENV_VAR) {
            Ok(value) => value.parse::<u16>().map_err(|_| {
                ServerError::Config(format!(
                    "{} must be a port number, got {:?}",
                    PORT_ENV_VAR, value
                ))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let cors_origin = std::env::var(CORS_ORIGIN_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_CORS_ORIGIN.to_string());

        Ok(Self::new(port, cors_origin))
    }

    /// Override the listen port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([0, 0, 0, 0], port));
        self
    }

    /// Override the allowed CORS origin.
    pub fn with_cors_origin(mut self, cors_origin: impl Into<String>) -> Self {
        self.cors_origin = cors_origin.into();
        self
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Build the CORS layer for the configured origin.
pub fn cors_layer(origin: &str) -> ServerResult<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([ACCEPT, CONTENT_TYPE]);

    if origin == "*" {
        return Ok(layer.allow_origin(Any));
    }

    let origin = origin.parse::<HeaderValue>().map_err(|_| {
        ServerError::Config(format!("{:?} is not a valid CORS origin", origin))
    })?;
    Ok(layer.allow_origin(origin))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_listen_address_covers_all_interfaces() {
        let config = Config::new(3000, "*");
        assert_eq!(config.get_addr().port(), 3000);
        assert!(config.get_addr().ip().is_unspecified());
    }

    #[test]
    fn overrides_replace_the_loaded_values() {
        let config = Config::new(DEFAULT_PORT, DEFAULT_CORS_ORIGIN)
            .with_port(8080)
            .with_cors_origin("https://runner.example");

        assert_eq!(config.get_addr().port(), 8080);
        assert_eq!(config.get_cors_origin(), "https://runner.example");
    }

    #[test]
    fn both_wildcard_and_explicit_origins_build_a_layer() {
        assert!(cors_layer("*").is_ok());
        assert!(cors_layer("https://runner.example").is_ok());
        assert!(cors_layer("not a header\nvalue").is_err());
    }
}
