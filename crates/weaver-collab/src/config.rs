use std::net::SocketAddr;

use weaver_persist::PersistConfig;

use crate::error::{CollabError, ServerError};

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 1234;

    /// Load configuration from environment variables.
    ///
    /// Optional env vars:
    /// - `HOST`: Listen host (default: 0.0.0.0)
    /// - `PORT`: Listen port (default: 1234)
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| Self::DEFAULT_HOST.to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Self::DEFAULT_PORT);

        Self { host, port }
    }

    pub fn addr(&self) -> Result<SocketAddr, ServerError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|source| ServerError::Addr { addr, source })
    }
}

/// Combined configuration for the collaboration host
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub persist: PersistConfig,
}

impl Config {
    /// Load all configuration from environment variables.
    pub fn from_env() -> Result<Self, CollabError> {
        Ok(Self {
            server: ServerConfig::from_env(),
            persist: PersistConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addr() {
        let addr = ServerConfig::default().addr().unwrap();
        assert_eq!(addr.port(), 1234);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn test_invalid_host_is_reported() {
        let config = ServerConfig {
            host: "not a host".into(),
            port: 80,
        };
        assert!(matches!(config.addr(), Err(ServerError::Addr { .. })));
    }
}
