//! API Configuration Module
//!
//! This module provides configuration for the HTTP listener, CORS, and the
//! push channel. Configuration is loaded from environment variables with
//! sensible defaults for development.

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for the listener, CORS, and push channel sizing.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Listener Configuration
    // ========================================================================
    /// Host to bind the HTTP listener to.
    pub bind_host: String,

    /// Port to bind the HTTP listener to.
    pub port: u16,

    // ========================================================================
    // Push Channel Configuration
    // ========================================================================
    /// Buffered envelopes per broadcast channel before slow consumers lag.
    pub ws_capacity: usize,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            ws_capacity: 1000,
            // Empty = allow all, permissive for development
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SYMPOSIUM_BIND_HOST`: Listener host (default: "0.0.0.0")
    /// - `SYMPOSIUM_PORT`: Listener port (default: 8080)
    /// - `SYMPOSIUM_WS_CAPACITY`: Broadcast buffer size (default: 1000)
    /// - `SYMPOSIUM_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_host =
            std::env::var("SYMPOSIUM_BIND_HOST").unwrap_or(defaults.bind_host);

        let port = std::env::var("SYMPOSIUM_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port);

        let ws_capacity = std::env::var("SYMPOSIUM_WS_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.ws_capacity);

        let cors_origins = std::env::var("SYMPOSIUM_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            bind_host,
            port,
            ws_capacity,
            cors_origins,
        }
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.ws_capacity, 1000);
        assert!(config.cors_origins.is_empty());
        assert!(!config.is_production());
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_is_production() {
        let mut config = ApiConfig::default();
        assert!(!config.is_production());

        config.cors_origins = vec!["https://symposium.dev".to_string()];
        assert!(config.is_production());
    }
}
