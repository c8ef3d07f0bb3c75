//! Server configuration.

/// HTTP server configuration.
///
/// Liveness and readiness are served from two separate listeners so an
/// orchestrator can probe them independently; the job API shares the
/// readiness listener.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Port for the liveness listener
    pub liveness_port: u16,
    /// Port for the readiness + job API listener
    pub readiness_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            liveness_port: 8081,
            readiness_port: 8080,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            liveness_port: std::env::var("LIVENESS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.liveness_port),
            readiness_port: std::env::var("READINESS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.readiness_port),
        }
    }
}
