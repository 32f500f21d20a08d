use super::RequestsLoggingLevel;

/// Listener settings of the HTTP layer, resolved from `AppConfig`.
#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Prometheus scraping runs on its own listener.
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            metrics_port: 9091,
        }
    }
}
