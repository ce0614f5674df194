use std::time::Duration;

use liman_appcount::AppCountConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
        }
    }
}

/// Load the external license API configuration from environment variables.
///
/// | Env Var                  | Default |
/// |--------------------------|---------|
/// | `APPCOUNT_BASE_URL`      | (required) |
/// | `APPCOUNT_API_KEY`       | (required) |
/// | `APPCOUNT_TIMEOUT_SECS`  | `30`    |
pub fn appcount_config_from_env() -> AppCountConfig {
    let base_url = std::env::var("APPCOUNT_BASE_URL").expect("APPCOUNT_BASE_URL must be set");
    let api_key = std::env::var("APPCOUNT_API_KEY").expect("APPCOUNT_API_KEY must be set");

    let timeout_secs: u64 = std::env::var("APPCOUNT_TIMEOUT_SECS")
        .unwrap_or_else(|_| "30".into())
        .parse()
        .expect("APPCOUNT_TIMEOUT_SECS must be a valid u64");

    AppCountConfig {
        base_url,
        api_key,
        timeout: Duration::from_secs(timeout_secs),
    }
}
