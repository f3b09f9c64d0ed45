use storyreel_core::records::ProviderConfig;
use storyreel_core::stage::BackendKind;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
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
    /// How long shutdown waits for in-flight work, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// PostgreSQL URL. Without one the server keeps everything in memory.
    pub database_url: Option<String>,
    /// Interval between WebSocket pings in seconds (default: `30`).
    pub ws_heartbeat_secs: u64,
    /// System default provider per backend kind.
    pub providers: Vec<ProviderConfig>,
}

fn parse_env<T: std::str::FromStr>(name: &str, default: &str) -> T {
    std::env::var(name)
        .unwrap_or_else(|_| default.into())
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>()))
}

/// The system default provider of one kind.
///
/// Reads `{PREFIX}_PROVIDER_URL`, `{PREFIX}_PROVIDER_KEY` and
/// `{PREFIX}_PROVIDER_MODEL`; without a URL the mock provider is used.
fn provider_from_env(kind: BackendKind) -> ProviderConfig {
    let prefix = kind.as_str().to_uppercase();
    match std::env::var(format!("{prefix}_PROVIDER_URL")) {
        Ok(base_url) if !base_url.trim().is_empty() => ProviderConfig {
            name: format!("default-{}", kind.as_str()),
            kind,
            base_url: base_url.trim().to_string(),
            api_key: std::env::var(format!("{prefix}_PROVIDER_KEY")).ok(),
            model: std::env::var(format!("{prefix}_PROVIDER_MODEL"))
                .unwrap_or_else(|_| "default".into()),
            extra: serde_json::Value::Null,
        },
        _ => ProviderConfig::mock(kind),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                  |
    /// |-------------------------|--------------------------|
    /// | `HOST`                  | `0.0.0.0`                |
    /// | `PORT`                  | `3000`                   |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`  |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                     |
    /// | `DATABASE_URL`          | unset (in-memory store)  |
    /// | `WS_HEARTBEAT_SECS`     | `30`                     |
    /// | `TEXT_PROVIDER_URL`     | unset (mock)             |
    /// | `IMAGE_PROVIDER_URL`    | unset (mock)             |
    /// | `VIDEO_PROVIDER_URL`    | unset (mock)             |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        Self {
            host,
            port: parse_env("PORT", "3000"),
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", "30"),
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", "30"),
            database_url,
            ws_heartbeat_secs: parse_env("WS_HEARTBEAT_SECS", "30"),
            providers: [BackendKind::Text, BackendKind::Image, BackendKind::Video]
                .into_iter()
                .map(provider_from_env)
                .collect(),
        }
    }
}
