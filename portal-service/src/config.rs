use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub session_secret: String,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Set on HTTPS deployments so the session cookie is marked `Secure`.
    #[serde(default)]
    pub cookie_secure: bool,
}

fn default_session_ttl_secs() -> u64 {
    2 * 60 * 60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Realtime,
    Postgres,
    Memory,
}

impl StoreKind {
    /// Whether data written through this store outlives the process.
    pub fn is_persistent(self) -> bool {
        !matches!(self, StoreKind::Memory)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Base URL of the realtime database, e.g. `https://<project>.firebaseio.com`.
    pub realtime_url: Option<String>,
    pub auth_token: Option<String>,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    pub postgres_uri: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    pub base_url: String,
    #[serde(default = "default_forecast_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_forecast_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSourceConfig {
    pub http_bind_addr: String,
    pub channel_capacity: usize,
    pub auth_bearer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub source: IngestSourceConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

/// Admin account upserted into the store at startup. Give either a bcrypt
/// `password_hash` or, for local runs, a plaintext `password`.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminSeedConfig {
    pub email: String,
    pub password_hash: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub forecast: ForecastConfig,
    pub ingest: Option<IngestConfig>,
    pub metrics: Option<MetricsConfig>,
    pub admin: Option<AdminSeedConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("PORTAL_CONFIG").unwrap_or_else(|_| "portal-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml_with_secret(&contents, env::var("PORTAL_SESSION_SECRET").ok())
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Self::from_toml_with_secret(contents, None)
    }

    /// Parses, applies the session secret override, then validates the result.
    pub fn from_toml_with_secret(
        contents: &str,
        session_secret: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut cfg: AppConfig = toml::from_str(contents)?;
        if let Some(secret) = session_secret {
            cfg.server.session_secret = secret;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.session_secret.len() < 32 {
            anyhow::bail!("server.session_secret must be at least 32 bytes");
        }
        if let Some(admin) = &self.admin {
            if admin.email.trim().is_empty() {
                anyhow::bail!("admin.email must not be empty");
            }
            match (admin.password_hash.as_deref(), admin.password.as_deref()) {
                (Some(hash), None) if hash.starts_with("$2") => {}
                (None, Some(password)) if !password.is_empty() => {}
                _ => anyhow::bail!(
                    "admin needs exactly one of password_hash (bcrypt) or password"
                ),
            }
        }
        match self.store.kind {
            StoreKind::Realtime if self.store.realtime_url.is_none() => {
                anyhow::bail!("store.realtime_url is required for the realtime store")
            }
            StoreKind::Postgres if self.store.postgres_uri.is_none() => {
                anyhow::bail!("store.postgres_uri is required for the postgres store")
            }
            _ => Ok(()),
        }
    }
}
