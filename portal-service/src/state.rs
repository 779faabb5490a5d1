use std::sync::Arc;
use std::time::Duration;

use meter_client::db::{MemoryStore, PgStore, RealtimeStore, Store};
use meter_client::domain::AdminAccount;
use sqlx::postgres::PgPoolOptions;

use crate::auth::password::hash_password;
use crate::auth::SessionKeys;
use crate::config::{AdminSeedConfig, StoreConfig, StoreKind};
use crate::forecast::Forecaster;

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub forecaster: Arc<dyn Forecaster>,
    pub sessions: Arc<SessionKeys>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        forecaster: Arc<dyn Forecaster>,
        sessions: SessionKeys,
    ) -> Self {
        Self {
            store,
            forecaster,
            sessions: Arc::new(sessions),
        }
    }
}

pub async fn connect_store(cfg: &StoreConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match cfg.kind {
        StoreKind::Realtime => {
            let url = cfg
                .realtime_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("store.realtime_url is not set"))?;
            tracing::info!(%url, "using realtime database store");
            Arc::new(RealtimeStore::new(
                url,
                cfg.auth_token.clone(),
                Duration::from_millis(cfg.timeout_ms),
            )?)
        }
        StoreKind::Postgres => {
            let uri = cfg
                .postgres_uri
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("store.postgres_uri is not set"))?;
            let pool = PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .connect(uri)
                .await?;
            tracing::info!("using postgres store");
            Arc::new(PgStore::new(pool))
        }
        StoreKind::Memory => {
            tracing::warn!("using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

/// Upserts the configured admin account. A plaintext password is hashed with `cost`.
pub async fn seed_admin(
    store: &dyn Store,
    seed: &AdminSeedConfig,
    cost: u32,
) -> anyhow::Result<()> {
    let email = AdminAccount::normalize_email(&seed.email);
    let password_hash = match (&seed.password_hash, &seed.password) {
        (Some(hash), _) => hash.clone(),
        (None, Some(password)) => hash_password(password.clone(), cost).await?,
        (None, None) => anyhow::bail!("admin seed for {email} has no credential"),
    };
    store
        .upsert_admin(&AdminAccount {
            email: email.clone(),
            password_hash,
        })
        .await?;
    tracing::info!(%email, "seeded admin account from config");
    Ok(())
}
