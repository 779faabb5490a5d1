use std::env;

use anyhow::{bail, Result};
use meter_client::db::Store;
use meter_client::domain::AdminAccount;
use portal_service::{
    auth::password::{hash_password, HASH_COST},
    config::AppConfig,
    observability, state,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: create_admin <email> <password>");
    }
    let email = AdminAccount::normalize_email(&args[1]);
    if email.is_empty() || args[2].is_empty() {
        bail!("email and password must not be empty");
    }

    let cfg = AppConfig::load()?;
    if !cfg.store.kind.is_persistent() {
        bail!(
            "store.kind is \"memory\"; an admin saved here is gone when this command exits. \
             Seed one through the [admin] section of the portal config instead"
        );
    }
    let store = state::connect_store(&cfg.store).await?;

    let password_hash = hash_password(args[2].clone(), HASH_COST).await?;
    store
        .upsert_admin(&AdminAccount {
            email: email.clone(),
            password_hash,
        })
        .await?;

    tracing::info!(%email, "admin account saved");
    Ok(())
}
