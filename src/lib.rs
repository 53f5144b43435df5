pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod import;
pub mod models;
pub mod mysql;
pub mod quiz;
pub mod routes;
pub mod seed;
pub mod state;
pub mod store;

use std::sync::Arc;

/// Builds state backed by the in-memory store. `main` swaps in MySQL when
/// a database is reachable.
pub fn build_state(config: &config::Config) -> anyhow::Result<state::AppState> {
    let store: Arc<dyn store::QuestionStore> =
        Arc::new(store::InMemoryStore::new(config.local_state_path.as_deref()));
    build_state_with_store(config, store)
}

pub fn build_state_with_store(
    config: &config::Config,
    store: Arc<dyn store::QuestionStore>,
) -> anyhow::Result<state::AppState> {
    let admin = auth::AdminAuth::from_config(
        config.admin_password_hash.as_deref(),
        config.admin_password.as_deref(),
    )?;
    Ok(state::AppState::new(store, admin, config.allowed_origins.clone()))
}
