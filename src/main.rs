use std::sync::Arc;
use testprep_backend::config::Config;
use testprep_backend::mysql::MySqlStore;
use testprep_backend::store::QuestionStore;
use testprep_backend::{build_state, build_state_with_store, routes::build_router, seed};
use tracing_subscriber::EnvFilter;

async fn connect_mysql(url: &str) -> Option<Arc<dyn QuestionStore>> {
    match MySqlStore::connect(url).await {
        Ok(store) => match store.migrate().await {
            Ok(_) => {
                tracing::info!("mysql connected and migrations applied");
                Some(Arc::new(store))
            }
            Err(err) => {
                tracing::warn!("mysql connected but migrations failed ({}), using local in-memory store", err);
                None
            }
        },
        Err(err) => {
            tracing::warn!(
                "mysql is unavailable ({}), backend continues in local in-memory mode",
                err
            );
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();
    let mysql = match config.database_url.as_deref() {
        Some(url) => connect_mysql(url).await,
        None => None,
    };
    let state = match mysql {
        Some(store) => build_state_with_store(&config, store)?,
        None => build_state(&config)?,
    };
    tracing::info!(backend = state.store.backend(), "question store ready");
    if config.seed_demo {
        if let Err(err) = seed::seed_demo(state.store.as_ref()).await {
            tracing::warn!("demo seed failed ({}), continuing with existing content", err);
        }
    }
    let app = build_router(state);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("backend listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
