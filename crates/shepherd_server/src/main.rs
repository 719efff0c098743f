//! shepherd: standalone REST server for pathway progression.
//!
//! Configuration comes from the environment (see `config.rs`); a `.env`
//! file is loaded first when present. Without a database URL the server
//! runs on the in-memory store.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use shepherd_core::memory::InMemoryStore;
use shepherd_core::ports::Store;
use shepherd_core::types::Tenant;
use shepherd_core::Shepherd;
use shepherd_postgres::{DatabaseConfig, PgStore};
use shepherd_server::config::ServerConfig;
use shepherd_server::middleware::jwt::JwtConfig;
use shepherd_server::router::build_router;
use tokio::net::TcpListener;
use uuid::Uuid;

fn dev_tenant(id: Uuid) -> Tenant {
    Tenant {
        id,
        name: format!("Dev tenant {}", &id.to_string()[..8]),
        member_count: 0,
        created_at: Utc::now(),
    }
}

async fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let db = DatabaseConfig::new(url.clone(), config.db_pool_size);
            let pool = shepherd_postgres::connect(&db).await?;
            shepherd_postgres::migrate(&pool).await?;
            let store = PgStore::new(pool);
            for id in &config.dev_tenants {
                store.insert_tenant(&dev_tenant(*id)).await?;
            }
            tracing::info!("Using PostgreSQL store");
            Ok(Arc::new(store))
        }
        None => {
            let store = InMemoryStore::new();
            for id in &config.dev_tenants {
                store.insert_tenant(dev_tenant(*id)).await;
            }
            tracing::warn!(
                tenants = config.dev_tenants.len(),
                "No database URL set; using the in-memory store (data is lost on exit)"
            );
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shepherd_server=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let store = open_store(&config).await?;
    let app = Arc::new(Shepherd::new(store, config.engine.clone()));

    let jwt_config = JwtConfig::from_secret(config.jwt_secret.as_bytes());
    let router = build_router(app, jwt_config);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!("shepherd listening on {}", config.bind_addr);

    axum::serve(listener, router).await.context("server error")
}
