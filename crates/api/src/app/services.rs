//! Store selection and engine wiring.

use std::sync::Arc;

use anyhow::Context;

use shopledger_infra::store::{InMemoryStore, PostgresStore, Store};
use shopledger_infra::{
    ActivityRecorder, AuditTrail, BulkDeleteEngine, CascadeDeleteEngine, DependencyResolver, RestoreEngine,
    RowEditor,
};

use crate::config::{Config, DatabaseConfig};

/// Every engine the routes use, sharing one store.
#[derive(Clone)]
pub struct AppServices {
    pub recorder: ActivityRecorder,
    pub restore: RestoreEngine,
    pub resolver: DependencyResolver,
    pub cascade: CascadeDeleteEngine,
    pub bulk: BulkDeleteEngine,
    pub audit: AuditTrail,
    pub rows: RowEditor,
}

impl AppServices {
    pub fn new(store: Arc<dyn Store>, dependency_sample_limit: usize) -> Self {
        let audit = AuditTrail::new(store.clone());
        Self {
            recorder: ActivityRecorder::new(store.clone()),
            restore: RestoreEngine::new(store.clone()),
            resolver: DependencyResolver::new(store.clone()).with_sample_limit(dependency_sample_limit),
            cascade: CascadeDeleteEngine::new(store.clone(), audit.clone()),
            bulk: BulkDeleteEngine::new(store.clone(), audit.clone()),
            rows: RowEditor::new(store, audit.clone()),
            audit,
        }
    }
}

pub async fn build_services(config: &Config) -> anyhow::Result<AppServices> {
    let store = open_store(&config.database).await?;
    Ok(AppServices::new(store, config.dependency_sample_limit))
}

/// Postgres when `DATABASE_URL` is set, the in-memory retail store otherwise.
async fn open_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Store>> {
    let Some(url) = &config.url else {
        tracing::info!("using in-memory store");
        return Ok(Arc::new(InMemoryStore::retail()?));
    };

    let store = PostgresStore::connect(url, config.max_connections, config.acquire_timeout())
        .await
        .context("failed to connect to Postgres")?;
    if config.run_migrations {
        store.migrate().await.context("failed to run migrations")?;
    }
    tracing::info!(max_connections = config.max_connections, "connected to Postgres");
    Ok(Arc::new(store))
}
