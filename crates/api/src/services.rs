//! Assembly of the pipeline collaborators for the server.
//!
//! With a database pool the store and catalog live in PostgreSQL and the
//! configured providers are registered there; without one everything is
//! kept in memory for the lifetime of the process.

use std::sync::Arc;

use storyreel_backends::{BackendFactory, HttpBackendFactory};
use storyreel_core::catalog::StaticCatalog;
use storyreel_core::error::CoreError;
use storyreel_core::memory_store::MemoryStore;
use storyreel_core::records::ProviderConfig;
use storyreel_core::template::PlaceholderRenderer;
use storyreel_db::{DbPool, PgCatalog, PgPipelineStore};
use storyreel_pipeline::{PipelineServices, ProcessorConfig};

/// In-memory store and a static catalog whose system defaults are `providers`.
pub fn memory_services(
    providers: &[ProviderConfig],
    backends: Arc<dyn BackendFactory>,
) -> PipelineServices {
    let catalog = providers.iter().fold(StaticCatalog::new(), |catalog, provider| {
        let name = provider.name.clone();
        catalog
            .with_provider(provider.clone())
            .with_system_default(provider.kind, &name)
    });
    let catalog = Arc::new(catalog);

    PipelineServices {
        store: Arc::new(MemoryStore::new()),
        catalog: catalog.clone(),
        providers: catalog,
        backends,
        renderer: Arc::new(PlaceholderRenderer),
        config: ProcessorConfig::default(),
    }
}

/// PostgreSQL-backed store and catalog.
///
/// Each configured provider is registered, and becomes the system default
/// of its kind unless the operator already chose one.
pub async fn postgres_services(
    pool: DbPool,
    providers: &[ProviderConfig],
    backends: Arc<dyn BackendFactory>,
) -> Result<PipelineServices, CoreError> {
    let catalog = Arc::new(PgCatalog::new(pool.clone()));
    for provider in providers {
        let is_default = catalog.ensure_default_provider(provider).await?;
        tracing::info!(provider = %provider.name, is_default, "Configured provider registered");
    }

    Ok(PipelineServices {
        store: Arc::new(PgPipelineStore::new(pool)),
        catalog: catalog.clone(),
        providers: catalog,
        backends,
        renderer: Arc::new(PlaceholderRenderer),
        config: ProcessorConfig::default(),
    })
}

/// Real HTTP backends sharing one connection pool.
pub fn http_backends() -> Arc<dyn BackendFactory> {
    Arc::new(HttpBackendFactory::default())
}
