//! [`PromptCatalog`] and [`ProviderResolver`] backed by the catalog tables.

use async_trait::async_trait;
use serde_json::{Map, Value};
use storyreel_core::catalog::{choose_provider, PromptCatalog, ProviderResolver};
use storyreel_core::error::CoreError;
use storyreel_core::records::{Project, PromptTemplate, ProviderConfig};
use storyreel_core::stage::{BackendKind, StageType};
use storyreel_core::types::DbId;

use crate::repositories::{GlobalVariableRepo, ProjectProviderRepo, ProviderRepo, TemplateRepo};
use crate::{db_error, DbPool};

#[derive(Clone)]
pub struct PgCatalog {
    pool: DbPool,
}

impl PgCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register a provider, optionally as the system default of its kind.
    pub async fn upsert_provider(
        &self,
        provider: &ProviderConfig,
        is_default: bool,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        ProviderRepo::upsert(&mut *tx, provider, is_default)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        tracing::info!(provider = %provider.name, kind = %provider.kind.as_str(), is_default, "Provider registered");
        Ok(())
    }

    /// Register a provider, making it the system default of its kind only
    /// when that kind has no default yet. Returns whether it became the default.
    pub async fn ensure_default_provider(&self, provider: &ProviderConfig) -> Result<bool, CoreError> {
        let existing = ProviderRepo::find_default(&self.pool, provider.kind.as_str())
            .await
            .map_err(db_error)?;
        let is_default = existing.map_or(true, |row| row.name == provider.name);
        self.upsert_provider(provider, is_default).await?;
        Ok(is_default)
    }

    pub async fn providers(&self) -> Result<Vec<ProviderConfig>, CoreError> {
        ProviderRepo::list(&self.pool)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(ProviderConfig::try_from)
            .collect()
    }

    pub async fn upsert_template(&self, template: &PromptTemplate) -> Result<(), CoreError> {
        if template.stage.backend_kind() != BackendKind::Text {
            return Err(CoreError::Validation(format!(
                "Stage {} does not use a prompt template",
                template.stage
            )));
        }
        TemplateRepo::upsert(
            &self.pool,
            template.stage.as_str(),
            &template.body,
            template.default_provider.as_deref(),
        )
        .await
        .map_err(db_error)
    }

    pub async fn set_global_variable(&self, key: &str, value: &Value) -> Result<(), CoreError> {
        GlobalVariableRepo::set(&self.pool, key, value)
            .await
            .map_err(db_error)
    }

    /// Pin a project's stage to a named provider.
    pub async fn set_project_override(
        &self,
        project_id: DbId,
        stage: StageType,
        provider: &str,
    ) -> Result<(), CoreError> {
        let stored =
            ProjectProviderRepo::set_override(&self.pool, project_id, stage.as_str(), provider)
                .await
                .map_err(db_error)?;
        if !stored {
            return Err(CoreError::not_found("provider", provider));
        }
        Ok(())
    }
}

#[async_trait]
impl PromptCatalog for PgCatalog {
    async fn template(&self, stage: StageType) -> Result<Option<PromptTemplate>, CoreError> {
        TemplateRepo::find_by_stage(&self.pool, stage.as_str())
            .await
            .map_err(db_error)?
            .map(PromptTemplate::try_from)
            .transpose()
    }

    async fn global_variables(&self) -> Result<Value, CoreError> {
        let rows = GlobalVariableRepo::list(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(Value::Object(rows.into_iter().collect::<Map<_, _>>()))
    }
}

#[async_trait]
impl ProviderResolver for PgCatalog {
    async fn resolve(
        &self,
        project: &Project,
        stage: StageType,
    ) -> Result<ProviderConfig, CoreError> {
        let project_override =
            ProjectProviderRepo::find_override(&self.pool, project.id, stage.as_str())
                .await
                .map_err(db_error)?;
        let template_default = TemplateRepo::find_by_stage(&self.pool, stage.as_str())
            .await
            .map_err(db_error)?
            .and_then(|t| t.default_provider);
        let system_default = ProviderRepo::find_default(&self.pool, stage.backend_kind().as_str())
            .await
            .map_err(db_error)?
            .map(|p| p.name);

        let name = choose_provider(
            project_override.as_deref(),
            template_default.as_deref(),
            system_default.as_deref(),
        )
        .ok_or_else(|| {
            CoreError::Configuration(format!("No provider configured for stage {stage}"))
        })?;

        ProviderRepo::find_by_name(&self.pool, name)
            .await
            .map_err(db_error)?
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "Provider '{name}' for stage {stage} does not exist"
                ))
            })?
            .try_into()
    }
}
