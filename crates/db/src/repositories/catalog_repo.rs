//! Repositories for providers, prompt templates, global variables, and
//! per-project provider overrides.

use serde_json::Value;
use sqlx::{PgConnection, PgExecutor};
use storyreel_core::records::ProviderConfig;
use storyreel_core::types::DbId;

use crate::models::catalog::{ProviderRow, TemplateRow};

const PROVIDER_COLUMNS: &str = "id, name, kind, base_url, api_key, model, extra, is_default";

pub struct ProviderRepo;

impl ProviderRepo {
    pub async fn find_by_name(
        executor: impl PgExecutor<'_>,
        name: &str,
    ) -> Result<Option<ProviderRow>, sqlx::Error> {
        let query = format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE name = $1");
        sqlx::query_as::<_, ProviderRow>(&query)
            .bind(name)
            .fetch_optional(executor)
            .await
    }

    /// The system default provider of a backend kind.
    pub async fn find_default(
        executor: impl PgExecutor<'_>,
        kind: &str,
    ) -> Result<Option<ProviderRow>, sqlx::Error> {
        let query =
            format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE kind = $1 AND is_default");
        sqlx::query_as::<_, ProviderRow>(&query)
            .bind(kind)
            .fetch_optional(executor)
            .await
    }

    pub async fn list(executor: impl PgExecutor<'_>) -> Result<Vec<ProviderRow>, sqlx::Error> {
        let query = format!("SELECT {PROVIDER_COLUMNS} FROM providers ORDER BY kind, name");
        sqlx::query_as::<_, ProviderRow>(&query)
            .fetch_all(executor)
            .await
    }

    /// Insert or update a provider by name.
    ///
    /// With `is_default`, the previous default of the same kind is demoted
    /// first. Run inside a transaction.
    pub async fn upsert(
        conn: &mut PgConnection,
        provider: &ProviderConfig,
        is_default: bool,
    ) -> Result<ProviderRow, sqlx::Error> {
        if is_default {
            sqlx::query("UPDATE providers SET is_default = FALSE WHERE kind = $1 AND name <> $2")
                .bind(provider.kind.as_str())
                .bind(&provider.name)
                .execute(&mut *conn)
                .await?;
        }
        let query = format!(
            "INSERT INTO providers (name, kind, base_url, api_key, model, extra, is_default)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (name) DO UPDATE SET
                kind = EXCLUDED.kind,
                base_url = EXCLUDED.base_url,
                api_key = EXCLUDED.api_key,
                model = EXCLUDED.model,
                extra = EXCLUDED.extra,
                is_default = EXCLUDED.is_default OR providers.is_default
             RETURNING {PROVIDER_COLUMNS}"
        );
        let extra = match &provider.extra {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        sqlx::query_as::<_, ProviderRow>(&query)
            .bind(&provider.name)
            .bind(provider.kind.as_str())
            .bind(&provider.base_url)
            .bind(&provider.api_key)
            .bind(&provider.model)
            .bind(&extra)
            .bind(is_default)
            .fetch_one(&mut *conn)
            .await
    }
}

pub struct TemplateRepo;

impl TemplateRepo {
    pub async fn find_by_stage(
        executor: impl PgExecutor<'_>,
        stage_type: &str,
    ) -> Result<Option<TemplateRow>, sqlx::Error> {
        sqlx::query_as::<_, TemplateRow>(
            "SELECT t.stage_type, t.body, p.name AS default_provider
             FROM prompt_templates t
             LEFT JOIN providers p ON p.id = t.default_provider_id
             WHERE t.stage_type = $1",
        )
        .bind(stage_type)
        .fetch_optional(executor)
        .await
    }

    /// Insert or replace the template of a stage. An unknown
    /// `default_provider` name is stored as no default.
    pub async fn upsert(
        executor: impl PgExecutor<'_>,
        stage_type: &str,
        body: &str,
        default_provider: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO prompt_templates (stage_type, body, default_provider_id)
             VALUES ($1, $2, (SELECT id FROM providers WHERE name = $3))
             ON CONFLICT (stage_type) DO UPDATE SET
                body = EXCLUDED.body,
                default_provider_id = EXCLUDED.default_provider_id",
        )
        .bind(stage_type)
        .bind(body)
        .bind(default_provider)
        .execute(executor)
        .await?;
        Ok(())
    }
}

pub struct GlobalVariableRepo;

impl GlobalVariableRepo {
    pub async fn list(executor: impl PgExecutor<'_>) -> Result<Vec<(String, Value)>, sqlx::Error> {
        sqlx::query_as::<_, (String, Value)>("SELECT key, value FROM global_variables ORDER BY key")
            .fetch_all(executor)
            .await
    }

    pub async fn set(
        executor: impl PgExecutor<'_>,
        key: &str,
        value: &Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO global_variables (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(executor)
        .await?;
        Ok(())
    }
}

pub struct ProjectProviderRepo;

impl ProjectProviderRepo {
    /// Name of the provider a project pinned for one stage.
    pub async fn find_override(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        stage_type: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT p.name
             FROM project_stage_providers o
             JOIN providers p ON p.id = o.provider_id
             WHERE o.project_id = $1 AND o.stage_type = $2",
        )
        .bind(project_id)
        .bind(stage_type)
        .fetch_optional(executor)
        .await
    }

    /// Pin a provider. Returns `false` if no provider has that name.
    pub async fn set_override(
        executor: impl PgExecutor<'_>,
        project_id: DbId,
        stage_type: &str,
        provider_name: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO project_stage_providers (project_id, stage_type, provider_id)
             SELECT $1, $2, id FROM providers WHERE name = $3
             ON CONFLICT (project_id, stage_type) DO UPDATE SET
                provider_id = EXCLUDED.provider_id",
        )
        .bind(project_id)
        .bind(stage_type)
        .bind(provider_name)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
