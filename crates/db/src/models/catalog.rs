//! Provider and prompt template rows.

use serde_json::Value;
use sqlx::FromRow;
use storyreel_core::error::CoreError;
use storyreel_core::records::{PromptTemplate, ProviderConfig};
use storyreel_core::stage::{BackendKind, StageType};
use storyreel_core::types::DbId;

/// A row from the `providers` table.
#[derive(Debug, Clone, FromRow)]
pub struct ProviderRow {
    pub id: DbId,
    pub name: String,
    pub kind: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub extra: Value,
    pub is_default: bool,
}

impl TryFrom<ProviderRow> for ProviderConfig {
    type Error = CoreError;

    fn try_from(row: ProviderRow) -> Result<Self, Self::Error> {
        let kind: BackendKind = row.kind.parse().map_err(|_| {
            CoreError::Configuration(format!(
                "Provider '{}' has unknown kind '{}'",
                row.name, row.kind
            ))
        })?;
        Ok(ProviderConfig {
            name: row.name,
            kind,
            base_url: row.base_url,
            api_key: row.api_key,
            model: row.model,
            extra: row.extra,
        })
    }
}

/// A prompt template joined with its default provider's name.
#[derive(Debug, Clone, FromRow)]
pub struct TemplateRow {
    pub stage_type: String,
    pub body: String,
    pub default_provider: Option<String>,
}

impl TryFrom<TemplateRow> for PromptTemplate {
    type Error = CoreError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        let stage: StageType = row
            .stage_type
            .parse()
            .map_err(|_| CoreError::Internal(format!("Unknown stage type '{}'", row.stage_type)))?;
        Ok(PromptTemplate {
            stage,
            body: row.body,
            default_provider: row.default_provider,
        })
    }
}
