//! Prompt templates, operator variables, and provider resolution.
//!
//! Provider resolution follows a fixed chain:
//!
//! 1. the project's per-stage override,
//! 2. the stage template's default provider,
//! 3. the system default for the stage's backend kind,
//!
//! and fails with [`CoreError::Configuration`] when none of them names a
//! known provider.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::records::{Project, PromptTemplate, ProviderConfig};
use crate::stage::{BackendKind, StageType};
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PromptCatalog: Send + Sync {
    /// The configured template of a text stage, if any.
    async fn template(&self, stage: StageType) -> Result<Option<PromptTemplate>, CoreError>;

    /// Operator-supplied global variables (a JSON object).
    async fn global_variables(&self) -> Result<Value, CoreError>;
}

#[async_trait]
pub trait ProviderResolver: Send + Sync {
    async fn resolve(&self, project: &Project, stage: StageType)
        -> Result<ProviderConfig, CoreError>;
}

// ---------------------------------------------------------------------------
// Built-in templates
// ---------------------------------------------------------------------------

const REWRITE_TEMPLATE: &str = "You are a short-video scriptwriter working on \"{{ project.name }}\". \
Rewrite the user's topic into a vivid, spoken narration script. \
Keep it concise and keep the original meaning.";

const STORYBOARD_TEMPLATE: &str = "You are a storyboard artist. Split the user's script into scenes. \
Reply with JSON only, in the form \
{\"scenes\": [{\"scene_number\": 1, \"narration\": \"...\", \"visual_prompt\": \"...\", \"shot_type\": \"...\", \"duration\": 3.0}]}.";

const CAMERA_TEMPLATE: &str = "You are a cinematographer. Choose one camera movement for the described shot. \
Reply with JSON only, in the form {\"movement_type\": \"...\", \"params\": {\"speed\": \"...\"}}.";

/// Template body used when the catalog has none for a text stage.
pub fn default_template_body(stage: StageType) -> Option<&'static str> {
    match stage {
        StageType::Rewrite => Some(REWRITE_TEMPLATE),
        StageType::Storyboard => Some(STORYBOARD_TEMPLATE),
        StageType::CameraMovement => Some(CAMERA_TEMPLATE),
        StageType::ImageGeneration | StageType::VideoGeneration => None,
    }
}

/// Apply the resolution chain to candidate provider names.
pub fn choose_provider<'a>(
    project_override: Option<&'a str>,
    template_default: Option<&'a str>,
    system_default: Option<&'a str>,
) -> Option<&'a str> {
    project_override.or(template_default).or(system_default)
}

// ---------------------------------------------------------------------------
// StaticCatalog
// ---------------------------------------------------------------------------

/// In-memory catalog and resolver, configured up front.
#[derive(Default)]
pub struct StaticCatalog {
    templates: HashMap<StageType, PromptTemplate>,
    globals: Value,
    providers: HashMap<String, ProviderConfig>,
    system_defaults: HashMap<BackendKind, String>,
    project_overrides: RwLock<HashMap<(DbId, StageType), String>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog whose system defaults are the mock providers.
    pub fn with_mock_defaults() -> Self {
        [BackendKind::Text, BackendKind::Image, BackendKind::Video]
            .into_iter()
            .fold(Self::new(), |catalog, kind| {
                let provider = ProviderConfig::mock(kind);
                let name = provider.name.clone();
                catalog.with_provider(provider).with_system_default(kind, &name)
            })
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.insert(provider.name.clone(), provider);
        self
    }

    pub fn with_system_default(mut self, kind: BackendKind, provider_name: &str) -> Self {
        self.system_defaults.insert(kind, provider_name.to_string());
        self
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.templates.insert(template.stage, template);
        self
    }

    pub fn with_globals(mut self, globals: Value) -> Self {
        self.globals = globals;
        self
    }

    /// Pin a project's stage to a named provider.
    pub async fn set_project_override(&self, project_id: DbId, stage: StageType, provider: &str) {
        self.project_overrides
            .write()
            .await
            .insert((project_id, stage), provider.to_string());
    }
}

#[async_trait]
impl PromptCatalog for StaticCatalog {
    async fn template(&self, stage: StageType) -> Result<Option<PromptTemplate>, CoreError> {
        Ok(self.templates.get(&stage).cloned())
    }

    async fn global_variables(&self) -> Result<Value, CoreError> {
        Ok(match &self.globals {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        })
    }
}

#[async_trait]
impl ProviderResolver for StaticCatalog {
    async fn resolve(
        &self,
        project: &Project,
        stage: StageType,
    ) -> Result<ProviderConfig, CoreError> {
        let overrides = self.project_overrides.read().await;
        let project_override = overrides.get(&(project.id, stage)).map(String::as_str);
        let template_default = self
            .templates
            .get(&stage)
            .and_then(|t| t.default_provider.as_deref());
        let system_default = self
            .system_defaults
            .get(&stage.backend_kind())
            .map(String::as_str);

        let name = choose_provider(project_override, template_default, system_default)
            .ok_or_else(|| {
                CoreError::Configuration(format!("No provider configured for stage {stage}"))
            })?;
        self.providers.get(name).cloned().ok_or_else(|| {
            CoreError::Configuration(format!("Provider '{name}' for stage {stage} does not exist"))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ProjectStatus;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn project(id: DbId) -> Project {
        Project {
            id,
            name: "p".into(),
            description: String::new(),
            original_topic: "topic".into(),
            status: ProjectStatus::Draft,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn named(name: &str, kind: BackendKind) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            ..ProviderConfig::mock(kind)
        }
    }

    #[test]
    fn chain_prefers_project_then_template_then_system() {
        assert_eq!(choose_provider(Some("a"), Some("b"), Some("c")), Some("a"));
        assert_eq!(choose_provider(None, Some("b"), Some("c")), Some("b"));
        assert_eq!(choose_provider(None, None, Some("c")), Some("c"));
        assert_eq!(choose_provider(None, None, None), None);
    }

    #[tokio::test]
    async fn resolves_through_each_level() {
        let catalog = StaticCatalog::new()
            .with_provider(named("sys", BackendKind::Text))
            .with_provider(named("tpl", BackendKind::Text))
            .with_provider(named("proj", BackendKind::Text))
            .with_system_default(BackendKind::Text, "sys")
            .with_template(PromptTemplate {
                stage: StageType::Storyboard,
                body: "x".into(),
                default_provider: Some("tpl".into()),
            });

        let p = project(1);
        assert_eq!(catalog.resolve(&p, StageType::Rewrite).await.unwrap().name, "sys");
        assert_eq!(catalog.resolve(&p, StageType::Storyboard).await.unwrap().name, "tpl");

        catalog.set_project_override(1, StageType::Storyboard, "proj").await;
        assert_eq!(catalog.resolve(&p, StageType::Storyboard).await.unwrap().name, "proj");
        assert_eq!(
            catalog.resolve(&project(2), StageType::Storyboard).await.unwrap().name,
            "tpl"
        );
    }

    #[tokio::test]
    async fn missing_provider_is_configuration_error() {
        let catalog = StaticCatalog::new();
        assert_matches!(
            catalog.resolve(&project(1), StageType::ImageGeneration).await,
            Err(CoreError::Configuration(_))
        );

        let dangling = StaticCatalog::new().with_system_default(BackendKind::Image, "ghost");
        assert_matches!(
            dangling.resolve(&project(1), StageType::ImageGeneration).await,
            Err(CoreError::Configuration(msg)) if msg.contains("ghost")
        );
    }

    #[tokio::test]
    async fn mock_defaults_cover_every_stage() {
        let catalog = StaticCatalog::with_mock_defaults();
        for stage in crate::stage::STAGE_ORDER {
            let provider = catalog.resolve(&project(1), stage).await.unwrap();
            assert!(provider.is_mock());
            assert_eq!(provider.kind, stage.backend_kind());
        }
    }

    #[test]
    fn built_in_templates_only_for_text_stages() {
        for stage in crate::stage::STAGE_ORDER {
            assert_eq!(
                default_template_body(stage).is_some(),
                stage.backend_kind() == BackendKind::Text
            );
        }
    }
}
