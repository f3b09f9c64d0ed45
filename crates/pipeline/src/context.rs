use std::sync::Arc;

use storyreel_backends::BackendFactory;
use storyreel_core::catalog::{PromptCatalog, ProviderResolver};
use storyreel_core::records::Project;
use storyreel_core::stage::StageType;
use storyreel_core::store::PipelineStore;
use storyreel_core::template::PromptRenderer;
use tokio_util::sync::CancellationToken;

use crate::config::ProcessorConfig;

/// External collaborators shared by every processor.
#[derive(Clone)]
pub struct PipelineServices {
    pub store: Arc<dyn PipelineStore>,
    pub catalog: Arc<dyn PromptCatalog>,
    pub providers: Arc<dyn ProviderResolver>,
    pub backends: Arc<dyn BackendFactory>,
    pub renderer: Arc<dyn PromptRenderer>,
    pub config: ProcessorConfig,
}

/// Everything one stage run needs to know about its invocation.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub project: Project,
    pub stage: StageType,
    /// Restrict per-scene stages to these sequence numbers.
    pub selector: Option<Vec<i32>>,
    /// Checked between units of work.
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn new(project: Project, stage: StageType) -> Self {
        Self {
            project,
            stage,
            selector: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_selector(mut self, selector: Option<Vec<i32>>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
