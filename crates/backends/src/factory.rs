//! Resolution of a [`ProviderConfig`] to a backend instance.

use std::sync::Arc;

use storyreel_core::records::ProviderConfig;
use storyreel_core::stage::BackendKind;

use crate::error::BackendError;
use crate::http::{HttpImageBackend, HttpTextBackend, HttpVideoBackend};
use crate::mock::{MockImageBackend, MockTextBackend, MockVideoBackend};
use crate::types::{ImageBackend, TextBackend, VideoBackend};

pub trait BackendFactory: Send + Sync {
    fn text(&self, provider: &ProviderConfig) -> Result<Arc<dyn TextBackend>, BackendError>;
    fn image(&self, provider: &ProviderConfig) -> Result<Arc<dyn ImageBackend>, BackendError>;
    fn video(&self, provider: &ProviderConfig) -> Result<Arc<dyn VideoBackend>, BackendError>;
}

fn ensure_kind(provider: &ProviderConfig, expected: BackendKind) -> Result<(), BackendError> {
    if provider.kind != expected {
        return Err(BackendError::Unsupported(format!(
            "provider '{}' serves {} generation, not {}",
            provider.name,
            provider.kind.as_str(),
            expected.as_str()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// HttpBackendFactory
// ---------------------------------------------------------------------------

/// Builds HTTP clients sharing one connection pool; `mock` providers get
/// the deterministic in-process backends.
#[derive(Clone, Default)]
pub struct HttpBackendFactory {
    client: reqwest::Client,
}

impl HttpBackendFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl BackendFactory for HttpBackendFactory {
    fn text(&self, provider: &ProviderConfig) -> Result<Arc<dyn TextBackend>, BackendError> {
        ensure_kind(provider, BackendKind::Text)?;
        if provider.is_mock() {
            return Ok(Arc::new(MockTextBackend::new()));
        }
        Ok(Arc::new(HttpTextBackend::new(
            self.client.clone(),
            provider.clone(),
        )))
    }

    fn image(&self, provider: &ProviderConfig) -> Result<Arc<dyn ImageBackend>, BackendError> {
        ensure_kind(provider, BackendKind::Image)?;
        if provider.is_mock() {
            return Ok(Arc::new(MockImageBackend::new()));
        }
        Ok(Arc::new(HttpImageBackend::new(
            self.client.clone(),
            provider.clone(),
        )))
    }

    fn video(&self, provider: &ProviderConfig) -> Result<Arc<dyn VideoBackend>, BackendError> {
        ensure_kind(provider, BackendKind::Video)?;
        if provider.is_mock() {
            return Ok(Arc::new(MockVideoBackend::new()));
        }
        Ok(Arc::new(HttpVideoBackend::new(
            self.client.clone(),
            provider.clone(),
        )))
    }
}

// ---------------------------------------------------------------------------
// FixedBackends
// ---------------------------------------------------------------------------

/// Hands out the same three instances for every provider of the right kind.
///
/// Lets tests keep a handle on the backend to inspect calls afterwards.
#[derive(Clone)]
pub struct FixedBackends {
    pub text: Arc<dyn TextBackend>,
    pub image: Arc<dyn ImageBackend>,
    pub video: Arc<dyn VideoBackend>,
}

impl FixedBackends {
    pub fn mocks() -> Self {
        Self {
            text: Arc::new(MockTextBackend::new()),
            image: Arc::new(MockImageBackend::new()),
            video: Arc::new(MockVideoBackend::new()),
        }
    }
}

impl BackendFactory for FixedBackends {
    fn text(&self, provider: &ProviderConfig) -> Result<Arc<dyn TextBackend>, BackendError> {
        ensure_kind(provider, BackendKind::Text)?;
        Ok(Arc::clone(&self.text))
    }

    fn image(&self, provider: &ProviderConfig) -> Result<Arc<dyn ImageBackend>, BackendError> {
        ensure_kind(provider, BackendKind::Image)?;
        Ok(Arc::clone(&self.image))
    }

    fn video(&self, provider: &ProviderConfig) -> Result<Arc<dyn VideoBackend>, BackendError> {
        ensure_kind(provider, BackendKind::Video)?;
        Ok(Arc::clone(&self.video))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn mock_provider_resolves_to_mock_backend() {
        let factory = HttpBackendFactory::default();
        let backend = factory.text(&ProviderConfig::mock(BackendKind::Text)).unwrap();
        assert_eq!(backend.provider_name(), "mock-text");
    }

    #[test]
    fn http_provider_resolves_to_http_backend() {
        let factory = HttpBackendFactory::default();
        let provider = ProviderConfig {
            name: "remote-image".into(),
            base_url: "https://api.example.com/v1".into(),
            ..ProviderConfig::mock(BackendKind::Image)
        };
        assert_eq!(factory.image(&provider).unwrap().provider_name(), "remote-image");
    }

    #[test]
    fn kind_mismatch_is_unsupported() {
        let factory = FixedBackends::mocks();
        assert_matches!(
            factory.video(&ProviderConfig::mock(BackendKind::Image)).err(),
            Some(BackendError::Unsupported(_))
        );
    }
}
