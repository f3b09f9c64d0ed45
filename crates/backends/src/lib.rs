//! Generative backends consumed by the pipeline stages.
//!
//! Three shapes of external service sit behind object-safe traits:
//!
//! - [`TextBackend`] -- incremental text generation (token stream).
//! - [`ImageBackend`] -- prompt to a list of image URLs.
//! - [`VideoBackend`] -- source image plus motion to a list of clips.
//!
//! [`http`] holds the `reqwest` clients, [`mock`] the deterministic
//! in-process backends, and [`factory`] maps a provider configuration to an
//! instance.

pub mod error;
pub mod factory;
pub mod http;
pub mod mock;
pub mod sse;
pub mod types;

pub use error::BackendError;
pub use factory::{BackendFactory, FixedBackends, HttpBackendFactory};
pub use types::{
    ImageBackend, ImageOutput, ImageRequest, TextBackend, TextRequest, TokenStream, VideoBackend,
    VideoOutput, VideoRequest,
};
