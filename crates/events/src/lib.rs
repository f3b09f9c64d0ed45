//! Progress Channel for the storyreel pipeline.
//!
//! - [`ProgressHub`] -- in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`ProgressMessage`] -- the typed envelope every subscriber receives.
//! - [`ChannelKey`] -- `(project, stage)` or `(project, *)` addressing.
//! - [`Subscription`] -- a filtered receiver that knows when to stop.
//! - [`Publisher`] -- scoped publishing handle released on drop.

pub mod channel;
pub mod hub;
pub mod message;

pub use channel::{ChannelKey, ChannelScope};
pub use hub::{ProgressHub, Publisher, Subscription};
pub use message::{MessageKind, ProgressMessage};
