//! WebSocket streaming of the Progress Channel.
//!
//! Each connection holds one [`storyreel_events::Subscription`] and is
//! closed by the server once that subscription's termination rule fires.

mod handler;

pub use handler::{stream_project, stream_stage};
