//! Row structs for the storyreel tables.
//!
//! Each row converts into the matching `storyreel_core::records` type;
//! conversion fails only when the database holds an id or name the core
//! enums do not know.

pub mod asset;
pub mod catalog;
pub mod project;
pub mod stage;

use storyreel_core::error::CoreError;
use storyreel_core::status::StatusId;

/// Decode a status lookup id into its enum.
pub(crate) fn decode_status<S>(
    table: &str,
    id: StatusId,
    from_id: fn(StatusId) -> Option<S>,
) -> Result<S, CoreError> {
    from_id(id).ok_or_else(|| CoreError::Internal(format!("Unknown {table} id {id}")))
}
