pub mod jobs;
pub mod projects;
pub mod stages;

use storyreel_core::stage::StageType;

use crate::error::{AppError, AppResult};

/// Parse the `{stage}` path segment.
pub(crate) fn parse_stage(raw: &str) -> AppResult<StageType> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Unknown stage '{raw}'")))
}
