use serde_json::Value;

use crate::{
    error::AppError,
    model::{MAX_LEVEL, MIN_LEVEL},
};

const LEVEL_MESSAGE: &str = "Level must be a number between 0 and 100";

/// Pulls a numeric `level` out of a request body.
pub fn level_from_payload(level: Option<&Value>) -> Result<f64, AppError> {
    level
        .and_then(Value::as_f64)
        .ok_or_else(|| AppError::InvalidArgument(LEVEL_MESSAGE.to_string()))
}

/// Range-checks then rounds, so 100.4 is rejected while 99.6 becomes 100.
pub fn validate_level(requested: f64) -> Result<u8, AppError> {
    if !requested.is_finite()
        || requested < f64::from(MIN_LEVEL)
        || requested > f64::from(MAX_LEVEL)
    {
        return Err(AppError::InvalidArgument(LEVEL_MESSAGE.to_string()));
    }

    Ok(requested.round() as u8)
}

pub fn seconds_since(epoch_ms: i64, now_ms: i64) -> i64 {
    now_ms.saturating_sub(epoch_ms).max(0) / 1000
}
