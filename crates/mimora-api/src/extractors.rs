//! Request body helpers shared by the profile, login and callback handlers.
//!
//! Handlers take `Result<Json<T>, JsonRejection>` so a malformed body turns
//! into the crate's error envelope instead of axum's plain-text rejection.

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::AppError;

/// Field-level checks a request DTO runs after deserialization.
pub trait Validate {
    /// `Err` carries the message returned to the client with a 422.
    fn validate(&self) -> Result<(), String>;
}

/// Unwrap a JSON body. Rejections become 400s.
pub fn json_body<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match result {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Err(AppError::BadRequest(
            "expected a request with Content-Type: application/json".into(),
        )),
        Err(rejection) => {
            tracing::debug!(status = %rejection.status(), "request body rejected");
            Err(AppError::BadRequest(rejection.body_text()))
        }
    }
}

/// Unwrap a JSON body and run its [`Validate`] checks. Failed checks
/// become 422s.
pub fn validated_body<T: Validate>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    let value = json_body(result)?;
    if let Err(msg) = value.validate() {
        tracing::debug!(body = std::any::type_name::<T>(), reason = %msg, "request body invalid");
        return Err(AppError::Validation(msg));
    }
    Ok(value)
}
