//! services/api/src/web/middleware.rs
//!
//! Principal extraction for protected routes.

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::warn;
use uuid::Uuid;

/// Header set by the upstream identity layer with the authenticated patient's id.
pub const PATIENT_HEADER: &str = "x-patient-id";

/// The authenticated patient making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patient(pub Uuid);

/// Middleware that reads the patient id and inserts it into request extensions.
///
/// A missing header is 401 Unauthorized, a malformed one 400 Bad Request.
pub async fn require_patient(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let raw = req
        .headers()
        .get(PATIENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let patient_id = Uuid::parse_str(raw.trim()).map_err(|_| {
        warn!("Rejected malformed {} header.", PATIENT_HEADER);
        StatusCode::BAD_REQUEST
    })?;

    req.extensions_mut().insert(Patient(patient_id));
    Ok(next.run(req).await)
}
