use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use dealdesk_core::{ApplicationError, InterfaceError};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::health::HttpState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub detail: Option<String>,
    pub correlation_id: String,
}

/// `POST /api/v1/deals/validate`: runs the raw body through the intake and
/// returns the submission report. Nothing is written to the store.
pub async fn validate_deals(State(state): State<HttpState>, body: String) -> impl IntoResponse {
    let correlation_id = Uuid::new_v4().to_string();

    match state.intake.process(&body) {
        Ok(report) => {
            info!(
                event_name = "api.deals.validated",
                correlation_id = %correlation_id,
                deals = report.total(),
                valid = report.valid_count,
                invalid = report.invalid_count,
            );
            let payload = serde_json::to_value(&report).unwrap_or(Value::Null);
            (StatusCode::OK, Json(payload))
        }
        Err(error) => {
            warn!(
                event_name = "api.deals.rejected",
                correlation_id = %correlation_id,
                error = %error,
            );
            let detail = error.to_string();
            let interface = ApplicationError::from(error).into_interface(correlation_id);
            let (status, label, detail) = match &interface {
                InterfaceError::BadRequest { .. } => {
                    (StatusCode::BAD_REQUEST, "bad_request", Some(detail))
                }
                InterfaceError::ServiceUnavailable { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", None)
                }
                InterfaceError::Internal { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal", None)
                }
            };
            let payload = ErrorBody {
                error: label,
                message: interface.user_message().to_owned(),
                detail,
                correlation_id: interface.correlation_id().to_owned(),
            };
            (status, Json(serde_json::to_value(payload).unwrap_or(Value::Null)))
        }
    }
}
