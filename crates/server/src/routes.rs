//! JSON routes over the approval processor.
//!
//! - `GET  /reports/{id}`                    current report with its approver chain
//! - `POST /reports/{id}/submit`             `{actor_id}`
//! - `POST /reports/{id}/actions`            `{actor_id, action, comment?}`
//! - `PUT  /companies/{id}/approval-matrix`  full matrix document
//!
//! Failures are rendered as `{code, message, correlation_id}`. The correlation
//! id is taken from `x-correlation-id` when the caller sends one.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use expenso_core::domain::company::ApprovalMatrix;
use expenso_core::domain::{CompanyId, ReportId, UserId};
use expenso_core::flows::Decision;
use expenso_core::{ActionProcessor, ActionResult, ApprovalError, ExpenseReport, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApprovalState {
    processor: ActionProcessor,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub actor_id: String,
    pub action: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            code: "VALIDATION_ERROR",
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::UnprocessableConfiguration { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Infrastructure detail stays in the log.
        let message = match &self.0 {
            InterfaceError::ServiceUnavailable { .. } | InterfaceError::Internal { .. } => {
                self.0.user_message().to_string()
            }
            other => other.message().to_string(),
        };

        if status.is_server_error() {
            error!(
                event_name = "http.request.failed",
                correlation_id = %self.0.correlation_id(),
                code = self.0.code(),
                error = %self.0,
                "request failed"
            );
        } else {
            warn!(
                event_name = "http.request.rejected",
                correlation_id = %self.0.correlation_id(),
                code = self.0.code(),
                error = %self.0,
                "request rejected"
            );
        }

        let body = ErrorBody {
            code: self.0.code().to_string(),
            message,
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(processor: ActionProcessor) -> Router {
    Router::new()
        .route("/reports/{id}", get(get_report))
        .route("/reports/{id}/submit", post(submit_report))
        .route("/reports/{id}/actions", post(act_on_report))
        .route("/companies/{id}/approval-matrix", put(update_matrix))
        .with_state(ApprovalState { processor })
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn into_api(correlation_id: &str) -> impl Fn(ApprovalError) -> ApiError + '_ {
    move |error| ApiError(error.into_interface(correlation_id))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>, correlation_id: &str) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text(), correlation_id))
}

fn actor(raw: &str, correlation_id: &str) -> Result<UserId, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("actor_id must not be empty", correlation_id));
    }
    Ok(UserId::from(trimmed))
}

async fn get_report(
    State(state): State<ApprovalState>,
    Path(report_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ExpenseReport>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let report = state
        .processor
        .report(&ReportId::from(report_id.as_str()))
        .await
        .map_err(into_api(&correlation_id))?;
    Ok(Json(report))
}

async fn submit_report(
    State(state): State<ApprovalState>,
    Path(report_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<ActionResult>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let request = body(payload, &correlation_id)?;
    let actor_id = actor(&request.actor_id, &correlation_id)?;

    let result = state
        .processor
        .submit_correlated(&ReportId::from(report_id.as_str()), &actor_id, correlation_id.clone())
        .await
        .map_err(into_api(&correlation_id))?;

    info!(
        event_name = "http.report.submitted",
        correlation_id = %correlation_id,
        report_id = %result.report_id,
        status = result.status.as_str(),
        "report submitted over http"
    );
    Ok(Json(result))
}

async fn act_on_report(
    State(state): State<ApprovalState>,
    Path(report_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionResult>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let request = body(payload, &correlation_id)?;
    let actor_id = actor(&request.actor_id, &correlation_id)?;
    let decision = Decision::parse(&request.action).ok_or_else(|| {
        ApiError::bad_request(
            format!(
                "unknown action `{}`; expected approve, reject or request_changes",
                request.action
            ),
            &correlation_id,
        )
    })?;

    let result = state
        .processor
        .act_correlated(
            &ReportId::from(report_id.as_str()),
            &actor_id,
            decision,
            request.comment,
            correlation_id.clone(),
        )
        .await
        .map_err(into_api(&correlation_id))?;

    info!(
        event_name = "http.report.action_applied",
        correlation_id = %correlation_id,
        report_id = %result.report_id,
        status = result.status.as_str(),
        "report action applied over http"
    );
    Ok(Json(result))
}

async fn update_matrix(
    State(state): State<ApprovalState>,
    Path(company_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<ApprovalMatrix>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let correlation_id = correlation_id(&headers);
    let matrix = body(payload, &correlation_id)?;

    state
        .processor
        .update_matrix(&CompanyId::from(company_id.as_str()), matrix)
        .await
        .map_err(into_api(&correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}
