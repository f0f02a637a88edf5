//! HTTP request handlers.
//!
//! Handlers only translate between HTTP and the wallet service; user identity
//! arrives as a path parameter from the authenticated front layer.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::app::AppState;
use crate::app::service::WalletOverview;
use crate::domain::{
    AppError, DatabaseError, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus, JobId,
    JobInvocation, JobStatus, ProposalReceipt, ProvisionWalletPayload, RemoteServiceError,
    SendFundsPayload, TransactionOutput, TransactionRecord,
};

/// Body of `POST /users/{user_id}/wallets/default`
#[derive(Debug, Deserialize)]
pub struct ProvisionWalletBody {
    pub email: String,
    pub display_name: Option<String>,
}

/// Body of the send endpoints
#[derive(Debug, Deserialize)]
pub struct SendFundsBody {
    pub outputs: Vec<TransactionOutput>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: JobId,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

fn accepted(job_id: JobId) -> (StatusCode, Json<JobAccepted>) {
    (StatusCode::ACCEPTED, Json(JobAccepted { job_id }))
}

/// Queue default-wallet provisioning for a user
pub async fn provision_default_wallet_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<ProvisionWalletBody>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let job_id = state
        .service
        .provision_default_wallet(&ProvisionWalletPayload {
            user_id,
            email: body.email,
            display_name: body.display_name,
        })
        .await?;
    Ok(accepted(job_id))
}

pub async fn wallet_overview_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<WalletOverview>, AppError> {
    Ok(Json(state.service.wallet_overview(&user_id).await?))
}

pub async fn transaction_history_handler(
    State(state): State<Arc<AppState>>,
    Path((user_id, wallet_id)): Path<(String, String)>,
) -> Result<Json<Vec<TransactionRecord>>, AppError> {
    let history = state
        .service
        .transaction_history(&user_id, &wallet_id)
        .await?;
    Ok(Json(history))
}

/// Send funds and wait for the broadcast receipt
pub async fn send_funds_handler(
    State(state): State<Arc<AppState>>,
    Path((user_id, wallet_id)): Path<(String, String)>,
    Json(body): Json<SendFundsBody>,
) -> Result<Json<ProposalReceipt>, AppError> {
    let payload = SendFundsPayload {
        user_id,
        wallet_id,
        outputs: body.outputs,
        message: body.message,
    };
    Ok(Json(state.service.send_funds(&payload).await?))
}

/// Queue a transfer as a job
pub async fn enqueue_send_funds_handler(
    State(state): State<Arc<AppState>>,
    Path((user_id, wallet_id)): Path<(String, String)>,
    Json(body): Json<SendFundsBody>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let payload = SendFundsPayload {
        user_id,
        wallet_id,
        outputs: body.outputs,
        message: body.message,
    };
    let job_id = state.service.enqueue_send_funds(&payload).await?;
    Ok(accepted(job_id))
}

pub async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Json<JobInvocation>, AppError> {
    Ok(Json(state.service.job_status(id).await?))
}

/// Re-enqueue a failed invocation
pub async fn requeue_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let job_id = state.service.requeue_job(id).await?;
    Ok(accepted(job_id))
}

pub async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<Vec<JobInvocation>>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()?;
    let jobs = state
        .service
        .list_jobs(status, params.limit.unwrap_or(50))
        .await?;
    Ok(Json(jobs))
}

/// Detailed health check
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.service.health_check().await)
}

/// Kubernetes liveness check
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness check
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus scrape output
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Status code and error type for an error, looking through pipeline wrappers.
fn classify(err: &AppError) -> (StatusCode, &'static str) {
    match err.root() {
        AppError::Database(db_err) => match db_err {
            DatabaseError::Connection(_) | DatabaseError::PoolExhausted(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "database_error")
            }
            DatabaseError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            DatabaseError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        },
        AppError::RemoteService(remote) => match remote {
            RemoteServiceError::InsufficientFunds => {
                (StatusCode::PAYMENT_REQUIRED, "insufficient_funds")
            }
            RemoteServiceError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            RemoteServiceError::Connection(_) | RemoteServiceError::Unavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "remote_service_unavailable")
            }
            RemoteServiceError::Rejected(_) | RemoteServiceError::InvalidResponse(_) => {
                (StatusCode::BAD_GATEWAY, "remote_service_error")
            }
        },
        AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        AppError::PartialAggregation { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "partial_aggregation")
        }
        AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        AppError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error"),
        AppError::Internal(_) | AppError::StepFailed { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self);
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type,
                failed_step = self.failed_step(),
                message = %message,
                "Server error"
            );
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ValidationError;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (
                ValidationError::MissingField("email".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (AppError::not_found("wallet", "w1"), StatusCode::NOT_FOUND),
            (
                DatabaseError::Duplicate("w1".into()).into(),
                StatusCode::CONFLICT,
            ),
            (
                RemoteServiceError::InsufficientFunds.into(),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                RemoteServiceError::Unavailable("bws".into()).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                RemoteServiceError::Timeout("bws".into()).into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                RemoteServiceError::Rejected("locked".into()).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::PartialAggregation {
                    loaded: 1,
                    failed: 1,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_step_failure_maps_by_root_cause() {
        let err = AppError::StepFailed {
            pipeline: "transaction_proposal",
            step: "CreateProposal",
            position: 1,
            completed: vec![],
            source: Box::new(RemoteServiceError::InsufficientFunds.into()),
        };
        assert_eq!(classify(&err), (StatusCode::PAYMENT_REQUIRED, "insufficient_funds"));
    }
}
