//! HTTP trigger API.
//!
//! `POST /sync/runs` only opens the run row and hands the run to the job
//! runner; callers poll `GET /sync/runs/{id}` for the outcome.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use billsync_domain::constants::DEFAULT_RUN_LIST_LIMIT;
use billsync_domain::{
    Account, BillSyncError, RunId, RunKind, SyncRequest, SyncRun, ValidationReport,
};
use billsync_infra::JobError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::context::AppContext;
use crate::utils::health::HealthStatus;
use crate::utils::logging::{error_label, log_command_execution};

/// Largest page `GET /sync/runs` returns.
pub const MAX_RUN_LIST_LIMIT: u32 = 200;

/// `triggered_by` recorded when a trigger request names nobody.
pub const HTTP_TRIGGER: &str = "http";

pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync/runs", get(list_runs).post(trigger_run))
        .route("/sync/runs/{id}", get(get_run))
        .route("/sync/validate/{account}", get(validate))
        .with_state(context)
}

/// Error returned by every handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] BillSyncError),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Job(JobError::AlreadyRunning { .. }) => StatusCode::CONFLICT,
            Self::Job(JobError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Job(JobError::Sync(err)) | Self::Sync(err) => match err {
                BillSyncError::InvalidInput(_) | BillSyncError::Config(_) => StatusCode::BAD_REQUEST,
                BillSyncError::NotFound(_) => StatusCode::NOT_FOUND,
                BillSyncError::Auth(_)
                | BillSyncError::Remote(_)
                | BillSyncError::Network(_)
                | BillSyncError::RateLimited(_) => StatusCode::BAD_GATEWAY,
                BillSyncError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
                BillSyncError::Database(_) | BillSyncError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Job(JobError::AlreadyRunning { .. }) => "already_running",
            Self::Job(JobError::ShuttingDown) => "shutting_down",
            Self::Job(JobError::Sync(err)) | Self::Sync(err) => error_label(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let mut body = json!({ "error": self.label(), "message": self.to_string() });
        if let Self::Job(JobError::AlreadyRunning { run_id, .. }) = &self {
            body["run_id"] = json!(run_id);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn timed<T, F>(command: &str, handler: F) -> ApiResult<T>
where
    F: Future<Output = ApiResult<T>>,
{
    let started = Instant::now();
    let result = handler.await;
    log_command_execution(
        command,
        "http",
        started.elapsed(),
        result.as_ref().err().map(ApiError::label),
    );
    result
}

async fn health(State(context): State<Arc<AppContext>>) -> (StatusCode, Json<HealthStatus>) {
    let status = context.health_check().await;
    let code = if status.is_healthy() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(status))
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub account: String,
    #[serde(default)]
    pub reconcile: bool,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub triggered_by: Option<String>,
}

impl TriggerRequest {
    fn into_sync_request(self) -> billsync_domain::Result<SyncRequest> {
        let account = Account::from_str(&self.account)?;
        let kind = self.kind.as_deref().map(RunKind::from_str).transpose()?.unwrap_or(RunKind::Full);
        let triggered_by = self
            .triggered_by
            .map(|who| who.trim().to_string())
            .filter(|who| !who.is_empty())
            .unwrap_or_else(|| HTTP_TRIGGER.to_string());

        Ok(match kind {
            RunKind::Full => SyncRequest::full(account, self.reconcile, triggered_by),
            RunKind::MissingCharges => SyncRequest::missing_charges(account, triggered_by),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub run_id: RunId,
}

async fn trigger_run(
    State(context): State<Arc<AppContext>>,
    Json(body): Json<TriggerRequest>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    timed("sync::trigger_run", async {
        let request = body.into_sync_request()?;
        context.config.credentials(request.account)?;
        let run_id = context.runner.submit(request).await?;
        Ok::<_, ApiError>((StatusCode::ACCEPTED, Json(TriggerResponse { run_id })))
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<u32>,
}

async fn list_runs(
    State(context): State<Arc<AppContext>>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<Vec<SyncRun>>> {
    timed("sync::list_runs", async {
        let limit = query.limit.unwrap_or(DEFAULT_RUN_LIST_LIMIT).clamp(1, MAX_RUN_LIST_LIMIT);
        Ok::<_, ApiError>(Json(context.run_log.list_recent(limit).await?))
    })
    .await
}

async fn get_run(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SyncRun>> {
    timed("sync::get_run", async {
        let id = RunId::from_str(&id)?;
        let run = context
            .run_log
            .get_run(&id)
            .await?
            .ok_or_else(|| BillSyncError::NotFound(format!("sync run {id}")))?;
        Ok::<_, ApiError>(Json(run))
    })
    .await
}

async fn validate(
    State(context): State<Arc<AppContext>>,
    Path(account): Path<String>,
) -> ApiResult<Json<ValidationReport>> {
    timed("sync::validate", async {
        let account = Account::from_str(&account)?;
        Ok::<_, ApiError>(Json(context.runner.validate(account).await?))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(account: &str, kind: Option<&str>, who: Option<&str>) -> TriggerRequest {
        TriggerRequest {
            account: account.into(),
            reconcile: true,
            kind: kind.map(str::to_string),
            triggered_by: who.map(str::to_string),
        }
    }

    #[test]
    fn trigger_defaults_to_full_run_by_http() {
        let request = body("primary", None, Some("  ")).into_sync_request().unwrap();
        assert_eq!(request, SyncRequest::full(Account::Primary, true, HTTP_TRIGGER));
    }

    #[test]
    fn missing_charges_ignores_reconcile_flag() {
        let request =
            body("alternate", Some("missing_charges"), Some("ops")).into_sync_request().unwrap();
        assert_eq!(request, SyncRequest::missing_charges(Account::Alternate, "ops"));
    }

    #[test]
    fn unknown_account_is_bad_request() {
        let err = ApiError::from(body("tertiary", None, None).into_sync_request().unwrap_err());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn busy_account_is_conflict() {
        let err = ApiError::from(JobError::AlreadyRunning {
            account: Account::Primary,
            run_id: RunId::new(),
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.label(), "already_running");
    }
}
