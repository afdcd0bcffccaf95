//! HTTP surface of the migrator.

pub mod migrate;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::database::Connector;
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, OutcomeKind};
use crate::runner::MigrationRunner;

/// Build the service router around a shared dispatcher.
pub fn router<C, R>(dispatcher: Arc<Dispatcher<C, R>>) -> Router
where
    C: Connector + 'static,
    R: MigrationRunner<C::Connection> + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/migrate", post(migrate::handle_migrate::<C, R>))
        .route("/goose", post(migrate::handle_migrate::<C, R>))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(migrate::panic_response))
                .into_inner(),
        )
        .with_state(dispatcher)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tenant-migrator",
        "timestamp": chrono::Utc::now()
    }))
}

pub fn status_code(err: &DispatchError) -> StatusCode {
    match err.kind() {
        OutcomeKind::InvalidRequest
        | OutcomeKind::InvalidIdentifier
        | OutcomeKind::UnknownCommand
        | OutcomeKind::InvalidArguments => StatusCode::BAD_REQUEST,
        OutcomeKind::TenantBusy => StatusCode::CONFLICT,
        OutcomeKind::Connectivity | OutcomeKind::ConnectionError => StatusCode::BAD_GATEWAY,
        OutcomeKind::Permission
        | OutcomeKind::ProvisionFailed
        | OutcomeKind::SourceError
        | OutcomeKind::ExecutionFailed => StatusCode::INTERNAL_SERVER_ERROR,
        OutcomeKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
    }
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        error_response(status_code(&self), self.to_string())
    }
}
