use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use super::error_response;
use crate::database::Connector;
use crate::dispatcher::{Dispatcher, MigrationRequest};
use crate::runner::MigrationRunner;

/// `POST /migrate`: run one command for one tenant.
///
/// The body is decoded here rather than through the `Json` extractor so that
/// clients which omit the content type keep working and every malformed
/// body gets the same `400 {error}` shape.
pub async fn handle_migrate<C, R>(
    State(dispatcher): State<Arc<Dispatcher<C, R>>>,
    body: Bytes,
) -> Response
where
    C: Connector + 'static,
    R: MigrationRunner<C::Connection> + 'static,
{
    let request: MigrationRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejecting malformed migration request");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {}", e));
        }
    };

    match dispatcher.dispatch(request).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(detail, "request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}
