//! HTTP-layer error rendering: every handler returns
//! `Result<impl IntoResponse, ApiError>`; `ApiError` reads the `ErrorCode`
//! back off an `anyhow::Error` chain and renders the sanitized JSON body
//! the error handling design requires -- no internal paths or tokens
//! leak (§7).

use axum::{
    response::{
        IntoResponse,
        Response,
    },
    Json,
};
use errors::ErrorMetadataAnyhowExt;
use serde::Serialize;

pub struct ApiError(pub anyhow::Error);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.code().http_status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "internal error serving request");
        } else {
            tracing::warn!(error = %self.0, "request failed");
        }
        let body = ErrorBody { error: self.0.msg(), code: self.0.short_msg().to_string() };
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
