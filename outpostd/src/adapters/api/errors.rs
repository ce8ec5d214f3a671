// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::app::errors::{AppError, AppErrorKind, codes};

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: codes::FORBIDDEN,
            message: message.into(),
        }
    }
}

fn status_for(kind: AppErrorKind) -> StatusCode {
    match kind {
        AppErrorKind::InvalidArgument
        | AppErrorKind::AdmissionRejected
        | AppErrorKind::Conflict => StatusCode::BAD_REQUEST,
        AppErrorKind::NotFound => StatusCode::NOT_FOUND,
        AppErrorKind::Forbidden => StatusCode::FORBIDDEN,
        AppErrorKind::OutpostRejected => StatusCode::BAD_GATEWAY,
        AppErrorKind::Transport => StatusCode::GATEWAY_TIMEOUT,
        AppErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = status_for(err.kind());
        if status.is_server_error() {
            tracing::warn!(code = err.code(), "request failed: {err}");
        }
        Self {
            status,
            code: err.code(),
            message: err.message().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
