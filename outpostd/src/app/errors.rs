// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const ADMISSION_REJECTED: &str = "admission_rejected";
    pub const NOT_FOUND: &str = "not_found";
    pub const FORBIDDEN: &str = "forbidden";
    pub const CONFLICT: &str = "conflict";
    pub const OUTPOST_REJECTED: &str = "outpost_rejected";
    pub const TRANSPORT_ERROR: &str = "transport_error";
    pub const HOOK_FAILURE: &str = "hook_failure";
    pub const TUNNEL_FAILURE: &str = "tunnel_failure";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const LOCAL_ERROR: &str = "local_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    InvalidArgument,
    AdmissionRejected,
    NotFound,
    Forbidden,
    Conflict,
    OutpostRejected,
    Transport,
    Internal,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

pub fn invalid_argument(message: impl Into<String>) -> AppError {
    AppError::with_message(
        AppErrorKind::InvalidArgument,
        codes::INVALID_ARGUMENT,
        message,
    )
}

pub fn admission_rejected(message: impl Into<String>) -> AppError {
    AppError::with_message(
        AppErrorKind::AdmissionRejected,
        codes::ADMISSION_REJECTED,
        message,
    )
}

pub fn not_found(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, message)
}

pub fn forbidden(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Forbidden, codes::FORBIDDEN, message)
}

pub fn conflict(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Conflict, codes::CONFLICT, message)
}

pub fn internal(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Internal, codes::INTERNAL_ERROR, message)
}
