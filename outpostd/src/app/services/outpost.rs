// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Request construction and response interpretation for the outpost API.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error as ThisError;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    HttpMethod, OutboundRequest, OutboundResponse, TelemetryEvent, TelemetryPort,
};
use crate::app::services::dispatcher::HttpDispatcher;
use crate::app::services::hooks::Hook;
use crate::app::types::WorkloadView;

/// Status code outposts use for structured application errors.
pub const APPLICATION_ERROR_STATUS: u16 = 419;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutpostAction {
    Start,
    Poll,
    Stop,
}

impl OutpostAction {
    pub fn as_str(self) -> &'static str {
        match self {
            OutpostAction::Start => "start",
            OutpostAction::Poll => "poll",
            OutpostAction::Stop => "stop",
        }
    }
}

impl fmt::Display for OutpostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutpostFailure {
    /// The outpost rejected the request with a structured error.
    Application { message: String, traceback: String },
    Status { code: u16, message: String },
    Transport { cause: String },
}

impl OutpostFailure {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OutpostFailure::Status { code: 404, .. })
    }

    pub fn detail(&self) -> &str {
        match self {
            OutpostFailure::Application { message, .. } => message,
            OutpostFailure::Status { message, .. } => message,
            OutpostFailure::Transport { cause } => cause,
        }
    }

    fn code_label(&self) -> String {
        match self {
            OutpostFailure::Application { .. } => APPLICATION_ERROR_STATUS.to_string(),
            OutpostFailure::Status { code, .. } => code.to_string(),
            OutpostFailure::Transport { .. } => "transport".to_string(),
        }
    }
}

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("{action} request to {url} failed: {}", .failure.code_label())]
pub struct OutpostError {
    pub action: OutpostAction,
    /// Request URL without its query string.
    pub url: String,
    pub failure: OutpostFailure,
}

impl From<OutpostError> for AppError {
    fn from(err: OutpostError) -> Self {
        let context = err.to_string();
        let base = match &err.failure {
            OutpostFailure::Transport { cause } => {
                AppError::with_message(AppErrorKind::Transport, codes::TRANSPORT_ERROR, cause)
            }
            failure => AppError::with_message(
                AppErrorKind::OutpostRejected,
                codes::OUTPOST_REJECTED,
                failure.detail(),
            ),
        };
        base.with_context(context)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub request_timeout: Duration,
    pub validate_cert: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            validate_cert: false,
        }
    }
}

/// Where and how to reach the outpost responsible for a workload.
#[derive(Clone)]
pub struct RemoteEndpoint {
    pub url: Hook<String>,
    pub headers: Hook<BTreeMap<String, String>>,
    pub options: Hook<RequestOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub options: RequestOptions,
}

impl RemoteEndpoint {
    pub fn fixed(url: impl Into<String>) -> Self {
        Self {
            url: Hook::value(url.into()),
            headers: Hook::default(),
            options: Hook::value(RequestOptions::default()),
        }
    }

    /// `attach_name` addresses the workload itself (`{url}/{name}`) instead of
    /// the collection.
    pub async fn resolve(
        &self,
        workload: &WorkloadView,
        attach_name: bool,
    ) -> AppResult<ResolvedEndpoint> {
        let base = self.url.resolve(workload).await?;
        let mut url = base.trim_end_matches('/').to_string();
        if attach_name {
            url.push('/');
            url.push_str(&workload.name);
        }

        let mut headers = BTreeMap::from([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ]);
        headers.extend(self.headers.resolve(workload).await?);

        Ok(ResolvedEndpoint {
            url,
            headers,
            options: self.options.resolve(workload).await?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRequestBody {
    pub name: String,
    pub env: BTreeMap<String, String>,
    pub user_options: Map<String, Value>,
    pub misc: Map<String, Value>,
    pub auth_state: Value,
    pub certs: BTreeMap<String, String>,
    pub internal_trust_bundles: BTreeMap<String, String>,
}

fn request(method: HttpMethod, endpoint: &ResolvedEndpoint, body: Option<Vec<u8>>) -> OutboundRequest {
    OutboundRequest {
        method,
        url: endpoint.url.clone(),
        headers: endpoint.headers.clone(),
        body,
        timeout: Some(endpoint.options.request_timeout),
        validate_cert: endpoint.options.validate_cert,
    }
}

pub fn start_request(
    endpoint: &ResolvedEndpoint,
    body: &StartRequestBody,
) -> AppResult<OutboundRequest> {
    let payload = serde_json::to_vec(body).map_err(|e| {
        AppError::with_message(
            AppErrorKind::Internal,
            codes::INTERNAL_ERROR,
            format!("could not encode start request: {e}"),
        )
    })?;
    Ok(request(HttpMethod::Post, endpoint, Some(payload)))
}

pub fn poll_request(endpoint: &ResolvedEndpoint) -> OutboundRequest {
    request(HttpMethod::Get, endpoint, None)
}

pub fn stop_request(endpoint: &ResolvedEndpoint) -> OutboundRequest {
    request(HttpMethod::Delete, endpoint, None)
}

fn strip_query(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].to_string()
}

/// Turns a non-2xx response into the failure it describes.
pub fn classify_failure(response: &OutboundResponse) -> OutpostFailure {
    let raw = String::from_utf8_lossy(&response.body).into_owned();
    let parsed = serde_json::from_str::<Value>(&raw).ok();

    if response.status == APPLICATION_ERROR_STATUS {
        if let Some(Value::Object(obj)) = &parsed {
            return application_failure(obj);
        }
    }

    let message = match &parsed {
        Some(value) => serde_json::to_string_pretty(value).unwrap_or(raw),
        None => raw,
    };
    OutpostFailure::Status {
        code: response.status,
        message,
    }
}

fn application_failure(obj: &Map<String, Value>) -> OutpostFailure {
    let text = |key: &str| match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let args: Vec<String> = match obj.get("args") {
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => match obj.get("message") {
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => vec!["Unknown error".to_string()],
        },
    };

    OutpostFailure::Application {
        message: format!("{}{}: {}", text("module"), text("class"), args.join(" - ")),
        traceback: text("traceback"),
    }
}

/// Sends outpost requests through the shared dispatcher and reports on each.
#[derive(Clone)]
pub struct OutpostClient {
    dispatcher: HttpDispatcher,
    telemetry: Arc<dyn TelemetryPort>,
}

impl OutpostClient {
    pub fn new(dispatcher: HttpDispatcher, telemetry: Arc<dyn TelemetryPort>) -> Self {
        Self {
            dispatcher,
            telemetry,
        }
    }

    /// Returns the parsed JSON body of a successful response, or `None` when
    /// the body was empty or not JSON.
    pub async fn send(
        &self,
        request: OutboundRequest,
        action: OutpostAction,
        workload: &WorkloadView,
    ) -> Result<Option<Value>, OutpostError> {
        let url = strip_query(&request.url);
        let method = request.method;
        let started = Instant::now();
        let result = self.dispatcher.fetch(request).await;
        let elapsed = started.elapsed();

        tracing::info!(
            owner = %workload.owner.name,
            workload = %workload.name,
            action = action.as_str(),
            duration_ms = elapsed.as_millis() as u64,
            "communicated {action} with outpost service ( {url} )"
        );

        let outcome = match result {
            Err(failure) => Err(OutpostFailure::Transport { cause: failure.0 }),
            Ok(response) if response.is_success() => {
                Ok(serde_json::from_slice::<Value>(&response.body).ok())
            }
            Ok(response) => Err(classify_failure(&response)),
        };

        let mut event = TelemetryEvent::for_workload(&workload.owner.name, &workload.name);
        event.action = Some(action.as_str());
        event.duration = Some(elapsed);

        match outcome {
            Ok(body) => {
                event.status = Some("ok".to_string());
                self.telemetry.event("outpost_request", event);
                Ok(body)
            }
            Err(failure) => {
                let traceback = match &failure {
                    OutpostFailure::Application { traceback, .. } => traceback.as_str(),
                    _ => "",
                };
                tracing::warn!(
                    owner = %workload.owner.name,
                    workload = %workload.name,
                    action = action.as_str(),
                    "communication with outpost failed: {method} {url}: {}\noutpost traceback:\n{traceback}",
                    failure.detail()
                );
                event.status = Some("failed".to_string());
                event.detail = Some(failure.detail().to_string());
                self.telemetry.event("outpost_request", event);
                Err(OutpostError {
                    action,
                    url,
                    failure,
                })
            }
        }
    }
}
