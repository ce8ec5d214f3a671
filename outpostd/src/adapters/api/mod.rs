// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! REST surface for tenants (jobs) and for outposts (tunnel bootstrap).

mod errors;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::app::orchestrator::CreateJobInput;
use crate::app::usecases::UseCases;

pub use errors::ApiError;

#[derive(Clone)]
pub struct ApiState {
    usecases: UseCases,
    user_header: String,
    base_url: String,
}

impl ApiState {
    pub fn new(usecases: UseCases, user_header: impl Into<String>, base_url: &str) -> Self {
        Self {
            usecases,
            user_header: user_header.into(),
            base_url: base_url.to_string(),
        }
    }

    fn caller(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        headers
            .get(self.user_header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::forbidden("missing caller identity"))
    }
}

pub fn router(state: ApiState) -> Router {
    let base = state.base_url.trim_end_matches('/').to_string();
    let routes = Router::new()
        .route("/api/job", post(create_job))
        .route("/api/job/{owner}/{name}", get(job_status))
        .route("/api/users/setuptunnel/{owner}/{name}", post(setup_tunnel))
        .with_state(state);
    if base.is_empty() {
        routes
    } else {
        Router::new().nest(&base, routes)
    }
}

/// Lenient body parsing: anything that is not a JSON object counts as `{}`.
fn json_object(body: &Bytes) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn job_input(body: &Bytes, headers: &HeaderMap) -> CreateJobInput {
    let mut body = json_object(body);
    let user_options = match body.remove("user_options") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let notebook_dirs = match body.remove("notebook_dirs") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    let api_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("token ")
                .or_else(|| value.strip_prefix("Bearer "))
        })
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    CreateJobInput {
        user_options,
        notebook_dirs,
        api_token,
    }
}

fn resource_url(state: &ApiState, headers: &HeaderMap, owner: &str, name: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("X-Forwarded-Proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}{}api/job/{owner}/{name}", state.base_url)
}

async fn create_job(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let caller = state.caller(&headers)?;
    let input = job_input(&body, &headers);
    let created = state.usecases.create_job(&caller, input).await?;
    let url = resource_url(&state, &headers, &created.owner, &created.name);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, url.clone())],
        url,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    delete: Option<String>,
}

async fn job_status(
    State(state): State<ApiState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<StatusQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let caller = state.caller(&headers)?;
    let delete = query
        .delete
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(true);
    let report = state
        .usecases
        .job_status(&caller, &owner, &name, delete)
        .await?;
    Ok(Json(report).into_response())
}

async fn setup_tunnel(
    State(state): State<ApiState>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.caller(&headers)?;
    let forward_info = if body.is_empty() {
        None
    } else {
        Some(Value::Object(json_object(&body)))
    };
    state
        .usecases
        .setup_tunnel(&owner, &name, forward_info)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
