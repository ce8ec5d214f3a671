// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    HttpMethod, HttpTransportPort, OutboundRequest, OutboundResponse, TransportFailure,
};

/// reqwest-backed transport. Certificate validation is chosen per request,
/// so two pooled clients are kept.
#[derive(Clone)]
pub struct ReqwestTransport {
    verified: reqwest::Client,
    insecure: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            verified: build_client(connect_timeout, false)?,
            insecure: build_client(connect_timeout, true)?,
        })
    }
}

fn build_client(connect_timeout: Duration, accept_invalid_certs: bool) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .user_agent(concat!("outpostd/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| {
            AppError::with_message(
                AppErrorKind::Internal,
                codes::LOCAL_ERROR,
                format!("failed to create http client: {err}"),
            )
        })
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

#[async_trait]
impl HttpTransportPort for ReqwestTransport {
    async fn execute(
        &self,
        request: OutboundRequest,
    ) -> Result<OutboundResponse, TransportFailure> {
        let client = if request.validate_cert {
            &self.verified
        } else {
            &self.insecure
        };
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|err| {
            tracing::debug!(
                method = %request.method,
                error = %err,
                is_connect = err.is_connect(),
                is_timeout = err.is_timeout(),
                "outbound request failed"
            );
            TransportFailure(describe(&err))
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportFailure(describe(&err)))?;
        Ok(OutboundResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{delete, post};
    use std::collections::BTreeMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request(method: HttpMethod, url: String) -> OutboundRequest {
        OutboundRequest {
            method,
            url,
            headers: BTreeMap::from([("X-Outpost".to_string(), "1".to_string())]),
            body: None,
            timeout: Some(Duration::from_secs(5)),
            validate_cert: false,
        }
    }

    #[tokio::test]
    async fn returns_status_and_body_for_any_response() {
        let router = Router::new()
            .route(
                "/services",
                post(|headers: HeaderMap, body: String| async move {
                    let marker = headers
                        .get("X-Outpost")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    format!("{marker}:{body}")
                }),
            )
            .route(
                "/services/abc",
                delete(|| async { (StatusCode::from_u16(419).unwrap(), "{\"error\":\"x\"}") }),
            );
        let base = serve(router).await;
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();

        let mut start = request(HttpMethod::Post, format!("{base}/services"));
        start.body = Some(b"{}".to_vec());
        let response = transport.execute(start).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, b"1:{}".to_vec());

        let response = transport
            .execute(request(HttpMethod::Delete, format!("{base}/services/abc")))
            .await
            .unwrap();
        assert_eq!(response.status, 419);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let err = transport
            .execute(request(HttpMethod::Get, format!("http://{addr}/services/abc")))
            .await
            .unwrap_err();
        assert!(!err.0.is_empty());
    }
}
