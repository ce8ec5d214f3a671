// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use outpostd::adapters;
use outpostd::adapters::api::ApiState;
use outpostd::app::controller::{ControllerSettings, WorkloadController, WorkloadHooks};
use outpostd::app::orchestrator::{JobOrchestrator, JobSettings};
use outpostd::app::ports::TelemetryPort;
use outpostd::app::services::dispatcher::HttpDispatcher;
use outpostd::app::services::hooks::Hook;
use outpostd::app::services::outpost::{OutpostClient, RemoteEndpoint, RequestOptions};
use outpostd::app::services::tasks::TaskRegistry;
use outpostd::app::usecases::UseCases;
use outpostd::{config, logging};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => tracing::info!(
            "config path: {} (source={}, present={})",
            path.display(),
            source.as_str(),
            report.config_file_present
        ),
        (Some(path), None) => tracing::info!(
            "config path: {} (present={})",
            path.display(),
            report.config_file_present
        ),
        (None, _) => tracing::info!("config path: (none)"),
    }
    tracing::info!(
        "config bind_address: {} (source={})",
        report.bind_address.value,
        report.bind_address.source.as_str()
    );
    tracing::info!(
        "config port: {} (source={})",
        report.port.value,
        report.port.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
    tracing::info!(
        "config outpost.url: {} (source={})",
        report.outpost_url.value,
        report.outpost_url.source.as_str()
    );
    tracing::info!(
        "config http_concurrency_limit: {} (source={})",
        report.http_concurrency_limit.value,
        report.http_concurrency_limit.source.as_str()
    );
}

fn build_usecases(config: &config::Config, tasks: &TaskRegistry) -> anyhow::Result<UseCases> {
    let outpost = &config.outpost;
    let transport = Arc::new(
        adapters::http::ReqwestTransport::new(outpost.connect_timeout)
            .context("failed to set up the outbound http client")?,
    );
    let telemetry: Arc<dyn TelemetryPort> = Arc::new(adapters::telemetry::TracingTelemetry::new());
    let client = OutpostClient::new(
        HttpDispatcher::new(transport, config.http_concurrency_limit),
        telemetry.clone(),
    );
    let owners = Arc::new(adapters::owners::LocalOwnerDirectory::new(
        config.jobs.named_server_limit_per_user,
    ));
    let store = Arc::new(adapters::store::MemoryWorkloadStore::new());
    let clock = Arc::new(adapters::time::SystemClock::new());
    let tunnel = Arc::new(adapters::tunnel::SshTunnel::new(
        config.tunnel.ssh_binary.clone(),
        config.tunnel.identity_file.clone(),
    ));

    let mut hooks = WorkloadHooks::new(RemoteEndpoint {
        url: Hook::value(outpost.url.clone()),
        headers: Hook::value(outpost.headers.clone()),
        options: Hook::value(RequestOptions {
            request_timeout: outpost.request_timeout,
            validate_cert: outpost.validate_cert,
        }),
    });
    hooks.env = Hook::value(outpost.env.clone());
    hooks.misc = Hook::value(outpost.misc.clone());
    hooks.port = Hook::value(outpost.workload_port);
    hooks.poll_interval = Hook::value(outpost.poll_interval);

    let controller = WorkloadController::new(
        client,
        hooks,
        ControllerSettings {
            request_404_poll_keep_running: outpost.request_404_poll_keep_running,
            request_failed_poll_keep_running: outpost.request_failed_poll_keep_running,
            yield_wait: outpost.yield_wait,
            misc_disable_default: outpost.misc_disable_default,
            env_prefixes: outpost.env_prefixes.clone(),
            internal_ssl: outpost.internal_ssl,
        },
        owners.clone(),
        Arc::new(adapters::fs::LocalFilesystem::new()),
        tunnel,
        clock.clone(),
        tasks.clone(),
    );
    let orchestrator = JobOrchestrator::new(
        JobSettings {
            job_server_limit_per_user: config.jobs.job_server_limit_per_user,
            poll_interval: config.jobs.poll_interval,
            job_timeout: config.jobs.job_timeout,
            default_user_options: config.jobs.default_user_options.clone(),
            allow_named_servers: config.jobs.allow_named_servers,
            api_url: config.api_url.clone(),
        },
        controller.clone(),
        store.clone(),
        owners.clone(),
        None,
        clock,
        telemetry,
        tasks.clone(),
    );
    Ok(UseCases::new(
        orchestrator,
        controller,
        store,
        owners,
        tasks.clone(),
    ))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            bind_address: opts.bind,
            port: opts.port,
            outpost_url: opts.outpost_url,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let tasks = TaskRegistry::new();
    let usecases = build_usecases(&config, &tasks)?;
    let router = adapters::api::router(ApiState::new(
        usecases.clone(),
        config.user_header.clone(),
        &config.base_url,
    ));

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("server listening on {addr}{}", config.base_url);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("api server failed")?;

    match usecases.shutdown().await {
        Ok(stopped) => tracing::info!(stopped, "workloads stopped"),
        Err(err) => tracing::warn!("could not stop workloads: {err}"),
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, tasks.drain()).await.is_err() {
        let aborted = tasks.abort_all();
        tracing::warn!(aborted, "background tasks did not finish in time");
    }
    Ok(())
}
