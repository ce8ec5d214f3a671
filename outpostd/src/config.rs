// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::app::services::dispatcher::DEFAULT_CONCURRENCY_LIMIT;

const APP_DIR_NAME: &str = "outpost";
const CONFIG_FILE_NAME: &str = "outpost.toml";
const CONFIG_ENV_VAR: &str = "OUTPOST_CONFIG_PATH";
const CONCURRENCY_ENV_VAR: &str = "OUTPOST_HTTP_CONCURRENCY_LIMIT";
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8081;
const DEFAULT_BASE_URL: &str = "/hub/";
const DEFAULT_USER_HEADER: &str = "X-Forwarded-User";

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_address: Option<String>,
    port: Option<u16>,
    verbose: Option<bool>,
    base_url: Option<String>,
    user_header: Option<String>,
    hub_api_url: Option<String>,
    #[serde(default)]
    outpost: FileOutpost,
    #[serde(default)]
    jobs: FileJobs,
    #[serde(default)]
    tunnel: FileTunnel,
}

#[derive(Debug, Default, Deserialize)]
struct FileOutpost {
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    request_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    validate_cert: Option<bool>,
    request_404_poll_keep_running: Option<bool>,
    request_failed_poll_keep_running: Option<bool>,
    poll_interval_secs: Option<u64>,
    yield_wait_secs: Option<u64>,
    #[serde(default)]
    misc: Map<String, Value>,
    misc_disable_default: Option<bool>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    env_prefixes: Option<Vec<String>>,
    internal_ssl: Option<bool>,
    workload_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct FileJobs {
    job_server_limit_per_user: Option<usize>,
    poll_interval_secs: Option<u64>,
    job_timeout_secs: Option<u64>,
    #[serde(default)]
    default_user_options: Map<String, Value>,
    allow_named_servers: Option<bool>,
    named_server_limit_per_user: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileTunnel {
    ssh_binary: Option<String>,
    identity_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OutpostConfig {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub validate_cert: bool,
    pub request_404_poll_keep_running: bool,
    pub request_failed_poll_keep_running: bool,
    pub poll_interval: Duration,
    pub yield_wait: Duration,
    pub misc: Map<String, Value>,
    pub misc_disable_default: bool,
    pub env: BTreeMap<String, String>,
    pub env_prefixes: Vec<String>,
    pub internal_ssl: bool,
    pub workload_port: u16,
}

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub job_server_limit_per_user: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub default_user_options: Map<String, Value>,
    pub allow_named_servers: bool,
    pub named_server_limit_per_user: u32,
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub ssh_binary: String,
    pub identity_file: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub verbose: bool,
    pub base_url: String,
    pub user_header: String,
    pub api_url: String,
    pub http_concurrency_limit: usize,
    pub outpost: OutpostConfig,
    pub jobs: JobsConfig,
    pub tunnel: TunnelConfig,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub bind_address: ConfigValue<String>,
    pub port: ConfigValue<u16>,
    pub verbose: ConfigValue<bool>,
    pub outpost_url: ConfigValue<String>,
    pub http_concurrency_limit: ConfigValue<usize>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub outpost_url: Option<String>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

/// Picks the override when present, then the file value, then the default.
fn layered<T>(override_value: Option<T>, file_value: Option<T>, default: T) -> (T, ConfigSource) {
    match (override_value, file_value) {
        (Some(value), _) => (value, ConfigSource::Override),
        (None, Some(value)) => (value, ConfigSource::ConfigFile),
        (None, None) => (default, ConfigSource::Default),
    }
}

fn positive_secs(name: &str, value: Option<u64>, default: u64) -> Result<Duration> {
    let secs = value.unwrap_or(default);
    if secs == 0 {
        anyhow::bail!("{name} must be at least 1 second");
    }
    Ok(Duration::from_secs(secs))
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let mut file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let config_dir = config_path.as_deref().and_then(|path| path.parent());

    let (bind_address, bind_source) = layered(
        overrides.bind_address,
        file_config.bind_address,
        DEFAULT_BIND_ADDRESS.to_string(),
    );
    let (port, port_source) = layered(overrides.port, file_config.port, DEFAULT_PORT);
    if port == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }
    let (verbose, verbose_source) = layered(overrides.verbose, file_config.verbose, false);

    let file_outpost_url = file_config.outpost.url.take();
    let (outpost_url, outpost_url_source) = match (overrides.outpost_url, file_outpost_url) {
        (Some(url), _) => (url, ConfigSource::Override),
        (None, Some(url)) => (url, ConfigSource::ConfigFile),
        (None, None) => anyhow::bail!(
            "outpost url is not configured; set `url` in the [outpost] section or pass --outpost-url"
        ),
    };
    if outpost_url.trim().is_empty() {
        anyhow::bail!("outpost url must not be empty");
    }

    let base_url = normalize_base_url(file_config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL));
    let api_url = file_config
        .hub_api_url
        .unwrap_or_else(|| format!("http://{bind_address}:{port}{base_url}api"));

    let (http_concurrency_limit, concurrency_source) = concurrency_limit_from_env()?;

    let outpost = file_config.outpost;
    let outpost = OutpostConfig {
        url: outpost_url.clone(),
        headers: outpost.headers,
        request_timeout: positive_secs("outpost.request_timeout_secs", outpost.request_timeout_secs, 30)?,
        connect_timeout: positive_secs("outpost.connect_timeout_secs", outpost.connect_timeout_secs, 10)?,
        validate_cert: outpost.validate_cert.unwrap_or(false),
        request_404_poll_keep_running: outpost.request_404_poll_keep_running.unwrap_or(true),
        request_failed_poll_keep_running: outpost.request_failed_poll_keep_running.unwrap_or(true),
        poll_interval: positive_secs("outpost.poll_interval_secs", outpost.poll_interval_secs, 30)?,
        yield_wait: Duration::from_secs(outpost.yield_wait_secs.unwrap_or(1)),
        misc: outpost.misc,
        misc_disable_default: outpost.misc_disable_default.unwrap_or(false),
        env: outpost.env,
        env_prefixes: outpost
            .env_prefixes
            .unwrap_or_else(|| vec!["JUPYTER_".to_string(), "JUPYTERHUB_".to_string()]),
        internal_ssl: outpost.internal_ssl.unwrap_or(false),
        workload_port: outpost.workload_port.unwrap_or(8080),
    };

    let jobs = file_config.jobs;
    let jobs = JobsConfig {
        job_server_limit_per_user: jobs.job_server_limit_per_user.unwrap_or(10),
        poll_interval: positive_secs("jobs.poll_interval_secs", jobs.poll_interval_secs, 10)?,
        job_timeout: positive_secs("jobs.job_timeout_secs", jobs.job_timeout_secs, 3600)?,
        default_user_options: jobs.default_user_options,
        allow_named_servers: jobs.allow_named_servers.unwrap_or(true),
        named_server_limit_per_user: jobs.named_server_limit_per_user.unwrap_or(0),
    };

    let tunnel = TunnelConfig {
        ssh_binary: file_config
            .tunnel
            .ssh_binary
            .unwrap_or_else(|| "ssh".to_string()),
        identity_file: file_config
            .tunnel
            .identity_file
            .map(|raw| resolve_path(&raw, config_dir)),
    };

    let config = Config {
        bind_address,
        port,
        verbose,
        base_url,
        user_header: file_config
            .user_header
            .unwrap_or_else(|| DEFAULT_USER_HEADER.to_string()),
        api_url,
        http_concurrency_limit,
        outpost,
        jobs,
        tunnel,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        bind_address: ConfigValue {
            value: config.bind_address.clone(),
            source: bind_source,
        },
        port: ConfigValue {
            value: config.port,
            source: port_source,
        },
        verbose: ConfigValue {
            value: config.verbose,
            source: verbose_source,
        },
        outpost_url: ConfigValue {
            value: outpost_url,
            source: outpost_url_source,
        },
        http_concurrency_limit: ConfigValue {
            value: config.http_concurrency_limit,
            source: concurrency_source,
        },
    };

    Ok(LoadResult { config, report })
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

fn concurrency_limit_from_env() -> Result<(usize, ConfigSource)> {
    match std::env::var(CONCURRENCY_ENV_VAR) {
        Ok(raw) => {
            let limit: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("{CONCURRENCY_ENV_VAR} must be a positive integer"))?;
            if limit == 0 {
                anyhow::bail!("{CONCURRENCY_ENV_VAR} must be at least 1");
            }
            Ok((limit, ConfigSource::Env))
        }
        Err(std::env::VarError::NotPresent) => Ok((DEFAULT_CONCURRENCY_LIMIT, ConfigSource::Default)),
        Err(err) => Err(err).with_context(|| format!("{CONCURRENCY_ENV_VAR} is not valid unicode")),
    }
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
