// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

const LOG_ENV_VAR: &str = "OUTPOST_LOG";
const FORMAT_ENV_VAR: &str = "OUTPOST_LOG_FORMAT";
const SPAN_EVENTS_ENV_VAR: &str = "OUTPOST_LOG_SPAN_EVENTS";
const FILE_ENV_VAR: &str = "OUTPOST_LOG_FILE";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

pub fn init(verbose: bool) {
    let format = parse_format(env_value(FORMAT_ENV_VAR).as_deref());
    let span_events = parse_span_events(env_value(SPAN_EVENTS_ENV_VAR).as_deref());

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(format, span_events.clone(), None)];
    if let Some((writer, guard)) = build_file_writer() {
        layers.push(fmt_layer(format, span_events, Some(writer)));
        let _ = FILE_GUARD.set(guard);
    }

    Registry::default()
        .with(layers)
        .with(build_filter(verbose))
        .with(tracing_error::ErrorLayer::default())
        .init();
}

fn fmt_layer(format: LogFormat, span_events: FmtSpan, file: Option<NonBlocking>) -> BoxedLayer {
    let base = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(span_events);
    match (format, file) {
        (LogFormat::Json, None) => base.json().boxed(),
        (LogFormat::Json, Some(writer)) => base.json().with_ansi(false).with_writer(writer).boxed(),
        (LogFormat::Pretty, None) => base.pretty().boxed(),
        (LogFormat::Pretty, Some(writer)) => {
            base.pretty().with_ansi(false).with_writer(writer).boxed()
        }
        (LogFormat::Compact, None) => base.compact().boxed(),
        (LogFormat::Compact, Some(writer)) => {
            base.compact().with_ansi(false).with_writer(writer).boxed()
        }
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    match env::var(LOG_ENV_VAR) {
        Ok(value) => EnvFilter::new(value),
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new("info"),
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

fn parse_format(value: Option<&str>) -> LogFormat {
    match value {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn parse_span_events(value: Option<&str>) -> FmtSpan {
    match value {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env::var(FILE_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_falls_back_to_compact() {
        assert_eq!(parse_format(Some("json")), LogFormat::Json);
        assert_eq!(parse_format(Some("pretty")), LogFormat::Pretty);
        assert_eq!(parse_format(Some("yaml")), LogFormat::Compact);
        assert_eq!(parse_format(None), LogFormat::Compact);
    }

    #[test]
    fn span_events_are_opt_in() {
        assert_eq!(parse_span_events(Some("close")), FmtSpan::CLOSE);
        assert_eq!(parse_span_events(None), FmtSpan::NONE);
        assert_eq!(parse_span_events(Some("all")), FmtSpan::NONE);
    }
}
