// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

#[derive(Parser, Debug)]
#[command(
    name = "outpostd",
    version,
    about = "Drives notebook workloads and batch jobs on remote outpost services",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < OUTPOST_CONFIG_PATH < command-line flags.\n\
If --config is omitted, outpostd tries OUTPOST_CONFIG_PATH, then the default config file location; a missing default config is OK.\n\
The outbound request budget shared by all workloads is read from OUTPOST_HTTP_CONCURRENCY_LIMIT (default 10)."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, outpostd uses OUTPOST_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "ADDR",
        help = "Address the job API listens on. Overrides `bind_address` from the config file."
    )]
    pub bind: Option<String>,
    #[arg(
        long,
        value_name = "PORT",
        help = "Port the job API listens on. Overrides `port` from the config file."
    )]
    pub port: Option<u16>,
    #[arg(
        long,
        value_name = "URL",
        help = "Base URL of the outpost service. Overrides `outpost.url` from the config file."
    )]
    pub outpost_url: Option<String>,
    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging and include logs from dependencies. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

const HELP_TEMPLATE: &str = r#"outpostd {version}

{before-help}{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
"#;

pub fn cli_command() -> clap::Command {
    Opts::command().help_template(HELP_TEMPLATE)
}

pub fn parse_opts() -> ParsedOpts {
    parse_from(std::env::args_os())
}

fn parse_from<I, T>(args: I) -> ParsedOpts
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = cli_command().get_matches_from(args);
    // Only an explicit flag overrides the config file.
    let verbose_override = matches.get_flag("verbose").then_some(true);
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
