// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gfd` — the Gaffer control-plane daemon.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod lifecycle;

use config::Config;
use std::process::ExitCode;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("usage: gfd [--state-dir <path>] [--gateway-url <ws://host:port>]");
}

fn parse_args() -> Result<(Option<std::path::PathBuf>, Option<String>), String> {
    let mut state_dir = None;
    let mut gateway_url = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--state-dir" => {
                let value = args.next().ok_or("--state-dir needs a value")?;
                state_dir = Some(std::path::PathBuf::from(value));
            }
            "--gateway-url" => {
                gateway_url = Some(args.next().ok_or("--gateway-url needs a value")?);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok((state_dir, gateway_url))
}

#[tokio::main]
async fn main() -> ExitCode {
    let (state_dir, gateway_url) = match parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("gfd: {e}");
            print_usage();
            return ExitCode::from(2);
        }
    };

    let config = match Config::load(state_dir, gateway_url) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gfd: {e}");
            return ExitCode::from(2);
        }
    };

    // Console + rolling file logging; RUST_LOG overrides the default filter.
    let file_appender = tracing_appender::rolling::daily(config.logs_dir(), "gfd.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(file_writer.and(std::io::stderr))
        .init();

    match lifecycle::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "daemon exited with error");
            eprintln!("gfd: {e}");
            ExitCode::FAILURE
        }
    }
}
