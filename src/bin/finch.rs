//! The `finch` binary entry point: parses the CLI surface, loads and
//! validates stage files, then dispatches to standalone, `--server`, or
//! `--client` execution.

use std::process::ExitCode;

use clap::Parser;
use finch::cli::Cli;
use finch::control::client::RemoteClient;
use finch::control::server;
use finch::{stage, FinchError};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Some(addr) = &cli.server {
        return run_server(addr).await;
    }

    let (mut files, dirs) = match stage::load_stage_files(&cli.stage_files) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to load stage files");
            return ExitCode::FAILURE;
        }
    };
    stage::apply_param_overrides(&mut files, &cli.params);

    if cli.test {
        return run_test_mode(&files, &dirs, cli.dsn.as_deref());
    }

    if let Some(addr) = &cli.client {
        return run_remote_client(addr, &files, &dirs, cli.dsn.as_deref()).await;
    }

    run_standalone(&files, &dirs, cli.dsn.as_deref()).await
}

/// `--test`: compile and validate every stage file, then exit without
/// connecting to MySQL. Allocation is
/// skipped entirely, since it requires a live DSN to build a `mysql_async`
/// pool against.
fn run_test_mode(files: &[finch::config::StageFile], dirs: &[std::path::PathBuf], _dsn: Option<&str>) -> ExitCode {
    let mut failed = false;

    for (file, dir) in files.iter().zip(dirs) {
        let specs = file.trx_specs();
        let contents = match file.load_trx_contents(dir) {
            Ok(c) => c,
            Err(e) => {
                error!(stage = %file.stage.name, error = %e, "failed to read trx files");
                failed = true;
                continue;
            }
        };
        match finch::compiler::compile(&specs, &contents, &file.params) {
            Ok(set) => info!(stage = %file.stage.name, statements = set.statement_count(), "stage compiled cleanly"),
            Err(e) => {
                error!(stage = %file.stage.name, error = %e, "stage failed to compile");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run_standalone(files: &[finch::config::StageFile], dirs: &[std::path::PathBuf], dsn: Option<&str>) -> ExitCode {
    let cancel = tokio_util::sync::CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c_cancel.cancel();
    });

    let outcomes = stage::run_all_cancellable(files, dirs, dsn, &cancel).await;
    report_outcomes(&outcomes)
}

/// `--server ADDR`: run as the control-plane coordinator until a `/stop`
/// request cancels it (or the process receives Ctrl-C).
async fn run_server(addr: &str) -> ExitCode {
    let addr = match addr.parse() {
        Ok(a) => a,
        Err(e) => {
            error!(addr, error = %e, "invalid --server address");
            return ExitCode::FAILURE;
        }
    };

    let cancel = tokio_util::sync::CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    });

    match server::serve(addr, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "control-plane server exited with an error");
            ExitCode::FAILURE
        }
    }
}

/// `--client ADDR`: boot against the control-plane server, then poll for a
/// stage assignment and run it locally through the same pipeline the
/// standalone binary uses, reporting stats and fatal errors back.
async fn run_remote_client(
    addr: &str,
    files: &[finch::config::StageFile],
    dirs: &[std::path::PathBuf],
    dsn: Option<&str>,
) -> ExitCode {
    let name = xid::new().to_string();
    let remote = RemoteClient::new(addr, name);

    if let Err(e) = remote.boot().await {
        error!(error = %e, "failed to boot against control-plane server");
        return ExitCode::FAILURE;
    }

    let cancel = tokio_util::sync::CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c_cancel.cancel();
    });

    match remote.poll_for_run(&cancel).await {
        Some(_run) => {
            let outcomes = stage::run_all_cancellable(files, dirs, dsn, &cancel).await;
            for outcome in &outcomes {
                for report in outcome.stats.report() {
                    if let Err(e) = remote.report_stats(std::slice::from_ref(&report)).await {
                        warn!(error = %e, "failed to report stats to control-plane server");
                    }
                }
                if let Some(err) = &outcome.error {
                    let _ = remote.report_error(err.to_string()).await;
                }
            }
            report_outcomes(&outcomes)
        }
        None => {
            info!("cancelled while waiting for a run assignment");
            ExitCode::SUCCESS
        }
    }
}

fn report_outcomes(outcomes: &[stage::StageOutcome]) -> ExitCode {
    let mut failed = false;

    for outcome in outcomes {
        for report in outcome.stats.report() {
            info!(
                stage = %outcome.stage_name,
                trx = %report.trx,
                stmt = report.stmt_index,
                count = report.count,
                ok = report.ok,
                recovered = report.recovered,
                aborted = report.aborted,
                p50_us = report.p50_micros,
                p99_us = report.p99_micros,
                max_us = report.max_micros,
                "stage report"
            );
        }
        if let Some(err) = &outcome.error {
            failed = true;
            let fatal = matches!(err, FinchError::Config(_) | FinchError::Compile { .. });
            if fatal {
                error!(stage = %outcome.stage_name, error = %err, "stage failed fatally");
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
