//! ---
//! psoak_section: "01-core-functionality"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Tracing subscriber initialisation for harness binaries."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::never;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "PSOAK_LOG";
const CONSOLE_DEFAULT: &str = "info";

static RUN_LOG_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available console log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// File name of the JSON log written for one harness invocation.
///
/// Runs that drive a scenario are keyed by their seed so two soak runs with
/// different operation mixes never share a file; a rerun with the same seed
/// replaces the earlier log.
pub fn run_log_file_name(
    service_name: &str,
    config: &LoggingConfig,
    seed: Option<u64>,
) -> String {
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    match seed {
        Some(seed) => format!("{prefix}-seed-{seed}.log"),
        None => format!("{prefix}.log"),
    }
}

/// Console filter: `PSOAK_LOG`, then `RUST_LOG`, then `info`.
fn console_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {LOG_ENV} directive ({err}); defaulting to {CONSOLE_DEFAULT} logging"
            );
            EnvFilter::new(CONSOLE_DEFAULT)
        }),
        Err(_) => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(CONSOLE_DEFAULT)),
    }
}

/// Initialize the tracing subscriber for one harness invocation.
///
/// The console honours `PSOAK_LOG`/`RUST_LOG` and [`LoggingConfig::format`].
/// Every event at [`LoggingConfig::file_filter`] or above is also written as
/// flattened JSON to a per-run file under [`LoggingConfig::directory`], so the
/// `phase`, `node`, `resource` and `attempt` fields of the harness macros are
/// top-level keys and full placement snapshots (logged at `debug`) survive a
/// quiet console. Returns the path of that file.
pub fn init_tracing(
    service_name: &str,
    config: &LoggingConfig,
    seed: Option<u64>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("failed to create log directory {}", config.directory.display())
    })?;
    let file_name = run_log_file_name(service_name, config, seed);
    let run_log = config.directory.join(&file_name);
    let file_filter = EnvFilter::try_new(&config.file_filter)
        .with_context(|| format!("invalid logging file_filter '{}'", config.file_filter))?;

    let (file_writer, file_guard) =
        tracing_appender::non_blocking(never(&config.directory, &file_name));
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = RUN_LOG_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .flatten_event(true)
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    }
    .with_filter(console_filter());

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .flatten_event(true)
        .with_writer(file_writer)
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        seed,
        run_log = %run_log.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(run_log)
}
