//! Structured logging setup (SPEC_FULL §4.12). `log` + `flexi_logger`, the
//! teacher's exact stack (cli.rs), configured once from the CLI's `--log`
//! flag with the same default `"warn"` level.

use flexi_logger::{FileSpec, Logger, LoggerHandle, WriteMode};

use crate::error::{CoreError, FailureKind};

/// Start the global logger from a log-spec string (e.g. `"warn"`,
/// `"info,packastack::pipeline=debug"`). Returns a handle that must be kept
/// alive for the duration of the process.
pub fn init(log_spec: &str) -> Result<LoggerHandle, CoreError> {
    Logger::try_with_str(log_spec)
        .map_err(|e| CoreError::new(FailureKind::ConfigError, format!("invalid log spec: {e}")))?
        .start()
        .map_err(|e| CoreError::new(FailureKind::ConfigError, format!("starting logger: {e}")))
}

/// Start a per-run, per-package log sink under `run_dir/logs/<package>.log`
/// (spec §4.9 "Side effects"). Returned handle must be kept alive for the
/// duration of that package's pipeline invocation.
pub fn init_package_log_sink(
    log_spec: &str,
    run_dir: &std::path::Path,
    package: &str,
) -> Result<LoggerHandle, CoreError> {
    Logger::try_with_str(log_spec)
        .map_err(|e| CoreError::new(FailureKind::ConfigError, format!("invalid log spec: {e}")))?
        .log_to_file(FileSpec::default().directory(run_dir.join("logs")).basename(package))
        .write_mode(WriteMode::BufferAndFlush)
        .start()
        .map_err(|e| CoreError::new(FailureKind::ConfigError, format!("starting package log sink: {e}")))
}
