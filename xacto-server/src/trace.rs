use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use log::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

const MAX_LOG_FILES: usize = 10;

/// Set up logging: the configured level to a daily-rolling file, warnings
/// and errors to stderr. The returned guard must be kept alive for the
/// process lifetime so buffered log lines are flushed on exit.
pub fn init_logging(dir: &Path, level: &str) -> Result<WorkerGuard> {
    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("xacto-server.log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)?;
    let (non_blocking, flush_guard) = tracing_appender::non_blocking(rolling);

    let dispatch_file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] - {} - [{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::from_str(level)?)
        .chain(Box::new(non_blocking) as Box<dyn Write + Send>);

    let dispatch_stderr = fern::Dispatch::new()
        .level(LevelFilter::Warn)
        .format(|out, message, record| {
            out.finish(format_args!(
                "\x1B[{}m{} {}\x1B[0m",
                fern::colors::Color::Yellow.to_fg_str(),
                record.level(),
                message
            ))
        })
        .chain(std::io::stderr());

    if fern::Dispatch::new().chain(dispatch_file).chain(dispatch_stderr).apply().is_err() {
        eprintln!("logger has already been set");
    }

    Ok(flush_guard)
}
