//! Logging setup
//!
//! Pipeline chatter goes through the `log` facade (`log_debug!` and friends); the usage
//! service and orchestrator emit `tracing` events with structured fields. Both end up in
//! the same sink: an optional log file and, when requested, stderr. Stdout is left to
//! the CLI's answers.

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::LazyLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default `EnvFilter` directives when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "homework_solver=debug,warn";

const CRATE_TARGET: &str = "homework_solver";

/// Libraries that are only interesting with verbose logging on
const NOISY_TARGETS: &[&str] = &["reqwest", "hyper", "h2", "rustls", "want", "mio", "rusqlite"];

#[derive(Default)]
struct Sink {
    enabled: bool,
    verbose: bool,
    to_stderr: bool,
    file: Option<File>,
}

impl Sink {
    fn write(&mut self, bytes: &[u8]) {
        if !self.enabled {
            return;
        }
        if let Some(file) = self.file.as_mut() {
            let _ = file.write_all(bytes);
            let _ = file.flush();
        }
        if self.to_stderr {
            let _ = io::stderr().write_all(bytes);
        }
    }
}

static SINK: LazyLock<Mutex<Sink>> = LazyLock::new(|| Mutex::new(Sink::default()));

struct SolverLogger;

static LOGGER: SolverLogger = SolverLogger;

impl log::Log for SolverLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let sink = SINK.lock();
        if !sink.enabled {
            return false;
        }

        let target = metadata.target();
        if target.starts_with(CRATE_TARGET) {
            return metadata.level() <= Level::Debug;
        }

        if !sink.verbose && NOISY_TARGETS.iter().any(|noisy| target.starts_with(noisy)) {
            return false;
        }

        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {} [{}] - {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        );
        SINK.lock().write(line.as_bytes());
    }

    fn flush(&self) {}
}

/// Writer handed to the tracing fmt layer
#[derive(Clone, Copy)]
struct SinkWriter;

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SINK.lock().write(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = SINK.lock().file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

impl<'a> fmt::MakeWriter<'a> for SinkWriter {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Install the `log` and `tracing` backends.
///
/// Safe to call more than once; only the first call installs anything. Output stays
/// off until [`enable_logging`] is called.
pub fn init() -> Result<(), String> {
    use std::sync::OnceLock;
    static INIT_RESULT: OnceLock<Result<(), String>> = OnceLock::new();

    INIT_RESULT
        .get_or_init(|| {
            if std::env::var("RUST_LOG").is_ok_and(|v| v.contains("trace")) {
                set_verbose_logging(true);
            }

            let env_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

            let fmt_layer = fmt::Layer::new()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_writer(SinkWriter);

            let tracing_result = Registry::default()
                .with(env_filter)
                .with(fmt_layer)
                .try_init();

            let log_result =
                log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Debug));

            match (tracing_result, log_result) {
                (Ok(()), _) | (_, Ok(())) => Ok(()),
                (Err(tracing_err), Err(log_err)) => Err(format!(
                    "Failed to initialize logging: tracing={tracing_err}, log={log_err}"
                )),
            }
        })
        .clone()
}

pub fn enable_logging() {
    SINK.lock().enabled = true;
}

pub fn disable_logging() {
    SINK.lock().enabled = false;
}

/// Let through info-level records from HTTP and storage libraries
pub fn set_verbose_logging(enabled: bool) {
    SINK.lock().verbose = enabled;
}

pub fn set_log_to_stderr(enabled: bool) {
    SINK.lock().to_stderr = enabled;
}

/// Append log output to a file
pub fn set_log_file(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    SINK.lock().file = Some(file);
    Ok(())
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        log::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}
