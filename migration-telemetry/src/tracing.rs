use migration_config::Environment;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::{self, Write};
use std::panic::PanicHookInfo;
use std::sync::{Once, OnceLock};
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, InitError};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

const LOG_DIR: &str = "logs";
const LOG_FILE_SUFFIX: &str = "log";
const MAX_LOG_FILES: usize = 5;

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to create the log file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to bridge `log` records into tracing: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to install the tracing subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("failed to read the environment: {0}")]
    Io(#[from] io::Error),
}

/// Flushes buffered log lines when dropped. Hold it until the process exits.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

/// Fields added to every JSON log entry written by the process.
#[derive(Debug, Default)]
struct TopLevelFields {
    partition_id: Option<String>,
    role: Option<String>,
}

impl TopLevelFields {
    fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("partition_id", self.partition_id.as_deref()),
            ("role", self.role.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
    }

    /// Returns `line` with the missing fields added, or [`None`] if the line is
    /// not a JSON object or already carries every field.
    fn inject(&self, line: &[u8]) -> Option<Vec<u8>> {
        let serde_json::Value::Object(mut entry) = serde_json::from_slice(line).ok()? else {
            return None;
        };

        let mut changed = false;
        for (key, value) in self.entries() {
            if !entry.contains_key(key) {
                entry.insert(key.to_owned(), value.into());
                changed = true;
            }
        }
        if !changed {
            return None;
        }

        let mut output = serde_json::to_vec(&entry).ok()?;
        if line.ends_with(b"\n") {
            output.push(b'\n');
        }

        Some(output)
    }
}

static TOP_LEVEL_FIELDS: OnceLock<TopLevelFields> = OnceLock::new();

struct TopLevelFieldsWriter<W> {
    inner: W,
    fields: &'static TopLevelFields,
}

impl<W: Write> Write for TopLevelFieldsWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.fields.inject(buf) {
            // Callers expect the length of the buffer they handed over.
            Some(line) => self.inner.write_all(&line).map(|()| buf.len()),
            None => self.inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a dev subscriber for tests when `ENABLE_TRACING` is set.
///
/// ```bash
/// ENABLE_TRACING=1 RUST_LOG=debug cargo test migration_over_http
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Prod would log into files.
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test").expect("Failed to initialize tracing for tests");
        }
    });
}

pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_top_level_fields(app_name, None, None)
}

/// Installs the global subscriber of a service.
///
/// Prod and staging write JSON entries, tagged with `partition_id` and `role`,
/// to daily rolling files under `logs/`. Dev pretty-prints to the terminal.
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing_with_top_level_fields(
    app_name: &str,
    partition_id: Option<String>,
    role: Option<String>,
) -> Result<LogFlusher, TracingError> {
    let fields = TOP_LEVEL_FIELDS.get_or_init(|| TopLevelFields { partition_id, role });

    // sqlx and actix still log through the `log` crate.
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let log_flusher = if Environment::load()?.is_prod() {
        init_file_tracing(filter, app_name, fields)?
    } else {
        init_terminal_tracing(filter)?
    };

    install_panic_hook();

    Ok(log_flusher)
}

fn init_file_tracing(
    filter: EnvFilter,
    app_name: &str,
    fields: &'static TopLevelFields,
) -> Result<LogFlusher, TracingError> {
    let appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix(LOG_FILE_SUFFIX)
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .build(LOG_DIR)?;
    let (appender, guard) = tracing_appender::non_blocking(appender);

    let json_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(false)
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(move || TopLevelFieldsWriter {
            inner: appender.make_writer(),
            fields,
        });

    set_global_default(Registry::default().with(filter).with(json_layer))?;

    Ok(LogFlusher::Flusher(guard))
}

fn init_terminal_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let subscriber = fmt()
        .pretty()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Logs panics as errors before handing them to the previous hook.
fn install_panic_hook() {
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log_panic(info);
        previous_hook(info);
    }));
}

fn log_panic(info: &PanicHookInfo) {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload");

    let backtrace = Backtrace::capture();
    let backtrace = (backtrace.status() == BacktraceStatus::Captured).then_some(backtrace);

    tracing::error!(
        panic.payload = payload,
        panic.location = info.location().map(tracing::field::display),
        panic.backtrace = backtrace.map(tracing::field::display),
        "a panic occurred"
    );
}
