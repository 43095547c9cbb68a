use crate::shared::paths::{ensure_dir, get_log_dir};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Subsystems that get their own log file. Everything else lands in `system.log`.
pub const LOG_TARGETS: [&str; 5] = ["state", "cache", "gc", "launcher", "config"];

/// Keeps the non-blocking writers alive. Dropping it flushes and stops them.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

static INSTALLED: OnceCell<()> = OnceCell::new();

struct TargetWriter {
    writers: HashMap<String, NonBlocking>,
    system_writer: NonBlocking,
}

impl TargetWriter {
    fn new(writers: HashMap<String, NonBlocking>, system_writer: NonBlocking) -> Self {
        Self {
            writers,
            system_writer,
        }
    }
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = Box<dyn std::io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        Box::new(self.system_writer.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        let target = meta.target();

        match route_target(target) {
            Some(name) => match self.writers.get(name) {
                Some(writer) => Box::new(writer.clone()),
                None => Box::new(self.system_writer.clone()),
            },
            None => Box::new(self.system_writer.clone()),
        }
    }
}

/// Maps a tracing target onto one of `LOG_TARGETS`, matching `name` and `name::*`.
fn route_target(target: &str) -> Option<&'static str> {
    LOG_TARGETS.iter().copied().find(|name| {
        target == *name
            || target
                .strip_prefix(name)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

/// Install the global subscriber writing to `get_log_dir()`.
///
/// Returns `None` when logging was already installed by an earlier call.
pub fn init_logging() -> Option<LoggingGuards> {
    init_logging_in(&get_log_dir())
}

pub fn init_logging_in(log_dir: &Path) -> Option<LoggingGuards> {
    if INSTALLED.get().is_some() {
        return None;
    }

    if let Err(e) = ensure_dir(log_dir) {
        eprintln!("Failed to create logs directory {:?}: {}", log_dir, e);
        return None;
    }

    let mut guards = Vec::new();
    let mut target_writers = HashMap::new();

    for target in LOG_TARGETS {
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, log_dir, format!("{}.log", target));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        target_writers.insert(target.to_string(), non_blocking);
        guards.push(guard);
    }

    let system_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "system.log");
    let (system_writer, system_guard) = tracing_appender::non_blocking(system_appender);
    guards.push(system_guard);

    let writer = TargetWriter::new(target_writers, system_writer);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false),
    );

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Someone else (a test harness, an embedding app) owns the dispatcher.
        return None;
    }
    let _ = INSTALLED.set(());

    tracing::info!(target: "system", "Logging initialized at {:?}", log_dir);

    Some(LoggingGuards { _guards: guards })
}
