//! Logging and observability
//!
//! Provides structured logging with:
//! - Multiple console formats (pretty, compact, JSON)
//! - An optional non-blocking log file
//! - [`ScanLogger`], a span-backed handle injected into each pipeline
//!   component so every event carries the run id and component name

use anyhow::{Context, Result};
use std::{fmt::Display, io, path::Path, time::Duration};
use tracing::{Level, Span};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};
use uuid::Uuid;

use crate::{config::LoggingConfig, error::ScannerError};

/// Initialize logging with specific configuration.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the program.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = create_env_filter(&config.level)?;

    let console_layer = match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_target(true)
            .boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
        _ => fmt::layer()
            .pretty()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
    };

    let (file_layer, guard) = match &config.file_path {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!("Logging system initialized with level: {}", config.level);
    Ok(guard)
}

fn file_writer(path: &Path) -> Result<(non_blocking::NonBlocking, WorkerGuard)> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;

    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    Ok(non_blocking(rolling::never(directory, file_name)))
}

/// Create environment filter from log level string
fn create_env_filter(level: &str) -> Result<EnvFilter> {
    let base_level = parse_level(level)?;

    let filter = EnvFilter::builder()
        .with_default_directive(base_level.into())
        .from_env()
        .context("Failed to create environment filter")?;

    Ok(filter)
}

pub(crate) fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(ScannerError::config(format!("Invalid log level: {}", level)).into()),
    }
}

/// Logging handle passed to each pipeline component at construction.
///
/// Cloning is cheap; clones share the same span.
#[derive(Debug, Clone)]
pub struct ScanLogger {
    span: Span,
}

impl ScanLogger {
    /// Root handle for one orchestrator run
    pub fn run() -> Self {
        Self {
            span: tracing::info_span!("scan_run", run_id = %Uuid::new_v4()),
        }
    }

    /// Handle that emits events without any enclosing span
    pub fn detached() -> Self {
        Self { span: Span::none() }
    }

    /// Child handle for a named component
    pub fn component(&self, name: &'static str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "component", name = name),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn phase(&self, phase: &str) {
        tracing::debug!(parent: &self.span, phase = phase, event = "phase", "Entering {} phase", phase);
    }

    pub fn stage_start(&self, stage: &str, target: &dyn Display) {
        tracing::debug!(
            parent: &self.span,
            stage = stage,
            host = %target,
            event = "stage_start",
            "Starting {} for {}",
            stage,
            target
        );
    }

    pub fn stage_complete(&self, stage: &str, target: &dyn Display, duration: Duration, findings: usize) {
        tracing::debug!(
            parent: &self.span,
            stage = stage,
            host = %target,
            duration_ms = duration.as_millis() as u64,
            findings = findings,
            event = "stage_complete",
            "Completed {} for {} in {}ms with {} findings",
            stage,
            target,
            duration.as_millis(),
            findings
        );
    }

    /// The tool exited unsuccessfully and the stage degrades to "no findings"
    pub fn tool_failed(&self, stage: &str, target: &dyn Display, status: Option<i32>, stderr: &str) {
        tracing::warn!(
            parent: &self.span,
            stage = stage,
            host = %target,
            status = ?status,
            stderr = stderr.trim(),
            event = "tool_failed",
            "{} failed for {}: {}",
            stage,
            target,
            stderr.trim()
        );
    }

    pub fn tool_timed_out(&self, stage: &str, target: &dyn Display, limit: Duration) {
        tracing::warn!(
            parent: &self.span,
            stage = stage,
            host = %target,
            limit_secs = limit.as_secs(),
            event = "tool_timeout",
            "{} timed out for {} after {}s",
            stage,
            target,
            limit.as_secs()
        );
    }

    pub fn error(&self, error: &ScannerError, context: &str) {
        tracing::error!(
            parent: &self.span,
            error = %error,
            context = context,
            severity = %error.severity(),
            recoverable = error.is_recoverable(),
            event = "error",
            "Error in {}: {}",
            context,
            error
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};
    use tracing::{
        field::{Field, Visit},
        subscriber::DefaultGuard,
        Event, Subscriber,
    };
    use tracing_subscriber::{
        layer::{Context, SubscriberExt},
        registry::LookupSpan,
        Layer, Registry,
    };

    /// Records every event with the path of spans it was emitted under
    #[derive(Clone, Default)]
    pub struct CapturedEvents(Arc<Mutex<Vec<(String, String)>>>);

    impl CapturedEvents {
        /// Capture events on the current thread until the guard drops
        pub fn install() -> (Self, DefaultGuard) {
            let captured = Self::default();
            let guard = tracing::subscriber::set_default(Registry::default().with(captured.clone()));
            (captured, guard)
        }

        /// Span path (e.g. `scan_run/component`) of the first event whose
        /// message contains `needle`
        pub fn scope_of(&self, needle: &str) -> Option<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .find(|(_, message)| message.contains(needle))
                .map(|(scope, _)| scope.clone())
        }
    }

    impl<S> Layer<S> for CapturedEvents
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
            let mut message = MessageField::default();
            event.record(&mut message);
            let scope = ctx
                .event_scope(event)
                .map(|scope| scope.from_root().map(|span| span.name()).collect::<Vec<_>>().join("/"))
                .unwrap_or_default();
            self.0.lock().unwrap().push((scope, message.0));
        }
    }

    #[derive(Default)]
    struct MessageField(String);

    impl Visit for MessageField {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }
}
