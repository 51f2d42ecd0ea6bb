//! Structured logging for the handreceipt service
//!
//! Every process installs one global `tracing` subscriber built from a
//! [`LogConfig`]: JSON lines (or pretty text in development) on the console,
//! plus rolling JSONL files in production. HTTP requests carry a
//! [`CorrelationContext`] so a client-visible `x-trace-id` leads straight to
//! the matching log lines.
//!
//! ```ignore
//! use handreceipt_logging::{LogConfig, LogSubscriberBuilder};
//!
//! // Keep the guard alive for as long as file output is needed.
//! let _guard = LogSubscriberBuilder::new()
//!     .with_config(LogConfig::production("./logs".into()))
//!     .try_init()?;
//! ```

pub mod config;
pub mod correlation;
pub mod error;

pub use config::{
    ConsoleFormat, ConsoleOutput, FileOutput, JsonFields, LogConfig, LogPreset, RotationStrategy,
};
pub use correlation::{CorrelationContext, TRACE_ID_HEADER, TRACEPARENT_HEADER};
pub use error::LogError;

use std::fs::{self, File};

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::{Format, Json, JsonFields as JsonFieldFormat};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter};
use tracing_subscriber::fmt::{self as fmt_layer, TestWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

pub struct LogSubscriberBuilder {
    config: LogConfig,
}

impl LogSubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the filter directive, e.g. `"handreceipt_core=debug,info"`.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_file_output(mut self, file: FileOutput) -> Self {
        self.config.file = Some(file);
        self
    }

    /// Install the subscriber globally.
    ///
    /// `RUST_LOG` wins over the configured level. Returns the file writer's
    /// guard when file output is on; lines logged after it drops are lost.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.config.level)
                .map_err(|e| LogError::Filter(e.to_string()))?,
        };

        let console = &self.config.console;
        let json = &self.config.json;
        let writer = || {
            if console.capture {
                BoxMakeWriter::new(TestWriter::default())
            } else {
                BoxMakeWriter::new(std::io::stdout)
            }
        };

        let pretty = (console.enabled && console.format == ConsoleFormat::Pretty).then(|| {
            fmt_layer::layer()
                .with_ansi(console.ansi)
                .with_target(true)
                .with_writer(writer())
        });
        let json_console = (console.enabled && console.format == ConsoleFormat::Json)
            .then(|| json_layer(json, writer()));

        let (file_layer, guard) = match &self.config.file {
            Some(file) => {
                let (file_writer, guard) = file_writer(file)?;
                (Some(json_layer(json, file_writer)), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(filter)
            .with(pretty)
            .with(json_console)
            .with(file_layer)
            .try_init()
            .map_err(|e| LogError::Init(e.to_string()))?;

        Ok(guard)
    }
}

impl Default for LogSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn json_layer<S, W>(
    json: &JsonFields,
    writer: W,
) -> fmt_layer::Layer<S, JsonFieldFormat, Format<Json>, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt_layer::layer::<S>()
        .with_writer(writer)
        .json()
        .with_current_span(true)
        .with_span_list(json.span_list)
        .flatten_event(json.flatten)
        .with_file(json.location)
        .with_line_number(json.location)
}

/// `Never` truncates one file at startup; the rotating strategies append.
fn file_writer(file: &FileOutput) -> Result<(NonBlocking, WorkerGuard), LogError> {
    fs::create_dir_all(&file.directory)?;
    let rotation = match file.rotation {
        RotationStrategy::Never => {
            let path = file.directory.join(format!("{}.jsonl", file.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&file.prefix)
        .filename_suffix("jsonl")
        .build(&file.directory)
        .map_err(|e| LogError::Io(e.to_string()))?;
    Ok(tracing_appender::non_blocking(appender))
}

pub fn init(config: LogConfig) -> Result<Option<WorkerGuard>, LogError> {
    LogSubscriberBuilder::new().with_config(config).try_init()
}

/// Safe to call from every test; only the first call installs anything.
pub fn init_testing() {
    let _ = LogSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_json() {
        let builder = LogSubscriberBuilder::new();
        assert_eq!(builder.config.level, "info");
        assert_eq!(builder.config.console.format, ConsoleFormat::Json);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = LogSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(false)
            .with_file_output(FileOutput::daily("./logs".into()));
        assert_eq!(builder.config.level, "trace");
        assert!(!builder.config.console.enabled);
        assert!(builder.config.file.is_some());
    }

    #[test]
    fn test_never_rotation_writes_single_file() {
        let dir = std::env::temp_dir().join(format!("handreceipt-log-{}", uuid::Uuid::new_v4()));
        let file = FileOutput {
            directory: dir.clone(),
            prefix: "audit".into(),
            rotation: RotationStrategy::Never,
        };
        let (_writer, _guard) = file_writer(&file).unwrap();
        assert!(dir.join("audit.jsonl").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_init_testing_is_idempotent() {
        init_testing();
        init_testing();
        tracing::warn!("still logging");
    }

    #[test]
    fn test_invalid_level_is_reported() {
        // Another test may already own the global subscriber; the filter is
        // parsed before installation so this path is deterministic.
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let result = LogSubscriberBuilder::new()
            .with_level("handreceipt=loud")
            .with_console(false)
            .try_init();
        assert!(matches!(result, Err(LogError::Filter(_))));
    }
}
