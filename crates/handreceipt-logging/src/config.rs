//! Logging configuration
//!
//! Operators usually pick a [`LogPreset`] in the server's `[logging]`
//! section and at most override its level.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Named starting points for [`LogConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogPreset {
    /// Pretty console output at debug level
    Development,
    /// JSONL console and daily rotated JSONL files
    #[default]
    Production,
    /// Warnings only, captured by the test harness
    Testing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub console: ConsoleOutput,
    /// Rolling JSONL files, off unless configured
    pub file: Option<FileOutput>,
    pub json: JsonFields,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            console: ConsoleOutput::default(),
            file: None,
            json: JsonFields::default(),
        }
    }
}

impl LogConfig {
    pub fn development() -> Self {
        Self {
            level: "debug".into(),
            console: ConsoleOutput {
                format: ConsoleFormat::Pretty,
                ansi: true,
                ..ConsoleOutput::default()
            },
            ..Self::default()
        }
    }

    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            file: Some(FileOutput::daily(log_dir)),
            ..Self::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            level: "warn".into(),
            console: ConsoleOutput {
                capture: true,
                ..ConsoleOutput::default()
            },
            ..Self::default()
        }
    }

    /// Resolve a preset. `log_dir` only matters for production.
    pub fn from_preset(preset: LogPreset, log_dir: PathBuf) -> Self {
        match preset {
            LogPreset::Development => Self::development(),
            LogPreset::Production => Self::production(log_dir),
            LogPreset::Testing => Self::testing(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsoleFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable multi-line output
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleOutput {
    pub enabled: bool,
    pub format: ConsoleFormat,
    pub ansi: bool,
    /// Route through libtest's output capture instead of stdout
    pub capture: bool,
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ConsoleFormat::Json,
            ansi: false,
            capture: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutput {
    pub directory: PathBuf,
    /// Files are named `{prefix}.{date}.jsonl`
    pub prefix: String,
    pub rotation: RotationStrategy,
}

impl FileOutput {
    pub fn daily(directory: PathBuf) -> Self {
        Self {
            directory,
            prefix: "handreceipt".into(),
            rotation: RotationStrategy::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// A single file, truncated at startup
    Never,
}

/// Which span and source details go into each JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonFields {
    /// Put event fields at the top level instead of under `fields`
    pub flatten: bool,
    /// Include the full span stack, not just the current span
    pub span_list: bool,
    /// Include file and line number
    pub location: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            flatten: true,
            span_list: true,
            location: true,
        }
    }
}
