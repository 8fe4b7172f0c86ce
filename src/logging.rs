//! Runtime Logging
//!
//! Backend for the `log` facade shared by every runtime component. Each
//! record is rendered once, tagged with the component that emitted it (the
//! log target), and routed to console, file, or both with independent
//! level filters per destination.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::Local;
use log::{Level, LevelFilter};
use serde::{Deserialize, Serialize};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}. Valid options: text, json", s)),
        }
    }
}

/// Where rendered records go
#[derive(Debug, Clone, PartialEq)]
pub enum LogDestination {
    Console,
    File(PathBuf),
    Both(PathBuf),
}

impl LogDestination {
    fn includes_console(&self) -> bool {
        matches!(self, LogDestination::Console | LogDestination::Both(_))
    }

    fn file_path(&self) -> Option<&Path> {
        match self {
            LogDestination::File(path) | LogDestination::Both(path) => Some(path),
            LogDestination::Console => None,
        }
    }
}

/// One rendered record in JSON format
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLogEntry {
    pub timestamp: String,
    pub level: String,

    /// Runtime component that emitted the record (the log target)
    pub component: String,

    pub message: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub console_level: LevelFilter,
    pub file_level: Option<LevelFilter>,
    pub format: LogFormat,
    pub destination: LogDestination,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_level: LevelFilter::Info,
            file_level: None,
            format: LogFormat::Text,
            destination: LogDestination::Console,
        }
    }
}

/// `log::Log` backend for the plugin runtime
pub struct RuntimeLogger {
    config: LogConfig,
}

impl RuntimeLogger {
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    fn timestamp() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    fn render(&self, level: Level, component: &str, message: &str) -> String {
        match self.config.format {
            LogFormat::Text => format!(
                "{} {:<5} [{}] {}",
                Self::timestamp(),
                level,
                component,
                message
            ),
            LogFormat::Json => {
                let entry = JsonLogEntry {
                    timestamp: Self::timestamp(),
                    level: level.to_string(),
                    component: component.to_string(),
                    message: message.to_string(),
                };
                match serde_json::to_string(&entry) {
                    Ok(json) => json,
                    // Plain-string fields should never fail to serialize;
                    // fall back to the text rendering if they somehow do.
                    Err(_) => format!(
                        "{} {:<5} [{}] {}",
                        entry.timestamp, level, component, message
                    ),
                }
            }
        }
    }

    fn console_passes(&self, level: Level) -> bool {
        level <= self.config.console_level
    }

    fn file_passes(&self, level: Level) -> bool {
        self.config
            .file_level
            .map(|filter| level <= filter)
            .unwrap_or(false)
    }

    fn append_line(path: &Path, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)
    }
}

impl log::Log for RuntimeLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.console_passes(metadata.level()) || self.file_passes(metadata.level())
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        let line = self.render(level, record.target(), &record.args().to_string());

        if self.config.destination.includes_console() && self.console_passes(level) {
            let _ = writeln!(io::stderr(), "{}", line);
        }
        if let Some(path) = self.config.destination.file_path() {
            if self.file_passes(level) {
                if let Err(e) = Self::append_line(path, &line) {
                    eprintln!("Could not write log file {}: {}", path.display(), e);
                }
            }
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Install the runtime logger as the global `log` backend
///
/// The host calls this once at startup; every runtime component then logs
/// through it via the `log` macros.
pub fn init_logger(config: LogConfig) -> Result<()> {
    let max_level = config
        .file_level
        .map(|file| file.max(config.console_level))
        .unwrap_or(config.console_level);

    log::set_boxed_logger(Box::new(RuntimeLogger::new(config)))
        .context("Failed to set global logger")?;
    log::set_max_level(max_level);

    Ok(())
}
