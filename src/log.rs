//! File logging for the orchestration engine.
//!
//! Log levels:
//! - ERROR: Critical unit failures (required units) and unrecoverable conditions
//! - WARN: Phantom edges, unreadable manifests, cycles, degraded modes
//! - INFO: Orchestration runs, state transitions, group progress
//! - DEBUG: Per-unit activation traces, throttle decisions
//! - TRACE: Raw metric samples, cache claims
//!
//! Debug mode can be enabled with `--debug` flag or `STAGEHAND_DEBUG=1` env var.
//! `STAGEHAND_LOG_LEVEL=trace` (or any level name) sets the level directly;
//! the more verbose of the two wins.
//! Nothing is written until [`init`] or [`init_with_path`] has been called.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Log levels for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_env() -> Option<Self> {
        std::env::var("STAGEHAND_LOG_LEVEL").ok()?.parse().ok()
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Initialize logging to ~/.stagehand/stagehand.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
pub fn init_with_debug(debug: bool) {
    if let Some(dir) = dirs::home_dir().map(|h| h.join(".stagehand")) {
        let _ = std::fs::create_dir_all(&dir);
        init_with_path(dir.join("stagehand.log"), debug);
    }
}

/// Initialize logging to an explicit file.
pub fn init_with_path(path: PathBuf, debug: bool) {
    let env_debug = std::env::var("STAGEHAND_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let flag_level = if debug || env_debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let level = LogLevel::from_env().map_or(flag_level, |l| l.max(flag_level));
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    // Truncate file on startup
    let _ = std::fs::write(&path, "");
    LOG_PATH.set(path).ok();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    get_level() >= LogLevel::Debug
}

/// Set the minimum log level for output.
pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Get the current log level.
pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Log a message at the specified level.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
    }
}

/// Log a message at INFO level.
pub fn info(msg: &str) {
    log_at(LogLevel::Info, msg);
}

/// Log a message at ERROR level.
pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

/// Log a message at WARN level.
pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

/// Log a message at DEBUG level (only in debug mode).
pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

/// Log a message at TRACE level.
pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! shlog {
    ($($arg:tt)*) => {
        $crate::log::info(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! shlog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! shlog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level.
#[macro_export]
macro_rules! shlog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Log macro for TRACE level.
#[macro_export]
macro_rules! shlog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
