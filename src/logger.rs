//! Tag-based structured logging for the pipeline
//!
//! Provides a small, ergonomic logging API:
//! - Standard log levels (Error/Warning/Info/Debug)
//! - Per-component tags for filtering and readable output
//! - Colored console output with timestamps
//!
//! The minimum level is read once from `CANDLEFEED_LOG` (error/warn/info/
//! debug); default is Info. Messages are mirrored to the `log` facade so
//! host applications with their own subscriber still see them.

use chrono::Local;
use colored::*;
use once_cell::sync::Lazy;

/// Component tags for log attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Limiter,
    Breaker,
    Cache,
    Aggregator,
    Fetch,
    Config,
}

impl LogTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Limiter => "LIMITER",
            LogTag::Breaker => "BREAKER",
            LogTag::Cache => "CACHE",
            LogTag::Aggregator => "AGGREGATE",
            LogTag::Fetch => "FETCH",
            LogTag::Config => "CONFIG",
        }
    }

    fn colored(&self) -> ColoredString {
        match self {
            LogTag::Limiter => self.as_str().yellow(),
            LogTag::Breaker => self.as_str().red(),
            LogTag::Cache => self.as_str().cyan(),
            LogTag::Aggregator => self.as_str().green(),
            LogTag::Fetch => self.as_str().blue(),
            LogTag::Config => self.as_str().magenta(),
        }
    }
}

/// Log levels ordered by severity (Error < Warning < Info < Debug)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Some(LogLevel::Error),
            "WARN" | "WARNING" => Some(LogLevel::Warning),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" | "VERBOSE" | "TRACE" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

static MIN_LEVEL: Lazy<LogLevel> = Lazy::new(|| {
    std::env::var("CANDLEFEED_LOG")
        .ok()
        .and_then(|v| LogLevel::parse(&v))
        .unwrap_or(LogLevel::Info)
});

fn should_log(level: LogLevel) -> bool {
    // Errors always log
    level == LogLevel::Error || level <= *MIN_LEVEL
}

fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(level) {
        return;
    }

    let time = Local::now().format("%H:%M:%S").to_string();
    let level_str = match level {
        LogLevel::Error => level.as_str().red().bold(),
        LogLevel::Warning => level.as_str().yellow(),
        LogLevel::Info => level.as_str().normal(),
        LogLevel::Debug => level.as_str().dimmed(),
    };

    println!(
        "{} [{:>9}] [{:>5}] {}",
        time.dimmed(),
        tag.colored(),
        level_str,
        message
    );

    // Mirror to the log facade for embedding applications
    match level {
        LogLevel::Error => log::error!(target: tag.as_str(), "{}", message),
        LogLevel::Warning => log::warn!(target: tag.as_str(), "{}", message),
        LogLevel::Info => log::info!(target: tag.as_str(), "{}", message),
        LogLevel::Debug => log::debug!(target: tag.as_str(), "{}", message),
    }
}

/// Log at ERROR level (always shown, critical issues)
pub fn error(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (important issues)
pub fn warning(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (detailed diagnostics)
pub fn debug(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Debug, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
    }

    #[test]
    fn level_parsing() {
        assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("nope"), None);
    }
}
