use std::str::FromStr;

use thiserror::Error;
use tracing::Level;

use crate::is_container;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoggingError {
    #[error("unknown logging mode: {0}")]
    UnknownMode(String),
    #[error("failed to install the global subscriber: {0}")]
    Subscriber(String),
}

/// Output format of the global logger. `Auto` picks the structured format
/// inside containers and the human-readable console format elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Auto,
    Console,
    Struct,
}

impl FromStr for Mode {
    type Err = LoggingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(Mode::Auto),
            "console" => Ok(Mode::Console),
            "struct" => Ok(Mode::Struct),
            _ => Err(LoggingError::UnknownMode(value.to_string())),
        }
    }
}

impl Mode {
    fn resolve(self) -> Mode {
        if self != Mode::Auto {
            return self;
        }
        if is_container().unwrap_or(false) {
            Mode::Struct
        } else {
            Mode::Console
        }
    }
}

/// Installs the global `tracing` subscriber.
pub fn setup_global(mode: Mode, level: Level) -> Result<(), LoggingError> {
    let result = match mode.resolve() {
        Mode::Struct => tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .with_target(false)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .try_init(),
    };

    result.map_err(|error| LoggingError::Subscriber(error.to_string()))
}
