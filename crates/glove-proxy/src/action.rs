use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to parse action {0:?}, supported actions are: block, tunnel or mitm")]
pub struct ActionParseError(pub String);

/// Per-host strategy for handling a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Action {
    /// Forward raw bytes both ways without inspecting the payload.
    #[default]
    Tunnel,
    /// Refuse the connection with `403 Forbidden`.
    Block,
    /// Terminate TLS on both sides and run requests through the handler
    /// chain.
    Mitm,
}

impl FromStr for Action {
    type Err = ActionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Ok(Action::Tunnel);
        }

        match value.to_ascii_lowercase().as_str() {
            "tunnel" => Ok(Action::Tunnel),
            "block" => Ok(Action::Block),
            "mitm" => Ok(Action::Mitm),
            _ => Err(ActionParseError(value.to_string())),
        }
    }
}
