use std::sync::Arc;

use crate::action::Action;
use crate::engine::TlsConfigError;
use crate::handler::Handler;

/// Produces the TLS server configuration presented to the *client* of a
/// MITM'd connection, typically by minting a leaf certificate for the host.
pub type ClientConfigFn =
    Arc<dyn Fn(&str) -> Result<Arc<rustls::ServerConfig>, TlsConfigError> + Send + Sync>;

/// Produces the TLS client configuration used to dial the *origin*, carrying
/// the roots the origin certificate is verified against.
pub type ServerConfigFn =
    Arc<dyn Fn(&str) -> Result<Arc<rustls::ClientConfig>, TlsConfigError> + Send + Sync>;

/// Per-host policy: the action, optional TLS configuration overrides and the
/// ordered handler chain. Immutable after construction and shared across
/// sessions as `Arc<Rule>`.
pub struct Rule {
    pub action: Action,
    pub client_config: Option<ClientConfigFn>,
    pub server_config: Option<ServerConfigFn>,
    pub handlers: Vec<Arc<dyn Handler>>,
}

impl Rule {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            client_config: None,
            server_config: None,
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_client_config(mut self, config: ClientConfigFn) -> Self {
        self.client_config = Some(config);
        self
    }

    pub fn with_server_config(mut self, config: ServerConfigFn) -> Self {
        self.server_config = Some(config);
        self
    }
}

impl Default for Rule {
    fn default() -> Self {
        Self::new(Action::Tunnel)
    }
}
