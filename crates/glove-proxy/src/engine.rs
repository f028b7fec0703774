use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use glove_ca::{CertificateAuthority, KeySource};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::buffered::{is_head_too_large, BufferedConn};
use crate::dialer::Dialer;
use crate::message::{self, split_host_port, Request};
use crate::rule::{ClientConfigFn, Rule, ServerConfigFn};
use crate::session::{is_benign_disconnect, Session};
use crate::streams::ClientStream;

#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error(transparent)]
    Ca(#[from] glove_ca::CaError),
    #[error("TLS configuration failed: {0}")]
    Build(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create the default certificate authority: {0}")]
    DefaultCa(#[from] glove_ca::CaError),
}

/// Bounds on buffered HTTP messages.
#[derive(Debug, Clone, Copy)]
pub struct WireLimits {
    pub max_head_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

/// The proxy front door.
///
/// Owns the per-host rule map, the dialer and the TLS configuration
/// factories; takes accepted connections and drives one [`Session`] per
/// connection until it closes.
pub struct Engine {
    pub(crate) dialer: Dialer,
    pub(crate) limits: WireLimits,
    pub(crate) client_config: ClientConfigFn,
    pub(crate) server_config: ServerConfigFn,
    default_rule: Arc<Rule>,
    rule_by_host: HashMap<String, Arc<Rule>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine with all defaults: tunnel every host, self-signed in-memory
    /// CA, WebPKI roots for origin verification.
    pub fn with_defaults() -> Result<Engine, EngineError> {
        Self::builder().build()
    }

    pub(crate) fn rule_for(&self, host: &str) -> Arc<Rule> {
        self.rule_by_host
            .get(host)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_rule))
    }

    /// Services one accepted connection: reads the initial request, binds a
    /// session and loops request by request until the session closes.
    pub async fn serve_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let mut conn = BufferedConn::new(ClientStream::plain(stream));

        let mut first = match self.read_initial_request(&mut conn).await {
            InitialRead::Request(request) => request,
            InitialRead::Closed => return,
            InitialRead::Malformed(status) => {
                let _ = message::write_status_line(&mut conn.stream, status).await;
                let _ = conn.stream.shutdown().await;
                return;
            }
        };

        let Some((server_host, _)) = split_host_port(&first.host) else {
            tracing::info!(host = %first.host, "parse-host");
            let _ = message::write_status_line(&mut conn.stream, 400).await;
            let _ = conn.stream.shutdown().await;
            return;
        };

        let mut session = Session::new(conn, &mut first, server_host, Arc::clone(&self), peer_addr);

        session.set_close_from(&first);
        session.handle(first).await;

        while !session.close {
            match session.read_request().await {
                Ok(Some(request)) => {
                    session.set_close_from(&request);
                    session.handle(request).await;
                }
                Ok(None) => break,
                Err(error) => {
                    if !is_benign_disconnect(&error) {
                        tracing::info!(%error, "read");
                        let status = if is_head_too_large(&error) { 431 } else { 400 };
                        session.write_status(status).await;
                    }
                    break;
                }
            }
        }

        session.shutdown().await;
    }

    async fn read_initial_request(&self, conn: &mut BufferedConn<ClientStream>) -> InitialRead {
        match timeout(
            self.dialer.read_timeout,
            message::read_request(conn, &self.limits),
        )
        .await
        {
            Ok(Ok(Some(request))) => InitialRead::Request(request),
            Ok(Ok(None)) => InitialRead::Closed,
            Ok(Err(error)) => {
                if is_benign_disconnect(&error) {
                    return InitialRead::Closed;
                }
                tracing::info!(%error, "read");
                InitialRead::Malformed(if is_head_too_large(&error) { 431 } else { 400 })
            }
            Err(_) => InitialRead::Closed,
        }
    }
}

enum InitialRead {
    Request(Request),
    Closed,
    Malformed(u16),
}

/// Options bag for [`Engine`] construction. Everything has a default: 30 s
/// dial and I/O deadlines, tunnel as the default action, a fresh self-signed
/// CA for the client side and WebPKI roots for the origin side.
pub struct EngineBuilder {
    dialer: Dialer,
    limits: WireLimits,
    client_config: Option<ClientConfigFn>,
    server_config: Option<ServerConfigFn>,
    default_rule: Option<Arc<Rule>>,
    rule_by_host: HashMap<String, Arc<Rule>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            dialer: Dialer::default(),
            limits: WireLimits::default(),
            client_config: None,
            server_config: None,
            default_rule: None,
            rule_by_host: HashMap::new(),
        }
    }
}

impl EngineBuilder {
    pub fn with_dialer(mut self, dialer: Dialer) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_limits(mut self, limits: WireLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Binds a rule to one or more hosts (host names only, no ports).
    pub fn with_rule(mut self, rule: Arc<Rule>, hosts: &[&str]) -> Self {
        for host in hosts {
            self.rule_by_host
                .insert((*host).to_string(), Arc::clone(&rule));
        }
        self
    }

    pub fn with_default_rule(mut self, rule: Arc<Rule>) -> Self {
        self.default_rule = Some(rule);
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

    pub fn build(self) -> Result<Engine, EngineError> {
        let client_config = match self.client_config {
            Some(config) => config,
            None => default_client_config()?,
        };
        let server_config = self.server_config.unwrap_or_else(default_server_config);
        let default_rule = self
            .default_rule
            .unwrap_or_else(|| Arc::new(Rule::default()));

        Ok(Engine {
            dialer: self.dialer,
            limits: self.limits,
            client_config,
            server_config,
            default_rule,
            rule_by_host: self.rule_by_host,
        })
    }
}

// The default client-side factory mints leaves from a root generated in
// memory at engine construction. The root is never persisted or exposed;
// clients that were not handed it out of band will report an unknown
// authority.
fn default_client_config() -> Result<ClientConfigFn, EngineError> {
    let authority = Arc::new(CertificateAuthority::generate(KeySource::EcdsaP256, None)?);
    Ok(Arc::new(move |host: &str| {
        Ok(authority.server_config_for(host)?)
    }))
}

fn default_server_config() -> ServerConfigFn {
    let roots =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    );
    Arc::new(move |_host: &str| Ok(Arc::clone(&config)))
}
