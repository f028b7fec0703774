use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{client, TlsConnector};

#[derive(Debug, Error)]
pub enum DialError {
    #[error("dial timed out after {0:?}")]
    Timeout(Duration),
    #[error("TLS handshake with the origin failed: {0}")]
    Tls(rustls::Error),
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DialError {
    /// `true` when the origin answered the TLS handshake with something that
    /// is not TLS, the one recoverable dial failure.
    pub fn is_tls_record_mismatch(&self) -> bool {
        matches!(self, DialError::Tls(rustls::Error::InvalidMessage(_)))
    }

    pub fn certificate_error(&self) -> Option<&rustls::CertificateError> {
        match self {
            DialError::Tls(rustls::Error::InvalidCertificate(reason)) => Some(reason),
            _ => None,
        }
    }
}

/// Network dialer with uniform deadlines for connection setup and per-message
/// I/O inside a session.
#[derive(Debug, Clone)]
pub struct Dialer {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for Dialer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
        }
    }
}

impl Dialer {
    pub async fn dial_tcp(&self, host_port: &str) -> Result<TcpStream, DialError> {
        match timeout(self.connect_timeout, TcpStream::connect(host_port)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(error)) => Err(DialError::Io(error)),
            Err(_) => Err(DialError::Timeout(self.connect_timeout)),
        }
    }

    /// Dials TCP and completes a TLS handshake, verifying the origin
    /// certificate against the roots configured in `config`.
    pub async fn dial_tls(
        &self,
        host_port: &str,
        server_host: &str,
        config: Arc<rustls::ClientConfig>,
    ) -> Result<client::TlsStream<TcpStream>, DialError> {
        let stream = self.dial_tcp(host_port).await?;

        let server_name = ServerName::try_from(server_host.to_string())
            .map_err(|_| DialError::InvalidServerName(server_host.to_string()))?;
        let connector = TlsConnector::from(config);

        match timeout(self.connect_timeout, connector.connect(server_name, stream)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(error)) => Err(classify_tls_error(error)),
            Err(_) => Err(DialError::Timeout(self.connect_timeout)),
        }
    }
}

// tokio-rustls surfaces handshake failures as io::Error with the rustls error
// attached; pull it out so callers can match on the TLS failure kind.
fn classify_tls_error(error: io::Error) -> DialError {
    if let Some(tls_error) = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        return DialError::Tls(tls_error.clone());
    }
    DialError::Io(error)
}
