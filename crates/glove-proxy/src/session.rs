use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use crate::action::Action;
use crate::buffered::BufferedConn;
use crate::dialer::DialError;
use crate::engine::{Engine, TlsConfigError};
use crate::handler::{Context, Handler};
use crate::message::{self, remove_proxy_headers, Request, Response, Scheme};
use crate::rule::Rule;
use crate::streams::{ClientStream, ServerStream};

/// Step deferred until after the response bytes reached the wire: either
/// flip to raw byte piping, or terminate TLS on the client socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostRequestAction {
    Tunnel,
    ClientHandshake,
}

/// Per-connection state machine.
///
/// A session owns the client socket for its whole life and the origin socket
/// once the first dial succeeded. The client socket starts as plain TCP and
/// is rebound to a TLS stream in place after a MITM CONNECT; the buffered
/// reader is rebuilt at that point because its buffer belonged to the old
/// stream.
pub struct Session {
    engine: Arc<Engine>,
    rule: Arc<Rule>,

    scheme: Scheme,
    proxy_remote_addr: SocketAddr,
    server_remote_addr: String,
    server_host: String,

    // `None` only transiently during the client-side TLS upgrade and after a
    // failed upgrade, when the session is already marked for close
    client: Option<BufferedConn<ClientStream>>,
    server: Option<BufferedConn<ServerStream>>,
    client_tls_config: Option<Arc<rustls::ServerConfig>>,

    pub(crate) close: bool,
    call_depth: usize,
    post_request_action: Option<PostRequestAction>,
}

impl Session {
    pub(crate) fn new(
        conn: BufferedConn<ClientStream>,
        request: &mut Request,
        server_host: String,
        engine: Arc<Engine>,
        peer_addr: SocketAddr,
    ) -> Self {
        let scheme = if request.is_connect() {
            Scheme::Https
        } else {
            Scheme::Http
        };

        request.scheme = scheme;
        request.remote_addr = Some(peer_addr);

        let rule = engine.rule_for(&server_host);

        Self {
            rule,
            scheme,
            proxy_remote_addr: peer_addr,
            server_remote_addr: request.host.clone(),
            server_host,
            client: Some(conn),
            server: None,
            client_tls_config: None,
            close: false,
            call_depth: 0,
            post_request_action: None,
            engine,
        }
    }

    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Runs one request through the handler chain, writes the response and
    /// executes the deferred post-request action, then rewinds the per-request
    /// state.
    pub(crate) async fn handle(&mut self, request: Request) {
        let mut context = Context::new(request, self);
        context.next().await;
        let (_, response) = context.into_parts();

        let mut response = match response {
            Some(response) => response,
            None => {
                tracing::error!("no-response");
                self.close = true;
                Response::status(500)
            }
        };

        response.set_close(self.close);
        if let Err(error) = self.write_response(&response).await {
            self.close = true;
            if !is_benign_disconnect(&error) {
                tracing::info!(%error, "write");
            }
        }

        if let Some(action) = self.post_request_action.take() {
            let result = match action {
                PostRequestAction::Tunnel => self.tunnel().await,
                PostRequestAction::ClientHandshake => self.client_handshake().await,
            };
            if let Err(error) = result {
                tracing::info!(%error, "post-request");
                self.close = true;
            }
        }

        self.reset();
    }

    /// Parses the next request off the client connection and back-patches
    /// the session's view of the destination onto it. `None` closes the
    /// session silently: clean EOF or an idle deadline.
    pub(crate) async fn read_request(&mut self) -> io::Result<Option<Request>> {
        let read_timeout = self.engine.dialer.read_timeout;
        let limits = self.engine.limits;
        let client = self
            .client
            .as_mut()
            .expect("client connection is always present on a live session");

        let request = match timeout(read_timeout, message::read_request(client, &limits)).await {
            Ok(Ok(request)) => request,
            Ok(Err(error)) => return Err(error),
            Err(_) => return Ok(None),
        };

        Ok(request.map(|mut request| {
            request.remote_addr = Some(self.proxy_remote_addr);
            request.scheme = self.scheme;
            request.host = self.server_remote_addr.clone();
            request
        }))
    }

    pub(crate) fn set_close_from(&mut self, request: &Request) {
        // a CONNECT's continuation is the tunnel itself, its HTTP version
        // says nothing about closing
        if request.is_connect() {
            return;
        }
        self.close = request.close;
    }

    pub(crate) fn next_handler(&mut self) -> Option<Arc<dyn Handler>> {
        if self.call_depth < self.rule.handlers.len() {
            let handler = Arc::clone(&self.rule.handlers[self.call_depth]);
            self.call_depth += 1;
            return Some(handler);
        }
        None
    }

    fn reset(&mut self) {
        self.call_depth = 0;
        self.post_request_action = None;
    }

    pub(crate) async fn write_status(&mut self, status: u16) {
        if let Some(client) = self.client.as_mut() {
            let _ = message::write_status_line(&mut client.stream, status).await;
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        if let Some(client) = self.client.as_mut() {
            let _ = client.stream.shutdown().await;
        }
        if let Some(server) = self.server.as_mut() {
            let _ = server.stream.shutdown().await;
        }
    }

    /// The terminal transport handler: dispatches on method and rule action.
    pub(crate) async fn execute(&mut self, request: &mut Request) -> Response {
        if self.rule.action == Action::Block {
            // blocked hosts never reach the dialer
            self.close = true;
            return Response::status(403);
        }

        if request.is_connect() {
            return self.execute_connect(request).await;
        }
        self.execute_forward(request).await
    }

    async fn execute_connect(&mut self, request: &Request) -> Response {
        if self.rule.action == Action::Tunnel {
            return match self.engine.dialer.dial_tcp(&request.host).await {
                Ok(stream) => {
                    self.server = Some(BufferedConn::new(ServerStream::plain(stream)));
                    self.post_request_action = Some(PostRequestAction::Tunnel);
                    Response::connection_established()
                }
                Err(error) => self.on_dial_error(error),
            };
        }

        // MITM: dial the origin over TLS, stage the client-side handshake
        let server_config = match self.server_config_or_default() {
            Ok(config) => config,
            Err(error) => return self.on_tls_config_error(error),
        };

        let dialed = self
            .engine
            .dialer
            .dial_tls(&request.host, &self.server_host, server_config)
            .await;

        match dialed {
            Ok(stream) => {
                self.server = Some(BufferedConn::new(ServerStream::tls(stream)));
                match self.stage_client_handshake() {
                    Ok(()) => Response::connection_established(),
                    Err(error) => self.on_tls_config_error(error),
                }
            }
            Err(error) if error.is_tls_record_mismatch() => {
                // the origin answered with plain bytes on the expected TLS
                // port; back the tunnel with raw TCP and still terminate TLS
                // on the client side
                tracing::info!(host = %request.host, %error, "tls-not-supported");
                match self.engine.dialer.dial_tcp(&request.host).await {
                    Ok(stream) => {
                        self.server = Some(BufferedConn::new(ServerStream::plain(stream)));
                        match self.stage_client_handshake() {
                            Ok(()) => Response::connection_established(),
                            Err(config_error) => self.on_tls_config_error(config_error),
                        }
                    }
                    Err(dial_error) => self.on_dial_error(dial_error),
                }
            }
            Err(DialError::Tls(rustls::Error::InvalidCertificate(reason))) => {
                self.on_certificate_verification_failure(reason)
            }
            Err(error) => self.on_dial_error(error),
        }
    }

    async fn execute_forward(&mut self, request: &mut Request) -> Response {
        if self.server.is_none() {
            match self.engine.dialer.dial_tcp(&request.host).await {
                Ok(stream) => {
                    self.server = Some(BufferedConn::new(ServerStream::plain(stream)));
                }
                Err(error) => return self.on_dial_error(error),
            }
        }

        remove_proxy_headers(request);
        let wire = request.to_wire();

        let write_timeout = self.engine.dialer.write_timeout;
        let read_timeout = self.engine.dialer.read_timeout;
        let limits = self.engine.limits;

        {
            let server = self
                .server
                .as_mut()
                .expect("server connection was established above");
            let written = with_timeout(write_timeout, async {
                server.stream.write_all(&wire).await?;
                server.stream.flush().await
            })
            .await;
            if let Err(error) = written {
                return self.on_write_error(error);
            }
        }

        let response = {
            let server = self
                .server
                .as_mut()
                .expect("server connection was established above");
            with_timeout(
                read_timeout,
                message::read_response(server, &request.method, &limits),
            )
            .await
        };

        match response {
            Ok(response) => {
                // a close-delimited or connection-closing upstream response
                // leaves nothing to keep alive on either side
                if response.close {
                    self.close = true;
                }
                if request.is_websocket_upgrade() {
                    self.post_request_action = Some(PostRequestAction::Tunnel);
                }
                response
            }
            Err(error) => self.on_read_error(error),
        }
    }

    fn client_config_or_default(&self) -> Result<Arc<rustls::ServerConfig>, TlsConfigError> {
        match &self.rule.client_config {
            Some(factory) => factory(&self.server_host),
            None => (self.engine.client_config)(&self.server_host),
        }
    }

    fn server_config_or_default(&self) -> Result<Arc<rustls::ClientConfig>, TlsConfigError> {
        match &self.rule.server_config {
            Some(factory) => factory(&self.server_host),
            None => (self.engine.server_config)(&self.server_host),
        }
    }

    fn stage_client_handshake(&mut self) -> Result<(), TlsConfigError> {
        let config = self.client_config_or_default()?;
        self.client_tls_config = Some(config);
        self.post_request_action = Some(PostRequestAction::ClientHandshake);
        Ok(())
    }

    async fn write_response(&mut self, response: &Response) -> io::Result<()> {
        let write_timeout = self.engine.dialer.write_timeout;
        let wire = response.to_wire();
        let client = self
            .client
            .as_mut()
            .expect("client connection is always present on a live session");

        with_timeout(write_timeout, async {
            client.stream.write_all(&wire).await?;
            client.stream.flush().await
        })
        .await
    }

    /// Pipes bytes both ways until either side closes, then marks the
    /// session for close. Read-ahead left in either buffer reaches the
    /// opposite peer before the copy starts.
    async fn tunnel(&mut self) -> io::Result<()> {
        let Some(server) = self.server.as_mut() else {
            self.close = true;
            return Ok(());
        };
        let client = self
            .client
            .as_mut()
            .expect("client connection is always present on a live session");

        let client_leftover = client.take_buffered();
        if !client_leftover.is_empty() {
            server.stream.write_all(&client_leftover).await?;
            server.stream.flush().await?;
        }
        let server_leftover = server.take_buffered();
        if !server_leftover.is_empty() {
            client.stream.write_all(&server_leftover).await?;
            client.stream.flush().await?;
        }

        let result = tokio::io::copy_bidirectional(&mut client.stream, &mut server.stream).await;
        self.close = true;
        match result {
            Ok((from_client, from_server)) => {
                tracing::debug!(from_client, from_server, "tunnel-closed");
            }
            Err(error) => {
                if !is_benign_disconnect(&error) {
                    tracing::info!(%error, "copy");
                }
            }
        }
        Ok(())
    }

    /// Performs the staged TLS server handshake on the client socket and
    /// rebinds the session's client connection to the TLS stream. The next
    /// `read_request` reads plaintext HTTP inside the TLS envelope.
    async fn client_handshake(&mut self) -> io::Result<()> {
        let config = self.client_tls_config.take().ok_or_else(|| {
            io::Error::other("client TLS configuration was not staged before the handshake")
        })?;

        let conn = self
            .client
            .take()
            .expect("client connection is always present on a live session");
        if !conn.read_buf.is_empty() {
            self.client = Some(conn);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "client sent plaintext before the TLS handshake",
            ));
        }

        let stream = match conn.stream {
            ClientStream::Plain { stream } => stream,
            tls @ ClientStream::Tls { .. } => {
                self.client = Some(BufferedConn::new(tls));
                return Err(io::Error::other("client connection is already TLS"));
            }
        };

        let acceptor = TlsAcceptor::from(config);
        let handshake_timeout = self.engine.dialer.connect_timeout;
        match timeout(handshake_timeout, acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => {
                self.client = Some(BufferedConn::new(ClientStream::tls(tls_stream)));
                Ok(())
            }
            Ok(Err(error)) => Err(error),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "client TLS handshake timed out",
            )),
        }
    }

    fn on_dial_error(&mut self, error: DialError) -> Response {
        self.close = true;
        tracing::info!(host = %self.server_remote_addr, %error, "dial");
        Response::status(dial_error_status(&error))
    }

    fn on_certificate_verification_failure(
        &mut self,
        reason: rustls::CertificateError,
    ) -> Response {
        self.close = true;
        tracing::error!(host = %self.server_host, ?reason, "certificate-verification");
        Response::status(502)
    }

    fn on_tls_config_error(&mut self, error: TlsConfigError) -> Response {
        self.close = true;
        tracing::error!(host = %self.server_host, %error, "get-tls-config");
        Response::status(500)
    }

    fn on_write_error(&mut self, error: io::Error) -> Response {
        self.close = true;
        tracing::info!(host = %self.server_remote_addr, %error, "write");
        Response::status(502)
    }

    fn on_read_error(&mut self, error: io::Error) -> Response {
        self.close = true;
        tracing::info!(host = %self.server_remote_addr, %error, "read");
        Response::status(502)
    }
}

async fn with_timeout<T>(
    duration: Duration,
    future: impl std::future::Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "operation timed out",
        )),
    }
}

pub(crate) fn is_benign_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

// A dial deadline maps to 504, everything else the origin can throw at us is
// a plain bad gateway.
fn dial_error_status(error: &DialError) -> u16 {
    match error {
        DialError::Timeout(_) => 504,
        _ => 502,
    }
}

#[cfg(test)]
mod tests {
    use super::{dial_error_status, is_benign_disconnect};
    use crate::dialer::DialError;
    use std::io;
    use std::time::Duration;

    #[test]
    fn deadline_exceeded_maps_to_gateway_timeout() {
        let status = dial_error_status(&DialError::Timeout(Duration::from_secs(30)));
        assert_eq!(status, 504);
    }

    #[test]
    fn other_dial_errors_map_to_bad_gateway() {
        let refused = DialError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(dial_error_status(&refused), 502);

        let tls = DialError::Tls(rustls::Error::HandshakeNotComplete);
        assert_eq!(dial_error_status(&tls), 502);
    }

    #[test]
    fn benign_disconnects_are_recognized() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(is_benign_disconnect(&reset));

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(!is_benign_disconnect(&refused));
    }
}
