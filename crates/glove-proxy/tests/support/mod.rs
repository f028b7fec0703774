#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use glove_ca::{CertificateAuthority, KeySource};
use glove_proxy::{
    read_request, read_response, BufferedConn, ClientConfigFn, Context, Engine, Handler,
    Response, ServerConfigFn, WireLimits,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub fn test_ca() -> CertificateAuthority {
    CertificateAuthority::generate(KeySource::EcdsaP256, None).expect("generate test CA")
}

/// HTTP echo origin: responds 200 with the request body; honors
/// `Connection: close`; answers WebSocket upgrades with 101 followed by a raw
/// byte echo.
pub async fn spawn_http_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
    let addr = listener.local_addr().expect("echo addr");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(echo_loop(stream));
        }
    });

    addr
}

/// TLS echo origin presenting a leaf minted by `ca` for 127.0.0.1.
pub async fn spawn_tls_echo(ca: &CertificateAuthority) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind tls echo");
    let addr = listener.local_addr().expect("tls echo addr");
    let acceptor = TlsAcceptor::from(
        ca.server_config_for("127.0.0.1")
            .expect("mint origin certificate"),
    );

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(tls_stream) = acceptor.accept(stream).await {
                    echo_loop(tls_stream).await;
                }
            });
        }
    });

    addr
}

/// Origin that answers TLS client hellos with a plain HTTP error and serves
/// the HTTP echo otherwise. Reproduces an HTTP-only server sitting on a port
/// the proxy expected to speak TLS.
pub async fn spawn_tls_intolerant_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
    let addr = listener.local_addr().expect("echo addr");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut first = [0_u8; 1];
                let Ok(peeked) = stream.peek(&mut first).await else {
                    return;
                };
                // 0x16 opens a TLS handshake record
                if peeked == 1 && first[0] == 0x16 {
                    let mut stream = stream;
                    let _ = stream
                        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                        .await;
                    return;
                }
                echo_loop(stream).await;
            });
        }
    });

    addr
}

async fn echo_loop<S: AsyncRead + AsyncWrite + Unpin>(stream: S) {
    let mut conn = BufferedConn::new(stream);

    loop {
        let request = match read_request(&mut conn, &WireLimits::default()).await {
            Ok(Some(request)) => request,
            _ => return,
        };

        if request.is_websocket_upgrade() {
            let accepted = conn
                .stream
                .write_all(
                    b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
                )
                .await;
            if accepted.is_err() {
                return;
            }

            let leftover = conn.take_buffered();
            if !leftover.is_empty() && conn.stream.write_all(&leftover).await.is_err() {
                return;
            }

            let mut buffer = [0_u8; 1024];
            loop {
                let read = match conn.stream.read(&mut buffer).await {
                    Ok(0) | Err(_) => return,
                    Ok(read) => read,
                };
                if conn.stream.write_all(&buffer[..read]).await.is_err() {
                    return;
                }
            }
        }

        let close = request.close;
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n",
            request.body.len(),
            if close { "Connection: close\r\n" } else { "" },
        );
        if conn.stream.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        if conn.stream.write_all(&request.body).await.is_err() {
            return;
        }
        if conn.stream.flush().await.is_err() {
            return;
        }
        if close {
            let _ = conn.stream.shutdown().await;
            return;
        }
    }
}

/// Serves `engine` on an ephemeral port, one task per accepted connection.
pub async fn spawn_proxy(engine: Engine) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let addr = listener.local_addr().expect("proxy addr");
    let engine = Arc::new(engine);

    tokio::spawn(async move {
        loop {
            let Ok((stream, peer_addr)) = listener.accept().await else {
                return;
            };
            tokio::spawn(Arc::clone(&engine).serve_connection(stream, peer_addr));
        }
    });

    addr
}

/// rustls client configuration trusting exactly the given CA.
pub fn tls_config_trusting(ca: &CertificateAuthority) -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots
        .add(ca.cert_der().clone())
        .expect("add CA to trust store");
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Rule-level origin TLS override: verify the origin against `ca` instead of
/// the WebPKI roots.
pub fn server_config_trusting(ca: &CertificateAuthority) -> ServerConfigFn {
    let config = tls_config_trusting(ca);
    Arc::new(move |_host: &str| Ok(Arc::clone(&config)))
}

/// Client-side factory minting leaves from `authority`, the shape the engine
/// uses for its own default CA.
pub fn client_config_minting(authority: Arc<CertificateAuthority>) -> ClientConfigFn {
    Arc::new(move |host: &str| Ok(authority.server_config_for(host)?))
}

pub async fn connect_proxy(proxy_addr: SocketAddr) -> BufferedConn<TcpStream> {
    let stream = TcpStream::connect(proxy_addr)
        .await
        .expect("connect to proxy");
    BufferedConn::new(stream)
}

/// Sends raw request bytes and reads one full response.
pub async fn roundtrip<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut BufferedConn<S>,
    raw: &str,
    method: &str,
) -> Response {
    conn.stream
        .write_all(raw.as_bytes())
        .await
        .expect("write request");
    read_response(conn, method, &WireLimits::default())
        .await
        .expect("read response")
}

/// Issues a CONNECT and asserts on the status of the head-only reply.
pub async fn connect_through<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut BufferedConn<S>,
    authority: &str,
) -> String {
    let request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
    conn.stream
        .write_all(request.as_bytes())
        .await
        .expect("write CONNECT");

    let head = conn
        .read_until_pattern(b"\r\n\r\n", 64 * 1024)
        .await
        .expect("read CONNECT response")
        .expect("proxy closed before the CONNECT response");
    String::from_utf8(head).expect("CONNECT response is not UTF-8")
}

/// Completes the client side of a TLS handshake over an established tunnel.
pub async fn tls_handshake_through<S: AsyncRead + AsyncWrite + Unpin>(
    conn: BufferedConn<S>,
    config: Arc<rustls::ClientConfig>,
    host: &str,
) -> BufferedConn<tokio_rustls::client::TlsStream<S>> {
    assert!(
        conn.read_buf.is_empty(),
        "unexpected bytes buffered before the TLS handshake"
    );

    let connector = TlsConnector::from(config);
    let server_name =
        rustls_pki_types::ServerName::try_from(host.to_string()).expect("server name");
    let stream = connector
        .connect(server_name, conn.stream)
        .await
        .expect("TLS handshake through the tunnel");
    BufferedConn::new(stream)
}

/// Chain probe: counts invocations and forwards.
pub struct RecordingHandler {
    pub calls: Arc<AtomicUsize>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }
}

impl Handler for RecordingHandler {
    fn handle<'a>(&'a self, context: &'a mut Context<'_>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            context.next().await;
        })
    }
}

/// Chain probe: always panics.
pub struct PanicHandler;

impl Handler for PanicHandler {
    fn handle<'a>(&'a self, _context: &'a mut Context<'_>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            panic!("handler exploded");
        })
    }
}
