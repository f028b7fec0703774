use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client, server};

pin_project_lite::pin_project! {
    /// Client-facing socket: plain TCP at first, rebound to a server-side TLS
    /// stream in place after a MITM CONNECT handshake.
    #[project = ClientStreamProj]
    pub enum ClientStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: server::TlsStream<TcpStream> },
    }
}

impl ClientStream {
    pub fn plain(stream: TcpStream) -> Self {
        Self::Plain { stream }
    }

    pub fn tls(stream: server::TlsStream<TcpStream>) -> Self {
        Self::Tls { stream }
    }
}

pin_project_lite::pin_project! {
    /// Origin-facing socket: plain TCP or client-side TLS depending on the
    /// rule and the CONNECT dispatch.
    #[project = ServerStreamProj]
    pub enum ServerStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: client::TlsStream<TcpStream> },
    }
}

impl ServerStream {
    pub fn plain(stream: TcpStream) -> Self {
        Self::Plain { stream }
    }

    pub fn tls(stream: client::TlsStream<TcpStream>) -> Self {
        Self::Tls { stream }
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        context: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_read(context, buf),
            ClientStreamProj::Tls { stream } => stream.poll_read(context, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        context: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_write(context, buf),
            ClientStreamProj::Tls { stream } => stream.poll_write(context, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_flush(context),
            ClientStreamProj::Tls { stream } => stream.poll_flush(context),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_shutdown(context),
            ClientStreamProj::Tls { stream } => stream.poll_shutdown(context),
        }
    }
}

impl AsyncRead for ServerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        context: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ServerStreamProj::Plain { stream } => stream.poll_read(context, buf),
            ServerStreamProj::Tls { stream } => stream.poll_read(context, buf),
        }
    }
}

impl AsyncWrite for ServerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        context: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ServerStreamProj::Plain { stream } => stream.poll_write(context, buf),
            ServerStreamProj::Tls { stream } => stream.poll_write(context, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ServerStreamProj::Plain { stream } => stream.poll_flush(context),
            ServerStreamProj::Tls { stream } => stream.poll_flush(context),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ServerStreamProj::Plain { stream } => stream.poll_shutdown(context),
            ServerStreamProj::Tls { stream } => stream.poll_shutdown(context),
        }
    }
}
