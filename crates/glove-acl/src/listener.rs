use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::Whitelist;

/// TCP listener wrapper that only yields connections from allow-listed
/// addresses.
pub struct AclListener {
    listener: TcpListener,
    whitelist: Whitelist,
}

impl AclListener {
    pub fn new(listener: TcpListener, whitelist: Whitelist) -> Self {
        Self {
            listener,
            whitelist,
        }
    }

    /// Accepts the next allowed connection. Connections from addresses
    /// outside the allow-list are closed and accepting resumes; listener
    /// errors are surfaced and terminate the accept loop.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;

            if self.whitelist.allowed(peer_addr.ip()) {
                return Ok((stream, peer_addr));
            }

            // dropping the stream closes it; returning an error here would
            // shut the whole server down
            tracing::info!(remote_addr = %peer_addr.ip(), "block-ip");
            drop(stream);
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
