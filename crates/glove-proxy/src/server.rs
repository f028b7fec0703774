use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use glove_runtime::Closer;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::engine::Engine;

const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Anything the proxy server can accept connections from: the raw TCP
/// listener or the allow-list wrapper.
pub trait Accept: Send + Sync {
    fn accept(
        &self,
    ) -> impl std::future::Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

impl Accept for glove_acl::AclListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        glove_acl::AclListener::accept(self).await
    }
}

/// Accept loop servicing each connection on its own task, with a graceful
/// shutdown path: once the handle fires, the listener stops accepting and
/// in-flight sessions get a bounded drain window before they are aborted.
pub struct ProxyServer {
    engine: Arc<Engine>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            engine,
            shutdown_tx,
            shutdown_rx,
            done_tx,
            done_rx,
        }
    }

    /// Handle suitable for registration with the shutdown hook.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown_tx.clone(),
            done: self.done_rx.clone(),
        }
    }

    pub async fn run<L: Accept>(self, listener: L) -> io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut sessions = JoinSet::new();
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let engine = Arc::clone(&self.engine);
                            let span = tracing::info_span!("session", client_addr = %peer_addr);
                            sessions.spawn(
                                engine.serve_connection(stream, peer_addr).instrument(span),
                            );
                        }
                        Err(error) => {
                            outcome = Err(error);
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    break;
                }
            }

            // reap without blocking the accept loop
            while sessions.try_join_next().is_some() {}
        }

        drop(listener);
        drain(sessions).await;
        let _ = self.done_tx.send(true);
        outcome
    }
}

async fn drain(mut sessions: JoinSet<()>) {
    let drained = tokio::time::timeout(DRAIN_DEADLINE, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::info!(deadline = ?DRAIN_DEADLINE, "drain-deadline-exceeded");
        sessions.shutdown().await;
    }
}

/// Stops the accept loop and waits for the drain to finish.
pub struct ServerHandle {
    shutdown: watch::Sender<bool>,
    done: watch::Receiver<bool>,
}

impl Closer for ServerHandle {
    fn close(&self) -> BoxFuture<'static, io::Result<()>> {
        let shutdown = self.shutdown.clone();
        let mut done = self.done.clone();
        Box::pin(async move {
            let _ = shutdown.send(true);
            if !*done.borrow() {
                // an error means the server task is gone, which counts as done
                let _ = done.changed().await;
            }
            Ok(())
        })
    }
}
