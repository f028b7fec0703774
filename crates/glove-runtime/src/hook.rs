use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;

/// A resource the shutdown hook tears down. Implementations must tolerate
/// being called once; the hook never calls a closer twice.
pub trait Closer: Send + Sync {
    fn close(&self) -> BoxFuture<'static, io::Result<()>>;
}

/// Calls every registered closer in response to SIGINT, SIGTERM or
/// cancellation of the supplied channel, then resolves the one-shot returned
/// by [`Hook::start`].
pub struct Hook {
    closers: Mutex<HashMap<String, Arc<dyn Closer>>>,
}

impl Hook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closers: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, resource: impl Into<String>, closer: Arc<dyn Closer>) {
        let mut closers = self.closers.lock().expect("closer registry poisoned");
        closers.insert(resource.into(), closer);
    }

    pub fn start(self: &Arc<Self>, mut cancel: watch::Receiver<bool>) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let hook = Arc::clone(self);

        tokio::spawn(async move {
            wait_for_trigger(&mut cancel).await;
            hook.close_all().await;
            let _ = done_tx.send(());
        });

        done_rx
    }

    async fn close_all(&self) {
        tracing::info!(state = "started", "shutdown");

        let closers: Vec<(String, Arc<dyn Closer>)> = {
            let mut registry = self.closers.lock().expect("closer registry poisoned");
            registry.drain().collect()
        };

        let mut tasks = JoinSet::new();
        for (resource, closer) in closers {
            tasks.spawn(async move { (resource, closer.close().await) });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok((_, Ok(()))) => {}
                Ok((resource, Err(error))) => {
                    tracing::error!(%resource, %error, "close");
                }
                Err(join_error) => {
                    tracing::error!(error = %join_error, "close-task");
                }
            }
        }

        tracing::info!(state = "completed", "shutdown");
    }
}

async fn wait_for_trigger(cancel: &mut watch::Receiver<bool>) {
    if *cancel.borrow() {
        return;
    }

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(error) => {
                tracing::error!(%error, "install-sigterm");
                let _ = cancel.changed().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(name = "SIGINT", "signal");
            }
            _ = sigterm.recv() => {
                tracing::info!(name = "SIGTERM", "signal");
            }
            _ = cancel.changed() => {
                tracing::info!(state = "expired-or-cancelled", "context");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(name = "interrupt", "signal");
            }
            _ = cancel.changed() => {
                tracing::info!(state = "expired-or-cancelled", "context");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Closer, Hook};
    use futures::future::BoxFuture;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    struct CountingCloser {
        calls: Arc<AtomicUsize>,
    }

    impl Closer for CountingCloser {
        fn close(&self) -> BoxFuture<'static, io::Result<()>> {
            let calls = Arc::clone(&self.calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    struct FailingCloser;

    impl Closer for FailingCloser {
        fn close(&self) -> BoxFuture<'static, io::Result<()>> {
            Box::pin(async { Err(io::Error::other("already closed")) })
        }
    }

    #[tokio::test]
    async fn cancellation_closes_every_registered_resource() {
        let hook = Hook::new();
        let calls = Arc::new(AtomicUsize::new(0));
        hook.register(
            "first",
            Arc::new(CountingCloser {
                calls: Arc::clone(&calls),
            }),
        );
        hook.register(
            "second",
            Arc::new(CountingCloser {
                calls: Arc::clone(&calls),
            }),
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let done = hook.start(cancel_rx);

        cancel_tx.send(true).expect("send cancellation");
        tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .expect("hook must complete")
            .expect("done channel must resolve");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closer_errors_do_not_block_completion() {
        let hook = Hook::new();
        let calls = Arc::new(AtomicUsize::new(0));
        hook.register("failing", Arc::new(FailingCloser));
        hook.register(
            "counting",
            Arc::new(CountingCloser {
                calls: Arc::clone(&calls),
            }),
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let done = hook.start(cancel_rx);

        cancel_tx.send(true).expect("send cancellation");
        tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .expect("hook must complete")
            .expect("done channel must resolve");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_channel_triggers_immediately() {
        let hook = Hook::new();
        let (_cancel_tx, cancel_rx) = watch::channel(true);

        let done = hook.start(cancel_rx);
        tokio::time::timeout(Duration::from_secs(5), done)
            .await
            .expect("hook must complete")
            .expect("done channel must resolve");
    }
}
