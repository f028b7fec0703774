use futures::future::BoxFuture;
use glove_proxy::{Context, Handler};

/// Forwards every request untouched. Useful as a chain placeholder and in
/// tests.
pub struct NopHandler;

impl Handler for NopHandler {
    fn handle<'a>(&'a self, context: &'a mut Context<'_>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            context.next().await;
        })
    }
}
