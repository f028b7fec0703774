use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::message::{Request, Response};
use crate::session::Session;

/// A middleware step in a rule's chain.
///
/// A handler may set [`Context::response`], call [`Context::next`] to pass
/// control downstream, or both; mutating the response after `next()` returns
/// is allowed. A handler that neither responds nor forwards leaves the
/// response empty, and the session answers with a 500.
pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, context: &'a mut Context<'_>) -> BoxFuture<'a, ()>;
}

/// Per-request view handed to the handler chain. Constructed fresh for every
/// request of a session and dropped once the response is written.
pub struct Context<'s> {
    pub request: Request,
    pub response: Option<Response>,
    session: &'s mut Session,
}

impl<'s> Context<'s> {
    pub(crate) fn new(request: Request, session: &'s mut Session) -> Self {
        Self {
            request,
            response: None,
            session,
        }
    }

    pub(crate) fn into_parts(self) -> (Request, Option<Response>) {
        (self.request, self.response)
    }

    /// Invokes the next handler in the chain, or the terminal transport
    /// handler once the chain is exhausted. A panicking handler is caught
    /// here: the session is marked for close and a 500 takes the place of
    /// whatever the handler was doing.
    pub async fn next(&mut self) {
        let outcome = AssertUnwindSafe(self.dispatch()).catch_unwind().await;
        if let Err(panic) = outcome {
            tracing::error!(panic = %panic_message(panic.as_ref()), "recovered");
            self.session.close = true;
            self.response = Some(Response::status(500));
        }
    }

    async fn dispatch(&mut self) {
        match self.session.next_handler() {
            Some(handler) => handler.handle(self).await,
            None => {
                let response = self.session.execute(&mut self.request).await;
                self.response = Some(response);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = panic.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic payload".to_string()
}
