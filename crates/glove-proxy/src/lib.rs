//! Intercepting HTTP/HTTPS forward proxy engine.
//!
//! The [`Engine`] is the front door: it takes ownership of an accepted
//! connection, parses the initial request and drives a [`Session`] request by
//! request until the connection closes. Per-host [`Rule`]s decide whether a
//! destination is blocked, tunnelled verbatim, or intercepted by terminating
//! TLS on both sides; in the interception case every request flows through
//! the rule's ordered [`Handler`] chain before it is forwarded.

mod action;
mod buffered;
mod client_ip;
mod dialer;
mod engine;
mod handler;
mod message;
mod rule;
mod server;
mod session;
mod streams;

pub use action::{Action, ActionParseError};
pub use buffered::BufferedConn;
pub use client_ip::{client_ip, remote_ip};
pub use dialer::{DialError, Dialer};
pub use engine::{Engine, EngineBuilder, EngineError, TlsConfigError, WireLimits};
pub use handler::{Context, Handler};
pub use message::{
    read_request, read_response, remove_proxy_headers, BodyMode, Header, HttpVersion, Request,
    Response, Scheme,
};
pub use rule::{ClientConfigFn, Rule, ServerConfigFn};
pub use server::{Accept, ProxyServer, ServerHandle};
pub use session::Session;
