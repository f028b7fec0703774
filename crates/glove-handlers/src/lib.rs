//! Ready-made handlers for the proxy's middleware chain.

mod limiter;
mod nop;

pub use limiter::RateLimitHandler;
pub use nop::NopHandler;
