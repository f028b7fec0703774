//! Process-level plumbing shared by the proxy binary: the shutdown hook,
//! container detection, version metadata and logging setup.

mod container;
mod hook;
mod logging;
mod version;

pub use container::is_container;
pub use hook::{Closer, Hook};
pub use logging::{setup_global, LoggingError, Mode};
pub use version::{BuildInfo, Version, VersionError};
