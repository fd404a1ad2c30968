//! Shared plumbing for EdgeLink services
//!
//! Logging bootstrap, configuration loading and graceful shutdown. Kept
//! deliberately small: everything domain-specific lives in `edge-core` and
//! the services.

pub mod config;
pub mod logging;
pub mod shutdown;

pub use config::load_config;
pub use logging::init_logging;
pub use shutdown::wait_for_shutdown;
