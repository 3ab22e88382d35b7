//! kbgate runtime server
//!
//! Configuration loading and application bootstrap for the `kbgate-server`
//! binary. The integration tests build the same application through
//! [`bootstrap::build_app`].

pub mod bootstrap;
pub mod config;

pub use bootstrap::build_app;
pub use config::{ConfigError, LogFormat, ServerConfig};
