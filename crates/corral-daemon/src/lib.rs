//! Corral daemon library
//!
//! The pieces `corrald` is assembled from:
//! - layered configuration
//! - the inspection REST API
//! - the hostname whitelist watcher
//! - server lifecycle (startup recovery, graceful shutdown)

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod whitelist;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use server::Server;
pub use whitelist::WhitelistWatcher;
