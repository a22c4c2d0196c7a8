//! Corral Registry - Durable agent facts
//!
//! The registry persists the identity of every admitted agent so a newly
//! elected coordinator can recover the fleet after failover. Production
//! deployments back it with a replicated store; this crate provides the trait
//! and an in-memory implementation suitable for development and testing.
//!
//! Every operation answers `Ok(bool)` for a definite outcome and `Err` only
//! when the store itself could not be reached. The coordinator treats `Err`
//! as fatal to its leadership.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod memory;
pub mod registry;

// Re-exports
pub use error::{RegistryError, Result};
pub use memory::InMemoryRegistry;
pub use registry::Registry;
