//! Corral Allocator - Offer content policy
//!
//! The allocator decides which framework receives which slice of an agent's
//! free resources. The coordinator keeps it informed (agents and frameworks
//! coming and going, resources being recovered) and asks it for allocations
//! once per allocation cycle.
//!
//! Allocator methods never block: they are plain in-memory bookkeeping and
//! are called from inside the coordinator's event processing.
//!
//! [`SimpleAllocator`] is a first-fit reference policy. It honours refusal
//! filters, revives, agent activation and the hostname whitelist, and makes
//! no attempt at fairness.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod allocator;
pub mod simple;

// Re-exports
pub use allocator::{Allocation, Allocator};
pub use simple::SimpleAllocator;
