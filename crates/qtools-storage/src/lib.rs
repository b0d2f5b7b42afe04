//! qtools Storage - Queue storage for the test broker
//!
//! This crate provides the broker's in-memory queues:
//! - `AddressRegistry`: address to queue map, with lazy creation
//! - `Queue`: FIFO buffer plus consumers, with credit-driven forwarding
//! - `Outlet`: the interface queues deliver through
//!
//! Nothing is persisted. All data is lost when the process exits.

pub mod queue;
pub mod registry;
pub mod traits;

// Re-exports
pub use queue::Queue;
pub use registry::AddressRegistry;
pub use traits::Outlet;
