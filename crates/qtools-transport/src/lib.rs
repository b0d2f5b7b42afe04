//! qtools Transport - Event-driven messaging connections
//!
//! This crate provides the reactor the tools are built on:
//! - `Container`: owns connections, links and deliveries; runs the event loop
//! - `Handler`: callbacks the reactor raises
//! - `Injector`: wakes the reactor from other threads
//! - `Frame`: the line-oriented wire format

pub mod container;
pub mod event;
pub mod frame;
mod io;
pub mod traits;

// Re-exports
pub use container::{
    ConnectOptions, Connection, Container, EndpointState, Link, ReceiverOptions, SenderOptions,
    DEFAULT_PREFETCH,
};
pub use event::Injector;
pub use frame::Frame;
pub use traits::Handler;
