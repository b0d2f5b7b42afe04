//! qtools Core - Broker and client logic
//!
//! This crate contains the handlers the tools run on a reactor:
//! - `Broker`: queues and forwards messages between peers
//! - `SendPump`, `ReceivePump`, `RequestPump`, `RespondPump`: client modes
//! - `ConnectProbe`: connection check
//! - the I/O bridge threads and the logging `Context`

pub mod bridge;
pub mod broker;
pub mod connect;
pub mod context;
pub mod correlation;
pub mod pump;

// Re-exports
pub use bridge::{InputReader, Line, LineQueue, OutputWriter, ReadyLatch, INPUT_EVENT};
pub use broker::Broker;
pub use connect::ConnectProbe;
pub use context::{Context, Verbosity};
pub use correlation::PendingRequests;
pub use pump::{
    run_pump, Processor, Pump, PumpCore, ReceivePump, RequestPump, RespondPump, SendPump,
    TextTransform,
};
