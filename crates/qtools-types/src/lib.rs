//! qtools Types - Core domain types for the messaging tools
//!
//! This crate contains all shared types used across qtools components.

pub mod address;
pub mod config;
pub mod error;
pub mod link;
pub mod message;

// Re-export commonly used types
pub use address::{Endpoint, Scheme, Server};
pub use config::{BrokerConfig, ClientConfig, ConnectConfig, TransformConfig};
pub use error::{Error, Result};
pub use link::{ConnectionId, DeliveryId, LinkId, Outcome, Role, Terminus, TerminusKind};
pub use message::{unique_id, Message, MessageId, DEFAULT_PRIORITY};
