//! Delivery outlet trait definition
//!
//! Queues never talk to the transport directly. They see consumer links
//! through this interface, which the broker implements on top of its
//! reactor and tests implement with plain counters.

use qtools_types::{LinkId, Message, Result};

/// Where a queue sends messages - all consumers are reached through this
pub trait Outlet {
    /// Credit the peer has granted on `link`; 0 for unknown links
    fn credit(&self, link: LinkId) -> u32;

    /// Send `message` on `link`, consuming one unit of credit
    fn deliver(&mut self, link: LinkId, message: Message) -> Result<()>;
}
