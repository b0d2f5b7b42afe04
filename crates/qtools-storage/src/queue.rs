//! Broker queue
//!
//! A FIFO buffer of messages plus the ordered set of consumer links that
//! drain it. Storing and forwarding are separate steps: a message waits in
//! the buffer until some consumer presents credit.

use std::collections::VecDeque;

use qtools_types::{Error, LinkId, Message, Result};
use tracing::debug;

use crate::traits::Outlet;

/// A queue bound to one address
#[derive(Debug)]
pub struct Queue {
    address: String,
    /// Address was generated by the broker for a dynamic source
    dynamic: bool,
    messages: VecDeque<Message>,
    /// Registration order is delivery order
    consumers: Vec<LinkId>,
    /// Index of the consumer served next by [`Queue::dispatch`]
    cursor: usize,
}

impl Queue {
    pub fn new(address: impl Into<String>, dynamic: bool) -> Self {
        Self {
            address: address.into(),
            dynamic,
            messages: VecDeque::new(),
            consumers: Vec::new(),
            cursor: 0,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Number of buffered messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consumer links in registration order
    pub fn consumers(&self) -> &[LinkId] {
        &self.consumers
    }

    /// No buffered messages and no consumers
    pub fn is_idle(&self) -> bool {
        self.messages.is_empty() && self.consumers.is_empty()
    }

    /// Register `link` as a consumer
    pub fn add_consumer(&mut self, link: LinkId) -> Result<()> {
        if self.consumers.contains(&link) {
            return Err(Error::DuplicateConsumer {
                address: self.address.clone(),
                link: link.to_string(),
            });
        }

        self.consumers.push(link);

        debug!(queue = %self.address, link = %link, "Consumer added");

        Ok(())
    }

    /// Unregister `link`; returns false if it was not a consumer
    pub fn remove_consumer(&mut self, link: LinkId) -> bool {
        let Some(index) = self.consumers.iter().position(|c| *c == link) else {
            return false;
        };

        self.consumers.remove(index);

        if index < self.cursor {
            self.cursor -= 1;
        }

        if self.cursor >= self.consumers.len() {
            self.cursor = 0;
        }

        debug!(queue = %self.address, link = %link, "Consumer removed");

        true
    }

    /// Append a message to the buffer. Does not deliver anything.
    pub fn store(&mut self, message: Message) {
        debug!(queue = %self.address, message = %message.summary(), "Message stored");

        self.messages.push_back(message);
    }

    /// Put back a message a consumer handed back undelivered. It goes to
    /// the head of the buffer, ahead of messages stored after it.
    pub fn requeue(&mut self, message: Message) {
        debug!(queue = %self.address, message = %message.summary(), "Message requeued");

        self.messages.push_front(message);
    }

    /// Drain messages to `link` while it has credit.
    ///
    /// Returns how many messages were delivered.
    pub fn forward(&mut self, link: LinkId, outlet: &mut impl Outlet) -> Result<usize> {
        let mut delivered = 0;

        while outlet.credit(link) > 0 {
            let Some(message) = self.messages.pop_front() else {
                break;
            };

            self.deliver(link, message, outlet)?;
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Deliver buffered messages one at a time across all consumers with
    /// credit, continuing from the consumer after the last one served.
    ///
    /// Returns how many messages were delivered.
    pub fn dispatch(&mut self, outlet: &mut impl Outlet) -> Result<usize> {
        let mut delivered = 0;
        let mut skipped = 0;

        while !self.messages.is_empty() && skipped < self.consumers.len() {
            let link = self.consumers[self.cursor];
            self.cursor = (self.cursor + 1) % self.consumers.len();

            if outlet.credit(link) == 0 {
                skipped += 1;
                continue;
            }

            skipped = 0;

            if let Some(message) = self.messages.pop_front() {
                self.deliver(link, message, outlet)?;
                delivered += 1;
            }
        }

        Ok(delivered)
    }

    fn deliver(&mut self, link: LinkId, message: Message, outlet: &mut impl Outlet) -> Result<()> {
        let summary = message.summary();

        // Keep the message if the send failed; only delivery removes it
        if let Err(e) = outlet.deliver(link, message.clone()) {
            self.messages.push_front(message);
            return Err(e);
        }

        debug!(queue = %self.address, link = %link, message = %summary, "Message forwarded");

        Ok(())
    }
}
