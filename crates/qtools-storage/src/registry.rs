//! Address registry
//!
//! Maps addresses to queues. Queues are created on first reference. The
//! registry is owned by the broker's reactor task, so it needs no locking.

use std::collections::{HashMap, HashSet};

use tracing::info;
use uuid::Uuid;

use crate::queue::Queue;

/// All queues known to the broker, by address
#[derive(Debug, Default)]
pub struct AddressRegistry {
    queues: HashMap<String, Queue>,
    /// Dynamic addresses whose queue was reclaimed
    retired: HashSet<String>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the queue for `address`, creating an empty one if needed.
    ///
    /// A retired dynamic address becomes an ordinary named queue again.
    pub fn get_or_create_queue(&mut self, address: &str) -> &mut Queue {
        self.retired.remove(address);

        self.queues.entry(address.to_string()).or_insert_with(|| {
            info!("Created queue '{}'", address);
            Queue::new(address, false)
        })
    }

    /// The queue messages sent to `address` are stored on, created if
    /// needed. `None` if `address` names a reclaimed dynamic queue: nothing
    /// will consume from it again.
    pub fn queue_for_delivery(&mut self, address: &str) -> Option<&mut Queue> {
        if self.retired.contains(address) {
            return None;
        }

        Some(self.get_or_create_queue(address))
    }

    /// Was `address` a dynamic queue that has since been reclaimed
    pub fn is_retired(&self, address: &str) -> bool {
        self.retired.contains(address)
    }

    /// Create a queue under a freshly generated address and return the address
    pub fn create_dynamic_queue(&mut self) -> String {
        let address = loop {
            let candidate = Uuid::new_v4().to_string();

            if !self.queues.contains_key(&candidate) && !self.retired.contains(&candidate) {
                break candidate;
            }
        };

        info!("Created dynamic queue '{}'", address);

        self.queues
            .insert(address.clone(), Queue::new(address.clone(), true));

        address
    }

    pub fn get(&self, address: &str) -> Option<&Queue> {
        self.queues.get(address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut Queue> {
        self.queues.get_mut(address)
    }

    /// Drop the queue for `address` if it was generated for a dynamic
    /// source and has neither consumers nor messages left.
    ///
    /// Named queues are kept for the life of the process.
    pub fn release(&mut self, address: &str) -> bool {
        let reclaim = self
            .queues
            .get(address)
            .map(|q| q.is_dynamic() && q.is_idle())
            .unwrap_or(false);

        if reclaim {
            self.queues.remove(address);
            self.retired.insert(address.to_string());
            info!("Deleted dynamic queue '{}'", address);
        }

        reclaim
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Known addresses, in no particular order
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }
}
