//! Broker - Reactor adapter over the address registry
//!
//! Translates link and connection events into queue operations. Peers
//! that send into the broker attach targets; peers that receive from it
//! attach sources and become queue consumers.
//!
//! A message sent to a consumer stays in flight until settled. Released
//! and modified messages, and those held by a consumer that goes away,
//! return to the head of their queue.

use std::collections::HashMap;
use std::net::TcpListener;

use qtools_storage::{AddressRegistry, Outlet};
use qtools_transport::{Container, Handler};
use qtools_types::{
    BrokerConfig, ConnectionId, DeliveryId, Error, LinkId, Message, Outcome, Result, Terminus,
    TerminusKind,
};
use tracing::{debug, info, warn};

/// A message sent to a consumer that has not settled it yet
#[derive(Debug)]
struct InFlight {
    address: String,
    link: LinkId,
    message: Message,
}

/// Consumer links of one queue as seen by that queue
struct LinkOutlet<'a> {
    cx: &'a mut Container,
    address: &'a str,
    in_flight: &'a mut HashMap<DeliveryId, InFlight>,
}

impl Outlet for LinkOutlet<'_> {
    fn credit(&self, link: LinkId) -> u32 {
        self.cx
            .link(link)
            .filter(|l| l.is_open())
            .map(|l| l.credit())
            .unwrap_or(0)
    }

    fn deliver(&mut self, link: LinkId, message: Message) -> Result<()> {
        let kept = message.clone();

        if let Some(delivery) = self.cx.send(link, message)? {
            self.in_flight.insert(
                delivery,
                InFlight {
                    address: self.address.to_string(),
                    link,
                    message: kept,
                },
            );
        }

        Ok(())
    }
}

/// In-memory test broker
pub struct Broker {
    config: BrokerConfig,
    listener: Option<TcpListener>,
    registry: AddressRegistry,
    in_flight: HashMap<DeliveryId, InFlight>,
}

impl Broker {
    /// Create a broker that binds `config.host:config.port` on start
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            listener: None,
            registry: AddressRegistry::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Create a broker that accepts on an already bound listener
    pub fn with_listener(config: BrokerConfig, listener: TcpListener) -> Self {
        Self {
            listener: Some(listener),
            ..Self::new(config)
        }
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    /// Deliveries sent to consumers and not yet settled
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Deliver what `address` holds across its consumers
    fn dispatch(&mut self, cx: &mut Container, address: &str) -> Result<()> {
        if let Some(queue) = self.registry.get_mut(address) {
            let mut outlet = LinkOutlet {
                cx,
                address,
                in_flight: &mut self.in_flight,
            };

            queue.dispatch(&mut outlet)?;
        }

        Ok(())
    }

    /// Put unsettled messages back at the head of their queues, oldest
    /// first, and hand them out again
    fn requeue(&mut self, cx: &mut Container, mut returned: Vec<(DeliveryId, InFlight)>) -> Result<()> {
        returned.sort_by(|a, b| b.0.cmp(&a.0));

        let mut addresses: Vec<String> = Vec::new();

        for (delivery, entry) in returned {
            let Some(queue) = self.registry.get_mut(&entry.address) else {
                warn!("Dropping {}: queue '{}' is gone", entry.message.summary(), entry.address);
                continue;
            };

            if queue.is_dynamic() && queue.consumers().is_empty() {
                debug!("Dropping {} for departed consumer of '{}'", entry.message.summary(), entry.address);
                continue;
            }

            debug!("Returning {} from {} to '{}'", entry.message.summary(), delivery, entry.address);
            queue.requeue(entry.message);

            if !addresses.contains(&entry.address) {
                addresses.push(entry.address);
            }
        }

        for address in addresses {
            self.dispatch(cx, &address)?;
        }

        Ok(())
    }

    /// Unregister consumer links, return their unsettled messages and
    /// reclaim dynamic queues left unused
    fn remove_consumers(&mut self, cx: &mut Container, links: &[LinkId]) -> Result<()> {
        let mut addresses = Vec::new();

        for &link in links {
            let Some(l) = cx.link(link).filter(|l| l.is_sender()) else {
                continue;
            };

            let Some(address) = l.source().address.clone() else {
                continue;
            };

            if let Some(queue) = self.registry.get_mut(&address) {
                if queue.remove_consumer(link) {
                    info!(
                        "Removed consumer for {} on {}",
                        l.source().summary(TerminusKind::Source),
                        cx.connection_summary(l.connection())
                    );
                }
            }

            addresses.push(address);
        }

        let deliveries: Vec<DeliveryId> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| links.contains(&entry.link))
            .map(|(delivery, _)| *delivery)
            .collect();

        let returned = deliveries
            .into_iter()
            .filter_map(|delivery| self.in_flight.remove(&delivery).map(|entry| (delivery, entry)))
            .collect();

        self.requeue(cx, returned)?;

        for address in addresses {
            self.registry.release(&address);
        }

        Ok(())
    }

    /// Settle a message the broker will not store
    fn refuse(cx: &mut Container, delivery: DeliveryId, message: &Message, reason: &str) -> Result<()> {
        if cx.is_unsettled(delivery) {
            warn!("Rejecting {}: {}", message.summary(), reason);
            cx.reject(delivery)?;
        } else {
            warn!("Dropping presettled {}: {}", message.summary(), reason);
        }

        Ok(())
    }
}

impl Handler for Broker {
    fn on_start(&mut self, cx: &mut Container) -> Result<()> {
        let addr = match self.listener.take() {
            Some(listener) => cx.listen_on(listener)?,
            None => cx.listen(&self.config.listen_addr())?,
        };

        info!("Listening for connections on {}", addr);

        if let Some(path) = &self.config.ready_file {
            std::fs::write(path, "ready\n")?;
        }

        Ok(())
    }

    fn on_connection_opened(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        info!("Opened connection from {}", cx.connection_summary(connection));
        Ok(())
    }

    fn on_link_opening(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
        let (is_sender, remote_source, remote_target, connection) = match cx.link(link) {
            Some(l) => (
                l.is_sender(),
                l.remote_source().clone(),
                l.remote_target().clone(),
                l.connection(),
            ),
            None => return Err(Error::UnknownLink(link.to_string())),
        };

        if !is_sender {
            // The peer sends to us; an anonymous target routes by message address
            if let Some(address) = remote_target.address {
                cx.set_target_address(link, address.as_str())?;

                if self.registry.queue_for_delivery(&address).is_none() {
                    warn!("Sender on {} targets retired address '{}'", cx.connection_summary(connection), address);
                }
            }

            return Ok(());
        }

        let address = if remote_source.dynamic {
            self.registry.create_dynamic_queue()
        } else if let Some(address) = remote_source.address {
            address
        } else {
            warn!(
                "Receiver on {} has no source address",
                cx.connection_summary(connection)
            );
            return Ok(());
        };

        cx.set_source_address(link, address.as_str())?;
        self.registry.get_or_create_queue(&address).add_consumer(link)?;

        info!(
            "Added consumer for {} on {}",
            Terminus::address(address.as_str()).summary(TerminusKind::Source),
            cx.connection_summary(connection)
        );

        Ok(())
    }

    fn on_sendable(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
        let Some(address) = cx.link(link).and_then(|l| l.source().address.clone()) else {
            return Ok(());
        };

        if let Some(queue) = self.registry.get_mut(&address) {
            let mut outlet = LinkOutlet {
                cx,
                address: &address,
                in_flight: &mut self.in_flight,
            };

            queue.forward(link, &mut outlet)?;
        }

        Ok(())
    }

    fn on_message(
        &mut self,
        cx: &mut Container,
        link: LinkId,
        delivery: DeliveryId,
        message: Message,
    ) -> Result<()> {
        let address = cx
            .link(link)
            .and_then(|l| l.target().address.clone())
            .or_else(|| message.address.clone());

        let Some(address) = address else {
            return Self::refuse(cx, delivery, &message, "no address");
        };

        let Some(queue) = self.registry.queue_for_delivery(&address) else {
            return Self::refuse(cx, delivery, &message, &format!("'{}' is no longer in use", address));
        };

        debug!("Storing {} on queue '{}'", message.summary(), address);

        queue.store(message);
        self.dispatch(cx, &address)
    }

    fn on_settled(
        &mut self,
        cx: &mut Container,
        _link: LinkId,
        delivery: DeliveryId,
        outcome: Outcome,
    ) -> Result<()> {
        let Some(entry) = self.in_flight.remove(&delivery) else {
            return Ok(());
        };

        match outcome {
            Outcome::Accepted => Ok(()),
            Outcome::Rejected => {
                info!("Consumer rejected {} from '{}'", entry.message.summary(), entry.address);
                Ok(())
            }
            Outcome::Released | Outcome::Modified => self.requeue(cx, vec![(delivery, entry)]),
        }
    }

    fn on_link_closing(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
        self.remove_consumers(cx, &[link])
    }

    fn on_connection_closing(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        let links = cx.connection_links(connection);
        self.remove_consumers(cx, &links)?;
        info!("Closed connection from {}", cx.connection_summary(connection));
        Ok(())
    }

    fn on_disconnected(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        let links = cx.connection_links(connection);
        self.remove_consumers(cx, &links)?;
        debug!("Disconnected from {}", cx.connection_summary(connection));
        Ok(())
    }

    fn on_transport_error(&mut self, cx: &mut Container, connection: ConnectionId, message: &str) -> Result<()> {
        warn!("{}: {}", cx.connection_summary(connection), message);
        Ok(())
    }

    fn on_interrupt(&mut self, cx: &mut Container) -> Result<()> {
        info!("Shutting down");
        cx.stop();
        Ok(())
    }
}
