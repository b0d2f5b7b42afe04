//! Handler trait definition
//!
//! The callbacks a reactor raises. Every callback runs on the reactor task
//! and must return promptly. Returning an error stops the reactor and
//! surfaces the error from [`Container::run`](crate::Container::run).

use qtools_types::{ConnectionId, DeliveryId, LinkId, Message, Outcome, Result};
use tracing::error;

use crate::container::Container;

/// Reactor callbacks - all have no-op defaults
#[allow(unused_variables)]
pub trait Handler {
    /// The reactor is running; open connections or listeners here
    fn on_start(&mut self, cx: &mut Container) -> Result<()> {
        Ok(())
    }

    /// Both ends of a connection are open
    fn on_connection_opened(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        Ok(())
    }

    /// The peer attached a link; assign local termini here
    fn on_link_opening(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
        Ok(())
    }

    /// Both ends of a link are attached
    fn on_link_opened(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
        Ok(())
    }

    /// The peer granted credit on a sender link
    fn on_sendable(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
        Ok(())
    }

    /// A message arrived on a receiver link
    fn on_message(
        &mut self,
        cx: &mut Container,
        link: LinkId,
        delivery: DeliveryId,
        message: Message,
    ) -> Result<()> {
        Ok(())
    }

    /// The peer settled a delivery sent on `link`
    fn on_settled(
        &mut self,
        cx: &mut Container,
        link: LinkId,
        delivery: DeliveryId,
        outcome: Outcome,
    ) -> Result<()> {
        Ok(())
    }

    /// The peer detached a link
    fn on_link_closing(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
        Ok(())
    }

    /// The peer closed a connection
    fn on_connection_closing(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        Ok(())
    }

    /// The socket under a connection went away
    fn on_disconnected(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        Ok(())
    }

    /// Connect, protocol or I/O failure on a connection
    fn on_transport_error(
        &mut self,
        cx: &mut Container,
        connection: ConnectionId,
        message: &str,
    ) -> Result<()> {
        error!("{}", message);
        Ok(())
    }

    /// An event posted through an [`Injector`](crate::Injector)
    fn on_application(&mut self, cx: &mut Container, name: &str) -> Result<()> {
        Ok(())
    }

    /// Interrupt requested, for example by Ctrl-C
    fn on_interrupt(&mut self, cx: &mut Container) -> Result<()> {
        cx.stop();
        Ok(())
    }

    /// Accept unsettled incoming deliveries after `on_message` returns
    fn auto_accept(&self) -> bool {
        true
    }
}
