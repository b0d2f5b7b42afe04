//! Reactor events and the cross-thread injector

use std::net::SocketAddr;

use qtools_types::ConnectionId;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;

use crate::frame::Frame;

/// Everything the reactor reacts to
#[derive(Debug)]
pub(crate) enum Event {
    /// A listener accepted a socket
    Accepted { stream: TcpStream, peer: SocketAddr },
    /// A frame arrived on a connection
    Frame {
        connection: ConnectionId,
        frame: Frame,
    },
    /// Connect, read or write failure
    TransportError {
        connection: ConnectionId,
        error: String,
    },
    /// The socket is gone
    Disconnected { connection: ConnectionId },
    /// Posted through an [`Injector`]
    Application(String),
    /// Posted through [`Injector::interrupt`]
    Interrupt,
}

/// Thread-safe handle for waking the reactor from outside.
///
/// Blocking threads use it to tell the reactor that shared state changed;
/// they never touch reactor state themselves.
#[derive(Debug, Clone)]
pub struct Injector {
    tx: UnboundedSender<Event>,
}

impl Injector {
    pub(crate) fn new(tx: UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Post a named application event. Returns false once the reactor is gone.
    pub fn trigger(&self, name: impl Into<String>) -> bool {
        self.tx.send(Event::Application(name.into())).is_ok()
    }

    /// Ask the reactor to shut down
    pub fn interrupt(&self) -> bool {
        self.tx.send(Event::Interrupt).is_ok()
    }
}
