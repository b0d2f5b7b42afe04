//! Container - the reactor
//!
//! A `Container` owns every connection, link and delivery of one process
//! and runs on a single task. Socket tasks and I/O threads reach it only
//! through its event channel, so none of its state needs a lock.

use std::collections::HashMap;
use std::net::SocketAddr;

use qtools_types::{
    ConnectionId, DeliveryId, Endpoint, Error, LinkId, Message, Outcome, Result, Role, Terminus,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::{Event, Injector};
use crate::frame::Frame;
use crate::io;
use crate::traits::Handler;

/// Credit window for receiver links the peer attaches
pub const DEFAULT_PREFETCH: u32 = 10;

/// Lifecycle of a connection or link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Options for [`Container::connect`]
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub user: Option<String>,
}

/// Options for [`Container::open_sender`]
#[derive(Debug, Clone, Default)]
pub struct SenderOptions {
    /// Fire and forget: transfers are settled when sent
    pub presettled: bool,
}

/// Options for [`Container::open_receiver`]
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Credit kept outstanding automatically; 0 means the handler calls
    /// [`Container::flow`] itself
    pub prefetch: u32,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

/// A connection as seen by the reactor
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: String,
    state: EndpointState,
    local_open: bool,
    remote_container: Option<String>,
    remote_user: Option<String>,
    frames: UnboundedSender<Frame>,
    links: Vec<LinkId>,
    /// Peer handle to local link
    remote_handles: HashMap<u64, LinkId>,
}

impl Connection {
    fn new(id: ConnectionId, peer: String, frames: UnboundedSender<Frame>, local_open: bool) -> Self {
        Self {
            id,
            peer,
            state: EndpointState::Opening,
            local_open,
            remote_container: None,
            remote_user: None,
            frames,
            links: Vec::new(),
            remote_handles: HashMap::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Socket address of the other end
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Container id the peer announced
    pub fn remote_container(&self) -> Option<&str> {
        self.remote_container.as_deref()
    }

    /// User the peer announced
    pub fn remote_user(&self) -> Option<&str> {
        self.remote_user.as_deref()
    }

    /// Links on this connection, in creation order
    pub fn links(&self) -> &[LinkId] {
        &self.links
    }

    /// `container '<id>'` for log lines
    pub fn summary(&self) -> String {
        match &self.remote_container {
            Some(container) => format!("container '{}'", container),
            None => format!("connection to {}", self.peer),
        }
    }
}

/// A link as seen by the reactor
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    connection: ConnectionId,
    name: String,
    role: Role,
    state: EndpointState,
    source: Terminus,
    target: Terminus,
    remote_source: Terminus,
    remote_target: Terminus,
    credit: u32,
    presettled: bool,
    prefetch: u32,
}

impl Link {
    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_sender(&self) -> bool {
        self.role == Role::Sender
    }

    pub fn is_receiver(&self) -> bool {
        self.role == Role::Receiver
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == EndpointState::Open
    }

    pub fn source(&self) -> &Terminus {
        &self.source
    }

    pub fn target(&self) -> &Terminus {
        &self.target
    }

    /// Source as the peer reported it; holds generated dynamic addresses
    pub fn remote_source(&self) -> &Terminus {
        &self.remote_source
    }

    pub fn remote_target(&self) -> &Terminus {
        &self.remote_target
    }

    /// On a sender: messages that may still be sent. On a receiver:
    /// credit granted and not yet used.
    pub fn credit(&self) -> u32 {
        self.credit
    }

    pub fn presettled(&self) -> bool {
        self.presettled
    }
}

#[derive(Debug)]
struct Incoming {
    connection: ConnectionId,
    remote_id: u64,
}

/// The reactor: connection, link and delivery state plus the event loop
pub struct Container {
    id: String,
    events_tx: UnboundedSender<Event>,
    events_rx: UnboundedReceiver<Event>,
    connections: HashMap<ConnectionId, Connection>,
    links: HashMap<LinkId, Link>,
    /// Unsettled deliveries we sent, by delivery
    outgoing: HashMap<DeliveryId, LinkId>,
    /// Unsettled deliveries we received
    incoming: HashMap<DeliveryId, Incoming>,
    listener: Option<JoinHandle<()>>,
    injector_open: bool,
    stopped: bool,
    default_prefetch: u32,
    next_id: u64,
}

impl Container {
    /// Create a reactor identified by `id`
    pub fn new(id: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            id: id.into(),
            events_tx,
            events_rx,
            connections: HashMap::new(),
            links: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            listener: None,
            injector_open: true,
            stopped: false,
            default_prefetch: DEFAULT_PREFETCH,
            next_id: 1,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Credit window for receiver links attached by peers
    pub fn set_default_prefetch(&mut self, prefetch: u32) {
        self.default_prefetch = prefetch;
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    /// Links still attached on `connection`
    pub fn connection_links(&self, connection: ConnectionId) -> Vec<LinkId> {
        self.connections
            .get(&connection)
            .map(|c| c.links.clone())
            .unwrap_or_default()
    }

    /// `container '<id>'` for the peer of `connection`
    pub fn connection_summary(&self, connection: ConnectionId) -> String {
        self.connections
            .get(&connection)
            .map(Connection::summary)
            .unwrap_or_else(|| connection.to_string())
    }

    /// Handle for posting application events from other threads
    pub fn injector(&self) -> Injector {
        Injector::new(self.events_tx.clone())
    }

    /// Stop delivering application events and let the loop finish once
    /// all connections are gone
    pub fn close_injector(&mut self) {
        self.injector_open = false;
    }

    // ==================== Connections ====================

    /// Open a client connection to `endpoint`
    pub fn connect(&mut self, endpoint: &Endpoint, options: ConnectOptions) -> ConnectionId {
        let id = ConnectionId(self.next_id());
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = endpoint.socket_addr();

        info!("Connecting to {}", endpoint.connection_url());

        io::spawn_connect(id, addr.clone(), rx, self.events_tx.clone());

        let _ = tx.send(Frame::Open {
            container_id: self.id.clone(),
            user: options.user,
        });

        self.connections.insert(id, Connection::new(id, addr, tx, true));

        id
    }

    /// Bind `addr` and accept connections on it
    pub fn listen(&mut self, addr: &str) -> Result<SocketAddr> {
        let listener = std::net::TcpListener::bind(addr)?;
        self.listen_on(listener)
    }

    /// Accept connections on an already bound listener
    pub fn listen_on(&mut self, listener: std::net::TcpListener) -> Result<SocketAddr> {
        listener.set_nonblocking(true)?;

        let local_addr = listener.local_addr()?;
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let events = self.events_tx.clone();

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        if events.send(Event::Accepted { stream, peer }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        });

        if let Some(previous) = self.listener.replace(task) {
            previous.abort();
        }

        Ok(local_addr)
    }

    /// Begin closing `connection`. Safe to call more than once.
    pub fn close_connection(&mut self, connection: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&connection) else {
            return;
        };

        if matches!(conn.state, EndpointState::Closing | EndpointState::Closed) {
            return;
        }

        conn.state = EndpointState::Closing;
        let _ = conn.frames.send(Frame::Close { error: None });
    }

    /// Close every connection and the listener; the loop ends once the
    /// connections are gone
    pub fn stop(&mut self) {
        self.stopped = true;

        if let Some(listener) = self.listener.take() {
            listener.abort();
        }

        let connections: Vec<ConnectionId> = self.connections.keys().copied().collect();

        for connection in connections {
            self.close_connection(connection);
        }
    }

    // ==================== Links ====================

    /// Attach a sending link. `None` targets the anonymous relay: each
    /// message carries its own address.
    pub fn open_sender(
        &mut self,
        connection: ConnectionId,
        address: Option<&str>,
        options: SenderOptions,
    ) -> Result<LinkId> {
        let target = address.map(Terminus::address).unwrap_or_default();

        self.open_link(
            connection,
            Role::Sender,
            Terminus::none(),
            target,
            options.presettled,
            0,
        )
    }

    /// Attach a receiving link from `source`, which may be dynamic
    pub fn open_receiver(
        &mut self,
        connection: ConnectionId,
        source: Terminus,
        options: ReceiverOptions,
    ) -> Result<LinkId> {
        self.open_link(
            connection,
            Role::Receiver,
            source,
            Terminus::none(),
            false,
            options.prefetch,
        )
    }

    fn open_link(
        &mut self,
        connection: ConnectionId,
        role: Role,
        source: Terminus,
        target: Terminus,
        presettled: bool,
        prefetch: u32,
    ) -> Result<LinkId> {
        let id = LinkId(self.next_id());
        let name = format!("{}-{}", self.id, id.0);

        let conn = self
            .connections
            .get_mut(&connection)
            .ok_or_else(|| Error::UnknownConnection(connection.to_string()))?;

        conn.links.push(id);
        let _ = conn.frames.send(Frame::Attach {
            handle: id.0,
            name: name.clone(),
            role,
            source: source.clone(),
            target: target.clone(),
            settled: presettled,
        });

        self.links.insert(
            id,
            Link {
                id,
                connection,
                name,
                role,
                state: EndpointState::Opening,
                source,
                target,
                remote_source: Terminus::none(),
                remote_target: Terminus::none(),
                credit: 0,
                presettled,
                prefetch,
            },
        );

        Ok(id)
    }

    /// Set the local source address; used while answering a peer's attach
    pub fn set_source_address(&mut self, link: LinkId, address: impl Into<String>) -> Result<()> {
        let link = self.link_mut(link)?;
        link.source.address = Some(address.into());
        Ok(())
    }

    /// Set the local target address; used while answering a peer's attach
    pub fn set_target_address(&mut self, link: LinkId, address: impl Into<String>) -> Result<()> {
        let link = self.link_mut(link)?;
        link.target.address = Some(address.into());
        Ok(())
    }

    /// Begin detaching `link`. Safe to call more than once.
    pub fn close_link(&mut self, link: LinkId) {
        let Some(l) = self.links.get_mut(&link) else {
            return;
        };

        if matches!(l.state, EndpointState::Closing | EndpointState::Closed) {
            return;
        }

        l.state = EndpointState::Closing;
        let connection = l.connection;

        self.send_frame(connection, Frame::Detach { handle: link.0 });
    }

    // ==================== Deliveries ====================

    /// Send `message` on a sender link, using one unit of credit.
    ///
    /// Returns the delivery to expect in `on_settled`, or `None` for
    /// presettled links.
    pub fn send(&mut self, link: LinkId, message: Message) -> Result<Option<DeliveryId>> {
        let delivery = DeliveryId(self.next_id());
        let l = self.link_mut(link)?;

        if !l.is_sender() {
            return Err(Error::Internal(format!("{} is not a sender", link)));
        }

        if !l.is_open() {
            return Err(Error::LinkNotOpen(link.to_string()));
        }

        if l.credit == 0 {
            return Err(Error::NoCredit(link.to_string()));
        }

        l.credit -= 1;
        let settled = l.presettled;
        let connection = l.connection;

        self.send_frame(
            connection,
            Frame::Transfer {
                handle: link.0,
                delivery_id: delivery.0,
                settled,
                message,
            },
        );

        if settled {
            Ok(None)
        } else {
            self.outgoing.insert(delivery, link);
            Ok(Some(delivery))
        }
    }

    /// Grant the peer `credit` more messages on a receiver link
    pub fn flow(&mut self, link: LinkId, credit: u32) -> Result<()> {
        let l = self.link_mut(link)?;

        if !l.is_receiver() {
            return Err(Error::Internal(format!("{} is not a receiver", link)));
        }

        if matches!(l.state, EndpointState::Closing | EndpointState::Closed) || credit == 0 {
            return Ok(());
        }

        l.credit = l.credit.saturating_add(credit);
        let connection = l.connection;

        self.send_frame(connection, Frame::Flow { handle: link.0, credit });

        Ok(())
    }

    /// The peer sent `delivery` unsettled and it has not been settled yet
    pub fn is_unsettled(&self, delivery: DeliveryId) -> bool {
        self.incoming.contains_key(&delivery)
    }

    /// Settle a received delivery with `outcome`
    pub fn settle(&mut self, delivery: DeliveryId, outcome: Outcome) -> Result<()> {
        let incoming = self
            .incoming
            .remove(&delivery)
            .ok_or_else(|| Error::UnknownDelivery(delivery.to_string()))?;

        self.send_frame(
            incoming.connection,
            Frame::Disposition {
                delivery_id: incoming.remote_id,
                outcome,
            },
        );

        Ok(())
    }

    pub fn accept(&mut self, delivery: DeliveryId) -> Result<()> {
        self.settle(delivery, Outcome::Accepted)
    }

    pub fn reject(&mut self, delivery: DeliveryId) -> Result<()> {
        self.settle(delivery, Outcome::Rejected)
    }

    pub fn release(&mut self, delivery: DeliveryId) -> Result<()> {
        self.settle(delivery, Outcome::Released)
    }

    // ==================== Event Loop ====================

    /// Run until there are no connections, no listener and the injector
    /// is closed (or [`Container::stop`] was called).
    pub async fn run<H: Handler>(mut self, handler: &mut H) -> Result<()> {
        debug!(container = %self.id, "Reactor starting");

        handler.on_start(&mut self)?;

        while !self.is_finished() {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };

            self.dispatch(event, handler)?;
        }

        debug!(container = %self.id, "Reactor finished");

        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.connections.is_empty()
            && self.listener.is_none()
            && (!self.injector_open || self.stopped)
    }

    fn dispatch<H: Handler>(&mut self, event: Event, handler: &mut H) -> Result<()> {
        match event {
            Event::Accepted { stream, peer } => {
                let id = ConnectionId(self.next_id());
                let (tx, rx) = mpsc::unbounded_channel();

                debug!(connection = %id, peer = %peer, "Accepted connection");

                io::spawn_stream(id, stream, rx, self.events_tx.clone());
                self.connections
                    .insert(id, Connection::new(id, peer.to_string(), tx, false));

                Ok(())
            }
            Event::Frame { connection, frame } => {
                if !self.connections.contains_key(&connection) {
                    debug!(connection = %connection, frame = frame.kind(), "Frame for a closed connection");
                    return Ok(());
                }

                self.handle_frame(connection, frame, handler)
            }
            Event::TransportError { connection, error } => {
                if self.connections.contains_key(&connection) {
                    handler.on_transport_error(self, connection, &error)?;
                }

                Ok(())
            }
            Event::Disconnected { connection } => {
                if !self.connections.contains_key(&connection) {
                    return Ok(());
                }

                let result = handler.on_disconnected(self, connection);
                self.remove_connection(connection);
                result
            }
            Event::Application(name) => {
                if self.injector_open {
                    handler.on_application(self, &name)
                } else {
                    Ok(())
                }
            }
            Event::Interrupt => handler.on_interrupt(self),
        }
    }

    fn handle_frame<H: Handler>(
        &mut self,
        connection: ConnectionId,
        frame: Frame,
        handler: &mut H,
    ) -> Result<()> {
        match frame {
            Frame::Open { container_id, user } => {
                let reply = match self.connections.get_mut(&connection) {
                    Some(conn) => {
                        conn.remote_container = Some(container_id);
                        conn.remote_user = user;
                        if conn.state == EndpointState::Opening {
                            conn.state = EndpointState::Open;
                        }
                        !std::mem::replace(&mut conn.local_open, true)
                    }
                    None => return Ok(()),
                };

                if reply {
                    let id = self.id.clone();
                    self.send_frame(
                        connection,
                        Frame::Open {
                            container_id: id,
                            user: None,
                        },
                    );
                }

                handler.on_connection_opened(self, connection)
            }
            Frame::Attach {
                handle,
                name,
                role,
                source,
                target,
                settled,
            } => self.handle_attach(connection, handle, name, role, source, target, settled, handler),
            Frame::Flow { handle, credit } => {
                let Some(link) = self.remote_link(connection, handle) else {
                    return self.fail_connection(connection, format!("Flow for unknown handle {}", handle), handler);
                };

                let sendable = match self.links.get_mut(&link) {
                    Some(l) if l.is_sender() => {
                        // Peer supplied; never wraps
                        l.credit = l.credit.saturating_add(credit);
                        l.is_open() && l.credit > 0
                    }
                    _ => false,
                };

                if sendable {
                    handler.on_sendable(self, link)?;
                }

                Ok(())
            }
            Frame::Transfer {
                handle,
                delivery_id,
                settled,
                message,
            } => {
                let Some(link) = self.remote_link(connection, handle) else {
                    return self.fail_connection(connection, format!("Transfer for unknown handle {}", handle), handler);
                };

                self.handle_transfer(connection, link, delivery_id, settled, message, handler)
            }
            Frame::Disposition {
                delivery_id,
                outcome,
            } => {
                let delivery = DeliveryId(delivery_id);

                let link = match self.outgoing.get(&delivery) {
                    Some(link) if self.links.get(link).map(|l| l.connection) == Some(connection) => *link,
                    _ => {
                        debug!(delivery = %delivery, "Disposition for an unknown delivery");
                        return Ok(());
                    }
                };

                self.outgoing.remove(&delivery);

                handler.on_settled(self, link, delivery, outcome)
            }
            Frame::Detach { handle } => {
                let Some(link) = self.remote_link(connection, handle) else {
                    debug!(handle, "Detach for an unknown handle");
                    return Ok(());
                };

                if !self.is_closing(link) {
                    handler.on_link_closing(self, link)?;

                    if self.links.contains_key(&link) && !self.is_closing(link) {
                        self.send_frame(connection, Frame::Detach { handle: link.0 });
                    }
                }

                self.remove_link(link);

                Ok(())
            }
            Frame::Close { error } => {
                if let Some(error) = &error {
                    warn!("{} closed with error: {}", self.connection_summary(connection), error);
                }

                let closing = self
                    .connections
                    .get(&connection)
                    .map(|c| c.state == EndpointState::Closing)
                    .unwrap_or(true);

                if !closing {
                    handler.on_connection_closing(self, connection)?;
                    self.close_connection(connection);
                }

                self.remove_connection(connection);

                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_attach<H: Handler>(
        &mut self,
        connection: ConnectionId,
        handle: u64,
        name: String,
        role: Role,
        source: Terminus,
        target: Terminus,
        settled: bool,
        handler: &mut H,
    ) -> Result<()> {
        let pending = self.connections.get(&connection).and_then(|c| {
            c.links.iter().copied().find(|id| {
                self.links
                    .get(id)
                    .map(|l| l.name == name && l.state == EndpointState::Opening)
                    .unwrap_or(false)
            })
        });

        // Answer to an attach we sent
        if let Some(link) = pending {
            if let Some(l) = self.links.get_mut(&link) {
                l.remote_source = source;
                l.remote_target = target;
                l.state = EndpointState::Open;
            }

            if let Some(conn) = self.connections.get_mut(&connection) {
                conn.remote_handles.insert(handle, link);
            }

            handler.on_link_opened(self, link)?;
            self.replenish(link);

            return Ok(());
        }

        // The peer attached first
        let link = LinkId(self.next_id());
        let local_role = role.peer();
        let prefetch = match local_role {
            Role::Receiver => self.default_prefetch,
            Role::Sender => 0,
        };

        match self.connections.get_mut(&connection) {
            Some(conn) => {
                conn.links.push(link);
                conn.remote_handles.insert(handle, link);
            }
            None => return Ok(()),
        }

        self.links.insert(
            link,
            Link {
                id: link,
                connection,
                name,
                role: local_role,
                state: EndpointState::Opening,
                source: source.clone(),
                target: target.clone(),
                remote_source: source,
                remote_target: target,
                credit: 0,
                presettled: settled,
                prefetch,
            },
        );

        handler.on_link_opening(self, link)?;

        let reply = match self.links.get_mut(&link) {
            Some(l) if l.state == EndpointState::Opening => {
                l.state = EndpointState::Open;
                Frame::Attach {
                    handle: link.0,
                    name: l.name.clone(),
                    role: l.role,
                    source: l.source.clone(),
                    target: l.target.clone(),
                    settled: false,
                }
            }
            _ => return Ok(()),
        };

        self.send_frame(connection, reply);

        handler.on_link_opened(self, link)?;
        self.replenish(link);

        Ok(())
    }

    fn handle_transfer<H: Handler>(
        &mut self,
        connection: ConnectionId,
        link: LinkId,
        remote_id: u64,
        settled: bool,
        message: Message,
        handler: &mut H,
    ) -> Result<()> {
        let open = match self.links.get_mut(&link) {
            Some(l) if l.is_receiver() => {
                l.credit = l.credit.saturating_sub(1);
                l.is_open()
            }
            _ => {
                return self.fail_connection(connection, format!("Transfer on non-receiving {}", link), handler);
            }
        };

        if !open {
            if !settled {
                self.send_frame(
                    connection,
                    Frame::Disposition {
                        delivery_id: remote_id,
                        outcome: Outcome::Released,
                    },
                );
            }

            return Ok(());
        }

        let delivery = DeliveryId(self.next_id());

        if !settled {
            self.incoming.insert(
                delivery,
                Incoming {
                    connection,
                    remote_id,
                },
            );
        }

        handler.on_message(self, link, delivery, message)?;

        if !settled && handler.auto_accept() && self.incoming.contains_key(&delivery) {
            self.settle(delivery, Outcome::Accepted)?;
        }

        self.replenish(link);

        Ok(())
    }

    /// Top receiver credit back up to the link's prefetch window
    fn replenish(&mut self, link: LinkId) {
        let top_up = match self.links.get(&link) {
            Some(l) if l.is_receiver() && l.is_open() && l.credit < l.prefetch => l.prefetch - l.credit,
            _ => return,
        };

        let _ = self.flow(link, top_up);
    }

    /// Report a protocol violation and close the connection
    fn fail_connection<H: Handler>(
        &mut self,
        connection: ConnectionId,
        message: String,
        handler: &mut H,
    ) -> Result<()> {
        let error = Error::Protocol(message);
        handler.on_transport_error(self, connection, &error.to_string())?;

        if let Some(conn) = self.connections.get_mut(&connection) {
            if conn.state != EndpointState::Closing {
                conn.state = EndpointState::Closing;
                let _ = conn.frames.send(Frame::Close {
                    error: Some(error.to_string()),
                });
            }
        }

        Ok(())
    }

    // ==================== Bookkeeping ====================

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn link_mut(&mut self, link: LinkId) -> Result<&mut Link> {
        self.links
            .get_mut(&link)
            .ok_or_else(|| Error::UnknownLink(link.to_string()))
    }

    fn remote_link(&self, connection: ConnectionId, handle: u64) -> Option<LinkId> {
        self.connections
            .get(&connection)
            .and_then(|c| c.remote_handles.get(&handle).copied())
    }

    fn is_closing(&self, link: LinkId) -> bool {
        self.links
            .get(&link)
            .map(|l| matches!(l.state, EndpointState::Closing | EndpointState::Closed))
            .unwrap_or(true)
    }

    /// Queue a frame; a dead writer is reported separately by its reader
    fn send_frame(&self, connection: ConnectionId, frame: Frame) {
        match self.connections.get(&connection) {
            Some(conn) => {
                if conn.frames.send(frame).is_err() {
                    debug!(connection = %connection, "Writer gone; frame dropped");
                }
            }
            None => debug!(connection = %connection, frame = frame.kind(), "Frame for a closed connection dropped"),
        }
    }

    fn remove_link(&mut self, link: LinkId) {
        if let Some(l) = self.links.remove(&link) {
            if let Some(conn) = self.connections.get_mut(&l.connection) {
                conn.links.retain(|id| *id != link);
                conn.remote_handles.retain(|_, id| *id != link);
            }
        }

        self.outgoing.retain(|_, id| *id != link);
    }

    fn remove_connection(&mut self, connection: ConnectionId) {
        let Some(mut conn) = self.connections.remove(&connection) else {
            return;
        };

        conn.state = EndpointState::Closed;

        for link in &conn.links {
            self.links.remove(link);
        }

        let links = conn.links;
        self.outgoing.retain(|_, id| !links.contains(id));
        self.incoming.retain(|_, d| d.connection != connection);

        debug!(connection = %connection, "Connection removed");
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use qtools_types::Scheme;

    use super::*;

    /// Peer that answers attaches and assigns dynamic addresses
    #[derive(Default)]
    struct Peer {
        received: Vec<String>,
    }

    impl Handler for Peer {
        fn on_link_opening(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
            let dynamic = cx.link(link).map(|l| l.remote_source().dynamic).unwrap_or(false);

            if dynamic {
                cx.set_source_address(link, "generated")?;
            }

            Ok(())
        }

        fn on_message(
            &mut self,
            _cx: &mut Container,
            _link: LinkId,
            _delivery: DeliveryId,
            message: Message,
        ) -> Result<()> {
            self.received.push(message.body_str().to_string());
            Ok(())
        }

        fn on_connection_closing(&mut self, cx: &mut Container, _connection: ConnectionId) -> Result<()> {
            cx.stop();
            Ok(())
        }
    }

    /// Client that sends two messages once credit arrives
    struct Client {
        endpoint: Endpoint,
        sender: Option<LinkId>,
        receiver: Option<LinkId>,
        reply_address: Option<String>,
        settled: Vec<Outcome>,
        sent: usize,
    }

    impl Handler for Client {
        fn on_start(&mut self, cx: &mut Container) -> Result<()> {
            let connection = cx.connect(&self.endpoint, ConnectOptions::default());
            self.sender = Some(cx.open_sender(connection, Some("q0"), SenderOptions::default())?);
            self.receiver =
                Some(cx.open_receiver(connection, Terminus::dynamic(), ReceiverOptions::default())?);
            Ok(())
        }

        fn on_link_opened(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
            if Some(link) == self.receiver {
                self.reply_address = cx.link(link).and_then(|l| l.remote_source().address.clone());
            }
            Ok(())
        }

        fn on_sendable(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
            while self.sent < 2 {
                cx.send(link, Message::new(format!("m{}", self.sent)))?;
                self.sent += 1;
            }
            Ok(())
        }

        fn on_settled(
            &mut self,
            cx: &mut Container,
            _link: LinkId,
            _delivery: DeliveryId,
            outcome: Outcome,
        ) -> Result<()> {
            self.settled.push(outcome);

            if self.settled.len() == 2 {
                let connections: Vec<ConnectionId> = cx.connections.keys().copied().collect();
                for connection in connections {
                    cx.close_connection(connection);
                }
                cx.close_injector();
            }

            Ok(())
        }
    }

    #[tokio::test]
    async fn test_attach_transfer_settle() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut container = Container::new("server");
            container.listen_on(listener).unwrap();
            let mut handler = Peer::default();
            container.run(&mut handler).await.unwrap();
            handler
        });

        let mut client = Client {
            endpoint: Endpoint {
                scheme: Scheme::Amqp,
                host: "127.0.0.1".to_string(),
                port,
                address: "q0".to_string(),
            },
            sender: None,
            receiver: None,
            reply_address: None,
            settled: Vec::new(),
            sent: 0,
        };

        tokio::time::timeout(Duration::from_secs(10), Container::new("client").run(&mut client))
            .await
            .unwrap()
            .unwrap();

        let server = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(server.received, vec!["m0", "m1"]);
        assert_eq!(client.settled, vec![Outcome::Accepted, Outcome::Accepted]);
        assert_eq!(client.reply_address.as_deref(), Some("generated"));
    }

    #[tokio::test]
    async fn test_send_requires_open_link_with_credit() {
        let mut container = Container::new("c");
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = ConnectionId(container.next_id());
        container
            .connections
            .insert(connection, Connection::new(connection, "peer".to_string(), tx, true));

        let link = container
            .open_sender(connection, Some("q0"), SenderOptions::default())
            .unwrap();

        assert!(matches!(
            container.send(link, Message::new("x")),
            Err(Error::LinkNotOpen(_))
        ));

        container.links.get_mut(&link).unwrap().state = EndpointState::Open;
        assert!(matches!(
            container.send(link, Message::new("x")),
            Err(Error::NoCredit(_))
        ));

        container.links.get_mut(&link).unwrap().credit = 1;
        assert!(container.send(link, Message::new("x")).unwrap().is_some());
        assert_eq!(container.link(link).unwrap().credit(), 0);
    }

    #[tokio::test]
    async fn test_peer_credit_saturates() {
        let mut container = Container::new("c");
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = ConnectionId(container.next_id());
        container
            .connections
            .insert(connection, Connection::new(connection, "peer".to_string(), tx, true));

        let link = container
            .open_sender(connection, Some("q0"), SenderOptions::default())
            .unwrap();
        container.links.get_mut(&link).unwrap().state = EndpointState::Open;
        container
            .connections
            .get_mut(&connection)
            .unwrap()
            .remote_handles
            .insert(7, link);

        let mut handler = Peer::default();

        for _ in 0..2 {
            let flow = Frame::Flow {
                handle: 7,
                credit: u32::MAX,
            };
            container.handle_frame(connection, flow, &mut handler).unwrap();
        }

        assert_eq!(container.link(link).unwrap().credit(), u32::MAX);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut container = Container::new("c");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = ConnectionId(container.next_id());
        container
            .connections
            .insert(connection, Connection::new(connection, "peer".to_string(), tx, true));

        container.close_connection(connection);
        container.close_connection(connection);

        assert!(matches!(rx.try_recv(), Ok(Frame::Close { .. })));
        assert!(rx.try_recv().is_err());
    }
}
