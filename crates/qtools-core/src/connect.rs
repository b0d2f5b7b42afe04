//! Connect mode: open a connection, report the peer, close

use qtools_transport::{ConnectOptions, Container, Handler};
use qtools_types::{ConnectionId, Endpoint, Error, Result};
use tracing::info;

use crate::pump::Pump;

/// Connects to each endpoint and closes as soon as the peer answers
pub struct ConnectProbe {
    endpoints: Vec<Endpoint>,
    user: Option<String>,
    pending: Vec<ConnectionId>,
    connected: Vec<String>,
    failure: Option<String>,
}

impl ConnectProbe {
    pub fn new(endpoints: Vec<Endpoint>, user: Option<String>) -> Self {
        Self {
            endpoints,
            user,
            pending: Vec::new(),
            connected: Vec::new(),
            failure: None,
        }
    }

    /// Container ids of the peers reached
    pub fn connected(&self) -> &[String] {
        &self.connected
    }

    fn done(&mut self, cx: &mut Container, connection: ConnectionId) {
        cx.close_connection(connection);
        self.pending.retain(|c| *c != connection);

        if self.pending.is_empty() {
            cx.close_injector();
        }
    }
}

impl Pump for ConnectProbe {
    fn finish(&mut self) -> Result<()> {
        match self.failure.take() {
            Some(message) => Err(Error::Transport(message)),
            None => Ok(()),
        }
    }
}

impl Handler for ConnectProbe {
    fn on_start(&mut self, cx: &mut Container) -> Result<()> {
        let options = ConnectOptions {
            user: self.user.clone(),
        };

        for endpoint in &self.endpoints {
            self.pending.push(cx.connect(endpoint, options.clone()));
        }

        if self.pending.is_empty() {
            cx.close_injector();
        }

        Ok(())
    }

    fn on_connection_opened(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        let container = cx
            .connection(connection)
            .and_then(|c| c.remote_container())
            .unwrap_or_default()
            .to_string();

        info!("Connected to server '{}'", container);

        self.connected.push(container);
        self.done(cx, connection);

        Ok(())
    }

    fn on_transport_error(&mut self, cx: &mut Container, connection: ConnectionId, message: &str) -> Result<()> {
        if self.failure.is_none() {
            self.failure = Some(message.to_string());
        }

        self.done(cx, connection);

        Ok(())
    }

    fn on_disconnected(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        if self.pending.contains(&connection) {
            self.failure.get_or_insert_with(|| "Connection lost".to_string());
            self.done(cx, connection);
        }

        Ok(())
    }
}
