//! Receive mode: messages become output lines

use qtools_transport::{Container, Handler, ReceiverOptions};
use qtools_types::{ClientConfig, ConnectionId, DeliveryId, LinkId, Message, Result, Terminus};
use serde_json::Value;
use tracing::{debug, info};

use super::{plural, Pump, PumpCore, PumpHandler};
use crate::bridge::{OutputWriter, ReadyLatch};

/// Writes each received message to the output, closing after `count`
/// messages when a count is configured
pub struct ReceivePump {
    core: PumpCore,
    receivers: Vec<LinkId>,
    received: u64,
}

impl ReceivePump {
    pub fn new(config: ClientConfig, output: OutputWriter) -> Self {
        Self {
            core: PumpCore::new(config, ReadyLatch::new(), Some(output)),
            receivers: Vec::new(),
            received: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    fn top_up(&self, cx: &mut Container, link: LinkId) -> Result<()> {
        self.core.top_up(cx, link, self.received)
    }

    fn is_done(&self) -> bool {
        self.core
            .config()
            .count
            .map(|count| self.received >= count)
            .unwrap_or(false)
    }
}

/// Output lines for one message: property lines, then the body line
pub(crate) fn format_message(
    message: &Message,
    address: &str,
    config: &ClientConfig,
) -> Result<Vec<String>> {
    let mut lines = Vec::new();

    if config.properties {
        let mut names: Vec<&String> = message.properties.keys().collect();
        names.sort();

        for name in names {
            let value = match &message.properties[name] {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };

            lines.push(format!("[property] {}: {}", name, value));
        }
    }

    let body = if config.json {
        message.to_record()?
    } else {
        message.body_str().to_string()
    };

    if config.prefix {
        lines.push(format!("{}: {}", address, body));
    } else {
        lines.push(body);
    }

    Ok(lines)
}

impl Pump for ReceivePump {
    fn finish(&mut self) -> Result<()> {
        self.core.finish()
    }
}

impl PumpHandler for ReceivePump {
    fn core(&mut self) -> &mut PumpCore {
        &mut self.core
    }

    fn close(&mut self, cx: &mut Container) {
        if self.core.close(cx) {
            info!("Received {} {}", self.received, plural("message", self.received));
        }
    }
}

impl Handler for ReceivePump {
    fn on_start(&mut self, cx: &mut Container) -> Result<()> {
        if self.is_done() {
            self.close(cx);
            return Ok(());
        }

        // Credit is granted by hand so a count is never overshot
        let options = ReceiverOptions { prefetch: 0 };

        for (connection, endpoint) in self.core.connect_all(cx) {
            let link = cx.open_receiver(
                connection,
                Terminus::address(&endpoint.address),
                options.clone(),
            )?;

            self.receivers.push(link);
            self.core.expect_link();
        }

        Ok(())
    }

    fn on_connection_opened(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        debug!("Connected to {}", cx.connection_summary(connection));
        Ok(())
    }

    fn on_link_opened(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
        self.core.link_opened(cx, link)?;
        self.top_up(cx, link)
    }

    fn on_message(
        &mut self,
        cx: &mut Container,
        link: LinkId,
        delivery: DeliveryId,
        message: Message,
    ) -> Result<()> {
        if self.is_done() {
            if cx.is_unsettled(delivery) {
                cx.release(delivery)?;
            }
            return Ok(());
        }

        let address = cx
            .link(link)
            .and_then(|l| l.source().address.clone())
            .unwrap_or_default();

        let connection = cx
            .link(link)
            .map(|l| cx.connection_summary(l.connection()))
            .unwrap_or_default();

        debug!("Received {} from {} on {}", message.summary(), address, connection);

        for line in format_message(&message, &address, self.core.config())? {
            self.core.write_line(line);
        }

        self.received += 1;

        if cx.is_unsettled(delivery) {
            cx.accept(delivery)?;
        }

        if self.is_done() {
            self.close(cx);
        } else {
            self.top_up(cx, link)?;
        }

        Ok(())
    }

    fn auto_accept(&self) -> bool {
        false
    }

    fn on_connection_closing(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        self.connection_closing(cx, connection);
        Ok(())
    }

    fn on_disconnected(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        self.disconnected(cx, connection);
        Ok(())
    }

    fn on_transport_error(&mut self, cx: &mut Container, _connection: ConnectionId, message: &str) -> Result<()> {
        self.transport_error(cx, message);
        Ok(())
    }

    fn on_interrupt(&mut self, cx: &mut Container) -> Result<()> {
        self.close(cx);
        Ok(())
    }
}
