//! Respond mode: answer requests with processed text

use std::collections::VecDeque;

use qtools_transport::{Container, Handler, ReceiverOptions, SenderOptions};
use qtools_types::{
    ClientConfig, ConnectionId, DeliveryId, Error, LinkId, Message, Outcome, Result, Terminus,
    TransformConfig,
};
use tracing::{debug, info, warn};

use super::{plural, Pump, PumpCore, PumpHandler};
use crate::bridge::ReadyLatch;

/// Turns a request into a response body
pub trait Processor {
    /// `None` leaves the response without a body. An error rejects the
    /// request.
    fn process(&mut self, request: &Message) -> Result<Option<String>>;
}

/// Processor applying the configured text transforms to the request body
#[derive(Debug, Clone, Default)]
pub struct TextTransform {
    config: TransformConfig,
}

impl TextTransform {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }
}

impl Processor for TextTransform {
    fn process(&mut self, request: &Message) -> Result<Option<String>> {
        Ok(request.body.as_deref().map(|body| self.config.apply(body)))
    }
}

/// A response waiting for credit
#[derive(Debug)]
struct Outbound {
    connection: ConnectionId,
    message: Message,
}

/// Receives requests and sends one response each to the request's
/// `reply_to`. Requests are accepted once their response is queued.
pub struct RespondPump<P> {
    core: PumpCore,
    processor: P,
    receivers: Vec<LinkId>,
    senders: Vec<(ConnectionId, LinkId)>,
    outbound: VecDeque<Outbound>,
    processed: u64,
    done: bool,
}

impl<P: Processor> RespondPump<P> {
    pub fn new(config: ClientConfig, processor: P) -> Self {
        Self {
            core: PumpCore::new(config, ReadyLatch::new(), None),
            processor,
            receivers: Vec::new(),
            senders: Vec::new(),
            outbound: VecDeque::new(),
            processed: 0,
            done: false,
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Build the response to `request`
    fn respond(&mut self, request: &Message) -> Result<Message> {
        let reply_to = request
            .reply_to
            .clone()
            .filter(|address| !address.is_empty())
            .ok_or_else(|| Error::Processing("Request has no reply-to address".to_string()))?;

        let mut response = Message {
            address: Some(reply_to),
            correlation_id: request.id.clone(),
            ..Default::default()
        };

        response.body = self.processor.process(request)?;

        Ok(response)
    }

    /// Send queued responses in order while their connection's sender has
    /// credit
    fn flush(&mut self, cx: &mut Container) -> Result<()> {
        while let Some(next) = self.outbound.front() {
            let sender = self
                .senders
                .iter()
                .find(|(connection, _)| *connection == next.connection)
                .map(|(_, link)| *link);

            let Some(sender) = sender else {
                warn!("Dropping response for a closed connection");
                self.outbound.pop_front();
                continue;
            };

            let sendable = cx
                .link(sender)
                .map(|l| l.is_open() && l.credit() > 0)
                .unwrap_or(false);

            if !sendable {
                break;
            }

            if let Some(outbound) = self.outbound.pop_front() {
                let summary = outbound.message.summary();
                let address = outbound.message.address.clone().unwrap_or_default();

                cx.send(sender, outbound.message)?;

                debug!("Sent response {} to address '{}'", summary, address);
            }
        }

        if self.done && self.outbound.is_empty() {
            self.close(cx);
        }

        Ok(())
    }

    fn count_reached(&self) -> bool {
        self.core
            .config()
            .count
            .map(|count| self.processed >= count)
            .unwrap_or(false)
    }
}

impl<P: Processor> Pump for RespondPump<P> {
    fn finish(&mut self) -> Result<()> {
        self.core.finish()
    }
}

impl<P: Processor> PumpHandler for RespondPump<P> {
    fn core(&mut self) -> &mut PumpCore {
        &mut self.core
    }

    fn close(&mut self, cx: &mut Container) {
        if self.core.close(cx) {
            info!("Processed {} {}", self.processed, plural("request", self.processed));
        }
    }
}

impl<P: Processor> Handler for RespondPump<P> {
    fn on_start(&mut self, cx: &mut Container) -> Result<()> {
        if self.count_reached() {
            self.close(cx);
            return Ok(());
        }

        // Credit is granted by hand so a count never takes more requests
        // than it answers
        let receiver_options = ReceiverOptions { prefetch: 0 };

        let sender_options = SenderOptions {
            presettled: self.core.config().presettled,
        };

        for (connection, endpoint) in self.core.connect_all(cx) {
            let receiver = cx.open_receiver(
                connection,
                Terminus::address(&endpoint.address),
                receiver_options.clone(),
            )?;
            self.receivers.push(receiver);

            // Anonymous sender: each response names its own address
            let sender = cx.open_sender(connection, None, sender_options.clone())?;
            self.senders.push((connection, sender));

            self.core.expect_link();
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

        if self.receivers.contains(&link) {
            self.core.top_up(cx, link, self.processed)?;
        }

        Ok(())
    }

    fn on_sendable(&mut self, cx: &mut Container, _link: LinkId) -> Result<()> {
        self.flush(cx)
    }

    fn on_message(
        &mut self,
        cx: &mut Container,
        link: LinkId,
        delivery: DeliveryId,
        message: Message,
    ) -> Result<()> {
        if self.done {
            if cx.is_unsettled(delivery) {
                cx.release(delivery)?;
            }
            return Ok(());
        }

        let connection = cx.link(link).map(|l| l.connection());
        let unsettled = cx.is_unsettled(delivery);

        debug!("Received request {} on {}", message.summary(), link);

        match self.respond(&message) {
            Ok(response) => {
                if let Some(connection) = connection {
                    self.outbound.push_back(Outbound {
                        connection,
                        message: response,
                    });
                }

                if unsettled {
                    cx.accept(delivery)?;
                }
            }
            Err(e) => {
                warn!("Processing request {} failed: {}", message.summary(), e);

                if unsettled {
                    cx.reject(delivery)?;
                }
            }
        }

        self.processed += 1;

        if self.count_reached() {
            self.done = true;
        } else {
            self.core.top_up(cx, link, self.processed)?;
        }

        self.flush(cx)
    }

    fn auto_accept(&self) -> bool {
        false
    }

    fn on_settled(
        &mut self,
        cx: &mut Container,
        link: LinkId,
        delivery: DeliveryId,
        outcome: Outcome,
    ) -> Result<()> {
        self.core.log_settled(cx, link, delivery, outcome);
        Ok(())
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
