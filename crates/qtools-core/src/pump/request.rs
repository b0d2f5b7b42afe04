//! Request mode: input lines become requests, responses become output

use qtools_transport::{Container, Handler, ReceiverOptions, SenderOptions};
use qtools_types::{
    ClientConfig, ConnectionId, DeliveryId, Error, LinkId, Message, MessageId, Outcome, Result,
    Terminus,
};
use tracing::{debug, info};

use super::receive::format_message;
use super::{plural, Pump, PumpCore, PumpHandler};
use crate::bridge::{Line, LineQueue, OutputWriter, ReadyLatch, INPUT_EVENT};
use crate::correlation::PendingRequests;

/// Sender and reply receiver on one connection
#[derive(Debug)]
struct Channel {
    address: String,
    sender: LinkId,
    receiver: LinkId,
    reply_to: Option<String>,
}

/// Sends one request per input line and writes each response. Closes once
/// input is exhausted and every request has been answered.
pub struct RequestPump {
    core: PumpCore,
    input: LineQueue,
    channels: Vec<Channel>,
    next_channel: usize,
    pending: PendingRequests,
    sent: u64,
    received: u64,
    done_sending: bool,
}

impl RequestPump {
    pub fn new(config: ClientConfig, input: LineQueue, ready: ReadyLatch, output: OutputWriter) -> Self {
        let pending = PendingRequests::with_capacity(config.max_pending);

        Self {
            core: PumpCore::new(config, ready, Some(output)),
            input,
            channels: Vec::new(),
            next_channel: 0,
            pending,
            sent: 0,
            received: 0,
            done_sending: false,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    fn pump(&mut self, cx: &mut Container) -> Result<()> {
        while self.try_send_next(cx)? {}
        Ok(())
    }

    fn try_send_next(&mut self, cx: &mut Container) -> Result<bool> {
        if self.done_sending || self.core.is_closed() {
            return Ok(false);
        }

        if !self.core.is_ready() {
            return Ok(false);
        }

        // Wait for responses before growing the table further
        if self.pending.is_full() {
            return Ok(false);
        }

        let Some(index) = self.next_sendable(cx) else {
            return Ok(false);
        };

        let Some(line) = self.input.pop() else {
            return Ok(false);
        };

        let text = match line {
            Line::Done => {
                self.done_sending = true;

                if self.sent == self.received {
                    self.close(cx);
                }

                return Ok(false);
            }
            Line::Text(text) => text,
        };

        self.next_channel = (index + 1) % self.channels.len();
        let channel = &self.channels[index];

        let reply_to = channel
            .reply_to
            .clone()
            .ok_or_else(|| Error::Protocol("No reply address was assigned".to_string()))?;

        let mut message = Message::from_line(&text)?;
        let id = message.id.get_or_insert_with(MessageId::generate).clone();
        message.reply_to = Some(reply_to);

        if message.address.is_none() {
            message.address = Some(channel.address.clone());
        }

        let summary = message.summary();
        let sender = channel.sender;

        self.pending.insert(id)?;
        let delivery = cx.send(sender, message)?;
        self.sent += 1;

        match delivery {
            Some(delivery) => debug!("Sent request {} as {} on {}", summary, delivery, sender),
            None => debug!("Sent request {} presettled on {}", summary, sender),
        }

        Ok(true)
    }

    fn next_sendable(&self, cx: &Container) -> Option<usize> {
        let count = self.channels.len();

        (0..count)
            .map(|offset| (self.next_channel + offset) % count)
            .find(|&index| {
                cx.link(self.channels[index].sender)
                    .map(|l| l.is_open() && l.credit() > 0)
                    .unwrap_or(false)
            })
    }
}

impl Pump for RequestPump {
    fn finish(&mut self) -> Result<()> {
        self.core.finish()
    }
}

impl PumpHandler for RequestPump {
    fn core(&mut self) -> &mut PumpCore {
        &mut self.core
    }

    fn close(&mut self, cx: &mut Container) {
        if self.core.close(cx) {
            info!(
                "Sent {} {} and received {} {}",
                self.sent,
                plural("request", self.sent),
                self.received,
                plural("response", self.received)
            );
        }
    }
}

impl Handler for RequestPump {
    fn on_start(&mut self, cx: &mut Container) -> Result<()> {
        let sender_options = SenderOptions {
            presettled: self.core.config().presettled,
        };

        let receiver_options = ReceiverOptions {
            prefetch: self.core.config().prefetch,
        };

        for (connection, endpoint) in self.core.connect_all(cx) {
            let sender = cx.open_sender(connection, Some(endpoint.address.as_str()), sender_options.clone())?;
            let receiver = cx.open_receiver(connection, Terminus::dynamic(), receiver_options.clone())?;

            self.channels.push(Channel {
                address: endpoint.address,
                sender,
                receiver,
                reply_to: None,
            });

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
        if let Some(channel) = self.channels.iter_mut().find(|c| c.receiver == link) {
            channel.reply_to = cx.link(link).and_then(|l| l.remote_source().address.clone());
        }

        if self.core.link_opened(cx, link)? {
            self.pump(cx)?;
        }

        Ok(())
    }

    fn on_sendable(&mut self, cx: &mut Container, _link: LinkId) -> Result<()> {
        self.pump(cx)
    }

    fn on_application(&mut self, cx: &mut Container, name: &str) -> Result<()> {
        if name == INPUT_EVENT {
            self.pump(cx)?;
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
        let correlation_id = message
            .correlation_id
            .clone()
            .ok_or_else(|| Error::UnknownCorrelation("<none>".to_string()))?;

        self.pending.remove(&correlation_id)?;
        self.received += 1;

        if cx.is_unsettled(delivery) {
            cx.accept(delivery)?;
        }

        let channel = self.channels.iter().find(|c| c.receiver == link);
        let address = channel.map(|c| c.address.as_str()).unwrap_or_default();

        debug!("Received response {} for request {}", message.summary(), correlation_id);

        for line in format_message(&message, address, self.core.config())? {
            self.core.write_line(line);
        }

        if self.done_sending && self.sent == self.received {
            self.close(cx);
            return Ok(());
        }

        self.pump(cx)
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
