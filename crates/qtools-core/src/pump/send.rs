//! Send mode: input lines become messages

use qtools_transport::{Container, Handler, SenderOptions};
use qtools_types::{ClientConfig, ConnectionId, DeliveryId, LinkId, Message, Outcome, Result};
use tracing::{debug, info};

use super::{plural, Pump, PumpCore, PumpHandler};
use crate::bridge::{Line, LineQueue, ReadyLatch, INPUT_EVENT};

/// Sends one message per input line, then closes once every message is
/// settled (or at once, for presettled sends)
pub struct SendPump {
    core: PumpCore,
    input: LineQueue,
    senders: Vec<LinkId>,
    next_sender: usize,
    sent: u64,
    settled: u64,
    done_sending: bool,
}

impl SendPump {
    /// `input` and `ready` are shared with the input reader
    pub fn new(config: ClientConfig, input: LineQueue, ready: ReadyLatch) -> Self {
        Self {
            core: PumpCore::new(config, ready, None),
            input,
            senders: Vec::new(),
            next_sender: 0,
            sent: 0,
            settled: 0,
            done_sending: false,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn settled(&self) -> u64 {
        self.settled
    }

    fn pump(&mut self, cx: &mut Container) -> Result<()> {
        while self.try_send_next(cx)? {}
        Ok(())
    }

    /// Send at most one message. Returns true if another attempt may make
    /// progress.
    fn try_send_next(&mut self, cx: &mut Container) -> Result<bool> {
        if self.done_sending || self.core.is_closed() {
            return Ok(false);
        }

        if !self.core.is_ready() {
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

                if self.core.config().presettled || self.sent == self.settled {
                    self.close(cx);
                }

                return Ok(false);
            }
            Line::Text(text) => text,
        };

        let link = self.senders[index];
        self.next_sender = (index + 1) % self.senders.len();

        let message = Message::from_line(&text)?;
        let summary = message.summary();
        let delivery = cx.send(link, message)?;

        self.sent += 1;

        match delivery {
            Some(delivery) => debug!("Sent {} as {} on {}", summary, delivery, link),
            None => debug!("Sent {} presettled on {}", summary, link),
        }

        Ok(true)
    }

    /// Next sender with credit, round robin from the last one used
    fn next_sendable(&self, cx: &Container) -> Option<usize> {
        let count = self.senders.len();

        (0..count)
            .map(|offset| (self.next_sender + offset) % count)
            .find(|&index| {
                cx.link(self.senders[index])
                    .map(|l| l.is_open() && l.credit() > 0)
                    .unwrap_or(false)
            })
    }
}

impl Pump for SendPump {
    fn finish(&mut self) -> Result<()> {
        self.core.finish()
    }
}

impl PumpHandler for SendPump {
    fn core(&mut self) -> &mut PumpCore {
        &mut self.core
    }

    fn close(&mut self, cx: &mut Container) {
        if self.core.close(cx) {
            info!("Sent {} {}", self.sent, plural("message", self.sent));
        }
    }
}

impl Handler for SendPump {
    fn on_start(&mut self, cx: &mut Container) -> Result<()> {
        let options = SenderOptions {
            presettled: self.core.config().presettled,
        };

        for (connection, endpoint) in self.core.connect_all(cx) {
            let link = cx.open_sender(connection, Some(endpoint.address.as_str()), options.clone())?;
            self.senders.push(link);
            self.core.expect_link();
        }

        Ok(())
    }

    fn on_connection_opened(&mut self, cx: &mut Container, connection: ConnectionId) -> Result<()> {
        debug!("Connected to {}", cx.connection_summary(connection));
        Ok(())
    }

    fn on_link_opened(&mut self, cx: &mut Container, link: LinkId) -> Result<()> {
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

    fn on_settled(
        &mut self,
        cx: &mut Container,
        link: LinkId,
        delivery: DeliveryId,
        outcome: Outcome,
    ) -> Result<()> {
        self.settled += 1;
        self.core.log_settled(cx, link, delivery, outcome);

        if self.done_sending && self.sent == self.settled {
            self.close(cx);
        }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::tests::client_config;

    #[test]
    fn test_not_ready_before_links_open() {
        let input = LineQueue::new();
        input.push(Line::Text("a".to_string()));

        let mut pump = SendPump::new(client_config(5672, &["q0"]), input.clone(), ReadyLatch::new());
        let mut cx = Container::new("test");

        assert!(!pump.try_send_next(&mut cx).unwrap());
        assert_eq!(input.len(), 1);
        assert_eq!(pump.sent(), 0);
    }

    #[test]
    fn test_no_sends_after_done() {
        let input = LineQueue::new();
        let mut pump = SendPump::new(client_config(5672, &["q0"]), input.clone(), ReadyLatch::new());
        let mut cx = Container::new("test");

        pump.done_sending = true;
        input.push(Line::Text("late".to_string()));

        assert!(!pump.try_send_next(&mut cx).unwrap());
        assert_eq!(input.len(), 1);
    }
}
