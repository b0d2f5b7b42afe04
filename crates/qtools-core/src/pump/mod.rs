//! Message pumps
//!
//! A pump is the reactor handler of one client tool. All four share
//! [`PumpCore`]: the connections, the readiness count, the output writer
//! and the idempotent close path.

mod receive;
mod request;
mod respond;
mod send;

pub use receive::ReceivePump;
pub use request::RequestPump;
pub use respond::{Processor, RespondPump, TextTransform};
pub use send::SendPump;

use qtools_transport::{ConnectOptions, Container, Handler};
use qtools_types::{
    ClientConfig, ConnectionId, DeliveryId, Endpoint, Error, LinkId, Outcome, Result, TerminusKind,
};
use tracing::{debug, info, warn};

use crate::bridge::{OutputWriter, ReadyLatch};

/// A reactor handler with I/O to wind down once the reactor stops
pub trait Pump: Handler {
    /// Wait for I/O threads and report connection faults
    fn finish(&mut self) -> Result<()>;
}

/// Run `pump` to completion. The pump is finished even when the reactor
/// fails, so queued output is written; the reactor's error wins.
pub async fn run_pump<P: Pump>(container: Container, pump: &mut P) -> Result<()> {
    let run = container.run(pump).await;
    let finish = pump.finish();

    run.and(finish)
}

/// State every pump carries
pub struct PumpCore {
    config: ClientConfig,
    connections: Vec<ConnectionId>,
    expected_links: usize,
    opened_links: usize,
    ready: ReadyLatch,
    output: Option<OutputWriter>,
    failure: Option<String>,
    closed: bool,
}

impl PumpCore {
    pub fn new(config: ClientConfig, ready: ReadyLatch, output: Option<OutputWriter>) -> Self {
        Self {
            config,
            connections: Vec::new(),
            expected_links: 0,
            opened_links: 0,
            ready,
            output,
            failure: None,
            closed: false,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open one connection per endpoint, in URL order
    pub(crate) fn connect_all(&mut self, cx: &mut Container) -> Vec<(ConnectionId, Endpoint)> {
        let options = ConnectOptions {
            user: self.config.connect.user.clone(),
        };

        let endpoints = self.config.endpoints.clone();

        endpoints
            .into_iter()
            .map(|endpoint| {
                let connection = cx.connect(&endpoint, options.clone());
                self.connections.push(connection);
                (connection, endpoint)
            })
            .collect()
    }

    /// Count a link that must open before the pump is ready
    pub(crate) fn expect_link(&mut self) {
        self.expected_links += 1;
    }

    /// Record an opened link. Returns true exactly once, when the last
    /// expected link opens; the ready file is written and the input
    /// reader released at that point.
    pub(crate) fn link_opened(&mut self, cx: &Container, link: LinkId) -> Result<bool> {
        if let Some(l) = cx.link(link) {
            let summary = cx.connection_summary(l.connection());

            if l.is_receiver() {
                info!(
                    "Created receiver for {} on {}",
                    l.remote_source().summary(TerminusKind::Source),
                    summary
                );
            } else if l.target().address.is_some() {
                info!(
                    "Created sender for {} on {}",
                    l.target().summary(TerminusKind::Target),
                    summary
                );
            }
        }

        self.opened_links += 1;

        if self.opened_links != self.expected_links {
            return Ok(false);
        }

        if let Some(path) = &self.config.connect.ready_file {
            std::fs::write(path, "ready\n")?;
        }

        self.ready.open();

        Ok(true)
    }

    /// Credit a receiver should hold after `handled` messages: the
    /// prefetch window, cut down to the messages a count still wants
    pub(crate) fn credit_window(&self, handled: u64) -> u32 {
        let prefetch = self.config.prefetch.max(1);

        match self.config.count {
            Some(count) => {
                let remaining = count.saturating_sub(handled);
                prefetch.min(u32::try_from(remaining).unwrap_or(u32::MAX))
            }
            None => prefetch,
        }
    }

    /// Grant `link` enough credit to reach its window
    pub(crate) fn top_up(&self, cx: &mut Container, link: LinkId, handled: u64) -> Result<()> {
        let Some(credit) = cx.link(link).map(|l| l.credit()) else {
            return Ok(());
        };

        let window = self.credit_window(handled);

        if credit < window {
            cx.flow(link, window - credit)?;
        }

        Ok(())
    }

    /// Every expected link is open
    pub fn is_ready(&self) -> bool {
        self.expected_links > 0 && self.opened_links >= self.expected_links
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn write_line(&self, line: impl Into<String>) {
        if let Some(output) = &self.output {
            output.push_line(line);
        }
    }

    /// Close connections, the injector and the I/O threads. Returns true
    /// the first time only.
    pub(crate) fn close(&mut self, cx: &mut Container) -> bool {
        if self.closed {
            return false;
        }

        self.closed = true;

        for connection in &self.connections {
            cx.close_connection(*connection);
        }

        cx.close_injector();
        self.ready.cancel();

        if let Some(output) = &mut self.output {
            output.stop();
        }

        true
    }

    /// Note a fatal connection fault; it is reported by [`PumpCore::finish`]
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(message.into());
        }
    }

    /// Wait for the output writer, then report any connection fault
    pub fn finish(&mut self) -> Result<()> {
        if let Some(output) = self.output.take() {
            output.join()?;
        }

        match self.failure.take() {
            Some(message) => Err(Error::Transport(message)),
            None => Ok(()),
        }
    }

    /// Log a settlement at the severity its outcome calls for
    pub(crate) fn log_settled(&self, cx: &Container, link: LinkId, delivery: DeliveryId, outcome: Outcome) {
        let container = cx
            .link(link)
            .map(|l| cx.connection_summary(l.connection()))
            .unwrap_or_else(|| link.to_string());

        match outcome {
            Outcome::Accepted => debug!("{} accepted {}", container, delivery),
            Outcome::Rejected => warn!("{} rejected {}", container, delivery),
            Outcome::Released | Outcome::Modified => {
                info!("{} {} {}", container, outcome, delivery)
            }
        }
    }
}

/// `s` unless `count` is one
pub(crate) fn plural(word: &str, count: u64) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}

/// Connection-level callbacks shared by every pump. Each pump's `Handler`
/// impl forwards to these.
pub(crate) trait PumpHandler {
    fn core(&mut self) -> &mut PumpCore;

    /// Close the pump, logging its closing notice once
    fn close(&mut self, cx: &mut Container);

    fn transport_error(&mut self, cx: &mut Container, message: &str) {
        self.core().fail(message);
        self.close(cx);
    }

    fn connection_closing(&mut self, cx: &mut Container, connection: ConnectionId) {
        if !self.core().is_closed() {
            info!("{} closed the connection", cx.connection_summary(connection));
        }

        self.close(cx);
    }

    fn disconnected(&mut self, cx: &mut Container, connection: ConnectionId) {
        if !self.core().is_closed() {
            let message = format!("Lost {}", cx.connection_summary(connection));
            self.core().fail(message);
        }

        self.close(cx);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use qtools_types::{ConnectConfig, Server};

    use super::*;
    use crate::bridge::tests::SharedBuffer;

    /// Client settings for `urls` against a server on `port`
    pub(crate) fn client_config(port: u16, urls: &[&str]) -> ClientConfig {
        let connect = ConnectConfig {
            server: Server {
                host: "127.0.0.1".to_string(),
                port,
            },
            ..Default::default()
        };

        let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();

        ClientConfig::new(connect, &urls).unwrap()
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural("message", 1), "message");
        assert_eq!(plural("message", 0), "messages");
        assert_eq!(plural("request", 3), "requests");
    }

    #[test]
    fn test_ready_after_last_link() {
        let tmp = tempfile::tempdir().unwrap();
        let ready_file = tmp.path().join("ready");

        let mut config = client_config(5672, &["q0"]);
        config.connect.ready_file = Some(ready_file.clone());

        let latch = ReadyLatch::new();
        let mut core = PumpCore::new(config, latch.clone(), None);
        let cx = Container::new("test");

        core.expect_link();
        core.expect_link();

        assert!(!core.is_ready());
        assert!(!core.link_opened(&cx, LinkId(1)).unwrap());
        assert!(!ready_file.exists());

        assert!(core.link_opened(&cx, LinkId(2)).unwrap());
        assert!(core.is_ready());
        assert!(latch.is_ready());
        assert_eq!(std::fs::read_to_string(&ready_file).unwrap(), "ready\n");
    }

    #[test]
    fn test_close_once() {
        let latch = ReadyLatch::new();
        let mut core = PumpCore::new(client_config(5672, &["q0"]), latch.clone(), None);
        let mut cx = Container::new("test");

        assert!(core.close(&mut cx));
        assert!(!core.close(&mut cx));
        assert!(core.is_closed());
        assert!(!latch.wait());
    }

    /// Writes one line, then fails on start
    struct FailingPump {
        core: PumpCore,
    }

    impl Handler for FailingPump {
        fn on_start(&mut self, _cx: &mut Container) -> Result<()> {
            self.core.write_line("written before the fault");
            Err(Error::UnknownCorrelation("r9".to_string()))
        }
    }

    impl Pump for FailingPump {
        fn finish(&mut self) -> Result<()> {
            self.core.finish()
        }
    }

    #[tokio::test]
    async fn test_output_written_when_reactor_fails() {
        let buffer = SharedBuffer::default();
        let output = OutputWriter::spawn(Box::new(buffer.clone())).unwrap();

        let mut pump = FailingPump {
            core: PumpCore::new(client_config(5672, &["q0"]), ReadyLatch::new(), Some(output)),
        };

        let result = run_pump(Container::new("test"), &mut pump).await;

        assert!(matches!(result, Err(Error::UnknownCorrelation(id)) if id == "r9"));
        assert_eq!(buffer.contents(), "written before the fault\n");
    }

    #[test]
    fn test_failure_reported_by_finish() {
        let mut core = PumpCore::new(client_config(5672, &["q0"]), ReadyLatch::new(), None);

        core.fail("first");
        core.fail("second");

        match core.finish() {
            Err(Error::Transport(message)) => assert_eq!(message, "first"),
            other => panic!("unexpected result {:?}", other),
        }

        assert!(core.finish().is_ok());
    }
}
