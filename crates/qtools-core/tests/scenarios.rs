//! End-to-end runs of the broker and the client pumps over loopback TCP

use std::io::{Cursor, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use qtools_core::{
    run_pump, Broker, ConnectProbe, InputReader, LineQueue, OutputWriter, Pump, ReadyLatch,
    ReceivePump, RequestPump, RespondPump, SendPump, TextTransform,
};
use qtools_transport::{Container, Frame, Injector};
use qtools_types::{
    BrokerConfig, ClientConfig, ConnectConfig, Endpoint, Error, Message, Outcome, Role, Scheme,
    Server, Terminus, TransformConfig,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct TestBroker {
    port: u16,
    injector: Injector,
    task: JoinHandle<(qtools_types::Result<()>, Broker)>,
}

impl TestBroker {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let container = Container::new("broker");
        let injector = container.injector();
        let mut broker = Broker::with_listener(BrokerConfig::default(), listener);

        let task = tokio::spawn(async move {
            let result = container.run(&mut broker).await;
            (result, broker)
        });

        Self {
            port,
            injector,
            task,
        }
    }

    /// Interrupt the broker and hand it back for inspection
    async fn stop(self) -> Broker {
        assert!(self.injector.interrupt());

        let (result, broker) = timeout(TIMEOUT, self.task).await.unwrap().unwrap();
        result.unwrap();

        broker
    }
}

/// A bare peer speaking frames directly, for driving the broker through
/// settlements and departures the tools never produce
struct RawPeer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl RawPeer {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (reader, writer) = stream.into_split();

        let mut peer = Self {
            lines: BufReader::new(reader).lines(),
            writer,
        };

        peer.send(Frame::Open {
            container_id: "raw".to_string(),
            user: None,
        })
        .await;

        peer
    }

    async fn send(&mut self, frame: Frame) {
        let line = frame.encode().unwrap() + "\n";
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Skip frames until one matches
    async fn expect(&mut self, wanted: impl Fn(&Frame) -> bool) -> Frame {
        loop {
            let line = timeout(TIMEOUT, self.lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .expect("broker ended the connection");

            let frame = Frame::decode(&line).unwrap();

            if wanted(&frame) {
                return frame;
            }
        }
    }

    /// Attach a receiving link from `source` and wait for the broker's
    /// answer. Returns the source address the broker assigned.
    async fn attach_receiver(&mut self, handle: u64, source: Terminus) -> String {
        self.send(Frame::Attach {
            handle,
            name: format!("raw-{}", handle),
            role: Role::Receiver,
            source,
            target: Terminus::none(),
            settled: false,
        })
        .await;

        match self.expect(|f| matches!(f, Frame::Attach { .. })).await {
            Frame::Attach { source, .. } => source.address.unwrap_or_default(),
            _ => unreachable!(),
        }
    }

    /// Attach a receiver on `address` with `credit` granted
    async fn consume(&mut self, handle: u64, address: &str, credit: u32) {
        self.attach_receiver(handle, Terminus::address(address)).await;
        self.send(Frame::Flow { handle, credit }).await;
    }

    /// Wait for the next transfer; returns its delivery id and body
    async fn next_transfer(&mut self) -> (u64, String) {
        match self.expect(|f| matches!(f, Frame::Transfer { .. })).await {
            Frame::Transfer {
                delivery_id,
                message,
                ..
            } => (delivery_id, message.body_str().to_string()),
            _ => unreachable!(),
        }
    }

    async fn settle(&mut self, delivery_id: u64, outcome: Outcome) {
        self.send(Frame::Disposition {
            delivery_id,
            outcome,
        })
        .await;
    }

    async fn detach(&mut self, handle: u64) {
        self.send(Frame::Detach { handle }).await;
        self.expect(|f| matches!(f, Frame::Detach { .. })).await;
    }

    async fn close(mut self) {
        self.send(Frame::Close { error: None }).await;
        self.expect(|f| matches!(f, Frame::Close { .. })).await;
    }
}

fn client_config(port: u16, address: &str) -> ClientConfig {
    client_config_urls(port, &[address])
}

fn client_config_urls(port: u16, urls: &[&str]) -> ClientConfig {
    let connect = ConnectConfig {
        server: Server {
            host: "127.0.0.1".to_string(),
            port,
        },
        ..Default::default()
    };

    let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();

    let mut config = ClientConfig::new(connect, &urls).unwrap();
    config.prefix = false;
    config
}

async fn run_send(config: ClientConfig, input: &str) -> SendPump {
    let container = Container::new("sender");
    let lines = LineQueue::new();
    let ready = ReadyLatch::new();

    InputReader::spawn(
        Box::new(Cursor::new(input.to_string())),
        lines.clone(),
        ready.clone(),
        container.injector(),
    )
    .unwrap();

    let mut pump = SendPump::new(config, lines, ready);
    timeout(TIMEOUT, container.run(&mut pump))
        .await
        .unwrap()
        .unwrap();

    pump
}

/// Run a requester over `input`; returns its output and the finished pump
async fn run_request(config: ClientConfig, input: &str) -> (String, RequestPump) {
    let container = Container::new("requester");
    let lines = LineQueue::new();
    let ready = ReadyLatch::new();
    let buffer = SharedBuffer::default();

    InputReader::spawn(
        Box::new(Cursor::new(input.to_string())),
        lines.clone(),
        ready.clone(),
        container.injector(),
    )
    .unwrap();

    let output = OutputWriter::spawn(Box::new(buffer.clone())).unwrap();
    let mut pump = RequestPump::new(config, lines, ready, output);

    timeout(TIMEOUT, run_pump(container, &mut pump))
        .await
        .unwrap()
        .unwrap();

    (buffer.contents(), pump)
}

fn spawn_responder(config: ClientConfig, transform: TransformConfig) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut pump = RespondPump::new(config, TextTransform::new(transform));
        run_pump(Container::new("responder"), &mut pump).await.unwrap();
        pump.processed()
    })
}

async fn send(port: u16, address: &str, input: &str) -> (u64, u64) {
    let mut pump = run_send(client_config(port, address), input).await;
    pump.finish().unwrap();
    (pump.sent(), pump.settled())
}

async fn receive(port: u16, address: &str, count: u64) -> String {
    let mut config = client_config(port, address);
    config.count = Some(count);

    let buffer = SharedBuffer::default();
    let output = OutputWriter::spawn(Box::new(buffer.clone())).unwrap();
    let mut pump = ReceivePump::new(config, output);

    timeout(TIMEOUT, Container::new("receiver").run(&mut pump))
        .await
        .unwrap()
        .unwrap();

    pump.finish().unwrap();
    assert_eq!(pump.received(), count);

    buffer.contents()
}

#[tokio::test]
async fn test_send_then_receive_one() {
    let broker = TestBroker::start();

    assert_eq!(send(broker.port, "q1", "abc123\n").await, (1, 1));
    assert_eq!(receive(broker.port, "q1", 1).await, "abc123\n");

    broker.stop().await;
}

#[tokio::test]
async fn test_request_response_transform() {
    let broker = TestBroker::start();

    let mut respond_config = client_config(broker.port, "q1");
    respond_config.count = Some(1);

    let responder = spawn_responder(
        respond_config,
        TransformConfig {
            upper: true,
            reverse: true,
            append: Some(" and this".to_string()),
        },
    );

    let (output, pump) = run_request(client_config(broker.port, "q1"), "abc123\n").await;

    assert_eq!(output, "321CBA and this\n");
    assert_eq!((pump.sent(), pump.received()), (1, 1));
    assert_eq!(timeout(TIMEOUT, responder).await.unwrap().unwrap(), 1);

    // The requester's dynamic reply queue went with it
    let broker = broker.stop().await;
    let addresses: Vec<&str> = broker.registry().addresses().collect();
    assert_eq!(addresses, ["q1"]);
}

#[tokio::test]
async fn test_every_request_answered_with_small_pending_table() {
    let broker = TestBroker::start();

    let mut respond_config = client_config(broker.port, "q1");
    respond_config.count = Some(5);

    let responder = spawn_responder(
        respond_config,
        TransformConfig {
            upper: true,
            ..Default::default()
        },
    );

    let mut config = client_config(broker.port, "q1");
    config.max_pending = 2;

    let input: String = (0..5).map(|i| format!("request-{}\n", i)).collect();
    let (output, pump) = run_request(config, &input).await;

    let expected: String = (0..5).map(|i| format!("REQUEST-{}\n", i)).collect();
    assert_eq!(output, expected);
    assert_eq!((pump.sent(), pump.received()), (5, 5));
    assert_eq!(timeout(TIMEOUT, responder).await.unwrap().unwrap(), 5);

    broker.stop().await;
}

#[tokio::test]
async fn test_responder_takes_only_its_count() {
    let broker = TestBroker::start();

    let requests: String = (0..3)
        .map(|i| format!(r#"{{"reply_to":"replies","body":"r{}"}}"#, i) + "\n")
        .collect();
    assert_eq!(send(broker.port, "q1", &requests).await, (3, 3));

    let mut config = client_config(broker.port, "q1");
    config.count = Some(1);

    let responder = spawn_responder(config, TransformConfig::default());
    assert_eq!(timeout(TIMEOUT, responder).await.unwrap().unwrap(), 1);

    assert_eq!(receive(broker.port, "q1", 2).await, "r1\nr2\n");
    assert_eq!(receive(broker.port, "replies", 1).await, "r0\n");

    let broker = broker.stop().await;
    assert_eq!(broker.in_flight(), 0);
}

#[tokio::test]
async fn test_released_message_returns_to_head_of_queue() {
    let broker = TestBroker::start();
    assert_eq!(send(broker.port, "q1", "m0\nm1\nm2\n").await, (3, 3));

    let mut peer = RawPeer::connect(broker.port).await;
    peer.consume(1, "q1", 2).await;

    let (first, body) = peer.next_transfer().await;
    assert_eq!(body, "m0");
    let (second, body) = peer.next_transfer().await;
    assert_eq!(body, "m1");

    peer.settle(first, Outcome::Released).await;
    peer.settle(second, Outcome::Accepted).await;
    peer.close().await;

    assert_eq!(receive(broker.port, "q1", 2).await, "m0\nm2\n");

    let broker = broker.stop().await;
    assert_eq!(broker.in_flight(), 0);
}

/// How a consumer holding an unsettled message goes away
enum Departure {
    Detach,
    Close,
    Disconnect,
}

async fn unsettled_message_survives(departure: Departure) {
    let broker = TestBroker::start();
    assert_eq!(send(broker.port, "q1", "kept\n").await, (1, 1));

    let mut peer = RawPeer::connect(broker.port).await;
    peer.consume(1, "q1", 1).await;
    assert_eq!(peer.next_transfer().await.1, "kept");

    match departure {
        Departure::Detach => {
            peer.detach(1).await;
            peer.close().await;
        }
        Departure::Close => peer.close().await,
        Departure::Disconnect => drop(peer),
    }

    // The queue outlives its consumer and hands the message to the next one
    assert_eq!(receive(broker.port, "q1", 1).await, "kept\n");

    let broker = broker.stop().await;
    let queue = broker.registry().get("q1").unwrap();
    assert!(queue.consumers().is_empty());
    assert!(queue.is_empty());
    assert_eq!(broker.in_flight(), 0);
}

#[tokio::test]
async fn test_unsettled_message_returned_on_detach() {
    unsettled_message_survives(Departure::Detach).await;
}

#[tokio::test]
async fn test_unsettled_message_returned_on_close() {
    unsettled_message_survives(Departure::Close).await;
}

#[tokio::test]
async fn test_unsettled_message_returned_on_disconnect() {
    unsettled_message_survives(Departure::Disconnect).await;
}

#[tokio::test]
async fn test_consumers_served_in_turn() {
    let broker = TestBroker::start();

    let mut first = RawPeer::connect(broker.port).await;
    first.consume(1, "q7", 10).await;

    let mut second = RawPeer::connect(broker.port).await;
    second.consume(1, "q7", 10).await;

    assert_eq!(send(broker.port, "q7", "m0\nm1\nm2\nm3\n").await, (4, 4));

    let mut bodies = Vec::new();

    for peer in [&mut first, &mut second] {
        let mut got = Vec::new();

        for _ in 0..2 {
            let (delivery, body) = peer.next_transfer().await;
            peer.settle(delivery, Outcome::Accepted).await;
            got.push(body);
        }

        bodies.push(got);
    }

    assert_eq!(bodies, [["m0", "m2"], ["m1", "m3"]]);

    first.close().await;
    second.close().await;

    let broker = broker.stop().await;
    assert_eq!(broker.in_flight(), 0);
    assert!(broker.registry().get("q7").unwrap().is_empty());
}

#[tokio::test]
async fn test_idle_dynamic_queue_reclaimed() {
    let broker = TestBroker::start();

    let mut peer = RawPeer::connect(broker.port).await;
    let address = peer.attach_receiver(1, Terminus::dynamic()).await;
    assert!(!address.is_empty());

    peer.detach(1).await;
    peer.close().await;

    // A late message for the reclaimed address is refused, not stored
    let mut pump = run_send(client_config(broker.port, &address), "late\n").await;
    pump.finish().unwrap();
    assert_eq!((pump.sent(), pump.settled()), (1, 1));

    let broker = broker.stop().await;
    assert!(broker.registry().get(&address).is_none());
    assert!(broker.registry().is_retired(&address));
}

#[tokio::test]
async fn test_unaddressed_presettled_message_keeps_broker_running() {
    let broker = TestBroker::start();

    let mut peer = RawPeer::connect(broker.port).await;
    peer.send(Frame::Attach {
        handle: 1,
        name: "raw-sender".to_string(),
        role: Role::Sender,
        source: Terminus::none(),
        target: Terminus::none(),
        settled: true,
    })
    .await;
    peer.send(Frame::Transfer {
        handle: 1,
        delivery_id: 1,
        settled: true,
        message: Message::new("nowhere"),
    })
    .await;
    peer.close().await;

    assert_eq!(send(broker.port, "q1", "after\n").await, (1, 1));
    assert_eq!(receive(broker.port, "q1", 1).await, "after\n");

    let broker = broker.stop().await;
    assert_eq!(broker.registry().len(), 1);
}

#[tokio::test]
async fn test_ten_messages_in_order() {
    let broker = TestBroker::start();

    let input: String = (0..10).map(|i| format!("message-{}\n", i)).collect();

    assert_eq!(send(broker.port, "q1", &input).await, (10, 10));
    assert_eq!(receive(broker.port, "q1", 10).await, input);

    broker.stop().await;
}

#[tokio::test]
async fn test_presettled_send_skips_settlement() {
    let broker = TestBroker::start();

    let mut config = client_config(broker.port, "q1");
    config.presettled = true;

    let mut pump = run_send(config, "abc123\n").await;
    pump.finish().unwrap();

    assert_eq!(pump.sent(), 1);
    assert_eq!(pump.settled(), 0);
    assert_eq!(receive(broker.port, "q1", 1).await, "abc123\n");

    broker.stop().await;
}

#[tokio::test]
async fn test_json_records_keep_fields() {
    let broker = TestBroker::start();

    let record = r#"{"id":"m1","subject":"greeting","properties":{"k":"v"},"body":"hi"}"#;
    send(broker.port, "q2", &format!("{}\n", record)).await;

    let mut config = client_config(broker.port, "q2");
    config.count = Some(1);
    config.json = true;

    let buffer = SharedBuffer::default();
    let output = OutputWriter::spawn(Box::new(buffer.clone())).unwrap();
    let mut pump = ReceivePump::new(config, output);

    timeout(TIMEOUT, Container::new("receiver").run(&mut pump))
        .await
        .unwrap()
        .unwrap();
    pump.finish().unwrap();

    assert_eq!(
        buffer.contents(),
        r#"{"id":"m1","properties":{"k":"v"},"subject":"greeting","body":"hi"}"#.to_string() + "\n"
    );

    broker.stop().await;
}

#[tokio::test]
async fn test_client_ready_file() {
    let broker = TestBroker::start();
    let tmp = tempfile::tempdir().unwrap();
    let ready_file = tmp.path().join("ready");

    let mut config = client_config(broker.port, "q1");
    config.connect.ready_file = Some(ready_file.clone());

    let mut pump = run_send(config, "").await;
    pump.finish().unwrap();

    assert_eq!(pump.sent(), 0);
    assert_eq!(std::fs::read_to_string(&ready_file).unwrap(), "ready\n");

    broker.stop().await;
}

#[tokio::test]
async fn test_interrupt_stops_receiver() {
    let broker = TestBroker::start();

    let output = OutputWriter::spawn(Box::new(std::io::sink())).unwrap();
    let mut pump = ReceivePump::new(client_config(broker.port, "idle"), output);

    let container = Container::new("receiver");
    let injector = container.injector();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        injector.interrupt();
    });

    timeout(TIMEOUT, container.run(&mut pump))
        .await
        .unwrap()
        .unwrap();
    pump.finish().unwrap();

    assert_eq!(pump.received(), 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_refused_connection_is_reported() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut pump = run_send(client_config(port, "q1"), "lost\n").await;

    assert!(matches!(pump.finish(), Err(Error::Transport(_))));
    assert_eq!(pump.sent(), 0);
}

#[tokio::test]
async fn test_connect_probe_reports_peer() {
    let broker = TestBroker::start();

    let endpoint = Endpoint {
        scheme: Scheme::Amqp,
        host: "127.0.0.1".to_string(),
        port: broker.port,
        address: String::new(),
    };

    let mut probe = ConnectProbe::new(vec![endpoint], None);

    timeout(TIMEOUT, Container::new("probe").run(&mut probe))
        .await
        .unwrap()
        .unwrap();
    probe.finish().unwrap();

    assert_eq!(probe.connected(), ["broker".to_string()]);

    broker.stop().await;
}
