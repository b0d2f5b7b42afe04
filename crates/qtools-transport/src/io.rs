//! Socket tasks
//!
//! Each connection gets a reader task that turns lines into frame events
//! and a writer task that drains the connection's outbound frame channel.
//! Neither touches reactor state.

use qtools_types::ConnectionId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use crate::event::Event;
use crate::frame::Frame;

/// Connect to `addr`, then run the connection. Frames queued before the
/// socket is up are written once it is.
pub(crate) fn spawn_connect(
    connection: ConnectionId,
    addr: String,
    frames: UnboundedReceiver<Frame>,
    events: UnboundedSender<Event>,
) {
    tokio::spawn(async move {
        match TcpStream::connect(&addr).await {
            Ok(stream) => run_stream(connection, stream, frames, events).await,
            Err(e) => {
                let _ = events.send(Event::TransportError {
                    connection,
                    error: format!("Connection to {} failed: {}", addr, e),
                });
                let _ = events.send(Event::Disconnected { connection });
            }
        }
    });
}

/// Run an already established connection
pub(crate) fn spawn_stream(
    connection: ConnectionId,
    stream: TcpStream,
    frames: UnboundedReceiver<Frame>,
    events: UnboundedSender<Event>,
) {
    tokio::spawn(run_stream(connection, stream, frames, events));
}

async fn run_stream(
    connection: ConnectionId,
    stream: TcpStream,
    frames: UnboundedReceiver<Frame>,
    events: UnboundedSender<Event>,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();

    tokio::spawn(read_frames(connection, read_half, events.clone()));

    if let Err(e) = write_frames(write_half, frames).await {
        let _ = events.send(Event::TransportError {
            connection,
            error: format!("Write failed: {}", e),
        });
    }
}

async fn read_frames(
    connection: ConnectionId,
    read_half: OwnedReadHalf,
    events: UnboundedSender<Event>,
) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }

                match Frame::decode(&line) {
                    Ok(frame) => {
                        trace!(connection = %connection, frame = frame.kind(), "Frame received");

                        if events.send(Event::Frame { connection, frame }).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = events.send(Event::TransportError {
                            connection,
                            error: e.to_string(),
                        });
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = events.send(Event::TransportError {
                    connection,
                    error: format!("Read failed: {}", e),
                });
                break;
            }
        }
    }

    debug!(connection = %connection, "Connection reader finished");

    let _ = events.send(Event::Disconnected { connection });
}

/// Write frames until a close frame is written or the channel is dropped
async fn write_frames(
    mut write_half: OwnedWriteHalf,
    mut frames: UnboundedReceiver<Frame>,
) -> std::io::Result<()> {
    while let Some(frame) = frames.recv().await {
        let closing = matches!(frame, Frame::Close { .. });

        let mut line = frame
            .encode()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        line.push('\n');

        write_half.write_all(line.as_bytes()).await?;

        if closing {
            break;
        }
    }

    write_half.shutdown().await
}
