//! I/O bridge
//!
//! Blocking stream I/O runs on two plain OS threads. The input reader
//! pushes lines into a [`LineQueue`] and wakes the reactor through an
//! [`Injector`]; the output writer drains a second queue fed by the
//! reactor. Neither thread touches reactor state.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use qtools_transport::Injector;
use qtools_types::{Error, Result};
use tracing::{debug, warn};

/// Application event posted whenever input lines arrive
pub const INPUT_EVENT: &str = "input";

/// One entry in a line queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// End of input, or stop for the writer
    Done,
}

/// FIFO of lines shared between the reactor and one I/O thread
#[derive(Debug, Clone, Default)]
pub struct LineQueue {
    inner: Arc<(Mutex<VecDeque<Line>>, Condvar)>,
}

impl LineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: Line) {
        let (lines, available) = &*self.inner;
        lines.lock().push_back(line);
        available.notify_one();
    }

    /// Take the oldest line without blocking
    pub fn pop(&self) -> Option<Line> {
        self.inner.0.lock().pop_front()
    }

    /// Block until at least one line is queued, then take them all
    pub fn wait_drain(&self) -> Vec<Line> {
        let (lines, available) = &*self.inner;
        let mut lines = lines.lock();

        while lines.is_empty() {
            available.wait(&mut lines);
        }

        lines.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.0.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchState {
    Pending,
    Ready,
    Cancelled,
}

/// One-shot gate the input reader parks on until every link is open
#[derive(Debug, Clone)]
pub struct ReadyLatch {
    inner: Arc<(Mutex<LatchState>, Condvar)>,
}

impl Default for ReadyLatch {
    fn default() -> Self {
        Self {
            inner: Arc::new((Mutex::new(LatchState::Pending), Condvar::new())),
        }
    }
}

impl ReadyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release waiters; later calls and cancels are ignored
    pub fn open(&self) {
        self.settle(LatchState::Ready);
    }

    /// Release waiters without readiness
    pub fn cancel(&self) {
        self.settle(LatchState::Cancelled);
    }

    fn settle(&self, state: LatchState) {
        let (current, changed) = &*self.inner;
        let mut current = current.lock();

        if *current == LatchState::Pending {
            *current = state;
            changed.notify_all();
        }
    }

    /// Block until opened or cancelled; true if opened
    pub fn wait(&self) -> bool {
        let (current, changed) = &*self.inner;
        let mut current = current.lock();

        while *current == LatchState::Pending {
            changed.wait(&mut current);
        }

        *current == LatchState::Ready
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.0.lock() == LatchState::Ready
    }
}

/// Thread that feeds input lines to the reactor
pub struct InputReader;

impl InputReader {
    /// Start reading `source` once `ready` opens. Each line is queued on
    /// `lines` followed by an [`INPUT_EVENT`]; end of input queues
    /// [`Line::Done`].
    ///
    /// The thread is detached: a read blocked on a terminal ends with the
    /// process.
    pub fn spawn(
        source: Box<dyn BufRead + Send>,
        lines: LineQueue,
        ready: ReadyLatch,
        injector: Injector,
    ) -> Result<()> {
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());

        thread::Builder::new()
            .name("input".to_string())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    read_lines(source, lines, ready, injector)
                })
            })?;

        Ok(())
    }
}

fn read_lines(mut source: Box<dyn BufRead + Send>, lines: LineQueue, ready: ReadyLatch, injector: Injector) {
    if !ready.wait() {
        debug!("Input reader cancelled before links opened");
        return;
    }

    let mut buf = String::new();

    loop {
        buf.clear();

        match source.read_line(&mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = buf.trim_end_matches(['\n', '\r']).to_string();
                lines.push(Line::Text(line));

                if !injector.trigger(INPUT_EVENT) {
                    return;
                }
            }
            Err(e) => {
                warn!("Input read failed: {}", e);
                break;
            }
        }
    }

    lines.push(Line::Done);
    injector.trigger(INPUT_EVENT);
}

/// Thread that writes lines pushed by the reactor
pub struct OutputWriter {
    lines: LineQueue,
    handle: Option<JoinHandle<std::io::Result<()>>>,
    stopped: bool,
}

impl OutputWriter {
    pub fn spawn(dest: Box<dyn Write + Send>) -> Result<Self> {
        let lines = LineQueue::new();
        let queue = lines.clone();
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());

        let handle = thread::Builder::new()
            .name("output".to_string())
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || write_lines(dest, queue)))?;

        Ok(Self {
            lines,
            handle: Some(handle),
            stopped: false,
        })
    }

    pub fn push_line(&self, line: impl Into<String>) {
        self.lines.push(Line::Text(line.into()));
    }

    /// Queue the stop sentinel; lines pushed before it are still written
    pub fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.lines.push(Line::Done);
        }
    }

    /// Stop and wait for every queued line to be written
    pub fn join(mut self) -> Result<()> {
        self.stop();

        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Internal("Output thread panicked".to_string()))?
                .map_err(Error::from),
            None => Ok(()),
        }
    }
}

impl Drop for OutputWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_lines(mut dest: Box<dyn Write + Send>, lines: LineQueue) -> std::io::Result<()> {
    loop {
        for line in lines.wait_drain() {
            match line {
                Line::Text(text) => {
                    dest.write_all(text.as_bytes())?;
                    dest.write_all(b"\n")?;
                }
                Line::Done => return dest.flush(),
            }
        }

        dest.flush()?;
    }
}
