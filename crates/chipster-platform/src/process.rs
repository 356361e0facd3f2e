use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a drain may take to reach EOF after its process was killed
const DRAIN_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Lines kept in memory per sink
const DEFAULT_SINK_CAPACITY: usize = 2000;

pub type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// What to run and where
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

#[async_trait]
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    fn take_stdout(&mut self) -> Option<OutputReader>;

    fn take_stderr(&mut self) -> Option<OutputReader>;

    /// Non-blocking exit check
    fn try_exit_status(&mut self) -> Result<Option<ExitStatus>>;

    /// Kill the process (no graceful shutdown) and reap it
    async fn terminate(&mut self) -> Result<()>;
}

pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ChildProcess>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: OutputStream,
    pub text: String,
}

/// Shared append-only sink for child process output.
///
/// Each line is appended whole under the lock, so concurrent stdout and
/// stderr readers never interleave inside a line. Only the most recent
/// lines are retained in memory; every line is also emitted via `tracing`.
#[derive(Clone)]
pub struct LogSink {
    source: Arc<str>,
    lines: Arc<Mutex<VecDeque<LogLine>>>,
    capacity: usize,
}

impl LogSink {
    pub fn new(source: &str) -> Self {
        Self::with_capacity(source, DEFAULT_SINK_CAPACITY)
    }

    pub fn with_capacity(source: &str, capacity: usize) -> Self {
        Self {
            source: Arc::from(source),
            lines: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn append(&self, stream: OutputStream, text: String) {
        info!(source = %self.source, %stream, "{}", text);
        let mut lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(LogLine { stream, text });
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        let lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.iter().cloned().collect()
    }
}

/// Forward `reader` into `sink` line by line until EOF.
///
/// Bytes are decoded lossily so a non-UTF-8 line never stops the drain;
/// a stalled drain would let the child block on a full pipe.
pub fn spawn_line_drain(
    reader: OutputReader,
    stream: OutputStream,
    sink: LogSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let text = text.trim_end_matches(['\n', '\r']).to_string();
                    sink.append(stream, text);
                }
                Err(e) => {
                    warn!("{} {} drain failed: {}", sink.source(), stream, e);
                    break;
                }
            }
        }
        debug!("{} {} drain finished", sink.source(), stream);
    })
}

/// A spawned child together with the tasks draining its output.
pub struct SupervisedChild {
    child: Box<dyn ChildProcess>,
    drains: Vec<JoinHandle<()>>,
}

impl SupervisedChild {
    /// Take the child's output streams and start draining them into `sink`.
    pub fn attach(mut child: Box<dyn ChildProcess>, sink: &LogSink) -> Self {
        let mut drains = Vec::with_capacity(2);
        if let Some(out) = child.take_stdout() {
            drains.push(spawn_line_drain(out, OutputStream::Stdout, sink.clone()));
        }
        if let Some(err) = child.take_stderr() {
            drains.push(spawn_line_drain(err, OutputStream::Stderr, sink.clone()));
        }
        Self { child, drains }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_exit_status()
    }

    /// Kill the child and end its drains.
    pub async fn shutdown(mut self) -> Result<()> {
        let result = self.child.terminate().await;
        for drain in self.drains.drain(..) {
            let abort = drain.abort_handle();
            if tokio::time::timeout(DRAIN_JOIN_TIMEOUT, drain).await.is_err() {
                debug!("drain still open after kill, aborting");
                abort.abort();
            }
        }
        result
    }
}

impl Drop for SupervisedChild {
    fn drop(&mut self) {
        for drain in &self.drains {
            drain.abort();
        }
    }
}
