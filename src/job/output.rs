//! Captured output types for jobs.
//!
//! Jobs buffer everything their child writes, up to a configurable retention
//! limit per stream, while simultaneously broadcasting each chunk to live
//! subscribers. [`JobOutput`] is the final record handed back when the child
//! exits; [`JobSnapshot`] is the same view taken mid-flight.

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which output stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// The child's standard output.
    Stdout,
    /// The child's standard error.
    Stderr,
}

impl StreamKind {
    /// Human-readable stream name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// One chunk of child output, delivered to live subscribers in write order.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    /// Stream the chunk was read from.
    pub stream: StreamKind,
    /// Raw bytes, sliced at whatever boundary the pipe produced.
    pub data: Bytes,
}

/// Final record of a completed job.
#[derive(Debug, Clone)]
pub struct JobOutput {
    /// Display form of the command line that ran.
    pub command: String,
    /// Retained stdout bytes, possibly truncated at the front.
    pub stdout: Vec<u8>,
    /// Retained stderr bytes, possibly truncated at the front.
    pub stderr: Vec<u8>,
    /// Exit code, or `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal number when `exit_code` is `None`.
    pub signal: Option<i32>,
    /// True when the job hit its wall-clock limit and was killed.
    pub timed_out: bool,
    /// True when stdout exceeded the retention limit and lost its head.
    pub stdout_truncated: bool,
    /// True when stderr exceeded the retention limit and lost its head.
    pub stderr_truncated: bool,
    /// Wall-clock time from spawn to reap.
    pub duration: Duration,
}

impl JobOutput {
    /// True for a clean zero exit that did not time out.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Retained stdout as text, with invalid UTF-8 replaced.
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Retained stderr as text, with invalid UTF-8 replaced.
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Short description of how the child ended, for logs and errors.
    pub fn status_display(&self) -> String {
        if self.timed_out {
            return "timeout".to_string();
        }
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(signal)) => format!("signal {signal}"),
            (None, None) => "unknown status".to_string(),
        }
    }
}

/// Point-in-time view of a running (or finished) job's buffered output.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    /// Retained stdout bytes at snapshot time.
    pub stdout: Vec<u8>,
    /// Retained stderr bytes at snapshot time.
    pub stderr: Vec<u8>,
    /// True when stdout has already been truncated at the front.
    pub stdout_truncated: bool,
    /// True when stderr has already been truncated at the front.
    pub stderr_truncated: bool,
    /// True while the child is still alive.
    pub running: bool,
}

impl JobSnapshot {
    /// Retained stdout as text, with invalid UTF-8 replaced.
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Retained stderr as text, with invalid UTF-8 replaced.
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Byte buffer that keeps at most `limit` bytes, discarding the oldest first.
///
/// Device log streams can run for hours; the interesting part of a wedged
/// run is almost always the tail, so overflow drops from the front.
#[derive(Debug)]
pub(crate) struct RetainedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl RetainedBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Appends a chunk, evicting from the front if the limit is exceeded.
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
            self.truncated = true;
        }
    }

    /// Copies out the retained bytes and the truncation flag.
    pub(crate) fn contents(&self) -> (Vec<u8>, bool) {
        (self.data.clone(), self.truncated)
    }
}
