//! Protocol event log.
//!
//! One line per segment event, fields joined by `", "`:
//!
//! ```text
//! timestamp, srcHost:port, dstHost:port, seqNum, ackNum[, ACK][, FIN][, EstimatedRTT]
//! ```
//!
//! Downstream log consumers rely on the field order, so the engines build
//! every line through [`LogRecord`].  This is independent of the `log`
//! facade used for diagnostics; a failing sink is reported there and
//! otherwise ignored.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// Marker appended after the sequence/ack fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Ack,
    Fin,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tag::Ack => "ACK",
            Tag::Fin => "FIN",
        })
    }
}

/// One event, without its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// `host:port` of the segment's sender.
    pub src: String,
    /// `host:port` of the segment's receiver.
    pub dst: String,
    pub seq: u32,
    pub ack: u32,
    pub tags: Vec<Tag>,
    /// Sender-side records carry the current `EstimatedRTT`.
    pub rtt: Option<Duration>,
}

impl LogRecord {
    pub fn new(src: String, dst: String, seq: u32, ack: u32) -> Self {
        Self {
            src,
            dst,
            seq,
            ack,
            tags: Vec::new(),
            rtt: None,
        }
    }

    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn rtt(mut self, rtt: Duration) -> Self {
        self.rtt = Some(rtt);
        self
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}, {}", self.src, self.dst, self.seq, self.ack)?;
        for tag in &self.tags {
            write!(f, ", {tag}")?;
        }
        if let Some(rtt) = self.rtt {
            write!(f, ", {}", rtt.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Destination for event lines.
pub struct EventLog {
    sink: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

impl EventLog {
    /// A log that drops every record.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Box::new(sink)),
        }
    }

    /// Create (truncate) a log file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }

    /// Append `record`, stamped with the local wall-clock time.
    ///
    /// Runs synchronously inside the engines; file sinks from
    /// [`EventLog::create`] are buffered so this rarely reaches the disk.
    pub fn record(&mut self, record: &LogRecord) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
        if let Err(e) = writeln!(sink, "{now}, {record}") {
            log::warn!("event log write failed: {e}");
        }
    }

    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.flush() {
                log::warn!("event log flush failed: {e}");
            }
        }
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        self.flush();
    }
}

/// `host:port` as it appears in event lines.
pub fn endpoint(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}
