use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::logger::{Direction, FrameLogger};
use crate::protocol::{self, DecodeError, Frame, InfoFrame, InfoKind};
use crate::queue::TelemetryQueue;

/// Longest line the reader will buffer, not counting the line ending.
/// Anything longer is thrown away and counted as a decode error.
pub const MAX_LINE_LEN: usize = 4096;

/// Somewhere to send informational (non-telemetry) lines.
pub trait InfoSink {
    fn info(&mut self, frame: InfoFrame<'_>);
}

impl<F> InfoSink for F
where
    F: FnMut(InfoFrame<'_>),
{
    fn info(&mut self, frame: InfoFrame<'_>) {
        self(frame)
    }
}

/// An [InfoSink] that forwards each line over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub crossbeam_channel::Sender<String>);

impl InfoSink for ChannelSink {
    fn info(&mut self, frame: InfoFrame<'_>) {
        // nobody listening is fine
        let _ = self.0.send(frame.text.to_owned());
    }
}

/// An [InfoSink] that hands lines to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl InfoSink for LogSink {
    fn info(&mut self, frame: InfoFrame<'_>) {
        match frame.kind {
            InfoKind::Error => log::warn!("device: {}", frame.text),
            _ => log::info!("device: {}", frame.text),
        }
    }
}

/// Running counters kept by the reader.
#[derive(Debug, Default)]
pub struct ReaderStats {
    lines: AtomicU64,
    telemetry: AtomicU64,
    info: AtomicU64,
    decode_errors: AtomicU64,
    io_errors: AtomicU64,
}

/// A point-in-time copy of [ReaderStats].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub lines: u64,
    pub telemetry: u64,
    pub info: u64,
    pub decode_errors: u64,
    pub io_errors: u64,
}

impl ReaderStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines: self.lines.load(Ordering::Relaxed),
            telemetry: self.telemetry.load(Ordering::Relaxed),
            info: self.info.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} lines, {} telemetry, {} info, {} decode errors, {} io errors",
            self.lines, self.telemetry, self.info, self.decode_errors, self.io_errors
        )
    }
}

/// Result of one attempt to read a line.
#[derive(Debug)]
pub enum ReadOutcome {
    /// No complete line within the read timeout.
    Idle,
    /// A complete line, line ending still attached.
    Line(String),
    /// The other end has gone away.
    Eof,
    /// The transport reported an error.
    Failed(std::io::Error),
    /// More than [MAX_LINE_LEN] bytes arrived without a line ending. They
    /// were dropped, along with the rest of that line.
    Overlong,
}

/// What happened to a line once it was read.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    /// Blank line, ignored.
    Skipped,
    /// Decoded and queued.
    Telemetry,
    /// Passed to the [InfoSink].
    Info,
    /// Tagged as telemetry but undecodable, dropped.
    Dropped(DecodeError),
}

/// Reads lines from the device, logs them, and sorts them into the
/// telemetry queue or the info sink.
pub struct FrameReader<R, S> {
    input: BufReader<R>,
    pending: Vec<u8>,
    // inside a line that was already reported as overlong
    discarding: bool,
    queue: TelemetryQueue,
    logger: FrameLogger,
    sink: S,
    stats: Arc<ReaderStats>,
    backoff: Duration,
}

impl<R, S> FrameReader<R, S>
where
    R: Read,
    S: InfoSink,
{
    pub fn new(input: R, queue: TelemetryQueue, logger: FrameLogger, sink: S) -> Self {
        Self {
            input: BufReader::new(input),
            pending: Vec::new(),
            discarding: false,
            queue,
            logger,
            sink,
            stats: Arc::new(ReaderStats::default()),
            backoff: crate::link::DEFAULT_READ_TIMEOUT,
        }
    }

    /// How long to wait before retrying after EOF or a transport error.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn stats(&self) -> Arc<ReaderStats> {
        self.stats.clone()
    }

    /// Try to read one line.
    ///
    /// Bytes that arrive before a timeout are kept, and finished off by a
    /// later call. At most [MAX_LINE_LEN] bytes are held at once.
    pub fn read_line(&mut self) -> ReadOutcome {
        use std::io::ErrorKind;

        // room for one byte past the limit, so an overlong line shows itself
        let room = (MAX_LINE_LEN + 1).saturating_sub(self.pending.len()) as u64;
        match (&mut self.input)
            .take(room)
            .read_until(b'\n', &mut self.pending)
        {
            Ok(0) if self.pending.is_empty() => ReadOutcome::Eof,
            // a full line, the tail end before EOF, or too many bytes
            Ok(_) => self.finish_line(),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                ReadOutcome::Idle
            }
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    fn finish_line(&mut self) -> ReadOutcome {
        let terminated = self.pending.last() == Some(&b'\n');
        if !terminated && self.pending.len() > MAX_LINE_LEN {
            self.pending.clear();
            if std::mem::replace(&mut self.discarding, true) {
                return ReadOutcome::Idle;
            }
            log::warn!("dropping line longer than {} bytes", MAX_LINE_LEN);
            ReaderStats::bump(&self.stats.decode_errors);
            return ReadOutcome::Overlong;
        }

        if self.discarding {
            // the end of an overlong line
            self.pending.clear();
            self.discarding = false;
            return ReadOutcome::Idle;
        }
        ReadOutcome::Line(self.take_pending())
    }

    fn take_pending(&mut self) -> String {
        let raw = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&raw).into_owned()
    }

    /// Log and dispatch one line.
    pub fn handle_line(&mut self, raw: &str) -> Handled {
        let line = raw.trim();
        if line.is_empty() {
            return Handled::Skipped;
        }

        ReaderStats::bump(&self.stats.lines);
        self.logger.log(Direction::Inbound, line);

        match protocol::classify(line) {
            Frame::Telemetry(body) => match protocol::decode_telemetry(body) {
                Ok(telemetry) => {
                    log::trace!("<<< {:?}", telemetry);
                    ReaderStats::bump(&self.stats.telemetry);
                    self.queue.push(telemetry);
                    Handled::Telemetry
                }
                Err(e) => {
                    log::warn!("dropping telemetry {:?}: {}", line, e);
                    ReaderStats::bump(&self.stats.decode_errors);
                    Handled::Dropped(e)
                }
            },
            Frame::Info(info) => {
                log::debug!("<<< {}", info.text);
                ReaderStats::bump(&self.stats.info);
                self.sink.info(info);
                Handled::Info
            }
        }
    }

    /// Read and dispatch lines until `stop` is set.
    ///
    /// Nothing that arrives on the wire, and no transport error, ends this
    /// loop. Only `stop` does, and it is checked at least once per read
    /// timeout.
    pub fn run(mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            match self.read_line() {
                ReadOutcome::Idle | ReadOutcome::Overlong => {}
                ReadOutcome::Line(line) => {
                    self.handle_line(&line);
                }
                ReadOutcome::Eof => {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    log::debug!("end of input, waiting");
                    std::thread::sleep(self.backoff);
                }
                ReadOutcome::Failed(e) => {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    ReaderStats::bump(&self.stats.io_errors);
                    log::warn!("read failed: {}", e);
                    std::thread::sleep(self.backoff);
                }
            }
        }
        log::debug!("reader stopped");
    }
}
