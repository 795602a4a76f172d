use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::logger::FrameLogger;
use crate::queue::TelemetryQueue;
use crate::reader::{FrameReader, InfoSink, ReaderStats, StatsSnapshot};

/// How long a single read may block before the reader checks whether it
/// should stop.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// What kind of thing the port name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Transport {
    /// A serial device, opened at the configured baud rate.
    #[default]
    Serial,
    /// A `host:port` TCP address, such as a running simulator.
    Tcp,
    /// A plain file, opened read-write. Terminals such as a pty are opened
    /// like a serial device, so reads still time out.
    File,
}

/// Everything needed to open a [Link].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkConfig {
    pub port: String,
    pub baud: u32,
    pub transport: Transport,
    pub read_timeout: Duration,
}

impl LinkConfig {
    /// A serial link on `port` at the protocol's default baud rate.
    pub fn new<P>(port: P) -> Self
    where
        P: Into<String>,
    {
        Self {
            port: port.into(),
            baud: crate::protocol::BAUD_RATE,
            transport: Transport::Serial,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

/// Pick a reasonable serial port when the user didn't name one.
pub fn default_serial_port() -> String {
    if let Ok(infos) = serialport::available_ports() {
        for info in infos {
            #[cfg(target_os = "macos")]
            if info.port_name.ends_with(".Bluetooth-Incoming-Port") {
                // these ports are almost always *not* what we want
                continue;
            }

            #[cfg(target_os = "macos")]
            if info.port_name.starts_with("/dev/tty.") {
                // macos ports with tty. have flow control we don't use
                // use cu. ports instead!
                continue;
            }

            return info.port_name.clone();
        }
    }

    // not great, but reasonable fallback
    "/dev/ttyUSB0".to_owned()
}

/// Failure to open a [Link].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("no such device: {port}")]
    NotFound { port: String },
    #[error("permission denied opening {port}")]
    PermissionDenied { port: String },
    #[error("could not open {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("could not open {port}: {source}")]
    Io {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{port} is not a regular file or terminal")]
    Unsupported { port: String },
    #[error("read timeout must be greater than zero")]
    ZeroTimeout,
}

impl ConnectError {
    fn from_serial(port: &str, source: serialport::Error) -> Self {
        use serialport::ErrorKind;

        let port = port.to_owned();
        match source.kind() {
            ErrorKind::NoDevice | ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                Self::NotFound { port }
            }
            ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => Self::PermissionDenied { port },
            _ => Self::Serial { port, source },
        }
    }

    fn from_io(port: &str, source: std::io::Error) -> Self {
        let port = port.to_owned();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { port },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { port },
            _ => Self::Io { port, source },
        }
    }
}

/// Failure to write a line to a [Link].
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("not connected")]
    NotOpen,
    #[error("line contains a line break")]
    LineBreak,
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that accepts whole lines of text.
pub trait WriteLine {
    /// Write `text` followed by a newline.
    fn write_line(&self, text: &str) -> Result<(), WriteError>;
}

/// Connect to the first address `name` resolves to that answers within
/// `timeout`.
fn connect_tcp(name: &str, timeout: Duration) -> std::io::Result<std::net::TcpStream> {
    use std::net::ToSocketAddrs;

    let mut last_err = None;
    for addr in name.to_socket_addrs()? {
        match std::net::TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("could not connect to {}: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "address resolved to nothing",
        )
    }))
}

/// The open device, whichever kind it is.
enum Port {
    Serial(Box<dyn serialport::SerialPort>),
    Tcp(std::net::TcpStream),
    File(std::fs::File),
}

impl Port {
    fn open(config: &LinkConfig) -> Result<Self, ConnectError> {
        let name = config.port.as_str();
        match config.transport {
            Transport::Serial => serialport::new(name, config.baud)
                .timeout(config.read_timeout)
                .open()
                .map(Port::Serial)
                .map_err(|e| ConnectError::from_serial(name, e)),
            Transport::Tcp => {
                let stream = connect_tcp(name, config.read_timeout)
                    .map_err(|e| ConnectError::from_io(name, e))?;
                stream
                    .set_read_timeout(Some(config.read_timeout))
                    .map_err(|e| ConnectError::from_io(name, e))?;
                Ok(Port::Tcp(stream))
            }
            Transport::File => Self::open_file(config),
        }
    }

    /// Plain files read to EOF and then back off. Terminals go through
    /// serialport so their reads time out. FIFOs and the like are refused.
    fn open_file(config: &LinkConfig) -> Result<Self, ConnectError> {
        let name = config.port.as_str();
        let file_type = std::fs::metadata(name)
            .map_err(|e| ConnectError::from_io(name, e))?
            .file_type();

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if file_type.is_char_device() {
                return serialport::new(name, config.baud)
                    .timeout(config.read_timeout)
                    .open()
                    .map(Port::Serial)
                    .map_err(|e| ConnectError::from_serial(name, e));
            }
        }

        if !file_type.is_file() {
            return Err(ConnectError::Unsupported {
                port: name.to_owned(),
            });
        }

        std::fs::File::options()
            .read(true)
            .write(true)
            .open(name)
            .map(Port::File)
            .map_err(|e| ConnectError::from_io(name, e))
    }

    fn try_clone(&self) -> std::io::Result<Self> {
        Ok(match self {
            Self::Serial(port) => Self::Serial(port.try_clone()?),
            Self::Tcp(port) => Self::Tcp(port.try_clone()?),
            Self::File(port) => Self::File(port.try_clone()?),
        })
    }

    /// Wake up anyone blocked reading a clone of this port, if possible.
    fn shutdown(&self) {
        if let Self::Tcp(port) = self {
            let _ = port.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Read for Port {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Serial(port) => port.read(buf),
            Self::Tcp(port) => port.read(buf),
            Self::File(port) => port.read(buf),
        }
    }
}

impl Write for Port {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Serial(port) => port.write(buf),
            Self::Tcp(port) => port.write(buf),
            Self::File(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Serial(port) => port.flush(),
            Self::Tcp(port) => port.flush(),
            Self::File(port) => port.flush(),
        }
    }
}

/// Whether a [Link] can still be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkState {
    Closed,
    Open,
}

/// A connection to the motor head, plus the background thread reading
/// from it.
///
/// A `Link` can be shared between threads. Writes go out in the order they
/// are made. Closing is idempotent, and dropping a `Link` closes it.
pub struct Link {
    port: String,
    baud: u32,
    read_timeout: Duration,
    // None once closed. Held across each write so close can't race one.
    writer: Mutex<Option<Port>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
    stats: Arc<ReaderStats>,
}

impl Link {
    /// Open the device and start reading from it.
    ///
    /// Decoded telemetry goes to `queue`, every inbound line is recorded in
    /// `logger`, and informational lines go to `sink`.
    pub fn open<S>(
        config: &LinkConfig,
        queue: TelemetryQueue,
        logger: FrameLogger,
        sink: S,
    ) -> Result<Self, ConnectError>
    where
        S: InfoSink + Send + 'static,
    {
        if config.read_timeout.is_zero() {
            return Err(ConnectError::ZeroTimeout);
        }

        let port = Port::open(config)?;
        let read_half = port
            .try_clone()
            .map_err(|e| ConnectError::from_io(&config.port, e))?;

        let reader =
            FrameReader::new(read_half, queue, logger, sink).with_backoff(config.read_timeout);
        let stats = reader.stats();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("headlib-reader".to_owned())
            .spawn(move || reader.run(&thread_stop))
            .map_err(|e| ConnectError::from_io(&config.port, e))?;

        log::info!("opened {} at {} baud", config.port, config.baud);

        Ok(Self {
            port: config.port.clone(),
            baud: config.baud,
            read_timeout: config.read_timeout,
            writer: Mutex::new(Some(port)),
            reader: Mutex::new(Some(handle)),
            stop,
            stats,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn state(&self) -> LinkState {
        if self.lock_writer().is_some() {
            LinkState::Open
        } else {
            LinkState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Counters from the reader thread.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Write `text` and a newline, then flush.
    ///
    /// Failures are returned as-is. Nothing is retried.
    pub fn write_line(&self, text: &str) -> Result<(), WriteError> {
        if text.contains(|c: char| c == '\n' || c == '\r') {
            return Err(WriteError::LineBreak);
        }

        let mut writer = self.lock_writer();
        let port = writer.as_mut().ok_or(WriteError::NotOpen)?;

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');

        port.write_all(line.as_bytes())?;
        port.flush()?;
        log::trace!(">>> {}", text);
        Ok(())
    }

    /// Stop the reader, wait for it to finish, and release the device.
    ///
    /// The reader notices within one read timeout. Closing a closed link
    /// does nothing.
    pub fn close(&self) {
        self.stop.store(true, Ordering::Release);

        let port = self.lock_writer().take();
        if let Some(port) = port {
            port.shutdown();
            log::info!("closing {}", self.port);
        }

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            if reader.join().is_err() {
                log::error!("reader thread for {} panicked", self.port);
            }
        }
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, Option<Port>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WriteLine for Link {
    fn write_line(&self, text: &str) -> Result<(), WriteError> {
        Link::write_line(self, text)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("port", &self.port)
            .field("baud", &self.baud)
            .field("state", &self.state())
            .finish()
    }
}
