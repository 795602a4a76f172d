use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Which way a raw frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// Firmware to host.
    Inbound,
    /// Host to firmware.
    Outbound,
}

impl Direction {
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Inbound => "<-",
            Direction::Outbound => "->",
        }
    }
}

/// An error type for [FrameLogger].
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("could not open frame log {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write frame log: {0}")]
    Write(#[from] std::io::Error),
}

/// Appends every raw frame, in and out, to a text file.
///
/// A disabled logger accepts and drops everything. Clones share the same
/// file, and entries from different threads never interleave.
#[derive(Debug, Clone, Default)]
pub struct FrameLogger {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl FrameLogger {
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Open `path` for appending, creating it if needed.
    pub fn open<P>(path: P) -> Result<Self, LogError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = std::fs::File::options()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| LogError::Open {
                path: path.to_owned(),
                source,
            })?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// Open `path` if given. A log that can't be opened is reported and
    /// then left disabled.
    pub fn open_or_disabled<P>(path: Option<P>) -> Self
    where
        P: AsRef<Path>,
    {
        match path.map(Self::open) {
            Some(Ok(logger)) => logger,
            Some(Err(e)) => {
                log::warn!("{}, frame logging disabled", e);
                Self::disabled()
            }
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Record one frame. Failures are dropped.
    pub fn log(&self, direction: Direction, text: &str) {
        if let Err(e) = self.try_log(direction, text) {
            log::debug!("frame log entry lost: {}", e);
        }
    }

    /// Record one frame, reporting failure.
    pub fn try_log(&self, direction: Direction, text: &str) -> Result<(), LogError> {
        let Some(ref file) = self.file else {
            return Ok(());
        };

        let entry = format_entry(chrono::Local::now(), direction, text);
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(entry.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Format one log line, line ending included.
pub fn format_entry<Tz>(timestamp: chrono::DateTime<Tz>, direction: Direction, text: &str) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{} Serial {} {}\n",
        timestamp.format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        direction.arrow(),
        text
    )
}
