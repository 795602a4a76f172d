use std::path::PathBuf;

use headlib::FrameLogger;

#[derive(clap::Args, Debug, Clone)]
pub struct DebugArgs {
    /// Log more; repeat for more detail.
    #[arg(short, long, action=clap::ArgAction::Count)]
    pub debug: u8,
    /// Append every raw frame, in and out, to this file.
    #[arg(long)]
    log: Option<PathBuf>,
}

impl DebugArgs {
    pub fn level(&self) -> log::LevelFilter {
        match self.debug {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Install the global logger. RUST_LOG, if set, wins over -d.
    pub fn init_logger(&self) {
        env_logger::Builder::new()
            .filter_level(self.level())
            .parse_default_env()
            .init();
    }

    pub fn frame_logger(&self) -> FrameLogger {
        FrameLogger::open_or_disabled(self.log.as_ref())
    }
}
