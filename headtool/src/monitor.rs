use std::time::Duration;

use headlib::TelemetryQueue;

#[derive(clap::Args, Debug)]
pub struct MonitorOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
    #[command(flatten)]
    debug: crate::debug::DebugArgs,

    /// How often to drain the telemetry queue, in milliseconds.
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,
    /// Stop after printing this many snapshots.
    #[arg(short = 'n', long)]
    count: Option<u64>,
}

impl crate::ToolRun for MonitorOpts {
    fn run(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.interval_ms > 0, "interval must be greater than zero");
        anyhow::ensure!(self.count != Some(0), "count must be greater than zero");
        self.debug.init_logger();

        let queue = TelemetryQueue::new();
        let link = self.port.open(
            queue.clone(),
            self.debug.frame_logger(),
            crate::common::print_info,
        )?;

        let ticker = crossbeam_channel::tick(Duration::from_millis(self.interval_ms));
        let mut printed = 0;
        loop {
            ticker.recv()?;
            for telemetry in queue.drain() {
                println!("{}", crate::common::format_telemetry(&telemetry));
                printed += 1;
                if self.count == Some(printed) {
                    log::info!("{}", link.stats());
                    link.close();
                    return Ok(());
                }
            }
        }
    }
}
