use std::time::Duration;

use headlib::protocol::RotationMode;
use headlib::{CommandPipeline, RawSetpoints, TelemetryQueue};

#[derive(clap::Args, Debug)]
pub struct SendOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
    #[command(flatten)]
    debug: crate::debug::DebugArgs,
    #[command(flatten)]
    policy: crate::common::PolicyArgs,

    /// Axis A (tilt) target, in degrees.
    #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
    target_a: f64,
    #[arg(long, default_value_t = 1500.0)]
    speed_a: f64,
    #[arg(long, default_value_t = 50.0)]
    accel_a: f64,
    /// Axis B (pan) target, in degrees.
    #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
    target_b: f64,
    #[arg(long, default_value_t = 1500.0)]
    speed_b: f64,
    #[arg(long, default_value_t = 50.0)]
    accel_b: f64,
    /// Which way axis B turns: cw, ccw or shortest.
    #[arg(long, default_value = "shortest")]
    direction: RotationMode,

    /// Keep printing device messages for this long after sending, in
    /// milliseconds.
    #[arg(long, default_value_t = 0)]
    wait_ms: u64,
}

impl SendOpts {
    fn setpoints(&self) -> RawSetpoints {
        RawSetpoints {
            target_a: self.target_a,
            speed_a: self.speed_a,
            accel_a: self.accel_a,
            target_b: self.target_b,
            speed_b: self.speed_b,
            direction_b: self.direction,
            accel_b: self.accel_b,
        }
    }
}

impl crate::ToolRun for SendOpts {
    fn run(&self) -> anyhow::Result<()> {
        self.debug.init_logger();

        let logger = self.debug.frame_logger();
        let pipeline = CommandPipeline::new(self.policy.policies(), logger.clone());
        // refuse bad input before touching the port
        let frame = pipeline.build_command(&self.setpoints())?;

        let link = self
            .port
            .open(TelemetryQueue::new(), logger, crate::common::print_info)?;
        pipeline.send(&link, &frame)?;
        println!("{}", frame);

        if self.wait_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.wait_ms));
        }
        link.close();
        Ok(())
    }
}
