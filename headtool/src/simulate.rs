use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use headlib::protocol::{self, CommandFrame, MotorTelemetry, RotationMode};
use headlib::{Direction, FrameLogger};

#[derive(clap::Args, Debug)]
pub struct SimulateOpts {
    #[arg(default_value = "localhost:8855")]
    bind: String,
    #[command(flatten)]
    debug: crate::debug::DebugArgs,
    /// Telemetry period, in milliseconds.
    #[arg(long, default_value_t = 100)]
    period_ms: u64,
    /// Motor steps per degree of travel. Speeds and accelerations in
    /// commands are in steps.
    #[arg(long, default_value_t = 20.0)]
    steps_per_degree: f64,
}

impl crate::ToolRun for SimulateOpts {
    fn run(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.period_ms > 0, "period must be greater than zero");
        anyhow::ensure!(
            self.steps_per_degree > 0.0,
            "steps per degree must be positive"
        );
        self.debug.init_logger();
        let logger = self.debug.frame_logger();

        let listener = std::net::TcpListener::bind(&self.bind)?;
        eprintln!("Listening on {}.", self.bind);

        // the head stays where it was between connections
        let mut head = Head::new(self.steps_per_degree);
        loop {
            let (stream, addr) = listener.accept()?;
            eprintln!("Connected to {}.", addr);

            // short timeout, so telemetry keeps flowing while idle
            stream.set_read_timeout(Some(self.period() / 4))?;

            let mut sim = Simulator::new(stream, &mut head, logger.clone(), self.period())?;
            match sim.simulate() {
                Ok(()) => eprintln!("Disconnected from {}.", addr),
                Err(e) if disconnected(&e) => eprintln!("Disconnected from {}.", addr),
                Err(e) => anyhow::bail!(e),
            }
        }
    }
}

impl SimulateOpts {
    fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

fn disconnected(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        UnexpectedEof | ConnectionReset | ConnectionAborted | BrokenPipe
    )
}

/// One axis, moving toward its goal with a trapezoidal velocity profile.
///
/// Positions are in degrees. Axis B's position is unwrapped here and only
/// folded into [0, 360) when reported.
#[derive(Debug, Clone, PartialEq)]
struct Axis {
    position: f64,
    velocity: f64,
    goal: f64,
    max_speed: f64,
    accel: f64,
}

// below this, an axis counts as arrived
const EPSILON: f64 = 1e-6;

impl Axis {
    fn new() -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            goal: 0.0,
            max_speed: 1.0,
            accel: 1.0,
        }
    }

    fn moving(&self) -> bool {
        self.velocity != 0.0 || self.position != self.goal
    }

    fn step(&mut self, dt: f64) {
        let dist = self.goal - self.position;
        if dist.abs() < EPSILON && self.velocity.abs() < EPSILON {
            self.position = self.goal;
            self.velocity = 0.0;
            return;
        }

        let dir = dist.signum();
        let dv = self.accel * dt;
        if self.velocity * dir < 0.0 {
            // heading the wrong way, brake first
            if self.velocity.abs() <= dv {
                self.velocity = 0.0;
            } else {
                self.velocity -= self.velocity.signum() * dv;
            }
        } else {
            // fastest speed we can still stop from in time
            let cap = self.max_speed.min((2.0 * self.accel * dist.abs()).sqrt());
            let speed = self.velocity.abs();
            let speed = if speed < cap {
                (speed + dv).min(cap)
            } else {
                (speed - dv).max(cap)
            };
            self.velocity = dir * speed;
        }

        let next = self.position + self.velocity * dt;
        let crossed = (self.goal - self.position) * (self.goal - next) <= 0.0;
        if crossed && self.velocity * dir > 0.0 {
            self.position = self.goal;
            self.velocity = 0.0;
        } else {
            self.position = next;
        }
    }
}

/// Signed travel from `from` to `to` on a circle, honouring `mode`.
fn circular_travel(from: f64, to: f64, mode: RotationMode) -> f64 {
    let forward = (to - from).rem_euclid(360.0);
    match mode {
        RotationMode::ClockWise => forward,
        RotationMode::CounterClockWise if forward == 0.0 => 0.0,
        RotationMode::CounterClockWise => forward - 360.0,
        RotationMode::Shortest if forward > 180.0 => forward - 360.0,
        RotationMode::Shortest => forward,
    }
}

/// Both axes of the simulated head.
#[derive(Debug, Clone)]
struct Head {
    a: Axis,
    b: Axis,
    steps_per_degree: f64,
}

impl Head {
    fn new(steps_per_degree: f64) -> Self {
        Self {
            a: Axis::new(),
            b: Axis::new(),
            steps_per_degree,
        }
    }

    fn command(&mut self, frame: &CommandFrame) {
        let scale = |steps: f64| steps.abs() / self.steps_per_degree;

        self.a.goal = frame.target_a;
        self.a.max_speed = scale(frame.speed_a);
        self.a.accel = scale(frame.accel_a);

        let from = self.b.position.rem_euclid(360.0);
        self.b.goal = self.b.position + circular_travel(from, frame.target_b, frame.direction_b);
        self.b.max_speed = scale(frame.speed_b);
        self.b.accel = scale(frame.accel_b);
    }

    fn step(&mut self, dt: f64) {
        self.a.step(dt);
        self.b.step(dt);
    }

    fn telemetry(&self) -> MotorTelemetry {
        let round = |x: f64| (x * 100.0).round() / 100.0 + 0.0;
        MotorTelemetry {
            moving_a: self.a.moving(),
            position_a: round(self.a.position),
            speed_a: round(self.a.velocity.abs() * self.steps_per_degree),
            moving_b: self.b.moving(),
            position_b: round(self.b.position.rem_euclid(360.0)) % 360.0,
            speed_b: round(self.b.velocity.abs() * self.steps_per_degree),
        }
    }
}

struct Simulator<'a> {
    input: BufReader<TcpStream>,
    output: TcpStream,
    pending: Vec<u8>,
    head: &'a mut Head,
    logger: FrameLogger,
    period: Duration,
}

impl<'a> Simulator<'a> {
    fn new(
        stream: TcpStream,
        head: &'a mut Head,
        logger: FrameLogger,
        period: Duration,
    ) -> std::io::Result<Self> {
        Ok(Self {
            input: BufReader::new(stream.try_clone()?),
            output: stream,
            pending: Vec::new(),
            head,
            logger,
            period,
        })
    }

    fn simulate(&mut self) -> std::io::Result<()> {
        let mut last_step = Instant::now();
        let mut last_report = Instant::now();
        loop {
            match self.input.read_until(b'\n', &mut self.pending) {
                Ok(0) => return Ok(()),
                Ok(_) if self.pending.ends_with(b"\n") => {
                    let line = String::from_utf8_lossy(&self.pending).trim().to_owned();
                    self.pending.clear();
                    if !line.is_empty() {
                        self.handle_line(&line)?;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if let std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock = e.kind()
                    {
                        // partial input stays in pending
                    } else {
                        return Err(e);
                    }
                }
            }

            let now = Instant::now();
            self.head.step((now - last_step).as_secs_f64());
            last_step = now;

            if now - last_report >= self.period {
                last_report = now;
                let line = protocol::encode_telemetry(&self.head.telemetry());
                self.send(&line)?;
            }
        }
    }

    fn handle_line(&mut self, line: &str) -> std::io::Result<()> {
        self.logger.log(Direction::Inbound, line);
        match protocol::decode_command(line) {
            Ok(frame) => {
                log::info!("command: {}", frame);
                self.head.command(&frame);
                self.send(&format!("I:Target {},{}", frame.target_a, frame.target_b))
            }
            Err(e) => {
                log::warn!("bad command {:?}: {}", line, e);
                self.send(&format!("I:Invalid frame: {}", e))
            }
        }
    }

    fn send(&mut self, line: &str) -> std::io::Result<()> {
        self.output.write_all(line.as_bytes())?;
        self.output.write_all(b"\n")?;
        self.output.flush()?;
        self.logger.log(Direction::Outbound, line);
        Ok(())
    }
}
