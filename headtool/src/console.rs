use std::sync::Mutex;
use std::time::Duration;

use rustyline::{error::ReadlineError, DefaultEditor, ExternalPrinter};

use headlib::protocol::{InfoFrame, MotorTelemetry, RotationMode};
use headlib::{CommandPipeline, Field, InfoSink, Link, RawSetpoints, TelemetryQueue};

const HELP: &str = "\
commands:
  set <field> <value>   field is one of a.target a.speed a.accel b.target b.speed b.accel
  dir <cw|ccw|shortest> rotation mode for axis B
  send                  send the current setpoints
  show                  print setpoints and the latest telemetry
  stats                 print reader counters
  quit";

#[derive(clap::Args, Debug)]
pub struct ConsoleOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
    #[command(flatten)]
    debug: crate::debug::DebugArgs,
    #[command(flatten)]
    policy: crate::common::PolicyArgs,

    /// How often to check for new telemetry, in milliseconds.
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,
}

impl crate::ToolRun for ConsoleOpts {
    fn run(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.interval_ms > 0, "interval must be greater than zero");
        self.debug.init_logger();

        let mut rl = DefaultEditor::new()?;
        let logger = self.debug.frame_logger();
        let queue = TelemetryQueue::new();
        let link = self.port.open(
            queue.clone(),
            logger.clone(),
            PrinterSink(rl.create_external_printer()?),
        )?;

        let latest = Mutex::new(None);
        let mut console = Console {
            link: &link,
            pipeline: CommandPipeline::new(self.policy.policies(), logger),
            setpoints: RawSetpoints::default(),
            latest: &latest,
        };
        let printer = rl.create_external_printer()?;
        let interval = Duration::from_millis(self.interval_ms);
        let result = console.run(&mut rl, printer, &queue, interval);
        link.close();
        result
    }
}

/// Sends informational lines to the terminal without trampling the prompt.
struct PrinterSink<P>(P);

impl<P> InfoSink for PrinterSink<P>
where
    P: ExternalPrinter,
{
    fn info(&mut self, frame: InfoFrame<'_>) {
        if let Err(e) = self.0.print(frame.text.to_owned()) {
            log::debug!("could not print device message: {}", e);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Set(Field, f64),
    Direction(RotationMode),
    Send,
    Show,
    Stats,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines are `None`.
    fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (verb.to_ascii_lowercase().as_str(), &args[..]) {
            ("set", [field, value]) => {
                let value: f64 = value
                    .parse()
                    .map_err(|_| anyhow::anyhow!("not a number: {}", value))?;
                Command::Set(field.parse()?, value)
            }
            ("set", _) => anyhow::bail!("usage: set <field> <value>"),
            ("dir", [mode]) => Command::Direction(mode.parse()?),
            ("dir", _) => anyhow::bail!("usage: dir <cw|ccw|shortest>"),
            ("send", []) => Command::Send,
            ("show", []) => Command::Show,
            ("stats", []) => Command::Stats,
            ("help" | "?", _) => Command::Help,
            ("quit" | "exit", _) => Command::Quit,
            (verb, _) => anyhow::bail!("unknown command {:?}, try help", verb),
        };
        Ok(Some(command))
    }
}

struct Console<'a> {
    link: &'a Link,
    pipeline: CommandPipeline,
    setpoints: RawSetpoints,
    // newest telemetry seen by the poller
    latest: &'a Mutex<Option<MotorTelemetry>>,
}

impl<'a> Console<'a> {
    fn run<P>(
        &mut self,
        rl: &mut DefaultEditor,
        mut printer: P,
        queue: &TelemetryQueue,
        interval: Duration,
    ) -> anyhow::Result<()>
    where
        P: ExternalPrinter + Send,
    {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let latest = self.latest;

        std::thread::scope(|s| {
            s.spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => {}
                        // closed when the prompt loop ends
                        recv(done_rx) -> _ => break,
                    }

                    let Some(telemetry) = queue.latest() else {
                        continue;
                    };
                    let mut last = latest.lock().unwrap_or_else(|e| e.into_inner());
                    if last.as_ref() != Some(&telemetry) {
                        let _ = printer.print(crate::common::format_telemetry(&telemetry));
                    }
                    *last = Some(telemetry);
                }
            });

            let result = self.prompt(rl);
            drop(done_tx);
            result
        })
    }

    fn prompt(&mut self, rl: &mut DefaultEditor) -> anyhow::Result<()> {
        println!("{}", HELP);
        loop {
            let line = match rl.readline("> ") {
                Ok(line) => line,
                Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => return Ok(()),
                Err(e) => Err(e)?,
            };
            rl.add_history_entry(&line)?;

            match Command::parse(&line) {
                Ok(Some(Command::Quit)) => return Ok(()),
                Ok(Some(command)) => self.execute(command),
                Ok(None) => {}
                Err(e) => eprintln!("{}", e),
            }
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Set(field, value) => {
                self.setpoints.set(field, value);
                if value.is_finite() {
                    let sent = self.pipeline.policies().get(field).normalize(value);
                    println!("{} = {} (sent as {})", field, value, sent);
                }
            }
            Command::Direction(mode) => self.setpoints.direction_b = mode,
            Command::Send => match self.pipeline.submit(self.link, &self.setpoints) {
                Ok(frame) => println!("-> {}", frame),
                Err(e) => eprintln!("send failed: {}", e),
            },
            Command::Show => {
                for field in Field::ALL {
                    println!("{:<9} {}", field, self.setpoints.get(field));
                }
                println!("{:<9} {:?}", "b.dir", self.setpoints.direction_b);

                let latest = *self.latest.lock().unwrap_or_else(|e| e.into_inner());
                match latest {
                    Some(t) => println!("{}", crate::common::format_telemetry(&t)),
                    None => println!("no telemetry yet"),
                }
            }
            Command::Stats => println!("{}", self.link.stats()),
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
    }
}
