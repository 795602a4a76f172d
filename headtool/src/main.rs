mod common;
mod console;
mod debug;
mod monitor;
mod ports;
mod send;
mod simulate;

trait ToolRun {
    fn run(&self) -> anyhow::Result<()>;
}

/// Talk to a pan/tilt motor head over serial.
#[derive(clap::Parser, Debug)]
#[command(version)]
struct ToolOptions {
    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(clap::Subcommand, Debug)]
enum ToolCommand {
    /// List serial ports.
    Ports(ports::PortsOpts),
    /// Print telemetry as it arrives.
    Monitor(monitor::MonitorOpts),
    /// Send one command and exit.
    Send(send::SendOpts),
    /// Edit and send setpoints interactively.
    Console(console::ConsoleOpts),
    /// Pretend to be a motor head, over TCP.
    Simulate(simulate::SimulateOpts),
}

impl ToolRun for ToolCommand {
    fn run(&self) -> anyhow::Result<()> {
        use ToolCommand::*;
        match self {
            Ports(o) => o.run(),
            Monitor(o) => o.run(),
            Send(o) => o.run(),
            Console(o) => o.run(),
            Simulate(o) => o.run(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    use clap::Parser;
    ToolOptions::parse().command.run()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cli_is_consistent() {
        use clap::CommandFactory;
        ToolOptions::command().debug_assert();
    }
}
