use std::time::Duration;

use headlib::normalize::FieldPolicy;
use headlib::protocol::MotorTelemetry;
use headlib::{
    ConnectError, Field, FrameLogger, InfoSink, Link, LinkConfig, SetpointPolicies,
    TelemetryQueue, Transport,
};

#[derive(clap::Args, Debug, Clone)]
pub struct SerialPortArgs {
    #[arg(default_value_t = headlib::default_serial_port())]
    port: String,
    #[arg(short, long, default_value_t = headlib::protocol::BAUD_RATE)]
    baud: u32,
    /// How long one read may block, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Open the port as a regular file or terminal (e.g. a pty), not a
    /// serial device.
    #[arg(long)]
    plain_file: bool,
    /// Treat the port as a host:port address, e.g. a running simulator.
    #[arg(long, conflicts_with = "plain_file")]
    tcp: bool,
}

impl SerialPortArgs {
    pub fn config(&self) -> LinkConfig {
        let transport = if self.tcp {
            Transport::Tcp
        } else if self.plain_file {
            Transport::File
        } else {
            Transport::Serial
        };

        LinkConfig::new(&self.port)
            .with_transport(transport)
            .with_baud(self.baud)
            .with_read_timeout(Duration::from_millis(self.timeout_ms))
    }

    pub fn open<S>(
        &self,
        queue: TelemetryQueue,
        logger: FrameLogger,
        sink: S,
    ) -> Result<Link, ConnectError>
    where
        S: InfoSink + Send + 'static,
    {
        let link = Link::open(&self.config(), queue, logger, sink)?;
        eprintln!("Connected to {}.", link.port_name());
        Ok(link)
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct PolicyArgs {
    /// Override the limits of one field (repeatable), e.g. a.target=-45:45:0.5
    #[arg(long = "limit", value_name = "FIELD=MIN:MAX:STEP", value_parser = parse_limit)]
    limits: Vec<(Field, FieldPolicy)>,
}

impl PolicyArgs {
    pub fn policies(&self) -> SetpointPolicies {
        let mut policies = SetpointPolicies::default();
        for &(field, policy) in self.limits.iter() {
            *policies.get_mut(field) = policy;
        }
        policies
    }
}

fn parse_limit(s: &str) -> anyhow::Result<(Field, FieldPolicy)> {
    let (field, limits) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected FIELD=MIN:MAX:STEP"))?;

    let parts = limits
        .split(':')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()?;
    anyhow::ensure!(parts.len() == 3, "expected MIN:MAX:STEP, got {:?}", limits);

    Ok((field.parse()?, FieldPolicy::new(parts[0], parts[1], parts[2])?))
}

/// Print an informational line as it arrived.
pub fn print_info(info: headlib::protocol::InfoFrame<'_>) {
    println!("{}", info.text);
}

pub fn format_telemetry(t: &MotorTelemetry) -> String {
    fn moving(m: bool) -> char {
        if m {
            '*'
        } else {
            ' '
        }
    }

    format!(
        "A{} {:>8.2} deg {:>7.1} /s   B{} {:>8.2} deg {:>7.1} /s",
        moving(t.moving_a),
        t.position_a,
        t.speed_a,
        moving(t.moving_b),
        t.position_b,
        t.speed_b,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit_parses() {
        let (field, policy) = parse_limit("a.target=-45:45:0.5").unwrap();
        assert_eq!(field, Field::TargetA);
        assert_eq!((policy.min(), policy.max(), policy.step()), (-45.0, 45.0, 0.5));
    }

    #[test]
    fn bad_limits() {
        assert!(parse_limit("a.target").is_err());
        assert!(parse_limit("a.target=1:2").is_err());
        assert!(parse_limit("a.target=2:1:1").is_err());
        assert!(parse_limit("a.target=0:1:0").is_err());
        assert!(parse_limit("z.target=0:1:1").is_err());
    }

    #[test]
    fn limits_override_defaults() {
        let args = PolicyArgs {
            limits: vec![parse_limit("b.speed=10:20:5").unwrap()],
        };
        let policies = args.policies();
        assert_eq!(policies.get(Field::SpeedB).max(), 20.0);
        assert_eq!(
            policies.get(Field::SpeedA),
            SetpointPolicies::default().get(Field::SpeedA)
        );
    }

    #[test]
    fn transports() {
        use clap::Parser;

        #[derive(clap::Parser)]
        struct Opts {
            #[command(flatten)]
            port: SerialPortArgs,
        }

        let opts = Opts::parse_from(["x", "localhost:8855", "--tcp", "--timeout-ms", "50"]);
        let config = opts.port.config();
        assert_eq!(config.transport, Transport::Tcp);
        assert_eq!(config.port, "localhost:8855");
        assert_eq!(config.read_timeout, Duration::from_millis(50));

        let opts = Opts::parse_from(["x", "/dev/pts/3", "--plain-file"]);
        assert_eq!(opts.port.config().transport, Transport::File);
    }
}
