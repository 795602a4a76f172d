use crate::link::{WriteError, WriteLine};
use crate::logger::{Direction, FrameLogger};
use crate::normalize::FieldPolicy;
use crate::protocol::{self, CommandFrame, RotationMode};

/// The numeric fields of a command, by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    TargetA,
    SpeedA,
    AccelA,
    TargetB,
    SpeedB,
    AccelB,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::TargetA,
        Field::SpeedA,
        Field::AccelA,
        Field::TargetB,
        Field::SpeedB,
        Field::AccelB,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::TargetA => "a.target",
            Field::SpeedA => "a.speed",
            Field::AccelA => "a.accel",
            Field::TargetB => "b.target",
            Field::SpeedB => "b.speed",
            Field::AccelB => "b.accel",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field {0:?}")]
pub struct UnknownField(pub String);

impl std::str::FromStr for Field {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Field::ALL
            .into_iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| UnknownField(s.to_owned()))
    }
}

/// Setpoints exactly as the operator entered them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSetpoints {
    pub target_a: f64,
    pub speed_a: f64,
    pub accel_a: f64,
    pub target_b: f64,
    pub speed_b: f64,
    pub direction_b: RotationMode,
    pub accel_b: f64,
}

impl RawSetpoints {
    pub fn get(&self, field: Field) -> f64 {
        match field {
            Field::TargetA => self.target_a,
            Field::SpeedA => self.speed_a,
            Field::AccelA => self.accel_a,
            Field::TargetB => self.target_b,
            Field::SpeedB => self.speed_b,
            Field::AccelB => self.accel_b,
        }
    }

    pub fn set(&mut self, field: Field, value: f64) {
        let slot = match field {
            Field::TargetA => &mut self.target_a,
            Field::SpeedA => &mut self.speed_a,
            Field::AccelA => &mut self.accel_a,
            Field::TargetB => &mut self.target_b,
            Field::SpeedB => &mut self.speed_b,
            Field::AccelB => &mut self.accel_b,
        };
        *slot = value;
    }
}

impl Default for RawSetpoints {
    fn default() -> Self {
        Self {
            target_a: 0.0,
            speed_a: 1500.0,
            accel_a: 50.0,
            target_b: 0.0,
            speed_b: 1500.0,
            direction_b: RotationMode::Shortest,
            accel_b: 50.0,
        }
    }
}

/// Per-field ranges and steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointPolicies {
    pub target_a: FieldPolicy,
    pub speed_a: FieldPolicy,
    pub accel_a: FieldPolicy,
    pub target_b: FieldPolicy,
    pub speed_b: FieldPolicy,
    pub accel_b: FieldPolicy,
}

impl SetpointPolicies {
    pub fn get(&self, field: Field) -> &FieldPolicy {
        match field {
            Field::TargetA => &self.target_a,
            Field::SpeedA => &self.speed_a,
            Field::AccelA => &self.accel_a,
            Field::TargetB => &self.target_b,
            Field::SpeedB => &self.speed_b,
            Field::AccelB => &self.accel_b,
        }
    }

    pub fn get_mut(&mut self, field: Field) -> &mut FieldPolicy {
        match field {
            Field::TargetA => &mut self.target_a,
            Field::SpeedA => &mut self.speed_a,
            Field::AccelA => &mut self.accel_a,
            Field::TargetB => &mut self.target_b,
            Field::SpeedB => &mut self.speed_b,
            Field::AccelB => &mut self.accel_b,
        }
    }
}

const TILT_TARGET: FieldPolicy = FieldPolicy {
    min: -90.0,
    max: 90.0,
    step: 0.01,
};

const PAN_TARGET: FieldPolicy = FieldPolicy {
    min: 0.0,
    max: 359.99,
    step: 0.01,
};

const SPEED: FieldPolicy = FieldPolicy {
    min: 1.0,
    max: 3000.0,
    step: 1.0,
};

const ACCEL: FieldPolicy = FieldPolicy {
    min: 1.0,
    max: 10000.0,
    step: 1.0,
};

impl Default for SetpointPolicies {
    fn default() -> Self {
        Self {
            target_a: TILT_TARGET,
            speed_a: SPEED,
            accel_a: ACCEL,
            target_b: PAN_TARGET,
            speed_b: SPEED,
            accel_b: ACCEL,
        }
    }
}

/// A setpoint that can't be normalized.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("{field} must be a finite number, got {value}")]
pub struct SetpointError {
    pub field: Field,
    pub value: f64,
}

/// Failure to send a command.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Setpoint(#[from] SetpointError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Turns raw operator setpoints into command frames and puts them on the
/// wire.
#[derive(Debug, Clone, Default)]
pub struct CommandPipeline {
    policies: SetpointPolicies,
    logger: FrameLogger,
}

impl CommandPipeline {
    pub fn new(policies: SetpointPolicies, logger: FrameLogger) -> Self {
        Self { policies, logger }
    }

    pub fn policies(&self) -> &SetpointPolicies {
        &self.policies
    }

    /// Snap and clamp every field with its own policy.
    pub fn build_command(&self, raw: &RawSetpoints) -> Result<CommandFrame, SetpointError> {
        let field = |field: Field| {
            let value = raw.get(field);
            if value.is_finite() {
                Ok(self.policies.get(field).normalize(value))
            } else {
                Err(SetpointError { field, value })
            }
        };

        Ok(CommandFrame {
            target_a: field(Field::TargetA)?,
            speed_a: field(Field::SpeedA)?,
            accel_a: field(Field::AccelA)?,
            target_b: field(Field::TargetB)?,
            speed_b: field(Field::SpeedB)?,
            direction_b: raw.direction_b,
            accel_b: field(Field::AccelB)?,
        })
    }

    /// Encode `frame`, write it, and log it.
    pub fn send<W>(&self, link: &W, frame: &CommandFrame) -> Result<(), SendError>
    where
        W: WriteLine + ?Sized,
    {
        let text = protocol::encode_command(frame);
        link.write_line(&text)?;
        self.logger.log(Direction::Outbound, &text);
        Ok(())
    }

    /// Build a command from `raw` and send it, returning what was sent.
    pub fn submit<W>(&self, link: &W, raw: &RawSetpoints) -> Result<CommandFrame, SendError>
    where
        W: WriteLine + ?Sized,
    {
        let frame = self.build_command(raw)?;
        self.send(link, &frame)?;
        Ok(frame)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
        fail: bool,
    }

    impl WriteLine for Recorder {
        fn write_line(&self, text: &str) -> Result<(), WriteError> {
            if self.fail {
                return Err(WriteError::NotOpen);
            }
            self.lines.lock().unwrap().push(text.to_owned());
            Ok(())
        }
    }

    fn scenario() -> RawSetpoints {
        RawSetpoints {
            target_a: 45.0,
            speed_a: 17.0,
            accel_a: 50.0,
            target_b: 10.0,
            speed_b: 17.0,
            direction_b: RotationMode::Shortest,
            accel_b: 50.0,
        }
    }

    #[test]
    fn scenario_on_the_wire() {
        let pipeline = CommandPipeline::default();
        let link = Recorder::default();
        pipeline.submit(&link, &scenario()).unwrap();
        assert_eq!(
            *link.lines.lock().unwrap(),
            vec!["45.0,17.0,50.0,10.0,17.0,2,50.0".to_owned()]
        );
    }

    #[test]
    fn every_field_normalized() {
        let pipeline = CommandPipeline::default();
        let frame = pipeline
            .build_command(&RawSetpoints {
                target_a: 123.456,
                speed_a: 0.2,
                accel_a: 49.5,
                target_b: 359.996,
                speed_b: 1499.5,
                direction_b: RotationMode::CounterClockWise,
                accel_b: 20000.0,
            })
            .unwrap();
        assert_eq!(
            frame,
            CommandFrame {
                target_a: 90.0,
                speed_a: 1.0,
                accel_a: 50.0,
                target_b: 359.99,
                speed_b: 1500.0,
                direction_b: RotationMode::CounterClockWise,
                accel_b: 10000.0,
            }
        );
    }

    #[test]
    fn custom_policy() {
        let mut policies = SetpointPolicies::default();
        *policies.get_mut(Field::TargetA) = FieldPolicy::new(-45.0, 45.0, 0.5).unwrap();
        let pipeline = CommandPipeline::new(policies, FrameLogger::disabled());

        let mut raw = scenario();
        raw.set(Field::TargetA, 12.3);
        assert_eq!(pipeline.build_command(&raw).unwrap().target_a, 12.5);
        raw.set(Field::TargetA, 60.0);
        assert_eq!(pipeline.build_command(&raw).unwrap().target_a, 45.0);
    }

    #[test]
    fn non_finite_rejected() {
        let pipeline = CommandPipeline::default();
        let link = Recorder::default();
        let mut raw = scenario();
        raw.speed_b = f64::NAN;

        let err = pipeline.submit(&link, &raw).unwrap_err();
        assert!(matches!(
            err,
            SendError::Setpoint(SetpointError {
                field: Field::SpeedB,
                ..
            })
        ));
        assert!(link.lines.lock().unwrap().is_empty());
    }

    #[test]
    fn write_failure_passed_through() {
        let pipeline = CommandPipeline::default();
        let link = Recorder {
            fail: true,
            ..Default::default()
        };
        let frame = pipeline.build_command(&scenario()).unwrap();
        assert!(matches!(
            pipeline.send(&link, &frame),
            Err(SendError::Write(WriteError::NotOpen))
        ));
    }

    #[test]
    fn outbound_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.log");
        let pipeline = CommandPipeline::new(
            SetpointPolicies::default(),
            FrameLogger::open(&path).unwrap(),
        );
        pipeline.submit(&Recorder::default(), &scenario()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with(" Serial -> 45.0,17.0,50.0,10.0,17.0,2,50.0\n"));
    }

    #[test]
    fn field_names() {
        for field in Field::ALL {
            assert_eq!(field.name().parse(), Ok(field));
        }
        assert_eq!("B.Speed".parse(), Ok(Field::SpeedB));
        assert!("c.target".parse::<Field>().is_err());
    }
}
