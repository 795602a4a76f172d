//! The line-oriented wire protocol spoken by the motor head firmware.
//!
//! Inbound, the firmware sends telemetry lines tagged `P:` plus free-form
//! informational lines. Outbound, the host sends untagged command lines of
//! seven comma-separated fields.

use nom::character::complete::space0;
use nom::error::Error;
use nom::sequence::delimited;
use nom::IResult;

pub const BAUD_RATE: u32 = 115200;

/// Tag that starts every telemetry line.
pub const TELEMETRY_PREFIX: &str = "P:";

/// Number of comma-separated fields in a telemetry body.
pub const TELEMETRY_FIELDS: usize = 6;

/// Number of comma-separated fields in a command line.
pub const COMMAND_FIELDS: usize = 7;

/// Direction policy for the rotational axis (axis B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum RotationMode {
    ClockWise = 0,
    CounterClockWise = 1,
    #[default]
    Shortest = 2,
}

impl RotationMode {
    /// The integer code used on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::ClockWise),
            1 => Some(Self::CounterClockWise),
            2 => Some(Self::Shortest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rotation mode {0:?}, expected cw, ccw, or shortest")]
pub struct UnknownRotationMode(pub String);

impl std::str::FromStr for RotationMode {
    type Err = UnknownRotationMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cw" | "clockwise" | "0" => Ok(Self::ClockWise),
            "ccw" | "counterclockwise" | "1" => Ok(Self::CounterClockWise),
            "shortest" | "2" => Ok(Self::Shortest),
            _ => Err(UnknownRotationMode(s.to_owned())),
        }
    }
}

/// One snapshot of the state of both axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorTelemetry {
    pub moving_a: bool,
    pub position_a: f64,
    pub speed_a: f64,
    pub moving_b: bool,
    pub position_b: f64,
    pub speed_b: f64,
}

/// A complete set of motion setpoints for both axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommandFrame {
    pub target_a: f64,
    pub speed_a: f64,
    pub accel_a: f64,
    pub target_b: f64,
    pub speed_b: f64,
    pub direction_b: RotationMode,
    pub accel_b: f64,
}

/// What kind of informational line the firmware sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InfoKind {
    /// `S:` status lines.
    Status,
    /// `I:` informational lines.
    Info,
    /// `E:` error reports.
    Error,
    /// Anything without a recognized tag.
    Untagged,
}

/// A non-telemetry line. These are never parsed further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoFrame<'a> {
    pub kind: InfoKind,
    /// The whole line, tag included.
    pub text: &'a str,
}

/// A classified inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frame<'a> {
    /// A telemetry line, with the `P:` tag removed.
    Telemetry(&'a str),
    Info(InfoFrame<'a>),
}

/// Sort an inbound line into telemetry or informational.
///
/// `line` should already have its line ending removed.
pub fn classify(line: &str) -> Frame<'_> {
    let telemetry = nom::bytes::complete::tag::<_, _, Error<&str>>(TELEMETRY_PREFIX)(line);
    if let Ok((body, _)) = telemetry {
        return Frame::Telemetry(body);
    }

    let tagged: IResult<&str, InfoKind> = nom::branch::alt((
        nom::combinator::value(InfoKind::Status, nom::bytes::complete::tag("S:")),
        nom::combinator::value(InfoKind::Info, nom::bytes::complete::tag("I:")),
        nom::combinator::value(InfoKind::Error, nom::bytes::complete::tag("E:")),
    ))(line);
    let kind = tagged.map(|(_, kind)| kind).unwrap_or(InfoKind::Untagged);

    Frame::Info(InfoFrame { kind, text: line })
}

/// Why a line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("field {index} is not a valid {expected}: {text:?}")]
    InvalidField {
        index: usize,
        expected: &'static str,
        text: String,
    },
    #[error("line is not tagged as telemetry")]
    NotTelemetry,
}

/// A 0/1 moving flag. Any non-zero integer counts as moving.
fn flag(input: &str) -> IResult<&str, bool> {
    nom::combinator::map(
        delimited(space0, nom::character::complete::i64, space0),
        |v| v != 0,
    )(input)
}

/// A finite decimal number.
fn number(input: &str) -> IResult<&str, f64> {
    nom::combinator::verify(
        delimited(space0, nom::number::complete::double, space0),
        |v: &f64| v.is_finite(),
    )(input)
}

/// A rotation mode code, 0 through 2.
fn rotation(input: &str) -> IResult<&str, RotationMode> {
    nom::combinator::map_opt(
        delimited(space0, nom::character::complete::u8, space0),
        RotationMode::from_code,
    )(input)
}

/// Run a field parser over the whole of `text`.
fn field<'a, O>(
    index: usize,
    expected: &'static str,
    text: &'a str,
    parser: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> Result<O, DecodeError> {
    nom::combinator::all_consuming(parser)(text)
        .map(|(_, v)| v)
        .map_err(|_| DecodeError::InvalidField {
            index,
            expected,
            text: text.to_owned(),
        })
}

/// Split `body` on commas, insisting on exactly `expected` fields.
fn split_fields(body: &str, expected: usize) -> Result<Vec<&str>, DecodeError> {
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() != expected {
        return Err(DecodeError::FieldCount {
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

/// Decode the body of a telemetry line (everything after `P:`).
///
/// Either all six fields decode or nothing does.
pub fn decode_telemetry(body: &str) -> Result<MotorTelemetry, DecodeError> {
    let f = split_fields(body, TELEMETRY_FIELDS)?;
    Ok(MotorTelemetry {
        moving_a: field(0, "flag", f[0], flag)?,
        position_a: field(1, "number", f[1], number)?,
        speed_a: field(2, "number", f[2], number)?,
        moving_b: field(3, "flag", f[3], flag)?,
        position_b: field(4, "number", f[4], number)?,
        speed_b: field(5, "number", f[5], number)?,
    })
}

/// Decode a whole inbound line that must be telemetry.
pub fn decode_telemetry_line(line: &str) -> Result<MotorTelemetry, DecodeError> {
    match classify(line.trim()) {
        Frame::Telemetry(body) => decode_telemetry(body),
        Frame::Info(_) => Err(DecodeError::NotTelemetry),
    }
}

/// Render a telemetry line, tag included, without line ending.
///
/// This is what the firmware sends; the simulator uses it.
pub fn encode_telemetry(telemetry: &MotorTelemetry) -> String {
    format!(
        "{}{},{},{},{},{},{}",
        TELEMETRY_PREFIX,
        telemetry.moving_a as u8,
        Decimal(telemetry.position_a),
        Decimal(telemetry.speed_a),
        telemetry.moving_b as u8,
        Decimal(telemetry.position_b),
        Decimal(telemetry.speed_b),
    )
}

/// Render a command line, without line ending.
pub fn encode_command(frame: &CommandFrame) -> String {
    frame.to_string()
}

/// Decode a command line, as the firmware would.
pub fn decode_command(line: &str) -> Result<CommandFrame, DecodeError> {
    let f = split_fields(line.trim(), COMMAND_FIELDS)?;
    Ok(CommandFrame {
        target_a: field(0, "number", f[0], number)?,
        speed_a: field(1, "number", f[1], number)?,
        accel_a: field(2, "number", f[2], number)?,
        target_b: field(3, "number", f[3], number)?,
        speed_b: field(4, "number", f[4], number)?,
        direction_b: field(5, "rotation mode", f[5], rotation)?,
        accel_b: field(6, "number", f[6], number)?,
    })
}

impl std::fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{}",
            Decimal(self.target_a),
            Decimal(self.speed_a),
            Decimal(self.accel_a),
            Decimal(self.target_b),
            Decimal(self.speed_b),
            self.direction_b.code(),
            Decimal(self.accel_b),
        )
    }
}

/// Wire formatting for numbers: shortest round-trip digits, never an
/// exponent, and always at least one fractional digit.
struct Decimal(f64);

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.0.is_finite() && self.0.fract() == 0.0 {
            write!(f, "{:.1}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}
