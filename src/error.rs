//! Status and fault model.
//!
//! Every layer of the command core reports by value with a signed status
//! code: zero is terminal success, positive codes are busy/continuation
//! states ("call me again with the same key context"), and negative codes
//! are terminal faults that carry the offending JSON key for diagnostics.
//! Busy codes are not errors and must never be surfaced as failures.

use core::fmt;

/// Result type alias for the configuration layer.
pub type Result<T> = core::result::Result<T, ConfigError>;

/// Maximum length of a fault's offending-key capture.
pub const FAULT_KEY_LEN: usize = 32;

/// Command and machine status.
///
/// The processing states (`BusyParsed`, `BusyOk`, `BusyMoving`,
/// `BusyCalibrating`) instruct the transport to re-invoke the dispatcher
/// with the same command; everything else is terminal and produces exactly
/// one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// Terminal success.
    Ok,
    /// Request parsed; dispatch has not started or the next array element
    /// is pending.
    BusyParsed,
    /// A long operation accepted more input and continues.
    BusyOk,
    /// A motion operation is in flight.
    BusyMoving,
    /// A calibration operation (probe) is in flight.
    BusyCalibrating,
    /// Terminal: display asked the operator to idle.
    WaitIdle,
    /// Terminal: display is waiting on the camera.
    WaitCamera,
    /// Terminal: display is waiting on the operator.
    WaitOperator,
    /// Terminal: display signals motion in progress.
    WaitMoving,
    /// Terminal: display signals generic busy.
    WaitBusy,
    /// Terminal: display signals an error condition.
    WaitError,
    /// Terminal: the in-flight operation was cancelled by the caller.
    WaitCancelled,
    /// Terminal failure carrying the offending key.
    Fault(Fault),
}

/// A terminal failure: the fault code plus the JSON key that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    /// What went wrong.
    pub code: FaultCode,
    /// The offending key, truncated to [`FAULT_KEY_LEN`]. Empty when the
    /// failing layer had no key context; the dispatcher fills it in.
    pub key: heapless::String<FAULT_KEY_LEN>,
}

impl Status {
    /// Build a fault status for `code` at `key`.
    pub fn fault(code: FaultCode, key: &str) -> Self {
        let mut k = heapless::String::new();
        let mut take = key.len().min(FAULT_KEY_LEN);
        while !key.is_char_boundary(take) {
            take -= 1;
        }
        let _ = k.push_str(&key[..take]);
        Status::Fault(Fault { code, key: k })
    }

    /// True for the busy/continuation states that require re-invocation.
    #[inline]
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            Status::BusyParsed | Status::BusyOk | Status::BusyMoving | Status::BusyCalibrating
        )
    }

    /// True for terminal failures only; busy and wait states are not errors.
    #[inline]
    pub fn is_fault(&self) -> bool {
        matches!(self, Status::Fault(_))
    }

    /// True once the command is finished, successfully or not.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !self.is_processing()
    }

    /// If this is a fault with an empty key, attach `key`; otherwise pass
    /// through unchanged. Lets leaf layers (the trajectory engine) fault
    /// without key context and the dispatcher supply it.
    pub fn with_key(self, key: &str) -> Self {
        match self {
            Status::Fault(f) if f.key.is_empty() => Status::fault(f.code, key),
            other => other,
        }
    }

    /// The offending key, if this is a fault.
    pub fn fault_key(&self) -> Option<&str> {
        match self {
            Status::Fault(f) => Some(f.key.as_str()),
            _ => None,
        }
    }

    /// The fault code, if this is a fault.
    pub fn fault_code(&self) -> Option<FaultCode> {
        match self {
            Status::Fault(f) => Some(f.code),
            _ => None,
        }
    }

    /// Signed wire code: 0 success, positive busy/wait, negative fault.
    pub fn code(&self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::BusyParsed => 10,
            Status::BusyOk => 11,
            Status::BusyMoving => 12,
            Status::BusyCalibrating => 13,
            Status::WaitIdle => 20,
            Status::WaitCamera => 21,
            Status::WaitOperator => 22,
            Status::WaitMoving => 23,
            Status::WaitBusy => 24,
            Status::WaitError => 25,
            Status::WaitCancelled => 26,
            Status::Fault(f) => f.code as i32,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Fault(fault) => write!(f, "{} at '{}'", fault.code, fault.key),
            other => write!(f, "status {}", other.code()),
        }
    }
}

/// Fault catalogue. Wire codes are the enum discriminants, all negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FaultCode {
    // Malformed requests
    /// Request line is not valid JSON.
    JsonParse = -1,
    /// Request root is neither an object nor an array of objects.
    JsonCommand = -2,
    /// A group key required a nested object.
    JsonObject = -3,
    /// A JSON array was shorter than required.
    JsonArrayLen = -4,
    /// The JSON value type does not match the field.
    WrongType = -5,
    /// An address key must start with a decimal digit.
    JsonDigit = -6,
    /// Expected a string value.
    JsonString = -7,
    /// Expected a boolean value.
    JsonBool = -8,
    /// Analog value outside 0..=255.
    Json255 = -9,
    /// A required field is missing.
    FieldRequired = -10,
    /// Expected a numeric array or hex string.
    FieldArray = -11,
    /// Invalid hex pair in a stroke payload.
    FieldHex = -12,
    /// A field echo could not be written back.
    FieldEcho = -13,
    // Value errors
    /// Narrowing to the field's native type lost precision or range.
    ValueRange = -20,
    /// A stroke segment delta is outside [-127, 127].
    RangeError = -21,
    /// A positive-only field was given a non-positive value.
    NonPositive = -22,
    // Routing errors
    /// Key not recognized by any handler.
    UnrecognizedName = -30,
    /// Key does not name a motor.
    NoMotor = -31,
    /// Motor index outside 1..=4.
    MotorIndex = -32,
    /// Key does not name an axis.
    AxisError = -33,
    /// Group is not valid under the active topology.
    TopologyName = -34,
    /// Field requires the delta topology.
    MtoField = -35,
    /// An output-only field was given a value.
    OutputField = -36,
    /// Command issued in a state that cannot accept it.
    BadState = -37,
    /// Recognized but unimplemented operation.
    NotImplemented = -38,
    // Stroke errors
    /// Stroke has no segments.
    StrokeNull = -40,
    /// Per-motor segment arrays differ in length.
    SegLenMismatch = -41,
    /// Plan cannot reach its declared end position.
    StrokeEnd = -42,
    /// Segment count exceeds stroke capacity.
    StrokeMaxLen = -43,
    /// Planned duration is invalid for the velocity budget.
    StrokeTime = -44,
    // Physical / state errors
    /// Target axis is disabled.
    AxisDisabled = -50,
    /// Operation needs a pin that is not assigned.
    PinRequired = -51,
    /// Motion would cross the minimum travel limit.
    TravelMin = -52,
    /// Motion would cross the maximum travel limit.
    TravelMax = -53,
    /// Probe reached its end position without a contact.
    ProbeFailed = -54,
    /// Pin is reserved by the machine core.
    CorePin = -55,
    /// Pin number outside the valid range.
    NoSuchPin = -56,
    /// EEPROM address out of range.
    EepromAddr = -57,
    /// EEPROM value too long.
    EepromValue = -58,
    /// Kinematic conversion has no valid solution.
    KinematicXyz = -59,
    /// Position group is malformed.
    PositionError = -60,
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FaultCode::JsonParse => "invalid JSON",
            FaultCode::JsonCommand => "request must be an object or array of objects",
            FaultCode::JsonObject => "expected a nested object",
            FaultCode::JsonArrayLen => "array too short",
            FaultCode::WrongType => "value type mismatch",
            FaultCode::JsonDigit => "address must start with a digit",
            FaultCode::JsonString => "expected a string",
            FaultCode::JsonBool => "expected a boolean",
            FaultCode::Json255 => "analog value must be 0..=255",
            FaultCode::FieldRequired => "required field missing",
            FaultCode::FieldArray => "expected array or hex string",
            FaultCode::FieldHex => "invalid hex pair",
            FaultCode::FieldEcho => "field echo failed",
            FaultCode::ValueRange => "value out of range for field",
            FaultCode::RangeError => "segment delta outside [-127,127]",
            FaultCode::NonPositive => "value must be positive",
            FaultCode::UnrecognizedName => "unrecognized key",
            FaultCode::NoMotor => "no such motor",
            FaultCode::MotorIndex => "motor index out of range",
            FaultCode::AxisError => "no such axis",
            FaultCode::TopologyName => "group not valid for topology",
            FaultCode::MtoField => "field requires delta topology",
            FaultCode::OutputField => "field is output-only",
            FaultCode::BadState => "wrong state for command",
            FaultCode::NotImplemented => "not implemented",
            FaultCode::StrokeNull => "stroke has no segments",
            FaultCode::SegLenMismatch => "segment length mismatch",
            FaultCode::StrokeEnd => "stroke cannot reach declared end",
            FaultCode::StrokeMaxLen => "too many segments",
            FaultCode::StrokeTime => "invalid stroke timing",
            FaultCode::AxisDisabled => "axis disabled",
            FaultCode::PinRequired => "required pin not assigned",
            FaultCode::TravelMin => "minimum travel exceeded",
            FaultCode::TravelMax => "maximum travel exceeded",
            FaultCode::ProbeFailed => "probe found no contact",
            FaultCode::CorePin => "pin reserved by machine",
            FaultCode::NoSuchPin => "no such pin",
            FaultCode::EepromAddr => "EEPROM address out of range",
            FaultCode::EepromValue => "EEPROM value too long",
            FaultCode::KinematicXyz => "no kinematic solution",
            FaultCode::PositionError => "malformed position group",
        };
        write!(f, "{}", msg)
    }
}

/// Configuration-related errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Failed to parse TOML configuration.
    ParseError(heapless::String<128>),
    /// Axis name not recognized (expected x, y, z, a, b, or c).
    UnknownAxis(heapless::String<8>),
    /// Motor name not recognized (expected 1..=4).
    UnknownMotor(heapless::String<8>),
    /// Pin number outside the valid range.
    InvalidPin {
        /// Axis the pin was assigned to.
        axis: heapless::String<8>,
        /// The out-of-range pin number.
        pin: i32,
    },
    /// A required positive quantity was zero or negative.
    NonPositive(heapless::String<16>),
    /// File I/O error.
    IoError(heapless::String<128>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError(msg) => write!(f, "parse error: {}", msg),
            ConfigError::UnknownAxis(name) => write!(f, "unknown axis '{}'", name),
            ConfigError::UnknownMotor(name) => write!(f, "unknown motor '{}'", name),
            ConfigError::InvalidPin { axis, pin } => {
                write!(f, "invalid pin {} on axis '{}'", pin, axis)
            }
            ConfigError::NonPositive(field) => write!(f, "'{}' must be positive", field),
            ConfigError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
