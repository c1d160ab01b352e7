//! # quadstep
//!
//! JSON command processing and four-axis stepper trajectory core for small
//! CNC machines and delta robots.
//!
//! Terse JSON commands arrive over a serial link and turn into coordinated
//! multi-axis pulse sequences. Long operations (moves, homing, probing,
//! self-test) never block: handlers return a busy status and are polled
//! again on the next call, so one control loop can interleave command
//! processing with everything else the machine does.
//!
//! ## Quick start
//!
//! ```rust
//! use quadstep::{Command, Dispatcher, Machine, SimPort, Status};
//!
//! let mut machine = Machine::new(SimPort::new());
//! let mut dispatcher = Dispatcher::new();
//! let mut out = Vec::new();
//!
//! // Query every system parameter.
//! let mut cmd = Command::parse(r#"{"sys":""}"#, machine.ticks());
//! let status = dispatcher.process(&mut machine, &mut cmd, &mut out);
//! assert_eq!(status, Status::Ok);
//! ```
//!
//! The wire protocol is newline-delimited JSON. An empty-string value at a
//! leaf key reads the field; any other value writes it; the response
//! echoes the request with results in place plus a status code.
//!
//! ## Concurrency model
//!
//! Single-threaded and cooperative. The only suspension mechanism is
//! returning a busy status; nothing inside the core blocks except a few
//! explicitly bounded settle delays in the self-test handlers. Shared
//! state (the machine context, the in-flight stroke) is safe because
//! access is strictly sequential across external calls.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod json;
pub mod kinematics;
pub mod machine;
pub mod port;
pub mod quad;
pub mod sim;
pub mod stroke;

// Re-exports for ergonomic API
pub use config::{load_config, validate_config, MachineConfig};
pub use error::{ConfigError, Fault, FaultCode, Result, Status};
pub use json::{Command, Dispatcher};
pub use kinematics::{GeomParams, Kinematics, Step3, Topology, Xyz};
pub use machine::{Axis, DisplayState, Machine, OutputMode};
pub use port::{MachinePort, PinId, PinMode, MAX_PIN, NO_PIN};
pub use quad::{Quad, StepCoord, Ticks, MOTOR_COUNT, TICKS_PER_SECOND};
pub use sim::{SimKinematics, SimPort};
pub use stroke::{PulseSink, Stroke, StrokeBuilder, STROKE_CAPACITY};

/// Major version reported by `sys v`.
pub const VERSION_MAJOR: i32 = 0;
/// Minor version reported by `sys v`.
pub const VERSION_MINOR: i32 = 1;
/// Patch version reported by `sys v`.
pub const VERSION_PATCH: i32 = 0;
