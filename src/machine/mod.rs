//! Shared machine context.
//!
//! One [`Machine`] value owns everything the command handlers touch: the
//! axis registry, motor bindings, the in-flight [`Stroke`], system
//! parameters, display state, and the long-operation state. It is passed
//! as an explicit mutable reference through every handler call; there is
//! no ambient global state, which keeps the core testable without
//! hardware. Access is strictly single-threaded (see the crate docs).

mod axis;
mod ops;

pub use axis::Axis;
pub use ops::{MoveOp, OpState, Probe, ProbeSource, SelfTest, PROBE_DATA};

use log::debug;

use crate::error::{FaultCode, Status};
use crate::kinematics::{Kinematics, NoKinematics, Step3, Topology, Xyz};
use crate::port::{MachinePort, PinId, NO_PIN};
use crate::quad::{Quad, StepCoord, Ticks, MOTOR_COUNT};
use crate::stroke::{PulseSink, Stroke};

/// Number of addressable axes (x, y, z, a, b, c).
pub const AXIS_COUNT: usize = 6;

/// Display status values, as written through the `dpy ds` field.
pub mod display_status {
    /// Operator should let the machine idle.
    pub const WAIT_IDLE: u8 = 10;
    /// An error needs operator attention.
    pub const WAIT_ERROR: u8 = 11;
    /// Waiting on the operator.
    pub const WAIT_OPERATOR: u8 = 12;
    /// Motion in progress.
    pub const BUSY_MOVING: u8 = 13;
    /// Generic busy.
    pub const BUSY: u8 = 14;
    /// Waiting on the camera.
    pub const WAIT_CAMERA: u8 = 15;
}

/// Display and camera-light state, mutated by the `dpy` group. Actual
/// LED/panel driving is an external collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayState {
    /// Camera light red channel.
    pub camera_r: u8,
    /// Camera light green channel.
    pub camera_g: u8,
    /// Camera light blue channel.
    pub camera_b: u8,
    /// Brightness level.
    pub level: u8,
    /// Display status code (see [`display_status`]).
    pub status: u8,
}

/// Response output-mode bits (`sys om`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputMode(pub u8);

impl OutputMode {
    /// Stream an intermediate response after each array element.
    pub const ARRAY_STREAM: OutputMode = OutputMode(1);
    /// Echo `cmt` comment text.
    pub const COMMENTS: OutputMode = OutputMode(2);

    /// Whether all of `bits` are set.
    #[inline]
    pub fn contains(self, bits: OutputMode) -> bool {
        self.0 & bits.0 == bits.0
    }
}

/// The machine context.
pub struct Machine<P: MachinePort> {
    /// Hardware access.
    pub port: P,
    /// Axis registry, indexed x=0 .. c=5.
    pub axes: [Axis; AXIS_COUNT],
    /// The in-flight trajectory, overwritten in place by each motion
    /// command.
    pub stroke: Stroke,
    /// Active kinematic topology.
    pub topology: Topology,
    /// Kinematic model consumed for non-raw topologies.
    pub kinematics: Box<dyn Kinematics>,
    /// Long-operation state.
    pub op: OpState,
    /// Display state.
    pub display: DisplayState,
    /// Peak velocity budget in pulses per second (`sys mv`).
    pub v_max: i32,
    /// Seconds to ramp to peak velocity (`sys tv`).
    pub tv_max: f32,
    /// Pretty-print responses (`sys jp`).
    pub json_pretty: bool,
    /// Response streaming / comment bits (`sys om`).
    pub output_mode: OutputMode,
    /// Home automatically on startup (`sys ah`).
    pub auto_home: bool,
    /// Synchronize configuration automatically (`sys as`).
    pub auto_sync: bool,
    /// Limit-switch debounce samples (`sys db`).
    pub debounce: u8,
    /// Pulses per homing poll while seeking the switch (`sys hp`).
    pub homing_pulses: i16,
    /// Invert limit-switch sense (`sys lh`).
    pub invert_lim: bool,
    /// Pulses to back away from a latched switch (`sys lb`).
    pub latch_backoff: StepCoord,
    /// Microseconds between search pulses while homing/probing (`sys sd`).
    pub search_delay: i32,
    /// Board pin-preset selector, stored for the configuration layer
    /// (`sys pc`).
    pub pin_config: i32,
    /// Display status pin (`sys pi`).
    pub pin_status: PinId,
    /// Configuration hash last acknowledged by the host (`sys ch`).
    pub sync_hash: i32,
    /// User EEPROM region enabled (`sys eu`).
    pub ee_user_enabled: bool,
    /// Dispatcher invocation counter (`sys lp`).
    pub loops: i32,
    motor_axis: [usize; MOTOR_COUNT],
}

impl<P: MachinePort> Machine<P> {
    /// New machine over `port` with default parameters: motors 1..=4 bound
    /// to axes x..a, raw topology, all axes disabled.
    pub fn new(port: P) -> Self {
        Self {
            port,
            axes: Default::default(),
            stroke: Stroke::default(),
            topology: Topology::Raw,
            kinematics: Box::new(NoKinematics::default()),
            op: OpState::default(),
            display: DisplayState::default(),
            v_max: 12_800,
            tv_max: 0.7,
            json_pretty: false,
            output_mode: OutputMode::default(),
            auto_home: false,
            auto_sync: false,
            debounce: 2,
            homing_pulses: 3,
            invert_lim: false,
            latch_backoff: 200,
            search_delay: 800,
            pin_config: 0,
            pin_status: NO_PIN,
            sync_hash: 0,
            ee_user_enabled: false,
            loops: 0,
            motor_axis: [0, 1, 2, 3],
        }
    }

    /// Current tick clock.
    #[inline]
    pub fn ticks(&self) -> Ticks {
        self.port.ticks()
    }

    /// Axis index for a name: a letter `x y z a b c`, or a motor digit
    /// `1..=4` resolved through the motor binding.
    pub fn axis_of_name(&self, name: &str) -> Option<usize> {
        match name {
            "x" => Some(0),
            "y" => Some(1),
            "z" => Some(2),
            "a" => Some(3),
            "b" => Some(4),
            "c" => Some(5),
            _ => self.motor_of_name(name).map(|m| self.motor_axis[m]),
        }
    }

    /// Motor index for a digit name `1..=4`.
    pub fn motor_of_name(&self, name: &str) -> Option<usize> {
        match name {
            "1" => Some(0),
            "2" => Some(1),
            "3" => Some(2),
            "4" => Some(3),
            _ => None,
        }
    }

    /// Axis index bound to `motor`.
    #[inline]
    pub fn motor_axis_index(&self, motor: usize) -> usize {
        self.motor_axis[motor]
    }

    /// Bind `motor` to `axis`.
    pub fn bind_motor(&mut self, motor: usize, axis: usize) -> Status {
        if motor >= MOTOR_COUNT {
            return Status::fault(FaultCode::MotorIndex, "");
        }
        if axis >= AXIS_COUNT {
            return Status::fault(FaultCode::AxisError, "");
        }
        self.motor_axis[motor] = axis;
        Status::Ok
    }

    /// The axis driven by `motor`.
    #[inline]
    pub fn motor_axis_ref(&self, motor: usize) -> &Axis {
        &self.axes[self.motor_axis[motor]]
    }

    /// Mutable access to the axis driven by `motor`.
    #[inline]
    pub fn motor_axis_mut(&mut self, motor: usize) -> &mut Axis {
        &mut self.axes[self.motor_axis[motor]]
    }

    /// Positions of the four motors.
    pub fn motor_position(&self) -> Quad<StepCoord> {
        let mut q = Quad::default();
        for m in 0..MOTOR_COUNT {
            q.value[m] = self.motor_axis_ref(m).position;
        }
        q
    }

    /// Overwrite the four motor positions.
    pub fn set_motor_position(&mut self, pos: Quad<StepCoord>) {
        for m in 0..MOTOR_COUNT {
            self.motor_axis_mut(m).position = pos.value[m];
        }
    }

    /// Enable or disable an axis driver.
    pub fn enable_axis(&mut self, axis: usize, on: bool) {
        self.axes[axis].enable(&mut self.port, on);
    }

    /// Forward-kinematic effector position, if the topology has one.
    pub fn xyz(&self) -> Option<Xyz> {
        let pos = self.motor_position();
        self.kinematics.to_xyz(Step3 { p1: pos.value[0], p2: pos.value[1], p3: pos.value[2] })
    }

    /// True for pins the machine core owns (axis, probe, and status pins);
    /// the raw I/O group refuses to touch them.
    pub fn is_core_pin(&self, pin: PinId) -> bool {
        if pin == NO_PIN {
            return false;
        }
        if pin == self.pin_status || pin == self.op.probe.pin_probe {
            return true;
        }
        self.axes.iter().any(|a| {
            pin == a.pin_step
                || pin == a.pin_dir
                || pin == a.pin_enable
                || pin == a.pin_min
                || pin == a.pin_max
        })
    }

    /// FNV-1a hash over the configuration-bearing parameters, reported by
    /// `sys ch` so a host can detect drift.
    pub fn hash(&self) -> i32 {
        let mut h: u32 = 0x811c9dc5;
        let mut mix = |v: i32| {
            for b in v.to_le_bytes() {
                h ^= b as u32;
                h = h.wrapping_mul(16777619);
            }
        };
        mix(self.v_max);
        mix(self.tv_max.to_bits() as i32);
        mix(self.topology as i32);
        mix(self.latch_backoff);
        mix(self.search_delay);
        mix(self.homing_pulses as i32);
        for m in 0..MOTOR_COUNT {
            mix(self.motor_axis[m] as i32);
        }
        for a in &self.axes {
            mix(a.pin_step as i32);
            mix(a.pin_dir as i32);
            mix(a.pin_enable as i32);
            mix(a.pin_min as i32);
            mix(a.home);
            mix(a.travel_min);
            mix(a.travel_max);
            mix(a.microsteps as i32);
            mix(a.step_angle.to_bits() as i32);
            mix(if a.is_enabled() { 1 } else { 0 });
        }
        h as i32
    }

    /// Run one traversal quantum of the in-flight stroke against this
    /// machine's motors.
    pub fn traverse_stroke(&mut self, t: Ticks) -> Status {
        let mut stroke = core::mem::take(&mut self.stroke);
        let status = stroke.traverse(t, self);
        self.stroke = stroke;
        status
    }

    /// Emit raw pulse counts on all motors, most-lagging-motor first, with
    /// per-pulse pacing. Used by the self-test step forms; runs to
    /// completion (bounded by the requested counts).
    pub fn pulse(&mut self, steps: Quad<StepCoord>) -> Status {
        let mut remaining = steps;
        let pace = (0..MOTOR_COUNT)
            .filter(|&m| steps.value[m] != 0)
            .map(|m| self.motor_axis_ref(m).us_delay)
            .max()
            .unwrap_or(0);
        while !remaining.is_zero() {
            let mut pulse = Quad::<i8>::default();
            for m in 0..MOTOR_COUNT {
                match remaining.value[m] {
                    0 => {}
                    v if v > 0 => {
                        pulse.value[m] = 1;
                        remaining.value[m] -= 1;
                    }
                    _ => {
                        pulse.value[m] = -1;
                        remaining.value[m] += 1;
                    }
                }
            }
            let status = self.step(pulse);
            if status.is_fault() {
                return status;
            }
            if pace > 0 {
                self.port.delay_us(pace as u32);
            }
        }
        Status::Ok
    }

    /// One homing quantum.
    ///
    /// Every axis flagged `homing` seeks toward its minimum switch by
    /// [`Machine::homing_pulses`] per call; on contact it backs off the
    /// latch and lands on its home position. Returns busy-moving while any
    /// axis is still homing, then terminal success.
    pub fn home(&mut self, _status: Status) -> Status {
        let invert = self.invert_lim;
        let homing_pulses = self.homing_pulses.max(1);
        let latch_backoff = self.latch_backoff;
        let search_delay = self.search_delay;
        let Machine { axes, port, .. } = self;

        let mut any = false;
        for axis in axes.iter_mut().filter(|a| a.homing) {
            any = true;
            if axis.pin_min == NO_PIN {
                return Status::fault(FaultCode::PinRequired, "");
            }
            axis.read_at_min(port, invert);
            if axis.at_min {
                for _ in 0..latch_backoff {
                    axis.pulse(port, true);
                }
                axis.position = axis.home;
                axis.homing = false;
                debug!("axis homed at {}", axis.home);
            } else {
                for _ in 0..homing_pulses {
                    axis.pulse(port, false);
                    if search_delay > 0 {
                        port.delay_us(search_delay as u32);
                    }
                }
            }
        }
        if any {
            Status::BusyMoving
        } else {
            Status::Ok
        }
    }

    /// One probe quantum: sample the contact pin, then advance every motor
    /// one pulse toward its declared end.
    ///
    /// Returns terminal success on contact (recording a sample), the probe
    /// fault if the end is reached without contact, and busy-calibrating
    /// otherwise.
    pub fn probe(&mut self, _status: Status) -> Status {
        if self.op.probe.pin_probe == NO_PIN {
            return Status::fault(FaultCode::PinRequired, "");
        }
        let raw = self.port.digital_read(self.op.probe.pin_probe);
        let contact = raw != self.op.probe.invert_probe;
        if contact {
            let sample = match self.op.probe.data_source {
                ProbeSource::Z => self.xyz().map(|p| p.z).unwrap_or(0.0),
                ProbeSource::None => self.motor_axis_ref(0).position as f32,
            };
            self.op.probe.record(sample);
            debug!("probe contact, sample {}", sample);
            return Status::Ok;
        }

        let end = self.op.probe.end;
        let mut moved = false;
        for m in 0..MOTOR_COUNT {
            let delta = end.value[m] - self.motor_axis_ref(m).position;
            if delta == 0 {
                continue;
            }
            let axis_index = self.motor_axis[m];
            let Machine { axes, port, .. } = self;
            axes[axis_index].pulse(port, delta > 0);
            moved = true;
        }
        if !moved {
            return Status::fault(FaultCode::ProbeFailed, "");
        }
        if self.search_delay > 0 {
            self.port.delay_us(self.search_delay as u32);
        }
        Status::BusyCalibrating
    }
}

impl<P: MachinePort> PulseSink for Machine<P> {
    /// Apply a traversal pulse to the bound axes, enforcing enablement,
    /// pin assignment, and travel limits.
    fn step(&mut self, pulse: Quad<i8>) -> Status {
        for m in 0..MOTOR_COUNT {
            let p = pulse.value[m];
            if p == 0 {
                continue;
            }
            let axis_index = self.motor_axis[m];
            let Machine { axes, port, .. } = self;
            let axis = &mut axes[axis_index];
            if !axis.is_enabled() {
                return Status::fault(FaultCode::AxisDisabled, "");
            }
            if axis.pin_step == NO_PIN {
                return Status::fault(FaultCode::PinRequired, "");
            }
            axis.pulse(port, p > 0);
            if axis.position < axis.travel_min {
                return Status::fault(FaultCode::TravelMin, "");
            }
            if axis.position > axis.travel_max {
                return Status::fault(FaultCode::TravelMax, "");
            }
        }
        Status::Ok
    }
}
