//! Per-axis state and pin bookkeeping.

use crate::port::{MachinePort, PinId, PinMode, NO_PIN};
use crate::quad::StepCoord;

/// One physical axis: position, homing state, travel limits, and the pin
/// assignments that drive it.
#[derive(Debug, Clone)]
pub struct Axis {
    /// Current position in pulses.
    pub position: StepCoord,
    /// Home position latched when the limit switch trips.
    pub home: StepCoord,
    /// Minimum allowed position.
    pub travel_min: StepCoord,
    /// Maximum allowed position.
    pub travel_max: StepCoord,
    /// Degrees per full motor step.
    pub step_angle: f32,
    /// Microstep divisor.
    pub microsteps: u8,
    /// Microseconds between pulses when stepped directly.
    pub us_delay: i32,
    /// Microseconds of idle before the driver may snooze.
    pub idle_snooze: i32,
    /// Direction-pin sense: true drives the pin high when advancing.
    pub dir_high: bool,
    /// Homing in progress.
    pub homing: bool,
    /// Last sampled minimum-limit state.
    pub at_min: bool,
    /// Last sampled maximum-limit state.
    pub at_max: bool,
    /// Step pulse pin.
    pub pin_step: PinId,
    /// Direction pin.
    pub pin_dir: PinId,
    /// Driver enable pin (active low).
    pub pin_enable: PinId,
    /// Minimum limit switch pin.
    pub pin_min: PinId,
    /// Maximum limit switch pin.
    pub pin_max: PinId,
    enabled: bool,
    advancing: Option<bool>,
}

impl Default for Axis {
    fn default() -> Self {
        Self {
            position: 0,
            home: 0,
            travel_min: 0,
            travel_max: 32_000,
            step_angle: 1.8,
            microsteps: 16,
            us_delay: 500,
            idle_snooze: 0,
            dir_high: true,
            homing: false,
            at_min: false,
            at_max: false,
            pin_step: NO_PIN,
            pin_dir: NO_PIN,
            pin_enable: NO_PIN,
            pin_min: NO_PIN,
            pin_max: NO_PIN,
            enabled: false,
            advancing: None,
        }
    }
}

impl Axis {
    /// Whether the axis is enabled.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the driver, driving the enable pin (active low)
    /// when one is assigned.
    pub fn enable<P: MachinePort>(&mut self, port: &mut P, on: bool) {
        if self.pin_enable != NO_PIN {
            port.digital_write(self.pin_enable, !on);
        }
        self.enabled = on;
        self.advancing = None;
    }

    /// Latch the direction pin for advancing (positive) or retreating
    /// motion. Redundant writes are skipped.
    pub fn set_advancing<P: MachinePort>(&mut self, port: &mut P, advancing: bool) {
        if self.advancing == Some(advancing) {
            return;
        }
        if self.pin_dir != NO_PIN {
            let level = if advancing { self.dir_high } else { !self.dir_high };
            port.digital_write(self.pin_dir, level);
        }
        self.advancing = Some(advancing);
    }

    /// Emit one step pulse in the given direction and track the position.
    pub fn pulse<P: MachinePort>(&mut self, port: &mut P, advancing: bool) {
        self.set_advancing(port, advancing);
        if self.pin_step != NO_PIN {
            port.digital_write(self.pin_step, true);
            port.digital_write(self.pin_step, false);
        }
        self.position += if advancing { 1 } else { -1 };
    }

    /// Sample the minimum limit switch.
    pub fn read_at_min<P: MachinePort>(&mut self, port: &mut P, invert: bool) {
        if self.pin_min != NO_PIN {
            let raw = port.digital_read(self.pin_min);
            self.at_min = raw != invert;
        }
    }

    /// Sample the maximum limit switch.
    pub fn read_at_max<P: MachinePort>(&mut self, port: &mut P, invert: bool) {
        if self.pin_max != NO_PIN {
            let raw = port.digital_read(self.pin_max);
            self.at_max = raw != invert;
        }
    }

    /// Reassign a pin slot, reconfiguring the port when it changes.
    pub fn assign_pin<P: MachinePort>(
        port: &mut P,
        slot: &mut PinId,
        new_pin: PinId,
        mode: PinMode,
        init: Option<bool>,
    ) {
        if *slot == new_pin {
            return;
        }
        *slot = new_pin;
        if new_pin != NO_PIN {
            port.pin_mode(new_pin, mode);
            if let Some(level) = init {
                port.digital_write(new_pin, level);
            }
        }
    }
}
