//! Machine configuration.
//!
//! A TOML file declares the axes, motor bindings, system parameters, and
//! (for delta machines) the kinematic geometry; [`MachineConfig::apply`]
//! installs it onto a [`Machine`] at startup. This is the host-side
//! counterpart of a firmware restoring its EEPROM-saved setup.

mod loader;

pub use loader::load_config;

use heapless::{FnvIndexMap, String};
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::kinematics::{GeomParams, Topology};
use crate::machine::{Machine, OutputMode};
use crate::port::{MachinePort, PinId, PinMode, MAX_PIN, NO_PIN};
use crate::quad::StepCoord;

/// Root configuration structure from TOML.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MachineConfig {
    /// System parameters.
    #[serde(default)]
    pub sys: SysConfig,

    /// Axis configurations keyed by axis letter.
    #[serde(default)]
    pub axes: FnvIndexMap<String<8>, AxisConfig, 8>,

    /// Motor-to-axis bindings keyed by motor digit.
    #[serde(default)]
    pub motors: FnvIndexMap<String<8>, String<8>, 4>,

    /// Delta geometry, required only for the delta topology.
    #[serde(default)]
    pub geometry: Option<GeomParams>,
}

/// System parameters from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SysConfig {
    /// Peak velocity in pulses per second.
    pub max_velocity: i32,
    /// Seconds to ramp to peak velocity.
    pub ramp_seconds: f32,
    /// Kinematic topology.
    pub topology: Topology,
    /// Pretty-print responses.
    pub json_pretty: bool,
    /// Response output-mode bits.
    pub output_mode: u8,
    /// Home automatically on startup.
    pub auto_home: bool,
    /// Pulses per homing poll.
    pub homing_pulses: i16,
    /// Pulses to back off a latched limit switch.
    pub latch_backoff: StepCoord,
    /// Microseconds between search pulses.
    pub search_delay: i32,
    /// Invert limit-switch sense.
    pub invert_limits: bool,
    /// Limit-switch debounce samples.
    pub debounce: u8,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self {
            max_velocity: 12_800,
            ramp_seconds: 0.7,
            topology: Topology::Raw,
            json_pretty: false,
            output_mode: 0,
            auto_home: false,
            homing_pulses: 3,
            latch_backoff: 200,
            search_delay: 800,
            invert_limits: false,
            debounce: 2,
        }
    }
}

/// One axis from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    /// Enable the driver at startup.
    pub enabled: bool,
    /// Step pulse pin.
    pub step_pin: i32,
    /// Direction pin.
    pub dir_pin: i32,
    /// Driver enable pin.
    pub enable_pin: i32,
    /// Minimum limit switch pin.
    pub min_pin: i32,
    /// Maximum limit switch pin.
    pub max_pin: i32,
    /// Home position in pulses.
    pub home: StepCoord,
    /// Minimum travel in pulses.
    pub travel_min: StepCoord,
    /// Maximum travel in pulses.
    pub travel_max: StepCoord,
    /// Degrees per full step.
    pub step_angle: f32,
    /// Microstep divisor.
    pub microsteps: u8,
    /// Microseconds between direct step pulses.
    pub step_delay_us: i32,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            step_pin: -1,
            dir_pin: -1,
            enable_pin: -1,
            min_pin: -1,
            max_pin: -1,
            home: 0,
            travel_min: 0,
            travel_max: 32_000,
            step_angle: 1.8,
            microsteps: 16,
            step_delay_us: 500,
        }
    }
}

/// Validate a configuration without applying it.
pub fn validate_config(config: &MachineConfig) -> Result<()> {
    if config.sys.max_velocity <= 0 {
        return Err(ConfigError::NonPositive(name16("max_velocity")));
    }
    if config.sys.ramp_seconds <= 0.0 {
        return Err(ConfigError::NonPositive(name16("ramp_seconds")));
    }
    for (name, axis) in config.axes.iter() {
        if axis_index(name.as_str()).is_none() {
            return Err(ConfigError::UnknownAxis(name.clone()));
        }
        for pin in [axis.step_pin, axis.dir_pin, axis.enable_pin, axis.min_pin, axis.max_pin] {
            if pin < -1 || pin > MAX_PIN as i32 {
                return Err(ConfigError::InvalidPin { axis: name.clone(), pin });
            }
        }
        if axis.microsteps == 0 {
            return Err(ConfigError::NonPositive(name16("microsteps")));
        }
    }
    for (motor, axis_name) in config.motors.iter() {
        if !matches!(motor.as_str(), "1" | "2" | "3" | "4") {
            return Err(ConfigError::UnknownMotor(motor.clone()));
        }
        if axis_index(axis_name.as_str()).is_none() {
            return Err(ConfigError::UnknownAxis(axis_name.clone()));
        }
    }
    Ok(())
}

impl MachineConfig {
    /// Validate and install this configuration onto `machine`.
    pub fn apply<P: MachinePort>(&self, machine: &mut Machine<P>) -> Result<()> {
        validate_config(self)?;

        machine.v_max = self.sys.max_velocity;
        machine.tv_max = self.sys.ramp_seconds;
        machine.topology = self.sys.topology;
        machine.json_pretty = self.sys.json_pretty;
        machine.output_mode = OutputMode(self.sys.output_mode);
        machine.auto_home = self.sys.auto_home;
        machine.homing_pulses = self.sys.homing_pulses;
        machine.latch_backoff = self.sys.latch_backoff;
        machine.search_delay = self.sys.search_delay;
        machine.invert_lim = self.sys.invert_limits;
        machine.debounce = self.sys.debounce;

        for (name, cfg) in self.axes.iter() {
            let i = axis_index(name.as_str()).expect("validated above");
            let axis = &mut machine.axes[i];
            axis.home = cfg.home;
            axis.travel_min = cfg.travel_min;
            axis.travel_max = cfg.travel_max;
            axis.step_angle = cfg.step_angle;
            axis.microsteps = cfg.microsteps;
            axis.us_delay = cfg.step_delay_us;
            let pins = [
                (cfg.step_pin, PinMode::Output, None),
                (cfg.dir_pin, PinMode::Output, None),
                (cfg.enable_pin, PinMode::Output, Some(true)),
                (cfg.min_pin, PinMode::Input, None),
                (cfg.max_pin, PinMode::Input, None),
            ];
            let slots = [0usize, 1, 2, 3, 4];
            for (slot, (pin, mode, init)) in slots.into_iter().zip(pins) {
                let pin = pin as PinId;
                let Machine { axes, port, .. } = machine;
                let target = match slot {
                    0 => &mut axes[i].pin_step,
                    1 => &mut axes[i].pin_dir,
                    2 => &mut axes[i].pin_enable,
                    3 => &mut axes[i].pin_min,
                    _ => &mut axes[i].pin_max,
                };
                if pin != NO_PIN {
                    crate::machine::Axis::assign_pin(port, target, pin, mode, init);
                }
            }
            machine.enable_axis(i, cfg.enabled);
        }

        for (motor, axis_name) in self.motors.iter() {
            let m = (motor.as_bytes()[0] - b'1') as usize;
            let a = axis_index(axis_name.as_str()).expect("validated above");
            let _ = machine.bind_motor(m, a);
        }

        if let Some(geometry) = &self.geometry {
            machine.kinematics.set_params(*geometry);
            machine.kinematics.setup();
        }
        Ok(())
    }
}

fn axis_index(name: &str) -> Option<usize> {
    match name {
        "x" => Some(0),
        "y" => Some(1),
        "z" => Some(2),
        "a" => Some(3),
        "b" => Some(4),
        "c" => Some(5),
        _ => None,
    }
}

fn name16(s: &str) -> String<16> {
    String::try_from(s).unwrap_or_default()
}
