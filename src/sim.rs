//! In-memory machine port and kinematics for tests and host simulation.

use std::collections::HashMap;

use crate::kinematics::{GeomParams, Kinematics, Step3, Xyz};
use crate::port::{MachinePort, PinId, PinMode, EEPROM_SIZE};
use crate::quad::Ticks;

/// Simulated machine port.
///
/// Pins live in hash maps, the EEPROM is a byte vector initialized to the
/// erased state (0xFF), and the clock only moves when told to: `delay_us`
/// advances it, and tests advance it between dispatcher polls with
/// [`SimPort::advance`].
#[derive(Debug, Clone)]
pub struct SimPort {
    digital: HashMap<PinId, bool>,
    analog: HashMap<PinId, i16>,
    modes: HashMap<PinId, PinMode>,
    eeprom: Vec<u8>,
    now: Ticks,
    /// Count of digital write edges, for pulse-rate assertions.
    pub write_count: u64,
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPort {
    /// Fresh port with an erased EEPROM and the clock at zero.
    pub fn new() -> Self {
        Self {
            digital: HashMap::new(),
            analog: HashMap::new(),
            modes: HashMap::new(),
            eeprom: vec![0xFF; EEPROM_SIZE as usize],
            now: 0,
            write_count: 0,
        }
    }

    /// Advance the clock by `dt` ticks.
    pub fn advance(&mut self, dt: Ticks) {
        self.now += dt;
    }

    /// Externally drive an input pin (e.g. close a limit switch).
    pub fn set_digital(&mut self, pin: PinId, value: bool) {
        self.digital.insert(pin, value);
    }

    /// Externally drive an analog input.
    pub fn set_analog(&mut self, pin: PinId, value: i16) {
        self.analog.insert(pin, value);
    }

    /// Last mode configured for `pin`, if any.
    pub fn mode(&self, pin: PinId) -> Option<PinMode> {
        self.modes.get(&pin).copied()
    }

    /// Current level of a digital pin (false if never driven).
    pub fn digital(&self, pin: PinId) -> bool {
        self.digital.get(&pin).copied().unwrap_or(false)
    }
}

impl MachinePort for SimPort {
    fn pin_mode(&mut self, pin: PinId, mode: PinMode) {
        self.modes.insert(pin, mode);
    }

    fn digital_read(&mut self, pin: PinId) -> bool {
        self.digital.get(&pin).copied().unwrap_or(false)
    }

    fn digital_write(&mut self, pin: PinId, value: bool) {
        self.write_count += 1;
        self.digital.insert(pin, value);
    }

    fn analog_read(&mut self, pin: PinId) -> i16 {
        self.analog.get(&pin).copied().unwrap_or(0)
    }

    fn analog_write(&mut self, pin: PinId, value: i16) {
        self.analog.insert(pin, value);
    }

    fn eeprom_read(&self, addr: u32) -> u8 {
        self.eeprom.get(addr as usize).copied().unwrap_or(0xFF)
    }

    fn eeprom_write(&mut self, addr: u32, value: u8) {
        if let Some(slot) = self.eeprom.get_mut(addr as usize) {
            *slot = value;
        }
    }

    fn ticks(&self) -> Ticks {
        self.now
    }

    fn delay_us(&mut self, us: u32) {
        self.now += us as Ticks;
    }
}

/// Linear stand-in for a delta kinematic model.
///
/// Maps each cartesian millimeter to `pulses_per_mm` pulses on the matching
/// arm. Not a physical delta solution, but it exercises every conversion
/// path the delta-topology handlers take.
#[derive(Debug, Clone)]
pub struct SimKinematics {
    /// Geometry registry, stored but unused by the linear model.
    pub params: GeomParams,
    /// Pulses per cartesian unit.
    pub pulses_per_mm: f32,
    /// Home position in pulses, shared by all three arms.
    pub home: i32,
}

impl Default for SimKinematics {
    fn default() -> Self {
        Self { params: GeomParams::default(), pulses_per_mm: 100.0, home: 0 }
    }
}

impl Kinematics for SimKinematics {
    fn params(&self) -> GeomParams {
        self.params
    }

    fn set_params(&mut self, p: GeomParams) {
        self.params = p;
    }

    fn to_pulses(&self, xyz: Xyz) -> Option<Step3> {
        if !(xyz.x.is_finite() && xyz.y.is_finite() && xyz.z.is_finite()) {
            return None;
        }
        Some(Step3 {
            p1: (xyz.x * self.pulses_per_mm) as i32,
            p2: (xyz.y * self.pulses_per_mm) as i32,
            p3: (xyz.z * self.pulses_per_mm) as i32,
        })
    }

    fn to_xyz(&self, pulses: Step3) -> Option<Xyz> {
        Some(Xyz {
            x: pulses.p1 as f32 / self.pulses_per_mm,
            y: pulses.p2 as f32 / self.pulses_per_mm,
            z: pulses.p3 as f32 / self.pulses_per_mm,
        })
    }

    fn home_pulses(&self) -> Step3 {
        Step3 { p1: self.home, p2: self.home, p3: self.home }
    }

    fn min_z(&self, _x: f32, _y: f32) -> f32 {
        -100.0
    }
}
