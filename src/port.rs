//! Machine port: the hardware seam.
//!
//! The command core addresses pins by number through one machine-wide
//! port, mirroring how the firmware it fronts talks to its board. The
//! port also carries the EEPROM byte store, the microsecond tick clock,
//! and the bounded delays the self-test handlers are allowed to take.

use crate::quad::Ticks;

/// Pin identifier. Negative means unassigned.
pub type PinId = i16;

/// The unassigned-pin sentinel.
pub const NO_PIN: PinId = -1;

/// Highest addressable pin.
pub const MAX_PIN: PinId = 127;

/// Size of the persistent byte store.
pub const EEPROM_SIZE: u32 = 4096;

/// Largest value (serialized JSON plus NUL) the EEPROM handler accepts.
pub const EEPROM_VALUE_BYTES: usize = 512;

/// Pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Read from the pin.
    Input,
    /// Drive the pin.
    Output,
}

/// Hardware access consumed by the machine.
///
/// Implementations must be cheap to call; the motion core invokes
/// `digital_write` per emitted pulse edge. `delay_us` is the only
/// sanctioned blocking call and every use in the core is bounded.
pub trait MachinePort {
    /// Configure a pin's direction.
    fn pin_mode(&mut self, pin: PinId, mode: PinMode);

    /// Read a digital pin.
    fn digital_read(&mut self, pin: PinId) -> bool;

    /// Drive a digital pin.
    fn digital_write(&mut self, pin: PinId, value: bool);

    /// Read an analog input (implementation-defined resolution).
    fn analog_read(&mut self, pin: PinId) -> i16;

    /// Drive an analog (PWM) output with a 0..=255 duty value.
    fn analog_write(&mut self, pin: PinId, value: i16);

    /// Read one persistent byte.
    fn eeprom_read(&self, addr: u32) -> u8;

    /// Write one persistent byte.
    fn eeprom_write(&mut self, addr: u32, value: u8);

    /// Monotonic clock in ticks (microseconds).
    fn ticks(&self) -> Ticks;

    /// Bounded busy-wait in microseconds.
    fn delay_us(&mut self, us: u32);

    /// Bounded busy-wait in milliseconds.
    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }
}
