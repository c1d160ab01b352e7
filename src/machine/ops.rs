//! Long-operation state.
//!
//! Each resumable operation (probe, self-test, move) keeps its cross-poll
//! state here, attached to the machine context rather than smuggled through
//! opaque status codes.

use crate::port::{PinId, NO_PIN};
use crate::quad::{Quad, StepCoord, Ticks};

/// Number of retained probe samples.
pub const PROBE_DATA: usize = 9;

/// What a probe contact records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeSource {
    /// Record nothing beyond the stop position.
    #[default]
    None,
    /// Record the effector Z at contact (delta calibration).
    Z,
}

/// In-flight probe operation.
#[derive(Debug, Clone)]
pub struct Probe {
    /// Positions when the probe began.
    pub start: Quad<StepCoord>,
    /// Per-motor end positions of the search.
    pub end: Quad<StepCoord>,
    /// Largest per-motor search distance.
    pub max_delta: StepCoord,
    /// Probe contact pin.
    pub pin_probe: PinId,
    /// Invert the contact sense.
    pub invert_probe: bool,
    /// What to record on contact.
    pub data_source: ProbeSource,
    /// Most recent samples, newest first.
    pub data: [f32; PROBE_DATA],
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            start: Quad::default(),
            end: Quad::default(),
            max_delta: 0,
            pin_probe: NO_PIN,
            invert_probe: false,
            data_source: ProbeSource::None,
            data: [0.0; PROBE_DATA],
        }
    }
}

impl Probe {
    /// Arm a new probe from the current position. Pin assignment and
    /// samples survive across probes.
    pub fn setup(&mut self, current: Quad<StepCoord>) {
        self.start = current;
        self.end = current;
        self.max_delta = 0;
        self.data_source = ProbeSource::None;
    }

    /// Push a sample, shifting older ones down.
    pub fn record(&mut self, sample: f32) {
        self.data.copy_within(0..PROBE_DATA - 1, 1);
        self.data[0] = sample;
    }
}

/// In-flight self-test operation.
#[derive(Debug, Clone)]
pub struct SelfTest {
    /// Pulses per pass on every enabled motor.
    pub pulses: StepCoord,
    /// Pinned segment count; zero selects automatically.
    pub segs: i16,
    /// Traversal polls so far.
    pub loops: i32,
    /// True while the stroke under test belongs to this operation.
    pub active: bool,
    /// Tick the current pass started.
    pub t_begin: Ticks,
}

impl Default for SelfTest {
    fn default() -> Self {
        Self { pulses: 6400, segs: 0, loops: 0, active: false, t_begin: 0 }
    }
}

/// In-flight move operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOp {
    /// Traversal polls so far.
    pub loops: i32,
    /// Tick the move started.
    pub t_begin: Ticks,
}

/// All long-operation state.
#[derive(Debug, Clone, Default)]
pub struct OpState {
    /// Probe operation.
    pub probe: Probe,
    /// Self-test operation.
    pub selftest: SelfTest,
    /// Move operation.
    pub mv: MoveOp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_setup_preserves_pin() {
        let mut probe = Probe { pin_probe: 14, ..Probe::default() };
        probe.max_delta = 99;
        probe.setup(Quad::new([5, 5, 5, 0]));
        assert_eq!(probe.pin_probe, 14);
        assert_eq!(probe.max_delta, 0);
        assert_eq!(probe.start, probe.end);
    }

    #[test]
    fn test_probe_record_shifts() {
        let mut probe = Probe::default();
        probe.record(1.0);
        probe.record(2.0);
        assert_eq!(probe.data[0], 2.0);
        assert_eq!(probe.data[1], 1.0);
    }
}
