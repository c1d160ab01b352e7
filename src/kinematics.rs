//! Kinematic topology seam.
//!
//! The core never computes delta-arm geometry itself; it consumes a
//! [`Kinematics`] implementation through this narrow interface. The raw
//! topology bypasses conversion entirely and treats every motor as its own
//! cartesian-free axis.

use serde::Deserialize;

use crate::quad::StepCoord;

/// Active kinematic model, governing coordinate conversion and which
/// command groups are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Per-axis pulse counts with no conversion.
    #[default]
    Raw = 0,
    /// Rotary delta: cartesian coordinates convert through [`Kinematics`].
    Delta = 1,
}

impl Topology {
    /// Topology for a wire code, if valid.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Topology::Raw),
            1 => Some(Topology::Delta),
            _ => None,
        }
    }
}

/// A cartesian effector position in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Xyz {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

/// Pulse counts for the three delta arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Step3 {
    /// Arm 1 pulses.
    pub p1: StepCoord,
    /// Arm 2 pulses.
    pub p2: StepCoord,
    /// Arm 3 pulses.
    pub p3: StepCoord,
}

/// Delta geometry registry, addressed by the `dim` command group.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeomParams {
    /// Effector triangle side (`e`).
    pub effector_side: f32,
    /// Base triangle side (`f`).
    pub base_side: f32,
    /// Gear ratio between motor and arm (`gr`).
    pub gear_ratio: f32,
    /// Home angles for the three arms in degrees (`ha1`..`ha3`).
    pub home_angles: [f32; 3],
    /// Microstep divisor (`mi`).
    pub microsteps: i16,
    /// Effector arm length (`re`).
    pub effector_length: f32,
    /// Base arm length (`rf`).
    pub base_arm_length: f32,
    /// Full steps per motor revolution (`st`).
    pub steps360: i16,
    /// Z offset between home and the build origin (`zo`).
    pub z_offset: f32,
}

impl Default for GeomParams {
    fn default() -> Self {
        Self {
            effector_side: 131.636,
            base_side: 190.526,
            gear_ratio: 9.474,
            home_angles: [-67.2; 3],
            microsteps: 16,
            effector_length: 270.0,
            base_arm_length: 90.0,
            steps360: 200,
            z_offset: 0.0,
        }
    }
}

/// Coordinate conversion for a non-raw topology.
///
/// Conversions return `None` when the requested point has no valid
/// solution (outside the reachable envelope); callers surface that as the
/// kinematic fault.
pub trait Kinematics {
    /// Current geometry.
    fn params(&self) -> GeomParams;

    /// Replace the geometry. Implementations recompute any cached
    /// internals here.
    fn set_params(&mut self, p: GeomParams);

    /// Recompute cached internals after a topology switch.
    fn setup(&mut self) {}

    /// Inverse kinematics: cartesian position to arm pulses.
    fn to_pulses(&self, xyz: Xyz) -> Option<Step3>;

    /// Forward kinematics: arm pulses to cartesian position.
    fn to_xyz(&self, pulses: Step3) -> Option<Xyz>;

    /// Arm pulses at the home switches.
    fn home_pulses(&self) -> Step3;

    /// Lowest reachable Z at the given XY.
    fn min_z(&self, x: f32, y: f32) -> f32;
}

/// Placeholder kinematics for machines that never leave the raw topology.
/// Every conversion reports no solution.
#[derive(Debug, Clone, Default)]
pub struct NoKinematics {
    params: GeomParams,
}

impl Kinematics for NoKinematics {
    fn params(&self) -> GeomParams {
        self.params
    }

    fn set_params(&mut self, p: GeomParams) {
        self.params = p;
    }

    fn to_pulses(&self, _xyz: Xyz) -> Option<Step3> {
        None
    }

    fn to_xyz(&self, _pulses: Step3) -> Option<Xyz> {
        None
    }

    fn home_pulses(&self) -> Step3 {
        Step3::default()
    }

    fn min_z(&self, _x: f32, _y: f32) -> f32 {
        0.0
    }
}
