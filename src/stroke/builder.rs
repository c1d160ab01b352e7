//! Motion profile builder.
//!
//! Fills a [`Stroke`] from a total displacement vector and the machine
//! velocity budget: peak rate in pulses per second and the ramp time to
//! reach it. The profile is trapezoidal (triangular for short moves), and
//! every per-segment delta is quantized to the signed-byte segment store.
//!
//! Plans that cannot express the requested rate within the byte range keep
//! their declared end position, so [`Stroke::start`] rejects them with the
//! stroke end fault instead of silently under-running the move.

use libm::sqrtf;

use super::{Stroke, STROKE_CAPACITY};
use crate::error::{FaultCode, Status};
use crate::quad::{Quad, StepCoord, Ticks, MOTOR_COUNT, TICKS_PER_SECOND};

/// Largest scale multiplier the builder will apply.
const SCALE_MAX: StepCoord = 127;

/// Default dominant-axis pulses per segment when the caller does not pin
/// the segment count.
const PULSES_PER_SEG: f32 = 100.0;

/// Plans line strokes against a velocity/ramp budget.
#[derive(Debug, Clone)]
pub struct StrokeBuilder {
    v_max: StepCoord,
    t_v: f32,
    min_segs: usize,
    max_segs: usize,
}

impl StrokeBuilder {
    /// Builder with automatic segment-count selection.
    ///
    /// `v_max` is the peak rate in pulses per second; `t_v` the seconds
    /// needed to ramp from rest to `v_max`.
    pub fn new(v_max: StepCoord, t_v: f32) -> Self {
        Self { v_max, t_v, min_segs: 0, max_segs: 0 }
    }

    /// Builder with a pinned segment-count range. Zero leaves the bound
    /// automatic.
    pub fn with_segments(v_max: StepCoord, t_v: f32, min_segs: usize, max_segs: usize) -> Self {
        Self { v_max, t_v, min_segs, max_segs }
    }

    /// Plan a straight-line move of `d_pos` pulses into `stroke`.
    ///
    /// All motors share the time base; the dominant (largest-displacement)
    /// motor runs the full profile and the others scale proportionally.
    pub fn build_line(&self, stroke: &mut Stroke, d_pos: Quad<StepCoord>) -> Status {
        if self.max_segs >= STROKE_CAPACITY {
            return Status::fault(FaultCode::StrokeMaxLen, "");
        }
        if self.v_max <= 0 || self.t_v <= 0.0 {
            return Status::fault(FaultCode::StrokeTime, "");
        }
        let n = d_pos.max_abs();
        if n == 0 {
            return Status::fault(FaultCode::StrokeNull, "");
        }

        let (t_total_s, v_peak) = self.plan_profile(n as f32);
        if !t_total_s.is_finite() || t_total_s <= 0.0 {
            return Status::fault(FaultCode::StrokeTime, "");
        }

        let cap = if self.max_segs > 0 { self.max_segs } else { STROKE_CAPACITY - 1 };
        let segs = if self.min_segs > 0 {
            self.min_segs.min(cap)
        } else {
            let floor = 16.min(n as usize).max(1).min(cap);
            ((n as f32 / PULSES_PER_SEG).ceil() as usize).clamp(floor, cap)
        };

        // Scale so the fastest segment's displacement fits a signed byte.
        let peak_per_seg = v_peak * t_total_s / segs as f32;
        let scale = (((peak_per_seg / 127.0).ceil() as StepCoord).max(1)).min(SCALE_MAX);

        stroke.clear();
        stroke.scale = scale;
        stroke.length = segs;
        stroke.d_end_pos = d_pos;
        stroke.set_duration((t_total_s * TICKS_PER_SECOND as f32) as Ticks);

        let mut peak_delta: StepCoord = 0;
        let mut prev = [0i64; MOTOR_COUNT];
        for s in 0..segs {
            let frac = self.profile_fraction((s + 1) as f32 / segs as f32, t_total_s, v_peak, n as f32);
            for i in 0..MOTOR_COUNT {
                // Truncate toward zero: the interior plan may lag the
                // declared end but never pass it, so traversal cannot
                // overshoot. The boundary rule of goal_pos covers the
                // sub-scale residue.
                let target = ((frac * d_pos.value[i] as f32) / scale as f32) as i64;
                let dv = (target - prev[i]).clamp(-127, 127);
                prev[i] += dv;
                stroke.seg[s].value[i] = dv as i8;
                peak_delta = peak_delta.max((dv.unsigned_abs() as StepCoord) * scale);
            }
        }

        stroke.v_peak = peak_delta;
        // Cover quantization residue on top of the planned peak rate.
        stroke.max_v = peak_delta + 2 * scale;
        Status::Ok
    }

    /// Total duration and peak rate for a move of `n` pulses.
    fn plan_profile(&self, n: f32) -> (f32, f32) {
        let v_max = self.v_max as f32;
        let accel = v_max / self.t_v;
        let d_ramp = 0.5 * v_max * self.t_v;
        if 2.0 * d_ramp >= n {
            // Triangle: the move is too short to reach the peak rate.
            let v_peak = sqrtf(n * accel);
            (2.0 * v_peak / accel, v_peak)
        } else {
            (2.0 * self.t_v + (n - 2.0 * d_ramp) / v_max, v_max)
        }
    }

    /// Fraction of the total displacement covered at normalized time `u`.
    fn profile_fraction(&self, u: f32, t_total: f32, v_peak: f32, n: f32) -> f32 {
        if u >= 1.0 {
            return 1.0;
        }
        let t = u * t_total;
        let accel = self.v_max as f32 / self.t_v;
        let t_ramp = v_peak / accel;
        let d = if t < t_ramp {
            0.5 * accel * t * t
        } else if t < t_total - t_ramp {
            0.5 * accel * t_ramp * t_ramp + v_peak * (t - t_ramp)
        } else {
            let tail = t_total - t;
            n - 0.5 * accel * tail * tail
        };
        (d / n).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_line_reaches_declared_end() {
        let sb = StrokeBuilder::new(12800, 0.7);
        let mut stroke = Stroke::default();
        let d = Quad::new([6400, -3200, 0, 1600]);
        assert_eq!(sb.build_line(&mut stroke, d), Status::Ok);
        assert_eq!(stroke.d_end_pos, d);
        assert!(stroke.len() > 0);
        assert!(stroke.duration() > 0);
        assert_eq!(stroke.start(0), Status::Ok);
    }

    #[test]
    fn test_build_line_segments_fit_bytes() {
        let sb = StrokeBuilder::new(12800, 0.7);
        let mut stroke = Stroke::default();
        assert_eq!(sb.build_line(&mut stroke, Quad::new([16000, 0, 0, 0])), Status::Ok);
        for s in 0..stroke.len() {
            for i in 0..MOTOR_COUNT {
                assert!(stroke.seg[s].value[i].abs() as i32 <= 127);
            }
        }
    }

    #[test]
    fn test_build_line_rejects_zero_move() {
        let sb = StrokeBuilder::new(12800, 0.7);
        let mut stroke = Stroke::default();
        let st = sb.build_line(&mut stroke, Quad::default());
        assert_eq!(st.fault_code(), Some(FaultCode::StrokeNull));
    }

    #[test]
    fn test_build_line_rejects_bad_budget() {
        let mut stroke = Stroke::default();
        let st = StrokeBuilder::new(0, 0.7).build_line(&mut stroke, Quad::new([100, 0, 0, 0]));
        assert_eq!(st.fault_code(), Some(FaultCode::StrokeTime));

        let st = StrokeBuilder::new(12800, 0.0).build_line(&mut stroke, Quad::new([100, 0, 0, 0]));
        assert_eq!(st.fault_code(), Some(FaultCode::StrokeTime));
    }

    #[test]
    fn test_build_line_rejects_oversize_segment_count() {
        let mut stroke = Stroke::default();
        let sb = StrokeBuilder::with_segments(12800, 0.7, STROKE_CAPACITY, STROKE_CAPACITY);
        let st = sb.build_line(&mut stroke, Quad::new([100, 0, 0, 0]));
        assert_eq!(st.fault_code(), Some(FaultCode::StrokeMaxLen));
    }

    #[test]
    fn test_triangle_profile_for_short_moves() {
        let sb = StrokeBuilder::new(12800, 0.7);
        let mut stroke = Stroke::default();
        assert_eq!(sb.build_line(&mut stroke, Quad::new([100, 0, 0, 0])), Status::Ok);
        // 100 pulses can never ramp to 12800 pulses/s in 0.7 s.
        assert!(stroke.v_peak < 12800);
        assert_eq!(stroke.start(0), Status::Ok);
    }

    #[test]
    fn test_segment_sum_tracks_end_within_tolerance() {
        let sb = StrokeBuilder::new(12800, 0.7);
        let mut stroke = Stroke::default();
        let d = Quad::new([6400, 6400, 6400, 0]);
        assert_eq!(sb.build_line(&mut stroke, d), Status::Ok);
        let sum = stroke.segment_sum();
        for i in 0..MOTOR_COUNT {
            assert!((sum.value[i] - d.value[i]).abs() <= stroke.max_v);
        }
    }
}
