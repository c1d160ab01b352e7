//! Trajectory engine.
//!
//! A [`Stroke`] is the in-flight trajectory plan: a fixed-capacity sequence
//! of per-motor signed byte displacement segments replayed over a declared
//! tick budget. [`Stroke::traverse`] advances the actual integer position
//! toward the ideal time-interpolated position one unit pulse at a time,
//! so the caller can poll it from a non-blocking control loop.
//!
//! All position arithmetic is exact signed integer math. Only the
//! time-fraction interpolation of the in-flight segment divides, and it
//! truncates toward the already-elapsed side: no pulse is emitted that has
//! not been earned by elapsed time.

mod builder;

pub use builder::StrokeBuilder;

use crate::error::{FaultCode, Status};
use crate::quad::{Quad, StepCoord, Ticks, MOTOR_COUNT};

/// Maximum number of segments in a stroke. The fixed capacity is a
/// real-time/memory guarantee; the plan never grows dynamically.
pub const STROKE_CAPACITY: usize = 128;

/// Receives the unit pulse vectors emitted by [`Stroke::traverse`].
///
/// Returning [`Status::Ok`] or [`Status::BusyMoving`] keeps the traversal
/// going; any other status aborts it and propagates upward unchanged
/// (e.g. a limit-switch stop).
pub trait PulseSink {
    /// Apply one pulse vector. Every element is -1, 0, or +1.
    fn step(&mut self, pulse: Quad<i8>) -> Status;
}

/// The in-flight trajectory plan.
#[derive(Debug, Clone)]
pub struct Stroke {
    /// Per-motor displacement segments. Only `[0, length)` is meaningful.
    pub(crate) seg: [Quad<i8>; STROKE_CAPACITY],
    /// Number of populated segments.
    pub(crate) length: usize,
    /// Consistency bound: the ideal position one tick before completion may
    /// deviate from the declared end by at most this much per motor.
    pub max_v: StepCoord,
    /// Scale multiplier applied to every segment delta.
    pub scale: StepCoord,
    /// Segment cursor; reaches `length` exactly when the stroke completes.
    pub cur_seg: usize,
    /// Peak per-segment displacement, for throughput diagnostics.
    pub v_peak: StepCoord,
    /// Current integer position.
    pub d_pos: Quad<StepCoord>,
    /// Declared end position.
    pub d_end_pos: Quad<StepCoord>,
    t_start: Ticks,
    t_total: Ticks,
}

impl Default for Stroke {
    fn default() -> Self {
        Self {
            seg: [Quad::default(); STROKE_CAPACITY],
            length: 0,
            max_v: 16,
            scale: 1,
            cur_seg: 0,
            v_peak: 0,
            d_pos: Quad::default(),
            d_end_pos: Quad::default(),
            t_start: 0,
            t_total: 0,
        }
    }
}

impl Stroke {
    /// Reset to an empty plan. The next motion command repopulates this
    /// stroke in place; it is never reallocated.
    pub fn clear(&mut self) {
        *self = Stroke::default();
    }

    /// Number of populated segments.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// True when no segments are populated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Declare the planned duration in ticks (microseconds).
    pub fn set_duration(&mut self, ticks: Ticks) {
        self.t_total = ticks;
    }

    /// Set one motor's delta at segment `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the capacity or `motor` outside the
    /// motor count; callers bound both before writing.
    pub fn set_seg_delta(&mut self, index: usize, motor: usize, delta: i8) {
        self.seg[index].value[motor] = delta;
    }

    /// Declare the populated segment count.
    pub fn set_len(&mut self, length: usize) {
        self.length = length.min(STROKE_CAPACITY);
    }

    /// Planned duration in ticks.
    #[inline]
    pub fn duration(&self) -> Ticks {
        self.t_total
    }

    /// Planned duration in seconds.
    pub fn time_planned(&self) -> f32 {
        self.t_total as f32 / crate::quad::TICKS_PER_SECOND as f32
    }

    /// Anchor timestamp set by [`Stroke::start`].
    #[inline]
    pub fn t_start(&self) -> Ticks {
        self.t_start
    }

    /// Segment index the plan should be executing at time `t`, linear in
    /// elapsed time and clamped to `[0, length - 1]`.
    pub fn goal_segment(&self, t: Ticks) -> usize {
        if t < self.t_start || self.length == 0 || self.t_total == 0 {
            return 0;
        }
        let dt = t - self.t_start;
        if dt >= self.t_total {
            self.length - 1
        } else {
            ((dt * self.length as Ticks) / self.t_total) as usize
        }
    }

    /// Tick offset at which the goal segment's time slice begins. Segment
    /// slices are exact tick-aligned divisions of the total duration.
    fn goal_start_ticks(&self, t: Ticks) -> Ticks {
        if t < self.t_start || self.length == 0 || self.t_total == 0 {
            return 0;
        }
        let dt = t - self.t_start;
        let dtl = if dt >= self.t_total { self.t_total - 1 } else { dt } * self.length as Ticks;
        ((dtl / self.t_total) * self.t_total) / self.length as Ticks
    }

    /// Tick offset at which the goal segment's time slice ends.
    fn goal_end_ticks(&self, t: Ticks) -> Ticks {
        if t < self.t_start || self.length == 0 || self.t_total == 0 {
            return 0;
        }
        let dt = t - self.t_start;
        let dtl = if dt >= self.t_total { self.t_total - 1 } else { dt } * self.length as Ticks;
        (((dtl + self.t_total - 1) / self.t_total) * self.t_total) / self.length as Ticks
    }

    /// Ideal position at time `t`: the sum of all fully-elapsed segments'
    /// scaled deltas plus a linear fraction of the in-flight segment.
    ///
    /// Zero before the start anchor; exactly [`Stroke::d_end_pos`] at or
    /// after the end time, sidestepping rounding drift at the boundary.
    pub fn goal_pos(&self, t: Ticks) -> Quad<StepCoord> {
        if t <= self.t_start || self.t_total <= 0 || self.length == 0 {
            return Quad::default();
        }
        if t >= self.t_start + self.t_total {
            return self.d_end_pos;
        }
        let s_goal = self.goal_segment(t);
        let dt = t - self.t_start;
        let t_seg_start = self.goal_start_ticks(t);
        let t_seg_end = self.goal_end_ticks(t);
        let t_num = dt.min(t_seg_end) - t_seg_start;
        let t_denom = t_seg_end - t_seg_start;

        let mut pos = Quad::default();
        for s in 0..s_goal {
            pos += self.seg[s].scaled(self.scale);
        }
        // A zero-width slice means t sits exactly on a segment boundary:
        // nothing of the leading segment has been earned yet.
        if t_denom > 0 {
            let leading = self.seg[s_goal].scaled(self.scale);
            for i in 0..MOTOR_COUNT {
                // i64 keeps microsecond-scale tick counts from overflowing;
                // truncation rounds toward the already-elapsed side.
                pos.value[i] += ((leading.value[i] as i64 * t_num) / t_denom) as StepCoord;
            }
        }
        pos
    }

    /// Sum of all scaled segment deltas: where the plan lands if replayed
    /// to the end.
    pub fn segment_sum(&self) -> Quad<StepCoord> {
        let mut sum = Quad::default();
        for s in 0..self.length {
            sum += self.seg[s].scaled(self.scale);
        }
        sum
    }

    /// Anchor the stroke to a start time and validate plan consistency.
    ///
    /// The ideal position one tick before completion must not deviate from
    /// the declared end position by more than `max_v` on any motor;
    /// otherwise the plan cannot reach its declared end and the stroke
    /// end fault is returned before any pulse is emitted.
    pub fn start(&mut self, t_start: Ticks) -> Status {
        self.t_start = t_start;
        self.cur_seg = 0;
        self.d_pos = Quad::default();

        let end = self.goal_pos(t_start + self.t_total - 1);
        for i in 0..MOTOR_COUNT {
            if self.max_v < (self.d_end_pos.value[i] - end.value[i]).abs() {
                return Status::fault(FaultCode::StrokeEnd, "");
            }
        }
        Status::Ok
    }

    /// True once the actual position has reached the declared end.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.d_pos == self.d_end_pos
    }

    /// Advance the actual position toward the ideal position at time `t`,
    /// emitting unit pulse vectors into `sink`.
    ///
    /// One call performs a bounded work quantum: it catches the actual
    /// position up to the instantaneous goal and no further. While behind,
    /// the motor(s) tied for the largest remaining absolute error pulse
    /// simultaneously, keeping all axes proportionally synchronized and
    /// never overshooting.
    ///
    /// Returns [`Status::BusyMoving`] while more work is pending,
    /// [`Status::Ok`] once `t` has passed the declared duration with no
    /// goal delta remaining (the segment cursor then equals the length),
    /// or the sink's status unchanged if it aborts.
    pub fn traverse<S: PulseSink>(&mut self, t: Ticks, sink: &mut S) -> Status {
        let goal = self.goal_pos(t);
        while self.d_pos != goal {
            let mut d = [0 as StepCoord; MOTOR_COUNT];
            let mut d_max = 0;
            for i in 0..MOTOR_COUNT {
                d[i] = goal.value[i] - self.d_pos.value[i];
                d_max = d_max.max(d[i].abs());
            }
            if d_max == 0 {
                break;
            }
            let mut pulse = Quad::<i8>::default();
            for i in 0..MOTOR_COUNT {
                if d[i].abs() != d_max {
                    continue;
                }
                pulse.value[i] = if d[i] < 0 { -1 } else { 1 };
            }
            self.d_pos += pulse.scaled(1);
            match sink.step(pulse) {
                Status::Ok | Status::BusyMoving => {}
                abnormal => return abnormal,
            }
        }
        if t >= self.t_start + self.t_total && self.d_pos == self.d_end_pos {
            self.cur_seg = self.length;
            Status::Ok
        } else {
            self.cur_seg = self.goal_segment(t);
            Status::BusyMoving
        }
    }
}
