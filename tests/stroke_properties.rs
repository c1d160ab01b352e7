//! Property tests for the trajectory engine invariants.

use proptest::prelude::*;

use quadstep::{PulseSink, Quad, Status, StepCoord, Stroke, StrokeBuilder, Ticks, MOTOR_COUNT};

/// Sink that validates every pulse as it arrives.
struct CheckingSink {
    pulses: usize,
}

impl PulseSink for CheckingSink {
    fn step(&mut self, pulse: Quad<i8>) -> Status {
        for i in 0..MOTOR_COUNT {
            assert!(pulse.value[i].abs() <= 1, "non-unit pulse emitted");
        }
        self.pulses += 1;
        Status::Ok
    }
}

fn built_stroke(d: [i32; MOTOR_COUNT]) -> Option<Stroke> {
    let mut stroke = Stroke::default();
    let builder = StrokeBuilder::new(12_800, 0.7);
    if builder.build_line(&mut stroke, Quad::new(d)) != Status::Ok {
        return None;
    }
    if stroke.start(0) != Status::Ok {
        return None;
    }
    Some(stroke)
}

proptest! {
    /// The ideal position never retreats: per-axis cumulative displacement
    /// magnitude is non-decreasing in time for line strokes.
    #[test]
    fn goal_pos_monotone_in_time(
        dx in -8000i32..8000,
        dy in -8000i32..8000,
        steps in 10u32..200,
    ) {
        prop_assume!(dx != 0 || dy != 0);
        let Some(stroke) = built_stroke([dx, dy, 0, 0]) else {
            return Ok(());
        };
        let total = stroke.duration();
        let mut prev: Quad<StepCoord> = Quad::default();
        for k in 0..=steps {
            let t = total * k as Ticks / steps as Ticks;
            let goal = stroke.goal_pos(t);
            for i in 0..MOTOR_COUNT {
                prop_assert!(
                    goal.value[i].abs() >= prev.value[i].abs(),
                    "axis {} retreated at t={}", i, t
                );
            }
            prev = goal;
        }
    }

    /// At the declared end time the ideal position is exactly the declared
    /// end position.
    #[test]
    fn goal_pos_exact_at_end(
        dx in -8000i32..8000,
        dy in -8000i32..8000,
        dz in -8000i32..8000,
    ) {
        prop_assume!(dx != 0 || dy != 0 || dz != 0);
        let Some(stroke) = built_stroke([dx, dy, dz, 0]) else {
            return Ok(());
        };
        let end = stroke.goal_pos(stroke.t_start() + stroke.duration());
        prop_assert_eq!(end, stroke.d_end_pos);
        prop_assert_eq!(stroke.goal_pos(stroke.t_start() + stroke.duration() * 2), stroke.d_end_pos);
    }

    /// Traversal emits only unit pulses, never overshoots the declared
    /// end, and lands on it exactly.
    #[test]
    fn traverse_no_overshoot_and_exact_end(
        dx in -4000i32..4000,
        dy in -4000i32..4000,
        poll in 500i64..50_000,
    ) {
        prop_assume!(dx != 0 || dy != 0);
        let Some(mut stroke) = built_stroke([dx, dy, 0, 0]) else {
            return Ok(());
        };
        let mut sink = CheckingSink { pulses: 0 };
        let mut t = 0;
        let mut status = Status::BusyMoving;
        let mut distance = (stroke.d_end_pos - stroke.d_pos).max_abs();
        while status == Status::BusyMoving {
            t += poll;
            status = stroke.traverse(t, &mut sink);
            let now = (stroke.d_end_pos - stroke.d_pos).max_abs();
            prop_assert!(now <= distance, "distance to end grew");
            distance = now;
            prop_assert!(t < stroke.duration() + 2 * poll + 1, "traversal overran its window");
        }
        prop_assert_eq!(status, Status::Ok);
        prop_assert_eq!(stroke.d_pos, stroke.d_end_pos);
        prop_assert_eq!(stroke.cur_seg, stroke.len());
    }

    /// However sparse or dense the polling, the pulse count equals the
    /// total displacement (one pulse per unit step, no duplicates).
    #[test]
    fn pulse_count_matches_displacement(
        dx in 1i32..3000,
        poll in 1_000i64..200_000,
    ) {
        let Some(mut stroke) = built_stroke([dx, 0, 0, 0]) else {
            return Ok(());
        };
        let mut sink = CheckingSink { pulses: 0 };
        let mut t = 0;
        while stroke.traverse(t, &mut sink) == Status::BusyMoving {
            t += poll;
        }
        prop_assert_eq!(sink.pulses as i32, dx);
    }
}
