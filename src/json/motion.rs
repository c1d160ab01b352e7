//! Motion handlers: stroke download (`dvs`), point-to-point move (`mov`),
//! and the self-test group (`tst`).
//!
//! `dvs`, `mov`, and `tst ph` follow the two-phase resumable pattern: the
//! first entry (busy-parsed) validates input, plans a stroke, and returns
//! busy-moving; every later entry polls the trajectory engine once and
//! propagates its status. The relative-move shortcuts (`movrx` and kin)
//! are the documented exception and execute to completion inside one call;
//! do not generalize that exemption.

use libm::{cosf, sinf};
use log::debug;
use serde_json::Value;

use super::axes::{kid_keys, kid_mut};
use super::fields::process_field;
use super::{expand_query, is_group_key, JsonMap};
use crate::error::{FaultCode, Status};
use crate::kinematics::{Topology, Xyz};
use crate::machine::{Machine, MoveOp, SelfTest};
use crate::port::MachinePort;
use crate::quad::{Quad, StepCoord, Ticks, MOTOR_COUNT, TICKS_PER_SECOND};
use crate::stroke::{StrokeBuilder, STROKE_CAPACITY};

/// Microseconds between polls when a shortcut runs a stroke synchronously.
const SYNC_POLL_US: u32 = 500;

/// Output fields a move or self-test fills on completion, but only when
/// the request asked for them.
const MOTION_OUTPUTS: &[&str] = &["lp", "pp", "sg", "tp", "ts"];

// ---------------------------------------------------------------------------
// dvs: stroke download
// ---------------------------------------------------------------------------

/// Handle the `dvs` key: parse-and-start on first entry, then one
/// traversal per call with a position echo, completing when the segment
/// cursor reaches the length.
pub(crate) fn process_stroke<P: MachinePort>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    match prev {
        Status::BusyParsed => initialize_stroke(machine, obj, key),
        Status::BusyMoving => {
            let mut status = Status::BusyMoving;
            if machine.stroke.cur_seg < machine.stroke.len() {
                status = traverse_stroke_echo(machine, obj, key);
            }
            if machine.stroke.cur_seg >= machine.stroke.len() {
                status = Status::Ok;
            }
            status
        }
        other => other.clone(),
    }
}

fn initialize_stroke<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    let Some(Value::Object(_)) = obj.get(key) else {
        return Status::fault(FaultCode::JsonObject, key);
    };
    machine.stroke.clear();
    let mut slen = [0usize; MOTOR_COUNT];
    let mut us_ok = false;
    let mut has_dp = false;

    for child in kid_keys(obj, key) {
        let kid = kid_mut(obj, key);
        match child.as_str() {
            "us" => {
                let mut plan_micros: i32 = 0;
                let status = process_field(kid, &child, &mut plan_micros);
                if status != Status::Ok {
                    return status;
                }
                if plan_micros <= 0 {
                    return Status::fault(FaultCode::NonPositive, &child);
                }
                machine.stroke.set_duration(plan_micros as Ticks);
                us_ok = true;
            }
            "dp" => {
                let Some(Value::Array(arr)) = kid.get(&child) else {
                    return Status::fault(FaultCode::FieldArray, &child);
                };
                if arr.is_empty() {
                    return Status::fault(FaultCode::JsonArrayLen, &child);
                }
                let arr = arr.clone();
                for (m, v) in arr.iter().take(MOTOR_COUNT).enumerate() {
                    let Some(n) = v.as_i64() else {
                        return Status::fault(FaultCode::WrongType, &child);
                    };
                    machine.stroke.d_end_pos.value[m] = n as StepCoord;
                }
                has_dp = true;
            }
            "sc" => {
                let status = process_field(kid, &child, &mut machine.stroke.scale);
                if status != Status::Ok {
                    return status;
                }
            }
            _ => {
                let Some(motor) = machine.motor_of_name(&child) else {
                    return Status::fault(FaultCode::NoMotor, &child);
                };
                let status = initialize_stroke_array(machine, kid, &child, motor, &mut slen[motor]);
                if status != Status::Ok {
                    return status.with_key(&child);
                }
            }
        }
    }
    if !us_ok {
        return Status::fault(FaultCode::FieldRequired, "us");
    }
    for (m, mismatch_key) in [(1, "2"), (2, "3"), (3, "4")] {
        if slen[0] != 0 && slen[m] != 0 && slen[0] != slen[m] {
            return Status::fault(FaultCode::SegLenMismatch, mismatch_key);
        }
    }
    let length = slen.iter().copied().find(|&n| n != 0).unwrap_or(0);
    if length == 0 {
        return Status::fault(FaultCode::StrokeNull, key);
    }
    machine.stroke.set_len(length);
    if !has_dp {
        machine.stroke.d_end_pos = machine.stroke.segment_sum();
    }
    let now = machine.ticks();
    let status = machine.stroke.start(now);
    if status != Status::Ok {
        return status.with_key(key);
    }
    debug!("stroke started: {} segments over {} ticks", length, machine.stroke.duration());
    Status::BusyMoving
}

/// Fill one motor's segment deltas from a numeric array or a hex-pair
/// string. The slot is reset to 0 afterwards so the echo stays compact.
fn initialize_stroke_array<P: MachinePort>(
    machine: &mut Machine<P>,
    kid: &mut JsonMap,
    key: &str,
    motor: usize,
    slen: &mut usize,
) -> Status {
    match kid.get(key) {
        Some(Value::Array(arr)) => {
            let arr = arr.clone();
            for v in &arr {
                let Some(n) = v.as_i64() else {
                    return Status::fault(FaultCode::WrongType, key);
                };
                if !(-127..=127).contains(&n) {
                    return Status::fault(FaultCode::RangeError, key);
                }
                if *slen >= STROKE_CAPACITY {
                    return Status::fault(FaultCode::StrokeMaxLen, key);
                }
                machine.stroke.set_seg_delta(*slen, motor, n as i8);
                *slen += 1;
            }
        }
        Some(Value::String(hex)) => {
            let hex = hex.clone();
            let bytes = hex.as_bytes();
            if bytes.len() % 2 != 0 {
                return Status::fault(FaultCode::FieldHex, key);
            }
            for pair in bytes.chunks(2) {
                let (Some(high), Some(low)) = (hex_value(pair[0]), hex_value(pair[1])) else {
                    return Status::fault(FaultCode::FieldHex, key);
                };
                if *slen >= STROKE_CAPACITY {
                    return Status::fault(FaultCode::StrokeMaxLen, key);
                }
                machine.stroke.set_seg_delta(*slen, motor, ((high << 4) | low) as i8);
                *slen += 1;
            }
        }
        _ => return Status::fault(FaultCode::FieldArray, key),
    }
    kid.insert(key.to_string(), Value::from(0));
    Status::Ok
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// One traversal quantum plus a position echo into every motor-suffixed
/// key of the stroke object.
fn traverse_stroke_echo<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    let now = machine.ticks();
    let status = machine.traverse_stroke(now);
    let pos = machine.stroke.d_pos;
    if let Some(Value::Object(_)) = obj.get(key) {
        for child in kid_keys(obj, key) {
            let suffix = super::last_char_suffix(&child);
            if let Some(motor) = machine.motor_of_name(suffix) {
                kid_mut(obj, key).insert(child, Value::from(pos.value[motor]));
            }
        }
    }
    status
}

// ---------------------------------------------------------------------------
// mov: point-to-point move
// ---------------------------------------------------------------------------

/// Handle `mov` and its shortcut forms.
pub(crate) fn process_move<P: MachinePort>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    match prev {
        Status::BusyMoving | Status::BusyOk => poll_move(machine, obj, key),
        _ => MoveTo::begin(machine).process(machine, obj, key),
    }
}

/// Request-scoped move accumulator: per-motor targets in cartesian units
/// (delta topology) or pulses (raw), seeded from the current position so
/// unmentioned motors stay put.
struct MoveTo {
    destination: Quad<f32>,
    n_segs: i16,
}

impl MoveTo {
    fn begin<P: MachinePort>(machine: &Machine<P>) -> Self {
        let cur = machine.motor_position();
        let mut destination = Quad::new(cur.value.map(|v| v as f32));
        if machine.topology == Topology::Delta {
            if let Some(xyz) = machine.xyz() {
                destination.value[0] = xyz.x;
                destination.value[1] = xyz.y;
                destination.value[2] = xyz.z;
            }
        }
        Self { destination, n_segs: 0 }
    }

    fn process<P: MachinePort>(
        mut self,
        machine: &mut Machine<P>,
        obj: &mut JsonMap,
        key: &str,
    ) -> Status {
        if key == "mov" {
            if !obj.contains_key(key) {
                return Status::fault(FaultCode::FieldRequired, key);
            }
            self.expand(machine, obj, key);
            let Some(Value::Object(_)) = obj.get(key) else {
                return Status::fault(FaultCode::JsonObject, key);
            };
            for child in kid_keys(obj, key) {
                let kid = kid_mut(obj, key);
                let status = self.process_key(machine, kid, &child);
                if status != Status::Ok {
                    debug!("move field '{}' -> {}", child, status);
                    return status;
                }
            }
            return self.start_async(machine, obj, key);
        }
        self.process_shortcut(machine, obj, key)
    }

    fn expand<P: MachinePort>(&self, machine: &Machine<P>, obj: &mut JsonMap, key: &str) {
        let mut children: Vec<&str> = vec!["lp", "mv", "pp", "sg", "tp", "ts"];
        let digits = ["1", "2", "3", "4"];
        for m in 0..MOTOR_COUNT {
            if machine.motor_axis_ref(m).is_enabled() {
                children.push(digits[m]);
            }
        }
        expand_query(obj, key, &children);
    }

    fn process_key<P: MachinePort>(
        &mut self,
        machine: &mut Machine<P>,
        kid: &mut JsonMap,
        key: &str,
    ) -> Status {
        match key {
            "lp" | "pp" | "ts" | "tp" => Status::Ok,
            "mv" => process_field(kid, key, &mut machine.v_max),
            "sg" => process_field(kid, key, &mut self.n_segs),
            "tv" => process_field(kid, key, &mut machine.tv_max),
            "d" => {
                if !kid.contains_key("a") {
                    return Status::fault(FaultCode::FieldRequired, "a");
                }
                Status::Ok
            }
            "a" => {
                // Polar input: degrees CCW from the X axis around X0 Y0.
                if !kid.contains_key("d") {
                    return Status::fault(FaultCode::FieldRequired, "d");
                }
                let (Some(d), Some(a)) =
                    (kid.get("d").and_then(Value::as_f64), kid.get("a").and_then(Value::as_f64))
                else {
                    return Status::fault(FaultCode::WrongType, key);
                };
                let radians = a as f32 * core::f32::consts::PI / 180.0;
                self.destination.value[0] = d as f32 * cosf(radians);
                self.destination.value[1] = d as f32 * sinf(radians);
                Status::Ok
            }
            _ => match machine.motor_of_name(key) {
                Some(motor) => process_field(kid, key, &mut self.destination.value[motor]),
                None => Status::fault(FaultCode::NoMotor, key),
            },
        }
    }

    /// `movrx`/`rx` style relative shortcuts and `mov<motor>` short forms.
    /// The `mov`-prefixed forms execute synchronously to completion.
    fn process_shortcut<P: MachinePort>(
        mut self,
        machine: &mut Machine<P>,
        obj: &mut JsonMap,
        key: &str,
    ) -> Status {
        let relative = match key {
            "movrx" | "rx" => Some(0),
            "movry" | "ry" => Some(1),
            "movrz" | "rz" => Some(2),
            _ => None,
        };
        if let Some(coord) = relative {
            if machine.topology != Topology::Delta {
                return Status::fault(FaultCode::MtoField, key);
            }
            let Some(xyz) = machine.xyz() else {
                return Status::fault(FaultCode::KinematicXyz, key);
            };
            let mut delta: f32 = 0.0;
            let status = process_field(obj, key, &mut delta);
            if status != Status::Ok {
                return status;
            }
            let base = [xyz.x, xyz.y, xyz.z][coord];
            self.destination.value[coord] = base + delta;
            if key.starts_with("mov") {
                return self.execute_sync(machine, key);
            }
            return Status::Ok;
        }

        let suffix = super::last_char_suffix(key);
        let Some(motor) = machine.motor_of_name(suffix) else {
            return Status::fault(FaultCode::NoMotor, key);
        };
        let status = process_field(obj, key, &mut self.destination.value[motor]);
        if status != Status::Ok {
            return status;
        }
        self.execute_sync(machine, key)
    }

    /// Plan and start the stroke; the dispatcher polls it on later calls.
    fn start_async<P: MachinePort>(
        &self,
        machine: &mut Machine<P>,
        obj: &mut JsonMap,
        key: &str,
    ) -> Status {
        match plan_move(machine, self.n_segs, &self.destination) {
            Err(status) => status.with_key(key),
            Ok(false) => {
                // Nothing to do: report an empty move.
                let now = machine.ticks();
                fill_motion_outputs(obj, key, 0, 0, 0.0, 0.0, 0.0);
                machine.op.mv = MoveOp { loops: 0, t_begin: now };
                Status::Ok
            }
            Ok(true) => Status::BusyMoving,
        }
    }

    /// Run the planned stroke to completion inside this call. Deliberate
    /// exception to the non-blocking contract, bounded to short moves.
    fn execute_sync<P: MachinePort>(&self, machine: &mut Machine<P>, key: &str) -> Status {
        match plan_move(machine, self.n_segs, &self.destination) {
            Err(status) => status.with_key(key),
            Ok(false) => Status::Ok,
            Ok(true) => loop {
                let now = machine.ticks();
                match machine.traverse_stroke(now) {
                    Status::BusyMoving => machine.port.delay_us(SYNC_POLL_US),
                    done => break done,
                }
            },
        }
    }
}

/// Displacement plan shared by the move forms. `Ok(false)` means no motion
/// was needed; `Ok(true)` means the machine stroke is started.
fn plan_move<P: MachinePort>(
    machine: &mut Machine<P>,
    n_segs: i16,
    destination: &Quad<f32>,
) -> Result<bool, Status> {
    let cur = machine.motor_position();
    let mut d_pos = Quad::<StepCoord>::default();
    match machine.topology {
        Topology::Raw => {
            for m in 0..MOTOR_COUNT {
                d_pos.value[m] = destination.value[m].round() as StepCoord - cur.value[m];
            }
        }
        Topology::Delta => {
            let xyz = Xyz {
                x: destination.value[0],
                y: destination.value[1],
                z: destination.value[2],
            };
            let Some(pulses) = machine.kinematics.to_pulses(xyz) else {
                return Err(Status::fault(FaultCode::KinematicXyz, ""));
            };
            d_pos.value[0] = pulses.p1 - cur.value[0];
            d_pos.value[1] = pulses.p2 - cur.value[1];
            d_pos.value[2] = pulses.p3 - cur.value[2];
            d_pos.value[3] = destination.value[3].round() as StepCoord - cur.value[3];
        }
    }
    for m in 0..MOTOR_COUNT {
        if !machine.motor_axis_ref(m).is_enabled() {
            d_pos.value[m] = 0;
        }
    }
    if d_pos.is_zero() {
        return Ok(false);
    }

    let builder = if n_segs > 0 {
        StrokeBuilder::with_segments(machine.v_max, machine.tv_max, n_segs as usize, n_segs as usize)
    } else {
        StrokeBuilder::new(machine.v_max, machine.tv_max)
    };
    let built = builder.build_line(&mut machine.stroke, d_pos);
    if built != Status::Ok {
        return Err(map_plan_fault(built));
    }
    let now = machine.ticks();
    let started = machine.stroke.start(now);
    if started != Status::Ok {
        return Err(map_plan_fault(started));
    }
    machine.op.mv = MoveOp { loops: 0, t_begin: now };
    Ok(true)
}

/// Attribute planning faults to the field that constrains them.
fn map_plan_fault(status: Status) -> Status {
    match status.fault_code() {
        Some(FaultCode::StrokeMaxLen) => status.with_key("sg"),
        Some(FaultCode::StrokeTime) | Some(FaultCode::StrokeEnd) => status.with_key("tv"),
        _ => status,
    }
}

/// One move poll: traverse, and on completion fill the requested output
/// fields.
fn poll_move<P: MachinePort>(machine: &mut Machine<P>, obj: &mut JsonMap, key: &str) -> Status {
    machine.op.mv.loops += 1;
    let now = machine.ticks();
    let status = machine.traverse_stroke(now);
    if status != Status::Ok {
        return status;
    }
    let ts = (now - machine.op.mv.t_begin) as f32 / TICKS_PER_SECOND as f32;
    let pp = if ts > 0.0 {
        machine.stroke.v_peak as f32 * (machine.stroke.len() as f32 / ts)
    } else {
        0.0
    };
    fill_motion_outputs(
        obj,
        key,
        machine.op.mv.loops,
        machine.stroke.len(),
        machine.stroke.time_planned(),
        ts,
        pp,
    );
    Status::Ok
}

/// Write the motion output fields into the group object, touching only the
/// keys the request declared.
fn fill_motion_outputs(
    obj: &mut JsonMap,
    key: &str,
    loops: i32,
    segments: usize,
    tp: f32,
    ts: f32,
    pp: f32,
) {
    let Some(Value::Object(kid)) = obj.get_mut(key) else {
        return;
    };
    for out in MOTION_OUTPUTS {
        if !kid.contains_key(*out) {
            continue;
        }
        let value = match *out {
            "lp" => Value::from(loops),
            "pp" => Value::from(pp),
            "sg" => Value::from(segments as i64),
            "tp" => Value::from(tp),
            _ => Value::from(ts),
        };
        kid.insert((*out).to_string(), value);
    }
}

// ---------------------------------------------------------------------------
// tst: self-test group
// ---------------------------------------------------------------------------

/// Handle the `tst` group: `rv` revolution exercise, `sp` raw step pulses,
/// `ph` ping-pong stroke self-test.
pub(crate) fn process_test<P: MachinePort>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    if !matches!(prev, Status::BusyParsed | Status::BusyMoving) {
        return prev.clone();
    }
    if key == "tst" {
        let Some(Value::Object(_)) = obj.get(key) else {
            return Status::fault(FaultCode::JsonObject, key);
        };
        let mut status = Status::Ok;
        for child in kid_keys(obj, key) {
            let kid = kid_mut(obj, key);
            status = process_test(machine, prev, kid, &child);
            if status.is_fault() {
                return status;
            }
        }
        status
    } else if is_group_key(key, "tst", "rv") {
        test_revolutions(machine, obj, key)
    } else if is_group_key(key, "tst", "sp") {
        test_step_pulses(machine, obj, key)
    } else if is_group_key(key, "tst", "ph") {
        process_selftest(machine, prev, obj, key)
    } else {
        Status::fault(FaultCode::UnrecognizedName, key)
    }
}

/// Exercise whole revolutions on each motor, out and back, with settle
/// delays between passes. Repeats every poll until cancelled.
fn test_revolutions<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    let Some(Value::Array(arr)) = obj.get(key) else {
        return Status::fault(FaultCode::FieldArray, key);
    };
    let arr = arr.clone();
    let mut steps = Quad::<StepCoord>::default();
    for (m, v) in arr.iter().take(MOTOR_COUNT).enumerate() {
        let Some(revs) = v.as_i64() else {
            return Status::fault(FaultCode::WrongType, key);
        };
        let axis = machine.motor_axis_ref(m);
        let rev_steps = (360.0 / axis.step_angle) as StepCoord;
        let rev_microsteps = rev_steps * axis.microsteps as StepCoord;
        steps.value[m] = revs as StepCoord * rev_microsteps;
    }
    let mut status = machine.pulse(steps);
    if status == Status::Ok {
        machine.port.delay_ms(250);
        let back = Quad::new(steps.value.map(|v| v.abs()));
        status = machine.pulse(back);
        machine.port.delay_ms(250);
    }
    if status == Status::Ok {
        status = Status::BusyMoving;
    }
    status.with_key(key)
}

/// Emit raw per-motor step pulses once.
fn test_step_pulses<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    let Some(Value::Array(arr)) = obj.get(key) else {
        return Status::fault(FaultCode::FieldArray, key);
    };
    let arr = arr.clone();
    let mut steps = Quad::<StepCoord>::default();
    for (m, v) in arr.iter().take(MOTOR_COUNT).enumerate() {
        let Some(n) = v.as_i64() else {
            return Status::fault(FaultCode::WrongType, key);
        };
        steps.value[m] = n as StepCoord;
    }
    machine.pulse(steps).with_key(key)
}

/// `tst ph`: build a stroke of `pu` pulses on every enabled motor, run it,
/// reverse, and keep ping-ponging until the caller cancels.
fn process_selftest<P: MachinePort>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    match prev {
        Status::BusyParsed => initialize_selftest(machine, obj, key),
        Status::BusyMoving => poll_selftest(machine, obj, key),
        other => other.clone(),
    }
}

fn initialize_selftest<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    machine.op.selftest = SelfTest::default();
    expand_query(obj, key, &["lp", "mv", "pp", "pu", "sg", "ts", "tp", "tv"]);
    let Some(Value::Object(_)) = obj.get(key) else {
        return Status::fault(FaultCode::JsonObject, key);
    };
    for child in kid_keys(obj, key) {
        let kid = kid_mut(obj, key);
        let status = match child.as_str() {
            "lp" | "pp" | "ts" | "tp" => Status::Ok,
            "mv" => process_field(kid, &child, &mut machine.v_max),
            "pu" => process_field(kid, &child, &mut machine.op.selftest.pulses),
            "sg" => process_field(kid, &child, &mut machine.op.selftest.segs),
            "tv" => process_field(kid, &child, &mut machine.tv_max),
            _ => Status::fault(FaultCode::UnrecognizedName, &child),
        };
        if status != Status::Ok {
            return status;
        }
    }
    let status = start_selftest_pass(machine);
    if status != Status::Ok {
        return status;
    }
    Status::BusyMoving
}

fn poll_selftest<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    machine.op.selftest.loops += 1;
    let now = machine.ticks();
    let status = machine.traverse_stroke(now);
    if status != Status::Ok {
        return status;
    }
    // Pass finished: report, reverse, and go again until cancelled.
    let ts = (now - machine.op.selftest.t_begin) as f32 / TICKS_PER_SECOND as f32;
    let pp = if ts > 0.0 {
        machine.stroke.v_peak as f32 * (machine.stroke.len() as f32 / ts)
    } else {
        0.0
    };
    fill_motion_outputs(
        obj,
        key,
        machine.op.selftest.loops,
        machine.stroke.len(),
        machine.stroke.time_planned(),
        ts,
        pp,
    );
    machine.op.selftest.pulses = -machine.op.selftest.pulses;
    let status = start_selftest_pass(machine);
    if status != Status::Ok {
        return status;
    }
    Status::BusyMoving
}

fn start_selftest_pass<P: MachinePort>(machine: &mut Machine<P>) -> Status {
    let pulses = machine.op.selftest.pulses;
    let segs = machine.op.selftest.segs;
    if segs < 0 || segs as usize >= STROKE_CAPACITY {
        return Status::fault(FaultCode::StrokeMaxLen, "sg");
    }

    let mut start_pos = Quad::<StepCoord>::default();
    let mut displacement = Quad::<StepCoord>::default();
    for m in 0..MOTOR_COUNT {
        if !machine.motor_axis_ref(m).is_enabled() {
            continue;
        }
        if pulses < 0 {
            start_pos.value[m] = -pulses;
        }
        displacement.value[m] = pulses;
    }
    machine.set_motor_position(start_pos);

    let builder =
        StrokeBuilder::with_segments(machine.v_max, machine.tv_max, segs as usize, segs as usize);
    let built = builder.build_line(&mut machine.stroke, displacement);
    if built != Status::Ok {
        return map_plan_fault(built);
    }
    let now = machine.ticks();
    let started = machine.stroke.start(now);
    if started != Status::Ok {
        return map_plan_fault(started);
    }
    machine.op.selftest.t_begin = now;
    machine.op.selftest.active = true;
    Status::Ok
}
