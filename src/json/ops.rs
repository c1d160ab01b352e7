//! Homing, probing, and delta-geometry handlers.
//!
//! `hom` and `prb` are two-phase: the first entry flags the work and
//! returns busy; later entries run one machine quantum
//! ([`Machine::home`] / [`Machine::probe`]) and propagate its status.
//!
//! The topology decides the probe schema: the raw handler accepts
//! per-motor end positions; the delta handler adds cartesian `x y z`
//! fields and demotes the per-motor keys to read-only echoes. Each
//! accept/reject rule is that handler's own contract.

use serde_json::Value;

use super::axes::{kid_keys, kid_mut};
use super::fields::process_field;
use super::{expand_query, is_group_key, is_query, JsonMap};
use crate::error::{FaultCode, Status};
use crate::kinematics::{Step3, Xyz};
use crate::machine::{Machine, ProbeSource};
use crate::port::{MachinePort, NO_PIN};

// ---------------------------------------------------------------------------
// hom
// ---------------------------------------------------------------------------

/// Handle the `hom` group: flag axes for homing, then drive the
/// limit-switch search to completion across polls.
pub(crate) fn process_home<P: MachinePort>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    match prev {
        Status::BusyParsed => initialize_home(machine, obj, key, true),
        Status::BusyMoving | Status::BusyOk | Status::BusyCalibrating => {
            machine.home(prev.clone()).with_key(key)
        }
        _ => Status::fault(FaultCode::BadState, key),
    }
}

fn initialize_home<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
    clear: bool,
) -> Status {
    if clear {
        for axis in machine.axes.iter_mut() {
            axis.homing = false;
        }
    }
    let status = if key == "hom" {
        expand_query(obj, key, &["1", "2", "3", "4"]);
        let mut status = Status::Ok;
        if let Some(Value::Object(_)) = obj.get(key) {
            for child in kid_keys(obj, key) {
                let kid = kid_mut(obj, key);
                status = initialize_home(machine, kid, &child, false);
                if status != Status::BusyMoving {
                    return status;
                }
            }
        }
        status
    } else {
        let suffix = super::last_char_suffix(key);
        let Some(motor) = machine.motor_of_name(suffix) else {
            return Status::fault(FaultCode::NoMotor, key);
        };
        process_home_field(machine, motor, obj, key)
    };
    if status == Status::Ok {
        Status::BusyMoving
    } else {
        status
    }
}

/// Accept a home target for one motor and flag its axis. Axes that cannot
/// home (disabled, or no minimum switch) echo their position instead and
/// stay put.
fn process_home_field<P: MachinePort>(
    machine: &mut Machine<P>,
    motor: usize,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    let iaxis = machine.motor_axis_index(motor);
    let status = process_field(obj, key, &mut machine.axes[iaxis].home);
    let axis = &mut machine.axes[iaxis];
    if axis.is_enabled() && axis.pin_min != NO_PIN {
        obj.insert(key.to_string(), Value::from(axis.home));
        axis.homing = true;
    } else {
        obj.insert(key.to_string(), Value::from(axis.position));
        axis.homing = false;
    }
    status
}

// ---------------------------------------------------------------------------
// prb (raw topology)
// ---------------------------------------------------------------------------

/// Child keys of the raw-topology probe group.
const PROBE_KEYS: &[&str] = &["1", "2", "3", "4", "ip", "pn", "sd"];

/// Handle the `prb` group under the raw topology.
pub(crate) fn process_probe<P: MachinePort>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    match prev {
        Status::BusyParsed => initialize_probe(machine, obj, key, true),
        Status::BusyOk | Status::BusyCalibrating => {
            let status = machine.probe(prev.clone()).with_key(key);
            if status == Status::Ok {
                echo_probe_positions(machine, obj, key);
            }
            status
        }
        _ => Status::fault(FaultCode::BadState, key),
    }
}

fn initialize_probe<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
    clear: bool,
) -> Status {
    if clear {
        let position = machine.motor_position();
        machine.op.probe.setup(position);
    }
    let status = if key == "prb" {
        expand_query(obj, key, PROBE_KEYS);
        let mut status = Status::Ok;
        if let Some(Value::Object(_)) = obj.get(key) {
            for child in kid_keys(obj, key) {
                let kid = kid_mut(obj, key);
                status = initialize_probe(machine, kid, &child, false);
                if status.is_fault() {
                    return status;
                }
            }
            if status == Status::BusyCalibrating && machine.op.probe.pin_probe == NO_PIN {
                return Status::fault(FaultCode::FieldRequired, "pn");
            }
        }
        status
    } else if is_group_key(key, "prb", "ip") {
        process_field(obj, key, &mut machine.op.probe.invert_probe)
    } else if is_group_key(key, "prb", "pn") {
        process_field(obj, key, &mut machine.op.probe.pin_probe)
    } else if is_group_key(key, "prb", "sd") {
        process_field(obj, key, &mut machine.search_delay)
    } else {
        let suffix = super::last_char_suffix(key);
        let Some(motor) = machine.motor_of_name(suffix) else {
            return Status::fault(FaultCode::NoMotor, key);
        };
        process_probe_field(machine, motor, obj, key)
    };
    if status == Status::Ok {
        Status::BusyCalibrating
    } else {
        status
    }
}

/// Accept one motor's probe end position; the axis must be enabled.
fn process_probe_field<P: MachinePort>(
    machine: &mut Machine<P>,
    motor: usize,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    let status = process_field(obj, key, &mut machine.op.probe.end.value[motor]);
    if status != Status::Ok {
        return status;
    }
    let axis = machine.motor_axis_ref(motor);
    if !axis.is_enabled() {
        return Status::fault(FaultCode::AxisDisabled, key);
    }
    let delta = (machine.op.probe.end.value[motor] - axis.position).abs();
    machine.op.probe.max_delta = machine.op.probe.max_delta.max(delta);
    Status::Ok
}

/// Echo the stop positions into the probe object's motor keys.
fn echo_probe_positions<P: MachinePort>(machine: &Machine<P>, obj: &mut JsonMap, key: &str) {
    if !matches!(obj.get(key), Some(Value::Object(_))) {
        return;
    }
    for child in kid_keys(obj, key) {
        let suffix = super::last_char_suffix(&child);
        if let Some(motor) = machine.motor_of_name(suffix) {
            let position = machine.motor_axis_ref(motor).position;
            kid_mut(obj, key).insert(child, Value::from(position));
        }
    }
}

// ---------------------------------------------------------------------------
// prb (delta topology)
// ---------------------------------------------------------------------------

/// Handle the `prb` group under the delta topology: the search end is
/// declared in cartesian space and converted through the kinematics;
/// per-motor keys are read-only echoes here.
pub(crate) fn process_probe_delta<P: MachinePort>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    match prev {
        Status::BusyParsed => initialize_probe_delta(machine, obj, key, true),
        Status::BusyOk | Status::BusyCalibrating => {
            let status = machine.probe(prev.clone()).with_key(key);
            if status == Status::Ok {
                return finalize_probe_delta(machine, obj, key);
            }
            status
        }
        _ => Status::fault(FaultCode::BadState, key),
    }
}

fn initialize_probe_delta<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
    clear: bool,
) -> Status {
    if clear {
        let position = machine.motor_position();
        machine.op.probe.setup(position);
    }
    let end = machine.op.probe.end;
    let mut xyz_end = machine
        .kinematics
        .to_xyz(Step3 { p1: end.value[0], p2: end.value[1], p3: end.value[2] })
        .unwrap_or_default();

    let status = if key == "prb" {
        if is_query(obj.get(key).unwrap_or(&Value::Null)) {
            let mut node = JsonMap::new();
            let probe_z = machine.kinematics.min_z(xyz_end.x, xyz_end.y);
            for child in ["1", "2", "3", "4", "ip"] {
                node.insert(child.to_string(), Value::String(String::new()));
            }
            node.insert("pn".to_string(), Value::from(machine.op.probe.pin_probe));
            node.insert("sd".to_string(), Value::String(String::new()));
            node.insert("x".to_string(), Value::from(xyz_end.x));
            node.insert("y".to_string(), Value::from(xyz_end.y));
            node.insert("z".to_string(), Value::from(probe_z));
            obj.insert(key.to_string(), Value::Object(node));
        }
        let mut status = Status::Ok;
        if let Some(Value::Object(_)) = obj.get(key) {
            for child in kid_keys(obj, key) {
                let kid = kid_mut(obj, key);
                status = initialize_probe_delta(machine, kid, &child, false);
                if status.is_fault() {
                    return status;
                }
            }
            if status == Status::BusyCalibrating && machine.op.probe.pin_probe == NO_PIN {
                return Status::fault(FaultCode::FieldRequired, "pn");
            }
        }
        return if status == Status::Ok { Status::BusyCalibrating } else { status };
    } else if is_group_key(key, "prb", "ip") {
        process_field(obj, key, &mut machine.op.probe.invert_probe)
    } else if is_group_key(key, "prb", "pn") {
        process_field(obj, key, &mut machine.op.probe.pin_probe)
    } else if is_group_key(key, "prb", "sd") {
        process_field(obj, key, &mut machine.search_delay)
    } else if is_group_key(key, "prb", "x") {
        let st = process_field(obj, key, &mut xyz_end.x);
        apply_probe_end(machine, xyz_end, key, st)
    } else if is_group_key(key, "prb", "y") {
        let st = process_field(obj, key, &mut xyz_end.y);
        apply_probe_end(machine, xyz_end, key, st)
    } else if is_group_key(key, "prb", "z") {
        // Probing down to the surface: default to the lowest reachable Z.
        machine.op.probe.data_source = ProbeSource::Z;
        xyz_end.z = machine.kinematics.min_z(xyz_end.x, xyz_end.y);
        let st = process_field(obj, key, &mut xyz_end.z);
        apply_probe_end(machine, xyz_end, key, st)
    } else {
        let suffix = super::last_char_suffix(key);
        if machine.motor_of_name(suffix).is_some() {
            let slot = obj.get(key).unwrap_or(&Value::Null);
            if is_query(slot) {
                Status::Ok
            } else {
                return Status::fault(FaultCode::OutputField, key);
            }
        } else {
            return Status::fault(FaultCode::UnrecognizedName, key);
        }
    };
    if status == Status::Ok {
        Status::BusyCalibrating
    } else {
        status
    }
}

/// Convert the cartesian end through the kinematics into the per-motor
/// search targets.
fn apply_probe_end<P: MachinePort>(
    machine: &mut Machine<P>,
    xyz_end: Xyz,
    key: &str,
    status: Status,
) -> Status {
    if status != Status::Ok {
        return status;
    }
    let Some(pulses) = machine.kinematics.to_pulses(xyz_end) else {
        return Status::fault(FaultCode::KinematicXyz, key);
    };
    machine.op.probe.end.value[0] = pulses.p1;
    machine.op.probe.end.value[1] = pulses.p2;
    machine.op.probe.end.value[2] = pulses.p3;
    machine.op.probe.max_delta = 0;
    for m in 0..3 {
        let delta = (machine.op.probe.end.value[m] - machine.op.probe.start.value[m]).abs();
        machine.op.probe.max_delta = machine.op.probe.max_delta.max(delta);
    }
    Status::Ok
}

/// Write the contact position back: cartesian fields from the forward
/// kinematics, motor fields from the axis registry.
fn finalize_probe_delta<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    let Some(xyz) = machine.xyz() else {
        return Status::fault(FaultCode::KinematicXyz, key);
    };
    if !matches!(obj.get(key), Some(Value::Object(_))) {
        return finalize_probe_field(machine, xyz, obj, key);
    }
    for child in kid_keys(obj, key) {
        let kid = kid_mut(obj, key);
        let status = finalize_probe_field(machine, xyz, kid, &child);
        if status != Status::Ok {
            return status;
        }
    }
    Status::Ok
}

fn finalize_probe_field<P: MachinePort>(
    machine: &Machine<P>,
    xyz: Xyz,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    if is_group_key(key, "prb", "x") {
        obj.insert(key.to_string(), Value::from(xyz.x));
    } else if is_group_key(key, "prb", "y") {
        obj.insert(key.to_string(), Value::from(xyz.y));
    } else if is_group_key(key, "prb", "z") {
        obj.insert(key.to_string(), Value::from(xyz.z));
    } else if let Some(motor) = machine.motor_of_name(key) {
        obj.insert(key.to_string(), Value::from(machine.motor_axis_ref(motor).position));
    }
    Status::Ok
}

// ---------------------------------------------------------------------------
// dim (delta geometry)
// ---------------------------------------------------------------------------

/// Child keys of the delta geometry group.
const DIM_KEYS: &[&str] =
    &["e", "f", "gr", "ha1", "ha2", "ha3", "mi", "pd", "re", "rf", "st", "zo"];

/// Handle the `dim` group: read/write the delta geometry registry. Only
/// valid under the delta topology; the dispatcher rejects it otherwise.
pub(crate) fn process_dimension<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    if key == "dim" {
        expand_query(obj, key, DIM_KEYS);
        if let Some(Value::Object(_)) = obj.get(key) {
            for child in kid_keys(obj, key) {
                let kid = kid_mut(obj, key);
                let status = process_dimension(machine, kid, &child);
                if status != Status::Ok {
                    return status;
                }
            }
        }
        return Status::Ok;
    }

    let mut params = machine.kinematics.params();
    let status = if key == "zo" || key == "zoffset" {
        process_field(obj, key, &mut params.z_offset)
    } else if is_group_key(key, "dim", "e") {
        process_field(obj, key, &mut params.effector_side)
    } else if is_group_key(key, "dim", "f") {
        process_field(obj, key, &mut params.base_side)
    } else if is_group_key(key, "dim", "gr") {
        process_field(obj, key, &mut params.gear_ratio)
    } else if is_group_key(key, "dim", "ha1") {
        process_field(obj, key, &mut params.home_angles[0])
    } else if is_group_key(key, "dim", "ha2") {
        process_field(obj, key, &mut params.home_angles[1])
    } else if is_group_key(key, "dim", "ha3") {
        process_field(obj, key, &mut params.home_angles[2])
    } else if is_group_key(key, "dim", "mi") {
        process_field(obj, key, &mut params.microsteps)
    } else if is_group_key(key, "dim", "pd") {
        // Probe-data readback is output-only.
        let slot = obj.get(key).unwrap_or(&Value::Null);
        if !is_query(slot) {
            return Status::fault(FaultCode::OutputField, key);
        }
        let data: Vec<Value> =
            machine.op.probe.data.iter().map(|v| Value::from(*v)).collect();
        obj.insert(key.to_string(), Value::Array(data));
        return Status::Ok;
    } else if is_group_key(key, "dim", "re") {
        process_field(obj, key, &mut params.effector_length)
    } else if is_group_key(key, "dim", "rf") {
        process_field(obj, key, &mut params.base_arm_length)
    } else if is_group_key(key, "dim", "st") {
        process_field(obj, key, &mut params.steps360)
    } else {
        return Status::fault(FaultCode::UnrecognizedName, key);
    };
    if status == Status::Ok {
        machine.kinematics.set_params(params);
    }
    status
}
