//! Axis configuration, motor binding, and position handlers.

use serde_json::Value;

use super::fields::process_field;
use super::{expand_query, is_axis_key, key_list, JsonMap};
use crate::error::{FaultCode, Status};
use crate::machine::Machine;
use crate::port::{MachinePort, PinMode};
use crate::quad::MOTOR_COUNT;

/// Child keys recognized inside an axis group.
const AXIS_KEYS: &[&str] = &[
    "dh", "en", "ho", "is", "lm", "ln", "mi", "pd", "pe", "pm", "pn", "po", "ps", "sa", "tm",
    "tn", "ud",
];

/// Axis index for a group letter.
fn axis_of(group: char) -> Option<usize> {
    match group {
        'x' => Some(0),
        'y' => Some(1),
        'z' => Some(2),
        'a' => Some(3),
        'b' => Some(4),
        'c' => Some(5),
        _ => None,
    }
}

/// Handle an axis group key (`x`..`c`) or one of its children, flat or
/// nested. Child keys accept the bare form or the letter-prefixed form
/// (`en` / `xen`).
pub(crate) fn process_axis<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
    group: char,
) -> Status {
    let Some(iaxis) = axis_of(group) else {
        return Status::fault(FaultCode::AxisError, key);
    };
    if key.len() == 1 {
        expand_query(obj, key, AXIS_KEYS);
        if let Some(Value::Object(_)) = obj.get(key) {
            for child in kid_keys(obj, key) {
                let kid = kid_mut(obj, key);
                let status = process_axis(machine, kid, &child, group);
                if status != Status::Ok {
                    return status;
                }
            }
        }
        return Status::Ok;
    }

    if is_axis_key(key, "en") {
        let mut active = machine.axes[iaxis].is_enabled();
        let status = process_field(obj, key, &mut active);
        if status == Status::Ok {
            machine.enable_axis(iaxis, active);
            obj.insert(key.to_string(), Value::Bool(machine.axes[iaxis].is_enabled()));
        }
        status
    } else if is_axis_key(key, "dh") {
        let status = process_field(obj, key, &mut machine.axes[iaxis].dir_high);
        if status == Status::Ok && machine.axes[iaxis].pin_dir != crate::port::NO_PIN {
            // Re-latch the direction pin in case its meaning changed.
            let Machine { axes, port, .. } = machine;
            axes[iaxis].set_advancing(port, false);
            axes[iaxis].set_advancing(port, true);
        }
        status
    } else if is_axis_key(key, "ho") {
        process_field(obj, key, &mut machine.axes[iaxis].home)
    } else if is_axis_key(key, "is") {
        process_field(obj, key, &mut machine.axes[iaxis].idle_snooze)
    } else if is_axis_key(key, "lb") {
        process_field(obj, key, &mut machine.latch_backoff)
    } else if is_axis_key(key, "lm") {
        let invert = machine.invert_lim;
        let Machine { axes, port, .. } = machine;
        axes[iaxis].read_at_max(port, invert);
        process_field(obj, key, &mut machine.axes[iaxis].at_max)
    } else if is_axis_key(key, "ln") {
        let invert = machine.invert_lim;
        let Machine { axes, port, .. } = machine;
        axes[iaxis].read_at_min(port, invert);
        process_field(obj, key, &mut machine.axes[iaxis].at_min)
    } else if is_axis_key(key, "mi") {
        let status = process_field(obj, key, &mut machine.axes[iaxis].microsteps);
        if machine.axes[iaxis].microsteps < 1 {
            machine.axes[iaxis].microsteps = 1;
            return Status::fault(FaultCode::NonPositive, key);
        }
        status
    } else if is_axis_key(key, "pd") {
        process_pin(machine, obj, key, iaxis, PinField::Dir)
    } else if is_axis_key(key, "pe") {
        process_pin(machine, obj, key, iaxis, PinField::Enable)
    } else if is_axis_key(key, "pm") {
        process_pin(machine, obj, key, iaxis, PinField::Max)
    } else if is_axis_key(key, "pn") {
        process_pin(machine, obj, key, iaxis, PinField::Min)
    } else if is_axis_key(key, "po") {
        process_field(obj, key, &mut machine.axes[iaxis].position)
    } else if is_axis_key(key, "ps") {
        process_pin(machine, obj, key, iaxis, PinField::Step)
    } else if is_axis_key(key, "sa") {
        process_field(obj, key, &mut machine.axes[iaxis].step_angle)
    } else if is_axis_key(key, "tm") {
        process_field(obj, key, &mut machine.axes[iaxis].travel_max)
    } else if is_axis_key(key, "tn") {
        process_field(obj, key, &mut machine.axes[iaxis].travel_min)
    } else if is_axis_key(key, "ud") {
        process_field(obj, key, &mut machine.axes[iaxis].us_delay)
    } else {
        Status::fault(FaultCode::UnrecognizedName, key)
    }
}

/// Which axis pin a pin child key addresses.
enum PinField {
    Step,
    Dir,
    Enable,
    Min,
    Max,
}

/// Query or reassign an axis pin, reconfiguring the port on change.
fn process_pin<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
    iaxis: usize,
    which: PinField,
) -> Status {
    let current = {
        let a = &machine.axes[iaxis];
        match which {
            PinField::Step => a.pin_step,
            PinField::Dir => a.pin_dir,
            PinField::Enable => a.pin_enable,
            PinField::Min => a.pin_min,
            PinField::Max => a.pin_max,
        }
    };
    let mut new_pin = current;
    let status = process_field(obj, key, &mut new_pin);
    if status != Status::Ok {
        return status;
    }
    let (mode, init) = match which {
        PinField::Step | PinField::Dir => (PinMode::Output, None),
        // Enable initializes high: driver disabled until asked.
        PinField::Enable => (PinMode::Output, Some(true)),
        PinField::Min | PinField::Max => (PinMode::Input, None),
    };
    let Machine { axes, port, .. } = machine;
    let a = &mut axes[iaxis];
    let slot = match which {
        PinField::Step => &mut a.pin_step,
        PinField::Dir => &mut a.pin_dir,
        PinField::Enable => &mut a.pin_enable,
        PinField::Min => &mut a.pin_min,
        PinField::Max => &mut a.pin_max,
    };
    crate::machine::Axis::assign_pin(port, slot, new_pin, mode, init);
    status
}

/// Handle a motor group key (`1`..`4`) or its `ma` child: the motor-to-axis
/// binding.
pub(crate) fn process_motor<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
    group: char,
) -> Status {
    if key.len() == 1 {
        expand_query(obj, key, &["ma"]);
        if let Some(Value::Object(_)) = obj.get(key) {
            for child in kid_keys(obj, key) {
                let kid = kid_mut(obj, key);
                let status = process_motor(machine, kid, &child, group);
                if status != Status::Ok {
                    return status;
                }
            }
        }
        return Status::Ok;
    }
    if is_axis_key(key, "ma") {
        let Some(motor) = group.to_digit(10).map(|d| d as usize - 1).filter(|m| *m < MOTOR_COUNT)
        else {
            return Status::fault(FaultCode::MotorIndex, key);
        };
        let mut iaxis = machine.motor_axis_index(motor) as i32;
        let status = process_field(obj, key, &mut iaxis);
        if status != Status::Ok {
            return status;
        }
        if iaxis < 0 || iaxis as usize >= crate::machine::AXIS_COUNT {
            return Status::fault(FaultCode::AxisError, key);
        }
        machine.bind_motor(motor, iaxis as usize).with_key(key)
    } else {
        Status::Ok
    }
}

/// Raw-topology position handler (`mpo`): per-axis pulse counts, readable
/// and writable.
pub(crate) fn process_position<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    if key.len() == 3 {
        expand_query(obj, key, &["1", "2", "3", "4"]);
        let Some(Value::Object(_)) = obj.get(key) else {
            return Status::fault(FaultCode::PositionError, key);
        };
        for child in kid_keys(obj, key) {
            let kid = kid_mut(obj, key);
            let status = process_position(machine, kid, &child);
            if status != Status::Ok {
                return status;
            }
        }
        return Status::Ok;
    }
    let iaxis = match machine.axis_of_name(key) {
        Some(i) => i,
        None if key.len() > 3 => match key.get(3..).and_then(|k| machine.axis_of_name(k)) {
            Some(i) => i,
            None => return Status::fault(FaultCode::NoMotor, key),
        },
        None => return Status::fault(FaultCode::NoMotor, key),
    };
    process_field(obj, key, &mut machine.axes[iaxis].position)
}

/// Delta-topology position handler: motor counts stay writable, while the
/// derived cartesian fields are read-only and reject assignment with the
/// output-field fault.
pub(crate) fn process_position_delta<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    if key.len() == 3 {
        expand_query(obj, key, &["1", "2", "3", "4", "x", "y", "z"]);
        let Some(Value::Object(_)) = obj.get(key) else {
            return Status::fault(FaultCode::PositionError, key);
        };
        for child in kid_keys(obj, key) {
            let kid = kid_mut(obj, key);
            let status = process_position_delta(machine, kid, &child);
            if status != Status::Ok {
                return status;
            }
        }
        return Status::Ok;
    }
    let suffix = super::last_char_suffix(key);
    match suffix {
        "1" | "2" | "3" | "4" => {
            let motor = machine.motor_of_name(suffix).unwrap();
            let iaxis = machine.motor_axis_index(motor);
            process_field(obj, key, &mut machine.axes[iaxis].position)
        }
        "x" | "y" | "z" => {
            let Some(xyz) = machine.xyz() else {
                return Status::fault(FaultCode::KinematicXyz, key);
            };
            let current = match suffix {
                "x" => xyz.x,
                "y" => xyz.y,
                _ => xyz.z,
            };
            let mut value = current;
            let status = process_field(obj, key, &mut value);
            if status == Status::Ok && value != current {
                return Status::fault(FaultCode::OutputField, key);
            }
            status
        }
        _ => Status::fault(FaultCode::UnrecognizedName, key),
    }
}

/// Snapshot of a nested object's keys.
pub(crate) fn kid_keys(obj: &JsonMap, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Object(kid)) => key_list(kid),
        _ => Vec::new(),
    }
}

/// Mutable access to a nested object known to exist.
pub(crate) fn kid_mut<'a>(obj: &'a mut JsonMap, key: &str) -> &'a mut JsonMap {
    match obj.get_mut(key) {
        Some(Value::Object(kid)) => kid,
        _ => unreachable!("caller checked the nested object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPort;
    use serde_json::json;

    fn machine() -> Machine<SimPort> {
        Machine::new(SimPort::new())
    }

    fn obj(v: Value) -> JsonMap {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_axis_group_expands() {
        let mut m = machine();
        let mut o = obj(json!({"x": ""}));
        assert_eq!(process_axis(&mut m, &mut o, "x", 'x'), Status::Ok);
        let kid = o["x"].as_object().unwrap();
        for k in AXIS_KEYS {
            assert!(kid.contains_key(*k), "missing {}", k);
        }
    }

    #[test]
    fn test_flat_and_nested_alias_route_same_field() {
        let mut m = machine();
        let mut o = obj(json!({"xtm": 1234}));
        assert_eq!(process_axis(&mut m, &mut o, "xtm", 'x'), Status::Ok);
        assert_eq!(m.axes[0].travel_max, 1234);

        let mut o = obj(json!({"x": {"tm": 777}}));
        assert_eq!(process_axis(&mut m, &mut o, "x", 'x'), Status::Ok);
        assert_eq!(m.axes[0].travel_max, 777);
    }

    #[test]
    fn test_enable_echoes_actual_state() {
        let mut m = machine();
        let mut o = obj(json!({"en": true}));
        assert_eq!(process_axis(&mut m, &mut o, "en", 'y'), Status::Ok);
        assert!(m.axes[1].is_enabled());
        assert_eq!(o["en"], json!(true));
    }

    #[test]
    fn test_unknown_axis_child_faults() {
        let mut m = machine();
        let mut o = obj(json!({"x": {"qq": 1}}));
        let st = process_axis(&mut m, &mut o, "x", 'x');
        assert_eq!(st.fault_code(), Some(FaultCode::UnrecognizedName));
        assert_eq!(st.fault_key(), Some("qq"));
    }

    #[test]
    fn test_microsteps_must_be_positive() {
        let mut m = machine();
        let mut o = obj(json!({"mi": 0}));
        let st = process_axis(&mut m, &mut o, "mi", 'x');
        assert_eq!(st.fault_code(), Some(FaultCode::NonPositive));
        assert_eq!(m.axes[0].microsteps, 1);
    }

    #[test]
    fn test_motor_rebinding_via_ma() {
        let mut m = machine();
        let mut o = obj(json!({"1": {"ma": 2}}));
        assert_eq!(process_motor(&mut m, &mut o, "1", '1'), Status::Ok);
        assert_eq!(m.motor_axis_index(0), 2);

        let mut o = obj(json!({"1": {"ma": 19}}));
        let st = process_motor(&mut m, &mut o, "1", '1');
        assert_eq!(st.fault_code(), Some(FaultCode::AxisError));
    }

    #[test]
    fn test_position_read_write() {
        let mut m = machine();
        m.axes[0].position = 55;
        let mut o = obj(json!({"mpo": {"1": ""}}));
        assert_eq!(process_position(&mut m, &mut o, "mpo"), Status::Ok);
        assert_eq!(o["mpo"]["1"], 55);

        let mut o = obj(json!({"mpo": {"1": 99}}));
        assert_eq!(process_position(&mut m, &mut o, "mpo"), Status::Ok);
        assert_eq!(m.axes[0].position, 99);
    }

    #[test]
    fn test_delta_position_rejects_cartesian_write() {
        let mut m = machine();
        m.kinematics = Box::new(crate::sim::SimKinematics::default());
        let mut o = obj(json!({"mpo": {"x": 5.0}}));
        let st = process_position_delta(&mut m, &mut o, "mpo");
        assert_eq!(st.fault_code(), Some(FaultCode::OutputField));
    }

    #[test]
    fn test_pin_assignment_configures_port() {
        let mut m = machine();
        let mut o = obj(json!({"ps": 54}));
        assert_eq!(process_axis(&mut m, &mut o, "ps", 'x'), Status::Ok);
        assert_eq!(m.axes[0].pin_step, 54);
        assert_eq!(m.port.mode(54), Some(PinMode::Output));
    }
}
