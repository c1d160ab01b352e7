//! System-parameter, display, raw I/O, and EEPROM handlers.

use std::io::Write;

use serde_json::Value;

use super::axes::{kid_keys, kid_mut};
use super::dispatch::process_obj;
use super::fields::process_field;
use super::{expand_query, is_group_key, is_query, JsonMap};
use crate::error::{FaultCode, Status};
use crate::kinematics::Topology;
use crate::machine::{display_status, Machine, OutputMode};
use crate::port::{MachinePort, PinId, PinMode, EEPROM_SIZE, EEPROM_VALUE_BYTES, MAX_PIN};
use crate::{VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH};

/// Child keys recognized inside the `sys` group.
const SYS_KEYS: &[&str] = &[
    "ah", "as", "ch", "db", "eu", "hp", "jp", "lb", "lh", "lp", "mv", "om", "pc", "pi", "sd",
    "tc", "to", "tv", "v",
];

/// Handle the `sys` group: machine-wide parameters, flat or nested.
pub(crate) fn process_sys<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    if key == "sys" {
        expand_query(obj, key, SYS_KEYS);
        if let Some(Value::Object(_)) = obj.get(key) {
            for child in kid_keys(obj, key) {
                let kid = kid_mut(obj, key);
                let status = process_sys(machine, kid, &child);
                if status != Status::Ok {
                    return status;
                }
            }
        }
        return Status::Ok;
    }

    if is_group_key(key, "sys", "ah") {
        process_field(obj, key, &mut machine.auto_home)
    } else if is_group_key(key, "sys", "as") {
        process_field(obj, key, &mut machine.auto_sync)
    } else if is_group_key(key, "sys", "ch") {
        // The host reads the configuration hash; writing a different value
        // records it as the host's acknowledged sync point.
        let current = machine.hash();
        let mut acked = current;
        let status = process_field(obj, key, &mut acked);
        if acked != current {
            machine.sync_hash = acked;
        }
        status
    } else if is_group_key(key, "sys", "db") {
        process_field(obj, key, &mut machine.debounce)
    } else if is_group_key(key, "sys", "eu") {
        let existing = machine.ee_user_enabled;
        let mut enabled = existing;
        let status = process_field(obj, key, &mut enabled);
        if enabled != existing {
            machine.ee_user_enabled = enabled;
        }
        status
    } else if is_group_key(key, "sys", "hp") {
        process_field(obj, key, &mut machine.homing_pulses)
    } else if is_group_key(key, "sys", "jp") {
        process_field(obj, key, &mut machine.json_pretty)
    } else if is_group_key(key, "sys", "lb") {
        process_field(obj, key, &mut machine.latch_backoff)
    } else if is_group_key(key, "sys", "lh") {
        process_field(obj, key, &mut machine.invert_lim)
    } else if is_group_key(key, "sys", "lp") {
        process_field(obj, key, &mut machine.loops)
    } else if is_group_key(key, "sys", "mv") {
        process_field(obj, key, &mut machine.v_max)
    } else if is_group_key(key, "sys", "om") {
        let mut bits = machine.output_mode.0 as i32;
        let status = process_field(obj, key, &mut bits);
        if status == Status::Ok {
            machine.output_mode = OutputMode(bits as u8);
        }
        status
    } else if is_group_key(key, "sys", "pc") {
        let assignment = !matches!(obj.get(key), Some(v) if is_query(v));
        let mut preset = machine.pin_config;
        let status = process_field(obj, key, &mut preset);
        if status == Status::Ok && assignment {
            machine.pin_config = preset;
        }
        status
    } else if is_group_key(key, "sys", "pi") {
        let mut pin: PinId = machine.pin_status;
        let status = process_field(obj, key, &mut pin);
        if status == Status::Ok && pin != machine.pin_status {
            machine.pin_status = pin;
            machine.port.pin_mode(pin, PinMode::Output);
        }
        status
    } else if is_group_key(key, "sys", "sd") {
        process_field(obj, key, &mut machine.search_delay)
    } else if is_group_key(key, "sys", "tc") {
        // Read-only tick clock.
        obj.insert(key.to_string(), Value::from(machine.ticks()));
        Status::Ok
    } else if is_group_key(key, "sys", "to") {
        let mut code = machine.topology as i32;
        let status = process_field(obj, key, &mut code);
        if status != Status::Ok {
            return status;
        }
        let Some(topology) = Topology::from_code(code) else {
            return Status::fault(FaultCode::ValueRange, key);
        };
        if topology != machine.topology {
            switch_topology(machine, topology);
        }
        status
    } else if is_group_key(key, "sys", "tv") {
        process_field(obj, key, &mut machine.tv_max)
    } else if is_group_key(key, "sys", "v") {
        let version = VERSION_MAJOR as f64 * 100.0 + VERSION_MINOR as f64
            + VERSION_PATCH as f64 / 100.0;
        obj.insert(key.to_string(), Value::from(version));
        Status::Ok
    } else {
        Status::fault(FaultCode::UnrecognizedName, key)
    }
}

/// Switch topologies. Entering the delta topology rebases the three arm
/// axes onto the kinematic home pulses so positions stay physically
/// meaningful.
fn switch_topology<P: MachinePort>(machine: &mut Machine<P>, topology: Topology) {
    machine.topology = topology;
    if topology != Topology::Delta {
        return;
    }
    machine.kinematics.setup();
    if machine.axes[0].home >= 0 && machine.axes[1].home >= 0 && machine.axes[2].home >= 0 {
        let home = machine.kinematics.home_pulses();
        let pulses = [home.p1, home.p2, home.p3];
        for (i, hp) in pulses.iter().enumerate() {
            machine.axes[i].position += hp - machine.axes[i].home;
            machine.axes[i].home = *hp;
        }
    }
}

/// Child keys recognized inside the `dpy` group.
const DPY_KEYS: &[&str] = &["cb", "cg", "cr", "dl", "ds"];

/// Handle the `dpy` group: display and camera-light state. Assigning `ds`
/// maps the new display status onto the wait statuses so the transport can
/// hold the command until the condition clears.
pub(crate) fn process_display<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    if key == "dpy" {
        expand_query(obj, key, DPY_KEYS);
        if let Some(Value::Object(_)) = obj.get(key) {
            for child in kid_keys(obj, key) {
                let kid = kid_mut(obj, key);
                let status = process_display(machine, kid, &child);
                if status != Status::Ok {
                    return status;
                }
            }
        }
        return Status::Ok;
    }

    if is_group_key(key, "dpy", "cb") {
        process_field(obj, key, &mut machine.display.camera_b)
    } else if is_group_key(key, "dpy", "cg") {
        process_field(obj, key, &mut machine.display.camera_g)
    } else if is_group_key(key, "dpy", "cr") {
        process_field(obj, key, &mut machine.display.camera_r)
    } else if is_group_key(key, "dpy", "dl") {
        process_field(obj, key, &mut machine.display.level)
    } else if is_group_key(key, "dpy", "ds") {
        let assignment = !matches!(obj.get(key), Some(v) if is_query(v));
        let mut status = process_field(obj, key, &mut machine.display.status);
        if status == Status::Ok && assignment {
            status = match machine.display.status {
                display_status::WAIT_IDLE => Status::WaitIdle,
                display_status::WAIT_ERROR => Status::WaitError,
                display_status::WAIT_OPERATOR => Status::WaitOperator,
                display_status::BUSY_MOVING => Status::WaitMoving,
                display_status::BUSY => Status::WaitBusy,
                display_status::WAIT_CAMERA => Status::WaitCamera,
                _ => status,
            };
        }
        status
    } else {
        Status::fault(FaultCode::UnrecognizedName, key)
    }
}

/// Handle the `io` group and the flat `d<N>` / `a<N>` pin keys: raw
/// digital and analog access to pins the machine core does not own.
pub(crate) fn process_io<P: MachinePort>(
    machine: &mut Machine<P>,
    obj: &mut JsonMap,
    key: &str,
) -> Status {
    if key == "io" {
        let Some(Value::Object(_)) = obj.get(key) else {
            return Status::fault(FaultCode::JsonObject, key);
        };
        for child in kid_keys(obj, key) {
            let kid = kid_mut(obj, key);
            let status = process_io(machine, kid, &child);
            if status.is_fault() {
                return status;
            }
        }
        return Status::Ok;
    }
    let (analog, pin_str) = if let Some(rest) = key.strip_prefix("ioa") {
        (true, rest)
    } else if let Some(rest) = key.strip_prefix("iod") {
        (false, rest)
    } else if let Some(rest) = key.strip_prefix('a') {
        (true, rest)
    } else if let Some(rest) = key.strip_prefix('d') {
        (false, rest)
    } else {
        return Status::fault(FaultCode::UnrecognizedName, key);
    };
    let Ok(pin) = pin_str.parse::<i64>() else {
        return Status::fault(FaultCode::NoSuchPin, key);
    };
    if pin < 0 || pin > MAX_PIN as i64 {
        return Status::fault(FaultCode::NoSuchPin, key);
    }
    let pin = pin as PinId;
    if machine.is_core_pin(pin) {
        return Status::fault(FaultCode::CorePin, key);
    }

    let slot = obj.get(key).cloned().unwrap_or(Value::Null);
    if is_query(&slot) {
        machine.port.pin_mode(pin, PinMode::Input);
        let echo = if analog {
            Value::from(machine.port.analog_read(pin))
        } else {
            Value::Bool(machine.port.digital_read(pin))
        };
        obj.insert(key.to_string(), echo);
        return Status::Ok;
    }
    if analog {
        let Some(value) = slot.as_i64() else {
            return Status::fault(FaultCode::Json255, key);
        };
        if !(0..=255).contains(&value) {
            return Status::fault(FaultCode::Json255, key);
        }
        machine.port.pin_mode(pin, PinMode::Output);
        machine.port.analog_write(pin, value as i16);
    } else {
        let level = match &slot {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64().map(|v| v != 0).unwrap_or(false),
            _ => return Status::fault(FaultCode::JsonBool, key),
        };
        machine.port.pin_mode(pin, PinMode::Output);
        machine.port.digital_write(pin, level);
    }
    Status::Ok
}

/// Handle the `eep` group and the flat `eep<addr>` keys: address-keyed
/// persistent storage of strings and serialized JSON.
pub(crate) fn process_eeprom<P: MachinePort, W: Write>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
    out: &mut W,
) -> Status {
    if key == "eep" {
        let Some(Value::Object(_)) = obj.get(key) else {
            return Status::fault(FaultCode::JsonObject, key);
        };
        for child in kid_keys(obj, key) {
            let kid = kid_mut(obj, key);
            let addr = child.clone();
            let status = process_eeprom_value(machine, prev, kid, &child, &addr, out);
            if status.is_fault() {
                return status;
            }
        }
        return Status::Ok;
    }
    if let Some(addr) = key.strip_prefix("eep") {
        let addr = addr.to_string();
        let status = process_eeprom_value(machine, prev, obj, key, &addr, out);
        if status.is_fault() {
            return status.with_key(key);
        }
        return status;
    }
    Status::fault(FaultCode::UnrecognizedName, key)
}

/// One EEPROM slot. A leading `!` on the address executes the value as a
/// command before storing it.
fn process_eeprom_value<P: MachinePort, W: Write>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
    addr: &str,
    out: &mut W,
) -> Status {
    let mut addr = addr;
    if let Some(rest) = addr.strip_prefix('!') {
        let value = obj.get(key).cloned().unwrap_or(Value::Null);
        if let Value::Object(mut nested) = value {
            let status = process_obj(machine, prev, &mut nested, out);
            if status.is_fault() {
                return status.with_key(key);
            }
            obj.insert(key.to_string(), Value::Object(nested));
        }
        addr = rest;
    }
    if !addr.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        return Status::fault(FaultCode::JsonDigit, key);
    }
    let Ok(base) = addr.parse::<u32>() else {
        return Status::fault(FaultCode::EepromAddr, key);
    };
    if base >= EEPROM_SIZE {
        return Status::fault(FaultCode::EepromAddr, key);
    }

    let value = obj.get(key).cloned().unwrap_or(Value::Null);
    let serialized = match &value {
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(&value).unwrap_or_default()
        }
        Value::String(s) => s.clone(),
        _ => String::new(),
    };

    if serialized.is_empty() {
        // Query: read bytes until NUL or erased cells.
        let first = machine.port.eeprom_read(base);
        if first != 0 && first != 0xFF {
            let mut text = String::new();
            for i in 0..EEPROM_VALUE_BYTES as u32 {
                let byte = machine.port.eeprom_read(base + i);
                if byte == 0 || byte == 0xFF {
                    break;
                }
                text.push(byte as char);
            }
            obj.insert(key.to_string(), Value::String(text));
        }
        return Status::Ok;
    }

    if serialized.len() + 1 > EEPROM_VALUE_BYTES {
        return Status::fault(FaultCode::EepromValue, key);
    }
    if base as usize + serialized.len() >= EEPROM_SIZE as usize {
        return Status::fault(FaultCode::EepromAddr, key);
    }
    for (i, byte) in serialized.bytes().enumerate() {
        machine.port.eeprom_write(base + i as u32, byte);
    }
    machine.port.eeprom_write(base + serialized.len() as u32, 0);
    Status::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPort;
    use serde_json::json;

    fn machine() -> Machine<SimPort> {
        Machine::new(SimPort::new())
    }

    fn obj(v: serde_json::Value) -> JsonMap {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_sys_expansion_covers_every_key() {
        let mut m = machine();
        let mut o = obj(json!({"sys": ""}));
        assert_eq!(process_sys(&mut m, &mut o, "sys"), Status::Ok);
        let kid = o["sys"].as_object().unwrap();
        for k in SYS_KEYS {
            assert!(kid.contains_key(*k), "missing {}", k);
            assert!(!is_query(&kid[*k]), "{} left unresolved", k);
        }
    }

    #[test]
    fn test_sys_flat_alias() {
        let mut m = machine();
        let mut o = obj(json!({"sysmv": 6400}));
        assert_eq!(process_sys(&mut m, &mut o, "sysmv"), Status::Ok);
        assert_eq!(m.v_max, 6400);
    }

    #[test]
    fn test_sys_topology_switch_rebases_home() {
        let mut m = machine();
        m.kinematics = Box::new(crate::sim::SimKinematics { home: 100, ..Default::default() });
        m.axes[0].position = 10;
        let mut o = obj(json!({"sys": {"to": 1}}));
        assert_eq!(process_sys(&mut m, &mut o, "sys"), Status::Ok);
        assert_eq!(m.topology, Topology::Delta);
        assert_eq!(m.axes[0].home, 100);
        assert_eq!(m.axes[0].position, 110);
    }

    #[test]
    fn test_sys_version_reported() {
        let mut m = machine();
        let mut o = obj(json!({"v": ""}));
        assert_eq!(process_sys(&mut m, &mut o, "v"), Status::Ok);
        assert!(o["v"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_display_status_maps_to_wait() {
        let mut m = machine();
        let mut o = obj(json!({"dpy": {"ds": 12}}));
        let st = process_display(&mut m, &mut o, "dpy");
        assert_eq!(st, Status::WaitOperator);
        assert_eq!(m.display.status, display_status::WAIT_OPERATOR);

        // Querying ds does not trigger the wait mapping.
        let mut o = obj(json!({"ds": ""}));
        assert_eq!(process_display(&mut m, &mut o, "ds"), Status::Ok);
    }

    #[test]
    fn test_io_digital_round_trip() {
        let mut m = machine();
        let mut o = obj(json!({"d5": true}));
        assert_eq!(process_io(&mut m, &mut o, "d5"), Status::Ok);
        assert!(m.port.digital(5));

        let mut o = obj(json!({"d5": ""}));
        assert_eq!(process_io(&mut m, &mut o, "d5"), Status::Ok);
        assert_eq!(o["d5"], json!(true));
    }

    #[test]
    fn test_io_analog_range_checked() {
        let mut m = machine();
        let mut o = obj(json!({"a3": 300}));
        let st = process_io(&mut m, &mut o, "a3");
        assert_eq!(st.fault_code(), Some(FaultCode::Json255));
    }

    #[test]
    fn test_io_guards_core_pins() {
        let mut m = machine();
        m.axes[0].pin_step = 54;
        let mut o = obj(json!({"d54": true}));
        let st = process_io(&mut m, &mut o, "d54");
        assert_eq!(st.fault_code(), Some(FaultCode::CorePin));
    }

    #[test]
    fn test_eeprom_write_then_read() {
        let mut m = machine();
        let mut sink = Vec::new();
        let mut o = obj(json!({"eep100": "hello"}));
        let st = process_eeprom(&mut m, &Status::BusyParsed, &mut o, "eep100", &mut sink);
        assert_eq!(st, Status::Ok);

        let mut o = obj(json!({"eep100": ""}));
        let st = process_eeprom(&mut m, &Status::BusyParsed, &mut o, "eep100", &mut sink);
        assert_eq!(st, Status::Ok);
        assert_eq!(o["eep100"], "hello");
    }

    #[test]
    fn test_eeprom_stores_json_values() {
        let mut m = machine();
        let mut sink = Vec::new();
        let mut o = obj(json!({"eep": {"40": {"sysmv": 9000}}}));
        let st = process_eeprom(&mut m, &Status::BusyParsed, &mut o, "eep", &mut sink);
        assert_eq!(st, Status::Ok);

        let mut o = obj(json!({"eep40": ""}));
        assert_eq!(
            process_eeprom(&mut m, &Status::BusyParsed, &mut o, "eep40", &mut sink),
            Status::Ok
        );
        assert_eq!(o["eep40"], json!(r#"{"sysmv":9000}"#));
    }

    #[test]
    fn test_eeprom_bang_executes_value() {
        let mut m = machine();
        let mut sink = Vec::new();
        let mut o = obj(json!({"eep!60": {"sysmv": 7777}}));
        let st = process_eeprom(&mut m, &Status::BusyParsed, &mut o, "eep!60", &mut sink);
        assert_eq!(st, Status::Ok);
        assert_eq!(m.v_max, 7777);
    }

    #[test]
    fn test_eeprom_address_checked() {
        let mut m = machine();
        let mut sink = Vec::new();
        let mut o = obj(json!({"eep9999": "x"}));
        let st = process_eeprom(&mut m, &Status::BusyParsed, &mut o, "eep9999", &mut sink);
        assert_eq!(st.fault_code(), Some(FaultCode::EepromAddr));

        let mut o = obj(json!({"eepxyz": "x"}));
        let st = process_eeprom(&mut m, &Status::BusyParsed, &mut o, "eepxyz", &mut sink);
        assert_eq!(st.fault_code(), Some(FaultCode::JsonDigit));
    }
}
