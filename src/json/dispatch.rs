//! Command dispatcher.
//!
//! Walks a command's keys in insertion order, routes each to its handler,
//! and tracks the command status across external calls. Long operations
//! follow one transition table:
//!
//! | state            | entry action                         | next          |
//! |------------------|--------------------------------------|---------------|
//! | busy-parsed      | validate, plan, start                | busy-moving / busy-calibrating / fault |
//! | busy-moving      | poll the trajectory engine once      | busy-moving / ok / fault |
//! | busy-calibrating | poll the probe once                  | busy-calibrating / ok / fault |
//! | any busy         | [`Dispatcher::cancel`]               | wait-cancelled |
//!
//! The dispatcher itself never loops over physical motion; the transport
//! re-invokes [`Dispatcher::process`] until the status turns terminal, and
//! exactly one response is emitted per terminal transition.

use std::io::Write;

use log::{debug, warn};
use serde_json::Value;

use super::axes;
use super::command::{response_value, Command};
use super::motion;
use super::ops;
use super::peripherals;
use super::{key_list, JsonMap};
use crate::error::{FaultCode, Status};
use crate::kinematics::Topology;
use crate::machine::{Machine, OutputMode};
use crate::port::MachinePort;

/// Closed key-group enumeration: every top-level key resolves here first,
/// then the group's handler applies the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyGroup {
    Stroke,
    Move,
    Home,
    Test,
    Sys,
    Display,
    Position,
    Io,
    Eeprom,
    Dimension,
    Probe,
    IdleDelay,
    Comment,
    Message,
    Motor(char),
    Axis(char),
}

fn resolve_group(key: &str) -> Option<KeyGroup> {
    match key {
        "dvs" => return Some(KeyGroup::Stroke),
        "idl" => return Some(KeyGroup::IdleDelay),
        "cmt" => return Some(KeyGroup::Comment),
        "msg" => return Some(KeyGroup::Message),
        _ => {}
    }
    if key.starts_with("mov") {
        return Some(KeyGroup::Move);
    }
    if key.starts_with("hom") {
        return Some(KeyGroup::Home);
    }
    if key.starts_with("tst") {
        return Some(KeyGroup::Test);
    }
    if key.starts_with("sys") {
        return Some(KeyGroup::Sys);
    }
    if key.starts_with("dpy") {
        return Some(KeyGroup::Display);
    }
    if key.starts_with("mpo") {
        return Some(KeyGroup::Position);
    }
    if key.starts_with("io") {
        return Some(KeyGroup::Io);
    }
    if key.starts_with("eep") {
        return Some(KeyGroup::Eeprom);
    }
    if key.starts_with("dim") {
        return Some(KeyGroup::Dimension);
    }
    if key.starts_with("prb") {
        return Some(KeyGroup::Probe);
    }
    match key.chars().next() {
        Some(c @ '1'..='4') => Some(KeyGroup::Motor(c)),
        Some(c @ ('x' | 'y' | 'z' | 'a' | 'b' | 'c')) => Some(KeyGroup::Axis(c)),
        _ => None,
    }
}

/// The command state machine's entry point.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher;

impl Dispatcher {
    /// New dispatcher.
    pub fn new() -> Self {
        Self
    }

    /// Run one non-blocking quantum of `cmd` against `machine`, emitting a
    /// response into `out` when the status turns terminal.
    ///
    /// An object request dispatches once. An array request dispatches the
    /// element at the cursor; on element success the cursor advances and
    /// busy-parsed is returned so the transport calls again, optionally
    /// streaming an intermediate response when the array-stream output
    /// mode bit is set.
    pub fn process<P: MachinePort, W: Write>(
        &mut self,
        machine: &mut Machine<P>,
        cmd: &mut Command,
        out: &mut W,
    ) -> Status {
        machine.loops = machine.loops.wrapping_add(1);
        let prev = cmd.status().clone();
        let mut root = cmd.take_request();

        let status = if prev.is_fault() {
            prev
        } else {
            match &mut root {
                Value::Object(obj) => process_obj(machine, &prev, obj, out),
                Value::Array(arr) => {
                    self.process_array_element(machine, &prev, arr, cmd, out)
                }
                _ => Status::fault(FaultCode::JsonCommand, ""),
            }
        };

        cmd.put_request(root);
        cmd.set_status(status.clone());
        cmd.touch(machine.ticks());
        if !status.is_processing() {
            self.send_response(machine, cmd, out);
        }
        status
    }

    fn process_array_element<P: MachinePort, W: Write>(
        &mut self,
        machine: &mut Machine<P>,
        prev: &Status,
        arr: &mut [Value],
        cmd: &mut Command,
        out: &mut W,
    ) -> Status {
        let index = cmd.cursor();
        if index >= arr.len() {
            return Status::Ok;
        }
        let Value::Object(obj) = &mut arr[index] else {
            return Status::fault(FaultCode::JsonCommand, "");
        };
        // Elements after the first enter with the busy-parsed status the
        // cursor advance left behind.
        let mut status = process_obj(machine, prev, obj, out);
        if status == Status::Ok {
            let is_last = index + 1 >= arr.len();
            if !is_last && machine.output_mode.contains(OutputMode::ARRAY_STREAM) {
                let elapsed = machine.ticks() - cmd.last_active();
                let response = response_value(&status, &arr[index], elapsed);
                self.write_response(machine, &response, out);
            }
            cmd.advance_cursor();
            status = Status::BusyParsed;
        }
        status
    }

    /// Abort a busy command: emit a response carrying `cause` and leave the
    /// command in the terminal cancelled state. In-flight stroke state is
    /// discarded without rollback.
    pub fn cancel<P: MachinePort, W: Write>(
        &mut self,
        machine: &mut Machine<P>,
        cmd: &mut Command,
        cause: Status,
        out: &mut W,
    ) -> Status {
        debug!("cancelling command: {}", cause);
        machine.stroke.clear();
        for axis in machine.axes.iter_mut() {
            axis.homing = false;
        }
        cmd.set_status(cause);
        self.send_response(machine, cmd, out);
        cmd.set_status(Status::WaitCancelled);
        Status::WaitCancelled
    }

    fn send_response<P: MachinePort, W: Write>(
        &self,
        machine: &Machine<P>,
        cmd: &Command,
        out: &mut W,
    ) {
        let response = cmd.response(machine.ticks());
        self.write_response(machine, &response, out);
    }

    fn write_response<P: MachinePort, W: Write>(
        &self,
        machine: &Machine<P>,
        response: &Value,
        out: &mut W,
    ) {
        let text = if machine.json_pretty {
            serde_json::to_string_pretty(response)
        } else {
            serde_json::to_string(response)
        };
        match text {
            Ok(text) => {
                let _ = writeln!(out, "{}", text);
            }
            Err(e) => warn!("response serialization failed: {}", e),
        }
    }
}

/// Process every key of one request object in insertion order. Nested
/// objects resolve depth-first inside their handlers. The first fault
/// aborts the remaining keys; busy statuses carry through.
pub(crate) fn process_obj<P: MachinePort, W: Write>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    out: &mut W,
) -> Status {
    let mut status = Status::Ok;
    for key in key_list(obj) {
        if status.is_fault() {
            break;
        }
        status = route_key(machine, prev, obj, &key, out);
        if status.is_fault() {
            warn!("command fault: {}", status);
        }
    }
    status
}

fn route_key<P: MachinePort, W: Write>(
    machine: &mut Machine<P>,
    prev: &Status,
    obj: &mut JsonMap,
    key: &str,
    out: &mut W,
) -> Status {
    let Some(group) = resolve_group(key) else {
        return Status::fault(FaultCode::UnrecognizedName, key);
    };
    match group {
        KeyGroup::Stroke => motion::process_stroke(machine, prev, obj, key),
        KeyGroup::Move => motion::process_move(machine, prev, obj, key),
        KeyGroup::Home => ops::process_home(machine, prev, obj, key),
        KeyGroup::Test => motion::process_test(machine, prev, obj, key),
        KeyGroup::Sys => peripherals::process_sys(machine, obj, key),
        KeyGroup::Display => peripherals::process_display(machine, obj, key),
        KeyGroup::Position => match machine.topology {
            Topology::Raw => axes::process_position(machine, obj, key),
            Topology::Delta => axes::process_position_delta(machine, obj, key),
        },
        KeyGroup::Io => peripherals::process_io(machine, obj, key),
        KeyGroup::Eeprom => peripherals::process_eeprom(machine, prev, obj, key, out),
        KeyGroup::Dimension => match machine.topology {
            Topology::Raw => Status::fault(FaultCode::TopologyName, key),
            Topology::Delta => ops::process_dimension(machine, obj, key),
        },
        KeyGroup::Probe => match machine.topology {
            Topology::Raw => ops::process_probe(machine, prev, obj, key),
            Topology::Delta => ops::process_probe_delta(machine, prev, obj, key),
        },
        KeyGroup::IdleDelay => {
            let Some(ms) = obj.get(key).and_then(Value::as_i64) else {
                return Status::fault(FaultCode::WrongType, key);
            };
            machine.port.delay_ms(ms.clamp(0, i64::from(u32::MAX)) as u32);
            Status::Ok
        }
        KeyGroup::Comment => {
            if machine.output_mode.contains(OutputMode::COMMENTS) {
                if let Some(text) = obj.get(key).and_then(Value::as_str) {
                    let _ = writeln!(out, "{}", text);
                }
            }
            Status::Ok
        }
        KeyGroup::Message => {
            let Some(text) = obj.get(key).and_then(Value::as_str) else {
                return Status::fault(FaultCode::JsonString, key);
            };
            let _ = writeln!(out, "{}", text);
            Status::Ok
        }
        KeyGroup::Motor(c) => axes::process_motor(machine, obj, key, c),
        KeyGroup::Axis(c) => axes::process_axis(machine, obj, key, c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPort;

    fn machine() -> Machine<SimPort> {
        Machine::new(SimPort::new())
    }

    fn run(machine: &mut Machine<SimPort>, line: &str) -> (Status, Vec<u8>) {
        let mut dispatcher = Dispatcher::new();
        let mut cmd = Command::parse(line, machine.ticks());
        let mut out = Vec::new();
        let mut status = dispatcher.process(machine, &mut cmd, &mut out);
        let mut guard = 0;
        while status.is_processing() {
            machine.port.advance(10_000);
            status = dispatcher.process(machine, &mut cmd, &mut out);
            guard += 1;
            assert!(guard < 10_000, "command never terminated");
        }
        (status, out)
    }

    #[test]
    fn test_unrecognized_key_faults() {
        let mut m = machine();
        let (st, out) = run(&mut m, r#"{"zzq": 1}"#);
        assert_eq!(st.fault_code(), Some(FaultCode::UnrecognizedName));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(r#""e":"zzq""#));
    }

    #[test]
    fn test_first_fault_aborts_remaining_keys() {
        let mut m = machine();
        let (st, _) = run(&mut m, r#"{"bogus": 1, "sysmv": 9999}"#);
        assert!(st.is_fault());
        // The later key never ran.
        assert_eq!(m.v_max, 12_800);
    }

    #[test]
    fn test_insertion_order_side_effects() {
        let mut m = machine();
        // The second field reads what the first wrote.
        let (st, _) = run(&mut m, r#"{"sysmv": 4444, "sys": {"mv": ""}}"#);
        assert_eq!(st, Status::Ok);
        assert_eq!(m.v_max, 4444);
    }

    #[test]
    fn test_array_processes_elements_in_turn() {
        let mut m = machine();
        let (st, out) = run(&mut m, r#"[{"sysmv": 1000}, {"systv": 0.5}]"#);
        assert_eq!(st, Status::Ok);
        assert_eq!(m.v_max, 1000);
        assert!((m.tv_max - 0.5).abs() < 1e-6);
        // No streaming mode: one terminal response only.
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_array_streaming_mode_emits_intermediates() {
        let mut m = machine();
        m.output_mode = OutputMode::ARRAY_STREAM;
        let (st, out) = run(&mut m, r#"[{"sysmv": 1000}, {"systv": 0.5}]"#);
        assert_eq!(st, Status::Ok);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_array_element_fault_stops_batch() {
        let mut m = machine();
        let (st, _) = run(&mut m, r#"[{"nope": 1}, {"sysmv": 2000}]"#);
        assert!(st.is_fault());
        assert_eq!(m.v_max, 12_800);
    }

    #[test]
    fn test_msg_passthrough() {
        let mut m = machine();
        let (st, out) = run(&mut m, r#"{"msg": "hello there"}"#);
        assert_eq!(st, Status::Ok);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("hello there\n"));
    }

    #[test]
    fn test_cmt_honours_output_mode() {
        let mut m = machine();
        let (_, out) = run(&mut m, r#"{"cmt": "quiet"}"#);
        assert!(!String::from_utf8(out).unwrap().contains("quiet"));

        m.output_mode = OutputMode::COMMENTS;
        let (_, out) = run(&mut m, r#"{"cmt": "loud"}"#);
        assert!(String::from_utf8(out).unwrap().contains("loud"));
    }

    #[test]
    fn test_parse_error_emits_fault_response() {
        let mut m = machine();
        let (st, out) = run(&mut m, "{broken");
        assert_eq!(st.fault_code(), Some(FaultCode::JsonParse));
        assert!(!out.is_empty());
    }

    #[test]
    fn test_pretty_print_toggle() {
        let mut m = machine();
        m.json_pretty = true;
        let (_, out) = run(&mut m, r#"{"sysmv": 3000}"#);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains('\n'));
        assert!(text.contains("  "));
    }

    #[test]
    fn test_cancel_mid_move() {
        let mut m = machine();
        for i in 0..4 {
            m.axes[i].pin_step = (10 + i) as i16;
            m.enable_axis(i, true);
        }
        let mut dispatcher = Dispatcher::new();
        let mut cmd = Command::parse(r#"{"mov": {"1": 5000}}"#, m.ticks());
        let mut out = Vec::new();
        let st = dispatcher.process(&mut m, &mut cmd, &mut out);
        assert_eq!(st, Status::BusyMoving);

        let st = dispatcher.cancel(&mut m, &mut cmd, Status::WaitCancelled, &mut out);
        assert_eq!(st, Status::WaitCancelled);
        assert!(m.stroke.is_empty());
        assert!(!out.is_empty());
    }
}
