//! Integration tests: full command flows through the dispatcher against a
//! simulated machine.

use quadstep::{
    Command, Dispatcher, FaultCode, Machine, OutputMode, SimKinematics, SimPort, Status, Topology,
};

/// Machine with four enabled motors on wide travel.
fn machine() -> Machine<SimPort> {
    let mut m = Machine::new(SimPort::new());
    for i in 0..4 {
        m.axes[i].pin_step = (10 + i) as i16;
        m.axes[i].pin_dir = (14 + i) as i16;
        m.axes[i].pin_min = (20 + i) as i16;
        m.axes[i].travel_min = -100_000;
        m.axes[i].travel_max = 100_000;
        m.enable_axis(i, true);
    }
    m
}

/// Drive a command to a terminal status, advancing the simulated clock
/// between polls.
fn run(machine: &mut Machine<SimPort>, line: &str) -> (Status, String) {
    let mut dispatcher = Dispatcher::new();
    let mut cmd = Command::parse(line, machine.ticks());
    let mut out = Vec::new();
    let mut status = dispatcher.process(machine, &mut cmd, &mut out);
    let mut polls = 0;
    while status.is_processing() {
        machine.port.advance(5_000);
        status = dispatcher.process(machine, &mut cmd, &mut out);
        polls += 1;
        assert!(polls < 100_000, "command never terminated: {}", line);
    }
    (status, String::from_utf8(out).unwrap())
}

fn response_json(out: &str) -> serde_json::Value {
    serde_json::from_str(out.lines().last().expect("one response")).expect("valid response JSON")
}

// ---------------------------------------------------------------------------
// Stroke download scenarios
// ---------------------------------------------------------------------------

#[test]
fn stroke_download_runs_to_declared_end() {
    let mut m = machine();
    let (status, out) = run(&mut m, r#"{"dvs":{"1":[10,10,10],"2":[10,10,10],"us":100000}}"#);
    assert_eq!(status, Status::Ok);

    // Both motors displaced by the sum of their segment deltas.
    assert_eq!(m.axes[0].position, 30);
    assert_eq!(m.axes[1].position, 30);
    assert_eq!(m.stroke.cur_seg, m.stroke.len());

    let resp = response_json(&out);
    assert_eq!(resp["s"], 0);
    // Final traversal echoed the motor positions.
    assert_eq!(resp["r"]["dvs"]["1"], 30);
    assert_eq!(resp["r"]["dvs"]["2"], 30);
}

#[test]
fn stroke_download_accepts_hex_payload() {
    let mut m = machine();
    // 0x0a = 10 three times.
    let (status, _) = run(&mut m, r#"{"dvs":{"1":"0a0a0a","us":50000}}"#);
    assert_eq!(status, Status::Ok);
    assert_eq!(m.axes[0].position, 30);
}

#[test]
fn stroke_download_rejects_length_mismatch_before_pulses() {
    let mut m = machine();
    let (status, _) =
        run(&mut m, r#"{"dvs":{"1":[1,1,1],"2":[1,1,1,1,1],"us":100000}}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::SegLenMismatch));
    // No pulses were emitted.
    assert_eq!(m.axes[0].position, 0);
    assert_eq!(m.axes[1].position, 0);
}

#[test]
fn stroke_download_rejects_out_of_range_delta() {
    let mut m = machine();
    let (status, _) = run(&mut m, r#"{"dvs":{"1":[10,200],"us":100000}}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::RangeError));
    assert_eq!(m.axes[0].position, 0);
}

#[test]
fn stroke_download_requires_duration() {
    let mut m = machine();
    let (status, out) = run(&mut m, r#"{"dvs":{"1":[10,10]}}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::FieldRequired));
    let resp = response_json(&out);
    assert_eq!(resp["e"], "us");
}

#[test]
fn stroke_download_rejects_unreachable_declared_end() {
    let mut m = machine();
    // dp declares an end far beyond what the segments can reach.
    let (status, _) =
        run(&mut m, r#"{"dvs":{"1":[10,10,10],"dp":[5000],"us":100000}}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::StrokeEnd));
    // Axis positions untouched.
    assert_eq!(m.axes[0].position, 0);
}

#[test]
fn stroke_download_rejects_bad_hex() {
    let mut m = machine();
    let (status, _) = run(&mut m, r#"{"dvs":{"1":"0g","us":1000}}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::FieldHex));
}

// ---------------------------------------------------------------------------
// Schema expansion and field round trips
// ---------------------------------------------------------------------------

#[test]
fn sys_query_expands_every_recognized_key() {
    let mut m = machine();
    let (status, out) = run(&mut m, r#"{"sys":""}"#);
    assert_eq!(status, Status::Ok);

    let resp = response_json(&out);
    let sys = resp["r"]["sys"].as_object().expect("expanded object");
    for key in
        ["ah", "as", "ch", "db", "eu", "hp", "jp", "lb", "lh", "lp", "mv", "om", "pc", "pi",
            "sd", "tc", "to", "tv", "v"]
    {
        assert!(sys.contains_key(key), "sys expansion missing '{}'", key);
        assert_ne!(sys[key], "", "sys field '{}' left unresolved", key);
    }
}

#[test]
fn axis_query_expands_and_resolves() {
    let mut m = machine();
    let (status, out) = run(&mut m, r#"{"x":""}"#);
    assert_eq!(status, Status::Ok);
    let resp = response_json(&out);
    let x = resp["r"]["x"].as_object().unwrap();
    assert_eq!(x["tm"], 100_000);
    assert_eq!(x["en"], true);
}

#[test]
fn field_write_then_query_round_trips() {
    let mut m = machine();
    let (status, _) = run(&mut m, r#"{"sys":{"mv":9600,"tv":0.35}}"#);
    assert_eq!(status, Status::Ok);

    let (status, out) = run(&mut m, r#"{"sys":{"mv":"","tv":""}}"#);
    assert_eq!(status, Status::Ok);
    let resp = response_json(&out);
    assert_eq!(resp["r"]["sys"]["mv"], 9600);
    assert!((resp["r"]["sys"]["tv"].as_f64().unwrap() - 0.35).abs() < 1e-6);
}

#[test]
fn pure_query_never_mutates_state() {
    let mut m = machine();
    let hash_before = m.hash();
    let v_max = m.v_max;
    let (status, _) = run(&mut m, r#"{"sys":"","x":"","mpo":""}"#);
    assert_eq!(status, Status::Ok);
    assert_eq!(m.v_max, v_max);
    assert_eq!(m.hash(), hash_before);
}

#[test]
fn flat_and_nested_forms_address_same_field() {
    let mut m = machine();
    let (status, _) = run(&mut m, r#"{"syshp":9}"#);
    assert_eq!(status, Status::Ok);
    assert_eq!(m.homing_pulses, 9);

    let (status, _) = run(&mut m, r#"{"sys":{"hp":11}}"#);
    assert_eq!(status, Status::Ok);
    assert_eq!(m.homing_pulses, 11);
}

#[test]
fn narrowing_loss_rejected_with_value_range() {
    let mut m = machine();
    // hp is a 16-bit field.
    let (status, out) = run(&mut m, r#"{"sys":{"hp":100000}}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::ValueRange));
    let resp = response_json(&out);
    assert_eq!(resp["e"], "hp");
    assert_eq!(m.homing_pulses, 3);
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

#[test]
fn move_command_reaches_target_and_reports() {
    let mut m = machine();
    let (status, out) =
        run(&mut m, r#"{"mov":{"1":6400,"2":3200,"lp":"","sg":"","ts":""}}"#);
    assert_eq!(status, Status::Ok);
    assert_eq!(m.axes[0].position, 6400);
    assert_eq!(m.axes[1].position, 3200);

    let resp = response_json(&out);
    let mov = resp["r"]["mov"].as_object().unwrap();
    assert!(mov["lp"].as_i64().unwrap() > 0);
    assert!(mov["sg"].as_i64().unwrap() > 0);
    assert!(mov["ts"].as_f64().unwrap() > 0.0);
}

#[test]
fn move_query_reports_position_without_motion() {
    let mut m = machine();
    m.axes[0].position = 1234;
    let (status, out) = run(&mut m, r#"{"mov":""}"#);
    assert_eq!(status, Status::Ok);
    let resp = response_json(&out);
    assert_eq!(resp["r"]["mov"]["1"], 1234.0);
    assert_eq!(m.axes[0].position, 1234);
}

#[test]
fn move_to_disabled_motor_is_ignored() {
    let mut m = machine();
    m.enable_axis(1, false);
    let (status, _) = run(&mut m, r#"{"mov":{"2":5000}}"#);
    assert_eq!(status, Status::Ok);
    assert_eq!(m.axes[1].position, 0);
}

#[test]
fn relative_move_requires_delta_topology() {
    let mut m = machine();
    let (status, _) = run(&mut m, r#"{"movrx":5.0}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::MtoField));
}

#[test]
fn relative_move_executes_synchronously_on_delta() {
    let mut m = machine();
    m.topology = Topology::Delta;
    m.kinematics = Box::new(SimKinematics::default());
    // One external call only: the shortcut is exempt from the
    // non-blocking contract.
    let mut dispatcher = Dispatcher::new();
    let mut cmd = Command::parse(r#"{"movrx":2.0}"#, m.ticks());
    let mut out = Vec::new();
    let status = dispatcher.process(&mut m, &mut cmd, &mut out);
    assert_eq!(status, Status::Ok);
    // 2 mm at 100 pulses/mm on arm 1.
    assert_eq!(m.axes[0].position, 200);
}

#[test]
fn move_with_broken_velocity_budget_fails_before_motion() {
    let mut m = machine();
    m.tv_max = 0.0;
    let (status, out) = run(&mut m, r#"{"mov":{"1":6400}}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::StrokeTime));
    let resp = response_json(&out);
    assert_eq!(resp["e"], "tv");
    assert_eq!(m.axes[0].position, 0);
}

// ---------------------------------------------------------------------------
// Homing and probing
// ---------------------------------------------------------------------------

#[test]
fn homing_searches_then_lands_on_home() {
    let mut m = machine();
    m.axes[0].home = 100;
    m.axes[0].position = 40;
    // Only motor 1 homes; close its switch after a few polls.
    let mut dispatcher = Dispatcher::new();
    let mut cmd = Command::parse(r#"{"hom":{"1":""}}"#, m.ticks());
    let mut out = Vec::new();
    let mut status = dispatcher.process(&mut m, &mut cmd, &mut out);
    assert_eq!(status, Status::BusyMoving);
    for _ in 0..3 {
        status = dispatcher.process(&mut m, &mut cmd, &mut out);
        assert_eq!(status, Status::BusyMoving);
    }
    assert!(m.axes[0].position < 40, "axis should be seeking downward");
    m.port.set_digital(20, true);
    while status.is_processing() {
        status = dispatcher.process(&mut m, &mut cmd, &mut out);
    }
    assert_eq!(status, Status::Ok);
    assert_eq!(m.axes[0].position, 100);
    assert!(!m.axes[0].homing);
}

#[test]
fn probe_stops_on_contact_and_echoes() {
    let mut m = machine();
    let mut dispatcher = Dispatcher::new();
    let mut cmd = Command::parse(r#"{"prb":{"pn":40,"1":20}}"#, m.ticks());
    let mut out = Vec::new();
    let mut status = dispatcher.process(&mut m, &mut cmd, &mut out);
    assert_eq!(status, Status::BusyCalibrating);
    for _ in 0..5 {
        status = dispatcher.process(&mut m, &mut cmd, &mut out);
        assert_eq!(status, Status::BusyCalibrating);
    }
    m.port.set_digital(40, true);
    status = dispatcher.process(&mut m, &mut cmd, &mut out);
    assert_eq!(status, Status::Ok);

    let resp = response_json(&String::from_utf8(out).unwrap());
    assert_eq!(resp["r"]["prb"]["1"], m.axes[0].position);
    assert!(m.axes[0].position > 0 && m.axes[0].position < 20);
}

#[test]
fn probe_without_contact_faults() {
    let mut m = machine();
    let (status, _) = run(&mut m, r#"{"prb":{"pn":40,"1":5}}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::ProbeFailed));
}

// ---------------------------------------------------------------------------
// Self-test
// ---------------------------------------------------------------------------

#[test]
fn selftest_ping_pongs_until_cancelled() {
    let mut m = machine();
    let mut dispatcher = Dispatcher::new();
    let mut cmd = Command::parse(r#"{"tst":{"ph":{"pu":500,"lp":""}}}"#, m.ticks());
    let mut out = Vec::new();
    let mut status = dispatcher.process(&mut m, &mut cmd, &mut out);
    assert_eq!(status, Status::BusyMoving);

    // Never terminates on its own: poll well past several pass durations.
    for _ in 0..2_000 {
        m.port.advance(5_000);
        status = dispatcher.process(&mut m, &mut cmd, &mut out);
        assert_eq!(status, Status::BusyMoving);
    }
    assert!(m.op.selftest.loops > 0);

    let status = dispatcher.cancel(&mut m, &mut cmd, Status::WaitCancelled, &mut out);
    assert_eq!(status, Status::WaitCancelled);
    assert!(!out.is_empty());
}

#[test]
fn selftest_step_pulses_move_motors_once() {
    let mut m = machine();
    let (status, _) = run(&mut m, r#"{"tst":{"sp":[7,-3,0,0]}}"#);
    assert_eq!(status, Status::Ok);
    assert_eq!(m.axes[0].position, 7);
    assert_eq!(m.axes[1].position, -3);
}

// ---------------------------------------------------------------------------
// Batched requests
// ---------------------------------------------------------------------------

#[test]
fn array_request_applies_elements_in_order() {
    let mut m = machine();
    let (status, out) = run(
        &mut m,
        r#"[{"sys":{"mv":4000}},{"mov":{"1":100}},{"sys":{"mv":""}}]"#,
    );
    assert_eq!(status, Status::Ok);
    assert_eq!(m.axes[0].position, 100);
    let resp = response_json(&out);
    assert_eq!(resp["r"]["sys"]["mv"], 4000);
}

#[test]
fn array_streaming_emits_one_response_per_element() {
    let mut m = machine();
    m.output_mode = OutputMode::ARRAY_STREAM;
    let (status, out) = run(&mut m, r#"[{"sysmv":1},{"sysmv":2},{"sysmv":3}]"#);
    assert_eq!(status, Status::Ok);
    assert_eq!(out.lines().count(), 3);
}

// ---------------------------------------------------------------------------
// Motor binding and positions
// ---------------------------------------------------------------------------

#[test]
fn motor_rebinding_redirects_position_reads() {
    let mut m = machine();
    m.axes[2].position = 500;
    let (status, _) = run(&mut m, r#"{"1":{"ma":2}}"#);
    assert_eq!(status, Status::Ok);

    let (status, out) = run(&mut m, r#"{"mpo":{"1":""}}"#);
    assert_eq!(status, Status::Ok);
    let resp = response_json(&out);
    assert_eq!(resp["r"]["mpo"]["1"], 500);
}

#[test]
fn delta_position_exposes_cartesian_read_only() {
    let mut m = machine();
    m.topology = Topology::Delta;
    m.kinematics = Box::new(SimKinematics::default());
    m.axes[0].position = 150;

    let (status, out) = run(&mut m, r#"{"mpo":""}"#);
    assert_eq!(status, Status::Ok);
    let resp = response_json(&out);
    assert!((resp["r"]["mpo"]["x"].as_f64().unwrap() - 1.5).abs() < 1e-6);

    let (status, _) = run(&mut m, r#"{"mpo":{"x":9.0}}"#);
    assert_eq!(status.fault_code(), Some(FaultCode::OutputField));
}

// ---------------------------------------------------------------------------
// EEPROM and I/O through the dispatcher
// ---------------------------------------------------------------------------

#[test]
fn eeprom_persists_across_commands() {
    let mut m = machine();
    let (status, _) = run(&mut m, r#"{"eep200":"saved"}"#);
    assert_eq!(status, Status::Ok);
    let (status, out) = run(&mut m, r#"{"eep200":""}"#);
    assert_eq!(status, Status::Ok);
    let resp = response_json(&out);
    assert_eq!(resp["r"]["eep200"], "saved");
}

#[test]
fn io_write_and_read_back() {
    let mut m = machine();
    let (status, _) = run(&mut m, r#"{"io":{"d7":true}}"#);
    assert_eq!(status, Status::Ok);
    let (status, out) = run(&mut m, r#"{"iod7":""}"#);
    assert_eq!(status, Status::Ok);
    let resp = response_json(&out);
    assert_eq!(resp["r"]["iod7"], true);
}
