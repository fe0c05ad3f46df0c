//! Modem session tests: bring-up, status refresh, data send, power

mod common;

use std::time::Duration;

use aq_node::at::CommError;
use aq_node::modem::{
    LinkState, ModemError, ModemFlags, ModemSession, ModemTiming, Peers, PowerState, Protocol,
    SendFailure,
};
use common::{MockClock, MockPins, MockSerial, PinEvent, Reply};

type TestSession = ModemSession<MockSerial, MockPins, MockClock>;

fn session(replies: impl IntoIterator<Item = Reply>) -> (TestSession, MockSerial, MockPins) {
    let serial = MockSerial::with_replies(replies);
    let pins = MockPins::default();
    let session = ModemSession::new(
        serial.clone(),
        pins.clone(),
        MockClock::default(),
        ModemTiming::DEFAULT,
    );
    (session, serial, pins)
}

fn station_up() -> Reply {
    Reply::ok(
        "AT+CIPSTA?\r\n\
         +CIPSTA:ip:\"192.168.4.2\"\r\n\
         +CIPSTA:gateway:\"192.168.4.1\"\r\n\
         +CIPSTA:netmask:\"255.255.255.0\"\r\n",
    )
}

fn two_clients() -> Reply {
    Reply::ok(
        "STATUS:3\r\n\
         +CIPSTATUS:0,\"TCP\",\"192.168.4.3\",51000,333,1\r\n\
         +CIPSTATUS:1,\"UDP\",\"10.0.0.9\",4000,5000,0\r\n",
    )
}

fn mux_on() -> Reply {
    Reply::ok("+CIPMUX:1\r\n")
}

// ---------------------------------------------------------------------------
// Bring-up
// ---------------------------------------------------------------------------

#[test]
fn test_init_succeeds_on_last_attempt() {
    let mut replies = vec![Reply::Silence; 4];
    replies.push(Reply::ok(""));
    let (session, serial, pins) = session(replies);

    assert_eq!(session.link_state(), LinkState::Uninitialized);
    session.init().unwrap();

    assert_eq!(session.link_state(), LinkState::Ready);
    assert_eq!(serial.written_text(), vec!["AT\r\n"; 5]);
    assert_eq!(pins.reset_pulses(), 1);
}

#[test]
fn test_init_fails_after_budget() {
    let (session, serial, _pins) = session(vec![Reply::Silence; 5]);

    assert_eq!(session.init(), Err(ModemError::InitFailed { attempts: 5 }));
    assert_eq!(session.link_state(), LinkState::InitFailed);
    assert_eq!(serial.written().len(), 5);
}

#[test]
fn test_init_pin_sequence() {
    let (session, _serial, pins) = session([Reply::ok("")]);
    session.init().unwrap();

    assert_eq!(
        pins.events(),
        [
            PinEvent::Enable(true),
            PinEvent::Reset(false),
            PinEvent::Reset(true),
            PinEvent::Reset(false),
        ]
    );
}

#[test]
fn test_framing_fault_retriggers_reset() {
    let (session, _serial, pins) = session([Reply::Garbled, Reply::ok("")]);

    session.init().unwrap();
    assert_eq!(pins.reset_pulses(), 2);
}

#[test]
fn test_plain_timeout_does_not_reset() {
    let (session, _serial, pins) = session([Reply::Silence, Reply::ok("")]);

    session.init().unwrap();
    assert_eq!(pins.reset_pulses(), 1);
}

#[test]
fn test_init_honours_timing_budget() {
    let serial = MockSerial::with_replies(vec![Reply::Silence; 5]);
    let timing = ModemTiming {
        init_attempts: 2,
        ..ModemTiming::DEFAULT
    };
    let session = ModemSession::new(serial.clone(), MockPins::default(), MockClock::default(), timing);

    assert_eq!(session.init(), Err(ModemError::InitFailed { attempts: 2 }));
    assert_eq!(serial.written().len(), 2);
}

#[test]
fn test_set_enabled_off_returns_to_uninitialized() {
    let (session, _serial, pins) = session([Reply::ok("")]);
    session.init().unwrap();

    session.set_enabled(false);
    assert_eq!(session.link_state(), LinkState::Uninitialized);
    assert_eq!(pins.events().last(), Some(&PinEvent::Enable(false)));
}

// ---------------------------------------------------------------------------
// Status refresh
// ---------------------------------------------------------------------------

#[test]
fn test_refresh_status_composite() {
    let (session, serial, _pins) = session([station_up(), two_clients(), mux_on()]);

    let flags = session.refresh_status().unwrap();
    assert!(flags.contains(
        ModemFlags::WIFI_CONNECTED
            | ModemFlags::SERVER_ON
            | ModemFlags::MUX_ON
            | ModemFlags::CLIENT_CONNECTED
            | ModemFlags::AS_CLIENT
    ));
    assert_eq!(
        serial.written_text(),
        ["AT+CIPSTA?\r\n", "AT+CIPSTATUS\r\n", "AT+CIPMUX?\r\n"]
    );

    let state = session.state();
    assert_eq!(state.ip.as_str(), "192.168.4.2");
    assert_eq!(state.gateway.as_str(), "192.168.4.1");
    assert_eq!(state.netmask.as_str(), "255.255.255.0");
    assert_eq!(state.clients.len(), 2);

    let first = &state.clients[0];
    assert_eq!(first.index, 0);
    assert_eq!(first.protocol, Protocol::Tcp);
    assert_eq!(first.ip.as_str(), "192.168.4.3");
    assert_eq!((first.remote_port, first.local_port), (51000, 333));
    assert!(first.passive);

    let second = &state.clients[1];
    assert_eq!(second.protocol, Protocol::Udp);
    assert!(!second.passive);
}

#[test]
fn test_unknown_protocol_kept_as_unknown() {
    let status = Reply::ok("STATUS:3\r\n+CIPSTATUS:2,\"QUIC\",\"10.0.0.1\",1,2,1\r\n");
    let (session, _serial, _pins) = session([station_up(), status, mux_on()]);

    session.refresh_status().unwrap();
    assert_eq!(session.state().clients[0].protocol, Protocol::Unknown);
}

#[test]
fn test_link_down_fallback() {
    let (session, serial, _pins) = session([station_up(), two_clients(), mux_on()]);
    session.refresh_status().unwrap();
    assert!(session.state().is_wifi_connected());

    // Station lost: unspecified address, link status 5, no clients
    serial.push_replies([
        Reply::ok("+CIPSTA:ip:\"0.0.0.0\"\r\n"),
        Reply::ok("STATUS:5\r\n"),
        Reply::ok("+CIPMUX:1\r\n"),
    ]);

    let flags = session.refresh_status().unwrap();
    assert!(!flags.contains(ModemFlags::WIFI_CONNECTED));
    assert!(!flags.contains(ModemFlags::SERVER_ON));
    assert!(!flags.contains(ModemFlags::CLIENT_CONNECTED));
    assert!(!flags.contains(ModemFlags::AS_CLIENT));

    let state = session.state();
    assert!(state.ip.is_empty());
    assert!(state.gateway.is_empty());
    assert!(state.clients.is_empty());
}

#[test]
fn test_missing_gateway_clears_wifi() {
    let (session, _serial, _pins) = session([
        Reply::ok("+CIPSTA:ip:\"192.168.4.2\"\r\n"),
        Reply::ok("STATUS:2\r\n"),
        mux_on(),
    ]);

    let flags = session.refresh_status().unwrap();
    assert!(!flags.contains(ModemFlags::WIFI_CONNECTED));
    assert!(flags.contains(ModemFlags::SERVER_ON));
    assert!(session.state().ip.is_empty());
}

#[test]
fn test_malformed_status_aborts_refresh() {
    let (session, serial, _pins) = session([station_up(), Reply::ok("STATUS:9\r\n")]);

    assert_eq!(
        session.refresh_status(),
        Err(ModemError::Malformed("AT+CIPSTATUS"))
    );
    // The mux query is never sent
    assert_eq!(serial.written().len(), 2);
    // Station data merged before the failure is kept
    assert!(session.state().is_wifi_connected());
    assert!(!session.flags().contains(ModemFlags::MUX_ON));
}

#[test]
fn test_missing_status_is_malformed() {
    let (session, _serial, _pins) = session([station_up(), Reply::ok("")]);
    assert!(matches!(
        session.refresh_status(),
        Err(ModemError::Malformed(_))
    ));
}

#[test]
fn test_device_error_aborts_refresh() {
    let (session, serial, _pins) = session([Reply::error()]);

    let err = session.refresh_status().unwrap_err();
    assert!(matches!(err, ModemError::Comm(CommError::DeviceReported(_))));
    assert_eq!(err.code(), "C02");
    assert_eq!(serial.written().len(), 1);
}

#[test]
fn test_refresh_recovers_after_late_reply() {
    let (session, serial, _pins) = session([station_up(), Reply::Silence]);
    assert!(matches!(
        session.refresh_status(),
        Err(ModemError::Comm(CommError::Timeout))
    ));

    // The timed-out status answer arrives while the link is idle
    serial.feed(b"STATUS:2\r\n\r\nOK\r\n");
    serial.push_replies([station_up(), two_clients(), mux_on()]);

    let flags = session.refresh_status().unwrap();
    assert!(flags.contains(ModemFlags::WIFI_CONNECTED | ModemFlags::CLIENT_CONNECTED));
    let state = session.state();
    assert_eq!(state.ip.as_str(), "192.168.4.2");
    assert_eq!(state.clients.len(), 2);
}

#[test]
fn test_wifi_state_query() {
    let (session, serial, _pins) = session([
        Reply::ok("+CWSTATE:2,\"home\"\r\n"),
        Reply::ok("+CWSTATE:7,\"\"\r\n"),
    ]);

    assert_eq!(session.refresh_wifi_state(), Ok(true));
    let state = session.state();
    assert_eq!(state.ssid.as_str(), "home");
    assert!(state.is_wifi_connected());

    assert_eq!(
        session.refresh_wifi_state(),
        Err(ModemError::Malformed("AT+CWSTATE?"))
    );
    assert_eq!(serial.written_text()[0], "AT+CWSTATE?\r\n");
}

// ---------------------------------------------------------------------------
// Server and data send
// ---------------------------------------------------------------------------

#[test]
fn test_start_server() {
    let (session, serial, _pins) = session([Reply::ok(""), Reply::ok("")]);

    session.start_server(333).unwrap();
    assert_eq!(
        serial.written_text(),
        ["AT+CIPMUX=1\r\n", "AT+CIPSERVER=1,333\r\n"]
    );
    let state = session.state();
    assert!(state.flags.contains(ModemFlags::MUX_ON | ModemFlags::SERVER_ON));
    assert_eq!(state.port, 333);
}

#[test]
fn test_start_server_failure_leaves_flags() {
    let (session, _serial, _pins) = session([Reply::ok(""), Reply::error()]);

    assert!(session.start_server(333).is_err());
    assert!(!session.flags().contains(ModemFlags::SERVER_ON));
}

fn sent_ok() -> Reply {
    Reply::Bytes(b"\r\nRecv 5 bytes\r\n\r\nSEND OK\r\n".to_vec())
}

#[test]
fn test_send_to_known_peers() {
    let (session, serial, _pins) = session([station_up(), two_clients(), mux_on()]);
    session.refresh_status().unwrap();
    serial.push_replies([Reply::ok(""), sent_ok(), Reply::ok(""), sent_ok()]);

    assert_eq!(session.send_to_peers(b"hello", Peers::Known), Ok(2));
    assert_eq!(
        serial.written_text()[3..],
        ["AT+CIPSEND=0,5\r\n", "hello", "AT+CIPSEND=1,5\r\n", "hello"]
    );
}

#[test]
fn test_send_stops_at_first_failure() {
    let (session, serial, _pins) = session([station_up(), two_clients(), mux_on()]);
    session.refresh_status().unwrap();
    serial.push_replies([Reply::error()]);

    let failure: SendFailure = session.send_to_peers(b"hello", Peers::Known).unwrap_err();
    assert_eq!(failure.unreached, 2);
    assert!(matches!(
        failure.cause,
        ModemError::Comm(CommError::DeviceReported(_))
    ));
    // Nothing after the failing length prefix
    assert_eq!(serial.written().len(), 4);
}

#[test]
fn test_send_counts_unreached_after_partial_success() {
    let (session, serial, _pins) = session([station_up(), two_clients(), mux_on()]);
    session.refresh_status().unwrap();
    serial.push_replies([Reply::ok(""), sent_ok(), Reply::ok(""), Reply::Silence]);

    let failure = session.send_to_peers(b"hello", Peers::Known).unwrap_err();
    assert_eq!(failure.unreached, 1);
    assert_eq!(failure.cause, ModemError::Comm(CommError::Timeout));
}

#[test]
fn test_send_empty_payload_is_noop() {
    let (session, serial, _pins) = session([]);
    assert_eq!(session.send_to_peers(b"", Peers::Default), Ok(0));
    assert!(serial.written().is_empty());
}

#[test]
fn test_send_default_peer_without_mux() {
    let (session, serial, _pins) = session([Reply::ok(""), sent_ok()]);

    assert_eq!(session.send_to_peers(b"hello", Peers::Default), Ok(1));
    assert_eq!(serial.written_text(), ["AT+CIPSEND=5\r\n", "hello"]);
}

#[test]
fn test_send_known_without_clients_sends_nothing() {
    let (session, serial, _pins) = session([]);
    assert_eq!(session.send_to_peers(b"hello", Peers::Known), Ok(0));
    assert!(serial.written().is_empty());
}

// ---------------------------------------------------------------------------
// Power
// ---------------------------------------------------------------------------

#[test]
fn test_power_commands_record_state() {
    let (session, serial, _pins) = session([Reply::ok(""), Reply::ok(""), Reply::error()]);

    session.sleep().unwrap();
    assert_eq!(session.state().power, PowerState::Sleep);

    session.deep_sleep(Duration::from_secs(2)).unwrap();
    assert_eq!(session.state().power, PowerState::DeepSleep);

    assert!(session.wake().is_err());
    assert_eq!(session.state().power, PowerState::DeepSleep);

    assert_eq!(
        serial.written_text(),
        ["AT+SLEEP=1\r\n", "AT+GSLP=2000\r\n", "AT+SLEEP=0\r\n"]
    );
}

#[test]
fn test_raw_command_passthrough() {
    let (session, serial, _pins) = session([Reply::ok("AT version:2.2.0.0")]);

    let text = session.command("AT+GMR").unwrap();
    assert!(text.as_str().starts_with("AT version:2.2.0.0"));
    assert_eq!(serial.written_text(), ["AT+GMR\r\n"]);
}
