use killboard::control::ControlModeReporter;
use killboard::link::BoardLink;
use killboard::protocol::StatusChange;
use killboard::transport::simulated::AckFault;
use killboard::transport::BoardHandle;
use killboard::*;
use std::time::Duration;

const ACK_TIMEOUT: Duration = Duration::from_millis(50);

fn setup() -> (BoardLink<SimulatedBoard>, BoardHandle) {
    let (board, handle) = SimulatedBoard::new();
    (BoardLink::new(board), handle)
}

fn ignore_status(_: StatusChange) {}

#[test]
fn test_matching_ack_is_verified() {
    let (link, handle) = setup();
    let reporter = ControlModeReporter::new(true, ACK_TIMEOUT);
    reporter.set_mode(ControlMode::Autonomous);

    let ack = reporter.report_current(&link, &mut ignore_status).unwrap();
    assert_eq!(ack, Ack::Verified(0x52));
    assert_eq!(handle.written(), vec![0x42]);
    assert_eq!(handle.light(), Some(ControlMode::Autonomous));
}

#[test]
fn test_mismatched_ack_resyncs_then_recovers() {
    let (link, handle) = setup();
    let reporter = ControlModeReporter::new(true, ACK_TIMEOUT);
    reporter.set_mode(ControlMode::Autonomous);
    handle.inject_ack_fault(AckFault::Mismatch, 1);

    let result = reporter.report_current(&link, &mut ignore_status);
    match result {
        Err(ProtocolError::AckMismatch { expected, observed, .. }) => {
            assert_eq!(expected, 0x52);
            assert_eq!(observed, 0x50);
        }
        other => panic!("Expected mismatch, got {other:?}"),
    }
    assert_eq!(handle.buffer_clears(), 1);
    assert_eq!(link.stats().resyncs, 1);

    // Next cycle resends the same mode and succeeds
    let ack = reporter.report_current(&link, &mut ignore_status).unwrap();
    assert!(ack.is_verified());
    assert_eq!(handle.written(), vec![0x42, 0x42]);

    let stats = reporter.stats();
    assert_eq!(stats.reports_sent, 2);
    assert_eq!(stats.reports_failed, 1);
}

#[test]
fn test_silent_board_times_out() {
    let (link, handle) = setup();
    let reporter = ControlModeReporter::new(true, ACK_TIMEOUT);
    handle.inject_ack_fault(AckFault::Silent, 1);

    let err = reporter.report_current(&link, &mut ignore_status).unwrap_err();
    assert!(matches!(err, ProtocolError::AckTimeout { expected: 0x50, .. }));
    assert!(err.is_link_failure());
    assert_eq!(handle.buffer_clears(), 1);
}

#[test]
fn test_unverified_mode_does_not_read() {
    let (link, handle) = setup();
    let reporter = ControlModeReporter::new(false, ACK_TIMEOUT);
    reporter.set_mode(ControlMode::ManualAssisted);

    let ack = reporter.report_current(&link, &mut ignore_status).unwrap();
    assert_eq!(ack, Ack::Unverified);
    assert_eq!(handle.written(), vec![0x41]);
    // The board's ack is still waiting in the buffer
    assert_eq!(handle.pending(), 1);
}

#[test]
fn test_status_bytes_ahead_of_ack_are_applied() {
    let (link, handle) = setup();
    let reporter = ControlModeReporter::new(true, ACK_TIMEOUT);
    handle.set_kill(KillSource::Remote, true);

    let mut changes = Vec::new();
    let ack = reporter
        .report(&link, ControlMode::Idle, &mut |change| changes.push(change))
        .unwrap();

    assert_eq!(ack, Ack::Verified(0x50));
    assert_eq!(
        changes,
        vec![
            StatusChange { source: KillSource::Remote, killed: true },
            StatusChange { source: KillSource::Overall, killed: true },
        ]
    );
}

#[test]
fn test_leftover_ping_ack_is_skipped() {
    let (link, handle) = setup();
    let reporter = ControlModeReporter::new(true, ACK_TIMEOUT);

    let ping = link.request(Opcode::Ping, None, ACK_TIMEOUT, &mut ignore_status).unwrap();
    assert_eq!(ping, Ack::Unverified);
    assert_eq!(handle.pending(), 1);

    let ack = reporter.report_current(&link, &mut ignore_status).unwrap();
    assert!(ack.is_verified());
    assert_eq!(handle.pending(), 0);
    assert_eq!(handle.buffer_clears(), 0);
}

#[test]
fn test_mode_cache_keeps_latest() {
    let reporter = ControlModeReporter::new(true, ACK_TIMEOUT);
    assert_eq!(reporter.current_mode(), ControlMode::Idle);

    reporter.set_mode(ControlMode::ManualAssisted);
    reporter.set_mode(ControlMode::Autonomous);
    assert_eq!(reporter.current_mode(), ControlMode::Autonomous);
}
