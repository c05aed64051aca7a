use killboard::alarm::{AlarmBridge, AlarmLatch, AlarmNames, HW_KILL_DESCRIPTION};
use killboard::*;
use tokio::sync::broadcast;

const IDENTITY: &str = "kill_interface";

fn collect(rx: &mut broadcast::Receiver<AlarmEvent>) -> Vec<AlarmEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn alarm_bridge() -> (AlarmBridge<ChannelAlarmBus>, broadcast::Receiver<AlarmEvent>) {
    let bus = ChannelAlarmBus::new(32);
    let rx = bus.subscribe();
    (AlarmBridge::new(bus, IDENTITY, &AlarmNames::default()), rx)
}

#[test]
fn test_latch_publishes_only_on_change() {
    let bus = ChannelAlarmBus::new(8);
    let mut rx = bus.subscribe();
    let latch = AlarmLatch::new("hw_kill", Some(HW_KILL_DESCRIPTION));

    assert_eq!(latch.state(), None);
    assert!(latch.set(true, &bus, IDENTITY));
    assert!(!latch.set(true, &bus, IDENTITY));
    assert!(!latch.set(true, &bus, IDENTITY));
    assert!(latch.set(false, &bus, IDENTITY));
    assert_eq!(latch.state(), Some(false));

    let events = collect(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(events[0].raised);
    assert_eq!(events[0].description.as_deref(), Some(HW_KILL_DESCRIPTION));
    assert_eq!(events[0].originator, IDENTITY);
    assert!(!events[1].raised);
    assert!(events[1].description.is_none());
}

#[test]
fn test_first_clear_is_published() {
    let (bridge, mut rx) = alarm_bridge();

    assert!(bridge.mirror_kill(false));
    assert!(!bridge.mirror_kill(false));

    let events = collect(&mut rx);
    assert_eq!(events, vec![AlarmEvent::clear("hw_kill", IDENTITY)]);
}

#[test]
fn test_foreign_raise_asserts_computer_kill() {
    let (bridge, _rx) = alarm_bridge();
    let event = AlarmEvent::raise("kill", "mission_planner");
    assert_eq!(bridge.inbound_command(&event), Some(Opcode::ComputerKillAssert));
}

#[test]
fn test_own_raise_is_ignored() {
    let (bridge, _rx) = alarm_bridge();
    let event = AlarmEvent::raise("kill", IDENTITY);
    assert_eq!(bridge.inbound_command(&event), None);
}

#[test]
fn test_clears_are_always_forwarded() {
    let (bridge, _rx) = alarm_bridge();
    assert_eq!(
        bridge.inbound_command(&AlarmEvent::clear("kill", "mission_planner")),
        Some(Opcode::ComputerKillClear)
    );
    assert_eq!(
        bridge.inbound_command(&AlarmEvent::clear("kill", IDENTITY)),
        Some(Opcode::ComputerKillClear)
    );
}

#[test]
fn test_other_alarms_are_ignored() {
    let (bridge, _rx) = alarm_bridge();
    assert_eq!(bridge.inbound_command(&AlarmEvent::raise("hw_kill", "mission_planner")), None);
    assert_eq!(bridge.inbound_command(&AlarmEvent::raise("thruster_fault", "thrusters")), None);
}

#[test]
fn test_computer_kill_reaches_board_without_loop() {
    let (board, handle) = SimulatedBoard::new();
    let bridge = KillBoardBridge::new(board, ChannelAlarmBus::new(32), &BridgeConfig::default(), 0);
    let mut rx = bridge.alarms().bus().subscribe();
    bridge.record_heartbeat(1_000);

    let sent = bridge
        .handle_alarm_event(&AlarmEvent::raise("kill", "mission_planner"))
        .unwrap();
    assert_eq!(sent, Some(Opcode::ComputerKillAssert));
    assert_eq!(handle.written(), vec![0x45]);
    assert!(handle.is_killed(KillSource::Computer));

    // The board echoes 0x1C and the overall flag; neither raises hw_kill.
    bridge.poll_cycle(1_100);
    bridge.poll_cycle(1_200);

    assert!(bridge.snapshot().get(KillSource::Computer));
    assert!(!bridge.evaluate());
    assert_eq!(bridge.alarms().hw_kill_state(), Some(false));

    let events = collect(&mut rx);
    assert!(events.iter().all(|e| !e.raised), "unexpected raise in {events:?}");
    assert!(events.iter().all(|e| e.name != "kill"));

    // Our own events fed back from the bus produce nothing.
    for event in &events {
        assert_eq!(bridge.handle_alarm_event(event).unwrap(), None);
    }
}

#[test]
fn test_hardware_kill_mirrored_once() {
    let (board, handle) = SimulatedBoard::new();
    let bridge = KillBoardBridge::new(board, ChannelAlarmBus::new(32), &BridgeConfig::default(), 0);
    let mut rx = bridge.alarms().bus().subscribe();
    bridge.record_heartbeat(1_000);

    handle.set_kill(KillSource::StarboardForward, true);
    // Status is published before the drain, so the raise shows up one cycle later.
    bridge.poll_cycle(1_100);
    bridge.poll_cycle(1_200);
    bridge.poll_cycle(1_300);

    let raises: Vec<_> = collect(&mut rx)
        .into_iter()
        .filter(|e| e.name == "hw_kill" && e.raised)
        .collect();
    assert_eq!(raises.len(), 1);
    assert_eq!(raises[0].description.as_deref(), Some(HW_KILL_DESCRIPTION));

    handle.set_kill(KillSource::StarboardForward, false);
    bridge.poll_cycle(1_400);
    bridge.poll_cycle(1_500);

    let clears: Vec<_> = collect(&mut rx)
        .into_iter()
        .filter(|e| e.name == "hw_kill")
        .collect();
    assert_eq!(clears, vec![AlarmEvent::clear("hw_kill", IDENTITY)]);
}
