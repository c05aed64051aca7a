use killboard::protocol::StatusChange;
use killboard::status::KillStatusAggregator;
use killboard::*;

fn change(source: KillSource, killed: bool) -> StatusChange {
    StatusChange { source, killed }
}

#[test]
fn test_starts_all_clear() {
    let aggregator = KillStatusAggregator::new();
    assert!(!aggregator.evaluate());
    assert_eq!(aggregator.snapshot(), KillStatusSnapshot::default());
    assert_eq!(aggregator.snapshot().asserted_sources().count(), 0);
}

#[test]
fn test_kill_then_release_clears_decision() {
    let mut aggregator = KillStatusAggregator::new();

    aggregator.apply(change(KillSource::PortForward, true));
    assert!(aggregator.evaluate());

    aggregator.apply(change(KillSource::PortForward, false));
    assert!(!aggregator.evaluate());
    assert!(!aggregator.snapshot().get(KillSource::PortForward));
}

#[test]
fn test_any_switch_or_remote_kills() {
    for source in KillSource::AGGREGATED {
        let mut aggregator = KillStatusAggregator::new();
        aggregator.apply(change(source, true));
        assert!(aggregator.evaluate(), "{} alone should kill", source.label());
    }
}

#[test]
fn test_overall_and_computer_do_not_kill_alone() {
    let mut aggregator = KillStatusAggregator::new();
    aggregator.apply(change(KillSource::Overall, true));
    aggregator.apply(change(KillSource::Computer, true));

    assert!(!aggregator.evaluate());
    let snapshot = aggregator.snapshot();
    assert!(snapshot.get(KillSource::Overall));
    assert!(snapshot.get(KillSource::Computer));
}

#[test]
fn test_decision_holds_until_last_source_clears() {
    let mut aggregator = KillStatusAggregator::new();
    aggregator.apply(change(KillSource::StarboardAft, true));
    aggregator.apply(change(KillSource::Remote, true));

    aggregator.apply(change(KillSource::StarboardAft, false));
    assert!(aggregator.evaluate());

    aggregator.apply(change(KillSource::Remote, false));
    assert!(!aggregator.evaluate());
}

#[test]
fn test_apply_reports_actual_changes() {
    let mut aggregator = KillStatusAggregator::new();

    assert!(aggregator.apply(change(KillSource::PortAft, true)));
    assert!(!aggregator.apply(change(KillSource::PortAft, true)));
    assert!(aggregator.apply(change(KillSource::PortAft, false)));
    assert!(!aggregator.apply(change(KillSource::Remote, false)));
    assert_eq!(aggregator.updates_applied(), 4);
}

#[test]
fn test_asserted_sources_lists_killed_flags() {
    let mut aggregator = KillStatusAggregator::new();
    aggregator.apply(change(KillSource::Overall, true));
    aggregator.apply(change(KillSource::StarboardForward, true));

    let asserted: Vec<_> = aggregator.snapshot().asserted_sources().collect();
    assert_eq!(asserted, vec![KillSource::Overall, KillSource::StarboardForward]);
}

#[test]
fn test_status_message_fields() {
    let mut aggregator = KillStatusAggregator::new();
    aggregator.apply(change(KillSource::Remote, true));
    aggregator.apply(change(KillSource::Overall, true));

    let message = KillStatusMessage::new(&aggregator.snapshot(), true, 42_000);
    assert!(message.remote);
    assert!(message.overall);
    assert!(!message.pf && !message.pa && !message.sf && !message.sa && !message.computer);
    assert!(message.killed);
    assert!(message.network_kill);
    assert_eq!(message.stamp_ms, 42_000);

    let json = serde_json::to_value(&message).unwrap();
    assert_eq!(json["remote"], true);
    assert_eq!(json["network_kill"], true);
}
