//! Transition tables and failover scenarios of the node state machine

mod common;

use std::time::Duration;
use test_case::test_case;

use common::*;
use warden_core::failover::{FailoverState, NodeEvent};
use warden_core::HaRole;

use FailoverState::*;
use NodeEvent::*;

fn step(active: bool, from: FailoverState, event: NodeEvent) -> (FailoverState, Vec<Call>) {
    let mut fixture = MachineFixture::new(active, consensus_config(false));
    let mut machine = fixture.machine_in(PAYLOAD, from);

    fixture.with_ctx(|ctx| machine.handle(event, ctx));

    // Every decided transition is checkpointed, and nothing else is
    let checkpoints: Vec<Call> = fixture
        .calls
        .calls()
        .into_iter()
        .filter(|call| !call.is_action())
        .collect();
    if machine.state() == from {
        assert!(checkpoints.is_empty(), "unexpected checkpoint {checkpoints:?}");
    } else {
        assert_eq!(checkpoints, vec![Call::Checkpoint(PAYLOAD, machine.state())]);
    }

    (machine.state(), fixture.calls.actions())
}

#[test_case(Start, TimerExpired => (Start, vec![]) ; "start timer")]
#[test_case(Lost, TimerExpired => (Failed, vec![Call::FailOver(PAYLOAD)]) ; "lost timer")]
#[test_case(LostFound, TimerExpired => (LostRebooting, vec![Call::ResetSequence(PAYLOAD), Call::RebootOrder(PAYLOAD)]) ; "lost found timer")]
#[test_case(LostRebooting, TimerExpired => (End, vec![Call::FailOver(PAYLOAD)]) ; "lost rebooting timer")]
#[test_case(Failed, TimerExpired => (Failed, vec![]) ; "failed timer")]
#[test_case(FailedFound, TimerExpired => (End, vec![Call::RebootOrder(PAYLOAD)]) ; "failed found timer")]
#[test_case(Start, MdsUp => (Start, vec![]) ; "start mds up")]
#[test_case(Lost, MdsUp => (LostFound, vec![]) ; "lost mds up")]
#[test_case(LostFound, MdsUp => (LostFound, vec![]) ; "lost found mds up")]
#[test_case(LostRebooting, MdsUp => (LostRebooting, vec![]) ; "lost rebooting mds up")]
#[test_case(Failed, MdsUp => (FailedFound, vec![]) ; "failed mds up")]
#[test_case(FailedFound, MdsUp => (FailedFound, vec![]) ; "failed found mds up")]
#[test_case(Start, MdsDown => (Lost, vec![]) ; "start mds down")]
#[test_case(Lost, MdsDown => (Lost, vec![]) ; "lost mds down")]
#[test_case(LostFound, MdsDown => (LostFound, vec![]) ; "lost found mds down")]
#[test_case(LostRebooting, MdsDown => (End, vec![Call::FailOver(PAYLOAD)]) ; "lost rebooting mds down")]
#[test_case(Failed, MdsDown => (Failed, vec![]) ; "failed mds down")]
#[test_case(FailedFound, MdsDown => (FailedFound, vec![]) ; "failed found mds down")]
#[test_case(Start, NodeUp => (Start, vec![]) ; "start node up")]
#[test_case(Lost, NodeUp => (Lost, vec![]) ; "lost node up")]
#[test_case(LostFound, NodeUp => (End, vec![Call::FailOver(PAYLOAD), Call::MarkMember(PAYLOAD)]) ; "lost found node up")]
#[test_case(LostRebooting, NodeUp => (LostRebooting, vec![]) ; "lost rebooting node up")]
#[test_case(Failed, NodeUp => (FailedFound, vec![]) ; "failed node up")]
#[test_case(FailedFound, NodeUp => (End, vec![]) ; "failed found node up")]
fn active_transition(from: FailoverState, event: NodeEvent) -> (FailoverState, Vec<Call>) {
    step(true, from, event)
}

#[test_case(Start, TimerExpired => Start ; "start timer")]
#[test_case(Lost, TimerExpired => Lost ; "lost timer")]
#[test_case(LostFound, TimerExpired => LostFound ; "lost found timer")]
#[test_case(LostRebooting, TimerExpired => LostRebooting ; "lost rebooting timer")]
#[test_case(Failed, TimerExpired => Failed ; "failed timer")]
#[test_case(FailedFound, TimerExpired => FailedFound ; "failed found timer")]
#[test_case(Start, MdsUp => Start ; "start mds up")]
#[test_case(Lost, MdsUp => LostFound ; "lost mds up")]
#[test_case(LostFound, MdsUp => LostFound ; "lost found mds up")]
#[test_case(LostRebooting, MdsUp => LostRebooting ; "lost rebooting mds up")]
#[test_case(Failed, MdsUp => FailedFound ; "failed mds up")]
#[test_case(FailedFound, MdsUp => FailedFound ; "failed found mds up")]
#[test_case(Start, MdsDown => Lost ; "start mds down")]
#[test_case(Lost, MdsDown => Lost ; "lost mds down")]
#[test_case(LostFound, MdsDown => LostFound ; "lost found mds down")]
#[test_case(LostRebooting, MdsDown => LostRebooting ; "lost rebooting mds down")]
#[test_case(Failed, MdsDown => Failed ; "failed mds down")]
#[test_case(FailedFound, MdsDown => FailedFound ; "failed found mds down")]
#[test_case(Start, NodeUp => Start ; "start node up")]
#[test_case(Lost, NodeUp => Lost ; "lost node up")]
#[test_case(LostFound, NodeUp => LostFound ; "lost found node up")]
#[test_case(LostRebooting, NodeUp => LostRebooting ; "lost rebooting node up")]
#[test_case(Failed, NodeUp => FailedFound ; "failed node up")]
#[test_case(FailedFound, NodeUp => End ; "failed found node up")]
fn standby_transition(from: FailoverState, event: NodeEvent) -> FailoverState {
    let (next, actions) = step(false, from, event);
    assert!(actions.is_empty(), "standby acted: {actions:?}");
    next
}

#[test_case(TimerExpired => panics "after reaching End" ; "timer")]
#[test_case(MdsUp => panics "after reaching End" ; "mds up")]
#[test_case(MdsDown => panics "after reaching End" ; "mds down")]
#[test_case(NodeUp => panics "after reaching End" ; "node up")]
fn end_state_rejects(event: NodeEvent) {
    let mut fixture = MachineFixture::active();
    let mut machine = fixture.machine_in(PAYLOAD, End);
    fixture.with_ctx(|ctx| machine.handle(event, ctx));
}

#[test]
fn test_entry_timers_match_state() {
    for active in [true, false] {
        for state in FailoverState::ALL {
            let mut fixture = MachineFixture::new(active, consensus_config(false));
            let machine = fixture.machine_in(PAYLOAD, state);

            let expected = match state {
                Lost => Some(FAILOVER_DELAY),
                LostFound | LostRebooting | FailedFound => Some(NODE_WAIT),
                Start | Failed | End => None,
            };
            assert_eq!(fixture.armed_for(&machine), expected, "state {state}");
            assert_eq!(fixture.timers.len(), usize::from(expected.is_some()));
        }
    }
}

#[test]
fn test_standby_rearms_lost_timer_on_expiry() {
    let mut fixture = MachineFixture::standby();
    let mut machine = fixture.machine_in(PAYLOAD, Lost);

    fixture.clock.advance(FAILOVER_DELAY);
    fixture.with_ctx(|ctx| machine.timer_expired(ctx));

    assert_eq!(machine.state(), Lost);
    assert_eq!(fixture.armed_for(&machine), Some(FAILOVER_DELAY));
    assert_eq!(fixture.timers.len(), 1);
}

#[test]
fn test_peer_director_gets_twice_takeover_valid_time() {
    let mut fixture = MachineFixture::active();
    let mut machine = fixture.machine_in(PEER_DIRECTOR, Start);

    fixture.with_ctx(|ctx| machine.mds_down(ctx));

    assert_eq!(machine.state(), Lost);
    assert_eq!(fixture.armed_for(&machine), Some(TAKEOVER_VALID_TIME * 2));
}

#[test]
fn test_remote_fencing_fails_over_immediately() {
    let mut consensus = consensus_config(true);
    consensus.remote_fencing = true;
    let mut fixture = MachineFixture::new(true, consensus);
    let mut machine = fixture.machine_in(PAYLOAD, Start);

    fixture.with_ctx(|ctx| machine.mds_down(ctx));

    assert_eq!(machine.state(), End);
    assert!(!machine.timer().is_active());
    assert_eq!(
        fixture.calls.calls(),
        vec![
            Call::Fence(PAYLOAD, "Fencing remote node".to_string()),
            Call::FailOver(PAYLOAD),
            Call::Checkpoint(PAYLOAD, End),
        ]
    );
}

#[test]
fn test_remote_fencing_ignored_on_standby() {
    let mut consensus = consensus_config(true);
    consensus.remote_fencing = true;
    let mut fixture = MachineFixture::new(false, consensus);
    let mut machine = fixture.machine_in(PAYLOAD, Start);

    fixture.with_ctx(|ctx| machine.mds_down(ctx));

    assert_eq!(machine.state(), Lost);
    assert!(fixture.calls.actions().is_empty());
}

#[test]
fn test_checkpoint_replay_takes_no_action() {
    for state in FailoverState::ALL {
        let mut fixture = MachineFixture::standby();
        let mut machine = fixture.machine_in(PAYLOAD, Lost);

        for _ in 0..2 {
            let result = fixture.with_ctx(|ctx| machine.apply_checkpoint(state.as_u32(), ctx));
            assert!(result.is_ok());
        }

        assert_eq!(machine.state(), state);
        assert!(fixture.calls.calls().is_empty(), "state {state}");
    }
}

// Scenario: a node drops out and never returns
#[test]
fn test_lost_node_is_failed_over_after_delay() {
    let mut fixture = DirectorFixture::active();

    fixture.director.mds_down(PAYLOAD);
    assert_eq!(fixture.director.state_of(PAYLOAD), Some(Lost));

    assert_eq!(fixture.elapse(FAILOVER_DELAY - Duration::from_millis(1)), 0);
    assert!(fixture.calls.actions().is_empty());

    assert_eq!(fixture.elapse(Duration::from_millis(1)), 1);
    assert_eq!(fixture.director.state_of(PAYLOAD), Some(Failed));
    assert_eq!(fixture.calls.actions(), vec![Call::FailOver(PAYLOAD)]);
    assert!(fixture.director.timers().is_empty());
}

// Scenario: a node reappears before the failover delay ran out and then
// reports itself up
#[test]
fn test_reappearing_node_rejoins_after_failover() {
    let mut fixture = DirectorFixture::active();

    fixture.director.mds_down(PAYLOAD);
    fixture.clock.advance(Duration::from_secs(3));
    fixture.director.mds_up(PAYLOAD);
    assert_eq!(fixture.director.state_of(PAYLOAD), Some(LostFound));

    fixture.director.node_up(PAYLOAD);

    assert_eq!(fixture.director.state_of(PAYLOAD), None);
    assert_eq!(
        fixture.calls.actions(),
        vec![Call::FailOver(PAYLOAD), Call::MarkMember(PAYLOAD)]
    );
    // The lost timer was cancelled, so nothing fires later
    assert_eq!(fixture.elapse(Duration::from_secs(60)), 0);
}

// Scenario: a reappeared node stays silent and is rebooted, then goes down
#[test]
fn test_silent_node_is_rebooted_then_failed_over() {
    let mut fixture = DirectorFixture::active();

    fixture.director.mds_down(PAYLOAD);
    fixture.director.mds_up(PAYLOAD);
    assert_eq!(fixture.elapse(NODE_WAIT), 1);
    assert_eq!(fixture.director.state_of(PAYLOAD), Some(LostRebooting));

    fixture.director.mds_down(PAYLOAD);

    assert_eq!(fixture.director.state_of(PAYLOAD), None);
    assert_eq!(
        fixture.calls.actions(),
        vec![
            Call::ResetSequence(PAYLOAD),
            Call::RebootOrder(PAYLOAD),
            Call::FailOver(PAYLOAD),
        ]
    );
}

// Scenario: the standby mirrors the active director and takes over mid-failover
#[test]
fn test_standby_takes_over_in_progress_failover() {
    let mut fixture = DirectorFixture::new(HaRole::Standby, consensus_config(false));

    fixture.director.mds_down(PAYLOAD);
    fixture.director.apply_checkpoint(PAYLOAD, Lost.as_u32()).unwrap();

    // Standby timers only re-arm
    assert_eq!(fixture.elapse(FAILOVER_DELAY), 1);
    assert_eq!(fixture.director.state_of(PAYLOAD), Some(Lost));
    assert!(fixture.calls.actions().is_empty());

    fixture.director.set_ha_role(HaRole::Active);
    assert_eq!(fixture.elapse(FAILOVER_DELAY), 1);

    assert_eq!(fixture.director.state_of(PAYLOAD), Some(Failed));
    assert_eq!(fixture.calls.actions(), vec![Call::FailOver(PAYLOAD)]);
}

#[test]
fn test_cold_sync_replaces_tracked_nodes() {
    let mut fixture = DirectorFixture::new(HaRole::Standby, consensus_config(false));
    let other = warden_core::NodeId(0x2040f);

    fixture.director.mds_down(other);
    fixture
        .director
        .apply_checkpoint_snapshot(&[(PAYLOAD, Failed.as_u32())])
        .unwrap();

    assert_eq!(fixture.director.state_of(other), None);
    assert_eq!(fixture.director.state_of(PAYLOAD), Some(Failed));
    assert!(fixture.director.timers().is_empty());
    assert_eq!(
        fixture.director.checkpoint_snapshot(),
        vec![(PAYLOAD, Failed.as_u32())]
    );
}

#[test]
fn test_node_up_without_failover_is_ignored() {
    let mut fixture = DirectorFixture::active();
    fixture.director.node_up(PAYLOAD);

    assert!(fixture.director.failover_list().is_empty());
    assert!(fixture.calls.calls().is_empty());
}
