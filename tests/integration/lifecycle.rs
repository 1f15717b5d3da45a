//! Full command-lifecycle coverage, driven the way a transport layer would
//! drive it: identity attach, milestone recording in and out of order,
//! duration derivation, and retransmission chains landing in a session log.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;

use penumbra::{
    CommandDescriptor, CommandFlags, CommandProfile, ConnectionKind, NoopCollector, ProfileError,
    RetransmissionReason, SessionLog, Tick,
};
use proptest::prelude::*;
use time::macros::datetime;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("penumbra=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn endpoint(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().expect("endpoint")
}

fn descriptor(name: &str, created: Tick) -> CommandDescriptor {
    CommandDescriptor {
        db: 0,
        name: name.to_string(),
        flags: CommandFlags::NONE,
        created_at: datetime!(2024-06-01 12:00:00 UTC),
        created_tick: created,
    }
}

#[test]
fn full_lifecycle_reaches_the_session_log() {
    init_tracing();
    let session = Arc::new(SessionLog::new());
    let profile = CommandProfile::for_attempt(endpoint(6379), session.clone());
    profile
        .attach_command(CommandDescriptor::new(3, "SET", CommandFlags::NONE))
        .expect("fresh profile accepts identity");
    profile.mark_enqueued(ConnectionKind::Interactive);
    profile.mark_request_sent();
    profile.mark_response_received();
    profile.mark_completed();

    let drained: Vec<_> = session.drain().collect();
    assert_eq!(drained.len(), 1);
    assert!(Arc::ptr_eq(&drained[0], &profile));
    assert!(session.is_empty());

    let created = profile.created_tick().expect("created tick");
    let enqueued = profile.enqueued_tick().expect("enqueued tick");
    let sent = profile.sent_tick().expect("sent tick");
    let response = profile.response_tick().expect("response tick");
    let completed = profile.completed_tick().expect("completed tick");
    assert!(created <= enqueued);
    assert!(enqueued <= sent);
    assert!(sent <= response);
    assert!(response <= completed);
    assert!(profile.elapsed().expect("elapsed") >= Duration::ZERO);
    assert_eq!(profile.connection_kind(), Some(ConnectionKind::Interactive));
}

#[test]
fn identity_attach_is_one_shot() {
    init_tracing();
    let profile = CommandProfile::for_attempt(endpoint(6379), Arc::new(NoopCollector));
    profile
        .attach_command(descriptor("GET", Tick(1)))
        .expect("first attach succeeds");
    let err = profile
        .attach_command(descriptor("DEL", Tick(2)))
        .expect_err("second attach is a usage error");
    assert_eq!(err, ProfileError::IdentityAttached);
    assert_eq!(profile.command_name(), Some("GET"));
    assert_eq!(profile.created_tick(), Some(Tick(1)));
}

#[test]
fn reads_before_attach_are_well_defined() {
    let profile = CommandProfile::for_attempt(endpoint(6379), Arc::new(NoopCollector));
    assert_eq!(profile.db(), None);
    assert_eq!(profile.command_name(), None);
    assert_eq!(profile.flags(), None);
    assert_eq!(profile.created_at(), None);
    assert_eq!(profile.created_tick(), None);
    assert_eq!(profile.creation_to_enqueued(), None);
    assert_eq!(profile.elapsed(), None);
}

#[test]
fn injected_ticks_reproduce_exact_durations() {
    let profile = CommandProfile::for_attempt(endpoint(6379), Arc::new(NoopCollector));
    profile
        .attach_command(descriptor("GET", Tick(100)))
        .expect("attach");
    profile.mark_enqueued_at(ConnectionKind::Interactive, Tick(150));
    profile.mark_request_sent_at(Tick(200));
    profile.mark_response_received_at(Tick(400));
    profile.mark_completed_at(Tick(420));

    assert_eq!(profile.creation_to_enqueued(), Some(Duration::from_nanos(50)));
    assert_eq!(profile.enqueued_to_sending(), Some(Duration::from_nanos(50)));
    assert_eq!(profile.sent_to_response(), Some(Duration::from_nanos(200)));
    assert_eq!(profile.response_to_completion(), Some(Duration::from_nanos(20)));
    assert_eq!(profile.elapsed(), Some(Duration::from_nanos(320)));
}

#[test]
fn completion_without_response_counts_as_implicit_response() {
    let session = Arc::new(SessionLog::new());
    let profile = CommandProfile::for_attempt(endpoint(6379), session.clone());
    profile
        .attach_command(descriptor("SET", Tick(10)))
        .expect("attach");
    profile.mark_enqueued_at(ConnectionKind::Interactive, Tick(12));
    profile.mark_request_sent_at(Tick(15));
    profile.mark_completed_at(Tick(90));

    assert_eq!(profile.response_tick(), Some(Tick(90)));
    assert_eq!(profile.response_to_completion(), Some(Duration::ZERO));
    assert_eq!(profile.sent_to_response(), Some(Duration::from_nanos(75)));
    assert_eq!(session.len(), 1);
}

#[test]
fn redirect_chain_lands_both_attempts_in_one_session() {
    init_tracing();
    let session = Arc::new(SessionLog::new());

    let origin = CommandProfile::for_attempt(endpoint(7000), session.clone());
    origin
        .attach_command(descriptor("GET", Tick(100)))
        .expect("attach origin");
    origin.mark_enqueued_at(ConnectionKind::Interactive, Tick(110));
    origin.mark_request_sent_at(Tick(120));
    origin.mark_response_received_at(Tick(300));
    origin.mark_completed_at(Tick(310));

    let retry =
        CommandProfile::for_retransmission(&origin, endpoint(7001), RetransmissionReason::Moved);
    retry
        .attach_command(descriptor("GET", Tick(320)))
        .expect("attach retry");
    retry.mark_enqueued_at(ConnectionKind::Interactive, Tick(330));
    retry.mark_request_sent_at(Tick(340));
    retry.mark_response_received_at(Tick(500));
    retry.mark_completed_at(Tick(510));

    assert!(Arc::ptr_eq(retry.retransmission_of().expect("link"), &origin));
    assert_eq!(retry.retransmission_reason(), Some(RetransmissionReason::Moved));

    let drained: Vec<_> = session.drain().collect();
    assert_eq!(drained.len(), 2);
    assert!(Arc::ptr_eq(&drained[0], &retry));
    assert!(Arc::ptr_eq(&drained[1], &origin));

    let rendered = retry.to_string();
    assert!(rendered.contains("endpoint               = 127.0.0.1:7001"));
    assert!(rendered.contains("retransmission of (moved):"));
    assert!(rendered.contains("  endpoint               = 127.0.0.1:7000"));
}

#[test]
fn milestones_tolerate_being_skipped() {
    let session = Arc::new(SessionLog::new());
    let profile = CommandProfile::for_attempt(endpoint(6379), session.clone());
    profile
        .attach_command(descriptor("PING", Tick(5)))
        .expect("attach");
    // Early failure: never enqueued or sent, completion still reports once.
    profile.mark_completed_at(Tick(50));

    assert_eq!(profile.enqueued_tick(), None);
    assert_eq!(profile.sent_tick(), None);
    assert_eq!(profile.creation_to_enqueued(), None);
    assert_eq!(profile.enqueued_to_sending(), None);
    assert_eq!(profile.sent_to_response(), None);
    assert_eq!(profile.elapsed(), Some(Duration::from_nanos(45)));
    assert_eq!(session.len(), 1);
}

proptest! {
    #[test]
    fn durations_always_match_tick_differences(
        created in 1u64..1_000_000,
        queue in 0u64..1_000_000,
        send in 0u64..1_000_000,
        rtt in 0u64..1_000_000,
        settle in 0u64..1_000_000,
    ) {
        let profile = CommandProfile::for_attempt(endpoint(6379), Arc::new(NoopCollector));
        profile.attach_command(descriptor("GET", Tick(created))).expect("attach");
        let enqueued = created + queue;
        let sent = enqueued + send;
        let response = sent + rtt;
        let completed = response + settle;
        profile.mark_enqueued_at(ConnectionKind::Interactive, Tick(enqueued));
        profile.mark_request_sent_at(Tick(sent));
        profile.mark_response_received_at(Tick(response));
        profile.mark_completed_at(Tick(completed));

        prop_assert_eq!(profile.creation_to_enqueued(), Some(Duration::from_nanos(queue)));
        prop_assert_eq!(profile.enqueued_to_sending(), Some(Duration::from_nanos(send)));
        prop_assert_eq!(profile.sent_to_response(), Some(Duration::from_nanos(rtt)));
        prop_assert_eq!(profile.response_to_completion(), Some(Duration::from_nanos(settle)));
        prop_assert_eq!(profile.elapsed(), Some(Duration::from_nanos(queue + send + rtt + settle)));
    }

    #[test]
    fn repeated_milestone_writes_never_overwrite(
        first in 1u64..u64::MAX,
        second in 1u64..u64::MAX,
    ) {
        let profile = CommandProfile::for_attempt(endpoint(6379), Arc::new(NoopCollector));
        profile.mark_request_sent_at(Tick(first));
        profile.mark_request_sent_at(Tick(second));
        prop_assert_eq!(profile.sent_tick(), Some(Tick(first)));
    }
}
