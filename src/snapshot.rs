//! Owned, serializable view of a profile for export pipelines.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::profile::CommandProfile;
use crate::types::{CommandFlags, ConnectionKind, RetransmissionReason};

/// Point-in-time copy of everything a [`CommandProfile`] exposes.
///
/// Durations are flattened to nanosecond counts (`None` where the underlying
/// milestones were never recorded), and a retransmission carries its original
/// attempt as a nested snapshot, so one JSON document captures the whole
/// redirect chain.
#[derive(Debug, Serialize)]
pub struct ProfileSnapshot {
    /// Endpoint the attempt was dispatched to.
    pub endpoint: SocketAddr,
    /// Database index, once identity is attached.
    pub db: Option<i32>,
    /// Command name, once identity is attached.
    pub command: Option<String>,
    /// Command flags (raw bits), once identity is attached.
    pub flags: Option<CommandFlags>,
    /// Wall-clock creation time in RFC 3339.
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    /// Connection the command was enqueued on.
    pub connection: Option<ConnectionKind>,
    /// Creation-to-enqueue span in nanoseconds.
    pub creation_to_enqueued_ns: Option<u64>,
    /// Enqueue-to-send span in nanoseconds.
    pub enqueued_to_sending_ns: Option<u64>,
    /// Send-to-response span in nanoseconds.
    pub sent_to_response_ns: Option<u64>,
    /// Response-to-completion span in nanoseconds.
    pub response_to_completion_ns: Option<u64>,
    /// Creation-to-completion span in nanoseconds.
    pub elapsed_ns: Option<u64>,
    /// Why this attempt was re-issued, for retransmissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retransmission_reason: Option<RetransmissionReason>,
    /// The attempt this one retries, for retransmissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retransmission_of: Option<Box<ProfileSnapshot>>,
}

fn nanos(duration: Option<Duration>) -> Option<u64> {
    duration.map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

impl ProfileSnapshot {
    /// Copies the current state of `profile`, chain included.
    pub fn of(profile: &CommandProfile) -> ProfileSnapshot {
        ProfileSnapshot {
            endpoint: profile.endpoint(),
            db: profile.db(),
            command: profile.command_name().map(str::to_owned),
            flags: profile.flags(),
            created_at: profile.created_at(),
            connection: profile.connection_kind(),
            creation_to_enqueued_ns: nanos(profile.creation_to_enqueued()),
            enqueued_to_sending_ns: nanos(profile.enqueued_to_sending()),
            sent_to_response_ns: nanos(profile.sent_to_response()),
            response_to_completion_ns: nanos(profile.response_to_completion()),
            elapsed_ns: nanos(profile.elapsed()),
            retransmission_reason: profile.retransmission_reason(),
            retransmission_of: profile
                .retransmission_of()
                .map(|original| Box::new(ProfileSnapshot::of(original))),
        }
    }
}
