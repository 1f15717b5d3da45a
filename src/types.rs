//! Identity types supplied by the command source when an attempt begins.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::Serialize;
use time::OffsetDateTime;

use crate::clock::{self, Tick};

/// Behavioral flags carried by a command, preserved for reporting.
///
/// The profiler never interprets these; they are recorded once at identity
/// attach and rendered in summaries.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize)]
pub struct CommandFlags(pub u32);

impl CommandFlags {
    /// No flags set.
    pub const NONE: CommandFlags = CommandFlags(0);
    /// Command should jump ahead of ordinary traffic.
    pub const HIGH_PRIORITY: CommandFlags = CommandFlags(1);
    /// No response is awaited; the command completes at send time.
    pub const FIRE_AND_FORGET: CommandFlags = CommandFlags(1 << 1);
    /// Redirect responses must not trigger a retransmission.
    pub const NO_REDIRECT: CommandFlags = CommandFlags(1 << 2);
    /// Transient failures must not re-issue the command.
    pub const NO_RETRY: CommandFlags = CommandFlags(1 << 3);

    const NAMES: [(CommandFlags, &'static str); 4] = [
        (CommandFlags::HIGH_PRIORITY, "HIGH_PRIORITY"),
        (CommandFlags::FIRE_AND_FORGET, "FIRE_AND_FORGET"),
        (CommandFlags::NO_REDIRECT, "NO_REDIRECT"),
        (CommandFlags::NO_RETRY, "NO_RETRY"),
    ];

    /// Returns true when no flags are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true when every flag in `other` is set in `self`.
    pub const fn contains(self, other: CommandFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both flag sets.
    pub const fn union(self, other: CommandFlags) -> CommandFlags {
        CommandFlags(self.0 | other.0)
    }
}

impl BitOr for CommandFlags {
    type Output = CommandFlags;

    fn bitor(self, rhs: CommandFlags) -> CommandFlags {
        self.union(rhs)
    }
}

impl BitOrAssign for CommandFlags {
    fn bitor_assign(&mut self, rhs: CommandFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CommandFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut remaining = self.0;
        let mut first = true;
        for (flag, name) in CommandFlags::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
                remaining &= !flag.0;
            }
        }
        if remaining != 0 {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{remaining:#x}")?;
        }
        Ok(())
    }
}

/// Kind of connection a command was enqueued on.
///
/// Discriminants start at 1 so the value can live in an atomic byte whose
/// zero state means "not recorded yet".
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Ordinary request/response connection.
    Interactive = 1,
    /// Server-push subscription connection.
    Subscription = 2,
}

impl ConnectionKind {
    pub(crate) const fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(raw: u8) -> Option<ConnectionKind> {
        match raw {
            1 => Some(ConnectionKind::Interactive),
            2 => Some(ConnectionKind::Subscription),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Interactive => write!(f, "interactive"),
            ConnectionKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// Why a command attempt was re-issued against a different endpoint.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetransmissionReason {
    /// The original endpoint redirected because slot ownership moved.
    Moved,
    /// The original endpoint issued a temporary redirect.
    Ask,
}

impl fmt::Display for RetransmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetransmissionReason::Moved => write!(f, "moved"),
            RetransmissionReason::Ask => write!(f, "ask"),
        }
    }
}

/// One-shot identity payload attached to a profile by the command source.
///
/// Fields are public so transports (and tests replaying captured timelines)
/// can construct exact descriptors; [`CommandDescriptor::new`] captures both
/// clocks at the moment the command object is created.
#[derive(Clone, Debug)]
pub struct CommandDescriptor {
    /// Database index the command targets; `-1` when not database-bound.
    pub db: i32,
    /// Command name, e.g. `GET`.
    pub name: String,
    /// Behavioral flags carried by the command.
    pub flags: CommandFlags,
    /// Wall-clock creation time.
    pub created_at: OffsetDateTime,
    /// Monotonic tick taken when the command was created.
    pub created_tick: Tick,
}

impl CommandDescriptor {
    /// Builds a descriptor stamped with the current wall clock and tick.
    pub fn new(db: i32, name: impl Into<String>, flags: CommandFlags) -> Self {
        Self {
            db,
            name: name.into(),
            flags,
            created_at: OffsetDateTime::now_utc(),
            created_tick: clock::now(),
        }
    }
}
