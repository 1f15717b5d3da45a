//! Per-command latency profiling for networked request/response clients.
//!
//! Every outbound command attempt gets a [`CommandProfile`]: a record of
//! monotonic tick readings for the attempt's lifecycle milestones (creation,
//! enqueue, send, response, completion) plus derived elapsed-time breakdowns
//! between them. Milestone writes are lock-free and first-writer-wins, so
//! racing transport paths (a timeout firing against a late response, say)
//! settle cleanly: completion is recorded once, and the profile reaches its
//! [`ProfileCollector`] exactly once.
//!
//! Redirected commands are modeled as *retransmissions*: a new attempt that
//! keeps a shared reference to the attempt it replaces and reports into the
//! same collector, so a drained session can reconstruct full redirect chains.
//!
//! ```
//! use std::sync::Arc;
//! use penumbra::{CommandDescriptor, CommandFlags, CommandProfile, ConnectionKind, SessionLog};
//!
//! let session = Arc::new(SessionLog::new());
//! let profile = CommandProfile::for_attempt("127.0.0.1:6379".parse().unwrap(), session.clone());
//! profile.attach_command(CommandDescriptor::new(0, "GET", CommandFlags::NONE)).unwrap();
//! profile.mark_enqueued(ConnectionKind::Interactive);
//! profile.mark_request_sent();
//! profile.mark_response_received();
//! profile.mark_completed();
//!
//! let completed: Vec<_> = session.drain().collect();
//! assert_eq!(completed.len(), 1);
//! println!("{}", completed[0]);
//! ```

#![warn(missing_docs)]

pub mod clock;
pub mod collector;
pub mod error;
pub mod profile;
pub mod snapshot;
pub mod types;

pub use clock::{Tick, TICKS_PER_SECOND};
pub use collector::{NoopCollector, ProfileCollector, SessionDrain, SessionLog};
pub use error::{ProfileError, Result};
pub use profile::CommandProfile;
pub use snapshot::ProfileSnapshot;
pub use types::{CommandDescriptor, CommandFlags, ConnectionKind, RetransmissionReason};
