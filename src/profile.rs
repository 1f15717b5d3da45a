//! The per-attempt timing record and its lifecycle transitions.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error, trace};

use crate::clock::{self, Tick};
use crate::collector::ProfileCollector;
use crate::error::{ProfileError, Result};
use crate::types::{CommandDescriptor, CommandFlags, ConnectionKind, RetransmissionReason};

/// Width of the widest summary label, `response to completion`.
const SUMMARY_LABEL_WIDTH: usize = 22;

/// Timing record for exactly one command attempt against one endpoint.
///
/// A profile is created when an attempt is dispatched, receives its identity
/// once via [`attach_command`](CommandProfile::attach_command), and is mutated
/// in place as the transport reports milestones. Every milestone write is a
/// single compare-and-set on an atomic tick field: reporters never block, the
/// first writer wins, and later writers are absorbed as no-ops. Completion
/// hands the profile to its collector exactly once; from then on the record
/// is read-only.
///
/// Profiles are always handled through `Arc`. A retransmitted attempt holds a
/// shared reference to the attempt it replaces, and collectors thread their
/// own chains through [`set_next_in_chain`](CommandProfile::set_next_in_chain)
/// without allocating list nodes.
///
/// The collector reference is non-owning: a collector owns the profiles
/// pushed to it, never the other way around, so a session holding thousands
/// of completed profiles drops cleanly. Keep the collector alive while
/// commands are in flight; a completion with no live collector is dropped.
pub struct CommandProfile {
    weak_self: Weak<CommandProfile>,
    endpoint: SocketAddr,
    collector: Weak<dyn ProfileCollector>,
    descriptor: OnceLock<CommandDescriptor>,
    enqueued: AtomicU64,
    sent: AtomicU64,
    response: AtomicU64,
    completed: AtomicU64,
    connection: AtomicU8,
    retransmission: Option<Retransmission>,
    next_in_chain: Mutex<Option<Arc<CommandProfile>>>,
}

struct Retransmission {
    original: Arc<CommandProfile>,
    reason: RetransmissionReason,
}

/// Sets `slot` to `tick` only if it still holds the unset sentinel.
fn record_once(slot: &AtomicU64, tick: Tick) -> bool {
    slot.compare_exchange(0, tick.0, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

fn load_tick(slot: &AtomicU64) -> Option<Tick> {
    match slot.load(Ordering::Acquire) {
        0 => None,
        raw => Some(Tick(raw)),
    }
}

/// Tick-difference duration, `None` until both milestones have been recorded.
///
/// Racing writers can leave a later milestone with a smaller tick than an
/// earlier one; such inverted intervals clamp to zero rather than wrap.
fn interval(start: Option<Tick>, end: Option<Tick>) -> Option<Duration> {
    let (start, end) = (start?, end?);
    Some(clock::ticks_to_duration(end.0.saturating_sub(start.0)))
}

impl CommandProfile {
    /// Creates a fresh origin (non-retry) profile bound to `collector`.
    ///
    /// The profile only weakly references the collector; the caller keeps
    /// ownership of it and must keep it alive to receive the completion.
    pub fn for_attempt(
        endpoint: SocketAddr,
        collector: Arc<dyn ProfileCollector>,
    ) -> Arc<CommandProfile> {
        Self::build(endpoint, Arc::downgrade(&collector), None)
    }

    /// Creates a profile for a retry of `original` against a new endpoint.
    ///
    /// The retry is bound to the same collector as `original`, so the whole
    /// redirect chain lands in one place. `original` itself is left untouched;
    /// it completes (or already completed) on its own schedule.
    pub fn for_retransmission(
        original: &Arc<CommandProfile>,
        endpoint: SocketAddr,
        reason: RetransmissionReason,
    ) -> Arc<CommandProfile> {
        trace!(%endpoint, %reason, "profiling retransmitted command attempt");
        Self::build(
            endpoint,
            Weak::clone(&original.collector),
            Some(Retransmission {
                original: Arc::clone(original),
                reason,
            }),
        )
    }

    fn build(
        endpoint: SocketAddr,
        collector: Weak<dyn ProfileCollector>,
        retransmission: Option<Retransmission>,
    ) -> Arc<CommandProfile> {
        // The cyclic handle lets `mark_completed` push an owned Arc to the
        // collector from a `&self` call.
        Arc::new_cyclic(|weak_self| CommandProfile {
            weak_self: Weak::clone(weak_self),
            endpoint,
            collector,
            descriptor: OnceLock::new(),
            enqueued: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            response: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            connection: AtomicU8::new(0),
            retransmission,
            next_in_chain: Mutex::new(None),
        })
    }

    /// Attaches the command identity, exactly once.
    ///
    /// A second attach is a caller bug, reported loudly: it logs at error
    /// level and returns [`ProfileError::IdentityAttached`], leaving the
    /// original identity in place.
    pub fn attach_command(&self, descriptor: CommandDescriptor) -> Result<()> {
        self.descriptor.set(descriptor).map_err(|_| {
            error!(endpoint = %self.endpoint, "command identity already attached");
            ProfileError::IdentityAttached
        })
    }

    /// Records the enqueue milestone and the connection it was queued on.
    ///
    /// The tick is first-writer-wins like every milestone; `kind` is stored
    /// unconditionally, so it stays informative even when the tick write lost
    /// a race.
    pub fn mark_enqueued(&self, kind: ConnectionKind) {
        self.mark_enqueued_at(kind, clock::now());
    }

    /// [`mark_enqueued`](Self::mark_enqueued) with an injected clock reading.
    pub fn mark_enqueued_at(&self, kind: ConnectionKind, tick: Tick) {
        record_once(&self.enqueued, tick);
        self.connection.store(kind.as_u8(), Ordering::Release);
    }

    /// Records the moment the request bytes were handed to the socket.
    pub fn mark_request_sent(&self) {
        self.mark_request_sent_at(clock::now());
    }

    /// [`mark_request_sent`](Self::mark_request_sent) with an injected reading.
    pub fn mark_request_sent_at(&self, tick: Tick) {
        record_once(&self.sent, tick);
    }

    /// Records the moment the response arrived.
    pub fn mark_response_received(&self) {
        self.mark_response_received_at(clock::now());
    }

    /// [`mark_response_received`](Self::mark_response_received) with an
    /// injected reading.
    pub fn mark_response_received_at(&self, tick: Tick) {
        record_once(&self.response, tick);
    }

    /// Records completion and, exactly once, hands the profile over.
    ///
    /// Completion can be triggered redundantly: a timeout path and an async
    /// response path may both call this. Only the caller that wins the
    /// 0-to-tick transition backfills the response tick (an abrupt completion
    /// counts as an implicit response) and pushes the profile to the bound
    /// collector; every other caller is a no-op.
    pub fn mark_completed(&self) {
        self.mark_completed_at(clock::now());
    }

    /// [`mark_completed`](Self::mark_completed) with an injected reading.
    pub fn mark_completed_at(&self, tick: Tick) {
        if record_once(&self.completed, tick) {
            record_once(&self.response, tick);
            // `weak_self` cannot be dead while a caller borrows the profile;
            // the collector can be, if its session was already torn down.
            match (self.weak_self.upgrade(), self.collector.upgrade()) {
                (Some(profile), Some(collector)) => collector.add(profile),
                _ => debug!(endpoint = %self.endpoint, "completion had no live collector"),
            }
        }
    }

    /// Endpoint this attempt was dispatched to.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// The attached identity, or `None` before [`attach_command`](Self::attach_command).
    pub fn descriptor(&self) -> Option<&CommandDescriptor> {
        self.descriptor.get()
    }

    /// Database index of the attached command.
    pub fn db(&self) -> Option<i32> {
        self.descriptor().map(|d| d.db)
    }

    /// Name of the attached command.
    pub fn command_name(&self) -> Option<&str> {
        self.descriptor().map(|d| d.name.as_str())
    }

    /// Flags of the attached command.
    pub fn flags(&self) -> Option<CommandFlags> {
        self.descriptor().map(|d| d.flags)
    }

    /// Wall-clock creation time of the attached command.
    pub fn created_at(&self) -> Option<OffsetDateTime> {
        self.descriptor().map(|d| d.created_at)
    }

    /// Monotonic creation tick of the attached command.
    pub fn created_tick(&self) -> Option<Tick> {
        self.descriptor().map(|d| d.created_tick)
    }

    /// Enqueue tick, `None` while unrecorded.
    pub fn enqueued_tick(&self) -> Option<Tick> {
        load_tick(&self.enqueued)
    }

    /// Send tick, `None` while unrecorded.
    pub fn sent_tick(&self) -> Option<Tick> {
        load_tick(&self.sent)
    }

    /// Response tick, `None` while unrecorded.
    pub fn response_tick(&self) -> Option<Tick> {
        load_tick(&self.response)
    }

    /// Completion tick, `None` while unrecorded.
    pub fn completed_tick(&self) -> Option<Tick> {
        load_tick(&self.completed)
    }

    /// Kind of connection the command was enqueued on, once known.
    pub fn connection_kind(&self) -> Option<ConnectionKind> {
        ConnectionKind::from_u8(self.connection.load(Ordering::Acquire))
    }

    /// The attempt this one retries, when this profile is a retransmission.
    pub fn retransmission_of(&self) -> Option<&Arc<CommandProfile>> {
        self.retransmission.as_ref().map(|r| &r.original)
    }

    /// Why this attempt was re-issued, when it is a retransmission.
    pub fn retransmission_reason(&self) -> Option<RetransmissionReason> {
        self.retransmission.as_ref().map(|r| r.reason)
    }

    /// Time from command creation to enqueue.
    pub fn creation_to_enqueued(&self) -> Option<Duration> {
        interval(self.created_tick(), self.enqueued_tick())
    }

    /// Time the command sat in the queue before hitting the socket.
    pub fn enqueued_to_sending(&self) -> Option<Duration> {
        interval(self.enqueued_tick(), self.sent_tick())
    }

    /// Network round trip, send to response.
    pub fn sent_to_response(&self) -> Option<Duration> {
        interval(self.sent_tick(), self.response_tick())
    }

    /// Time from response receipt to completion of processing.
    pub fn response_to_completion(&self) -> Option<Duration> {
        interval(self.response_tick(), self.completed_tick())
    }

    /// Full creation-to-completion span.
    pub fn elapsed(&self) -> Option<Duration> {
        interval(self.created_tick(), self.completed_tick())
    }

    /// Replaces the collector-owned chain link, returning the old link.
    ///
    /// This slot exists so collectors can maintain an intrusive singly linked
    /// list without allocating; `CommandProfile` itself never reads or writes
    /// it.
    pub fn set_next_in_chain(
        &self,
        next: Option<Arc<CommandProfile>>,
    ) -> Option<Arc<CommandProfile>> {
        std::mem::replace(&mut *self.next_in_chain.lock(), next)
    }

    /// Detaches and returns the collector-owned chain link.
    pub fn take_next_in_chain(&self) -> Option<Arc<CommandProfile>> {
        self.next_in_chain.lock().take()
    }

    fn write_summary(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        // Every line after the first carries its own leading newline, so the
        // block has no trailing newline and nested renderings splice cleanly.
        let pad = Indent(depth);
        write!(f, "{pad}{:<SUMMARY_LABEL_WIDTH$} = {}", "command", Cell(self.command_name()))?;
        write!(f, "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}", "db", Cell(self.db()))?;
        write!(f, "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}", "flags", Cell(self.flags()))?;
        write!(f, "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}", "endpoint", self.endpoint)?;
        write!(
            f,
            "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}",
            "connection",
            Cell(self.connection_kind())
        )?;
        write!(
            f,
            "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}",
            "created",
            Cell(self.created_at().map(Rfc))
        )?;
        write!(
            f,
            "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}",
            "creation to enqueued",
            Cell(self.creation_to_enqueued().map(Micros))
        )?;
        write!(
            f,
            "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}",
            "enqueued to sending",
            Cell(self.enqueued_to_sending().map(Micros))
        )?;
        write!(
            f,
            "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}",
            "sent to response",
            Cell(self.sent_to_response().map(Micros))
        )?;
        write!(
            f,
            "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}",
            "response to completion",
            Cell(self.response_to_completion().map(Micros))
        )?;
        write!(
            f,
            "\n{pad}{:<SUMMARY_LABEL_WIDTH$} = {}",
            "elapsed",
            Cell(self.elapsed().map(Micros))
        )?;
        if let Some(r) = &self.retransmission {
            write!(f, "\n{pad}retransmission of ({}):\n", r.reason)?;
            r.original.write_summary(f, depth + 1)?;
        }
        Ok(())
    }
}

/// Fixed multi-line summary; retransmissions render their original attempt
/// nested and indented beneath them.
impl fmt::Display for CommandProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_summary(f, 0)
    }
}

struct Indent(usize);

impl fmt::Display for Indent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.0 {
            f.write_str("  ")?;
        }
        Ok(())
    }
}

/// Renders the wrapped value, or `n/a` while it is unset.
struct Cell<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("n/a"),
        }
    }
}

struct Micros(Duration);

impl fmt::Display for Micros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}µs", self.0.as_secs_f64() * 1_000_000.0)
    }
}

struct Rfc(OffsetDateTime);

impl fmt::Display for Rfc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.format(&Rfc3339) {
            Ok(formatted) => f.write_str(&formatted),
            Err(_) => f.write_str("<unformattable>"),
        }
    }
}
