//! Sinks that receive profiles at completion.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::profile::CommandProfile;

/// Destination for completed profiles.
///
/// [`CommandProfile::mark_completed`] invokes [`add`](ProfileCollector::add)
/// exactly once per profile, from whichever thread won the completion race.
/// Ordering among profiles pushed from different threads is the collector's
/// concern.
pub trait ProfileCollector: Send + Sync {
    /// Accepts one completed profile.
    fn add(&self, profile: Arc<CommandProfile>);
}

/// Collector that discards everything.
///
/// Useful when callers want lifecycle bookkeeping without retention.
pub struct NoopCollector;

impl ProfileCollector for NoopCollector {
    fn add(&self, _profile: Arc<CommandProfile>) {}
}

/// Session collector backed by an intrusive singly linked chain.
///
/// Pushes allocate nothing: each profile carries its own link slot, and `add`
/// threads the new arrival in at the head. [`drain`](SessionLog::drain) hands
/// the whole chain to an iterator, so profiles come back most recently
/// completed first.
pub struct SessionLog {
    chain: Mutex<Chain>,
}

struct Chain {
    head: Option<Arc<CommandProfile>>,
    len: usize,
}

impl SessionLog {
    /// Creates an empty session log.
    pub fn new() -> SessionLog {
        SessionLog {
            chain: Mutex::new(Chain { head: None, len: 0 }),
        }
    }

    /// Number of profiles currently chained.
    pub fn len(&self) -> usize {
        self.chain.lock().len
    }

    /// True when no profiles have been collected since the last drain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detaches the collected chain and returns an iterator over it.
    ///
    /// The log is immediately empty again and keeps accepting pushes while
    /// the drain is being consumed. Dropping the iterator unlinks whatever
    /// was not consumed.
    pub fn drain(&self) -> SessionDrain {
        let mut chain = self.chain.lock();
        let head = chain.head.take();
        let drained = chain.len;
        chain.len = 0;
        drop(chain);
        debug!(profiles = drained, "draining profiling session");
        SessionDrain { next: head }
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileCollector for SessionLog {
    fn add(&self, profile: Arc<CommandProfile>) {
        let mut chain = self.chain.lock();
        let previous_head = chain.head.take();
        profile.set_next_in_chain(previous_head);
        chain.head = Some(profile);
        chain.len += 1;
    }
}

impl Drop for SessionLog {
    fn drop(&mut self) {
        // Unlink any residue; a recursive Arc drop down a long chain would
        // exhaust the stack.
        let _ = self.drain();
    }
}

/// Iterator over a drained session, most recently completed first.
pub struct SessionDrain {
    next: Option<Arc<CommandProfile>>,
}

impl Iterator for SessionDrain {
    type Item = Arc<CommandProfile>;

    fn next(&mut self) -> Option<Arc<CommandProfile>> {
        let profile = self.next.take()?;
        self.next = profile.take_next_in_chain();
        Some(profile)
    }
}

impl Drop for SessionDrain {
    fn drop(&mut self) {
        while self.next().is_some() {}
    }
}
