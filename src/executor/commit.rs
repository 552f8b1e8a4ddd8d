use crate::executor::Session;
use crate::protocol::Operation;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Commit is a committed operation handed to a state machine handler, bound to the session that
/// submitted it.
///
/// Every commit holds a reference to its log entry. The entry (and everything before it) can only
/// be compacted away once every reference has been disposed and at least one of them was
/// `clean()`ed. A handler that needs the entry to rebuild its state keeps the Commit (or an
/// `acquire()`d copy) and cleans it once a later commit supersedes it.
///
/// Dropping a Commit without disposing of it is the same as `close()`: the entry is retained.
pub struct Commit {
    index: u64,
    timestamp: u64,
    session: Session,
    operation: Operation,
    // None for queries, which are never logged.
    token: Option<DisposalToken>,
}

impl Commit {
    pub(crate) fn new(
        index: u64,
        timestamp: u64,
        session: Session,
        operation: Operation,
        token: Option<DisposalToken>,
    ) -> Self {
        Commit {
            index,
            timestamp,
            session,
            operation,
            token,
        }
    }

    /// Log index of the entry. For queries, the index of the last applied entry.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Deterministic time at which the leader logged the entry, in milliseconds since the epoch.
    pub fn time(&self) -> u64 {
        self.timestamp
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn op_type(&self) -> &str {
        &self.operation.op_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.operation.payload
    }

    /// Returns another reference to the same entry. Each reference must be disposed of separately.
    pub fn acquire(&self) -> Commit {
        Commit {
            index: self.index,
            timestamp: self.timestamp,
            session: self.session.clone(),
            operation: self.operation.clone(),
            token: self.token.as_ref().map(DisposalToken::acquire),
        }
    }

    /// Releases this reference and marks the entry as safe to compact.
    pub fn clean(mut self) {
        if let Some(token) = self.token.take() {
            token.clean();
        }
    }

    /// Releases this reference. The entry is retained until some reference to it is cleaned.
    pub fn close(mut self) {
        if let Some(token) = self.token.take() {
            token.close();
        }
    }
}

impl fmt::Debug for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commit")
            .field("index", &self.index)
            .field("session", &self.session.id())
            .field("op_type", &self.operation.op_type)
            .finish()
    }
}

#[derive(Default, Debug)]
struct References {
    open: usize,
    cleaned: bool,
}

/// CommitTracker counts open references to applied entries. It's the source of the local
/// compaction low-water mark.
#[derive(Clone, Default)]
pub(crate) struct CommitTracker {
    // Only entries that still block compaction are present. An entry leaves the map once it is
    // cleaned and has no open references.
    references: Arc<Mutex<BTreeMap<u64, References>>>,
}

impl CommitTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, References>> {
        self.references.lock().expect("CommitTracker mutex guard poison")
    }

    /// Opens a reference to the entry at `index`.
    pub(crate) fn hold(&self, index: u64) -> DisposalToken {
        self.lock().entry(index).or_default().open += 1;

        DisposalToken {
            index,
            tracker: self.clone(),
            disposed: false,
        }
    }

    fn release(&self, index: u64, clean: bool) {
        let mut references = self.lock();
        let remove = match references.get_mut(&index) {
            Some(entry) => {
                entry.open = entry.open.saturating_sub(1);
                entry.cleaned |= clean;
                entry.open == 0 && entry.cleaned
            }
            None => false,
        };
        if remove {
            references.remove(&index);
        }
    }

    /// Highest index at or below `last_applied` such that it and every index before it can be
    /// compacted.
    pub(crate) fn low_water_mark(&self, last_applied: u64) -> u64 {
        match self.lock().keys().next() {
            Some(lowest_retained) => (lowest_retained - 1).min(last_applied),
            None => last_applied,
        }
    }

    pub(crate) fn num_retained(&self) -> usize {
        self.lock().len()
    }
}

/// DisposalToken is one open reference to an applied entry. Dropping it without calling `clean()`
/// closes it.
pub(crate) struct DisposalToken {
    index: u64,
    tracker: CommitTracker,
    disposed: bool,
}

impl DisposalToken {
    pub(crate) fn index(&self) -> u64 {
        self.index
    }

    pub(crate) fn acquire(&self) -> DisposalToken {
        self.tracker.hold(self.index)
    }

    pub(crate) fn clean(mut self) {
        self.dispose(true);
    }

    pub(crate) fn close(mut self) {
        self.dispose(false);
    }

    fn dispose(&mut self, clean: bool) {
        if !self.disposed {
            self.disposed = true;
            self.tracker.release(self.index, clean);
        }
    }
}

impl Drop for DisposalToken {
    fn drop(&mut self) {
        self.dispose(false);
    }
}

impl fmt::Debug for DisposalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisposalToken({})", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_follows_applied_index() {
        let tracker = CommitTracker::new();
        assert_eq!(tracker.low_water_mark(0), 0);
        assert_eq!(tracker.low_water_mark(42), 42);
    }

    #[test]
    fn clean_releases_and_close_retains() {
        let tracker = CommitTracker::new();
        let first = tracker.hold(3);
        let second = tracker.hold(5);
        assert_eq!(tracker.low_water_mark(10), 2);

        first.clean();
        assert_eq!(tracker.low_water_mark(10), 4);

        // Closed without cleaning, so the entry stays retained.
        second.close();
        assert_eq!(tracker.low_water_mark(10), 4);
        assert_eq!(tracker.num_retained(), 1);
    }

    #[test]
    fn acquired_references_must_all_be_released() {
        let tracker = CommitTracker::new();
        let original = tracker.hold(7);
        let copy = original.acquire();

        original.clean();
        assert_eq!(tracker.low_water_mark(9), 6);

        copy.close();
        assert_eq!(tracker.low_water_mark(9), 9);
    }

    #[test]
    fn drop_counts_as_close() {
        let tracker = CommitTracker::new();
        {
            let _token = tracker.hold(2);
        }
        assert_eq!(tracker.low_water_mark(5), 1);
    }

    #[test]
    fn low_water_never_passes_applied_index() {
        let tracker = CommitTracker::new();
        let _token = tracker.hold(100);
        assert_eq!(tracker.low_water_mark(20), 20);
    }
}
