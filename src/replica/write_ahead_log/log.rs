use crate::commitlog;
use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::write_ahead_log::LogEntry;
use std::io;

/// WriteAheadLog is the raft-specific log facade.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - written to disk, not yet replicated to majority
/// 2. Committed - written to disk, replicated to majority
/// 3. Applied - a committed entry that has also been applied to the state machine
///
/// A log entry's state has no global truth. Each replica will have their own local view of what
/// state the log entry is in. Applying is tracked by the executor, not here.
///
/// A prefix of the log may be compacted. The last compacted entry's term and index are kept as
/// the log's base, so the log-matching check still works right after it.
pub(in super::super) struct WriteAheadLog<L>
where
    L: commitlog::Log<LogEntry>,
{
    // Application's info/debug log.
    logger: slog::Logger,

    // This is the log that we're replicating.
    log: L,
    // Metadata about the highest log entry that we've locally written (or the base, if everything
    // written has been compacted). It must be updated atomically.
    latest_entry_metadata: Option<(Term, Index)>,
    // Term and index of the last compacted entry. None if nothing is compacted.
    base: Option<(Term, Index)>,

    // Index of highest log entry known to be committed. None if nothing is committed.
    commit_index: Option<Index>,
}

impl<L> WriteAheadLog<L>
where
    L: commitlog::Log<LogEntry>,
{
    pub(in super::super) fn new(logger: slog::Logger, log: L) -> Result<Self, io::Error> {
        let latest_entry_metadata = match log.last_index() {
            Some(index) => log.read(index)?.map(|entry| (entry.term, index)),
            None => None,
        };

        Ok(WriteAheadLog {
            logger,
            log,
            latest_entry_metadata,
            base: None,
            commit_index: None,
        })
    }

    pub(crate) fn latest_entry(&self) -> Option<(Term, Index)> {
        self.latest_entry_metadata
    }

    pub(crate) fn last_index(&self) -> u64 {
        commitlog::index_as_u64(self.latest_entry_metadata.map(|(_, index)| index))
    }

    pub(crate) fn last_term(&self) -> Term {
        self.latest_entry_metadata
            .map(|(term, _)| term)
            .unwrap_or_else(|| Term::new(0))
    }

    pub(crate) fn base_index(&self) -> u64 {
        commitlog::index_as_u64(self.base.map(|(_, index)| index))
    }

    /// Lowest index that can still be read.
    pub(crate) fn first_index(&self) -> u64 {
        self.base_index() + 1
    }

    pub(crate) fn read(&self, index: Index) -> Result<Option<LogEntry>, io::Error> {
        self.log.read(index)
    }

    pub(crate) fn read_required(&self, index: u64) -> Result<LogEntry, io::Error> {
        let found = match Index::from_u64(index) {
            Some(index) => self.read(index)?,
            None => None,
        };
        found.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No log entry at index {} (first index is {})", index, self.first_index()),
            )
        })
    }

    /// Reads up to `max` consecutive entries starting at `from`.
    pub(crate) fn read_from(&self, from: u64, max: usize) -> Result<Vec<LogEntry>, io::Error> {
        let last = self.last_index();
        let mut entries = Vec::new();
        let mut index = from.max(self.first_index());
        while index <= last && entries.len() < max {
            entries.push(self.read_required(index)?);
            index += 1;
        }
        Ok(entries)
    }

    /// Term of the entry at `index`. Index 0 has term 0. None if the entry doesn't exist locally,
    /// including entries compacted away before the base.
    pub(crate) fn term_at(&self, index: u64) -> Result<Option<Term>, io::Error> {
        if index == 0 {
            return Ok(Some(Term::new(0)));
        }
        if let Some((base_term, base_index)) = self.base {
            if index == base_index.as_u64() {
                return Ok(Some(base_term));
            }
            if index < base_index.as_u64() {
                return Ok(None);
            }
        }
        match Index::from_u64(index) {
            Some(index) => Ok(self.read(index)?.map(|entry| entry.term)),
            None => Ok(None),
        }
    }

    /// Remove anything starting at `index` and later. Committed entries are never removed.
    pub(crate) fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        if matches!(self.commit_index, Some(ci) if index <= ci) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Refusing to truncate committed entries. Truncate from {:?}, commit index {:?}",
                    index, self.commit_index
                ),
            ));
        }

        let new_latest_index = index.as_u64() - 1;
        let new_latest_entry_metadata = match self.term_at(new_latest_index)? {
            Some(term) => Index::from_u64(new_latest_index).map(|i| (term, i)),
            None => None,
        };

        // Only update log after we've successfully read what new state will be.
        self.log.truncate(index);

        self.latest_entry_metadata = new_latest_entry_metadata;
        Ok(())
    }

    pub(crate) fn append(&mut self, entry: LogEntry) -> Result<Index, io::Error> {
        let appended_term = entry.term;
        let appended_index = self.log.append(entry)?;
        // Only update state after log action completes.
        self.latest_entry_metadata = Some((appended_term, appended_index));

        Ok(appended_index)
    }

    pub(crate) fn flush(&mut self) -> Result<(), io::Error> {
        self.log.flush()
    }

    /// Discards the prefix up to and including `index`. Never compacts past the commit index.
    pub(crate) fn compact(&mut self, index: u64) -> Result<(), io::Error> {
        let index = index.min(self.commit_index_u64());
        if index <= self.base_index() {
            return Ok(());
        }

        let term = match self.term_at(index)? {
            Some(term) => term,
            None => return Ok(()),
        };
        let index = Index::new(index);
        self.log.compact(index)?;
        self.base = Some((term, index));

        slog::debug!(self.logger, "Compacted log up to {:?}", index);
        Ok(())
    }

    /// Replaces the whole log with a base received from the leader. Used when our log ends before
    /// the leader's compaction point, so no entry we hold can still be needed.
    pub(crate) fn reset_to_base(&mut self, term: Term, index: u64) -> Result<(), io::Error> {
        let index = match Index::from_u64(index) {
            Some(index) => index,
            None => return Ok(()),
        };

        self.log.truncate(Index::new(self.first_index()));
        self.log.compact(index)?;
        self.base = Some((term, index));
        self.latest_entry_metadata = Some((term, index));
        if self.commit_index.map_or(true, |ci| ci < index) {
            self.commit_index = Some(index);
        }

        slog::info!(self.logger, "Adopted log base {:?} at term {:?}", index, term);
        Ok(())
    }

    pub(crate) fn commit_index(&self) -> Option<Index> {
        self.commit_index
    }

    pub(crate) fn commit_index_u64(&self) -> u64 {
        commitlog::index_as_u64(self.commit_index)
    }

    /// Leader's commit rule. Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
    ) -> Result<bool, io::Error> {
        if matches!(self.commit_index, Some(ci) if tentative_new_commit_index <= ci) {
            return Ok(false);
        }

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        match self.term_at(tentative_new_commit_index.as_u64())? {
            Some(term) if term == current_term => Ok(self.ratchet_fwd_commit_index(tentative_new_commit_index)),
            _ => Ok(false),
        }
    }

    /// Follower's commit rule: trusts the leader, but never past what we hold locally. Returns true
    /// if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_changed(&mut self, new_commit_index: Index) -> bool {
        self.ratchet_fwd_commit_index(new_commit_index)
    }

    fn ratchet_fwd_commit_index(&mut self, new_commit_index: Index) -> bool {
        let latest_locally_written_index = match self.latest_entry_metadata {
            Some((_, index)) => index,
            None => return false,
        };
        let new_commit_index = new_commit_index.min(latest_locally_written_index);

        if matches!(self.commit_index, Some(ci) if new_commit_index <= ci) {
            return false;
        }

        self.commit_index.replace(new_commit_index);
        true
    }

    /// (index, term) of every committed entry still in the log.
    pub(crate) fn committed_digest(&self) -> Result<Vec<(u64, u64)>, io::Error> {
        let mut digest = Vec::new();
        for index in self.first_index()..=self.commit_index_u64() {
            digest.push((index, self.read_required(index)?.term.as_u64()));
        }
        Ok(digest)
    }
}
