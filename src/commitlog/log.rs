use std::convert::TryFrom;
use std::num::NonZeroU64;
use std::{fmt, io};

/// Index of a log entry. Entries are numbered from 1.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(NonZeroU64);

impl Index {
    /// Panics on 0. Use `from_u64()` where 0 may show up.
    pub fn new(index: u64) -> Self {
        match NonZeroU64::new(index) {
            Some(index) => Index(index),
            None => panic!("Log index 0 doesn't exist"),
        }
    }

    /// Returns None for 0, which is how the wire and the public API spell "no entry".
    pub fn from_u64(index: u64) -> Option<Self> {
        NonZeroU64::new(index).map(Index)
    }

    pub fn start_index() -> Self {
        Self::new(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }

    pub fn plus(&self, delta: u64) -> Index {
        Index::new(self.as_u64() + delta)
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Index> {
        self.as_u64().checked_sub(delta).and_then(Index::from_u64)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Converts an optional index into its u64 form, where 0 means "none".
pub fn index_as_u64(index: Option<Index>) -> u64 {
    index.map(|i| i.as_u64()).unwrap_or(0)
}

/// Log is an append only log intended for use as a replicated commit log in a database.
///
/// Log indexes entries starting from 1. There will be no entry existing at index 0. The first
/// entry is written at index 1. A prefix of the log may be compacted away, after which
/// `first_index()` moves forward and reads below it return None.
pub trait Log<E: Entry>: Send + 'static {
    /// append() appends a log entry to the log at the next log entry index, then returns
    /// the log entry index that was just used to append the entry.
    fn append(&mut self, entry: E) -> Result<Index, io::Error>;

    /// Read log entry at specified index.
    fn read(&self, index: Index) -> Result<Option<E>, io::Error>;

    /// Soft-deletes anything starting at `index` and later. Soft-deletion makes this infallible.
    /// If hard-deletion is required, add a new method.
    fn truncate(&mut self, index: Index);

    /// Discards everything up to and including `index`. Compacting past the end of the log empties
    /// it and moves `next_index()` to `index + 1`.
    fn compact(&mut self, index: Index) -> Result<(), io::Error>;

    /// Durability barrier. Every entry appended before this call returns survives a restart.
    fn flush(&mut self) -> Result<(), io::Error>;

    /// first_index returns the lowest index that has not been compacted. If the log is empty, this
    /// is the same as `next_index()`.
    fn first_index(&self) -> Index;

    /// next_index returns the next index that will be used to append an entry.
    fn next_index(&self) -> Index;

    fn last_index(&self) -> Option<Index> {
        self.next_index().checked_minus(1)
    }
}

// Choice of Vec<u8> vs Bytes will depend on whats easier for disk to use.
pub trait Entry: Clone + TryFrom<Vec<u8>, Error = io::Error> + Into<Vec<u8>> {}
