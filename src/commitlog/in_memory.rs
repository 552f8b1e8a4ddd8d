use crate::commitlog::{Entry, Index, Log};
use std::collections::VecDeque;
use std::convert::TryFrom;
use std::io;
use std::marker::PhantomData;

// Persistence backends are out of scope for this crate, so the log is modeled in memory. A
// flushed entry "survives" for as long as the process does.
pub struct InMemoryLog<E: Entry> {
    // We don't *need* to convert these to bytes. We could just hold the original entry in memory,
    // but we want to exercise the conversion logic.
    log: VecDeque<Vec<u8>>,
    // Index of `log[0]`.
    first_index: Index,
    _pd: PhantomData<E>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn create() -> Result<Self, io::Error> {
        Ok(InMemoryLog {
            log: VecDeque::new(),
            first_index: Index::start_index(),
            _pd: PhantomData::default(),
        })
    }

    fn vec_index(&self, index: Index) -> Option<usize> {
        if index < self.first_index {
            return None;
        }
        Some((index.as_u64() - self.first_index.as_u64()) as usize)
    }
}

impl<E: Entry + Send + 'static> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let index = self.next_index();
        self.log.push_back(entry.into());

        Ok(index)
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        match self.vec_index(index).and_then(|i| self.log.get(i)) {
            Some(bytes) => E::try_from(bytes.clone()).map(Some),
            None => Ok(None),
        }
    }

    fn truncate(&mut self, index: Index) {
        match self.vec_index(index) {
            Some(vec_index) => self.log.truncate(vec_index),
            // Truncating from below the compaction point removes everything we still hold.
            None => self.log.clear(),
        }
    }

    fn compact(&mut self, index: Index) -> Result<(), io::Error> {
        if index < self.first_index {
            return Ok(());
        }

        if index >= self.next_index() {
            self.log.clear();
        } else {
            let num_to_drop = (index.as_u64() - self.first_index.as_u64() + 1) as usize;
            self.log.drain(..num_to_drop);
        }
        self.first_index = index.plus(1);

        Ok(())
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        Ok(())
    }

    fn first_index(&self) -> Index {
        self.first_index
    }

    fn next_index(&self) -> Index {
        self.first_index.plus(self.log.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct TestEntry(u8);

    impl Entry for TestEntry {}

    impl TryFrom<Vec<u8>> for TestEntry {
        type Error = io::Error;

        fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
            match bytes.as_slice() {
                [b] => Ok(TestEntry(*b)),
                _ => Err(io::Error::new(io::ErrorKind::InvalidData, "expected 1 byte")),
            }
        }
    }

    impl Into<Vec<u8>> for TestEntry {
        fn into(self) -> Vec<u8> {
            vec![self.0]
        }
    }

    fn log_with(n: u8) -> InMemoryLog<TestEntry> {
        let mut log = InMemoryLog::create().unwrap();
        for i in 1..=n {
            assert_eq!(log.append(TestEntry(i)).unwrap(), Index::new(i as u64));
        }
        log
    }

    #[test]
    fn append_read_truncate() {
        let mut log = log_with(5);
        assert_eq!(log.read(Index::new(3)).unwrap(), Some(TestEntry(3)));
        assert_eq!(log.read(Index::new(6)).unwrap(), None);
        assert_eq!(log.last_index(), Some(Index::new(5)));

        log.truncate(Index::new(4));
        assert_eq!(log.next_index(), Index::new(4));
        assert_eq!(log.read(Index::new(4)).unwrap(), None);
        assert_eq!(log.append(TestEntry(40)).unwrap(), Index::new(4));
    }

    #[test]
    fn compact_prefix() {
        let mut log = log_with(5);
        log.compact(Index::new(2)).unwrap();

        assert_eq!(log.first_index(), Index::new(3));
        assert_eq!(log.read(Index::new(2)).unwrap(), None);
        assert_eq!(log.read(Index::new(3)).unwrap(), Some(TestEntry(3)));
        assert_eq!(log.next_index(), Index::new(6));

        // Compacting below the first index is a no-op.
        log.compact(Index::new(1)).unwrap();
        assert_eq!(log.first_index(), Index::new(3));

        // Truncation still works relative to the new base.
        log.truncate(Index::new(4));
        assert_eq!(log.last_index(), Some(Index::new(3)));
    }

    #[test]
    fn compact_past_end_moves_base() {
        let mut log = log_with(2);
        log.compact(Index::new(10)).unwrap();

        assert_eq!(log.first_index(), Index::new(11));
        assert_eq!(log.next_index(), Index::new(11));
        assert_eq!(log.last_index(), Some(Index::new(10)));
        assert_eq!(log.append(TestEntry(11)).unwrap(), Index::new(11));
    }
}
