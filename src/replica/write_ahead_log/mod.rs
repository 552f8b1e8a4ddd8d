//! Raft-specific facade over the generic commit log, plus the encoding of the entries it stores.

mod log;
mod log_entry;

pub(crate) use log_entry::EntryKind;
pub(crate) use log_entry::LogEntry;
pub(crate) use log_entry::Member;

pub(super) use log::WriteAheadLog;
