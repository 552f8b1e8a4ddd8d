use crate::commitlog;
use crate::protocol::{CommandConsistency, Operation, SessionId};
use crate::replica::Term;
use crate::transport::Address;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::convert::TryFrom;
use std::io;

/// Byte representation:
///
/// ```text
/// |                                         1                   2                       |
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | ...     |
/// +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+-...-----+
/// |Vrs|       Term (8 bytes)          |     Timestamp (8 bytes)       |Knd| Fields  ... |
/// +---+-------------------------------+-------------------------------+---+-...-----+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `Term` - raft leadership term when this entry was created
/// * `Timestamp` - leader's clock (ms since epoch) when the entry was created
/// * `Knd` - entry kind tag, followed by that kind's fields
///
/// Integers are little endian. Strings and byte arrays are prefixed with their length as a u32.
/// Checksum is not needed, it's guaranteed by underlying commitlog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LogEntry {
    pub term: Term,
    pub timestamp: u64,
    pub kind: EntryKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EntryKind {
    /// Appended by every new leader so it can commit entries from earlier terms.
    NoOp,
    Register {
        client_id: String,
        client_address: Option<Address>,
        timeout_ms: u64,
    },
    KeepAlive {
        session_id: SessionId,
        command_sequence: u64,
        event_index: u64,
    },
    Unregister {
        session_id: SessionId,
        expired: bool,
    },
    Command {
        session_id: SessionId,
        sequence: u64,
        operation: Operation,
        consistency: CommandConsistency,
    },
    Configuration {
        members: Vec<Member>,
    },
}

/// Member of a cluster configuration. Passive members receive the log but don't vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Member {
    pub address: Address,
    pub active: bool,
}

const RAFT_LOG_ENTRY_FORMAT_VERSION: u8 = 1;

const KIND_NO_OP: u8 = 0;
const KIND_REGISTER: u8 = 1;
const KIND_KEEP_ALIVE: u8 = 2;
const KIND_UNREGISTER: u8 = 3;
const KIND_COMMAND: u8 = 4;
const KIND_CONFIGURATION: u8 = 5;

impl commitlog::Entry for LogEntry {}

impl LogEntry {
    pub(crate) fn new(term: Term, timestamp: u64, kind: EntryKind) -> Self {
        LogEntry { term, timestamp, kind }
    }
}

impl From<LogEntry> for Vec<u8> {
    fn from(entry: LogEntry) -> Self {
        let mut buf = BytesMut::with_capacity(1 + 8 + 8 + 1 + 32);
        buf.put_u8(RAFT_LOG_ENTRY_FORMAT_VERSION);
        buf.put_u64_le(entry.term.as_u64());
        buf.put_u64_le(entry.timestamp);

        match entry.kind {
            EntryKind::NoOp => buf.put_u8(KIND_NO_OP),
            EntryKind::Register {
                client_id,
                client_address,
                timeout_ms,
            } => {
                buf.put_u8(KIND_REGISTER);
                put_str(&mut buf, &client_id);
                put_str(&mut buf, client_address.as_ref().map(Address::as_str).unwrap_or(""));
                buf.put_u64_le(timeout_ms);
            }
            EntryKind::KeepAlive {
                session_id,
                command_sequence,
                event_index,
            } => {
                buf.put_u8(KIND_KEEP_ALIVE);
                buf.put_u64_le(session_id.as_u64());
                buf.put_u64_le(command_sequence);
                buf.put_u64_le(event_index);
            }
            EntryKind::Unregister { session_id, expired } => {
                buf.put_u8(KIND_UNREGISTER);
                buf.put_u64_le(session_id.as_u64());
                buf.put_u8(expired as u8);
            }
            EntryKind::Command {
                session_id,
                sequence,
                operation,
                consistency,
            } => {
                buf.put_u8(KIND_COMMAND);
                buf.put_u64_le(session_id.as_u64());
                buf.put_u64_le(sequence);
                buf.put_u8(consistency_tag(consistency));
                put_str(&mut buf, &operation.op_type);
                put_bytes(&mut buf, &operation.payload);
            }
            EntryKind::Configuration { members } => {
                buf.put_u8(KIND_CONFIGURATION);
                buf.put_u32_le(members.len() as u32);
                for member in members {
                    put_str(&mut buf, member.address.as_str());
                    buf.put_u8(member.active as u8);
                }
            }
        }

        buf.to_vec()
    }
}

impl TryFrom<Vec<u8>> for LogEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        let mut buf = Bytes::from(bytes);

        let version = get_u8(&mut buf)?;
        if version != RAFT_LOG_ENTRY_FORMAT_VERSION {
            return Err(invalid(format!("Unknown log entry format version {}", version)));
        }
        let term = Term::new(get_u64(&mut buf)?);
        let timestamp = get_u64(&mut buf)?;

        let kind = match get_u8(&mut buf)? {
            KIND_NO_OP => EntryKind::NoOp,
            KIND_REGISTER => EntryKind::Register {
                client_id: get_str(&mut buf)?,
                client_address: Some(get_str(&mut buf)?)
                    .filter(|address| !address.is_empty())
                    .map(Address::new),
                timeout_ms: get_u64(&mut buf)?,
            },
            KIND_KEEP_ALIVE => EntryKind::KeepAlive {
                session_id: SessionId::new(get_u64(&mut buf)?),
                command_sequence: get_u64(&mut buf)?,
                event_index: get_u64(&mut buf)?,
            },
            KIND_UNREGISTER => EntryKind::Unregister {
                session_id: SessionId::new(get_u64(&mut buf)?),
                expired: get_u8(&mut buf)? != 0,
            },
            KIND_COMMAND => {
                let session_id = SessionId::new(get_u64(&mut buf)?);
                let sequence = get_u64(&mut buf)?;
                let consistency = consistency_from_tag(get_u8(&mut buf)?)?;
                let op_type = get_str(&mut buf)?;
                let payload = get_bytes(&mut buf)?;
                EntryKind::Command {
                    session_id,
                    sequence,
                    operation: Operation::new(op_type, payload),
                    consistency,
                }
            }
            KIND_CONFIGURATION => {
                let count = get_u32(&mut buf)?;
                let mut members = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    members.push(Member {
                        address: Address::new(get_str(&mut buf)?),
                        active: get_u8(&mut buf)? != 0,
                    });
                }
                EntryKind::Configuration { members }
            }
            other => return Err(invalid(format!("Unknown log entry kind {}", other))),
        };

        if buf.has_remaining() {
            return Err(invalid(format!("{} trailing bytes after log entry", buf.remaining())));
        }

        Ok(LogEntry { term, timestamp, kind })
    }
}

fn consistency_tag(consistency: CommandConsistency) -> u8 {
    match consistency {
        CommandConsistency::None => 0,
        CommandConsistency::Sequential => 1,
        CommandConsistency::Linearizable => 2,
    }
}

fn consistency_from_tag(tag: u8) -> Result<CommandConsistency, io::Error> {
    match tag {
        0 => Ok(CommandConsistency::None),
        1 => Ok(CommandConsistency::Sequential),
        2 => Ok(CommandConsistency::Linearizable),
        other => Err(invalid(format!("Unknown command consistency {}", other))),
    }
}

fn put_str(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value);
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn ensure(buf: &Bytes, len: usize) -> Result<(), io::Error> {
    if buf.remaining() < len {
        return Err(invalid(format!(
            "Log entry truncated, needed {} bytes but {} remain",
            len,
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_u8(buf: &mut Bytes) -> Result<u8, io::Error> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut Bytes) -> Result<u32, io::Error> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn get_u64(buf: &mut Bytes) -> Result<u64, io::Error> {
    ensure(buf, 8)?;
    Ok(buf.get_u64_le())
}

fn get_bytes(buf: &mut Bytes) -> Result<Bytes, io::Error> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    Ok(buf.split_to(len))
}

fn get_str(buf: &mut Bytes) -> Result<String, io::Error> {
    let bytes = get_bytes(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| invalid(format!("Invalid utf-8 in log entry: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(entry: LogEntry) {
        let bytes: Vec<u8> = entry.clone().into();
        assert_eq!(LogEntry::try_from(bytes).unwrap(), entry);
    }

    #[test]
    fn every_kind_survives_encoding() {
        round_trip(LogEntry::new(Term::new(3), 17, EntryKind::NoOp));
        round_trip(LogEntry::new(
            Term::new(4),
            18,
            EntryKind::Register {
                client_id: "client-1".into(),
                client_address: Some(Address::new("localhost:9000")),
                timeout_ms: 5000,
            },
        ));
        round_trip(LogEntry::new(
            Term::new(4),
            19,
            EntryKind::Command {
                session_id: SessionId::new(2),
                sequence: 7,
                operation: Operation::new("put", vec![1u8, 2, 3]),
                consistency: CommandConsistency::Linearizable,
            },
        ));
        round_trip(LogEntry::new(
            Term::new(5),
            20,
            EntryKind::Configuration {
                members: vec![
                    Member {
                        address: Address::new("a:1"),
                        active: true,
                    },
                    Member {
                        address: Address::new("b:2"),
                        active: false,
                    },
                ],
            },
        ));
    }

    #[test]
    fn register_without_address() {
        round_trip(LogEntry::new(
            Term::new(1),
            1,
            EntryKind::Register {
                client_id: "reader".into(),
                client_address: None,
                timeout_ms: 10,
            },
        ));
    }

    #[test]
    fn truncated_bytes_are_invalid_data() {
        let mut bytes: Vec<u8> = LogEntry::new(
            Term::new(1),
            1,
            EntryKind::Unregister {
                session_id: SessionId::new(9),
                expired: true,
            },
        )
        .into();
        bytes.pop();

        let err = LogEntry::try_from(bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_version_is_invalid_data() {
        let mut bytes: Vec<u8> = LogEntry::new(Term::new(1), 1, EntryKind::NoOp).into();
        bytes[0] = 99;
        assert_eq!(LogEntry::try_from(bytes).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }
}
