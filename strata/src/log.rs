//! The write-ahead log manager.
//!
//! Log records are appended to an in-memory buffer under a single latch and
//! flushed to the log file on demand (commit/abort force a flush) or when the
//! buffer fills. Every record gets a monotonically increasing LSN at append
//! time.

use serde::{Deserialize, Serialize};
use std::io;
use std::sync::{Arc, Mutex};

use crate::PAGE_SIZE;
use crate::Rid;
use crate::disk::DiskManager;
use crate::transaction::TxnId;

/// A log sequence number.
pub type Lsn = i64;

/// Sentinel LSN for "no previous record".
pub const INVALID_LSN: Lsn = -1;

const LOG_BUFFER_SIZE: usize = 8 * PAGE_SIZE;

/// Serialized record header: `{log_type: u8, lsn: i64, log_tot_len: u32,
/// txn_id: i64, prev_lsn: i64}`, all little-endian. `log_tot_len` covers the
/// header, making the stream self-delimiting.
pub const LOG_HEADER_SIZE: usize = 1 + 8 + 4 + 8 + 8;

/// The type-dependent payload of a log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    Begin,
    Commit,
    Abort,
    Insert {
        table: String,
        rid: Rid,
        record: Vec<u8>,
    },
    Delete {
        table: String,
        rid: Rid,
        record: Vec<u8>,
    },
    Update {
        table: String,
        rid: Rid,
        before: Vec<u8>,
        after: Vec<u8>,
    },
}

impl LogPayload {
    fn type_tag(&self) -> u8 {
        match self {
            LogPayload::Begin => 0,
            LogPayload::Commit => 1,
            LogPayload::Abort => 2,
            LogPayload::Insert { .. } => 3,
            LogPayload::Delete { .. } => 4,
            LogPayload::Update { .. } => 5,
        }
    }
}

/// One record of the write-ahead log. The LSN is assigned by the log manager
/// at append time.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub txn_id: TxnId,
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn new(txn_id: TxnId, prev_lsn: Lsn, payload: LogPayload) -> Self {
        Self {
            lsn: INVALID_LSN,
            prev_lsn,
            txn_id,
            payload,
        }
    }

    fn encode(&self) -> io::Result<Vec<u8>> {
        let body = bincode::serialize(&self.payload).map_err(io::Error::other)?;
        let total_len = (LOG_HEADER_SIZE + body.len()) as u32;
        let mut out = Vec::with_capacity(total_len as usize);
        out.push(self.payload.type_tag());
        out.extend_from_slice(&self.lsn.to_le_bytes());
        out.extend_from_slice(&total_len.to_le_bytes());
        out.extend_from_slice(&self.txn_id.to_le_bytes());
        out.extend_from_slice(&self.prev_lsn.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes one record from the front of `buf`, returning it and the
    /// number of bytes consumed.
    pub fn decode(buf: &[u8]) -> io::Result<(LogRecord, usize)> {
        if buf.len() < LOG_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "log record header truncated",
            ));
        }
        let type_tag = buf[0];
        let lsn = i64::from_le_bytes(buf[1..9].try_into().unwrap());
        let total_len = u32::from_le_bytes(buf[9..13].try_into().unwrap()) as usize;
        let txn_id = i64::from_le_bytes(buf[13..21].try_into().unwrap());
        let prev_lsn = i64::from_le_bytes(buf[21..29].try_into().unwrap());
        if total_len < LOG_HEADER_SIZE || buf.len() < total_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "log record body truncated",
            ));
        }
        let payload: LogPayload = bincode::deserialize(&buf[LOG_HEADER_SIZE..total_len])
            .map_err(io::Error::other)?;
        if payload.type_tag() != type_tag {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "log record type tag does not match payload",
            ));
        }
        Ok((
            LogRecord {
                lsn,
                prev_lsn,
                txn_id,
                payload,
            },
            total_len,
        ))
    }
}

#[derive(Debug)]
struct LogState {
    buffer: Vec<u8>,
    global_lsn: Lsn,
    persist_lsn: Lsn,
}

/// The log manager. One buffer, one latch; the append path flushes inline
/// under the already-held latch when the buffer cannot take the record.
#[derive(Debug)]
pub struct LogManager {
    disk: Arc<DiskManager>,
    state: Mutex<LogState>,
}

impl LogManager {
    pub fn new(disk: Arc<DiskManager>) -> Self {
        Self {
            disk,
            state: Mutex::new(LogState {
                buffer: Vec::with_capacity(LOG_BUFFER_SIZE),
                global_lsn: 0,
                persist_lsn: 0,
            }),
        }
    }

    /// Assigns the record its LSN and serializes it into the buffer,
    /// flushing first if the buffer is out of room. Returns the LSN.
    pub fn append(&self, record: &mut LogRecord) -> io::Result<Lsn> {
        let mut state = self.state.lock().unwrap();

        state.global_lsn += 1;
        record.lsn = state.global_lsn;

        let bytes = record.encode()?;
        if !state.buffer.is_empty() && state.buffer.len() + bytes.len() > LOG_BUFFER_SIZE {
            Self::flush_locked(&mut state, &self.disk)?;
        }
        state.buffer.extend_from_slice(&bytes);

        crate::strata_debug_log!(
            "[LogManager::append] lsn={} txn={} type={}",
            record.lsn,
            record.txn_id,
            record.payload.type_tag()
        );
        Ok(record.lsn)
    }

    /// Forces the buffer to the log file and advances `persist_lsn`.
    /// Idempotent when the buffer is empty.
    pub fn flush(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::flush_locked(&mut state, &self.disk)
    }

    fn flush_locked(state: &mut LogState, disk: &DiskManager) -> io::Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        disk.write_log(&state.buffer)?;
        state.persist_lsn = state.global_lsn;
        state.buffer.clear();
        Ok(())
    }

    pub fn global_lsn(&self) -> Lsn {
        self.state.lock().unwrap().global_lsn
    }

    /// The highest LSN known to be on stable storage.
    pub fn persist_lsn(&self) -> Lsn {
        self.state.lock().unwrap().persist_lsn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, Arc<DiskManager>, LogManager) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.log")).unwrap());
        let lm = LogManager::new(disk.clone());
        (dir, disk, lm)
    }

    #[test]
    fn lsns_are_assigned_monotonically() {
        let (_dir, _disk, lm) = manager();
        let mut a = LogRecord::new(1, INVALID_LSN, LogPayload::Begin);
        let mut b = LogRecord::new(1, 1, LogPayload::Commit);
        let lsn_a = lm.append(&mut a).unwrap();
        let lsn_b = lm.append(&mut b).unwrap();
        assert!(lsn_b > lsn_a);
        assert_eq!(a.lsn, lsn_a);
    }

    #[test]
    fn flush_persists_and_is_idempotent() {
        let (_dir, disk, lm) = manager();
        let mut rec = LogRecord::new(
            7,
            INVALID_LSN,
            LogPayload::Insert {
                table: "t".to_string(),
                rid: Rid {
                    page_no: 1,
                    slot_no: 0,
                },
                record: vec![1, 2, 3],
            },
        );
        let lsn = lm.append(&mut rec).unwrap();
        assert_eq!(lm.persist_lsn(), 0);
        lm.flush().unwrap();
        assert_eq!(lm.persist_lsn(), lsn);
        lm.flush().unwrap();
        assert_eq!(lm.persist_lsn(), lsn);

        let bytes = disk.read_log().unwrap();
        let (decoded, consumed) = LogRecord::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, rec);
    }

    #[test]
    fn full_buffer_flushes_inline_on_append() {
        let (_dir, disk, lm) = manager();
        let payload = LogPayload::Update {
            table: "t".to_string(),
            rid: Rid {
                page_no: 1,
                slot_no: 0,
            },
            before: vec![0; PAGE_SIZE],
            after: vec![1; PAGE_SIZE],
        };
        // Each record is over two pages; five of them overrun the buffer and
        // force an inline flush without deadlocking on the latch.
        for i in 0..5 {
            let mut rec = LogRecord::new(i, INVALID_LSN, payload.clone());
            lm.append(&mut rec).unwrap();
        }
        assert!(lm.persist_lsn() > 0);
        assert!(!disk.read_log().unwrap().is_empty());
    }

    #[test]
    fn log_stream_is_self_delimiting() {
        let (_dir, disk, lm) = manager();
        let payloads = [
            LogPayload::Begin,
            LogPayload::Delete {
                table: "orders".to_string(),
                rid: Rid {
                    page_no: 2,
                    slot_no: 5,
                },
                record: vec![9; 32],
            },
            LogPayload::Abort,
        ];
        let mut prev = INVALID_LSN;
        for payload in payloads.clone() {
            let mut rec = LogRecord::new(3, prev, payload);
            prev = lm.append(&mut rec).unwrap();
        }
        lm.flush().unwrap();

        let bytes = disk.read_log().unwrap();
        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < bytes.len() {
            let (rec, consumed) = LogRecord::decode(&bytes[offset..]).unwrap();
            offset += consumed;
            decoded.push(rec);
        }
        assert_eq!(decoded.len(), 3);
        for (rec, payload) in decoded.iter().zip(payloads.iter()) {
            assert_eq!(&rec.payload, payload);
        }
        // The per-transaction chain links each record to its predecessor.
        assert_eq!(decoded[0].prev_lsn, INVALID_LSN);
        assert_eq!(decoded[1].prev_lsn, decoded[0].lsn);
        assert_eq!(decoded[2].prev_lsn, decoded[1].lsn);
    }
}
