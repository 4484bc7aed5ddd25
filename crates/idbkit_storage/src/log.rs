//! Commit log records.
//!
//! Every record uses the same envelope:
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers everything before it.
//! A `Batch` payload is a list of operations; a `Snapshot` payload has the
//! same layout but replaces the whole table when replayed.

use crate::batch::{BatchOp, WriteBatch};
use crate::error::{StorageError, StorageResult};

/// Magic bytes at the start of every record.
pub const LOG_MAGIC: [u8; 4] = *b"IDBL";

/// Current record format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;
const OP_CLEAR: u8 = 3;
const OP_DROP: u8 = 4;

/// Kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// One committed write batch.
    Batch,
    /// The full table contents, written by compaction.
    Snapshot,
}

impl RecordType {
    /// Byte representation.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            RecordType::Batch => 1,
            RecordType::Snapshot => 2,
        }
    }

    /// Parses the byte representation.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(RecordType::Batch),
            2 => Some(RecordType::Snapshot),
            _ => None,
        }
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Record kind.
    pub record_type: RecordType,
    /// Operations carried by the record.
    pub batch: WriteBatch,
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// Encodes a record with its envelope.
///
/// # Errors
///
/// Fails if the payload or one of its fields exceeds 4 GiB.
pub fn encode_record(record_type: RecordType, batch: &WriteBatch) -> StorageResult<Vec<u8>> {
    let payload = encode_payload(batch)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::corrupted("log record payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&LOG_MAGIC);
    data.extend_from_slice(&LOG_VERSION.to_le_bytes());
    data.push(record_type.as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

fn encode_payload(batch: &WriteBatch) -> StorageResult<Vec<u8>> {
    let mut out = Vec::new();
    write_len(&mut out, batch.len())?;
    for op in batch.ops() {
        match op {
            BatchOp::Put {
                partition,
                key,
                value,
            } => {
                out.push(OP_PUT);
                write_field(&mut out, partition.as_bytes())?;
                write_field(&mut out, key)?;
                write_field(&mut out, value)?;
            }
            BatchOp::Delete { partition, key } => {
                out.push(OP_DELETE);
                write_field(&mut out, partition.as_bytes())?;
                write_field(&mut out, key)?;
            }
            BatchOp::Clear { partition } => {
                out.push(OP_CLEAR);
                write_field(&mut out, partition.as_bytes())?;
            }
            BatchOp::DropPartition { partition } => {
                out.push(OP_DROP);
                write_field(&mut out, partition.as_bytes())?;
            }
        }
    }
    Ok(out)
}

fn write_len(out: &mut Vec<u8>, len: usize) -> StorageResult<()> {
    let len =
        u32::try_from(len).map_err(|_| StorageError::corrupted("log field too large"))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_field(out: &mut Vec<u8>, bytes: &[u8]) -> StorageResult<()> {
    write_len(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

/// Outcome of reading the record at some offset.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete, verified record and its total encoded length.
    Record(LogRecord, usize),
    /// The remaining bytes do not hold a complete record.
    Truncated,
    /// No bytes remain.
    End,
}

/// Reads the record starting at `offset` in `data`.
///
/// A record cut short by a crash is reported as [`ReadOutcome::Truncated`];
/// anything else that fails validation is corruption.
///
/// # Errors
///
/// Returns an error on bad magic, unsupported version, unknown type,
/// checksum mismatch or a malformed payload.
pub fn read_record(data: &[u8], offset: usize) -> StorageResult<ReadOutcome> {
    let Some(rest) = data.get(offset..) else {
        return Ok(ReadOutcome::End);
    };
    if rest.is_empty() {
        return Ok(ReadOutcome::End);
    }
    if rest.len() < HEADER_SIZE {
        return Ok(ReadOutcome::Truncated);
    }

    let header = &rest[..HEADER_SIZE];
    if header[0..4] != LOG_MAGIC {
        return Err(StorageError::corrupted(format!(
            "invalid magic at offset {offset}"
        )));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version > LOG_VERSION {
        return Err(StorageError::corrupted(format!(
            "unsupported version {version} at offset {offset}"
        )));
    }
    let type_byte = header[6];
    let record_type = RecordType::from_byte(type_byte).ok_or_else(|| {
        StorageError::corrupted(format!(
            "unknown record type {type_byte} at offset {offset}"
        ))
    })?;
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

    let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
    if rest.len() < total_len {
        return Ok(ReadOutcome::Truncated);
    }

    let payload_end = HEADER_SIZE + payload_len;
    let stored_crc = u32::from_le_bytes([
        rest[payload_end],
        rest[payload_end + 1],
        rest[payload_end + 2],
        rest[payload_end + 3],
    ]);
    let computed_crc = compute_crc32(&rest[..payload_end]);
    if stored_crc != computed_crc {
        return Err(StorageError::ChecksumMismatch {
            offset: offset as u64,
            expected: stored_crc,
            actual: computed_crc,
        });
    }

    let batch = decode_payload(&rest[HEADER_SIZE..payload_end])?;
    Ok(ReadOutcome::Record(
        LogRecord { record_type, batch },
        total_len,
    ))
}

fn decode_payload(payload: &[u8]) -> StorageResult<WriteBatch> {
    let mut reader = PayloadReader {
        data: payload,
        pos: 0,
    };
    let count = reader.read_u32()?;
    let mut batch = WriteBatch::new();
    for _ in 0..count {
        let op = match reader.read_u8()? {
            OP_PUT => BatchOp::Put {
                partition: reader.read_string()?,
                key: reader.read_field()?.to_vec(),
                value: reader.read_field()?.to_vec(),
            },
            OP_DELETE => BatchOp::Delete {
                partition: reader.read_string()?,
                key: reader.read_field()?.to_vec(),
            },
            OP_CLEAR => BatchOp::Clear {
                partition: reader.read_string()?,
            },
            OP_DROP => BatchOp::DropPartition {
                partition: reader.read_string()?,
            },
            other => {
                return Err(StorageError::corrupted(format!(
                    "unknown batch op {other}"
                )))
            }
        };
        batch.push(op);
    }
    if reader.pos != payload.len() {
        return Err(StorageError::corrupted(format!(
            "trailing bytes in batch record: expected {} bytes, got {}",
            reader.pos,
            payload.len()
        )));
    }
    Ok(batch)
}

struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| StorageError::corrupted("batch record shorter than declared"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> StorageResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_field(&mut self) -> StorageResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    fn read_string(&mut self) -> StorageResult<String> {
        let bytes = self.read_field()?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| StorageError::corrupted("partition name is not UTF-8"))
    }
}
