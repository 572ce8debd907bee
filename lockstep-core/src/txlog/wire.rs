//! Binary serialization of the log.
//!
//! A `u32 BE` transaction count, then each transaction as `time` (i64
//! BE), `kind` (u8) and the four string fields (`uuid`, `key`, `value`,
//! `index`) each encoded as `u32 BE` length + UTF-8 bytes. Parse errors
//! carry the byte offset of the damage.

use crate::txlog::{LogError, Result, Tx, TxKind};

/// Serialize a log for the encrypted container.
pub fn serialize(txs: &[Tx]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + txs.len() * 64);
    out.extend_from_slice(&(txs.len() as u32).to_be_bytes());
    for tx in txs {
        encode_tx(tx, &mut out);
    }
    out
}

/// Encode a single transaction. Also used by the merge deduplicator as
/// the preimage for content hashing.
pub(crate) fn encode_tx(tx: &Tx, out: &mut Vec<u8>) {
    out.extend_from_slice(&tx.time.to_be_bytes());
    out.push(tx.kind.wire_byte());
    for field in [&tx.uuid, &tx.key, &tx.value, &tx.index] {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field.as_bytes());
    }
}

/// Parse a serialized log.
pub fn parse(data: &[u8]) -> Result<Vec<Tx>> {
    let mut cursor = Cursor { data, pos: 0 };

    let count = cursor.read_u32("transaction count")?;
    // A count can at most be one tx per remaining payload byte; anything
    // larger is garbage, not a huge allocation request.
    if count as usize > data.len() {
        return Err(LogError::Corrupt {
            offset: 0,
            reason: "transaction count exceeds payload size",
        });
    }

    let mut txs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        txs.push(cursor.read_tx()?);
    }

    if cursor.pos != data.len() {
        return Err(LogError::Corrupt {
            offset: cursor.pos,
            reason: "trailing bytes after final transaction",
        });
    }

    Ok(txs)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&[u8]> {
        if self.data.len() - self.pos < n {
            return Err(LogError::Corrupt {
                offset: self.pos,
                reason: what,
            });
        }
        let raw = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(raw)
    }

    fn read_u32(&mut self, what: &'static str) -> Result<u32> {
        let raw = self.take(4, what)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_string(&mut self, what: &'static str) -> Result<String> {
        let len = self.read_u32(what)? as usize;
        let offset = self.pos;
        let raw = self.take(len, what)?;
        String::from_utf8(raw.to_vec()).map_err(|_| LogError::Corrupt {
            offset,
            reason: "string field is not valid utf-8",
        })
    }

    fn read_tx(&mut self) -> Result<Tx> {
        let raw_time = self.take(8, "truncated transaction time")?;
        let time = i64::from_be_bytes([
            raw_time[0], raw_time[1], raw_time[2], raw_time[3], raw_time[4], raw_time[5],
            raw_time[6], raw_time[7],
        ]);

        let kind_offset = self.pos;
        let kind_byte = self.take(1, "truncated transaction kind")?[0];
        let kind = TxKind::from_wire(kind_byte).ok_or(LogError::Corrupt {
            offset: kind_offset,
            reason: "unknown transaction kind",
        })?;

        let uuid = self.read_string("truncated uuid field")?;
        let key = self.read_string("truncated key field")?;
        let value = self.read_string("truncated value field")?;
        let index = self.read_string("truncated index field")?;

        Ok(Tx {
            time,
            kind,
            uuid,
            key,
            value,
            index,
        })
    }
}
