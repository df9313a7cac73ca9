//! The outer streaming-replication "CopyData" framing: `XLogData` ('w'),
//! `PrimaryKeepalive` ('k'), and the client's `standby_status_update` ('r')
//! reply. Layouts cross-checked against a raw-protocol reference client and
//! against `curiousitau-wal2http`'s `process_keepalive_message`/`send_feedback`.

use crate::error::{ReplicationError, ReplicationResult};
use crate::lsn::now_pg_micros;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use pgcdc_core::Lsn;
use std::io::Cursor;

#[derive(Debug, Clone)]
pub struct XLogData {
    pub wal_start: Lsn,
    pub wal_end: Lsn,
    pub sent_time: i64,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct PrimaryKeepalive {
    pub wal_end: Lsn,
    pub sent_time: i64,
    pub reply_requested: bool,
}

#[derive(Debug)]
pub enum ReplicationFrame {
    XLogData(XLogData),
    Keepalive(PrimaryKeepalive),
}

/// Parses one CopyData payload as received from `CopyBothDuplex`. The
/// leading byte discriminates `'w'` (XLogData) from `'k'` (keepalive); any
/// other leading byte is a protocol violation the caller should treat as
/// non-retriable (SPEC_FULL §4.3, "anything else: drop" applies to inner
/// pgoutput messages, not to this outer framing).
pub fn parse_frame(data: &[u8]) -> ReplicationResult<ReplicationFrame> {
    if data.is_empty() {
        return Err(ReplicationError::Protocol("empty CopyData frame".into()));
    }
    let mut cursor = Cursor::new(&data[1..]);
    match data[0] {
        b'w' => {
            let wal_start = cursor
                .read_i64::<BigEndian>()
                .map_err(|e| ReplicationError::Protocol(format!("XLogData: {e}")))? as u64;
            let wal_end = cursor
                .read_i64::<BigEndian>()
                .map_err(|e| ReplicationError::Protocol(format!("XLogData: {e}")))? as u64;
            let sent_time = cursor
                .read_i64::<BigEndian>()
                .map_err(|e| ReplicationError::Protocol(format!("XLogData: {e}")))?;
            let payload_start = 1 + 24;
            let payload = Bytes::copy_from_slice(&data[payload_start..]);
            Ok(ReplicationFrame::XLogData(XLogData {
                wal_start,
                wal_end,
                sent_time,
                payload,
            }))
        }
        b'k' => {
            let wal_end = cursor
                .read_i64::<BigEndian>()
                .map_err(|e| ReplicationError::Protocol(format!("keepalive: {e}")))? as u64;
            let sent_time = cursor
                .read_i64::<BigEndian>()
                .map_err(|e| ReplicationError::Protocol(format!("keepalive: {e}")))?;
            let reply_requested = cursor
                .read_u8()
                .map_err(|e| ReplicationError::Protocol(format!("keepalive: {e}")))?
                != 0;
            Ok(ReplicationFrame::Keepalive(PrimaryKeepalive {
                wal_end,
                sent_time,
                reply_requested,
            }))
        }
        other => Err(ReplicationError::Protocol(format!(
            "unrecognized CopyData tag: {other:#04x}"
        ))),
    }
}

/// Builds a `standby_status_update` ('r') reply: the client's acknowledged
/// write/flush/apply LSNs plus a client timestamp. This crate always
/// acknowledges write == flush == apply, since the Replicator has no
/// separate flush/apply concept of its own (SPEC_FULL §3 invariant: after
/// `Commit(lsn=L)` send `standby_status_update(write_lsn=L)`).
pub fn encode_standby_status_update(lsn: Lsn, reply_requested: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(34);
    buf.put_u8(b'r');
    buf.put_i64(lsn as i64);
    buf.put_i64(lsn as i64);
    buf.put_i64(lsn as i64);
    buf.put_i64(now_pg_micros());
    buf.put_u8(reply_requested as u8);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xlogdata() {
        let mut buf = Vec::new();
        buf.write_u8(b'w').unwrap();
        buf.write_i64::<BigEndian>(100).unwrap();
        buf.write_i64::<BigEndian>(200).unwrap();
        buf.write_i64::<BigEndian>(0).unwrap();
        buf.extend_from_slice(b"payload-bytes");

        match parse_frame(&buf).unwrap() {
            ReplicationFrame::XLogData(x) => {
                assert_eq!(x.wal_start, 100);
                assert_eq!(x.wal_end, 200);
                assert_eq!(&x.payload[..], b"payload-bytes");
            }
            _ => panic!("expected XLogData"),
        }
    }

    #[test]
    fn parses_keepalive_requesting_reply() {
        let mut buf = Vec::new();
        buf.write_u8(b'k').unwrap();
        buf.write_i64::<BigEndian>(42).unwrap();
        buf.write_i64::<BigEndian>(0).unwrap();
        buf.write_u8(1).unwrap();

        match parse_frame(&buf).unwrap() {
            ReplicationFrame::Keepalive(k) => {
                assert_eq!(k.wal_end, 42);
                assert!(k.reply_requested);
            }
            _ => panic!("expected keepalive"),
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(parse_frame(&[b'x']).is_err());
    }

    #[test]
    fn encodes_standby_status_update_with_correct_length() {
        let buf = encode_standby_status_update(12345, false);
        assert_eq!(buf.len(), 34);
        assert_eq!(buf[0], b'r');
    }
}
