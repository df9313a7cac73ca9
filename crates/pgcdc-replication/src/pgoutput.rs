//! Decodes the inner `pgoutput` logical-replication messages (the payload
//! carried inside each `XLogData` frame). Hand-rolled rather than delegated
//! to a third-party pgoutput crate so that the logical `Message` ('M')
//! variant — which carries the application context protocol and the
//! `wal_ping` liveness probe (SPEC_FULL §4.3) — is guaranteed supported.

use crate::error::{ReplicationError, ReplicationResult};
use byteorder::{BigEndian, ReadBytesExt};
use pgcdc_core::{Lsn, Xid};
use std::io::{Cursor, Read};

#[derive(Debug, Clone, PartialEq)]
pub enum PgOutputMessage {
    Begin(BeginMessage),
    Commit(CommitMessage),
    Relation(RelationMessage),
    Type(TypeMessage),
    Insert(InsertMessage),
    Update(UpdateMessage),
    Delete(DeleteMessage),
    Truncate(TruncateMessage),
    Origin(OriginMessage),
    Message(LogicalMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginMessage {
    pub final_lsn: Lsn,
    pub timestamp: i64,
    pub xid: Xid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitMessage {
    pub flags: u8,
    pub commit_lsn: Lsn,
    pub end_lsn: Lsn,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaIdentity {
    Default,
    Nothing,
    Full,
    Index,
}

impl From<u8> for ReplicaIdentity {
    fn from(b: u8) -> Self {
        match b {
            b'n' => ReplicaIdentity::Nothing,
            b'f' => ReplicaIdentity::Full,
            b'i' => ReplicaIdentity::Index,
            _ => ReplicaIdentity::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub flags: u8,
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
}

impl ColumnInfo {
    /// `flags & 1` marks the column as part of the relation's key, per the
    /// pgoutput wire format.
    pub fn is_key(&self) -> bool {
        self.flags & 1 == 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationMessage {
    pub relation_id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: ReplicaIdentity,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeMessage {
    pub type_oid: u32,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Unchanged,
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TupleData {
    pub columns: Vec<ColumnValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertMessage {
    pub relation_id: u32,
    pub tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessage {
    pub relation_id: u32,
    pub old_tuple: Option<TupleData>,
    pub old_tuple_is_key_only: bool,
    pub new_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMessage {
    pub relation_id: u32,
    pub old_tuple: Option<TupleData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TruncateMessage {
    pub options: u8,
    pub relation_ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OriginMessage {
    pub origin_lsn: Lsn,
    pub origin_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    pub transactional: bool,
    pub lsn: Lsn,
    pub prefix: String,
    pub content: Vec<u8>,
}

pub fn decode(data: &[u8]) -> ReplicationResult<PgOutputMessage> {
    if data.is_empty() {
        return Err(ReplicationError::Protocol("empty pgoutput message".into()));
    }
    let tag = data[0];
    let mut cursor = Cursor::new(&data[1..]);
    match tag {
        b'B' => decode_begin(&mut cursor).map(PgOutputMessage::Begin),
        b'C' => decode_commit(&mut cursor).map(PgOutputMessage::Commit),
        b'R' => decode_relation(&mut cursor).map(PgOutputMessage::Relation),
        b'Y' => decode_type(&mut cursor).map(PgOutputMessage::Type),
        b'I' => decode_insert(&mut cursor).map(PgOutputMessage::Insert),
        b'U' => decode_update(&mut cursor).map(PgOutputMessage::Update),
        b'D' => decode_delete(&mut cursor).map(PgOutputMessage::Delete),
        b'T' => decode_truncate(&mut cursor).map(PgOutputMessage::Truncate),
        b'O' => decode_origin(&mut cursor).map(PgOutputMessage::Origin),
        b'M' => decode_message(&mut cursor).map(PgOutputMessage::Message),
        other => Err(ReplicationError::Protocol(format!(
            "unknown pgoutput message tag: {:#04x}",
            other
        ))),
    }
}

fn io_err(ctx: &str) -> impl Fn(std::io::Error) -> ReplicationError + '_ {
    move |e| ReplicationError::Protocol(format!("{ctx}: {e}"))
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<String> {
    let mut bytes = Vec::new();
    loop {
        let b = cursor.read_u8().map_err(io_err("read_string"))?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    String::from_utf8(bytes).map_err(|e| ReplicationError::Protocol(format!("invalid utf8: {e}")))
}

fn decode_begin(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<BeginMessage> {
    Ok(BeginMessage {
        final_lsn: cursor.read_i64::<BigEndian>().map_err(io_err("begin.final_lsn"))? as u64,
        timestamp: cursor.read_i64::<BigEndian>().map_err(io_err("begin.timestamp"))?,
        xid: cursor.read_i32::<BigEndian>().map_err(io_err("begin.xid"))? as u32 as Xid,
    })
}

fn decode_commit(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<CommitMessage> {
    Ok(CommitMessage {
        flags: cursor.read_u8().map_err(io_err("commit.flags"))?,
        commit_lsn: cursor.read_i64::<BigEndian>().map_err(io_err("commit.lsn"))? as u64,
        end_lsn: cursor.read_i64::<BigEndian>().map_err(io_err("commit.end_lsn"))? as u64,
        timestamp: cursor.read_i64::<BigEndian>().map_err(io_err("commit.timestamp"))?,
    })
}

fn decode_relation(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<RelationMessage> {
    let relation_id = cursor.read_u32::<BigEndian>().map_err(io_err("relation.id"))?;
    let namespace = read_string(cursor)?;
    let name = read_string(cursor)?;
    let replica_identity = ReplicaIdentity::from(cursor.read_u8().map_err(io_err("relation.replident"))?);
    let num_columns = cursor.read_i16::<BigEndian>().map_err(io_err("relation.ncols"))?;

    let mut columns = Vec::with_capacity(num_columns.max(0) as usize);
    for _ in 0..num_columns {
        let flags = cursor.read_u8().map_err(io_err("column.flags"))?;
        let name = read_string(cursor)?;
        let type_oid = cursor.read_u32::<BigEndian>().map_err(io_err("column.type_oid"))?;
        let type_modifier = cursor.read_i32::<BigEndian>().map_err(io_err("column.type_modifier"))?;
        columns.push(ColumnInfo { flags, name, type_oid, type_modifier });
    }

    Ok(RelationMessage { relation_id, namespace, name, replica_identity, columns })
}

fn decode_type(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<TypeMessage> {
    Ok(TypeMessage {
        type_oid: cursor.read_u32::<BigEndian>().map_err(io_err("type.oid"))?,
        namespace: read_string(cursor)?,
        name: read_string(cursor)?,
    })
}

fn decode_tuple(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<TupleData> {
    let num_columns = cursor.read_i16::<BigEndian>().map_err(io_err("tuple.ncols"))?;
    let mut columns = Vec::with_capacity(num_columns.max(0) as usize);
    for _ in 0..num_columns {
        let kind = cursor.read_u8().map_err(io_err("tuple.kind"))?;
        let value = match kind {
            b'n' => ColumnValue::Null,
            b'u' => ColumnValue::Unchanged,
            b't' => {
                let len = cursor.read_i32::<BigEndian>().map_err(io_err("tuple.text_len"))?;
                let mut buf = vec![0u8; len.max(0) as usize];
                cursor.read_exact(&mut buf).map_err(io_err("tuple.text_bytes"))?;
                let text = String::from_utf8(buf)
                    .map_err(|e| ReplicationError::Protocol(format!("invalid utf8 in tuple: {e}")))?;
                ColumnValue::Text(text)
            }
            other => {
                return Err(ReplicationError::Protocol(format!(
                    "unknown tuple column kind: {:#04x}",
                    other
                )))
            }
        };
        columns.push(value);
    }
    Ok(TupleData { columns })
}

fn decode_insert(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<InsertMessage> {
    let relation_id = cursor.read_u32::<BigEndian>().map_err(io_err("insert.relation_id"))?;
    let marker = cursor.read_u8().map_err(io_err("insert.marker"))?;
    if marker != b'N' {
        return Err(ReplicationError::Protocol(format!("expected 'N' tuple marker, got {marker:#04x}")));
    }
    let tuple = decode_tuple(cursor)?;
    Ok(InsertMessage { relation_id, tuple })
}

fn decode_update(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<UpdateMessage> {
    let relation_id = cursor.read_u32::<BigEndian>().map_err(io_err("update.relation_id"))?;
    let mut marker = cursor.read_u8().map_err(io_err("update.marker"))?;

    let mut old_tuple = None;
    let mut old_tuple_is_key_only = false;
    if marker == b'K' || marker == b'O' {
        old_tuple_is_key_only = marker == b'K';
        old_tuple = Some(decode_tuple(cursor)?);
        marker = cursor.read_u8().map_err(io_err("update.marker2"))?;
    }
    if marker != b'N' {
        return Err(ReplicationError::Protocol(format!("expected 'N' tuple marker, got {marker:#04x}")));
    }
    let new_tuple = decode_tuple(cursor)?;
    Ok(UpdateMessage { relation_id, old_tuple, old_tuple_is_key_only, new_tuple })
}

fn decode_delete(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<DeleteMessage> {
    let relation_id = cursor.read_u32::<BigEndian>().map_err(io_err("delete.relation_id"))?;
    let marker = cursor.read_u8().map_err(io_err("delete.marker"))?;
    let old_tuple = match marker {
        b'K' | b'O' => Some(decode_tuple(cursor)?),
        other => {
            return Err(ReplicationError::Protocol(format!("unexpected delete marker: {other:#04x}")))
        }
    };
    Ok(DeleteMessage { relation_id, old_tuple })
}

fn decode_truncate(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<TruncateMessage> {
    let num_relations = cursor.read_i32::<BigEndian>().map_err(io_err("truncate.nrel"))?;
    let options = cursor.read_u8().map_err(io_err("truncate.options"))?;
    let mut relation_ids = Vec::with_capacity(num_relations.max(0) as usize);
    for _ in 0..num_relations {
        relation_ids.push(cursor.read_u32::<BigEndian>().map_err(io_err("truncate.relid"))?);
    }
    Ok(TruncateMessage { options, relation_ids })
}

fn decode_origin(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<OriginMessage> {
    Ok(OriginMessage {
        origin_lsn: cursor.read_i64::<BigEndian>().map_err(io_err("origin.lsn"))? as u64,
        origin_name: read_string(cursor)?,
    })
}

fn decode_message(cursor: &mut Cursor<&[u8]>) -> ReplicationResult<LogicalMessage> {
    let flags = cursor.read_u8().map_err(io_err("message.flags"))?;
    let lsn = cursor.read_i64::<BigEndian>().map_err(io_err("message.lsn"))? as u64;
    let prefix = read_string(cursor)?;
    let len = cursor.read_u32::<BigEndian>().map_err(io_err("message.content_len"))?;
    let mut content = vec![0u8; len as usize];
    cursor.read_exact(&mut content).map_err(io_err("message.content"))?;
    Ok(LogicalMessage { transactional: flags & 1 == 1, lsn, prefix, content })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    }

    #[test]
    fn decodes_begin() {
        let mut buf = vec![b'B'];
        buf.extend_from_slice(&100i64.to_be_bytes());
        buf.extend_from_slice(&200i64.to_be_bytes());
        buf.extend_from_slice(&7i32.to_be_bytes());
        let msg = decode(&buf).unwrap();
        assert_eq!(msg, PgOutputMessage::Begin(BeginMessage { final_lsn: 100, timestamp: 200, xid: 7 }));
    }

    #[test]
    fn decodes_commit() {
        let mut buf = vec![b'C', 0];
        buf.extend_from_slice(&10i64.to_be_bytes());
        buf.extend_from_slice(&20i64.to_be_bytes());
        buf.extend_from_slice(&30i64.to_be_bytes());
        let msg = decode(&buf).unwrap();
        assert_eq!(
            msg,
            PgOutputMessage::Commit(CommitMessage { flags: 0, commit_lsn: 10, end_lsn: 20, timestamp: 30 })
        );
    }

    #[test]
    fn decodes_relation() {
        let mut buf = vec![b'R'];
        buf.extend_from_slice(&55u32.to_be_bytes());
        push_string(&mut buf, "public");
        push_string(&mut buf, "records");
        buf.push(b'd');
        buf.extend_from_slice(&2i16.to_be_bytes());
        buf.push(1);
        push_string(&mut buf, "id");
        buf.extend_from_slice(&23u32.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        buf.push(0);
        push_string(&mut buf, "name");
        buf.extend_from_slice(&25u32.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());

        match decode(&buf).unwrap() {
            PgOutputMessage::Relation(r) => {
                assert_eq!(r.relation_id, 55);
                assert_eq!(r.namespace, "public");
                assert_eq!(r.name, "records");
                assert_eq!(r.replica_identity, ReplicaIdentity::Default);
                assert_eq!(r.columns.len(), 2);
                assert!(r.columns[0].is_key());
                assert!(!r.columns[1].is_key());
            }
            other => panic!("expected relation, got {other:?}"),
        }
    }

    #[test]
    fn decodes_insert() {
        let mut buf = vec![b'I'];
        buf.extend_from_slice(&55u32.to_be_bytes());
        buf.push(b'N');
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.push(b't');
        buf.extend_from_slice(&3i32.to_be_bytes());
        buf.extend_from_slice(b"foo");

        match decode(&buf).unwrap() {
            PgOutputMessage::Insert(i) => {
                assert_eq!(i.relation_id, 55);
                assert_eq!(i.tuple.columns, vec![ColumnValue::Text("foo".into())]);
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn decodes_insert_with_null() {
        let mut buf = vec![b'I'];
        buf.extend_from_slice(&55u32.to_be_bytes());
        buf.push(b'N');
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.push(b'n');

        match decode(&buf).unwrap() {
            PgOutputMessage::Insert(i) => assert_eq!(i.tuple.columns, vec![ColumnValue::Null]),
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn decodes_update_with_key_only_old_tuple() {
        let mut buf = vec![b'U'];
        buf.extend_from_slice(&55u32.to_be_bytes());
        buf.push(b'K');
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.push(b't');
        buf.extend_from_slice(&1i32.to_be_bytes());
        buf.extend_from_slice(b"1");
        buf.push(b'N');
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.push(b'u');

        match decode(&buf).unwrap() {
            PgOutputMessage::Update(u) => {
                assert!(u.old_tuple_is_key_only);
                assert_eq!(u.old_tuple.unwrap().columns, vec![ColumnValue::Text("1".into())]);
                assert_eq!(u.new_tuple.columns, vec![ColumnValue::Unchanged]);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn decodes_delete() {
        let mut buf = vec![b'D'];
        buf.extend_from_slice(&55u32.to_be_bytes());
        buf.push(b'O');
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.push(b't');
        buf.extend_from_slice(&1i32.to_be_bytes());
        buf.extend_from_slice(b"9");

        match decode(&buf).unwrap() {
            PgOutputMessage::Delete(d) => {
                assert_eq!(d.old_tuple.unwrap().columns, vec![ColumnValue::Text("9".into())]);
            }
            other => panic!("expected delete, got {other:?}"),
        }
    }

    #[test]
    fn decodes_logical_message() {
        let mut buf = vec![b'M', 1];
        buf.extend_from_slice(&42i64.to_be_bytes());
        push_string(&mut buf, "wal_ping");
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(b"{}");

        match decode(&buf).unwrap() {
            PgOutputMessage::Message(m) => {
                assert!(m.transactional);
                assert_eq!(m.lsn, 42);
                assert_eq!(m.prefix, "wal_ping");
                assert_eq!(m.content, b"{}");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(decode(&[b'?']).is_err());
    }
}
