//! Maps a PostgreSQL built-in type OID to a pure `bytes -> Value` decoder.
//!
//! `pgoutput` always sends column data in PostgreSQL's text output format
//! (never binary), so every decoder here parses a UTF-8 string. Unknown
//! OIDs fall back to the string decoder; a `null` column never reaches
//! this module (callers check for `ColumnValue::Null` first).

use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::str::FromStr;
use uuid::Uuid;

// Scalar OIDs, mirroring pg_type.dat.
pub const BOOL: u32 = 16;
pub const BYTEA: u32 = 17;
pub const CHAR: u32 = 18;
pub const NAME: u32 = 19;
pub const INT8: u32 = 20;
pub const INT2: u32 = 21;
pub const INT4: u32 = 23;
pub const TEXT: u32 = 25;
pub const OID: u32 = 26;
pub const TID: u32 = 27;
pub const XID: u32 = 28;
pub const CID: u32 = 29;
pub const JSON: u32 = 114;
pub const XML: u32 = 142;
pub const POINT: u32 = 600;
pub const LSEG: u32 = 601;
pub const PATH: u32 = 602;
pub const BOX: u32 = 603;
pub const POLYGON: u32 = 604;
pub const LINE: u32 = 628;
pub const CIDR: u32 = 650;
pub const FLOAT4: u32 = 700;
pub const FLOAT8: u32 = 701;
pub const CIRCLE: u32 = 718;
pub const MONEY: u32 = 790;
pub const MACADDR: u32 = 829;
pub const INET: u32 = 869;
pub const MACADDR8: u32 = 774;
pub const BPCHAR: u32 = 1042;
pub const VARCHAR: u32 = 1043;
pub const DATE: u32 = 1082;
pub const TIME: u32 = 1083;
pub const TIMESTAMP: u32 = 1114;
pub const TIMESTAMPTZ: u32 = 1184;
pub const INTERVAL: u32 = 1186;
pub const TIMETZ: u32 = 1266;
pub const BIT: u32 = 1560;
pub const VARBIT: u32 = 1562;
pub const NUMERIC: u32 = 1700;
pub const UUID: u32 = 2950;
pub const PG_LSN: u32 = 3220;
pub const TSVECTOR: u32 = 3614;
pub const TSQUERY: u32 = 3615;
pub const JSONB: u32 = 3802;
pub const XID8: u32 = 5069;
pub const INT4RANGE: u32 = 3904;
pub const NUMRANGE: u32 = 3906;
pub const TSRANGE: u32 = 3908;
pub const TSTZRANGE: u32 = 3910;
pub const DATERANGE: u32 = 3912;
pub const INT8RANGE: u32 = 3926;
pub const INT4MULTIRANGE: u32 = 4451;
pub const NUMMULTIRANGE: u32 = 4532;
pub const TSMULTIRANGE: u32 = 4533;
pub const TSTZMULTIRANGE: u32 = 4534;
pub const DATEMULTIRANGE: u32 = 4535;
pub const INT8MULTIRANGE: u32 = 4536;
// reg* alias family: all stored as OID underneath.
pub const REGPROC: u32 = 24;
pub const REGPROCEDURE: u32 = 2202;
pub const REGOPER: u32 = 2203;
pub const REGOPERATOR: u32 = 2204;
pub const REGCLASS: u32 = 2205;
pub const REGTYPE: u32 = 2206;
pub const REGROLE: u32 = 4096;
pub const REGNAMESPACE: u32 = 4089;
pub const REGCONFIG: u32 = 3734;
pub const REGDICTIONARY: u32 = 3769;

/// Array OIDs, each a fixed offset from the scalar OID convention used by
/// `pg_type.dat`. Maps array OID to its element OID.
fn array_element_oid(array_oid: u32) -> Option<u32> {
    Some(match array_oid {
        1000 => BOOL,
        1001 => BYTEA,
        1002 => CHAR,
        1003 => NAME,
        1005 => INT2,
        1007 => INT4,
        1009 => TEXT,
        1013 => OID,
        1014 => BPCHAR,
        1015 => VARCHAR,
        1016 => INT8,
        1021 => FLOAT4,
        1022 => FLOAT8,
        1028 => OID,
        1040 => MACADDR,
        1041 => INET,
        1115 => TIMESTAMP,
        1182 => DATE,
        1183 => TIME,
        1185 => TIMESTAMPTZ,
        1187 => INTERVAL,
        1231 => NUMERIC,
        1270 => TIMETZ,
        1561 => BIT,
        1563 => VARBIT,
        199 => JSON,
        2951 => UUID,
        2201 => REGPROC,
        791 => MONEY,
        3643 => TSVECTOR,
        3645 => TSQUERY,
        3807 => JSONB,
        3905 => INT4RANGE,
        3907 => NUMRANGE,
        3909 => TSRANGE,
        3911 => TSTZRANGE,
        3913 => DATERANGE,
        3927 => INT8RANGE,
        651 => CIDR,
        775 => MACADDR8,
        1010 => TID,
        1011 => XID,
        1012 => CID,
        271 => XID8,
        1017 => POINT,
        1018 => LSEG,
        1019 => PATH,
        1020 => BOX,
        1027 => POLYGON,
        629 => LINE,
        143 => XML,
        3221 => PG_LSN,
        6150 => INT4MULTIRANGE,
        6151 => NUMMULTIRANGE,
        6152 => TSMULTIRANGE,
        6153 => TSTZMULTIRANGE,
        6155 => DATEMULTIRANGE,
        6157 => INT8MULTIRANGE,
        2207 => REGPROCEDURE,
        2208 => REGOPER,
        2209 => REGOPERATOR,
        2210 => REGCLASS,
        2211 => REGTYPE,
        4097 => REGROLE,
        4090 => REGNAMESPACE,
        3735 => REGCONFIG,
        3770 => REGDICTIONARY,
        _ => return None,
    })
}

/// Decodes a non-null column value from its PostgreSQL text representation.
pub fn decode_text(type_oid: u32, text: &str) -> Value {
    if let Some(elem_oid) = array_element_oid(type_oid) {
        return Value::Array(decode_array_literal(elem_oid, text));
    }

    match type_oid {
        BOOL => Value::Bool(text == "t" || text == "true"),
        BYTEA => Value::Bytes(decode_bytea(text)),
        INT8 | INT4 | INT2 | OID | XID | CID | XID8 => text
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        REGPROC | REGPROCEDURE | REGOPER | REGOPERATOR | REGCLASS | REGTYPE | REGROLE
        | REGNAMESPACE | REGCONFIG | REGDICTIONARY => text
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        FLOAT4 | FLOAT8 => text
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        NUMERIC | MONEY => Value::Numeric(text.to_string()),
        JSON | JSONB => serde_json::Value::from_str(text)
            .map(Value::Json)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        UUID => Uuid::parse_str(text)
            .map(Value::Uuid)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        DATE => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Value::Date)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        TIMESTAMP => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .map(Value::Timestamp)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        TIMESTAMPTZ => parse_timestamptz(text)
            .map(Value::TimestampTz)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        TEXT | VARCHAR | BPCHAR | CHAR | NAME | XML | TIME | TIMETZ | INTERVAL | INET | CIDR
        | MACADDR | MACADDR8 | POINT | LSEG | PATH | BOX | POLYGON | LINE | CIRCLE | BIT
        | VARBIT | TSVECTOR | TSQUERY | PG_LSN | TID | INT4RANGE | NUMRANGE | TSRANGE
        | TSTZRANGE | DATERANGE | INT8RANGE | INT4MULTIRANGE | NUMMULTIRANGE | TSMULTIRANGE
        | TSTZMULTIRANGE | DATEMULTIRANGE | INT8MULTIRANGE => Value::String(text.to_string()),
        _ => Value::String(text.to_string()),
    }
}

fn parse_timestamptz(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z").map(|d| d.with_timezone(&Utc))
}

/// `bytea` text output is `\x` followed by hex digits.
fn decode_bytea(text: &str) -> Vec<u8> {
    let hex_part = text.strip_prefix("\\x").unwrap_or(text);
    hex::decode(hex_part).unwrap_or_else(|_| text.as_bytes().to_vec())
}

/// Parses a PostgreSQL array literal (`{1,2,NULL,"quoted,value"}`) into an
/// ordered sequence of element values, decoding each element with the
/// scalar decoder for `elem_oid`. Nested arrays (multi-dimensional) are
/// flattened one level at a time by recursing into `{…}` sub-literals.
fn decode_array_literal(elem_oid: u32, text: &str) -> Vec<Value> {
    let inner = text.trim();
    let inner = inner
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(inner);

    let mut out = Vec::new();
    let mut chars = inner.chars().peekable();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut depth = 0i32;

    let flush = |current: &mut String, out: &mut Vec<Value>| {
        let token = current.trim();
        if token.is_empty() {
            return;
        }
        if token.eq_ignore_ascii_case("null") {
            out.push(Value::Null);
        } else {
            out.push(decode_text(elem_oid, token));
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '"' if !in_quotes => in_quotes = true,
            '"' if in_quotes => in_quotes = false,
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '{' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            '}' if !in_quotes => {
                depth -= 1;
                current.push(c);
            }
            ',' if !in_quotes && depth == 0 => flush(&mut current, &mut out),
            _ => current.push(c),
        }
    }
    flush(&mut current, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_scalars() {
        assert_eq!(decode_text(BOOL, "t"), Value::Bool(true));
        assert_eq!(decode_text(BOOL, "f"), Value::Bool(false));
        assert_eq!(decode_text(INT4, "42"), Value::Int(42));
        assert_eq!(decode_text(FLOAT8, "3.5"), Value::Float(3.5));
        assert_eq!(decode_text(NUMERIC, "12.3400"), Value::Numeric("12.3400".into()));
        assert_eq!(decode_text(TEXT, "hello"), Value::String("hello".into()));
    }

    #[test]
    fn decodes_uuid() {
        let s = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(decode_text(UUID, s), Value::Uuid(Uuid::parse_str(s).unwrap()));
    }

    #[test]
    fn decodes_json() {
        match decode_text(JSONB, "{\"a\":1}") {
            Value::Json(v) => assert_eq!(v["a"], 1),
            other => panic!("expected json, got {other:?}"),
        }
    }

    #[test]
    fn unknown_oid_falls_back_to_string() {
        assert_eq!(decode_text(999_999, "whatever"), Value::String("whatever".into()));
    }

    #[test]
    fn decodes_bytea_hex() {
        assert_eq!(decode_text(BYTEA, "\\x0a0b"), Value::Bytes(vec![0x0a, 0x0b]));
    }

    #[test]
    fn decodes_int_array() {
        let v = decode_text(1007, "{1,2,3}");
        assert_eq!(v, Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn decodes_array_with_null_and_quoted_element() {
        let v = decode_text(1009, "{foo,NULL,\"has,comma\"}");
        assert_eq!(
            v,
            Value::Array(vec![
                Value::String("foo".into()),
                Value::Null,
                Value::String("has,comma".into()),
            ])
        );
    }

    #[test]
    fn decodes_empty_array() {
        assert_eq!(decode_text(1007, "{}"), Value::Array(vec![]));
    }

    #[test]
    fn decodes_regclass_array_instead_of_falling_back_to_string() {
        let v = decode_text(2210, "{orders,users}");
        assert_eq!(
            v,
            Value::Array(vec![Value::String("orders".into()), Value::String("users".into())])
        );
    }

    #[test]
    fn decodes_point_array_instead_of_falling_back_to_string() {
        // Postgres quotes each element here because it contains a comma.
        let v = decode_text(1017, "{\"(1,2)\",\"(3,4)\"}");
        assert_eq!(
            v,
            Value::Array(vec![Value::String("(1,2)".into()), Value::String("(3,4)".into())])
        );
    }
}
