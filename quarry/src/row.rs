//! The row codec: column values serialized in schema order as the value of
//! a leaf object.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};

use strata::{PageObject, StorageError};

use crate::errors::EngineError;
use crate::schema::{row_id_of, Table};
use crate::types::{Datum, Row, SqlType, Value};

fn corrupted(table: &Table) -> EngineError {
    EngineError::Storage(StorageError::CorruptedPage(format!(
        "undecodable row in table {}",
        table.name
    )))
}

/// Serializes a row in schema column order: a null flag per column, then
/// the payload for its declared type (numbers as big-endian f64 bits, text
/// length-prefixed, booleans one byte).
pub fn encode_row(table: &Table, columns: &HashMap<String, Value>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for column in &table.columns {
        let value = columns.get(&column.name);
        match value.map(|v| &v.datum) {
            None | Some(Datum::Null) => buf.put_u8(0),
            Some(Datum::Number(n)) => {
                buf.put_u8(1);
                buf.put_f64(*n);
            }
            Some(Datum::Text(s)) => {
                buf.put_u8(1);
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Some(Datum::Bool(b)) => {
                buf.put_u8(1);
                buf.put_u8(*b as u8);
            }
        }
    }
    buf.to_vec()
}

/// Rebuilds a row from a stored object, carrying the row identifier out of
/// the key and the creator transaction out of the object header.
pub fn decode_row(table: &Table, obj: &PageObject) -> Result<Row, EngineError> {
    let mut cur = obj.value.as_slice();
    let mut columns = HashMap::new();
    for column in &table.columns {
        if cur.remaining() < 1 {
            return Err(corrupted(table));
        }
        let present = cur.get_u8() == 1;
        let datum = if !present {
            Datum::Null
        } else {
            match column.sql_type {
                SqlType::Boolean => {
                    if cur.remaining() < 1 {
                        return Err(corrupted(table));
                    }
                    Datum::Bool(cur.get_u8() == 1)
                }
                SqlType::Character(_) | SqlType::Varchar(_) => {
                    if cur.remaining() < 4 {
                        return Err(corrupted(table));
                    }
                    let len = cur.get_u32() as usize;
                    if cur.remaining() < len {
                        return Err(corrupted(table));
                    }
                    let text = String::from_utf8_lossy(&cur[..len]).into_owned();
                    cur.advance(len);
                    Datum::Text(text)
                }
                _ => {
                    if cur.remaining() < 8 {
                        return Err(corrupted(table));
                    }
                    Datum::Number(cur.get_f64())
                }
            }
        };
        columns.insert(column.name.clone(), Value::new(column.sql_type, datum));
    }
    Ok(Row {
        id: row_id_of(&obj.key) as u64,
        tid: obj.tid,
        columns,
    })
}
