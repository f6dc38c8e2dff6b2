//! Records, values, and column lists.
//!
//! A record on disk is a 13-byte header (`deleted`, `xmin`, `xmax`, `cid`)
//! followed by one null flag + payload per column. Integers are big-endian.

use bytes::{Buf, BufMut};
use std::cmp::Ordering;
use std::fmt;

use crate::errors::StorageError;
use crate::{Cid, Rid, Xid, NULL_XID};

/// Serialized size of a record header.
pub const RECORD_HEADER_SIZE: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int,
    Double,
    Varchar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
        }
    }
}

/// An ordered list of columns describing a record layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnList {
    columns: Vec<Column>,
}

impl ColumnList {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn push(&mut self, column: Column) {
        self.columns.push(column);
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Double(f64),
    Varchar(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used by sorting and merge joins. Null sorts first;
    /// mismatched types compare equal, mirroring how untyped inputs fall
    /// through in the executors.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    fn serialized_size(&self, column_type: ColumnType) -> usize {
        if self.is_null() {
            return 1;
        }
        1 + match column_type {
            ColumnType::Bool => 1,
            ColumnType::Int => 4,
            ColumnType::Double => 8,
            ColumnType::Varchar => match self {
                Value::Varchar(s) => 4 + s.len(),
                _ => 0,
            },
        }
    }

    fn serialize_to(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.put_u8(0),
            Value::Bool(b) => {
                out.put_u8(1);
                out.put_u8(*b as u8);
            }
            Value::Int(i) => {
                out.put_u8(1);
                out.put_i32(*i);
            }
            Value::Double(d) => {
                out.put_u8(1);
                out.put_f64(*d);
            }
            Value::Varchar(s) => {
                out.put_u8(1);
                out.put_u32(s.len() as u32);
                out.put_slice(s.as_bytes());
            }
        }
    }

    fn deserialize_from(buf: &mut &[u8], column_type: ColumnType) -> Result<Value, StorageError> {
        if buf.remaining() < 1 {
            return Err(StorageError::Corruption(
                "record body truncated before null flag".to_string(),
            ));
        }
        if buf.get_u8() == 0 {
            return Ok(Value::Null);
        }
        let needed = match column_type {
            ColumnType::Bool => 1,
            ColumnType::Int => 4,
            ColumnType::Double => 8,
            ColumnType::Varchar => 4,
        };
        if buf.remaining() < needed {
            return Err(StorageError::Corruption(
                "record body truncated inside value".to_string(),
            ));
        }
        Ok(match column_type {
            ColumnType::Bool => Value::Bool(buf.get_u8() != 0),
            ColumnType::Int => Value::Int(buf.get_i32()),
            ColumnType::Double => Value::Double(buf.get_f64()),
            ColumnType::Varchar => {
                let len = buf.get_u32() as usize;
                if buf.remaining() < len {
                    return Err(StorageError::Corruption(
                        "varchar length exceeds record body".to_string(),
                    ));
                }
                let bytes = buf.copy_to_bytes(len);
                Value::Varchar(String::from_utf8_lossy(&bytes).into_owned())
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "t" } else { "f" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Varchar(s) => write!(f, "{}", s),
        }
    }
}

/// The transaction header stamped on every stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub deleted: bool,
    pub xmin: Xid,
    pub xmax: Xid,
    pub cid: Cid,
}

impl Default for RecordHeader {
    fn default() -> Self {
        Self {
            deleted: false,
            xmin: NULL_XID,
            xmax: NULL_XID,
            cid: 0,
        }
    }
}

impl RecordHeader {
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        out.put_u8(self.deleted as u8);
        out.put_u32(self.xmin);
        out.put_u32(self.xmax);
        out.put_u32(self.cid);
    }

    pub fn deserialize_from(buf: &mut &[u8]) -> Result<Self, StorageError> {
        if buf.remaining() < RECORD_HEADER_SIZE {
            return Err(StorageError::Corruption(
                "record header truncated".to_string(),
            ));
        }
        Ok(Self {
            deleted: buf.get_u8() != 0,
            xmin: buf.get_u32(),
            xmax: buf.get_u32(),
            cid: buf.get_u32(),
        })
    }
}

/// One row, in memory. Stored records carry the rid they were read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub header: RecordHeader,
    values: Vec<Value>,
    rid: Option<Rid>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            header: RecordHeader::default(),
            values,
            rid: None,
        }
    }

    /// A record of `arity` nulls, used to pad outer-join output.
    pub fn nulls(arity: usize) -> Self {
        Self::new(vec![Value::Null; arity])
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Extends this record with another's values, as join output.
    pub fn append(&mut self, other: &Record) {
        self.values.extend_from_slice(&other.values);
    }

    pub fn rid(&self) -> Option<Rid> {
        self.rid
    }

    pub fn set_rid(&mut self, rid: Rid) {
        self.rid = Some(rid);
    }

    /// Serialized size given the column layout the record will be stored
    /// under.
    pub fn size(&self, columns: &ColumnList) -> usize {
        RECORD_HEADER_SIZE
            + self
                .values
                .iter()
                .zip(columns.columns())
                .map(|(v, c)| v.serialized_size(c.column_type))
                .sum::<usize>()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.header.serialize_to(&mut out);
        for value in &self.values {
            value.serialize_to(&mut out);
        }
        out
    }

    pub fn deserialize(mut buf: &[u8], columns: &ColumnList) -> Result<Self, StorageError> {
        let header = RecordHeader::deserialize_from(&mut buf)?;
        let mut values = Vec::with_capacity(columns.len());
        for column in columns.columns() {
            values.push(Value::deserialize_from(&mut buf, column.column_type)?);
        }
        Ok(Self {
            header,
            values,
            rid: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_columns() -> ColumnList {
        ColumnList::new(vec![
            Column::new("id", ColumnType::Int),
            Column::new("name", ColumnType::Varchar),
            Column::new("score", ColumnType::Double),
            Column::new("active", ColumnType::Bool),
        ])
    }

    #[test]
    fn serialize_deserialize_round_trip_includes_header() {
        let columns = sample_columns();
        let mut record = Record::new(vec![
            Value::Int(7),
            Value::Varchar("albite".to_string()),
            Value::Double(2.5),
            Value::Bool(true),
        ]);
        record.header.xmin = 11;
        record.header.xmax = 13;
        record.header.cid = 2;
        record.header.deleted = true;

        let bytes = record.serialize();
        assert_eq!(bytes.len(), record.size(&columns));

        let decoded = Record::deserialize(&bytes, &columns).unwrap();
        assert_eq!(decoded.header, record.header);
        assert_eq!(decoded.values(), record.values());
    }

    #[test]
    fn null_values_round_trip() {
        let columns = sample_columns();
        let record = Record::new(vec![
            Value::Null,
            Value::Null,
            Value::Double(0.0),
            Value::Null,
        ]);
        let bytes = record.serialize();
        let decoded = Record::deserialize(&bytes, &columns).unwrap();
        assert_eq!(decoded.values(), record.values());
    }

    #[test]
    fn truncated_body_is_corruption() {
        let columns = sample_columns();
        let record = Record::new(vec![
            Value::Int(1),
            Value::Varchar("x".to_string()),
            Value::Double(1.0),
            Value::Bool(false),
        ]);
        let bytes = record.serialize();
        let err = Record::deserialize(&bytes[..bytes.len() - 3], &columns).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    #[test]
    fn value_ordering_puts_null_first() {
        assert_eq!(Value::Null.compare(&Value::Int(0)), Ordering::Less);
        assert_eq!(Value::Int(3).compare(&Value::Int(4)), Ordering::Less);
        assert_eq!(
            Value::Varchar("b".into()).compare(&Value::Varchar("a".into())),
            Ordering::Greater
        );
    }
}
