//! Table descriptors and the key-prefix scheme that namespaces the catalog
//! and every table's rows inside the single shared B-tree key space.

use serde::{Deserialize, Serialize};

use strata::TableId;

use crate::errors::EngineError;
use crate::types::SqlType;

/// Catalog records live under this discriminator byte.
pub const CATALOG_PREFIX: u8 = 0x01;
/// Row records live under this one, followed by the table identifier.
pub const ROW_PREFIX: u8 = 0x02;

const SIGN_FLIP: u64 = 1 << 63;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

/// The persisted schema descriptor: one catalog object per table, keyed by
/// the folded table name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<String>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        let folded = name.to_uppercase();
        self.columns.iter().find(|c| c.name == folded)
    }

    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        bincode::serialize(self)
            .map_err(|e| EngineError::Storage(strata::StorageError::CorruptedPage(e.to_string())))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        bincode::deserialize(bytes)
            .map_err(|e| EngineError::Storage(strata::StorageError::CorruptedPage(e.to_string())))
    }
}

/// The catalog key for a table name (names are folded to uppercase before
/// they reach the key space).
pub fn catalog_key(name: &str) -> Vec<u8> {
    let mut key = vec![CATALOG_PREFIX];
    key.extend_from_slice(name.as_bytes());
    key
}

/// The half-open key range holding every catalog record.
pub fn catalog_bounds() -> (Vec<u8>, Vec<u8>) {
    (vec![CATALOG_PREFIX], vec![CATALOG_PREFIX + 1])
}

/// A row key: prefix, table identifier, then the row identifier with its
/// sign bit flipped so negative primary keys sort before positive ones.
pub fn row_key(table_id: TableId, row_id: i64) -> Vec<u8> {
    let mut key = vec![ROW_PREFIX];
    key.extend_from_slice(&table_id.to_be_bytes());
    key.extend_from_slice(&((row_id as u64) ^ SIGN_FLIP).to_be_bytes());
    key
}

/// Recovers the row identifier from a row key.
pub fn row_id_of(key: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&key[5..13]);
    (u64::from_be_bytes(raw) ^ SIGN_FLIP) as i64
}

/// The half-open key range holding every row of one table.
pub fn table_bounds(table_id: TableId) -> (Vec<u8>, Vec<u8>) {
    let mut start = vec![ROW_PREFIX];
    start.extend_from_slice(&table_id.to_be_bytes());
    let end = match table_id.checked_add(1) {
        Some(next) => {
            let mut end = vec![ROW_PREFIX];
            end.extend_from_slice(&next.to_be_bytes());
            end
        }
        None => vec![ROW_PREFIX + 1],
    };
    (start, end)
}
