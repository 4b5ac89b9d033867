//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

//! Schema objects: column descriptors, tables with row storage and
//! single-column indexes, the enum-type registry, and the `Database`
//! that owns them all behind one exclusive write lock.
//!
//! Tables are referenced by stable name (and by position for catalog
//! OID synthesis); foreign keys store `(table, column)` names rather
//! than pointers so the schema graph may contain cycles.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use crate::value::{Cell, ColumnType};

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Action taken on referencing rows when a referenced row is deleted or
/// its key updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

/// Schema-lifetime column descriptor; immutable between DDL operations.
#[derive(Debug, Clone)]
pub struct ColumnDesc {
    pub name: String,
    pub ty: ColumnType,
    /// Enum type name when `ty` is `Enum`.
    pub enum_type: Option<String>,
    pub not_null: bool,
    /// DEFAULT expression, evaluated at DDL time.
    pub default: Option<Cell>,
    pub is_unique: bool,
    pub is_primary_key: bool,
    /// SERIAL / BIGSERIAL auto-increment.
    pub is_serial: bool,
    pub serial_next: i64,
    pub fk: Option<ForeignKey>,
    /// Raw SQL text of the CHECK body.
    pub check_sql: Option<String>,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        ColumnDesc {
            name: name.into(),
            ty,
            enum_type: None,
            not_null: false,
            default: None,
            is_unique: false,
            is_primary_key: false,
            is_serial: false,
            serial_next: 1,
            fk: None,
            check_sql: None,
        }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.is_serial
    }
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Hash,
    Ordered,
}

/// Orderable, hashable projection of a non-NULL cell for index keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexKey {
    Int(i64),
    /// f64 bits remapped so unsigned order matches numeric order.
    Float(u64),
    Str(String),
    Uuid(Uuid),
    Interval(i64),
}

impl IndexKey {
    pub fn from_cell(cell: &Cell) -> Option<IndexKey> {
        match cell {
            Cell::Null => None,
            Cell::Float(v) => {
                let bits = v.to_bits();
                let ordered = if bits & (1 << 63) != 0 {
                    !bits
                } else {
                    bits | (1 << 63)
                };
                Some(IndexKey::Float(ordered))
            }
            Cell::Text(s) => Some(IndexKey::Str(s.clone())),
            Cell::Uuid(u) => Some(IndexKey::Uuid(*u)),
            Cell::Interval(iv) => Some(IndexKey::Interval(iv.approx_usec())),
            other => other.as_i64().map(IndexKey::Int),
        }
    }
}

/// Single-column index. The map is rebuilt from row storage after every
/// mutating statement on the table, so readers can seek without
/// interior mutability.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub column: usize,
    pub unique: bool,
    pub kind: IndexKind,
    pub map: BTreeMap<IndexKey, Vec<usize>>,
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// A table: ordered columns, row-major storage, indexes, optional view
/// SQL (views carry no rows), and a generation counter bumped on DDL to
/// invalidate anything cached against the old descriptor set.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDesc>,
    pub rows: Vec<Vec<Cell>>,
    pub indexes: Vec<IndexDef>,
    pub view_sql: Option<String>,
    pub generation: u64,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        TableDef {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            indexes: Vec::new(),
            view_sql: None,
            generation: 0,
        }
    }

    pub fn is_view(&self) -> bool {
        self.view_sql.is_some()
    }

    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }

    /// Find the index on `column`, if any.
    pub fn index_on(&self, column: usize) -> Option<&IndexDef> {
        self.indexes.iter().find(|ix| ix.column == column)
    }

    /// Rebuild every index map from row storage.
    pub fn rebuild_indexes(&mut self) {
        for ix in &mut self.indexes {
            ix.map.clear();
        }
        for (row_i, row) in self.rows.iter().enumerate() {
            for ix in &mut self.indexes {
                if let Some(key) = row.get(ix.column).and_then(IndexKey::from_cell) {
                    ix.map.entry(key).or_default().push(row_i);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Enum types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

impl EnumType {
    pub fn ordinal(&self, label: &str) -> Option<i32> {
        self.values.iter().position(|v| v == label).map(|i| i as i32)
    }

    pub fn label(&self, ordinal: i32) -> Option<&str> {
        self.values.get(ordinal as usize).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// The database: ordered tables (user plus catalog mirrors), the enum
/// registry, and a diagnostic count of open transactions. Session
/// transaction state lives on the session, never here.
pub struct Database {
    pub name: String,
    pub tables: Vec<TableDef>,
    pub enums: Vec<EnumType>,
    pub open_transactions: u64,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Database {
            name: name.into(),
            tables: Vec::new(),
            enums: Vec::new(),
            open_transactions: 0,
        }
    }

    pub fn table_index(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name == name)
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableDef> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn enum_type(&self, name: &str) -> Option<&EnumType> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Labels for an enum column, for ordinal → text rendering.
    pub fn enum_labels(&self, col: &ColumnDesc) -> Option<&[String]> {
        col.enum_type
            .as_deref()
            .and_then(|n| self.enum_type(n))
            .map(|e| e.values.as_slice())
    }
}

/// Shared handle: one exclusive write lock guards all schema and row
/// mutation; readers share. Lock poisoning is absorbed — a panicking
/// writer aborts its statement but the store stays reachable.
#[derive(Clone)]
pub struct Db {
    inner: Arc<RwLock<Database>>,
}

impl Db {
    pub fn new(name: impl Into<String>) -> Self {
        Db {
            inner: Arc::new(RwLock::new(Database::new(name))),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Database> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Database> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_rebuild_tracks_rows() {
        let mut t = TableDef::new("t");
        t.columns.push(ColumnDesc::new("id", ColumnType::Int));
        t.indexes.push(IndexDef {
            name: "t_id_idx".into(),
            column: 0,
            unique: false,
            kind: IndexKind::Hash,
            map: BTreeMap::new(),
        });
        t.rows.push(vec![Cell::Int(1)]);
        t.rows.push(vec![Cell::Int(2)]);
        t.rows.push(vec![Cell::Int(1)]);
        t.rows.push(vec![Cell::Null]);
        t.rebuild_indexes();

        let ix = &t.indexes[0];
        assert_eq!(ix.map.get(&IndexKey::Int(1)), Some(&vec![0, 2]));
        assert_eq!(ix.map.get(&IndexKey::Int(2)), Some(&vec![1]));
        // NULL keys are never indexed
        assert_eq!(ix.map.len(), 2);
    }

    #[test]
    fn float_index_keys_order_numerically() {
        let a = IndexKey::from_cell(&Cell::Float(-1.5)).unwrap();
        let b = IndexKey::from_cell(&Cell::Float(0.0)).unwrap();
        let c = IndexKey::from_cell(&Cell::Float(2.25)).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn enum_ordinals() {
        let e = EnumType {
            name: "mood".into(),
            values: vec!["sad".into(), "ok".into(), "happy".into()],
        };
        assert_eq!(e.ordinal("ok"), Some(1));
        assert_eq!(e.label(2), Some("happy"));
        assert_eq!(e.ordinal("angry"), None);
    }
}
