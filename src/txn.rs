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

//! Per-connection transaction state and the undo log.
//!
//! State is strictly local to one session. Every DML/DDL operation
//! appends the information needed to revert it; COMMIT discards the
//! log, ROLLBACK (and abrupt session teardown) replays it in reverse
//! order under the database write lock. Statements are atomic even
//! outside an explicit transaction: a failing statement rewinds the
//! log to its start mark.

use crate::schema::{Database, Db, EnumType, IndexDef, TableDef};
use crate::value::Cell;
use crate::{DbError, DbResult};

/// Session transaction state; drives the ReadyForQuery status byte
/// (`I` / `T` / `E`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Idle,
    InTransaction,
    Failed,
}

/// One reversible mutation. Tables are addressed by name: positions can
/// shift when catalog mirrors are rebuilt, names cannot.
#[derive(Debug)]
pub enum UndoOp {
    /// Rows appended at `[start, start + count)`; serial counters to
    /// restore as `(column, previous_next)` pairs.
    Insert {
        table: String,
        start: usize,
        count: usize,
        serials: Vec<(usize, i64)>,
    },
    /// Rows removed, with their original positions in ascending order.
    Delete {
        table: String,
        rows: Vec<(usize, Vec<Cell>)>,
    },
    /// Original images of rewritten rows.
    Update {
        table: String,
        rows: Vec<(usize, Vec<Cell>)>,
    },
    CreateTable {
        name: String,
    },
    DropTable {
        position: usize,
        def: TableDef,
    },
    CreateIndex {
        table: String,
        index: String,
    },
    DropIndex {
        table: String,
        position: usize,
        def: IndexDef,
    },
    CreateEnum {
        name: String,
    },
    DropEnum {
        position: usize,
        def: EnumType,
    },
}

fn apply_undo(db: &mut Database, op: UndoOp) {
    match op {
        UndoOp::Insert {
            table,
            start,
            count,
            serials,
        } => {
            if let Some(t) = db.table_mut(&table) {
                let end = (start + count).min(t.rows.len());
                if start < end {
                    t.rows.drain(start..end);
                }
                for (col, prev) in serials {
                    if let Some(c) = t.columns.get_mut(col) {
                        c.serial_next = prev;
                    }
                }
                t.rebuild_indexes();
            }
        }
        UndoOp::Delete { table, rows } => {
            if let Some(t) = db.table_mut(&table) {
                for (pos, row) in rows {
                    let pos = pos.min(t.rows.len());
                    t.rows.insert(pos, row);
                }
                t.rebuild_indexes();
            }
        }
        UndoOp::Update { table, rows } => {
            if let Some(t) = db.table_mut(&table) {
                for (pos, row) in rows {
                    if pos < t.rows.len() {
                        t.rows[pos] = row;
                    }
                }
                t.rebuild_indexes();
            }
        }
        UndoOp::CreateTable { name } => {
            if let Some(i) = db.table_index(&name) {
                db.tables.remove(i);
            }
        }
        UndoOp::DropTable { position, def } => {
            let pos = position.min(db.tables.len());
            db.tables.insert(pos, def);
        }
        UndoOp::CreateIndex { table, index } => {
            if let Some(t) = db.table_mut(&table) {
                t.indexes.retain(|ix| ix.name != index);
                t.bump_generation();
            }
        }
        UndoOp::DropIndex {
            table,
            position,
            def,
        } => {
            if let Some(t) = db.table_mut(&table) {
                let pos = position.min(t.indexes.len());
                t.indexes.insert(pos, def);
                t.bump_generation();
                t.rebuild_indexes();
            }
        }
        UndoOp::CreateEnum { name } => {
            if let Some(i) = db.enums.iter().position(|e| e.name == name) {
                db.enums.remove(i);
            }
        }
        UndoOp::DropEnum { position, def } => {
            let pos = position.min(db.enums.len());
            db.enums.insert(pos, def);
        }
    }
}

/// The per-session transaction manager.
pub struct TxnManager {
    pub state: TxnState,
    log: Vec<UndoOp>,
}

impl TxnManager {
    pub fn new() -> Self {
        TxnManager {
            state: TxnState::Idle,
            log: Vec::new(),
        }
    }

    pub fn status_byte(&self) -> u8 {
        match self.state {
            TxnState::Idle => b'I',
            TxnState::InTransaction => b'T',
            TxnState::Failed => b'E',
        }
    }

    pub fn in_explicit_txn(&self) -> bool {
        !matches!(self.state, TxnState::Idle)
    }

    /// A failed transaction rejects everything except COMMIT/ROLLBACK.
    pub fn reject_if_failed(&self) -> DbResult<()> {
        if self.state == TxnState::Failed {
            Err(DbError::failed_transaction())
        } else {
            Ok(())
        }
    }

    pub fn begin(&mut self, db: &Db) {
        // BEGIN inside a transaction is a warning-level no-op in
        // PostgreSQL; we follow suit.
        if self.state == TxnState::Idle {
            self.state = TxnState::InTransaction;
            db.write().open_transactions += 1;
        }
    }

    /// COMMIT. In the Failed state the transaction is rolled back
    /// instead and `false` is returned (commit of an aborted txn).
    pub fn commit(&mut self, db: &Db) -> bool {
        match self.state {
            TxnState::Idle => {
                self.log.clear();
                true
            }
            TxnState::InTransaction => {
                self.log.clear();
                self.state = TxnState::Idle;
                let mut guard = db.write();
                guard.open_transactions = guard.open_transactions.saturating_sub(1);
                true
            }
            TxnState::Failed => {
                self.rollback(db);
                false
            }
        }
    }

    /// ROLLBACK: replay the undo log in reverse under the write lock.
    /// In Idle state this is a successful no-op.
    pub fn rollback(&mut self, db: &Db) {
        let was_open = self.in_explicit_txn();
        let mut guard = db.write();
        while let Some(op) = self.log.pop() {
            apply_undo(&mut guard, op);
        }
        if was_open {
            guard.open_transactions = guard.open_transactions.saturating_sub(1);
        }
        drop(guard);
        self.state = TxnState::Idle;
    }

    /// Position of the log head, taken before each statement.
    pub fn mark(&self) -> usize {
        self.log.len()
    }

    pub fn record(&mut self, op: UndoOp) {
        self.log.push(op);
    }

    /// Statement-level abort: rewind to `mark` using an already-held
    /// write guard, then mark the transaction Failed if one is open.
    pub fn abort_statement(&mut self, db: &mut Database, mark: usize) {
        while self.log.len() > mark {
            if let Some(op) = self.log.pop() {
                apply_undo(db, op);
            }
        }
        if self.state == TxnState::InTransaction {
            self.state = TxnState::Failed;
        }
    }

    /// Successful statement outside an explicit transaction: the
    /// implicit single-statement transaction commits immediately.
    pub fn finish_statement(&mut self) {
        if self.state == TxnState::Idle {
            self.log.clear();
        }
    }

    /// Session teardown (Terminate, EOF, abrupt disconnect): leaves the
    /// database as a ROLLBACK would.
    pub fn teardown(&mut self, db: &Db) {
        self.rollback(db);
    }
}

impl Default for TxnManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDesc;
    use crate::value::ColumnType;

    fn test_db() -> Db {
        let db = Db::new("test");
        {
            let mut guard = db.write();
            let mut t = TableDef::new("t");
            t.columns.push(ColumnDesc::new("id", ColumnType::Int));
            t.rows.push(vec![Cell::Int(1)]);
            guard.tables.push(t);
        }
        db
    }

    #[test]
    fn rollback_reverses_insert() {
        let db = test_db();
        let mut txn = TxnManager::new();
        txn.begin(&db);
        {
            let mut guard = db.write();
            let t = guard.table_mut("t").unwrap();
            let start = t.rows.len();
            t.rows.push(vec![Cell::Int(2)]);
            t.rows.push(vec![Cell::Int(3)]);
            txn.record(UndoOp::Insert {
                table: "t".into(),
                start,
                count: 2,
                serials: vec![],
            });
        }
        assert_eq!(db.read().table("t").unwrap().rows.len(), 3);
        txn.rollback(&db);
        assert_eq!(db.read().table("t").unwrap().rows.len(), 1);
        assert_eq!(txn.state, TxnState::Idle);
    }

    #[test]
    fn rollback_applies_in_reverse_order() {
        let db = test_db();
        let mut txn = TxnManager::new();
        txn.begin(&db);
        {
            let mut guard = db.write();
            let t = guard.table_mut("t").unwrap();
            // update then delete the same row; undo must restore the
            // original image, not the intermediate one
            txn.record(UndoOp::Update {
                table: "t".into(),
                rows: vec![(0, vec![Cell::Int(1)])],
            });
            t.rows[0] = vec![Cell::Int(99)];
            txn.record(UndoOp::Delete {
                table: "t".into(),
                rows: vec![(0, vec![Cell::Int(99)])],
            });
            t.rows.remove(0);
        }
        txn.rollback(&db);
        let guard = db.read();
        assert_eq!(guard.table("t").unwrap().rows, vec![vec![Cell::Int(1)]]);
    }

    #[test]
    fn failed_commit_rolls_back() {
        let db = test_db();
        let mut txn = TxnManager::new();
        txn.begin(&db);
        {
            let mut guard = db.write();
            let t = guard.table_mut("t").unwrap();
            let start = t.rows.len();
            t.rows.push(vec![Cell::Int(7)]);
            txn.record(UndoOp::Insert {
                table: "t".into(),
                start,
                count: 1,
                serials: vec![],
            });
        }
        txn.state = TxnState::Failed;
        assert!(txn.reject_if_failed().is_err());
        let committed = txn.commit(&db);
        assert!(!committed);
        assert_eq!(db.read().table("t").unwrap().rows.len(), 1);
        assert_eq!(txn.state, TxnState::Idle);
    }

    #[test]
    fn ddl_undo() {
        let db = test_db();
        let mut txn = TxnManager::new();
        txn.begin(&db);
        {
            let mut guard = db.write();
            guard.tables.push(TableDef::new("scratch"));
            txn.record(UndoOp::CreateTable {
                name: "scratch".into(),
            });
        }
        assert!(db.read().table("scratch").is_some());
        txn.teardown(&db);
        assert!(db.read().table("scratch").is_none());
    }

    #[test]
    fn status_bytes() {
        let db = test_db();
        let mut txn = TxnManager::new();
        assert_eq!(txn.status_byte(), b'I');
        txn.begin(&db);
        assert_eq!(txn.status_byte(), b'T');
        txn.state = TxnState::Failed;
        assert_eq!(txn.status_byte(), b'E');
    }
}
