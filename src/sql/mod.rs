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

//! The SQL session: parses statements, dispatches to the planner, and
//! owns the per-connection arena and transaction state. One session per
//! connection, living on its own engine thread.

pub mod expr;
pub mod planner;

use std::time::{SystemTime, UNIX_EPOCH};

use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::arena::Arena;
use crate::schema::Db;
use crate::temporal::{PG_EPOCH_UNIX, USEC_PER_SEC};
use crate::txn::TxnManager;
use crate::value::{Cell, ColumnType};
use crate::{DbError, DbResult};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One output column of a result set.
#[derive(Debug, Clone)]
pub struct OutCol {
    pub name: String,
    pub ty: ColumnType,
}

/// A materialized result set.
#[derive(Debug)]
pub struct QueryOutput {
    pub columns: Vec<OutCol>,
    pub rows: Vec<Vec<Cell>>,
}

/// What one executed statement produced.
#[derive(Debug)]
pub enum StatementOutcome {
    Rows(QueryOutput),
    /// DDL/DML completion: command tag plus an optional row count.
    Command { tag: String, rows: Option<usize> },
    Begin,
    /// `committed` is false when COMMIT closed an aborted transaction
    /// (reported to the client as ROLLBACK).
    Commit { committed: bool },
    Rollback,
}

/// Microseconds since 2000-01-01 00:00:00 UTC.
pub fn now_usec() -> i64 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    unix - PG_EPOCH_UNIX * USEC_PER_SEC
}

fn parse_sql(sql: &str) -> DbResult<Vec<Statement>> {
    let dialect = PostgreSqlDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| DbError::syntax(e.to_string()))
}

fn looks_like_type_ddl(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    upper.contains("CREATE TYPE") || upper.contains("DROP TYPE")
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Per-connection session state. The arena brackets one protocol
/// message; prepared statements and portals live in the wire layer and
/// own their SQL text outside of it.
pub struct Session {
    pub db: Db,
    arena: Arena,
    pub txn: TxnManager,
    pub user: Option<String>,
    pub database_param: Option<String>,
}

impl Session {
    pub fn new(db: Db) -> Self {
        Session {
            db,
            arena: Arena::new(),
            txn: TxnManager::new(),
            user: None,
            database_param: None,
        }
    }

    /// Execute a Simple Query batch: every statement in order, stopping
    /// at the first error. Returns the outcomes produced so far plus
    /// the error, if any.
    pub fn execute_batch(&mut self, sql: &str) -> (Vec<StatementOutcome>, Option<DbError>) {
        self.arena.reset();
        let stmts = match parse_sql(sql) {
            Ok(s) => s,
            Err(e) => {
                // CREATE TYPE ... AS ENUM may predate the parser's
                // grammar; fall back to statement-wise raw handling
                if looks_like_type_ddl(sql) {
                    return self.execute_raw_batch(sql);
                }
                return (Vec::new(), Some(e));
            }
        };
        let mut outcomes = Vec::new();
        for stmt in &stmts {
            match self.execute_parsed(stmt, &[]) {
                Ok(o) => outcomes.push(o),
                Err(e) => return (outcomes, Some(e)),
            }
        }
        (outcomes, None)
    }

    fn execute_raw_batch(&mut self, sql: &str) -> (Vec<StatementOutcome>, Option<DbError>) {
        let mut outcomes = Vec::new();
        for piece in sql.split(';') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            match self.execute_raw(piece) {
                Ok(o) => outcomes.push(o),
                Err(e) => return (outcomes, Some(e)),
            }
        }
        (outcomes, None)
    }

    /// Execute a single statement that may not be parseable by
    /// sqlparser (enum type DDL).
    fn execute_raw(&mut self, text: &str) -> DbResult<StatementOutcome> {
        if let Ok(stmts) = parse_sql(text) {
            if let Some(stmt) = stmts.first() {
                return self.execute_parsed(stmt, &[]);
            }
        }
        self.txn.reject_if_failed()?;
        let mark = self.txn.mark();
        let now = now_usec();
        let result = {
            let Session {
                db, arena, txn, ..
            } = &mut *self;
            let mut ctx = planner::StatementCtx {
                db,
                arena,
                txn,
                params: &[],
                now_usec: now,
            };
            planner::execute_type_ddl(&mut ctx, text)
        };
        match result {
            Ok(Some(outcome)) => {
                self.txn.finish_statement();
                Ok(outcome)
            }
            Ok(None) => Err(DbError::syntax(format!(
                "syntax error at or near \"{}\"",
                text.split_whitespace().next().unwrap_or("")
            ))),
            Err(e) => {
                let mut guard = self.db.write();
                self.txn.abort_statement(&mut guard, mark);
                drop(guard);
                Err(e)
            }
        }
    }

    /// Convenience wrapper for engine-level tests: run a batch, require
    /// success, return the outcomes.
    pub fn execute(&mut self, sql: &str) -> DbResult<Vec<StatementOutcome>> {
        let (outcomes, err) = self.execute_batch(sql);
        match err {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// Extended-protocol execution: a single statement with bound
    /// parameters, re-planned on every call. `None` means the SQL was
    /// empty (EmptyQueryResponse).
    pub fn execute_extended(
        &mut self,
        sql: &str,
        params: &[Cell],
    ) -> DbResult<Option<StatementOutcome>> {
        self.arena.reset();
        let stmts = match parse_sql(sql) {
            Ok(s) => s,
            Err(e) => {
                if looks_like_type_ddl(sql) {
                    return self.execute_raw(sql).map(Some);
                }
                return Err(e);
            }
        };
        let mut iter = stmts.iter();
        let stmt = match iter.next() {
            Some(s) => s,
            None => return Ok(None),
        };
        if iter.next().is_some() {
            return Err(DbError::syntax(
                "cannot insert multiple commands into a prepared statement",
            ));
        }
        self.execute_parsed(stmt, params).map(Some)
    }

    /// Describe a prepared statement's result shape. SELECT-shaped
    /// statements go through the planner's static output-schema
    /// inference — nothing executes on Describe — and everything else
    /// reports no data. Parameter slots are typed as NULL literals.
    pub fn describe(&mut self, sql: &str, nparams: usize) -> DbResult<Option<Vec<OutCol>>> {
        self.arena.reset();
        let stmts = parse_sql(sql)?;
        let stmt = match stmts.first() {
            Some(s) => s,
            None => return Ok(None),
        };
        if !matches!(stmt, Statement::Query(_)) {
            return Ok(None);
        }
        let nulls = vec![Cell::Null; nparams];
        let now = now_usec();
        let Session {
            db, arena, txn, ..
        } = &mut *self;
        let mut ctx = planner::StatementCtx {
            db,
            arena,
            txn,
            params: &nulls,
            now_usec: now,
        };
        planner::describe_statement(&mut ctx, stmt)
    }

    fn execute_parsed(&mut self, stmt: &Statement, params: &[Cell]) -> DbResult<StatementOutcome> {
        // transaction control bypasses the failed-transaction gate
        match stmt {
            Statement::StartTransaction { .. } => {
                self.txn.reject_if_failed()?;
                self.txn.begin(&self.db);
                return Ok(StatementOutcome::Begin);
            }
            Statement::Commit { .. } => {
                let committed = self.txn.commit(&self.db);
                return Ok(StatementOutcome::Commit { committed });
            }
            Statement::Rollback { .. } => {
                self.txn.rollback(&self.db);
                return Ok(StatementOutcome::Rollback);
            }
            _ => {}
        }
        self.txn.reject_if_failed()?;

        let mark = self.txn.mark();
        let now = now_usec();
        let result = {
            let Session {
                db, arena, txn, ..
            } = &mut *self;
            let mut ctx = planner::StatementCtx {
                db,
                arena,
                txn,
                params,
                now_usec: now,
            };
            planner::execute_statement(&mut ctx, stmt)
        };
        match result {
            Ok(outcome) => {
                self.txn.finish_statement();
                Ok(outcome)
            }
            Err(e) => {
                let mut guard = self.db.write();
                self.txn.abort_statement(&mut guard, mark);
                drop(guard);
                Err(e)
            }
        }
    }

    /// Teardown hook: invoked on Terminate, EOF or abrupt disconnect.
    /// Leaves the shared database as a ROLLBACK would (invariant: the
    /// state after teardown equals the state before the transaction's
    /// first mutation).
    pub fn teardown(&mut self) {
        self.txn.teardown(&self.db);
        self.arena.reset();
    }

    /// Current ReadyForQuery status byte: I, T or E.
    pub fn status_byte(&self) -> u8 {
        self.txn.status_byte()
    }
}
