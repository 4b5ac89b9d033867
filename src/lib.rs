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

//! mskql: an in-memory relational engine that speaks the PostgreSQL
//! frontend/backend wire protocol.
//!
//! Standard PostgreSQL drivers connect over TCP and issue DDL, DML and
//! SELECT statements. The engine parses SQL with `sqlparser`, executes
//! against columnar row blocks bump-allocated from a per-message arena,
//! and streams results back through `pgwire`.

pub mod arena;
pub mod block;
pub mod catalog;
pub mod exec;
pub mod schema;
pub mod server;
pub mod sql;
pub mod temporal;
pub mod txn;
pub mod value;

pub use schema::{Database, Db};
pub use sql::Session;
pub use value::{Cell, ColumnType};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Broad classification of engine errors; each kind maps to a default
/// five-character SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    TypeMismatch,
    ConstraintViolation,
    UndefinedObject,
    InvalidTransactionState,
    FeatureNotSupported,
    ProtocolViolation,
    ResourceExhausted,
    InternalAssertion,
}

impl ErrorKind {
    pub fn default_sqlstate(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "42601",
            ErrorKind::TypeMismatch => "42804",
            ErrorKind::ConstraintViolation => "23514",
            ErrorKind::UndefinedObject => "42704",
            ErrorKind::InvalidTransactionState => "25P02",
            ErrorKind::FeatureNotSupported => "0A000",
            ErrorKind::ProtocolViolation => "08P01",
            ErrorKind::ResourceExhausted => "53200",
            ErrorKind::InternalAssertion => "XX000",
        }
    }
}

/// An engine error: kind, SQLSTATE, human message and optional statement
/// position. Unwinds from the executor to the session, which encodes it
/// as an ErrorResponse.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DbError {
    pub kind: ErrorKind,
    pub sqlstate: &'static str,
    pub message: String,
    pub position: Option<usize>,
}

impl DbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        DbError {
            kind,
            sqlstate: kind.default_sqlstate(),
            message: message.into(),
            position: None,
        }
    }

    /// Build an error with a SQLSTATE more specific than the kind default.
    pub fn with_code(kind: ErrorKind, sqlstate: &'static str, message: impl Into<String>) -> Self {
        DbError {
            kind,
            sqlstate,
            message: message.into(),
            position: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, message)
    }

    pub fn invalid_text(message: impl Into<String>) -> Self {
        Self::with_code(ErrorKind::TypeMismatch, "22P02", message)
    }

    pub fn division_by_zero() -> Self {
        Self::with_code(ErrorKind::TypeMismatch, "22012", "division by zero")
    }

    pub fn numeric_out_of_range(message: impl Into<String>) -> Self {
        Self::with_code(ErrorKind::TypeMismatch, "22003", message)
    }

    pub fn not_null_violation(message: impl Into<String>) -> Self {
        Self::with_code(ErrorKind::ConstraintViolation, "23502", message)
    }

    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::with_code(ErrorKind::ConstraintViolation, "23505", message)
    }

    pub fn fk_violation(message: impl Into<String>) -> Self {
        Self::with_code(ErrorKind::ConstraintViolation, "23503", message)
    }

    pub fn check_violation(message: impl Into<String>) -> Self {
        Self::with_code(ErrorKind::ConstraintViolation, "23514", message)
    }

    pub fn undefined_table(name: &str) -> Self {
        Self::with_code(
            ErrorKind::UndefinedObject,
            "42P01",
            format!("relation \"{name}\" does not exist"),
        )
    }

    pub fn undefined_column(name: &str) -> Self {
        Self::with_code(
            ErrorKind::UndefinedObject,
            "42703",
            format!("column \"{name}\" does not exist"),
        )
    }

    pub fn duplicate_table(name: &str) -> Self {
        Self::with_code(
            ErrorKind::ConstraintViolation,
            "42P07",
            format!("relation \"{name}\" already exists"),
        )
    }

    pub fn failed_transaction() -> Self {
        Self::new(
            ErrorKind::InvalidTransactionState,
            "current transaction is aborted, commands ignored until end of transaction block",
        )
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FeatureNotSupported, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalAssertion, message)
    }
}

pub type DbResult<T> = Result<T, DbError>;
