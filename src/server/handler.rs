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

//! PG wire protocol handlers bridging pgwire traits to the engine.
//!
//! Architecture: each connection owns a dedicated OS thread running the
//! `Session` (arena, transaction state). The async pgwire handlers talk
//! to it over a channel with oneshot replies, so the Simple and
//! Extended sub-protocols of one connection share a single transaction
//! state. When the connection goes away — cleanly or abruptly — the
//! channel closes and the engine thread runs the rollback teardown
//! before exiting.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::sink::Sink;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DescribePortalResponse, DescribeStatementResponse, DescribeResponse, FieldInfo, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::ClientPortalStore;
use pgwire::api::{ClientInfo, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tracing::{debug, info, warn};

use super::encode;
use crate::schema::Db;
use crate::sql::{OutCol, Session, StatementOutcome};
use crate::value::Cell;
use crate::DbError;

// ---------------------------------------------------------------------------
// Engine thread
// ---------------------------------------------------------------------------

enum EngineRequest {
    Startup {
        user: Option<String>,
        database: Option<String>,
    },
    Simple {
        sql: String,
        reply: tokio::sync::oneshot::Sender<(Vec<StatementOutcome>, Option<DbError>)>,
    },
    Extended {
        sql: String,
        params: Vec<Cell>,
        reply: tokio::sync::oneshot::Sender<Result<Option<StatementOutcome>, DbError>>,
    },
    Describe {
        sql: String,
        nparams: usize,
        reply: tokio::sync::oneshot::Sender<Result<Option<Vec<OutCol>>, DbError>>,
    },
}

/// A Send-safe handle to a `Session` running on a dedicated OS thread.
/// Dropping the last clone closes the channel; the engine thread then
/// invokes the transaction teardown hook (rollback) and exits.
#[derive(Clone)]
pub struct SessionBridge {
    tx: std::sync::mpsc::Sender<EngineRequest>,
}

impl SessionBridge {
    pub fn spawn(db: Db) -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<EngineRequest>();

        std::thread::spawn(move || {
            let mut session = Session::new(db);
            while let Ok(req) = rx.recv() {
                match req {
                    EngineRequest::Startup { user, database } => {
                        info!(user = ?user, database = ?database, "session started");
                        session.user = user;
                        session.database_param = database;
                    }
                    EngineRequest::Simple { sql, reply } => {
                        debug!(sql = %sql, "simple query");
                        let _ = reply.send(session.execute_batch(&sql));
                    }
                    EngineRequest::Extended { sql, params, reply } => {
                        debug!(sql = %sql, nparams = params.len(), "extended query");
                        let _ = reply.send(session.execute_extended(&sql, &params));
                    }
                    EngineRequest::Describe {
                        sql,
                        nparams,
                        reply,
                    } => {
                        let _ = reply.send(session.describe(&sql, nparams));
                    }
                }
            }
            // connection gone: roll back any open transaction
            session.teardown();
            debug!("session torn down");
        });

        SessionBridge { tx }
    }

    fn send(&self, req: EngineRequest) -> PgWireResult<()> {
        self.tx
            .send(req)
            .map_err(|_| api_error("engine thread stopped"))
    }

    async fn simple(&self, sql: String) -> PgWireResult<(Vec<StatementOutcome>, Option<DbError>)> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(EngineRequest::Simple { sql, reply: tx })?;
        rx.await.map_err(|_| api_error("engine thread dropped reply"))
    }

    async fn extended(
        &self,
        sql: String,
        params: Vec<Cell>,
    ) -> PgWireResult<Result<Option<StatementOutcome>, DbError>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(EngineRequest::Extended {
            sql,
            params,
            reply: tx,
        })?;
        rx.await.map_err(|_| api_error("engine thread dropped reply"))
    }

    async fn describe(
        &self,
        sql: String,
        nparams: usize,
    ) -> PgWireResult<Result<Option<Vec<OutCol>>, DbError>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(EngineRequest::Describe {
            sql,
            nparams,
            reply: tx,
        })?;
        rx.await.map_err(|_| api_error("engine thread dropped reply"))
    }
}

fn api_error(msg: &str) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "FATAL".to_string(),
        "XX000".to_string(),
        msg.to_string(),
    )))
}

fn db_error(e: &DbError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".to_string(),
        e.sqlstate.to_string(),
        e.message.clone(),
    )))
}

// ---------------------------------------------------------------------------
// Outcome → Response mapping
// ---------------------------------------------------------------------------

fn outcome_response(
    outcome: StatementOutcome,
    fmt: Option<&Format>,
) -> PgWireResult<Response> {
    Ok(match outcome {
        StatementOutcome::Rows(out) => {
            Response::Query(encode::encode_rows(&out.columns, out.rows, fmt)?)
        }
        StatementOutcome::Command { tag, rows } => {
            let t = match rows {
                Some(n) => Tag::new(&tag).with_rows(n),
                None => Tag::new(&tag),
            };
            Response::Execution(t)
        }
        StatementOutcome::Begin => Response::TransactionStart(Tag::new("BEGIN")),
        StatementOutcome::Commit { committed } => {
            Response::TransactionEnd(Tag::new(if committed { "COMMIT" } else { "ROLLBACK" }))
        }
        StatementOutcome::Rollback => Response::TransactionEnd(Tag::new("ROLLBACK")),
    })
}

// ---------------------------------------------------------------------------
// Prepared statements
// ---------------------------------------------------------------------------

/// A parsed (stored) statement: the raw SQL plus the parameter types
/// the client declared, padded with VARCHAR for undeclared `$n` slots.
/// The engine re-plans from the text on every execution — plans are
/// never cached across Bind.
#[derive(Debug, Clone)]
pub struct PreparedSql {
    pub sql: String,
    pub param_types: Vec<Type>,
}

/// Count `$n` placeholders outside single-quoted literals.
fn count_placeholders(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut in_str = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_str = !in_str,
            b'$' if !in_str => {
                let mut j = i + 1;
                let mut n = 0usize;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    n = n * 10 + (bytes[j] - b'0') as usize;
                    j += 1;
                }
                if j > i + 1 {
                    max = max.max(n);
                    i = j;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    max
}

pub struct MskqlQueryParser;

#[async_trait]
impl QueryParser for MskqlQueryParser {
    type Statement = PreparedSql;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        types: &[Option<Type>],
    ) -> PgWireResult<PreparedSql>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        let nparams = count_placeholders(sql).max(types.len());
        let param_types = (0..nparams)
            .map(|i| {
                types
                    .get(i)
                    .and_then(|t| t.clone())
                    .unwrap_or(Type::VARCHAR)
            })
            .collect();
        Ok(PreparedSql {
            sql: sql.to_string(),
            param_types,
        })
    }

    fn get_parameter_types(&self, stmt: &PreparedSql) -> PgWireResult<Vec<Type>> {
        Ok(stmt.param_types.clone())
    }

    fn get_result_schema(
        &self,
        _stmt: &PreparedSql,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        // the handler's do_describe_* answer from the engine instead
        Ok(vec![])
    }
}

/// Decode bound parameters per declared type; everything that is not a
/// native integer/float/bool arrives as text.
fn decode_params(portal: &Portal<PreparedSql>) -> PgWireResult<Vec<Cell>> {
    let types = &portal.statement.parameter_types;
    let n = portal.parameter_len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let ty = types.get(i).cloned().flatten().unwrap_or(Type::VARCHAR);
        let cell = if ty == Type::INT2 {
            portal.parameter::<i16>(i, &ty)?.map(Cell::SmallInt)
        } else if ty == Type::INT4 {
            portal.parameter::<i32>(i, &ty)?.map(Cell::Int)
        } else if ty == Type::INT8 {
            portal.parameter::<i64>(i, &ty)?.map(Cell::BigInt)
        } else if ty == Type::FLOAT4 {
            portal
                .parameter::<f32>(i, &ty)?
                .map(|v| Cell::Float(v as f64))
        } else if ty == Type::FLOAT8 {
            portal.parameter::<f64>(i, &ty)?.map(Cell::Float)
        } else if ty == Type::BOOL {
            portal.parameter::<bool>(i, &ty)?.map(Cell::Bool)
        } else {
            portal.parameter::<String>(i, &ty)?.map(Cell::Text)
        };
        out.push(cell.unwrap_or(Cell::Null));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Query handlers
// ---------------------------------------------------------------------------

/// Per-connection handler: both sub-protocols share one engine thread.
pub struct MskqlHandler {
    bridge: SessionBridge,
}

#[async_trait]
impl SimpleQueryHandler for MskqlHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        let (outcomes, err) = self.bridge.simple(query.to_string()).await?;

        let mut responses = Vec::with_capacity(outcomes.len() + 1);
        for outcome in outcomes {
            responses.push(outcome_response(outcome, None)?);
        }
        match err {
            Some(e) => {
                // the rest of the batch is abandoned after an error
                warn!(sqlstate = e.sqlstate, "query failed: {}", e.message);
                responses.push(Response::Error(Box::new(ErrorInfo::new(
                    "ERROR".to_string(),
                    e.sqlstate.to_string(),
                    e.message,
                ))));
            }
            None => {
                if responses.is_empty() {
                    responses.push(Response::EmptyQuery);
                }
            }
        }
        Ok(responses)
    }
}

#[async_trait]
impl ExtendedQueryHandler for MskqlHandler {
    type Statement = PreparedSql;
    type QueryParser = MskqlQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        Arc::new(MskqlQueryParser)
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<PreparedSql>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = PreparedSql>,
        C::Error: Debug,
        PgWireError: From<<C as Sink<PgWireBackendMessage>>::Error>,
    {
        let sql = portal.statement.statement.sql.clone();
        let params = decode_params(portal)?;

        match self.bridge.extended(sql, params).await? {
            Ok(Some(outcome)) => outcome_response(outcome, Some(&portal.result_column_format)),
            Ok(None) => Ok(Response::EmptyQuery),
            Err(e) => Err(db_error(&e)),
        }
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        statement: &StoredStatement<PreparedSql>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = PreparedSql>,
        C::Error: Debug,
        PgWireError: From<<C as Sink<PgWireBackendMessage>>::Error>,
    {
        let prepared = &statement.statement;
        let cols = self
            .bridge
            .describe(prepared.sql.clone(), prepared.param_types.len())
            .await?
            .map_err(|e| db_error(&e))?;
        let fields = match cols {
            Some(cols) => encode::row_schema(&cols, None),
            None => Vec::new(),
        };
        Ok(DescribeStatementResponse::new(
            prepared.param_types.clone(),
            fields,
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        portal: &Portal<PreparedSql>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = PreparedSql>,
        C::Error: Debug,
        PgWireError: From<<C as Sink<PgWireBackendMessage>>::Error>,
    {
        let prepared = &portal.statement.statement;
        let cols = self
            .bridge
            .describe(prepared.sql.clone(), prepared.param_types.len())
            .await?
            .map_err(|e| db_error(&e))?;
        match cols {
            Some(cols) => Ok(DescribePortalResponse::new(encode::row_schema(
                &cols,
                Some(&portal.result_column_format),
            ))),
            None => Ok(DescribePortalResponse::no_data()),
        }
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Captures startup parameters (at least `user` and `database`) into
/// the session and answers with the standard ParameterStatus set.
pub struct MskqlStartupHandler {
    bridge: SessionBridge,
}

#[async_trait]
impl StartupHandler for MskqlStartupHandler {
    async fn on_startup<C>(
        &self,
        client: &mut C,
        message: pgwire::messages::PgWireFrontendMessage,
    ) -> PgWireResult<()>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<<C as Sink<PgWireBackendMessage>>::Error>,
    {
        if let pgwire::messages::PgWireFrontendMessage::Startup(ref startup) = message {
            pgwire::api::auth::protocol_negotiation(client, startup).await?;
            pgwire::api::auth::save_startup_parameters_to_metadata(client, startup);

            let user = client.metadata().get("user").cloned();
            let database = client.metadata().get("database").cloned();
            self.bridge.send(EngineRequest::Startup { user, database })?;

            let mut params = DefaultServerParameterProvider::default();
            params.server_version = "15.0".to_string();
            params.date_style = "ISO, MDY".to_string();
            pgwire::api::auth::finish_authentication(client, &params).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler set
// ---------------------------------------------------------------------------

/// One of these is built per accepted connection; the Simple and
/// Extended handlers share the same engine thread through the bridge.
pub struct ConnectionHandlers {
    handler: Arc<MskqlHandler>,
    startup: Arc<MskqlStartupHandler>,
}

impl ConnectionHandlers {
    pub fn new(db: Db) -> Self {
        let bridge = SessionBridge::spawn(db);
        ConnectionHandlers {
            handler: Arc::new(MskqlHandler {
                bridge: bridge.clone(),
            }),
            startup: Arc::new(MskqlStartupHandler { bridge }),
        }
    }
}

impl PgWireServerHandlers for ConnectionHandlers {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.startup.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_counting() {
        assert_eq!(count_placeholders("SELECT 1"), 0);
        assert_eq!(count_placeholders("SELECT * FROM t WHERE a = $1 AND b = $2"), 2);
        assert_eq!(count_placeholders("SELECT '$9' || $3"), 3);
        assert_eq!(count_placeholders("SELECT $10"), 10);
    }
}
