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

//! The planner: translates sqlparser statements into executor pipelines
//! (scan → filter → join → group → sort → project) and into DML/DDL
//! against the shared database. Scalar subqueries are resolved to
//! literals before lowering; plans are derived fresh on every call.

use std::collections::HashMap;

use sqlparser::ast::{
    Assignment, AssignmentTarget, CastKind, ColumnDef, ColumnOption, CreateIndex, CreateTable,
    DataType, Delete, Distinct, Expr, FromTable, Function, FunctionArg, FunctionArgExpr,
    FunctionArguments, GroupByExpr, Ident, Insert, Join, JoinConstraint, JoinOperator, ObjectName,
    ObjectType, OrderByExpr, Query, ReferentialAction, Select, SelectItem, SetExpr, Statement,
    TableFactor, TableWithJoins, Value as AstValue, Values,
};

use crate::arena::Arena;
use crate::block::RowBlock;
use crate::catalog;
use crate::exec::{self, dml};
use crate::exec::group::{AggKind, AggSpec};
use crate::exec::join::{hash_join, JoinKind};
use crate::schema::{
    ColumnDesc, Database, Db, EnumType, FkAction, ForeignKey, IndexDef, IndexKind, TableDef,
};
use crate::sql::expr::{
    self, contains_aggregate, expr_default_name, lower_data_type, lower_expr, normalize_sql,
    EmptyRow, LowerCtx, ScalarExpr, SchemaMap,
};
use crate::sql::{OutCol, QueryOutput, StatementOutcome};
use crate::txn::{TxnManager, UndoOp};
use crate::value::{format_cell, Cell, ColumnType};
use crate::{DbError, DbResult};

const MAX_QUERY_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Everything a statement needs from the session.
pub struct StatementCtx<'a> {
    pub db: &'a Db,
    pub arena: &'a Arena,
    pub txn: &'a mut TxnManager,
    pub params: &'a [Cell],
    pub now_usec: i64,
}

/// Read-only environment for planning and running queries under one
/// lock guard.
struct QueryEnv<'e> {
    db: &'e Database,
    arena: &'e Arena,
    params: &'e [Cell],
    now_usec: i64,
}

pub fn execute_statement(
    ctx: &mut StatementCtx<'_>,
    stmt: &Statement,
) -> DbResult<StatementOutcome> {
    match stmt {
        Statement::Query(q) => {
            refresh_catalog_if_referenced(ctx.db, &stmt.to_string());
            let guard = ctx.db.read();
            let env = QueryEnv {
                db: &guard,
                arena: ctx.arena,
                params: ctx.params,
                now_usec: ctx.now_usec,
            };
            plan_query(&env, q, 0).map(StatementOutcome::Rows)
        }
        Statement::Insert(insert) => plan_insert(ctx, insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => plan_update(ctx, table, assignments, selection.as_ref()),
        Statement::Delete(delete) => plan_delete(ctx, delete),
        Statement::CreateTable(create) => plan_create_table(ctx, create),
        Statement::CreateView {
            name,
            query,
            or_replace,
            ..
        } => plan_create_view(ctx, name, query, *or_replace),
        Statement::CreateIndex(ci) => plan_create_index(ctx, ci),
        Statement::Drop {
            object_type,
            if_exists,
            names,
            ..
        } => plan_drop(ctx, object_type, names, *if_exists),
        Statement::SetVariable { .. } | Statement::SetTimeZone { .. } => {
            Ok(StatementOutcome::Command {
                tag: "SET".into(),
                rows: None,
            })
        }
        Statement::ShowVariable { variable } => plan_show(ctx, variable),
        other => {
            let text = other.to_string();
            match execute_type_ddl(ctx, &text)? {
                Some(outcome) => Ok(outcome),
                None => Err(DbError::unsupported(format!(
                    "unsupported statement: {}",
                    text.split_whitespace().take(3).collect::<Vec<_>>().join(" ")
                ))),
            }
        }
    }
}

/// Mirrors are rebuilt before any query that mentions them.
fn refresh_catalog_if_referenced(db: &Db, sql: &str) {
    let lower = sql.to_lowercase();
    if lower.contains("pg_") || lower.contains("information_schema") {
        let mut guard = db.write();
        catalog::refresh(&mut guard);
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn plan_query(env: &QueryEnv<'_>, q: &Query, depth: usize) -> DbResult<QueryOutput> {
    if depth > MAX_QUERY_DEPTH {
        return Err(DbError::internal("query nesting too deep"));
    }
    let limit = eval_count_expr(env, q.limit.as_ref())?;
    let offset = eval_count_expr(env, q.offset.as_ref().map(|o| &o.value))?;
    let order: Vec<OrderByExpr> = q
        .order_by
        .as_ref()
        .map(|o| o.exprs.clone())
        .unwrap_or_default();

    match q.body.as_ref() {
        SetExpr::Select(select) => plan_select(env, select, order, limit, offset, depth),
        SetExpr::Values(values) => plan_values(env, values),
        other => Err(DbError::unsupported(format!(
            "unsupported query body: {other}"
        ))),
    }
}

fn eval_count_expr(env: &QueryEnv<'_>, e: Option<&Expr>) -> DbResult<Option<i64>> {
    let e = match e {
        Some(e) => e,
        None => return Ok(None),
    };
    let empty_schema = SchemaMap::new();
    let empty_enums = HashMap::new();
    let ctx = LowerCtx {
        schema: &empty_schema,
        types: &[],
        params: env.params,
        enum_cols: &empty_enums,
        now_usec: env.now_usec,
        db_name: &env.db.name,
    };
    let v = lower_expr(e, &ctx)?.eval(&EmptyRow)?;
    match v.as_i64() {
        Some(n) if n >= 0 => Ok(Some(n)),
        Some(_) => Err(DbError::syntax("LIMIT/OFFSET must not be negative")),
        None => Err(DbError::syntax("LIMIT/OFFSET must be an integer")),
    }
}

fn plan_values(env: &QueryEnv<'_>, values: &Values) -> DbResult<QueryOutput> {
    let empty_schema = SchemaMap::new();
    let empty_enums = HashMap::new();
    let ctx = LowerCtx {
        schema: &empty_schema,
        types: &[],
        params: env.params,
        enum_cols: &empty_enums,
        now_usec: env.now_usec,
        db_name: &env.db.name,
    };
    let width = values.rows.first().map(|r| r.len()).unwrap_or(0);
    let mut rows = Vec::with_capacity(values.rows.len());
    for row in &values.rows {
        let mut cells = Vec::with_capacity(row.len());
        for e in row {
            cells.push(lower_expr(e, &ctx)?.eval(&EmptyRow)?);
        }
        rows.push(cells);
    }
    let columns = (0..width)
        .map(|i| {
            let ty = rows
                .iter()
                .find_map(|r| r[i].ty_hint())
                .unwrap_or(ColumnType::Text);
            OutCol {
                name: format!("column{}", i + 1),
                ty,
            }
        })
        .collect();
    Ok(QueryOutput { columns, rows })
}

// ---------------------------------------------------------------------------
// FROM resolution
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct InCol {
    name: String,
    qual: Option<String>,
    ty: ColumnType,
    enum_labels: Option<Vec<String>>,
}

struct Input<'a> {
    blocks: Vec<RowBlock<'a>>,
    cols: Vec<InCol>,
}

fn input_schema(cols: &[InCol]) -> (SchemaMap, Vec<ColumnType>, HashMap<usize, Vec<String>>) {
    let mut schema = SchemaMap::new();
    let mut types = Vec::with_capacity(cols.len());
    let mut enums = HashMap::new();
    for (i, c) in cols.iter().enumerate() {
        schema.entry(c.name.clone()).or_insert(i);
        if let Some(q) = &c.qual {
            schema.insert(format!("{q}.{}", c.name), i);
        }
        types.push(c.ty);
        if let Some(labels) = &c.enum_labels {
            enums.insert(i, labels.clone());
        }
    }
    (schema, types, enums)
}

fn resolve_object_name(name: &ObjectName) -> DbResult<String> {
    let parts: Vec<String> = name.0.iter().map(|i| i.value.to_lowercase()).collect();
    match parts.len() {
        1 => Ok(parts[0].clone()),
        2 => catalog::resolve_name(&parts[0], &parts[1])
            .ok_or_else(|| DbError::undefined_table(&parts.join("."))),
        _ => Err(DbError::syntax(format!(
            "improper qualified name: {}",
            parts.join(".")
        ))),
    }
}

fn output_to_input<'a>(env: &QueryEnv<'a>, out: QueryOutput, qual: Option<String>) -> Input<'a> {
    let types: Vec<ColumnType> = out.columns.iter().map(|c| c.ty).collect();
    let blocks = exec::rows_to_blocks(env.arena, &out.rows, &types);
    let cols = out
        .columns
        .into_iter()
        .map(|c| InCol {
            name: c.name,
            qual: qual.clone(),
            ty: c.ty,
            enum_labels: None,
        })
        .collect();
    Input { blocks, cols }
}

/// Single-table equality seek: `WHERE col = <literal>` over an indexed
/// column. The filter still runs afterwards, so this is purely a
/// scan-shortcut.
fn try_index_seek<'a>(
    env: &QueryEnv<'a>,
    table: &TableDef,
    selection: Option<&Expr>,
) -> Option<Vec<RowBlock<'a>>> {
    use sqlparser::ast::BinaryOperator;
    let Expr::BinaryOp { left, op, right } = selection? else {
        return None;
    };
    if *op != BinaryOperator::Eq {
        return None;
    }
    let (col_expr, lit_expr) = match (left.as_ref(), right.as_ref()) {
        (Expr::Identifier(_), e) => (left.as_ref(), e),
        (e, Expr::Identifier(_)) => (right.as_ref(), e),
        _ => return None,
    };
    let Expr::Identifier(col_ident) = col_expr else {
        return None;
    };
    let ci = table.col_index(&col_ident.value.to_lowercase())?;
    let index = table.index_on(ci)?;

    let empty_schema = SchemaMap::new();
    let empty_enums = HashMap::new();
    let ctx = LowerCtx {
        schema: &empty_schema,
        types: &[],
        params: env.params,
        enum_cols: &empty_enums,
        now_usec: env.now_usec,
        db_name: &env.db.name,
    };
    let cell = lower_expr(lit_expr, &ctx).ok()?.eval(&EmptyRow).ok()?;
    let key = dml::coerce_to_column(env.db, &table.columns[ci], cell).ok()?;
    Some(exec::scan_index(env.arena, table, index, &key))
}

fn resolve_table_factor<'a>(
    env: &QueryEnv<'a>,
    factor: &TableFactor,
    selection: Option<&Expr>,
    depth: usize,
) -> DbResult<Input<'a>> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let table_name = resolve_object_name(name)?;
            let table = env
                .db
                .table(&table_name)
                .ok_or_else(|| DbError::undefined_table(&table_name))?;
            let qual = alias
                .as_ref()
                .map(|a| a.name.value.to_lowercase())
                .unwrap_or_else(|| table_name.clone());

            if let Some(view_sql) = &table.view_sql {
                // views re-execute their definition
                let dialect = sqlparser::dialect::PostgreSqlDialect {};
                let stmts = sqlparser::parser::Parser::parse_sql(&dialect, view_sql)
                    .map_err(|e| DbError::internal(format!("stored view is invalid: {e}")))?;
                let out = match stmts.first() {
                    Some(Statement::Query(q)) => plan_query(env, q, depth + 1)?,
                    _ => return Err(DbError::internal("stored view is not a query")),
                };
                return Ok(output_to_input(env, out, Some(qual)));
            }

            let blocks = match try_index_seek(env, table, selection) {
                Some(b) => b,
                None => exec::scan_table(env.arena, table),
            };
            let cols = table
                .columns
                .iter()
                .map(|c| InCol {
                    name: c.name.clone(),
                    qual: Some(qual.clone()),
                    ty: c.ty,
                    enum_labels: if c.ty == ColumnType::Enum {
                        env.db.enum_labels(c).map(|l| l.to_vec())
                    } else {
                        None
                    },
                })
                .collect();
            Ok(Input { blocks, cols })
        }
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            let out = plan_query(env, subquery, depth + 1)?;
            let qual = alias.as_ref().map(|a| a.name.value.to_lowercase());
            Ok(output_to_input(env, out, qual))
        }
        other => Err(DbError::unsupported(format!(
            "unsupported FROM item: {other}"
        ))),
    }
}

fn join_kind(op: &JoinOperator) -> DbResult<(JoinKind, Option<&JoinConstraint>)> {
    Ok(match op {
        JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
        JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
        JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
        JoinOperator::FullOuter(c, ..) => (JoinKind::Full, Some(c)),
        JoinOperator::LeftSemi(c) => (JoinKind::Semi, Some(c)),
        JoinOperator::LeftAnti(c) => (JoinKind::Anti, Some(c)),
        JoinOperator::CrossJoin => (JoinKind::Cross, None),
        other => {
            return Err(DbError::unsupported(format!(
                "unsupported join type: {other:?}"
            )))
        }
    })
}

/// Split an ON conjunction into equi-key pairs and residual conjuncts.
fn split_join_keys(
    on: &Expr,
    left_cols: &[InCol],
    right_cols: &[InCol],
    keys: &mut Vec<(usize, usize)>,
    residual: &mut Vec<Expr>,
) {
    use sqlparser::ast::BinaryOperator;
    match on {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            split_join_keys(left, left_cols, right_cols, keys, residual);
            split_join_keys(right, left_cols, right_cols, keys, residual);
        }
        Expr::Nested(inner) => split_join_keys(inner, left_cols, right_cols, keys, residual),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            let l = resolve_col_ref(left, left_cols);
            let r = resolve_col_ref(right, right_cols);
            if let (Some(li), Some(ri)) = (l, r) {
                keys.push((li, ri));
                return;
            }
            // the condition may be written right-to-left
            let l = resolve_col_ref(right, left_cols);
            let r = resolve_col_ref(left, right_cols);
            if let (Some(li), Some(ri)) = (l, r) {
                keys.push((li, ri));
                return;
            }
            residual.push(on.clone());
        }
        other => residual.push(other.clone()),
    }
}

fn resolve_col_ref(e: &Expr, cols: &[InCol]) -> Option<usize> {
    let (qual, name) = match e {
        Expr::Identifier(id) => (None, id.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => (
            Some(parts[0].value.to_lowercase()),
            parts[1].value.to_lowercase(),
        ),
        _ => return None,
    };
    cols.iter().position(|c| {
        c.name == name
            && match &qual {
                Some(q) => c.qual.as_deref() == Some(q.as_str()),
                None => true,
            }
    })
}

fn resolve_from<'a>(
    env: &QueryEnv<'a>,
    from: &[TableWithJoins],
    selection: Option<&Expr>,
    depth: usize,
) -> DbResult<Input<'a>> {
    if from.is_empty() {
        // SELECT without FROM: one row, no columns
        return Ok(Input {
            blocks: exec::rows_to_blocks(env.arena, &[Vec::new()], &[]),
            cols: Vec::new(),
        });
    }

    let mut acc: Option<Input<'a>> = None;
    for twj in from {
        // the index-seek hint only applies to a lone base table
        let hint = if from.len() == 1 && twj.joins.is_empty() {
            selection
        } else {
            None
        };
        let mut input = resolve_table_factor(env, &twj.relation, hint, depth)?;
        for join in &twj.joins {
            input = apply_join(env, input, join, depth)?;
        }
        acc = Some(match acc {
            None => input,
            Some(prev) => cross_inputs(env, prev, input)?,
        });
    }
    Ok(acc.unwrap_or(Input {
        blocks: Vec::new(),
        cols: Vec::new(),
    }))
}

fn cross_inputs<'a>(
    env: &QueryEnv<'a>,
    left: Input<'a>,
    right: Input<'a>,
) -> DbResult<Input<'a>> {
    let lt: Vec<ColumnType> = left.cols.iter().map(|c| c.ty).collect();
    let rt: Vec<ColumnType> = right.cols.iter().map(|c| c.ty).collect();
    let blocks = hash_join(
        env.arena,
        &left.blocks,
        &right.blocks,
        &lt,
        &rt,
        &[],
        &[],
        JoinKind::Cross,
    )?;
    let mut cols = left.cols;
    cols.extend(right.cols);
    Ok(Input { blocks, cols })
}

fn apply_join<'a>(
    env: &QueryEnv<'a>,
    left: Input<'a>,
    join: &Join,
    depth: usize,
) -> DbResult<Input<'a>> {
    let right = resolve_table_factor(env, &join.relation, None, depth)?;
    let (kind, constraint) = join_kind(&join.join_operator)?;

    if kind == JoinKind::Cross {
        return cross_inputs(env, left, right);
    }

    let mut keys: Vec<(usize, usize)> = Vec::new();
    let mut residual: Vec<Expr> = Vec::new();
    match constraint {
        Some(JoinConstraint::On(on)) => {
            split_join_keys(on, &left.cols, &right.cols, &mut keys, &mut residual)
        }
        Some(JoinConstraint::Using(idents)) => {
            for id in idents {
                let name = id.value.to_lowercase();
                let li = left
                    .cols
                    .iter()
                    .position(|c| c.name == name)
                    .ok_or_else(|| DbError::undefined_column(&name))?;
                let ri = right
                    .cols
                    .iter()
                    .position(|c| c.name == name)
                    .ok_or_else(|| DbError::undefined_column(&name))?;
                keys.push((li, ri));
            }
        }
        _ => {
            return Err(DbError::unsupported(
                "JOIN requires an ON or USING constraint",
            ))
        }
    }
    if keys.is_empty() {
        return Err(DbError::unsupported(
            "JOIN condition must contain at least one column equality",
        ));
    }

    let lt: Vec<ColumnType> = left.cols.iter().map(|c| c.ty).collect();
    let rt: Vec<ColumnType> = right.cols.iter().map(|c| c.ty).collect();
    let lk: Vec<usize> = keys.iter().map(|(l, _)| *l).collect();
    let rk: Vec<usize> = keys.iter().map(|(_, r)| *r).collect();

    let mut blocks = hash_join(
        env.arena,
        &left.blocks,
        &right.blocks,
        &lt,
        &rt,
        &lk,
        &rk,
        kind,
    )?;

    let mut cols = left.cols;
    if !matches!(kind, JoinKind::Semi | JoinKind::Anti) {
        cols.extend(right.cols);
    }

    // residual non-equi conjuncts become a post-join filter
    if !residual.is_empty() {
        let (schema, types, enums) = input_schema(&cols);
        let ctx = LowerCtx {
            schema: &schema,
            types: &types,
            params: env.params,
            enum_cols: &enums,
            now_usec: env.now_usec,
            db_name: &env.db.name,
        };
        for cond in &residual {
            let pred = lower_expr(cond, &ctx)?;
            exec::filter(env.arena, &mut blocks, &pred)?;
        }
    }

    Ok(Input { blocks, cols })
}

// ---------------------------------------------------------------------------
// Subquery pre-resolution
// ---------------------------------------------------------------------------

fn cell_to_ast(cell: &Cell) -> Expr {
    match cell {
        Cell::Null => Expr::Value(AstValue::Null),
        Cell::Bool(b) => Expr::Value(AstValue::Boolean(*b)),
        Cell::SmallInt(_) | Cell::Int(_) | Cell::BigInt(_) => Expr::Value(AstValue::Number(
            format_cell(cell, None).unwrap_or_default(),
            false,
        )),
        Cell::Float(f) => Expr::Value(AstValue::Number(format!("{f:?}"), false)),
        other => Expr::Value(AstValue::SingleQuotedString(
            format_cell(other, None).unwrap_or_default(),
        )),
    }
}

/// Visit every direct child expression.
fn for_each_child_mut(
    e: &mut Expr,
    f: &mut dyn FnMut(&mut Expr) -> DbResult<()>,
) -> DbResult<()> {
    match e {
        Expr::BinaryOp { left, right, .. } => {
            f(left)?;
            f(right)?;
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::Cast { expr, .. }
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsNotTrue(expr)
        | Expr::IsFalse(expr)
        | Expr::IsNotFalse(expr)
        | Expr::Trim { expr, .. }
        | Expr::Extract { expr, .. }
        | Expr::Ceil { expr, .. }
        | Expr::Floor { expr, .. }
        | Expr::InSubquery { expr, .. } => f(expr)?,
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => {
            f(a)?;
            f(b)?;
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            f(expr)?;
            f(low)?;
            f(high)?;
        }
        Expr::InList { expr, list, .. } => {
            f(expr)?;
            for x in list {
                f(x)?;
            }
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            f(expr)?;
            f(pattern)?;
        }
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            f(expr)?;
            if let Some(x) = substring_from {
                f(x)?;
            }
            if let Some(x) = substring_for {
                f(x)?;
            }
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(x) = operand {
                f(x)?;
            }
            for x in conditions {
                f(x)?;
            }
            for x in results {
                f(x)?;
            }
            if let Some(x) = else_result {
                f(x)?;
            }
        }
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &mut func.args {
                for arg in &mut list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(x)) = arg {
                        f(x)?;
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Execute scalar, IN and EXISTS subqueries and substitute the results
/// as literals, so lowering never sees a subquery node.
fn resolve_subqueries(env: &QueryEnv<'_>, e: &mut Expr, depth: usize) -> DbResult<()> {
    match e {
        Expr::Subquery(q) => {
            let out = plan_query(env, q, depth + 1)?;
            if out.columns.len() != 1 {
                return Err(DbError::syntax("subquery must return exactly one column"));
            }
            if out.rows.len() > 1 {
                return Err(DbError::with_code(
                    crate::ErrorKind::ConstraintViolation,
                    "21000",
                    "more than one row returned by a subquery used as an expression",
                ));
            }
            let cell = out
                .rows
                .into_iter()
                .next()
                .and_then(|mut r| r.pop())
                .unwrap_or(Cell::Null);
            *e = cell_to_ast(&cell);
            Ok(())
        }
        Expr::InSubquery {
            expr: inner,
            subquery,
            negated,
        } => {
            let out = plan_query(env, subquery, depth + 1)?;
            if out.columns.len() != 1 {
                return Err(DbError::syntax("subquery must return exactly one column"));
            }
            let list = out.rows.iter().map(|r| cell_to_ast(&r[0])).collect();
            let mut replacement = Expr::InList {
                expr: inner.clone(),
                list,
                negated: *negated,
            };
            if let Expr::InList { expr, .. } = &mut replacement {
                resolve_subqueries(env, expr, depth)?;
            }
            *e = replacement;
            Ok(())
        }
        Expr::Exists { subquery, negated } => {
            let out = plan_query(env, subquery, depth + 1)?;
            let hit = !out.rows.is_empty();
            *e = Expr::Value(AstValue::Boolean(hit != *negated));
            Ok(())
        }
        other => for_each_child_mut(other, &mut |c| resolve_subqueries(env, c, depth)),
    }
}

/// Replace select-list aliases in GROUP BY / HAVING / ORDER BY, except
/// where a real input column shadows the alias.
fn substitute_aliases(e: &mut Expr, aliases: &HashMap<String, Expr>, schema: &SchemaMap) {
    if let Expr::Identifier(id) = e {
        let name = id.value.to_lowercase();
        if !schema.contains_key(&name) {
            if let Some(repl) = aliases.get(&name) {
                *e = repl.clone();
            }
        }
        return;
    }
    let _ = for_each_child_mut(e, &mut |c| {
        substitute_aliases(c, aliases, schema);
        Ok(())
    });
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

enum Item {
    Ast { ast: Expr, name: String },
    /// Wildcard-expanded direct column reference.
    Direct { col: usize, name: String },
}

fn expand_projection(select: &Select, cols: &[InCol]) -> DbResult<Vec<Item>> {
    let mut items = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(e) => items.push(Item::Ast {
                ast: e.clone(),
                name: expr_default_name(e),
            }),
            SelectItem::ExprWithAlias { expr, alias } => items.push(Item::Ast {
                ast: expr.clone(),
                name: alias.value.to_lowercase(),
            }),
            SelectItem::Wildcard(_) => {
                for (i, c) in cols.iter().enumerate() {
                    items.push(Item::Direct {
                        col: i,
                        name: c.name.clone(),
                    });
                }
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let qual = name
                    .0
                    .last()
                    .map(|i| i.value.to_lowercase())
                    .unwrap_or_default();
                let before = items.len();
                for (i, c) in cols.iter().enumerate() {
                    if c.qual.as_deref() == Some(qual.as_str()) {
                        items.push(Item::Direct {
                            col: i,
                            name: c.name.clone(),
                        });
                    }
                }
                if items.len() == before {
                    return Err(DbError::undefined_table(&qual));
                }
            }
        }
    }
    if items.is_empty() {
        return Err(DbError::syntax("SELECT list must not be empty"));
    }
    Ok(items)
}

fn collect_agg_calls(items: &[Item], having: Option<&Expr>, order: &[OrderByExpr]) -> Vec<Function> {
    let mut aggs: Vec<Function> = Vec::new();
    let mut push_unique = |f: Function| {
        let key = normalize_sql(&Expr::Function(f.clone()));
        if !aggs
            .iter()
            .any(|g| normalize_sql(&Expr::Function(g.clone())) == key)
        {
            aggs.push(f);
        }
    };
    for item in items {
        if let Item::Ast { ast, .. } = item {
            let mut found = Vec::new();
            expr::collect_aggregates(ast, &mut found);
            found.into_iter().for_each(&mut push_unique);
        }
    }
    if let Some(h) = having {
        let mut found = Vec::new();
        expr::collect_aggregates(h, &mut found);
        found.into_iter().for_each(&mut push_unique);
    }
    for ob in order {
        let mut found = Vec::new();
        expr::collect_aggregates(&ob.expr, &mut found);
        found.into_iter().for_each(&mut push_unique);
    }
    aggs
}

fn agg_spec(f: &Function, ctx: &LowerCtx<'_>) -> DbResult<AggSpec> {
    let name = f.name.to_string().to_lowercase();
    let (args, wildcard, distinct) = match &f.args {
        FunctionArguments::List(list) => {
            let wildcard = matches!(
                list.args.first(),
                Some(FunctionArg::Unnamed(FunctionArgExpr::Wildcard))
            );
            let distinct = list.duplicate_treatment
                == Some(sqlparser::ast::DuplicateTreatment::Distinct);
            let mut exprs = Vec::new();
            if !wildcard {
                for arg in &list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => exprs.push(e),
                        _ => {
                            return Err(DbError::unsupported(format!(
                                "unsupported argument in {name}()"
                            )))
                        }
                    }
                }
            }
            (exprs, wildcard, distinct)
        }
        _ => (Vec::new(), false, false),
    };
    if distinct {
        return Err(DbError::unsupported(format!(
            "{name}(DISTINCT ...) is not supported"
        )));
    }

    match name.as_str() {
        "count" if wildcard => Ok(AggSpec {
            kind: AggKind::CountStar,
            arg: None,
            sep: String::new(),
        }),
        "count" | "sum" | "avg" | "min" | "max" => {
            let arg = args
                .first()
                .ok_or_else(|| DbError::syntax(format!("{name}() requires an argument")))?;
            let kind = match name.as_str() {
                "count" => AggKind::Count,
                "sum" => AggKind::Sum,
                "avg" => AggKind::Avg,
                "min" => AggKind::Min,
                _ => AggKind::Max,
            };
            Ok(AggSpec {
                kind,
                arg: Some(lower_expr(arg, ctx)?),
                sep: String::new(),
            })
        }
        "string_agg" => {
            if args.len() != 2 {
                return Err(DbError::syntax("string_agg() requires two arguments"));
            }
            let sep = match lower_expr(args[1], ctx)?.eval(&EmptyRow)? {
                Cell::Text(s) => s,
                _ => return Err(DbError::syntax("string_agg() separator must be text")),
            };
            Ok(AggSpec {
                kind: AggKind::StringAgg,
                arg: Some(lower_expr(args[0], ctx)?),
                sep,
            })
        }
        other => Err(DbError::unsupported(format!(
            "unknown aggregate: {other}()"
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn plan_select(
    env: &QueryEnv<'_>,
    select: &Select,
    mut order: Vec<OrderByExpr>,
    limit: Option<i64>,
    offset: Option<i64>,
    depth: usize,
) -> DbResult<QueryOutput> {
    // FROM first; the raw selection doubles as the index-seek hint
    let input = resolve_from(env, &select.from, select.selection.as_ref(), depth)?;
    let (schema, types, enum_cols) = input_schema(&input.cols);
    let lower_ctx = LowerCtx {
        schema: &schema,
        types: &types,
        params: env.params,
        enum_cols: &enum_cols,
        now_usec: env.now_usec,
        db_name: &env.db.name,
    };

    // resolve subqueries up front so lowering only sees literals
    let mut selection = select.selection.clone();
    if let Some(sel) = &mut selection {
        resolve_subqueries(env, sel, depth)?;
    }
    let mut having = select.having.clone();
    if let Some(h) = &mut having {
        resolve_subqueries(env, h, depth)?;
    }
    let mut items = expand_projection(select, &input.cols)?;
    for item in &mut items {
        if let Item::Ast { ast, .. } = item {
            resolve_subqueries(env, ast, depth)?;
        }
    }
    for ob in &mut order {
        resolve_subqueries(env, &mut ob.expr, depth)?;
    }

    // WHERE
    let mut blocks = input.blocks;
    if let Some(sel) = &selection {
        let pred = lower_expr(sel, &lower_ctx)?;
        exec::filter(env.arena, &mut blocks, &pred)?;
    }

    // alias map for GROUP BY / HAVING / ORDER BY references
    let aliases: HashMap<String, Expr> = items
        .iter()
        .filter_map(|it| match it {
            Item::Ast { ast, name } => Some((name.clone(), ast.clone())),
            Item::Direct { .. } => None,
        })
        .collect();

    let mut group_exprs: Vec<Expr> = match &select.group_by {
        GroupByExpr::Expressions(list, _) => list.clone(),
        _ => {
            return Err(DbError::unsupported(
                "unsupported GROUP BY form",
            ))
        }
    };
    // positional and alias references in GROUP BY
    for g in &mut group_exprs {
        if let Expr::Value(AstValue::Number(n, _)) = g {
            let pos: usize = n
                .parse()
                .map_err(|_| DbError::syntax(format!("invalid GROUP BY position: {n}")))?;
            let item = items
                .get(pos.saturating_sub(1))
                .filter(|_| pos >= 1)
                .ok_or_else(|| {
                    DbError::syntax(format!("GROUP BY position {pos} is not in select list"))
                })?;
            *g = match item {
                Item::Ast { ast, .. } => ast.clone(),
                Item::Direct { name, .. } => Expr::Identifier(Ident::new(name.clone())),
            };
        } else {
            substitute_aliases(g, &aliases, &schema);
        }
        resolve_subqueries(env, g, depth)?;
    }
    if let Some(h) = &mut having {
        substitute_aliases(h, &aliases, &schema);
    }
    for ob in &mut order {
        substitute_aliases(&mut ob.expr, &aliases, &schema);
    }

    let has_aggregates = items.iter().any(|it| match it {
        Item::Ast { ast, .. } => contains_aggregate(ast),
        Item::Direct { .. } => false,
    }) || having.as_ref().is_some_and(contains_aggregate)
        || order.iter().any(|ob| contains_aggregate(&ob.expr));

    let output = if has_aggregates || !group_exprs.is_empty() {
        plan_grouped(
            env, select, blocks, &items, group_exprs, having, &mut order, &lower_ctx, &types,
        )?
    } else {
        plan_plain(
            env,
            select,
            blocks,
            &items,
            having,
            &mut order,
            &lower_ctx,
            &types,
            &enum_cols,
        )?
    };

    let mut rows = output.rows;
    if let Some(off) = offset {
        let off = (off as usize).min(rows.len());
        rows.drain(..off);
    }
    if let Some(lim) = limit {
        rows.truncate(lim as usize);
    }
    Ok(QueryOutput {
        columns: output.columns,
        rows,
    })
}

/// Non-aggregated SELECT: project (plus hidden sort keys), sort, strip,
/// distinct.
#[allow(clippy::too_many_arguments)]
fn plan_plain<'a>(
    env: &QueryEnv<'a>,
    select: &Select,
    blocks: Vec<RowBlock<'a>>,
    items: &[Item],
    having: Option<Expr>,
    order: &mut Vec<OrderByExpr>,
    lower_ctx: &LowerCtx<'_>,
    _types: &[ColumnType],
    enum_cols: &HashMap<usize, Vec<String>>,
) -> DbResult<QueryOutput> {
    if having.is_some() {
        return Err(DbError::syntax("HAVING requires GROUP BY or aggregates"));
    }

    let mut exprs: Vec<ScalarExpr> = Vec::with_capacity(items.len());
    let mut names: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Item::Ast { ast, name } => {
                exprs.push(lower_expr(ast, lower_ctx)?);
                names.push(name.clone());
            }
            Item::Direct { col, name } => {
                let e = match enum_cols.get(col) {
                    Some(labels) => ScalarExpr::EnumLabel {
                        col: *col,
                        labels: labels.clone(),
                    },
                    None => ScalarExpr::Column(*col),
                };
                exprs.push(e);
                names.push(name.clone());
            }
        }
    }
    let visible = exprs.len();
    let mut out_types: Vec<ColumnType> =
        exprs.iter().map(|e| e.result_type(lower_ctx.types)).collect();

    // resolve ORDER BY: position, output name, or an expression over
    // the input appended as a hidden column
    let out_map: SchemaMap = names
        .iter()
        .enumerate()
        .rev()
        .map(|(i, n)| (n.clone(), i))
        .collect();
    let mut sort_keys: Vec<exec::SortKey> = Vec::new();
    for ob in order.iter() {
        let asc = ob.asc.unwrap_or(true);
        let nulls_first = ob.nulls_first;
        let col = match &ob.expr {
            Expr::Value(AstValue::Number(n, _)) => {
                let pos: usize = n
                    .parse()
                    .map_err(|_| DbError::syntax(format!("invalid ORDER BY position: {n}")))?;
                if pos < 1 || pos > visible {
                    return Err(DbError::syntax(format!(
                        "ORDER BY position {pos} is not in select list"
                    )));
                }
                ScalarExpr::Column(pos - 1)
            }
            Expr::Identifier(id) if out_map.contains_key(&id.value.to_lowercase()) => {
                ScalarExpr::Column(out_map[&id.value.to_lowercase()])
            }
            other => {
                // hidden sort column over the input schema
                let lowered = lower_expr(other, lower_ctx)?;
                out_types.push(lowered.result_type(lower_ctx.types));
                exprs.push(lowered);
                ScalarExpr::Column(exprs.len() - 1)
            }
        };
        sort_keys.push(exec::SortKey {
            expr: col,
            asc,
            nulls_first,
        });
    }

    let mut projected = exec::project(env.arena, &blocks, &exprs, &out_types)?;
    if !sort_keys.is_empty() {
        projected = exec::sort(env.arena, projected, &sort_keys)?;
    }
    let mut rows = exec::blocks_to_rows(&projected);
    if exprs.len() > visible {
        for row in &mut rows {
            row.truncate(visible);
        }
    }

    if matches!(select.distinct, Some(Distinct::Distinct)) {
        let vis_types = &out_types[..visible];
        let vis_blocks = exec::rows_to_blocks(env.arena, &rows, vis_types);
        rows = crate::exec::group::distinct(env.arena, &vis_blocks, visible)?;
    }

    let columns = names
        .into_iter()
        .zip(out_types.iter())
        .map(|(name, &ty)| OutCol { name, ty })
        .collect();
    Ok(QueryOutput { columns, rows })
}

/// Aggregated SELECT: group, filter (HAVING), sort on the group output,
/// then project the select list over it.
#[allow(clippy::too_many_arguments)]
fn plan_grouped<'a>(
    env: &QueryEnv<'a>,
    select: &Select,
    blocks: Vec<RowBlock<'a>>,
    items: &[Item],
    group_exprs: Vec<Expr>,
    having: Option<Expr>,
    order: &mut Vec<OrderByExpr>,
    lower_ctx: &LowerCtx<'_>,
    input_types: &[ColumnType],
) -> DbResult<QueryOutput> {
    // aggregate calls from everywhere they may appear
    let agg_calls = collect_agg_calls(items, having.as_ref(), order);
    let mut specs = Vec::with_capacity(agg_calls.len());
    for f in &agg_calls {
        specs.push(agg_spec(f, lower_ctx)?);
    }

    let mut key_lowered = Vec::with_capacity(group_exprs.len());
    for g in &group_exprs {
        key_lowered.push(lower_expr(g, lower_ctx)?);
    }
    let mut group_rows = crate::exec::group::hash_group(
        env.arena,
        &blocks,
        &key_lowered,
        &specs,
        input_types,
    )?;

    // the post-aggregation schema: group keys and aggregate results,
    // addressable by their SQL text
    let mut post_schema = SchemaMap::new();
    let mut post_types = Vec::new();
    for (i, g) in group_exprs.iter().enumerate() {
        post_schema.insert(normalize_sql(g), i);
        post_types.push(key_lowered[i].result_type(input_types));
    }
    for (i, f) in agg_calls.iter().enumerate() {
        post_schema.insert(
            normalize_sql(&Expr::Function(f.clone())),
            group_exprs.len() + i,
        );
        post_types.push(specs[i].result_type(input_types));
    }
    let empty_enums = HashMap::new();
    let post_ctx = LowerCtx {
        schema: &post_schema,
        types: &post_types,
        params: env.params,
        enum_cols: &empty_enums,
        now_usec: env.now_usec,
        db_name: &env.db.name,
    };

    // settle each accumulator result onto its declared storage type
    for row in &mut group_rows {
        for (c, ty) in row.iter_mut().zip(&post_types) {
            *c = exec::coerce_for_storage(std::mem::take(c), *ty)?;
        }
    }
    let mut group_blocks = exec::rows_to_blocks(env.arena, &group_rows, &post_types);

    if let Some(h) = &having {
        let pred = lower_expr(h, &post_ctx)?;
        exec::filter(env.arena, &mut group_blocks, &pred)?;
    }

    // project the select list over the grouped schema
    let mut exprs = Vec::with_capacity(items.len());
    let mut names = Vec::with_capacity(items.len());
    for item in items {
        let (ast, name) = match item {
            Item::Ast { ast, name } => (ast.clone(), name.clone()),
            Item::Direct { name, .. } => {
                (Expr::Identifier(Ident::new(name.clone())), name.clone())
            }
        };
        exprs.push(lower_expr(&ast, &post_ctx)?);
        names.push(name);
    }
    let visible = exprs.len();
    let mut out_types: Vec<ColumnType> =
        exprs.iter().map(|e| e.result_type(&post_types)).collect();

    // ORDER BY over the grouped schema (position, alias, or expression)
    let out_map: SchemaMap = names
        .iter()
        .enumerate()
        .rev()
        .map(|(i, n)| (n.clone(), i))
        .collect();
    let mut sort_keys = Vec::new();
    for ob in order.iter() {
        let asc = ob.asc.unwrap_or(true);
        let col = match &ob.expr {
            Expr::Value(AstValue::Number(n, _)) => {
                let pos: usize = n
                    .parse()
                    .map_err(|_| DbError::syntax(format!("invalid ORDER BY position: {n}")))?;
                if pos < 1 || pos > visible {
                    return Err(DbError::syntax(format!(
                        "ORDER BY position {pos} is not in select list"
                    )));
                }
                ScalarExpr::Column(pos - 1)
            }
            Expr::Identifier(id) if out_map.contains_key(&id.value.to_lowercase()) => {
                ScalarExpr::Column(out_map[&id.value.to_lowercase()])
            }
            other => {
                let lowered = lower_expr(other, &post_ctx)?;
                out_types.push(lowered.result_type(&post_types));
                exprs.push(lowered);
                ScalarExpr::Column(exprs.len() - 1)
            }
        };
        sort_keys.push(exec::SortKey {
            expr: col,
            asc,
            nulls_first: ob.nulls_first,
        });
    }

    let mut projected = exec::project(env.arena, &group_blocks, &exprs, &out_types)?;
    if !sort_keys.is_empty() {
        projected = exec::sort(env.arena, projected, &sort_keys)?;
    }
    let mut rows = exec::blocks_to_rows(&projected);
    if exprs.len() > visible {
        for row in &mut rows {
            row.truncate(visible);
        }
    }

    if matches!(select.distinct, Some(Distinct::Distinct)) {
        let vis_types = &out_types[..visible];
        let vis_blocks = exec::rows_to_blocks(env.arena, &rows, vis_types);
        rows = crate::exec::group::distinct(env.arena, &vis_blocks, visible)?;
    }

    let columns = names
        .into_iter()
        .zip(out_types.iter())
        .map(|(name, &ty)| OutCol { name, ty })
        .collect();
    Ok(QueryOutput { columns, rows })
}

// ---------------------------------------------------------------------------
// Describe: static output-schema inference
// ---------------------------------------------------------------------------

/// Result shape of a statement without running it: only name/type
/// resolution and `ScalarExpr::result_type` are consulted, so Describe
/// never touches row data. Non-queries have no result shape.
pub fn describe_statement(
    ctx: &mut StatementCtx<'_>,
    stmt: &Statement,
) -> DbResult<Option<Vec<OutCol>>> {
    let Statement::Query(q) = stmt else {
        return Ok(None);
    };
    refresh_catalog_if_referenced(ctx.db, &stmt.to_string());
    let guard = ctx.db.read();
    let env = QueryEnv {
        db: &guard,
        arena: ctx.arena,
        params: ctx.params,
        now_usec: ctx.now_usec,
    };
    describe_query(&env, q, 0).map(Some)
}

fn describe_query(env: &QueryEnv<'_>, q: &Query, depth: usize) -> DbResult<Vec<OutCol>> {
    if depth > MAX_QUERY_DEPTH {
        return Err(DbError::internal("query nesting too deep"));
    }
    match q.body.as_ref() {
        SetExpr::Select(select) => describe_select(env, select, depth),
        SetExpr::Values(values) => {
            let empty_schema = SchemaMap::new();
            let empty_enums = HashMap::new();
            let lctx = LowerCtx {
                schema: &empty_schema,
                types: &[],
                params: env.params,
                enum_cols: &empty_enums,
                now_usec: env.now_usec,
                db_name: &env.db.name,
            };
            let mut out = Vec::new();
            if let Some(row) = values.rows.first() {
                for (i, e) in row.iter().enumerate() {
                    let mut e = e.clone();
                    strip_subqueries(env, &mut e, depth)?;
                    out.push(OutCol {
                        name: format!("column{}", i + 1),
                        ty: lower_expr(&e, &lctx)?.result_type(&[]),
                    });
                }
            }
            Ok(out)
        }
        other => Err(DbError::unsupported(format!(
            "unsupported query body: {other}"
        ))),
    }
}

/// Column shape of a FROM item, with no block materialization.
fn table_factor_shape(
    env: &QueryEnv<'_>,
    factor: &TableFactor,
    depth: usize,
) -> DbResult<Vec<InCol>> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let table_name = resolve_object_name(name)?;
            let table = env
                .db
                .table(&table_name)
                .ok_or_else(|| DbError::undefined_table(&table_name))?;
            let qual = alias
                .as_ref()
                .map(|a| a.name.value.to_lowercase())
                .unwrap_or_else(|| table_name.clone());

            if let Some(view_sql) = &table.view_sql {
                let dialect = sqlparser::dialect::PostgreSqlDialect {};
                let stmts = sqlparser::parser::Parser::parse_sql(&dialect, view_sql)
                    .map_err(|e| DbError::internal(format!("stored view is invalid: {e}")))?;
                let out = match stmts.first() {
                    Some(Statement::Query(q)) => describe_query(env, q, depth + 1)?,
                    _ => return Err(DbError::internal("stored view is not a query")),
                };
                return Ok(out
                    .into_iter()
                    .map(|c| InCol {
                        name: c.name,
                        qual: Some(qual.clone()),
                        ty: c.ty,
                        enum_labels: None,
                    })
                    .collect());
            }

            Ok(table
                .columns
                .iter()
                .map(|c| InCol {
                    name: c.name.clone(),
                    qual: Some(qual.clone()),
                    ty: c.ty,
                    enum_labels: if c.ty == ColumnType::Enum {
                        env.db.enum_labels(c).map(|l| l.to_vec())
                    } else {
                        None
                    },
                })
                .collect())
        }
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            let out = describe_query(env, subquery, depth + 1)?;
            let qual = alias.as_ref().map(|a| a.name.value.to_lowercase());
            Ok(out
                .into_iter()
                .map(|c| InCol {
                    name: c.name,
                    qual: qual.clone(),
                    ty: c.ty,
                    enum_labels: None,
                })
                .collect())
        }
        other => Err(DbError::unsupported(format!(
            "unsupported FROM item: {other}"
        ))),
    }
}

fn from_shape(env: &QueryEnv<'_>, from: &[TableWithJoins], depth: usize) -> DbResult<Vec<InCol>> {
    let mut cols = Vec::new();
    for twj in from {
        let mut item = table_factor_shape(env, &twj.relation, depth)?;
        for join in &twj.joins {
            let right = table_factor_shape(env, &join.relation, depth)?;
            let (kind, _) = join_kind(&join.join_operator)?;
            if !matches!(kind, JoinKind::Semi | JoinKind::Anti) {
                item.extend(right);
            }
        }
        cols.extend(item);
    }
    Ok(cols)
}

/// SQL type node for a column type, used to build typed NULL
/// placeholders during static inference.
fn sql_data_type(ty: ColumnType) -> DataType {
    use sqlparser::ast::{ExactNumberInfo, TimezoneInfo};
    match ty {
        ColumnType::SmallInt => DataType::SmallInt(None),
        ColumnType::Int => DataType::Int(None),
        ColumnType::BigInt => DataType::BigInt(None),
        ColumnType::Float => DataType::DoublePrecision,
        ColumnType::Numeric => DataType::Numeric(ExactNumberInfo::None),
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::Text | ColumnType::Enum => DataType::Text,
        ColumnType::Date => DataType::Date,
        ColumnType::Time => DataType::Time(None, TimezoneInfo::None),
        ColumnType::Timestamp => DataType::Timestamp(None, TimezoneInfo::None),
        ColumnType::TimestampTz => DataType::Timestamp(None, TimezoneInfo::WithTimeZone),
        ColumnType::Interval => DataType::Interval,
        ColumnType::Uuid => DataType::Uuid,
    }
}

/// Replace subquery nodes with typed NULL placeholders so expressions
/// can be lowered for their type without anything executing. A scalar
/// subquery keeps its column type via a cast; IN/EXISTS are boolean.
fn strip_subqueries(env: &QueryEnv<'_>, e: &mut Expr, depth: usize) -> DbResult<()> {
    match e {
        Expr::Subquery(q) => {
            let cols = describe_query(env, q, depth + 1)?;
            let ty = cols.first().map(|c| c.ty).unwrap_or(ColumnType::Text);
            *e = Expr::Cast {
                kind: CastKind::Cast,
                expr: Box::new(Expr::Value(AstValue::Null)),
                data_type: sql_data_type(ty),
                format: None,
            };
            Ok(())
        }
        Expr::InSubquery { .. } | Expr::Exists { .. } => {
            *e = Expr::Value(AstValue::Boolean(true));
            Ok(())
        }
        other => for_each_child_mut(other, &mut |c| strip_subqueries(env, c, depth)),
    }
}

/// Static shape of a SELECT: the same name resolution, alias handling
/// and post-aggregation schema as `plan_select`, but only types flow.
/// WHERE, ORDER BY and LIMIT cannot change the shape and are ignored.
fn describe_select(env: &QueryEnv<'_>, select: &Select, depth: usize) -> DbResult<Vec<OutCol>> {
    let cols = from_shape(env, &select.from, depth)?;
    let (schema, types, enum_cols) = input_schema(&cols);
    let lower_ctx = LowerCtx {
        schema: &schema,
        types: &types,
        params: env.params,
        enum_cols: &enum_cols,
        now_usec: env.now_usec,
        db_name: &env.db.name,
    };

    let mut items = expand_projection(select, &cols)?;
    for item in &mut items {
        if let Item::Ast { ast, .. } = item {
            strip_subqueries(env, ast, depth)?;
        }
    }
    let mut having = select.having.clone();
    if let Some(h) = &mut having {
        strip_subqueries(env, h, depth)?;
    }

    let aliases: HashMap<String, Expr> = items
        .iter()
        .filter_map(|it| match it {
            Item::Ast { ast, name } => Some((name.clone(), ast.clone())),
            Item::Direct { .. } => None,
        })
        .collect();

    let mut group_exprs: Vec<Expr> = match &select.group_by {
        GroupByExpr::Expressions(list, _) => list.clone(),
        _ => Vec::new(),
    };
    for g in &mut group_exprs {
        if let Expr::Value(AstValue::Number(n, _)) = g {
            let pos: usize = n
                .parse()
                .map_err(|_| DbError::syntax(format!("invalid GROUP BY position: {n}")))?;
            let item = items
                .get(pos.saturating_sub(1))
                .filter(|_| pos >= 1)
                .ok_or_else(|| {
                    DbError::syntax(format!("GROUP BY position {pos} is not in select list"))
                })?;
            *g = match item {
                Item::Ast { ast, .. } => ast.clone(),
                Item::Direct { name, .. } => Expr::Identifier(Ident::new(name.clone())),
            };
        } else {
            substitute_aliases(g, &aliases, &schema);
        }
        strip_subqueries(env, g, depth)?;
    }
    if let Some(h) = &mut having {
        substitute_aliases(h, &aliases, &schema);
    }

    let has_aggregates = items.iter().any(|it| match it {
        Item::Ast { ast, .. } => contains_aggregate(ast),
        Item::Direct { .. } => false,
    }) || having.as_ref().is_some_and(contains_aggregate);

    if !has_aggregates && group_exprs.is_empty() {
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            let (e, name) = match item {
                Item::Ast { ast, name } => (lower_expr(ast, &lower_ctx)?, name.clone()),
                Item::Direct { col, name } => {
                    let e = match enum_cols.get(col) {
                        Some(labels) => ScalarExpr::EnumLabel {
                            col: *col,
                            labels: labels.clone(),
                        },
                        None => ScalarExpr::Column(*col),
                    };
                    (e, name.clone())
                }
            };
            out.push(OutCol {
                name,
                ty: e.result_type(&types),
            });
        }
        return Ok(out);
    }

    // grouped shape: group keys then aggregates, addressed by SQL text
    let agg_calls = collect_agg_calls(&items, having.as_ref(), &[]);
    let mut specs = Vec::with_capacity(agg_calls.len());
    for f in &agg_calls {
        specs.push(agg_spec(f, &lower_ctx)?);
    }
    let mut post_schema = SchemaMap::new();
    let mut post_types = Vec::new();
    for g in &group_exprs {
        post_schema.insert(normalize_sql(g), post_types.len());
        post_types.push(lower_expr(g, &lower_ctx)?.result_type(&types));
    }
    for (i, f) in agg_calls.iter().enumerate() {
        post_schema.insert(
            normalize_sql(&Expr::Function(f.clone())),
            group_exprs.len() + i,
        );
        post_types.push(specs[i].result_type(&types));
    }
    let empty_enums = HashMap::new();
    let post_ctx = LowerCtx {
        schema: &post_schema,
        types: &post_types,
        params: env.params,
        enum_cols: &empty_enums,
        now_usec: env.now_usec,
        db_name: &env.db.name,
    };

    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        let (ast, name) = match item {
            Item::Ast { ast, name } => (ast.clone(), name.clone()),
            Item::Direct { name, .. } => {
                (Expr::Identifier(Ident::new(name.clone())), name.clone())
            }
        };
        out.push(OutCol {
            name,
            ty: lower_expr(&ast, &post_ctx)?.result_type(&post_types),
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// INSERT / UPDATE / DELETE
// ---------------------------------------------------------------------------

fn user_table_name(name: &ObjectName) -> DbResult<String> {
    let resolved = resolve_object_name(name)?;
    if catalog::is_catalog_table(&resolved) {
        return Err(DbError::unsupported(format!(
            "cannot modify catalog relation \"{resolved}\""
        )));
    }
    Ok(resolved)
}

fn is_default_keyword(e: &Expr) -> bool {
    matches!(e, Expr::Identifier(id) if id.value.eq_ignore_ascii_case("default"))
}

fn plan_insert(ctx: &mut StatementCtx<'_>, insert: &Insert) -> DbResult<StatementOutcome> {
    let table_name = user_table_name(&insert.table_name)?;
    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| DbError::syntax("INSERT requires VALUES or a SELECT source"))?;

    let mut guard = ctx.db.write();

    let (ncols, target_idx): (usize, Vec<usize>) = {
        let table = guard
            .table(&table_name)
            .ok_or_else(|| DbError::undefined_table(&table_name))?;
        let ncols = table.columns.len();
        let idx = if insert.columns.is_empty() {
            (0..ncols).collect()
        } else {
            let mut out = Vec::with_capacity(insert.columns.len());
            for id in &insert.columns {
                let name = id.value.to_lowercase();
                out.push(
                    table
                        .col_index(&name)
                        .ok_or_else(|| DbError::undefined_column(&name))?,
                );
            }
            out
        };
        (ncols, idx)
    };

    // evaluate the source into per-target cells
    let source_rows: Vec<Vec<Option<Cell>>> = {
        let env = QueryEnv {
            db: &guard,
            arena: ctx.arena,
            params: ctx.params,
            now_usec: ctx.now_usec,
        };
        match source.body.as_ref() {
            SetExpr::Values(values) => {
                let empty_schema = SchemaMap::new();
                let empty_enums = HashMap::new();
                let lctx = LowerCtx {
                    schema: &empty_schema,
                    types: &[],
                    params: env.params,
                    enum_cols: &empty_enums,
                    now_usec: env.now_usec,
                    db_name: &env.db.name,
                };
                let mut rows = Vec::with_capacity(values.rows.len());
                for vrow in &values.rows {
                    if vrow.len() != target_idx.len() {
                        return Err(DbError::syntax(format!(
                            "INSERT has {} expressions but {} target columns",
                            vrow.len(),
                            target_idx.len()
                        )));
                    }
                    let mut cells = Vec::with_capacity(vrow.len());
                    for e in vrow {
                        if is_default_keyword(e) {
                            cells.push(None);
                            continue;
                        }
                        let mut e = e.clone();
                        resolve_subqueries(&env, &mut e, 0)?;
                        cells.push(Some(lower_expr(&e, &lctx)?.eval(&EmptyRow)?));
                    }
                    rows.push(cells);
                }
                rows
            }
            _ => {
                let out = plan_query(&env, source, 0)?;
                if out.columns.len() != target_idx.len() {
                    return Err(DbError::syntax(format!(
                        "INSERT source has {} columns but {} target columns",
                        out.columns.len(),
                        target_idx.len()
                    )));
                }
                out.rows
                    .into_iter()
                    .map(|r| r.into_iter().map(Some).collect())
                    .collect()
            }
        }
    };

    // spread the source cells over the full column list
    let rows: Vec<Vec<Option<Cell>>> = source_rows
        .into_iter()
        .map(|src| {
            let mut full: Vec<Option<Cell>> = vec![None; ncols];
            for (pos, cell) in target_idx.iter().zip(src) {
                full[*pos] = cell;
            }
            full
        })
        .collect();

    let n = dml::insert(&mut guard, ctx.txn, &table_name, rows, ctx.now_usec)?;
    Ok(StatementOutcome::Command {
        tag: "INSERT 0".into(),
        rows: Some(n),
    })
}

fn plan_update(
    ctx: &mut StatementCtx<'_>,
    table: &TableWithJoins,
    assignments: &[Assignment],
    selection: Option<&Expr>,
) -> DbResult<StatementOutcome> {
    let TableFactor::Table { name, .. } = &table.relation else {
        return Err(DbError::unsupported("UPDATE target must be a table"));
    };
    let table_name = user_table_name(name)?;

    let mut guard = ctx.db.write();
    let (lowered_assignments, pred) = {
        let t = guard
            .table(&table_name)
            .ok_or_else(|| DbError::undefined_table(&table_name))?;
        let (schema, types, enum_cols) = dml::table_lower_parts(t, &guard);
        let lctx = LowerCtx {
            schema: &schema,
            types: &types,
            params: ctx.params,
            enum_cols: &enum_cols,
            now_usec: ctx.now_usec,
            db_name: &guard.name,
        };
        let env = QueryEnv {
            db: &guard,
            arena: ctx.arena,
            params: ctx.params,
            now_usec: ctx.now_usec,
        };

        let mut lowered = Vec::with_capacity(assignments.len());
        for a in assignments {
            let AssignmentTarget::ColumnName(col_name) = &a.target else {
                return Err(DbError::unsupported("unsupported UPDATE target"));
            };
            let col = col_name
                .0
                .last()
                .map(|i| i.value.to_lowercase())
                .unwrap_or_default();
            let ci = t
                .col_index(&col)
                .ok_or_else(|| DbError::undefined_column(&col))?;
            let mut value = a.value.clone();
            resolve_subqueries(&env, &mut value, 0)?;
            lowered.push((ci, lower_expr(&value, &lctx)?));
        }

        let pred = match selection {
            Some(sel) => {
                let mut sel = sel.clone();
                resolve_subqueries(&env, &mut sel, 0)?;
                Some(lower_expr(&sel, &lctx)?)
            }
            None => None,
        };
        (lowered, pred)
    };

    let n = dml::update(
        &mut guard,
        ctx.txn,
        &table_name,
        pred.as_ref(),
        &lowered_assignments,
        ctx.now_usec,
    )?;
    Ok(StatementOutcome::Command {
        tag: "UPDATE".into(),
        rows: Some(n),
    })
}

fn plan_delete(ctx: &mut StatementCtx<'_>, delete: &Delete) -> DbResult<StatementOutcome> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(v) | FromTable::WithoutKeyword(v) => v,
    };
    let Some(TableWithJoins {
        relation: TableFactor::Table { name, .. },
        ..
    }) = tables.first()
    else {
        return Err(DbError::unsupported("DELETE target must be a table"));
    };
    let table_name = user_table_name(name)?;

    let mut guard = ctx.db.write();
    let pred = {
        let t = guard
            .table(&table_name)
            .ok_or_else(|| DbError::undefined_table(&table_name))?;
        let (schema, types, enum_cols) = dml::table_lower_parts(t, &guard);
        let lctx = LowerCtx {
            schema: &schema,
            types: &types,
            params: ctx.params,
            enum_cols: &enum_cols,
            now_usec: ctx.now_usec,
            db_name: &guard.name,
        };
        match &delete.selection {
            Some(sel) => {
                let env = QueryEnv {
                    db: &guard,
                    arena: ctx.arena,
                    params: ctx.params,
                    now_usec: ctx.now_usec,
                };
                let mut sel = sel.clone();
                resolve_subqueries(&env, &mut sel, 0)?;
                Some(lower_expr(&sel, &lctx)?)
            }
            None => None,
        }
    };

    let n = dml::delete(&mut guard, ctx.txn, &table_name, pred.as_ref())?;
    Ok(StatementOutcome::Command {
        tag: "DELETE".into(),
        rows: Some(n),
    })
}

// ---------------------------------------------------------------------------
// DDL
// ---------------------------------------------------------------------------

fn referential_action(a: &Option<ReferentialAction>) -> FkAction {
    match a {
        Some(ReferentialAction::Restrict) => FkAction::Restrict,
        Some(ReferentialAction::Cascade) => FkAction::Cascade,
        Some(ReferentialAction::SetNull) => FkAction::SetNull,
        Some(ReferentialAction::SetDefault) => FkAction::SetDefault,
        Some(ReferentialAction::NoAction) | None => FkAction::NoAction,
    }
}

/// Build a column descriptor from a column definition, resolving enum
/// and serial pseudo-types.
fn column_from_def(
    guard: &Database,
    def: &ColumnDef,
    ctx: &StatementCtx<'_>,
) -> DbResult<ColumnDesc> {
    use sqlparser::ast::DataType;

    let name = def.name.value.to_lowercase();
    let (ty, enum_type, is_serial) = match &def.data_type {
        DataType::Custom(obj, _) => {
            let tname = obj
                .0
                .last()
                .map(|i| i.value.to_lowercase())
                .unwrap_or_default();
            match tname.as_str() {
                "serial" => (ColumnType::Int, None, true),
                "bigserial" => (ColumnType::BigInt, None, true),
                "smallserial" => (ColumnType::SmallInt, None, true),
                other => match guard.enum_type(other) {
                    Some(et) => (ColumnType::Enum, Some(et.name.clone()), false),
                    None => {
                        return Err(DbError::new(
                            crate::ErrorKind::UndefinedObject,
                            format!("type \"{other}\" does not exist"),
                        ))
                    }
                },
            }
        }
        dt => (lower_data_type(dt)?, None, false),
    };

    let mut col = ColumnDesc::new(name, ty);
    col.enum_type = enum_type;
    col.is_serial = is_serial;
    if is_serial {
        col.not_null = true;
    }

    let empty_schema = SchemaMap::new();
    let empty_enums = HashMap::new();
    let lctx = LowerCtx {
        schema: &empty_schema,
        types: &[],
        params: &[],
        enum_cols: &empty_enums,
        now_usec: ctx.now_usec,
        db_name: &guard.name,
    };

    for opt in &def.options {
        match &opt.option {
            ColumnOption::NotNull => col.not_null = true,
            ColumnOption::Null => col.not_null = false,
            ColumnOption::Default(e) => {
                let cell = lower_expr(e, &lctx)?.eval(&EmptyRow)?;
                col.default = Some(dml::coerce_to_column(guard, &col, cell)?);
            }
            ColumnOption::Unique { is_primary, .. } => {
                if *is_primary {
                    col.is_primary_key = true;
                    col.not_null = true;
                }
                col.is_unique = true;
            }
            ColumnOption::ForeignKey {
                foreign_table,
                referred_columns,
                on_delete,
                on_update,
                ..
            } => {
                let ft = resolve_object_name(foreign_table)?;
                let fc = match referred_columns.first() {
                    Some(id) => id.value.to_lowercase(),
                    None => {
                        // default to the referenced table's primary key
                        let target = guard
                            .table(&ft)
                            .ok_or_else(|| DbError::undefined_table(&ft))?;
                        target
                            .columns
                            .iter()
                            .find(|c| c.is_primary_key)
                            .map(|c| c.name.clone())
                            .ok_or_else(|| {
                                DbError::syntax(format!(
                                    "there is no primary key for referenced table \"{ft}\""
                                ))
                            })?
                    }
                };
                col.fk = Some(ForeignKey {
                    table: ft,
                    column: fc,
                    on_delete: referential_action(on_delete),
                    on_update: referential_action(on_update),
                });
            }
            ColumnOption::Check(e) => col.check_sql = Some(e.to_string()),
            _ => {}
        }
    }
    Ok(col)
}

/// Synthesize the backing index for a PRIMARY KEY / UNIQUE column.
fn constraint_index(table: &str, col: &ColumnDesc, ci: usize) -> IndexDef {
    let suffix = if col.is_primary_key { "pkey" } else { "key" };
    IndexDef {
        name: format!("{table}_{}_{suffix}", col.name),
        column: ci,
        unique: true,
        kind: IndexKind::Hash,
        map: Default::default(),
    }
}

fn plan_create_table(
    ctx: &mut StatementCtx<'_>,
    create: &CreateTable,
) -> DbResult<StatementOutcome> {
    let table_name = user_table_name(&create.name)?;
    let mut guard = ctx.db.write();

    if guard.table(&table_name).is_some() {
        if create.if_not_exists {
            return Ok(StatementOutcome::Command {
                tag: "CREATE TABLE".into(),
                rows: None,
            });
        }
        return Err(DbError::duplicate_table(&table_name));
    }

    let mut table = TableDef::new(table_name.clone());

    if let Some(query) = &create.query {
        // CREATE TABLE AS SELECT: columns from the result shape
        let out = {
            let env = QueryEnv {
                db: &guard,
                arena: ctx.arena,
                params: ctx.params,
                now_usec: ctx.now_usec,
            };
            plan_query(&env, query, 0)?
        };
        for c in &out.columns {
            table.columns.push(ColumnDesc::new(c.name.clone(), c.ty));
        }
        table.rows = out.rows;
    } else {
        if create.columns.is_empty() {
            return Err(DbError::syntax(
                "CREATE TABLE requires column definitions or AS SELECT",
            ));
        }
        for def in &create.columns {
            let col = column_from_def(&guard, def, ctx)?;
            if table.col_index(&col.name).is_some() {
                return Err(DbError::syntax(format!(
                    "column \"{}\" specified more than once",
                    col.name
                )));
            }
            table.columns.push(col);
        }
        // single-column table-level constraints fold onto the columns
        for tc in &create.constraints {
            use sqlparser::ast::TableConstraint;
            match tc {
                TableConstraint::PrimaryKey { columns, .. } if columns.len() == 1 => {
                    let name = columns[0].value.to_lowercase();
                    let ci = table
                        .col_index(&name)
                        .ok_or_else(|| DbError::undefined_column(&name))?;
                    table.columns[ci].is_primary_key = true;
                    table.columns[ci].is_unique = true;
                    table.columns[ci].not_null = true;
                }
                TableConstraint::Unique { columns, .. } if columns.len() == 1 => {
                    let name = columns[0].value.to_lowercase();
                    let ci = table
                        .col_index(&name)
                        .ok_or_else(|| DbError::undefined_column(&name))?;
                    table.columns[ci].is_unique = true;
                }
                TableConstraint::ForeignKey {
                    columns,
                    foreign_table,
                    referred_columns,
                    on_delete,
                    on_update,
                    ..
                } if columns.len() == 1 => {
                    let name = columns[0].value.to_lowercase();
                    let ci = table
                        .col_index(&name)
                        .ok_or_else(|| DbError::undefined_column(&name))?;
                    table.columns[ci].fk = Some(ForeignKey {
                        table: resolve_object_name(foreign_table)?,
                        column: referred_columns
                            .first()
                            .map(|i| i.value.to_lowercase())
                            .unwrap_or_default(),
                        on_delete: referential_action(on_delete),
                        on_update: referential_action(on_update),
                    });
                }
                other => {
                    return Err(DbError::unsupported(format!(
                        "unsupported table constraint: {other}"
                    )))
                }
            }
        }
    }

    // backing indexes for key columns
    let key_indexes: Vec<IndexDef> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_primary_key || c.is_unique)
        .map(|(ci, c)| constraint_index(&table_name, c, ci))
        .collect();
    table.indexes = key_indexes;
    table.rebuild_indexes();
    table.bump_generation();

    guard.tables.push(table);
    ctx.txn.record(UndoOp::CreateTable {
        name: table_name.clone(),
    });
    Ok(StatementOutcome::Command {
        tag: "CREATE TABLE".into(),
        rows: None,
    })
}

fn plan_create_view(
    ctx: &mut StatementCtx<'_>,
    name: &ObjectName,
    query: &Query,
    or_replace: bool,
) -> DbResult<StatementOutcome> {
    let view_name = user_table_name(name)?;
    let mut guard = ctx.db.write();

    let existing_is_view = guard.table(&view_name).map(|t| t.is_view());
    if let Some(is_view) = existing_is_view {
        if !(or_replace && is_view) {
            return Err(DbError::duplicate_table(&view_name));
        }
        let position = guard.table_index(&view_name).unwrap_or(0);
        let def = guard.tables.remove(position);
        ctx.txn.record(UndoOp::DropTable { position, def });
    }

    // validate the definition and capture the output shape
    let out = {
        let env = QueryEnv {
            db: &guard,
            arena: ctx.arena,
            params: ctx.params,
            now_usec: ctx.now_usec,
        };
        plan_query(&env, query, 0)?
    };

    let mut table = TableDef::new(view_name.clone());
    for c in &out.columns {
        table.columns.push(ColumnDesc::new(c.name.clone(), c.ty));
    }
    table.view_sql = Some(query.to_string());
    table.bump_generation();
    guard.tables.push(table);
    ctx.txn.record(UndoOp::CreateTable { name: view_name });
    Ok(StatementOutcome::Command {
        tag: "CREATE VIEW".into(),
        rows: None,
    })
}

fn plan_create_index(ctx: &mut StatementCtx<'_>, ci: &CreateIndex) -> DbResult<StatementOutcome> {
    let table_name = user_table_name(&ci.table_name)?;
    let column = match ci.columns.as_slice() {
        [one] => match &one.expr {
            Expr::Identifier(id) => id.value.to_lowercase(),
            other => {
                return Err(DbError::unsupported(format!(
                    "unsupported index expression: {other}"
                )))
            }
        },
        _ => {
            return Err(DbError::unsupported(
                "only single-column indexes are supported",
            ))
        }
    };
    let kind = match ci.using.as_ref().map(|u| u.value.to_lowercase()) {
        Some(ref m) if m == "hash" => IndexKind::Hash,
        _ => IndexKind::Ordered,
    };

    let mut guard = ctx.db.write();
    let table = guard
        .table_mut(&table_name)
        .ok_or_else(|| DbError::undefined_table(&table_name))?;
    let col_idx = table
        .col_index(&column)
        .ok_or_else(|| DbError::undefined_column(&column))?;
    let index_name = match &ci.name {
        Some(n) => resolve_object_name(n)?,
        None => format!("{table_name}_{column}_idx"),
    };
    if table.indexes.iter().any(|ix| ix.name == index_name) {
        return Err(DbError::duplicate_table(&index_name));
    }

    table.indexes.push(IndexDef {
        name: index_name.clone(),
        column: col_idx,
        unique: ci.unique,
        kind,
        map: Default::default(),
    });
    table.rebuild_indexes();
    table.bump_generation();
    ctx.txn.record(UndoOp::CreateIndex {
        table: table_name,
        index: index_name,
    });
    Ok(StatementOutcome::Command {
        tag: "CREATE INDEX".into(),
        rows: None,
    })
}

fn plan_drop(
    ctx: &mut StatementCtx<'_>,
    object_type: &ObjectType,
    names: &[ObjectName],
    if_exists: bool,
) -> DbResult<StatementOutcome> {
    let mut guard = ctx.db.write();
    match object_type {
        ObjectType::Table | ObjectType::View => {
            let want_view = *object_type == ObjectType::View;
            for name in names {
                let table_name = user_table_name(name)?;
                match guard.table_index(&table_name) {
                    Some(position) => {
                        let is_view = guard.tables[position].is_view();
                        if is_view != want_view {
                            return Err(DbError::type_mismatch(format!(
                                "\"{table_name}\" is not a {}",
                                if want_view { "view" } else { "table" }
                            )));
                        }
                        let def = guard.tables.remove(position);
                        ctx.txn.record(UndoOp::DropTable { position, def });
                    }
                    None if if_exists => {}
                    None => return Err(DbError::undefined_table(&table_name)),
                }
            }
            Ok(StatementOutcome::Command {
                tag: if want_view {
                    "DROP VIEW".into()
                } else {
                    "DROP TABLE".into()
                },
                rows: None,
            })
        }
        ObjectType::Index => {
            for name in names {
                let index_name = resolve_object_name(name)?;
                let mut found = false;
                for t in &mut guard.tables {
                    if let Some(pos) = t.indexes.iter().position(|ix| ix.name == index_name) {
                        let def = t.indexes.remove(pos);
                        t.bump_generation();
                        ctx.txn.record(UndoOp::DropIndex {
                            table: t.name.clone(),
                            position: pos,
                            def,
                        });
                        found = true;
                        break;
                    }
                }
                if !found && !if_exists {
                    return Err(DbError::new(
                        crate::ErrorKind::UndefinedObject,
                        format!("index \"{index_name}\" does not exist"),
                    ));
                }
            }
            Ok(StatementOutcome::Command {
                tag: "DROP INDEX".into(),
                rows: None,
            })
        }
        _ => {
            // DROP TYPE lands here
            for name in names {
                let type_name = resolve_object_name(name)?;
                match guard.enums.iter().position(|e| e.name == type_name) {
                    Some(position) => {
                        let in_use = guard.tables.iter().any(|t| {
                            t.columns
                                .iter()
                                .any(|c| c.enum_type.as_deref() == Some(type_name.as_str()))
                        });
                        if in_use {
                            return Err(DbError::new(
                                crate::ErrorKind::ConstraintViolation,
                                format!("cannot drop type {type_name} because a column uses it"),
                            ));
                        }
                        let def = guard.enums.remove(position);
                        ctx.txn.record(UndoOp::DropEnum { position, def });
                    }
                    None if if_exists => {}
                    None => {
                        return Err(DbError::new(
                            crate::ErrorKind::UndefinedObject,
                            format!("type \"{type_name}\" does not exist"),
                        ))
                    }
                }
            }
            Ok(StatementOutcome::Command {
                tag: "DROP TYPE".into(),
                rows: None,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// SHOW and enum DDL
// ---------------------------------------------------------------------------

fn plan_show(_ctx: &mut StatementCtx<'_>, variable: &[Ident]) -> DbResult<StatementOutcome> {
    let name = variable
        .iter()
        .map(|i| i.value.to_lowercase())
        .collect::<Vec<_>>()
        .join("_");
    let value = match name.as_str() {
        "server_version" => "15.0",
        "transaction_isolation" | "transaction_isolation_level" => "read committed",
        "standard_conforming_strings" => "on",
        "server_encoding" | "client_encoding" => "UTF8",
        "timezone" => "UTC",
        "datestyle" => "ISO, MDY",
        _ => "",
    };
    Ok(StatementOutcome::Rows(QueryOutput {
        columns: vec![OutCol {
            name,
            ty: ColumnType::Text,
        }],
        rows: vec![vec![Cell::Text(value.to_string())]],
    }))
}

/// Hand-parsed enum DDL: `CREATE TYPE name AS ENUM (...)` and
/// `DROP TYPE [IF EXISTS] name`. Returns `None` when the text is not
/// enum DDL at all.
pub fn execute_type_ddl(
    ctx: &mut StatementCtx<'_>,
    text: &str,
) -> DbResult<Option<StatementOutcome>> {
    let trimmed = text.trim().trim_end_matches(';');
    // ascii case fold keeps byte offsets aligned with the original
    let upper = trimmed.to_ascii_uppercase();

    if upper.starts_with("DROP TYPE") {
        let mut rest = trimmed["drop type".len()..].trim();
        let mut if_exists = false;
        if rest.to_ascii_uppercase().starts_with("IF EXISTS") {
            if_exists = true;
            rest = rest["if exists".len()..].trim();
        }
        let type_name = rest.trim().to_lowercase();
        let mut guard = ctx.db.write();
        return match guard.enums.iter().position(|e| e.name == type_name) {
            Some(position) => {
                let in_use = guard.tables.iter().any(|t| {
                    t.columns
                        .iter()
                        .any(|c| c.enum_type.as_deref() == Some(type_name.as_str()))
                });
                if in_use {
                    return Err(DbError::new(
                        crate::ErrorKind::ConstraintViolation,
                        format!("cannot drop type {type_name} because a column uses it"),
                    ));
                }
                let def = guard.enums.remove(position);
                ctx.txn.record(UndoOp::DropEnum { position, def });
                Ok(Some(StatementOutcome::Command {
                    tag: "DROP TYPE".into(),
                    rows: None,
                }))
            }
            None if if_exists => Ok(Some(StatementOutcome::Command {
                tag: "DROP TYPE".into(),
                rows: None,
            })),
            None => Err(DbError::new(
                crate::ErrorKind::UndefinedObject,
                format!("type \"{type_name}\" does not exist"),
            )),
        };
    }

    if !upper.starts_with("CREATE TYPE") || !upper.contains("AS ENUM") {
        return Ok(None);
    }

    let after_type = trimmed["create type".len()..].trim_start();
    let as_pos = after_type
        .to_ascii_uppercase()
        .find(" AS ")
        .ok_or_else(|| DbError::syntax("malformed CREATE TYPE"))?;
    let type_name = after_type[..as_pos].trim().to_lowercase();
    if type_name.is_empty() || !type_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(DbError::syntax(format!("invalid type name: {type_name}")));
    }

    let open = trimmed
        .find('(')
        .ok_or_else(|| DbError::syntax("CREATE TYPE ... AS ENUM requires a label list"))?;
    let close = trimmed
        .rfind(')')
        .ok_or_else(|| DbError::syntax("unterminated enum label list"))?;
    let mut values = Vec::new();
    for piece in trimmed[open + 1..close].split(',') {
        let label = piece.trim().trim_matches('\'').to_string();
        if label.is_empty() {
            return Err(DbError::syntax("empty enum label"));
        }
        if values.contains(&label) {
            return Err(DbError::syntax(format!("duplicate enum label \"{label}\"")));
        }
        values.push(label);
    }

    let mut guard = ctx.db.write();
    if guard.enum_type(&type_name).is_some() {
        return Err(DbError::new(
            crate::ErrorKind::ConstraintViolation,
            format!("type \"{type_name}\" already exists"),
        ));
    }
    guard.enums.push(EnumType {
        name: type_name.clone(),
        values,
    });
    ctx.txn.record(UndoOp::CreateEnum { name: type_name });
    Ok(Some(StatementOutcome::Command {
        tag: "CREATE TYPE".into(),
        rows: None,
    }))
}
