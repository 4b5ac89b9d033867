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

//! DML over row storage: INSERT, UPDATE, DELETE with NOT NULL, CHECK,
//! UNIQUE and FOREIGN KEY enforcement. All entry points run under the
//! database write lock; every mutation is recorded in the session undo
//! log before it is applied, so a failing statement (or a later
//! ROLLBACK) rewinds cleanly.
//!
//! Foreign-key actions are scheduled per referencing row; cascade
//! recursion terminates through a per-statement visited set, so cyclic
//! schemas are safe.

use std::collections::{BTreeSet, HashMap, HashSet};

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::schema::{ColumnDesc, Database, FkAction, IndexKey, TableDef};
use crate::sql::expr::{self, LowerCtx, ScalarExpr, SliceRow};
use crate::txn::{TxnManager, UndoOp};
use crate::value::{coerce_cell, Cell, ColumnType};
use crate::{DbError, DbResult};

// ---------------------------------------------------------------------------
// Lowering helpers
// ---------------------------------------------------------------------------

/// Schema parts for lowering expressions against a single table.
pub fn table_lower_parts(
    table: &TableDef,
    db: &Database,
) -> (
    expr::SchemaMap,
    Vec<ColumnType>,
    HashMap<usize, Vec<String>>,
) {
    let mut schema = expr::SchemaMap::new();
    let mut types = Vec::with_capacity(table.columns.len());
    let mut enum_cols = HashMap::new();
    for (i, col) in table.columns.iter().enumerate() {
        schema.insert(col.name.clone(), i);
        types.push(col.ty);
        if col.ty == ColumnType::Enum {
            if let Some(labels) = db.enum_labels(col) {
                enum_cols.insert(i, labels.to_vec());
            }
        }
    }
    (schema, types, enum_cols)
}

/// Parse and lower a CHECK body stored as SQL text.
fn lower_check(table: &TableDef, db: &Database, sql: &str, now_usec: i64) -> DbResult<ScalarExpr> {
    let dialect = PostgreSqlDialect {};
    let ast = Parser::new(&dialect)
        .try_with_sql(sql)
        .and_then(|mut p| p.parse_expr())
        .map_err(|e| DbError::syntax(format!("invalid CHECK expression: {e}")))?;
    let (schema, types, enum_cols) = table_lower_parts(table, db);
    let ctx = LowerCtx {
        schema: &schema,
        types: &types,
        params: &[],
        enum_cols: &enum_cols,
        now_usec,
        db_name: &db.name,
    };
    expr::lower_expr(&ast, &ctx)
}

/// Coerce a cell into a column, resolving enum labels to ordinals.
pub fn coerce_to_column(db: &Database, col: &ColumnDesc, cell: Cell) -> DbResult<Cell> {
    if cell.is_null() {
        return Ok(Cell::Null);
    }
    if col.ty == ColumnType::Enum {
        return match cell {
            Cell::Enum(_) => Ok(cell),
            Cell::Text(label) => {
                let et = col
                    .enum_type
                    .as_deref()
                    .and_then(|n| db.enum_type(n))
                    .ok_or_else(|| {
                        DbError::internal(format!("enum type missing for column {}", col.name))
                    })?;
                match et.ordinal(&label) {
                    Some(ord) => Ok(Cell::Enum(ord)),
                    None => Err(DbError::invalid_text(format!(
                        "invalid input value for enum {}: \"{label}\"",
                        et.name
                    ))),
                }
            }
            other => Err(DbError::type_mismatch(format!(
                "cannot coerce {} to enum column {}",
                other.ty_hint().map(|t| t.display_name()).unwrap_or("null"),
                col.name
            ))),
        };
    }
    coerce_cell(cell, col.ty)
}

// ---------------------------------------------------------------------------
// Per-row validation
// ---------------------------------------------------------------------------

fn check_not_null(table: &TableDef, row: &[Cell]) -> DbResult<()> {
    for (col, cell) in table.columns.iter().zip(row) {
        if col.not_null && cell.is_null() {
            return Err(DbError::not_null_violation(format!(
                "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                col.name, table.name
            )));
        }
    }
    Ok(())
}

/// CHECK passes on TRUE and UNKNOWN, fails only on FALSE.
fn check_checks(
    table: &TableDef,
    checks: &[(usize, ScalarExpr)],
    row: &[Cell],
) -> DbResult<()> {
    for (col_idx, check) in checks {
        if check.eval_bool(&SliceRow(row))? == Some(false) {
            return Err(DbError::check_violation(format!(
                "new row for relation \"{}\" violates check constraint on column \"{}\"",
                table.name, table.columns[*col_idx].name
            )));
        }
    }
    Ok(())
}

fn fk_target_exists(db: &Database, fk_table: &str, fk_column: &str, value: &Cell) -> DbResult<bool> {
    let target = db
        .table(fk_table)
        .ok_or_else(|| DbError::undefined_table(fk_table))?;
    let col = target
        .col_index(fk_column)
        .ok_or_else(|| DbError::undefined_column(fk_column))?;
    if let Some(ix) = target.index_on(col) {
        if let Some(k) = IndexKey::from_cell(value) {
            return Ok(ix.map.get(&k).is_some_and(|v| !v.is_empty()));
        }
    }
    Ok(target.rows.iter().any(|r| r[col].sql_eq(value)))
}

fn check_foreign_keys(db: &Database, table: &TableDef, row: &[Cell]) -> DbResult<()> {
    for (col, cell) in table.columns.iter().zip(row) {
        if cell.is_null() {
            continue;
        }
        if let Some(fk) = &col.fk {
            if !fk_target_exists(db, &fk.table, &fk.column, cell)? {
                return Err(DbError::fk_violation(format!(
                    "insert or update on table \"{}\" violates foreign key constraint: \
                     key ({})=({}) is not present in table \"{}\"",
                    table.name,
                    col.name,
                    crate::value::format_cell(cell, None).unwrap_or_default(),
                    fk.table
                )));
            }
        }
    }
    Ok(())
}

/// UNIQUE / PRIMARY KEY: no two non-NULL equal values in the column.
/// `skip` contains row indices being replaced (their old values do not
/// count against the new ones).
fn check_unique(
    table: &TableDef,
    new_rows: &[Vec<Cell>],
    skip: &BTreeSet<usize>,
) -> DbResult<()> {
    for (ci, col) in table.columns.iter().enumerate() {
        if !(col.is_unique || col.is_primary_key) {
            continue;
        }
        let mut seen: HashSet<String> = HashSet::new();
        let canon = |c: &Cell| crate::value::format_cell(c, None);
        for (ri, row) in table.rows.iter().enumerate() {
            if skip.contains(&ri) {
                continue;
            }
            if let Some(k) = canon(&row[ci]) {
                seen.insert(k);
            }
        }
        for row in new_rows {
            if let Some(k) = canon(&row[ci]) {
                if !seen.insert(k.clone()) {
                    return Err(DbError::unique_violation(format!(
                        "duplicate key value violates unique constraint on \"{}.{}\": ({})=({k})",
                        table.name, col.name, col.name
                    )));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// INSERT
// ---------------------------------------------------------------------------

/// Insert rows; `None` cells take the column default (or the next
/// serial value). Constraints are verified before storage is touched.
pub fn insert(
    db: &mut Database,
    txn: &mut TxnManager,
    table_name: &str,
    rows: Vec<Vec<Option<Cell>>>,
    now_usec: i64,
) -> DbResult<usize> {
    let table = db
        .table(table_name)
        .ok_or_else(|| DbError::undefined_table(table_name))?;
    if table.is_view() {
        return Err(DbError::unsupported(format!(
            "cannot insert into view \"{table_name}\""
        )));
    }

    let checks: Vec<(usize, ScalarExpr)> = {
        let mut out = Vec::new();
        for (i, col) in table.columns.iter().enumerate() {
            if let Some(sql) = &col.check_sql {
                out.push((i, lower_check(table, db, sql, now_usec)?));
            }
        }
        out
    };

    // resolve defaults and serials, coerce to column types
    let mut serials: Vec<(usize, i64)> = Vec::new();
    let mut serial_next: HashMap<usize, i64> = HashMap::new();
    for (ci, col) in table.columns.iter().enumerate() {
        if col.is_serial {
            serials.push((ci, col.serial_next));
            serial_next.insert(ci, col.serial_next);
        }
    }

    let ncols = table.columns.len();
    let mut prepared: Vec<Vec<Cell>> = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != ncols {
            return Err(DbError::syntax(format!(
                "INSERT has {} expressions but table \"{}\" has {} columns",
                row.len(),
                table_name,
                ncols
            )));
        }
        let mut cells = Vec::with_capacity(ncols);
        for (ci, given) in row.into_iter().enumerate() {
            let col = &table.columns[ci];
            let cell = match given {
                Some(v) => coerce_to_column(db, col, v)?,
                None => {
                    if col.is_serial {
                        let next = serial_next.entry(ci).or_insert(col.serial_next);
                        let v = *next;
                        *next += 1;
                        coerce_cell(Cell::BigInt(v), col.ty)?
                    } else if let Some(d) = &col.default {
                        d.clone()
                    } else {
                        Cell::Null
                    }
                }
            };
            cells.push(cell);
        }
        check_not_null(table, &cells)?;
        check_checks(table, &checks, &cells)?;
        check_foreign_keys(db, table, &cells)?;
        prepared.push(cells);
    }
    check_unique(table, &prepared, &BTreeSet::new())?;

    let count = prepared.len();
    let start = table.rows.len();
    txn.record(UndoOp::Insert {
        table: table_name.to_string(),
        start,
        count,
        serials,
    });

    let table = db
        .table_mut(table_name)
        .ok_or_else(|| DbError::undefined_table(table_name))?;
    table.rows.extend(prepared);
    for (ci, next) in serial_next {
        table.columns[ci].serial_next = next;
    }
    table.rebuild_indexes();
    Ok(count)
}

// ---------------------------------------------------------------------------
// UPDATE
// ---------------------------------------------------------------------------

fn matching_rows(table: &TableDef, pred: Option<&ScalarExpr>) -> DbResult<Vec<usize>> {
    let mut out = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        let keep = match pred {
            Some(p) => p.eval_bool(&SliceRow(row))? == Some(true),
            None => true,
        };
        if keep {
            out.push(i);
        }
    }
    Ok(out)
}

/// Tables + columns referencing `(table, column)` through a FK.
fn referencing_columns(
    db: &Database,
    table: &str,
    column: &str,
) -> Vec<(String, usize, FkAction, FkAction)> {
    let mut out = Vec::new();
    for t in &db.tables {
        for (ci, col) in t.columns.iter().enumerate() {
            if let Some(fk) = &col.fk {
                if fk.table == table && fk.column == column {
                    out.push((t.name.clone(), ci, fk.on_delete, fk.on_update));
                }
            }
        }
    }
    out
}

/// Materialize affected row ids, snapshot undo images, rewrite, then
/// enforce constraints and FK ON UPDATE actions.
pub fn update(
    db: &mut Database,
    txn: &mut TxnManager,
    table_name: &str,
    pred: Option<&ScalarExpr>,
    assignments: &[(usize, ScalarExpr)],
    now_usec: i64,
) -> DbResult<usize> {
    let table = db
        .table(table_name)
        .ok_or_else(|| DbError::undefined_table(table_name))?;
    if table.is_view() {
        return Err(DbError::unsupported(format!(
            "cannot update view \"{table_name}\""
        )));
    }

    let checks: Vec<(usize, ScalarExpr)> = {
        let mut out = Vec::new();
        for (i, col) in table.columns.iter().enumerate() {
            if let Some(sql) = &col.check_sql {
                out.push((i, lower_check(table, db, sql, now_usec)?));
            }
        }
        out
    };

    let targets = matching_rows(table, pred)?;
    if targets.is_empty() {
        return Ok(0);
    }

    // compute new images against the old rows
    let mut old_images: Vec<(usize, Vec<Cell>)> = Vec::with_capacity(targets.len());
    let mut new_images: Vec<(usize, Vec<Cell>)> = Vec::with_capacity(targets.len());
    for &ri in &targets {
        let old = table.rows[ri].clone();
        let mut new = old.clone();
        for (ci, e) in assignments {
            let v = e.eval(&SliceRow(&old))?;
            new[*ci] = coerce_to_column(db, &table.columns[*ci], v)?;
        }
        check_not_null(table, &new)?;
        check_checks(table, &checks, &new)?;
        old_images.push((ri, old));
        new_images.push((ri, new));
    }

    let skip: BTreeSet<usize> = targets.iter().copied().collect();
    let replacement: Vec<Vec<Cell>> = new_images.iter().map(|(_, r)| r.clone()).collect();
    check_unique(table, &replacement, &skip)?;
    for (_, row) in &new_images {
        check_foreign_keys(db, table, row)?;
    }

    // FK ON UPDATE actions for changed key values
    let mut key_changes: Vec<(String, usize, FkAction, Cell, Cell)> = Vec::new();
    for (ci, col) in table.columns.iter().enumerate() {
        if !(col.is_primary_key || col.is_unique) {
            continue;
        }
        for ((_, old), (_, new)) in old_images.iter().zip(&new_images) {
            if !old[ci].eq_nullsafe(&new[ci]) {
                for (rt, rc, _, on_update) in referencing_columns(db, table_name, &col.name) {
                    key_changes.push((rt, rc, on_update, old[ci].clone(), new[ci].clone()));
                }
            }
        }
    }

    let count = targets.len();
    txn.record(UndoOp::Update {
        table: table_name.to_string(),
        rows: old_images,
    });
    {
        let table = db
            .table_mut(table_name)
            .ok_or_else(|| DbError::undefined_table(table_name))?;
        for (ri, row) in new_images {
            table.rows[ri] = row;
        }
        table.rebuild_indexes();
    }

    // apply scheduled referencing-row actions
    let mut visited: HashSet<(String, usize)> = HashSet::new();
    for (rt_name, rc, action, old_val, new_val) in key_changes {
        let rt = db
            .table(&rt_name)
            .ok_or_else(|| DbError::undefined_table(&rt_name))?;
        let hits: Vec<usize> = rt
            .rows
            .iter()
            .enumerate()
            .filter(|(ri, row)| {
                row[rc].sql_eq(&old_val) && visited.insert((rt_name.clone(), *ri))
            })
            .map(|(ri, _)| ri)
            .collect();
        if hits.is_empty() {
            continue;
        }
        match action {
            FkAction::NoAction | FkAction::Restrict => {
                return Err(DbError::fk_violation(format!(
                    "update on table \"{table_name}\" violates foreign key constraint \
                     on table \"{rt_name}\""
                )));
            }
            FkAction::Cascade | FkAction::SetNull | FkAction::SetDefault => {
                let replacement = match action {
                    FkAction::Cascade => new_val.clone(),
                    FkAction::SetNull => Cell::Null,
                    _ => rt.columns[rc].default.clone().unwrap_or(Cell::Null),
                };
                let images: Vec<(usize, Vec<Cell>)> =
                    hits.iter().map(|&ri| (ri, rt.rows[ri].clone())).collect();
                if replacement.is_null() && rt.columns[rc].not_null {
                    return Err(DbError::not_null_violation(format!(
                        "null value in column \"{}\" of relation \"{rt_name}\" \
                         violates not-null constraint",
                        rt.columns[rc].name
                    )));
                }
                txn.record(UndoOp::Update {
                    table: rt_name.clone(),
                    rows: images,
                });
                let rt = db
                    .table_mut(&rt_name)
                    .ok_or_else(|| DbError::undefined_table(&rt_name))?;
                for ri in hits {
                    rt.rows[ri][rc] = replacement.clone();
                }
                rt.rebuild_indexes();
            }
        }
    }

    Ok(count)
}

// ---------------------------------------------------------------------------
// DELETE
// ---------------------------------------------------------------------------

/// Delete matching rows, applying FK actions to referencing tables.
/// Cascades run to a fixpoint with a per-statement visited set; NO
/// ACTION / RESTRICT violations are checked after the closure so rows
/// removed by a cascade do not count as violations.
pub fn delete(
    db: &mut Database,
    txn: &mut TxnManager,
    table_name: &str,
    pred: Option<&ScalarExpr>,
) -> DbResult<usize> {
    let table = db
        .table(table_name)
        .ok_or_else(|| DbError::undefined_table(table_name))?;
    if table.is_view() {
        return Err(DbError::unsupported(format!(
            "cannot delete from view \"{table_name}\""
        )));
    }

    let initial = matching_rows(table, pred)?;
    let count = initial.len();
    if count == 0 {
        return Ok(0);
    }

    // closure over cascades
    let mut to_delete: HashMap<String, BTreeSet<usize>> = HashMap::new();
    to_delete
        .entry(table_name.to_string())
        .or_default()
        .extend(initial.iter().copied());
    let mut pending_updates: Vec<(String, usize, usize, Cell)> = Vec::new();
    let mut restrict_checks: Vec<(String, usize, String)> = Vec::new();
    let mut visited: HashSet<(String, usize)> = initial
        .iter()
        .map(|&ri| (table_name.to_string(), ri))
        .collect();
    let mut worklist: Vec<(String, Vec<usize>)> = vec![(table_name.to_string(), initial)];

    while let Some((t_name, rows)) = worklist.pop() {
        let t = db
            .table(&t_name)
            .ok_or_else(|| DbError::undefined_table(&t_name))?;
        for (ci, col) in t.columns.iter().enumerate() {
            let refs = referencing_columns(db, &t_name, &col.name);
            if refs.is_empty() {
                continue;
            }
            let values: Vec<&Cell> = rows.iter().map(|&ri| &t.rows[ri][ci]).collect();
            for (rt_name, rc, on_delete, _) in refs {
                let rt = db
                    .table(&rt_name)
                    .ok_or_else(|| DbError::undefined_table(&rt_name))?;
                let mut cascade_hits = Vec::new();
                for (ri, row) in rt.rows.iter().enumerate() {
                    if !values.iter().any(|v| row[rc].sql_eq(v)) {
                        continue;
                    }
                    match on_delete {
                        FkAction::Cascade => {
                            if visited.insert((rt_name.clone(), ri)) {
                                to_delete.entry(rt_name.clone()).or_default().insert(ri);
                                cascade_hits.push(ri);
                            }
                        }
                        FkAction::SetNull => {
                            pending_updates.push((rt_name.clone(), ri, rc, Cell::Null));
                        }
                        FkAction::SetDefault => {
                            let d = rt.columns[rc].default.clone().unwrap_or(Cell::Null);
                            pending_updates.push((rt_name.clone(), ri, rc, d));
                        }
                        FkAction::NoAction | FkAction::Restrict => {
                            restrict_checks.push((rt_name.clone(), ri, t_name.clone()));
                        }
                    }
                }
                if !cascade_hits.is_empty() {
                    worklist.push((rt_name, cascade_hits));
                }
            }
        }
    }

    // referencing rows that survive the closure block the delete
    for (rt_name, ri, target) in &restrict_checks {
        let removed = to_delete
            .get(rt_name)
            .is_some_and(|set| set.contains(ri));
        if !removed {
            return Err(DbError::fk_violation(format!(
                "update or delete on table \"{target}\" violates foreign key constraint: \
                 still referenced from table \"{rt_name}\""
            )));
        }
    }

    // SET NULL / SET DEFAULT on rows that are not themselves deleted
    let mut updates_by_table: HashMap<String, Vec<(usize, usize, Cell)>> = HashMap::new();
    for (rt_name, ri, rc, v) in pending_updates {
        let deleted = to_delete.get(&rt_name).is_some_and(|s| s.contains(&ri));
        if !deleted {
            updates_by_table
                .entry(rt_name)
                .or_default()
                .push((ri, rc, v));
        }
    }
    for (rt_name, ups) in updates_by_table {
        let rt = db
            .table(&rt_name)
            .ok_or_else(|| DbError::undefined_table(&rt_name))?;
        for (_, rc, v) in &ups {
            if v.is_null() && rt.columns[*rc].not_null {
                return Err(DbError::not_null_violation(format!(
                    "null value in column \"{}\" of relation \"{rt_name}\" \
                     violates not-null constraint",
                    rt.columns[*rc].name
                )));
            }
        }
        let images: Vec<(usize, Vec<Cell>)> = ups
            .iter()
            .map(|(ri, _, _)| (*ri, rt.rows[*ri].clone()))
            .collect();
        txn.record(UndoOp::Update {
            table: rt_name.clone(),
            rows: images,
        });
        let rt = db
            .table_mut(&rt_name)
            .ok_or_else(|| DbError::undefined_table(&rt_name))?;
        for (ri, rc, v) in ups {
            rt.rows[ri][rc] = v;
        }
        rt.rebuild_indexes();
    }

    // apply deletions, high indices first so positions stay valid
    for (t_name, rows) in to_delete {
        let t = db
            .table(&t_name)
            .ok_or_else(|| DbError::undefined_table(&t_name))?;
        let images: Vec<(usize, Vec<Cell>)> = rows
            .iter()
            .map(|&ri| (ri, t.rows[ri].clone()))
            .collect();
        txn.record(UndoOp::Delete {
            table: t_name.clone(),
            rows: images,
        });
        let t = db
            .table_mut(&t_name)
            .ok_or_else(|| DbError::undefined_table(&t_name))?;
        for &ri in rows.iter().rev() {
            t.rows.remove(ri);
        }
        t.rebuild_indexes();
    }

    Ok(count)
}
