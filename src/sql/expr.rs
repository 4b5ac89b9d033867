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

//! Scalar expressions: lowering from the sqlparser AST into a resolved
//! tree, and cell-by-cell evaluation with SQL three-valued logic and
//! NULL propagation.

use std::collections::HashMap;

use sqlparser::ast::{
    BinaryOperator, CastKind, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments,
    UnaryOperator, Value as AstValue,
};

use crate::block::RowBlock;
use crate::temporal::{self, Interval};
use crate::value::{coerce_cell, format_cell, Cell, ColumnType};
use crate::{DbError, DbResult};

// ---------------------------------------------------------------------------
// Row access
// ---------------------------------------------------------------------------

/// A row the evaluator can read cells from, independent of whether the
/// data lives in a columnar block or in table storage.
pub trait RowAccess {
    fn col(&self, i: usize) -> Cell;
}

/// A physical row inside a columnar block.
pub struct BlockRow<'b, 'a> {
    pub block: &'b RowBlock<'a>,
    pub row: usize,
}

impl RowAccess for BlockRow<'_, '_> {
    fn col(&self, i: usize) -> Cell {
        self.block.cols[i].get(self.row)
    }
}

/// A row-major storage row.
pub struct SliceRow<'r>(pub &'r [Cell]);

impl RowAccess for SliceRow<'_> {
    fn col(&self, i: usize) -> Cell {
        self.0.get(i).cloned().unwrap_or(Cell::Null)
    }
}

/// No columns at all (SELECT without FROM).
pub struct EmptyRow;

impl RowAccess for EmptyRow {
    fn col(&self, _i: usize) -> Cell {
        Cell::Null
    }
}

// ---------------------------------------------------------------------------
// Resolved expression tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Upper,
    Lower,
    Length,
    Abs,
    Round,
    Ceil,
    Floor,
    Coalesce,
    Nullif,
    /// CONCAT(...) ignores NULL arguments, unlike the `||` operator.
    ConcatWs,
    Substring,
    Trim,
    Extract,
    DateTrunc,
}

#[derive(Debug, Clone)]
pub enum ScalarExpr {
    Column(usize),
    /// An enum column read: decodes the stored ordinal into its label,
    /// so the rest of the evaluator sees plain text.
    EnumLabel { col: usize, labels: Vec<String> },
    Literal(Cell),
    Binary {
        op: BinOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Unary {
        op: UnOp,
        expr: Box<ScalarExpr>,
    },
    Func {
        func: Func,
        args: Vec<ScalarExpr>,
    },
    Cast {
        expr: Box<ScalarExpr>,
        ty: ColumnType,
    },
    Case {
        operand: Option<Box<ScalarExpr>>,
        branches: Vec<(ScalarExpr, ScalarExpr)>,
        else_expr: Option<Box<ScalarExpr>>,
    },
    IsNull {
        expr: Box<ScalarExpr>,
        negated: bool,
    },
    InList {
        expr: Box<ScalarExpr>,
        list: Vec<ScalarExpr>,
        negated: bool,
    },
    Between {
        expr: Box<ScalarExpr>,
        low: Box<ScalarExpr>,
        high: Box<ScalarExpr>,
        negated: bool,
    },
    Like {
        expr: Box<ScalarExpr>,
        pattern: Box<ScalarExpr>,
        negated: bool,
        case_insensitive: bool,
    },
    /// IS [NOT] DISTINCT FROM — null-safe (in)equality.
    IsDistinct {
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
        negated: bool,
    },
    /// IS [NOT] TRUE / FALSE — never yields NULL.
    IsBool {
        expr: Box<ScalarExpr>,
        expect: bool,
        negated: bool,
    },
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

/// Name → column index over the current input schema. Holds both bare
/// column names and `alias.column` qualified forms.
pub type SchemaMap = HashMap<String, usize>;

/// Context for lowering: the input schema, bound parameter cells and
/// the per-statement clock.
pub struct LowerCtx<'a> {
    pub schema: &'a SchemaMap,
    pub types: &'a [ColumnType],
    pub params: &'a [Cell],
    /// Label lists for enum-typed input columns, by column index.
    pub enum_cols: &'a HashMap<usize, Vec<String>>,
    pub now_usec: i64,
    pub db_name: &'a str,
}

impl LowerCtx<'_> {
    fn column(&self, name: &str) -> DbResult<ScalarExpr> {
        match self.schema.get(name) {
            Some(&i) => match self.enum_cols.get(&i) {
                Some(labels) => Ok(ScalarExpr::EnumLabel {
                    col: i,
                    labels: labels.clone(),
                }),
                None => Ok(ScalarExpr::Column(i)),
            },
            None => Err(DbError::undefined_column(name)),
        }
    }
}

fn lower_literal(val: &AstValue, ctx: &LowerCtx) -> DbResult<ScalarExpr> {
    match val {
        AstValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                if let Ok(v) = i32::try_from(i) {
                    Ok(ScalarExpr::Literal(Cell::Int(v)))
                } else {
                    Ok(ScalarExpr::Literal(Cell::BigInt(i)))
                }
            } else {
                let f: f64 = n
                    .parse()
                    .map_err(|_| DbError::syntax(format!("invalid number literal: {n}")))?;
                Ok(ScalarExpr::Literal(Cell::Float(f)))
            }
        }
        AstValue::SingleQuotedString(s) | AstValue::DoubleQuotedString(s) => {
            Ok(ScalarExpr::Literal(Cell::Text(s.clone())))
        }
        AstValue::Boolean(b) => Ok(ScalarExpr::Literal(Cell::Bool(*b))),
        AstValue::Null => Ok(ScalarExpr::Literal(Cell::Null)),
        AstValue::Placeholder(p) => {
            let idx: usize = p
                .trim_start_matches('$')
                .parse()
                .map_err(|_| DbError::syntax(format!("invalid placeholder {p}")))?;
            if idx == 0 || idx > ctx.params.len() {
                return Err(DbError::syntax(format!(
                    "there is no parameter ${idx} (have {})",
                    ctx.params.len()
                )));
            }
            Ok(ScalarExpr::Literal(ctx.params[idx - 1].clone()))
        }
        other => Err(DbError::unsupported(format!("unsupported literal: {other}"))),
    }
}

fn lower_bin_op(op: &BinaryOperator) -> DbResult<BinOp> {
    Ok(match op {
        BinaryOperator::Plus => BinOp::Add,
        BinaryOperator::Minus => BinOp::Sub,
        BinaryOperator::Multiply => BinOp::Mul,
        BinaryOperator::Divide => BinOp::Div,
        BinaryOperator::Modulo => BinOp::Mod,
        BinaryOperator::Eq => BinOp::Eq,
        BinaryOperator::NotEq => BinOp::NotEq,
        BinaryOperator::Lt => BinOp::Lt,
        BinaryOperator::LtEq => BinOp::LtEq,
        BinaryOperator::Gt => BinOp::Gt,
        BinaryOperator::GtEq => BinOp::GtEq,
        BinaryOperator::And => BinOp::And,
        BinaryOperator::Or => BinOp::Or,
        BinaryOperator::StringConcat => BinOp::Concat,
        other => return Err(DbError::unsupported(format!("unsupported operator: {other}"))),
    })
}

/// Map a SQL data type to a column type; enum types are resolved by the
/// planner before this is reached.
pub fn lower_data_type(dt: &sqlparser::ast::DataType) -> DbResult<ColumnType> {
    use sqlparser::ast::DataType as DT;
    Ok(match dt {
        DT::SmallInt(_) | DT::Int2(_) => ColumnType::SmallInt,
        DT::Int(_) | DT::Integer(_) | DT::Int4(_) => ColumnType::Int,
        DT::BigInt(_) | DT::Int8(_) => ColumnType::BigInt,
        DT::Real | DT::Float(_) | DT::Double | DT::DoublePrecision | DT::Float8 => {
            ColumnType::Float
        }
        DT::Numeric(_) | DT::Decimal(_) | DT::Dec(_) => ColumnType::Numeric,
        DT::Boolean | DT::Bool => ColumnType::Boolean,
        DT::Varchar(_) | DT::Text | DT::Char(_) | DT::CharVarying(_) | DT::String(_) => {
            ColumnType::Text
        }
        DT::Date => ColumnType::Date,
        DT::Time(_, _) => ColumnType::Time,
        DT::Timestamp(_, tz) => match tz {
            sqlparser::ast::TimezoneInfo::WithTimeZone | sqlparser::ast::TimezoneInfo::Tz => {
                ColumnType::TimestampTz
            }
            _ => ColumnType::Timestamp,
        },
        DT::Interval => ColumnType::Interval,
        DT::Uuid => ColumnType::Uuid,
        other => {
            return Err(DbError::unsupported(format!(
                "unsupported column type {other}"
            )))
        }
    })
}

/// Extract plain expression arguments from a function call.
pub fn function_args(func: &Function) -> DbResult<Vec<Expr>> {
    match &func.args {
        FunctionArguments::List(list) => {
            let mut out = Vec::with_capacity(list.args.len());
            for arg in &list.args {
                match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => out.push(e.clone()),
                    _ => {
                        return Err(DbError::unsupported(format!(
                            "unsupported argument syntax in {}()",
                            func.name
                        )))
                    }
                }
            }
            Ok(out)
        }
        FunctionArguments::None => Ok(Vec::new()),
        _ => Err(DbError::unsupported(format!(
            "unsupported argument syntax for '{}'",
            func.name
        ))),
    }
}

fn lower_function(f: &Function, ctx: &LowerCtx) -> DbResult<ScalarExpr> {
    let name = f.name.to_string().to_lowercase();
    if f.over.is_some() {
        return Err(DbError::unsupported(format!(
            "window function '{name}' is not supported"
        )));
    }
    if is_aggregate_name(&name) {
        return Err(DbError::syntax(format!(
            "aggregate function '{name}' is not allowed in this context"
        )));
    }

    let raw_args = function_args(f)?;
    let mut args = Vec::with_capacity(raw_args.len());
    for a in &raw_args {
        args.push(lower_expr(a, ctx)?);
    }

    let func = match name.as_str() {
        "upper" => Func::Upper,
        "lower" => Func::Lower,
        "length" | "char_length" | "character_length" => Func::Length,
        "abs" => Func::Abs,
        "round" => Func::Round,
        "ceil" | "ceiling" => Func::Ceil,
        "floor" => Func::Floor,
        "coalesce" => Func::Coalesce,
        "nullif" => Func::Nullif,
        "concat" => Func::ConcatWs,
        "substring" | "substr" => Func::Substring,
        "trim" => Func::Trim,
        "extract" | "date_part" => Func::Extract,
        "date_trunc" => Func::DateTrunc,
        "now" | "current_timestamp" => {
            return Ok(ScalarExpr::Literal(Cell::TimestampTz(ctx.now_usec)));
        }
        "current_date" => {
            return Ok(ScalarExpr::Literal(Cell::Date(
                temporal::timestamp_split(ctx.now_usec).0,
            )));
        }
        "version" => {
            return Ok(ScalarExpr::Literal(Cell::Text(format!(
                "PostgreSQL 15.0 (mskql {})",
                env!("CARGO_PKG_VERSION")
            ))));
        }
        "current_database" | "current_catalog" => {
            return Ok(ScalarExpr::Literal(Cell::Text(ctx.db_name.to_string())));
        }
        "current_schema" => {
            return Ok(ScalarExpr::Literal(Cell::Text("public".into())));
        }
        "pg_backend_pid" => {
            return Ok(ScalarExpr::Literal(Cell::Int(std::process::id() as i32)));
        }
        "gen_random_uuid" => {
            return Ok(ScalarExpr::Literal(Cell::Uuid(uuid_v4_from_clock(
                ctx.now_usec,
            ))));
        }
        _ => return Err(DbError::unsupported(format!("unknown function: {name}()"))),
    };
    Ok(ScalarExpr::Func { func, args })
}

/// Deterministic stand-in for a random v4 UUID, seeded from the
/// statement clock. Good enough without pulling in an RNG.
fn uuid_v4_from_clock(now_usec: i64) -> uuid::Uuid {
    let mut h: u64 = 14_695_981_039_346_656_037;
    for b in now_usec.to_ne_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1_099_511_628_211);
    }
    let hi = (h & !0xf000) | 0x4000; // version 4
    let lo = (h.rotate_left(17) & !(0b11 << 62)) | (0b10 << 62); // RFC variant
    uuid::Uuid::from_u64_pair(hi, lo)
}

/// Normalized SQL text of an expression, used as a schema-map key. The
/// planner registers both plain column names and whole-expression keys
/// (e.g. `sum(amount)` over a grouped input) under this form.
pub fn normalize_sql(expr: &Expr) -> String {
    expr.to_string().to_lowercase()
}

/// Lower a sqlparser expression into a resolved scalar tree. Subqueries
/// must have been substituted by the planner before this point.
pub fn lower_expr(expr: &Expr, ctx: &LowerCtx) -> DbResult<ScalarExpr> {
    // whole-expression schema hit first: this resolves plain columns,
    // qualified columns, and post-aggregation references alike
    if let Some(&i) = ctx.schema.get(&normalize_sql(expr)) {
        return Ok(match ctx.enum_cols.get(&i) {
            Some(labels) => ScalarExpr::EnumLabel {
                col: i,
                labels: labels.clone(),
            },
            None => ScalarExpr::Column(i),
        });
    }
    match expr {
        Expr::Identifier(ident) => ctx.column(&ident.value.to_lowercase()),

        Expr::CompoundIdentifier(parts) => {
            if parts.len() == 2 {
                let bare = parts[1].value.to_lowercase();
                let full = format!("{}.{}", parts[0].value.to_lowercase(), bare);
                if ctx.schema.contains_key(&full) {
                    return ctx.column(&full);
                }
                return ctx.column(&bare);
            }
            // schema-qualified: keep the last two components
            if parts.len() == 3 {
                let full = format!(
                    "{}.{}",
                    parts[1].value.to_lowercase(),
                    parts[2].value.to_lowercase()
                );
                if ctx.schema.contains_key(&full) {
                    return ctx.column(&full);
                }
                return ctx.column(&parts[2].value.to_lowercase());
            }
            Err(DbError::syntax(format!(
                "unsupported compound identifier: {expr}"
            )))
        }

        Expr::Value(val) => lower_literal(val, ctx),

        Expr::TypedString { data_type, value } => {
            let ty = lower_data_type(data_type)?;
            let cell = coerce_cell(Cell::Text(value.clone()), ty)?;
            Ok(ScalarExpr::Literal(cell))
        }

        Expr::Interval(iv) => {
            // INTERVAL '...' literal; qualifiers beyond the string are rare
            let inner = lower_expr(&iv.value, ctx)?;
            match inner {
                ScalarExpr::Literal(Cell::Text(s)) => Ok(ScalarExpr::Literal(Cell::Interval(
                    temporal::interval_from_str(&s),
                ))),
                other => Ok(ScalarExpr::Cast {
                    expr: Box::new(other),
                    ty: ColumnType::Interval,
                }),
            }
        }

        Expr::BinaryOp { left, op, right } => Ok(ScalarExpr::Binary {
            op: lower_bin_op(op)?,
            left: Box::new(lower_expr(left, ctx)?),
            right: Box::new(lower_expr(right, ctx)?),
        }),

        Expr::UnaryOp { op, expr: inner } => {
            let e = lower_expr(inner, ctx)?;
            match op {
                UnaryOperator::Not => Ok(ScalarExpr::Unary {
                    op: UnOp::Not,
                    expr: Box::new(e),
                }),
                UnaryOperator::Minus => Ok(ScalarExpr::Unary {
                    op: UnOp::Neg,
                    expr: Box::new(e),
                }),
                UnaryOperator::Plus => Ok(e),
                other => Err(DbError::unsupported(format!(
                    "unsupported unary operator: {other}"
                ))),
            }
        }

        Expr::Nested(inner) => lower_expr(inner, ctx),

        Expr::IsNull(inner) => Ok(ScalarExpr::IsNull {
            expr: Box::new(lower_expr(inner, ctx)?),
            negated: false,
        }),
        Expr::IsNotNull(inner) => Ok(ScalarExpr::IsNull {
            expr: Box::new(lower_expr(inner, ctx)?),
            negated: true,
        }),

        Expr::IsTrue(inner) => Ok(ScalarExpr::IsBool {
            expr: Box::new(lower_expr(inner, ctx)?),
            expect: true,
            negated: false,
        }),
        Expr::IsNotTrue(inner) => Ok(ScalarExpr::IsBool {
            expr: Box::new(lower_expr(inner, ctx)?),
            expect: true,
            negated: true,
        }),
        Expr::IsFalse(inner) => Ok(ScalarExpr::IsBool {
            expr: Box::new(lower_expr(inner, ctx)?),
            expect: false,
            negated: false,
        }),
        Expr::IsNotFalse(inner) => Ok(ScalarExpr::IsBool {
            expr: Box::new(lower_expr(inner, ctx)?),
            expect: false,
            negated: true,
        }),

        Expr::IsDistinctFrom(l, r) => Ok(ScalarExpr::IsDistinct {
            left: Box::new(lower_expr(l, ctx)?),
            right: Box::new(lower_expr(r, ctx)?),
            negated: false,
        }),
        Expr::IsNotDistinctFrom(l, r) => Ok(ScalarExpr::IsDistinct {
            left: Box::new(lower_expr(l, ctx)?),
            right: Box::new(lower_expr(r, ctx)?),
            negated: true,
        }),

        Expr::Between {
            expr: inner,
            negated,
            low,
            high,
        } => Ok(ScalarExpr::Between {
            expr: Box::new(lower_expr(inner, ctx)?),
            low: Box::new(lower_expr(low, ctx)?),
            high: Box::new(lower_expr(high, ctx)?),
            negated: *negated,
        }),

        Expr::InList {
            expr: inner,
            list,
            negated,
        } => {
            let mut lowered = Vec::with_capacity(list.len());
            for item in list {
                lowered.push(lower_expr(item, ctx)?);
            }
            Ok(ScalarExpr::InList {
                expr: Box::new(lower_expr(inner, ctx)?),
                list: lowered,
                negated: *negated,
            })
        }

        Expr::Cast {
            expr: inner,
            data_type,
            kind,
            ..
        } => {
            if *kind == CastKind::TryCast {
                return Err(DbError::unsupported("TRY_CAST is not supported"));
            }
            Ok(ScalarExpr::Cast {
                expr: Box::new(lower_expr(inner, ctx)?),
                ty: lower_data_type(data_type)?,
            })
        }

        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let operand = match operand {
                Some(op) => Some(Box::new(lower_expr(op, ctx)?)),
                None => None,
            };
            let mut branches = Vec::with_capacity(conditions.len());
            for (c, r) in conditions.iter().zip(results.iter()) {
                branches.push((lower_expr(c, ctx)?, lower_expr(r, ctx)?));
            }
            let else_expr = match else_result {
                Some(e) => Some(Box::new(lower_expr(e, ctx)?)),
                None => None,
            };
            Ok(ScalarExpr::Case {
                operand,
                branches,
                else_expr,
            })
        }

        Expr::Like {
            negated,
            expr: inner,
            pattern,
            ..
        } => Ok(ScalarExpr::Like {
            expr: Box::new(lower_expr(inner, ctx)?),
            pattern: Box::new(lower_expr(pattern, ctx)?),
            negated: *negated,
            case_insensitive: false,
        }),
        Expr::ILike {
            negated,
            expr: inner,
            pattern,
            ..
        } => Ok(ScalarExpr::Like {
            expr: Box::new(lower_expr(inner, ctx)?),
            pattern: Box::new(lower_expr(pattern, ctx)?),
            negated: *negated,
            case_insensitive: true,
        }),

        Expr::Trim { expr: inner, .. } => Ok(ScalarExpr::Func {
            func: Func::Trim,
            args: vec![lower_expr(inner, ctx)?],
        }),

        Expr::Substring {
            expr: inner,
            substring_from,
            substring_for,
            ..
        } => {
            let mut args = vec![lower_expr(inner, ctx)?];
            args.push(match substring_from {
                Some(e) => lower_expr(e, ctx)?,
                None => ScalarExpr::Literal(Cell::Int(1)),
            });
            if let Some(e) = substring_for {
                args.push(lower_expr(e, ctx)?);
            }
            Ok(ScalarExpr::Func {
                func: Func::Substring,
                args,
            })
        }

        Expr::Extract {
            field, expr: inner, ..
        } => Ok(ScalarExpr::Func {
            func: Func::Extract,
            args: vec![
                ScalarExpr::Literal(Cell::Text(field.to_string().to_lowercase())),
                lower_expr(inner, ctx)?,
            ],
        }),

        Expr::Ceil { expr: inner, .. } => Ok(ScalarExpr::Func {
            func: Func::Ceil,
            args: vec![lower_expr(inner, ctx)?],
        }),
        Expr::Floor { expr: inner, .. } => Ok(ScalarExpr::Func {
            func: Func::Floor,
            args: vec![lower_expr(inner, ctx)?],
        }),

        Expr::Function(f) => lower_function(f, ctx),

        Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => Err(
            DbError::internal("subquery must be pre-resolved before lowering"),
        ),

        other => Err(DbError::unsupported(format!(
            "unsupported expression: {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Aggregate detection (used by the planner)
// ---------------------------------------------------------------------------

pub fn is_aggregate_name(name: &str) -> bool {
    matches!(name, "count" | "sum" | "avg" | "min" | "max" | "string_agg")
}

/// True if the expression contains an aggregate function call.
pub fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(f) => {
            f.over.is_none() && is_aggregate_name(&f.name.to_string().to_lowercase())
                || match &f.args {
                    FunctionArguments::List(list) => list.args.iter().any(|a| {
                        matches!(a, FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) if contains_aggregate(e))
                    }),
                    _ => false,
                }
        }
        Expr::BinaryOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::UnaryOp { expr, .. } => contains_aggregate(expr),
        Expr::Nested(inner) => contains_aggregate(inner),
        Expr::Cast { expr, .. } => contains_aggregate(expr),
        Expr::IsNull(e) | Expr::IsNotNull(e) => contains_aggregate(e),
        Expr::Between {
            expr, low, high, ..
        } => contains_aggregate(expr) || contains_aggregate(low) || contains_aggregate(high),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            operand.as_deref().is_some_and(contains_aggregate)
                || conditions.iter().any(contains_aggregate)
                || results.iter().any(contains_aggregate)
                || else_result.as_deref().is_some_and(contains_aggregate)
        }
        _ => false,
    }
}

/// Collect every aggregate function call in the expression, outermost
/// first, without descending into the aggregates themselves.
pub fn collect_aggregates(expr: &Expr, out: &mut Vec<Function>) {
    match expr {
        Expr::Function(f) => {
            if f.over.is_none() && is_aggregate_name(&f.name.to_string().to_lowercase()) {
                out.push(f.clone());
            } else if let FunctionArguments::List(list) = &f.args {
                for arg in &list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) = arg {
                        collect_aggregates(e, out);
                    }
                }
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::UnaryOp { expr, .. } => collect_aggregates(expr, out),
        Expr::Nested(inner) => collect_aggregates(inner, out),
        Expr::Cast { expr, .. } => collect_aggregates(expr, out),
        Expr::IsNull(e) | Expr::IsNotNull(e) => collect_aggregates(e, out),
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_aggregates(expr, out);
            collect_aggregates(low, out);
            collect_aggregates(high, out);
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(op) = operand {
                collect_aggregates(op, out);
            }
            for c in conditions {
                collect_aggregates(c, out);
            }
            for r in results {
                collect_aggregates(r, out);
            }
            if let Some(e) = else_result {
                collect_aggregates(e, out);
            }
        }
        _ => {}
    }
}

/// Default output name for an unaliased select item.
pub fn expr_default_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(id) => id.value.to_lowercase(),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| p.value.to_lowercase())
            .unwrap_or_else(|| "?column?".into()),
        Expr::Function(f) => f.name.to_string().to_lowercase(),
        Expr::Cast { expr, .. } => expr_default_name(expr),
        Expr::Extract { .. } => "extract".into(),
        _ => "?column?".into(),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn cell_bool(cell: &Cell) -> DbResult<Option<bool>> {
    match cell {
        Cell::Null => Ok(None),
        Cell::Bool(b) => Ok(Some(*b)),
        other => Err(DbError::type_mismatch(format!(
            "argument must be type boolean, not type {}",
            other.ty_hint().map(|t| t.display_name()).unwrap_or("null")
        ))),
    }
}

/// Make a text operand comparable with a typed one: parse the text into
/// the other side's type. Mirrors PostgreSQL's handling of unknown-type
/// literals and text-format parameters.
fn coerce_text_operand(a: Cell, b: &Cell) -> DbResult<Cell> {
    if let (Cell::Text(_), Some(ty)) = (&a, b.ty_hint()) {
        if ty != ColumnType::Text {
            return coerce_cell(a, ty);
        }
    }
    Ok(a)
}

fn compare_cells(a: Cell, b: Cell) -> DbResult<Option<std::cmp::Ordering>> {
    if a.is_null() || b.is_null() {
        return Ok(None);
    }
    let a = coerce_text_operand(a, &b)?;
    let b = coerce_text_operand(b, &a)?;
    match a.compare(&b) {
        Some(ord) => Ok(Some(ord)),
        None => Err(DbError::type_mismatch(format!(
            "cannot compare {} with {}",
            a.ty_hint().map(|t| t.display_name()).unwrap_or("null"),
            b.ty_hint().map(|t| t.display_name()).unwrap_or("null"),
        ))),
    }
}

fn checked_int(op: BinOp, a: i64, b: i64) -> DbResult<i64> {
    let out = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(DbError::division_by_zero());
            }
            a.checked_div(b)
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(DbError::division_by_zero());
            }
            a.checked_rem(b)
        }
        _ => None,
    };
    out.ok_or_else(|| DbError::numeric_out_of_range("bigint out of range"))
}

fn eval_arith(op: BinOp, a: Cell, b: Cell) -> DbResult<Cell> {
    use Cell::*;

    // temporal combinations first
    match (&a, &b, op) {
        (Date(d), Interval(iv), BinOp::Add) => {
            return Ok(Date(temporal::date_add_interval(*d, *iv)))
        }
        (Interval(iv), Date(d), BinOp::Add) => {
            return Ok(Date(temporal::date_add_interval(*d, *iv)))
        }
        (Date(d), Interval(iv), BinOp::Sub) => {
            return Ok(Date(temporal::date_add_interval(*d, iv.negate())))
        }
        (Date(a_), Date(b_), BinOp::Sub) => return Ok(Int(a_ - b_)),
        (Date(d), _, BinOp::Add) if b.as_i64().is_some() && b.ty_hint().is_some_and(|t| t.is_integer()) => {
            return Ok(Date(d + b.as_i64().unwrap_or(0) as i32))
        }
        (Date(d), _, BinOp::Sub) if b.as_i64().is_some() && b.ty_hint().is_some_and(|t| t.is_integer()) => {
            return Ok(Date(d - b.as_i64().unwrap_or(0) as i32))
        }
        (Timestamp(t), Interval(iv), BinOp::Add) => {
            return Ok(Timestamp(temporal::timestamp_add_interval(*t, *iv)))
        }
        (Interval(iv), Timestamp(t), BinOp::Add) => {
            return Ok(Timestamp(temporal::timestamp_add_interval(*t, *iv)))
        }
        (Timestamp(t), Interval(iv), BinOp::Sub) => {
            return Ok(Timestamp(temporal::timestamp_add_interval(*t, iv.negate())))
        }
        (TimestampTz(t), Interval(iv), BinOp::Add) => {
            return Ok(TimestampTz(temporal::timestamp_add_interval(*t, *iv)))
        }
        (Interval(iv), TimestampTz(t), BinOp::Add) => {
            return Ok(TimestampTz(temporal::timestamp_add_interval(*t, *iv)))
        }
        (TimestampTz(t), Interval(iv), BinOp::Sub) => {
            return Ok(TimestampTz(temporal::timestamp_add_interval(*t, iv.negate())))
        }
        (Timestamp(x), Timestamp(y), BinOp::Sub)
        | (TimestampTz(x), TimestampTz(y), BinOp::Sub) => {
            return Ok(Cell::Interval(temporal::Interval {
                months: 0,
                days: 0,
                usec: x - y,
            }))
        }
        (Time(t), Interval(iv), BinOp::Add) => return Ok(Time(t + iv.usec)),
        (Time(t), Interval(iv), BinOp::Sub) => return Ok(Time(t - iv.usec)),
        (Interval(x), Interval(y), BinOp::Add) => return Ok(Cell::Interval(x.add(*y))),
        (Interval(x), Interval(y), BinOp::Sub) => return Ok(Cell::Interval(x.sub(*y))),
        _ => {}
    }

    // numeric path; text operands get parsed against the other side
    let a = coerce_text_operand(a, &b)?;
    let b = coerce_text_operand(b, &a)?;

    let float = matches!(a, Float(_)) || matches!(b, Float(_));
    if float {
        let (x, y) = match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(DbError::type_mismatch("operator requires numeric operands")),
        };
        let out = match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => {
                if y == 0.0 {
                    return Err(DbError::division_by_zero());
                }
                x / y
            }
            BinOp::Mod => {
                if y == 0.0 {
                    return Err(DbError::division_by_zero());
                }
                x % y
            }
            _ => return Err(DbError::internal("non-arithmetic op in eval_arith")),
        };
        return Ok(Float(out));
    }

    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Ok(BigInt(checked_int(op, x, y)?)),
        _ => Err(DbError::type_mismatch(format!(
            "operator does not apply to {} and {}",
            a.ty_hint().map(|t| t.display_name()).unwrap_or("null"),
            b.ty_hint().map(|t| t.display_name()).unwrap_or("null"),
        ))),
    }
}

fn like_match(s: &[u8], p: &[u8]) -> bool {
    match p.first() {
        None => s.is_empty(),
        Some(b'%') => (0..=s.len()).any(|i| like_match(&s[i..], &p[1..])),
        Some(b'_') => !s.is_empty() && like_match(&s[1..], &p[1..]),
        Some(&c) => s.first() == Some(&c) && like_match(&s[1..], &p[1..]),
    }
}

impl ScalarExpr {
    pub fn eval(&self, row: &dyn RowAccess) -> DbResult<Cell> {
        match self {
            ScalarExpr::Column(i) => Ok(row.col(*i)),
            ScalarExpr::EnumLabel { col, labels } => match row.col(*col) {
                Cell::Enum(ord) => Ok(labels
                    .get(ord as usize)
                    .map(|l| Cell::Text(l.clone()))
                    .unwrap_or(Cell::Null)),
                Cell::Null => Ok(Cell::Null),
                other => Ok(other),
            },
            ScalarExpr::Literal(c) => Ok(c.clone()),

            ScalarExpr::Binary { op, left, right } => match op {
                BinOp::And | BinOp::Or => {
                    let l = cell_bool(&left.eval(row)?)?;
                    let r = cell_bool(&right.eval(row)?)?;
                    let out = match op {
                        BinOp::And => match (l, r) {
                            (Some(false), _) | (_, Some(false)) => Some(false),
                            (Some(true), Some(true)) => Some(true),
                            _ => None,
                        },
                        _ => match (l, r) {
                            (Some(true), _) | (_, Some(true)) => Some(true),
                            (Some(false), Some(false)) => Some(false),
                            _ => None,
                        },
                    };
                    Ok(out.map(Cell::Bool).unwrap_or(Cell::Null))
                }
                BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
                    let l = left.eval(row)?;
                    let r = right.eval(row)?;
                    match compare_cells(l, r)? {
                        None => Ok(Cell::Null),
                        Some(ord) => {
                            let b = match op {
                                BinOp::Eq => ord.is_eq(),
                                BinOp::NotEq => !ord.is_eq(),
                                BinOp::Lt => ord.is_lt(),
                                BinOp::LtEq => ord.is_le(),
                                BinOp::Gt => ord.is_gt(),
                                _ => ord.is_ge(),
                            };
                            Ok(Cell::Bool(b))
                        }
                    }
                }
                BinOp::Concat => {
                    let l = left.eval(row)?;
                    let r = right.eval(row)?;
                    if l.is_null() || r.is_null() {
                        return Ok(Cell::Null);
                    }
                    let mut s = format_cell(&l, None).unwrap_or_default();
                    s.push_str(&format_cell(&r, None).unwrap_or_default());
                    Ok(Cell::Text(s))
                }
                _ => {
                    let l = left.eval(row)?;
                    let r = right.eval(row)?;
                    if l.is_null() || r.is_null() {
                        return Ok(Cell::Null);
                    }
                    eval_arith(*op, l, r)
                }
            },

            ScalarExpr::Unary { op, expr } => {
                let v = expr.eval(row)?;
                match op {
                    UnOp::Not => Ok(match cell_bool(&v)? {
                        None => Cell::Null,
                        Some(b) => Cell::Bool(!b),
                    }),
                    UnOp::Neg => match v {
                        Cell::Null => Ok(Cell::Null),
                        Cell::Float(f) => Ok(Cell::Float(-f)),
                        Cell::Interval(iv) => Ok(Cell::Interval(iv.negate())),
                        other => match other.as_i64() {
                            Some(i) => Ok(Cell::BigInt(
                                i.checked_neg()
                                    .ok_or_else(|| DbError::numeric_out_of_range("bigint out of range"))?,
                            )),
                            None => Err(DbError::type_mismatch("cannot negate non-numeric value")),
                        },
                    },
                }
            }

            ScalarExpr::Func { func, args } => eval_func(*func, args, row),

            ScalarExpr::Cast { expr, ty } => {
                let v = expr.eval(row)?;
                coerce_cell(v, *ty)
            }

            ScalarExpr::Case {
                operand,
                branches,
                else_expr,
            } => {
                match operand {
                    Some(op) => {
                        let subject = op.eval(row)?;
                        for (when, then) in branches {
                            let w = when.eval(row)?;
                            if subject.sql_eq(&w) {
                                return then.eval(row);
                            }
                        }
                    }
                    None => {
                        for (when, then) in branches {
                            if cell_bool(&when.eval(row)?)? == Some(true) {
                                return then.eval(row);
                            }
                        }
                    }
                }
                match else_expr {
                    Some(e) => e.eval(row),
                    None => Ok(Cell::Null),
                }
            }

            ScalarExpr::IsNull { expr, negated } => {
                let v = expr.eval(row)?;
                Ok(Cell::Bool(v.is_null() != *negated))
            }

            ScalarExpr::IsBool {
                expr,
                expect,
                negated,
            } => {
                let v = cell_bool(&expr.eval(row)?)?;
                let hit = v == Some(*expect);
                Ok(Cell::Bool(hit != *negated))
            }

            ScalarExpr::IsDistinct {
                left,
                right,
                negated,
            } => {
                let l = left.eval(row)?;
                let r = right.eval(row)?;
                let same = l.eq_nullsafe(&r);
                // IS DISTINCT FROM is true when values differ
                Ok(Cell::Bool(if *negated { same } else { !same }))
            }

            ScalarExpr::InList {
                expr,
                list,
                negated,
            } => {
                let v = expr.eval(row)?;
                if v.is_null() {
                    return Ok(Cell::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let w = item.eval(row)?;
                    if w.is_null() {
                        saw_null = true;
                        continue;
                    }
                    if compare_cells(v.clone(), w)? == Some(std::cmp::Ordering::Equal) {
                        return Ok(Cell::Bool(!*negated));
                    }
                }
                if saw_null {
                    Ok(Cell::Null)
                } else {
                    Ok(Cell::Bool(*negated))
                }
            }

            ScalarExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let v = expr.eval(row)?;
                let lo = low.eval(row)?;
                let hi = high.eval(row)?;
                let ge = compare_cells(v.clone(), lo)?.map(|o| o.is_ge());
                let le = compare_cells(v, hi)?.map(|o| o.is_le());
                let out = match (ge, le) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
                Ok(match out {
                    None => Cell::Null,
                    Some(b) => Cell::Bool(b != *negated),
                })
            }

            ScalarExpr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let v = expr.eval(row)?;
                let p = pattern.eval(row)?;
                match (v, p) {
                    (Cell::Null, _) | (_, Cell::Null) => Ok(Cell::Null),
                    (Cell::Text(s), Cell::Text(pat)) => {
                        let hit = if *case_insensitive {
                            like_match(s.to_lowercase().as_bytes(), pat.to_lowercase().as_bytes())
                        } else {
                            like_match(s.as_bytes(), pat.as_bytes())
                        };
                        Ok(Cell::Bool(hit != *negated))
                    }
                    _ => Err(DbError::type_mismatch("LIKE requires text operands")),
                }
            }
        }
    }

    /// Evaluate as a predicate: TRUE / FALSE / UNKNOWN.
    pub fn eval_bool(&self, row: &dyn RowAccess) -> DbResult<Option<bool>> {
        cell_bool(&self.eval(row)?)
    }

    /// Static output type over the given input column types. This feeds
    /// RowDescription for Describe, so it is best-effort but never runs
    /// the expression.
    pub fn result_type(&self, types: &[ColumnType]) -> ColumnType {
        match self {
            ScalarExpr::Column(i) => types.get(*i).copied().unwrap_or(ColumnType::Text),
            ScalarExpr::EnumLabel { .. } => ColumnType::Text,
            ScalarExpr::Literal(c) => c.ty_hint().unwrap_or(ColumnType::Text),
            ScalarExpr::Cast { ty, .. } => *ty,
            ScalarExpr::Binary { op, left, right } => match op {
                BinOp::And
                | BinOp::Or
                | BinOp::Eq
                | BinOp::NotEq
                | BinOp::Lt
                | BinOp::LtEq
                | BinOp::Gt
                | BinOp::GtEq => ColumnType::Boolean,
                BinOp::Concat => ColumnType::Text,
                _ => {
                    let lt = left.result_type(types);
                    let rt = right.result_type(types);
                    arith_result_type(*op, lt, rt)
                }
            },
            ScalarExpr::Unary { op, expr } => match op {
                UnOp::Not => ColumnType::Boolean,
                UnOp::Neg => expr.result_type(types),
            },
            ScalarExpr::Func { func, args } => match func {
                Func::Upper | Func::Lower | Func::ConcatWs | Func::Substring | Func::Trim => {
                    ColumnType::Text
                }
                Func::Length => ColumnType::Int,
                Func::Extract => ColumnType::Float,
                Func::Abs | Func::Round | Func::Ceil | Func::Floor => args
                    .first()
                    .map(|a| a.result_type(types))
                    .unwrap_or(ColumnType::Float),
                Func::Coalesce | Func::Nullif => args
                    .first()
                    .map(|a| a.result_type(types))
                    .unwrap_or(ColumnType::Text),
                Func::DateTrunc => args
                    .get(1)
                    .map(|a| a.result_type(types))
                    .unwrap_or(ColumnType::Timestamp),
            },
            ScalarExpr::Case {
                branches,
                else_expr,
                ..
            } => branches
                .first()
                .map(|(_, then)| then.result_type(types))
                .or_else(|| else_expr.as_ref().map(|e| e.result_type(types)))
                .unwrap_or(ColumnType::Text),
            ScalarExpr::IsNull { .. }
            | ScalarExpr::IsBool { .. }
            | ScalarExpr::IsDistinct { .. }
            | ScalarExpr::InList { .. }
            | ScalarExpr::Between { .. }
            | ScalarExpr::Like { .. } => ColumnType::Boolean,
        }
    }
}

fn arith_result_type(op: BinOp, lt: ColumnType, rt: ColumnType) -> ColumnType {
    use ColumnType::*;
    match (lt, rt, op) {
        (Date, Interval, _) | (Interval, Date, _) => Date,
        (Date, Date, BinOp::Sub) => Int,
        (Date, t, _) if t.is_integer() => Date,
        (Timestamp, Interval, _) | (Interval, Timestamp, _) => Timestamp,
        (TimestampTz, Interval, _) | (Interval, TimestampTz, _) => TimestampTz,
        (Timestamp, Timestamp, BinOp::Sub) | (TimestampTz, TimestampTz, BinOp::Sub) => Interval,
        (Time, Interval, _) => Time,
        (Interval, Interval, _) => Interval,
        _ if lt == Float || rt == Float || lt == Numeric || rt == Numeric => Float,
        _ if lt == BigInt || rt == BigInt => BigInt,
        _ => Int,
    }
}

fn eval_func(func: Func, args: &[ScalarExpr], row: &dyn RowAccess) -> DbResult<Cell> {
    let arity = |n: usize| {
        if args.len() != n {
            Err(DbError::syntax(format!(
                "function expects {n} argument(s), got {}",
                args.len()
            )))
        } else {
            Ok(())
        }
    };

    match func {
        Func::Upper | Func::Lower | Func::Trim => {
            arity(1)?;
            match args[0].eval(row)? {
                Cell::Null => Ok(Cell::Null),
                Cell::Text(s) => Ok(Cell::Text(match func {
                    Func::Upper => s.to_uppercase(),
                    Func::Lower => s.to_lowercase(),
                    _ => s.trim().to_string(),
                })),
                other => Err(DbError::type_mismatch(format!(
                    "function requires text, got {}",
                    other.ty_hint().map(|t| t.display_name()).unwrap_or("null")
                ))),
            }
        }
        Func::Length => {
            arity(1)?;
            match args[0].eval(row)? {
                Cell::Null => Ok(Cell::Null),
                Cell::Text(s) => Ok(Cell::Int(s.chars().count() as i32)),
                _ => Err(DbError::type_mismatch("length() requires text")),
            }
        }
        Func::Abs => {
            arity(1)?;
            match args[0].eval(row)? {
                Cell::Null => Ok(Cell::Null),
                Cell::Float(f) => Ok(Cell::Float(f.abs())),
                other => match other.as_i64() {
                    Some(i) => Ok(Cell::BigInt(i.abs())),
                    None => Err(DbError::type_mismatch("abs() requires a numeric argument")),
                },
            }
        }
        Func::Round => {
            if args.is_empty() || args.len() > 2 {
                return Err(DbError::syntax("round() expects 1 or 2 arguments"));
            }
            let v = args[0].eval(row)?;
            if v.is_null() {
                return Ok(Cell::Null);
            }
            let scale = match args.get(1) {
                Some(e) => e.eval(row)?.as_i64().unwrap_or(0),
                None => 0,
            };
            let x = v
                .as_f64()
                .ok_or_else(|| DbError::type_mismatch("round() requires a numeric argument"))?;
            let mult = 10f64.powi(scale as i32);
            Ok(Cell::Float((x * mult).round() / mult))
        }
        Func::Ceil | Func::Floor => {
            arity(1)?;
            let v = args[0].eval(row)?;
            if v.is_null() {
                return Ok(Cell::Null);
            }
            let x = v
                .as_f64()
                .ok_or_else(|| DbError::type_mismatch("function requires a numeric argument"))?;
            Ok(Cell::Float(if func == Func::Ceil {
                x.ceil()
            } else {
                x.floor()
            }))
        }
        Func::Coalesce => {
            for a in args {
                let v = a.eval(row)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Cell::Null)
        }
        Func::Nullif => {
            arity(2)?;
            let a = args[0].eval(row)?;
            let b = args[1].eval(row)?;
            if a.sql_eq(&b) {
                Ok(Cell::Null)
            } else {
                Ok(a)
            }
        }
        Func::ConcatWs => {
            let mut out = String::new();
            for a in args {
                let v = a.eval(row)?;
                if let Some(s) = format_cell(&v, None) {
                    out.push_str(&s);
                }
            }
            Ok(Cell::Text(out))
        }
        Func::Substring => {
            if args.len() < 2 || args.len() > 3 {
                return Err(DbError::syntax("substring() expects 2 or 3 arguments"));
            }
            let s = match args[0].eval(row)? {
                Cell::Null => return Ok(Cell::Null),
                Cell::Text(s) => s,
                _ => return Err(DbError::type_mismatch("substring() requires text")),
            };
            let from = args[1].eval(row)?.as_i64().unwrap_or(1).max(1) as usize;
            let chars: Vec<char> = s.chars().collect();
            let start = (from - 1).min(chars.len());
            let end = match args.get(2) {
                Some(e) => {
                    let len = e.eval(row)?.as_i64().unwrap_or(0).max(0) as usize;
                    (start + len).min(chars.len())
                }
                None => chars.len(),
            };
            Ok(Cell::Text(chars[start..end].iter().collect()))
        }
        Func::Extract => {
            arity(2)?;
            let field = match args[0].eval(row)? {
                Cell::Text(f) => f,
                _ => return Err(DbError::syntax("EXTRACT field must be an identifier")),
            };
            let v = args[1].eval(row)?;
            let out = match v {
                Cell::Null => return Ok(Cell::Null),
                Cell::Date(d) => temporal::date_extract(d, &field),
                Cell::Timestamp(t) | Cell::TimestampTz(t) => temporal::timestamp_extract(t, &field),
                Cell::Time(t) => match field.as_str() {
                    "hour" => Some((t / temporal::USEC_PER_HOUR) as f64),
                    "minute" => Some((t % temporal::USEC_PER_HOUR / temporal::USEC_PER_MIN) as f64),
                    "second" => Some((t % temporal::USEC_PER_MIN / temporal::USEC_PER_SEC) as f64),
                    _ => None,
                },
                Cell::Interval(iv) => match field.as_str() {
                    "year" => Some((iv.months / 12) as f64),
                    "month" => Some((iv.months % 12) as f64),
                    "day" => Some(iv.days as f64),
                    "hour" => Some((iv.usec / temporal::USEC_PER_HOUR) as f64),
                    "minute" => Some((iv.usec % temporal::USEC_PER_HOUR / temporal::USEC_PER_MIN) as f64),
                    "second" => Some((iv.usec % temporal::USEC_PER_MIN / temporal::USEC_PER_SEC) as f64),
                    _ => None,
                },
                _ => return Err(DbError::type_mismatch("EXTRACT requires a temporal argument")),
            };
            match out {
                Some(v) => Ok(Cell::Float(v)),
                None => Err(DbError::syntax(format!(
                    "unsupported EXTRACT field: {field}"
                ))),
            }
        }
        Func::DateTrunc => {
            arity(2)?;
            let field = match args[0].eval(row)? {
                Cell::Text(f) => f.to_lowercase(),
                _ => return Err(DbError::syntax("date_trunc field must be text")),
            };
            match args[1].eval(row)? {
                Cell::Null => Ok(Cell::Null),
                Cell::Date(d) => Ok(Cell::Date(temporal::date_trunc_days(d, &field))),
                Cell::Timestamp(t) => Ok(Cell::Timestamp(temporal::timestamp_trunc_usec(t, &field))),
                Cell::TimestampTz(t) => {
                    Ok(Cell::TimestampTz(temporal::timestamp_trunc_usec(t, &field)))
                }
                _ => Err(DbError::type_mismatch(
                    "date_trunc requires a date or timestamp argument",
                )),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(c: Cell) -> ScalarExpr {
        ScalarExpr::Literal(c)
    }

    fn bin(op: BinOp, l: ScalarExpr, r: ScalarExpr) -> ScalarExpr {
        ScalarExpr::Binary {
            op,
            left: Box::new(l),
            right: Box::new(r),
        }
    }

    #[test]
    fn null_propagates_through_arithmetic() {
        let e = bin(BinOp::Add, lit(Cell::Int(1)), lit(Cell::Null));
        assert_eq!(e.eval(&EmptyRow).unwrap(), Cell::Null);
    }

    #[test]
    fn three_valued_logic() {
        // NULL AND FALSE = FALSE, NULL AND TRUE = NULL
        let and_false = bin(BinOp::And, lit(Cell::Null), lit(Cell::Bool(false)));
        assert_eq!(and_false.eval(&EmptyRow).unwrap(), Cell::Bool(false));
        let and_true = bin(BinOp::And, lit(Cell::Null), lit(Cell::Bool(true)));
        assert_eq!(and_true.eval(&EmptyRow).unwrap(), Cell::Null);
        // NULL OR TRUE = TRUE
        let or_true = bin(BinOp::Or, lit(Cell::Null), lit(Cell::Bool(true)));
        assert_eq!(or_true.eval(&EmptyRow).unwrap(), Cell::Bool(true));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let e = bin(BinOp::Div, lit(Cell::Int(1)), lit(Cell::Int(0)));
        let err = e.eval(&EmptyRow).unwrap_err();
        assert_eq!(err.sqlstate, "22012");
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let e = bin(BinOp::Add, lit(Cell::BigInt(i64::MAX)), lit(Cell::Int(1)));
        let err = e.eval(&EmptyRow).unwrap_err();
        assert_eq!(err.sqlstate, "22003");
    }

    #[test]
    fn text_operand_coerces_against_typed_side() {
        let e = bin(BinOp::Eq, lit(Cell::Int(2)), lit(Cell::Text("2".into())));
        assert_eq!(e.eval(&EmptyRow).unwrap(), Cell::Bool(true));
    }

    #[test]
    fn date_interval_arithmetic() {
        let d = crate::temporal::ymd_to_days(2024, 1, 31);
        let iv = Interval {
            months: 1,
            days: 0,
            usec: 0,
        };
        let e = bin(BinOp::Add, lit(Cell::Date(d)), lit(Cell::Interval(iv)));
        assert_eq!(
            format_cell(&e.eval(&EmptyRow).unwrap(), None).unwrap(),
            "2024-02-29"
        );
    }

    #[test]
    fn like_and_ilike() {
        let e = ScalarExpr::Like {
            expr: Box::new(lit(Cell::Text("hello world".into()))),
            pattern: Box::new(lit(Cell::Text("hel%_orld".into()))),
            negated: false,
            case_insensitive: false,
        };
        assert_eq!(e.eval(&EmptyRow).unwrap(), Cell::Bool(true));

        let e = ScalarExpr::Like {
            expr: Box::new(lit(Cell::Text("HELLO".into()))),
            pattern: Box::new(lit(Cell::Text("hello".into()))),
            negated: false,
            case_insensitive: true,
        };
        assert_eq!(e.eval(&EmptyRow).unwrap(), Cell::Bool(true));
    }

    #[test]
    fn coalesce_accepts_null_inputs() {
        let e = ScalarExpr::Func {
            func: Func::Coalesce,
            args: vec![lit(Cell::Null), lit(Cell::Int(5))],
        };
        assert_eq!(e.eval(&EmptyRow).unwrap(), Cell::Int(5));
    }

    #[test]
    fn in_list_with_null_is_unknown() {
        let e = ScalarExpr::InList {
            expr: Box::new(lit(Cell::Int(9))),
            list: vec![lit(Cell::Int(1)), lit(Cell::Null)],
            negated: false,
        };
        assert_eq!(e.eval(&EmptyRow).unwrap(), Cell::Null);
    }

    #[test]
    fn is_distinct_from_is_null_safe() {
        let e = ScalarExpr::IsDistinct {
            left: Box::new(lit(Cell::Null)),
            right: Box::new(lit(Cell::Null)),
            negated: false,
        };
        assert_eq!(e.eval(&EmptyRow).unwrap(), Cell::Bool(false));
    }
}
