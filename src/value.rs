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

//! Column types and the dynamically-typed scalar cell. Cells carry a
//! runtime type tag because SQL values are dynamically typed across
//! expression evaluation (NULL, arithmetic widening, coercion).

use std::cmp::Ordering;

use uuid::Uuid;

use crate::temporal::{self, Interval};
use crate::{DbError, DbResult};

// ---------------------------------------------------------------------------
// Column types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    SmallInt,
    Int,
    Float,
    Text,
    Enum,
    Boolean,
    BigInt,
    Numeric,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
}

/// Physical storage class inside a column block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    I16,
    I32,
    I64,
    F64,
    Str,
    Interval,
    Uuid,
}

/// PostgreSQL type metadata — single source of truth for OID, typname,
/// display name and storage length across the catalog and the wire.
pub struct PgTypeInfo {
    pub oid: u32,
    pub typname: &'static str,
    pub display_name: &'static str,
    pub typlen: i16,
}

static PG_TYPE_TABLE: [PgTypeInfo; 14] = [
    PgTypeInfo { oid: 21, typname: "int2", display_name: "smallint", typlen: 2 },
    PgTypeInfo { oid: 23, typname: "int4", display_name: "integer", typlen: 4 },
    PgTypeInfo { oid: 701, typname: "float8", display_name: "double precision", typlen: 8 },
    PgTypeInfo { oid: 25, typname: "text", display_name: "text", typlen: -1 },
    PgTypeInfo { oid: 25, typname: "text", display_name: "USER-DEFINED", typlen: 4 },
    PgTypeInfo { oid: 16, typname: "bool", display_name: "boolean", typlen: 1 },
    PgTypeInfo { oid: 20, typname: "int8", display_name: "bigint", typlen: 8 },
    PgTypeInfo { oid: 1700, typname: "numeric", display_name: "numeric", typlen: -1 },
    PgTypeInfo { oid: 1082, typname: "date", display_name: "date", typlen: 4 },
    PgTypeInfo { oid: 1083, typname: "time", display_name: "time without time zone", typlen: 8 },
    PgTypeInfo { oid: 1114, typname: "timestamp", display_name: "timestamp without time zone", typlen: 8 },
    PgTypeInfo { oid: 1184, typname: "timestamptz", display_name: "timestamp with time zone", typlen: 8 },
    PgTypeInfo { oid: 1186, typname: "interval", display_name: "interval", typlen: 16 },
    PgTypeInfo { oid: 2950, typname: "uuid", display_name: "uuid", typlen: 16 },
];

impl ColumnType {
    fn table_index(self) -> usize {
        match self {
            ColumnType::SmallInt => 0,
            ColumnType::Int => 1,
            ColumnType::Float => 2,
            ColumnType::Text => 3,
            ColumnType::Enum => 4,
            ColumnType::Boolean => 5,
            ColumnType::BigInt => 6,
            ColumnType::Numeric => 7,
            ColumnType::Date => 8,
            ColumnType::Time => 9,
            ColumnType::Timestamp => 10,
            ColumnType::TimestampTz => 11,
            ColumnType::Interval => 12,
            ColumnType::Uuid => 13,
        }
    }

    pub fn pg_info(self) -> &'static PgTypeInfo {
        &PG_TYPE_TABLE[self.table_index()]
    }

    pub fn oid(self) -> u32 {
        self.pg_info().oid
    }

    pub fn display_name(self) -> &'static str {
        self.pg_info().display_name
    }

    pub fn typname(self) -> &'static str {
        self.pg_info().typname
    }

    pub fn typlen(self) -> i16 {
        self.pg_info().typlen
    }

    pub fn storage(self) -> Storage {
        match self {
            ColumnType::SmallInt => Storage::I16,
            ColumnType::Int | ColumnType::Boolean | ColumnType::Date | ColumnType::Enum => {
                Storage::I32
            }
            ColumnType::BigInt
            | ColumnType::Time
            | ColumnType::Timestamp
            | ColumnType::TimestampTz => Storage::I64,
            ColumnType::Float | ColumnType::Numeric => Storage::F64,
            ColumnType::Text => Storage::Str,
            ColumnType::Interval => Storage::Interval,
            ColumnType::Uuid => Storage::Uuid,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ColumnType::SmallInt | ColumnType::Int | ColumnType::BigInt)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, ColumnType::Float | ColumnType::Numeric)
    }

    pub fn is_textual(self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Enum)
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// A single dynamically-typed scalar. `Null` is its own variant; SQL NULL
/// is not equal to itself except under null-safe equality.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    #[default]
    Null,
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Date(i32),
    Time(i64),
    Timestamp(i64),
    TimestampTz(i64),
    Interval(Interval),
    Uuid(Uuid),
    /// 0-based ordinal into the enum type's value list.
    Enum(i32),
}

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut h = FNV_OFFSET;
    for &b in bytes {
        h ^= b as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// The column type a cell naturally belongs to; `None` for NULL.
    pub fn ty_hint(&self) -> Option<ColumnType> {
        match self {
            Cell::Null => None,
            Cell::SmallInt(_) => Some(ColumnType::SmallInt),
            Cell::Int(_) => Some(ColumnType::Int),
            Cell::BigInt(_) => Some(ColumnType::BigInt),
            Cell::Float(_) => Some(ColumnType::Float),
            Cell::Bool(_) => Some(ColumnType::Boolean),
            Cell::Text(_) => Some(ColumnType::Text),
            Cell::Date(_) => Some(ColumnType::Date),
            Cell::Time(_) => Some(ColumnType::Time),
            Cell::Timestamp(_) => Some(ColumnType::Timestamp),
            Cell::TimestampTz(_) => Some(ColumnType::TimestampTz),
            Cell::Interval(_) => Some(ColumnType::Interval),
            Cell::Uuid(_) => Some(ColumnType::Uuid),
            Cell::Enum(_) => Some(ColumnType::Enum),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Cell::SmallInt(v) => Some(v as i64),
            Cell::Int(v) => Some(v as i64),
            Cell::BigInt(v) => Some(v),
            Cell::Bool(v) => Some(v as i64),
            Cell::Date(v) => Some(v as i64),
            Cell::Time(v) | Cell::Timestamp(v) | Cell::TimestampTz(v) => Some(v),
            Cell::Enum(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Cell::Float(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// FNV-1a over the canonical bytes of the value. NULL hashes to 0.
    pub fn hash32(&self) -> u32 {
        match self {
            Cell::Null => 0,
            Cell::SmallInt(v) => fnv1a(&(*v as i32).to_ne_bytes()),
            Cell::Int(v) | Cell::Date(v) | Cell::Enum(v) => fnv1a(&v.to_ne_bytes()),
            Cell::BigInt(v) | Cell::Time(v) | Cell::Timestamp(v) | Cell::TimestampTz(v) => {
                fnv1a(&v.to_ne_bytes())
            }
            Cell::Bool(v) => fnv1a(&(*v as i32).to_ne_bytes()),
            Cell::Float(v) => fnv1a(&v.to_bits().to_ne_bytes()),
            Cell::Text(s) => fnv1a(s.as_bytes()),
            Cell::Uuid(u) => {
                let h = {
                    let b = u.as_u128();
                    let mut h: u64 = 14_695_981_039_346_656_037;
                    h ^= (b >> 64) as u64;
                    h = h.wrapping_mul(1_099_511_628_211);
                    h ^= b as u64;
                    h = h.wrapping_mul(1_099_511_628_211);
                    h
                };
                (h ^ (h >> 32)) as u32
            }
            Cell::Interval(iv) => {
                let mut h = fnv1a(&iv.months.to_ne_bytes());
                for &b in iv.days.to_ne_bytes().iter().chain(iv.usec.to_ne_bytes().iter()) {
                    h ^= b as u32;
                    h = h.wrapping_mul(FNV_PRIME);
                }
                h
            }
        }
    }

    /// Strict SQL equality: false whenever either side is NULL. Numeric
    /// cells compare across widths; everything else by canonical value.
    pub fn sql_eq(&self, other: &Cell) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Null-safe equality: NULL equals NULL, used by GROUP BY, DISTINCT
    /// and IS NOT DISTINCT FROM.
    pub fn eq_nullsafe(&self, other: &Cell) -> bool {
        match (self.is_null(), other.is_null()) {
            (true, true) => true,
            (false, false) => self.compare(other) == Some(Ordering::Equal),
            _ => false,
        }
    }

    /// Total order over non-NULL cells of comparable types. Returns
    /// `None` for NULL operands or incomparable type combinations.
    pub fn compare(&self, other: &Cell) -> Option<Ordering> {
        use Cell::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Text(a), Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Uuid(a), Uuid(b)) => Some(a.cmp(b)),
            (Interval(a), Interval(b)) => Some(a.approx_usec().cmp(&b.approx_usec())),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            _ if matches!(self, Float(_)) || matches!(other, Float(_)) => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b).or(Some(Ordering::Equal))
            }
            _ => Some(self.as_i64()?.cmp(&other.as_i64()?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Coercion into a declared column type
// ---------------------------------------------------------------------------

fn int_in_range(v: i64, min: i64, max: i64, ty: &str) -> DbResult<i64> {
    if v < min || v > max {
        Err(DbError::numeric_out_of_range(format!(
            "value {v} out of range for type {ty}"
        )))
    } else {
        Ok(v)
    }
}

/// Coerce a cell to a column's declared type, parsing text literals for
/// temporal and uuid targets and range-checking integer narrowing.
/// Enum targets are resolved by the caller (the label list lives in the
/// schema), so `Enum` cells must already be ordinals here.
pub fn coerce_cell(cell: Cell, target: ColumnType) -> DbResult<Cell> {
    if cell.is_null() {
        return Ok(Cell::Null);
    }
    let fail = |cell: &Cell| {
        Err(DbError::type_mismatch(format!(
            "cannot coerce {} to {}",
            cell.ty_hint().map(|t| t.display_name()).unwrap_or("null"),
            target.display_name()
        )))
    };

    match target {
        ColumnType::SmallInt => match cell {
            Cell::SmallInt(_) => Ok(cell),
            Cell::Float(v) => Ok(Cell::SmallInt(int_in_range(
                v as i64,
                i16::MIN as i64,
                i16::MAX as i64,
                "smallint",
            )? as i16)),
            Cell::Text(_) => numeric_from_text(&cell, target),
            _ => match cell.as_i64() {
                Some(v) => Ok(Cell::SmallInt(
                    int_in_range(v, i16::MIN as i64, i16::MAX as i64, "smallint")? as i16,
                )),
                None => fail(&cell),
            },
        },
        ColumnType::Int => match cell {
            Cell::Int(_) => Ok(cell),
            Cell::Float(v) => Ok(Cell::Int(int_in_range(
                v as i64,
                i32::MIN as i64,
                i32::MAX as i64,
                "integer",
            )? as i32)),
            Cell::Text(_) => numeric_from_text(&cell, target),
            _ => match cell.as_i64() {
                Some(v) => Ok(Cell::Int(
                    int_in_range(v, i32::MIN as i64, i32::MAX as i64, "integer")? as i32,
                )),
                None => fail(&cell),
            },
        },
        ColumnType::BigInt => match cell {
            Cell::BigInt(_) => Ok(cell),
            Cell::Float(v) => Ok(Cell::BigInt(v as i64)),
            Cell::Text(_) => numeric_from_text(&cell, target),
            _ => match cell.as_i64() {
                Some(v) => Ok(Cell::BigInt(v)),
                None => fail(&cell),
            },
        },
        ColumnType::Float | ColumnType::Numeric => match cell {
            Cell::Float(_) => Ok(cell),
            Cell::Text(ref s) => match s.trim().parse::<f64>() {
                Ok(v) => Ok(Cell::Float(v)),
                Err(_) => Err(DbError::invalid_text(format!(
                    "invalid input syntax for type {}: \"{s}\"",
                    target.display_name()
                ))),
            },
            _ => match cell.as_f64() {
                Some(v) => Ok(Cell::Float(v)),
                None => fail(&cell),
            },
        },
        ColumnType::Boolean => match cell {
            Cell::Bool(_) => Ok(cell),
            Cell::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "on" | "1" | "yes" => Ok(Cell::Bool(true)),
                "f" | "false" | "off" | "0" | "no" => Ok(Cell::Bool(false)),
                _ => Err(DbError::invalid_text(format!(
                    "invalid input syntax for type boolean: \"{s}\""
                ))),
            },
            Cell::SmallInt(_) | Cell::Int(_) | Cell::BigInt(_) => {
                Ok(Cell::Bool(cell.as_i64() != Some(0)))
            }
            _ => fail(&cell),
        },
        ColumnType::Text => match cell {
            Cell::Text(_) => Ok(cell),
            _ => Ok(Cell::Text(format_cell(&cell, None).unwrap_or_default())),
        },
        ColumnType::Date => match cell {
            Cell::Date(_) => Ok(cell),
            Cell::Timestamp(v) | Cell::TimestampTz(v) => {
                Ok(Cell::Date(temporal::timestamp_split(v).0))
            }
            Cell::Text(ref s) => temporal::date_from_str(s).map(Cell::Date).ok_or_else(|| {
                DbError::invalid_text(format!("invalid input syntax for type date: \"{s}\""))
            }),
            _ => fail(&cell),
        },
        ColumnType::Time => match cell {
            Cell::Time(_) => Ok(cell),
            Cell::Text(ref s) => temporal::time_from_str(s).map(Cell::Time).ok_or_else(|| {
                DbError::invalid_text(format!("invalid input syntax for type time: \"{s}\""))
            }),
            _ => fail(&cell),
        },
        ColumnType::Timestamp | ColumnType::TimestampTz => {
            let wrap = |v| {
                if target == ColumnType::Timestamp {
                    Cell::Timestamp(v)
                } else {
                    Cell::TimestampTz(v)
                }
            };
            match cell {
                Cell::Timestamp(v) | Cell::TimestampTz(v) => Ok(wrap(v)),
                Cell::Date(d) => Ok(wrap(d as i64 * temporal::USEC_PER_DAY)),
                Cell::Text(ref s) => {
                    temporal::timestamp_from_str(s).map(wrap).ok_or_else(|| {
                        DbError::invalid_text(format!(
                            "invalid input syntax for type {}: \"{s}\"",
                            target.display_name()
                        ))
                    })
                }
                _ => fail(&cell),
            }
        }
        ColumnType::Interval => match cell {
            Cell::Interval(_) => Ok(cell),
            Cell::Text(ref s) => Ok(Cell::Interval(temporal::interval_from_str(s))),
            _ => fail(&cell),
        },
        ColumnType::Uuid => match cell {
            Cell::Uuid(_) => Ok(cell),
            Cell::Text(ref s) => Uuid::parse_str(s.trim()).map(Cell::Uuid).map_err(|_| {
                DbError::invalid_text(format!("invalid input syntax for type uuid: \"{s}\""))
            }),
            _ => fail(&cell),
        },
        ColumnType::Enum => match cell {
            Cell::Enum(_) => Ok(cell),
            _ => fail(&cell),
        },
    }
}

fn numeric_from_text(cell: &Cell, target: ColumnType) -> DbResult<Cell> {
    if let Cell::Text(s) = cell {
        let v: i64 = s.trim().parse().map_err(|_| {
            DbError::invalid_text(format!(
                "invalid input syntax for type {}: \"{s}\"",
                target.display_name()
            ))
        })?;
        coerce_cell(Cell::BigInt(v), target)
    } else {
        Err(DbError::type_mismatch("not text"))
    }
}

// ---------------------------------------------------------------------------
// Text formatting
// ---------------------------------------------------------------------------

/// Render a double the way the wire expects: round-trip precision with
/// trailing zeros trimmed.
pub fn format_f64(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Format a cell as its text-protocol representation; NULL is `None`.
/// Enum cells need the label list from the schema; when absent the raw
/// ordinal is printed.
pub fn format_cell(cell: &Cell, enum_labels: Option<&[String]>) -> Option<String> {
    match cell {
        Cell::Null => None,
        Cell::SmallInt(v) => Some(v.to_string()),
        Cell::Int(v) => Some(v.to_string()),
        Cell::BigInt(v) => Some(v.to_string()),
        Cell::Float(v) => Some(format_f64(*v)),
        Cell::Bool(v) => Some(if *v { "t".into() } else { "f".into() }),
        Cell::Text(s) => Some(s.clone()),
        Cell::Date(d) => Some(temporal::date_to_string(*d)),
        Cell::Time(t) => Some(temporal::time_to_string(*t)),
        Cell::Timestamp(t) => Some(temporal::timestamp_to_string(*t)),
        Cell::TimestampTz(t) => Some(temporal::timestamptz_to_string(*t)),
        Cell::Interval(iv) => Some(temporal::interval_to_string(*iv)),
        Cell::Uuid(u) => Some(u.as_hyphenated().to_string()),
        Cell::Enum(ord) => match enum_labels.and_then(|ls| ls.get(*ord as usize)) {
            Some(label) => Some(label.clone()),
            None => Some(ord.to_string()),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_not_equal_to_itself() {
        assert!(!Cell::Null.sql_eq(&Cell::Null));
        assert!(Cell::Null.eq_nullsafe(&Cell::Null));
        assert!(!Cell::Null.eq_nullsafe(&Cell::Int(0)));
    }

    #[test]
    fn numeric_cross_width_compare() {
        assert!(Cell::SmallInt(7).sql_eq(&Cell::BigInt(7)));
        assert!(Cell::Int(3).sql_eq(&Cell::Float(3.0)));
        assert_eq!(
            Cell::Float(2.5).compare(&Cell::Int(3)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn hash_matches_equality() {
        let a = Cell::Int(42);
        let b = Cell::Int(42);
        assert_eq!(a.hash32(), b.hash32());
        assert_eq!(Cell::Null.hash32(), 0);
        assert_ne!(Cell::Text("a".into()).hash32(), Cell::Text("b".into()).hash32());
    }

    #[test]
    fn coerce_narrowing_checks_range() {
        assert!(coerce_cell(Cell::BigInt(1 << 40), ColumnType::Int).is_err());
        assert_eq!(
            coerce_cell(Cell::BigInt(7), ColumnType::SmallInt).unwrap(),
            Cell::SmallInt(7)
        );
    }

    #[test]
    fn coerce_temporal_from_text() {
        let d = coerce_cell(Cell::Text("2024-05-06".into()), ColumnType::Date).unwrap();
        assert_eq!(format_cell(&d, None).unwrap(), "2024-05-06");
        assert!(coerce_cell(Cell::Text("bogus".into()), ColumnType::Date).is_err());
        let u = coerce_cell(
            Cell::Text("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11".into()),
            ColumnType::Uuid,
        )
        .unwrap();
        assert_eq!(
            format_cell(&u, None).unwrap(),
            "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"
        );
    }

    #[test]
    fn float_formatting_trims() {
        assert_eq!(format_f64(3.0), "3");
        assert_eq!(format_f64(1.5), "1.5");
        assert_eq!(format_f64(-2.25), "-2.25");
    }

    #[test]
    fn bool_text_form() {
        assert_eq!(format_cell(&Cell::Bool(true), None).unwrap(), "t");
        assert_eq!(format_cell(&Cell::Bool(false), None).unwrap(), "f");
    }
}
