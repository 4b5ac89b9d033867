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

//! Type mapping between engine column types and PostgreSQL wire types.

use pgwire::api::Type;

use crate::value::ColumnType;

/// Wire type of a column: the real OID on both the Simple and Extended
/// paths, matching the `pg_type` mirror. Types without a native value
/// lane in the encoder still declare their own OID; their cells go out
/// as text bytes.
pub fn pg_type_of(ty: ColumnType) -> Type {
    match ty {
        ColumnType::Boolean => Type::BOOL,
        ColumnType::SmallInt => Type::INT2,
        ColumnType::Int => Type::INT4,
        ColumnType::BigInt => Type::INT8,
        ColumnType::Float => Type::FLOAT8,
        ColumnType::Numeric => Type::NUMERIC,
        ColumnType::Text | ColumnType::Enum => Type::TEXT,
        ColumnType::Date => Type::DATE,
        ColumnType::Time => Type::TIME,
        ColumnType::Timestamp => Type::TIMESTAMP,
        ColumnType::TimestampTz => Type::TIMESTAMPTZ,
        ColumnType::Interval => Type::INTERVAL,
        ColumnType::Uuid => Type::UUID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_description_uses_real_oids() {
        assert_eq!(pg_type_of(ColumnType::Int).oid(), 23);
        assert_eq!(pg_type_of(ColumnType::Text).oid(), 25);
        assert_eq!(pg_type_of(ColumnType::Uuid).oid(), 2950);
        assert_eq!(pg_type_of(ColumnType::TimestampTz).oid(), 1184);
    }

    #[test]
    fn text_lane_types_keep_their_oids() {
        assert_eq!(pg_type_of(ColumnType::Date).oid(), 1082);
        assert_eq!(pg_type_of(ColumnType::Time).oid(), 1083);
        assert_eq!(pg_type_of(ColumnType::Timestamp).oid(), 1114);
        assert_eq!(pg_type_of(ColumnType::Interval).oid(), 1186);
        assert_eq!(pg_type_of(ColumnType::Numeric).oid(), 1700);
    }
}
