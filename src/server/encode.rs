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

//! Encode engine result sets into pgwire `QueryResponse` messages.
//! Cells are encoded by their declared wire type, so the same row data
//! serves both text and binary result formats.

use std::sync::Arc;

use futures::stream;
use pgwire::api::portal::Format;
use pgwire::api::results::{DataRowEncoder, FieldFormat, FieldInfo, QueryResponse};
use pgwire::api::Type;
use pgwire::error::PgWireResult;

use super::types::pg_type_of;
use crate::sql::OutCol;
use crate::value::{format_cell, Cell};

/// RowDescription fields for a result shape. `fmt` carries the client's
/// requested result formats (Extended); `None` means text (Simple).
/// Both paths declare the real type OIDs.
pub fn row_schema(columns: &[OutCol], fmt: Option<&Format>) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let field_format = match fmt {
                Some(f) => f.format_for(i),
                None => FieldFormat::Text,
            };
            FieldInfo::new(c.name.clone(), None, None, pg_type_of(c.ty), field_format)
        })
        .collect()
}

fn encode_cell(encoder: &mut DataRowEncoder, cell: &Cell, ty: &Type) -> PgWireResult<()> {
    if *ty == Type::BOOL {
        encoder.encode_field(&match cell {
            Cell::Bool(b) => Some(*b),
            _ => None,
        })
    } else if *ty == Type::INT2 {
        encoder.encode_field(&cell.as_i64().map(|v| v as i16))
    } else if *ty == Type::INT4 {
        encoder.encode_field(&cell.as_i64().map(|v| v as i32))
    } else if *ty == Type::INT8 {
        encoder.encode_field(&cell.as_i64())
    } else if *ty == Type::FLOAT8 {
        encoder.encode_field(&cell.as_f64())
    } else {
        encoder.encode_field(&format_cell(cell, None))
    }
}

/// Encode a full result set. Values are pre-materialized cells from the
/// engine thread; this is purely a wire-encoding step.
pub fn encode_rows(
    columns: &[OutCol],
    rows: Vec<Vec<Cell>>,
    fmt: Option<&Format>,
) -> PgWireResult<QueryResponse> {
    let schema = Arc::new(row_schema(columns, fmt));
    let types: Vec<Type> = schema.iter().map(|f| f.datatype().clone()).collect();

    let mut results = Vec::with_capacity(rows.len());
    let mut encoder = DataRowEncoder::new(schema.clone());
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            encode_cell(&mut encoder, cell, &types[i])?;
        }
        results.push(Ok(encoder.take_row()));
    }

    Ok(QueryResponse::new(schema, stream::iter(results)))
}
