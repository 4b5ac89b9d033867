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

//! Virtual catalog: materializes PostgreSQL-compatible `pg_catalog` and
//! `information_schema` tables from the live user schema so client
//! tooling (psql `\d`, JDBC/ODBC introspection) works against plain
//! SELECTs through the normal executor.
//!
//! The mirrors are real tables in the database, rebuilt from scratch in
//! dependency order before any query that references them. They never
//! appear in their own listings. Object identifiers are synthesized
//! deterministically from table and index positions, so the same schema
//! state always produces the same OIDs.

use crate::schema::{ColumnDesc, Database, TableDef};
use crate::value::{Cell, ColumnType};

/// User tables get OIDs from 16384 (the first non-reserved OID in
/// PostgreSQL); indexes from 32768, spread per table.
const TABLE_OID_BASE: i32 = 16384;
const INDEX_OID_BASE: i32 = 32768;

pub fn is_catalog_table(name: &str) -> bool {
    name.starts_with("pg_") || name.starts_with("information_schema_")
}

/// Resolve a schema-qualified name to its storage name:
/// `pg_catalog.X` → `X`, `information_schema.X` → `information_schema_X`,
/// `public.X` → `X`.
pub fn resolve_name(schema: &str, table: &str) -> Option<String> {
    if schema.eq_ignore_ascii_case("pg_catalog") || schema.eq_ignore_ascii_case("public") {
        return Some(table.to_string());
    }
    if schema.eq_ignore_ascii_case("information_schema") {
        return Some(format!("information_schema_{table}"));
    }
    None
}

// ---------------------------------------------------------------------------
// Row/column helpers
// ---------------------------------------------------------------------------

fn text_col(t: &mut TableDef, name: &str) {
    t.columns.push(ColumnDesc::new(name, ColumnType::Text));
}

fn int_col(t: &mut TableDef, name: &str) {
    t.columns.push(ColumnDesc::new(name, ColumnType::Int));
}

fn bool_col(t: &mut TableDef, name: &str) {
    t.columns.push(ColumnDesc::new(name, ColumnType::Boolean));
}

fn txt(v: &str) -> Cell {
    Cell::Text(v.to_string())
}

fn remove_mirror(db: &mut Database, name: &str) {
    if let Some(i) = db.table_index(name) {
        db.tables.remove(i);
    }
}

/// User tables with their deterministic positions (mirrors and
/// double-underscore temps excluded).
fn user_tables(db: &Database) -> Vec<(usize, &TableDef)> {
    db.tables
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.name.starts_with("__") && !is_catalog_table(&t.name))
        .collect()
}

// ---------------------------------------------------------------------------
// Builders, in dependency order
// ---------------------------------------------------------------------------

fn build_pg_namespace(db: &mut Database) {
    remove_mirror(db, "pg_namespace");
    let mut t = TableDef::new("pg_namespace");
    int_col(&mut t, "oid");
    text_col(&mut t, "nspname");
    int_col(&mut t, "nspowner");
    t.rows.push(vec![Cell::Int(11), txt("pg_catalog"), Cell::Int(10)]);
    t.rows.push(vec![Cell::Int(2200), txt("public"), Cell::Int(10)]);
    t.rows
        .push(vec![Cell::Int(13060), txt("information_schema"), Cell::Int(10)]);
    db.tables.push(t);
}

fn build_pg_type(db: &mut Database) {
    remove_mirror(db, "pg_type");
    let mut t = TableDef::new("pg_type");
    int_col(&mut t, "oid");
    text_col(&mut t, "typname");
    int_col(&mut t, "typnamespace");
    int_col(&mut t, "typlen");
    text_col(&mut t, "typtype");
    int_col(&mut t, "typbasetype");
    int_col(&mut t, "typtypmod");
    bool_col(&mut t, "typnotnull");
    int_col(&mut t, "typrelid");
    int_col(&mut t, "typcollation");

    const TYPES: &[(i32, &str, i32, i32)] = &[
        (16, "bool", 1, 0),
        (20, "int8", 8, 0),
        (21, "int2", 2, 0),
        (23, "int4", 4, 0),
        (25, "text", -1, 100),
        (701, "float8", 8, 0),
        (1043, "varchar", -1, 100),
        (1082, "date", 4, 0),
        (1083, "time", 8, 0),
        (1114, "timestamp", 8, 0),
        (1184, "timestamptz", 8, 0),
        (1186, "interval", 16, 0),
        (1700, "numeric", -1, 0),
        (2950, "uuid", 16, 0),
    ];
    for &(oid, name, len, coll) in TYPES {
        t.rows.push(vec![
            Cell::Int(oid),
            txt(name),
            Cell::Int(11),
            Cell::Int(len),
            txt("b"),
            Cell::Int(0),
            Cell::Int(-1),
            Cell::Bool(false),
            Cell::Int(0),
            Cell::Int(coll),
        ]);
    }
    db.tables.push(t);
}

fn build_pg_class(db: &mut Database) {
    remove_mirror(db, "pg_class");
    let mut t = TableDef::new("pg_class");
    int_col(&mut t, "oid");
    text_col(&mut t, "relname");
    int_col(&mut t, "relnamespace");
    text_col(&mut t, "relkind");
    int_col(&mut t, "relowner");
    int_col(&mut t, "reltuples");
    bool_col(&mut t, "relhasindex");
    int_col(&mut t, "relnatts");
    int_col(&mut t, "relam");
    bool_col(&mut t, "relhasrules");
    bool_col(&mut t, "relhastriggers");
    bool_col(&mut t, "relhassubclass");
    text_col(&mut t, "relacl");
    bool_col(&mut t, "relispartition");
    int_col(&mut t, "reltablespace");
    int_col(&mut t, "relchecks");
    int_col(&mut t, "reloftype");
    bool_col(&mut t, "relrowsecurity");
    bool_col(&mut t, "relforcerowsecurity");
    text_col(&mut t, "relpersistence");
    text_col(&mut t, "relreplident");
    int_col(&mut t, "reltoastrelid");

    let mut rows = Vec::new();
    for (pos, ut) in user_tables(db) {
        let relkind = if ut.is_view() { "v" } else { "r" };
        rows.push(vec![
            Cell::Int(TABLE_OID_BASE + pos as i32),
            txt(&ut.name),
            Cell::Int(2200),
            txt(relkind),
            Cell::Int(10),
            Cell::Int(ut.rows.len() as i32),
            Cell::Bool(!ut.indexes.is_empty()),
            Cell::Int(ut.columns.len() as i32),
            Cell::Int(2), // heap
            Cell::Bool(false),
            Cell::Bool(false),
            Cell::Bool(false),
            Cell::Null,
            Cell::Bool(false),
            Cell::Int(0),
            Cell::Int(0),
            Cell::Int(0),
            Cell::Bool(false),
            Cell::Bool(false),
            txt("p"),
            txt("d"),
            Cell::Int(0),
        ]);
        for (ix_pos, ix) in ut.indexes.iter().enumerate() {
            rows.push(vec![
                Cell::Int(INDEX_OID_BASE + pos as i32 * 100 + ix_pos as i32),
                txt(&ix.name),
                Cell::Int(2200),
                txt("i"),
                Cell::Int(10),
                Cell::Int(0),
                Cell::Bool(false),
                Cell::Int(1),
                Cell::Int(403), // btree
                Cell::Bool(false),
                Cell::Bool(false),
                Cell::Bool(false),
                Cell::Null,
                Cell::Bool(false),
                Cell::Int(0),
                Cell::Int(0),
                Cell::Int(0),
                Cell::Bool(false),
                Cell::Bool(false),
                txt("p"),
                txt("d"),
                Cell::Int(0),
            ]);
        }
    }
    t.rows = rows;
    db.tables.push(t);
}

fn build_pg_attribute(db: &mut Database) {
    remove_mirror(db, "pg_attribute");
    let mut t = TableDef::new("pg_attribute");
    int_col(&mut t, "attrelid");
    text_col(&mut t, "attname");
    int_col(&mut t, "atttypid");
    int_col(&mut t, "atttypmod");
    int_col(&mut t, "attlen");
    int_col(&mut t, "attnum");
    bool_col(&mut t, "attnotnull");
    bool_col(&mut t, "atthasdef");
    bool_col(&mut t, "attisdropped");
    text_col(&mut t, "attidentity");
    text_col(&mut t, "attgenerated");
    int_col(&mut t, "attcollation");

    let mut rows = Vec::new();
    for (pos, ut) in user_tables(db) {
        let relid = TABLE_OID_BASE + pos as i32;
        for (ci, col) in ut.columns.iter().enumerate() {
            let collation = if col.ty == ColumnType::Text { 100 } else { 0 };
            let attlen = match col.ty.typlen() {
                -1 => -1,
                n => n as i32,
            };
            rows.push(vec![
                Cell::Int(relid),
                txt(&col.name),
                Cell::Int(col.ty.oid() as i32),
                Cell::Int(-1),
                Cell::Int(attlen),
                Cell::Int(ci as i32 + 1),
                Cell::Bool(col.not_null),
                Cell::Bool(col.has_default()),
                Cell::Bool(false),
                txt(""),
                txt(""),
                Cell::Int(collation),
            ]);
        }
    }
    t.rows = rows;
    db.tables.push(t);
}

fn build_pg_index(db: &mut Database) {
    remove_mirror(db, "pg_index");
    let mut t = TableDef::new("pg_index");
    int_col(&mut t, "indexrelid");
    int_col(&mut t, "indrelid");
    int_col(&mut t, "indnatts");
    bool_col(&mut t, "indisunique");
    bool_col(&mut t, "indisprimary");
    text_col(&mut t, "indkey");
    bool_col(&mut t, "indisvalid");

    let mut rows = Vec::new();
    for (pos, ut) in user_tables(db) {
        let relid = TABLE_OID_BASE + pos as i32;
        for (ix_pos, ix) in ut.indexes.iter().enumerate() {
            let col = ut.columns.get(ix.column);
            let is_pk = col.is_some_and(|c| c.is_primary_key);
            let is_unique = ix.unique || is_pk || col.is_some_and(|c| c.is_unique);
            rows.push(vec![
                Cell::Int(INDEX_OID_BASE + pos as i32 * 100 + ix_pos as i32),
                Cell::Int(relid),
                Cell::Int(1),
                Cell::Bool(is_unique),
                Cell::Bool(is_pk),
                txt(&(ix.column + 1).to_string()),
                Cell::Bool(true),
            ]);
        }
    }
    t.rows = rows;
    db.tables.push(t);
}

fn build_pg_attrdef(db: &mut Database) {
    remove_mirror(db, "pg_attrdef");
    let mut t = TableDef::new("pg_attrdef");
    int_col(&mut t, "oid");
    int_col(&mut t, "adrelid");
    int_col(&mut t, "adnum");
    text_col(&mut t, "adbin");

    let mut oid = 40000;
    let mut rows = Vec::new();
    for (pos, ut) in user_tables(db) {
        let relid = TABLE_OID_BASE + pos as i32;
        for (ci, col) in ut.columns.iter().enumerate() {
            if !col.has_default() {
                continue;
            }
            rows.push(vec![
                Cell::Int(oid),
                Cell::Int(relid),
                Cell::Int(ci as i32 + 1),
                txt(if col.is_serial {
                    "nextval('seq')"
                } else {
                    "default"
                }),
            ]);
            oid += 1;
        }
    }
    t.rows = rows;
    db.tables.push(t);
}

fn build_pg_constraint(db: &mut Database) {
    remove_mirror(db, "pg_constraint");
    let mut t = TableDef::new("pg_constraint");
    int_col(&mut t, "oid");
    text_col(&mut t, "conname");
    int_col(&mut t, "connamespace");
    text_col(&mut t, "contype");
    int_col(&mut t, "conrelid");
    int_col(&mut t, "confrelid");
    text_col(&mut t, "conkey");
    text_col(&mut t, "confkey");
    bool_col(&mut t, "convalidated");

    let users = user_tables(db);
    let mut oid = 50000;
    let mut rows = Vec::new();
    for &(pos, ut) in &users {
        let relid = TABLE_OID_BASE + pos as i32;
        for (ci, col) in ut.columns.iter().enumerate() {
            let key = format!("{{{}}}", ci + 1);
            if col.is_primary_key {
                rows.push(vec![
                    Cell::Int(oid),
                    txt(&format!("{}_{}_pkey", ut.name, col.name)),
                    Cell::Int(2200),
                    txt("p"),
                    Cell::Int(relid),
                    Cell::Int(0),
                    txt(&key),
                    Cell::Null,
                    Cell::Bool(true),
                ]);
                oid += 1;
            }
            if col.is_unique && !col.is_primary_key {
                rows.push(vec![
                    Cell::Int(oid),
                    txt(&format!("{}_{}_key", ut.name, col.name)),
                    Cell::Int(2200),
                    txt("u"),
                    Cell::Int(relid),
                    Cell::Int(0),
                    txt(&key),
                    Cell::Null,
                    Cell::Bool(true),
                ]);
                oid += 1;
            }
            if let Some(fk) = &col.fk {
                let mut conf_relid = 0;
                let mut conf_key = "{1}".to_string();
                for &(fpos, ft) in &users {
                    if ft.name == fk.table {
                        conf_relid = TABLE_OID_BASE + fpos as i32;
                        if let Some(fci) = ft.col_index(&fk.column) {
                            conf_key = format!("{{{}}}", fci + 1);
                        }
                        break;
                    }
                }
                rows.push(vec![
                    Cell::Int(oid),
                    txt(&format!("{}_{}_fkey", ut.name, col.name)),
                    Cell::Int(2200),
                    txt("f"),
                    Cell::Int(relid),
                    Cell::Int(conf_relid),
                    txt(&key),
                    txt(&conf_key),
                    Cell::Bool(true),
                ]);
                oid += 1;
            }
        }
    }
    t.rows = rows;
    db.tables.push(t);
}

fn build_pg_am(db: &mut Database) {
    remove_mirror(db, "pg_am");
    let mut t = TableDef::new("pg_am");
    int_col(&mut t, "oid");
    text_col(&mut t, "amname");
    text_col(&mut t, "amtype");
    t.rows.push(vec![Cell::Int(2), txt("heap"), txt("t")]);
    t.rows.push(vec![Cell::Int(403), txt("btree"), txt("i")]);
    t.rows.push(vec![Cell::Int(405), txt("hash"), txt("i")]);
    db.tables.push(t);
}

fn build_pg_database(db: &mut Database) {
    remove_mirror(db, "pg_database");
    let name = db.name.clone();
    let mut t = TableDef::new("pg_database");
    int_col(&mut t, "oid");
    text_col(&mut t, "datname");
    int_col(&mut t, "datdba");
    int_col(&mut t, "encoding");
    text_col(&mut t, "datcollate");
    text_col(&mut t, "datctype");
    text_col(&mut t, "datacl");
    t.rows.push(vec![
        Cell::Int(TABLE_OID_BASE),
        txt(&name),
        Cell::Int(10),
        Cell::Int(6), // UTF8
        txt("en_US.UTF-8"),
        txt("en_US.UTF-8"),
        Cell::Null,
    ]);
    db.tables.push(t);
}

fn build_pg_roles(db: &mut Database) {
    remove_mirror(db, "pg_roles");
    let name = db.name.clone();
    let mut t = TableDef::new("pg_roles");
    int_col(&mut t, "oid");
    text_col(&mut t, "rolname");
    bool_col(&mut t, "rolsuper");
    bool_col(&mut t, "rolcreatedb");
    bool_col(&mut t, "rolcreaterole");
    bool_col(&mut t, "rolinherit");
    bool_col(&mut t, "rolcanlogin");
    t.rows.push(vec![
        Cell::Int(10),
        txt(&name),
        Cell::Bool(true),
        Cell::Bool(true),
        Cell::Bool(true),
        Cell::Bool(true),
        Cell::Bool(true),
    ]);
    db.tables.push(t);
}

fn build_pg_settings(db: &mut Database) {
    remove_mirror(db, "pg_settings");
    let mut t = TableDef::new("pg_settings");
    text_col(&mut t, "name");
    text_col(&mut t, "setting");
    text_col(&mut t, "category");

    const SETTINGS: &[(&str, &str, &str)] = &[
        ("server_version", "15.0", "Version"),
        ("server_encoding", "UTF8", "Client"),
        ("client_encoding", "UTF8", "Client"),
        ("search_path", "\"$user\", public", "Client"),
        ("standard_conforming_strings", "on", "Client"),
        ("TimeZone", "UTC", "Client"),
        ("DateStyle", "ISO, MDY", "Client"),
        ("IntervalStyle", "postgres", "Client"),
        ("integer_datetimes", "on", "Preset"),
        ("max_identifier_length", "63", "Preset"),
    ];
    for &(name, setting, cat) in SETTINGS {
        t.rows.push(vec![txt(name), txt(setting), txt(cat)]);
    }
    db.tables.push(t);
}

fn build_pg_policy(db: &mut Database) {
    remove_mirror(db, "pg_policy");
    let mut t = TableDef::new("pg_policy");
    int_col(&mut t, "oid");
    text_col(&mut t, "polname");
    int_col(&mut t, "polrelid");
    text_col(&mut t, "polcmd");
    bool_col(&mut t, "polpermissive");
    text_col(&mut t, "polroles");
    int_col(&mut t, "polqual");
    int_col(&mut t, "polwithcheck");
    // no row-level security policies
    db.tables.push(t);
}

fn build_pg_collation(db: &mut Database) {
    remove_mirror(db, "pg_collation");
    let mut t = TableDef::new("pg_collation");
    int_col(&mut t, "oid");
    text_col(&mut t, "collname");
    int_col(&mut t, "collnamespace");
    // no custom collations
    db.tables.push(t);
}

fn build_information_schema_tables(db: &mut Database) {
    remove_mirror(db, "information_schema_tables");
    let db_name = db.name.clone();
    let mut t = TableDef::new("information_schema_tables");
    text_col(&mut t, "table_catalog");
    text_col(&mut t, "table_schema");
    text_col(&mut t, "table_name");
    text_col(&mut t, "table_type");

    let mut rows = Vec::new();
    for (_, ut) in user_tables(db) {
        let ttype = if ut.is_view() { "VIEW" } else { "BASE TABLE" };
        rows.push(vec![txt(&db_name), txt("public"), txt(&ut.name), txt(ttype)]);
    }
    t.rows = rows;
    db.tables.push(t);
}

fn build_information_schema_columns(db: &mut Database) {
    remove_mirror(db, "information_schema_columns");
    let db_name = db.name.clone();
    let mut t = TableDef::new("information_schema_columns");
    text_col(&mut t, "table_catalog");
    text_col(&mut t, "table_schema");
    text_col(&mut t, "table_name");
    text_col(&mut t, "column_name");
    int_col(&mut t, "ordinal_position");
    text_col(&mut t, "column_default");
    text_col(&mut t, "is_nullable");
    text_col(&mut t, "data_type");
    text_col(&mut t, "udt_name");

    let mut rows = Vec::new();
    for (_, ut) in user_tables(db) {
        for (ci, col) in ut.columns.iter().enumerate() {
            rows.push(vec![
                txt(&db_name),
                txt("public"),
                txt(&ut.name),
                txt(&col.name),
                Cell::Int(ci as i32 + 1),
                Cell::Null,
                txt(if col.not_null { "NO" } else { "YES" }),
                txt(col.ty.display_name()),
                txt(col.ty.typname()),
            ]);
        }
    }
    t.rows = rows;
    db.tables.push(t);
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

const MIRROR_NAMES: &[&str] = &[
    "pg_namespace",
    "pg_type",
    "pg_class",
    "pg_attribute",
    "pg_index",
    "pg_attrdef",
    "pg_constraint",
    "pg_am",
    "pg_database",
    "pg_roles",
    "pg_settings",
    "pg_policy",
    "pg_collation",
    "information_schema_tables",
    "information_schema_columns",
];

/// Drop every mirror table.
pub fn cleanup(db: &mut Database) {
    for name in MIRROR_NAMES {
        remove_mirror(db, name);
    }
}

/// Rebuild the whole mirror from the user schema, dependency order:
/// namespace → type → class → attribute → dependent metadata.
pub fn refresh(db: &mut Database) {
    cleanup(db);
    build_pg_namespace(db);
    build_pg_type(db);
    build_pg_class(db);
    build_pg_attribute(db);
    build_pg_index(db);
    build_pg_attrdef(db);
    build_pg_constraint(db);
    build_pg_am(db);
    build_pg_database(db);
    build_pg_roles(db);
    build_pg_settings(db);
    build_pg_policy(db);
    build_pg_collation(db);
    build_information_schema_tables(db);
    build_information_schema_columns(db);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDesc;

    fn db_with_table() -> Database {
        let mut db = Database::new("mskql");
        let mut t = TableDef::new("x");
        t.columns.push(ColumnDesc::new("a", ColumnType::Int));
        t.columns.push(ColumnDesc::new("b", ColumnType::Text));
        db.tables.push(t);
        db
    }

    #[test]
    fn attribute_rows_carry_type_oids() {
        let mut db = db_with_table();
        refresh(&mut db);
        let att = db.table("pg_attribute").unwrap();
        let mut found = Vec::new();
        for row in &att.rows {
            if row[0] == Cell::Int(16384) {
                found.push((row[1].clone(), row[2].clone()));
            }
        }
        assert_eq!(
            found,
            vec![
                (Cell::Text("a".into()), Cell::Int(23)),
                (Cell::Text("b".into()), Cell::Int(25)),
            ]
        );
    }

    #[test]
    fn mirrors_exclude_themselves() {
        let mut db = db_with_table();
        refresh(&mut db);
        let class = db.table("pg_class").unwrap();
        for row in &class.rows {
            if let Cell::Text(name) = &row[1] {
                assert!(!is_catalog_table(name), "{name} leaked into pg_class");
            }
        }
        let ist = db.table("information_schema_tables").unwrap();
        assert_eq!(ist.rows.len(), 1);
    }

    #[test]
    fn refresh_is_idempotent() {
        let mut db = db_with_table();
        refresh(&mut db);
        let snapshot: Vec<(String, usize)> = db
            .tables
            .iter()
            .map(|t| (t.name.clone(), t.rows.len()))
            .collect();
        refresh(&mut db);
        let again: Vec<(String, usize)> = db
            .tables
            .iter()
            .map(|t| (t.name.clone(), t.rows.len()))
            .collect();
        assert_eq!(snapshot, again);

        let a = db.table("pg_class").unwrap().rows.clone();
        refresh(&mut db);
        let b = db.table("pg_class").unwrap().rows.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn name_resolution() {
        assert_eq!(resolve_name("pg_catalog", "pg_class").unwrap(), "pg_class");
        assert_eq!(
            resolve_name("information_schema", "tables").unwrap(),
            "information_schema_tables"
        );
        assert_eq!(resolve_name("public", "t").unwrap(), "t");
        assert!(resolve_name("other", "t").is_none());
    }
}
