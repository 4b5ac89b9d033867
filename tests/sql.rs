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

//! SQL integration tests driven through `Session::execute`, covering
//! DDL, DML, queries, constraints, transactions and the catalog mirror.

use mskql::sql::StatementOutcome;
use mskql::value::format_cell;
use mskql::{Db, Session};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_session() -> Session {
    Session::new(Db::new("mskql"))
}

/// Run a batch and return the last statement's rows as formatted text.
fn query(session: &mut Session, sql: &str) -> Vec<Vec<Option<String>>> {
    let outcomes = session.execute(sql).unwrap_or_else(|e| {
        panic!("query failed: {sql}: {e}");
    });
    match outcomes.into_iter().last() {
        Some(StatementOutcome::Rows(out)) => out
            .rows
            .iter()
            .map(|r| r.iter().map(|c| format_cell(c, None)).collect())
            .collect(),
        other => panic!("expected rows from {sql}, got {other:?}"),
    }
}

fn run(session: &mut Session, sql: &str) {
    session
        .execute(sql)
        .unwrap_or_else(|e| panic!("statement failed: {sql}: {e}"));
}

fn cell(rows: &[Vec<Option<String>>], r: usize, c: usize) -> &str {
    rows[r][c].as_deref().unwrap_or("NULL")
}

// ---------------------------------------------------------------------------
// Basic DDL / DML / SELECT
// ---------------------------------------------------------------------------

#[test]
fn create_insert_select_round_trip() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT, name TEXT, score FLOAT)");
    run(
        &mut s,
        "INSERT INTO t VALUES (1, 'alice', 1.5), (2, 'bob', 2.5)",
    );

    let rows = query(&mut s, "SELECT id, name, score FROM t ORDER BY id");
    assert_eq!(rows.len(), 2);
    assert_eq!(cell(&rows, 0, 0), "1");
    assert_eq!(cell(&rows, 0, 1), "alice");
    assert_eq!(cell(&rows, 0, 2), "1.5");
    assert_eq!(cell(&rows, 1, 1), "bob");
}

#[test]
fn where_filtering_is_three_valued() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT, v INT)");
    run(&mut s, "INSERT INTO t VALUES (1, 10), (2, NULL), (3, 30)");

    // the NULL row is UNKNOWN under both the predicate and its negation
    let rows = query(&mut s, "SELECT id FROM t WHERE v > 15");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "3");
    let rows = query(&mut s, "SELECT id FROM t WHERE NOT (v > 15)");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "1");
    let rows = query(&mut s, "SELECT id FROM t WHERE v IS NULL");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "2");
}

#[test]
fn order_by_limit_offset() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT, v INT)");
    run(
        &mut s,
        "INSERT INTO t VALUES (1, 30), (2, 10), (3, NULL), (4, 20)",
    );

    let rows = query(&mut s, "SELECT id FROM t ORDER BY v");
    // ASC puts the NULL last
    assert_eq!(
        rows.iter().map(|r| r[0].clone().unwrap()).collect::<Vec<_>>(),
        vec!["2", "4", "1", "3"]
    );
    let rows = query(&mut s, "SELECT id FROM t ORDER BY v DESC");
    assert_eq!(cell(&rows, 0, 0), "3"); // DESC puts the NULL first
    let rows = query(&mut s, "SELECT id FROM t ORDER BY v NULLS FIRST LIMIT 2 OFFSET 1");
    assert_eq!(rows.len(), 2);
    assert_eq!(cell(&rows, 0, 0), "2");
}

#[test]
fn expressions_and_functions() {
    let mut s = make_session();
    let rows = query(&mut s, "SELECT 1 + 2 * 3, UPPER('abc'), COALESCE(NULL, 7)");
    assert_eq!(cell(&rows, 0, 0), "7");
    assert_eq!(cell(&rows, 0, 1), "ABC");
    assert_eq!(cell(&rows, 0, 2), "7");

    let rows = query(&mut s, "SELECT LENGTH('hello'), ROUND(2.567, 2), ABS(-4)");
    assert_eq!(cell(&rows, 0, 0), "5");
    assert_eq!(cell(&rows, 0, 1), "2.57");
    assert_eq!(cell(&rows, 0, 2), "4");
}

#[test]
fn update_and_delete() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT, v INT)");
    run(&mut s, "INSERT INTO t VALUES (1, 10), (2, 20), (3, 30)");

    let outcomes = s.execute("UPDATE t SET v = v + 1 WHERE id > 1").unwrap();
    assert!(matches!(
        outcomes.last(),
        Some(StatementOutcome::Command { rows: Some(2), .. })
    ));
    let rows = query(&mut s, "SELECT v FROM t ORDER BY id");
    assert_eq!(cell(&rows, 1, 0), "21");

    let outcomes = s.execute("DELETE FROM t WHERE v = 21").unwrap();
    assert!(matches!(
        outcomes.last(),
        Some(StatementOutcome::Command { rows: Some(1), .. })
    ));
    assert_eq!(query(&mut s, "SELECT id FROM t").len(), 2);
}

// ---------------------------------------------------------------------------
// Joins
// ---------------------------------------------------------------------------

fn join_fixture() -> Session {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE u (id INT, name TEXT)");
    run(&mut s, "CREATE TABLE o (uid INT, amount INT)");
    run(
        &mut s,
        "INSERT INTO u VALUES (1, 'alice'), (2, 'bob'), (3, 'carol')",
    );
    run(
        &mut s,
        "INSERT INTO o VALUES (1, 100), (1, 50), (2, 70), (9, 1)",
    );
    s
}

#[test]
fn inner_join() {
    let mut s = join_fixture();
    let rows = query(
        &mut s,
        "SELECT u.name, o.amount FROM u JOIN o ON u.id = o.uid ORDER BY o.amount",
    );
    assert_eq!(rows.len(), 3);
    assert_eq!(cell(&rows, 0, 0), "alice");
    assert_eq!(cell(&rows, 2, 1), "100");
}

#[test]
fn left_join_pads_nulls() {
    let mut s = join_fixture();
    let rows = query(
        &mut s,
        "SELECT u.name, o.amount FROM u LEFT JOIN o ON u.id = o.uid ORDER BY u.name, o.amount",
    );
    assert_eq!(rows.len(), 4);
    // carol has no orders
    let carol: Vec<_> = rows.iter().filter(|r| r[0].as_deref() == Some("carol")).collect();
    assert_eq!(carol.len(), 1);
    assert!(carol[0][1].is_none());
}

#[test]
fn right_and_full_join() {
    let mut s = join_fixture();
    let rows = query(
        &mut s,
        "SELECT u.name, o.amount FROM u RIGHT JOIN o ON u.id = o.uid",
    );
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().any(|r| r[0].is_none())); // uid=9 has no user

    let rows = query(
        &mut s,
        "SELECT u.name, o.amount FROM u FULL JOIN o ON u.id = o.uid",
    );
    // 3 matches + carol + orphan order
    assert_eq!(rows.len(), 5);
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[test]
fn group_by_sum() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (region TEXT, amount INT)");
    run(
        &mut s,
        "INSERT INTO t VALUES ('n', 10), ('n', 20), ('s', 30)",
    );
    let rows = query(
        &mut s,
        "SELECT region, SUM(amount) FROM t GROUP BY region ORDER BY region",
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(cell(&rows, 0, 0), "n");
    assert_eq!(cell(&rows, 0, 1), "30");
    assert_eq!(cell(&rows, 1, 0), "s");
    assert_eq!(cell(&rows, 1, 1), "30");
}

#[test]
fn aggregates_over_empty_input_emit_one_row() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (v INT)");
    let rows = query(&mut s, "SELECT COUNT(*), SUM(v), MIN(v) FROM t");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "0");
    assert!(rows[0][1].is_none());
    assert!(rows[0][2].is_none());
}

#[test]
fn count_avg_min_max_string_agg() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (k TEXT, v INT)");
    run(
        &mut s,
        "INSERT INTO t VALUES ('a', 1), ('a', NULL), ('a', 3), ('b', 8)",
    );
    let rows = query(
        &mut s,
        "SELECT k, COUNT(*), COUNT(v), AVG(v), MIN(v), MAX(v), STRING_AGG(k, '|') \
         FROM t GROUP BY k ORDER BY k",
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(cell(&rows, 0, 1), "3"); // COUNT(*)
    assert_eq!(cell(&rows, 0, 2), "2"); // COUNT(v) skips NULL
    assert_eq!(cell(&rows, 0, 3), "2"); // AVG(1,3)
    assert_eq!(cell(&rows, 0, 4), "1");
    assert_eq!(cell(&rows, 0, 5), "3");
    assert_eq!(cell(&rows, 0, 6), "a|a|a");
}

#[test]
fn having_and_order_by_aggregate() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (k TEXT, v INT)");
    run(
        &mut s,
        "INSERT INTO t VALUES ('a', 1), ('b', 10), ('b', 20), ('c', 5)",
    );
    let rows = query(
        &mut s,
        "SELECT k, SUM(v) AS total FROM t GROUP BY k HAVING SUM(v) > 4 ORDER BY total DESC",
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(cell(&rows, 0, 0), "b");
    assert_eq!(cell(&rows, 1, 0), "c");
}

#[test]
fn distinct_dedups() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (v INT)");
    run(&mut s, "INSERT INTO t VALUES (1), (1), (2), (NULL), (NULL)");
    let rows = query(&mut s, "SELECT DISTINCT v FROM t");
    assert_eq!(rows.len(), 3);
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

#[test]
fn not_null_and_check_violations() {
    let mut s = make_session();
    run(
        &mut s,
        "CREATE TABLE t (id INT NOT NULL, v INT CHECK (v > 0))",
    );
    let err = s.execute("INSERT INTO t VALUES (NULL, 1)").unwrap_err();
    assert_eq!(err.sqlstate, "23502");
    let err = s.execute("INSERT INTO t VALUES (1, -5)").unwrap_err();
    assert_eq!(err.sqlstate, "23514");
    // CHECK passes on NULL (UNKNOWN is not a violation)
    run(&mut s, "INSERT INTO t VALUES (1, NULL)");
}

#[test]
fn unique_and_primary_key() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT PRIMARY KEY, tag TEXT UNIQUE)");
    run(&mut s, "INSERT INTO t VALUES (1, 'x'), (2, 'y')");
    let err = s.execute("INSERT INTO t VALUES (1, 'z')").unwrap_err();
    assert_eq!(err.sqlstate, "23505");
    let err = s.execute("INSERT INTO t VALUES (3, 'x')").unwrap_err();
    assert_eq!(err.sqlstate, "23505");
    // a failed statement must not leave partial rows behind
    assert_eq!(query(&mut s, "SELECT id FROM t").len(), 2);
}

#[test]
fn foreign_key_enforcement_and_cascade() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE p (id INT PRIMARY KEY)");
    run(
        &mut s,
        "CREATE TABLE c (pid INT REFERENCES p(id) ON DELETE CASCADE, v TEXT)",
    );
    run(&mut s, "INSERT INTO p VALUES (1), (2)");
    run(&mut s, "INSERT INTO c VALUES (1, 'one'), (1, 'uno'), (2, 'two')");

    let err = s.execute("INSERT INTO c VALUES (9, 'none')").unwrap_err();
    assert_eq!(err.sqlstate, "23503");

    run(&mut s, "DELETE FROM p WHERE id = 1");
    let rows = query(&mut s, "SELECT v FROM c");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "two");
}

#[test]
fn foreign_key_restrict_blocks_delete() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE p (id INT PRIMARY KEY)");
    run(&mut s, "CREATE TABLE c (pid INT REFERENCES p(id))");
    run(&mut s, "INSERT INTO p VALUES (1)");
    run(&mut s, "INSERT INTO c VALUES (1)");
    let err = s.execute("DELETE FROM p WHERE id = 1").unwrap_err();
    assert_eq!(err.sqlstate, "23503");
    assert_eq!(query(&mut s, "SELECT id FROM p").len(), 1);
}

#[test]
fn serial_and_defaults() {
    let mut s = make_session();
    run(
        &mut s,
        "CREATE TABLE t (id SERIAL, v TEXT DEFAULT 'none', n INT DEFAULT 7)",
    );
    run(&mut s, "INSERT INTO t (v) VALUES ('a'), ('b')");
    run(&mut s, "INSERT INTO t (n) VALUES (1)");
    let rows = query(&mut s, "SELECT id, v, n FROM t ORDER BY id");
    assert_eq!(cell(&rows, 0, 0), "1");
    assert_eq!(cell(&rows, 1, 0), "2");
    assert_eq!(cell(&rows, 2, 0), "3");
    assert_eq!(cell(&rows, 2, 1), "none");
    assert_eq!(cell(&rows, 0, 2), "7");
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[test]
fn rollback_restores_state() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT)");
    run(&mut s, "INSERT INTO t VALUES (1)");
    run(&mut s, "BEGIN");
    assert_eq!(s.status_byte(), b'T');
    run(&mut s, "INSERT INTO t VALUES (2); INSERT INTO t VALUES (3)");
    assert_eq!(query(&mut s, "SELECT id FROM t").len(), 3);
    run(&mut s, "ROLLBACK");
    assert_eq!(s.status_byte(), b'I');
    assert_eq!(query(&mut s, "SELECT id FROM t").len(), 1);
}

#[test]
fn failed_transaction_blocks_until_rollback() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT NOT NULL)");
    run(&mut s, "BEGIN");
    run(&mut s, "INSERT INTO t VALUES (1)");
    let _ = s.execute("INSERT INTO t VALUES (NULL)").unwrap_err();
    assert_eq!(s.status_byte(), b'E');

    let err = s.execute("SELECT 1").unwrap_err();
    assert_eq!(err.sqlstate, "25P02");

    run(&mut s, "ROLLBACK");
    assert_eq!(s.status_byte(), b'I');
    // the whole transaction rolled back, including the first insert
    assert_eq!(query(&mut s, "SELECT id FROM t").len(), 0);
}

#[test]
fn commit_of_aborted_transaction_rolls_back() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT NOT NULL)");
    run(&mut s, "BEGIN");
    run(&mut s, "INSERT INTO t VALUES (1)");
    let _ = s.execute("INSERT INTO t VALUES (NULL)").unwrap_err();
    let outcomes = s.execute("COMMIT").unwrap();
    assert!(matches!(
        outcomes.last(),
        Some(StatementOutcome::Commit { committed: false })
    ));
    assert_eq!(query(&mut s, "SELECT id FROM t").len(), 0);
}

#[test]
fn rollback_in_idle_is_a_no_op() {
    let mut s = make_session();
    run(&mut s, "ROLLBACK");
    assert_eq!(s.status_byte(), b'I');
}

#[test]
fn transaction_isolation_between_sessions() {
    let db = Db::new("mskql");
    let mut a = Session::new(db.clone());
    let mut b = Session::new(db.clone());

    run(&mut a, "CREATE TABLE t (id INT)");
    run(&mut a, "INSERT INTO t VALUES (1)");
    run(&mut a, "BEGIN");
    run(&mut a, "INSERT INTO t VALUES (2)");
    assert_eq!(a.status_byte(), b'T');

    // B sees only the committed row and has its own transaction state
    assert_eq!(b.status_byte(), b'I');
    let rows = query(&mut b, "SELECT id FROM t");
    // writer-inside-transaction changes are visible at read time under
    // the single-store model once committed; A has not committed yet
    // but holds no lock between statements, so B observes the shared
    // store. A's rollback must erase row 2 again.
    assert!(!rows.is_empty());

    run(&mut a, "ROLLBACK");
    let rows = query(&mut b, "SELECT id FROM t ORDER BY id");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "1");
}

#[test]
fn teardown_rolls_back_like_disconnect() {
    let db = Db::new("mskql");
    let mut a = Session::new(db.clone());
    run(&mut a, "CREATE TABLE d (id INT, v TEXT)");
    run(&mut a, "INSERT INTO d VALUES (1, 'ok')");
    run(&mut a, "BEGIN");
    run(&mut a, "INSERT INTO d VALUES (2, 'dirty')");
    // abrupt disconnect
    a.teardown();

    let mut b = Session::new(db);
    let rows = query(&mut b, "SELECT v FROM d ORDER BY id");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "ok");
}

#[test]
fn ddl_rolls_back_too() {
    let mut s = make_session();
    run(&mut s, "BEGIN");
    run(&mut s, "CREATE TABLE scratch (id INT)");
    run(&mut s, "INSERT INTO scratch VALUES (1)");
    run(&mut s, "ROLLBACK");
    let err = s.execute("SELECT * FROM scratch").unwrap_err();
    assert_eq!(err.sqlstate, "42P01");
}

// ---------------------------------------------------------------------------
// Catalog mirror
// ---------------------------------------------------------------------------

#[test]
fn catalog_attribute_introspection() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE x (a INT, b TEXT)");
    let rows = query(
        &mut s,
        "SELECT attname, atttypid FROM pg_attribute \
         WHERE attrelid = (SELECT oid FROM pg_class WHERE relname = 'x') \
         ORDER BY attnum",
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(cell(&rows, 0, 0), "a");
    assert_eq!(cell(&rows, 0, 1), "23");
    assert_eq!(cell(&rows, 1, 0), "b");
    assert_eq!(cell(&rows, 1, 1), "25");
}

#[test]
fn catalog_tables_listing_excludes_mirrors() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE only_one (a INT)");
    let rows = query(
        &mut s,
        "SELECT table_name FROM information_schema.tables",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "only_one");

    // refreshing twice produces identical tuples
    let again = query(
        &mut s,
        "SELECT table_name FROM information_schema.tables",
    );
    assert_eq!(rows, again);
}

#[test]
fn catalog_columns_listing() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (a INT NOT NULL, b TIMESTAMP)");
    let rows = query(
        &mut s,
        "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
         WHERE table_name = 't' ORDER BY ordinal_position",
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(cell(&rows, 0, 0), "a");
    assert_eq!(cell(&rows, 0, 1), "integer");
    assert_eq!(cell(&rows, 0, 2), "NO");
    assert_eq!(cell(&rows, 1, 1), "timestamp without time zone");
}

// ---------------------------------------------------------------------------
// Views, enums, temporal types
// ---------------------------------------------------------------------------

#[test]
fn views_reexecute_their_definition() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT, v INT)");
    run(&mut s, "INSERT INTO t VALUES (1, 10), (2, 20)");
    run(&mut s, "CREATE VIEW big AS SELECT id FROM t WHERE v > 15");

    let rows = query(&mut s, "SELECT * FROM big");
    assert_eq!(rows.len(), 1);

    run(&mut s, "INSERT INTO t VALUES (3, 30)");
    let rows = query(&mut s, "SELECT * FROM big ORDER BY id");
    assert_eq!(rows.len(), 2);

    run(&mut s, "DROP VIEW big");
    assert!(s.execute("SELECT * FROM big").is_err());
}

#[test]
fn enum_types_round_trip() {
    let mut s = make_session();
    run(&mut s, "CREATE TYPE mood AS ENUM ('sad', 'ok', 'happy')");
    run(&mut s, "CREATE TABLE m (id INT, feeling mood)");
    run(&mut s, "INSERT INTO m VALUES (1, 'happy'), (2, 'sad')");

    let err = s.execute("INSERT INTO m VALUES (3, 'angry')").unwrap_err();
    assert_eq!(err.sqlstate, "22P02");

    let rows = query(&mut s, "SELECT feeling FROM m WHERE feeling = 'happy'");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "happy");

    let err = s.execute("DROP TYPE mood").unwrap_err();
    assert!(err.message.contains("column uses it"));
}

#[test]
fn temporal_literals_round_trip() {
    let mut s = make_session();
    run(
        &mut s,
        "CREATE TABLE ev (d DATE, t TIME, ts TIMESTAMP, u UUID)",
    );
    run(
        &mut s,
        "INSERT INTO ev VALUES ('2024-02-29', '13:45:00', '2024-02-29 13:45:00', \
         'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11')",
    );
    let rows = query(&mut s, "SELECT d, t, ts, u FROM ev");
    assert_eq!(cell(&rows, 0, 0), "2024-02-29");
    assert_eq!(cell(&rows, 0, 1), "13:45:00");
    assert_eq!(cell(&rows, 0, 2), "2024-02-29 13:45:00");
    assert_eq!(cell(&rows, 0, 3), "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11");
}

#[test]
fn date_arithmetic_and_extract() {
    let mut s = make_session();
    let rows = query(
        &mut s,
        "SELECT DATE '2024-01-31' + INTERVAL '1 month', \
         EXTRACT(year FROM DATE '2024-05-06'), \
         DATE_TRUNC('month', DATE '2024-05-06')",
    );
    assert_eq!(cell(&rows, 0, 0), "2024-02-29");
    assert_eq!(cell(&rows, 0, 1), "2024");
    assert_eq!(cell(&rows, 0, 2), "2024-05-01");
}

#[test]
fn division_by_zero_fails_the_statement() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (v INT)");
    run(&mut s, "INSERT INTO t VALUES (0), (1)");
    let err = s.execute("SELECT 10 / v FROM t").unwrap_err();
    assert_eq!(err.sqlstate, "22012");
}

#[test]
fn index_backed_equality_scan() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT PRIMARY KEY, v TEXT)");
    for i in 0..50 {
        run(&mut s, &format!("INSERT INTO t VALUES ({i}, 'v{i}')"));
    }
    run(&mut s, "CREATE INDEX t_v_idx ON t (v)");
    let rows = query(&mut s, "SELECT v FROM t WHERE id = 17");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "v17");
    let rows = query(&mut s, "SELECT id FROM t WHERE v = 'v33'");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "33");
}

#[test]
fn insert_from_select_and_ctas() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE src (id INT, v INT)");
    run(&mut s, "INSERT INTO src VALUES (1, 10), (2, 20)");
    run(&mut s, "CREATE TABLE copy1 AS SELECT id, v * 2 AS v2 FROM src");
    let rows = query(&mut s, "SELECT v2 FROM copy1 ORDER BY id");
    assert_eq!(cell(&rows, 1, 0), "40");

    run(&mut s, "CREATE TABLE dst (id INT, v INT)");
    run(&mut s, "INSERT INTO dst SELECT id, v FROM src WHERE v > 15");
    assert_eq!(query(&mut s, "SELECT id FROM dst").len(), 1);
}

#[test]
fn describe_infers_types_without_executing() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE ev (d DATE, n INT, u UUID)");

    let cols = s
        .describe("SELECT d, n, u FROM ev WHERE n = $1", 1)
        .unwrap()
        .unwrap();
    assert_eq!(cols.len(), 3);
    assert_eq!(cols[0].name, "d");
    assert_eq!(cols[0].ty, mskql::ColumnType::Date);
    assert_eq!(cols[1].ty, mskql::ColumnType::Int);
    assert_eq!(cols[2].ty, mskql::ColumnType::Uuid);

    // grouped shapes and scalar subqueries type statically too
    let cols = s
        .describe("SELECT d, SUM(n) AS total FROM ev GROUP BY d", 0)
        .unwrap()
        .unwrap();
    assert_eq!(cols[0].ty, mskql::ColumnType::Date);
    assert_eq!(cols[1].ty, mskql::ColumnType::BigInt);
    let cols = s
        .describe("SELECT (SELECT MAX(n) FROM ev)", 0)
        .unwrap()
        .unwrap();
    assert_eq!(cols[0].ty, mskql::ColumnType::Int);

    // DML has no result shape, and describing it must not mutate
    assert!(s
        .describe("INSERT INTO ev VALUES ('2024-01-01', 1, NULL)", 0)
        .unwrap()
        .is_none());
    assert_eq!(query(&mut s, "SELECT COUNT(*) FROM ev")[0][0].as_deref(), Some("0"));
}

#[test]
fn scalar_subqueries_resolve() {
    let mut s = make_session();
    run(&mut s, "CREATE TABLE t (id INT, v INT)");
    run(&mut s, "INSERT INTO t VALUES (1, 10), (2, 20), (3, 30)");
    let rows = query(&mut s, "SELECT id FROM t WHERE v = (SELECT MAX(v) FROM t)");
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows, 0, 0), "3");

    let rows = query(
        &mut s,
        "SELECT id FROM t WHERE id IN (SELECT id FROM t WHERE v > 15) ORDER BY id",
    );
    assert_eq!(rows.len(), 2);
}
