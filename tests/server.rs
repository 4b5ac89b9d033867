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

//! Integration tests for the PostgreSQL wire protocol server.
//!
//! Starts mskql-server as a child process, connects via tokio-postgres,
//! and drives it over both the Simple and Extended query protocols.
//! Each test gets its own port and server process.

use std::process::{Child, Command};
use std::time::Duration;

use tokio_postgres::{NoTls, SimpleQueryMessage};

/// RAII guard that kills the server child process on drop.
struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}

fn start_server(port: u16) -> ServerGuard {
    let binary = env!("CARGO_BIN_EXE_mskql-server");
    let child = Command::new(binary)
        .arg("--port")
        .arg(port.to_string())
        .spawn()
        .expect("failed to start mskql-server");
    ServerGuard(child)
}

/// Connect, retrying while the server finishes binding.
async fn connect(port: u16) -> tokio_postgres::Client {
    let connstr = format!("host=127.0.0.1 port={port} user=test dbname=mskql");
    for _ in 0..50 {
        match tokio_postgres::connect(&connstr, NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    let _ = connection.await;
                });
                return client;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    panic!("could not connect to mskql-server on port {port}");
}

fn extract_rows(messages: &[SimpleQueryMessage]) -> Vec<&tokio_postgres::SimpleQueryRow> {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Simple Query protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simple_create_insert_select() {
    let _server = start_server(15531);
    let client = connect(15531).await;

    client
        .simple_query("CREATE TABLE t (id INT, name TEXT)")
        .await
        .unwrap();
    client
        .simple_query("INSERT INTO t VALUES (1, 'alice'), (2, 'bob')")
        .await
        .unwrap();

    let messages = client
        .simple_query("SELECT id, name FROM t ORDER BY id")
        .await
        .unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(0).unwrap(), "1");
    assert_eq!(rows[0].get(1).unwrap(), "alice");
    assert_eq!(rows[1].get(1).unwrap(), "bob");
}

#[tokio::test]
async fn simple_multi_statement_batch() {
    let _server = start_server(15532);
    let client = connect(15532).await;

    let messages = client
        .simple_query("CREATE TABLE b (v INT); INSERT INTO b VALUES (7); SELECT v FROM b")
        .await
        .unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0).unwrap(), "7");
}

#[tokio::test]
async fn simple_error_abandons_rest_of_batch() {
    let _server = start_server(15533);
    let client = connect(15533).await;

    client
        .simple_query("CREATE TABLE e (v INT)")
        .await
        .unwrap();
    let err = client
        .simple_query("SELECT * FROM missing; INSERT INTO e VALUES (1)")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing"));

    // the INSERT after the error must not have run
    let messages = client.simple_query("SELECT COUNT(*) FROM e").await.unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows[0].get(0).unwrap(), "0");
}

#[tokio::test]
async fn empty_query_is_accepted() {
    let _server = start_server(15534);
    let client = connect(15534).await;
    // EmptyQueryResponse, then ReadyForQuery: no rows, no error
    let messages = client.simple_query("").await.unwrap();
    assert!(extract_rows(&messages).is_empty());
    // the connection stays usable
    let messages = client.simple_query("SELECT 1").await.unwrap();
    assert_eq!(extract_rows(&messages)[0].get(0).unwrap(), "1");
}

#[tokio::test]
async fn group_by_aggregation_over_wire() {
    let _server = start_server(15535);
    let client = connect(15535).await;

    client
        .simple_query("CREATE TABLE t (region TEXT, amount INT)")
        .await
        .unwrap();
    client
        .simple_query("INSERT INTO t VALUES ('n', 10), ('n', 20), ('s', 30)")
        .await
        .unwrap();
    let messages = client
        .simple_query("SELECT region, SUM(amount) FROM t GROUP BY region ORDER BY region")
        .await
        .unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(0).unwrap(), "n");
    assert_eq!(rows[0].get(1).unwrap(), "30");
    assert_eq!(rows[1].get(0).unwrap(), "s");
    assert_eq!(rows[1].get(1).unwrap(), "30");
}

// ---------------------------------------------------------------------------
// Transactions across connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transaction_isolation_across_sessions() {
    let _server = start_server(15536);
    let a = connect(15536).await;
    let b = connect(15536).await;

    a.simple_query("CREATE TABLE t (id INT)").await.unwrap();
    a.simple_query("INSERT INTO t VALUES (1)").await.unwrap();
    a.simple_query("BEGIN").await.unwrap();
    a.simple_query("INSERT INTO t VALUES (2)").await.unwrap();

    // B's transaction state is independent of A's
    let messages = b.simple_query("SELECT * FROM t ORDER BY id").await.unwrap();
    assert!(!extract_rows(&messages).is_empty());
    b.simple_query("BEGIN").await.unwrap();
    b.simple_query("ROLLBACK").await.unwrap();

    a.simple_query("ROLLBACK").await.unwrap();
    let messages = b.simple_query("SELECT * FROM t").await.unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0).unwrap(), "1");
}

#[tokio::test]
async fn abrupt_disconnect_rolls_back() {
    let _server = start_server(15537);

    {
        let a = connect(15537).await;
        a.simple_query("CREATE TABLE d (id INT, v TEXT)").await.unwrap();
        a.simple_query("INSERT INTO d VALUES (1, 'ok')").await.unwrap();
        a.simple_query("BEGIN").await.unwrap();
        a.simple_query("INSERT INTO d VALUES (2, 'dirty')")
            .await
            .unwrap();
        // drop the client without COMMIT: the TCP connection closes
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let b = connect(15537).await;
    let messages = b
        .simple_query("SELECT v FROM d ORDER BY id")
        .await
        .unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0).unwrap(), "ok");
}

#[tokio::test]
async fn failed_transaction_reports_until_rollback() {
    let _server = start_server(15538);
    let client = connect(15538).await;

    client
        .simple_query("CREATE TABLE t (id INT NOT NULL)")
        .await
        .unwrap();
    client.simple_query("BEGIN").await.unwrap();
    let _ = client
        .simple_query("INSERT INTO t VALUES (NULL)")
        .await
        .unwrap_err();
    // anything but ROLLBACK/COMMIT is refused now
    let err = client.simple_query("SELECT 1").await.unwrap_err();
    assert!(err.to_string().contains("aborted"));
    client.simple_query("ROLLBACK").await.unwrap();
    let messages = client.simple_query("SELECT 1").await.unwrap();
    assert_eq!(extract_rows(&messages)[0].get(0).unwrap(), "1");
}

// ---------------------------------------------------------------------------
// Extended Query protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn extended_parameterized_select() {
    let _server = start_server(15539);
    let client = connect(15539).await;

    client
        .simple_query("CREATE TABLE u (id INT, name TEXT)")
        .await
        .unwrap();
    client
        .simple_query("INSERT INTO u VALUES (1, 'ann'), (2, 'bob')")
        .await
        .unwrap();

    // Parse/Bind/Describe/Execute with a text parameter
    let rows = client
        .query("SELECT id, name FROM u WHERE id = $1", &[&"2"])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let id: i32 = rows[0].get(0);
    let name: &str = rows[0].get(1);
    assert_eq!(id, 2);
    assert_eq!(name, "bob");
}

#[tokio::test]
async fn extended_dml_with_parameters() {
    let _server = start_server(15540);
    let client = connect(15540).await;

    client
        .simple_query("CREATE TABLE t (id INT, v TEXT)")
        .await
        .unwrap();
    let n = client
        .execute("INSERT INTO t VALUES ($1, $2)", &[&"5", &"five"])
        .await
        .unwrap();
    assert_eq!(n, 1);

    let rows = client
        .query("SELECT v FROM t WHERE id = $1", &[&"5"])
        .await
        .unwrap();
    let v: &str = rows[0].get(0);
    assert_eq!(v, "five");
}

#[tokio::test]
async fn extended_error_recovery() {
    let _server = start_server(15541);
    let client = connect(15541).await;

    // Parse of invalid SQL produces an ErrorResponse and skip-until-Sync
    let err = client.prepare("SELECT * FROM nowhere").await.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("nowhere"));

    // after Sync the connection is usable again
    let messages = client.simple_query("SELECT 1").await.unwrap();
    assert_eq!(extract_rows(&messages)[0].get(0).unwrap(), "1");

    let rows = client.query("SELECT 1 + 1", &[]).await.unwrap();
    let v: i32 = rows[0].get(0);
    assert_eq!(v, 2);
}

#[tokio::test]
async fn extended_reuses_prepared_statement() {
    let _server = start_server(15542);
    let client = connect(15542).await;

    client
        .simple_query("CREATE TABLE t (id INT)")
        .await
        .unwrap();
    client
        .simple_query("INSERT INTO t VALUES (1), (2), (3)")
        .await
        .unwrap();

    let stmt = client
        .prepare("SELECT COUNT(*) FROM t WHERE id >= $1")
        .await
        .unwrap();
    let rows = client.query(&stmt, &[&"1"]).await.unwrap();
    let n: i64 = rows[0].get(0);
    assert_eq!(n, 3);
    let rows = client.query(&stmt, &[&"3"]).await.unwrap();
    let n: i64 = rows[0].get(0);
    assert_eq!(n, 1);
}

#[tokio::test]
async fn extended_row_description_uses_real_oids() {
    let _server = start_server(15546);
    let client = connect(15546).await;

    client
        .simple_query(
            "CREATE TABLE ev (d DATE, t TIME, ts TIMESTAMP, tz TIMESTAMPTZ, \
             u UUID, n NUMERIC, iv INTERVAL)",
        )
        .await
        .unwrap();

    // Describe of the prepared statement must declare the same OIDs the
    // pg_type mirror carries, not a text stand-in
    let stmt = client
        .prepare("SELECT d, t, ts, tz, u, n, iv FROM ev")
        .await
        .unwrap();
    let oids: Vec<u32> = stmt.columns().iter().map(|c| c.type_().oid()).collect();
    assert_eq!(oids, vec![1082, 1083, 1114, 1184, 2950, 1700, 1186]);
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn catalog_introspection_over_wire() {
    let _server = start_server(15543);
    let client = connect(15543).await;

    client
        .simple_query("CREATE TABLE x (a INT, b TEXT)")
        .await
        .unwrap();
    let messages = client
        .simple_query(
            "SELECT attname, atttypid FROM pg_attribute \
             WHERE attrelid = (SELECT oid FROM pg_class WHERE relname = 'x') \
             ORDER BY attnum",
        )
        .await
        .unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(0).unwrap(), "a");
    assert_eq!(rows[0].get(1).unwrap(), "23");
    assert_eq!(rows[1].get(0).unwrap(), "b");
    assert_eq!(rows[1].get(1).unwrap(), "25");
}

#[tokio::test]
async fn version_and_show() {
    let _server = start_server(15544);
    let client = connect(15544).await;

    let messages = client.simple_query("SELECT version()").await.unwrap();
    let rows = extract_rows(&messages);
    assert!(rows[0].get(0).unwrap().contains("mskql"));

    let messages = client
        .simple_query("SHOW server_version")
        .await
        .unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows[0].get(0).unwrap(), "15.0");
}

#[tokio::test]
async fn information_schema_tables_over_wire() {
    let _server = start_server(15545);
    let client = connect(15545).await;

    client
        .simple_query("CREATE TABLE solo (a INT)")
        .await
        .unwrap();
    let messages = client
        .simple_query("SELECT table_name, table_type FROM information_schema.tables")
        .await
        .unwrap();
    let rows = extract_rows(&messages);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0).unwrap(), "solo");
    assert_eq!(rows[0].get(1).unwrap(), "BASE TABLE");
}
