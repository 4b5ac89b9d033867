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

//! mskql server binary: TCP accept loop dispatching one wire session
//! per connection against the shared in-memory database.
//!
//! The listen port comes from `--port`, or the `MSKQL_PORT` environment
//! variable, or defaults to 5433. No positional arguments.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mskql::server::handler::ConnectionHandlers;
use mskql::Db;

#[derive(Parser)]
#[command(
    name = "mskql-server",
    version,
    about = "In-memory SQL engine speaking the PostgreSQL wire protocol"
)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Listen port (overrides MSKQL_PORT; default 5433)
    #[arg(long)]
    port: Option<u16>,

    /// Database name reported to clients
    #[arg(long, default_value = "mskql")]
    database: String,
}

fn resolve_port(cli: Option<u16>) -> u16 {
    cli.or_else(|| {
        std::env::var("MSKQL_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
    })
    .unwrap_or(5433)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let port = resolve_port(args.port);
    let db = Db::new(args.database);

    let addr = format!("{}:{}", args.host, port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("mskql listening on {addr}");
    info!("connect with: psql -h {} -p {}", args.host, port);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        info!(%peer, "connection accepted");
                        // a fresh handler set per connection: its own
                        // engine thread, arena and transaction state
                        let handlers = Arc::new(ConnectionHandlers::new(db.clone()));
                        tokio::spawn(async move {
                            if let Err(e) =
                                pgwire::tokio::process_socket(socket, None, handlers).await
                            {
                                info!(%peer, "connection closed: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept failed: {e}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
}
