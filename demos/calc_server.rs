//! Calculator server - serves `add`, `sub`, and `mul` over a Unix socket.
//!
//! Run with:
//!
//! ```text
//! cargo run --example calc_server
//! ```
//!
//! then start `calc_client` in another terminal.

use serde_json::{json, Value};
use sockwire::{Endpoint, Server};

fn int_args(args: &[Value]) -> (i64, i64) {
    let a = args.first().and_then(Value::as_i64).unwrap_or(0);
    let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
    (a, b)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let endpoint = Endpoint::unix("/tmp/sockwire-calc.sock");

    let server = Server::builder()
        .method("add", |args: Vec<Value>| async move {
            let (a, b) = int_args(&args);
            Ok(json!(a + b))
        })
        .method("sub", |args: Vec<Value>| async move {
            let (a, b) = int_args(&args);
            Ok(json!(a - b))
        })
        .method("mul", |args: Vec<Value>| async move {
            let (a, b) = int_args(&args);
            Ok(json!(a * b))
        })
        .listen(endpoint)
        .await?;

    println!("calc server listening on {}", server.local_endpoint());

    tokio::signal::ctrl_c().await?;
    server.shutdown();

    Ok(())
}
