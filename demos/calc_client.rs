//! Calculator client - discovers the server's methods and calls them
//! through a typed per-deployment wrapper.
//!
//! Run `calc_server` first, then:
//!
//! ```text
//! cargo run --example calc_client
//! ```

use serde_json::json;
use sockwire::{Client, Endpoint, Result};

/// Typed contract for the calc deployment. Call signatures are fixed here;
/// the runtime-discovered name list is only an introspection aid.
struct CalcClient {
    inner: Client,
}

impl CalcClient {
    async fn connect(endpoint: Endpoint) -> Result<Self> {
        let inner = Client::builder().reconnect(true).connect(endpoint).await?;
        Ok(Self { inner })
    }

    async fn add(&self, a: i64, b: i64) -> Result<i64> {
        self.inner.call_as("add", vec![json!(a), json!(b)]).await
    }

    async fn sub(&self, a: i64, b: i64) -> Result<i64> {
        self.inner.call_as("sub", vec![json!(a), json!(b)]).await
    }

    async fn mul(&self, a: i64, b: i64) -> Result<i64> {
        self.inner.call_as("mul", vec![json!(a), json!(b)]).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let calc = CalcClient::connect(Endpoint::unix("/tmp/sockwire-calc.sock")).await?;

    println!("discovered methods: {:?}", calc.inner.methods());

    println!("add(2, 3) = {}", calc.add(2, 3).await?);
    println!("sub(9, 4) = {}", calc.sub(9, 4).await?);
    println!("mul(6, 7) = {}", calc.mul(6, 7).await?);

    calc.inner.close().await;
    Ok(())
}
