//! Join one or more polychat servers and print the pool's event stream.
//!
//! Usage:
//!   cargo run --example two_servers -- chat-a.example.org chat-b.example.org

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use polychat_pool::{AddOutcome, ServerPool, Storage, WsConnector};

#[derive(Parser)]
#[command(name = "two_servers", about = "polychat multi-server demo")]
struct Args {
    /// Server hostnames to join.
    #[arg(required = true)]
    servers: Vec<String>,

    /// Use ws:// instead of wss://.
    #[arg(long)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "polychat_pool=info,polychat_sdk=info".into()),
        )
        .init();

    let args = Args::parse();
    let connector = Arc::new(WsConnector {
        secure: !args.insecure,
    });
    let (mut pool, mut events) = ServerPool::new(connector, Storage::open_default());

    for host in &args.servers {
        match pool.add(host, true).await? {
            AddOutcome::Connected(_) => println!("connected to {host}"),
            AddOutcome::Deferred => println!("{host} unreachable, will keep retrying"),
        }
    }
    if let Some(first) = pool.servers().first().map(|e| e.id) {
        pool.set_active(Some(first))?;
    }

    let _handle = polychat_pool::spawn(pool);
    while let Some(event) = events.recv().await {
        println!("{event:?}");
    }
    Ok(())
}
