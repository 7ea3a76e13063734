//! Watch a key on a running gateway while writing to it.
//!
//! ```text
//! RUST_LOG=info cargo run --example watch_key -- [config.toml]
//! ```

use anyhow::{Context, Result};
use kv_gateway_client::{Client, Config};
use log::info;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    info!("Using gateway at {}:{}", config.host, config.port);

    let client = Client::new(config)?;
    let key = "/demo/counter";

    let (tx, rx) = mpsc::channel();
    let mut watch = client.watch(key, move |change| {
        let _ = tx.send(change);
    });
    let created = watch.wait().context("watch was not established")?;
    info!("Watching {} from revision {}", key, created.revision());

    for i in 0..3 {
        client.set(key, format!("{}", i)).wait()?;
    }

    for _ in 0..3 {
        let change = rx.recv_timeout(Duration::from_secs(5))??;
        for kv in change.kv_entries() {
            println!(
                "revision {}: {} = {}",
                change.revision(),
                kv.key_str(),
                kv.value_str()
            );
        }
    }
    watch.cancel();

    let remaining = client.get_all("/demo/").parsed()?;
    println!("{} key(s) under /demo/", remaining.kv_count());
    client.del_all("/demo/").wait()?;
    Ok(())
}
