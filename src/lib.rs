//! # kv-gateway-client
//!
//! Client for the HTTP/JSON gateway of a distributed key-value store.
//!
//! One-shot operations (put, range, delete-range, leases) each run on their
//! own connection session and hand back a [`PendingResponse`]. Watches keep a
//! chunked response open; the stream is split into JSON documents by brace
//! depth, decoded and passed to a user callback in stream order.
//!
//! All I/O is driven by a fixed pool of worker threads owned by the
//! [`Client`]. Callbacks run on whichever worker read the data.
//!
//! ```rust,no_run
//! use kv_gateway_client::{Client, Config};
//!
//! let client = Client::new(Config::new("127.0.0.1", 2379))?;
//! let mut watch = client.watch("/jobs/1", |change| match change {
//!     Ok(response) => println!("revision {}", response.revision()),
//!     Err(e) => eprintln!("watch ended: {}", e),
//! });
//! watch.wait()?;
//! client.set("/jobs/1", "queued").wait()?;
//! # Ok::<(), kv_gateway_client::Error>(())
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod framing;
pub mod http;
pub mod keys;
pub mod pool;
pub mod response;
pub mod session;
pub mod watch;

pub use client::{Client, PendingResponse, LEASE_MIN_TTL};
pub use config::Config;
pub use error::{Error, Result};
pub use framing::FrameExtractor;
pub use keys::KeyRange;
pub use response::{GatewayResponse, KvEntry, LeaseInfo, ParsedResponse, ResponseHeader};
pub use watch::{WatchCallback, WatchHandle};
