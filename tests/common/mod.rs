//! In-process stand-in for the store's HTTP/JSON gateway.
//!
//! Speaks just enough HTTP/1.1 for the client: one request per connection,
//! Content-Length responses for one-shot calls, and chunked responses for
//! watches. Watch documents are deliberately split across two chunks so the
//! client has to reassemble them.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kv_gateway_client::{Client, Config};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

pub const CLUSTER_ID: u64 = 14841639068965178418;
pub const MEMBER_ID: u64 = 10276657743932975437;
pub const RAFT_TERM: u64 = 2;

#[derive(Debug, Clone)]
struct StoredKv {
    value: Vec<u8>,
    create_revision: u64,
    mod_revision: u64,
    version: u64,
    lease: u64,
}

#[derive(Debug, Clone)]
struct Lease {
    ttl: u64,
}

/// What a watch stream writes next.
enum Outgoing {
    Document(Value),
    /// Bytes sent as one chunk, as they are
    Raw(Vec<u8>),
}

struct Watcher {
    start: Vec<u8>,
    end: Option<Vec<u8>>,
    tx: mpsc::UnboundedSender<Outgoing>,
}

#[derive(Default)]
struct State {
    revision: u64,
    kvs: BTreeMap<Vec<u8>, StoredKv>,
    leases: HashMap<u64, Lease>,
    next_lease: u64,
    watchers: Vec<Watcher>,
}

/// The gateway runtime and its shared state. Dropping it shuts the gateway down.
pub struct MockGateway {
    port: u16,
    state: Arc<Mutex<State>>,
    runtime: Option<Runtime>,
}

impl MockGateway {
    pub fn start() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mock-gateway")
            .enable_all()
            .build()
            .unwrap();
        let state = Arc::new(Mutex::new(State {
            revision: 1,
            next_lease: 7587862072916325000,
            ..State::default()
        }));

        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept_state = Arc::clone(&state);
        runtime.spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve(socket, Arc::clone(&accept_state)));
            }
        });

        Self {
            port,
            state,
            runtime: Some(runtime),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client(&self) -> Client {
        let mut config = Config::new("127.0.0.1", self.port);
        config.worker_threads = 2;
        config.request_timeout_ms = 5_000;
        Client::new(config).unwrap()
    }

    pub fn revision(&self) -> u64 {
        self.state.lock().unwrap().revision
    }

    pub fn watcher_count(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.watchers.retain(|w| !w.tx.is_closed());
        state.watchers.len()
    }

    /// Write `bytes` as a chunk of its own on every open watch stream.
    pub fn inject_raw(&self, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .watchers
            .retain(|w| w.tx.send(Outgoing::Raw(bytes.to_vec())).is_ok());
    }

    /// End every open watch stream with a terminating chunk.
    pub fn close_watches(&self) {
        self.state.lock().unwrap().watchers.clear();
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_millis(500));
        }
    }
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<State>>) {
    let Some((path, body)) = read_request(&mut socket).await else {
        return;
    };
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    if path == "/v3alpha/watch" {
        serve_watch(socket, state, &request).await;
        return;
    }

    let (status, reply) = {
        let mut state = state.lock().unwrap();
        match path.as_str() {
            "/v3alpha/kv/put" => (200, state.put(&request)),
            "/v3alpha/kv/range" => (200, state.range(&request)),
            "/v3alpha/kv/deleterange" => (200, state.delete_range(&request)),
            "/v3alpha/lease/grant" => (200, state.lease_grant(&request)),
            "/v3alpha/lease/revoke" => state.lease_revoke(&request),
            "/v3alpha/lease/timetolive" => (200, state.lease_time_to_live(&request)),
            _ => (404, json!({"error": "Not Found", "code": 5})),
        }
    };

    let body = reply.to_string();
    let reason = if status == 200 { "OK" } else { "Not Found" };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn serve_watch(mut socket: TcpStream, state: Arc<Mutex<State>>, request: &Value) {
    let create = &request["create_request"];
    let start = decode(&create["key"]);
    let end = create.get("range_end").map(decode);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let created = {
        let mut state = state.lock().unwrap();
        state.watchers.push(Watcher { start, end, tx });
        json!({"result": {"header": state.header(), "created": true}})
    };

    let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    if write_split(&mut socket, &created).await.is_err() {
        return;
    }
    while let Some(outgoing) = rx.recv().await {
        let written = match outgoing {
            Outgoing::Document(document) => write_split(&mut socket, &document).await,
            Outgoing::Raw(bytes) => write_chunk(&mut socket, &bytes).await,
        };
        if written.is_err() {
            return;
        }
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

/// Write one document as two HTTP chunks, cut in the middle.
async fn write_split(socket: &mut TcpStream, document: &Value) -> std::io::Result<()> {
    let bytes = document.to_string().into_bytes();
    let (first, second) = bytes.split_at(bytes.len() / 2);
    write_chunk(socket, first).await?;
    write_chunk(socket, second).await
}

async fn write_chunk(socket: &mut TcpStream, part: &[u8]) -> std::io::Result<()> {
    let mut chunk = format!("{:x}\r\n", part.len()).into_bytes();
    chunk.extend_from_slice(part);
    chunk.extend_from_slice(b"\r\n");
    socket.write_all(&chunk).await?;
    socket.flush().await
}

async fn read_request(socket: &mut TcpStream) -> Option<(String, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let path = head.lines().next()?.split_whitespace().nth(1)?.to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf.split_off(head_end);
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some((path, body))
}

fn decode(value: &Value) -> Vec<u8> {
    value
        .as_str()
        .and_then(|s| STANDARD.decode(s).ok())
        .unwrap_or_default()
}

fn decimal(value: &Value) -> u64 {
    value.as_str().and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn in_range(key: &[u8], start: &[u8], end: Option<&[u8]>) -> bool {
    match end {
        None => key == start,
        // "\0" selects every key from `start` on
        Some([0]) => key >= start,
        Some(end) => key >= start && key < end,
    }
}

impl State {
    fn header(&self) -> Value {
        json!({
            "cluster_id": CLUSTER_ID.to_string(),
            "member_id": MEMBER_ID.to_string(),
            "revision": self.revision.to_string(),
            "raft_term": RAFT_TERM.to_string(),
        })
    }

    fn kv_json(key: &[u8], kv: &StoredKv) -> Value {
        let mut out = json!({
            "key": STANDARD.encode(key),
            "create_revision": kv.create_revision.to_string(),
            "mod_revision": kv.mod_revision.to_string(),
            "version": kv.version.to_string(),
        });
        if !kv.value.is_empty() {
            out["value"] = json!(STANDARD.encode(&kv.value));
        }
        if kv.lease != 0 {
            out["lease"] = json!(kv.lease.to_string());
        }
        out
    }

    fn notify(&mut self, key: &[u8], kv: &StoredKv, kind: &str) {
        let event = json!({
            "result": {
                "header": self.header(),
                "events": [{"type": kind, "kv": Self::kv_json(key, kv)}],
            }
        });
        self.watchers.retain(|w| {
            if in_range(key, &w.start, w.end.as_deref()) {
                w.tx.send(Outgoing::Document(event.clone())).is_ok()
            } else {
                !w.tx.is_closed()
            }
        });
    }

    fn put(&mut self, request: &Value) -> Value {
        let key = decode(&request["key"]);
        let value = decode(&request["value"]);
        let lease = decimal(&request["lease"]);
        if lease != 0 && !self.leases.contains_key(&lease) {
            return json!({"error": "etcdserver: requested lease not found", "code": 5});
        }

        self.revision += 1;
        let revision = self.revision;
        let stored = match self.kvs.get(&key) {
            Some(old) => StoredKv {
                value,
                create_revision: old.create_revision,
                mod_revision: revision,
                version: old.version + 1,
                lease,
            },
            None => StoredKv {
                value,
                create_revision: revision,
                mod_revision: revision,
                version: 1,
                lease,
            },
        };
        self.kvs.insert(key.clone(), stored.clone());
        self.notify(&key, &stored, "PUT");
        json!({"header": self.header()})
    }

    fn range(&self, request: &Value) -> Value {
        let start = decode(&request["key"]);
        let end = request.get("range_end").map(decode);
        let kvs: Vec<Value> = self
            .kvs
            .iter()
            .filter(|(key, _)| in_range(key, &start, end.as_deref()))
            .map(|(key, kv)| Self::kv_json(key, kv))
            .collect();

        let mut reply = json!({"header": self.header()});
        if !kvs.is_empty() {
            reply["count"] = json!(kvs.len().to_string());
            reply["kvs"] = Value::Array(kvs);
        }
        reply
    }

    fn delete_range(&mut self, request: &Value) -> Value {
        let start = decode(&request["key"]);
        let end = request.get("range_end").map(decode);
        let keys: Vec<Vec<u8>> = self
            .kvs
            .keys()
            .filter(|key| in_range(key, &start, end.as_deref()))
            .cloned()
            .collect();
        self.remove_keys(&keys)
    }

    fn remove_keys(&mut self, keys: &[Vec<u8>]) -> Value {
        if !keys.is_empty() {
            self.revision += 1;
        }
        let revision = self.revision;
        for key in keys {
            if self.kvs.remove(key).is_some() {
                let tombstone = StoredKv {
                    value: Vec::new(),
                    create_revision: 0,
                    mod_revision: revision,
                    version: 0,
                    lease: 0,
                };
                self.notify(key, &tombstone, "DELETE");
            }
        }
        let mut reply = json!({"header": self.header()});
        if !keys.is_empty() {
            reply["deleted"] = json!(keys.len().to_string());
        }
        reply
    }

    fn lease_grant(&mut self, request: &Value) -> Value {
        let ttl = decimal(&request["TTL"]);
        let mut id = decimal(&request["ID"]);
        if id == 0 {
            self.next_lease += 1;
            id = self.next_lease;
        }
        self.leases.insert(id, Lease { ttl });
        json!({"header": self.header(), "ID": id.to_string(), "TTL": ttl.to_string()})
    }

    fn lease_revoke(&mut self, request: &Value) -> (u16, Value) {
        let id = decimal(&request["ID"]);
        if self.leases.remove(&id).is_none() {
            return (
                404,
                json!({"error": "etcdserver: requested lease not found", "code": 5}),
            );
        }
        let attached: Vec<Vec<u8>> = self
            .kvs
            .iter()
            .filter(|(_, kv)| kv.lease == id)
            .map(|(key, _)| key.clone())
            .collect();
        let mut reply = self.remove_keys(&attached);
        if let Some(object) = reply.as_object_mut() {
            object.remove("deleted");
        }
        (200, reply)
    }

    fn lease_time_to_live(&self, request: &Value) -> Value {
        let id = decimal(&request["ID"]);
        match self.leases.get(&id) {
            Some(lease) => {
                let keys: Vec<Value> = self
                    .kvs
                    .iter()
                    .filter(|(_, kv)| kv.lease == id)
                    .map(|(key, _)| json!(STANDARD.encode(key)))
                    .collect();
                json!({
                    "header": self.header(),
                    "ID": id.to_string(),
                    "TTL": lease.ttl.to_string(),
                    "grantedTTL": lease.ttl.to_string(),
                    "keys": keys,
                })
            }
            None => json!({"header": self.header(), "ID": id.to_string(), "TTL": "-1"}),
        }
    }
}
