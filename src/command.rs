//! Request bodies and endpoint paths for the gateway API.
//!
//! Keys and values are sent base64-encoded; 64-bit integers are sent as
//! decimal strings, as the gateway's JSON mapping expects.

use serde_json::{json, Value};

use crate::keys::{encode_key, KeyRange};

pub const KV_PUT: &str = "/kv/put";
pub const KV_RANGE: &str = "/kv/range";
pub const KV_DELETE_RANGE: &str = "/kv/deleterange";
pub const LEASE_GRANT: &str = "/lease/grant";
pub const LEASE_REVOKE: &str = "/lease/revoke";
pub const LEASE_TIME_TO_LIVE: &str = "/lease/timetolive";
pub const WATCH: &str = "/watch";

/// Which keys a range-style command addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Exactly one key
    Key(String),
    /// `[start, end)`, both base64
    Range(KeyRange),
}

impl Target {
    pub fn key<K: AsRef<[u8]>>(key: K) -> Self {
        Target::Key(encode_key(key))
    }

    fn fill(&self, body: &mut Value) {
        match self {
            Target::Key(key) => body["key"] = json!(key),
            Target::Range(range) => {
                body["key"] = json!(range.start);
                body["range_end"] = json!(range.end);
            }
        }
    }
}

pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(key: K, value: V, lease_id: u64) -> String {
    let mut body = json!({
        "key": encode_key(key),
        "value": encode_key(value),
    });
    if lease_id != 0 {
        body["lease"] = json!(lease_id.to_string());
    }
    body.to_string()
}

pub fn range(target: &Target) -> String {
    let mut body = json!({});
    target.fill(&mut body);
    body.to_string()
}

pub fn delete_range(target: &Target) -> String {
    range(target)
}

/// `id` 0 lets the gateway choose the lease ID.
pub fn lease_grant(ttl: u64, id: u64) -> String {
    json!({"TTL": ttl.to_string(), "ID": id.to_string()}).to_string()
}

pub fn lease_revoke(id: u64) -> String {
    json!({"ID": id.to_string()}).to_string()
}

pub fn lease_time_to_live(id: u64, keys: bool) -> String {
    json!({"ID": id.to_string(), "keys": keys}).to_string()
}

pub fn watch_create(target: &Target) -> String {
    let mut request = json!({});
    target.fill(&mut request);
    json!({ "create_request": request }).to_string()
}
