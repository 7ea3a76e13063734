//! # Response Decoding
//!
//! Turns gateway JSON into verified records. Checks run in a fixed order and
//! the first failure wins:
//!
//! 1. the text must be JSON (`Error::Parse`)
//! 2. an `error` member turns the whole document into `Error::Upstream`
//! 3. all four header fields must be present (`Error::MissingHeaderField`)
//! 4. entries from `kvs` and from `events[].kv`, in array order
//! 5. each entry needs `key`, `create_revision`, `mod_revision`, `version`
//!    (`Error::MissingKvField`); an absent `value` decodes to empty bytes
//! 6. lease fields, taken only when present
//!
//! Integers arrive as decimal strings and keys/values as base64.

use std::borrow::Cow;
use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::http::HttpResponse;

const HEADER_FIELDS: [&str; 4] = ["cluster_id", "member_id", "revision", "raft_term"];
const KV_FIELDS: [&str; 4] = ["key", "create_revision", "mod_revision", "version"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    pub cluster_id: u64,
    pub member_id: u64,
    pub revision: u64,
    pub raft_term: u64,
}

/// One key-value record as stored by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub create_revision: u64,
    pub mod_revision: u64,
    pub version: u64,
}

impl KvEntry {
    pub fn key_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    pub fn value_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaseInfo {
    pub lease_id: u64,
    pub ttl: u64,
    pub granted_ttl: u64,
}

/// A decoded gateway document. Never modified after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    header: ResponseHeader,
    kvs: Vec<KvEntry>,
    /// Key to position in `kvs`; later entries replace earlier ones
    index: HashMap<Vec<u8>, usize>,
    lease: Option<LeaseInfo>,
    deleted: Option<u64>,
}

impl ParsedResponse {
    /// Decode raw JSON text.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::parse(format!("{}: {}", e, raw)))?;
        Self::from_value(&value)
    }

    /// Decode an already parsed JSON document.
    pub fn from_value(doc: &Value) -> Result<Self> {
        let object = doc
            .as_object()
            .ok_or_else(|| Error::parse(format!("expected a JSON object, got {}", doc)))?;

        check_upstream_error(doc, object)?;
        let header = decode_header(object)?;

        let mut kvs = Vec::new();
        if let Some(entries) = object.get("kvs").and_then(Value::as_array) {
            for entry in entries {
                kvs.push(decode_kv(entry)?);
            }
        }
        if let Some(events) = object.get("events").and_then(Value::as_array) {
            for event in events {
                if let Some(kv) = event.get("kv") {
                    kvs.push(decode_kv(kv)?);
                }
            }
        }

        let mut index = HashMap::with_capacity(kvs.len());
        for (position, entry) in kvs.iter().enumerate() {
            index.insert(entry.key.clone(), position);
        }

        Ok(Self {
            header,
            kvs,
            index,
            lease: decode_lease(object),
            deleted: object.get("deleted").and_then(lenient_u64),
        })
    }

    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    pub fn revision(&self) -> u64 {
        self.header.revision
    }

    /// Entries in the order the gateway sent them.
    pub fn kv_entries(&self) -> &[KvEntry] {
        &self.kvs
    }

    /// Entry for `key`; the last one wins if the key appeared twice.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Option<&KvEntry> {
        self.index.get(key.as_ref()).map(|&i| &self.kvs[i])
    }

    /// Key-indexed view of the entries.
    pub fn kv_map(&self) -> HashMap<&[u8], &KvEntry> {
        self.index
            .iter()
            .map(|(k, &i)| (k.as_slice(), &self.kvs[i]))
            .collect()
    }

    pub fn kv_count(&self) -> usize {
        self.kvs.len()
    }

    pub fn lease(&self) -> Option<&LeaseInfo> {
        self.lease.as_ref()
    }

    /// Number of keys removed, for delete-range responses
    pub fn deleted(&self) -> Option<u64> {
        self.deleted
    }
}

/// A completed one-shot exchange, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    raw: HttpResponse,
}

impl GatewayResponse {
    pub fn new(raw: HttpResponse) -> Self {
        Self { raw }
    }

    pub fn status(&self) -> u16 {
        self.raw.head.status
    }

    /// The response body exactly as received.
    pub fn json(&self) -> &str {
        &self.raw.body
    }

    pub fn parse(&self) -> Result<ParsedResponse> {
        ParsedResponse::parse(&self.raw.body)
    }
}

fn check_upstream_error(doc: &Value, object: &Map<String, Value>) -> Result<()> {
    let Some(error) = object.get("error") else {
        return Ok(());
    };
    let code = object.get("code").and_then(Value::as_i64).unwrap_or(-1);
    let message = match error {
        Value::String(message) => message.clone(),
        _ => doc.to_string(),
    };
    Err(Error::upstream(code, message))
}

fn decode_header(object: &Map<String, Value>) -> Result<ResponseHeader> {
    let header = object
        .get("header")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::missing_header_field("header"))?;

    let mut fields = [0u64; 4];
    for (slot, name) in fields.iter_mut().zip(HEADER_FIELDS) {
        let value = header
            .get(name)
            .ok_or_else(|| Error::missing_header_field(name))?;
        *slot = decimal_u64(name, value)?;
    }
    let [cluster_id, member_id, revision, raft_term] = fields;
    Ok(ResponseHeader {
        cluster_id,
        member_id,
        revision,
        raft_term,
    })
}

fn decode_kv(kv: &Value) -> Result<KvEntry> {
    let object = kv
        .as_object()
        .ok_or_else(|| Error::malformed_field("kv", format!("expected an object, got {}", kv)))?;
    if let Some(missing) = KV_FIELDS.iter().find(|f| !object.contains_key(**f)) {
        return Err(Error::missing_kv_field(*missing));
    }

    Ok(KvEntry {
        key: base64_field("key", &object["key"])?,
        value: match object.get("value") {
            Some(value) => base64_field("value", value)?,
            None => Vec::new(),
        },
        create_revision: decimal_u64("create_revision", &object["create_revision"])?,
        mod_revision: decimal_u64("mod_revision", &object["mod_revision"])?,
        version: decimal_u64("version", &object["version"])?,
    })
}

fn decode_lease(object: &Map<String, Value>) -> Option<LeaseInfo> {
    let lease_id = object.get("ID").and_then(lenient_u64)?;
    Some(LeaseInfo {
        lease_id,
        ttl: object.get("TTL").and_then(lenient_u64).unwrap_or(0),
        granted_ttl: object.get("grantedTTL").and_then(lenient_u64).unwrap_or(0),
    })
}

fn decimal_u64(field: &str, value: &Value) -> Result<u64> {
    lenient_u64(value)
        .ok_or_else(|| Error::malformed_field(field, format!("expected a decimal integer, got {}", value)))
}

/// Decimal string or JSON number. TTLs of expired leases come back as -1,
/// which maps to `None`.
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn base64_field(field: &str, value: &Value) -> Result<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::malformed_field(field, format!("expected a base64 string, got {}", value)))?;
    STANDARD
        .decode(text)
        .map_err(|e| Error::malformed_field(field, e.to_string()))
}
