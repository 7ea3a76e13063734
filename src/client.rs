//! Gateway client.
//!
//! Every operation opens its own connection session on the shared worker pool
//! and returns immediately with a pending result. Callers block on it with
//! `wait()` or `.await` it from async code.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use log::{debug, info};

use crate::command::{self, Target};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::{HttpResponse, RequestDescriptor};
use crate::keys::KeyRange;
use crate::pool::WorkerPool;
use crate::response::{GatewayResponse, ParsedResponse};
use crate::session::{PendingRequest, Session};
use crate::watch::{self, WatchHandle, WatchRequest};

/// Smallest lease TTL, in seconds, the gateway accepts.
pub const LEASE_MIN_TTL: u64 = 2;

/// Result of a one-shot operation that may not have completed yet.
#[derive(Debug)]
pub struct PendingResponse {
    inner: PendingRequest<HttpResponse>,
}

impl PendingResponse {
    fn new(inner: PendingRequest<HttpResponse>) -> Self {
        Self { inner }
    }

    fn rejected(error: Error) -> Self {
        Self::new(PendingRequest::ready(Err(error)))
    }

    /// Block until the exchange completes and return the raw response.
    ///
    /// Works from plain threads and from inside watch callbacks. Code already
    /// running on a current-thread runtime should `.await` instead.
    pub fn wait(self) -> Result<GatewayResponse> {
        self.inner.wait().map(GatewayResponse::new)
    }

    /// Block until the exchange completes and decode the body.
    pub fn parsed(self) -> Result<ParsedResponse> {
        self.wait()?.parse()
    }
}

impl Future for PendingResponse {
    type Output = Result<GatewayResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|result| result.map(GatewayResponse::new))
    }
}

/// Client for the HTTP/JSON gateway of a key-value store.
///
/// # Example
///
/// ```rust,no_run
/// use kv_gateway_client::{Client, Config};
///
/// let client = Client::new(Config::new("127.0.0.1", 2379))?;
/// client.set("/config/mode", "active").wait()?;
/// let response = client.get("/config/mode").parsed()?;
/// assert_eq!(response.kv_entries()[0].value, b"active");
/// # Ok::<(), kv_gateway_client::Error>(())
/// ```
pub struct Client {
    config: Config,
    pool: WorkerPool,
}

impl Client {
    /// Validate `config` and start the worker pool.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::start(config.worker_threads)?;
        info!(
            "Client for {}:{} ready ({} workers, prefix {})",
            config.host, config.port, config.worker_threads, config.version_prefix
        );
        Ok(Self { config, pool })
    }

    /// Client for `host:port` with default settings.
    pub fn connect<S: Into<String>>(host: S, port: u16) -> Result<Self> {
        Self::new(Config::new(host, port))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Change the API version prefix used by subsequent calls.
    pub fn set_version_prefix<S: Into<String>>(&mut self, prefix: S) -> Result<()> {
        let prefix = prefix.into();
        if !prefix.starts_with('/') {
            return Err(Error::invalid_configuration(format!(
                "version prefix '{}' must start with '/'",
                prefix
            )));
        }
        self.config.version_prefix = prefix;
        Ok(())
    }

    pub fn set<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> PendingResponse {
        self.set_with_lease(key, value, 0)
    }

    /// Store `value` under `key`, attached to `lease_id` (0 for no lease).
    pub fn set_with_lease<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        key: K,
        value: V,
        lease_id: u64,
    ) -> PendingResponse {
        if key.as_ref().is_empty() {
            return PendingResponse::rejected(Error::EmptyKey);
        }
        self.post(command::KV_PUT, command::put(key, value, lease_id))
    }

    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> PendingResponse {
        match single_key(key) {
            Ok(target) => self.post(command::KV_RANGE, command::range(&target)),
            Err(e) => PendingResponse::rejected(e),
        }
    }

    /// Every key starting with `prefix`.
    pub fn get_all<K: AsRef<[u8]>>(&self, prefix: K) -> PendingResponse {
        match prefix_range(prefix) {
            Ok(target) => self.post(command::KV_RANGE, command::range(&target)),
            Err(e) => PendingResponse::rejected(e),
        }
    }

    pub fn del<K: AsRef<[u8]>>(&self, key: K) -> PendingResponse {
        match single_key(key) {
            Ok(target) => self.post(command::KV_DELETE_RANGE, command::delete_range(&target)),
            Err(e) => PendingResponse::rejected(e),
        }
    }

    /// Delete every key starting with `prefix`.
    pub fn del_all<K: AsRef<[u8]>>(&self, prefix: K) -> PendingResponse {
        match prefix_range(prefix) {
            Ok(target) => self.post(command::KV_DELETE_RANGE, command::delete_range(&target)),
            Err(e) => PendingResponse::rejected(e),
        }
    }

    /// Grant a lease of `ttl` seconds. `id` 0 lets the gateway pick one.
    pub fn lease_grant(&self, ttl: u64, id: u64) -> PendingResponse {
        if ttl < LEASE_MIN_TTL {
            return PendingResponse::rejected(Error::LeaseTtlTooLow {
                ttl,
                min: LEASE_MIN_TTL,
            });
        }
        self.post(command::LEASE_GRANT, command::lease_grant(ttl, id))
    }

    /// Revoke a lease, deleting every key attached to it.
    pub fn lease_revoke(&self, id: u64) -> PendingResponse {
        self.post(command::LEASE_REVOKE, command::lease_revoke(id))
    }

    pub fn lease_time_to_live(&self, id: u64) -> PendingResponse {
        self.post(command::LEASE_TIME_TO_LIVE, command::lease_time_to_live(id, true))
    }

    /// Watch one key. The callback runs on a pool worker for every change
    /// after the returned handle is established.
    pub fn watch<K, F>(&self, key: K, callback: F) -> WatchHandle
    where
        K: AsRef<[u8]>,
        F: Fn(Result<ParsedResponse>) + Send + Sync + 'static,
    {
        match single_key(key) {
            Ok(target) => self.open_watch(target, Arc::new(callback)),
            Err(e) => WatchHandle::failed(e),
        }
    }

    /// Watch every key starting with `prefix`.
    pub fn watch_prefix<K, F>(&self, prefix: K, callback: F) -> WatchHandle
    where
        K: AsRef<[u8]>,
        F: Fn(Result<ParsedResponse>) + Send + Sync + 'static,
    {
        match prefix_range(prefix) {
            Ok(target) => self.open_watch(target, Arc::new(callback)),
            Err(e) => WatchHandle::failed(e),
        }
    }

    /// Post an arbitrary JSON body to `path`. The path is used as given,
    /// without the version prefix.
    pub fn custom_command<P: Into<String>, B: Into<String>>(&self, path: P, body: B) -> PendingResponse {
        self.submit(path.into(), body.into())
    }

    /// Stop the worker pool. Requests still in flight resolve to
    /// `Error::SessionAborted`, as does every later call.
    ///
    /// Dropping the client stops it too. Either may happen on any thread,
    /// including inside a watch callback.
    pub fn stop(&mut self) {
        self.pool.stop();
    }

    fn post(&self, endpoint: &str, body: String) -> PendingResponse {
        self.submit(format!("{}{}", self.config.version_prefix, endpoint), body)
    }

    fn submit(&self, path: String, body: String) -> PendingResponse {
        let Some(handle) = self.pool.handle() else {
            return PendingResponse::rejected(Error::SessionAborted);
        };
        debug!("POST {} {}", path, body);
        let request = RequestDescriptor::post(self.config.host.clone(), self.config.port, path, body);
        PendingResponse::new(Session::new(request).spawn_oneshot(handle, self.config.request_timeout()))
    }

    fn open_watch(&self, target: Target, callback: watch::WatchCallback) -> WatchHandle {
        let Some(handle) = self.pool.handle() else {
            return WatchHandle::failed(Error::SessionAborted);
        };
        let request = WatchRequest {
            host: self.config.host.clone(),
            port: self.config.port,
            version_prefix: self.config.version_prefix.clone(),
            target,
            max_frame_bytes: self.config.max_frame_bytes,
        };
        watch::establish(handle, request, callback)
    }
}

fn single_key<K: AsRef<[u8]>>(key: K) -> Result<Target> {
    if key.as_ref().is_empty() {
        return Err(Error::EmptyKey);
    }
    Ok(Target::key(key))
}

fn prefix_range<K: AsRef<[u8]>>(prefix: K) -> Result<Target> {
    KeyRange::prefix(prefix).map(Target::Range)
}
