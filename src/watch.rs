//! # Watch Streams
//!
//! A watch is a streaming session on the gateway's watch endpoint. The first
//! document on the stream acknowledges creation and resolves
//! [`WatchHandle::wait`]. Every later document is decoded and passed to the
//! user callback, in stream order, from whichever worker read it.
//!
//! There is no reconnect: a dropped stream, a framing failure or a document
//! that does not decode is reported to the callback once as an error and the
//! watch is over.

use std::cell::Cell;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::command::{self, Target};
use crate::error::{Error, Result};
use crate::http::{RequestDescriptor, ResponseHead};
use crate::response::ParsedResponse;
use crate::session::{FrameSink, PendingRequest, Session};

/// Receives every change notification, or the error that ended the stream.
pub type WatchCallback = Arc<dyn Fn(Result<ParsedResponse>) + Send + Sync>;

/// Where and how to open a watch stream.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub host: String,
    pub port: u16,
    pub version_prefix: String,
    pub target: Target,
    pub max_frame_bytes: usize,
}

/// Open a watch stream on `handle`.
pub fn establish(handle: &Handle, request: WatchRequest, callback: WatchCallback) -> WatchHandle {
    let path = format!("{}{}", request.version_prefix, command::WATCH);
    let descriptor = RequestDescriptor::post(
        request.host,
        request.port,
        path.clone(),
        command::watch_create(&request.target),
    );

    let gate = Arc::new(CallbackGate::new(callback));
    let (created_tx, created) = PendingRequest::channel();
    let sink = WatchSink {
        gate: Arc::clone(&gate),
        created: Some(created_tx),
        last_revision: None,
    };
    info!("Opening watch stream on {}", path);
    let head = Session::new(descriptor).spawn_streaming(
        handle,
        request.max_frame_bytes,
        sink,
        gate.cancel.clone(),
    );

    WatchHandle {
        gate,
        head: Some(head),
        created: Some(created),
        established: None,
    }
}

/// Owner of one watch stream. Dropping it cancels the stream.
pub struct WatchHandle {
    gate: Arc<CallbackGate>,
    head: Option<PendingRequest<ResponseHead>>,
    created: Option<PendingRequest<ParsedResponse>>,
    established: Option<Result<ParsedResponse>>,
}

impl WatchHandle {
    /// A handle whose establishment already failed; nothing runs behind it.
    pub fn failed(error: Error) -> Self {
        Self {
            gate: Arc::new(CallbackGate::new(Arc::new(|_| {}))),
            head: None,
            created: None,
            established: Some(Err(error)),
        }
    }

    /// Block until the gateway has acknowledged the watch, returning the
    /// acknowledgement. Later calls return the same outcome.
    ///
    /// Usable from plain threads and from watch callbacks. From other async
    /// code use [`established`](Self::established).
    pub fn wait(&mut self) -> Result<ParsedResponse> {
        if self.established.is_none() {
            let outcome = match self.head.take().map(PendingRequest::wait) {
                Some(Err(e)) => Err(e),
                _ => self
                    .created
                    .take()
                    .map(PendingRequest::wait)
                    .unwrap_or(Err(Error::SessionAborted)),
            };
            self.record(outcome);
        }
        self.established.clone().unwrap_or(Err(Error::SessionAborted))
    }

    /// Async counterpart of [`wait`](Self::wait).
    pub async fn established(&mut self) -> Result<ParsedResponse> {
        if self.established.is_none() {
            let head = match self.head.take() {
                Some(head) => head.await.map(|_| ()),
                None => Ok(()),
            };
            let outcome = match head {
                Err(e) => Err(e),
                Ok(()) => match self.created.take() {
                    Some(created) => created.await,
                    None => Err(Error::SessionAborted),
                },
            };
            self.record(outcome);
        }
        self.established.clone().unwrap_or(Err(Error::SessionAborted))
    }

    /// Abort the stream. Safe to call repeatedly and after the stream ended.
    ///
    /// Once this returns the callback is not invoked again. A callback
    /// running on another thread at that moment is waited for, unless
    /// `cancel` is itself called from inside a watch callback: then it only
    /// stops further invocations and returns at once, so two callbacks
    /// cancelling each other's watches cannot deadlock.
    pub fn cancel(&self) {
        self.gate.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.cancel.is_cancelled()
    }

    fn record(&mut self, outcome: Result<ParsedResponse>) {
        if outcome.is_err() {
            self.cancel();
        }
        self.established = Some(outcome);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

thread_local! {
    /// Set while this thread runs a watch callback, of any watch
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside a callback until dropped, panics
/// included.
struct CallbackScope {
    outer: bool,
}

impl CallbackScope {
    fn enter() -> Self {
        Self {
            outer: IN_CALLBACK.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        let outer = self.outer;
        IN_CALLBACK.with(|flag| flag.set(outer));
    }
}

/// Serialises callback invocations against cancellation.
struct CallbackGate {
    callback: WatchCallback,
    cancel: CancellationToken,
    /// Held for the duration of each callback invocation
    running: Mutex<()>,
}

impl CallbackGate {
    fn new(callback: WatchCallback) -> Self {
        Self {
            callback,
            cancel: CancellationToken::new(),
            running: Mutex::new(()),
        }
    }

    fn deliver(&self, result: Result<ParsedResponse>) {
        let _running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock: documents already read are dropped too
        if self.cancel.is_cancelled() {
            return;
        }
        let _scope = CallbackScope::enter();
        (self.callback)(result);
    }

    fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Cancelling watch stream");
            self.cancel.cancel();
        }

        // Inside a callback the lock may be held by this thread, or by a
        // callback that is itself waiting on this one
        if !IN_CALLBACK.with(Cell::get) {
            drop(self.running.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }
}

/// Per-stream document handler installed in the session.
struct WatchSink {
    gate: Arc<CallbackGate>,
    created: Option<oneshot::Sender<Result<ParsedResponse>>>,
    last_revision: Option<u64>,
}

impl FrameSink for WatchSink {
    fn on_document(&mut self, document: Value) {
        let parsed = match document.get("result") {
            Some(result) => ParsedResponse::from_value(result),
            None => ParsedResponse::from_value(&document),
        };

        if let Some(created) = self.created.take() {
            if let Err(e) = &parsed {
                warn!("Watch creation failed: {}", e);
                self.gate.cancel.cancel();
            }
            let _ = created.send(parsed);
            return;
        }

        if let Ok(response) = &parsed {
            let revision = response.revision();
            if let Some(last) = self.last_revision {
                if response.kv_count() > 0 && revision <= last {
                    warn!("Watch revision went from {} to {}", last, revision);
                }
            }
            self.last_revision = Some(revision);
        }

        let failed = parsed.is_err();
        self.gate.deliver(parsed);
        if failed {
            // Nothing after an undecodable document is trusted
            self.gate.cancel.cancel();
        }
    }

    fn on_error(&mut self, error: Error) {
        match self.created.take() {
            Some(created) => {
                let _ = created.send(Err(error));
            }
            None => self.gate.deliver(Err(error)),
        }
    }
}
