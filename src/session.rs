//! # Connection Session
//!
//! One session owns one connection for one request:
//!
//! ```text
//! Idle -> Resolving -> Connecting -> Writing -> Reading -> Done
//!                                           \-> ReadingChunk -> ... -> Done | Cancelled
//! ```
//!
//! Transitions only move forward. Any failure ends the session with the error
//! kind of the stage it happened in (`Resolve`, `Connect`, `Write`, `Read`).
//! Resolution and the TCP connect are done here; HTTP/1.1 framing on the open
//! socket is left to `hyper`'s connection API.
//!
//! The result of a session is delivered through a `tokio::sync::oneshot`
//! channel. The sender is moved into the session task and consumed by the one
//! `send` that fulfils it, so a second fulfilment cannot be written, and the
//! receiving [`PendingRequest`] can only be observed once.
//!
//! In streaming mode the result is the response head. Body frames are then
//! fed to a [`FrameExtractor`] and every complete document goes to a
//! [`FrameSink`], in stream order, on the task that read it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1;
use hyper::Response;
use hyper_util::rt::TokioIo;
use log::{debug, error, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::framing::FrameExtractor;
use crate::http::{HttpResponse, RequestDescriptor, ResponseHead};
use crate::pool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    Resolving,
    Connecting,
    Writing,
    Reading,
    ReadingChunk,
    Done,
    Cancelled,
}

/// Receiver half of a single-assignment result slot.
///
/// Block on it with [`wait`](Self::wait), or `.await` it from async code.
#[derive(Debug)]
pub struct PendingRequest<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> PendingRequest<T> {
    /// A connected sender/receiver pair.
    pub fn channel() -> (oneshot::Sender<Result<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A slot that is already fulfilled, used for requests rejected before
    /// any I/O happens.
    pub fn ready(result: Result<T>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(result);
        pending
    }

    /// Block the calling thread until the result is available.
    ///
    /// Only the calling thread blocks; the workers keep driving I/O. On a
    /// worker of a multi-thread runtime (a watch callback, for instance) the
    /// worker hands its other tasks off before blocking. On a current-thread
    /// runtime use `.await` instead.
    pub fn wait(self) -> Result<T> {
        let rx = self.rx;
        pool::block_in_place(move || rx.blocking_recv()).unwrap_or(Err(Error::SessionAborted))
    }
}

impl<T> Future for PendingRequest<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::SessionAborted)))
    }
}

/// Receiver of the documents framed from a streaming response.
///
/// Called sequentially from the session task; implementations must not assume
/// which worker thread that is.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSink: Send + 'static {
    /// A complete JSON document, in stream order.
    fn on_document(&mut self, document: Value);

    /// A terminal failure after the stream was established. Called at most
    /// once and never followed by another document.
    fn on_error(&mut self, error: Error);
}

/// An HTTP/1.1 connection handed to `hyper`. The task driving it is aborted
/// when the session lets go of it.
struct Connection {
    sender: http1::SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// The state machine value driving one request over one socket.
#[derive(Debug)]
pub struct Session {
    request: RequestDescriptor,
    state: SessionState,
}

impl Session {
    pub fn new(request: RequestDescriptor) -> Self {
        Self {
            request,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run a request/response exchange on `handle`, optionally bounded by
    /// `timeout`.
    pub fn spawn_oneshot(
        self,
        handle: &Handle,
        timeout: Option<Duration>,
    ) -> PendingRequest<HttpResponse> {
        let (slot, pending) = PendingRequest::channel();
        handle.spawn(async move {
            let mut session = self;
            let path = session.request.path.clone();
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, session.run_oneshot()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout(format!(
                        "{} did not complete within {:?}",
                        path, limit
                    ))),
                },
                None => session.run_oneshot().await,
            };
            if let Err(e) = &result {
                debug!("Request to {} failed: {}", path, e);
            }
            let _ = slot.send(result);
        });
        pending
    }

    /// Run a streaming request on `handle`.
    ///
    /// The returned slot is fulfilled with the response head as soon as it is
    /// read. Afterwards documents go to `sink` until the stream fails, the
    /// peer closes it, or `cancel` fires.
    pub fn spawn_streaming<S: FrameSink>(
        self,
        handle: &Handle,
        max_frame_bytes: usize,
        sink: S,
        cancel: CancellationToken,
    ) -> PendingRequest<ResponseHead> {
        let (slot, pending) = PendingRequest::channel();
        handle.spawn(async move {
            let mut session = self;
            session
                .run_streaming(slot, FrameExtractor::new(max_frame_bytes), sink, cancel)
                .await;
        });
        pending
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(next > self.state, "session moved backwards: {:?} -> {:?}", self.state, next);
        debug!("{} {}: {:?} -> {:?}", self.request.verb, self.request.path, self.state, next);
        self.state = next;
    }

    async fn open(&mut self) -> Result<Connection> {
        self.advance(SessionState::Resolving);
        let addrs: Vec<_> = tokio::net::lookup_host((self.request.host.as_str(), self.request.port))
            .await
            .map_err(|e| Error::resolve(format!("{}:{}: {}", self.request.host, self.request.port, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::resolve(format!(
                "{}:{} resolved to no addresses",
                self.request.host, self.request.port
            )));
        }

        self.advance(SessionState::Connecting);
        let mut last_error = None;
        let mut connected = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(format!("{}: {}", addr, e));
                }
            }
        }
        let stream = connected.ok_or_else(|| Error::connect(last_error.unwrap_or_default()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::connect(format!("Failed to set TCP_NODELAY: {}", e)))?;

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| Error::connect(format!("HTTP handshake failed: {}", e)))?;
        let path = self.request.path.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Connection for {} ended: {}", path, e);
            }
        });
        Ok(Connection { sender, driver })
    }

    /// Write the request and wait for the response head.
    async fn exchange(&mut self, connection: &mut Connection) -> Result<Response<Incoming>> {
        self.advance(SessionState::Writing);
        let request = self.request.to_request()?;
        let response = connection
            .sender
            .send_request(request)
            .await
            .map_err(exchange_error)?;
        self.advance(SessionState::Reading);
        Ok(response)
    }

    async fn run_oneshot(&mut self) -> Result<HttpResponse> {
        let mut connection = self.open().await?;
        let response = self.exchange(&mut connection).await?;
        let head = ResponseHead::from_response(&response);
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::read(e.to_string()))?
            .to_bytes();

        self.advance(SessionState::Done);
        let body = String::from_utf8(body.to_vec()).map_err(|_| Error::read("response body is not valid UTF-8"))?;
        Ok(HttpResponse { head, body })
    }

    async fn run_streaming<S: FrameSink>(
        &mut self,
        slot: oneshot::Sender<Result<ResponseHead>>,
        mut extractor: FrameExtractor,
        mut sink: S,
        cancel: CancellationToken,
    ) {
        let established = tokio::select! {
            _ = cancel.cancelled() => {
                self.advance(SessionState::Cancelled);
                let _ = slot.send(Err(Error::SessionAborted));
                return;
            }
            result = self.establish() => result,
        };
        let (_connection, response) = match established {
            Ok(established) => established,
            Err(e) => {
                let _ = slot.send(Err(e));
                return;
            }
        };
        // The slot is consumed here; everything after goes to the sink.
        let _ = slot.send(Ok(ResponseHead::from_response(&response)));

        self.advance(SessionState::ReadingChunk);
        let mut body = response.into_body();
        let outcome = loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => None,
                frame = body.frame() => Some(frame),
            };
            match frame {
                // Aborted by cancellation: the expected way a watch ends
                None => break Ok(()),
                Some(None) => break Err(Error::read("stream closed by peer")),
                Some(Some(Err(e))) => break Err(Error::read(e.to_string())),
                Some(Some(Ok(frame))) => {
                    // Trailers carry no documents
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    extractor.push(&data);
                    if let Err(e) = dispatch(&mut extractor, &mut sink) {
                        break Err(e);
                    }
                }
            }
        };

        match outcome {
            Ok(()) => {
                self.advance(SessionState::Cancelled);
                debug!("Stream on {} cancelled", self.request.path);
            }
            Err(e) => {
                self.advance(SessionState::Done);
                if cancel.is_cancelled() {
                    warn!("Stream on {} ended after cancellation: {}", self.request.path, e);
                } else {
                    error!("Stream on {} terminated: {}", self.request.path, e);
                    sink.on_error(e);
                }
            }
        }
    }

    async fn establish(&mut self) -> Result<(Connection, Response<Incoming>)> {
        let mut connection = self.open().await?;
        let response = self.exchange(&mut connection).await?;
        Ok((connection, response))
    }
}

/// Failures while the request is written or the head is read. `hyper` reports
/// both through `send_request`; head parsing problems belong to `Reading`.
fn exchange_error(e: hyper::Error) -> Error {
    if e.is_parse() || e.is_incomplete_message() || e.is_canceled() {
        Error::read(e.to_string())
    } else {
        Error::write(e.to_string())
    }
}

/// Hand every complete document to the sink, including those emitted ahead
/// of a deferred extractor error.
fn dispatch<S: FrameSink>(extractor: &mut FrameExtractor, sink: &mut S) -> Result<()> {
    loop {
        let documents = extractor.pull_complete()?;
        if documents.is_empty() {
            return Ok(());
        }
        for document in documents {
            sink.on_document(document);
        }
    }
}
