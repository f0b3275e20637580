//! Per-call core shared by the context, the stream bridge and the adapter.
//!
//! The core owns the outbound half of the transport call and the
//! [`MetadataLedger`]. Every wire write goes through it:
//!
//! ```text
//! Context ─────┐
//! ResponseSink ┼─► CallCore (outbound lock ─► ledger) ─► OutboundHalf
//! Adapter ─────┘
//! ```
//!
//! Writers take the outbound lock before consulting the ledger, so headers
//! claimed by one writer reach the transport before any element another
//! writer sends after it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::codec::Message;
use crate::error::{GrpcwareError, Result};
use crate::ledger::MetadataLedger;
use crate::protocol::{Metadata, MetadataArg, Status};
use crate::transport::{CancelSignal, OutboundHalf};

pub(crate) struct CallCore {
    method: String,
    outbound: tokio::sync::Mutex<Box<dyn OutboundHalf>>,
    ledger: Mutex<MetadataLedger>,
    terminated: AtomicBool,
    cancel: CancelSignal,
}

impl CallCore {
    pub(crate) fn new(
        method: impl Into<String>,
        outbound: Box<dyn OutboundHalf>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            method: method.into(),
            outbound: tokio::sync::Mutex::new(outbound),
            ledger: Mutex::new(MetadataLedger::new()),
            terminated: AtomicBool::new(false),
            cancel,
        }
    }

    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[inline]
    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn set_header(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        self.ledger.lock().set(key, value)
    }

    pub(crate) fn set_trailer(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        self.ledger.lock().set_status(key, value)
    }

    pub(crate) fn set_final_trailers(&self, arg: MetadataArg) -> bool {
        self.ledger.lock().set_final_trailers(arg)
    }

    pub(crate) fn headers_sent(&self) -> bool {
        self.ledger.lock().headers_sent()
    }

    pub(crate) fn pending_headers(&self) -> Metadata {
        self.ledger.lock().pending_headers().clone()
    }

    pub(crate) fn pending_trailers(&self) -> Metadata {
        self.ledger.lock().pending_trailers().clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(GrpcwareError::Cancelled);
        }
        if self.is_terminated() {
            return Err(GrpcwareError::TransportClosed);
        }
        Ok(())
    }

    /// Await a transport write, abandoning it if the call is cancelled.
    ///
    /// A transport applying backpressure can hold a write indefinitely.
    async fn guarded(&self, write: BoxFuture<'_, Result<()>>) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GrpcwareError::Cancelled),
            result = write => result,
        }
    }

    /// Explicit header send. Returns whether headers were written.
    ///
    /// Once headers are out (in particular after termination) this is a
    /// no-op returning `Ok(false)`.
    pub(crate) async fn send_headers(&self, arg: MetadataArg) -> Result<bool> {
        if self.is_terminated() || self.headers_sent() {
            return Ok(false);
        }
        self.ensure_open()?;
        let mut outbound = self.outbound.lock().await;

        let headers = self.ledger.lock().take_headers(arg);
        match headers {
            Some(headers) => {
                self.guarded(outbound.send_headers(headers)).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Write one stream element, flushing headers first if still pending.
    pub(crate) async fn write_message(&self, message: Message) -> Result<()> {
        self.ensure_open()?;
        let mut outbound = self.outbound.lock().await;

        let headers = self.ledger.lock().flush_headers();
        if let Some(headers) = headers {
            self.guarded(outbound.send_headers(headers)).await?;
        }
        self.guarded(outbound.send_message(message)).await
    }

    /// Write the single response value, flushing headers first if still pending.
    pub(crate) async fn write_response(&self, message: Message) -> Result<()> {
        self.ensure_open()?;
        let mut outbound = self.outbound.lock().await;

        let headers = self.ledger.lock().flush_headers();
        if let Some(headers) = headers {
            self.guarded(outbound.send_headers(headers)).await?;
        }
        self.guarded(outbound.send_response(message)).await
    }

    /// Terminate the call exactly once.
    ///
    /// Later calls return `Ok(false)` without touching the transport. A call
    /// the transport already reported cancelled is marked terminated but
    /// nothing is written.
    pub(crate) async fn terminate(&self, status: Status) -> Result<bool> {
        if self.terminated.swap(true, Ordering::AcqRel) {
            tracing::debug!("Suppressed duplicate termination of {}", self.method);
            return Ok(false);
        }

        if self.is_cancelled() {
            tracing::debug!("Call {} cancelled, skipping status write", self.method);
            return Ok(false);
        }

        let mut outbound = self.outbound.lock().await;

        let (headers, trailers) = {
            let mut ledger = self.ledger.lock();
            (ledger.flush_headers(), ledger.resolve_trailers())
        };

        if let Some(headers) = headers {
            // Best effort: the status must still go out if headers fail.
            if let Err(e) = self.guarded(outbound.send_headers(headers)).await {
                tracing::debug!("Header flush before termination failed: {}", e);
            }
        }

        let trailers = trailers.unwrap_or_default();
        match self.guarded(outbound.terminate(status, trailers)).await {
            Ok(()) => Ok(true),
            Err(GrpcwareError::Cancelled) => {
                tracing::debug!("Call {} cancelled during termination", self.method);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Raw handle to the underlying call, for advanced use.
///
/// Cloneable, so a producer task can hold one and attach trailers when it
/// finishes.
///
/// # Example
///
/// ```ignore
/// ctx.set_status("foo", "bar");
/// let call = ctx.call().clone();
/// let elements = stream::iter(items).chain(stream::once(async move {
///     // Replaces the trailers accumulated with set_status.
///     call.end(json!({ "bar": "biz" }));
///     ...
/// }));
/// ```
#[derive(Clone)]
pub struct CallHandle {
    core: Arc<CallCore>,
}

impl CallHandle {
    pub(crate) fn new(core: Arc<CallCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<CallCore> {
        &self.core
    }

    /// Method name as the transport delivered it.
    pub fn method(&self) -> &str {
        self.core.method()
    }

    /// End the call with an explicit trailer payload.
    ///
    /// A non-empty mapping replaces the trailers accumulated through
    /// `set_status`; anything else is ignored. The terminal status itself
    /// goes out once the response completes. Returns whether the payload was
    /// recorded.
    pub fn end(&self, trailers: impl Into<MetadataArg>) -> bool {
        self.core.set_final_trailers(trailers.into())
    }

    /// Send headers now (see [`Context::send_metadata_from`](crate::Context::send_metadata_from)).
    pub async fn send_metadata(&self, metadata: impl Into<MetadataArg>) -> Result<bool> {
        self.core.send_headers(metadata.into()).await
    }

    /// Whether headers have been written.
    pub fn headers_sent(&self) -> bool {
        self.core.headers_sent()
    }

    /// Whether the client cancelled or the transport closed the call.
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Whether the terminal status has been emitted.
    pub fn is_terminated(&self) -> bool {
        self.core.is_terminated()
    }

    /// Resolves when the call is cancelled.
    pub async fn cancelled(&self) {
        self.core.cancel_signal().cancelled().await
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("method", &self.core.method())
            .field("terminated", &self.core.is_terminated())
            .field("cancelled", &self.core.is_cancelled())
            .finish()
    }
}
