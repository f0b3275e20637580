//! Inbound flow control.
//!
//! A [`FlowControl`] gates intake of request elements. While paused, the
//! request stream stops asking the transport for more elements, so the
//! transport's own buffers fill and the client is held back instead of
//! memory growing on the server.
//!
//! Handles are cheap clones sharing one state. A middleware can pause
//! intake, hand a clone to a spawned task doing per-element work, and resume
//! from there.
//!
//! # Example
//!
//! ```ignore
//! while let Some(msg) = req.next().await {
//!     req.pause();
//!     let flow = req.flow();
//!     let sink = sink.clone();
//!     tokio::spawn(async move {
//!         let reply = slow_transform(msg?).await;
//!         sink.write(reply).await?;
//!         flow.resume();
//!         Ok::<_, GrpcwareError>(())
//!     });
//! }
//! ```

use std::sync::Arc;

use tokio::sync::watch;

/// Shared pause/resume switch for one inbound stream.
#[derive(Debug, Clone)]
pub struct FlowControl {
    paused: Arc<watch::Sender<bool>>,
}

impl FlowControl {
    /// Create a controller in the flowing (not paused) state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            paused: Arc::new(tx),
        }
    }

    /// Stop intake after the element currently being delivered.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Resume intake.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Whether intake is paused.
    #[inline]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Wait until intake is not paused. Returns immediately when flowing.
    pub async fn wait_resumed(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}
