//! Inbound direction: transport elements exposed as a request stream.
//!
//! [`RequestStream`] is pull-based. It asks the transport for the next
//! element only when the consumer polls, and not at all while paused, so it
//! never buffers ahead of the consumer. Elements come out in wire order.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::stream::{self, BoxStream, Stream};

use crate::backpressure::FlowControl;
use crate::codec::{JsonCodec, Message};
use crate::error::Result;
use crate::transport::{CancelSignal, InboundHalf};

/// Lazy, single-pass sequence of request elements.
pub struct RequestStream {
    inner: BoxStream<'static, Result<Message>>,
    flow: FlowControl,
}

struct Intake {
    inbound: Box<dyn InboundHalf>,
    flow: FlowControl,
    cancel: CancelSignal,
    done: bool,
}

impl RequestStream {
    pub(crate) fn new(inbound: Box<dyn InboundHalf>, cancel: CancelSignal) -> Self {
        let flow = FlowControl::new();
        let intake = Intake {
            inbound,
            flow: flow.clone(),
            cancel,
            done: false,
        };

        let inner = stream::unfold(intake, |mut st| async move {
            if st.done {
                return None;
            }

            if st.flow.is_paused() {
                st.inbound.set_paused(true);
                tokio::select! {
                    biased;
                    _ = st.cancel.cancelled() => return None,
                    _ = st.flow.wait_resumed() => {}
                }
                st.inbound.set_paused(false);
            }

            let next = tokio::select! {
                biased;
                _ = st.cancel.cancelled() => return None,
                next = st.inbound.recv() => next,
            };

            match next {
                Ok(Some(message)) => Some((Ok(message), st)),
                Ok(None) => None,
                Err(e) => {
                    st.done = true;
                    Some((Err(e), st))
                }
            }
        });

        Self {
            inner: Box::pin(inner),
            flow,
        }
    }

    /// Pause intake. The next poll waits until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.flow.pause();
    }

    /// Resume intake.
    pub fn resume(&self) {
        self.flow.resume();
    }

    /// Whether intake is paused.
    pub fn is_paused(&self) -> bool {
        self.flow.is_paused()
    }

    /// A handle to this stream's flow control, for resuming from another task.
    pub fn flow(&self) -> FlowControl {
        self.flow.clone()
    }

    /// Decode every element into `T`.
    pub fn typed<T>(self) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        use futures::StreamExt;
        self.map(|item| item.and_then(JsonCodec::decode))
    }
}

impl Stream for RequestStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RequestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStream")
            .field("paused", &self.flow.is_paused())
            .finish_non_exhaustive()
    }
}
