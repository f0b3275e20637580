//! Per-call context handed to every middleware.
//!
//! The context exposes a shape-appropriate view of the call:
//!
//! | Shape | Request | Response |
//! |---|---|---|
//! | unary | [`req`](Context::req) | [`set_res`](Context::set_res) |
//! | response stream | [`req`](Context::req) | [`set_res_stream`](Context::set_res_stream) / [`res_sink`](Context::res_sink) |
//! | request stream | [`req_stream`](Context::req_stream) | [`set_res`](Context::set_res) |
//! | duplex | [`req_stream`](Context::req_stream) | [`set_res_stream`](Context::set_res_stream) / [`res_sink`](Context::res_sink) |
//!
//! Header and trailer methods behave the same for every shape.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::bridge::{RequestStream, ResponseSink};
use crate::call::CallHandle;
use crate::codec::{JsonCodec, Message};
use crate::error::{GrpcwareError, Result};
use crate::protocol::{CallShape, Metadata, MetadataArg, MethodDescriptor};

pub(crate) enum Request {
    Message(Message),
    Stream(RequestStream),
    Taken,
}

pub(crate) enum Response {
    Empty,
    Message(Message),
    Stream(BoxStream<'static, Result<Message>>),
}

/// Context of one in-flight call.
///
/// Exclusively owned by its call and passed by `&mut` down the pipeline.
pub struct Context {
    descriptor: Arc<MethodDescriptor>,
    full_name: String,
    shape: CallShape,
    metadata: Metadata,
    request: Request,
    response: Response,
    sink: Option<ResponseSink>,
    call: CallHandle,
    locals: Map<String, Value>,
}

impl Context {
    pub(crate) fn new(
        descriptor: Arc<MethodDescriptor>,
        full_name: impl Into<String>,
        metadata: Metadata,
        request: Request,
        call: CallHandle,
    ) -> Self {
        let shape = descriptor.shape();
        Self {
            descriptor,
            full_name: full_name.into(),
            shape,
            metadata,
            request,
            response: Response::Empty,
            sink: None,
            call,
            locals: Map::new(),
        }
    }

    pub(crate) fn attach_sink(&mut self, sink: ResponseSink) {
        self.sink = Some(sink);
    }

    pub(crate) fn take_sink(&mut self) -> Option<ResponseSink> {
        self.sink.take()
    }

    pub(crate) fn take_response(&mut self) -> Response {
        std::mem::replace(&mut self.response, Response::Empty)
    }

    // ---- call information ----

    /// Descriptor of the called method.
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// Declared method name (`SayHello`).
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Full method path (`/helloworld.Greeter/SayHello`).
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Shape of the call.
    #[inline]
    pub fn shape(&self) -> CallShape {
        self.shape
    }

    /// Request headers sent by the client.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Look up a request header (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key)
    }

    /// Raw handle to the underlying call.
    pub fn call(&self) -> &CallHandle {
        &self.call
    }

    /// Per-call scratch space shared by the middleware of one call.
    pub fn locals(&self) -> &Map<String, Value> {
        &self.locals
    }

    /// Mutable per-call scratch space.
    pub fn locals_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.locals
    }

    // ---- request ----

    /// The request message of a unary or response-streaming call.
    ///
    /// `None` for request-streaming shapes.
    pub fn req(&self) -> Option<&Message> {
        match &self.request {
            Request::Message(message) => Some(message),
            _ => None,
        }
    }

    /// Decode the request message into a typed value.
    pub fn req_as<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.request {
            Request::Message(message) => JsonCodec::decode_ref(message),
            _ => Err(self.invalid_shape("req_as")),
        }
    }

    /// The inbound stream of a request-streaming or duplex call.
    pub fn req_stream(&mut self) -> Result<&mut RequestStream> {
        match &mut self.request {
            Request::Stream(stream) => Ok(stream),
            Request::Taken => Err(GrpcwareError::handler("request stream already taken")),
            Request::Message(_) => Err(GrpcwareError::InvalidShape {
                operation: "req_stream",
                shape: self.shape,
            }),
        }
    }

    /// Take ownership of the inbound stream, e.g. to move it into a task.
    pub fn take_req_stream(&mut self) -> Result<RequestStream> {
        self.req_stream()?;
        match std::mem::replace(&mut self.request, Request::Taken) {
            Request::Stream(stream) => Ok(stream),
            _ => Err(GrpcwareError::handler("request stream already taken")),
        }
    }

    // ---- response ----

    /// Assign the single response of a unary or request-streaming call.
    ///
    /// Replaces any earlier assignment.
    pub fn set_res(&mut self, message: Message) -> Result<()> {
        if self.shape.is_response_stream() {
            return Err(self.invalid_shape("set_res"));
        }
        self.response = Response::Message(message);
        Ok(())
    }

    /// Encode and assign a typed response.
    pub fn set_res_as<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.set_res(JsonCodec::encode(value)?)
    }

    /// The assigned single response, if any.
    pub fn res(&self) -> Option<&Message> {
        match &self.response {
            Response::Message(message) => Some(message),
            _ => None,
        }
    }

    /// Assign the lazy element sequence of a streaming response.
    ///
    /// The sequence is pulled one element at a time once the pipeline
    /// completes, after anything written through [`res_sink`](Self::res_sink).
    /// An `Err` element aborts the response with that error's status.
    pub fn set_res_stream<S>(&mut self, elements: S) -> Result<()>
    where
        S: Stream<Item = Result<Message>> + Send + 'static,
    {
        if !self.shape.is_response_stream() {
            return Err(self.invalid_shape("set_res_stream"));
        }
        self.response = Response::Stream(elements.boxed());
        Ok(())
    }

    /// Whether a streaming response sequence was assigned.
    pub fn has_res_stream(&self) -> bool {
        matches!(self.response, Response::Stream(_))
    }

    /// Writable response of a streaming call.
    ///
    /// Elements are written to the client as they arrive, in write order.
    pub fn res_sink(&self) -> Result<ResponseSink> {
        self.sink
            .clone()
            .ok_or_else(|| self.invalid_shape("res_sink"))
    }

    // ---- metadata ----

    /// Set a response header. Ignored once headers are sent.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        self.call.core().set_header(key, value)
    }

    /// Send the pending response headers now.
    pub fn send_metadata(&self) -> impl Future<Output = Result<bool>> + Send + 'static {
        self.send_metadata_from(MetadataArg::Absent)
    }

    /// Send headers now from an explicit argument.
    ///
    /// A non-empty mapping replaces everything set so far. An empty mapping
    /// or `()` sends the pending headers. Anything else is ignored and leaves
    /// the headers unsent. Returns whether headers were written.
    ///
    /// The returned future does not borrow the context.
    pub fn send_metadata_from(
        &self,
        metadata: impl Into<MetadataArg>,
    ) -> impl Future<Output = Result<bool>> + Send + 'static {
        let call = self.call.clone();
        let metadata = metadata.into();
        async move { call.send_metadata(metadata).await }
    }

    /// Whether response headers have been sent.
    pub fn headers_sent(&self) -> bool {
        self.call.headers_sent()
    }

    /// Headers that would go out at the next flush.
    pub fn pending_headers(&self) -> Metadata {
        self.call.core().pending_headers()
    }

    /// Set a trailer sent with the terminal status.
    pub fn set_status(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        self.call.core().set_trailer(key, value)
    }

    /// Trailers accumulated through [`set_status`](Self::set_status).
    pub fn pending_trailers(&self) -> Metadata {
        self.call.core().pending_trailers()
    }

    fn invalid_shape(&self, operation: &'static str) -> GrpcwareError {
        GrpcwareError::InvalidShape {
            operation,
            shape: self.shape,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("full_name", &self.full_name)
            .field("shape", &self.shape)
            .field("metadata", &self.metadata)
            .field("headers_sent", &self.headers_sent())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_context(shape: CallShape) -> (Context, crate::transport::memory::ClientCall) {
    use crate::call::CallCore;
    use crate::transport::memory;
    use serde_json::json;

    let descriptor = MethodDescriptor::new("DoStuff", shape, "ArgRequest", "ArgReply");
    let (incoming, client) = memory::call(
        "/test.Service/DoStuff",
        Metadata::from([("user-agent", "unit-test")]),
    );
    let core = Arc::new(CallCore::new(
        incoming.method,
        incoming.outbound,
        incoming.cancel.clone(),
    ));

    let request = if shape.is_request_stream() {
        Request::Stream(RequestStream::new(incoming.inbound, incoming.cancel))
    } else {
        Request::Message(json!({ "message": "1 foo" }))
    };

    let mut ctx = Context::new(
        Arc::new(descriptor),
        "/test.Service/DoStuff",
        incoming.metadata,
        request,
        CallHandle::new(core.clone()),
    );
    if shape.is_response_stream() {
        let (sink, _elements) = crate::bridge::sink_channel(4, core);
        ctx.attach_sink(sink);
    }

    (ctx, client)
}
