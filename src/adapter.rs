//! Call adapter - drives one call from arrival to its single termination.
//!
//! ```text
//! IncomingCall ─► read request (singular shapes)
//!              ─► build Context (+ ResponseSink for streaming responses)
//!              ─► run Pipeline ─┬─ value response  ─► write response ─► terminate
//!                               └─ stream response ─► drain          ─► terminate
//! ```
//!
//! Any error from the pipeline or the response stream terminates the call
//! with the status derived from the error. A cancelled call is abandoned
//! without writing a status.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::bridge::{drain, sink_channel, RequestStream};
use crate::call::{CallCore, CallHandle};
use crate::codec::JsonCodec;
use crate::error::{GrpcwareError, Result};
use crate::handler::{Context, Request, Response, Route};
use crate::protocol::Status;
use crate::transport::{CancelSignal, InboundHalf, IncomingCall};

/// Run one call through its route and terminate it.
///
/// Returns the status the call ended with. For a cancelled call this is
/// `CANCELLED` even though nothing was written.
pub(crate) async fn run_call(route: &Route, incoming: IncomingCall, response_buffer: usize) -> Status {
    let IncomingCall {
        method,
        metadata,
        mut inbound,
        outbound,
        cancel,
    } = incoming;

    let shape = route.descriptor.shape();
    tracing::debug!("Call {} started ({})", route.full_name, shape);

    let core = Arc::new(CallCore::new(method, outbound, cancel.clone()));

    let request = if shape.is_request_stream() {
        Request::Stream(RequestStream::new(inbound, cancel.clone()))
    } else {
        match read_request(&mut *inbound, &cancel, &route.full_name).await {
            Ok(message) => Request::Message(message),
            Err(e) => return finish(&core, Err(e), &route.full_name).await,
        }
    };

    let mut ctx = Context::new(
        route.descriptor.clone(),
        route.full_name.clone(),
        metadata,
        request,
        CallHandle::new(core.clone()),
    );

    let outcome = if shape.is_response_stream() {
        respond_stream(route, &core, &mut ctx, response_buffer).await
    } else {
        respond_value(route, &core, &mut ctx).await
    };

    drop(ctx);
    finish(&core, outcome, &route.full_name).await
}

/// Answer a call without running any middleware.
pub(crate) async fn reject(incoming: IncomingCall, status: Status) -> Status {
    let core = CallCore::new(incoming.method, incoming.outbound, incoming.cancel);
    match core.terminate(status.clone()).await {
        Ok(_) => status,
        Err(e) => {
            tracing::error!("Failed to reject {}: {}", core.method(), e);
            status
        }
    }
}

/// Read the single request message of a unary or response-streaming call.
async fn read_request(
    inbound: &mut dyn InboundHalf,
    cancel: &CancelSignal,
    full_name: &str,
) -> Result<crate::codec::Message> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GrpcwareError::Cancelled),
        received = inbound.recv() => {
            received?.ok_or_else(|| GrpcwareError::MissingRequest(full_name.to_string()))
        }
    }
}

/// Run the pipeline, racing it against cancellation.
fn run_pipeline<'a>(
    route: &'a Route,
    ctx: &'a mut Context,
    cancel: CancelSignal,
) -> BoxFuture<'a, Result<()>> {
    async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GrpcwareError::Cancelled),
            result = route.pipeline.run(ctx) => result,
        }
    }
    .boxed()
}

/// Unary and request-streaming calls: write the assigned value.
async fn respond_value(route: &Route, core: &CallCore, ctx: &mut Context) -> Result<()> {
    run_pipeline(route, ctx, core.cancel_signal().clone()).await?;

    let message = match ctx.take_response() {
        Response::Message(message) => message,
        _ => JsonCodec::empty(),
    };
    core.write_response(message).await
}

/// Response-streaming and duplex calls.
///
/// Sink writes are drained while the pipeline runs, so handlers writing more
/// than the buffer holds never stall. A stream assigned with
/// `set_res_stream` is drained after the sink completes.
async fn respond_stream(
    route: &Route,
    core: &Arc<CallCore>,
    ctx: &mut Context,
    response_buffer: usize,
) -> Result<()> {
    let (sink, sink_elements) = sink_channel(response_buffer, core.clone());
    ctx.attach_sink(sink);

    let mut sink_drain = drain(core, sink_elements).boxed();
    let mut drained = None;

    let result = {
        let mut pipeline = run_pipeline(route, ctx, core.cancel_signal().clone());
        loop {
            tokio::select! {
                result = &mut pipeline => break result,
                written = &mut sink_drain, if drained.is_none() => match written {
                    Ok(count) => drained = Some(count),
                    // Nothing more can be written; abandon the pipeline.
                    Err(e) => return Err(e),
                },
            }
        }
    };
    result?;

    // Release the context's own sink so the drain ends with the last clone.
    drop(ctx.take_sink());
    let mut written = match drained {
        Some(written) => written,
        None => sink_drain.await?,
    };

    if let Response::Stream(elements) = ctx.take_response() {
        written += drain(core, elements).await?;
    }

    tracing::debug!("Call {} streamed {} elements", route.full_name, written);
    Ok(())
}

/// Terminate the call according to the outcome.
async fn finish(core: &CallCore, outcome: Result<()>, full_name: &str) -> Status {
    let status = match outcome {
        Ok(()) => Status::ok(),
        Err(GrpcwareError::Cancelled) => {
            tracing::debug!("Call {} cancelled", full_name);
            // Marks the call terminated; nothing reaches the transport.
            let _ = core.terminate(Status::cancelled("Call cancelled")).await;
            return Status::cancelled("Call cancelled");
        }
        Err(e) => {
            tracing::warn!("Call {} failed: {}", full_name, e);
            e.to_status()
        }
    };

    if let Err(e) = core.terminate(status.clone()).await {
        tracing::error!("Failed to terminate {}: {}", full_name, e);
    }
    tracing::debug!("Call {} finished: {}", full_name, status);
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{endpoint, from_fn, Middleware, Pipeline};
    use crate::protocol::{CallShape, Metadata, MethodDescriptor, StatusCode};
    use crate::transport::memory;
    use futures::stream;
    use serde_json::json;

    fn route(shape: CallShape, stack: Vec<Arc<dyn Middleware>>) -> Route {
        Route {
            descriptor: Arc::new(MethodDescriptor::new("DoStuff", shape, "ArgRequest", "ArgReply")),
            full_name: "/test.Service/DoStuff".to_string(),
            pipeline: Pipeline::new(stack),
        }
    }

    #[tokio::test]
    async fn test_unary_reply() {
        let route = route(
            CallShape::Unary,
            vec![Arc::new(endpoint(|ctx| {
                Box::pin(async move {
                    let message = ctx.req().and_then(|r| r["message"].as_str()).unwrap_or("");
                    let reply = json!({ "message": message.to_uppercase() });
                    ctx.set_res(reply)
                })
            }))],
        );
        let (incoming, client) = memory::call("DoStuff", Metadata::new());
        client.send(json!({ "message": "1 foo" })).await.unwrap();

        let status = run_call(&route, incoming, 8).await;
        assert!(status.is_ok());

        let outcome = client.finish().await;
        assert_eq!(outcome.messages(), vec![&json!({ "message": "1 FOO" })]);
        assert!(outcome.headers_first());
        assert_eq!(outcome.header_count(), 1);
    }

    #[tokio::test]
    async fn test_unary_without_response_replies_empty() {
        let route = route(
            CallShape::Unary,
            vec![Arc::new(endpoint(|_ctx| Box::pin(async { Ok(()) })))],
        );
        let (incoming, client) = memory::call("DoStuff", Metadata::new());
        client.send(json!({})).await.unwrap();

        run_call(&route, incoming, 8).await;
        let outcome = client.finish().await;
        assert_eq!(outcome.messages(), vec![&json!({})]);
    }

    #[tokio::test]
    async fn test_missing_request_is_invalid_argument() {
        let route = route(
            CallShape::Unary,
            vec![Arc::new(endpoint(|_ctx| Box::pin(async { Ok(()) })))],
        );
        let (incoming, mut client) = memory::call("DoStuff", Metadata::new());
        client.close_send();

        let status = run_call(&route, incoming, 8).await;
        assert_eq!(status.code, StatusCode::InvalidArgument);

        let outcome = client.finish().await;
        assert!(outcome.messages().is_empty());
        assert_eq!(outcome.status().unwrap().code, StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_error_keeps_headers_and_trailers() {
        let route = route(
            CallShape::Unary,
            vec![Arc::new(endpoint(|ctx| {
                Box::pin(async move {
                    ctx.set("foo", "bar");
                    ctx.set_status("t", "1");
                    Err(GrpcwareError::from(Status::permission_denied("nope")))
                })
            }))],
        );
        let (incoming, client) = memory::call("DoStuff", Metadata::new());
        client.send(json!({})).await.unwrap();

        let status = run_call(&route, incoming, 8).await;
        assert_eq!(status.code, StatusCode::PermissionDenied);

        let outcome = client.finish().await;
        assert_eq!(outcome.headers().unwrap().get("foo"), Some("bar"));
        assert_eq!(outcome.trailers().unwrap().get("t"), Some("1"));
        assert_eq!(outcome.status().unwrap().message, "nope");
    }

    #[tokio::test]
    async fn test_stream_and_sink_both_drained() {
        let route = route(
            CallShape::ResponseStream,
            vec![Arc::new(from_fn(|ctx, _next| {
                Box::pin(async move {
                    ctx.res_sink()?.write(json!("from sink")).await?;
                    ctx.set_res_stream(stream::iter(vec![Ok(json!("from stream"))]))
                })
            }))],
        );
        let (incoming, client) = memory::call("DoStuff", Metadata::new());
        client.send(json!({})).await.unwrap();

        assert!(run_call(&route, incoming, 8).await.is_ok());
        let outcome = client.finish().await;
        assert_eq!(
            outcome.messages(),
            vec![&json!("from sink"), &json!("from stream")]
        );
    }

    #[tokio::test]
    async fn test_sink_larger_than_buffer() {
        let route = route(
            CallShape::ResponseStream,
            vec![Arc::new(endpoint(|ctx| {
                Box::pin(async move {
                    let sink = ctx.res_sink()?;
                    for i in 0..10 {
                        sink.write(json!(i)).await?;
                    }
                    Ok(())
                })
            }))],
        );
        let (incoming, mut client) = memory::call_with_capacity("DoStuff", Metadata::new(), 32);
        client.send(json!({})).await.unwrap();
        client.close_send();

        assert!(run_call(&route, incoming, 2).await.is_ok());
        let outcome = client.finish().await;
        assert_eq!(outcome.messages().len(), 10);
    }

    #[tokio::test]
    async fn test_reject_writes_status_only() {
        let (incoming, client) = memory::call("Nope", Metadata::new());

        let status = reject(incoming, Status::unimplemented("Method not found: Nope")).await;
        assert_eq!(status.code, StatusCode::Unimplemented);

        let outcome = client.finish().await;
        assert!(outcome.messages().is_empty());
        assert!(outcome.headers().unwrap().is_empty());
        assert_eq!(outcome.status().unwrap().code, StatusCode::Unimplemented);
    }

    #[tokio::test]
    async fn test_cancel_during_pipeline() {
        let route = route(
            CallShape::Unary,
            vec![Arc::new(endpoint(|_ctx| {
                Box::pin(futures::future::pending::<Result<()>>())
            }))],
        );
        let (incoming, mut client) = memory::call("DoStuff", Metadata::new());
        client.send(json!({})).await.unwrap();

        let canceller = incoming.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let status = run_call(&route, incoming, 8).await;
        assert_eq!(status.code, StatusCode::Cancelled);
        assert!(client.next_event().await.is_none());
    }
}
