//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use futures::stream::{self, StreamExt};
use grpcware::protocol::{Metadata, MethodDescriptor, ServiceDescriptor};
use grpcware::transport::memory::{self, ClientOutcome};
use grpcware::{App, AppBuilder, CallShape, GrpcwareError, Message};
use serde_json::json;

/// The six records every streaming scenario sends.
pub const RECORDS: [&str; 6] = ["1 foo", "2 bar", "3 asd", "4 qwe", "5 rty", "6 zxc"];

pub fn service() -> ServiceDescriptor {
    ServiceDescriptor::new("argservice.ArgService")
        .method(MethodDescriptor::unary("DoSomething", "ArgRequest", "ArgReply"))
        .method(MethodDescriptor::response_stream("ListStuff", "ArgRequest", "ArgReply"))
        .method(MethodDescriptor::request_stream("WriteStuff", "ArgRequest", "ArgReply"))
        .method(MethodDescriptor::duplex("ProcessStuff", "ArgRequest", "ArgReply"))
}

pub fn record(message: &str) -> Message {
    json!({ "message": message })
}

pub fn upper(message: &Message) -> Message {
    let text = message["message"].as_str().unwrap_or_default();
    record(&text.to_uppercase())
}

pub fn expected_upper() -> Vec<Message> {
    RECORDS.iter().map(|r| record(&r.to_uppercase())).collect()
}

/// Method exercising the given shape.
pub fn method_for(shape: CallShape) -> &'static str {
    match shape {
        CallShape::Unary => "DoSomething",
        CallShape::ResponseStream => "ListStuff",
        CallShape::RequestStream => "WriteStuff",
        CallShape::Duplex => "ProcessStuff",
    }
}

/// App with the standard handlers, after whatever `setup` registers.
pub fn app(setup: impl FnOnce(AppBuilder) -> AppBuilder) -> App {
    setup(App::builder(service()))
        .handle("DoSomething", |ctx| {
            Box::pin(async move {
                let request = ctx
                    .req()
                    .ok_or_else(|| GrpcwareError::handler("no request"))?;
                let reply = upper(request);
                ctx.set_res(reply)
            })
        })
        .handle("ListStuff", |ctx| {
            Box::pin(async move {
                let elements: Vec<_> = RECORDS.iter().map(|r| Ok(upper(&record(r)))).collect();
                ctx.set_res_stream(stream::iter(elements))
            })
        })
        .handle("WriteStuff", |ctx| {
            Box::pin(async move {
                let mut received = Vec::new();
                let requests = ctx.req_stream()?;
                while let Some(message) = requests.next().await {
                    received.push(message?["message"].as_str().unwrap_or_default().to_string());
                }
                ctx.set_res(record(&received.join(",")))
            })
        })
        .handle("ProcessStuff", |ctx| {
            Box::pin(async move {
                let sink = ctx.res_sink()?;
                let requests = ctx.req_stream()?;
                while let Some(message) = requests.next().await {
                    sink.write(upper(&message?)).await?;
                }
                Ok(())
            })
        })
        .build()
        .unwrap()
}

/// Run one call of the given shape with the standard request payload.
pub async fn run(app: &App, shape: CallShape) -> ClientOutcome {
    run_with(app, shape, Metadata::new()).await
}

/// Run one call of the given shape with request headers.
pub async fn run_with(app: &App, shape: CallShape, metadata: Metadata) -> ClientOutcome {
    let (incoming, client) = memory::call(method_for(shape), metadata);

    let server = app.clone();
    let task = tokio::spawn(async move { server.dispatch(incoming).await });

    if shape.is_request_stream() {
        for r in RECORDS {
            client.send(record(r)).await.unwrap();
        }
    } else {
        client.send(record(RECORDS[0])).await.unwrap();
    }

    let outcome = client.finish().await;
    task.await.unwrap();
    outcome
}

/// Owned copies of the received messages.
pub fn messages(outcome: &ClientOutcome) -> Vec<Message> {
    outcome.messages().into_iter().cloned().collect()
}
