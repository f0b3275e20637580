//! Duplex - bidirectional streaming with inbound flow control.
//!
//! This example demonstrates:
//! - Reading the request stream and writing through a `ResponseSink`
//! - Pausing intake while a spawned task does slow per-element work
//! - Resuming from that task once the reply is written

use std::time::Duration;

use futures::StreamExt;
use grpcware::protocol::{Metadata, MethodDescriptor, ServiceDescriptor};
use grpcware::transport::memory;
use grpcware::App;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service = ServiceDescriptor::new("argservice.ArgService")
        .method(MethodDescriptor::duplex("ProcessStuff", "ArgRequest", "ArgReply"));

    let app = App::builder(service)
        .handle("processStuff", |ctx| {
            Box::pin(async move {
                let sink = ctx.res_sink()?;
                let requests = ctx.req_stream()?;

                while let Some(message) = requests.next().await {
                    let message = message?;
                    requests.pause();

                    let flow = requests.flow();
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(25)).await;
                        let text = message["message"].as_str().unwrap_or_default();
                        let written = sink.write(json!({ "message": text.to_uppercase() })).await;
                        flow.resume();
                        written
                    });
                }
                Ok(())
            })
        })
        .build()?;

    let (incoming, client) = memory::call("ProcessStuff", Metadata::new());
    let server = tokio::spawn(async move { app.dispatch(incoming).await });

    for message in ["1 foo", "2 bar", "3 asd", "4 qwe", "5 rty", "6 zxc"] {
        client.send(json!({ "message": message })).await?;
        println!("sent {} (intake paused: {})", message, client.is_paused());
    }

    let outcome = client.finish().await;
    for reply in outcome.messages() {
        println!("reply: {}", reply);
    }
    println!("status: {}", server.await?);
    Ok(())
}
