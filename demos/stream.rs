//! Stream - response-streaming call.
//!
//! This example demonstrates:
//! - Assigning a lazy response sequence with `ctx.set_res_stream`
//! - Explicit end-of-call trailers through the raw call handle
//! - Reading the stream element by element on the client side

use std::time::Duration;

use futures::stream::{self, StreamExt};
use grpcware::protocol::{Metadata, MethodDescriptor, ServiceDescriptor};
use grpcware::transport::memory::{self, CallEvent};
use grpcware::App;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service = ServiceDescriptor::new("generator.Generator")
        .method(MethodDescriptor::response_stream("Generate", "GenerateRequest", "Chunk"));

    let app = App::builder(service)
        .handle("generate", |ctx| {
            Box::pin(async move {
                let count = ctx
                    .req()
                    .and_then(|r| r["count"].as_u64())
                    .unwrap_or(3);

                ctx.set_status("generated", count.to_string());
                let call = ctx.call().clone();

                let chunks = stream::iter(0..count)
                    .then(|index| async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(json!({ "index": index, "data": format!("chunk-{}", index) }))
                    })
                    .chain(stream::once(async move {
                        // Replaces the trailers set above.
                        call.end(json!({ "complete": "true" }));
                        Ok(json!({ "index": count, "data": "last" }))
                    }));

                ctx.set_res_stream(chunks)
            })
        })
        .build()?;

    let (incoming, mut client) = memory::call("Generate", Metadata::new());
    client.send(json!({ "count": 5 })).await?;
    client.close_send();

    let server = tokio::spawn(async move { app.dispatch(incoming).await });

    while let Some(event) = client.next_event().await {
        match event {
            CallEvent::Headers(headers) => println!("headers: {:?}", headers),
            CallEvent::Message(chunk) => println!("chunk:   {}", chunk),
            CallEvent::Status { status, trailers } => {
                println!("status:  {} {:?}", status, trailers);
                break;
            }
        }
    }

    server.await?;
    Ok(())
}
