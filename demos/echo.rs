//! Echo - unary calls through a middleware pipeline.
//!
//! This example demonstrates:
//! - Registering a global middleware with `use_fn`
//! - A unary handler with typed request/response views
//! - Headers set with `ctx.set` and trailers set with `ctx.set_status`
//!
//! The client side is played by the in-memory transport.

use std::time::Instant;

use grpcware::protocol::{Metadata, MethodDescriptor, ServiceDescriptor};
use grpcware::transport::memory;
use grpcware::App;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Deserialize, Debug)]
struct HelloRequest {
    name: String,
}

#[derive(Serialize, Debug)]
struct HelloReply {
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service = ServiceDescriptor::new("helloworld.Greeter")
        .method(MethodDescriptor::unary("SayHello", "HelloRequest", "HelloReply"));

    let app = App::builder(service)
        .use_fn(|ctx, next| {
            Box::pin(async move {
                let start = Instant::now();
                ctx.set("x-served-by", "grpcware");
                next.run(ctx).await?;
                ctx.set_status("elapsed-us", start.elapsed().as_micros().to_string());
                Ok(())
            })
        })
        .handle("sayHello", |ctx| {
            Box::pin(async move {
                let request: HelloRequest = ctx.req_as()?;
                ctx.set_res_as(&HelloReply {
                    message: format!("Hello {}", request.name),
                })
            })
        })
        .build()?;

    for name in ["Bob", "Alice"] {
        let (incoming, client) = memory::call("/helloworld.Greeter/SayHello", Metadata::new());
        client.send(json!({ "name": name })).await?;

        let status = app.dispatch(incoming).await;
        let outcome = client.finish().await;

        println!("status:   {}", status);
        println!("headers:  {:?}", outcome.headers());
        println!("reply:    {:?}", outcome.messages());
        println!("trailers: {:?}", outcome.trailers());
    }

    Ok(())
}
