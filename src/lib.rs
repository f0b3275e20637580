//! # grpcware
//!
//! Middleware adapter layer between gRPC handler functions and a gRPC
//! transport.
//!
//! Unary, response-streaming, request-streaming and duplex calls all run
//! through one composable middleware pipeline and one [`Context`], which
//! exposes request data, response data and header/trailer metadata the same
//! way for every shape.
//!
//! ## Architecture
//!
//! - **Call adapter**: resolves the call shape, builds the context, runs the
//!   pipeline and terminates the call exactly once
//! - **Metadata ledger**: header and trailer override rules as a pure state machine
//! - **Stream bridge**: pausable request streams, backpressured response streams
//! - **Transport boundary**: [`transport::InboundHalf`] / [`transport::OutboundHalf`]
//!
//! Wire framing, HTTP/2, TLS and message (de)serialization stay with the
//! transport.
//!
//! ## Example
//!
//! ```ignore
//! use grpcware::protocol::{MethodDescriptor, ServiceDescriptor};
//! use grpcware::App;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> grpcware::Result<()> {
//!     let service = ServiceDescriptor::new("helloworld.Greeter")
//!         .method(MethodDescriptor::unary("SayHello", "HelloRequest", "HelloReply"));
//!
//!     let app = App::builder(service)
//!         .handle("sayHello", |ctx| Box::pin(async move {
//!             ctx.set("x-greeting", "1");
//!             ctx.set_res(json!({ "message": "Hello" }))
//!         }))
//!         .build()?;
//!
//!     app.serve(transport_calls()).await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod codec;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod protocol;
pub mod transport;

mod adapter;
mod app;
mod backpressure;
mod call;

pub use app::{App, AppBuilder, AppConfig, ServeStats, DEFAULT_MAX_CONCURRENT_CALLS};
pub use backpressure::FlowControl;
pub use bridge::{RequestStream, ResponseSink, DEFAULT_RESPONSE_BUFFER};
pub use call::CallHandle;
pub use codec::{JsonCodec, Message};
pub use error::{GrpcwareError, Result};
pub use handler::{Context, Middleware, Next, Pipeline};
pub use protocol::{CallShape, Metadata, MetadataArg, Status, StatusCode};
