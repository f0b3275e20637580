//! Handler module - per-call context and middleware composition.
//!
//! Provides:
//! - [`Context`] - shape-aware view of one call handed to every middleware
//! - [`Middleware`] / [`Next`] / [`Pipeline`] - onion composition
//! - [`HandlerRegistry`] / [`RouteTable`] - registration and the frozen route table
//!
//! # Example
//!
//! ```ignore
//! use grpcware::handler::{endpoint, from_fn, HandlerRegistry};
//!
//! let mut registry = HandlerRegistry::new(service);
//!
//! // Runs for every method
//! registry.add_global(Arc::new(from_fn(|ctx, next| Box::pin(async move {
//!     ctx.set("x-served-by", "grpcware");
//!     next.run(ctx).await
//! }))));
//!
//! // Per-method handler
//! registry.add("SayHello", Arc::new(endpoint(|ctx| Box::pin(async move {
//!     let name = ctx.req().and_then(|r| r["name"].as_str()).unwrap_or("world").to_string();
//!     ctx.set_res(json!({ "message": format!("Hello {}", name) }))
//! }))))?;
//! ```

pub(crate) mod context;
mod middleware;
mod registry;

pub use context::Context;
pub use middleware::{endpoint, from_fn, Endpoint, FromFn, Middleware, Next, Pipeline};
pub use registry::{HandlerRegistry, Route, RouteTable};

pub(crate) use context::{Request, Response};
