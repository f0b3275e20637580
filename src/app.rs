//! App builder and serving loop.
//!
//! The [`AppBuilder`] provides a fluent API for registering middleware and
//! handlers against a service descriptor. The resulting [`App`] is the
//! immutable, shareable dispatcher:
//! 1. Resolve the method of each incoming call
//! 2. Enforce the concurrency limit
//! 3. Run the call through its pipeline on its own task
//!
//! # Example
//!
//! ```ignore
//! use grpcware::{App, protocol::{MethodDescriptor, ServiceDescriptor}};
//! use serde_json::json;
//!
//! let service = ServiceDescriptor::new("helloworld.Greeter")
//!     .method(MethodDescriptor::unary("SayHello", "HelloRequest", "HelloReply"));
//!
//! let app = App::builder(service)
//!     .use_fn(|ctx, next| Box::pin(async move {
//!         ctx.set("x-served-by", "grpcware");
//!         next.run(ctx).await
//!     }))
//!     .handle("sayHello", |ctx| Box::pin(async move {
//!         let name = ctx.req().and_then(|r| r["name"].as_str()).unwrap_or("world").to_string();
//!         ctx.set_res(json!({ "message": format!("Hello {}", name) }))
//!     }))
//!     .build()?;
//!
//! app.serve(transport_calls).await;
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::adapter;
use crate::bridge::DEFAULT_RESPONSE_BUFFER;
use crate::error::{GrpcwareError, Result};
use crate::handler::{endpoint, from_fn, Context, HandlerRegistry, Middleware, Next, RouteTable};
use crate::protocol::{ServiceDescriptor, Status};
use crate::transport::IncomingCall;

/// Default maximum number of calls in flight.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 256;

/// Runtime configuration of an [`App`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Calls above this limit are refused with `RESOURCE_EXHAUSTED`.
    pub max_concurrent_calls: usize,
    /// Buffer between [`ResponseSink`](crate::ResponseSink) writers and the transport.
    pub response_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            response_buffer: DEFAULT_RESPONSE_BUFFER,
        }
    }
}

/// Builder for configuring and creating an [`App`].
pub struct AppBuilder {
    registry: HandlerRegistry,
    config: AppConfig,
    /// First registration error, reported by `build`.
    error: Option<GrpcwareError>,
}

impl AppBuilder {
    /// Create a builder for a service.
    pub fn new(service: ServiceDescriptor) -> Self {
        Self {
            registry: HandlerRegistry::new(service),
            config: AppConfig::default(),
            error: None,
        }
    }

    /// Add middleware that runs for every method, in registration order.
    pub fn use_middleware(mut self, middleware: impl Middleware) -> Self {
        self.registry.add_global(Arc::new(middleware));
        self
    }

    /// Add a closure as global middleware.
    pub fn use_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.use_middleware(from_fn(f))
    }

    /// Add middleware for one method.
    ///
    /// Runs after every global middleware. An unknown method makes
    /// [`build`](Self::build) fail.
    pub fn method_middleware(mut self, method: &str, middleware: impl Middleware) -> Self {
        if let Err(e) = self.registry.add(method, Arc::new(middleware)) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Add a closure as middleware for one method.
    pub fn method_fn<F>(self, method: &str, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.method_middleware(method, from_fn(f))
    }

    /// Register the handler of a method.
    ///
    /// The handler is terminal: middleware added after it for the same
    /// method never runs.
    pub fn handle<F>(self, method: &str, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.method_middleware(method, endpoint(handler))
    }

    /// Set the maximum number of calls in flight.
    ///
    /// Default: 256
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.config.max_concurrent_calls = limit;
        self
    }

    /// Set the response buffer of streaming calls.
    ///
    /// Default: 64
    pub fn response_buffer(mut self, capacity: usize) -> Self {
        self.config.response_buffer = capacity;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Freeze the registrations into an [`App`].
    pub fn build(self) -> Result<App> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let routes = self.registry.build();
        tracing::debug!(
            "Built {} with {} routed methods",
            routes.service().name,
            routes.len()
        );

        Ok(App {
            inner: Arc::new(AppInner {
                routes,
                permits: Arc::new(Semaphore::new(self.config.max_concurrent_calls)),
                config: self.config,
            }),
        })
    }
}

/// Counters returned by [`App::serve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    /// Calls run through their pipeline (or answered `UNIMPLEMENTED`).
    pub accepted: usize,
    /// Calls refused because the concurrency limit was reached.
    pub refused: usize,
}

struct AppInner {
    routes: RouteTable,
    permits: Arc<Semaphore>,
    config: AppConfig,
}

/// Immutable dispatcher shared by every call.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    /// Create a new app builder.
    pub fn builder(service: ServiceDescriptor) -> AppBuilder {
        AppBuilder::new(service)
    }

    /// The served service.
    pub fn service(&self) -> &ServiceDescriptor {
        self.inner.routes.service()
    }

    /// The active configuration.
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Calls that can still start before the limit is reached.
    pub fn available_permits(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Run one call to completion on the current task.
    ///
    /// Returns the status the call ended with.
    pub async fn dispatch(&self, incoming: IncomingCall) -> Status {
        match self.try_permit() {
            Some(permit) => self.run(incoming, permit).await,
            None => self.refuse(incoming).await,
        }
    }

    /// Serve every call of a stream, each on its own task.
    ///
    /// Returns once the stream ends and every accepted call has finished.
    pub async fn serve<S>(&self, calls: S) -> ServeStats
    where
        S: Stream<Item = IncomingCall>,
    {
        let mut calls = std::pin::pin!(calls);
        let mut tasks = JoinSet::new();
        let mut stats = ServeStats::default();

        loop {
            tokio::select! {
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Call task failed: {}", e);
                    }
                }
                next = calls.next() => {
                    let Some(incoming) = next else { break };
                    let app = self.clone();
                    match self.try_permit() {
                        Some(permit) => {
                            stats.accepted += 1;
                            tasks.spawn(async move { app.run(incoming, permit).await });
                        }
                        None => {
                            stats.refused += 1;
                            tasks.spawn(async move { app.refuse(incoming).await });
                        }
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Call task failed: {}", e);
            }
        }
        stats
    }

    fn try_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.inner.permits.clone().try_acquire_owned().ok()
    }

    async fn run(&self, incoming: IncomingCall, permit: OwnedSemaphorePermit) -> Status {
        // Permit is held until the call terminates
        let _permit = permit;

        let route = match self.inner.routes.lookup(&incoming.method) {
            Some(route) => route.clone(),
            None => {
                let err = GrpcwareError::MethodNotFound(incoming.method.clone());
                tracing::warn!("{}", err);
                return adapter::reject(incoming, err.to_status()).await;
            }
        };

        adapter::run_call(&route, incoming, self.inner.config.response_buffer).await
    }

    async fn refuse(&self, incoming: IncomingCall) -> Status {
        tracing::warn!(
            "Call capacity reached ({}), refusing {}",
            self.inner.config.max_concurrent_calls,
            incoming.method
        );
        adapter::reject(
            incoming,
            Status::resource_exhausted("Too many concurrent calls"),
        )
        .await
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("service", &self.service().name)
            .field("routes", &self.inner.routes.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
