//! Middleware trait and onion composition.
//!
//! A [`Pipeline`] is an ordered, immutable stack of middleware. Running it
//! calls the first middleware with a [`Next`] continuation over the rest of
//! the stack; each middleware decides whether (and when) to delegate:
//!
//! ```text
//! ─► mw1 before ─► mw2 before ─► handler ─┐
//! ◄─ mw1 after  ◄─ mw2 after  ◄──────────┘
//! ```
//!
//! Not calling `next` short-circuits everything below. Returning `Err`
//! unwinds through the middleware above, which may inspect or replace it.
//!
//! # Example
//!
//! ```ignore
//! use grpcware::handler::from_fn;
//!
//! let timing = from_fn(|ctx, next| {
//!     Box::pin(async move {
//!         let start = std::time::Instant::now();
//!         next.run(ctx).await?;
//!         ctx.set_status("elapsed-ms", start.elapsed().as_millis().to_string());
//!         Ok(())
//!     })
//! });
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;

use super::Context;
use crate::error::Result;

/// One layer of the pipeline.
pub trait Middleware: Send + Sync + 'static {
    /// Handle the call, delegating to `next` to run the rest of the stack.
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>>;
}

/// Continuation over the remaining middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Run the rest of the stack. Resolves immediately at the bottom.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b, Result<()>>
    where
        'a: 'b,
    {
        match self.rest.split_first() {
            Some((head, rest)) => head.call(ctx, Next { rest }),
            None => Box::pin(async { Ok(()) }),
        }
    }

    /// Number of middleware left below this point.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.rest.len())
            .finish()
    }
}

/// Middleware built from a closure. See [`from_fn`].
pub struct FromFn<F> {
    f: F,
}

/// Wrap a closure as middleware.
///
/// The closure must return a boxed future borrowing the context:
/// `|ctx, next| Box::pin(async move { ... })`.
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    FromFn { f }
}

impl<F> Middleware for FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        (self.f)(ctx, next)
    }
}

/// Terminal middleware: a handler that never delegates.
pub struct Endpoint<F> {
    f: F,
}

/// Wrap a handler closure as terminal middleware.
pub fn endpoint<F>(f: F) -> Endpoint<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Endpoint { f }
}

impl<F> Middleware for Endpoint<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        (self.f)(ctx)
    }
}

/// Composed middleware stack for one method.
///
/// Immutable once built and cheap to clone; every concurrent call to the
/// method runs the same stack.
#[derive(Clone)]
pub struct Pipeline {
    stack: Arc<[Arc<dyn Middleware>]>,
}

impl Pipeline {
    /// Compose middleware in execution order (outermost first).
    pub fn new(stack: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            stack: stack.into(),
        }
    }

    /// Run the whole stack against a call context.
    pub fn run<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Next { rest: &self.stack }.run(ctx)
    }

    /// Number of middleware in the stack.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("len", &self.stack.len())
            .finish()
    }
}
