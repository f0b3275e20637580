//! Middleware registration and the immutable route table.
//!
//! Middleware is registered globally (runs for every method) or per method.
//! [`HandlerRegistry::build`] folds both lists into one [`Pipeline`] per
//! method and freezes the result into a [`RouteTable`]:
//!
//! ```text
//! pipeline(method) = global[0..] ++ per_method(method)[0..]
//! ```
//!
//! Only methods with at least one per-method entry get a route; calls to
//! the others are answered with `UNIMPLEMENTED`.
//!
//! # Example
//!
//! ```ignore
//! use grpcware::handler::{endpoint, HandlerRegistry};
//!
//! let mut registry = HandlerRegistry::new(service);
//! registry.add_global(Arc::new(logger));
//! registry.add("SayHello", Arc::new(endpoint(|ctx| Box::pin(async move {
//!     ctx.set_res(json!({ "message": "Hello" }))
//! }))))?;
//!
//! let routes = registry.build();
//! assert!(routes.lookup("/helloworld.Greeter/SayHello").is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use super::{Middleware, Pipeline};
use crate::error::{GrpcwareError, Result};
use crate::protocol::{MethodDescriptor, ServiceDescriptor};

/// Resolved route for one method.
#[derive(Debug, Clone)]
pub struct Route {
    /// Method descriptor.
    pub descriptor: Arc<MethodDescriptor>,
    /// Full method path (`/package.Service/Method`).
    pub full_name: String,
    /// Composed middleware stack.
    pub pipeline: Pipeline,
}

/// Mutable registration state, consumed by [`build`](Self::build).
pub struct HandlerRegistry {
    service: ServiceDescriptor,
    global: Vec<Arc<dyn Middleware>>,
    /// Per-method middleware keyed by declared method name.
    methods: HashMap<String, Vec<Arc<dyn Middleware>>>,
}

impl HandlerRegistry {
    /// Create an empty registry for a service.
    pub fn new(service: ServiceDescriptor) -> Self {
        Self {
            service,
            global: Vec::new(),
            methods: HashMap::new(),
        }
    }

    /// The service being registered.
    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    /// Append middleware that runs for every method.
    pub fn add_global(&mut self, middleware: Arc<dyn Middleware>) {
        self.global.push(middleware);
    }

    /// Append middleware for one method.
    ///
    /// `method` may be the declared name, its lower-camel alias or the full
    /// path. Fails with `MethodNotFound` if the service has no such method.
    pub fn add(&mut self, method: &str, middleware: Arc<dyn Middleware>) -> Result<()> {
        let descriptor = self
            .service
            .resolve(method)
            .ok_or_else(|| GrpcwareError::MethodNotFound(method.to_string()))?;

        self.methods
            .entry(descriptor.name.clone())
            .or_default()
            .push(middleware);
        Ok(())
    }

    /// Number of global middleware.
    pub fn global_len(&self) -> usize {
        self.global.len()
    }

    /// Whether a method has any per-method middleware.
    pub fn is_registered(&self, method: &str) -> bool {
        self.service
            .resolve(method)
            .is_some_and(|d| self.methods.contains_key(&d.name))
    }

    /// Compose every registered method into its pipeline.
    pub fn build(self) -> RouteTable {
        let mut routes = HashMap::with_capacity(self.methods.len());

        for descriptor in &self.service.methods {
            let Some(own) = self.methods.get(&descriptor.name) else {
                continue;
            };

            let stack: Vec<_> = self.global.iter().chain(own.iter()).cloned().collect();
            let route = Route {
                descriptor: Arc::new(descriptor.clone()),
                full_name: self.service.full_name(descriptor),
                pipeline: Pipeline::new(stack),
            };
            routes.insert(descriptor.name.clone(), Arc::new(route));
        }

        RouteTable {
            service: self.service,
            routes,
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("service", &self.service.name)
            .field("global", &self.global.len())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Immutable method → pipeline table, shared by every call.
#[derive(Debug)]
pub struct RouteTable {
    service: ServiceDescriptor,
    routes: HashMap<String, Arc<Route>>,
}

impl RouteTable {
    /// Find the route for a method name, alias or full path.
    pub fn lookup(&self, method: &str) -> Option<&Arc<Route>> {
        let descriptor = self.service.resolve(method)?;
        self.routes.get(&descriptor.name)
    }

    /// The service this table serves.
    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    /// Number of routed methods.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no method is routed.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{endpoint, from_fn};
    use crate::protocol::CallShape;

    fn greeter() -> ServiceDescriptor {
        ServiceDescriptor::new("helloworld.Greeter")
            .method(MethodDescriptor::unary("SayHello", "HelloRequest", "HelloReply"))
            .method(MethodDescriptor::duplex("ProcessStuff", "ArgRequest", "ArgReply"))
            .method(MethodDescriptor::unary("Unused", "HelloRequest", "HelloReply"))
    }

    fn noop() -> Arc<dyn Middleware> {
        Arc::new(endpoint(|_ctx| Box::pin(async { Ok(()) })))
    }

    fn pass() -> Arc<dyn Middleware> {
        Arc::new(from_fn(|ctx, next| next.run(ctx)))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new(greeter());
        registry.add("SayHello", noop()).unwrap();
        registry.add("processStuff", noop()).unwrap();

        let routes = registry.build();
        assert_eq!(routes.len(), 2);

        let route = routes.lookup("sayHello").unwrap();
        assert_eq!(route.descriptor.name, "SayHello");
        assert_eq!(route.full_name, "/helloworld.Greeter/SayHello");
        assert!(routes.lookup("/helloworld.Greeter/SayHello").is_some());

        let route = routes.lookup("ProcessStuff").unwrap();
        assert_eq!(route.descriptor.shape(), CallShape::Duplex);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let mut registry = HandlerRegistry::new(greeter());
        let result = registry.add("Missing", noop());
        assert!(matches!(result, Err(GrpcwareError::MethodNotFound(name)) if name == "Missing"));
    }

    #[test]
    fn test_unregistered_method_has_no_route() {
        let mut registry = HandlerRegistry::new(greeter());
        registry.add_global(pass());
        registry.add("SayHello", noop()).unwrap();
        assert!(registry.is_registered("sayHello"));
        assert!(!registry.is_registered("Unused"));

        let routes = registry.build();
        assert!(routes.lookup("Unused").is_none());
        assert!(routes.lookup("Missing").is_none());
        assert!(routes.lookup("/other.Service/SayHello").is_none());
    }

    #[test]
    fn test_global_middleware_prepended() {
        let mut registry = HandlerRegistry::new(greeter());
        registry.add_global(pass());
        registry.add_global(pass());
        registry.add("SayHello", pass()).unwrap();
        registry.add("SayHello", noop()).unwrap();
        registry.add("ProcessStuff", noop()).unwrap();
        assert_eq!(registry.global_len(), 2);

        let routes = registry.build();
        assert_eq!(routes.lookup("SayHello").unwrap().pipeline.len(), 4);
        assert_eq!(routes.lookup("ProcessStuff").unwrap().pipeline.len(), 3);
    }
}
