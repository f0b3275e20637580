//! Call shapes and service descriptors.
//!
//! Descriptor loading (proto parsing, reflection) happens outside this crate.
//! The loader hands over a [`ServiceDescriptor`], either built in code or
//! deserialized from JSON:
//!
//! ```
//! use grpcware::protocol::{CallShape, ServiceDescriptor};
//!
//! let json = r#"{
//!     "name": "helloworld.Greeter",
//!     "methods": [
//!         { "name": "SayHello", "request_type": "HelloRequest", "response_type": "HelloReply" }
//!     ]
//! }"#;
//! let service: ServiceDescriptor = serde_json::from_str(json).unwrap();
//!
//! let method = service.resolve("sayHello").unwrap();
//! assert_eq!(method.shape(), CallShape::Unary);
//! assert_eq!(service.full_name(method), "/helloworld.Greeter/SayHello");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// The four gRPC call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallShape {
    /// One request value, one response value.
    Unary,
    /// One request value, a sequence of response elements.
    ResponseStream,
    /// A sequence of request elements, one response value.
    RequestStream,
    /// Independent request and response sequences.
    Duplex,
}

impl CallShape {
    /// Derive the shape from request/response cardinality.
    pub fn from_streaming(request_stream: bool, response_stream: bool) -> Self {
        match (request_stream, response_stream) {
            (false, false) => CallShape::Unary,
            (false, true) => CallShape::ResponseStream,
            (true, false) => CallShape::RequestStream,
            (true, true) => CallShape::Duplex,
        }
    }

    /// Whether the client sends a sequence of elements.
    #[inline]
    pub fn is_request_stream(self) -> bool {
        matches!(self, CallShape::RequestStream | CallShape::Duplex)
    }

    /// Whether the server replies with a sequence of elements.
    #[inline]
    pub fn is_response_stream(self) -> bool {
        matches!(self, CallShape::ResponseStream | CallShape::Duplex)
    }

    /// Lowercase name, as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ResponseStream => "response_stream",
            CallShape::RequestStream => "request_stream",
            CallShape::Duplex => "duplex",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of one RPC method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Method name as declared in the service (e.g. `SayHello`).
    pub name: String,
    /// Fully qualified request message type.
    pub request_type: String,
    /// Fully qualified response message type.
    pub response_type: String,
    /// Client sends a stream.
    #[serde(default)]
    pub request_stream: bool,
    /// Server replies with a stream.
    #[serde(default)]
    pub response_stream: bool,
}

impl MethodDescriptor {
    /// Create a descriptor for the given shape.
    pub fn new(
        name: impl Into<String>,
        shape: CallShape,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            request_type: request_type.into(),
            response_type: response_type.into(),
            request_stream: shape.is_request_stream(),
            response_stream: shape.is_response_stream(),
        }
    }

    /// Unary method descriptor.
    pub fn unary(
        name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self::new(name, CallShape::Unary, request_type, response_type)
    }

    /// Server-streaming method descriptor.
    pub fn response_stream(
        name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self::new(name, CallShape::ResponseStream, request_type, response_type)
    }

    /// Client-streaming method descriptor.
    pub fn request_stream(
        name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self::new(name, CallShape::RequestStream, request_type, response_type)
    }

    /// Bidirectional method descriptor.
    pub fn duplex(
        name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self::new(name, CallShape::Duplex, request_type, response_type)
    }

    /// Call shape of this method.
    #[inline]
    pub fn shape(&self) -> CallShape {
        CallShape::from_streaming(self.request_stream, self.response_stream)
    }

    /// Lower-camel alias of the method name (`SayHello` -> `sayHello`).
    pub fn camel_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.name == name || self.camel_name() == name
    }
}

/// Description of a service: its fully qualified name and its methods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Fully qualified service name (e.g. `helloworld.Greeter`).
    pub name: String,
    /// Methods in declaration order.
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Create an empty service descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method (builder style).
    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// Resolve a method by declared name, lower-camel alias or full path
    /// (`/package.Service/Method`).
    pub fn resolve(&self, name: &str) -> Option<&MethodDescriptor> {
        let name = match name.strip_prefix('/') {
            Some(path) => {
                let (service, method) = path.split_once('/')?;
                if service != self.name {
                    return None;
                }
                method
            }
            None => name,
        };

        self.methods.iter().find(|m| m.matches(name))
    }

    /// Full path of a method (`/package.Service/Method`).
    pub fn full_name(&self, method: &MethodDescriptor) -> String {
        format!("/{}/{}", self.name, method.name)
    }
}
