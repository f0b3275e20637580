//! Error types for grpcware.

use thiserror::Error;

use crate::protocol::{CallShape, Status, StatusCode};

/// Main error type for all grpcware operations.
#[derive(Debug, Error)]
pub enum GrpcwareError {
    /// JSON serialization error while encoding a typed response.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An inbound message did not match the expected type.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Explicit RPC status raised by middleware.
    #[error("{0}")]
    Status(Status),

    /// Free-form middleware failure.
    #[error("Handler error: {0}")]
    Handler(String),

    /// No route for the given method name.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// A unary or response-streaming call ended before its request message arrived.
    #[error("Request message missing for {0}")]
    MissingRequest(String),

    /// Operation not available for the call shape.
    #[error("Operation {operation} not supported for {shape} calls")]
    InvalidShape {
        /// Name of the attempted operation.
        operation: &'static str,
        /// Shape of the call.
        shape: CallShape,
    },

    /// The client cancelled the call or the transport reported it closed.
    #[error("Call cancelled")]
    Cancelled,

    /// The transport rejected a write.
    #[error("Transport closed")]
    TransportClosed,

    /// Write attempted after the response was ended.
    #[error("Response already ended")]
    ResponseClosed,

    /// Non-blocking write refused because the response buffer is full.
    #[error("Response buffer full")]
    Backpressure,
}

impl GrpcwareError {
    /// Create a free-form handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        GrpcwareError::Handler(message.into())
    }

    /// Derive the terminal status sent to the client for this error.
    pub fn to_status(&self) -> Status {
        match self {
            GrpcwareError::Status(status) => status.clone(),
            GrpcwareError::Handler(msg) => Status::unknown(msg.clone()),
            GrpcwareError::MethodNotFound(_) => {
                Status::new(StatusCode::Unimplemented, self.to_string())
            }
            GrpcwareError::MissingRequest(_) | GrpcwareError::InvalidMessage(_) => {
                Status::new(StatusCode::InvalidArgument, self.to_string())
            }
            GrpcwareError::Cancelled => Status::cancelled(self.to_string()),
            GrpcwareError::TransportClosed => Status::unavailable(self.to_string()),
            GrpcwareError::Backpressure => Status::resource_exhausted(self.to_string()),
            GrpcwareError::Json(_)
            | GrpcwareError::InvalidShape { .. }
            | GrpcwareError::ResponseClosed => Status::internal(self.to_string()),
        }
    }
}

impl From<Status> for GrpcwareError {
    fn from(status: Status) -> Self {
        GrpcwareError::Status(status)
    }
}

/// Result type alias using GrpcwareError.
pub type Result<T> = std::result::Result<T, GrpcwareError>;
