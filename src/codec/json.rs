//! Typed views over dynamic messages using `serde_json`.
//!
//! The transport owns wire (de)serialization and hands messages over as
//! [`Message`] values. [`JsonCodec`] converts between those values and the
//! handler's own `serde` types.
//!
//! # Example
//!
//! ```
//! use grpcware::codec::JsonCodec;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct HelloRequest {
//!     name: String,
//! }
//!
//! let msg = JsonCodec::encode(&HelloRequest { name: "Bob".into() }).unwrap();
//! assert_eq!(msg["name"], "Bob");
//!
//! let req: HelloRequest = JsonCodec::decode(msg).unwrap();
//! assert_eq!(req.name, "Bob");
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Message;
use crate::error::{GrpcwareError, Result};

/// Converts between [`Message`] values and typed `serde` structs.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a typed value into a message.
    ///
    /// # Errors
    ///
    /// Returns [`GrpcwareError::Json`] if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Message> {
        Ok(serde_json::to_value(value)?)
    }

    /// Decode a message into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`GrpcwareError::InvalidMessage`] if the message does not fit `T`.
    #[inline]
    pub fn decode<T: DeserializeOwned>(message: Message) -> Result<T> {
        serde_json::from_value(message).map_err(|e| GrpcwareError::InvalidMessage(e.to_string()))
    }

    /// Decode a borrowed message, cloning it first.
    pub fn decode_ref<T: DeserializeOwned>(message: &Message) -> Result<T> {
        Self::decode(message.clone())
    }

    /// The empty message (`{}`), the default value of any proto3 message.
    pub fn empty() -> Message {
        Message::Object(serde_json::Map::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct ArgRequest {
        message: String,
    }

    #[test]
    fn test_encode_struct_as_object() {
        let msg = JsonCodec::encode(&ArgRequest {
            message: "1 foo".to_string(),
        })
        .unwrap();

        assert_eq!(msg, json!({ "message": "1 foo" }));
    }

    #[test]
    fn test_decode_struct() {
        let req: ArgRequest = JsonCodec::decode(json!({ "message": "2 bar" })).unwrap();
        assert_eq!(req.message, "2 bar");
    }

    #[test]
    fn test_decode_mismatch_is_invalid_message() {
        let result: Result<ArgRequest> = JsonCodec::decode(json!({ "other": 1 }));
        assert!(matches!(result, Err(GrpcwareError::InvalidMessage(_))));
    }

    #[test]
    fn test_decode_ref_keeps_original() {
        let msg = json!({ "message": "3 asd" });
        let req: ArgRequest = JsonCodec::decode_ref(&msg).unwrap();
        assert_eq!(req.message, "3 asd");
        assert_eq!(msg["message"], "3 asd");
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(JsonCodec::empty(), json!({}));
    }
}
