//! Codec module - the dynamic message type and typed views over it.
//!
//! - [`Message`] - a decoded message as handed over by the transport
//! - [`JsonCodec`] - conversion between messages and `serde` types
//!
//! # Example
//!
//! ```
//! use grpcware::codec::{JsonCodec, Message};
//!
//! let msg: Message = JsonCodec::encode(&vec![1, 2, 3]).unwrap();
//! let back: Vec<i32> = JsonCodec::decode(msg).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

mod json;

pub use json::JsonCodec;

/// A decoded request or response message.
pub type Message = serde_json::Value;
