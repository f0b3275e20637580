//! Protocol module - call shapes, descriptors, status and metadata types.
//!
//! These are the plain data types shared by every other module:
//! - [`CallShape`], [`MethodDescriptor`], [`ServiceDescriptor`]
//! - [`Status`] and [`StatusCode`]
//! - [`Metadata`] and [`MetadataArg`]

mod metadata;
mod shape;
mod status;

pub use metadata::{Metadata, MetadataArg};
pub use shape::{CallShape, MethodDescriptor, ServiceDescriptor};
pub use status::{Status, StatusCode};
