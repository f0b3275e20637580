//! Metadata ledger: header and trailer state for one call.
//!
//! The ledger is a pure state machine. It never touches the transport; the
//! call core asks it what to write and when, which keeps the override rules
//! testable on their own.
//!
//! # Headers
//!
//! - [`set`](MetadataLedger::set) merges into the pending headers until they are sent.
//! - [`take_headers`](MetadataLedger::take_headers) with no mapping sends the pending
//!   headers; with a non-empty mapping it replaces them first; with an invalid
//!   argument it does nothing at all.
//! - [`flush_headers`](MetadataLedger::flush_headers) is the automatic flush before the
//!   first response value.
//! - Once sent, every header mutation is ignored.
//!
//! # Trailers
//!
//! Resolved exactly once at termination:
//! explicit end-of-call payload > [`set_status`](MetadataLedger::set_status) entries > empty.

use crate::protocol::{Metadata, MetadataArg};

/// Header and trailer state of a single call.
#[derive(Debug, Default)]
pub struct MetadataLedger {
    pending_headers: Metadata,
    headers_sent: bool,
    pending_trailers: Metadata,
    final_trailers: Option<Metadata>,
    trailers_resolved: bool,
}

impl MetadataLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a header into the pending headers.
    ///
    /// Returns `false` (and changes nothing) once headers are sent.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        if self.headers_sent {
            return false;
        }
        self.pending_headers.insert(key, value);
        true
    }

    /// Headers accumulated so far and not yet sent.
    pub fn pending_headers(&self) -> &Metadata {
        &self.pending_headers
    }

    /// Whether headers have been written to the transport.
    #[inline]
    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Claim the headers for an explicit send.
    ///
    /// Returns the headers the caller must write, marking them sent, or
    /// `None` when nothing must be written: headers already sent, or `arg` is
    /// not a mapping.
    pub fn take_headers(&mut self, arg: MetadataArg) -> Option<Metadata> {
        if self.headers_sent || arg.is_invalid() {
            return None;
        }

        if let Some(replacement) = arg.into_non_empty() {
            self.pending_headers = replacement;
        }

        self.headers_sent = true;
        Some(std::mem::take(&mut self.pending_headers))
    }

    /// Claim the pending headers at the auto-flush point.
    #[inline]
    pub fn flush_headers(&mut self) -> Option<Metadata> {
        self.take_headers(MetadataArg::Absent)
    }

    /// Merge a trailer entry. Ignored once trailers are resolved.
    pub fn set_status(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        if self.trailers_resolved {
            return false;
        }
        self.pending_trailers.insert(key, value);
        true
    }

    /// Trailers accumulated via [`set_status`](Self::set_status).
    pub fn pending_trailers(&self) -> &Metadata {
        &self.pending_trailers
    }

    /// Record an explicit end-of-call trailer payload.
    ///
    /// Only a non-empty mapping is recorded; anything else leaves the
    /// ledger untouched. Returns whether the payload was recorded.
    pub fn set_final_trailers(&mut self, arg: MetadataArg) -> bool {
        if self.trailers_resolved {
            return false;
        }
        match arg.into_non_empty() {
            Some(md) => {
                self.final_trailers = Some(md);
                true
            }
            None => false,
        }
    }

    /// Explicit trailer payload, if one was recorded.
    pub fn final_trailers(&self) -> Option<&Metadata> {
        self.final_trailers.as_ref()
    }

    /// Resolve the trailers to send with the terminal status.
    ///
    /// Returns `None` on every call after the first.
    pub fn resolve_trailers(&mut self) -> Option<Metadata> {
        if self.trailers_resolved {
            return None;
        }
        self.trailers_resolved = true;

        let pending = std::mem::take(&mut self.pending_trailers);
        Some(self.final_trailers.take().unwrap_or(pending))
    }

    /// Whether trailers have been resolved.
    #[inline]
    pub fn trailers_resolved(&self) -> bool {
        self.trailers_resolved
    }
}
