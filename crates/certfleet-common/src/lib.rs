//! Shared building blocks for the certfleet workspace.
//!
//! Holds the wire-level error codes, the bounded/unbounded polling
//! primitives used by the enrollment orchestrator, and small encoding
//! helpers. No domain logic lives here.

pub mod encoding;
pub mod error;
pub mod retry;
