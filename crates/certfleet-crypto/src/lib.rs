//! Cryptographic primitives for the certfleet CA.
//!
//! Key generation, passphrase-based encryption at rest, and the sealed
//! export container handed to enrolled hosts.

pub mod bundle;
pub mod keys;

pub use keys::CryptoError;
