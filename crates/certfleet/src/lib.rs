//! Certfleet: private CA custody and fleet enrollment orchestration.
//!
//! Automates a one-shot private Certificate Authority (4096-bit RSA,
//! envelope-encrypted passphrase custody) and per-host leaf certificate
//! issuance, and drives the remote-configuration workflow that enrolls
//! a host into the mesh when it joins the fleet: wait for the host's
//! management agent, issue a certificate, dispatch the setup script,
//! poll for completion, and advance the host's selector tag.
//!
//! External collaborators (object storage, envelope key service, remote
//! execution, agent registry, fleet inventory) are narrow trait seams in
//! [`providers`], with in-memory implementations for tests and dry-runs.

pub mod ca;
pub mod config;
pub mod error;
pub mod issuance;
pub mod orchestrator;
pub mod providers;
pub mod script;
pub mod signer;
pub mod testkit;

pub use config::{IssuanceConfig, OrchestratorConfig};
pub use error::{EnrollError, IssuanceError, SetupError};
pub use issuance::{CertIssuer, IssuanceResult};
pub use orchestrator::{EnrollPhase, EnrollmentEvent, EnrollmentOutcome, Orchestrator};
