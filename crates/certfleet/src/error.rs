//! Domain error types.
//!
//! Three families, matching how failures propagate: fatal bootstrap
//! errors ([`SetupError`]), per-host issuance errors ([`IssuanceError`],
//! a typed result carrying a wire code), and enrollment failures
//! ([`EnrollError`], always attributable to one host and, where a
//! command was dispatched, one command id).

use certfleet_common::error::ErrorCode;
use certfleet_crypto::CryptoError;
use serde::{Deserialize, Serialize};

use crate::providers::ProviderError;

/// Fatal CA bootstrap errors. Nothing produced by a failed bootstrap is
/// considered usable.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("ca key generation failed: {0}")]
    KeyGeneration(#[from] CryptoError),

    #[error("ca certificate generation failed: {0}")]
    Certificate(String),

    #[error("ca artifact upload failed: {0}")]
    Upload(#[source] ProviderError),

    #[error("envelope key service error: {0}")]
    Envelope(#[source] ProviderError),

    #[error("key policy hardening failed: {0}")]
    PolicyHardening(#[source] ProviderError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SetupError {
    /// Operator-facing remediation hint printed alongside bootstrap failures.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::KeyGeneration(_) | Self::Certificate(_) => {
                "check available entropy and retry the bootstrap"
            }
            Self::Upload(_) => "check that the CA bucket exists and is writable, then rerun",
            Self::Envelope(_) => "check the envelope key id and its access policy",
            Self::PolicyHardening(_) => {
                "encrypt capability may still be active; harden the key policy manually"
            }
            Self::Io(_) => "check local disk permissions for the retention directory",
        }
    }
}

impl From<&SetupError> for ErrorCode {
    fn from(e: &SetupError) -> Self {
        match e {
            SetupError::KeyGeneration(_) | SetupError::Certificate(_) => ErrorCode::Internal,
            SetupError::Upload(_) | SetupError::Envelope(_) | SetupError::PolicyHardening(_) => {
                ErrorCode::ProviderError
            }
            SetupError::Io(_) => ErrorCode::IoError,
        }
    }
}

/// Typed per-host issuance failure. Callers must treat any value of
/// this type as "this host did not receive a certificate".
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct IssuanceError {
    pub code: ErrorCode,
    pub message: String,
}

impl IssuanceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&IssuanceError> for ErrorCode {
    fn from(e: &IssuanceError) -> Self {
        e.code
    }
}

/// Terminal enrollment failure for a single host.
#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    #[error("host {host_id} is not running (state: {state})")]
    NotRunning { host_id: String, state: String },

    #[error("agent for host {host_id} never reported online; check host role, agent, or network rules")]
    AgentUnreachable { host_id: String },

    #[error("certificate issuance failed for host {host_id}: {source}")]
    Issuance {
        host_id: String,
        #[source]
        source: IssuanceError,
    },

    #[error("remote configuration failed on host {host_id}; check output log of command {command_id}")]
    RemoteScriptFailed { host_id: String, command_id: String },

    #[error("deadline expired while enrolling host {host_id}")]
    DeadlineExceeded { host_id: String },

    #[error("provider error while enrolling host {host_id}: {source}")]
    Provider {
        host_id: String,
        #[source]
        source: ProviderError,
    },
}

impl From<&EnrollError> for ErrorCode {
    fn from(e: &EnrollError) -> Self {
        match e {
            EnrollError::NotRunning { .. } => ErrorCode::NotRunning,
            EnrollError::AgentUnreachable { .. } => ErrorCode::AgentUnreachable,
            EnrollError::Issuance { source, .. } => source.code,
            EnrollError::RemoteScriptFailed { .. } => ErrorCode::RemoteScriptFailed,
            EnrollError::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            EnrollError::Provider { .. } => ErrorCode::ProviderError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuance_error_display_includes_code_and_message() {
        let err = IssuanceError::new(ErrorCode::NoNetworkIdentity, "no private addresses");
        assert_eq!(err.to_string(), "no_network_identity: no private addresses");
    }

    #[test]
    fn issuance_error_serializes_wire_code() {
        let err = IssuanceError::new(ErrorCode::SigningFailed, "signer exited nonzero");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json.get("code").unwrap(), "signing_failed");
    }

    #[test]
    fn enroll_error_maps_to_codes() {
        let err = EnrollError::AgentUnreachable {
            host_id: "i-1".to_string(),
        };
        assert_eq!(ErrorCode::from(&err), ErrorCode::AgentUnreachable);

        let err = EnrollError::Issuance {
            host_id: "i-1".to_string(),
            source: IssuanceError::new(ErrorCode::ArtifactFetchFailed, "missing"),
        };
        assert_eq!(ErrorCode::from(&err), ErrorCode::ArtifactFetchFailed);
    }

    #[test]
    fn remote_script_failure_names_the_command() {
        let err = EnrollError::RemoteScriptFailed {
            host_id: "i-1".to_string(),
            command_id: "cmd-42".to_string(),
        };
        assert!(err.to_string().contains("cmd-42"));
        assert!(err.to_string().contains("i-1"));
    }

    #[test]
    fn setup_errors_carry_remediation_hints() {
        let err = SetupError::Certificate("bad params".to_string());
        assert!(!err.remediation().is_empty());
    }
}
