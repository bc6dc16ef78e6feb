use serde::{Deserialize, Serialize};

/// Machine-readable error codes for terminal failures.
/// Shared by all crates so that every failure an operator sees is
/// attributable to exactly one code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Per-host issuance
    ArtifactFetchFailed,
    SigningFailed,
    SigningOutputInvalid,
    NoNetworkIdentity,
    CaNotConfigured,
    // Enrollment orchestration
    NotRunning,
    AgentUnreachable,
    RemoteScriptFailed,
    DeadlineExceeded,
    // Ambient
    ProviderError,
    IoError,
    Internal,
}

impl ErrorCode {
    /// The snake_case form used on the wire and in log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactFetchFailed => "artifact_fetch_failed",
            Self::SigningFailed => "signing_failed",
            Self::SigningOutputInvalid => "signing_output_invalid",
            Self::NoNetworkIdentity => "no_network_identity",
            Self::CaNotConfigured => "ca_not_configured",
            Self::NotRunning => "not_running",
            Self::AgentUnreachable => "agent_unreachable",
            Self::RemoteScriptFailed => "remote_script_failed",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::ProviderError => "provider_error",
            Self::IoError => "io_error",
            Self::Internal => "internal",
        }
    }

    /// Whether a failure with this code is scoped to a single host
    /// (as opposed to aborting a whole bootstrap).
    pub fn is_per_host(&self) -> bool {
        matches!(
            self,
            Self::ArtifactFetchFailed
                | Self::SigningFailed
                | Self::SigningOutputInvalid
                | Self::NoNetworkIdentity
                | Self::NotRunning
                | Self::AgentUnreachable
                | Self::RemoteScriptFailed
                | Self::DeadlineExceeded
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
