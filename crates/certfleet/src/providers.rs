//! Trait seams for the external collaborators.
//!
//! Everything the CA manager, issuance service, and orchestrator need
//! from the outside world goes through these traits: durable object
//! storage, the envelope key service, the remote execution channel, the
//! agent readiness registry, and the fleet inventory. Production
//! deployments wrap cloud SDK clients; [`memory`] provides in-process
//! implementations for tests and local dry-runs.

pub mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("bucket {bucket} exists in region {actual}, expected {expected}")]
    BucketRegionMismatch {
        bucket: String,
        expected: String,
        actual: String,
    },

    #[error("envelope key not found: {0}")]
    KeyNotFound(String),

    #[error("action {action} not permitted by key policy of {key_id}")]
    ActionNotPermitted { key_id: String, action: String },

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("{0}")]
    Backend(String),
}

// ── Artifact store ──────────────────────────────────────────────────

/// Durable object storage keyed by (bucket, key).
pub trait ArtifactStore: Send + Sync {
    fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), ProviderError>;

    /// Store with at-rest encryption requested from the backend.
    fn put_encrypted(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), ProviderError>;

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ProviderError>;

    /// Returns the region the bucket lives in, or `None` if it does not exist.
    fn bucket_region(&self, bucket: &str) -> Result<Option<String>, ProviderError>;

    fn create_bucket(&self, bucket: &str, region: &str) -> Result<(), ProviderError>;
}

/// Idempotent bucket provisioning: create when absent, accept an
/// existing bucket in the right region, and fail loudly when an
/// existing bucket is in the wrong one.
pub fn ensure_bucket(
    store: &dyn ArtifactStore,
    bucket: &str,
    region: &str,
) -> Result<(), ProviderError> {
    match store.bucket_region(bucket)? {
        Some(actual) if actual == region => Ok(()),
        Some(actual) => Err(ProviderError::BucketRegionMismatch {
            bucket: bucket.to_string(),
            expected: region.to_string(),
            actual,
        }),
        None => store.create_bucket(bucket, region),
    }
}

// ── Envelope key service ────────────────────────────────────────────

/// Actions a key policy can grant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    Encrypt,
    Decrypt,
    GenerateRandom,
    ManagePolicy,
}

impl KeyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::GenerateRandom => "generate_random",
            Self::ManagePolicy => "manage_policy",
        }
    }
}

/// Mutable access policy of an envelope key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPolicy {
    pub allowed_actions: BTreeSet<KeyAction>,
}

impl KeyPolicy {
    /// Policy granting every action; the state of a freshly created key.
    pub fn full() -> Self {
        Self {
            allowed_actions: BTreeSet::from([
                KeyAction::Encrypt,
                KeyAction::Decrypt,
                KeyAction::GenerateRandom,
                KeyAction::ManagePolicy,
            ]),
        }
    }

    pub fn allows(&self, action: KeyAction) -> bool {
        self.allowed_actions.contains(&action)
    }
}

/// Asymmetric/symmetric encryption oracle with key-policy management.
/// Ciphertexts are self-describing: `decrypt` needs no key id.
pub trait EnvelopeKeyService: Send + Sync {
    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, ProviderError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProviderError>;

    fn generate_random(&self, n: usize) -> Result<Vec<u8>, ProviderError>;

    fn get_key_policy(&self, key_id: &str) -> Result<KeyPolicy, ProviderError>;

    fn put_key_policy(&self, key_id: &str, policy: &KeyPolicy) -> Result<(), ProviderError>;
}

// ── Remote execution channel ────────────────────────────────────────

/// Dispatch limits for a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    /// Total command lifetime ceiling, in seconds.
    pub timeout_seconds: u32,
    /// Per-host script execution timeout, in seconds.
    pub execution_timeout_seconds: u32,
    pub max_concurrency: u32,
    pub max_errors: u32,
}

impl Default for SendOptions {
    /// The generous ceilings used for enrollment dispatch: remote
    /// package installation and IPsec negotiation are variable-latency
    /// and must not be starved by an aggressive timeout.
    fn default() -> Self {
        Self {
            timeout_seconds: 3600,
            execution_timeout_seconds: 600,
            max_concurrency: 5,
            max_errors: 5,
        }
    }
}

/// Completion counters for a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    pub completed_count: u32,
    pub target_count: u32,
    pub error_count: u32,
}

impl CommandStatus {
    pub fn is_complete(&self) -> bool {
        self.completed_count == self.target_count
    }
}

/// Command-dispatch/poll API against the fleet's management agents.
pub trait RemoteExecutionChannel: Send + Sync {
    fn send(
        &self,
        host_ids: &[String],
        script: &str,
        options: &SendOptions,
    ) -> Result<String, ProviderError>;

    fn status(&self, command_id: &str) -> Result<CommandStatus, ProviderError>;
}

// ── Agent readiness registry ────────────────────────────────────────

/// Reports how many of the given hosts currently have an online
/// management agent.
pub trait AgentRegistry: Send + Sync {
    fn describe_online_agents(&self, host_ids: &[String]) -> Result<usize, ProviderError>;
}

// ── Fleet inventory ─────────────────────────────────────────────────

/// A managed host as seen in the fleet inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetMember {
    pub host_id: String,
    /// Lifecycle state name, e.g. "running", "stopped".
    pub state: String,
    pub vpc_id: String,
    pub tags: BTreeMap<String, String>,
    pub private_dns_name: String,
    pub private_ips: Vec<IpAddr>,
}

impl FleetMember {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Host lifecycle, tags, and network identity.
///
/// Tag removal is value-conditional: `remove_tag` only removes the tag
/// when its current value matches, so the remove-then-add transition is
/// a no-op remove when a certificate-only re-enrollment already carries
/// the result value.
pub trait FleetInventory: Send + Sync {
    fn describe_host(&self, host_id: &str) -> Result<FleetMember, ProviderError>;

    fn remove_tag(&self, host_id: &str, name: &str, value: &str) -> Result<(), ProviderError>;

    fn set_tag(&self, host_id: &str, name: &str, value: &str) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_policy_allows_everything() {
        let policy = KeyPolicy::full();
        assert!(policy.allows(KeyAction::Encrypt));
        assert!(policy.allows(KeyAction::Decrypt));
        assert!(policy.allows(KeyAction::GenerateRandom));
        assert!(policy.allows(KeyAction::ManagePolicy));
    }

    #[test]
    fn key_action_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(KeyAction::GenerateRandom).unwrap(),
            "generate_random"
        );
        assert_eq!(serde_json::to_value(KeyAction::Encrypt).unwrap(), "encrypt");
    }

    #[test]
    fn default_send_options_use_enrollment_ceilings() {
        let opts = SendOptions::default();
        assert_eq!(opts.timeout_seconds, 3600);
        assert_eq!(opts.execution_timeout_seconds, 600);
        assert_eq!(opts.max_concurrency, 5);
        assert_eq!(opts.max_errors, 5);
    }

    #[test]
    fn command_status_completion() {
        let pending = CommandStatus {
            completed_count: 0,
            target_count: 1,
            error_count: 0,
        };
        assert!(!pending.is_complete());
        let done = CommandStatus {
            completed_count: 1,
            target_count: 1,
            error_count: 0,
        };
        assert!(done.is_complete());
    }
}
