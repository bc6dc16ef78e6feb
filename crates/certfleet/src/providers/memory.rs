//! In-memory provider implementations.
//!
//! Used by the test suite and for local dry-runs of the enrollment
//! pipeline. The key service is a real AES-256-GCM oracle with
//! self-describing ciphertexts and enforced key policies, so the
//! envelope-encryption and policy-hardening paths exercise the same
//! logic they would against a managed key service.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{
    AgentRegistry, ArtifactStore, CommandStatus, EnvelopeKeyService, FleetInventory, FleetMember,
    KeyAction, KeyPolicy, ProviderError, RemoteExecutionChannel, SendOptions,
};

// ── Artifact store ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    at_rest_encrypted: bool,
}

/// HashMap-backed artifact store. Records which objects were stored
/// with at-rest encryption so tests can assert on it.
#[derive(Default)]
pub struct MemoryArtifactStore {
    buckets: Mutex<HashMap<String, String>>,
    objects: Mutex<HashMap<(String, String), StoredObject>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor with the given buckets pre-created in `region`.
    pub fn with_buckets(region: &str, buckets: &[&str]) -> Self {
        let store = Self::new();
        {
            let mut map = store.buckets.lock().expect("bucket lock poisoned");
            for bucket in buckets {
                map.insert((*bucket).to_string(), region.to_string());
            }
        }
        store
    }

    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        let objects = self.objects.lock().expect("object lock poisoned");
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.object_keys(bucket).len()
    }

    /// Whether the object was stored with at-rest encryption; `None` if absent.
    pub fn at_rest_encrypted(&self, bucket: &str, key: &str) -> Option<bool> {
        let objects = self.objects.lock().expect("object lock poisoned");
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.at_rest_encrypted)
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        at_rest_encrypted: bool,
    ) -> Result<(), ProviderError> {
        let buckets = self.buckets.lock().expect("bucket lock poisoned");
        if !buckets.contains_key(bucket) {
            return Err(ProviderError::Backend(format!(
                "bucket does not exist: {bucket}"
            )));
        }
        drop(buckets);

        let mut objects = self.objects.lock().expect("object lock poisoned");
        objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.to_vec(),
                at_rest_encrypted,
            },
        );
        Ok(())
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), ProviderError> {
        self.put_object(bucket, key, body, false)
    }

    fn put_encrypted(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), ProviderError> {
        self.put_object(bucket, key, body, true)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ProviderError> {
        let objects = self.objects.lock().expect("object lock poisoned");
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
            .ok_or_else(|| ProviderError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn bucket_region(&self, bucket: &str) -> Result<Option<String>, ProviderError> {
        let buckets = self.buckets.lock().expect("bucket lock poisoned");
        Ok(buckets.get(bucket).cloned())
    }

    fn create_bucket(&self, bucket: &str, region: &str) -> Result<(), ProviderError> {
        let mut buckets = self.buckets.lock().expect("bucket lock poisoned");
        buckets.insert(bucket.to_string(), region.to_string());
        Ok(())
    }
}

// ── Envelope key service ────────────────────────────────────────────

/// Self-describing ciphertext envelope produced by [`MemoryKeyService`].
#[derive(Serialize, Deserialize)]
struct EnvelopeCiphertext {
    key_id: String,
    nonce: Vec<u8>,
    data: Vec<u8>,
}

/// AES-256-GCM key oracle with per-key access policies.
#[derive(Default)]
pub struct MemoryKeyService {
    keys: Mutex<HashMap<String, [u8; 32]>>,
    policies: Mutex<HashMap<String, KeyPolicy>>,
}

impl MemoryKeyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a key with a full policy and return the service for chaining.
    pub fn with_key(self, key_id: &str) -> Self {
        self.register_key(key_id);
        self
    }

    pub fn register_key(&self, key_id: &str) {
        let mut material = [0u8; 32];
        OsRng.fill_bytes(&mut material);
        self.keys
            .lock()
            .expect("key lock poisoned")
            .insert(key_id.to_string(), material);
        self.policies
            .lock()
            .expect("policy lock poisoned")
            .insert(key_id.to_string(), KeyPolicy::full());
    }

    fn key_material(&self, key_id: &str) -> Result<[u8; 32], ProviderError> {
        self.keys
            .lock()
            .expect("key lock poisoned")
            .get(key_id)
            .copied()
            .ok_or_else(|| ProviderError::KeyNotFound(key_id.to_string()))
    }

    fn check_policy(&self, key_id: &str, action: KeyAction) -> Result<(), ProviderError> {
        let policies = self.policies.lock().expect("policy lock poisoned");
        let policy = policies
            .get(key_id)
            .ok_or_else(|| ProviderError::KeyNotFound(key_id.to_string()))?;
        if policy.allows(action) {
            Ok(())
        } else {
            Err(ProviderError::ActionNotPermitted {
                key_id: key_id.to_string(),
                action: action.as_str().to_string(),
            })
        }
    }
}

impl EnvelopeKeyService for MemoryKeyService {
    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, ProviderError> {
        self.check_policy(key_id, KeyAction::Encrypt)?;
        let material = self.key_material(key_id)?;
        let cipher = Aes256Gcm::new_from_slice(&material)
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let data = cipher
            .encrypt(&Nonce::from(nonce_bytes), plaintext)
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let envelope = EnvelopeCiphertext {
            key_id: key_id.to_string(),
            nonce: nonce_bytes.to_vec(),
            data,
        };
        serde_json::to_vec(&envelope).map_err(|e| ProviderError::Backend(e.to_string()))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let envelope: EnvelopeCiphertext = serde_json::from_slice(ciphertext)
            .map_err(|e| ProviderError::Backend(format!("malformed ciphertext: {e}")))?;
        self.check_policy(&envelope.key_id, KeyAction::Decrypt)?;
        let material = self.key_material(&envelope.key_id)?;
        let cipher = Aes256Gcm::new_from_slice(&material)
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let nonce: [u8; 12] = envelope
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| ProviderError::Backend("malformed ciphertext nonce".to_string()))?;
        cipher
            .decrypt(&Nonce::from(nonce), envelope.data.as_ref())
            .map_err(|e| ProviderError::Backend(format!("decryption failed: {e}")))
    }

    fn generate_random(&self, n: usize) -> Result<Vec<u8>, ProviderError> {
        let mut bytes = vec![0u8; n];
        OsRng.fill_bytes(&mut bytes);
        Ok(bytes)
    }

    fn get_key_policy(&self, key_id: &str) -> Result<KeyPolicy, ProviderError> {
        let policies = self.policies.lock().expect("policy lock poisoned");
        policies
            .get(key_id)
            .cloned()
            .ok_or_else(|| ProviderError::KeyNotFound(key_id.to_string()))
    }

    fn put_key_policy(&self, key_id: &str, policy: &KeyPolicy) -> Result<(), ProviderError> {
        self.check_policy(key_id, KeyAction::ManagePolicy)?;
        let mut policies = self.policies.lock().expect("policy lock poisoned");
        policies.insert(key_id.to_string(), policy.clone());
        Ok(())
    }
}

// ── Remote execution channel ────────────────────────────────────────

/// A command as recorded by [`MemoryExecChannel::send`].
#[derive(Debug, Clone)]
pub struct SentCommand {
    pub command_id: String,
    pub host_ids: Vec<String>,
    pub script: String,
    pub options: SendOptions,
}

/// Scripted execution channel. Each `send` consumes the next queued
/// status sequence; `status` steps through it, holding the final entry
/// once reached. With nothing queued, commands complete immediately.
#[derive(Default)]
pub struct MemoryExecChannel {
    sent: Mutex<Vec<SentCommand>>,
    pending_sequences: Mutex<VecDeque<Vec<CommandStatus>>>,
    statuses: Mutex<HashMap<String, VecDeque<CommandStatus>>>,
}

impl MemoryExecChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the status sequence the next dispatched command will report.
    pub fn queue_statuses(&self, sequence: Vec<CommandStatus>) {
        self.pending_sequences
            .lock()
            .expect("sequence lock poisoned")
            .push_back(sequence);
    }

    pub fn sent_commands(&self) -> Vec<SentCommand> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }
}

impl RemoteExecutionChannel for MemoryExecChannel {
    fn send(
        &self,
        host_ids: &[String],
        script: &str,
        options: &SendOptions,
    ) -> Result<String, ProviderError> {
        let command_id = uuid::Uuid::new_v4().to_string();
        let sequence = self
            .pending_sequences
            .lock()
            .expect("sequence lock poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                vec![CommandStatus {
                    completed_count: host_ids.len() as u32,
                    target_count: host_ids.len() as u32,
                    error_count: 0,
                }]
            });

        self.statuses
            .lock()
            .expect("status lock poisoned")
            .insert(command_id.clone(), sequence.into());
        self.sent.lock().expect("sent lock poisoned").push(SentCommand {
            command_id: command_id.clone(),
            host_ids: host_ids.to_vec(),
            script: script.to_string(),
            options: options.clone(),
        });
        Ok(command_id)
    }

    fn status(&self, command_id: &str) -> Result<CommandStatus, ProviderError> {
        let mut statuses = self.statuses.lock().expect("status lock poisoned");
        let queue = statuses
            .get_mut(command_id)
            .ok_or_else(|| ProviderError::CommandNotFound(command_id.to_string()))?;
        if queue.len() > 1 {
            Ok(queue.pop_front().expect("queue is non-empty"))
        } else {
            queue
                .front()
                .copied()
                .ok_or_else(|| ProviderError::CommandNotFound(command_id.to_string()))
        }
    }
}

// ── Agent readiness registry ────────────────────────────────────────

/// Registry where each host comes online after a configurable number of
/// failed polls. Hosts never configured are online immediately.
#[derive(Default)]
pub struct MemoryAgentRegistry {
    online_after: Mutex<HashMap<String, u32>>,
    polls: Mutex<HashMap<String, u32>>,
}

impl MemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The host reports offline for the first `failed_polls` queries.
    pub fn set_online_after(&self, host_id: &str, failed_polls: u32) {
        self.online_after
            .lock()
            .expect("registry lock poisoned")
            .insert(host_id.to_string(), failed_polls);
    }

    /// The host never reports online.
    pub fn set_never_online(&self, host_id: &str) {
        self.set_online_after(host_id, u32::MAX);
    }

    pub fn poll_count(&self, host_id: &str) -> u32 {
        self.polls
            .lock()
            .expect("poll lock poisoned")
            .get(host_id)
            .copied()
            .unwrap_or(0)
    }
}

impl AgentRegistry for MemoryAgentRegistry {
    fn describe_online_agents(&self, host_ids: &[String]) -> Result<usize, ProviderError> {
        let thresholds = self.online_after.lock().expect("registry lock poisoned");
        let mut polls = self.polls.lock().expect("poll lock poisoned");
        let mut online = 0;
        for host_id in host_ids {
            let count = polls.entry(host_id.clone()).or_insert(0);
            *count += 1;
            let threshold = thresholds.get(host_id).copied().unwrap_or(0);
            if threshold != u32::MAX && *count > threshold {
                online += 1;
            }
        }
        Ok(online)
    }
}

// ── Fleet inventory ─────────────────────────────────────────────────

/// Mutable in-memory fleet inventory.
#[derive(Default)]
pub struct MemoryInventory {
    hosts: Mutex<HashMap<String, FleetMember>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_host(&self, member: FleetMember) {
        self.hosts
            .lock()
            .expect("inventory lock poisoned")
            .insert(member.host_id.clone(), member);
    }

    pub fn tag_value(&self, host_id: &str, name: &str) -> Option<String> {
        let hosts = self.hosts.lock().expect("inventory lock poisoned");
        hosts.get(host_id).and_then(|m| m.tags.get(name).cloned())
    }
}

impl FleetInventory for MemoryInventory {
    fn describe_host(&self, host_id: &str) -> Result<FleetMember, ProviderError> {
        let hosts = self.hosts.lock().expect("inventory lock poisoned");
        hosts
            .get(host_id)
            .cloned()
            .ok_or_else(|| ProviderError::HostNotFound(host_id.to_string()))
    }

    fn remove_tag(&self, host_id: &str, name: &str, value: &str) -> Result<(), ProviderError> {
        let mut hosts = self.hosts.lock().expect("inventory lock poisoned");
        let member = hosts
            .get_mut(host_id)
            .ok_or_else(|| ProviderError::HostNotFound(host_id.to_string()))?;
        if member.tags.get(name).map(String::as_str) == Some(value) {
            member.tags.remove(name);
        }
        Ok(())
    }

    fn set_tag(&self, host_id: &str, name: &str, value: &str) -> Result<(), ProviderError> {
        let mut hosts = self.hosts.lock().expect("inventory lock poisoned");
        let member = hosts
            .get_mut(host_id)
            .ok_or_else(|| ProviderError::HostNotFound(host_id.to_string()))?;
        member.tags.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
