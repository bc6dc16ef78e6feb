//! Configuration objects for issuance and orchestration.
//!
//! The CA passphrase ciphertext travels inside [`IssuanceConfig`] and is
//! installed by the CA manager through an explicit, whole-object
//! reconfigure on the issuance service, never through mutable global
//! state, so a half-applied update can't be observed.

use serde::{Deserialize, Serialize};

/// Object key of the CA certificate inside the CA bucket.
pub const CA_CERT_OBJECT_KEY: &str = "ca.cert.pem";

/// Object key of the encrypted CA private key inside the CA bucket.
pub const CA_KEY_OBJECT_KEY: &str = "ca.key.encrypted.pem";

/// Runtime configuration of the certificate issuance service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuanceConfig {
    /// Bucket holding the CA certificate and encrypted private key.
    pub ca_bucket: String,
    pub ca_cert_key: String,
    pub ca_key_key: String,
    /// Bucket receiving one audit copy of every issued certificate.
    pub certs_bucket: String,
    /// Envelope key used to encrypt per-issuance export passphrases.
    /// Distinct from the CA custody key: export secrecy and CA custody
    /// are separate duties.
    pub export_key_id: String,
    /// CA passphrase ciphertext, installed once by the CA manager.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_passphrase_ciphertext: Option<Vec<u8>>,
}

impl IssuanceConfig {
    pub fn new(ca_bucket: &str, certs_bucket: &str, export_key_id: &str) -> Self {
        Self {
            ca_bucket: ca_bucket.to_string(),
            ca_cert_key: CA_CERT_OBJECT_KEY.to_string(),
            ca_key_key: CA_KEY_OBJECT_KEY.to_string(),
            certs_bucket: certs_bucket.to_string(),
            export_key_id: export_key_id.to_string(),
            ca_passphrase_ciphertext: None,
        }
    }
}

/// Static configuration of the enrollment orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Name of the selector tag carrying the enrollment state.
    pub selector_tag_name: String,
    /// Tag value that marks a host as awaiting enrollment.
    pub pending_tag_value: String,
    /// Tag value set after successful enrollment.
    pub result_tag_value: String,
    /// Bucket holding the setup script template; also substituted into
    /// the script as `{{configBucket}}`.
    pub source_bucket: String,
    /// Object key of the setup script template.
    pub setup_script_key: String,
    /// Restrict enrollment to hosts in this VPC; `None` means any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_restriction: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_issuance_config_uses_canonical_object_keys() {
        let config = IssuanceConfig::new("crypto", "certs", "export-key");
        assert_eq!(config.ca_cert_key, "ca.cert.pem");
        assert_eq!(config.ca_key_key, "ca.key.encrypted.pem");
        assert!(config.ca_passphrase_ciphertext.is_none());
    }

    #[test]
    fn unset_passphrase_ciphertext_is_omitted_from_json() {
        let config = IssuanceConfig::new("crypto", "certs", "export-key");
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("ca_passphrase_ciphertext").is_none());
    }

    #[test]
    fn orchestrator_config_round_trips_through_json() {
        let config = OrchestratorConfig {
            selector_tag_name: "state".to_string(),
            pending_tag_value: "pending".to_string(),
            result_tag_value: "done".to_string(),
            source_bucket: "config".to_string(),
            setup_script_key: "setup.sh".to_string(),
            vpc_restriction: Some("vpc-1".to_string()),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
