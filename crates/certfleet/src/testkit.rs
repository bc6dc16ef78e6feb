//! Fixtures shared by unit and integration tests.
//!
//! Public so downstream crates wiring their own providers can reuse the
//! same stubs.

use std::collections::BTreeMap;

use certfleet_common::encoding::b64_encode;

use crate::config::OrchestratorConfig;
use crate::providers::FleetMember;
use crate::signer::{CaBundle, HostDescriptor, SignedBundle, Signer, SignerError};

/// Signer returning fixed payloads without touching CA material.
/// Outputs are valid base64 so downstream decoding paths stay honest.
#[derive(Debug, Clone, Default)]
pub struct StubSigner {
    /// When set, every signing call fails with this message.
    pub fail_with: Option<String>,
}

impl Signer for StubSigner {
    fn sign(&self, _ca: &CaBundle, host: &HostDescriptor) -> Result<SignedBundle, SignerError> {
        if let Some(msg) = &self.fail_with {
            return Err(SignerError::Failed(msg.clone()));
        }
        let cert = format!(
            "-----BEGIN CERTIFICATE-----\nstub cert for {}\n-----END CERTIFICATE-----\n",
            host.hostname
        );
        Ok(SignedBundle {
            cert_pem_b64: b64_encode(cert.as_bytes()),
            p12_b64: b64_encode(b"stub export container"),
        })
    }
}

/// A running fleet member with one private address and the pending
/// selector tag, as a new host looks right after joining.
pub fn fleet_member(host_id: &str) -> FleetMember {
    FleetMember {
        host_id: host_id.to_string(),
        state: "running".to_string(),
        vpc_id: "vpc-1".to_string(),
        tags: BTreeMap::from([("mesh-state".to_string(), "pending".to_string())]),
        private_dns_name: "ip-10-0-0-5.internal".to_string(),
        private_ips: vec!["10.0.0.5".parse().expect("literal address")],
    }
}

/// Orchestrator configuration matching [`fleet_member`]'s tags.
pub fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        selector_tag_name: "mesh-state".to_string(),
        pending_tag_value: "pending".to_string(),
        result_tag_value: "enrolled".to_string(),
        source_bucket: "config".to_string(),
        setup_script_key: "setup.sh.tmpl".to_string(),
        vpc_restriction: None,
    }
}
