//! Per-host certificate issuance.
//!
//! [`CertIssuer`] owns the runtime configuration and the signing seam.
//! One call to [`CertIssuer::issue`] produces the full payload a host
//! needs: its certificate, a sealed key+chain export container, and the
//! envelope-encrypted export passphrase. An audit copy of every issued
//! certificate lands in the certs bucket under a timestamped key.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use certfleet_common::encoding::b64_encode;
use certfleet_common::error::ErrorCode;

use crate::config::IssuanceConfig;
use crate::error::IssuanceError;
use crate::providers::{ArtifactStore, EnvelopeKeyService, FleetInventory, ProviderError};
use crate::signer::{CaBundle, HostDescriptor, Signer, SignerError};

/// Byte length of the randomness behind each export passphrase.
const EXPORT_PASSPHRASE_BYTES: usize = 128;

/// Issuance payload, keyed for the remote setup environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuanceResult {
    /// Leaf certificate, PEM, base64-wrapped.
    #[serde(rename = "CERT_PEM_B64")]
    pub cert_pem_b64: String,
    /// Sealed key+chain export container, base64-wrapped.
    #[serde(rename = "CERT_P12_B64")]
    pub p12_b64: String,
    /// Export passphrase ciphertext under the export envelope key,
    /// base64-wrapped. Only the host-side agent, holding decrypt access
    /// to that key, can recover it.
    #[serde(rename = "CERT_P12_ENCRYPTED_PWD")]
    pub p12_encrypted_pwd_b64: String,
}

/// The certificate issuance service.
pub struct CertIssuer {
    store: Arc<dyn ArtifactStore>,
    envelope: Arc<dyn EnvelopeKeyService>,
    inventory: Arc<dyn FleetInventory>,
    signer: Box<dyn Signer>,
    config: RwLock<IssuanceConfig>,
}

impl CertIssuer {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        envelope: Arc<dyn EnvelopeKeyService>,
        inventory: Arc<dyn FleetInventory>,
        signer: Box<dyn Signer>,
        config: IssuanceConfig,
    ) -> Self {
        Self {
            store,
            envelope,
            inventory,
            signer,
            config: RwLock::new(config),
        }
    }

    /// Replace the whole configuration atomically. Issuances in flight
    /// keep the snapshot they started with.
    pub fn reconfigure(&self, config: IssuanceConfig) {
        *self.config.write().expect("config lock poisoned") = config;
        tracing::info!("Issuance configuration replaced");
    }

    pub fn config_snapshot(&self) -> IssuanceConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Issue a certificate for one host.
    ///
    /// Fetches CA custody material, recovers the passphrase through the
    /// envelope service, signs a leaf for the host's DNS name and
    /// private addresses, uploads the audit copy, and returns the
    /// payload. Staged passphrases are scrubbed before returning, on
    /// every path out of the signing call.
    pub fn issue(&self, host_id: &str) -> Result<IssuanceResult, IssuanceError> {
        let config = self.config_snapshot();
        let passphrase_ciphertext = config.ca_passphrase_ciphertext.as_deref().ok_or_else(|| {
            IssuanceError::new(
                ErrorCode::CaNotConfigured,
                "no CA passphrase ciphertext installed",
            )
        })?;

        let member = self
            .inventory
            .describe_host(host_id)
            .map_err(provider_issue_error)?;
        if member.private_ips.is_empty() {
            return Err(IssuanceError::new(
                ErrorCode::NoNetworkIdentity,
                format!("host {host_id} has no private addresses"),
            ));
        }
        let host = HostDescriptor {
            hostname: member.private_dns_name.clone(),
            san_entries: member
                .private_ips
                .iter()
                .map(|ip| format!("IP:{ip}"))
                .collect(),
        };

        let ca_cert = self
            .store
            .get(&config.ca_bucket, &config.ca_cert_key)
            .map_err(artifact_fetch_error)?;
        let ca_cert_pem = String::from_utf8(ca_cert).map_err(|_| {
            IssuanceError::new(ErrorCode::ArtifactFetchFailed, "ca certificate is not utf-8")
        })?;
        let ca_key_encrypted = self
            .store
            .get(&config.ca_bucket, &config.ca_key_key)
            .map_err(artifact_fetch_error)?;

        let passphrase_bytes = self
            .envelope
            .decrypt(passphrase_ciphertext)
            .map_err(provider_issue_error)?;
        let ca_passphrase = Zeroizing::new(String::from_utf8(passphrase_bytes).map_err(|_| {
            IssuanceError::new(ErrorCode::Internal, "ca passphrase is not utf-8")
        })?);

        // Fresh export passphrase per issuance, returned to the host
        // only as ciphertext under the export envelope key.
        let export_random = self
            .envelope
            .generate_random(EXPORT_PASSPHRASE_BYTES)
            .map_err(provider_issue_error)?;
        let export_passphrase = Zeroizing::new(b64_encode(&export_random));
        let export_ciphertext = self
            .envelope
            .encrypt(&config.export_key_id, export_passphrase.as_bytes())
            .map_err(provider_issue_error)?;

        let mut bundle = CaBundle {
            ca_cert_pem,
            ca_key_encrypted,
            ca_passphrase,
            export_passphrase,
        };
        let signed = self.signer.sign(&bundle, &host);
        bundle.scrub();
        let signed = signed.map_err(|e| match e {
            SignerError::Failed(msg) => IssuanceError::new(ErrorCode::SigningFailed, msg),
            SignerError::OutputInvalid(msg) => {
                IssuanceError::new(ErrorCode::SigningOutputInvalid, msg)
            }
        })?;

        self.upload_audit_copy(&config, &host.hostname, &signed.cert_pem_b64)?;

        tracing::info!(host_id, hostname = %host.hostname, "Certificate issued");
        Ok(IssuanceResult {
            cert_pem_b64: signed.cert_pem_b64,
            p12_b64: signed.p12_b64,
            p12_encrypted_pwd_b64: b64_encode(&export_ciphertext),
        })
    }

    /// Encrypted-at-rest audit copy under `"<timestamp> - <hostname>.pem"`.
    fn upload_audit_copy(
        &self,
        config: &IssuanceConfig,
        hostname: &str,
        cert_pem_b64: &str,
    ) -> Result<(), IssuanceError> {
        let cert_pem = certfleet_common::encoding::b64_decode(cert_pem_b64).map_err(|e| {
            IssuanceError::new(ErrorCode::SigningOutputInvalid, e.to_string())
        })?;
        let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f");
        let key = format!("{stamp} - {hostname}.pem");
        self.store
            .put_encrypted(&config.certs_bucket, &key, &cert_pem)
            .map_err(provider_issue_error)?;
        tracing::debug!(bucket = %config.certs_bucket, key = %key, "Audit copy uploaded");
        Ok(())
    }
}

fn artifact_fetch_error(e: ProviderError) -> IssuanceError {
    IssuanceError::new(ErrorCode::ArtifactFetchFailed, e.to_string())
}

fn provider_issue_error(e: ProviderError) -> IssuanceError {
    IssuanceError::new(ErrorCode::ProviderError, e.to_string())
}
