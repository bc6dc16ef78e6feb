//! The CA signing primitive behind a narrow seam.
//!
//! [`Signer`] is the one interface issuance needs: CA material plus a
//! host descriptor in, base64 certificate and sealed export bundle out.
//! [`LocalSigner`] implements it with an in-process certificate build;
//! deployments that shell out to an external helper can keep the same
//! contract.

use rcgen::{CertificateParams, DnType, KeyPair, SanType, PKCS_RSA_SHA256};
use zeroize::{Zeroize, Zeroizing};

use certfleet_common::encoding::b64_encode;
use certfleet_crypto::bundle::{seal_bundle, ExportBundle};
use certfleet_crypto::keys::{self, EncryptedKey};

/// Leaf certificate lifetime.
const LEAF_VALIDITY_DAYS: i64 = 365;

/// Modulus size for leaf keys.
const LEAF_KEY_BITS: usize = 2048;

/// Everything the signing primitive needs from CA custody. Passphrases
/// are staged here for the duration of one signing call and must be
/// scrubbed by the owner immediately after.
pub struct CaBundle {
    pub ca_cert_pem: String,
    /// Encrypted CA private key, as fetched from the artifact store.
    pub ca_key_encrypted: Vec<u8>,
    pub ca_passphrase: Zeroizing<String>,
    pub export_passphrase: Zeroizing<String>,
}

impl CaBundle {
    /// Overwrite the staged passphrases. Called after every signing
    /// attempt, success or not; the CA passphrase decrypts the master
    /// key and must not linger.
    pub fn scrub(&mut self) {
        self.ca_passphrase.zeroize();
        self.export_passphrase.zeroize();
    }
}

/// Identity of the host being issued a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDescriptor {
    pub hostname: String,
    /// SAN entries in `IP:<addr>` form, at least one.
    pub san_entries: Vec<String>,
}

impl HostDescriptor {
    /// The comma-joined SAN line as handed to the signing primitive.
    pub fn san_line(&self) -> String {
        self.san_entries.join(",")
    }
}

/// Output of a successful signing call.
#[derive(Debug, Clone)]
pub struct SignedBundle {
    pub cert_pem_b64: String,
    pub p12_b64: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    Failed(String),

    #[error("signer input/output invalid: {0}")]
    OutputInvalid(String),
}

pub trait Signer: Send + Sync {
    fn sign(&self, ca: &CaBundle, host: &HostDescriptor) -> Result<SignedBundle, SignerError>;
}

/// In-process signing primitive.
///
/// Decrypts the CA key, rebuilds the issuer, mints a fresh leaf key,
/// signs a certificate with the host's DNS name and IP SANs, and seals
/// the key+chain export container under the export passphrase.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    pub leaf_validity_days: i64,
    pub leaf_key_bits: usize,
}

impl Default for LocalSigner {
    fn default() -> Self {
        Self {
            leaf_validity_days: LEAF_VALIDITY_DAYS,
            leaf_key_bits: LEAF_KEY_BITS,
        }
    }
}

impl LocalSigner {
    fn parse_san_entries(host: &HostDescriptor) -> Result<Vec<std::net::IpAddr>, SignerError> {
        host.san_entries
            .iter()
            .map(|entry| {
                let addr = entry.strip_prefix("IP:").ok_or_else(|| {
                    SignerError::OutputInvalid(format!("malformed SAN entry: {entry}"))
                })?;
                addr.parse().map_err(|_| {
                    SignerError::OutputInvalid(format!("invalid SAN address: {entry}"))
                })
            })
            .collect()
    }
}

impl Signer for LocalSigner {
    fn sign(&self, ca: &CaBundle, host: &HostDescriptor) -> Result<SignedBundle, SignerError> {
        let ips = Self::parse_san_entries(host)?;

        // Decrypt the CA private key and rebuild the signing pair.
        let encrypted = EncryptedKey::from_json(&ca.ca_key_encrypted)
            .map_err(|e| SignerError::Failed(format!("ca key container: {e}")))?;
        let key_bytes = keys::decrypt_bytes(&encrypted, &ca.ca_passphrase)
            .map_err(|e| SignerError::Failed(format!("ca key decryption: {e}")))?;
        let key_pem = std::str::from_utf8(&key_bytes)
            .map_err(|_| SignerError::Failed("ca key is not valid pem".to_string()))?;
        let ca_key = KeyPair::from_pem_and_sign_algo(key_pem, &PKCS_RSA_SHA256)
            .map_err(|e| SignerError::Failed(format!("ca key parse: {e}")))?;

        // Rebuild the issuer certificate from the stored PEM so the
        // leaf carries the CA's subject as its issuer.
        let issuer_params = CertificateParams::from_ca_cert_pem(&ca.ca_cert_pem)
            .map_err(|e| SignerError::Failed(format!("ca cert parse: {e}")))?;
        let issuer_cert = issuer_params
            .self_signed(&ca_key)
            .map_err(|e| SignerError::Failed(format!("issuer rebuild: {e}")))?;

        // Fresh leaf key per issuance; no de-duplication across calls.
        let leaf_pem = keys::generate_rsa_key_pem(self.leaf_key_bits)
            .map_err(|e| SignerError::Failed(format!("leaf key: {e}")))?;
        let leaf_key = KeyPair::from_pem_and_sign_algo(&leaf_pem, &PKCS_RSA_SHA256)
            .map_err(|e| SignerError::Failed(format!("leaf key parse: {e}")))?;

        let mut params = CertificateParams::new(vec![host.hostname.clone()])
            .map_err(|e| SignerError::Failed(format!("leaf params: {e}")))?;
        params
            .distinguished_name
            .push(DnType::CommonName, host.hostname.as_str());
        for ip in ips {
            params.subject_alt_names.push(SanType::IpAddress(ip));
        }

        let not_before = chrono::Utc::now();
        let not_after = not_before + chrono::Duration::days(self.leaf_validity_days);
        params.not_before = time::OffsetDateTime::from_unix_timestamp(not_before.timestamp())
            .unwrap_or(time::OffsetDateTime::now_utc());
        params.not_after = time::OffsetDateTime::from_unix_timestamp(not_after.timestamp())
            .unwrap_or(time::OffsetDateTime::now_utc());

        let leaf_cert = params
            .signed_by(&leaf_key, &issuer_cert, &ca_key)
            .map_err(|e| SignerError::Failed(format!("leaf signing: {e}")))?;

        let cert_pem = leaf_cert.pem();
        let export = ExportBundle {
            key_pem: (*leaf_pem).clone(),
            cert_pem: cert_pem.clone(),
            ca_pem: ca.ca_cert_pem.clone(),
        };
        let sealed = seal_bundle(&export, &ca.export_passphrase)
            .map_err(|e| SignerError::Failed(format!("export sealing: {e}")))?;

        tracing::debug!(hostname = %host.hostname, sans = %host.san_line(), "Leaf certificate signed");

        Ok(SignedBundle {
            cert_pem_b64: b64_encode(cert_pem.as_bytes()),
            p12_b64: b64_encode(&sealed),
        })
    }
}
