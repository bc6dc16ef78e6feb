//! CA bootstrap: key custody, artifact publication, policy hardening.
//!
//! Runs once. Generates the CA key pair and self-signed certificate in
//! a scratch area (process memory), uploads the artifacts, installs the
//! envelope-encrypted passphrase into the issuance service, and finally
//! ratchets down the envelope key's own policy so no future process can
//! mint new ciphertexts under it.

use std::path::PathBuf;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
    PKCS_RSA_SHA256};
use zeroize::Zeroizing;

use certfleet_common::encoding::b64_encode;
use certfleet_crypto::keys::{self, DEFAULT_CA_KEY_BITS};

use crate::config::{CA_CERT_OBJECT_KEY, CA_KEY_OBJECT_KEY};
use crate::error::SetupError;
use crate::issuance::CertIssuer;
use crate::providers::{ArtifactStore, EnvelopeKeyService, KeyAction, ProviderError};

/// CA certificate validity: exactly ten years.
pub const CA_VALIDITY_DAYS: i64 = 3650;

/// Byte length of the randomness drawn for the CA passphrase.
const CA_PASSPHRASE_BYTES: usize = 128;

/// Knobs for [`initialize_ca`].
#[derive(Debug, Clone)]
pub struct CaOptions {
    /// RSA modulus size for the CA key.
    pub key_bits: usize,
    /// When set, the certificate and encrypted key are also left on
    /// local disk and the passphrase is surfaced once to the operator.
    /// Otherwise nothing outlives the call except the uploaded artifacts.
    pub retain_dir: Option<PathBuf>,
}

impl Default for CaOptions {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_CA_KEY_BITS,
            retain_dir: None,
        }
    }
}

/// The durable CA state produced by bootstrap.
#[derive(Debug, Clone)]
pub struct CaArtifact {
    pub cert_pem: String,
    /// Encrypted private key container, as uploaded.
    pub encrypted_key: Vec<u8>,
    /// CA passphrase ciphertext under the envelope key.
    pub passphrase_ciphertext: Vec<u8>,
}

/// Result of [`initialize_ca`].
pub struct CaInitOutcome {
    pub artifact: CaArtifact,
    /// Present only when local retention was requested. Display once,
    /// then drop; it zeroizes itself.
    pub operator_passphrase: Option<Zeroizing<String>>,
}

/// Build the CA certificate parameters for a region.
fn build_ca_params(region: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, format!("ipsec.{region}"));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let not_before = chrono::Utc::now();
    let not_after = not_before + chrono::Duration::days(CA_VALIDITY_DAYS);
    params.not_before = time::OffsetDateTime::from_unix_timestamp(not_before.timestamp())
        .unwrap_or(time::OffsetDateTime::now_utc());
    params.not_after = time::OffsetDateTime::from_unix_timestamp(not_after.timestamp())
        .unwrap_or(time::OffsetDateTime::now_utc());
    params
}

/// Create the CA and wire its credentials into the issuance service.
///
/// Ordering is an invariant: artifacts are uploaded before the
/// passphrase ciphertext referencing them is installed, and policy
/// hardening runs last. A hardening failure is surfaced as a hard error
/// but does not roll back the earlier steps: the CA exists, and the
/// operator must finish revoking encrypt capability.
pub fn initialize_ca(
    region: &str,
    ca_bucket: &str,
    envelope_key_id: &str,
    store: &dyn ArtifactStore,
    envelope: &dyn EnvelopeKeyService,
    issuer: &CertIssuer,
    options: &CaOptions,
) -> Result<CaInitOutcome, SetupError> {
    // 1. Passphrase from the envelope service's randomness primitive.
    //    Lives in memory only, zeroized on drop, never logged.
    let random = envelope
        .generate_random(CA_PASSPHRASE_BYTES)
        .map_err(SetupError::Envelope)?;
    let passphrase = Zeroizing::new(b64_encode(&random));
    tracing::info!(bytes = CA_PASSPHRASE_BYTES, "CA passphrase generated");

    // 2. Key pair and self-signed certificate, in scratch memory.
    let key_pem = keys::generate_rsa_key_pem(options.key_bits)?;
    let ca_key = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)
        .map_err(|e| SetupError::Certificate(e.to_string()))?;
    let params = build_ca_params(region);
    let ca_cert = params
        .self_signed(&ca_key)
        .map_err(|e| SetupError::Certificate(e.to_string()))?;
    let cert_pem = ca_cert.pem();

    let encrypted_key = keys::encrypt_bytes(key_pem.as_bytes(), &passphrase)?
        .to_json()?;
    tracing::info!(region, "CA certificate generated, subject CN=ipsec.{region}, valid {CA_VALIDITY_DAYS} days");

    // 3. Publish artifacts. Upload failure aborts before any credential
    //    referencing them is wired in.
    store
        .put(ca_bucket, CA_KEY_OBJECT_KEY, &encrypted_key)
        .map_err(SetupError::Upload)?;
    store
        .put(ca_bucket, CA_CERT_OBJECT_KEY, cert_pem.as_bytes())
        .map_err(SetupError::Upload)?;
    tracing::info!(ca_bucket, "CA artifacts uploaded");

    // 4. Seal the passphrase and install it into the issuance service
    //    as one whole-object reconfigure.
    let passphrase_ciphertext = envelope
        .encrypt(envelope_key_id, passphrase.as_bytes())
        .map_err(SetupError::Envelope)?;
    let mut config = issuer.config_snapshot();
    config.ca_passphrase_ciphertext = Some(passphrase_ciphertext.clone());
    issuer.reconfigure(config);
    tracing::info!("Issuance service configured with CA passphrase ciphertext");

    // 5. Optional local retention, written before hardening so a
    //    hardening failure leaves the artifacts on disk for the
    //    operator's manual follow-up.
    let operator_passphrase = match &options.retain_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            std::fs::write(dir.join(CA_CERT_OBJECT_KEY), cert_pem.as_bytes())?;
            std::fs::write(dir.join(CA_KEY_OBJECT_KEY), &encrypted_key)?;
            tracing::info!(dir = %dir.display(), "CA artifacts retained locally");
            Some(passphrase)
        }
        None => None,
    };

    // 6. Harden the envelope key policy, last and irreversibly.
    harden_key_policy(envelope, envelope_key_id).map_err(SetupError::PolicyHardening)?;

    Ok(CaInitOutcome {
        artifact: CaArtifact {
            cert_pem,
            encrypted_key,
            passphrase_ciphertext,
        },
        operator_passphrase,
    })
}

/// Revoke the encrypt grant on the envelope key policy.
///
/// Terminal and idempotent: a policy already lacking the grant is left
/// untouched, so rerunning bootstrap tooling does not fail here. Once
/// revoked, no principal can mint new ciphertexts under this key, at
/// the cost that the passphrase can never be rotated without a new CA.
pub fn harden_key_policy(
    envelope: &dyn EnvelopeKeyService,
    key_id: &str,
) -> Result<(), ProviderError> {
    let mut policy = envelope.get_key_policy(key_id)?;
    if !policy.allowed_actions.remove(&KeyAction::Encrypt) {
        tracing::debug!(key_id, "Key policy already hardened");
        return Ok(());
    }
    envelope.put_key_policy(key_id, &policy)?;
    tracing::info!(key_id, "Key policy hardened, encrypt grant removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IssuanceConfig;
    use crate::providers::memory::{MemoryArtifactStore, MemoryInventory, MemoryKeyService};
    use crate::testkit::StubSigner;
    use std::sync::Arc;
    use x509_parser::pem::parse_x509_pem;

    const TEST_KEY_BITS: usize = 2048;

    fn test_issuer(
        store: Arc<MemoryArtifactStore>,
        envelope: Arc<MemoryKeyService>,
    ) -> CertIssuer {
        CertIssuer::new(
            store,
            envelope,
            Arc::new(MemoryInventory::new()),
            Box::new(StubSigner::default()),
            IssuanceConfig::new("crypto", "certs", "export-key"),
        )
    }

    fn bootstrap() -> (Arc<MemoryArtifactStore>, Arc<MemoryKeyService>, CertIssuer, CaInitOutcome)
    {
        let store = Arc::new(MemoryArtifactStore::with_buckets(
            "eu-west-1",
            &["crypto", "certs"],
        ));
        let envelope = Arc::new(MemoryKeyService::new().with_key("ca-key").with_key("export-key"));
        let issuer = test_issuer(store.clone(), envelope.clone());
        let outcome = initialize_ca(
            "eu-west-1",
            "crypto",
            "ca-key",
            store.as_ref(),
            envelope.as_ref(),
            &issuer,
            &CaOptions {
                key_bits: TEST_KEY_BITS,
                retain_dir: None,
            },
        )
        .unwrap();
        (store, envelope, issuer, outcome)
    }

    #[test]
    fn ca_certificate_has_expected_subject_and_validity() {
        let (_, _, _, outcome) = bootstrap();
        let pem = parse_x509_pem(outcome.artifact.cert_pem.as_bytes())
            .unwrap()
            .1;
        let cert = pem.parse_x509().unwrap();

        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .unwrap()
            .as_str()
            .unwrap();
        assert_eq!(cn, "ipsec.eu-west-1");

        let validity = cert.validity();
        let lifetime = validity.not_after.timestamp() - validity.not_before.timestamp();
        assert_eq!(lifetime, CA_VALIDITY_DAYS * 86_400);
        assert!(cert.basic_constraints().unwrap().unwrap().value.ca);
    }

    #[test]
    fn artifacts_are_uploaded_under_canonical_keys() {
        let (store, _, _, outcome) = bootstrap();
        assert_eq!(
            store.get("crypto", CA_CERT_OBJECT_KEY).unwrap(),
            outcome.artifact.cert_pem.as_bytes()
        );
        assert_eq!(
            store.get("crypto", CA_KEY_OBJECT_KEY).unwrap(),
            outcome.artifact.encrypted_key
        );
    }

    #[test]
    fn issuer_receives_passphrase_ciphertext() {
        let (_, envelope, issuer, outcome) = bootstrap();
        let config = issuer.config_snapshot();
        let ciphertext = config.ca_passphrase_ciphertext.unwrap();
        assert_eq!(ciphertext, outcome.artifact.passphrase_ciphertext);

        // Round-trip: the ciphertext decrypts back to a base64 passphrase.
        let plaintext = envelope.decrypt(&ciphertext).unwrap();
        assert!(!plaintext.is_empty());
    }

    #[test]
    fn policy_loses_encrypt_grant_and_nothing_else() {
        let (_, envelope, _, _) = bootstrap();
        let policy = envelope.get_key_policy("ca-key").unwrap();
        assert!(!policy.allows(KeyAction::Encrypt));
        assert!(policy.allows(KeyAction::Decrypt));
        assert!(policy.allows(KeyAction::GenerateRandom));
        assert!(policy.allows(KeyAction::ManagePolicy));
    }

    #[test]
    fn hardening_is_idempotent() {
        let (_, envelope, _, _) = bootstrap();
        harden_key_policy(envelope.as_ref(), "ca-key").unwrap();
        harden_key_policy(envelope.as_ref(), "ca-key").unwrap();
        assert!(!envelope
            .get_key_policy("ca-key")
            .unwrap()
            .allows(KeyAction::Encrypt));
    }

    #[test]
    fn upload_failure_aborts_before_policy_hardening() {
        // No "crypto" bucket: uploads fail.
        let store = Arc::new(MemoryArtifactStore::with_buckets("eu-west-1", &["certs"]));
        let envelope = Arc::new(MemoryKeyService::new().with_key("ca-key"));
        let issuer = test_issuer(store.clone(), envelope.clone());

        let result = initialize_ca(
            "eu-west-1",
            "crypto",
            "ca-key",
            store.as_ref(),
            envelope.as_ref(),
            &issuer,
            &CaOptions {
                key_bits: TEST_KEY_BITS,
                retain_dir: None,
            },
        );
        assert!(matches!(result, Err(SetupError::Upload(_))));

        // Encrypt capability must remain, and no credential was wired in.
        assert!(envelope.get_key_policy("ca-key").unwrap().allows(KeyAction::Encrypt));
        assert!(issuer.config_snapshot().ca_passphrase_ciphertext.is_none());
    }

    #[test]
    fn hardening_failure_preserves_retained_artifacts() {
        let dir = std::env::temp_dir().join(format!("certfleet-ca-harden-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let store = Arc::new(MemoryArtifactStore::with_buckets("eu-west-1", &["crypto"]));
        let envelope = Arc::new(MemoryKeyService::new().with_key("ca-key"));
        // Drop the manage grant so the final hardening write is refused.
        let mut policy = envelope.get_key_policy("ca-key").unwrap();
        policy.allowed_actions.remove(&KeyAction::ManagePolicy);
        envelope.put_key_policy("ca-key", &policy).unwrap();
        let issuer = test_issuer(store.clone(), envelope.clone());

        let result = initialize_ca(
            "eu-west-1",
            "crypto",
            "ca-key",
            store.as_ref(),
            envelope.as_ref(),
            &issuer,
            &CaOptions {
                key_bits: TEST_KEY_BITS,
                retain_dir: Some(dir.clone()),
            },
        );
        assert!(matches!(result, Err(SetupError::PolicyHardening(_))));

        // Everything before hardening survives: uploaded artifacts,
        // retained files, and the installed passphrase ciphertext.
        assert!(store.get("crypto", CA_CERT_OBJECT_KEY).is_ok());
        assert!(dir.join(CA_CERT_OBJECT_KEY).exists());
        assert!(dir.join(CA_KEY_OBJECT_KEY).exists());
        assert!(issuer.config_snapshot().ca_passphrase_ciphertext.is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn retention_surfaces_passphrase_and_writes_files() {
        let dir = std::env::temp_dir().join(format!("certfleet-ca-retain-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let store = Arc::new(MemoryArtifactStore::with_buckets("eu-west-1", &["crypto"]));
        let envelope = Arc::new(MemoryKeyService::new().with_key("ca-key"));
        let issuer = test_issuer(store.clone(), envelope.clone());

        let outcome = initialize_ca(
            "eu-west-1",
            "crypto",
            "ca-key",
            store.as_ref(),
            envelope.as_ref(),
            &issuer,
            &CaOptions {
                key_bits: TEST_KEY_BITS,
                retain_dir: Some(dir.clone()),
            },
        )
        .unwrap();

        assert!(outcome.operator_passphrase.is_some());
        assert!(dir.join(CA_CERT_OBJECT_KEY).exists());
        assert!(dir.join(CA_KEY_OBJECT_KEY).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
