//! RSA key generation and encryption at rest.
//!
//! The CA private key is encrypted with Argon2id (KDF) + AES-256-GCM
//! before it leaves process memory. The passphrase itself is custodied
//! by the envelope key service, never stored in cleartext.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Salt length for Argon2id key derivation.
const SALT_LEN: usize = 16;

/// Nonce length for AES-256-GCM.
const NONCE_LEN: usize = 12;

/// Key size for newly generated CA keys.
pub const DEFAULT_CA_KEY_BITS: usize = 4096;

/// Encrypted key material as persisted in the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub ciphertext: Vec<u8>,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl EncryptedKey {
    /// Serialize for upload as an artifact-store object body.
    pub fn to_json(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(self).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Parse an artifact-store object body back into key material.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CryptoError> {
        serde_json::from_slice(bytes).map_err(|e| CryptoError::Serialization(e.to_string()))
    }
}

/// Generate an RSA private key and export it as PKCS#8 PEM.
///
/// The returned string is zeroized on drop; callers hold it only long
/// enough to encrypt it for storage.
pub fn generate_rsa_key_pem(bits: usize) -> Result<Zeroizing<String>, CryptoError> {
    let key =
        RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    tracing::debug!(bits, "RSA private key generated");
    Ok(pem)
}

/// Encrypt arbitrary bytes with passphrase-derived AES-256-GCM.
pub fn encrypt_bytes(plaintext: &[u8], passphrase: &str) -> Result<EncryptedKey, CryptoError> {
    let mut salt = vec![0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let mut nonce_bytes = vec![0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let aes_key = derive_aes_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&aes_key)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let nonce_arr: [u8; NONCE_LEN] = nonce_bytes
        .clone()
        .try_into()
        .expect("nonce is always NONCE_LEN bytes");
    let nonce = Nonce::from(nonce_arr);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedKey {
        ciphertext,
        salt,
        nonce: nonce_bytes,
    })
}

/// Decrypt bytes encrypted with `encrypt_bytes`. The plaintext is
/// zeroized on drop.
pub fn decrypt_bytes(
    encrypted: &EncryptedKey,
    passphrase: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let aes_key = derive_aes_key(passphrase, &encrypted.salt)?;
    let cipher = Aes256Gcm::new_from_slice(&aes_key)
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;

    let nonce_arr: [u8; NONCE_LEN] = encrypted
        .nonce
        .clone()
        .try_into()
        .map_err(|_| CryptoError::Decryption("invalid nonce length".into()))?;
    let nonce = Nonce::from(nonce_arr);
    let plaintext = cipher
        .decrypt(&nonce, encrypted.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption("decryption failed (wrong passphrase?)".into()))?;

    Ok(Zeroizing::new(plaintext))
}

/// Derive a 256-bit AES key from a passphrase using Argon2id.
fn derive_aes_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key generation: {0}")]
    KeyGeneration(String),
    #[error("key encoding: {0}")]
    KeyEncoding(String),
    #[error("encryption: {0}")]
    Encryption(String),
    #[error("decryption: {0}")]
    Decryption(String),
    #[error("key derivation: {0}")]
    KeyDerivation(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_is_pkcs8_pem() {
        let pem = generate_rsa_key_pem(2048).unwrap();
        assert!(pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let secret = b"the ca private key material";
        let encrypted = encrypt_bytes(secret, "test-passphrase-123").unwrap();
        let decrypted = decrypt_bytes(&encrypted, "test-passphrase-123").unwrap();
        assert_eq!(decrypted.as_slice(), secret);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let encrypted = encrypt_bytes(b"secret", "correct").unwrap();
        assert!(decrypt_bytes(&encrypted, "wrong").is_err());
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        let secret = b"plaintext material";
        let encrypted = encrypt_bytes(secret, "pass").unwrap();
        assert_ne!(encrypted.ciphertext.as_slice(), secret.as_slice());
    }

    #[test]
    fn json_round_trip_preserves_key_material() {
        let encrypted = encrypt_bytes(b"payload", "pass").unwrap();
        let json = encrypted.to_json().unwrap();
        let parsed = EncryptedKey::from_json(&json).unwrap();
        let decrypted = decrypt_bytes(&parsed, "pass").unwrap();
        assert_eq!(decrypted.as_slice(), b"payload");
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(EncryptedKey::from_json(b"not json").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_decryption() {
        let mut encrypted = encrypt_bytes(b"payload", "pass").unwrap();
        encrypted.ciphertext[0] ^= 0xff;
        assert!(decrypt_bytes(&encrypted, "pass").is_err());
    }
}
