use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Base64-encode with the standard alphabet.
pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard-alphabet base64.
pub fn b64_decode(input: &str) -> Result<Vec<u8>, String> {
    STANDARD
        .decode(input.trim())
        .map_err(|e| format!("invalid base64: {e}"))
}
