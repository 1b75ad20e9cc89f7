use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};

use crate::error::ConfigError;

/// Response header carrying the base64 detached signature.
pub const SIGNATURE_HEADER: &str = "x-config-sig";

/// Verifies detached Ed25519 signatures over raw config bodies.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Build from a base64-encoded 32-byte public key.
    pub fn from_base64(public_key: &str) -> Result<Self, ConfigError> {
        let bytes = STANDARD
            .decode(public_key.trim())
            .map_err(|e| ConfigError::InvalidPublicKey(e.to_string()))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            ConfigError::InvalidPublicKey(format!(
                "expected {PUBLIC_KEY_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| ConfigError::InvalidPublicKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    pub fn verify(&self, body: &[u8], signature_b64: &str) -> Result<(), ConfigError> {
        let bytes = STANDARD
            .decode(signature_b64.trim())
            .map_err(|_| ConfigError::SignatureEncoding)?;
        let signature = Signature::from_slice(&bytes).map_err(|_| ConfigError::BadSignature)?;
        self.key
            .verify(body, &signature)
            .map_err(|_| ConfigError::BadSignature)
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.key.as_bytes())
    }
}

/// Sign `body` and return the base64 signature for the config header.
pub fn sign_base64(key: &SigningKey, body: &[u8]) -> String {
    STANDARD.encode(key.sign(body).to_bytes())
}
