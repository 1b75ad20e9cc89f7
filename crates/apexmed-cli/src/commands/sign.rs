use std::fs;

use apexmed_core::{sign_base64, SignatureVerifier};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::SigningKey;
use serde_json::json;

use crate::cli::SignArgs;
use crate::error::CliError;

use super::CommandResult;

pub fn run(args: &SignArgs) -> Result<CommandResult, CliError> {
    let key = signing_key(&args.seed)?;
    let body = fs::read(&args.body)?;

    Ok(CommandResult::ok(json!({
        "signature": sign_base64(&key, &body),
        "publicKey": SignatureVerifier::new(key.verifying_key()).public_key_base64(),
    })))
}

fn signing_key(seed_b64: &str) -> Result<SigningKey, CliError> {
    let seed = STANDARD
        .decode(seed_b64.trim())
        .map_err(|e| CliError::Command(format!("seed is not valid base64: {e}")))?;
    let seed: [u8; 32] = seed
        .try_into()
        .map_err(|raw: Vec<u8>| CliError::Command(format!("seed must be 32 bytes, got {}", raw.len())))?;
    Ok(SigningKey::from_bytes(&seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_with_printed_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body_path = dir.path().join("bundle.json");
        fs::write(&body_path, br#"{"version":1,"rolloutPercent":100}"#).expect("write body");
        let args = SignArgs {
            body: body_path,
            seed: STANDARD.encode([9u8; 32]),
        };

        let data = run(&args).expect("signed").data;
        let verifier =
            SignatureVerifier::from_base64(data["publicKey"].as_str().expect("key")).expect("key");

        verifier
            .verify(
                br#"{"version":1,"rolloutPercent":100}"#,
                data["signature"].as_str().expect("signature"),
            )
            .expect("signature verifies");
    }

    #[test]
    fn short_seed_is_rejected() {
        let error = signing_key(&STANDARD.encode([1u8; 16])).expect_err("short seed");
        assert!(error.to_string().contains("32 bytes"));
    }
}
