//! Ed25519 request signing for the wallet service.
//!
//! Keys are kept as base58 [`SecretString`]s and only parsed into a
//! [`SigningKey`] for the duration of a signature.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::domain::{AppError, ValidationError};

/// Parse a base58-encoded key (32-byte seed or 64-byte keypair).
fn signing_key_from_secret(secret: &SecretString) -> Result<SigningKey, AppError> {
    let key_bytes = bs58::decode(secret.expose_secret())
        .into_vec()
        .map_err(|e| ValidationError::InvalidFormat(format!("signing key: {e}")))?;

    let key_array: [u8; 32] = match key_bytes.len() {
        64 => key_bytes[..32]
            .try_into()
            .map_err(|_| ValidationError::InvalidFormat("invalid keypair format".to_string()))?,
        32 => key_bytes.try_into().map_err(|v: Vec<u8>| {
            ValidationError::InvalidFormat(format!("key must be 32 bytes, got {}", v.len()))
        })?,
        n => {
            return Err(ValidationError::InvalidFormat(format!(
                "key must be 32 or 64 bytes, got {n}"
            ))
            .into());
        }
    };

    Ok(SigningKey::from_bytes(&key_array))
}

/// Generates a fresh base58-encoded Ed25519 key.
#[must_use]
pub fn generate_key() -> SecretString {
    let key = SigningKey::generate(&mut OsRng);
    SecretString::from(bs58::encode(key.to_bytes()).into_string())
}

/// Base58 public key of a base58 secret key.
pub fn public_key(secret: &SecretString) -> Result<String, AppError> {
    let key = signing_key_from_secret(secret)?;
    Ok(bs58::encode(key.verifying_key().as_bytes()).into_string())
}

/// Copayer identity derived from a request public key.
#[must_use]
pub fn copayer_id(request_public_key: &str) -> String {
    let digest = Sha256::digest(request_public_key.as_bytes());
    bs58::encode(digest).into_string()
}

/// Signs `message` and returns the base58 signature.
pub fn sign(secret: &SecretString, message: &[u8]) -> Result<String, AppError> {
    let key = signing_key_from_secret(secret)?;
    Ok(bs58::encode(key.sign(message).to_bytes()).into_string())
}

/// The message covered by `x-signature`.
#[must_use]
pub fn request_message(method: &str, path: &str, body: &str) -> String {
    format!("{}|{}|{}", method.to_lowercase(), path, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[test]
    fn test_signature_verifies_against_public_key() {
        let secret = generate_key();
        let message = request_message("POST", "/v4/addresses", "{}");

        let signature = sign(&secret, message.as_bytes()).unwrap();

        let public: [u8; 32] = bs58::decode(public_key(&secret).unwrap())
            .into_vec()
            .unwrap()
            .try_into()
            .unwrap();
        let signature: [u8; 64] = bs58::decode(signature)
            .into_vec()
            .unwrap()
            .try_into()
            .unwrap();
        let verifying = VerifyingKey::from_bytes(&public).unwrap();
        assert!(
            verifying
                .verify(message.as_bytes(), &Signature::from_bytes(&signature))
                .is_ok()
        );
    }

    #[test]
    fn test_signing_is_deterministic() {
        let secret = generate_key();
        assert_eq!(
            sign(&secret, b"same").unwrap(),
            sign(&secret, b"same").unwrap()
        );
        assert_ne!(
            sign(&secret, b"same").unwrap(),
            sign(&secret, b"other").unwrap()
        );
    }

    #[test]
    fn test_keypair_format_is_accepted() {
        let key = SigningKey::generate(&mut OsRng);
        let keypair = SecretString::from(bs58::encode(key.to_keypair_bytes()).into_string());
        let seed = SecretString::from(bs58::encode(key.to_bytes()).into_string());

        assert_eq!(public_key(&keypair).unwrap(), public_key(&seed).unwrap());
    }

    #[test]
    fn test_invalid_keys_are_rejected() {
        assert!(public_key(&SecretString::from("not-base58-0OIl")).is_err());
        let short = SecretString::from(bs58::encode([1u8; 16]).into_string());
        assert!(matches!(
            public_key(&short),
            Err(AppError::Validation(ValidationError::InvalidFormat(_)))
        ));
    }

    #[test]
    fn test_copayer_id_is_stable() {
        assert_eq!(copayer_id("abc"), copayer_id("abc"));
        assert_ne!(copayer_id("abc"), copayer_id("abd"));
    }

    #[test]
    fn test_request_message_format() {
        assert_eq!(
            request_message("GET", "/v1/balance/", ""),
            "get|/v1/balance/|"
        );
    }
}
