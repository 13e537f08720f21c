//! Integrity checks for traffic between us and the payment provider.
//!
//! Inbound: the provider signs every callback body with HMAC-SHA256 using a shared secret and sends the digest as a
//! hex string. [`verify_checksum`] recomputes the digest and compares it in constant time.
//!
//! Outbound: short payloads destined for the provider are encrypted with the provider's RSA public key using PKCS#1
//! v1.5 padding (see [`encrypt_for_transmission`]). Providers hand out their key either as a proper PEM document or
//! as a naked base64 blob, so both are accepted.

use hmac::{Hmac, Mac};
use log::*;
use pss_common::Secret;
use rsa::{pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, Pkcs1v15Encrypt, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";
const PEM_LINE_WIDTH: usize = 64;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("The public key is malformed. {0}")]
    MalformedKey(String),
    #[error("No provider public key has been configured.")]
    NoKeyConfigured,
    #[error("Could not encrypt the payload. {0}")]
    EncryptionFailed(#[from] rsa::Error),
}

fn keyed_mac(secret: &[u8]) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(secret)
        .map_err(|e| error!("🔐️ HMAC rejected the key. {e}"))
        .ok()
}

/// Computes the HMAC-SHA256 of `payload` keyed with `secret`, as lowercase hex.
pub fn compute_checksum(payload: &[u8], secret: &[u8]) -> String {
    match keyed_mac(secret) {
        Some(mut mac) => {
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        },
        // HMAC accepts keys of any length, so this branch is unreachable in practice
        None => String::default(),
    }
}

/// Returns true iff `provided` is the hex HMAC-SHA256 of `payload` under `secret`. Case-insensitive. Never fails: any
/// malformed checksum is simply a mismatch. The digest comparison runs in constant time.
pub fn verify_checksum(payload: &[u8], secret: &[u8], provided: &str) -> bool {
    let provided = match hex::decode(provided.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("🔐️ Checksum is not valid hex. {e}");
            return false;
        },
    };
    match keyed_mac(secret) {
        Some(mut mac) => {
            mac.update(payload);
            mac.verify_slice(&provided).is_ok()
        },
        None => false,
    }
}

/// Wraps a raw base64 public key in PEM armour. Keys that already carry a PEM header are returned trimmed but
/// otherwise untouched.
pub fn normalize_public_key(key: &str) -> String {
    let key = key.trim();
    if key.starts_with("-----BEGIN") {
        return key.to_string();
    }
    let body = key.chars().filter(|c| !c.is_whitespace()).collect::<Vec<char>>();
    let lines = body.chunks(PEM_LINE_WIDTH).map(|c| c.iter().collect::<String>()).collect::<Vec<String>>();
    format!("{PEM_HEADER}\n{}\n{PEM_FOOTER}\n", lines.join("\n"))
}

/// Parses an RSA public key from PEM (SPKI or PKCS#1) or from a raw base64 SPKI block.
pub fn parse_public_key(key: &str) -> Result<RsaPublicKey, EncryptionError> {
    let pem = normalize_public_key(key);
    if pem.starts_with("-----BEGIN RSA PUBLIC KEY-----") {
        RsaPublicKey::from_pkcs1_pem(&pem).map_err(|e| EncryptionError::MalformedKey(e.to_string()))
    } else {
        RsaPublicKey::from_public_key_pem(&pem).map_err(|e| EncryptionError::MalformedKey(e.to_string()))
    }
}

/// Encrypts `data` for the provider with RSA PKCS#1 v1.5 and returns the ciphertext as base64.
pub fn encrypt_for_transmission(data: &str, public_key: &str) -> Result<String, EncryptionError> {
    let key = parse_public_key(public_key)?;
    encrypt_with_key(data, &key)
}

fn encrypt_with_key(data: &str, key: &RsaPublicKey) -> Result<String, EncryptionError> {
    let mut rng = rand::thread_rng();
    let ciphertext = key.encrypt(&mut rng, Pkcs1v15Encrypt, data.as_bytes())?;
    Ok(base64::encode(ciphertext))
}

/// Holds the key material for one provider integration.
///
/// The provider public key is parsed once, when the verifier is built, so that a bad key is a startup error rather
/// than a per-request one.
#[derive(Clone, Debug)]
pub struct IntegrityVerifier {
    secret: Secret<String>,
    provider_key: Option<RsaPublicKey>,
}

impl IntegrityVerifier {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret, provider_key: None }
    }

    pub fn with_provider_key(mut self, public_key: &str) -> Result<Self, EncryptionError> {
        let key = parse_public_key(public_key)?;
        self.provider_key = Some(key);
        Ok(self)
    }

    pub fn checksum(&self, payload: &[u8]) -> String {
        compute_checksum(payload, self.secret.reveal().as_bytes())
    }

    pub fn verify(&self, payload: &[u8], provided: &str) -> bool {
        verify_checksum(payload, self.secret.reveal().as_bytes(), provided)
    }

    pub fn encrypt_for_provider(&self, data: &str) -> Result<String, EncryptionError> {
        let key = self.provider_key.as_ref().ok_or(EncryptionError::NoKeyConfigured)?;
        encrypt_with_key(data, key)
    }
}
