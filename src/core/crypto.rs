//! Payload integrity and confidentiality helpers.
//!
//! Integrity uses HMAC-SHA256 with a hex encoded tag carried in the
//! `HashSHA256` header. Confidentiality uses RSA-OAEP with SHA-256; payloads
//! larger than one OAEP block are encrypted block by block and the
//! ciphertexts concatenated.

use crate::core::{CollectorError, Result};
use hmac::{Hmac, Mac};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex encoded keyed hash.
pub const HASH_HEADER: &str = "HashSHA256";

/// OAEP overhead with SHA-256: two digests plus two marker bytes.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// Compute the hex encoded HMAC-SHA256 of `body`.
pub fn sign(key: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CollectorError::crypto(format!("invalid HMAC key: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex encoded tag against `body` in constant time.
pub fn verify(key: &[u8], body: &[u8], tag: &str) -> Result<()> {
    let expected = hex::decode(tag.trim()).map_err(|_| CollectorError::Integrity)?;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CollectorError::crypto(format!("invalid HMAC key: {e}")))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| CollectorError::Integrity)
}

/// Read an RSA public key from a PEM file (PKCS#1 or SPKI).
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPublicKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(&pem))
        .map_err(|e| {
            CollectorError::crypto(format!("failed to parse public key {}: {e}", path.display()))
        })
}

/// Read an RSA private key from a PEM file (PKCS#1 or PKCS#8).
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| {
            CollectorError::crypto(format!("failed to parse private key {}: {e}", path.display()))
        })
}

/// Encrypt an arbitrary sized payload with RSA-OAEP(SHA-256).
pub fn encrypt(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let block = key.size();
    let chunk = block
        .checked_sub(OAEP_SHA256_OVERHEAD)
        .filter(|n| *n > 0)
        .ok_or_else(|| CollectorError::crypto("RSA key too small for OAEP-SHA256"))?;

    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(plaintext.len().div_ceil(chunk).max(1) * block);
    // An empty payload still produces one block so decryption stays symmetric.
    let chunks: Vec<&[u8]> = if plaintext.is_empty() {
        vec![plaintext]
    } else {
        plaintext.chunks(chunk).collect()
    };
    for part in chunks {
        let sealed = key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), part)
            .map_err(|e| CollectorError::crypto(format!("encryption failed: {e}")))?;
        out.extend_from_slice(&sealed);
    }
    Ok(out)
}

/// Reverse of [`encrypt`].
pub fn decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let block = key.size();
    if ciphertext.is_empty() || ciphertext.len() % block != 0 {
        return Err(CollectorError::crypto(format!(
            "ciphertext length {} is not a multiple of the key size {block}",
            ciphertext.len()
        )));
    }

    let mut out = Vec::with_capacity(ciphertext.len());
    for part in ciphertext.chunks(block) {
        let opened = key
            .decrypt(Oaep::new::<Sha256>(), part)
            .map_err(|e| CollectorError::crypto(format!("decryption failed: {e}")))?;
        out.extend_from_slice(&opened);
    }
    Ok(out)
}
