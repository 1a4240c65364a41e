//! Credential-at-rest envelope encryption for notification secrets.
//!
//! Secrets are encrypted with AES-256-GCM when a key is configured
//! (`RUNNERD_CREDENTIAL_KEY`, 64 hex chars). Without a key, values are
//! stored as given — this is a deliberately degraded mode, not an error,
//! matching the spec's "encrypted if a key is available".

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

const PREFIX: &str = "enc:";
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct Envelope {
    cipher: Option<Aes256Gcm>,
}

impl Envelope {
    pub fn from_hex_key(hex_key: Option<&str>) -> Self {
        let cipher = hex_key.and_then(|k| {
            let bytes = hex::decode(k).ok()?;
            if bytes.len() != 32 {
                tracing::warn!("RUNNERD_CREDENTIAL_KEY must decode to 32 bytes; ignoring");
                return None;
            }
            Some(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)))
        });
        Self { cipher }
    }

    pub fn none() -> Self {
        Self { cipher: None }
    }

    /// Encrypts non-empty plaintext when a key is configured; returns the
    /// input unchanged otherwise (including always for empty strings).
    pub fn seal(&self, plaintext: &str) -> String {
        let Some(cipher) = &self.cipher else {
            return plaintext.to_string();
        };
        if plaintext.is_empty() {
            return String::new();
        }
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        match cipher.encrypt(nonce, plaintext.as_bytes()) {
            Ok(ciphertext) => {
                let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                blob.extend_from_slice(&nonce_bytes);
                blob.extend_from_slice(&ciphertext);
                format!("{PREFIX}{}", BASE64.encode(blob))
            }
            Err(err) => {
                tracing::warn!(error = %err, "credential encryption failed, storing as plaintext");
                plaintext.to_string()
            }
        }
    }

    /// Decrypts a value sealed by `seal`. Values without the envelope
    /// prefix (legacy plaintext, or sealed with no key available) are
    /// returned unchanged.
    pub fn open(&self, stored: &str) -> String {
        let Some(rest) = stored.strip_prefix(PREFIX) else {
            return stored.to_string();
        };
        let Some(cipher) = &self.cipher else {
            return stored.to_string();
        };
        let Ok(blob) = BASE64.decode(rest) else {
            return stored.to_string();
        };
        if blob.len() < NONCE_LEN {
            return stored.to_string();
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        match cipher.decrypt(nonce, ciphertext) {
            Ok(plain) => String::from_utf8(plain).unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %err, "credential decryption failed");
                String::new()
            }
        }
    }
}
