//! Field-level authenticated encryption for at-rest storage.
//!
//! Key = PBKDF2-HMAC-SHA256(passphrase, salt, 100 000 iterations). The cipher
//! is HMAC-SHA256 used as a keystream in counter mode, with an
//! encrypt-then-MAC tag over `nonce || ciphertext`. Record format:
//! `base64(nonce(16) || ciphertext || tag(32))`.
//!
//! This defends against casual file-level inspection of the database. It is
//! not a substitute for OS-level disk encryption, and embeddings stay in
//! plaintext (queries and indexes depend on them).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{MeshError, Result};

/// Salt length persisted in the store's meta table.
pub const SALT_LEN: usize = 16;
/// Derived key length (256-bit).
pub const KEY_LEN: usize = 32;
/// Per-record nonce length.
const NONCE_LEN: usize = 16;
/// HMAC-SHA256 tag length.
const TAG_LEN: usize = 32;
/// OWASP-recommended minimum for PBKDF2-SHA256.
const PBKDF2_ITERATIONS: u32 = 100_000;

type HmacSha256 = Hmac<Sha256>;

/// A derived field-encryption key.
#[derive(Clone)]
pub struct FieldKey([u8; KEY_LEN]);

impl FieldKey {
    /// Derive a key from a passphrase and a persisted salt.
    ///
    /// One-time cost of roughly 100 ms; callers should derive once per store
    /// open and reuse the key.
    pub fn derive(passphrase: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        Self(key)
    }
}

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldKey(..)")
    }
}

/// Generate a fresh random salt for a new store.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

fn keystream_block(key: &FieldKey, nonce: &[u8], counter: u32) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key.0).expect("hmac accepts any key size");
    mac.update(nonce);
    mac.update(&counter.to_be_bytes());
    mac.finalize().into_bytes().into()
}

fn apply_keystream(key: &FieldKey, nonce: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (counter, chunk) in data.chunks(32).enumerate() {
        let block = keystream_block(key, nonce, counter as u32);
        out.extend(chunk.iter().zip(block.iter()).map(|(d, k)| d ^ k));
    }
    out
}

fn compute_tag(key: &FieldKey, nonce: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key.0).expect("hmac accepts any key size");
    mac.update(nonce);
    mac.update(ciphertext);
    mac.finalize().into_bytes().into()
}

/// Encrypt a string field. Returns `base64(nonce || ciphertext || tag)`.
pub fn encrypt_field(plaintext: &str, key: &FieldKey) -> String {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = apply_keystream(key, &nonce, plaintext.as_bytes());
    let tag = compute_tag(key, &nonce, &ciphertext);

    let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
    record.extend_from_slice(&nonce);
    record.extend_from_slice(&ciphertext);
    record.extend_from_slice(&tag);
    BASE64.encode(record)
}

/// Decrypt a field produced by [`encrypt_field`].
///
/// The tag is verified in constant time before any decryption happens; a
/// mismatch means the record was tampered with or the passphrase is wrong.
pub fn decrypt_field(record_b64: &str, key: &FieldKey) -> Result<String> {
    let raw = BASE64
        .decode(record_b64)
        .map_err(|e| MeshError::Encryption(format!("bad base64 record: {e}")))?;

    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(MeshError::Encryption(
            "record too short to contain nonce and tag".into(),
        ));
    }

    let nonce = &raw[..NONCE_LEN];
    let tag = &raw[raw.len() - TAG_LEN..];
    let ciphertext = &raw[NONCE_LEN..raw.len() - TAG_LEN];

    // Mac::verify_slice is constant-time.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key.0).expect("hmac accepts any key size");
    mac.update(nonce);
    mac.update(ciphertext);
    mac.verify_slice(tag).map_err(|_| {
        MeshError::Encryption("authentication failed: record tampered with or wrong passphrase".into())
    })?;

    let plaintext = apply_keystream(key, nonce, ciphertext);
    String::from_utf8(plaintext)
        .map_err(|e| MeshError::Encryption(format!("decrypted bytes are not UTF-8: {e}")))
}
