//! Cookie codec for tokens
//!
//! Tokens are XORed with a keystream derived from the shared cookie secret
//! and followed by a keyed SHA-256 tag over the obfuscated bytes:
//!
//! ```text
//! base64url(payload XOR keystream) "." base64url(tag[..16])
//! ```
//!
//! The keystream is `SHA256(key || counter)` blocks, so the obfuscated
//! payload has exactly the input length. This is obfuscation, not
//! encryption: the same token always encodes to the same string. The tag
//! only lets `open` reject values that were altered or sealed under another
//! secret, which callers treat exactly like a missing cookie.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::bundle::TokenBundle;

const TAG_LEN: usize = 16;

/// Symmetric token codec keyed by the cookie secret.
#[derive(Clone)]
pub struct TokenCodec {
    stream_key: [u8; 32],
    tag_key: [u8; 32],
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        let root: [u8; 32] = Sha256::digest(secret).into();
        Self {
            stream_key: derive(&root, b"keystream"),
            tag_key: derive(&root, b"integrity"),
        }
    }

    /// Obfuscate a single token string for cookie storage.
    pub fn seal(&self, plain: &str) -> String {
        let mut bytes = plain.as_bytes().to_vec();
        self.apply_keystream(&mut bytes);
        let tag = self.tag(&bytes);
        format!("{}.{}", URL_SAFE_NO_PAD.encode(&bytes), URL_SAFE_NO_PAD.encode(tag))
    }

    /// Reverse `seal`. `None` for malformed, tampered or foreign values.
    pub fn open(&self, sealed: &str) -> Option<String> {
        let Some((body, tag)) = sealed.split_once('.') else {
            debug!("cookie value has no integrity tag");
            return None;
        };
        let mut bytes = URL_SAFE_NO_PAD.decode(body).ok()?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
        if !constant_time_eq(&tag, &self.tag(&bytes)) {
            debug!("cookie value failed integrity check");
            return None;
        }
        self.apply_keystream(&mut bytes);
        String::from_utf8(bytes).ok()
    }

    /// Serialize and seal a whole token bundle.
    pub fn encode(&self, bundle: &TokenBundle) -> String {
        // Serializing a struct of strings and RFC 3339 timestamps cannot fail
        // for in-range dates; fall back to an empty payload that decodes to None.
        let json = serde_json::to_string(bundle).unwrap_or_default();
        self.seal(&json)
    }

    /// Open and parse a sealed bundle. `None` on any failure.
    pub fn decode(&self, sealed: &str) -> Option<TokenBundle> {
        let json = self.open(sealed)?;
        match serde_json::from_str(&json) {
            Ok(bundle) => Some(bundle),
            Err(e) => {
                debug!(error = %e, "sealed bundle did not parse");
                None
            }
        }
    }

    fn apply_keystream(&self, bytes: &mut [u8]) {
        for (counter, chunk) in bytes.chunks_mut(32).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(self.stream_key);
            hasher.update((counter as u64).to_be_bytes());
            let block = hasher.finalize();
            for (byte, key) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= key;
            }
        }
    }

    /// Nested keyed hash `H(k || H(k || data))`, truncated.
    fn tag(&self, data: &[u8]) -> [u8; TAG_LEN] {
        let inner = Sha256::new()
            .chain_update(self.tag_key)
            .chain_update(data)
            .finalize();
        let outer = Sha256::new()
            .chain_update(self.tag_key)
            .chain_update(inner)
            .finalize();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&outer[..TAG_LEN]);
        tag
    }
}

fn derive(root: &[u8; 32], label: &[u8]) -> [u8; 32] {
    Sha256::new()
        .chain_update(root)
        .chain_update(label)
        .finalize()
        .into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
