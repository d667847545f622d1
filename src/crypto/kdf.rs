/// Symmetric key derivation from an ECDH shared secret.
///
/// `SHA512(shared_x ∥ nonce)` truncated to the cipher key length. The
/// 64-byte digest is only ever truncated, never expanded.
use sha2::{Digest, Sha512};

use crate::crypto::sensitive::SensitiveVec;
use crate::error::{EboxError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kdf {
    Sha512,
}

impl Kdf {
    pub fn name(&self) -> &'static str {
        match self {
            Kdf::Sha512 => "sha512",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sha512" => Ok(Kdf::Sha512),
            other => Err(EboxError::UnsupportedKdf(other.to_string())),
        }
    }
}

pub fn derive(kdf: Kdf, shared_x: &[u8], nonce: &[u8], key_len: usize) -> Result<SensitiveVec> {
    match kdf {
        Kdf::Sha512 => {
            if key_len > Sha512::output_size() {
                return Err(EboxError::InvalidField("key length"));
            }
            let mut hasher = Sha512::new();
            hasher.update(shared_x);
            hasher.update(nonce);
            let digest = hasher.finalize();
            Ok(SensitiveVec::new(digest[..key_len].to_vec()))
        }
    }
}
