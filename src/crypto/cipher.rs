/// Authenticated cipher suites accepted inside containers.
///
/// Every suite is an AEAD; the tag rides at the end of the ciphertext.
/// An empty IV stands for the all-zero IV of the suite's required length,
/// which is safe here because every key is derived for a single use.
use aes::Aes256;
use aes_gcm::Aes256Gcm;
use ccm::consts::{U13, U16};
use ccm::Ccm;
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;

use crate::crypto::sensitive::SensitiveVec;
use crate::error::{EboxError, Result};

type Aes256Ccm = Ccm<Aes256, U16, U13>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherSuite {
    Chacha20Poly1305,
    Aes256Gcm,
    Aes256Ccm,
}

impl CipherSuite {
    pub fn name(&self) -> &'static str {
        match self {
            CipherSuite::Chacha20Poly1305 => "chacha20-poly1305",
            CipherSuite::Aes256Gcm => "aes256-gcm",
            CipherSuite::Aes256Ccm => "aes256-ccm",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "chacha20-poly1305" => Ok(CipherSuite::Chacha20Poly1305),
            "aes256-gcm" => Ok(CipherSuite::Aes256Gcm),
            "aes256-ccm" => Ok(CipherSuite::Aes256Ccm),
            other => Err(EboxError::UnsupportedCipher(other.to_string())),
        }
    }

    pub fn key_len(&self) -> usize {
        32
    }

    /// Length of the cipher's own IV, distinct from the container nonce.
    pub fn iv_len(&self) -> usize {
        match self {
            CipherSuite::Chacha20Poly1305 | CipherSuite::Aes256Gcm => 12,
            CipherSuite::Aes256Ccm => 13,
        }
    }

    pub fn tag_len(&self) -> usize {
        16
    }
}

fn resolve_iv(suite: CipherSuite, iv: &[u8]) -> Result<Vec<u8>> {
    if iv.is_empty() {
        return Ok(vec![0u8; suite.iv_len()]);
    }
    if iv.len() != suite.iv_len() {
        return Err(EboxError::InvalidField("iv length"));
    }
    Ok(iv.to_vec())
}

/// Encrypt; the returned buffer is `ciphertext ∥ tag`.
pub fn seal(suite: CipherSuite, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let iv = resolve_iv(suite, iv)?;
    let out = match suite {
        CipherSuite::Chacha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| EboxError::InvalidField("key length"))?
            .encrypt(GenericArray::from_slice(&iv), plaintext),
        CipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| EboxError::InvalidField("key length"))?
            .encrypt(GenericArray::from_slice(&iv), plaintext),
        CipherSuite::Aes256Ccm => Aes256Ccm::new_from_slice(key)
            .map_err(|_| EboxError::InvalidField("key length"))?
            .encrypt(GenericArray::from_slice(&iv), plaintext),
    };
    out.map_err(|_| EboxError::InvalidField("plaintext length"))
}

/// Decrypt and verify. Every authentication failure maps to the same
/// error; nothing about the cause is observable.
pub fn open(suite: CipherSuite, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<SensitiveVec> {
    let iv = resolve_iv(suite, iv)?;
    let out = match suite {
        CipherSuite::Chacha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| EboxError::InvalidField("key length"))?
            .decrypt(GenericArray::from_slice(&iv), ciphertext),
        CipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| EboxError::InvalidField("key length"))?
            .decrypt(GenericArray::from_slice(&iv), ciphertext),
        CipherSuite::Aes256Ccm => Aes256Ccm::new_from_slice(key)
            .map_err(|_| EboxError::InvalidField("key length"))?
            .decrypt(GenericArray::from_slice(&iv), ciphertext),
    };
    out.map(SensitiveVec::new).map_err(|_| EboxError::AuthFail)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITES: [CipherSuite; 3] = [
        CipherSuite::Chacha20Poly1305,
        CipherSuite::Aes256Gcm,
        CipherSuite::Aes256Ccm,
    ];

    #[test]
    fn test_seal_open_roundtrip() {
        for suite in SUITES {
            let key = [0x42u8; 32];
            let ct = seal(suite, &key, &[], b"secret payload").unwrap();
            assert_eq!(ct.len(), b"secret payload".len() + suite.tag_len());

            let pt = open(suite, &key, &[], &ct).unwrap();
            assert_eq!(pt.as_bytes(), b"secret payload");
        }
    }

    #[test]
    fn test_empty_iv_means_zero_iv() {
        for suite in SUITES {
            let key = [0x17u8; 32];
            let zeros = vec![0u8; suite.iv_len()];
            let a = seal(suite, &key, &[], b"x").unwrap();
            let b = seal(suite, &key, &zeros, b"x").unwrap();
            assert_eq!(a, b, "{}: empty IV must equal explicit zero IV", suite.name());
        }
    }

    #[test]
    fn test_tamper_rejected() {
        for suite in SUITES {
            let key = [0x42u8; 32];
            let mut ct = seal(suite, &key, &[], b"secret").unwrap();
            for bit in 0..8 {
                let mut tampered = ct.clone();
                tampered[0] ^= 1 << bit;
                assert!(matches!(
                    open(suite, &key, &[], &tampered),
                    Err(EboxError::AuthFail)
                ));
            }
            let last = ct.len() - 1;
            ct[last] ^= 0x01;
            assert!(matches!(open(suite, &key, &[], &ct), Err(EboxError::AuthFail)));
        }
    }

    #[test]
    fn test_wrong_key_rejected() {
        let ct = seal(CipherSuite::Chacha20Poly1305, &[1u8; 32], &[], b"s").unwrap();
        assert!(matches!(
            open(CipherSuite::Chacha20Poly1305, &[2u8; 32], &[], &ct),
            Err(EboxError::AuthFail)
        ));
    }

    #[test]
    fn test_bad_iv_length() {
        assert!(seal(CipherSuite::Aes256Gcm, &[0u8; 32], &[0u8; 7], b"s").is_err());
    }

    #[test]
    fn test_suite_names_roundtrip() {
        for suite in SUITES {
            assert_eq!(CipherSuite::from_name(suite.name()).unwrap(), suite);
        }
        assert!(matches!(
            CipherSuite::from_name("aes128-cbc"),
            Err(EboxError::UnsupportedCipher(_))
        ));
    }
}
