/// Anonymous sealed-box encryption of a payload to an EC public key.
///
/// A fresh (or caller-supplied) ephemeral keypair on the recipient's curve
/// drives an ECDH; the symmetric key is `SHA512(shared_x ∥ nonce)`
/// truncated to the cipher key length. The recipient needs only its
/// long-lived private scalar (typically held in a hardware token) to
/// recompute the same key from the stored ephemeral public point.
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::cipher::{self, CipherSuite};
use crate::crypto::curve::{Curve, EcdhKey, PrivateKey, PublicPoint};
use crate::crypto::kdf::{self, Kdf};
use crate::crypto::sensitive::SensitiveVec;
use crate::error::{EboxError, Result};
use crate::wire::{Decoder, Encoder};

pub const BOX_MAGIC: [u8; 2] = [0xB0, 0xC5];
pub const BOX_VERSION: u8 = 2;

/// Minimum nonce length on generation; shorter nonces are tolerated when
/// parsing a standalone box.
pub const MIN_NONCE_LEN: usize = 16;

/// Identifies which hardware device and key slot hold the recipient key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuidSlot {
    pub guid: Vec<u8>,
    pub slot: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedBox {
    pub guid_slot: Option<GuidSlot>,
    pub cipher: CipherSuite,
    pub kdf: Kdf,
    pub nonce: Vec<u8>,
    pub recipient: PublicPoint,
    pub ephemeral: PublicPoint,
    pub iv: Vec<u8>,
    /// Ciphertext with the AEAD tag appended.
    pub ciphertext: Vec<u8>,
}

/// Knobs for `SealedBox::seal`. Defaults generate a fresh ephemeral, a
/// 16-byte random nonce, and an empty IV (all-zero IV of cipher length).
pub struct SealOptions {
    pub cipher: CipherSuite,
    pub kdf: Kdf,
    pub guid_slot: Option<GuidSlot>,
    pub nonce: Option<Vec<u8>>,
    pub iv: Option<Vec<u8>>,
    pub ephemeral: Option<PrivateKey>,
}

impl Default for SealOptions {
    fn default() -> Self {
        Self {
            cipher: CipherSuite::Chacha20Poly1305,
            kdf: Kdf::Sha512,
            guid_slot: None,
            nonce: None,
            iv: None,
            ephemeral: None,
        }
    }
}

impl SealedBox {
    pub fn curve(&self) -> Curve {
        self.recipient.curve()
    }

    pub fn seal(recipient: &PublicPoint, plaintext: &[u8], opts: SealOptions) -> Result<Self> {
        let ephemeral = match opts.ephemeral {
            Some(key) => {
                if key.curve() != recipient.curve() {
                    return Err(EboxError::CurveMismatch);
                }
                key
            }
            None => PrivateKey::generate(recipient.curve()),
        };

        let nonce = match opts.nonce {
            Some(n) => {
                if n.len() < MIN_NONCE_LEN {
                    return Err(EboxError::NonceTooShort { len: n.len() });
                }
                n
            }
            None => {
                let mut n = vec![0u8; MIN_NONCE_LEN];
                OsRng.fill_bytes(&mut n);
                n
            }
        };

        let iv = opts.iv.unwrap_or_default();
        let shared = ephemeral.shared_x(recipient)?;
        let key = kdf::derive(opts.kdf, shared.as_bytes(), &nonce, opts.cipher.key_len())?;
        let ciphertext = cipher::seal(opts.cipher, key.as_bytes(), &iv, plaintext)?;

        Ok(Self {
            guid_slot: opts.guid_slot,
            cipher: opts.cipher,
            kdf: opts.kdf,
            nonce,
            recipient: recipient.clone(),
            ephemeral: ephemeral.public(),
            iv,
            ciphertext,
        })
        // the ephemeral private scalar drops (and zeroizes) here
    }

    /// Recover the plaintext through an ECDH capability for the recipient
    /// key. All authentication failures look identical.
    pub fn unseal(&self, key: &dyn EcdhKey) -> Result<SensitiveVec> {
        if key.curve() != self.curve() {
            return Err(EboxError::CurveMismatch);
        }
        let shared = key.shared_secret(&self.ephemeral)?;
        let sym = kdf::derive(self.kdf, shared.as_bytes(), &self.nonce, self.cipher.key_len())?;
        cipher::open(self.cipher, sym.as_bytes(), &self.iv, &self.ciphertext)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.write(&mut enc)?;
        Ok(enc.into_bytes())
    }

    pub(crate) fn write(&self, enc: &mut Encoder) -> Result<()> {
        enc.raw(&BOX_MAGIC);
        enc.u8(BOX_VERSION);
        match &self.guid_slot {
            Some(gs) => {
                enc.u8(1);
                enc.string8(&gs.guid)?;
                enc.u8(gs.slot);
            }
            None => {
                enc.u8(0);
                enc.u8(0); // zero-length guid
                enc.u8(0); // zero slot
            }
        }
        enc.cstring8(self.cipher.name())?;
        enc.cstring8(self.kdf.name())?;
        enc.string8(&self.nonce)?;
        enc.cstring8(self.curve().name())?;
        enc.eckey8(&self.recipient)?;
        enc.eckey8(&self.ephemeral)?;
        enc.string8(&self.iv)?;
        enc.string(&self.ciphertext);
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let sealed = Self::read(&mut dec)?;
        if !dec.is_empty() {
            return Err(EboxError::InvalidField("trailing data"));
        }
        Ok(sealed)
    }

    pub(crate) fn read(dec: &mut Decoder<'_>) -> Result<Self> {
        let m0 = dec.u8()?;
        let m1 = dec.u8()?;
        if [m0, m1] != BOX_MAGIC {
            return Err(EboxError::BadMagic {
                expected: u16::from_be_bytes(BOX_MAGIC),
                found: u16::from_be_bytes([m0, m1]),
            });
        }
        let version = dec.u8()?;
        if version != BOX_VERSION {
            return Err(EboxError::BadVersion {
                expected: BOX_VERSION,
                found: version,
            });
        }

        let valid = dec.u8()?;
        let guid = dec.string8()?.to_vec();
        let slot = dec.u8()?;
        let guid_slot = match valid {
            0 => {
                if !guid.is_empty() || slot != 0 {
                    return Err(EboxError::InvalidField("guid/slot"));
                }
                None
            }
            1 => Some(GuidSlot { guid, slot }),
            _ => return Err(EboxError::InvalidField("guid/slot flag")),
        };

        let cipher = CipherSuite::from_name(&dec.cstring8()?)?;
        let kdf = Kdf::from_name(&dec.cstring8()?)?;
        let nonce = dec.string8()?.to_vec();
        let curve = Curve::from_name(&dec.cstring8()?)?;
        let recipient = dec.eckey8(curve)?;
        let ephemeral = dec.eckey8(curve)?;
        let iv = dec.string8()?.to_vec();
        let ciphertext = dec.string()?.to_vec();

        if !iv.is_empty() && iv.len() != cipher.iv_len() {
            return Err(EboxError::InvalidField("iv length"));
        }
        if ciphertext.len() < cipher.tag_len() {
            return Err(EboxError::InvalidField("ciphertext length"));
        }

        Ok(Self {
            guid_slot,
            cipher,
            kdf,
            nonce,
            recipient,
            ephemeral,
            iv,
            ciphertext,
        })
    }
}
