/// NIST prime curves used by the container formats.
///
/// Key agreement is plain ECDH: the shared secret is the X coordinate of
/// `d·Q`, left-padded to the curve's coordinate width. Point parsing goes
/// through the SEC1 decoders of the underlying curve crates, which reject
/// off-curve and identity encodings.
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

use crate::crypto::sensitive::SensitiveVec;
use crate::error::{EboxError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Curve {
    NistP256,
    NistP384,
    NistP521,
}

impl Curve {
    pub const ALL: [Curve; 3] = [Curve::NistP256, Curve::NistP384, Curve::NistP521];

    pub fn name(&self) -> &'static str {
        match self {
            Curve::NistP256 => "nistp256",
            Curve::NistP384 => "nistp384",
            Curve::NistP521 => "nistp521",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "nistp256" => Ok(Curve::NistP256),
            "nistp384" => Ok(Curve::NistP384),
            "nistp521" => Ok(Curve::NistP521),
            other => Err(EboxError::UnsupportedCurve(other.to_string())),
        }
    }

    /// Byte length of one field coordinate.
    pub fn coord_len(&self) -> usize {
        match self {
            Curve::NistP256 => 32,
            Curve::NistP384 => 48,
            Curve::NistP521 => 66,
        }
    }

    pub fn compressed_len(&self) -> usize {
        1 + self.coord_len()
    }

    pub fn uncompressed_len(&self) -> usize {
        1 + 2 * self.coord_len()
    }
}

/// A validated public point on one of the supported curves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicPoint {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    P521(p521::PublicKey),
}

impl PublicPoint {
    pub fn curve(&self) -> Curve {
        match self {
            PublicPoint::P256(_) => Curve::NistP256,
            PublicPoint::P384(_) => Curve::NistP384,
            PublicPoint::P521(_) => Curve::NistP521,
        }
    }

    pub fn from_sec1(curve: Curve, bytes: &[u8]) -> Result<Self> {
        match curve {
            Curve::NistP256 => p256::PublicKey::from_sec1_bytes(bytes)
                .map(PublicPoint::P256)
                .map_err(|_| EboxError::BadPoint),
            Curve::NistP384 => p384::PublicKey::from_sec1_bytes(bytes)
                .map(PublicPoint::P384)
                .map_err(|_| EboxError::BadPoint),
            Curve::NistP521 => p521::PublicKey::from_sec1_bytes(bytes)
                .map(PublicPoint::P521)
                .map_err(|_| EboxError::BadPoint),
        }
    }

    pub fn to_sec1(&self, compressed: bool) -> Vec<u8> {
        match self {
            PublicPoint::P256(pk) => pk.to_encoded_point(compressed).as_bytes().to_vec(),
            PublicPoint::P384(pk) => pk.to_encoded_point(compressed).as_bytes().to_vec(),
            PublicPoint::P521(pk) => pk.to_encoded_point(compressed).as_bytes().to_vec(),
        }
    }
}

/// A private scalar on one of the supported curves. The wrapped secret
/// keys zeroize themselves on drop.
#[derive(Clone)]
pub enum PrivateKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

impl PrivateKey {
    pub fn generate(curve: Curve) -> Self {
        match curve {
            Curve::NistP256 => PrivateKey::P256(p256::SecretKey::random(&mut OsRng)),
            Curve::NistP384 => PrivateKey::P384(p384::SecretKey::random(&mut OsRng)),
            Curve::NistP521 => PrivateKey::P521(p521::SecretKey::random(&mut OsRng)),
        }
    }

    pub fn from_scalar_bytes(curve: Curve, bytes: &[u8]) -> Result<Self> {
        match curve {
            Curve::NistP256 => p256::SecretKey::from_slice(bytes)
                .map(PrivateKey::P256)
                .map_err(|_| EboxError::InvalidKey),
            Curve::NistP384 => p384::SecretKey::from_slice(bytes)
                .map(PrivateKey::P384)
                .map_err(|_| EboxError::InvalidKey),
            Curve::NistP521 => p521::SecretKey::from_slice(bytes)
                .map(PrivateKey::P521)
                .map_err(|_| EboxError::InvalidKey),
        }
    }

    pub fn curve(&self) -> Curve {
        match self {
            PrivateKey::P256(_) => Curve::NistP256,
            PrivateKey::P384(_) => Curve::NistP384,
            PrivateKey::P521(_) => Curve::NistP521,
        }
    }

    pub fn public(&self) -> PublicPoint {
        match self {
            PrivateKey::P256(sk) => PublicPoint::P256(sk.public_key()),
            PrivateKey::P384(sk) => PublicPoint::P384(sk.public_key()),
            PrivateKey::P521(sk) => PublicPoint::P521(sk.public_key()),
        }
    }

    pub fn to_scalar_bytes(&self) -> SensitiveVec {
        match self {
            PrivateKey::P256(sk) => SensitiveVec::new(sk.to_bytes().to_vec()),
            PrivateKey::P384(sk) => SensitiveVec::new(sk.to_bytes().to_vec()),
            PrivateKey::P521(sk) => SensitiveVec::new(sk.to_bytes().to_vec()),
        }
    }

    /// X coordinate of `d·Q`, padded to the coordinate width.
    pub fn shared_x(&self, peer: &PublicPoint) -> Result<SensitiveVec> {
        match (self, peer) {
            (PrivateKey::P256(sk), PublicPoint::P256(pk)) => {
                let shared = p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
                Ok(SensitiveVec::new(shared.raw_secret_bytes().to_vec()))
            }
            (PrivateKey::P384(sk), PublicPoint::P384(pk)) => {
                let shared = p384::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
                Ok(SensitiveVec::new(shared.raw_secret_bytes().to_vec()))
            }
            (PrivateKey::P521(sk), PublicPoint::P521(pk)) => {
                let shared = p521::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
                Ok(SensitiveVec::new(shared.raw_secret_bytes().to_vec()))
            }
            _ => Err(EboxError::CurveMismatch),
        }
    }
}

/// Capability for producing an ECDH shared secret against a long-lived
/// recipient key. Hardware tokens implement this against a key slot; the
/// software implementation below holds the scalar directly and is what
/// tests use.
pub trait EcdhKey {
    fn curve(&self) -> Curve;

    fn shared_secret(&self, peer: &PublicPoint) -> Result<SensitiveVec>;
}

impl EcdhKey for PrivateKey {
    fn curve(&self) -> Curve {
        PrivateKey::curve(self)
    }

    fn shared_secret(&self, peer: &PublicPoint) -> Result<SensitiveVec> {
        self.shared_x(peer)
    }
}
