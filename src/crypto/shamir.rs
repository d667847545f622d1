/// Shamir secret sharing over GF(2^8), polynomial modulo 0x11b.
///
/// A 32-byte secret is shared bytewise: each byte gets its own random
/// polynomial of degree `threshold - 1` with the secret byte as constant
/// term, evaluated at x = 1..=count. Reconstruction is Lagrange
/// interpolation at x = 0, where any `threshold` distinct shares suffice
/// and fewer reveal nothing.
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{EboxError, Result};

pub const SECRET_LEN: usize = 32;

/// One share: a non-zero x coordinate and 32 y bytes. 33 bytes on the wire.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    #[zeroize(skip)]
    x: u8,
    y: [u8; SECRET_LEN],
}

impl Share {
    pub fn x(&self) -> u8 {
        self.x
    }

    pub fn to_bytes(&self) -> [u8; SECRET_LEN + 1] {
        let mut out = [0u8; SECRET_LEN + 1];
        out[0] = self.x;
        out[1..].copy_from_slice(&self.y);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_LEN + 1 || bytes[0] == 0 {
            return Err(EboxError::InvalidField("share"));
        }
        let mut y = [0u8; SECRET_LEN];
        y.copy_from_slice(&bytes[1..]);
        Ok(Self { x: bytes[0], y })
    }
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut p = 0u8;
    for _ in 0..8 {
        if (b & 1) == 1 {
            p ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1b; // reduction by the AES polynomial
        }
        b >>= 1;
    }
    p
}

fn gf_pow(mut a: u8, mut e: u8) -> u8 {
    let mut r = 1u8;
    while e > 0 {
        if e & 1 == 1 {
            r = gf_mul(r, a);
        }
        a = gf_mul(a, a);
        e >>= 1;
    }
    r
}

// a^254 = a^-1 for non-zero a
fn gf_inv(a: u8) -> u8 {
    gf_pow(a, 254)
}

/// Split `secret` into `count` shares, any `threshold` of which recover it.
pub fn split(
    secret: &[u8; SECRET_LEN],
    threshold: u8,
    count: u8,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<Share>> {
    if threshold == 0 || threshold > count {
        return Err(EboxError::InvalidField("share threshold"));
    }

    // coefficients per secret byte: a0 = secret byte, a1.. random
    let mut coeffs = vec![[0u8; SECRET_LEN]; threshold as usize];
    coeffs[0].copy_from_slice(secret);
    for row in coeffs.iter_mut().skip(1) {
        rng.fill_bytes(row);
    }

    let mut shares = Vec::with_capacity(count as usize);
    for xi in 1..=count {
        let mut y = [0u8; SECRET_LEN];
        for (b, out) in y.iter_mut().enumerate() {
            let mut acc = 0u8;
            let mut xp = 1u8;
            for row in &coeffs {
                acc ^= gf_mul(row[b], xp);
                xp = gf_mul(xp, xi);
            }
            *out = acc;
        }
        shares.push(Share { x: xi, y });
    }

    for row in coeffs.iter_mut() {
        row.zeroize();
    }
    Ok(shares)
}

/// Recombine shares by interpolating each byte's polynomial at x = 0.
/// Shares must carry pairwise distinct x coordinates.
pub fn combine(shares: &[Share]) -> Result<SensitiveBytes32> {
    if shares.is_empty() {
        return Err(EboxError::InvalidField("share count"));
    }
    for (i, s) in shares.iter().enumerate() {
        if shares[..i].iter().any(|t| t.x == s.x) {
            return Err(EboxError::DuplicateShare(s.x));
        }
    }

    let mut secret = [0u8; SECRET_LEN];
    for (i, si) in shares.iter().enumerate() {
        // λ_i(0) = Π_{j≠i} x_j / (x_j ⊕ x_i)
        let mut num = 1u8;
        let mut den = 1u8;
        for (j, sj) in shares.iter().enumerate() {
            if i == j {
                continue;
            }
            num = gf_mul(num, sj.x);
            den = gf_mul(den, sj.x ^ si.x);
        }
        let li = gf_mul(num, gf_inv(den));
        for (b, out) in secret.iter_mut().enumerate() {
            *out ^= gf_mul(si.y[b], li);
        }
    }
    Ok(SensitiveBytes32::new(secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_split_combine_2_of_3() {
        let secret = [0xAB; SECRET_LEN];
        let shares = split(&secret, 2, 3, &mut OsRng).unwrap();
        assert_eq!(shares.len(), 3);

        for pair in [[0, 1], [0, 2], [1, 2]] {
            let subset = [shares[pair[0]].clone(), shares[pair[1]].clone()];
            let recovered = combine(&subset).unwrap();
            assert_eq!(recovered.as_bytes(), &secret);
        }

        let all = combine(&shares).unwrap();
        assert_eq!(all.as_bytes(), &secret);
    }

    #[test]
    fn test_single_share_reveals_nothing_useful() {
        let secret = [0x55; SECRET_LEN];
        let shares = split(&secret, 2, 3, &mut OsRng).unwrap();
        let lone = combine(&shares[..1]).unwrap();
        // with threshold 2, one share interpolates to its own y vector
        assert_ne!(lone.as_bytes(), &secret);
    }

    #[test]
    fn test_duplicate_share_rejected() {
        let shares = split(&[1; SECRET_LEN], 2, 2, &mut OsRng).unwrap();
        let dup = [shares[0].clone(), shares[0].clone()];
        assert!(matches!(combine(&dup), Err(EboxError::DuplicateShare(1))));
    }

    #[test]
    fn test_bad_parameters() {
        assert!(split(&[0; SECRET_LEN], 0, 3, &mut OsRng).is_err());
        assert!(split(&[0; SECRET_LEN], 4, 3, &mut OsRng).is_err());
    }

    #[test]
    fn test_share_bytes_roundtrip() {
        let shares = split(&[9; SECRET_LEN], 2, 2, &mut OsRng).unwrap();
        let bytes = shares[0].to_bytes();
        assert_eq!(bytes.len(), 33);
        let parsed = Share::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.x(), shares[0].x());
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn test_share_zero_x_rejected() {
        assert!(Share::from_bytes(&[0u8; 33]).is_err());
        assert!(Share::from_bytes(&[1u8; 32]).is_err());
    }

    #[test]
    fn test_field_inverse() {
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, gf_inv(a)), 1, "inverse of {a}");
        }
    }
}
