/// Length-prefixed binary codec shared by every container format.
///
/// All multi-byte integers are big-endian. `string` carries a u32 length,
/// `string8` a u8 length; the `cstring` variants additionally require a
/// single trailing NUL that is counted in the length. EC points travel as
/// SEC1 encodings: uncompressed (0x04) inside `eckey`, compressed
/// (0x02/0x03) inside `eckey8`.
use crate::crypto::curve::{Curve, PublicPoint};
use crate::error::{EboxError, Result};

/// Forward-only reader over a borrowed buffer.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(EboxError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32be(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64be(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn string(&mut self) -> Result<&'a [u8]> {
        let len = self.u32be()? as usize;
        self.take(len)
    }

    pub fn string8(&mut self) -> Result<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    pub fn cstring(&mut self) -> Result<String> {
        let raw = self.string()?;
        decode_cstring(raw)
    }

    pub fn cstring8(&mut self) -> Result<String> {
        let raw = self.string8()?;
        decode_cstring(raw)
    }

    /// Big-endian magnitude with an optional leading sign byte, which the
    /// decoder strips (OpenSSH bignum convention).
    pub fn bignum(&mut self) -> Result<Vec<u8>> {
        let raw = self.string()?;
        Ok(strip_sign_byte(raw).to_vec())
    }

    pub fn bignum8(&mut self) -> Result<Vec<u8>> {
        let raw = self.string8()?;
        Ok(strip_sign_byte(raw).to_vec())
    }

    /// SEC1 uncompressed point inside a `string`.
    pub fn eckey(&mut self, curve: Curve) -> Result<PublicPoint> {
        let raw = self.string()?;
        if raw.first() != Some(&0x04) {
            return Err(EboxError::BadPoint);
        }
        PublicPoint::from_sec1(curve, raw)
    }

    /// SEC1 compressed point inside a `string8`.
    pub fn eckey8(&mut self, curve: Curve) -> Result<PublicPoint> {
        let raw = self.string8()?;
        match raw.first() {
            Some(&0x02) | Some(&0x03) => PublicPoint::from_sec1(curve, raw),
            _ => Err(EboxError::BadPoint),
        }
    }

    /// Opaque SSH public-key blob; only the framing and the inner
    /// algorithm name are validated here.
    pub fn key(&mut self) -> Result<SshKeyBlob> {
        let raw = self.string()?;
        SshKeyBlob::from_bytes(raw)
    }
}

fn decode_cstring(raw: &[u8]) -> Result<String> {
    match raw.split_last() {
        Some((&0x00, body)) if !body.contains(&0x00) => String::from_utf8(body.to_vec())
            .map_err(|_| EboxError::BadCstring),
        _ => Err(EboxError::BadCstring),
    }
}

fn strip_sign_byte(raw: &[u8]) -> &[u8] {
    match raw.split_first() {
        Some((&0x00, rest)) => rest,
        _ => raw,
    }
}

/// Growable writer producing the byte-exact encodings the decoders accept.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u32be(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u64be(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn string(&mut self, bytes: &[u8]) {
        self.u32be(bytes.len() as u32);
        self.raw(bytes);
    }

    pub fn string8(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > u8::MAX as usize {
            return Err(EboxError::LengthOverflow);
        }
        self.u8(bytes.len() as u8);
        self.raw(bytes);
        Ok(())
    }

    pub fn cstring(&mut self, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0x00) {
            return Err(EboxError::BadCstring);
        }
        self.u32be(s.len() as u32 + 1);
        self.raw(s.as_bytes());
        self.u8(0x00);
        Ok(())
    }

    pub fn cstring8(&mut self, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0x00) {
            return Err(EboxError::BadCstring);
        }
        if s.len() + 1 > u8::MAX as usize {
            return Err(EboxError::LengthOverflow);
        }
        self.u8(s.len() as u8 + 1);
        self.raw(s.as_bytes());
        self.u8(0x00);
        Ok(())
    }

    pub fn bignum(&mut self, magnitude: &[u8]) {
        let trimmed = trim_leading_zeros(magnitude);
        let sign = usize::from(needs_sign_byte(trimmed));
        self.u32be((trimmed.len() + sign) as u32);
        if sign == 1 {
            self.u8(0x00);
        }
        self.raw(trimmed);
    }

    pub fn bignum8(&mut self, magnitude: &[u8]) -> Result<()> {
        let trimmed = trim_leading_zeros(magnitude);
        let sign = usize::from(needs_sign_byte(trimmed));
        if trimmed.len() + sign > u8::MAX as usize {
            return Err(EboxError::LengthOverflow);
        }
        self.u8((trimmed.len() + sign) as u8);
        if sign == 1 {
            self.u8(0x00);
        }
        self.raw(trimmed);
        Ok(())
    }

    pub fn eckey(&mut self, point: &PublicPoint) {
        self.string(&point.to_sec1(false));
    }

    pub fn eckey8(&mut self, point: &PublicPoint) -> Result<()> {
        self.string8(&point.to_sec1(true))
    }

    pub fn key(&mut self, key: &SshKeyBlob) {
        self.string(key.as_bytes());
    }
}

fn trim_leading_zeros(magnitude: &[u8]) -> &[u8] {
    let start = magnitude.iter().position(|&b| b != 0).unwrap_or(magnitude.len());
    &magnitude[start..]
}

fn needs_sign_byte(trimmed: &[u8]) -> bool {
    trimmed.first().is_some_and(|&b| b & 0x80 != 0)
}

/// An SSH public-key blob: an algorithm name followed by algorithm-specific
/// fields, kept opaque. May describe an EC or RSA key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshKeyBlob {
    algorithm: String,
    raw: Vec<u8>,
}

impl SshKeyBlob {
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(raw);
        let name = dec.string()?;
        if name.is_empty() {
            return Err(EboxError::InvalidField("key algorithm"));
        }
        let algorithm =
            String::from_utf8(name.to_vec()).map_err(|_| EboxError::InvalidField("key algorithm"))?;
        Ok(Self { algorithm, raw: raw.to_vec() })
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}
