/// Container composing several sealed boxes into "primary OR N-of-M
/// recovery" unlock semantics.
///
/// A random 256-bit intermediate key encrypts the recovery payload. Each
/// RECOVERY configuration splits that key (XOR-masked with a per-config
/// nonce so shares from different configurations cannot be mixed) into
/// GF(2^8) shares, one sealed box per participant. PRIMARY configurations
/// seal the final key directly and never touch the recovery box.
///
/// Ephemeral keys are shared per curve across all boxes of one container
/// to fit the size budgets of ZFS properties and LUKS token slots; the
/// box-level random nonce keeps the derived symmetric keys unique.
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::crypto::cipher::{self, CipherSuite};
use crate::crypto::curve::{Curve, EcdhKey, PrivateKey, PublicPoint};
use crate::crypto::kdf::Kdf;
use crate::crypto::sensitive::SensitiveVec;
use crate::crypto::shamir::{self, Share};
use crate::error::{EboxError, Result};
use crate::sealed::{GuidSlot, SealOptions, SealedBox, MIN_NONCE_LEN};
use crate::wire::{Decoder, Encoder, SshKeyBlob};

pub const EBOX_MAGIC: [u8; 2] = [0xEB, 0x0C];
pub const EBOX_VERSION: u8 = 3;

const TAG_PUBKEY: u8 = 1;
const TAG_NAME: u8 = 2;
const TAG_CAK: u8 = 3;
const TAG_GUID: u8 = 4;
const TAG_BOX: u8 = 5;
const TAG_SLOT: u8 = 6;
const TAG_OPTIONAL: u8 = 0x80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EboxType {
    Template = 1,
    Key = 2,
    Stream = 3,
}

impl EboxType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(EboxType::Template),
            2 => Ok(EboxType::Key),
            3 => Ok(EboxType::Stream),
            _ => Err(EboxError::InvalidField("ebox type")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigType {
    Primary = 1,
    Recovery = 2,
}

impl ConfigType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(ConfigType::Primary),
            2 => Ok(ConfigType::Recovery),
            _ => Err(EboxError::InvalidField("config type")),
        }
    }
}

/// A part's sealed box as stored inside the container: the box fields
/// minus header, guid/slot, and ephemeral key. The ephemeral lives in the
/// container's per-curve map; guid and slot ride in their own part tags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartBox {
    pub cipher: CipherSuite,
    pub kdf: Kdf,
    pub nonce: Vec<u8>,
    pub curve: Curve,
    pub recipient: PublicPoint,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl PartBox {
    fn write(&self, enc: &mut Encoder) -> Result<()> {
        enc.cstring8(self.cipher.name())?;
        enc.cstring8(self.kdf.name())?;
        enc.string8(&self.nonce)?;
        enc.cstring8(self.curve.name())?;
        enc.eckey8(&self.recipient)?;
        enc.string8(&self.iv)?;
        enc.string(&self.ciphertext);
        Ok(())
    }

    fn read(dec: &mut Decoder<'_>) -> Result<Self> {
        let cipher = CipherSuite::from_name(&dec.cstring8()?)?;
        let kdf = Kdf::from_name(&dec.cstring8()?)?;
        let nonce = dec.string8()?.to_vec();
        if nonce.len() < MIN_NONCE_LEN {
            return Err(EboxError::NonceTooShort { len: nonce.len() });
        }
        let curve = Curve::from_name(&dec.cstring8()?)?;
        let recipient = dec.eckey8(curve)?;
        let iv = dec.string8()?.to_vec();
        if !iv.is_empty() && iv.len() != cipher.iv_len() {
            return Err(EboxError::InvalidField("iv length"));
        }
        let ciphertext = dec.string()?.to_vec();
        if ciphertext.len() < cipher.tag_len() {
            return Err(EboxError::InvalidField("ciphertext length"));
        }
        Ok(Self { cipher, kdf, nonce, curve, recipient, iv, ciphertext })
    }
}

/// One participant in a configuration. Only the sealed box is mandatory;
/// the rest is identification metadata for locating the hardware key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub pubkey: Option<SshKeyBlob>,
    pub name: Option<String>,
    pub cak: Option<SshKeyBlob>,
    pub guid: Option<Vec<u8>>,
    pub slot: Option<u8>,
    pub keybox: PartBox,
}

impl Part {
    fn write(&self, enc: &mut Encoder) -> Result<()> {
        if let Some(key) = &self.pubkey {
            enc.u8(TAG_PUBKEY);
            enc.key(key);
        }
        if let Some(name) = &self.name {
            enc.u8(TAG_NAME);
            enc.cstring8(name)?;
        }
        if let Some(cak) = &self.cak {
            enc.u8(TAG_CAK);
            enc.key(cak);
        }
        if let Some(guid) = &self.guid {
            enc.u8(TAG_GUID);
            enc.string8(guid)?;
        }
        if let Some(slot) = self.slot {
            enc.u8(TAG_SLOT);
            enc.u8(slot);
        }
        enc.u8(TAG_BOX);
        self.keybox.write(enc)?;
        enc.u8(0x00);
        Ok(())
    }

    fn read(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut pubkey = None;
        let mut name = None;
        let mut cak = None;
        let mut guid = None;
        let mut slot = None;
        let mut keybox = None;

        loop {
            let tag = dec.u8()?;
            match tag {
                0x00 => break,
                TAG_PUBKEY => pubkey = Some(dec.key()?),
                TAG_NAME => name = Some(dec.cstring8()?),
                TAG_CAK => cak = Some(dec.key()?),
                TAG_GUID => guid = Some(dec.string8()?.to_vec()),
                TAG_SLOT => slot = Some(dec.u8()?),
                TAG_BOX => keybox = Some(PartBox::read(dec)?),
                // unknown OPTIONAL tags carry a string8 body and are skipped;
                // unknown mandatory tags have no self-describing length, so
                // parsing cannot continue past them
                t if t & TAG_OPTIONAL != 0 => {
                    let _ = dec.string8()?;
                }
                t => return Err(EboxError::UnknownTag(t)),
            }
        }

        let keybox = keybox.ok_or(EboxError::MissingRequiredTag("box"))?;
        Ok(Self { pubkey, name, cak, guid, slot, keybox })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub kind: ConfigType,
    pub threshold: u8,
    /// Empty for PRIMARY; for RECOVERY the mask XORed into the
    /// intermediate key before splitting.
    pub nonce: Vec<u8>,
    pub parts: Vec<Part>,
}

impl Config {
    fn write(&self, enc: &mut Encoder) -> Result<()> {
        if self.parts.len() > u8::MAX as usize {
            return Err(EboxError::LengthOverflow);
        }
        enc.u8(self.kind as u8);
        enc.u8(self.threshold);
        enc.u8(self.parts.len() as u8);
        enc.string8(&self.nonce)?;
        for part in &self.parts {
            part.write(enc)?;
        }
        Ok(())
    }

    fn read(dec: &mut Decoder<'_>) -> Result<Self> {
        let kind = ConfigType::from_u8(dec.u8()?)?;
        let threshold = dec.u8()?;
        let count = dec.u8()? as usize;
        let nonce = dec.string8()?.to_vec();

        match kind {
            ConfigType::Primary => {
                if threshold != 1 || count != 1 || !nonce.is_empty() {
                    return Err(EboxError::InvalidField("primary config"));
                }
            }
            ConfigType::Recovery => {
                if threshold == 0 || threshold as usize > count {
                    return Err(EboxError::InvalidField("threshold"));
                }
                if nonce.len() < MIN_NONCE_LEN {
                    return Err(EboxError::NonceTooShort { len: nonce.len() });
                }
            }
        }

        let mut parts = Vec::with_capacity(count);
        for _ in 0..count {
            parts.push(Part::read(dec)?);
        }
        Ok(Self { kind, threshold, nonce, parts })
    }
}

/// Recipient description used when sealing a new container.
#[derive(Clone, Debug)]
pub struct PartSpec {
    pub recipient: PublicPoint,
    pub name: Option<String>,
    pub guid: Option<Vec<u8>>,
    pub slot: Option<u8>,
    pub pubkey: Option<SshKeyBlob>,
    pub cak: Option<SshKeyBlob>,
}

impl PartSpec {
    pub fn new(recipient: PublicPoint) -> Self {
        Self { recipient, name: None, guid: None, slot: None, pubkey: None, cak: None }
    }
}

#[derive(Clone, Debug)]
pub enum ConfigSpec {
    Primary(PartSpec),
    Recovery { threshold: u8, parts: Vec<PartSpec> },
}

impl ConfigSpec {
    fn parts(&self) -> &[PartSpec] {
        match self {
            ConfigSpec::Primary(part) => std::slice::from_ref(part),
            ConfigSpec::Recovery { parts, .. } => parts,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ebox {
    pub kind: EboxType,
    pub recovery_cipher: CipherSuite,
    pub recovery_iv: Vec<u8>,
    /// The final key sealed under the intermediate key, with tag.
    pub recovery_ct: Vec<u8>,
    /// One shared ephemeral public key per curve in use.
    pub ephemerals: Vec<(Curve, PublicPoint)>,
    pub configs: Vec<Config>,
}

impl Ebox {
    /// Seal `key` so it can be recovered through any of the given
    /// configurations.
    pub fn seal(
        kind: EboxType,
        key: &[u8],
        cipher: CipherSuite,
        specs: &[ConfigSpec],
    ) -> Result<Self> {
        if specs.is_empty() {
            return Err(EboxError::InvalidField("configurations"));
        }
        for spec in specs {
            if let ConfigSpec::Recovery { threshold, parts } = spec {
                if parts.is_empty() || parts.len() > u8::MAX as usize {
                    return Err(EboxError::InvalidField("part count"));
                }
                if *threshold == 0 || *threshold as usize > parts.len() {
                    return Err(EboxError::InvalidField("threshold"));
                }
            }
        }

        // one ephemeral keypair per curve, shared by every box on it
        let mut ephemerals: Vec<(Curve, PrivateKey)> = Vec::new();
        for spec in specs {
            for part in spec.parts() {
                let curve = part.recipient.curve();
                if !ephemerals.iter().any(|(c, _)| *c == curve) {
                    ephemerals.push((curve, PrivateKey::generate(curve)));
                }
            }
        }

        let mut ik = [0u8; shamir::SECRET_LEN];
        OsRng.fill_bytes(&mut ik);
        let recovery_iv = Vec::new();
        let recovery_ct = cipher::seal(cipher, &ik, &recovery_iv, key)?;

        let mut configs = Vec::with_capacity(specs.len());
        for spec in specs {
            match spec {
                ConfigSpec::Primary(part) => {
                    configs.push(Config {
                        kind: ConfigType::Primary,
                        threshold: 1,
                        nonce: Vec::new(),
                        parts: vec![seal_part(part, cipher, &ephemerals, key)?],
                    });
                }
                ConfigSpec::Recovery { threshold, parts } => {
                    let mut nonce = vec![0u8; MIN_NONCE_LEN];
                    OsRng.fill_bytes(&mut nonce);

                    let mut masked = mask_with_nonce(&ik, &nonce);
                    let shares = shamir::split(&masked, *threshold, parts.len() as u8, &mut OsRng)?;
                    masked.zeroize();

                    let mut sealed_parts = Vec::with_capacity(parts.len());
                    for (part, share) in parts.iter().zip(&shares) {
                        let mut plaintext = share.to_bytes();
                        let sealed = seal_part(part, cipher, &ephemerals, &plaintext);
                        plaintext.zeroize();
                        sealed_parts.push(sealed?);
                    }
                    configs.push(Config {
                        kind: ConfigType::Recovery,
                        threshold: *threshold,
                        nonce,
                        parts: sealed_parts,
                    });
                }
            }
        }
        ik.zeroize();

        let ephemerals = ephemerals
            .iter()
            .map(|(curve, key)| (*curve, key.public()))
            .collect();
        // ephemeral private scalars drop (and zeroize) here

        Ok(Self {
            kind,
            recovery_cipher: cipher,
            recovery_iv,
            recovery_ct,
            ephemerals,
            configs,
        })
    }

    pub fn config(&self, idx: usize) -> Result<&Config> {
        self.configs.get(idx).ok_or(EboxError::InvalidField("config index"))
    }

    pub fn ephemeral_for(&self, curve: Curve) -> Result<&PublicPoint> {
        self.ephemerals
            .iter()
            .find(|(c, _)| *c == curve)
            .map(|(_, p)| p)
            .ok_or(EboxError::InvalidField("ephemeral map"))
    }

    /// Reconstitute a part's full sealed box from the stored fields, the
    /// shared ephemeral for its curve, and the part's guid/slot tags.
    pub fn sealed_box(&self, cfg: usize, part: usize) -> Result<SealedBox> {
        let config = self.config(cfg)?;
        let part = config
            .parts
            .get(part)
            .ok_or(EboxError::InvalidField("part index"))?;
        let keybox = &part.keybox;
        let ephemeral = self.ephemeral_for(keybox.curve)?.clone();

        let guid_slot = if part.guid.is_some() || part.slot.is_some() {
            Some(GuidSlot {
                guid: part.guid.clone().unwrap_or_default(),
                slot: part.slot.unwrap_or(0),
            })
        } else {
            None
        };

        Ok(SealedBox {
            guid_slot,
            cipher: keybox.cipher,
            kdf: keybox.kdf,
            nonce: keybox.nonce.clone(),
            recipient: keybox.recipient.clone(),
            ephemeral,
            iv: keybox.iv.clone(),
            ciphertext: keybox.ciphertext.clone(),
        })
    }

    /// PRIMARY path: one unseal yields the final key directly.
    pub fn unseal_primary(&self, cfg: usize, key: &dyn EcdhKey) -> Result<SensitiveVec> {
        let config = self.config(cfg)?;
        if config.kind != ConfigType::Primary {
            return Err(EboxError::InvalidField("config type"));
        }
        self.sealed_box(cfg, 0)?.unseal(key)
    }

    /// RECOVERY path, step one: unseal one part's box into its share.
    pub fn unseal_part(&self, cfg: usize, part: usize, key: &dyn EcdhKey) -> Result<Share> {
        let config = self.config(cfg)?;
        if config.kind != ConfigType::Recovery {
            return Err(EboxError::InvalidField("config type"));
        }
        let plaintext = self.sealed_box(cfg, part)?.unseal(key)?;
        Share::from_bytes(plaintext.as_bytes()).map_err(|_| EboxError::BadShares)
    }

    /// RECOVERY path, step two: recombine at least `threshold` shares,
    /// strip the config mask, and open the recovery box.
    pub fn combine_shares(&self, cfg: usize, shares: &[Share]) -> Result<SensitiveVec> {
        let config = self.config(cfg)?;
        if config.kind != ConfigType::Recovery {
            return Err(EboxError::InvalidField("config type"));
        }
        let need = config.threshold as usize;
        if shares.len() < need {
            return Err(EboxError::InsufficientShares { have: shares.len(), need });
        }

        let masked = shamir::combine(&shares[..need])?;
        let mut ik = mask_with_nonce(masked.as_bytes(), &config.nonce);
        let out = cipher::open(self.recovery_cipher, &ik, &self.recovery_iv, &self.recovery_ct)
            .map_err(|err| match err {
                EboxError::AuthFail => EboxError::BadShares,
                other => other,
            });
        ik.zeroize();
        out
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.ephemerals.is_empty() {
            return Err(EboxError::InvalidField("ephemeral map"));
        }
        if self.ephemerals.len() > u8::MAX as usize || self.configs.len() > u8::MAX as usize {
            return Err(EboxError::LengthOverflow);
        }
        let mut enc = Encoder::new();
        enc.raw(&EBOX_MAGIC);
        enc.u8(EBOX_VERSION);
        enc.u8(self.kind as u8);
        enc.cstring8(self.recovery_cipher.name())?;
        enc.string8(&self.recovery_iv)?;
        enc.string8(&self.recovery_ct)?;
        enc.u8(self.ephemerals.len() as u8);
        for (curve, point) in &self.ephemerals {
            enc.cstring8(curve.name())?;
            enc.eckey8(point)?;
        }
        enc.u8(self.configs.len() as u8);
        for config in &self.configs {
            config.write(&mut enc)?;
        }
        Ok(enc.into_bytes())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);

        let m0 = dec.u8()?;
        let m1 = dec.u8()?;
        if [m0, m1] != EBOX_MAGIC {
            return Err(EboxError::BadMagic {
                expected: u16::from_be_bytes(EBOX_MAGIC),
                found: u16::from_be_bytes([m0, m1]),
            });
        }
        let version = dec.u8()?;
        if version != EBOX_VERSION {
            return Err(EboxError::BadVersion {
                expected: EBOX_VERSION,
                found: version,
            });
        }

        let kind = EboxType::from_u8(dec.u8()?)?;
        let recovery_cipher = CipherSuite::from_name(&dec.cstring8()?)?;
        let recovery_iv = dec.string8()?.to_vec();
        let recovery_ct = dec.string8()?.to_vec();

        let n_ephems = dec.u8()? as usize;
        if n_ephems == 0 {
            return Err(EboxError::InvalidField("ephemeral map"));
        }
        let mut ephemerals = Vec::with_capacity(n_ephems);
        for _ in 0..n_ephems {
            let curve = Curve::from_name(&dec.cstring8()?)?;
            if ephemerals.iter().any(|(c, _)| *c == curve) {
                return Err(EboxError::InvalidField("ephemeral map"));
            }
            let point = dec.eckey8(curve)?;
            ephemerals.push((curve, point));
        }

        let n_configs = dec.u8()? as usize;
        let mut configs = Vec::with_capacity(n_configs);
        for _ in 0..n_configs {
            configs.push(Config::read(&mut dec)?);
        }

        if !dec.is_empty() {
            return Err(EboxError::InvalidField("trailing data"));
        }

        let ebox = Self { kind, recovery_cipher, recovery_iv, recovery_ct, ephemerals, configs };
        for config in &ebox.configs {
            for part in &config.parts {
                ebox.ephemeral_for(part.keybox.curve)?;
            }
        }
        Ok(ebox)
    }
}

fn seal_part(
    spec: &PartSpec,
    cipher: CipherSuite,
    ephemerals: &[(Curve, PrivateKey)],
    plaintext: &[u8],
) -> Result<Part> {
    let curve = spec.recipient.curve();
    let ephemeral = ephemerals
        .iter()
        .find(|(c, _)| *c == curve)
        .map(|(_, k)| k.clone())
        .ok_or(EboxError::InvalidField("ephemeral map"))?;

    let sealed = SealedBox::seal(
        &spec.recipient,
        plaintext,
        SealOptions {
            cipher,
            ephemeral: Some(ephemeral),
            ..Default::default()
        },
    )?;

    Ok(Part {
        pubkey: spec.pubkey.clone(),
        name: spec.name.clone(),
        cak: spec.cak.clone(),
        guid: spec.guid.clone(),
        slot: spec.slot,
        keybox: PartBox {
            cipher: sealed.cipher,
            kdf: sealed.kdf,
            nonce: sealed.nonce,
            curve,
            recipient: sealed.recipient,
            iv: sealed.iv,
            ciphertext: sealed.ciphertext,
        },
    })
}

/// XOR the nonce over the first bytes of the intermediate key; a nonce
/// shorter than 32 bytes acts as if zero-padded on the right.
fn mask_with_nonce(ik: &[u8; shamir::SECRET_LEN], nonce: &[u8]) -> [u8; shamir::SECRET_LEN] {
    let mut out = *ik;
    for (slot, b) in out.iter_mut().zip(nonce.iter()) {
        *slot ^= b;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0xAB; 32];

    fn soft_keys(curve: Curve, n: usize) -> Vec<PrivateKey> {
        (0..n).map(|_| PrivateKey::generate(curve)).collect()
    }

    fn primary_plus_recovery(
        primary: &PrivateKey,
        holders: &[PrivateKey],
        threshold: u8,
    ) -> Ebox {
        let mut specs = vec![ConfigSpec::Primary(PartSpec::new(primary.public()))];
        specs.push(ConfigSpec::Recovery {
            threshold,
            parts: holders.iter().map(|k| PartSpec::new(k.public())).collect(),
        });
        Ebox::seal(EboxType::Key, &KEY, CipherSuite::Chacha20Poly1305, &specs).unwrap()
    }

    #[test]
    fn test_primary_and_recovery_paths_agree() {
        let primary = PrivateKey::generate(Curve::NistP256);
        let holders = soft_keys(Curve::NistP256, 3);
        let ebox = primary_plus_recovery(&primary, &holders, 2);

        let direct = ebox.unseal_primary(0, &primary).unwrap();
        assert_eq!(direct.as_bytes(), &KEY);

        // every 2-of-3 subset recombines to the same final key
        for pair in [[0usize, 1], [0, 2], [1, 2]] {
            let shares: Vec<_> = pair
                .iter()
                .map(|&i| ebox.unseal_part(1, i, &holders[i]).unwrap())
                .collect();
            let recovered = ebox.combine_shares(1, &shares).unwrap();
            assert_eq!(recovered.as_bytes(), &KEY);
        }
    }

    #[test]
    fn test_insufficient_shares() {
        let primary = PrivateKey::generate(Curve::NistP256);
        let holders = soft_keys(Curve::NistP256, 3);
        let ebox = primary_plus_recovery(&primary, &holders, 2);

        let one = vec![ebox.unseal_part(1, 0, &holders[0]).unwrap()];
        assert!(matches!(
            ebox.combine_shares(1, &one),
            Err(EboxError::InsufficientShares { have: 1, need: 2 })
        ));
    }

    #[test]
    fn test_cross_config_shares_rejected() {
        let holders = soft_keys(Curve::NistP256, 3);
        let recovery = |threshold| ConfigSpec::Recovery {
            threshold,
            parts: holders.iter().map(|k| PartSpec::new(k.public())).collect(),
        };
        let ebox = Ebox::seal(
            EboxType::Key,
            &KEY,
            CipherSuite::Chacha20Poly1305,
            &[recovery(2), recovery(2)],
        )
        .unwrap();

        let a = ebox.unseal_part(0, 0, &holders[0]).unwrap();
        let b = ebox.unseal_part(1, 1, &holders[1]).unwrap();
        assert!(matches!(
            ebox.combine_shares(0, &[a, b]),
            Err(EboxError::BadShares)
        ));
    }

    #[test]
    fn test_ephemerals_shared_per_curve() {
        let p256_keys = soft_keys(Curve::NistP256, 2);
        let p384_key = PrivateKey::generate(Curve::NistP384);

        let specs = [
            ConfigSpec::Primary(PartSpec::new(p384_key.public())),
            ConfigSpec::Recovery {
                threshold: 2,
                parts: p256_keys.iter().map(|k| PartSpec::new(k.public())).collect(),
            },
        ];
        let ebox = Ebox::seal(EboxType::Key, &KEY, CipherSuite::Aes256Gcm, &specs).unwrap();

        // one ephemeral per curve in use, not per box
        assert_eq!(ebox.ephemerals.len(), 2);
        let a = ebox.sealed_box(1, 0).unwrap();
        let b = ebox.sealed_box(1, 1).unwrap();
        assert_eq!(a.ephemeral, b.ephemeral);
        assert_ne!(a.nonce, b.nonce, "box nonces must still differ");
    }

    #[test]
    fn test_serialization_idempotent() {
        let primary = PrivateKey::generate(Curve::NistP256);
        let holders = soft_keys(Curve::NistP384, 3);
        let mut specs = vec![ConfigSpec::Primary(PartSpec::new(primary.public()))];
        specs.push(ConfigSpec::Recovery {
            threshold: 2,
            parts: holders
                .iter()
                .enumerate()
                .map(|(i, k)| {
                    let mut spec = PartSpec::new(k.public());
                    spec.name = Some(format!("holder{i}"));
                    spec.guid = Some(vec![i as u8; 16]);
                    spec.slot = Some(0x9D);
                    spec
                })
                .collect(),
        });
        let ebox = Ebox::seal(EboxType::Key, &KEY, CipherSuite::Chacha20Poly1305, &specs).unwrap();

        let bytes = ebox.to_bytes().unwrap();
        let parsed = Ebox::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, ebox);
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_recovery_still_works_after_reparse() {
        let primary = PrivateKey::generate(Curve::NistP256);
        let holders = soft_keys(Curve::NistP256, 3);
        let ebox = primary_plus_recovery(&primary, &holders, 2);
        let ebox = Ebox::from_bytes(&ebox.to_bytes().unwrap()).unwrap();

        let shares = vec![
            ebox.unseal_part(1, 2, &holders[2]).unwrap(),
            ebox.unseal_part(1, 0, &holders[0]).unwrap(),
        ];
        assert_eq!(ebox.combine_shares(1, &shares).unwrap().as_bytes(), &KEY);
    }

    #[test]
    fn test_unknown_mandatory_tag_aborts() {
        let primary = PrivateKey::generate(Curve::NistP256);
        let ebox = primary_plus_recovery(&primary, &soft_keys(Curve::NistP256, 2), 2);

        let mut enc = Encoder::new();
        ebox.configs[1].parts[0].write(&mut enc).unwrap();
        let mut bytes = enc.into_bytes();

        // splice an unrecognized mandatory tag in front of the terminator
        bytes.insert(bytes.len() - 1, 0x42);
        let mut dec = Decoder::new(&bytes);
        assert!(matches!(
            Part::read(&mut dec),
            Err(EboxError::UnknownTag(0x42))
        ));
    }

    #[test]
    fn test_unknown_optional_tag_skipped() {
        let primary = PrivateKey::generate(Curve::NistP256);
        let ebox = primary_plus_recovery(&primary, &soft_keys(Curve::NistP256, 2), 2);

        let mut enc = Encoder::new();
        ebox.configs[1].parts[0].write(&mut enc).unwrap();
        let mut bytes = enc.into_bytes();

        // OPTIONAL bit set, string8 body: parsers must step over it
        let splice = [0x42 | TAG_OPTIONAL, 3, 0xDE, 0xAD, 0xBF];
        let at = bytes.len() - 1;
        for (i, b) in splice.iter().enumerate() {
            bytes.insert(at + i, *b);
        }
        let mut dec = Decoder::new(&bytes);
        let part = Part::read(&mut dec).unwrap();
        assert_eq!(part, ebox.configs[1].parts[0]);
    }

    #[test]
    fn test_short_part_nonce_rejected() {
        let primary = PrivateKey::generate(Curve::NistP256);
        let ebox = primary_plus_recovery(&primary, &soft_keys(Curve::NistP256, 2), 2);

        let mut keybox = ebox.configs[0].parts[0].keybox.clone();
        keybox.nonce.truncate(15);
        let mut enc = Encoder::new();
        keybox.write(&mut enc).unwrap();

        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert!(matches!(
            PartBox::read(&mut dec),
            Err(EboxError::NonceTooShort { len: 15 })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let primary = PrivateKey::generate(Curve::NistP256);
        let ebox = primary_plus_recovery(&primary, &soft_keys(Curve::NistP256, 2), 2);
        let mut bytes = ebox.to_bytes().unwrap();
        bytes[1] = 0xFF;
        assert!(matches!(
            Ebox::from_bytes(&bytes),
            Err(EboxError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(EboxType::from_u8(2).unwrap(), EboxType::Key);
        assert!(EboxType::from_u8(4).is_err());
        assert_eq!(ConfigType::from_u8(1).unwrap(), ConfigType::Primary);
        assert!(ConfigType::from_u8(0).is_err());
    }
}
