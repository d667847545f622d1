/// Challenge/response protocol for invoking a remote recovery token over
/// copy-paste channels.
///
/// The recovery machine re-wraps a part's stored key-piece box, together
/// with freshness metadata and a temporary public key, inside an outer box
/// addressed to the same hardware key. The token holder unseals both,
/// reads four verification words to the operator over a voice channel,
/// and returns the decrypted key piece sealed to the temporary key.
///
/// Unlike container part tags, every metadata tag here carries a string8
/// body, so unknown tags are skipped rather than fatal.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::curve::{Curve, EcdhKey, PrivateKey, PublicPoint};
use crate::crypto::memory::LockedBuf;
use crate::crypto::sensitive::SensitiveVec;
use crate::crypto::shamir::Share;
use crate::ebox::{ConfigType, Ebox};
use crate::error::{EboxError, Result};
use crate::sealed::{GuidSlot, SealOptions, SealedBox};
use crate::wire::{Decoder, Encoder};
use crate::words;

pub const CHALLENGE_VERSION: u8 = 1;
pub const CHALLENGE_TYPE_RECOVERY: u8 = 1;

const CTAG_HOSTNAME: u8 = 1;
const CTAG_CTIME: u8 = 2;
const CTAG_DESCRIPTION: u8 = 3;
const CTAG_WORDS: u8 = 4;

const RTAG_ID: u8 = 1;
const RTAG_KEYPIECE: u8 = 2;

const WRAP_COLUMNS: usize = 64;

/// Default PIV key-management slot, used when a part does not name one.
const DEFAULT_SLOT: u8 = 0x9D;

/// Base64 with the standard alphabet and padding, wrapped at 64 columns.
pub fn encode_blob(data: &[u8]) -> String {
    let raw = STANDARD.encode(data);
    let mut out = String::with_capacity(raw.len() + raw.len() / WRAP_COLUMNS + 1);
    for (i, ch) in raw.chars().enumerate() {
        if i > 0 && i % WRAP_COLUMNS == 0 {
            out.push('\n');
        }
        out.push(ch);
    }
    out
}

/// Inverse of `encode_blob`; any interleaved whitespace is ignored.
pub fn decode_blob(text: &str) -> Result<Vec<u8>> {
    let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(stripped.as_bytes())
        .map_err(|_| EboxError::InvalidField("base64"))
}

/// The stored key-piece box of one part, reduced to the fields that are
/// not implied by the outer challenge box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPiece {
    pub ephemeral: PublicPoint,
    pub nonce: Vec<u8>,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Plaintext of an outer challenge box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub part_id: u8,
    pub temp_key: PublicPoint,
    pub keypiece: KeyPiece,
    pub hostname: String,
    pub ctime: u64,
    pub description: String,
    pub words: [u8; 4],
}

impl Challenge {
    fn to_payload(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.u8(CHALLENGE_VERSION);
        enc.u8(CHALLENGE_TYPE_RECOVERY);
        enc.u8(self.part_id);
        enc.eckey8(&self.temp_key)?;
        enc.eckey8(&self.keypiece.ephemeral)?;
        enc.string8(&self.keypiece.nonce)?;
        enc.string8(&self.keypiece.iv)?;
        enc.string8(&self.keypiece.ciphertext)?;

        enc.u8(CTAG_HOSTNAME);
        enc.cstring8(&self.hostname)?;
        enc.u8(CTAG_CTIME);
        enc.string8(&self.ctime.to_be_bytes())?;
        enc.u8(CTAG_DESCRIPTION);
        enc.cstring8(&self.description)?;
        enc.u8(CTAG_WORDS);
        enc.string8(&self.words)?;
        enc.u8(0x00);
        Ok(enc.into_bytes())
    }

    fn from_payload(payload: &[u8], curve: Curve) -> Result<Self> {
        let mut dec = Decoder::new(payload);

        let version = dec.u8()?;
        if version != CHALLENGE_VERSION {
            return Err(EboxError::BadVersion { expected: CHALLENGE_VERSION, found: version });
        }
        if dec.u8()? != CHALLENGE_TYPE_RECOVERY {
            return Err(EboxError::InvalidField("challenge type"));
        }
        let part_id = dec.u8()?;
        let temp_key = dec.eckey8(curve)?;
        let keypiece = KeyPiece {
            ephemeral: dec.eckey8(curve)?,
            nonce: dec.string8()?.to_vec(),
            iv: dec.string8()?.to_vec(),
            ciphertext: dec.string8()?.to_vec(),
        };

        let mut hostname = None;
        let mut ctime = None;
        let mut description = None;
        let mut words = None;
        loop {
            let tag = dec.u8()?;
            if tag == 0x00 {
                break;
            }
            let body = dec.string8()?;
            match tag {
                CTAG_HOSTNAME => hostname = Some(decode_tag_cstring(body)?),
                CTAG_CTIME => {
                    if body.len() != 8 {
                        return Err(EboxError::InvalidField("ctime"));
                    }
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(body);
                    ctime = Some(u64::from_be_bytes(raw));
                }
                CTAG_DESCRIPTION => description = Some(decode_tag_cstring(body)?),
                CTAG_WORDS => {
                    if body.len() != 4 {
                        return Err(EboxError::InvalidField("words"));
                    }
                    let mut raw = [0u8; 4];
                    raw.copy_from_slice(body);
                    words = Some(raw);
                }
                _ => {} // unknown tags are skipped
            }
        }

        Ok(Self {
            part_id,
            temp_key,
            keypiece,
            hostname: hostname.unwrap_or_default(),
            ctime: ctime.ok_or(EboxError::MissingRequiredTag("ctime"))?,
            description: description.unwrap_or_default(),
            words: words.ok_or(EboxError::MissingRequiredTag("words"))?,
        })
    }
}

fn decode_tag_cstring(body: &[u8]) -> Result<String> {
    match body.split_last() {
        Some((&0x00, text)) if !text.contains(&0x00) => {
            String::from_utf8(text.to_vec()).map_err(|_| EboxError::BadCstring)
        }
        _ => Err(EboxError::BadCstring),
    }
}

/// What the token holder shows the operator before answering.
#[derive(Clone, Debug)]
pub struct ChallengeInfo {
    pub part_id: u8,
    pub hostname: String,
    pub ctime: u64,
    pub description: String,
    pub words: [&'static str; 4],
}

/// Unseal a challenge with the hardware key it addresses, decrypt the
/// enclosed key piece, and seal it back to the challenger's temporary
/// key. Returns the verification info alongside the wrapped response.
pub fn respond(challenge_text: &str, token: &dyn EcdhKey) -> Result<(ChallengeInfo, String)> {
    let outer = SealedBox::from_bytes(&decode_blob(challenge_text)?)?;
    let payload = outer.unseal(token)?;
    let challenge = Challenge::from_payload(payload.as_bytes(), outer.curve())?;

    // reconstitute the key-piece box; its parameters match the outer box
    let inner = SealedBox {
        guid_slot: outer.guid_slot.clone(),
        cipher: outer.cipher,
        kdf: outer.kdf,
        nonce: challenge.keypiece.nonce.clone(),
        recipient: outer.recipient.clone(),
        ephemeral: challenge.keypiece.ephemeral.clone(),
        iv: challenge.keypiece.iv.clone(),
        ciphertext: challenge.keypiece.ciphertext.clone(),
    };
    let share = inner.unseal(token)?;

    let mut enc = Encoder::new();
    enc.u8(RTAG_ID);
    enc.string8(&[challenge.part_id])?;
    enc.u8(RTAG_KEYPIECE);
    enc.string8(share.as_bytes())?;
    enc.u8(0x00);
    let response_payload = SensitiveVec::new(enc.into_bytes());

    let sealed = SealedBox::seal(
        &challenge.temp_key,
        response_payload.as_bytes(),
        SealOptions { cipher: outer.cipher, kdf: outer.kdf, ..Default::default() },
    )?;

    let info = ChallengeInfo {
        part_id: challenge.part_id,
        hostname: challenge.hostname.clone(),
        ctime: challenge.ctime,
        description: challenge.description.clone(),
        words: [
            words::word(challenge.words[0]),
            words::word(challenge.words[1]),
            words::word(challenge.words[2]),
            words::word(challenge.words[3]),
        ],
    };
    Ok((info, encode_blob(&sealed.to_bytes()?)))
}

struct ResponsePayload {
    id: u8,
    keypiece: SensitiveVec,
}

fn parse_response_payload(payload: &[u8]) -> Result<ResponsePayload> {
    let mut dec = Decoder::new(payload);
    let mut id = None;
    let mut keypiece = None;
    loop {
        let tag = dec.u8()?;
        if tag == 0x00 {
            break;
        }
        let body = dec.string8()?;
        match tag {
            RTAG_ID => {
                if body.len() != 1 {
                    return Err(EboxError::InvalidField("response id"));
                }
                id = Some(body[0]);
            }
            RTAG_KEYPIECE => keypiece = Some(SensitiveVec::new(body.to_vec())),
            _ => {} // unknown tags are skipped
        }
    }
    Ok(ResponsePayload {
        id: id.ok_or(EboxError::MissingRequiredTag("id"))?,
        keypiece: keypiece.ok_or(EboxError::MissingRequiredTag("keypiece"))?,
    })
}

/// A temporary keypair whose private scalar lives in page-locked memory
/// for the duration of a recovery session.
struct SessionKey {
    curve: Curve,
    public: PublicPoint,
    scalar: LockedBuf,
}

impl SessionKey {
    fn generate(curve: Curve) -> Self {
        let key = PrivateKey::generate(curve);
        let public = key.public();
        let scalar = LockedBuf::new(key.to_scalar_bytes().as_bytes().to_vec());
        Self { curve, public, scalar }
    }

    fn private_key(&self) -> Result<PrivateKey> {
        PrivateKey::from_scalar_bytes(self.curve, self.scalar.as_bytes())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Collecting,
    Done,
    Aborted,
}

struct PendingChallenge {
    part_id: u8,
    words: [u8; 4],
}

/// Driver for one remote recovery: emits challenges for the parts of a
/// RECOVERY configuration, absorbs responses, and recombines shares once
/// the threshold is met. Temporary keys and collected shares are wiped on
/// every terminal transition, including drop.
pub struct RecoverySession {
    ebox: Ebox,
    config: usize,
    temp_keys: Vec<SessionKey>,
    pending: Vec<PendingChallenge>,
    shares: Vec<Share>,
    state: SessionState,
}

impl RecoverySession {
    pub fn new(ebox: Ebox, config: usize) -> Result<Self> {
        if ebox.config(config)?.kind != ConfigType::Recovery {
            return Err(EboxError::InvalidField("config type"));
        }
        Ok(Self {
            ebox,
            config,
            temp_keys: Vec::new(),
            pending: Vec::new(),
            shares: Vec::new(),
            state: SessionState::Collecting,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn threshold(&self) -> u8 {
        self.ebox.configs[self.config].threshold
    }

    pub fn shares_collected(&self) -> usize {
        self.shares.len()
    }

    /// The verification words of the most recently issued challenges, for
    /// display to the operator.
    pub fn pending_words(&self, part_id: u8) -> Option<[&'static str; 4]> {
        self.pending
            .iter()
            .find(|p| p.part_id == part_id)
            .map(|p| [
                words::word(p.words[0]),
                words::word(p.words[1]),
                words::word(p.words[2]),
                words::word(p.words[3]),
            ])
    }

    /// Build the wrapped challenge for one part of the configuration.
    pub fn challenge(&mut self, part: usize, hostname: &str, description: &str) -> Result<String> {
        self.ensure_collecting()?;
        let config = self.ebox.config(self.config)?;
        let stored = config
            .parts
            .get(part)
            .ok_or(EboxError::InvalidField("part index"))?;
        let keybox = stored.keybox.clone();
        let guid = stored
            .guid
            .clone()
            .ok_or(EboxError::MissingRequiredTag("guid"))?;
        let slot = stored.slot.unwrap_or(DEFAULT_SLOT);
        let ephemeral = self.ebox.ephemeral_for(keybox.curve)?.clone();
        let temp_key = self.temp_key(keybox.curve).public.clone();

        let mut word_indices = [0u8; 4];
        OsRng.fill_bytes(&mut word_indices);
        let ctime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| EboxError::InvalidField("system time"))?
            .as_secs();

        let challenge = Challenge {
            part_id: part as u8,
            temp_key,
            keypiece: KeyPiece {
                ephemeral,
                nonce: keybox.nonce.clone(),
                iv: keybox.iv.clone(),
                ciphertext: keybox.ciphertext.clone(),
            },
            hostname: hostname.to_string(),
            ctime,
            description: description.to_string(),
            words: word_indices,
        };

        let outer = SealedBox::seal(
            &keybox.recipient,
            &challenge.to_payload()?,
            SealOptions {
                cipher: keybox.cipher,
                kdf: keybox.kdf,
                guid_slot: Some(GuidSlot { guid, slot }),
                ..Default::default()
            },
        )?;

        self.pending.retain(|p| p.part_id != part as u8);
        self.pending.push(PendingChallenge { part_id: part as u8, words: word_indices });
        Ok(encode_blob(&outer.to_bytes()?))
    }

    /// Absorb one wrapped response; returns how many shares are now held.
    pub fn absorb_response(&mut self, response_text: &str) -> Result<usize> {
        self.ensure_collecting()?;
        let outer = SealedBox::from_bytes(&decode_blob(response_text)?)?;
        let session_key = self
            .temp_keys
            .iter()
            .find(|k| k.curve == outer.curve())
            .ok_or(EboxError::InvalidField("response curve"))?;
        let private = session_key.private_key()?;
        let payload = outer.unseal(&private)?;

        let response = parse_response_payload(payload.as_bytes())?;
        let at = self
            .pending
            .iter()
            .position(|p| p.part_id == response.id)
            .ok_or(EboxError::InvalidField("response id"))?;
        self.pending.remove(at);

        let share = Share::from_bytes(response.keypiece.as_bytes())
            .map_err(|_| EboxError::BadShares)?;
        if self.shares.iter().any(|s| s.x() == share.x()) {
            return Err(EboxError::DuplicateShare(share.x()));
        }
        self.shares.push(share);
        Ok(self.shares.len())
    }

    /// Recombine the collected shares and open the recovery box. Ends the
    /// session and wipes its secrets on success.
    pub fn recover(&mut self) -> Result<SensitiveVec> {
        self.ensure_collecting()?;
        let need = self.threshold() as usize;
        if self.shares.len() < need {
            return Err(EboxError::InsufficientShares { have: self.shares.len(), need });
        }
        let key = self.ebox.combine_shares(self.config, &self.shares)?;
        self.terminate(SessionState::Done);
        Ok(key)
    }

    /// Abandon the session, destroying the temporary keys and any shares.
    pub fn abort(&mut self) {
        if self.state == SessionState::Collecting {
            self.terminate(SessionState::Aborted);
        }
    }

    fn temp_key(&mut self, curve: Curve) -> &SessionKey {
        match self.temp_keys.iter().position(|k| k.curve == curve) {
            Some(at) => &self.temp_keys[at],
            None => {
                self.temp_keys.push(SessionKey::generate(curve));
                &self.temp_keys[self.temp_keys.len() - 1]
            }
        }
    }

    fn ensure_collecting(&self) -> Result<()> {
        if self.state != SessionState::Collecting {
            return Err(EboxError::InvalidField("session state"));
        }
        Ok(())
    }

    fn terminate(&mut self, state: SessionState) {
        self.temp_keys.clear(); // LockedBuf zeroizes and unlocks on drop
        self.shares.clear();
        self.pending.clear();
        self.state = state;
    }
}

impl Drop for RecoverySession {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::CipherSuite;
    use crate::ebox::{ConfigSpec, EboxType, PartSpec};

    const KEY: [u8; 32] = [0xC4; 32];

    fn recovery_fixture(n: usize, threshold: u8) -> (Ebox, Vec<PrivateKey>) {
        let holders: Vec<_> = (0..n)
            .map(|_| PrivateKey::generate(Curve::NistP256))
            .collect();
        let parts = holders
            .iter()
            .enumerate()
            .map(|(i, k)| {
                let mut spec = PartSpec::new(k.public());
                spec.guid = Some(vec![0x10 + i as u8; 16]);
                spec.slot = Some(0x9D);
                spec.name = Some(format!("token{i}"));
                spec
            })
            .collect();
        let ebox = Ebox::seal(
            EboxType::Key,
            &KEY,
            CipherSuite::Chacha20Poly1305,
            &[ConfigSpec::Recovery { threshold, parts }],
        )
        .unwrap();
        (ebox, holders)
    }

    #[test]
    fn test_challenge_response_roundtrip() {
        let (ebox, holders) = recovery_fixture(3, 2);
        let mut session = RecoverySession::new(ebox, 0).unwrap();

        for part in [0usize, 2] {
            let challenge = session.challenge(part, "vault01", "disk key recovery").unwrap();
            let (info, response) = respond(&challenge, &holders[part]).unwrap();

            assert_eq!(info.part_id, part as u8);
            assert_eq!(info.hostname, "vault01");
            assert_eq!(info.description, "disk key recovery");
            assert_eq!(
                Some(info.words),
                session.pending_words(part as u8),
                "operator words must match on both ends"
            );

            session.absorb_response(&response).unwrap();
        }

        assert_eq!(session.shares_collected(), 2);
        let recovered = session.recover().unwrap();
        assert_eq!(recovered.as_bytes(), &KEY);
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn test_challenge_is_line_wrapped_base64() {
        let (ebox, _) = recovery_fixture(3, 2);
        let mut session = RecoverySession::new(ebox, 0).unwrap();
        let challenge = session.challenge(0, "host", "").unwrap();

        assert!(challenge.lines().all(|l| l.len() <= 64));
        assert!(challenge
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+/=\n".contains(c)));

        // whitespace-mangled transport must still decode
        let mangled = challenge.replace('\n', " \r\n\t");
        assert_eq!(decode_blob(&mangled).unwrap(), decode_blob(&challenge).unwrap());
    }

    #[test]
    fn test_response_to_wrong_token_fails() {
        let (ebox, holders) = recovery_fixture(3, 2);
        let mut session = RecoverySession::new(ebox, 0).unwrap();
        let challenge = session.challenge(0, "host", "").unwrap();

        let stranger = PrivateKey::generate(Curve::NistP256);
        assert!(matches!(
            respond(&challenge, &stranger),
            Err(EboxError::AuthFail)
        ));
        let _ = holders;
    }

    #[test]
    fn test_insufficient_then_complete() {
        let (ebox, holders) = recovery_fixture(3, 2);
        let mut session = RecoverySession::new(ebox, 0).unwrap();

        let challenge = session.challenge(1, "host", "").unwrap();
        let (_, response) = respond(&challenge, &holders[1]).unwrap();
        session.absorb_response(&response).unwrap();

        assert!(matches!(
            session.recover(),
            Err(EboxError::InsufficientShares { have: 1, need: 2 })
        ));

        let challenge = session.challenge(0, "host", "").unwrap();
        let (_, response) = respond(&challenge, &holders[0]).unwrap();
        session.absorb_response(&response).unwrap();
        assert_eq!(session.recover().unwrap().as_bytes(), &KEY);
    }

    #[test]
    fn test_duplicate_response_rejected() {
        let (ebox, holders) = recovery_fixture(3, 2);
        let mut session = RecoverySession::new(ebox, 0).unwrap();

        let challenge = session.challenge(0, "host", "").unwrap();
        let (_, response) = respond(&challenge, &holders[0]).unwrap();
        session.absorb_response(&response).unwrap();

        // a replay no longer matches a pending challenge
        assert!(session.absorb_response(&response).is_err());
    }

    #[test]
    fn test_abort_wipes_session() {
        let (ebox, holders) = recovery_fixture(3, 2);
        let mut session = RecoverySession::new(ebox, 0).unwrap();
        let challenge = session.challenge(0, "host", "").unwrap();
        let (_, response) = respond(&challenge, &holders[0]).unwrap();
        session.absorb_response(&response).unwrap();

        session.abort();
        assert_eq!(session.state(), SessionState::Aborted);
        assert_eq!(session.shares_collected(), 0);
        assert!(session.challenge(1, "host", "").is_err());
    }

    #[test]
    fn test_missing_words_tag_rejected() {
        let (ebox, holders) = recovery_fixture(3, 2);
        let mut session = RecoverySession::new(ebox.clone(), 0).unwrap();
        let challenge_text = session.challenge(0, "host", "").unwrap();

        // rebuild the challenge payload without its WORDS tag
        let outer = SealedBox::from_bytes(&decode_blob(&challenge_text).unwrap()).unwrap();
        let payload = outer.unseal(&holders[0]).unwrap();
        let parsed = Challenge::from_payload(payload.as_bytes(), outer.curve()).unwrap();

        let mut enc = Encoder::new();
        enc.u8(CHALLENGE_VERSION);
        enc.u8(CHALLENGE_TYPE_RECOVERY);
        enc.u8(parsed.part_id);
        enc.eckey8(&parsed.temp_key).unwrap();
        enc.eckey8(&parsed.keypiece.ephemeral).unwrap();
        enc.string8(&parsed.keypiece.nonce).unwrap();
        enc.string8(&parsed.keypiece.iv).unwrap();
        enc.string8(&parsed.keypiece.ciphertext).unwrap();
        enc.u8(CTAG_CTIME);
        enc.string8(&parsed.ctime.to_be_bytes()).unwrap();
        enc.u8(0x00);

        let stripped = SealedBox::seal(
            &outer.recipient,
            &enc.into_bytes(),
            SealOptions {
                cipher: outer.cipher,
                kdf: outer.kdf,
                guid_slot: outer.guid_slot.clone(),
                ..Default::default()
            },
        )
        .unwrap();
        let text = encode_blob(&stripped.to_bytes().unwrap());
        assert!(matches!(
            respond(&text, &holders[0]),
            Err(EboxError::MissingRequiredTag("words"))
        ));
    }

    #[test]
    fn test_unknown_response_tag_skipped() {
        let mut enc = Encoder::new();
        enc.u8(RTAG_ID);
        enc.string8(&[7]).unwrap();
        enc.u8(0x77); // unknown, string8 body
        enc.string8(b"ignored").unwrap();
        enc.u8(RTAG_KEYPIECE);
        enc.string8(&[1u8; 33]).unwrap();
        enc.u8(0x00);

        let parsed = parse_response_payload(&enc.into_bytes()).unwrap();
        assert_eq!(parsed.id, 7);
        assert_eq!(parsed.keypiece.len(), 33);
    }

    #[test]
    fn test_missing_keypiece_tag() {
        let mut enc = Encoder::new();
        enc.u8(RTAG_ID);
        enc.string8(&[7]).unwrap();
        enc.u8(0x00);
        assert!(matches!(
            parse_response_payload(&enc.into_bytes()),
            Err(EboxError::MissingRequiredTag("keypiece"))
        ));
    }

    #[test]
    fn test_challenge_payload_roundtrip() {
        let temp = PrivateKey::generate(Curve::NistP384);
        let eph = PrivateKey::generate(Curve::NistP384);
        let challenge = Challenge {
            part_id: 7,
            temp_key: temp.public(),
            keypiece: KeyPiece {
                ephemeral: eph.public(),
                nonce: vec![5u8; 16],
                iv: Vec::new(),
                ciphertext: vec![9u8; 49],
            },
            hostname: "backup-host".into(),
            ctime: 1_700_000_000,
            description: "zpool tank".into(),
            words: [0, 17, 170, 255],
        };

        let payload = challenge.to_payload().unwrap();
        let parsed = Challenge::from_payload(&payload, Curve::NistP384).unwrap();
        assert_eq!(parsed, challenge);
    }
}
