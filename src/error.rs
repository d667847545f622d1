use thiserror::Error;

#[derive(Error, Debug)]
pub enum EboxError {
    #[error("input truncated")]
    Truncated,

    #[error("malformed NUL-terminated string")]
    BadCstring,

    #[error("invalid elliptic curve point")]
    BadPoint,

    #[error("value too long for 8-bit length prefix")]
    LengthOverflow,

    #[error("bad magic: expected {expected:#06x}, found {found:#06x}")]
    BadMagic { expected: u16, found: u16 },

    #[error("unsupported version: expected {expected}, found {found}")]
    BadVersion { expected: u8, found: u8 },

    #[error("unknown mandatory tag {0:#04x}")]
    UnknownTag(u8),

    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),

    #[error("unsupported curve: {0}")]
    UnsupportedCurve(String),

    #[error("unsupported kdf: {0}")]
    UnsupportedKdf(String),

    #[error("authentication failed")]
    AuthFail,

    #[error("shares do not reconstruct a valid key")]
    BadShares,

    #[error("insufficient shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("nonce too short: {len} bytes")]
    NonceTooShort { len: usize },

    #[error("missing required tag: {0}")]
    MissingRequiredTag(&'static str),

    #[error("key and point are on different curves")]
    CurveMismatch,

    #[error("invalid private key")]
    InvalidKey,

    #[error("duplicate share with index {0}")]
    DuplicateShare(u8),

    #[error("invalid {0}")]
    InvalidField(&'static str),
}

pub type Result<T> = std::result::Result<T, EboxError>;
