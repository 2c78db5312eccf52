// Core types and wire constants for the CP client.

use std::error::Error;
use std::fmt;

/// Upper bound on any single wire field, encoded or decoded. Scratch
/// buffers are sized to this once and reused across exchanges.
pub const MAX_RESULT_SIZE: usize = 1024;

/// Every command verb is exactly eight ASCII bytes: a four byte sentinel
/// (`!!!!`) followed by a four byte operation code.
pub const VERB_SIZE: usize = 8;

/// Acknowledgement codes echoed by the device are four bytes.
pub const ACK_SIZE: usize = 4;

/// Client-chosen random nonce sent with a challenge.
pub const NONCE_SIZE: usize = 16;

/// Putative identity value associated with a key index.
pub const PID_SIZE: usize = 16;

pub const SERIAL_NUMBER_SIZE: usize = 16;
pub const HARDWARE_VERSION_SIZE: usize = 16;

/// Firmware version on the wire: three little-endian u16 fields.
pub const VERSION_RAW_SIZE: usize = 6;

/// Owner key block inside the first challenge result, encrypted to the
/// owner transport key (2048-bit RSA).
pub const ENC_OWNER_KEY_SIZE: usize = 256;

/// Device-returned blinding value inside the first challenge result.
pub const CHALLENGE_RAND_SIZE: usize = 16;

/// Version stamp inside the first challenge result.
pub const CHALLENGE_VERS_SIZE: usize = 4;

/// First challenge result: enc-owner-key, returned random and version
/// stamp packed contiguously, in that order.
pub const RESULT1_SIZE: usize = ENC_OWNER_KEY_SIZE + CHALLENGE_RAND_SIZE + CHALLENGE_VERS_SIZE;

/// Blinded signature block (1024-bit RSA).
pub const SIGNATURE_SIZE: usize = 128;

/// Signature extension block, only emitted by devices with the extended
/// challenge profile.
pub const SIGNATURE_EXT_SIZE: usize = 420;

/// Closed set of outcomes for every protocol operation. `Ok` is carried by
/// `Result`; everything here is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpError {
    /// Protocol-level mismatch: bad ack, bad field size, decode failure,
    /// transport short count.
    Fail,
    /// Operation not supported by this client.
    NotImplemented,
    /// Caller passed an argument the protocol cannot express.
    InvalidParam,
    /// A scratch buffer capacity invariant would be violated.
    OutOfMemory,
    /// Lock contention on the transport, or the device reported its
    /// authentication counter as exhausted.
    AccessDenied,
    /// Session used before initialization.
    InvalidCall,
}

impl CpError {
    /// Canonical name, as rendered to callers of the dispatch layer.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            CpError::Fail => "FAIL",
            CpError::NotImplemented => "NOT_IMPLEMENTED",
            CpError::InvalidParam => "INVALID_PARAM",
            CpError::OutOfMemory => "OUT_OF_MEMORY",
            CpError::AccessDenied => "ACCESS_DENIED",
            CpError::InvalidCall => "INVALID_CALL",
        }
    }
}

impl fmt::Display for CpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl Error for CpError {}

pub type CpResult<T> = Result<T, CpError>;

/// Device firmware version, decoded from the six byte wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub fix: u16,
}

impl FirmwareVersion {
    /// Wire order is fix, minor, major, each little-endian.
    pub fn from_wire(raw: &[u8; VERSION_RAW_SIZE]) -> Self {
        FirmwareVersion {
            fix: u16::from_le_bytes([raw[0], raw[1]]),
            minor: u16::from_le_bytes([raw[2], raw[3]]),
            major: u16::from_le_bytes([raw[4], raw[5]]),
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.fix)
    }
}

/// Everything the device returns for one challenge, split into its named
/// sub-fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeReply {
    /// Owner key material, encrypted to the owner transport key.
    pub enc_owner_key: [u8; ENC_OWNER_KEY_SIZE],
    /// Device-returned blinding value.
    pub rand_out: [u8; CHALLENGE_RAND_SIZE],
    /// Version stamp covered by the signature.
    pub version: [u8; CHALLENGE_VERS_SIZE],
    /// Blinded signature.
    pub signature: [u8; SIGNATURE_SIZE],
    /// Extension block; present only on devices with the extended
    /// challenge profile.
    pub signature_ext: Option<Vec<u8>>,
}
