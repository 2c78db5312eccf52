//! Host-side client for the CP crypto processor.
//!
//! The device hangs off a serial line (or a local socket standing in for
//! one) and speaks a paced, base64-over-text framing protocol. This crate
//! provides the frame codec, the generic exchange engine, typed wrappers
//! for the supported operations, and the blind-signature verifier that
//! lets a relying party confirm the device holds a given private key.

pub mod catalog;
mod codec;
pub mod config;
pub mod dispatch;
pub mod exchange;
pub mod session;
pub mod transport;
pub mod types;
pub mod verify;

pub use catalog::format_grouped_id;
pub use config::{ClientConfig, DeviceProfile, TransportKind};
pub use dispatch::{dispatch, CpReply, CpRequest};
pub use exchange::ResponseSpec;
pub use session::Session;
pub use transport::{CpTransport, MockHandle, MockTransport, SerialTransport, UnixSocketTransport};
pub use types::{ChallengeReply, CpError, CpResult, FirmwareVersion};
pub use verify::{
    challenge_hash, verify_challenge, OwnerTransportKey, TrustedKeyRecord, VerifyError,
};
