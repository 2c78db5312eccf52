// Command dispatch layer: serde request/response vocabulary mapping 1:1
// onto the typed operation catalog, for front ends that speak JSON
// instead of calling the session API directly. Failures are rendered by
// the error code's canonical name.

use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::session::Session;
use crate::types::{CpError, CpResult, NONCE_SIZE};

/// One query or command addressed to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpRequest {
    PutativeId { key_id: u16 },
    PublicKey { key_id: u16 },
    FirmwareVersion,
    CurrentTime,
    OwnerKeyIndex,
    SerialNumber,
    HardwareVersion,
    SetAlarm { seconds: u32 },
    PowerDown,
    Reset,
    /// Nonce is hex; omitted means the client draws one from the OS rng.
    Challenge {
        key_id: u16,
        nonce_hex: Option<String>,
    },
}

impl CpRequest {
    pub fn request_type(&self) -> &'static str {
        match self {
            CpRequest::PutativeId { .. } => "PutativeId",
            CpRequest::PublicKey { .. } => "PublicKey",
            CpRequest::FirmwareVersion => "FirmwareVersion",
            CpRequest::CurrentTime => "CurrentTime",
            CpRequest::OwnerKeyIndex => "OwnerKeyIndex",
            CpRequest::SerialNumber => "SerialNumber",
            CpRequest::HardwareVersion => "HardwareVersion",
            CpRequest::SetAlarm { .. } => "SetAlarm",
            CpRequest::PowerDown => "PowerDown",
            CpRequest::Reset => "Reset",
            CpRequest::Challenge { .. } => "Challenge",
        }
    }
}

/// Reply to one [`CpRequest`]. Binary fields are rendered as upper-case
/// hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpReply {
    PutativeId {
        id: String,
    },
    PublicKey {
        key: String,
    },
    FirmwareVersion {
        major: u16,
        minor: u16,
        fix: u16,
    },
    CurrentTime {
        seconds: u32,
    },
    OwnerKeyIndex {
        index: u32,
    },
    SerialNumber {
        hex: String,
    },
    HardwareVersion {
        hex: String,
    },
    AlarmSet,
    PoweringDown,
    Resetting,
    Challenge {
        nonce_hex: String,
        enc_owner_key_hex: String,
        rand_out_hex: String,
        version_hex: String,
        signature_hex: String,
        signature_ext_hex: Option<String>,
    },
    /// Canonical error code name.
    Error {
        code: String,
    },
}

impl CpReply {
    pub fn is_error(&self) -> bool {
        matches!(self, CpReply::Error { .. })
    }
}

/// Render bytes as upper-case hex.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn parse_nonce(hex: &str) -> CpResult<[u8; NONCE_SIZE]> {
    // The ASCII check makes the fixed-offset slicing below safe.
    if hex.len() != NONCE_SIZE * 2 || !hex.is_ascii() {
        return Err(CpError::InvalidParam);
    }
    let mut nonce = [0u8; NONCE_SIZE];
    for (i, out) in nonce.iter_mut().enumerate() {
        *out = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| CpError::InvalidParam)?;
    }
    Ok(nonce)
}

/// Execute one request against a session. Never returns `Err`; failures
/// become [`CpReply::Error`] with the canonical code name.
pub fn dispatch(session: &mut Session, request: &CpRequest) -> CpReply {
    debug!("dispatching {}", request.request_type());
    match run(session, request) {
        Ok(reply) => reply,
        Err(code) => CpReply::Error {
            code: code.canonical_name().to_string(),
        },
    }
}

fn run(session: &mut Session, request: &CpRequest) -> CpResult<CpReply> {
    match request {
        CpRequest::PutativeId { key_id } => Ok(CpReply::PutativeId {
            id: session.putative_id(*key_id)?,
        }),
        CpRequest::PublicKey { key_id } => Ok(CpReply::PublicKey {
            key: session.public_key(*key_id)?,
        }),
        CpRequest::FirmwareVersion => {
            let vers = session.firmware_version()?;
            Ok(CpReply::FirmwareVersion {
                major: vers.major,
                minor: vers.minor,
                fix: vers.fix,
            })
        }
        CpRequest::CurrentTime => Ok(CpReply::CurrentTime {
            seconds: session.current_time()?,
        }),
        CpRequest::OwnerKeyIndex => Ok(CpReply::OwnerKeyIndex {
            index: session.owner_key_index()?,
        }),
        CpRequest::SerialNumber => Ok(CpReply::SerialNumber {
            hex: hex_string(&session.serial_number()?),
        }),
        CpRequest::HardwareVersion => Ok(CpReply::HardwareVersion {
            hex: hex_string(&session.hardware_version()?),
        }),
        CpRequest::SetAlarm { seconds } => {
            session.set_alarm(*seconds)?;
            Ok(CpReply::AlarmSet)
        }
        CpRequest::PowerDown => {
            session.power_down()?;
            Ok(CpReply::PoweringDown)
        }
        CpRequest::Reset => {
            session.reset()?;
            Ok(CpReply::Resetting)
        }
        CpRequest::Challenge { key_id, nonce_hex } => {
            let nonce = match nonce_hex {
                Some(hex) => parse_nonce(hex)?,
                None => {
                    let mut nonce = [0u8; NONCE_SIZE];
                    OsRng.fill_bytes(&mut nonce);
                    nonce
                }
            };
            let reply = session.issue_challenge(*key_id, &nonce)?;
            Ok(CpReply::Challenge {
                nonce_hex: hex_string(&nonce),
                enc_owner_key_hex: hex_string(&reply.enc_owner_key),
                rand_out_hex: hex_string(&reply.rand_out),
                version_hex: hex_string(&reply.version),
                signature_hex: hex_string(&reply.signature),
                signature_ext_hex: reply.signature_ext.as_deref().map(hex_string),
            })
        }
    }
}
