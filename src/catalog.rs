// Typed operation catalog: one wrapper per supported command, each fully
// determining an exchange (verb, expected ack, request fields, response
// shapes).

use crate::exchange::ResponseSpec;
use crate::session::Session;
use crate::types::{
    ChallengeReply, CpError, CpResult, FirmwareVersion, CHALLENGE_RAND_SIZE, CHALLENGE_VERS_SIZE,
    ENC_OWNER_KEY_SIZE, HARDWARE_VERSION_SIZE, MAX_RESULT_SIZE, NONCE_SIZE, PID_SIZE, RESULT1_SIZE,
    SERIAL_NUMBER_SIZE, SIGNATURE_EXT_SIZE, SIGNATURE_SIZE, VERB_SIZE, VERSION_RAW_SIZE,
};

pub const VERB_PUTATIVE_ID: &[u8; VERB_SIZE] = b"!!!!PIDX";
pub const VERB_PUBLIC_KEY: &[u8; VERB_SIZE] = b"!!!!PKEY";
pub const VERB_VERSION: &[u8; VERB_SIZE] = b"!!!!VERS";
pub const VERB_TIME: &[u8; VERB_SIZE] = b"!!!!TIME";
pub const VERB_OWNER_KEY_INDEX: &[u8; VERB_SIZE] = b"!!!!CKEY";
pub const VERB_SERIAL_NUMBER: &[u8; VERB_SIZE] = b"!!!!SNUM";
pub const VERB_HARDWARE_VERSION: &[u8; VERB_SIZE] = b"!!!!HWVR";
pub const VERB_ALARM: &[u8; VERB_SIZE] = b"!!!!ALRM";
pub const VERB_POWER_DOWN: &[u8; VERB_SIZE] = b"!!!!DOWN";
pub const VERB_RESET: &[u8; VERB_SIZE] = b"!!!!RSET";
pub const VERB_CHALLENGE: &[u8; VERB_SIZE] = b"!!!!CHAL";

const ACK_PUTATIVE_ID: &[u8; 4] = b"PIDX";
const ACK_VERSION: &[u8; 4] = b"VRSR";
const ACK_TIME: &[u8; 4] = b"TIME";
const ACK_OWNER_KEY_INDEX: &[u8; 4] = b"CKEY";
const ACK_SERIAL_NUMBER: &[u8; 4] = b"SNUM";
const ACK_HARDWARE_VERSION: &[u8; 4] = b"HVRS";
const ACK_ALARM: &[u8; 4] = b"ASET";
const ACK_CHALLENGE: &[u8; 4] = b"RESP";

// Wire text budgets per response field.
const TEXT_MAX_16_BYTES: usize = 24;
const TEXT_MAX_U32: usize = 8;
const TEXT_MAX_VERSION: usize = 8;
const TEXT_MAX_RESULT1: usize = 373;
const TEXT_MAX_RESULT2: usize = 173;
const TEXT_MAX_RESULT3: usize = 567;

/// Format a 16 byte identity as the canonical grouped hex identifier
/// (8-4-4-4-12 hex digits).
pub fn format_grouped_id(raw: &[u8; PID_SIZE]) -> String {
    let hex: Vec<String> = raw.iter().map(|b| format!("{:02X}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        hex[0..4].join(""),
        hex[4..6].join(""),
        hex[6..8].join(""),
        hex[8..10].join(""),
        hex[10..16].join("")
    )
}

fn to_array<const N: usize>(field: Vec<u8>) -> CpResult<[u8; N]> {
    field.try_into().map_err(|_| CpError::Fail)
}

impl Session {
    /// Putative identity for a key index, formatted as the canonical
    /// grouped hex identifier.
    pub fn putative_id(&mut self, key_id: u16) -> CpResult<String> {
        let mut fields = self.exchange(
            VERB_PUTATIVE_ID,
            Some(ACK_PUTATIVE_ID),
            &[&key_id.to_le_bytes()],
            &[ResponseSpec {
                text_max: TEXT_MAX_16_BYTES,
                raw_size: PID_SIZE,
            }],
        )?;
        let raw: [u8; PID_SIZE] = to_array(fields.remove(0))?;
        Ok(format_grouped_id(&raw))
    }

    /// Public key blob for a key index. The device returns this field as
    /// text already; it is passed through undecoded.
    pub fn public_key(&mut self, key_id: u16) -> CpResult<String> {
        let mut fields = self.exchange(
            VERB_PUBLIC_KEY,
            None,
            &[&key_id.to_le_bytes()],
            &[ResponseSpec {
                text_max: MAX_RESULT_SIZE,
                raw_size: 0,
            }],
        )?;
        String::from_utf8(fields.remove(0)).map_err(|_| CpError::Fail)
    }

    pub fn firmware_version(&mut self) -> CpResult<FirmwareVersion> {
        let mut fields = self.exchange(
            VERB_VERSION,
            Some(ACK_VERSION),
            &[],
            &[ResponseSpec {
                text_max: TEXT_MAX_VERSION,
                raw_size: VERSION_RAW_SIZE,
            }],
        )?;
        let raw: [u8; VERSION_RAW_SIZE] = to_array(fields.remove(0))?;
        Ok(FirmwareVersion::from_wire(&raw))
    }

    /// Seconds since the device booted.
    pub fn current_time(&mut self) -> CpResult<u32> {
        self.u32_query(VERB_TIME, ACK_TIME)
    }

    /// Index of the key currently holding the owner key.
    pub fn owner_key_index(&mut self) -> CpResult<u32> {
        self.u32_query(VERB_OWNER_KEY_INDEX, ACK_OWNER_KEY_INDEX)
    }

    pub fn serial_number(&mut self) -> CpResult<[u8; SERIAL_NUMBER_SIZE]> {
        let mut fields = self.exchange(
            VERB_SERIAL_NUMBER,
            Some(ACK_SERIAL_NUMBER),
            &[],
            &[ResponseSpec {
                text_max: TEXT_MAX_16_BYTES,
                raw_size: SERIAL_NUMBER_SIZE,
            }],
        )?;
        to_array(fields.remove(0))
    }

    pub fn hardware_version(&mut self) -> CpResult<[u8; HARDWARE_VERSION_SIZE]> {
        let mut fields = self.exchange(
            VERB_HARDWARE_VERSION,
            Some(ACK_HARDWARE_VERSION),
            &[],
            &[ResponseSpec {
                text_max: TEXT_MAX_16_BYTES,
                raw_size: HARDWARE_VERSION_SIZE,
            }],
        )?;
        to_array(fields.remove(0))
    }

    /// Arm the wake-up alarm.
    pub fn set_alarm(&mut self, seconds: u32) -> CpResult<()> {
        self.exchange(VERB_ALARM, Some(ACK_ALARM), &[&seconds.to_le_bytes()], &[])?;
        Ok(())
    }

    /// Request power down. The device does not acknowledge.
    pub fn power_down(&mut self) -> CpResult<()> {
        self.exchange(VERB_POWER_DOWN, None, &[], &[])?;
        Ok(())
    }

    /// Request a device reset. The device does not acknowledge.
    pub fn reset(&mut self) -> CpResult<()> {
        self.exchange(VERB_RESET, None, &[], &[])?;
        Ok(())
    }

    /// Issue a challenge against a key index with a caller-chosen nonce
    /// and split the packed reply into its named sub-fields. Whether a
    /// third response field is requested comes from the device profile.
    pub fn issue_challenge(
        &mut self,
        key_id: u16,
        nonce: &[u8; NONCE_SIZE],
    ) -> CpResult<ChallengeReply> {
        let mut specs = vec![
            ResponseSpec {
                text_max: TEXT_MAX_RESULT1,
                raw_size: RESULT1_SIZE,
            },
            ResponseSpec {
                text_max: TEXT_MAX_RESULT2,
                raw_size: SIGNATURE_SIZE,
            },
        ];
        if self.profile().challenge_extension {
            specs.push(ResponseSpec {
                text_max: TEXT_MAX_RESULT3,
                raw_size: SIGNATURE_EXT_SIZE,
            });
        }

        let mut fields = self.exchange(
            VERB_CHALLENGE,
            Some(ACK_CHALLENGE),
            &[&key_id.to_le_bytes(), nonce],
            &specs,
        )?;

        let signature_ext = if fields.len() == 3 {
            Some(fields.remove(2))
        } else {
            None
        };
        let signature: [u8; SIGNATURE_SIZE] = to_array(fields.remove(1))?;
        let result1 = fields.remove(0);

        // Fixed packing order: enc-owner-key, returned random, version.
        let mut enc_owner_key = [0u8; ENC_OWNER_KEY_SIZE];
        let mut rand_out = [0u8; CHALLENGE_RAND_SIZE];
        let mut version = [0u8; CHALLENGE_VERS_SIZE];
        enc_owner_key.copy_from_slice(&result1[..ENC_OWNER_KEY_SIZE]);
        rand_out.copy_from_slice(
            &result1[ENC_OWNER_KEY_SIZE..ENC_OWNER_KEY_SIZE + CHALLENGE_RAND_SIZE],
        );
        version.copy_from_slice(&result1[ENC_OWNER_KEY_SIZE + CHALLENGE_RAND_SIZE..]);

        Ok(ChallengeReply {
            enc_owner_key,
            rand_out,
            version,
            signature,
            signature_ext,
        })
    }

    fn u32_query(&mut self, verb: &[u8; VERB_SIZE], ack: &[u8; 4]) -> CpResult<u32> {
        let mut fields = self.exchange(
            verb,
            Some(ack),
            &[],
            &[ResponseSpec {
                text_max: TEXT_MAX_U32,
                raw_size: 4,
            }],
        )?;
        let raw: [u8; 4] = to_array(fields.remove(0))?;
        Ok(u32::from_le_bytes(raw))
    }
}
