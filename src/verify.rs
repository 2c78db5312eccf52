// Challenge-response verifier: confirms a challenge reply was produced by
// the holder of the private key behind a trusted public key record, and
// recovers the owner key material carried inside it. The device signs
// blind; the client removes the blinding factor before checking the
// signature algebra.

use num_bigint::BigUint;
use num_traits::One;
use sha1::{Digest, Sha1};
use std::fmt;

use crate::types::{ChallengeReply, ENC_OWNER_KEY_SIZE, NONCE_SIZE, PID_SIZE, SIGNATURE_SIZE};

const SHA1_SIZE: usize = 20;

/// Tail length of the recovered owner key block that is the actual key
/// material.
pub const OWNER_KEY_SIZE: usize = 16;

/// Trusted public key record for the signing key behind a key index.
#[derive(Debug, Clone)]
pub struct TrustedKeyRecord {
    /// RSA modulus N (128 bytes in this scheme).
    pub modulus: BigUint,
    /// Public exponent e.
    pub exponent: BigUint,
    /// Expected identity value for the key index.
    pub pid: [u8; PID_SIZE],
}

/// Trusted record for the owner key transport pair: the exponent here
/// recovers the plaintext block from the encrypted owner key field.
#[derive(Debug, Clone)]
pub struct OwnerTransportKey {
    /// RSA modulus N2 (256 bytes in this scheme).
    pub modulus: BigUint,
    /// Recovery exponent e2.
    pub exponent: BigUint,
}

/// Verification failure. Any single failed check invalidates the entire
/// challenge response; there is no partial-trust outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// The returned blinding value has no inverse modulo N, or the
    /// inverse fails the algebra sanity check. The exchange is malformed.
    MalformedBlinding,
    /// The unblinded signature does not carry the expected hash.
    SignatureMismatch,
    /// The recovered owner key block fails its padding structure check.
    OwnerKeyPadding,
    /// A trusted record carries a modulus wider than the scheme's fixed
    /// block sizes.
    ModulusTooWide,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::MalformedBlinding => write!(f, "blinding value is not invertible"),
            VerifyError::SignatureMismatch => write!(f, "signature does not match challenge hash"),
            VerifyError::OwnerKeyPadding => write!(f, "owner key block padding check failed"),
            VerifyError::ModulusTooWide => {
                write!(f, "trusted record modulus is wider than the scheme allows")
            }
        }
    }
}

impl std::error::Error for VerifyError {}

/// Hash the challenge transcript exactly as the device does: enc owner
/// key, client nonce, returned random, two zero bytes, the key index big
/// endian, SHA1 of the PID, then the version stamp. The field order and
/// the zero padding are part of the protocol contract.
pub fn challenge_hash(
    key_id: u16,
    rand_in: &[u8; NONCE_SIZE],
    pid: &[u8; PID_SIZE],
    reply: &ChallengeReply,
) -> [u8; SHA1_SIZE] {
    let pid_hash = Sha1::digest(pid);

    let mut hasher = Sha1::new();
    hasher.update(reply.enc_owner_key);
    hasher.update(rand_in);
    hasher.update(reply.rand_out);
    hasher.update([0u8, 0u8, (key_id >> 8) as u8, (key_id & 0xFF) as u8]);
    hasher.update(pid_hash);
    hasher.update(reply.version);
    hasher.finalize().into()
}

/// Verify a challenge reply against the trusted records and recover the
/// owner key material. Passing means the device holds the private key
/// matching `signing`; the returned bytes are the owner key tail of the
/// decrypted transport block.
pub fn verify_challenge(
    key_id: u16,
    rand_in: &[u8; NONCE_SIZE],
    reply: &ChallengeReply,
    signing: &TrustedKeyRecord,
    owner: &OwnerTransportKey,
) -> Result<[u8; OWNER_KEY_SIZE], VerifyError> {
    // Bound the records to the scheme's block widths before any
    // fixed-width conversion of values reduced modulo them.
    if signing.modulus.bits() as usize > SIGNATURE_SIZE * 8
        || owner.modulus.bits() as usize > ENC_OWNER_KEY_SIZE * 8
    {
        return Err(VerifyError::ModulusTooWide);
    }

    let full_hash = challenge_hash(key_id, rand_in, &signing.pid, reply);

    let n = &signing.modulus;
    let rand_out = BigUint::from_bytes_be(&reply.rand_out);
    let sig = BigUint::from_bytes_be(&reply.signature);

    // Undo the blinding factor. The inverse check is an algebra sanity
    // check on the exchange, not a security property.
    let binv = rand_out
        .modinv(n)
        .ok_or(VerifyError::MalformedBlinding)?;
    if (&binv * &rand_out) % n != BigUint::one() {
        return Err(VerifyError::MalformedBlinding);
    }
    let unblinded = (&binv * &sig) % n;

    // Public key operation on the unblinded signature; the trailing hash
    // bytes must match the transcript hash.
    let check = fixed_width_be(&unblinded.modpow(&signing.exponent, n), SIGNATURE_SIZE);
    if check[SIGNATURE_SIZE - SHA1_SIZE..] != full_hash {
        return Err(VerifyError::SignatureMismatch);
    }

    // Recover the owner key transport block and check its padding
    // structure: leading 0x00 0x02, separator zero before the key tail.
    let enc = BigUint::from_bytes_be(&reply.enc_owner_key);
    let block = fixed_width_be(
        &enc.modpow(&owner.exponent, &owner.modulus),
        ENC_OWNER_KEY_SIZE,
    );
    if block[0] != 0x00 || block[1] != 0x02 {
        return Err(VerifyError::OwnerKeyPadding);
    }
    if block[ENC_OWNER_KEY_SIZE - OWNER_KEY_SIZE - 1] != 0x00 {
        return Err(VerifyError::OwnerKeyPadding);
    }

    let mut owner_key = [0u8; OWNER_KEY_SIZE];
    owner_key.copy_from_slice(&block[ENC_OWNER_KEY_SIZE - OWNER_KEY_SIZE..]);
    Ok(owner_key)
}

/// Big-endian bytes of `value`, left padded with zeros to `width`. Values
/// are reduced modulo an N of at most `width` bytes, so they always fit.
fn fixed_width_be(value: &BigUint, width: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(&bytes);
    out
}
