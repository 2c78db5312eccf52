// Challenge-response round trip against a fabricated device. The test
// owns both RSA key pairs, plays the device side of the exchange, and
// checks that the verifier accepts the genuine reply, recovers the owner
// key, and rejects tampered transcripts.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;

use cp_client::types::{
    CHALLENGE_RAND_SIZE, ENC_OWNER_KEY_SIZE, NONCE_SIZE, PID_SIZE, SIGNATURE_EXT_SIZE,
    SIGNATURE_SIZE,
};
use cp_client::{
    challenge_hash, verify_challenge, ChallengeReply, DeviceProfile, MockTransport,
    OwnerTransportKey, Session, TrustedKeyRecord, VerifyError,
};

const CR: u8 = 0x0D;
const OWNER_KEY: [u8; 16] = *b"owner-key-bytes!";
const PID: [u8; PID_SIZE] = [0x7E; PID_SIZE];

/// Key material for the simulated device: a 1024-bit signing pair and a
/// 2048-bit owner transport pair. The device signs with `sign_d`; the
/// verifier checks with `sign_e`. The owner block is produced with
/// `owner_d` so that the trusted record's `owner_e` recovers it.
struct FakeDevice {
    sign_n: BigUint,
    sign_e: BigUint,
    sign_d: BigUint,
    owner_n: BigUint,
    owner_e: BigUint,
    owner_d: BigUint,
}

fn convert(value: &rsa::BigUint) -> BigUint {
    BigUint::from_bytes_be(&value.to_bytes_be())
}

static DEVICE: OnceLock<FakeDevice> = OnceLock::new();

fn device() -> &'static FakeDevice {
    DEVICE.get_or_init(|| {
        let sign = RsaPrivateKey::new(&mut OsRng, SIGNATURE_SIZE * 8).unwrap();
        let owner = RsaPrivateKey::new(&mut OsRng, ENC_OWNER_KEY_SIZE * 8).unwrap();
        FakeDevice {
            sign_n: convert(sign.n()),
            sign_e: convert(sign.e()),
            sign_d: convert(sign.d()),
            owner_n: convert(owner.n()),
            owner_e: convert(owner.e()),
            owner_d: convert(owner.d()),
        }
    })
}

fn fixed<const N: usize>(value: &BigUint) -> [u8; N] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; N];
    out[N - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Owner transport plaintext block: 00 02, nonzero filler, zero
/// separator, then the key material tail.
fn owner_block(good_padding: bool) -> Vec<u8> {
    let mut block = vec![0xFFu8; ENC_OWNER_KEY_SIZE];
    block[0] = 0x00;
    block[1] = if good_padding { 0x02 } else { 0x01 };
    block[ENC_OWNER_KEY_SIZE - OWNER_KEY.len() - 1] = 0x00;
    block[ENC_OWNER_KEY_SIZE - OWNER_KEY.len()..].copy_from_slice(&OWNER_KEY);
    block
}

/// Produce the reply exactly as the device would: encrypt the owner
/// block, hash the transcript, sign the padded hash, blind the signature
/// with the returned random.
fn produce_reply(key_id: u16, rand_in: &[u8; NONCE_SIZE], block: &[u8]) -> ChallengeReply {
    let dev = device();

    let enc = BigUint::from_bytes_be(block).modpow(&dev.owner_d, &dev.owner_n);

    let mut reply = ChallengeReply {
        enc_owner_key: fixed(&enc),
        rand_out: [0xB7; CHALLENGE_RAND_SIZE],
        version: [0x01, 0x00, 0x00, 0x00],
        signature: [0u8; SIGNATURE_SIZE],
        signature_ext: None,
    };

    let hash = challenge_hash(key_id, rand_in, &PID, &reply);
    let mut payload = [0u8; SIGNATURE_SIZE];
    payload[SIGNATURE_SIZE - hash.len()..].copy_from_slice(&hash);

    let m = BigUint::from_bytes_be(&payload).modpow(&dev.sign_d, &dev.sign_n);
    let blinded = (BigUint::from_bytes_be(&reply.rand_out) * m) % &dev.sign_n;
    reply.signature = fixed(&blinded);
    reply
}

fn trusted_records() -> (TrustedKeyRecord, OwnerTransportKey) {
    let dev = device();
    (
        TrustedKeyRecord {
            modulus: dev.sign_n.clone(),
            exponent: dev.sign_e.clone(),
            pid: PID,
        },
        OwnerTransportKey {
            modulus: dev.owner_n.clone(),
            exponent: dev.owner_e.clone(),
        },
    )
}

#[test]
fn genuine_reply_verifies_and_recovers_owner_key() {
    let rand_in = [0x3C; NONCE_SIZE];
    let reply = produce_reply(5, &rand_in, &owner_block(true));
    let (signing, owner) = trusted_records();

    let recovered = verify_challenge(5, &rand_in, &reply, &signing, &owner).unwrap();
    assert_eq!(recovered, OWNER_KEY);
}

#[test]
fn flipped_signature_byte_is_rejected() {
    let rand_in = [0x3C; NONCE_SIZE];
    let mut reply = produce_reply(5, &rand_in, &owner_block(true));
    reply.signature[17] ^= 0x01;
    let (signing, owner) = trusted_records();

    assert_eq!(
        verify_challenge(5, &rand_in, &reply, &signing, &owner),
        Err(VerifyError::SignatureMismatch)
    );
}

#[test]
fn wrong_nonce_is_rejected() {
    let rand_in = [0x3C; NONCE_SIZE];
    let reply = produce_reply(5, &rand_in, &owner_block(true));
    let (signing, owner) = trusted_records();

    let other_nonce = [0x3D; NONCE_SIZE];
    assert_eq!(
        verify_challenge(5, &other_nonce, &reply, &signing, &owner),
        Err(VerifyError::SignatureMismatch)
    );
}

#[test]
fn wrong_key_id_is_rejected() {
    let rand_in = [0x3C; NONCE_SIZE];
    let reply = produce_reply(5, &rand_in, &owner_block(true));
    let (signing, owner) = trusted_records();

    assert_eq!(
        verify_challenge(6, &rand_in, &reply, &signing, &owner),
        Err(VerifyError::SignatureMismatch)
    );
}

#[test]
fn bad_owner_block_padding_is_rejected() {
    // The bad block is signed over, so the signature still passes and the
    // padding check is what fires.
    let rand_in = [0x3C; NONCE_SIZE];
    let reply = produce_reply(5, &rand_in, &owner_block(false));
    let (signing, owner) = trusted_records();

    assert_eq!(
        verify_challenge(5, &rand_in, &reply, &signing, &owner),
        Err(VerifyError::OwnerKeyPadding)
    );
}

fn field(raw: &[u8]) -> Vec<u8> {
    let mut bytes = STANDARD.encode(raw).into_bytes();
    bytes.push(CR);
    bytes
}

fn challenge_script(reply: &ChallengeReply) -> Vec<u8> {
    let mut result1 = Vec::with_capacity(
        ENC_OWNER_KEY_SIZE + CHALLENGE_RAND_SIZE + reply.version.len(),
    );
    result1.extend_from_slice(&reply.enc_owner_key);
    result1.extend_from_slice(&reply.rand_out);
    result1.extend_from_slice(&reply.version);

    let mut script = b"?RESP".to_vec();
    script.extend(field(&result1));
    script.extend(field(&reply.signature));
    if let Some(ext) = &reply.signature_ext {
        script.extend(field(ext));
    }
    script.push(CR);
    script
}

#[test]
fn challenge_over_the_wire_verifies_end_to_end() {
    let rand_in = [0x5F; NONCE_SIZE];
    let expected = produce_reply(2, &rand_in, &owner_block(true));

    let (mock, handle) = MockTransport::scripted();
    handle.queue_read(&challenge_script(&expected));
    let profile = DeviceProfile {
        pacing_ms: 0,
        ..DeviceProfile::default()
    };
    let mut session = Session::attach(Box::new(mock), profile);

    let reply = session.issue_challenge(2, &rand_in).unwrap();
    assert_eq!(reply, expected);
    assert_eq!(handle.unread(), 0);

    // Request frame: wake poke, verb, key index, nonce, terminator.
    let mut frame = b"!!!!!CHAL".to_vec();
    frame.extend(STANDARD.encode(2u16.to_le_bytes()).into_bytes());
    frame.push(b'\n');
    frame.extend(STANDARD.encode(rand_in).into_bytes());
    frame.push(b'\n');
    frame.push(CR);
    assert_eq!(handle.written(), frame);

    let (signing, owner) = trusted_records();
    let recovered = verify_challenge(2, &rand_in, &reply, &signing, &owner).unwrap();
    assert_eq!(recovered, OWNER_KEY);
}

#[test]
fn extension_profile_reads_a_third_field() {
    let mut expected = produce_reply(0, &[0u8; NONCE_SIZE], &owner_block(true));
    expected.signature_ext = Some(vec![0xA5; SIGNATURE_EXT_SIZE]);

    let (mock, handle) = MockTransport::scripted();
    handle.queue_read(&challenge_script(&expected));
    let profile = DeviceProfile {
        pacing_ms: 0,
        challenge_extension: true,
        ..DeviceProfile::default()
    };
    let mut session = Session::attach(Box::new(mock), profile);

    let reply = session.issue_challenge(0, &[0u8; NONCE_SIZE]).unwrap();
    assert_eq!(reply.signature_ext, Some(vec![0xA5; SIGNATURE_EXT_SIZE]));
    assert_eq!(handle.unread(), 0);
}
