// Frame codec: translates between in-memory values and the wire's
// text/control-character conventions. All writes are paced byte by byte;
// the device wedges into an unrecoverable state (physical reset required)
// when bytes arrive without inter-byte spacing.

use std::thread;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{trace, warn};

use crate::session::Session;
use crate::types::{CpError, CpResult, MAX_RESULT_SIZE, VERB_SIZE};

/// Frame terminator, and the marker for the device's idle state.
pub(crate) const FRAME_END: u8 = 0x0D;

/// Sync/noise byte the device may interleave during recovery.
const SYNC_BYTE: u8 = b'?';

const FAIL_LITERAL: &[u8] = b"FAIL";
const AUTHCOUNT_LITERAL: &[u8] = b"AUTHCOUNT";

/// States of the inbound field scanner. The FAIL/AUTHCOUNT matches are
/// position-exact: the literal must be completed by the stored byte at
/// index 3 respectively 8. Those offsets are a wire compatibility
/// constraint carried over from the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    Accumulating,
    SyncSkip,
    MatchedFail,
    MatchedAuthCount,
    Terminated,
}

/// Feed one received byte to the scanner. Stores the byte into `buf`
/// unless it is sync noise or the terminator.
fn scan_byte(buf: &mut Vec<u8>, byte: u8) -> FieldState {
    if byte == SYNC_BYTE {
        return FieldState::SyncSkip;
    }
    if byte == FRAME_END {
        return FieldState::Terminated;
    }
    buf.push(byte);
    if buf.len() == FAIL_LITERAL.len() && buf.as_slice() == FAIL_LITERAL {
        return FieldState::MatchedFail;
    }
    if buf.len() == AUTHCOUNT_LITERAL.len() && buf.as_slice() == AUTHCOUNT_LITERAL {
        return FieldState::MatchedAuthCount;
    }
    FieldState::Accumulating
}

impl Session {
    /// Transmit bytes one at a time with the mandatory inter-byte pause.
    pub(crate) fn write_paced(&mut self, bytes: &[u8]) -> CpResult<()> {
        let pacing = self.profile.pacing();
        for &byte in bytes {
            self.transport.write_byte(byte).map_err(|err| {
                warn!("transport write failed: {}", err);
                CpError::Fail
            })?;
            if !pacing.is_zero() {
                thread::sleep(pacing);
            }
        }
        Ok(())
    }

    /// Transmit the eight byte command verb.
    pub(crate) fn write_verb(&mut self, verb: &[u8; VERB_SIZE]) -> CpResult<()> {
        trace!("tx verb {}", String::from_utf8_lossy(verb));
        self.write_paced(&verb[..])
    }

    /// Base64-encode one request argument and transmit it with its
    /// line-feed terminator.
    pub(crate) fn write_argument(&mut self, raw: &[u8]) -> CpResult<()> {
        let encoded = STANDARD.encode(raw);
        if encoded.is_empty() || encoded.len() + 1 > MAX_RESULT_SIZE {
            return Err(CpError::Fail);
        }
        let mut line = std::mem::take(&mut self.wire_buf);
        line.clear();
        line.extend_from_slice(encoded.as_bytes());
        line.push(b'\n');
        trace!("tx argument ({} raw bytes)", raw.len());
        let result = self.write_paced(&line);
        self.wire_buf = line;
        result
    }

    /// Transmit the frame terminator.
    pub(crate) fn write_frame_end(&mut self) -> CpResult<()> {
        self.write_paced(&[FRAME_END])
    }

    /// Read one field of at most `max_len` stored bytes into the wire
    /// scratch buffer. Sync noise is discarded without counting, the
    /// terminator ends the field without being stored, and the FAIL and
    /// AUTHCOUNT literals abort mid-stream. Returns the stored length.
    pub(crate) fn read_field(&mut self, max_len: usize) -> CpResult<usize> {
        self.wire_buf.clear();
        while self.wire_buf.len() < max_len {
            let byte = match self.transport.read_byte() {
                Ok(byte) => byte,
                Err(err) => {
                    warn!("transport read failed: {}", err);
                    return Err(CpError::Fail);
                }
            };
            match scan_byte(&mut self.wire_buf, byte) {
                FieldState::Accumulating => {}
                FieldState::SyncSkip => trace!("rx sync byte discarded"),
                FieldState::Terminated => break,
                FieldState::MatchedFail => {
                    warn!("device reported FAIL");
                    return Err(CpError::Fail);
                }
                FieldState::MatchedAuthCount => {
                    warn!("device reported AUTHCOUNT exhausted");
                    return Err(CpError::AccessDenied);
                }
            }
        }
        trace!("rx field of {} bytes", self.wire_buf.len());
        Ok(self.wire_buf.len())
    }

    /// Read and discard the byte marking the device's return to idle.
    /// Skipped entirely on devices that do not emit one.
    pub(crate) fn read_frame_end(&mut self) -> CpResult<()> {
        if !self.profile.reads_idle_marker {
            return Ok(());
        }
        let byte = self.transport.read_byte().map_err(|_| CpError::Fail)?;
        if byte != FRAME_END {
            return Err(CpError::Fail);
        }
        Ok(())
    }

    /// Base64-decode the text currently in the wire scratch buffer into
    /// the decode scratch, then hand back exactly `expected` bytes. Any
    /// size disagreement is a protocol failure.
    pub(crate) fn decode_field(&mut self, expected: usize) -> CpResult<Vec<u8>> {
        let mut text: &[u8] = &self.wire_buf;
        while let [rest @ .., b'\n' | b'\r'] = text {
            text = rest;
        }
        let decoded = STANDARD.decode_slice(text, &mut self.field_buf).map_err(|err| {
            warn!("base64 decode failed: {}", err);
            CpError::Fail
        })?;
        if decoded == 0 || decoded > MAX_RESULT_SIZE || decoded != expected {
            warn!("decoded {} bytes, expected {}", decoded, expected);
            return Err(CpError::Fail);
        }
        Ok(self.field_buf[..decoded].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceProfile;
    use crate::transport::{MockHandle, MockTransport};

    fn quiet_profile() -> DeviceProfile {
        DeviceProfile {
            pacing_ms: 0,
            ..DeviceProfile::default()
        }
    }

    fn scripted_session(reads: &[u8]) -> (Session, MockHandle) {
        let (mock, handle) = MockTransport::scripted();
        handle.queue_read(reads);
        (Session::attach(Box::new(mock), quiet_profile()), handle)
    }

    #[test]
    fn read_field_stops_at_terminator_without_storing_it() {
        let (mut session, _) = scripted_session(b"ABCD\x0Dleftover");
        let n = session.read_field(32).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&session.wire_buf, b"ABCD");
    }

    #[test]
    fn read_field_discards_sync_noise_without_counting_it() {
        // Noise interleaved at every position must not count toward the
        // limit or the stored output.
        let (mut session, _) = scripted_session(b"?A?B??CD?\x0D");
        let n = session.read_field(4).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&session.wire_buf, b"ABCD");
    }

    #[test]
    fn read_field_honors_max_len_without_terminator() {
        let (mut session, handle) = scripted_session(b"WXYZtrailing");
        let n = session.read_field(4).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&session.wire_buf, b"WXYZ");
        // Nothing beyond the limit was consumed.
        assert_eq!(handle.unread(), b"trailing".len());
    }

    #[test]
    fn fail_literal_aborts_at_index_three() {
        let (mut session, _) = scripted_session(b"FAILwhatever\x0D");
        assert_eq!(session.read_field(32), Err(CpError::Fail));
    }

    #[test]
    fn fail_literal_after_sync_noise_still_aborts() {
        let (mut session, _) = scripted_session(b"?F?AIL\x0D");
        assert_eq!(session.read_field(32), Err(CpError::Fail));
    }

    #[test]
    fn fail_literal_elsewhere_is_plain_data() {
        // Matching is position-exact, not substring-anywhere.
        let (mut session, _) = scripted_session(b"XFAIL\x0D");
        let n = session.read_field(32).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&session.wire_buf, b"XFAIL");
    }

    #[test]
    fn authcount_literal_aborts_with_access_denied() {
        let (mut session, _) = scripted_session(b"AUTHCOUNT\x0D");
        assert_eq!(session.read_field(32), Err(CpError::AccessDenied));
    }

    #[test]
    fn authcount_prefix_alone_is_plain_data() {
        let (mut session, _) = scripted_session(b"AUTHCOUN\x0D");
        let n = session.read_field(32).unwrap();
        assert_eq!(n, 8);
    }

    #[test]
    fn read_failure_maps_to_fail() {
        let (mut session, _) = scripted_session(b"AB");
        assert_eq!(session.read_field(32), Err(CpError::Fail));
    }

    #[test]
    fn write_argument_is_base64_with_line_feed() {
        let (mut session, handle) = scripted_session(b"");
        session.write_argument(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(handle.written(), b"3q2+7w==\n");
    }

    #[test]
    fn write_argument_rejects_empty_input() {
        let (mut session, _) = scripted_session(b"");
        assert_eq!(session.write_argument(&[]), Err(CpError::Fail));
    }

    #[test]
    fn write_argument_rejects_oversized_input() {
        let (mut session, _) = scripted_session(b"");
        let big = vec![0u8; MAX_RESULT_SIZE];
        assert_eq!(session.write_argument(&big), Err(CpError::Fail));
    }

    #[test]
    fn decode_round_trips_arbitrary_buffers() {
        let patterns: [&[u8]; 4] = [b"\x00", b"\x00\x01\x02", b"hello world", &[0xFF; 96]];
        for raw in patterns {
            let (mut session, _) = scripted_session(b"");
            session.wire_buf = STANDARD.encode(raw).into_bytes();
            assert_eq!(session.decode_field(raw.len()).unwrap(), raw);
        }
    }

    #[test]
    fn decode_rejects_size_mismatch() {
        let (mut session, _) = scripted_session(b"");
        session.wire_buf = STANDARD.encode(b"four").into_bytes();
        assert_eq!(session.decode_field(5), Err(CpError::Fail));
    }

    #[test]
    fn decode_ignores_trailing_line_feed() {
        let (mut session, _) = scripted_session(b"");
        let mut text = STANDARD.encode(b"four").into_bytes();
        text.push(b'\n');
        session.wire_buf = text;
        assert_eq!(session.decode_field(4).unwrap(), b"four");
    }

    #[test]
    fn frame_end_is_single_terminator_byte() {
        let (mut session, handle) = scripted_session(b"");
        session.write_frame_end().unwrap();
        assert_eq!(handle.written(), vec![0x0D]);
    }

    #[test]
    fn frame_end_read_skipped_without_idle_marker() {
        let (mock, _handle) = MockTransport::scripted();
        let profile = DeviceProfile {
            pacing_ms: 0,
            reads_idle_marker: false,
            ..DeviceProfile::default()
        };
        let mut session = Session::attach(Box::new(mock), profile);
        // Script is empty; a read attempt would fail.
        assert!(session.read_frame_end().is_ok());
    }
}
