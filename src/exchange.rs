// Exchange engine: the one generic request/response driver every typed
// operation funnels through. Strictly sequential, one command in flight,
// first error wins, no partial results.

use log::{debug, warn};

use crate::session::Session;
use crate::types::{CpError, CpResult, ACK_SIZE, VERB_SIZE};

/// Shape of one expected response field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSpec {
    /// Maximum base64 text length on the wire.
    pub text_max: usize,
    /// Decoded size the field must have exactly; zero means the field is
    /// already text and is passed through undecoded.
    pub raw_size: usize,
}

impl Session {
    /// Run one full command cycle: wake, verb, arguments, terminator,
    /// optional ack validation, one read per response spec, then the
    /// frame-end discard. Returns the response fields in declared order.
    ///
    /// Any failure means no usable output was produced, even if some
    /// fields decoded before the error.
    pub fn exchange(
        &mut self,
        verb: &[u8; VERB_SIZE],
        ack: Option<&[u8; ACK_SIZE]>,
        args: &[&[u8]],
        specs: &[ResponseSpec],
    ) -> CpResult<Vec<Vec<u8>>> {
        if !self.initialized {
            return Err(CpError::InvalidCall);
        }

        self.wake()?;

        self.write_verb(verb)?;
        for arg in args {
            self.write_argument(arg)?;
        }
        self.write_frame_end()?;

        if let Some(expected) = ack {
            let n = self.read_field(ACK_SIZE)?;
            if n != ACK_SIZE || self.wire_buf.as_slice() != &expected[..] {
                warn!(
                    "ack mismatch: expected {}, got {}",
                    String::from_utf8_lossy(&expected[..]),
                    String::from_utf8_lossy(&self.wire_buf)
                );
                return Err(CpError::Fail);
            }
        }

        let mut fields = Vec::with_capacity(specs.len());
        for spec in specs {
            let n = self.read_field(spec.text_max + 1)?;
            if spec.raw_size > 0 {
                fields.push(self.decode_field(spec.raw_size)?);
            } else {
                fields.push(self.wire_buf[..n].to_vec());
            }
        }

        // The idle marker may already have been consumed as a field
        // terminator on some firmware; a miss here is not an error.
        let _ = self.read_frame_end();

        debug!(
            "exchange {} complete, {} field(s)",
            String::from_utf8_lossy(verb),
            fields.len()
        );
        Ok(fields)
    }

    /// Wake handshake: poke the device with `!` until it answers `?`.
    /// Unbounded by design; liveness is the caller's deadline to enforce,
    /// via the transport read timeout or an external watchdog.
    fn wake(&mut self) -> CpResult<()> {
        loop {
            self.write_paced(b"!")?;
            match self.transport.read_byte() {
                Ok(b'?') => return Ok(()),
                Ok(_) => continue,
                Err(err) => {
                    warn!("wake read failed: {}", err);
                    return Err(CpError::Fail);
                }
            }
        }
    }
}
