// Byte transports the CP can sit behind: a raw serial line on most
// hardware, a local Unix socket where a daemon emulates the device, and a
// scripted mock for tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Blocking single-byte duplex channel to the device.
///
/// The protocol is strictly one byte at a time in both directions; the
/// codec layer owns all pacing and framing, so implementations only move
/// individual bytes.
pub trait CpTransport: Send {
    fn read_byte(&mut self) -> io::Result<u8>;
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Descriptor used for the exclusive advisory lock, for transports
    /// that support one.
    fn lock_handle(&self) -> Option<RawFd> {
        None
    }
}

/// Serial line transport. The port is opened raw (no canonical mode, no
/// echo), 8N1, at the configured baud rate.
pub struct SerialTransport {
    port: serialport::TTYPort,
}

impl SerialTransport {
    /// The timeout is the session's read deadline: the protocol itself
    /// never times out, so a stalled device surfaces here.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> io::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .open_native()
            .map_err(io::Error::from)?;
        Ok(SerialTransport { port })
    }
}

impl CpTransport for SerialTransport {
    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.port.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.port.write_all(&[byte])
    }

    fn lock_handle(&self) -> Option<RawFd> {
        Some(self.port.as_raw_fd())
    }
}

/// Unix socket transport, for deployments where a daemon stands in for
/// the serial device. Mutual exclusion is the daemon's concern there, so
/// no lock handle is exposed.
pub struct UnixSocketTransport {
    stream: UnixStream,
}

impl UnixSocketTransport {
    pub fn connect(path: &str, timeout: Duration) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(timeout))?;
        Ok(UnixSocketTransport { stream })
    }
}

impl CpTransport for UnixSocketTransport {
    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.stream.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.stream.write_all(&[byte])
    }
}

#[derive(Default)]
struct MockState {
    reads: VecDeque<u8>,
    writes: Vec<u8>,
}

/// Scripted in-memory transport. Reads come from a queue the test fills
/// ahead of time; writes are recorded for inspection through the paired
/// [`MockHandle`].
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`MockTransport`] that has been moved into a
/// session.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn scripted() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            MockTransport {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    /// Append bytes to the read script.
    pub fn queue_read(&self, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.reads.extend(bytes.iter().copied());
    }

    /// Everything written so far, in order.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Bytes still queued for reading.
    pub fn unread(&self) -> usize {
        self.state.lock().unwrap().reads.len()
    }
}

impl CpTransport for MockTransport {
    fn read_byte(&mut self) -> io::Result<u8> {
        let mut state = self.state.lock().unwrap();
        state.reads.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "mock read script exhausted")
        })
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.state.lock().unwrap().writes.push(byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_replays_script_in_order() {
        let (mut mock, handle) = MockTransport::scripted();
        handle.queue_read(b"ab");
        assert_eq!(mock.read_byte().unwrap(), b'a');
        assert_eq!(mock.read_byte().unwrap(), b'b');
        assert!(mock.read_byte().is_err());
    }

    #[test]
    fn mock_records_writes() {
        let (mut mock, handle) = MockTransport::scripted();
        mock.write_byte(b'!').unwrap();
        mock.write_byte(0x0D).unwrap();
        assert_eq!(handle.written(), vec![b'!', 0x0D]);
        assert_eq!(handle.unread(), 0);
    }
}
