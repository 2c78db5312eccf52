// Session lifecycle: transport ownership, the exclusive advisory lock,
// and the reusable scratch buffers every exchange runs through.

use std::os::unix::io::RawFd;

use log::{debug, warn};
use nix::fcntl::{flock, FlockArg};

use crate::config::{ClientConfig, DeviceProfile, TransportKind};
use crate::transport::{CpTransport, SerialTransport, UnixSocketTransport};
use crate::types::{CpError, CpResult, MAX_RESULT_SIZE};

/// One live connection to the device.
///
/// Exactly one session may hold the lock on a given transport; a second
/// open attempt fails with `ACCESS_DENIED` instead of blocking. A session
/// is not safe for concurrent use from multiple threads; callers
/// serialize all exchanges against it.
pub struct Session {
    pub(crate) transport: Box<dyn CpTransport>,
    pub(crate) profile: DeviceProfile,
    pub(crate) initialized: bool,
    /// Wire text scratch, reused across exchanges.
    pub(crate) wire_buf: Vec<u8>,
    /// Decode scratch, fixed at `MAX_RESULT_SIZE` bytes.
    pub(crate) field_buf: Vec<u8>,
    locked_fd: Option<RawFd>,
}

impl Session {
    /// Open the configured transport, take the exclusive lock and
    /// configure the line. The returned session is ready for exchanges.
    pub fn open(config: &ClientConfig) -> CpResult<Session> {
        let transport: Box<dyn CpTransport> = match config.transport {
            TransportKind::Serial => Box::new(
                SerialTransport::open(&config.device_path, config.baud_rate, config.read_timeout())
                    .map_err(|err| {
                        warn!("failed to open {}: {}", config.device_path, err);
                        CpError::Fail
                    })?,
            ),
            TransportKind::UnixSocket => Box::new(
                UnixSocketTransport::connect(&config.device_path, config.read_timeout()).map_err(
                    |err| {
                        warn!("failed to connect {}: {}", config.device_path, err);
                        CpError::Fail
                    },
                )?,
            ),
        };

        let mut session = Session::attach(transport, config.profile);

        if let Some(fd) = session.transport.lock_handle() {
            acquire_exclusive(fd)?;
            session.locked_fd = Some(fd);
            debug!("exclusive lock acquired on {}", config.device_path);
        }

        Ok(session)
    }

    /// Wrap an already-open transport. Used for transports whose mutual
    /// exclusion lives elsewhere, and by tests.
    pub fn attach(transport: Box<dyn CpTransport>, profile: DeviceProfile) -> Session {
        Session {
            transport,
            profile,
            initialized: true,
            wire_buf: Vec::with_capacity(MAX_RESULT_SIZE + 1),
            field_buf: vec![0u8; MAX_RESULT_SIZE],
            locked_fd: None,
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Release the lock and mark the session unusable. Any further
    /// exchange fails with `INVALID_CALL`. Dropping the session does the
    /// same cleanup.
    pub fn shutdown(&mut self) {
        self.release_lock();
        self.initialized = false;
    }

    fn release_lock(&mut self) {
        if let Some(fd) = self.locked_fd.take() {
            if let Err(err) = flock(fd, FlockArg::Unlock) {
                warn!("failed to release transport lock: {}", err);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_lock();
    }
}

/// Take the exclusive advisory lock without blocking. A competing holder
/// means ACCESS_DENIED now, never a queue.
fn acquire_exclusive(fd: RawFd) -> CpResult<()> {
    flock(fd, FlockArg::LockExclusiveNonblock).map_err(|err| {
        warn!("transport lock contention: {}", err);
        CpError::AccessDenied
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn attached_session_is_initialized() {
        let (mock, _handle) = MockTransport::scripted();
        let session = Session::attach(Box::new(mock), DeviceProfile::default());
        assert!(session.is_initialized());
    }

    #[test]
    fn shutdown_marks_session_unusable() {
        let (mock, _handle) = MockTransport::scripted();
        let mut session = Session::attach(Box::new(mock), DeviceProfile::default());
        session.shutdown();
        assert!(!session.is_initialized());
    }

    #[test]
    fn second_lock_on_held_transport_is_access_denied() {
        let path = std::env::temp_dir().join(format!("cp-client-lock-{}", std::process::id()));
        std::fs::write(&path, b"").unwrap();
        let first = std::fs::File::open(&path).unwrap();
        let second = std::fs::File::open(&path).unwrap();

        assert!(acquire_exclusive(first.as_raw_fd()).is_ok());
        assert_eq!(
            acquire_exclusive(second.as_raw_fd()),
            Err(CpError::AccessDenied)
        );

        drop(first);
        drop(second);
        let _ = std::fs::remove_file(&path);
    }
}
