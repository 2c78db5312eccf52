// Client configuration: where the device lives, how the line is driven,
// and which optional wire behaviors this hardware revision has. Loadable
// from a JSON file so deployment targets stay out of the code.

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the device is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Serial,
    UnixSocket,
}

/// Per-hardware-revision wire behavior. These are runtime configuration,
/// never compile-time branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Delay after every single transmitted byte, in milliseconds. The
    /// device wedges permanently if bytes arrive back to back, so this is
    /// a timing contract, not tuning.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Device emits a third challenge response field (the signature
    /// extension block).
    #[serde(default)]
    pub challenge_extension: bool,

    /// Device emits a trailing idle marker byte after each response; when
    /// false the frame-end read is skipped entirely.
    #[serde(default = "default_true")]
    pub reads_idle_marker: bool,
}

fn default_pacing_ms() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for DeviceProfile {
    fn default() -> Self {
        DeviceProfile {
            pacing_ms: default_pacing_ms(),
            challenge_extension: false,
            reads_idle_marker: true,
        }
    }
}

impl DeviceProfile {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Full client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_device_path")]
    pub device_path: String,

    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Read deadline in seconds. The protocol has no timeout of its own;
    /// this is the explicit deadline threaded in at the session boundary.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default)]
    pub profile: DeviceProfile,
}

fn default_device_path() -> String {
    "/dev/ttyS2".to_string()
}

fn default_transport() -> TransportKind {
    TransportKind::Serial
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout_secs() -> u64 {
    120
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            device_path: default_device_path(),
            transport: default_transport(),
            baud_rate: default_baud_rate(),
            read_timeout_secs: default_read_timeout_secs(),
            profile: DeviceProfile::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file. Missing fields fall back to
    /// the defaults above.
    pub fn load(path: &Path) -> io::Result<ClientConfig> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::from)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
