use std::net::{IpAddr, Ipv4Addr};
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use ovr_capture_core::config::StreamConfig;
use ovr_capture_core::consts::{SOCKET_PORT_BEGIN, SOCKET_PORT_END, ZERO_CONFIG_PORT};
use ovr_capture_core::CaptureFlags;

/// Capture configuration. Build it with the `.with_*()` chain:
///
/// ```
/// use ovr_capture::{CaptureConfig, CaptureFlags};
///
/// let config = CaptureConfig::new("com.example.app")
///     .with_flags(CaptureFlags::CPU_ZONES | CaptureFlags::LOGGING)
///     .with_port_range(4000..4010);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Advertised in zero-config broadcasts so tools can tell targets apart
    pub package_name: String,
    /// Features this process is willing to capture. A client only gets the intersection
    /// with what it asks for.
    pub flags: CaptureFlags,
    /// Half-open TCP port range, the first free port is used
    pub port_range: (u16, u16),
    /// `None` disables the UDP advertisement
    pub zero_config: Option<ZeroConfigSettings>,
    pub stream: StreamConfig,
    /// Target period of the server flush loop
    pub flush_interval: Duration,
    pub sensor_poll_interval: Duration,
    /// Root under which sensor files (`sys/class/thermal/...`) are looked up
    pub sysfs_root: PathBuf,
    /// How long a connecting client may take to send its header
    pub handshake_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroConfigSettings {
    pub port: u16,
    pub target: IpAddr,
    pub interval: Duration,
}

impl Default for ZeroConfigSettings {
    fn default() -> Self {
        Self {
            port: ZERO_CONFIG_PORT,
            target: IpAddr::V4(Ipv4Addr::BROADCAST),
            interval: Duration::from_secs(1),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let package_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            package_name,
            flags: CaptureFlags::DEFAULT,
            port_range: (SOCKET_PORT_BEGIN, SOCKET_PORT_END),
            zero_config: Some(ZeroConfigSettings::default()),
            stream: StreamConfig::default(),
            flush_interval: Duration::from_millis(5),
            sensor_poll_interval: Duration::from_millis(100),
            sysfs_root: PathBuf::from("/"),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl CaptureConfig {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            ..Default::default()
        }
    }

    pub fn with_flags(mut self, flags: CaptureFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_port_range(mut self, ports: Range<u16>) -> Self {
        self.port_range = (ports.start, ports.end);
        self
    }

    pub fn with_zero_config(mut self, settings: Option<ZeroConfigSettings>) -> Self {
        self.zero_config = settings;
        self
    }

    pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_sensor_poll_interval(mut self, interval: Duration) -> Self {
        self.sensor_poll_interval = interval;
        self
    }

    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn ports(&self) -> Range<u16> {
        self.port_range.0..self.port_range.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = CaptureConfig::new("demo")
            .with_flags(CaptureFlags::CPU_ZONES)
            .with_port_range(5000..5002)
            .with_zero_config(None);
        assert_eq!(config.package_name, "demo");
        assert_eq!(config.flags, CaptureFlags::CPU_ZONES);
        assert_eq!(config.ports(), 5000..5002);
        assert!(config.zero_config.is_none());
        assert_eq!(config.flush_interval, Duration::from_millis(5));
    }

    #[test]
    fn defaults_follow_protocol_constants() {
        let config = CaptureConfig::default();
        assert_eq!(config.ports(), SOCKET_PORT_BEGIN..SOCKET_PORT_END);
        assert_eq!(config.zero_config.unwrap().port, ZERO_CONFIG_PORT);
        assert_eq!(config.stream.buffer_size, 1024 * 1024);
    }
}
