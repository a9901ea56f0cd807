//! Framing packets: discovery, handshake, descriptor table and per-thread stream chunks.

use serde::{Deserialize, Serialize};
use crate::consts::{PACKAGE_NAME_LEN, PROTOCOL_VERSION, ZERO_CONFIG_MAGIC};
use crate::CaptureFlags;

/// UDP advertisement of a capture target.
///
/// Layout: `magic: u64`, `tcp_port: u32`, `package_name: [u8; 64]`, little-endian.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZeroConfigPacket {
    pub magic: u64,
    pub tcp_port: u32,
    pub package_name: [u8; PACKAGE_NAME_LEN],
}

impl ZeroConfigPacket {
    pub const SIZE: usize = 8 + 4 + PACKAGE_NAME_LEN;

    /// Builds an advertisement, truncating `package_name` to 63 bytes on a char boundary
    /// so the buffer always stays NUL-terminated.
    #[must_use]
    pub fn new(tcp_port: u16, package_name: &str) -> Self {
        let mut end = package_name.len().min(PACKAGE_NAME_LEN - 1);
        while !package_name.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = [0u8; PACKAGE_NAME_LEN];
        buf[..end].copy_from_slice(&package_name.as_bytes()[..end]);

        Self {
            magic: ZERO_CONFIG_MAGIC,
            tcp_port: tcp_port as u32,
            package_name: buf,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..8].copy_from_slice(&self.magic.to_le_bytes());
        out[8..12].copy_from_slice(&self.tcp_port.to_le_bytes());
        out[12..].copy_from_slice(&self.package_name);
        out
    }

    /// Returns `None` for short datagrams or a foreign magic number.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let magic = u64::from_le_bytes(bytes[..8].try_into().ok()?);
        if magic != ZERO_CONFIG_MAGIC {
            return None;
        }
        let tcp_port = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
        let mut package_name = [0u8; PACKAGE_NAME_LEN];
        package_name.copy_from_slice(&bytes[12..Self::SIZE]);

        Some(Self { magic, tcp_port, package_name })
    }

    /// Package name up to the first NUL; invalid UTF-8 yields the valid prefix.
    #[must_use]
    pub fn package_name(&self) -> &str {
        let len = self.package_name.iter().position(|&b| b == 0).unwrap_or(PACKAGE_NAME_LEN);
        match core::str::from_utf8(&self.package_name[..len]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.package_name[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

/// First message in each direction of a TCP connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHeaderPacket {
    pub size: u32,
    pub version: u32,
    pub flags: u32,
}

impl ConnectionHeaderPacket {
    pub const SIZE: u32 = 12;

    #[must_use]
    pub fn new(flags: CaptureFlags) -> Self {
        Self {
            size: Self::SIZE,
            version: PROTOCOL_VERSION,
            flags: flags.bits(),
        }
    }

    #[must_use]
    pub fn flags(&self) -> CaptureFlags {
        CaptureFlags::from_bits(self.flags)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketDescriptorHeaderPacket {
    pub num_packet_types: u32,
}

impl PacketDescriptorHeaderPacket {
    pub const SIZE: u32 = 4;
}

/// Self-description of one event packet type. A reader that does not know `packet_id`
/// can still skip it: `sizeof_packet` bytes, then a `sizeof_payload_size_type` wide
/// length and that many payload bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketDescriptorPacket {
    pub packet_id: u32,
    pub version: u32,
    pub sizeof_packet: u32,
    pub sizeof_payload_size_type: u32,
}

impl PacketDescriptorPacket {
    pub const SIZE: u32 = 16;
}

/// Prefix of every per-thread chunk on the TCP stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeaderPacket {
    pub thread_id: u32,
    pub stream_size: u32,
}

impl StreamHeaderPacket {
    pub const SIZE: u32 = 8;
}

/// Prefix of every event packet inside a chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub packet_id: u8,
}

impl PacketHeader {
    pub const SIZE: u32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_config_truncates_long_names() {
        let long = "x".repeat(100);
        let packet = ZeroConfigPacket::new(3030, &long);
        assert_eq!(packet.package_name[63], 0);
        assert_eq!(packet.package_name().len(), 63);
    }

    #[test]
    fn zero_config_truncates_on_char_boundary() {
        // 62 ASCII bytes followed by a 2-byte char would end at byte 64
        let mut name = "a".repeat(62);
        name.push('é');
        let packet = ZeroConfigPacket::new(1, &name);
        assert_eq!(packet.package_name(), &name[..62]);
    }

    #[test]
    fn zero_config_bytes() {
        let packet = ZeroConfigPacket::new(3031, "com.oculus.demo");
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), 76);
        assert_eq!(&bytes[8..12], &3031u32.to_le_bytes());

        let decoded = ZeroConfigPacket::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.tcp_port, 3031);
        assert_eq!(decoded.package_name(), "com.oculus.demo");
    }

    #[test]
    fn zero_config_rejects_foreign_magic() {
        let mut bytes = ZeroConfigPacket::new(3031, "x").to_bytes();
        bytes[0] ^= 0xff;
        assert!(ZeroConfigPacket::from_bytes(&bytes).is_none());
        assert!(ZeroConfigPacket::from_bytes(&bytes[..20]).is_none());
    }

    #[test]
    fn framing_sizes_match_encoding() {
        let header = ConnectionHeaderPacket::new(CaptureFlags::ALL);
        assert_eq!(bincode::serialized_size(&header).unwrap(), ConnectionHeaderPacket::SIZE as u64);
        let descriptor = PacketDescriptorPacket { packet_id: 1, version: 1, sizeof_packet: 0, sizeof_payload_size_type: 1 };
        assert_eq!(bincode::serialized_size(&descriptor).unwrap(), PacketDescriptorPacket::SIZE as u64);
        let stream = StreamHeaderPacket { thread_id: 7, stream_size: 9 };
        assert_eq!(bincode::serialized_size(&stream).unwrap(), StreamHeaderPacket::SIZE as u64);
        assert_eq!(bincode::serialized_size(&PacketHeader { packet_id: 3 }).unwrap(), 1);
    }
}
