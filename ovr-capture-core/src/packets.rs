//! Event packets written into per-thread streams.
//!
//! Every packet is a fixed layout record: fields are encoded in declaration order as
//! little-endian fixed-width integers/floats with no padding (bincode's fixint encoding).
//! `Packet::SIZE` states that layout explicitly and is what the descriptor table announces,
//! so it must be kept in sync with the fields by hand.
//!
//! On the wire an event is `PacketHeader { packet_id }`, the packet body, then, for packet
//! types with a payload, the payload length as `PayloadSize` followed by the payload bytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub trait Packet: Serialize + DeserializeOwned {
    const ID: PacketId;
    const VERSION: u32;
    /// Encoded size of the fixed part in bytes.
    const SIZE: u32;
    type PayloadSize: PayloadSizeType;
}

/// Integer type prefixing a variable length payload.
pub trait PayloadSizeType: Copy + Serialize + DeserializeOwned {
    /// Encoded width in bytes. Zero means the packet carries no payload.
    const SIZE: u32;
    const MAX_LEN: usize;

    fn from_len(len: usize) -> Option<Self>;
    fn len(self) -> usize;
}

/// Marker for packets without a payload. Encodes to zero bytes.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct NoPayload;

impl PayloadSizeType for NoPayload {
    const SIZE: u32 = 0;
    const MAX_LEN: usize = 0;

    fn from_len(len: usize) -> Option<Self> {
        (len == 0).then_some(NoPayload)
    }
    fn len(self) -> usize {
        0
    }
}

macro_rules! payload_size_int {
    ($($t:ty),*) => {$(
        impl PayloadSizeType for $t {
            const SIZE: u32 = core::mem::size_of::<$t>() as u32;
            const MAX_LEN: usize = <$t>::MAX as usize;

            fn from_len(len: usize) -> Option<Self> {
                <$t>::try_from(len).ok()
            }
            fn len(self) -> usize {
                self as usize
            }
        }
    )*};
}
payload_size_int!(u8, u16, u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketId {
    ThreadName = 1,
    Label = 2,
    Frame = 3,
    VSync = 4,
    CpuZoneEnter = 5,
    CpuZoneLeave = 6,
    GpuZoneEnter = 7,
    GpuZoneLeave = 8,
    GpuClockSync = 9,
    SensorRange = 10,
    SensorSet = 11,
    FrameBuffer = 12,
    Log = 13,
}

impl TryFrom<u8> for PacketId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use PacketId::*;
        Ok(match value {
            1 => ThreadName,
            2 => Label,
            3 => Frame,
            4 => VSync,
            5 => CpuZoneEnter,
            6 => CpuZoneLeave,
            7 => GpuZoneEnter,
            8 => GpuZoneLeave,
            9 => GpuClockSync,
            10 => SensorRange,
            11 => SensorSet,
            12 => FrameBuffer,
            13 => Log,
            v => return Err(v),
        })
    }
}

macro_rules! packet {
    ($ty:ident, $id:ident, version: $ver:expr, size: $size:expr, payload: $payload:ty) => {
        impl Packet for $ty {
            const ID: PacketId = PacketId::$id;
            const VERSION: u32 = $ver;
            const SIZE: u32 = $size;
            type PayloadSize = $payload;
        }
    };
}

/// Payload: thread name.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadNamePacket;
packet!(ThreadNamePacket, ThreadName, version: 1, size: 0, payload: u8);

/// Payload: label name.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelPacket {
    pub label_id: u32,
}
packet!(LabelPacket, Label, version: 1, size: 4, payload: u8);

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FramePacket {
    pub timestamp: u64,
}
packet!(FramePacket, Frame, version: 1, size: 8, payload: NoPayload);

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VSyncPacket {
    pub timestamp: u64,
}
packet!(VSyncPacket, VSync, version: 1, size: 8, payload: NoPayload);

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuZoneEnterPacket {
    pub label_id: u32,
    pub timestamp: u64,
}
packet!(CpuZoneEnterPacket, CpuZoneEnter, version: 1, size: 12, payload: NoPayload);

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuZoneLeavePacket {
    pub timestamp: u64,
}
packet!(CpuZoneLeavePacket, CpuZoneLeave, version: 1, size: 8, payload: NoPayload);

/// GPU timestamps are in the GPU clock domain, see `GpuClockSyncPacket`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuZoneEnterPacket {
    pub label_id: u32,
    pub timestamp: u64,
}
packet!(GpuZoneEnterPacket, GpuZoneEnter, version: 1, size: 12, payload: NoPayload);

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuZoneLeavePacket {
    pub timestamp: u64,
}
packet!(GpuZoneLeavePacket, GpuZoneLeave, version: 1, size: 8, payload: NoPayload);

/// Pairs a CPU timestamp with the GPU timestamp taken at the same moment.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuClockSyncPacket {
    pub timestamp_cpu: u64,
    pub timestamp_gpu: u64,
}
packet!(GpuClockSyncPacket, GpuClockSync, version: 1, size: 16, payload: NoPayload);

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorRangePacket {
    pub label_id: u32,
    pub interpolation: u16,
    pub units: u16,
    pub min_value: f32,
    pub max_value: f32,
}
packet!(SensorRangePacket, SensorRange, version: 1, size: 16, payload: NoPayload);

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSetPacket {
    pub label_id: u32,
    pub timestamp: u64,
    pub value: f32,
}
packet!(SensorSetPacket, SensorSet, version: 1, size: 16, payload: NoPayload);

/// Payload: raw pixels in `format`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameBufferPacket {
    pub format: u32,
    pub width: u32,
    pub height: u32,
    pub timestamp: u64,
}
packet!(FrameBufferPacket, FrameBuffer, version: 1, size: 20, payload: u32);

/// Payload: UTF-8 message.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogPacket {
    pub timestamp: u64,
    pub priority: u32,
}
packet!(LogPacket, Log, version: 1, size: 12, payload: u16);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u16)]
pub enum SensorInterpolation {
    #[default]
    Linear = 0,
    Nearest = 1,
}

impl SensorInterpolation {
    #[must_use]
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::Nearest,
            _ => Self::Linear,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u16)]
pub enum SensorUnits {
    #[default]
    None = 0,
    Hz = 1,
    KHz = 2,
    MHz = 3,
    GHz = 4,
    Byte = 5,
    KByte = 6,
    MByte = 7,
    GByte = 8,
    Celsius = 9,
    Percent = 10,
}

impl SensorUnits {
    #[must_use]
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::Hz,
            2 => Self::KHz,
            3 => Self::MHz,
            4 => Self::GHz,
            5 => Self::Byte,
            6 => Self::KByte,
            7 => Self::MByte,
            8 => Self::GByte,
            9 => Self::Celsius,
            10 => Self::Percent,
            _ => Self::None,
        }
    }

    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Hz => "Hz",
            Self::KHz => "KHz",
            Self::MHz => "MHz",
            Self::GHz => "GHz",
            Self::Byte => "B",
            Self::KByte => "KB",
            Self::MByte => "MB",
            Self::GByte => "GB",
            Self::Celsius => "°C",
            Self::Percent => "%",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FrameBufferFormat {
    Rgb565 = 0,
    Rgba8888 = 1,
    Dxt1 = 2,
}

impl FrameBufferFormat {
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Rgb565),
            1 => Some(Self::Rgba8888),
            2 => Some(Self::Dxt1),
            _ => None,
        }
    }

    /// Exact byte size of a `width` x `height` image in this format, `None` on overflow.
    #[must_use]
    pub fn image_size(self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        match self {
            Self::Rgb565 => w.checked_mul(h)?.checked_mul(2),
            Self::Rgba8888 => w.checked_mul(h)?.checked_mul(4),
            // 4x4 blocks of 8 bytes
            Self::Dxt1 => w.div_ceil(4).checked_mul(h.div_ceil(4))?.checked_mul(8),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LogPriority {
    Verbose = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Warning = 3,
    Error = 4,
}

impl LogPriority {
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Verbose,
            1 => Self::Debug,
            3 => Self::Warning,
            4 => Self::Error,
            _ => Self::Info,
        }
    }
}
