//! Decoding of per-thread stream chunks into events.
//!
//! Packets this crate knows are decoded by type. Anything else, including known ids whose
//! descriptor announces a different version, is skipped using the sizes from the server's
//! descriptor table.

use std::collections::HashMap;
use ovr_capture_core::headers::PacketDescriptorPacket;
use ovr_capture_core::packets::*;
use crate::error::{ClientError, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum CaptureEvent {
    ThreadName(String),
    Label { label_id: u32, name: String },
    Frame { timestamp: u64 },
    VSync { timestamp: u64 },
    CpuZoneEnter { label_id: u32, timestamp: u64 },
    CpuZoneLeave { timestamp: u64 },
    /// GPU zone timestamps are in the GPU clock domain
    GpuZoneEnter { label_id: u32, timestamp: u64 },
    GpuZoneLeave { timestamp: u64 },
    GpuClockSync { timestamp_cpu: u64, timestamp_gpu: u64 },
    SensorRange {
        label_id: u32,
        interpolation: SensorInterpolation,
        units: SensorUnits,
        min_value: f32,
        max_value: f32,
    },
    SensorSet { label_id: u32, timestamp: u64, value: f32 },
    FrameBuffer {
        /// `None` for formats this crate does not know
        format: Option<FrameBufferFormat>,
        width: u32,
        height: u32,
        timestamp: u64,
        pixels: Vec<u8>,
    },
    Log { timestamp: u64, priority: LogPriority, message: String },
    /// Skipped packet of a type or version this crate cannot decode
    Unknown { packet_id: u8 },
}

/// One packet split into its parts, not yet interpreted.
struct RawPacket<'a> {
    id: u8,
    body: &'a [u8],
    payload: &'a [u8],
}

#[derive(Clone, Debug, Default)]
pub struct StreamDecoder {
    descriptors: HashMap<u8, PacketDescriptorPacket>,
}

fn take<'a>(bytes: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if bytes.len() < n {
        return Err(ClientError::Malformed(format!("{} needs {} bytes, {} left in chunk", what, n, bytes.len())));
    }
    let (head, tail) = bytes.split_at(n);
    *bytes = tail;
    Ok(head)
}

fn read_len(raw: &[u8]) -> usize {
    let mut buf = [0u8; 8];
    buf[..raw.len()].copy_from_slice(raw);
    u64::from_le_bytes(buf) as usize
}

fn text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

impl StreamDecoder {
    pub fn new(descriptors: &[PacketDescriptorPacket]) -> Result<Self> {
        let mut map = HashMap::with_capacity(descriptors.len());
        for d in descriptors {
            let id = u8::try_from(d.packet_id)
                .map_err(|_| ClientError::Malformed(format!("packet id {} does not fit a byte", d.packet_id)))?;
            if d.sizeof_payload_size_type > 8 {
                return Err(ClientError::Malformed(format!(
                    "packet {} has a {} byte payload length",
                    id, d.sizeof_payload_size_type
                )));
            }
            map.insert(id, *d);
        }
        Ok(Self { descriptors: map })
    }

    fn split<'a>(&self, bytes: &mut &'a [u8]) -> Result<RawPacket<'a>> {
        let id = take(bytes, 1, "packet id")?[0];
        let descriptor = self
            .descriptors
            .get(&id)
            .ok_or_else(|| ClientError::Malformed(format!("packet id {} is not in the descriptor table", id)))?;
        let body = take(bytes, descriptor.sizeof_packet as usize, "packet body")?;
        let payload = match descriptor.sizeof_payload_size_type {
            0 => &[][..],
            width => {
                let len = read_len(take(bytes, width as usize, "payload length")?);
                take(bytes, len, "payload")?
            }
        };
        Ok(RawPacket { id, body, payload })
    }

    /// Decodes every packet of one chunk, in order.
    pub fn decode(&self, mut chunk: &[u8]) -> Result<Vec<CaptureEvent>> {
        let mut events = Vec::new();
        while !chunk.is_empty() {
            let raw = self.split(&mut chunk)?;
            events.push(self.interpret(&raw)?);
        }
        Ok(events)
    }

    /// Packet body as `P`, or `None` if the server speaks another version of it.
    fn body<P: Packet>(&self, raw: &RawPacket) -> Result<Option<P>> {
        let matches = self
            .descriptors
            .get(&raw.id)
            .is_some_and(|d| d.version == P::VERSION && d.sizeof_packet == P::SIZE);
        if !matches {
            return Ok(None);
        }
        Ok(Some(bincode::deserialize(raw.body)?))
    }

    fn interpret(&self, raw: &RawPacket) -> Result<CaptureEvent> {
        let unknown = CaptureEvent::Unknown { packet_id: raw.id };
        let Ok(id) = PacketId::try_from(raw.id) else {
            return Ok(unknown);
        };

        let event = match id {
            PacketId::ThreadName => self
                .body::<ThreadNamePacket>(raw)?
                .map(|_| CaptureEvent::ThreadName(text(raw.payload))),
            PacketId::Label => self
                .body::<LabelPacket>(raw)?
                .map(|p| CaptureEvent::Label { label_id: p.label_id, name: text(raw.payload) }),
            PacketId::Frame => self
                .body::<FramePacket>(raw)?
                .map(|p| CaptureEvent::Frame { timestamp: p.timestamp }),
            PacketId::VSync => self
                .body::<VSyncPacket>(raw)?
                .map(|p| CaptureEvent::VSync { timestamp: p.timestamp }),
            PacketId::CpuZoneEnter => self
                .body::<CpuZoneEnterPacket>(raw)?
                .map(|p| CaptureEvent::CpuZoneEnter { label_id: p.label_id, timestamp: p.timestamp }),
            PacketId::CpuZoneLeave => self
                .body::<CpuZoneLeavePacket>(raw)?
                .map(|p| CaptureEvent::CpuZoneLeave { timestamp: p.timestamp }),
            PacketId::GpuZoneEnter => self
                .body::<GpuZoneEnterPacket>(raw)?
                .map(|p| CaptureEvent::GpuZoneEnter { label_id: p.label_id, timestamp: p.timestamp }),
            PacketId::GpuZoneLeave => self
                .body::<GpuZoneLeavePacket>(raw)?
                .map(|p| CaptureEvent::GpuZoneLeave { timestamp: p.timestamp }),
            PacketId::GpuClockSync => self.body::<GpuClockSyncPacket>(raw)?.map(|p| CaptureEvent::GpuClockSync {
                timestamp_cpu: p.timestamp_cpu,
                timestamp_gpu: p.timestamp_gpu,
            }),
            PacketId::SensorRange => self.body::<SensorRangePacket>(raw)?.map(|p| CaptureEvent::SensorRange {
                label_id: p.label_id,
                interpolation: SensorInterpolation::from_u16(p.interpolation),
                units: SensorUnits::from_u16(p.units),
                min_value: p.min_value,
                max_value: p.max_value,
            }),
            PacketId::SensorSet => self.body::<SensorSetPacket>(raw)?.map(|p| CaptureEvent::SensorSet {
                label_id: p.label_id,
                timestamp: p.timestamp,
                value: p.value,
            }),
            PacketId::FrameBuffer => self.body::<FrameBufferPacket>(raw)?.map(|p| CaptureEvent::FrameBuffer {
                format: FrameBufferFormat::from_u32(p.format),
                width: p.width,
                height: p.height,
                timestamp: p.timestamp,
                pixels: raw.payload.to_vec(),
            }),
            PacketId::Log => self.body::<LogPacket>(raw)?.map(|p| CaptureEvent::Log {
                timestamp: p.timestamp,
                priority: LogPriority::from_u32(p.priority),
                message: text(raw.payload),
            }),
        };
        Ok(event.unwrap_or(unknown))
    }
}
