use std::io::{self, Write};
use serde::Serialize;
use ovr_capture_core::headers::{
    ConnectionHeaderPacket, PacketDescriptorHeaderPacket, PacketDescriptorPacket, StreamHeaderPacket,
};
use ovr_capture_core::packets::{Packet, PayloadSizeType};
use crate::error::{CaptureError, Result};

/// Bytes a packet occupies inside a stream chunk: id byte, fixed part, payload length, payload.
pub fn encoded_size<P: Packet>(payload_len: usize) -> usize {
    1 + P::SIZE as usize + <P::PayloadSize as PayloadSizeType>::SIZE as usize + payload_len
}

/// Appends one event packet to `out`. On error `out` is left untouched.
pub fn encode_packet<P: Packet>(out: &mut Vec<u8>, packet: &P, payload: &[u8]) -> Result<()> {
    let payload_size = P::PayloadSize::from_len(payload.len()).ok_or(CaptureError::PayloadTooLarge {
        size: payload.len(),
        max: <P::PayloadSize as PayloadSizeType>::MAX_LEN,
    })?;

    let start = out.len();
    out.push(P::ID as u8);
    let res = bincode::serialize_into(&mut *out, packet)
        .and_then(|()| bincode::serialize_into(&mut *out, &payload_size));
    if let Err(e) = res {
        out.truncate(start);
        return Err(e.into());
    }
    out.extend_from_slice(payload);
    Ok(())
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn into_io(e: bincode::Error) -> io::Error {
    match *e {
        bincode::ErrorKind::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

fn send<T: Serialize>(w: &mut impl Write, value: &T) -> io::Result<()> {
    bincode::serialize_into(w, value).map_err(into_io)
}

pub fn send_connection_header(w: &mut impl Write, header: &ConnectionHeaderPacket) -> io::Result<()> {
    send(w, header)
}

pub fn send_descriptors(w: &mut impl Write, descriptors: &[PacketDescriptorPacket]) -> io::Result<()> {
    send(w, &PacketDescriptorHeaderPacket { num_packet_types: descriptors.len() as u32 })?;
    for descriptor in descriptors {
        send(w, descriptor)?;
    }
    Ok(())
}

pub fn send_stream_chunk(w: &mut impl Write, thread_id: u32, data: &[u8]) -> io::Result<()> {
    send(w, &StreamHeaderPacket { thread_id, stream_size: data.len() as u32 })?;
    w.write_all(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovr_capture_core::packets::{CpuZoneEnterPacket, FramePacket, LabelPacket, LogPacket};

    #[test]
    fn packet_without_payload() {
        let mut out = Vec::new();
        encode_packet(&mut out, &FramePacket { timestamp: 0x0102 }, &[]).unwrap();
        assert_eq!(out, [3, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(out.len(), encoded_size::<FramePacket>(0));
    }

    #[test]
    fn packet_with_payload() {
        let mut out = Vec::new();
        encode_packet(&mut out, &LabelPacket { label_id: 7 }, b"Render").unwrap();
        assert_eq!(out[0], 2);
        assert_eq!(&out[1..5], &7u32.to_le_bytes());
        assert_eq!(out[5], 6);
        assert_eq!(&out[6..], b"Render");
        assert_eq!(out.len(), encoded_size::<LabelPacket>(6));
    }

    #[test]
    fn oversized_payload_leaves_buffer_untouched() {
        let mut out = vec![0xaa];
        let payload = vec![0u8; 70_000];
        let err = encode_packet(&mut out, &LogPacket::default(), &payload).unwrap_err();
        assert!(matches!(err, CaptureError::PayloadTooLarge { size: 70_000, max: 65_535 }));
        assert_eq!(out, [0xaa]);

        assert!(encode_packet(&mut out, &CpuZoneEnterPacket::default(), b"x").is_err());
        assert_eq!(out, [0xaa]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 3), "hel");
        assert_eq!(truncate_str("héllo", 2), "h");
    }

    #[test]
    fn stream_chunk_framing() {
        let mut out = Vec::new();
        send_stream_chunk(&mut out, 5, &[9, 9, 9]).unwrap();
        assert_eq!(out, [5, 0, 0, 0, 3, 0, 0, 0, 9, 9, 9]);
    }
}
