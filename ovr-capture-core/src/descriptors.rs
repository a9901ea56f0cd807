use alloc::vec::Vec;
use crate::packets::*;
use crate::headers::PacketDescriptorPacket;

fn descriptor<P: Packet>() -> PacketDescriptorPacket {
    PacketDescriptorPacket {
        packet_id: P::ID as u32,
        version: P::VERSION,
        sizeof_packet: P::SIZE,
        sizeof_payload_size_type: <P::PayloadSize as PayloadSizeType>::SIZE,
    }
}

/// Descriptor table sent to every client after a successful handshake.
#[must_use]
pub fn packet_descriptors() -> Vec<PacketDescriptorPacket> {
    alloc::vec![
        descriptor::<ThreadNamePacket>(),
        descriptor::<LabelPacket>(),
        descriptor::<FramePacket>(),
        descriptor::<VSyncPacket>(),
        descriptor::<CpuZoneEnterPacket>(),
        descriptor::<CpuZoneLeavePacket>(),
        descriptor::<GpuZoneEnterPacket>(),
        descriptor::<GpuZoneLeavePacket>(),
        descriptor::<GpuClockSyncPacket>(),
        descriptor::<SensorRangePacket>(),
        descriptor::<SensorSetPacket>(),
        descriptor::<FrameBufferPacket>(),
        descriptor::<LogPacket>(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let table = packet_descriptors();
        assert_eq!(table.len(), 13);
        for (i, a) in table.iter().enumerate() {
            assert!(table[i + 1..].iter().all(|b| b.packet_id != a.packet_id));
        }
    }

    #[test]
    fn payload_types() {
        let table = packet_descriptors();
        let find = |id: PacketId| table.iter().find(|d| d.packet_id == id as u32).copied().unwrap();
        assert_eq!(find(PacketId::Label).sizeof_payload_size_type, 1);
        assert_eq!(find(PacketId::Log).sizeof_payload_size_type, 2);
        assert_eq!(find(PacketId::FrameBuffer).sizeof_payload_size_type, 4);
        assert_eq!(find(PacketId::CpuZoneEnter).sizeof_payload_size_type, 0);
        assert_eq!(find(PacketId::CpuZoneEnter).sizeof_packet, 12);
    }
}
