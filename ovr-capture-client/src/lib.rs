//! Remote side of a capture session: finds targets, performs the handshake and decodes the
//! per-thread streams.

pub mod decoder;
pub mod discovery;
pub mod error;
pub mod trace_export;

use std::collections::HashMap;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use log::{debug, info};
use serde::de::DeserializeOwned;
use ovr_capture_core::consts::PROTOCOL_VERSION;
use ovr_capture_core::headers::{
    ConnectionHeaderPacket, PacketDescriptorHeaderPacket, PacketDescriptorPacket, StreamHeaderPacket,
};
use ovr_capture_core::CaptureFlags;

pub use decoder::{CaptureEvent, StreamDecoder};
pub use discovery::{discover, DiscoveredHost, DiscoveryListener};
pub use error::{ClientError, Result};
pub use trace_export::ChromeTrace;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for a single chunk, well above the largest stream buffer in use.
const MAX_CHUNK_SIZE: u32 = 256 * 1024 * 1024;

/// Events one thread recorded between two flushes.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamChunk {
    pub thread_id: u32,
    pub events: Vec<CaptureEvent>,
}

pub struct CaptureClient {
    reader: BufReader<TcpStream>,
    flags: CaptureFlags,
    descriptors: Vec<PacketDescriptorPacket>,
    decoder: StreamDecoder,
    labels: HashMap<u32, String>,
    thread_names: HashMap<u32, String>,
}

fn read_header<T: DeserializeOwned>(r: &mut impl Read, size: u32) -> Result<T> {
    let mut buf = vec![0u8; size as usize];
    r.read_exact(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

impl CaptureClient {
    /// Connects and negotiates `requested` flags. Fails if the server runs another protocol
    /// version or shares none of the requested flags.
    pub fn connect(addr: impl ToSocketAddrs, requested: CaptureFlags) -> Result<Self> {
        let addr: SocketAddr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to connect to"))?;
        let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;

        let hello = ConnectionHeaderPacket::new(requested);
        stream.write_all(&bincode::serialize(&hello)?)?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let reply: ConnectionHeaderPacket = read_header(&mut reader, ConnectionHeaderPacket::SIZE)?;
        if reply.version != PROTOCOL_VERSION {
            return Err(ClientError::VersionMismatch { local: PROTOCOL_VERSION, remote: reply.version });
        }
        if reply.size != ConnectionHeaderPacket::SIZE {
            return Err(ClientError::Malformed(format!("connection header of {} bytes", reply.size)));
        }
        let flags = reply.flags();
        if flags.is_empty() {
            return Err(ClientError::Rejected { requested: requested.bits() });
        }

        let table: PacketDescriptorHeaderPacket = read_header(&mut reader, PacketDescriptorHeaderPacket::SIZE)?;
        let descriptors = (0..table.num_packet_types)
            .map(|_| read_header(&mut reader, PacketDescriptorPacket::SIZE))
            .collect::<Result<Vec<PacketDescriptorPacket>>>()?;
        let decoder = StreamDecoder::new(&descriptors)?;
        info!("Connected to {}, capturing {:?} with {} packet types", addr, flags, descriptors.len());

        Ok(Self {
            reader,
            flags,
            descriptors,
            decoder,
            labels: HashMap::new(),
            thread_names: HashMap::new(),
        })
    }

    /// Flags the server agreed to capture.
    pub fn flags(&self) -> CaptureFlags {
        self.flags
    }

    pub fn descriptors(&self) -> &[PacketDescriptorPacket] {
        &self.descriptors
    }

    /// Label names received so far, by ID.
    pub fn labels(&self) -> &HashMap<u32, String> {
        &self.labels
    }

    pub fn thread_names(&self) -> &HashMap<u32, String> {
        &self.thread_names
    }

    /// Bounds how long [`CaptureClient::next_chunk`] blocks; a timeout is reported as
    /// `ClientError::Timeout`.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.reader.get_ref().set_read_timeout(timeout)?)
    }

    /// Reads and decodes the next chunk. `None` once the server closed the connection.
    pub fn next_chunk(&mut self) -> Result<Option<StreamChunk>> {
        let mut header = [0u8; StreamHeaderPacket::SIZE as usize];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(ClientError::Timeout);
            }
            Err(e) => return Err(e.into()),
        }
        let header: StreamHeaderPacket = bincode::deserialize(&header)?;
        if header.stream_size > MAX_CHUNK_SIZE {
            return Err(ClientError::Malformed(format!("chunk of {} bytes", header.stream_size)));
        }

        let mut data = vec![0u8; header.stream_size as usize];
        self.reader.read_exact(&mut data)?;
        let events = self.decoder.decode(&data)?;
        debug!("Chunk from thread {}: {} bytes, {} events", header.thread_id, data.len(), events.len());

        for event in &events {
            match event {
                CaptureEvent::Label { label_id, name } => {
                    self.labels.entry(*label_id).or_insert_with(|| name.clone());
                }
                CaptureEvent::ThreadName(name) => {
                    self.thread_names.insert(header.thread_id, name.clone());
                }
                _ => {}
            }
        }

        Ok(Some(StreamChunk { thread_id: header.thread_id, events }))
    }

    /// Records until the server disconnects, feeding every chunk into `trace`.
    pub fn record(&mut self, trace: &mut ChromeTrace) -> Result<()> {
        while let Some(chunk) = self.next_chunk()? {
            trace.add_events(chunk.thread_id, &chunk.events);
        }
        Ok(())
    }
}
