//! Per-thread double-buffered event streams.
//!
//! The owning thread appends packets to the *cache* buffer. The server thread swaps the
//! cache and *flush* buffers under the stream lock, reopens the gate for blocked writers,
//! and sends the flush buffer without holding the lock.

use std::io::Write;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use log::{trace, warn};
use ovr_capture_core::config::StreamConfig;
use ovr_capture_core::packets::{Packet, PayloadSizeType};
use crate::context::ConnectionState;
use crate::encoder;
use crate::sync::{Backoff, Gate, SpinLock};

pub struct AsyncStream {
    thread_id: u32,
    thread_name: Mutex<Option<String>>,
    /// Connection generation the thread name was last sent in
    name_sent_in: AtomicU64,

    cache: SpinLock<Vec<u8>>,
    flush_buf: Mutex<Vec<u8>>,
    gate: Gate,

    config: StreamConfig,
    connection: Arc<ConnectionState>,
    retired: AtomicBool,
}

impl AsyncStream {
    pub(crate) fn new(thread_id: u32, thread_name: Option<String>, config: StreamConfig, connection: Arc<ConnectionState>) -> Self {
        Self {
            thread_id,
            thread_name: Mutex::new(thread_name),
            name_sent_in: AtomicU64::new(0),
            cache: SpinLock::new(Vec::with_capacity(config.buffer_size)),
            flush_buf: Mutex::new(Vec::with_capacity(config.buffer_size)),
            gate: Gate::new(),
            config,
            connection,
            retired: AtomicBool::new(false),
        }
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn write_packet<P: Packet>(&self, packet: &P) -> bool {
        self.write_packet_with_payload(packet, &[])
    }

    /// Appends a packet to the cache buffer, blocking while the buffer is full.
    ///
    /// Returns `false` if nothing was written: not connected, the connection dropped while
    /// waiting for room, or the packet can never fit.
    pub fn write_packet_with_payload<P: Packet>(&self, packet: &P, payload: &[u8]) -> bool {
        let size = encoder::encoded_size::<P>(payload.len());
        if size > self.config.buffer_size {
            warn!("[capture] Dropping {:?} packet of {} bytes, stream buffer is {} bytes", P::ID, size, self.config.buffer_size);
            return false;
        }
        if payload.len() > <P::PayloadSize as PayloadSizeType>::MAX_LEN {
            warn!("[capture] Dropping {:?} packet, payload of {} bytes is too large", P::ID, payload.len());
            return false;
        }

        loop {
            if !self.connection.is_connected() {
                return false;
            }
            {
                let mut cache = self.cache.lock();
                if cache.len() + size <= self.config.buffer_size {
                    return match encoder::encode_packet(&mut cache, packet, payload) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("[capture] Failed to encode {:?} packet: {}", P::ID, e);
                            false
                        }
                    };
                }
                // closed under the lock, so the next swap is guaranteed to reopen it
                self.gate.close();
            }

            let backoff = Backoff::new(self.config.spin_limit, self.config.yield_limit);
            if !self.gate.wait(backoff, || !self.connection.is_connected()) {
                return false;
            }
        }
    }

    /// Swaps the buffers and sends whatever the owning thread wrote since the last flush as
    /// one `StreamHeaderPacket`-prefixed chunk. Returns `false` on a socket error.
    pub fn flush(&self, w: &mut impl Write) -> bool {
        let mut flush_buf = self.flush_buf.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut cache = self.cache.lock();
            mem::swap(&mut *cache, &mut *flush_buf);
            self.gate.open();
        }

        if flush_buf.is_empty() {
            return true;
        }
        trace!("[capture] Flushing {} bytes from thread {}", flush_buf.len(), self.thread_id);
        let res = encoder::send_stream_chunk(w, self.thread_id, &flush_buf);
        flush_buf.clear();
        res.is_ok()
    }

    /// Drops unsent data and wakes blocked writers.
    pub(crate) fn reset(&self) {
        self.cache.lock().clear();
        self.flush_buf.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.gate.open();
    }

    pub(crate) fn release(&self) {
        self.gate.open();
    }

    pub(crate) fn set_thread_name(&self, name: &str) {
        *self.thread_name.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.to_string());
        self.name_sent_in.store(0, Ordering::Release);
    }

    /// Thread name to announce if it was not yet sent during connection `generation`.
    pub(crate) fn take_unsent_name(&self, generation: u64) -> Option<String> {
        if self.name_sent_in.swap(generation, Ordering::AcqRel) == generation {
            return None;
        }
        self.thread_name.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    fn is_drained(&self) -> bool {
        self.retired.load(Ordering::Acquire) && self.cache.lock().is_empty()
    }
}

/// All live streams of one context. Streams of exited threads stay until they are drained.
#[derive(Default)]
pub struct StreamRegistry {
    streams: Mutex<Vec<Arc<AsyncStream>>>,
}

impl StreamRegistry {
    /// Adds a stream, dropping streams of exited threads that have nothing left to send.
    pub(crate) fn register(&self, stream: Arc<AsyncStream>) {
        let mut streams = self.lock();
        streams.retain(|s| !s.is_drained());
        streams.push(stream);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<AsyncStream>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Arc<AsyncStream>> {
        self.lock().clone()
    }

    /// Flushes every stream, stopping at the first socket error.
    pub fn flush_all(&self, w: &mut impl Write) -> bool {
        for stream in self.snapshot() {
            if !stream.flush(w) {
                return false;
            }
        }
        self.lock().retain(|s| !s.is_drained());
        true
    }

    pub(crate) fn release_all(&self) {
        for stream in self.snapshot() {
            stream.release();
        }
    }

    pub(crate) fn reset(&self) {
        let mut streams = self.lock();
        for stream in streams.iter() {
            stream.reset();
        }
        streams.retain(|s| !s.retired.load(Ordering::Acquire));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
