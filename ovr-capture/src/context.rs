//! Capture session state and the instrumentation API.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use log::{info, warn};
use ovr_capture_core::packets::{
    CpuZoneEnterPacket, CpuZoneLeavePacket, FrameBufferFormat, FrameBufferPacket, FramePacket,
    GpuClockSyncPacket, GpuZoneEnterPacket, GpuZoneLeavePacket, LabelPacket, LogPacket, LogPriority,
    SensorInterpolation, SensorRangePacket, SensorSetPacket, SensorUnits, ThreadNamePacket, VSyncPacket,
};
use ovr_capture_core::{CaptureFlags, Timestamp, TimestampProvider};
use crate::async_stream::{AsyncStream, StreamRegistry};
use crate::config::CaptureConfig;
use crate::encoder::truncate_str;
use crate::label::{Label, LabelRegistry};
use crate::server::Server;
use crate::thread_local_storage;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Negotiated flags of the current connection; empty while no client is connected.
#[derive(Default)]
pub struct ConnectionState {
    flags: AtomicU32,
    generation: AtomicU64,
}

impl ConnectionState {
    #[inline]
    pub fn flags(&self) -> CaptureFlags {
        CaptureFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.flags.load(Ordering::Acquire) != 0
    }

    /// Incremented on every accepted connection, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn connect(&self, flags: CaptureFlags) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.flags.store(flags.bits(), Ordering::Release);
    }

    pub(crate) fn disconnect(&self) {
        self.flags.store(0, Ordering::Release);
    }
}

/// Shared state of one capture session. Instrumentation calls are no-ops unless a client is
/// connected and negotiated the matching flag.
pub struct Capture {
    pub(crate) id: u64,
    pub(crate) config: CaptureConfig,
    pub(crate) connection: Arc<ConnectionState>,
    pub(crate) labels: LabelRegistry,
    pub(crate) streams: StreamRegistry,
}

impl Capture {
    pub(crate) fn new(config: CaptureConfig) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            config,
            connection: Arc::new(ConnectionState::default()),
            labels: LabelRegistry::default(),
            streams: StreamRegistry::default(),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_flags(&self) -> CaptureFlags {
        self.connection.flags()
    }

    /// True if the current connection negotiated every bit of `flag`.
    #[inline]
    pub fn check_flag(&self, flag: CaptureFlags) -> bool {
        let flags = self.connection.flags();
        !flags.is_empty() && flags.contains(flag)
    }

    fn with_stream(&self, f: impl FnOnce(&AsyncStream)) {
        let Some(stream) = thread_local_storage::acquire(self) else {
            return;
        };
        if let Some(name) = stream.take_unsent_name(self.connection.generation()) {
            stream.write_packet_with_payload(&ThreadNamePacket, truncate_str(&name, u8::MAX as usize).as_bytes());
        }
        f(&stream);
    }

    fn ensure_label(&self, stream: &AsyncStream, label: &Label) {
        if label.is_registered_in(self.id) {
            return;
        }
        let announce = self.labels.register(label, || self.connection.is_connected());
        label.mark_registered_in(self.id);
        if announce {
            let name = truncate_str(label.name(), u8::MAX as usize);
            stream.write_packet_with_payload(&LabelPacket { label_id: label.id() }, name.as_bytes());
        }
    }

    /// Names the calling thread in the capture.
    pub fn thread_name(&self, name: &str) {
        thread_local_storage::set_thread_name(self, name);
        if self.is_connected() {
            self.with_stream(|_| {});
        }
    }

    pub fn frame(&self) {
        if !self.is_connected() {
            return;
        }
        let packet = FramePacket { timestamp: Timestamp::now() };
        self.with_stream(|s| {
            s.write_packet(&packet);
        });
    }

    pub fn vsync(&self) {
        if !self.is_connected() {
            return;
        }
        let packet = VSyncPacket { timestamp: Timestamp::now() };
        self.with_stream(|s| {
            s.write_packet(&packet);
        });
    }

    pub fn enter_cpu_zone(&self, label: &Label) {
        if !self.check_flag(CaptureFlags::CPU_ZONES) {
            return;
        }
        self.with_stream(|s| {
            self.ensure_label(s, label);
            s.write_packet(&CpuZoneEnterPacket { label_id: label.id(), timestamp: Timestamp::now() });
        });
    }

    pub fn leave_cpu_zone(&self) {
        if !self.check_flag(CaptureFlags::CPU_ZONES) {
            return;
        }
        self.with_stream(|s| {
            s.write_packet(&CpuZoneLeavePacket { timestamp: Timestamp::now() });
        });
    }

    /// `gpu_timestamp` is in the GPU clock domain, see [`Capture::gpu_clock_sync`].
    pub fn enter_gpu_zone(&self, label: &Label, gpu_timestamp: u64) {
        if !self.check_flag(CaptureFlags::GPU_ZONES) {
            return;
        }
        self.with_stream(|s| {
            self.ensure_label(s, label);
            s.write_packet(&GpuZoneEnterPacket { label_id: label.id(), timestamp: gpu_timestamp });
        });
    }

    pub fn leave_gpu_zone(&self, gpu_timestamp: u64) {
        if !self.check_flag(CaptureFlags::GPU_ZONES) {
            return;
        }
        self.with_stream(|s| {
            s.write_packet(&GpuZoneLeavePacket { timestamp: gpu_timestamp });
        });
    }

    /// Records that `timestamp_gpu` and `timestamp_cpu` describe the same instant.
    pub fn gpu_clock_sync(&self, timestamp_cpu: u64, timestamp_gpu: u64) {
        if !self.check_flag(CaptureFlags::GPU_ZONES) {
            return;
        }
        self.with_stream(|s| {
            s.write_packet(&GpuClockSyncPacket { timestamp_cpu, timestamp_gpu });
        });
    }

    pub fn sensor_set_range(&self, label: &Label, min_value: f32, max_value: f32, interpolation: SensorInterpolation, units: SensorUnits) {
        if !self.is_connected() {
            return;
        }
        self.with_stream(|s| {
            self.ensure_label(s, label);
            s.write_packet(&SensorRangePacket {
                label_id: label.id(),
                interpolation: interpolation as u16,
                units: units as u16,
                min_value,
                max_value,
            });
        });
    }

    pub fn sensor_set_value(&self, label: &Label, value: f32) {
        if !self.is_connected() {
            return;
        }
        self.with_stream(|s| {
            self.ensure_label(s, label);
            s.write_packet(&SensorSetPacket { label_id: label.id(), timestamp: Timestamp::now(), value });
        });
    }

    /// Sends a framebuffer capture. `pixels` must be exactly the image size for `format`.
    pub fn frame_buffer(&self, format: FrameBufferFormat, width: u32, height: u32, pixels: &[u8]) {
        if !self.check_flag(CaptureFlags::FRAME_BUFFER) {
            return;
        }
        let Some(expected) = format.image_size(width, height) else {
            warn!("[capture] Framebuffer {}x{} {:?} is too large", width, height, format);
            return;
        };
        if pixels.len() != expected {
            warn!("[capture] Framebuffer {}x{} {:?} needs {} bytes, got {}", width, height, format, expected, pixels.len());
            return;
        }
        let packet = FrameBufferPacket { format: format as u32, width, height, timestamp: Timestamp::now() };
        self.with_stream(|s| {
            s.write_packet_with_payload(&packet, pixels);
        });
    }

    /// Sends a log line, truncated to 64 KiB.
    pub fn log(&self, priority: LogPriority, message: &str) {
        if !self.check_flag(CaptureFlags::LOGGING) {
            return;
        }
        let packet = LogPacket { timestamp: Timestamp::now(), priority: priority as u32 };
        let message = truncate_str(message, u16::MAX as usize);
        self.with_stream(|s| {
            s.write_packet_with_payload(&packet, message.as_bytes());
        });
    }

    pub fn log_fmt(&self, priority: LogPriority, args: fmt::Arguments<'_>) {
        if !self.check_flag(CaptureFlags::LOGGING) {
            return;
        }
        match args.as_str() {
            Some(s) => self.log(priority, s),
            None => self.log(priority, &args.to_string()),
        }
    }
}

/// Leaves the CPU zone when dropped.
#[must_use = "the zone is left as soon as the guard is dropped"]
pub struct CpuZoneGuard {
    capture: Option<Arc<Capture>>,
}

impl CpuZoneGuard {
    pub(crate) fn enter(capture: Option<Arc<Capture>>, label: &Label) -> Self {
        if let Some(capture) = &capture {
            capture.enter_cpu_zone(label);
        }
        Self { capture }
    }

    /// Leaves the zone now.
    pub fn end(self) {}
}

impl Drop for CpuZoneGuard {
    fn drop(&mut self) {
        if let Some(capture) = &self.capture {
            capture.leave_cpu_zone();
        }
    }
}

/// Owns a capture session: the shared [`Capture`] state plus the server thread.
///
/// Dropping the context stops the server, the zero-config host and the sensor thread.
pub struct CaptureContext {
    capture: Arc<Capture>,
    server: Option<Server>,
}

impl CaptureContext {
    /// Starts listening for a capture client. Failing to find a free port leaves the context
    /// valid but disabled.
    pub fn new(config: CaptureConfig) -> Self {
        let capture = Arc::new(Capture::new(config));

        let server = if capture.config.flags.is_empty() {
            info!("[capture] No capture flags enabled, server not started");
            None
        } else {
            match Server::start(capture.clone()) {
                Ok(server) => Some(server),
                Err(e) => {
                    warn!("[capture] {}, capture disabled", e);
                    None
                }
            }
        };

        Self { capture, server }
    }

    pub fn capture(&self) -> &Arc<Capture> {
        &self.capture
    }

    /// TCP port the server listens on, `None` if capture is disabled.
    pub fn local_port(&self) -> Option<u16> {
        self.server.as_ref().map(Server::port)
    }

    pub fn cpu_zone(&self, label: &Label) -> CpuZoneGuard {
        CpuZoneGuard::enter(Some(self.capture.clone()), label)
    }

    pub fn shutdown(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.quit_and_wait();
        }
    }
}

impl Deref for CaptureContext {
    type Target = Capture;

    fn deref(&self) -> &Capture {
        &self.capture
    }
}

impl Drop for CaptureContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use crate::config::CaptureConfig;

    /// Test threads are named after the test, so chunks usually open with a thread name.
    fn skip_thread_name(chunk: &[u8]) -> &[u8] {
        if chunk[0] == 1 {
            &chunk[2 + chunk[1] as usize..]
        } else {
            chunk
        }
    }

    fn offline_context() -> CaptureContext {
        CaptureContext::new(CaptureConfig::new("test").with_flags(CaptureFlags::NONE).with_zero_config(None))
    }

    #[test]
    fn instrumentation_is_noop_without_client() {
        let ctx = offline_context();
        let label = Label::new("Idle");
        ctx.frame();
        ctx.enter_cpu_zone(&label);
        ctx.leave_cpu_zone();
        ctx.sensor_set_value(&label, 1.0);
        ctx.log(LogPriority::Info, "hello");
        // nothing acquired a stream, nothing registered a label
        assert!(ctx.streams.is_empty());
        assert!(ctx.labels.is_empty());
        assert!(ctx.local_port().is_none());
    }

    #[test]
    fn check_flag_requires_connection() {
        let ctx = offline_context();
        assert!(!ctx.check_flag(CaptureFlags::NONE));
        ctx.connection.connect(CaptureFlags::CPU_ZONES);
        assert!(ctx.check_flag(CaptureFlags::CPU_ZONES));
        assert!(!ctx.check_flag(CaptureFlags::LOGGING));
        ctx.connection.disconnect();
        assert!(!ctx.is_connected());
    }

    #[test]
    fn labels_announced_once_while_connected() {
        let ctx = offline_context();
        ctx.connection.connect(CaptureFlags::CPU_ZONES);
        let label = Label::new("Tick");
        for _ in 0..3 {
            ctx.enter_cpu_zone(&label);
            ctx.leave_cpu_zone();
        }
        assert_eq!(ctx.labels.len(), 1);

        let mut out = Vec::new();
        assert!(ctx.streams.flush_all(&mut out));
        let chunk = skip_thread_name(&out[8..]);
        // label, then 3 x (enter 13 bytes + leave 9 bytes)
        let label_len = 1 + 4 + 1 + "Tick".len();
        assert_eq!(chunk.len(), label_len + 3 * (13 + 9));
        assert_eq!(chunk[0], 2);
        assert_eq!(chunk[label_len], 5);
    }

    #[test]
    fn thread_name_precedes_first_event() {
        let ctx = offline_context();
        ctx.connection.connect(CaptureFlags::ALL);
        std::thread::scope(|s| {
            std::thread::Builder::new()
                .name("render".into())
                .spawn_scoped(s, || ctx.frame())
                .unwrap();
        });

        let mut out = Vec::new();
        assert!(ctx.streams.flush_all(&mut out));
        let chunk = &out[8..];
        assert_eq!(&chunk[..8], &[1, 6, b'r', b'e', b'n', b'd', b'e', b'r']);
        assert_eq!(chunk[8], 3);
    }

    #[test]
    fn named_threads_hold_no_stream_while_offline() {
        let ctx = offline_context();
        std::thread::scope(|s| {
            for _ in 0..20 {
                s.spawn(|| ctx.thread_name("worker"));
            }
        });
        assert!(ctx.streams.is_empty());
    }

    #[test]
    fn offline_thread_name_is_sent_after_connect() {
        let ctx = offline_context();
        ctx.thread_name("late");
        assert!(ctx.streams.is_empty());

        ctx.connection.connect(CaptureFlags::ALL);
        ctx.frame();
        let mut out = Vec::new();
        assert!(ctx.streams.flush_all(&mut out));
        let chunk = &out[8..];
        assert_eq!(&chunk[..6], &[1, 4, b'l', b'a', b't', b'e']);
        assert_eq!(chunk[6], 3);
    }

    #[test]
    fn frame_buffer_size_is_validated() {
        let ctx = offline_context();
        ctx.connection.connect(CaptureFlags::FRAME_BUFFER);
        ctx.frame_buffer(FrameBufferFormat::Rgba8888, 2, 2, &[0; 15]);
        let mut out = Vec::new();
        ctx.streams.flush_all(&mut out);
        assert!(out.is_empty());

        ctx.frame_buffer(FrameBufferFormat::Rgba8888, 2, 2, &[0; 16]);
        ctx.streams.flush_all(&mut out);
        // id + 20 byte packet + u32 size + pixels
        assert_eq!(skip_thread_name(&out[8..]).len(), 1 + 20 + 4 + 16);
    }

    #[test]
    fn oversized_frame_buffer_is_dropped() {
        let ctx = offline_context();
        ctx.connection.connect(CaptureFlags::FRAME_BUFFER);
        ctx.frame_buffer(FrameBufferFormat::Rgba8888, u32::MAX, u32::MAX, &[]);
        ctx.frame_buffer(FrameBufferFormat::Rgb565, u32::MAX, 2, &[0; 8]);
        let mut out = Vec::new();
        assert!(ctx.streams.flush_all(&mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn no_free_port_disables_capture() {
        let taken = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let ctx = CaptureContext::new(
            CaptureConfig::new("test").with_port_range(port..port + 1).with_zero_config(None),
        );
        assert!(ctx.local_port().is_none());
        ctx.frame();
    }
}
