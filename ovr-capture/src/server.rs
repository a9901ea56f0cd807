//! TCP capture server: accept loop, handshake, descriptor exchange, label replay and the
//! flush loop that drains every thread's stream to the connected client.

use std::io::{BufWriter, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use log::{debug, error, info, trace, warn};
use ovr_capture_core::consts::PROTOCOL_VERSION;
use ovr_capture_core::descriptors::packet_descriptors;
use ovr_capture_core::headers::ConnectionHeaderPacket;
use ovr_capture_core::packets::LabelPacket;
use ovr_capture_core::CaptureFlags;
use crate::context::Capture;
use crate::encoder;
use crate::error::{CaptureError, Result};
use crate::sensors::StandardSensors;
use crate::thread::{QuitSignal, Task};
use crate::thread_local_storage::current_thread_id;
use crate::zeroconf::ZeroConfigHost;

const WRITE_BUFFER_SIZE: usize = 64 * 1024;
const WAKE_TIMEOUT: Duration = Duration::from_millis(200);

/// Socket of the client being served, kept so shutdown can interrupt blocking I/O on it.
#[derive(Default)]
struct ActiveConnection {
    stream: Mutex<Option<TcpStream>>,
}

impl ActiveConnection {
    fn set(&self, stream: Option<TcpStream>) {
        *self.stream.lock().unwrap_or_else(PoisonError::into_inner) = stream;
    }

    fn interrupt(&self) {
        if let Some(stream) = self.stream.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

pub struct Server {
    port: u16,
    task: Task,
    active: Arc<ActiveConnection>,
    zero_config: Option<ZeroConfigHost>,
}

/// First port of `ports` that can be bound and listened on.
fn bind_first_free(ports: std::ops::Range<u16>) -> Result<TcpListener> {
    let (begin, end) = (ports.start, ports.end);
    for port in ports {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) => trace!("[capture] Port {} unavailable: {}", port, e),
        }
    }
    Err(CaptureError::NoFreePort { begin, end })
}

impl Server {
    pub fn start(capture: Arc<Capture>) -> Result<Self> {
        let listener = bind_first_free(capture.config.ports())?;
        let port = listener.local_addr()?.port();
        info!("[capture] Listening on port {}", port);

        let zero_config = match &capture.config.zero_config {
            Some(settings) => match ZeroConfigHost::start(settings, port, &capture.config.package_name) {
                Ok(host) => Some(host),
                Err(e) => {
                    warn!("[capture] Zero-config advertisement unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        let active = Arc::new(ActiveConnection::default());
        let task = {
            let active = active.clone();
            Task::spawn("capture-server", move |quit| accept_loop(listener, capture, active, quit))?
        };

        Ok(Self {
            port,
            task,
            active,
            zero_config,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops advertising, disconnects the current client and joins the server thread.
    pub fn quit_and_wait(&mut self) {
        if let Some(mut host) = self.zero_config.take() {
            host.quit_and_wait();
        }

        self.task.quit_signal().set();
        self.active.interrupt();
        // unblock accept() without closing the listener under the server thread
        let wake_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        if let Err(e) = TcpStream::connect_timeout(&wake_addr, WAKE_TIMEOUT) {
            debug!("[capture] Wake connection failed: {}", e);
        }
        self.task.quit_and_wait();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.quit_and_wait();
    }
}

fn accept_loop(listener: TcpListener, capture: Arc<Capture>, active: Arc<ActiveConnection>, quit: QuitSignal) {
    loop {
        let accepted = listener.accept();
        if quit.is_set() {
            break;
        }
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("[capture] Error accepting connection: {}", e);
                if quit.wait_timeout(Duration::from_millis(100)) {
                    break;
                }
                continue;
            }
        };

        info!("[capture] Client connected: {}", addr);
        active.set(stream.try_clone().ok());
        // a quit that raced with accept() missed the stream we just stored
        if quit.is_set() {
            break;
        }

        match serve_connection(&capture, stream, &quit) {
            Ok(()) => info!("[capture] Client disconnected: {}", addr),
            Err(e) => info!("[capture] Client {} dropped: {}", addr, e),
        }

        capture.connection.disconnect();
        capture.streams.release_all();
        capture.streams.reset();
        active.set(None);
    }
    debug!("[capture] Server thread quit");
}

/// Reads the client's header and always answers with ours. Returns the negotiated flags, or
/// `None` if the connection must be closed.
pub(crate) fn handshake(stream: &mut (impl Read + Write), enabled: CaptureFlags) -> Result<Option<CaptureFlags>> {
    let mut buf = [0u8; ConnectionHeaderPacket::SIZE as usize];
    if let Err(e) = stream.read_exact(&mut buf) {
        warn!("[capture] Short connection header: {}", e);
        return Ok(None);
    }
    let client: ConnectionHeaderPacket = bincode::deserialize(&buf)?;

    let negotiated = client.flags() & enabled;
    encoder::send_connection_header(stream, &ConnectionHeaderPacket::new(negotiated))?;
    stream.flush()?;

    if client.size != ConnectionHeaderPacket::SIZE {
        warn!("[capture] Rejecting client: header size {} != {}", client.size, ConnectionHeaderPacket::SIZE);
        return Ok(None);
    }
    if client.version != PROTOCOL_VERSION {
        warn!("[capture] Rejecting client: protocol version {} != {}", client.version, PROTOCOL_VERSION);
        return Ok(None);
    }
    if negotiated.is_empty() {
        warn!("[capture] Rejecting client: requested {:?}, enabled {:?}", client.flags(), enabled);
        return Ok(None);
    }
    debug!("[capture] Negotiated {:?}", negotiated);
    Ok(Some(negotiated))
}

/// Sends every known label as one chunk and publishes the connection flags while the label
/// registry is still locked, so each label reaches the client exactly once.
fn replay_labels(capture: &Capture, w: &mut impl Write, flags: CaptureFlags) -> Result<()> {
    capture.labels.replay(|labels| {
        let mut chunk = Vec::new();
        for (id, name) in labels {
            let name = encoder::truncate_str(name, u8::MAX as usize);
            encoder::encode_packet(&mut chunk, &LabelPacket { label_id: *id }, name.as_bytes())?;
        }
        if !chunk.is_empty() {
            encoder::send_stream_chunk(w, current_thread_id(), &chunk)?;
        }
        w.flush()?;
        debug!("[capture] Replayed {} labels", labels.len());
        capture.connection.connect(flags);
        Ok(())
    })
}

fn serve_connection(capture: &Arc<Capture>, mut stream: TcpStream, quit: &QuitSignal) -> Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(capture.config.handshake_timeout))?;
    let Some(flags) = handshake(&mut stream, capture.config.flags)? else {
        return Ok(());
    };
    stream.set_read_timeout(None)?;
    // writes that raced with the previous teardown
    capture.streams.reset();

    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, stream);
    encoder::send_descriptors(&mut writer, &packet_descriptors())?;
    replay_labels(capture, &mut writer, flags)?;

    let _sensors = if flags.intersects(CaptureFlags::SENSORS) {
        match StandardSensors::start(capture.clone(), flags) {
            Ok(sensors) => Some(sensors),
            Err(e) => {
                warn!("[capture] Sensor thread unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let interval = capture.config.flush_interval;
    let result = loop {
        let start = Instant::now();
        if !capture.streams.flush_all(&mut writer) {
            break Err(CaptureError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stream flush failed")));
        }
        if let Err(e) = writer.flush() {
            break Err(e.into());
        }

        let elapsed = start.elapsed();
        let remaining = interval.saturating_sub(elapsed);
        if quit.wait_timeout(remaining) {
            break Ok(());
        }
    };

    // writers blocked on a full buffer must see the disconnect before the sensor thread joins
    capture.connection.disconnect();
    capture.streams.release_all();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// In-memory duplex: reads from `input`, collects writes in `output`.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn client_hello(version: u32, flags: CaptureFlags) -> Duplex {
        let header = ConnectionHeaderPacket { size: ConnectionHeaderPacket::SIZE, version, flags: flags.bits() };
        Duplex { input: Cursor::new(bincode::serialize(&header).unwrap()), output: Vec::new() }
    }

    fn reply(duplex: &Duplex) -> ConnectionHeaderPacket {
        bincode::deserialize(&duplex.output).unwrap()
    }

    #[test]
    fn negotiates_intersection() {
        let mut duplex = client_hello(PROTOCOL_VERSION, CaptureFlags::GPU_ZONES | CaptureFlags::THERMAL_SENSORS);
        let flags = handshake(&mut duplex, CaptureFlags::CPU_ZONES | CaptureFlags::GPU_ZONES).unwrap();
        assert_eq!(flags, Some(CaptureFlags::GPU_ZONES));
        assert_eq!(reply(&duplex).flags(), CaptureFlags::GPU_ZONES);
        assert_eq!(reply(&duplex).version, PROTOCOL_VERSION);
    }

    #[test]
    fn empty_intersection_is_rejected_but_answered() {
        let mut duplex = client_hello(PROTOCOL_VERSION, CaptureFlags::LOGGING);
        assert_eq!(handshake(&mut duplex, CaptureFlags::CPU_ZONES).unwrap(), None);
        assert_eq!(duplex.output.len(), ConnectionHeaderPacket::SIZE as usize);
        assert!(reply(&duplex).flags().is_empty());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut duplex = client_hello(PROTOCOL_VERSION + 1, CaptureFlags::ALL);
        assert_eq!(handshake(&mut duplex, CaptureFlags::ALL).unwrap(), None);
        assert_eq!(reply(&duplex).version, PROTOCOL_VERSION);
    }

    #[test]
    fn short_header_is_rejected_silently() {
        let mut duplex = Duplex { input: Cursor::new(vec![12, 0, 0]), output: Vec::new() };
        assert_eq!(handshake(&mut duplex, CaptureFlags::ALL).unwrap(), None);
        assert!(duplex.output.is_empty());
    }

    #[test]
    fn bind_skips_taken_ports() {
        let taken = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        assert!(matches!(bind_first_free(port..port + 1), Err(CaptureError::NoFreePort { .. })));
        assert!(matches!(bind_first_free(port..port), Err(CaptureError::NoFreePort { .. })));
    }
}
