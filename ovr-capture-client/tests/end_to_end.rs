use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use ovr_capture::{CaptureConfig, CaptureContext, CaptureFlags, Label, LogPriority, ZeroConfigSettings};
use ovr_capture_client::{CaptureClient, CaptureEvent, ClientError, DiscoveryListener, StreamChunk};
use ovr_capture_core::consts::PROTOCOL_VERSION;
use ovr_capture_core::headers::ConnectionHeaderPacket;
use ovr_capture_core::string_hash32;

const TIMEOUT: Duration = Duration::from_secs(10);

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap().local_addr().unwrap().port()
}

fn start(flags: CaptureFlags) -> CaptureContext {
    let port = free_port();
    let config = CaptureConfig::new("e2e")
        .with_flags(flags)
        .with_port_range(port..port + 1)
        .with_zero_config(None);
    let ctx = CaptureContext::new(config);
    assert_eq!(ctx.local_port(), Some(port));
    ctx
}

fn connect(ctx: &CaptureContext, flags: CaptureFlags) -> CaptureClient {
    let client = CaptureClient::connect((Ipv4Addr::LOCALHOST, ctx.local_port().unwrap()), flags).unwrap();
    client.set_read_timeout(Some(TIMEOUT)).unwrap();
    wait_until(|| ctx.is_connected());
    client
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < TIMEOUT, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Reads chunks until `done` holds for everything received so far.
fn read_until(client: &mut CaptureClient, mut done: impl FnMut(&[StreamChunk]) -> bool) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    while !done(&chunks) {
        let chunk = client.next_chunk().unwrap().expect("server closed the connection");
        chunks.push(chunk);
    }
    chunks
}

fn count(chunks: &[StreamChunk], pred: impl Fn(&CaptureEvent) -> bool) -> usize {
    chunks.iter().flat_map(|c| &c.events).filter(|e| pred(e)).count()
}

#[test]
fn cpu_zone_round_trip() {
    static PHYSICS: Label = ovr_capture_macro::label!("Physics");

    let ctx = start(CaptureFlags::DEFAULT);
    let mut client = connect(&ctx, CaptureFlags::CPU_ZONES);
    assert_eq!(client.flags(), CaptureFlags::CPU_ZONES);
    assert_eq!(client.descriptors().len(), 13);

    thread::scope(|s| {
        thread::Builder::new()
            .name("worker".into())
            .spawn_scoped(s, || {
                let _zone = ctx.cpu_zone(&PHYSICS);
                thread::sleep(Duration::from_millis(1));
            })
            .unwrap();
    });

    let chunks = read_until(&mut client, |c| count(c, |e| matches!(e, CaptureEvent::CpuZoneLeave { .. })) == 1);
    let worker = chunks.iter().find(|c| c.events.contains(&CaptureEvent::ThreadName("worker".into()))).unwrap();

    let id = string_hash32("Physics");
    assert_eq!(PHYSICS.id(), id);
    let mut enter = None;
    let mut leave = None;
    for event in &worker.events {
        match *event {
            CaptureEvent::CpuZoneEnter { label_id, timestamp } => {
                assert_eq!(label_id, id);
                enter = Some(timestamp);
            }
            CaptureEvent::CpuZoneLeave { timestamp } => leave = Some(timestamp),
            _ => {}
        }
    }
    assert!(leave.unwrap() >= enter.unwrap());
    assert_eq!(client.labels().get(&id).map(String::as_str), Some("Physics"));
    assert_eq!(client.thread_names().get(&worker.thread_id).map(String::as_str), Some("worker"));
    // the label precedes its first use
    let label_pos = worker.events.iter().position(|e| matches!(e, CaptureEvent::Label { .. })).unwrap();
    let enter_pos = worker.events.iter().position(|e| matches!(e, CaptureEvent::CpuZoneEnter { .. })).unwrap();
    assert!(label_pos < enter_pos);
}

#[test]
fn flags_are_negotiated() {
    let ctx = start(CaptureFlags::CPU_ZONES | CaptureFlags::GPU_ZONES);
    let client = connect(&ctx, CaptureFlags::GPU_ZONES | CaptureFlags::THERMAL_SENSORS);
    assert_eq!(client.flags(), CaptureFlags::GPU_ZONES);
    assert_eq!(ctx.connection_flags(), CaptureFlags::GPU_ZONES);
    assert!(ctx.check_flag(CaptureFlags::GPU_ZONES));
    assert!(!ctx.check_flag(CaptureFlags::CPU_ZONES));
}

#[test]
fn disjoint_flags_are_rejected() {
    let ctx = start(CaptureFlags::CPU_ZONES);
    let port = ctx.local_port().unwrap();
    let res = CaptureClient::connect((Ipv4Addr::LOCALHOST, port), CaptureFlags::LOGGING);
    assert!(matches!(res, Err(ClientError::Rejected { .. })));
    assert!(!ctx.is_connected());

    // the server goes back to accepting
    connect(&ctx, CaptureFlags::CPU_ZONES);
}

#[test]
fn version_mismatch_closes_connection() {
    let ctx = start(CaptureFlags::ALL);
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, ctx.local_port().unwrap())).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();

    let hello = ConnectionHeaderPacket { version: PROTOCOL_VERSION + 1, ..ConnectionHeaderPacket::new(CaptureFlags::ALL) };
    stream.write_all(&bincode::serialize(&hello).unwrap()).unwrap();

    let mut reply = [0u8; ConnectionHeaderPacket::SIZE as usize];
    stream.read_exact(&mut reply).unwrap();
    let reply: ConnectionHeaderPacket = bincode::deserialize(&reply).unwrap();
    assert_eq!(reply.version, PROTOCOL_VERSION);

    // no descriptor table follows
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
    assert!(!ctx.is_connected());
}

#[test]
fn threads_get_separate_streams() {
    const ZONES: usize = 200;
    static A: Label = ovr_capture_macro::label!("Thread A work");
    static B: Label = ovr_capture_macro::label!("Thread B work");

    let ctx = start(CaptureFlags::CPU_ZONES);
    let mut client = connect(&ctx, CaptureFlags::CPU_ZONES);

    thread::scope(|s| {
        for (name, label) in [("a", &A), ("b", &B)] {
            let ctx = &ctx;
            thread::Builder::new()
                .name(name.into())
                .spawn_scoped(s, move || {
                    for _ in 0..ZONES {
                        let _zone = ctx.cpu_zone(label);
                    }
                })
                .unwrap();
        }
    });

    let chunks = read_until(&mut client, |c| count(c, |e| matches!(e, CaptureEvent::CpuZoneLeave { .. })) == 2 * ZONES);

    for (name, label) in [("a", &A), ("b", &B)] {
        let thread_id = *client.thread_names().iter().find(|(_, n)| n.as_str() == name).unwrap().0;
        let mut depth = 0;
        let mut last = 0;
        let mut enters = 0;
        for event in chunks.iter().filter(|c| c.thread_id == thread_id).flat_map(|c| &c.events) {
            match *event {
                CaptureEvent::CpuZoneEnter { label_id, timestamp } => {
                    assert_eq!(label_id, label.id());
                    assert!(timestamp >= last);
                    last = timestamp;
                    depth += 1;
                    enters += 1;
                }
                CaptureEvent::CpuZoneLeave { timestamp } => {
                    assert!(timestamp >= last);
                    last = timestamp;
                    depth -= 1;
                }
                _ => {}
            }
            assert!((0..=1).contains(&depth));
        }
        assert_eq!(enters, ZONES);
    }
}

#[test]
fn labels_and_thread_names_are_replayed_on_reconnect() {
    static RENDER: Label = ovr_capture_macro::label!("Render");

    let ctx = start(CaptureFlags::CPU_ZONES);
    let mut first = connect(&ctx, CaptureFlags::CPU_ZONES);
    ctx.enter_cpu_zone(&RENDER);
    ctx.leave_cpu_zone();
    read_until(&mut first, |c| count(c, |e| matches!(e, CaptureEvent::CpuZoneLeave { .. })) == 1);
    drop(first);

    // the server notices the dead socket on its next write
    wait_until(|| {
        ctx.enter_cpu_zone(&RENDER);
        ctx.leave_cpu_zone();
        !ctx.is_connected()
    });

    let mut second = connect(&ctx, CaptureFlags::CPU_ZONES);
    let replay = second.next_chunk().unwrap().unwrap();
    assert_eq!(replay.events, [CaptureEvent::Label { label_id: RENDER.id(), name: "Render".into() }]);

    ctx.enter_cpu_zone(&RENDER);
    ctx.leave_cpu_zone();
    let chunks = read_until(&mut second, |c| count(c, |e| matches!(e, CaptureEvent::CpuZoneLeave { .. })) == 1);
    let events: Vec<&CaptureEvent> = chunks.iter().flat_map(|c| &c.events).collect();
    // the label is not announced twice, the thread name is sent again for the new connection
    assert_eq!(count(&chunks, |e| matches!(e, CaptureEvent::Label { .. })), 0);
    assert!(matches!(events[0], CaptureEvent::ThreadName(_)));
}

#[test]
fn log_and_frame_buffer_need_their_flags() {
    let ctx = start(CaptureFlags::ALL);
    let mut client = connect(&ctx, CaptureFlags::LOGGING | CaptureFlags::CPU_ZONES);

    ctx.frame_buffer(ovr_capture::FrameBufferFormat::Rgb565, 2, 2, &[0; 8]);
    ctx.log(LogPriority::Error, "out of memory");
    ovr_capture::logf!(LogPriority::Info, "ignored, no global context {}", 1);
    ctx.log_fmt(LogPriority::Info, format_args!("frame {} took {} ms", 7, 16));

    let chunks = read_until(&mut client, |c| count(c, |e| matches!(e, CaptureEvent::Log { .. })) == 2);
    let logs: Vec<(LogPriority, &str)> = chunks
        .iter()
        .flat_map(|c| &c.events)
        .filter_map(|e| match e {
            CaptureEvent::Log { priority, message, .. } => Some((*priority, message.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(logs, [(LogPriority::Error, "out of memory"), (LogPriority::Info, "frame 7 took 16 ms")]);
    assert_eq!(count(&chunks, |e| matches!(e, CaptureEvent::FrameBuffer { .. })), 0);
}

#[test]
fn zero_config_advertises_server() {
    let listener = DiscoveryListener::bind(0).unwrap();
    let port = free_port();
    let package_name = "p".repeat(100);
    let config = CaptureConfig::new(package_name.clone())
        .with_port_range(port..port + 1)
        .with_zero_config(Some(ZeroConfigSettings {
            port: listener.local_port().unwrap(),
            target: IpAddr::V4(Ipv4Addr::LOCALHOST),
            interval: Duration::from_millis(10),
        }));
    let ctx = CaptureContext::new(config);

    let host = listener.recv_host(TIMEOUT).unwrap();
    assert_eq!(Some(host.addr.port()), ctx.local_port());
    assert_eq!(host.package_name, package_name[..63]);

    let client = CaptureClient::connect(host.addr, CaptureFlags::CPU_ZONES).unwrap();
    assert_eq!(client.flags(), CaptureFlags::CPU_ZONES);
}

#[test]
fn shutdown_disconnects_client() {
    let mut ctx = start(CaptureFlags::CPU_ZONES);
    let mut client = connect(&ctx, CaptureFlags::CPU_ZONES);
    ctx.shutdown();
    assert!(!ctx.is_connected());
    assert!(matches!(client.next_chunk(), Ok(None) | Err(ClientError::Io(_))));
    ctx.frame();
}
