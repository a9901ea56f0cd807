//! Explicit context with a custom configuration
//! 1. Run `cargo run --example configuration --release`
//! 2. Record it: `cargo run --release --bin capture-dump 127.0.0.1:4000`

use std::time::Duration;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use ovr_capture::{CaptureConfig, CaptureContext, CaptureFlags, SensorInterpolation, SensorUnits, StreamConfig};
use ovr_capture_macro::label;

static UPLOAD: ovr_capture::Label = label!("Texture upload");
static QUEUE_DEPTH: ovr_capture::Label = label!("Upload queue");

fn main() {
    SimpleLogger::default().with_level(LevelFilter::Debug).init().unwrap();
    // `CaptureConfig` is a builder, you can easily add configuration using .with() chain.
    let config = CaptureConfig::new("com.example.configuration")
        // Only offer zones and logs, a client asking for more gets the intersection
        .with_flags(CaptureFlags::CPU_ZONES | CaptureFlags::LOGGING | CaptureFlags::SENSORS)
        .with_port_range(4000..4004)
        // No UDP broadcast, the client has to know the address
        .with_zero_config(None)
        // Smaller per-thread buffers, writers block sooner when the client is slow
        .with_stream_config(StreamConfig { buffer_size: 64 * 1024, ..StreamConfig::default() })
        .with_sensor_poll_interval(Duration::from_millis(50));

    let ctx = CaptureContext::new(config);
    log::info!("Capture port: {:?}", ctx.local_port());

    for i in 0..100_000u32 {
        if ctx.is_connected() && i % 10_000 == 0 {
            ctx.sensor_set_range(&QUEUE_DEPTH, 0.0, 16.0, SensorInterpolation::Nearest, SensorUnits::None);
        }
        let _zone = ctx.cpu_zone(&UPLOAD);
        ctx.sensor_set_value(&QUEUE_DEPTH, (i % 16) as f32);
        std::thread::sleep(Duration::from_micros(200));
    }
}
