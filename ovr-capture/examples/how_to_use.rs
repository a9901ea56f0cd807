//! 1. Run this example: `cargo run --example how_to_use --release`
//! 2. In another terminal run `cargo run --release --bin capture-dump`, it finds the example
//!    through the zero-config broadcast
//! 3. Go to https://ui.perfetto.dev/ and drag'n'drop the generated `capture/*.json` file

use std::time::Duration;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use ovr_capture::{CaptureConfig, LogPriority};
use ovr_capture_macro::cpu_zone;

fn simulate() {
    let _zone = cpu_zone!("Simulate");
    std::thread::sleep(Duration::from_micros(500));
}

fn render() {
    let _zone = cpu_zone!("Render");
    std::thread::sleep(Duration::from_micros(800));
}

fn main() -> anyhow::Result<()> {
    SimpleLogger::new().with_level(LevelFilter::Info).init()?;

    let _guard = ovr_capture::init(CaptureConfig::new("how_to_use"))?;
    ovr_capture::thread_name("main loop");

    let worker = std::thread::Builder::new().name(String::from("audio")).spawn(|| {
        for _ in 0..5_000 {
            let _zone = cpu_zone!("Mix");
            std::thread::sleep(Duration::from_millis(2));
        }
    })?;

    for frame in 0..10_000u32 {
        simulate();
        render();
        ovr_capture::frame();
        if frame % 1000 == 0 {
            ovr_capture::logf!(LogPriority::Info, "frame {}", frame);
        }
    }

    let _ = worker.join();
    Ok(())
}
