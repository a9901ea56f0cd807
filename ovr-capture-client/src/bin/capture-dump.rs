//! Records a capture session into a Chrome trace file.
//! 1. Start an application with ovr-capture enabled.
//! 2. Run `cargo run --release --bin capture-dump [host:port]`. Without an address the first
//!    target heard on the zero-config port is used.
//! 3. Stop the application (or its capture) and open the generated
//!    `capture/<date>.json` in https://ui.perfetto.dev/

use std::env::args;
use std::fs;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::time::Duration;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use ovr_capture_client::{CaptureClient, ChromeTrace, ClientError, DiscoveryListener};
use ovr_capture_core::consts::ZERO_CONFIG_PORT;
use ovr_capture_core::CaptureFlags;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

fn target() -> Result<SocketAddr, ClientError> {
    if let Some(addr) = args().nth(1) {
        return addr
            .parse()
            .map_err(|e| ClientError::Malformed(format!("bad address '{}': {}", addr, e)));
    }

    info!("Waiting for zero-config broadcast on port {}...", ZERO_CONFIG_PORT);
    let listener = DiscoveryListener::bind(ZERO_CONFIG_PORT)?;
    let host = listener.recv_host(DISCOVERY_TIMEOUT)?;
    info!("Found {} at {}", host.package_name, host.addr);
    Ok(host.addr)
}

fn run() -> Result<(), ClientError> {
    let addr = target()?;
    let mut client = CaptureClient::connect(addr, CaptureFlags::ALL)?;

    let mut trace = ChromeTrace::default();
    info!("Recording, stop the target to finish");
    if let Err(e) = client.record(&mut trace) {
        // keep what was recorded before the connection broke
        error!("Recording stopped: {}", e);
    }

    fs::create_dir_all("capture")?;
    let path = format!("capture/{}.json", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    info!("Events count: {}. Saving to {}...", trace.len(), path);
    let file = BufWriter::new(fs::File::create(&path)?);
    trace
        .write_json(file)
        .map_err(|e| ClientError::Io(e.into()))?;
    info!("Finished!");
    Ok(())
}

fn main() {
    SimpleLogger::new().with_level(LevelFilter::Info).init().unwrap();

    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}
