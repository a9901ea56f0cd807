//! Low-overhead telemetry capture for real-time applications.
//!
//! Threads record zones, frames, sensor values and log lines into their own double-buffered
//! stream. A server thread accepts one remote client at a time over TCP and drains every
//! stream to it; UDP broadcasts let the client find the process without configuration.
//!
//! ```no_run
//! use ovr_capture::{CaptureConfig, Label};
//!
//! static UPDATE: Label = ovr_capture_macro::label!("Update");
//!
//! let _guard = ovr_capture::init(CaptureConfig::new("com.example.game")).unwrap();
//! loop {
//!     let _zone = ovr_capture::cpu_zone(&UPDATE);
//!     ovr_capture::frame();
//! }
//! ```
//!
//! `label!` computes the hash at compile time; `Label::new` hashes at runtime.

mod async_stream;
mod config;
mod context;
mod encoder;
mod error;
mod label;
mod sensors;
mod server;
mod sync;
mod thread;
mod thread_local_storage;
mod zeroconf;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use log::info;

pub use config::{CaptureConfig, ZeroConfigSettings};
pub use context::{Capture, CaptureContext, CpuZoneGuard};
pub use error::{CaptureError, Result};
pub use label::{Label, LazyLabel};
pub use ovr_capture_core::config::StreamConfig;
pub use ovr_capture_core::packets::{FrameBufferFormat, LogPriority, SensorInterpolation, SensorUnits};
pub use ovr_capture_core::CaptureFlags;

static GLOBAL: RwLock<Option<CaptureContext>> = RwLock::new(None);

fn global() -> Option<Arc<Capture>> {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map(|ctx| ctx.capture().clone())
}

/// Shuts the global capture down when dropped.
#[must_use = "capture stops as soon as the guard is dropped"]
pub struct CaptureGuard;

impl CaptureGuard {
    pub fn early_drop(self) {}
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        shutdown();
    }
}

/// Starts the process-wide capture context used by the free functions of this crate.
pub fn init(config: CaptureConfig) -> Result<CaptureGuard> {
    let mut global = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if global.is_some() {
        return Err(CaptureError::AlreadyInitialized);
    }
    *global = Some(CaptureContext::new(config));
    Ok(CaptureGuard)
}

/// Stops the server and sensor threads of the global context. Does nothing if capture was
/// never initialized.
pub fn shutdown() {
    let ctx = GLOBAL.write().unwrap_or_else(PoisonError::into_inner).take();
    // joined outside the lock, so instrumented threads never wait on it
    if let Some(mut ctx) = ctx {
        ctx.shutdown();
        info!("[capture] Shut down");
    }
}

/// TCP port of the global context, `None` if uninitialized or disabled.
pub fn local_port() -> Option<u16> {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .and_then(CaptureContext::local_port)
}

pub fn is_connected() -> bool {
    global().is_some_and(|c| c.is_connected())
}

pub fn check_connection_flag(flag: CaptureFlags) -> bool {
    global().is_some_and(|c| c.check_flag(flag))
}

pub fn thread_name(name: &str) {
    if let Some(c) = global() {
        c.thread_name(name);
    }
}

pub fn frame() {
    if let Some(c) = global() {
        c.frame();
    }
}

pub fn vsync() {
    if let Some(c) = global() {
        c.vsync();
    }
}

pub fn enter_cpu_zone(label: &Label) {
    if let Some(c) = global() {
        c.enter_cpu_zone(label);
    }
}

pub fn leave_cpu_zone() {
    if let Some(c) = global() {
        c.leave_cpu_zone();
    }
}

/// Enters a CPU zone that is left when the returned guard drops.
pub fn cpu_zone(label: &Label) -> CpuZoneGuard {
    CpuZoneGuard::enter(global(), label)
}

pub fn enter_gpu_zone(label: &Label, gpu_timestamp: u64) {
    if let Some(c) = global() {
        c.enter_gpu_zone(label, gpu_timestamp);
    }
}

pub fn leave_gpu_zone(gpu_timestamp: u64) {
    if let Some(c) = global() {
        c.leave_gpu_zone(gpu_timestamp);
    }
}

pub fn gpu_clock_sync(timestamp_cpu: u64, timestamp_gpu: u64) {
    if let Some(c) = global() {
        c.gpu_clock_sync(timestamp_cpu, timestamp_gpu);
    }
}

pub fn sensor_set_range(label: &Label, min_value: f32, max_value: f32, interpolation: SensorInterpolation, units: SensorUnits) {
    if let Some(c) = global() {
        c.sensor_set_range(label, min_value, max_value, interpolation, units);
    }
}

pub fn sensor_set_value(label: &Label, value: f32) {
    if let Some(c) = global() {
        c.sensor_set_value(label, value);
    }
}

pub fn frame_buffer(format: FrameBufferFormat, width: u32, height: u32, pixels: &[u8]) {
    if let Some(c) = global() {
        c.frame_buffer(format, width, height, pixels);
    }
}

pub fn log(priority: LogPriority, message: &str) {
    if let Some(c) = global() {
        c.log(priority, message);
    }
}

#[doc(hidden)]
pub fn log_fmt(priority: LogPriority, args: fmt::Arguments<'_>) {
    if let Some(c) = global() {
        c.log_fmt(priority, args);
    }
}

/// Formatted [`log`]: `logf!(LogPriority::Warning, "frame {} took {} ms", n, ms)`.
///
/// Arguments are only formatted when a client asked for logging.
#[macro_export]
macro_rules! logf {
    ($priority:expr, $($arg:tt)+) => {
        $crate::log_fmt($priority, format_args!($($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_lifecycle() {
        // nothing initialized yet: every call is a no-op
        frame();
        logf!(LogPriority::Info, "value {}", 1);
        assert!(!is_connected());
        assert!(local_port().is_none());
        drop(cpu_zone(&Label::new("Idle")));

        let config = CaptureConfig::new("test")
            .with_flags(CaptureFlags::NONE)
            .with_zero_config(None);
        let guard = init(config.clone()).unwrap();
        assert!(matches!(init(config.clone()), Err(CaptureError::AlreadyInitialized)));
        assert!(!check_connection_flag(CaptureFlags::CPU_ZONES));
        guard.early_drop();

        // initializing again after shutdown is allowed
        init(config).unwrap().early_drop();
        shutdown();
    }
}
