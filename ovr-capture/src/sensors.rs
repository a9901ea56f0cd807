//! Background polling of the standard Linux/Android clock and thermal sensors.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::debug;
use ovr_capture_core::packets::{SensorInterpolation, SensorUnits};
use ovr_capture_core::CaptureFlags;
use crate::context::Capture;
use crate::label::{Label, LazyLabel};
use crate::thread::Task;

const MAX_CPUS: usize = 16;
const MAX_THERMAL_ZONES: usize = 16;

const UNINIT: LazyLabel = LazyLabel::new();
static CPU_LABELS: [LazyLabel; MAX_CPUS] = [UNINIT; MAX_CPUS];
static THERMAL_LABELS: [LazyLabel; MAX_THERMAL_ZONES] = [UNINIT; MAX_THERMAL_ZONES];
static GPU_LABEL: LazyLabel = LazyLabel::new();

struct Sensor {
    label: &'static Label,
    path: PathBuf,
    /// Raw file value per unit of `units`
    divisor: f64,
    min: f32,
    max: f32,
    interpolation: SensorInterpolation,
    units: SensorUnits,
}

impl Sensor {
    fn read(&self) -> Option<f32> {
        read_number(&self.path).map(|v| (v / self.divisor) as f32)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_number(path: &Path) -> Option<f64> {
    read_trimmed(path)?.parse().ok()
}

fn cpu_sensors(root: &Path, out: &mut Vec<Sensor>) {
    for cpu in 0..MAX_CPUS {
        // offline cores leave gaps, keep scanning
        let dir = root.join(format!("sys/devices/system/cpu/cpu{cpu}/cpufreq"));
        let path = dir.join("scaling_cur_freq");
        let Some(current) = read_number(&path) else {
            continue;
        };
        let min = read_number(&dir.join("cpuinfo_min_freq")).unwrap_or(0.0);
        let max = read_number(&dir.join("cpuinfo_max_freq")).unwrap_or(current);
        out.push(Sensor {
            label: CPU_LABELS[cpu].conditional_init(format!("CPU{cpu} Clocks")),
            path,
            divisor: 1e3,
            min: (min / 1e3) as f32,
            max: (max / 1e3) as f32,
            interpolation: SensorInterpolation::Nearest,
            units: SensorUnits::MHz,
        });
    }
}

fn gpu_sensors(root: &Path, out: &mut Vec<Sensor>) {
    let dir = root.join("sys/class/kgsl/kgsl-3d0");
    let path = dir.join("gpuclk");
    let Some(current) = read_number(&path) else {
        return;
    };
    let max = read_number(&dir.join("max_gpuclk")).unwrap_or(current);
    out.push(Sensor {
        label: GPU_LABEL.conditional_init("GPU Clocks"),
        path,
        divisor: 1e6,
        min: 0.0,
        max: (max / 1e6) as f32,
        interpolation: SensorInterpolation::Nearest,
        units: SensorUnits::MHz,
    });
}

fn thermal_sensors(root: &Path, out: &mut Vec<Sensor>) {
    for zone in 0..MAX_THERMAL_ZONES {
        let dir = root.join(format!("sys/class/thermal/thermal_zone{zone}"));
        let path = dir.join("temp");
        if read_number(&path).is_none() {
            continue;
        }
        let name = read_trimmed(&dir.join("type"))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("thermal_zone{zone}"));
        out.push(Sensor {
            label: THERMAL_LABELS[zone].conditional_init(name),
            path,
            divisor: 1e3,
            min: 20.0,
            max: 90.0,
            interpolation: SensorInterpolation::Linear,
            units: SensorUnits::Celsius,
        });
    }
}

/// Sensors present under `root` for the enabled sensor flags.
fn discover(root: &Path, flags: CaptureFlags) -> Vec<Sensor> {
    let mut sensors = Vec::new();
    if flags.contains(CaptureFlags::CPU_CLOCKS) {
        cpu_sensors(root, &mut sensors);
    }
    if flags.contains(CaptureFlags::GPU_CLOCKS) {
        gpu_sensors(root, &mut sensors);
    }
    if flags.contains(CaptureFlags::THERMAL_SENSORS) {
        thermal_sensors(root, &mut sensors);
    }
    sensors
}

/// Sensor thread of one connection. Ranges go out once when the thread starts, values on
/// every poll.
pub(crate) struct StandardSensors {
    task: Task,
}

impl StandardSensors {
    pub fn start(capture: Arc<Capture>, flags: CaptureFlags) -> io::Result<Self> {
        let sensors = discover(&capture.config.sysfs_root, flags);
        debug!("[capture] Found {} sensors under {}", sensors.len(), capture.config.sysfs_root.display());
        let interval = capture.config.sensor_poll_interval;

        let task = Task::spawn("capture-sensors", move |quit| {
            if sensors.is_empty() {
                return;
            }
            for s in &sensors {
                capture.sensor_set_range(s.label, s.min, s.max, s.interpolation, s.units);
            }
            loop {
                for s in &sensors {
                    if let Some(value) = s.read() {
                        capture.sensor_set_value(s.label, value);
                    }
                }
                if quit.wait_timeout(interval) {
                    break;
                }
            }
        })?;

        Ok(Self { task })
    }
}

impl Drop for StandardSensors {
    fn drop(&mut self) {
        self.task.quit_and_wait();
    }
}
