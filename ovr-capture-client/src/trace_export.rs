//! Export of decoded events in the Chrome trace-event JSON format, viewable in
//! `chrome://tracing` or https://ui.perfetto.dev.

use std::collections::HashMap;
use std::io::Write;
use serde::Serialize;
use serde_json::{json, Value};
use crate::decoder::CaptureEvent;

/// Pseudo-thread GPU zones are drawn on.
const GPU_TRACK_ID: u32 = u32::MAX;
const PROCESS_ID: u32 = 1;

#[derive(Clone, Debug, Serialize)]
pub struct TraceEvent {
    pub name: String,
    pub ph: &'static str,
    /// Microseconds
    pub ts: f64,
    pub pid: u32,
    pub tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<&'static str>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub args: Value,
    /// Label the name was taken from, renamed once the label arrives
    #[serde(skip)]
    pub label_id: Option<u32>,
}

#[derive(Debug, Default, Serialize)]
pub struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<TraceEvent>,
    #[serde(skip)]
    labels: HashMap<u32, String>,
    #[serde(skip)]
    named_threads: HashMap<u32, String>,
    /// `cpu - gpu` offset from the latest clock sync
    #[serde(skip)]
    gpu_offset: Option<i128>,
}

fn micros(ns: u64) -> f64 {
    ns as f64 / 1000.0
}

impl ChromeTrace {
    fn label(&self, label_id: u32) -> String {
        self.labels.get(&label_id).cloned().unwrap_or_else(|| format!("{label_id:#010x}"))
    }

    fn push(&mut self, name: String, ph: &'static str, ts: u64, tid: u32, args: Value) {
        let s = (ph == "i").then_some("t");
        self.trace_events.push(TraceEvent { name, ph, ts: micros(ts), pid: PROCESS_ID, tid, s, args, label_id: None });
    }

    fn push_labeled(&mut self, label_id: u32, ph: &'static str, ts: u64, tid: u32, value: Option<f32>) {
        let name = self.label(label_id);
        let args = value.map_or(Value::Null, |value| json!({ name.clone(): value }));
        self.push(name, ph, ts, tid, args);
        if let Some(event) = self.trace_events.last_mut() {
            event.label_id = Some(label_id);
        }
    }

    /// Another thread's chunk may announce a label after this thread already used it.
    fn add_label(&mut self, label_id: u32, name: &str) {
        if self.labels.contains_key(&label_id) {
            return;
        }
        self.labels.insert(label_id, name.to_string());
        for event in self.trace_events.iter_mut().filter(|e| e.label_id == Some(label_id)) {
            event.name = name.to_string();
            if let Some(value) = event.args.as_object().and_then(|args| args.values().next().cloned()) {
                event.args = json!({ name: value });
            }
        }
    }

    fn thread_metadata(&mut self, tid: u32, name: &str) {
        if self.named_threads.get(&tid).is_some_and(|n| n == name) {
            return;
        }
        self.named_threads.insert(tid, name.to_string());
        self.push("thread_name".into(), "M", 0, tid, json!({ "name": name }));
    }

    fn gpu_to_cpu(&self, gpu_timestamp: u64) -> u64 {
        match self.gpu_offset {
            Some(offset) => (gpu_timestamp as i128 + offset).clamp(0, u64::MAX as i128) as u64,
            None => gpu_timestamp,
        }
    }

    /// Adds the events of one chunk recorded on thread `thread_id`.
    pub fn add_events(&mut self, thread_id: u32, events: &[CaptureEvent]) {
        for event in events {
            match event {
                CaptureEvent::ThreadName(name) => self.thread_metadata(thread_id, name),
                CaptureEvent::Label { label_id, name } => self.add_label(*label_id, name),
                CaptureEvent::Frame { timestamp } => self.push("Frame".into(), "i", *timestamp, thread_id, Value::Null),
                CaptureEvent::VSync { timestamp } => self.push("VSync".into(), "i", *timestamp, thread_id, Value::Null),
                CaptureEvent::CpuZoneEnter { label_id, timestamp } => {
                    self.push_labeled(*label_id, "B", *timestamp, thread_id, None)
                }
                CaptureEvent::CpuZoneLeave { timestamp } => self.push(String::new(), "E", *timestamp, thread_id, Value::Null),
                CaptureEvent::GpuZoneEnter { label_id, timestamp } => {
                    self.thread_metadata(GPU_TRACK_ID, "GPU");
                    let ts = self.gpu_to_cpu(*timestamp);
                    self.push_labeled(*label_id, "B", ts, GPU_TRACK_ID, None);
                }
                CaptureEvent::GpuZoneLeave { timestamp } => {
                    let ts = self.gpu_to_cpu(*timestamp);
                    self.push(String::new(), "E", ts, GPU_TRACK_ID, Value::Null);
                }
                CaptureEvent::GpuClockSync { timestamp_cpu, timestamp_gpu } => {
                    self.gpu_offset = Some(*timestamp_cpu as i128 - *timestamp_gpu as i128);
                }
                CaptureEvent::SensorRange { .. } => {}
                CaptureEvent::SensorSet { label_id, timestamp, value } => {
                    self.push_labeled(*label_id, "C", *timestamp, thread_id, Some(*value))
                }
                CaptureEvent::FrameBuffer { width, height, timestamp, .. } => {
                    let args = json!({ "width": width, "height": height });
                    self.push("Frame Buffer".into(), "i", *timestamp, thread_id, args);
                }
                CaptureEvent::Log { timestamp, priority, message } => {
                    let args = json!({ "priority": format!("{priority:?}"), "message": message });
                    self.push(message.clone(), "i", *timestamp, thread_id, args);
                }
                CaptureEvent::Unknown { .. } => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.trace_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_events.is_empty()
    }

    pub fn write_json(&self, w: impl Write) -> serde_json::Result<()> {
        serde_json::to_writer(w, self)
    }
}
