use crate::error::EngineError;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

pub const METRICS_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub total_frames: i64,
    pub processed_frames: i64,
    pub failed_frames: i64,
    pub skipped_frames: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepLatency {
    pub step_name: String,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
    pub total_ms: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuSample {
    pub timestamp_ms: i64,
    pub usage_mb: i64,
}

struct MetricsInner {
    summary: FrameSummary,
    step_starts: HashMap<String, HashMap<ThreadId, Instant>>,
    step_samples: HashMap<String, Vec<f64>>,
    gpu_samples: Vec<GpuSample>,
    gpu_peak_mb: i64,
    gpu_sum_mb: i64,
    gpu_sample_count: i64,
    last_gpu_sample: Option<Instant>,
    gpu_sample_interval: Duration,
}

/// Per-task counters, step latencies and GPU memory samples.
///
/// Step timing keys on the calling thread so concurrent workers can nest
/// the same step name without clobbering each other's start marks.
pub struct MetricsCollector {
    task_id: String,
    start_time: Instant,
    inner: Mutex<MetricsInner>,
}

impl MetricsCollector {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            start_time: Instant::now(),
            inner: Mutex::new(MetricsInner {
                summary: FrameSummary::default(),
                step_starts: HashMap::new(),
                step_samples: HashMap::new(),
                gpu_samples: Vec::new(),
                gpu_peak_mb: 0,
                gpu_sum_mb: 0,
                gpu_sample_count: 0,
                last_gpu_sample: None,
                gpu_sample_interval: Duration::from_millis(500),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_total_frames(&self, total: i64) {
        self.lock().summary.total_frames = total;
    }

    pub fn set_gpu_sample_interval(&self, interval: Duration) {
        self.lock().gpu_sample_interval = interval;
    }

    pub fn record_frame_completed(&self) {
        self.lock().summary.processed_frames += 1;
    }

    pub fn record_frame_failed(&self) {
        self.lock().summary.failed_frames += 1;
    }

    pub fn record_frame_skipped(&self) {
        self.lock().summary.skipped_frames += 1;
    }

    pub fn start_step(&self, step_name: &str) {
        let thread_id = std::thread::current().id();
        self.lock()
            .step_starts
            .entry(step_name.to_string())
            .or_default()
            .insert(thread_id, Instant::now());
    }

    pub fn end_step(&self, step_name: &str) {
        let thread_id = std::thread::current().id();
        let mut inner = self.lock();
        let Some(started) = inner
            .step_starts
            .get_mut(step_name)
            .and_then(|starts| starts.remove(&thread_id))
        else {
            tracing::warn!(step_name, "end_step without a matching start_step");
            return;
        };
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        inner
            .step_samples
            .entry(step_name.to_string())
            .or_default()
            .push(duration_ms);
    }

    /// Scoped helper: starts the step on creation, ends it on drop.
    pub fn step_timer<'a>(self: &'a Arc<Self>, step_name: &str) -> StepTimer<'a> {
        self.start_step(step_name);
        StepTimer {
            collector: self,
            step_name: step_name.to_string(),
        }
    }

    /// Rate-limited GPU memory sample.
    pub fn record_gpu_memory(&self, usage_mb: i64) {
        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(last) = inner.last_gpu_sample {
            if now.duration_since(last) < inner.gpu_sample_interval {
                return;
            }
        }
        inner.last_gpu_sample = Some(now);
        let timestamp_ms = self.start_time.elapsed().as_millis() as i64;
        inner.gpu_samples.push(GpuSample {
            timestamp_ms,
            usage_mb,
        });
        inner.gpu_peak_mb = inner.gpu_peak_mb.max(usage_mb);
        inner.gpu_sum_mb += usage_mb;
        inner.gpu_sample_count += 1;
    }

    pub fn summary(&self) -> FrameSummary {
        self.lock().summary
    }

    pub fn step_latencies(&self) -> Vec<StepLatency> {
        let inner = self.lock();
        let mut latencies: Vec<StepLatency> = inner
            .step_samples
            .iter()
            .map(|(name, samples)| calculate_step_latency(name, samples))
            .collect();
        latencies.sort_by(|a, b| a.step_name.cmp(&b.step_name));
        latencies
    }

    pub fn to_json(&self) -> serde_json::Value {
        let inner = self.lock();
        let mut step_latency = serde_json::Value::Array(
            inner
                .step_samples
                .iter()
                .map(|(name, samples)| {
                    let latency = calculate_step_latency(name, samples);
                    json!({
                        "step_name": latency.step_name,
                        "avg_ms": latency.avg_ms,
                        "p50_ms": latency.p50_ms,
                        "p99_ms": latency.p99_ms,
                        "total_ms": latency.total_ms,
                        "sample_count": latency.sample_count,
                    })
                })
                .collect(),
        );
        if let serde_json::Value::Array(entries) = &mut step_latency {
            entries.sort_by_key(|entry| {
                entry["step_name"].as_str().unwrap_or_default().to_string()
            });
        }

        let avg_mb = if inner.gpu_sample_count > 0 {
            inner.gpu_sum_mb / inner.gpu_sample_count
        } else {
            0
        };

        json!({
            "schema_version": METRICS_SCHEMA_VERSION,
            "task_id": self.task_id,
            "timestamp": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "duration_ms": self.start_time.elapsed().as_millis() as i64,
            "summary": {
                "total_frames": inner.summary.total_frames,
                "processed_frames": inner.summary.processed_frames,
                "failed_frames": inner.summary.failed_frames,
                "skipped_frames": inner.summary.skipped_frames,
            },
            "step_latency": step_latency,
            "gpu_memory": {
                "peak_mb": inner.gpu_peak_mb,
                "avg_mb": avg_mb,
                "samples": inner.gpu_samples.iter().map(|sample| json!({
                    "timestamp_ms": sample.timestamp_ms,
                    "usage_mb": sample.usage_mb,
                })).collect::<Vec<_>>(),
            },
        })
    }

    /// Write the JSON export; a literal `{timestamp}` in the path is
    /// substituted with a filename-safe UTC timestamp.
    pub fn export_json(&self, output_path: &Path) -> Result<(), EngineError> {
        let timestamp = chrono::Utc::now()
            .format("%Y-%m-%dT%H-%M-%SZ")
            .to_string();
        let path_str = output_path
            .to_string_lossy()
            .replace("{timestamp}", &timestamp);
        let final_path = Path::new(&path_str);

        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(final_path, serde_json::to_string_pretty(&self.to_json())?).map_err(|e| {
            EngineError::OutputWriteFailed {
                path: final_path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        tracing::info!(path = %final_path.display(), "metrics exported");
        Ok(())
    }
}

pub struct StepTimer<'a> {
    collector: &'a Arc<MetricsCollector>,
    step_name: String,
}

impl Drop for StepTimer<'_> {
    fn drop(&mut self) {
        self.collector.end_step(&self.step_name);
    }
}

fn calculate_step_latency(name: &str, samples: &[f64]) -> StepLatency {
    let mut latency = StepLatency {
        step_name: name.to_string(),
        sample_count: samples.len() as i64,
        ..Default::default()
    };
    if samples.is_empty() {
        return latency;
    }

    latency.total_ms = samples.iter().sum();
    latency.avg_ms = latency.total_ms / samples.len() as f64;

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    latency.p50_ms = percentile(&sorted, 0.50);
    latency.p99_ms = percentile(&sorted, 0.99);
    latency
}

/// Linear-interpolated percentile over pre-sorted samples.
fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let index = fraction * (len - 1) as f64;
            let lower = index as usize;
            let upper = lower + 1;
            if upper >= len {
                return sorted[len - 1];
            }
            let weight = index - lower as f64;
            sorted[lower] * (1.0 - weight) + sorted[upper] * weight
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counters_accumulate() {
        let metrics = MetricsCollector::new("metrics_task");
        metrics.set_total_frames(10);
        metrics.record_frame_completed();
        metrics.record_frame_completed();
        metrics.record_frame_failed();
        metrics.record_frame_skipped();

        let summary = metrics.summary();
        assert_eq!(summary.total_frames, 10);
        assert_eq!(summary.processed_frames, 2);
        assert_eq!(summary.failed_frames, 1);
        assert_eq!(summary.skipped_frames, 1);
    }

    #[test]
    fn percentiles_interpolate_linearly() {
        let sorted = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&sorted, 0.5), 25.0);
        assert!((percentile(&sorted, 0.99) - 39.7).abs() < 1e-9);
        assert_eq!(percentile(&sorted, 0.0), 10.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
        assert_eq!(percentile(&[7.0], 0.99), 7.0);
    }

    #[test]
    fn step_timing_pairs_by_thread() {
        let metrics = Arc::new(MetricsCollector::new("steps_task"));
        {
            let _timer = metrics.step_timer("decode");
            std::thread::sleep(Duration::from_millis(2));
        }
        metrics.start_step("swap");
        metrics.end_step("swap");
        // Unmatched end is ignored rather than panicking a worker.
        metrics.end_step("never_started");

        let latencies = metrics.step_latencies();
        assert_eq!(latencies.len(), 2);
        let decode = latencies
            .iter()
            .find(|latency| latency.step_name == "decode")
            .unwrap();
        assert_eq!(decode.sample_count, 1);
        assert!(decode.avg_ms >= 2.0);
    }

    #[test]
    fn json_export_has_the_documented_schema() {
        let metrics = Arc::new(MetricsCollector::new("json_task"));
        metrics.set_total_frames(2);
        metrics.record_frame_completed();
        metrics.set_gpu_sample_interval(Duration::ZERO);
        metrics.record_gpu_memory(1024);
        metrics.record_gpu_memory(2048);
        {
            let _timer = metrics.step_timer("swap");
        }

        let value = metrics.to_json();
        assert_eq!(value["schema_version"], METRICS_SCHEMA_VERSION);
        assert_eq!(value["task_id"], "json_task");
        assert_eq!(value["summary"]["processed_frames"], 1);
        assert_eq!(value["gpu_memory"]["peak_mb"], 2048);
        assert_eq!(value["gpu_memory"]["samples"].as_array().unwrap().len(), 2);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(
            value["step_latency"][0]["step_name"].as_str().unwrap(),
            "swap"
        );
    }

    #[test]
    fn export_substitutes_the_timestamp_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = MetricsCollector::new("export_task");
        let template = dir.path().join("metrics_{timestamp}.json");
        metrics.export_json(&template).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        let name = name.to_string_lossy();
        assert!(name.starts_with("metrics_"));
        assert!(!name.contains("{timestamp}"));
    }
}
