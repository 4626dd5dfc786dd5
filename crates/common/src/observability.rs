use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use serde::Serialize;
use uuid::Uuid;

const MAX_SAMPLES: usize = 10000;

/// Request correlation ID for tracing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Active request tracking
#[derive(Debug, Clone)]
struct ActiveRequest {
    started_at: Instant,
    is_streaming: bool,
}

/// Request, fragment and error counters shared across handlers
#[derive(Debug, Clone)]
pub struct ObservableMetrics {
    inner: Arc<RwLock<MetricsData>>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsData {
    total_requests: u64,
    streaming_requests: u64,
    non_streaming_requests: u64,
    active_requests: HashMap<RequestId, ActiveRequest>,

    request_durations: VecDeque<u64>,

    fragments_forwarded: u64,
    decode_warnings: u64,

    errors_by_type: HashMap<&'static str, u64>,

    completed_streams: u64,
    failed_streams: u64,
}

impl ObservableMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsData::default())),
            start_time: Instant::now(),
        }
    }

    /// Start tracking a request
    pub async fn start_request(&self, request_id: RequestId, is_streaming: bool) -> RequestId {
        let mut data = self.inner.write().await;

        data.total_requests += 1;
        if is_streaming {
            data.streaming_requests += 1;
        } else {
            data.non_streaming_requests += 1;
        }

        data.active_requests.insert(request_id.clone(), ActiveRequest {
            started_at: Instant::now(),
            is_streaming,
        });

        request_id
    }

    /// Complete a request
    pub async fn complete_request(&self, request_id: &RequestId) {
        let mut data = self.inner.write().await;

        if let Some(request) = data.active_requests.remove(request_id) {
            let duration_ms = request.started_at.elapsed().as_millis() as u64;

            data.request_durations.push_back(duration_ms);
            if data.request_durations.len() > MAX_SAMPLES {
                data.request_durations.pop_front();
            }

            if request.is_streaming {
                data.completed_streams += 1;
            }
        }
    }

    /// Record an error, closing the request if it is still active
    pub async fn record_error(&self, request_id: Option<&RequestId>, error: &crate::Error) {
        let mut data = self.inner.write().await;

        *data.errors_by_type.entry(error.error_type()).or_insert(0) += 1;

        if let Some(id) = request_id {
            if let Some(request) = data.active_requests.remove(id) {
                if request.is_streaming {
                    data.failed_streams += 1;
                }
            }
        }
    }

    pub async fn record_fragment(&self) {
        self.inner.write().await.fragments_forwarded += 1;
    }

    pub async fn record_decode_warning(&self) {
        self.inner.write().await.decode_warnings += 1;
    }

    /// Calculate percentile from samples
    fn calculate_percentile(samples: &[u64], percentile: f64) -> u64 {
        if samples.is_empty() {
            return 0;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64) as usize;
        sorted[index]
    }

    /// Get detailed metrics snapshot
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let data = self.inner.read().await;

        let duration_samples: Vec<u64> = data.request_durations.iter().copied().collect();

        MetricsSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            uptime_seconds: self.start_time.elapsed().as_secs(),

            total_requests: data.total_requests,
            streaming_requests: data.streaming_requests,
            non_streaming_requests: data.non_streaming_requests,
            active_requests: data.active_requests.len() as u64,

            request_duration_p50_ms: Self::calculate_percentile(&duration_samples, 50.0),
            request_duration_p95_ms: Self::calculate_percentile(&duration_samples, 95.0),
            request_duration_p99_ms: Self::calculate_percentile(&duration_samples, 99.0),

            fragments_forwarded: data.fragments_forwarded,
            decode_warnings: data.decode_warnings,

            completed_streams: data.completed_streams,
            failed_streams: data.failed_streams,

            errors_by_type: data
                .errors_by_type
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
        }
    }
}

impl Default for ObservableMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics snapshot for /metrics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,

    // Request counts
    pub total_requests: u64,
    pub streaming_requests: u64,
    pub non_streaming_requests: u64,
    pub active_requests: u64,

    // Latency percentiles (milliseconds)
    pub request_duration_p50_ms: u64,
    pub request_duration_p95_ms: u64,
    pub request_duration_p99_ms: u64,

    // Stream decoding
    pub fragments_forwarded: u64,
    pub decode_warnings: u64,
    pub completed_streams: u64,
    pub failed_streams: u64,

    pub errors_by_type: HashMap<String, u64>,
}
