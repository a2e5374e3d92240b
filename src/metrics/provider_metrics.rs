//! Provider metrics tracking using OpenTelemetry.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::time::Instant;

/// Metrics collector for one provider worker.
///
/// Every measurement carries a `provider` attribute.
///
/// # Examples
///
/// ```rust,no_run
/// use routesync::metrics::ProviderMetrics;
/// use opentelemetry::global;
///
/// let metrics = ProviderMetrics::new(global::meter("routesync"), "etcd");
/// metrics.record_retry();
/// ```
#[derive(Clone)]
pub struct ProviderMetrics {
    rebuild_attempts: Counter<u64>,
    rebuild_failures: Counter<u64>,
    rebuild_duration: Histogram<f64>,
    publications: Counter<u64>,
    suppressed: Counter<u64>,
    retries: Counter<u64>,
    attributes: [KeyValue; 1],
}

impl ProviderMetrics {
    /// Create a collector for the provider `name`.
    pub fn new(meter: Meter, name: impl Into<String>) -> Self {
        let rebuild_attempts = meter
            .u64_counter("routesync.rebuild.attempts")
            .with_description("Total number of configuration rebuilds")
            .build();

        let rebuild_failures = meter
            .u64_counter("routesync.rebuild.failures")
            .with_description("Number of rebuilds aborted by an error")
            .build();

        let rebuild_duration = meter
            .f64_histogram("routesync.rebuild.duration")
            .with_description("Duration of rebuilds in seconds")
            .with_unit("s")
            .build();

        let publications = meter
            .u64_counter("routesync.publications")
            .with_description("Configurations sent downstream")
            .build();

        let suppressed = meter
            .u64_counter("routesync.publications.suppressed")
            .with_description("Configurations identical to the last one sent")
            .build();

        let retries = meter
            .u64_counter("routesync.retries")
            .with_description("Reconnect attempts after an error")
            .build();

        Self {
            rebuild_attempts,
            rebuild_failures,
            rebuild_duration,
            publications,
            suppressed,
            retries,
            attributes: [KeyValue::new("provider", name.into())],
        }
    }

    /// Start a rebuild timer.
    pub fn start_rebuild(&self) -> Instant {
        self.rebuild_attempts.add(1, &self.attributes);
        Instant::now()
    }

    /// Record the end of a rebuild started with [`start_rebuild`](Self::start_rebuild).
    pub fn record_rebuild(&self, start: Instant, success: bool) {
        self.rebuild_duration
            .record(start.elapsed().as_secs_f64(), &self.attributes);
        if !success {
            self.rebuild_failures.add(1, &self.attributes);
        }
    }

    /// Record the outcome of a publication.
    pub fn record_publication(&self, sent: bool) {
        if sent {
            self.publications.add(1, &self.attributes);
        } else {
            self.suppressed.add(1, &self.attributes);
        }
    }

    /// Record a reconnect attempt.
    pub fn record_retry(&self) {
        self.retries.add(1, &self.attributes);
    }
}
