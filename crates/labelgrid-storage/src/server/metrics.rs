//! Storage service metrics.
//!
//! Handles are registered once against the global meter provider by
//! [`init_metric_handles`]. Every recording function compiles to a no-op
//! when the `metrics` feature is disabled.

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
static SESSIONS_OPENED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static WRITES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static BYTES_WRITTEN: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REQUEST_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static FLUSH_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
pub fn init_metric_handles() {
    let meter = opentelemetry::global::meter("labelgrid-storage");
    let _ = SESSIONS_OPENED.set(
        meter
            .u64_counter("sessions_opened")
            .with_description("Label files opened through Open")
            .build(),
    );
    let _ = WRITES.set(
        meter
            .u64_counter("writes")
            .with_description("Write requests accepted")
            .build(),
    );
    let _ = BYTES_WRITTEN.set(
        meter
            .u64_counter("bytes_written")
            .with_unit("By")
            .with_description("Label bytes appended")
            .build(),
    );
    let _ = REQUEST_ERRORS.set(
        meter
            .u64_counter("errors")
            .with_description("Requests that returned an error status")
            .build(),
    );
    let _ = FLUSH_DURATION_MS.set(
        meter
            .f64_histogram("flush_duration")
            .with_unit("ms")
            .with_description("Time spent forcing buffered labels to disk")
            .build(),
    );
}
#[cfg(not(feature = "metrics"))]
pub fn init_metric_handles() {}

#[cfg(feature = "metrics")]
pub fn increment_sessions_opened() {
    if let Some(counter) = SESSIONS_OPENED.get() {
        counter.add(1, &[]);
    }
}
#[cfg(not(feature = "metrics"))]
pub fn increment_sessions_opened() {}

#[cfg(feature = "metrics")]
pub fn record_write(bytes: u64) {
    if let Some(counter) = WRITES.get() {
        counter.add(1, &[]);
    }
    if let Some(counter) = BYTES_WRITTEN.get() {
        counter.add(bytes, &[]);
    }
}
#[cfg(not(feature = "metrics"))]
pub fn record_write(_bytes: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_request_errors() {
    if let Some(counter) = REQUEST_ERRORS.get() {
        counter.add(1, &[]);
    }
}
#[cfg(not(feature = "metrics"))]
pub fn increment_request_errors() {}

#[cfg(feature = "metrics")]
pub fn record_flush_duration(ms: f64) {
    if let Some(histogram) = FLUSH_DURATION_MS.get() {
        histogram.record(ms, &[]);
    }
}
#[cfg(not(feature = "metrics"))]
pub fn record_flush_duration(_ms: f64) {}
