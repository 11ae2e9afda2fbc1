//! Prometheus request metrics for the HTTP surface.

use std::{fmt::Write, time::Duration};

use axum::http::Method;
use dashmap::DashMap;

/// Upper bounds, in seconds, of the request duration histogram.
const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct SeriesKey {
    method: String,
    status: u16,
}

#[derive(Debug, Default, Clone)]
struct Series {
    count: u64,
    sum_seconds: f64,
    /// Cumulative: each slot counts requests at or under its bound.
    buckets: [u64; DURATION_BUCKETS.len()],
}

/// Request counters and latency histograms, partitioned by method and status.
#[derive(Default)]
pub struct HttpMetrics {
    series: DashMap<SeriesKey, Series>,
}

impl HttpMetrics {
    pub fn record(&self, method: &Method, status: u16, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        let mut series = self
            .series
            .entry(SeriesKey {
                method: method.as_str().to_owned(),
                status,
            })
            .or_default();
        series.count += 1;
        series.sum_seconds += seconds;
        for (slot, bound) in series.buckets.iter_mut().zip(DURATION_BUCKETS) {
            if seconds <= bound {
                *slot += 1;
            }
        }
    }

    /// Text exposition format, series sorted by method then status.
    pub fn render_prometheus(&self) -> String {
        let mut entries: Vec<(SeriesKey, Series)> = self
            .series
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|(left, _), (right, _)| left.cmp(right));

        let mut output = String::new();
        output.push_str(
            "# HELP ctf_http_requests_total Total HTTP requests processed, by method and status code.\n",
        );
        output.push_str("# TYPE ctf_http_requests_total counter\n");
        for (key, series) in &entries {
            let _ = writeln!(
                output,
                "ctf_http_requests_total{{{}}} {}",
                labels(key),
                series.count
            );
        }

        output.push_str(
            "# HELP ctf_http_request_duration_seconds Response time of HTTP requests.\n",
        );
        output.push_str("# TYPE ctf_http_request_duration_seconds histogram\n");
        for (key, series) in &entries {
            let labels = labels(key);
            for (bound, count) in DURATION_BUCKETS.iter().zip(series.buckets) {
                let _ = writeln!(
                    output,
                    "ctf_http_request_duration_seconds_bucket{{{labels},le=\"{bound}\"}} {count}"
                );
            }
            let _ = writeln!(
                output,
                "ctf_http_request_duration_seconds_bucket{{{labels},le=\"+Inf\"}} {}",
                series.count
            );
            let _ = writeln!(
                output,
                "ctf_http_request_duration_seconds_sum{{{labels}}} {}",
                series.sum_seconds
            );
            let _ = writeln!(
                output,
                "ctf_http_request_duration_seconds_count{{{labels}}} {}",
                series.count
            );
        }
        output
    }
}

fn labels(key: &SeriesKey) -> String {
    format!("method=\"{}\",status=\"{}\"", key.method, key.status)
}
