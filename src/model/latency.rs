//! Per-destination send latency digests.
//!
//! Successful attempts feed a TDigest per destination so observers can see
//! percentile send times without keeping every sample around.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tdigests::{Centroid, TDigest};

/// Centroid budget each digest is compressed to after a merge.
const MAX_CENTROIDS: usize = 100;

/// Latency figures for one destination, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
}

/// Digests keyed by destination id.
#[derive(Default)]
pub struct LatencyBook {
    digests: BTreeMap<String, TDigest>,
}

impl LatencyBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful attempt.
    pub fn record(&mut self, id: &str, elapsed: Duration) {
        let value = elapsed.as_secs_f64() * 1000.0;
        let incoming = TDigest::from_values(vec![value]);
        let merged = match self.digests.remove(id) {
            Some(existing) => merge(&existing, &incoming),
            None => incoming,
        };
        self.digests.insert(id.to_string(), merged);
    }

    pub fn summary(&self) -> BTreeMap<String, LatencySummary> {
        self.digests
            .iter()
            .map(|(id, td)| (id.clone(), summarize(td)))
            .collect()
    }
}

fn merge(a: &TDigest, b: &TDigest) -> TDigest {
    let mut centroids: Vec<Centroid> = a
        .centroids()
        .iter()
        .chain(b.centroids().iter())
        .map(|c| Centroid::new(c.mean, c.weight))
        .collect();
    centroids.sort_by(|x, y| x.mean.total_cmp(&y.mean));

    let mut td = TDigest::from_centroids(centroids);
    td.compress(MAX_CENTROIDS);
    td
}

/// Min, max and mean are taken from the centroids since the digest does not
/// track them directly.
fn summarize(td: &TDigest) -> LatencySummary {
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let mut sum = 0.0;
    let mut count = 0.0;

    for c in td.centroids() {
        min = min.min(c.mean);
        max = max.max(c.mean);
        sum += c.mean * c.weight;
        count += c.weight;
    }

    if count == 0.0 {
        return LatencySummary {
            count: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            mean_ms: 0.0,
            p50_ms: 0.0,
            p90_ms: 0.0,
            p99_ms: 0.0,
        };
    }

    LatencySummary {
        count,
        min_ms: min,
        max_ms: max,
        mean_ms: sum / count,
        p50_ms: td.estimate_quantile(0.5),
        p90_ms: td.estimate_quantile(0.9),
        p99_ms: td.estimate_quantile(0.99),
    }
}
