//! Prometheus rendering of scrape samples
//!
//! Every scrape is rendered through its own recorder. Gauges from an earlier
//! scrape never leak into a later one, so an index whose reindex task has
//! finished simply disappears from the output.

use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::collector::{INDEX_LABEL, Metric, Sample};

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Record `samples` into the current [`metrics`] recorder.
///
/// Samples sharing a metric and index set the same gauge. The last one wins.
pub fn record(samples: &[Sample]) {
    for metric in Metric::ALL {
        describe_gauge!(metric.name(), metric.help());
    }

    for sample in samples {
        match &sample.index {
            Some(index) => {
                gauge!(sample.metric.name(), INDEX_LABEL => index.clone()).set(sample.value);
            }
            None => gauge!(sample.metric.name()).set(sample.value),
        }
    }
}

/// Render `samples` in the Prometheus text exposition format.
#[must_use]
pub fn render(samples: &[Sample]) -> String {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || record(samples));
    handle.render()
}
