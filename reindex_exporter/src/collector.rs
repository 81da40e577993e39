//! Reindex task collector
//!
//! A [`Collector`] runs one scrape at a time. Each scrape fetches the running
//! reindex tasks, turns every task into five gauge samples labeled by source
//! index and finishes with the `up` and scrape duration samples.
//!
//! ## Metrics
//!
//! `elasticsearch_reindex_up`: 1 if every task was collected, else 0
//! `elasticsearch_reindex_scrape_duration_seconds`: Time spent in the scrape
//! `elasticsearch_reindex_total`: Total docs to reindex, per index
//! `elasticsearch_reindex_updated`: Docs updated, per index
//! `elasticsearch_reindex_created`: Docs reindexed, per index
//! `elasticsearch_reindex_deleted`: Docs deleted, per index
//! `elasticsearch_reindex_running_seconds`: Time running, per index
//!

use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, trace};

use crate::{
    client::{self, Task, TaskSource},
    extract,
};

/// Label carried by every per-task sample.
pub const INDEX_LABEL: &str = "index";

/// Errors that end a scrape early.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// See [`crate::client::Error`] for details.
    #[error(transparent)]
    Fetch(#[from] client::Error),
    /// A task description did not name its source index.
    #[error("couldn't extract index name from {description:?}")]
    Extraction {
        /// The offending task description
        description: String,
    },
}

/// The gauges published by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Whether the last scrape collected every task
    Up,
    /// How long the scrape took
    ScrapeDuration,
    /// Total docs to reindex
    Total,
    /// Docs updated
    Updated,
    /// Docs created
    Created,
    /// Docs deleted
    Deleted,
    /// Time the task has been running
    RunningSeconds,
}

impl Metric {
    /// Every metric, in the order they are described.
    pub const ALL: [Metric; 7] = [
        Metric::Up,
        Metric::ScrapeDuration,
        Metric::Total,
        Metric::Updated,
        Metric::Created,
        Metric::Deleted,
        Metric::RunningSeconds,
    ];

    /// Fully qualified metric name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Metric::Up => "elasticsearch_reindex_up",
            Metric::ScrapeDuration => "elasticsearch_reindex_scrape_duration_seconds",
            Metric::Total => "elasticsearch_reindex_total",
            Metric::Updated => "elasticsearch_reindex_updated",
            Metric::Created => "elasticsearch_reindex_created",
            Metric::Deleted => "elasticsearch_reindex_deleted",
            Metric::RunningSeconds => "elasticsearch_reindex_running_seconds",
        }
    }

    /// Help text published alongside the metric.
    #[must_use]
    pub fn help(self) -> &'static str {
        match self {
            Metric::Up => "Elasticsearch tasks API is responding",
            Metric::ScrapeDuration => "Scrape duration in seconds",
            Metric::Total => "Total docs to reindex",
            Metric::Updated => "Docs updated",
            Metric::Created => "Docs reindexed",
            Metric::Deleted => "Docs deleted",
            Metric::RunningSeconds => "Time running in seconds",
        }
    }
}

/// One gauge observation produced by a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// The gauge observed
    pub metric: Metric,
    /// Source index, present on per-task samples only
    pub index: Option<String>,
    /// Observed value
    pub value: f64,
}

impl Sample {
    fn unlabeled(metric: Metric, value: f64) -> Self {
        Self {
            metric,
            index: None,
            value,
        }
    }

    fn labeled(metric: Metric, index: &str, value: f64) -> Self {
        Self {
            metric,
            index: Some(index.to_string()),
            value,
        }
    }
}

fn emit(samples: &mpsc::UnboundedSender<Sample>, sample: Sample) {
    trace!("emit {sample:?}");
    if samples.send(sample).is_err() {
        trace!("sample receiver dropped");
    }
}

/// Runs scrapes against a [`TaskSource`], one at a time.
#[derive(Debug)]
pub struct Collector<S> {
    source: S,
    scrape_lock: Mutex<()>,
}

impl<S> Collector<S>
where
    S: TaskSource,
{
    /// Create a new [`Collector`] reading tasks from `source`.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            source,
            scrape_lock: Mutex::new(()),
        }
    }

    /// Run one scrape, sending every sample to `samples`.
    ///
    /// Waits for any scrape already in progress. Per-task samples are sent as
    /// tasks are processed, then `up` and the scrape duration, each exactly
    /// once. A fetch failure or a task description without an index name
    /// stops the scrape and sets `up` to 0. Samples already sent for earlier
    /// tasks are not withdrawn.
    pub async fn collect(&self, samples: &mpsc::UnboundedSender<Sample>) {
        let _guard = self.scrape_lock.lock().await;
        let start = Instant::now();

        info!("Collecting Elasticsearch reindex metrics...");
        let up = match self.scrape(samples).await {
            Ok(()) => 1.0,
            Err(err) => {
                error!("failed to scrape Elasticsearch: {err}");
                0.0
            }
        };

        emit(samples, Sample::unlabeled(Metric::Up, up));
        emit(
            samples,
            Sample::unlabeled(Metric::ScrapeDuration, start.elapsed().as_secs_f64()),
        );
    }

    /// Run one scrape and return its samples in emission order.
    pub async fn samples(&self) -> Vec<Sample> {
        let (snd, mut rcv) = mpsc::unbounded_channel();
        self.collect(&snd).await;
        drop(snd);

        let mut samples = Vec::new();
        while let Ok(sample) = rcv.try_recv() {
            samples.push(sample);
        }
        samples
    }

    async fn scrape(&self, samples: &mpsc::UnboundedSender<Sample>) -> Result<(), Error> {
        let tasks = self.source.tasks().await?;
        for task in &tasks {
            let Some(index) = extract::index_name(&task.description) else {
                return Err(Error::Extraction {
                    description: task.description.clone(),
                });
            };
            for (metric, value) in task_values(task) {
                emit(samples, Sample::labeled(metric, index, value));
            }
        }
        Ok(())
    }
}

fn task_values(task: &Task) -> [(Metric, f64); 5] {
    [
        (Metric::Total, task.status.total),
        (Metric::Updated, task.status.updated),
        (Metric::Created, task.status.created),
        (Metric::Deleted, task.status.deleted),
        (Metric::RunningSeconds, task.running_seconds()),
    ]
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use http::StatusCode;

    use super::*;
    use crate::client::{Cause, Status};

    #[derive(Debug)]
    enum Canned {
        Tasks(Vec<Task>),
        Unavailable,
    }

    impl TaskSource for Canned {
        async fn tasks(&self) -> Result<Vec<Task>, client::Error> {
            match self {
                Canned::Tasks(tasks) => Ok(tasks.clone()),
                Canned::Unavailable => Err(client::Error::Fetch {
                    uri: "http://localhost:9200/_tasks".to_string(),
                    source: Cause::Status(StatusCode::SERVICE_UNAVAILABLE),
                }),
            }
        }
    }

    /// Tracks how many fetches overlap.
    #[derive(Debug, Default)]
    struct Slow {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl TaskSource for Slow {
        async fn tasks(&self) -> Result<Vec<Task>, client::Error> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![task("reindex from [slow] to [slow-new]", 1.0, 0)])
        }
    }

    fn task(description: &str, total: f64, running_time_in_nanos: i64) -> Task {
        Task {
            status: Status {
                total,
                updated: total / 2.0,
                created: total / 4.0,
                deleted: 1.0,
                batches: 1.0,
            },
            description: description.to_string(),
            start_time_in_millis: 1_535_651_248_563,
            running_time_in_nanos,
        }
    }

    fn sample(metric: Metric, index: &str, value: f64) -> Sample {
        Sample::labeled(metric, index, value)
    }

    /// Split off the trailing `up` and duration samples.
    fn split_tail(mut samples: Vec<Sample>) -> (Vec<Sample>, f64) {
        let duration = samples.pop().expect("missing duration sample");
        assert_eq!(duration.metric, Metric::ScrapeDuration);
        assert_eq!(duration.index, None);
        assert!(duration.value >= 0.0);

        let up = samples.pop().expect("missing up sample");
        assert_eq!(up.metric, Metric::Up);
        assert_eq!(up.index, None);
        assert!(samples.iter().all(|s| s.index.is_some()));
        (samples, up.value)
    }

    #[tokio::test]
    async fn single_task() {
        let collector = Collector::new(Canned::Tasks(vec![Task {
            status: Status {
                total: 100.0,
                updated: 40.0,
                created: 40.0,
                deleted: 0.0,
                batches: 1.0,
            },
            description: "reindex from [idx-a] to [idx-a-new]".to_string(),
            start_time_in_millis: 0,
            running_time_in_nanos: 2_000_000_000,
        }]));

        let (samples, up) = split_tail(collector.samples().await);
        assert_eq!(up, 1.0);
        assert_eq!(
            samples,
            vec![
                sample(Metric::Total, "idx-a", 100.0),
                sample(Metric::Updated, "idx-a", 40.0),
                sample(Metric::Created, "idx-a", 40.0),
                sample(Metric::Deleted, "idx-a", 0.0),
                sample(Metric::RunningSeconds, "idx-a", 2.0),
            ]
        );
    }

    #[tokio::test]
    async fn five_samples_per_task() {
        let tasks: Vec<Task> = (0..7)
            .map(|i| task(&format!("reindex from [idx-{i}] to [idx-{i}-new]"), 10.0, i))
            .collect();
        let collector = Collector::new(Canned::Tasks(tasks));

        let samples = collector.samples().await;
        assert_eq!(samples.len(), 5 * 7 + 2);

        let (samples, up) = split_tail(samples);
        assert_eq!(up, 1.0);
        for (i, group) in samples.chunks(5).enumerate() {
            let index = format!("idx-{i}");
            assert!(group.iter().all(|s| s.index.as_deref() == Some(index.as_str())));
            let metrics: Vec<Metric> = group.iter().map(|s| s.metric).collect();
            assert_eq!(
                metrics,
                vec![
                    Metric::Total,
                    Metric::Updated,
                    Metric::Created,
                    Metric::Deleted,
                    Metric::RunningSeconds,
                ]
            );
        }
    }

    #[tokio::test]
    async fn no_tasks() {
        let collector = Collector::new(Canned::Tasks(Vec::new()));
        let samples = collector.samples().await;
        assert_eq!(samples.len(), 2);
        let (_, up) = split_tail(samples);
        assert_eq!(up, 1.0);
    }

    #[tokio::test]
    async fn fetch_failure_reports_down() {
        let collector = Collector::new(Canned::Unavailable);
        let samples = collector.samples().await;
        assert_eq!(samples.len(), 2);
        let (rest, up) = split_tail(samples);
        assert!(rest.is_empty());
        assert_eq!(up, 0.0);
    }

    #[tokio::test]
    async fn unmatched_description_aborts_scrape() {
        let collector = Collector::new(Canned::Tasks(vec![
            task("reindex from [first] to [first-new]", 10.0, 0),
            task("something unexpected", 10.0, 0),
            task("reindex from [third] to [third-new]", 10.0, 0),
        ]));

        let samples = collector.samples().await;
        assert_eq!(samples.len(), 5 + 2);
        let (rest, up) = split_tail(samples);
        assert_eq!(up, 0.0);
        assert!(rest.iter().all(|s| s.index.as_deref() == Some("first")));
    }

    #[tokio::test]
    async fn leading_unmatched_description_emits_no_tasks() {
        let collector = Collector::new(Canned::Tasks(vec![
            task("something unexpected", 10.0, 0),
            task("reindex from [second] to [second-new]", 10.0, 0),
        ]));

        let samples = collector.samples().await;
        assert_eq!(samples.len(), 2);
        let (_, up) = split_tail(samples);
        assert_eq!(up, 0.0);
    }

    #[tokio::test]
    async fn repeated_scrapes_agree() {
        let collector = Collector::new(Canned::Tasks(vec![
            task("reindex from [a] to [a-new]", 10.0, 5),
            task("reindex from [b] to [b-new]", 20.0, 6),
        ]));

        let (first, first_up) = split_tail(collector.samples().await);
        let (second, second_up) = split_tail(collector.samples().await);
        assert_eq!(first, second);
        assert_eq!(first_up, second_up);
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_stop_scrape() {
        let collector = Collector::new(Canned::Tasks(vec![task(
            "reindex from [a] to [a-new]",
            10.0,
            5,
        )]));
        let (snd, rcv) = mpsc::unbounded_channel();
        drop(rcv);
        collector.collect(&snd).await;
        // The lock is released afterward.
        assert_eq!(collector.samples().await.len(), 7);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scrapes_are_serialized() {
        let collector = Collector::new(Slow::default());
        let (a, b, c) = tokio::join!(
            collector.samples(),
            collector.samples(),
            collector.samples()
        );
        for samples in [a, b, c] {
            assert_eq!(samples.len(), 7);
        }
        assert_eq!(collector.source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn metric_names_are_unique_and_namespaced() {
        let names: HashSet<&str> = Metric::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(names.len(), Metric::ALL.len());
        assert!(names.iter().all(|n| n.starts_with("elasticsearch_reindex_")));
    }
}
