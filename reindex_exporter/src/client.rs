//! Elasticsearch tasks API client
//!
//! This module fetches the reindex tasks an Elasticsearch cluster is currently
//! running. The tasks API groups tasks by the node executing them:
//!
//! ```text
//! { "nodes": { "<node id>": { "tasks": { "<task id>": { ... } } } } }
//! ```
//!
//! Grouping carries no meaning for the exporter, so tasks are flattened into a
//! single collection, ordered by node id then task id.

use std::{collections::BTreeMap, future::Future};

use http::StatusCode;
use serde::{Deserialize, Deserializer};
use tracing::{debug, trace};

const TASKS_PATH: &str = "/_tasks?pretty&detailed=true&actions=*reindex";

/// Errors produced by [`Client`]
///
/// Callers only need to know that the fetch failed. The [`Cause`] is kept for
/// logging.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The tasks could not be fetched from Elasticsearch.
    #[error("fetch failed for {uri}: {source}")]
    Fetch {
        /// URI that was requested
        uri: String,
        /// What went wrong
        #[source]
        source: Cause,
    },
}

/// The underlying reason a fetch failed.
#[derive(thiserror::Error, Debug)]
pub enum Cause {
    /// The request could not be sent or no response arrived.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    /// Elasticsearch answered with something other than `200 OK`.
    #[error("unexpected response status: {0}")]
    Status(StatusCode),
    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    /// The response body was not a tasks API document.
    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Decode an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Document counters of a reindex task.
#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Status {
    /// Total documents the task will process
    #[serde(deserialize_with = "null_as_default")]
    pub total: f64,
    /// Documents updated so far
    #[serde(deserialize_with = "null_as_default")]
    pub updated: f64,
    /// Documents created so far
    #[serde(deserialize_with = "null_as_default")]
    pub created: f64,
    /// Documents deleted so far
    #[serde(deserialize_with = "null_as_default")]
    pub deleted: f64,
    /// Scroll batches pulled so far
    #[serde(deserialize_with = "null_as_default")]
    pub batches: f64,
}

/// A single in-flight reindex task.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Task {
    /// Progress counters
    #[serde(deserialize_with = "null_as_default")]
    pub status: Status,
    /// Free-text description, embeds the source index name
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    /// Task start, milliseconds since the epoch
    #[serde(deserialize_with = "null_as_default")]
    pub start_time_in_millis: i64,
    /// Time the task has been running, in nanoseconds
    #[serde(deserialize_with = "null_as_default")]
    pub running_time_in_nanos: i64,
}

impl Task {
    /// Time the task has been running, in seconds.
    #[must_use]
    pub fn running_seconds(&self) -> f64 {
        self.running_time_in_nanos as f64 / 1e9
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TasksResponse {
    #[serde(deserialize_with = "null_as_default")]
    nodes: BTreeMap<String, Option<Node>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Node {
    #[serde(deserialize_with = "null_as_default")]
    tasks: BTreeMap<String, Option<Task>>,
}

fn decode(body: &[u8]) -> Result<Vec<Task>, serde_json::Error> {
    let response: TasksResponse = serde_json::from_slice(body)?;
    Ok(response
        .nodes
        .into_values()
        .flatten()
        .flat_map(|node| node.tasks.into_values())
        .map(Option::unwrap_or_default)
        .collect())
}

/// A source of reindex tasks.
///
/// [`Client`] is the only production implementation.
pub trait TaskSource {
    /// Fetch the reindex tasks currently running.
    ///
    /// # Errors
    ///
    /// Function will return an error if the tasks cannot be fetched or decoded.
    fn tasks(&self) -> impl Future<Output = Result<Vec<Task>, Error>> + Send;
}

/// Client for the Elasticsearch tasks API.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    uri: String,
}

impl Client {
    /// Create a new [`Client`] for the cluster at `base_url`.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        let uri = format!("{base}{TASKS_PATH}", base = base_url.trim_end_matches('/'));
        Self {
            http: reqwest::Client::new(),
            uri,
        }
    }

    /// The full URI requested on every fetch.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn fail(&self, source: Cause) -> Error {
        Error::Fetch {
            uri: self.uri.clone(),
            source,
        }
    }
}

impl TaskSource for Client {
    async fn tasks(&self) -> Result<Vec<Task>, Error> {
        debug!("querying {uri}...", uri = self.uri);

        let resp = self
            .http
            .get(&self.uri)
            .send()
            .await
            .map_err(|err| self.fail(Cause::Transport(err)))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(self.fail(Cause::Status(status)));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|err| self.fail(Cause::Body(err)))?;
        let tasks = decode(&body).map_err(|err| self.fail(Cause::Decode(err)))?;

        trace!("decoded {count} reindex tasks", count = tasks.len());
        Ok(tasks)
    }
}
