//! The Elasticsearch reindex exporter.
//!
//! This library supports the `reindex_exporter` binary found elsewhere in this
//! project. On every scrape of the metrics endpoint the exporter asks an
//! Elasticsearch cluster for its running reindex tasks and republishes their
//! progress counters as Prometheus gauges, labeled by source index.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod client;
pub mod collector;
pub mod config;
pub mod exposition;
pub mod extract;
pub mod server;
