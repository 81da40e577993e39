//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Every problem with the
//! user's configuration surfaces here as an [`Error`], before the server
//! starts.
//!
//! Configuration is resolved in three layers: built-in defaults, then an
//! optional YAML document, then command-line flags applied by the binary.

use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use http::Uri;
use serde::Deserialize;
use tracing::debug;

/// Environment variable holding a YAML configuration document. Takes
/// precedence over any configuration file.
pub const CONFIG_ENV_VAR: &str = "REINDEX_EXPORTER_CONFIG";

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// The metrics path is not an absolute, non-root path.
    #[error("Invalid telemetry path {0:?}: must start with '/' and not be '/'")]
    TelemetryPath(String),
    /// The Elasticsearch URL did not parse.
    #[error("Invalid Elasticsearch URL {url:?}: {source}")]
    Url {
        /// The configured URL
        url: String,
        /// Underlying parse error
        #[source]
        source: http::uri::InvalidUri,
    },
    /// The Elasticsearch URL is not an http or https URL.
    #[error("Missing or unsupported Elasticsearch URL scheme {0:?}: expected http or https")]
    UrlScheme(String),
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9421))
}

fn default_telemetry_path() -> String {
    "/metrics".to_string()
}

fn default_es_url() -> String {
    "http://localhost:9200".to_string()
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to serve the landing page and metrics on
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
    /// Path under which metrics are exposed
    #[serde(default = "default_telemetry_path")]
    pub telemetry_path: String,
    /// Base URL of the Elasticsearch cluster to scrape
    #[serde(default = "default_es_url")]
    pub es_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            telemetry_path: default_telemetry_path(),
            es_url: default_es_url(),
        }
    }
}

impl Config {
    /// Parse a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Function will return an error if the document is not valid YAML or has
    /// unknown fields.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load the configuration.
    ///
    /// The [`CONFIG_ENV_VAR`] environment variable is used if set, then the
    /// file at `path` if given. With neither the defaults apply.
    ///
    /// # Errors
    ///
    /// Function will return an error if the file cannot be read or the
    /// document does not parse.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        if let Ok(contents) = env::var(CONFIG_ENV_VAR) {
            debug!("Using config from env var '{CONFIG_ENV_VAR}'");
            return Self::from_yaml(&contents);
        }
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    /// Load the configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Function will return an error if the file cannot be read or the
    /// document does not parse.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        debug!("Attempting to open configuration file at: {}", path.display());
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::from_yaml(&contents)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Function will return an error if the telemetry path is not an absolute
    /// non-root path, or if the Elasticsearch URL is not an http(s) URL.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.telemetry_path.starts_with('/') || self.telemetry_path == "/" {
            return Err(Error::TelemetryPath(self.telemetry_path.clone()));
        }

        let uri: Uri = self.es_url.parse().map_err(|source| Error::Url {
            url: self.es_url.clone(),
            source,
        })?;
        match uri.scheme_str() {
            Some("http" | "https") => Ok(()),
            other => Err(Error::UrlScheme(other.unwrap_or_default().to_string())),
        }
    }
}
