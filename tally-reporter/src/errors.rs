// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by tally-reporter.

use camino::Utf8PathBuf;
use config::ConfigError;
use tally_store::errors::{StoreError, TransportJoinError};
use thiserror::Error;

/// An error that occurred while loading the reporter configuration.
#[derive(Debug, Error)]
#[error("failed to parse tally config{}", .config_file.as_ref().map(|file| format!(" at `{file}`")).unwrap_or_default())]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<Utf8PathBuf>, err: ConfigError) -> Self {
        Self { config_file, err }
    }

    /// Returns the config file that failed to parse, if the error came from one.
    pub fn config_file(&self) -> Option<&Utf8PathBuf> {
        self.config_file.as_ref()
    }
}

/// An error that occurred while configuring the reporter or writing a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReporterError {
    /// The reporter configuration could not be loaded.
    #[error("error loading reporter configuration")]
    Config(#[from] ConfigParseError),

    /// Reading from or writing to the shared store failed.
    #[error("error accessing shared test results")]
    Store(#[from] StoreError),

    /// The store's directories could not be passed to workers.
    #[error("error preparing worker environment")]
    WorkerEnv(#[from] TransportJoinError),

    /// An error occurred while operating on the file system.
    #[error("error operating on path {file}")]
    Fs {
        /// The file being operated on.
        file: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while producing JUnit XML.
    #[error("error writing JUnit output to {file}")]
    Junit {
        /// The output file.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },

    /// An error occurred while writing to the caller's output stream.
    #[error("error writing to output")]
    Io(#[source] std::io::Error),
}
