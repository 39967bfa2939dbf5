// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by tally-store.

use camino::Utf8PathBuf;
use std::{error, ffi::OsString, fmt};
use thiserror::Error;

/// An error that occurred while reading from or writing to a backing directory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backing directory does not exist.
    ///
    /// This usually means the directory was torn down before every reader was
    /// done with it.
    #[error("backing directory `{dir}` not found")]
    NotFound {
        /// The directory that was expected to exist.
        dir: Utf8PathBuf,
    },

    /// A contribution file could not be deserialized into the expected type.
    #[error("contribution file `{path}` is corrupt")]
    CorruptData {
        /// The contribution file.
        path: Utf8PathBuf,

        /// The underlying deserialization error.
        #[source]
        error: serde_json::Error,
    },

    /// A value could not be serialized before being written.
    #[error("failed to serialize contribution")]
    Serialize {
        /// The underlying serialization error.
        #[source]
        error: serde_json::Error,
    },

    /// An error occurred while creating a backing directory.
    #[error("failed to create backing directory `{dir}`")]
    DirCreate {
        /// The directory that could not be created.
        dir: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while reading a backing directory or one of its files.
    #[error("error reading `{path}`")]
    Read {
        /// The path being read.
        path: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while writing a contribution file.
    #[error("error writing contribution file `{path}`")]
    Write {
        /// The contribution file being written.
        path: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while removing a backing directory.
    #[error("error removing backing directory `{dir}`")]
    Remove {
        /// The directory being removed.
        dir: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// The deltas in a counter's backing directory sum to a value outside the range of `i64`.
    #[error("counter in `{dir}` overflowed: deltas sum to {sum}")]
    Overflow {
        /// The counter's backing directory.
        dir: Utf8PathBuf,

        /// The exact sum of the deltas.
        sum: i128,
    },

    /// The counters of a finalized registry sum to a value outside the range of `i64`.
    #[error("total across counters overflowed: counters sum to {sum}")]
    TotalOverflow {
        /// The exact sum of the counters.
        sum: i128,
    },

    /// A counter name was requested that the registry wasn't created with.
    #[error(
        "unknown counter `{name}` (known counters: {})",
        .known.join(", "),
    )]
    UnknownCounter {
        /// The name that was requested.
        name: String,

        /// The names the registry knows about.
        known: Vec<String>,
    },

    /// A registry was created with the same counter name more than once.
    #[error("counter `{name}` specified more than once")]
    DuplicateCounter {
        /// The repeated name.
        name: String,
    },

    /// The transport string could not be parsed.
    #[error("failed to parse transport string")]
    TransportParse(#[from] TransportParseError),

    /// The backing directories could not be joined into a transport string.
    #[error("failed to serialize backing directories into a transport string")]
    TransportJoin(#[from] TransportJoinError),
}

/// An error that occurred while parsing a transport string back into backing
/// directories.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportParseError {
    /// The transport string was empty.
    #[error("transport string is empty")]
    Empty,

    /// The transport string had the wrong number of elements.
    #[error(
        "transport string has {actual} directories, expected {expected} \
         ({counters} counters plus one list)"
    )]
    WrongCount {
        /// The number of directories expected.
        expected: usize,

        /// The number of counters the registry is configured with.
        counters: usize,

        /// The number of directories found.
        actual: usize,
    },

    /// An element of the transport string was not valid UTF-8.
    #[error("transport string element {index} is not valid UTF-8: {}", .path.to_string_lossy())]
    NonUtf8 {
        /// The position of the element.
        index: usize,

        /// The element as read.
        path: OsString,
    },

    /// An element of the transport string was not an absolute path.
    #[error("transport string element {index} (`{path}`) is not an absolute path")]
    NotAbsolute {
        /// The position of the element.
        index: usize,

        /// The element as read.
        path: Utf8PathBuf,
    },
}

/// An error that occurred while joining backing directories into a transport
/// string.
#[derive(Debug, Error)]
#[error("backing directory `{dir}` cannot be placed into a transport string")]
pub struct TransportJoinError {
    dir: Utf8PathBuf,
    #[source]
    error: std::env::JoinPathsError,
}

impl TransportJoinError {
    pub(crate) fn new(dir: Utf8PathBuf, error: std::env::JoinPathsError) -> Self {
        Self { dir, error }
    }

    /// Returns the directory that could not be joined.
    pub fn dir(&self) -> &Utf8PathBuf {
        &self.dir
    }
}

/// Displays an error along with its chain of sources, one per line.
#[derive(Clone, Copy, Debug)]
pub struct DisplayErrorChain<E>(E);

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, "\n  caused by: {error}")?;
            source = error.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_error_chain_includes_sources() {
        let error = StoreError::Read {
            path: "/tmp/tally-missing".into(),
            error: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "error reading `/tmp/tally-missing`\n  caused by: denied",
        );
    }

    #[test]
    fn unknown_counter_lists_known_names() {
        let error = StoreError::UnknownCounter {
            name: "flaky".to_owned(),
            known: vec!["errors".to_owned(), "passes".to_owned()],
        };
        assert_eq!(
            error.to_string(),
            "unknown counter `flaky` (known counters: errors, passes)",
        );
    }
}
