// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport strings: the serialized form of a registry's backing directories.
//!
//! A transport string is the list of backing directories joined with the platform's path-list
//! separator (`:` on Unix, `;` on Windows), the same way `PATH` is. Joining rejects any directory
//! that can't be represented in such a list (on Unix, one containing `:`), so a transport string
//! always splits back into exactly the directories it was built from.

use crate::errors::{TransportJoinError, TransportParseError};
use camino::{Utf8Path, Utf8PathBuf};
use std::{env, ffi::OsString, fmt};

/// The environment variable used to pass a transport string to worker processes.
pub const TRANSPORT_ENV: &str = "TALLY_STORE_DIRS";

/// The serialized set of backing directories for a registry.
///
/// Produced by [`AggregationRegistry::serialize`](crate::AggregationRegistry::serialize) and
/// consumed by [`AggregationRegistry::attach`](crate::AggregationRegistry::attach).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransportString(String);

impl TransportString {
    /// Wraps a transport string read from the environment or a command line.
    ///
    /// No validation is done until the string is parsed.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Converts a transport string read as an OS string, e.g. from the environment.
    ///
    /// Fails with [`TransportParseError::NonUtf8`], naming the first offending element, if `value`
    /// is not valid UTF-8.
    pub fn from_os_string(value: OsString) -> Result<Self, TransportParseError> {
        match value.into_string() {
            Ok(value) => Ok(Self(value)),
            Err(value) => {
                let (index, path) = env::split_paths(&value)
                    .enumerate()
                    .find(|(_, path)| path.to_str().is_none())
                    .map_or((0, value.clone()), |(index, path)| {
                        (index, path.into_os_string())
                    });
                Err(TransportParseError::NonUtf8 { index, path })
            }
        }
    }

    /// Reads the transport string inherited through [`TRANSPORT_ENV`].
    ///
    /// Returns `Ok(None)` if the variable is unset, which means this process is the root. A value
    /// that is set but not valid UTF-8 is an error, never a reason to become the root.
    pub fn from_env() -> Result<Option<Self>, TransportParseError> {
        env::var_os(TRANSPORT_ENV)
            .map(Self::from_os_string)
            .transpose()
    }

    /// Joins `dirs`, in order, into a transport string.
    pub fn join<'a>(
        dirs: impl IntoIterator<Item = &'a Utf8Path>,
    ) -> Result<Self, TransportJoinError> {
        let dirs: Vec<&Utf8Path> = dirs.into_iter().collect();
        // Check directories one at a time so the error can name the offending one.
        for dir in &dirs {
            if let Err(error) = env::join_paths([dir.as_std_path()]) {
                return Err(TransportJoinError::new((*dir).to_owned(), error));
            }
        }

        let joined = env::join_paths(dirs.iter().map(|dir| dir.as_std_path()))
            .map_err(|error| TransportJoinError::new(Utf8PathBuf::new(), error))?;
        // Every input was UTF-8 and the separator is ASCII.
        Ok(Self(joined.to_string_lossy().into_owned()))
    }

    /// Splits the transport string into its directories, checking that there are exactly
    /// `counters + 1` of them and that each is an absolute path.
    pub fn split(&self, counters: usize) -> Result<Vec<Utf8PathBuf>, TransportParseError> {
        if self.0.is_empty() {
            return Err(TransportParseError::Empty);
        }

        let paths: Vec<_> = env::split_paths(&self.0).collect();
        let expected = counters + 1;
        if paths.len() != expected {
            return Err(TransportParseError::WrongCount {
                expected,
                counters,
                actual: paths.len(),
            });
        }

        paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| {
                let path =
                    Utf8PathBuf::from_path_buf(path).map_err(|path| TransportParseError::NonUtf8 {
                        index,
                        path: path.into_os_string(),
                    })?;
                if path.is_absolute() {
                    Ok(path)
                } else {
                    Err(TransportParseError::NotAbsolute { index, path })
                }
            })
            .collect()
    }

    /// Returns the transport string as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TransportString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[cfg(unix)]
    const SEP: &str = ":";
    #[cfg(windows)]
    const SEP: &str = ";";

    #[cfg(unix)]
    fn abs(name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("/tmp/{name}"))
    }

    #[cfg(windows)]
    fn abs(name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("C:\\Temp\\{name}"))
    }

    #[test]
    fn join_then_split() {
        let dirs = vec![abs("a"), abs("b b"), abs("c,d")];
        let transport = TransportString::join(dirs.iter().map(|dir| dir.as_path())).unwrap();
        assert_eq!(
            transport.as_str(),
            format!("{}{SEP}{}{SEP}{}", dirs[0], dirs[1], dirs[2]),
        );
        assert_eq!(transport.split(2).unwrap(), dirs);
    }

    #[cfg(unix)]
    #[test]
    fn separator_in_dir_is_rejected() {
        let bad = Utf8PathBuf::from(format!("{}{SEP}oops", abs("x")));
        let good = abs("y");
        let error =
            TransportString::join([good.as_path(), bad.as_path()]).expect_err("join should fail");
        assert_eq!(error.dir(), &bad);
    }

    #[test_case(0, 1, 3 ; "too many")]
    #[test_case(4, 5, 3 ; "too few")]
    fn wrong_count(counters: usize, expected: usize, actual: usize) {
        let transport = TransportString::join(
            [abs("a"), abs("b"), abs("c")]
                .iter()
                .map(|dir| dir.as_path()),
        )
        .unwrap();
        assert_eq!(
            transport.split(counters),
            Err(TransportParseError::WrongCount {
                expected,
                counters,
                actual,
            }),
        );
    }

    #[test]
    fn empty_is_rejected() {
        assert_eq!(
            TransportString::new("").split(0),
            Err(TransportParseError::Empty)
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_os_string_is_rejected() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let value = OsStr::from_bytes(b"/tmp/a:/tmp/\xff:/tmp/b").to_owned();
        assert_eq!(
            TransportString::from_os_string(value),
            Err(TransportParseError::NonUtf8 {
                index: 1,
                path: OsStr::from_bytes(b"/tmp/\xff").to_owned(),
            }),
        );

        let value = OsString::from("/tmp/a:/tmp/b");
        assert_eq!(
            TransportString::from_os_string(value).unwrap().split(1).unwrap(),
            vec![abs("a"), abs("b")],
        );
    }

    #[test]
    fn relative_path_is_rejected() {
        let transport = TransportString::new(format!("{}{SEP}relative", abs("a")));
        assert_eq!(
            transport.split(1),
            Err(TransportParseError::NotAbsolute {
                index: 1,
                path: "relative".into(),
            }),
        );
    }
}
