// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contribution files and the backing directories that hold them.
//!
//! Every write to a counter or list creates exactly one new file in the backing directory, named
//! so that no two writers (in this process or any other) can collide. Nothing in this module ever
//! rewrites or deletes an individual contribution file: the only destructive operation is
//! [`BackingDir::dispose`], which removes the whole directory.
//!
//! File names have the form `<nanos>-<uuid>.json`:
//!
//! * `<nanos>` is a zero-padded wall-clock timestamp, clamped to be strictly increasing within a
//!   process. Sorting names therefore preserves each writer's own order, and roughly preserves
//!   creation order across writers.
//! * `<uuid>` is a random v4 UUID, so that two processes writing at the same nanosecond still pick
//!   different names.

use crate::errors::StoreError;
use atomicwrites::{AtomicFile, DisallowOverwrite};
use camino::{Utf8Path, Utf8PathBuf};
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fmt, fs,
    io::{self, Write},
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
    vec,
};
use tracing::debug;

/// The suffix of every contribution file.
///
/// Entries without this suffix (e.g. the temporary files `atomicwrites` stages before renaming them
/// into place) are ignored by readers.
pub const CONTRIBUTION_SUFFIX: &str = ".json";

/// The prefix of every backing directory created by this crate.
pub const BACKING_DIR_PREFIX: &str = "tally-";

/// The kind for [`ContributionUuid`].
pub enum ContributionKind {}

impl TypedUuidKind for ContributionKind {
    #[inline]
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("contribution");
        TAG
    }
}

/// A unique identifier for a single contribution file.
pub type ContributionUuid = TypedUuid<ContributionKind>;

/// The kind for [`BackingDirUuid`].
pub enum BackingDirKind {}

impl TypedUuidKind for BackingDirKind {
    #[inline]
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("backing_dir");
        TAG
    }
}

/// A unique identifier for a backing directory.
pub type BackingDirUuid = TypedUuid<BackingDirKind>;

/// The last timestamp handed out by [`next_stamp`] in this process.
static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Returns a timestamp in nanoseconds that is strictly greater than any previously returned by
/// this process.
fn next_stamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
        });
    // The closure always returns Some, so both arms carry the previous value.
    let prev = LAST_STAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
            Some(now.max(prev.saturating_add(1)))
        })
        .unwrap_or_else(|prev| prev);
    now.max(prev.saturating_add(1))
}

fn contribution_file_name() -> String {
    format!(
        "{:020}-{}{CONTRIBUTION_SUFFIX}",
        next_stamp(),
        ContributionUuid::new_v4(),
    )
}

/// Serializes `value` and writes it to a new, uniquely named contribution file in `dir`.
///
/// The file is staged and then moved into place, so readers never observe a partially written
/// contribution. Returns the path of the new file.
///
/// Fails with [`StoreError::NotFound`] if `dir` doesn't exist.
pub fn write_contribution<T>(dir: &Utf8Path, value: &T) -> Result<Utf8PathBuf, StoreError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(value).map_err(|error| StoreError::Serialize { error })?;

    // Check up front so that a missing directory isn't reported as a failure to stage the file.
    if !dir.is_dir() {
        return Err(StoreError::NotFound {
            dir: dir.to_owned(),
        });
    }

    let path = dir.join(contribution_file_name());
    AtomicFile::new(&path, DisallowOverwrite)
        .write(|file| file.write_all(&bytes))
        .map_err(|error| {
            let error = match error {
                atomicwrites::Error::Internal(error) | atomicwrites::Error::User(error) => error,
            };
            if error.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound {
                    dir: dir.to_owned(),
                }
            } else {
                StoreError::Write {
                    path: path.clone(),
                    error,
                }
            }
        })?;

    Ok(path)
}

/// Lists the contribution files in `dir`, in sorted-name order.
///
/// Fails with [`StoreError::NotFound`] if `dir` doesn't exist.
pub fn list_contributions(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StoreError> {
    let read_dir = dir.read_dir_utf8().map_err(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound {
                dir: dir.to_owned(),
            }
        } else {
            StoreError::Read {
                path: dir.to_owned(),
                error,
            }
        }
    })?;

    let mut paths = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|error| StoreError::Read {
            path: dir.to_owned(),
            error,
        })?;
        let file_name = entry.file_name();
        if file_name.starts_with('.') || !file_name.ends_with(CONTRIBUTION_SUFFIX) {
            continue;
        }
        let file_type = entry.file_type().map_err(|error| StoreError::Read {
            path: entry.path().to_owned(),
            error,
        })?;
        if file_type.is_file() {
            paths.push(entry.into_path());
        }
    }
    paths.sort_unstable();

    Ok(paths)
}

/// Reads and deserializes every contribution file in `dir`, in sorted-name order.
///
/// A file that fails to deserialize fails the whole read with [`StoreError::CorruptData`]: skipping
/// it would silently produce a wrong aggregate.
pub fn read_contributions<T: DeserializeOwned>(dir: &Utf8Path) -> Result<Vec<T>, StoreError> {
    ContributionIter::new(dir)?.collect()
}

/// A lazy iterator over the contribution files of a directory.
///
/// The directory is listed once, when the iterator is created; each file is read and deserialized
/// as the iterator advances. Files added after the listing are not observed.
pub struct ContributionIter<T> {
    dir: Utf8PathBuf,
    paths: vec::IntoIter<Utf8PathBuf>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ContributionIter<T> {
    /// Lists `dir` and returns an iterator over its contributions.
    pub fn new(dir: &Utf8Path) -> Result<Self, StoreError> {
        let paths = list_contributions(dir)?;
        Ok(Self {
            dir: dir.to_owned(),
            paths: paths.into_iter(),
            _marker: PhantomData,
        })
    }

    fn read_one(&self, path: Utf8PathBuf) -> Result<T, StoreError> {
        let bytes = fs::read(&path).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                // Contribution files are never removed individually, so the directory went away.
                StoreError::NotFound {
                    dir: self.dir.clone(),
                }
            } else {
                StoreError::Read {
                    path: path.clone(),
                    error,
                }
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|error| StoreError::CorruptData { path, error })
    }
}

impl<T: DeserializeOwned> Iterator for ContributionIter<T> {
    type Item = Result<T, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        Some(self.read_one(path))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}

impl<T> fmt::Debug for ContributionIter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContributionIter")
            .field("dir", &self.dir)
            .field("remaining", &self.paths.len())
            .finish()
    }
}

/// Whether a handle is responsible for removing its backing directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The handle created the directory and removes it on dispose.
    Owned,

    /// The handle was bound to a directory created elsewhere. Disposing it does nothing.
    Attached,
}

/// A backing directory, along with whether this handle owns it.
#[derive(Debug)]
pub(crate) struct BackingDir {
    dir: Utf8PathBuf,
    ownership: Ownership,
}

impl BackingDir {
    /// Creates a fresh, uniquely named directory under `parent` and takes ownership of it.
    pub(crate) fn create_in(parent: &Utf8Path) -> Result<Self, StoreError> {
        let dir = parent.join(format!("{BACKING_DIR_PREFIX}{}", BackingDirUuid::new_v4()));
        fs::create_dir_all(&dir).map_err(|error| StoreError::DirCreate {
            dir: dir.clone(),
            error,
        })?;
        // Transport strings only carry absolute paths.
        let dir = dir
            .canonicalize_utf8()
            .map_err(|error| StoreError::DirCreate {
                dir: dir.clone(),
                error,
            })?;

        debug!("created backing directory `{dir}`");
        Ok(Self {
            dir,
            ownership: Ownership::Owned,
        })
    }

    /// Binds to an existing directory without taking ownership of it.
    ///
    /// The directory isn't checked for existence here: that surfaces on the first read or write.
    pub(crate) fn attach(dir: Utf8PathBuf) -> Self {
        debug!("attached to backing directory `{dir}`");
        Self {
            dir,
            ownership: Ownership::Attached,
        }
    }

    /// Binds to `existing` if provided, otherwise creates a fresh directory under `parent`.
    pub(crate) fn new(existing: Option<Utf8PathBuf>, parent: &Utf8Path) -> Result<Self, StoreError> {
        match existing {
            Some(dir) => Ok(Self::attach(dir)),
            None => Self::create_in(parent),
        }
    }

    #[inline]
    pub(crate) fn path(&self) -> &Utf8Path {
        &self.dir
    }

    #[inline]
    pub(crate) fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Removes the directory and everything in it, if this handle owns it.
    ///
    /// A directory that is already partly or entirely gone is not an error.
    pub(crate) fn dispose(&self) -> Result<(), StoreError> {
        if self.ownership == Ownership::Attached {
            return Ok(());
        }

        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                debug!("removed backing directory `{}`", self.dir);
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::Remove {
                dir: self.dir.clone(),
                error,
            }),
        }
    }
}

/// Returns the default parent for newly created backing directories.
pub(crate) fn default_parent() -> Result<Utf8PathBuf, StoreError> {
    let temp_dir = std::env::temp_dir();
    Utf8PathBuf::from_path_buf(temp_dir).map_err(|path| StoreError::DirCreate {
        dir: Utf8PathBuf::from(path.to_string_lossy().into_owned()),
        error: io::Error::new(
            io::ErrorKind::InvalidInput,
            "system temporary directory is not valid UTF-8",
        ),
    })
}
