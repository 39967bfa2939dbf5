// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An append-only list that any number of processes can append to.

use crate::{
    contribution::{BackingDir, ContributionIter, Ownership, default_parent, write_contribution},
    errors::StoreError,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Serialize, de::DeserializeOwned};
use std::{fmt, marker::PhantomData};

/// An append-only, ordered collection backed by a directory of item files.
///
/// Items appended by a single writer are always read back in the order they were appended. Items
/// from different writers are interleaved in approximate creation order, which depends on the
/// writers' clocks.
pub struct DiskList<T> {
    backing: BackingDir,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> DiskList<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Binds to `existing` if provided (without owning it), or creates a new owned directory under
    /// the system temporary directory.
    pub fn new(existing: Option<Utf8PathBuf>) -> Result<Self, StoreError> {
        match existing {
            Some(dir) => Ok(Self::attach(dir)),
            None => Self::create_in(&default_parent()?),
        }
    }

    /// Creates a new list with an owned backing directory under `parent`.
    pub fn create_in(parent: &Utf8Path) -> Result<Self, StoreError> {
        Ok(Self::from_backing(BackingDir::create_in(parent)?))
    }

    /// Binds to a backing directory created by another handle, possibly in another process.
    pub fn attach(dir: impl Into<Utf8PathBuf>) -> Self {
        Self::from_backing(BackingDir::attach(dir.into()))
    }

    fn from_backing(backing: BackingDir) -> Self {
        Self {
            backing,
            _marker: PhantomData,
        }
    }

    /// Appends `item` to the list.
    pub fn append(&self, item: &T) -> Result<(), StoreError> {
        write_contribution(self.backing.path(), item)?;
        Ok(())
    }

    /// Returns a lazy iterator over the items currently in the list.
    ///
    /// Each call lists the directory afresh, so iterators are independent of each other. Items
    /// appended after this call returns may not be observed by the iterator.
    pub fn iter(&self) -> Result<ContributionIter<T>, StoreError> {
        ContributionIter::new(self.backing.path())
    }

    /// Reads every item currently in the list into memory.
    pub fn to_vec(&self) -> Result<Vec<T>, StoreError> {
        self.iter()?.collect()
    }
}

impl<T> DiskList<T> {
    /// Returns the backing directory.
    pub fn dir(&self) -> &Utf8Path {
        self.backing.path()
    }

    /// Returns whether this handle owns its backing directory.
    pub fn ownership(&self) -> Ownership {
        self.backing.ownership()
    }

    /// Removes the backing directory if this handle owns it; otherwise does nothing.
    ///
    /// Safe to call more than once.
    pub fn dispose(&self) -> Result<(), StoreError> {
        self.backing.dispose()
    }
}

impl<T> fmt::Debug for DiskList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskList")
            .field("backing", &self.backing)
            .finish()
    }
}
