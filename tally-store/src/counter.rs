// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An integer counter that any number of processes can add to.

use crate::{
    contribution::{BackingDir, ContributionIter, Ownership, default_parent, write_contribution},
    errors::StoreError,
};
use camino::{Utf8Path, Utf8PathBuf};

/// An integer accumulator backed by a directory of delta files.
///
/// [`add`](Self::add) writes a new file holding the delta, and [`value`](Self::value) sums every
/// delta present at the time of the call. There is no cached total, so a read always reflects the
/// directory as it is on disk.
///
/// Adds are not idempotent: retrying an add whose outcome is unknown may count the delta twice.
#[derive(Debug)]
pub struct DiskCounter {
    backing: BackingDir,
}

impl DiskCounter {
    /// Binds to `existing` if provided (without owning it), or creates a new owned directory under
    /// the system temporary directory.
    pub fn new(existing: Option<Utf8PathBuf>) -> Result<Self, StoreError> {
        match existing {
            Some(dir) => Ok(Self::attach(dir)),
            None => Self::create_in(&default_parent()?),
        }
    }

    /// Creates a new counter with an owned backing directory under `parent`.
    pub fn create_in(parent: &Utf8Path) -> Result<Self, StoreError> {
        Ok(Self {
            backing: BackingDir::create_in(parent)?,
        })
    }

    /// Binds to a backing directory created by another handle, possibly in another process.
    pub fn attach(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            backing: BackingDir::attach(dir.into()),
        }
    }

    /// Adds `delta` to the counter. Negative deltas are allowed.
    pub fn add(&self, delta: i64) -> Result<(), StoreError> {
        write_contribution(self.backing.path(), &delta)?;
        Ok(())
    }

    /// Returns the sum of every delta currently on disk.
    ///
    /// Returns 0 for a counter nobody has added to, and [`StoreError::NotFound`] if the backing
    /// directory is gone. A sum that doesn't fit in an `i64` fails with [`StoreError::Overflow`];
    /// deltas are summed exactly, so only the final value is range-checked.
    pub fn value(&self) -> Result<i64, StoreError> {
        let sum = ContributionIter::<i64>::new(self.backing.path())?
            .try_fold(0i128, |total, delta| Ok::<_, StoreError>(total + i128::from(delta?)))?;
        i64::try_from(sum).map_err(|_| StoreError::Overflow {
            dir: self.backing.path().to_owned(),
            sum,
        })
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use proptest::{collection::vec, prelude::*};
    use std::{fs, thread};
    use test_case::test_case;
    use test_strategy::proptest;

    #[test]
    fn empty_counter_is_zero() {
        let parent = Utf8TempDir::new().unwrap();
        let counter = DiskCounter::create_in(parent.path()).unwrap();
        assert_eq!(counter.value().unwrap(), 0);
        assert_eq!(counter.ownership(), Ownership::Owned);
    }

    #[test_case(&[1, 1, 1], 3 ; "all positive")]
    #[test_case(&[5, -2, -10], -7 ; "negative deltas")]
    #[test_case(&[0, 0], 0 ; "zeroes")]
    #[test_case(&[i64::MAX / 2, i64::MAX / 2], i64::MAX - 1 ; "large values")]
    fn value_sums_deltas(deltas: &[i64], expected: i64) {
        let parent = Utf8TempDir::new().unwrap();
        let counter = DiskCounter::create_in(parent.path()).unwrap();
        for delta in deltas {
            counter.add(*delta).unwrap();
        }
        assert_eq!(counter.value().unwrap(), expected);
    }

    #[proptest(cases = 32)]
    fn value_equals_sum(#[strategy(vec(-1000i64..1000, 0..40))] deltas: Vec<i64>) {
        let parent = Utf8TempDir::new().unwrap();
        let counter = DiskCounter::create_in(parent.path()).unwrap();
        for delta in &deltas {
            counter.add(*delta).unwrap();
        }
        prop_assert_eq!(counter.value().unwrap(), deltas.iter().sum::<i64>());
    }

    #[test]
    fn attached_handles_see_each_other() {
        let parent = Utf8TempDir::new().unwrap();
        let owner = DiskCounter::create_in(parent.path()).unwrap();
        let attached = DiskCounter::new(Some(owner.dir().to_owned())).unwrap();
        assert_eq!(attached.ownership(), Ownership::Attached);

        owner.add(2).unwrap();
        attached.add(3).unwrap();
        assert_eq!(owner.value().unwrap(), 5);
        assert_eq!(attached.value().unwrap(), 5);

        attached.dispose().unwrap();
        assert_eq!(owner.value().unwrap(), 5, "attached dispose leaves data");
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let parent = Utf8TempDir::new().unwrap();
        let owner = DiskCounter::create_in(parent.path()).unwrap();
        let dir = owner.dir().to_owned();

        thread::scope(|scope| {
            for _ in 0..8 {
                let dir = dir.clone();
                scope.spawn(move || {
                    let counter = DiskCounter::attach(dir);
                    for _ in 0..25 {
                        counter.add(1).unwrap();
                    }
                });
            }
        });

        assert_eq!(owner.value().unwrap(), 200);
    }

    #[test]
    fn non_integer_contribution_is_corrupt() {
        let parent = Utf8TempDir::new().unwrap();
        let counter = DiskCounter::create_in(parent.path()).unwrap();
        counter.add(1).unwrap();
        write_contribution(counter.dir(), "one").unwrap();

        let error = counter.value().unwrap_err();
        assert!(
            matches!(error, StoreError::CorruptData { .. }),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn overflow_fails_the_read() {
        let parent = Utf8TempDir::new().unwrap();
        let counter = DiskCounter::create_in(parent.path()).unwrap();
        counter.add(i64::MAX).unwrap();
        counter.add(1).unwrap();

        let error = counter.value().unwrap_err();
        assert!(
            matches!(
                &error,
                StoreError::Overflow { dir, sum }
                    if dir == counter.dir() && *sum == i128::from(i64::MAX) + 1
            ),
            "unexpected error: {error:?}"
        );

        // Only the final sum is range-checked.
        counter.add(-1).unwrap();
        assert_eq!(counter.value().unwrap(), i64::MAX);
    }

    #[test]
    fn deleted_directory_is_not_found() {
        let parent = Utf8TempDir::new().unwrap();
        let owner = DiskCounter::create_in(parent.path()).unwrap();
        let attached = DiskCounter::attach(owner.dir());
        owner.add(4).unwrap();

        fs::remove_dir_all(owner.dir()).unwrap();
        let error = attached.value().unwrap_err();
        assert!(
            matches!(&error, StoreError::NotFound { dir } if dir == owner.dir()),
            "unexpected error: {error:?}"
        );
        assert!(matches!(attached.add(1), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn dispose_twice_succeeds() {
        let parent = Utf8TempDir::new().unwrap();
        let counter = DiskCounter::create_in(parent.path()).unwrap();
        counter.add(1).unwrap();

        counter.dispose().unwrap();
        counter.dispose().unwrap();
        assert!(!counter.dir().exists());
    }
}
