// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A fixed set of named counters plus one record list, shared by a root process and its workers.
//!
//! The flow is:
//!
//! 1. The root process calls [`AggregationRegistry::create_root`], which creates one backing
//!    directory per counter plus one for the list.
//! 2. The root serializes the registry with [`AggregationRegistry::serialize`] and passes the
//!    result to each worker it spawns, typically through the [`TRANSPORT_ENV`] environment
//!    variable (see [`AggregationRegistry::worker_env`]).
//! 3. Each worker calls [`AggregationRegistry::attach`] with that string and the same counter
//!    names, then adds to counters and appends records.
//! 4. Once every worker has exited, one process calls [`AggregationRegistry::finalize`] to read
//!    the totals and records, and the root calls [`AggregationRegistry::teardown`].
//!
//! Nothing here detects whether workers are done: that is up to whatever supervises them.

use crate::{
    contribution::default_parent,
    counter::DiskCounter,
    errors::{DisplayErrorChain, StoreError, TransportJoinError, TransportParseError},
    list::DiskList,
    transport::{TRANSPORT_ENV, TransportString},
};
use camino::Utf8Path;
use indexmap::IndexMap;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use tracing::{debug, warn};

/// Whether a registry created its directories or was bound to existing ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryMode {
    /// The registry created its backing directories and is responsible for removing them.
    Root,

    /// The registry was reconstructed from a transport string. It never removes anything.
    Attached,
}

/// A fixed set of named [`DiskCounter`]s plus one [`DiskList`] of records of type `R`.
///
/// A root registry must be released with [`teardown`](Self::teardown): dropping one only logs a
/// warning and leaves its directories behind.
#[must_use = "root registries must be torn down explicitly"]
pub struct AggregationRegistry<R> {
    mode: RegistryMode,
    counters: IndexMap<String, DiskCounter>,
    list: DiskList<R>,
    torn_down: bool,
}

impl<R> AggregationRegistry<R>
where
    R: Serialize + DeserializeOwned,
{
    /// Creates a root registry with one counter per name, plus the record list, under the system
    /// temporary directory.
    pub fn create_root<I, S>(names: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::create_root_in(&default_parent()?, names)
    }

    /// Creates a root registry whose backing directories live under `parent`.
    pub fn create_root_in<I, S>(parent: &Utf8Path, names: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = collect_names(names)?;

        let mut counters = IndexMap::with_capacity(names.len());
        let list = match Self::create_dirs(parent, names, &mut counters) {
            Ok(list) => list,
            Err(error) => {
                // Release whatever was created before the failure.
                for counter in counters.values() {
                    if let Err(dispose_error) = counter.dispose() {
                        warn!(
                            "failed to clean up after registry creation error: {}",
                            DisplayErrorChain::new(&dispose_error),
                        );
                    }
                }
                return Err(error);
            }
        };

        debug!(
            "created root registry with counters [{}] under `{parent}`",
            counters.keys().map(String::as_str).collect::<Vec<_>>().join(", "),
        );
        Ok(Self {
            mode: RegistryMode::Root,
            counters,
            list,
            torn_down: false,
        })
    }

    fn create_dirs(
        parent: &Utf8Path,
        names: Vec<String>,
        counters: &mut IndexMap<String, DiskCounter>,
    ) -> Result<DiskList<R>, StoreError> {
        for name in names {
            counters.insert(name, DiskCounter::create_in(parent)?);
        }
        DiskList::create_in(parent)
    }

    /// Reconstructs a registry from a transport string produced by
    /// [`serialize`](Self::serialize) in another process.
    ///
    /// `names` must be the same names, in the same order, that the root registry was created
    /// with. The result never removes any directories.
    pub fn attach<I, S>(transport: &TransportString, names: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = collect_names(names)?;
        let mut dirs = transport.split(names.len())?;
        let list_dir = dirs.pop().ok_or(TransportParseError::Empty)?;
        let list = DiskList::attach(list_dir);
        let counters = names
            .into_iter()
            .zip(dirs)
            .map(|(name, dir)| (name, DiskCounter::attach(dir)))
            .collect();

        Ok(Self {
            mode: RegistryMode::Attached,
            counters,
            list,
            torn_down: false,
        })
    }

    /// Attaches to `transport` if one was inherited, otherwise creates a root registry under
    /// `parent`.
    ///
    /// This is the decision every process makes at startup: the process that finds no transport
    /// string becomes the root.
    pub fn root_or_attach<I, S>(
        transport: Option<&TransportString>,
        parent: &Utf8Path,
        names: I,
    ) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match transport {
            Some(transport) => Self::attach(transport, names),
            None => Self::create_root_in(parent, names),
        }
    }

    /// Adds `delta` to the counter called `name`.
    pub fn add(&self, name: &str, delta: i64) -> Result<(), StoreError> {
        self.counter(name)?.add(delta)
    }

    /// Appends `record` to the record list.
    pub fn append(&self, record: &R) -> Result<(), StoreError> {
        self.list.append(record)
    }

    /// Reads every counter's total and every record.
    ///
    /// This should be called once, after every worker has stopped writing. Reads that overlap
    /// with writes may or may not observe them. Fails if any counter, or the sum of all of them,
    /// overflows an `i64`.
    pub fn finalize(&self) -> Result<FinalTally<R>, StoreError> {
        let totals = self
            .counters
            .iter()
            .map(|(name, counter)| counter.value().map(|total| (name.clone(), total)))
            .collect::<Result<IndexMap<_, _>, StoreError>>()?;
        let records = self.list.to_vec()?;
        let tally = FinalTally { totals, records };
        tally.total()?;

        debug!(
            "finalized registry: {} counters, {} records",
            tally.totals.len(),
            tally.records.len(),
        );
        Ok(tally)
    }
}

impl<R> AggregationRegistry<R> {
    /// Returns whether this registry is the root or attached.
    pub fn mode(&self) -> RegistryMode {
        self.mode
    }

    /// Returns the counter names, in order.
    pub fn names(&self) -> impl ExactSizeIterator<Item = &str> {
        self.counters.keys().map(String::as_str)
    }

    /// Returns the counter called `name`.
    pub fn counter(&self, name: &str) -> Result<&DiskCounter, StoreError> {
        self.counters
            .get(name)
            .ok_or_else(|| StoreError::UnknownCounter {
                name: name.to_owned(),
                known: self.counters.keys().cloned().collect(),
            })
    }

    /// Returns the record list.
    pub fn list(&self) -> &DiskList<R> {
        &self.list
    }

    /// Serializes the backing directories of every counter, in order, followed by the list's.
    pub fn serialize(&self) -> Result<TransportString, TransportJoinError> {
        TransportString::join(
            self.counters
                .values()
                .map(DiskCounter::dir)
                .chain(std::iter::once(self.list.dir())),
        )
    }

    /// Returns the environment variable name and value that let a spawned worker attach to this
    /// registry.
    pub fn worker_env(&self) -> Result<(&'static str, TransportString), TransportJoinError> {
        Ok((TRANSPORT_ENV, self.serialize()?))
    }

    /// Removes every backing directory, if this is the root registry.
    ///
    /// Must only be called once every worker has stopped writing. Every directory is attempted
    /// even if an earlier one fails; the first error is returned.
    pub fn teardown(mut self) -> Result<(), StoreError> {
        self.torn_down = true;
        if self.mode == RegistryMode::Attached {
            debug!("attached registry released without removing directories");
            return Ok(());
        }

        let mut first_error = None;
        let results = self
            .counters
            .values()
            .map(|counter| counter.dispose())
            .chain(std::iter::once_with(|| self.list.dispose()));
        for result in results {
            if let Err(error) = result {
                warn!("teardown error: {}", DisplayErrorChain::new(&error));
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => {
                debug!("root registry torn down");
                Ok(())
            }
        }
    }
}

impl<R> Drop for AggregationRegistry<R> {
    fn drop(&mut self) {
        if self.mode == RegistryMode::Root && !self.torn_down {
            warn!(
                "root registry dropped without teardown, leaving backing directories behind \
                 (list: `{}`)",
                self.list.dir(),
            );
        }
    }
}

impl<R> fmt::Debug for AggregationRegistry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationRegistry")
            .field("mode", &self.mode)
            .field("counters", &self.counters)
            .field("list", &self.list)
            .finish()
    }
}

/// The totals and records read out of a registry by
/// [`AggregationRegistry::finalize`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalTally<R> {
    /// The total of each counter, in registry order.
    pub totals: IndexMap<String, i64>,

    /// Every record, in creation order.
    pub records: Vec<R>,
}

impl<R> FinalTally<R> {
    /// Returns the total for the counter called `name`, if the registry had one.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.totals.get(name).copied()
    }

    /// Returns the sum of every counter.
    ///
    /// Fails with [`StoreError::TotalOverflow`] if the sum doesn't fit in an `i64`.
    pub fn total(&self) -> Result<i64, StoreError> {
        let sum: i128 = self.totals.values().copied().map(i128::from).sum();
        i64::try_from(sum).map_err(|_| StoreError::TotalOverflow { sum })
    }
}

fn collect_names<I, S>(names: I) -> Result<Vec<String>, StoreError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = Vec::new();
    for name in names {
        let name = name.into();
        if seen.contains(&name) {
            return Err(StoreError::DuplicateCounter { name });
        }
        seen.push(name);
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contribution::Ownership;
    use camino_tempfile::Utf8TempDir;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use std::{collections::BTreeMap, thread};

    const STATS: [&str; 4] = ["errors", "failures", "passes", "skipped"];

    fn root(parent: &Utf8TempDir) -> AggregationRegistry<String> {
        AggregationRegistry::create_root_in(parent.path(), STATS).unwrap()
    }

    #[test]
    fn fresh_registry_is_empty() {
        let parent = Utf8TempDir::new().unwrap();
        let registry = root(&parent);
        assert_eq!(registry.mode(), RegistryMode::Root);
        assert_eq!(registry.names().collect::<Vec<_>>(), STATS);

        let tally = registry.finalize().unwrap();
        assert_eq!(tally.totals.values().copied().collect::<Vec<_>>(), [0; 4]);
        assert!(tally.records.is_empty());
        assert_eq!(tally.total().unwrap(), 0);

        registry.teardown().unwrap();
    }

    #[test]
    fn serialize_then_attach_reads_the_same_values() {
        let parent = Utf8TempDir::new().unwrap();
        let registry = root(&parent);
        registry.add("passes", 3).unwrap();
        registry.add("errors", 1).unwrap();
        registry.append(&"boom".to_owned()).unwrap();

        let transport = registry.serialize().unwrap();
        let attached = AggregationRegistry::<String>::attach(&transport, STATS).unwrap();
        assert_eq!(attached.mode(), RegistryMode::Attached);
        assert_eq!(attached.finalize().unwrap(), registry.finalize().unwrap());
        for name in STATS {
            assert_eq!(
                attached.counter(name).unwrap().dir(),
                registry.counter(name).unwrap().dir(),
            );
            assert_eq!(
                attached.counter(name).unwrap().ownership(),
                Ownership::Attached
            );
        }
        assert_eq!(attached.serialize().unwrap(), transport);

        attached.teardown().unwrap();
        assert_eq!(registry.finalize().unwrap().get("passes"), Some(3));
        registry.teardown().unwrap();
    }

    #[test]
    fn attach_with_wrong_names_fails() {
        let parent = Utf8TempDir::new().unwrap();
        let registry = root(&parent);
        let transport = registry.serialize().unwrap();

        let error = AggregationRegistry::<String>::attach(&transport, ["errors", "passes"])
            .expect_err("counter count mismatch");
        assert!(
            matches!(
                error,
                StoreError::TransportParse(TransportParseError::WrongCount {
                    expected: 3,
                    counters: 2,
                    actual: 5,
                })
            ),
            "unexpected error: {error:?}"
        );

        registry.teardown().unwrap();
    }

    #[test]
    fn unknown_and_duplicate_names() {
        let parent = Utf8TempDir::new().unwrap();
        let registry = root(&parent);
        assert!(matches!(
            registry.add("flaky", 1),
            Err(StoreError::UnknownCounter { .. })
        ));
        registry.teardown().unwrap();

        let error = AggregationRegistry::<String>::create_root_in(parent.path(), ["a", "b", "a"])
            .expect_err("duplicate name");
        assert!(matches!(error, StoreError::DuplicateCounter { name } if name == "a"));
    }

    #[test]
    fn root_or_attach_picks_mode() {
        let parent = Utf8TempDir::new().unwrap();
        let root_registry =
            AggregationRegistry::<String>::root_or_attach(None, parent.path(), STATS).unwrap();
        assert_eq!(root_registry.mode(), RegistryMode::Root);

        let (key, transport) = root_registry.worker_env().unwrap();
        assert_eq!(key, TRANSPORT_ENV);
        let worker =
            AggregationRegistry::<String>::root_or_attach(Some(&transport), parent.path(), STATS)
                .unwrap();
        assert_eq!(worker.mode(), RegistryMode::Attached);

        worker.teardown().unwrap();
        root_registry.teardown().unwrap();
    }

    #[test]
    fn workers_aggregate_into_root() {
        let parent = Utf8TempDir::new().unwrap();
        let registry = root(&parent);
        let transport = registry.serialize().unwrap();

        thread::scope(|scope| {
            for worker in 0..3 {
                let transport = &transport;
                scope.spawn(move || {
                    let attached = AggregationRegistry::<String>::attach(transport, STATS).unwrap();
                    for _ in 0..5 {
                        attached.add("passes", 1).unwrap();
                    }
                    if worker == 0 {
                        attached.append(&"failure in test X".to_owned()).unwrap();
                    }
                    attached.teardown().unwrap();
                });
            }
        });

        let tally = registry.finalize().unwrap();
        let totals: BTreeMap<&str, i64> = tally
            .totals
            .iter()
            .map(|(name, total)| (name.as_str(), *total))
            .collect();
        assert_eq!(
            totals,
            btreemap! {
                "errors" => 0,
                "failures" => 0,
                "passes" => 15,
                "skipped" => 0,
            }
        );
        assert_eq!(tally.records, vec!["failure in test X".to_owned()]);

        registry.teardown().unwrap();
    }

    #[test]
    fn overflowing_total_fails_finalize() {
        let parent = Utf8TempDir::new().unwrap();
        let registry = root(&parent);
        registry.add("passes", i64::MAX).unwrap();
        registry.add("failures", 1).unwrap();

        let error = registry.finalize().expect_err("total overflows");
        assert!(
            matches!(error, StoreError::TotalOverflow { sum } if sum == i128::from(i64::MAX) + 1),
            "unexpected error: {error:?}"
        );

        let tally = FinalTally::<String> {
            totals: [("a".to_owned(), i64::MIN), ("b".to_owned(), -1)]
                .into_iter()
                .collect(),
            records: Vec::new(),
        };
        assert!(matches!(
            tally.total(),
            Err(StoreError::TotalOverflow { .. })
        ));

        registry.teardown().unwrap();
    }

    #[test]
    fn teardown_removes_every_directory() {
        let parent = Utf8TempDir::new().unwrap();
        let registry = root(&parent);
        let mut dirs: Vec<_> = STATS
            .iter()
            .map(|name| registry.counter(name).unwrap().dir().to_owned())
            .collect();
        dirs.push(registry.list().dir().to_owned());
        // Simulate an earlier, partial cleanup.
        std::fs::remove_dir_all(&dirs[1]).unwrap();

        registry.teardown().unwrap();
        for dir in &dirs {
            assert!(!dir.exists(), "{dir} should be removed");
        }
    }
}
