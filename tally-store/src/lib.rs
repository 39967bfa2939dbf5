// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Disk-backed counters and lists that unrelated processes can update concurrently.
//!
//! Test runners that launch each worker as a brand new process (rather than forking) have no
//! shared memory or inherited synchronization object to aggregate results through. This crate
//! uses the filesystem instead: every update creates a new, uniquely named file in a shared
//! directory, and reads fold over whatever files are present. Since no file is ever rewritten,
//! there are no read-modify-write races and no locks.
//!
//! * [`DiskCounter`] is an integer that many processes can add to.
//! * [`DiskList`] is an append-only list of serializable items.
//! * [`AggregationRegistry`] bundles a fixed set of named counters with one list, and can be
//!   serialized into a [`TransportString`] that worker processes use to attach to the same
//!   directories.

mod contribution;
mod counter;
pub mod errors;
mod list;
mod registry;
mod transport;

pub use contribution::{
    BACKING_DIR_PREFIX, BackingDirKind, BackingDirUuid, CONTRIBUTION_SUFFIX, ContributionIter,
    ContributionKind, ContributionUuid, Ownership, list_contributions, read_contributions,
    write_contribution,
};
pub use counter::DiskCounter;
pub use list::DiskList;
pub use registry::{AggregationRegistry, FinalTally, RegistryMode};
pub use transport::{TRANSPORT_ENV, TransportString};
