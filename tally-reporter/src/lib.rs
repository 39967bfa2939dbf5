// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! JUnit reporting for test runs whose workers are separate processes.
//!
//! Worker processes record outcomes into a [`tally_store::AggregationRegistry`] through
//! [`XunitTally`], and the coordinating process turns the aggregate into a JUnit XML report once
//! every worker has exited.

pub mod config;
pub mod errors;
pub mod junit;
mod plugin;
mod record;

pub use plugin::{ReportSummary, XunitTally};
pub use record::{PASSES, RecordKind, STAT_NAMES, TestRecord};
