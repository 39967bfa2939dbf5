// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-process reporter lifecycle.
//!
//! Every process in a test run, the coordinating one and each worker alike, constructs an
//! [`XunitTally`] with [`XunitTally::configure`]. The process that finds no transport string in
//! its environment becomes the root and creates the shared store; every other process attaches to
//! it. Test outcomes are recorded with [`add_pass`](XunitTally::add_pass) and
//! [`add_record`](XunitTally::add_record), and the process that writes the report calls
//! [`report`](XunitTally::report) once all workers have exited.

use crate::{
    config::ReporterConfig,
    errors::ReporterError,
    junit::{build_report, write_report},
    record::{PASSES, RecordKind, STAT_NAMES, TestRecord},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use std::{io::Write, process::Command};
use tally_store::{
    AggregationRegistry, FinalTally, RegistryMode, TransportString, errors::StoreError,
};
use tracing::debug;

/// Aggregates test outcomes across processes and writes them out as a JUnit report.
#[derive(Debug)]
#[must_use = "call report() or finish() to release the shared store"]
pub struct XunitTally {
    config: ReporterConfig,
    registry: AggregationRegistry<TestRecord>,
}

impl XunitTally {
    /// Configures the reporter for this process.
    ///
    /// If `inherited` is `Some`, this process is a worker and attaches to the store described by
    /// it. Otherwise this process is the root and creates a new store.
    pub fn configure(
        config: ReporterConfig,
        inherited: Option<TransportString>,
    ) -> Result<Self, ReporterError> {
        let registry = match (&inherited, config.store_parent()) {
            (Some(transport), _) => AggregationRegistry::attach(transport, STAT_NAMES)?,
            (None, Some(parent)) => AggregationRegistry::create_root_in(parent, STAT_NAMES)?,
            (None, None) => AggregationRegistry::create_root(STAT_NAMES)?,
        };
        debug!("configured xunit tally in {:?} mode", registry.mode());

        Ok(Self { config, registry })
    }

    /// Configures the reporter, reading any inherited transport string from this process's
    /// environment.
    ///
    /// An inherited transport string that isn't valid UTF-8 is an error: the process must not
    /// fall back to becoming a root whose results nobody reads.
    pub fn configure_from_env(config: ReporterConfig) -> Result<Self, ReporterError> {
        let inherited = TransportString::from_env().map_err(StoreError::from)?;
        Self::configure(config, inherited)
    }

    /// Loads the configuration from `config_file` and `TALLY_*` variables, then configures the
    /// reporter from this process's environment.
    pub fn from_process_env(config_file: Option<&Utf8Path>) -> Result<Self, ReporterError> {
        let config = ReporterConfig::from_process_env(config_file)?;
        Self::configure_from_env(config)
    }

    /// Returns whether this process is the root or a worker.
    pub fn mode(&self) -> RegistryMode {
        self.registry.mode()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    /// Returns the environment variable that workers must inherit to attach to this store.
    pub fn worker_env(&self) -> Result<(&'static str, TransportString), ReporterError> {
        Ok(self.registry.worker_env()?)
    }

    /// Sets up `command` so the worker it spawns attaches to this store.
    pub fn configure_command<'a>(
        &self,
        command: &'a mut Command,
    ) -> Result<&'a mut Command, ReporterError> {
        let (key, transport) = self.worker_env()?;
        Ok(command.env(key, transport.as_str()))
    }

    /// Records a passing test.
    pub fn add_pass(&self) -> Result<(), ReporterError> {
        self.registry.add(PASSES, 1)?;
        Ok(())
    }

    /// Records a test that raised an unexpected error of type `ty`.
    pub fn add_error(
        &self,
        name: impl Into<String>,
        ty: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), ReporterError> {
        let mut record = TestRecord::new(name, RecordKind::Error);
        record.set_type(ty).set_message(message);
        self.add_record(&record)
    }

    /// Records a test whose assertion of type `ty` failed.
    pub fn add_failure(
        &self,
        name: impl Into<String>,
        ty: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), ReporterError> {
        let mut record = TestRecord::new(name, RecordKind::Failure);
        record.set_type(ty).set_message(message);
        self.add_record(&record)
    }

    /// Records a skipped test.
    pub fn add_skip(
        &self,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<(), ReporterError> {
        let mut record = TestRecord::new(name, RecordKind::Skipped);
        record.set_message(reason);
        self.add_record(&record)
    }

    /// Records a test that errored, failed or was skipped, with every detail `record` carries.
    pub fn add_record(&self, record: &TestRecord) -> Result<(), ReporterError> {
        self.registry.add(record.kind.counter_name(), 1)?;
        self.registry.append(record)?;
        Ok(())
    }

    /// Reads the final totals and records, writes the JUnit report and releases the store.
    ///
    /// Must only be called after every worker has exited. If reading the store fails, no report
    /// is written. The store is released whether or not writing the report succeeds.
    pub fn report(self, stream: &mut dyn Write) -> Result<ReportSummary, ReporterError> {
        let result = self.write_junit(stream);
        let teardown = self.registry.teardown();
        let summary = result?;
        teardown?;
        Ok(summary)
    }

    /// Releases the store without writing a report. Workers call this when they're done.
    pub fn finish(self) -> Result<(), ReporterError> {
        self.registry.teardown()?;
        Ok(())
    }

    fn write_junit(&self, stream: &mut dyn Write) -> Result<ReportSummary, ReporterError> {
        let tally = self.registry.finalize()?;
        let timestamp = Local::now().fixed_offset();
        let report = build_report(self.config.report_name(), &tally, timestamp)?;

        let junit_path = self.config.junit_path();
        write_report(&report, junit_path)?;

        if self.config.verbosity() > 1 {
            writeln!(stream, "{}", "-".repeat(70)).map_err(ReporterError::Io)?;
            writeln!(stream, "XML: {junit_path}").map_err(ReporterError::Io)?;
        }

        Ok(ReportSummary {
            junit_path: junit_path.to_owned(),
            tally,
        })
    }
}

/// What [`XunitTally::report`] wrote.
#[derive(Clone, Debug)]
pub struct ReportSummary {
    junit_path: Utf8PathBuf,
    tally: FinalTally<TestRecord>,
}

impl ReportSummary {
    /// The path the report was written to.
    pub fn junit_path(&self) -> &Utf8Path {
        &self.junit_path
    }

    /// The totals and records the report was built from.
    pub fn tally(&self) -> &FinalTally<TestRecord> {
        &self.tally
    }
}
