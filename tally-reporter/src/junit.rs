// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Code to generate JUnit XML reports from final tallies.

use crate::{
    errors::ReporterError,
    record::{RecordKind, TestRecord},
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::Utf8Path;
use chrono::{DateTime, FixedOffset};
use quick_junit::{NonSuccessKind, Report, ReportUuid, TestCase, TestCaseStatus, TestSuite};
use tally_store::FinalTally;
use tracing::{debug, warn};

/// Builds a JUnit report out of the totals and records of a finished run.
///
/// The counters are authoritative for the report's totals: passing tests never produce records,
/// so the test cases in the report are only those that errored, failed or were skipped.
///
/// Fails if the counters sum to more than an `i64` can hold.
pub fn build_report(
    report_name: &str,
    tally: &FinalTally<TestRecord>,
    timestamp: DateTime<FixedOffset>,
) -> Result<Report, ReporterError> {
    let mut test_suite = TestSuite::new(report_name);
    test_suite.set_timestamp(timestamp);
    for record in &tally.records {
        test_suite.add_test_case(test_case(record));
    }

    test_suite.tests = count(tally.total()?, "total");
    test_suite.errors = count_named(tally, RecordKind::Error.counter_name());
    test_suite.failures = count_named(tally, RecordKind::Failure.counter_name());
    test_suite.disabled = count_named(tally, RecordKind::Skipped.counter_name());

    let mut report = Report::new(report_name);
    report
        .set_report_uuid(ReportUuid::new_v4())
        .set_timestamp(timestamp)
        .add_test_suite(test_suite);
    Ok(report)
}

/// Writes `report` to `junit_path`, creating its parent directory if necessary.
///
/// The report is staged next to `junit_path` and renamed into place, so a failed write never
/// leaves a truncated report behind.
pub fn write_report(report: &Report, junit_path: &Utf8Path) -> Result<(), ReporterError> {
    let junit_dir = match junit_path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    std::fs::create_dir_all(junit_dir).map_err(|error| ReporterError::Fs {
        file: junit_dir.to_path_buf(),
        error,
    })?;

    AtomicFile::new_with_tmpdir(junit_path, AllowOverwrite, junit_dir)
        .write(|f| report.serialize(f))
        .map_err(|error| match error {
            atomicwrites::Error::Internal(error) => ReporterError::Fs {
                file: junit_path.to_path_buf(),
                error,
            },
            atomicwrites::Error::User(error) => ReporterError::Junit {
                file: junit_path.to_path_buf(),
                error,
            },
        })?;

    debug!("wrote JUnit report to `{junit_path}`");
    Ok(())
}

fn test_case(record: &TestRecord) -> TestCase {
    let mut status = match record.kind {
        RecordKind::Error => TestCaseStatus::non_success(NonSuccessKind::Error),
        RecordKind::Failure => TestCaseStatus::non_success(NonSuccessKind::Failure),
        RecordKind::Skipped => TestCaseStatus::skipped(),
    };
    if let Some(message) = &record.message {
        status.set_message(message.as_str());
    }
    if let Some(ty) = &record.ty {
        status.set_type(ty.as_str());
    }
    if let Some(description) = &record.description {
        status.set_description(description.as_str());
    }

    let mut test_case = TestCase::new(record.name.as_str(), status);
    if let Some(classname) = &record.classname {
        test_case.set_classname(classname.as_str());
    }
    if let Some(time) = record.time {
        test_case.set_time(time);
    }
    if let Some(stdout) = &record.stdout {
        test_case.set_system_out(stdout.as_str());
    }
    if let Some(stderr) = &record.stderr {
        test_case.set_system_err(stderr.as_str());
    }
    test_case
}

fn count_named(tally: &FinalTally<TestRecord>, name: &str) -> usize {
    count(tally.get(name).unwrap_or_default(), name)
}

fn count(value: i64, name: &str) -> usize {
    usize::try_from(value).unwrap_or_else(|_| {
        warn!("counter `{name}` has negative total {value}, reporting 0");
        0
    })
}
