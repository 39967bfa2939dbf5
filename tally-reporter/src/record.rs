// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Records of individual tests that did not pass.

use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// The counter names a reporter's registry is created with, in order.
pub const STAT_NAMES: [&str; 4] = ["errors", "failures", "passes", "skipped"];

/// The counter incremented for each passing test.
pub const PASSES: &str = "passes";

/// The outcome of a test that produced a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    /// The test raised an unexpected error.
    Error,

    /// An assertion in the test failed.
    Failure,

    /// The test was skipped.
    Skipped,
}

impl RecordKind {
    /// Returns the counter that tracks tests of this kind.
    pub fn counter_name(self) -> &'static str {
        match self {
            RecordKind::Error => "errors",
            RecordKind::Failure => "failures",
            RecordKind::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Error => write!(f, "error"),
            RecordKind::Failure => write!(f, "failure"),
            RecordKind::Skipped => write!(f, "skipped"),
        }
    }
}

/// A test that errored, failed or was skipped, as written by a worker process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestRecord {
    /// The name of the test.
    pub name: String,

    /// The class or module the test belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classname: Option<String>,

    /// What happened to the test.
    pub kind: RecordKind,

    /// A short description of what happened, e.g. the assertion message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The type of the error, e.g. an exception class name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,

    /// The full failure description, e.g. a traceback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// How long the test ran for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Duration>,

    /// Captured standard output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    /// Captured standard error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl TestRecord {
    /// Creates a new record with just a name and kind.
    pub fn new(name: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            name: name.into(),
            classname: None,
            kind,
            message: None,
            ty: None,
            description: None,
            time: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Sets the classname.
    pub fn set_classname(&mut self, classname: impl Into<String>) -> &mut Self {
        self.classname = Some(classname.into());
        self
    }

    /// Sets the message.
    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the type.
    pub fn set_type(&mut self, ty: impl Into<String>) -> &mut Self {
        self.ty = Some(ty.into());
        self
    }

    /// Sets the description.
    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the time taken.
    pub fn set_time(&mut self, time: Duration) -> &mut Self {
        self.time = Some(time);
        self
    }

    /// Sets captured standard output.
    pub fn set_stdout(&mut self, stdout: impl Into<String>) -> &mut Self {
        self.stdout = Some(stdout.into());
        self
    }

    /// Sets captured standard error.
    pub fn set_stderr(&mut self, stderr: impl Into<String>) -> &mut Self {
        self.stderr = Some(stderr.into());
        self
    }
}
