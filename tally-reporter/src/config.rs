// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporter configuration.
//!
//! Configuration is layered, from lowest to highest priority:
//!
//! 1. The defaults in [`ReporterConfig::DEFAULT_CONFIG`].
//! 2. An optional TOML config file.
//! 3. `TALLY_*` environment variables, e.g. `TALLY_JUNIT_PATH`.

use crate::errors::ConfigParseError;
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Configuration for a test run's report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReporterConfig {
    junit_path: Utf8PathBuf,
    report_name: String,
    verbosity: u8,
    store_parent: Option<Utf8PathBuf>,
}

impl ReporterConfig {
    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Environment configuration uses this prefix, plus a _.
    pub const ENVIRONMENT_PREFIX: &'static str = "TALLY";

    /// Config keys that can be overridden through the environment.
    const ENV_KEYS: &'static [&'static str] =
        &["junit-path", "report-name", "verbosity", "store-parent"];

    /// Loads the configuration from the defaults, `config_file` if given, and environment
    /// variables looked up through `env`.
    ///
    /// `env` is called with full variable names such as `TALLY_JUNIT_PATH`.
    pub fn load(
        config_file: Option<&Utf8Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigParseError> {
        let mut builder =
            Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml));
        if let Some(config_file) = config_file {
            builder = builder.add_source(File::new(config_file.as_str(), FileFormat::Toml));
        }
        for key in Self::ENV_KEYS {
            builder = builder
                .set_override_option(*key, env(&Self::env_var_name(key)))
                .map_err(|err| ConfigParseError::new(config_file.map(ToOwned::to_owned), err))?;
        }

        let config = builder
            .build()
            .map_err(|err| ConfigParseError::new(config_file.map(ToOwned::to_owned), err))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let deserialized = ReporterConfigDeserialize::deserialize(ignored_de)
            .map_err(|err| ConfigParseError::new(config_file.map(ToOwned::to_owned), err))?;

        if !ignored.is_empty() {
            let ignored: Vec<_> = ignored.into_iter().collect();
            warn!(
                "ignoring unknown configuration keys{}: {}",
                config_file
                    .map(|file| format!(" in {file}"))
                    .unwrap_or_default(),
                ignored.join(", "),
            );
        }

        Ok(Self {
            junit_path: deserialized.junit_path,
            report_name: deserialized.report_name,
            verbosity: deserialized.verbosity,
            store_parent: deserialized.store_parent,
        })
    }

    /// Loads the configuration using this process's environment.
    pub fn from_process_env(config_file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        Self::load(config_file, |name| std::env::var(name).ok())
    }

    /// Returns the environment variable name that overrides `key`.
    pub fn env_var_name(key: &str) -> String {
        format!(
            "{}_{}",
            Self::ENVIRONMENT_PREFIX,
            key.replace('-', "_").to_ascii_uppercase()
        )
    }

    /// The path the JUnit report is written to.
    pub fn junit_path(&self) -> &Utf8Path {
        &self.junit_path
    }

    /// The name attribute of the report.
    pub fn report_name(&self) -> &str {
        &self.report_name
    }

    /// The verbosity level.
    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// The directory under which backing directories are created, if not the system temporary
    /// directory.
    pub fn store_parent(&self) -> Option<&Utf8Path> {
        self.store_parent.as_deref()
    }

    /// Sets the path the JUnit report is written to.
    pub fn set_junit_path(&mut self, junit_path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.junit_path = junit_path.into();
        self
    }

    /// Sets the verbosity level.
    pub fn set_verbosity(&mut self, verbosity: u8) -> &mut Self {
        self.verbosity = verbosity;
        self
    }

    /// Sets the directory under which backing directories are created.
    pub fn set_store_parent(&mut self, store_parent: impl Into<Utf8PathBuf>) -> &mut Self {
        self.store_parent = Some(store_parent.into());
        self
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ReporterConfigDeserialize {
    junit_path: Utf8PathBuf,
    report_name: String,
    verbosity: u8,
    #[serde(default)]
    store_parent: Option<Utf8PathBuf>,
}
