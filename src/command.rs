//! The contract every dispatchable command implements.
//!
//! A command is always runnable. Ejecting and validating are optional
//! capabilities, discovered through [`Command::as_ejectable`] and
//! [`Command::as_validatable`] when the registry is built.

use anyhow::Result;
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::config::ConfigurationHelper;
use crate::registry::CommandsMap;

/// Everything a running command may touch besides its own arguments.
pub struct CommandHelper<'a> {
    /// Registry key of the command being run.
    pub command: &'a str,
    pub commands: &'a CommandsMap,
    pub configuration: &'a ConfigurationHelper,
    pub project_root: &'a Path,
    pub out: &'a mut dyn Write,
    /// Whether `out` accepts ANSI styling.
    pub color: bool,
}

pub trait Command {
    fn description(&self) -> &str;

    /// Declares the command's flags on the clap command it is mounted at.
    fn register(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }

    fn run(&self, helper: &mut CommandHelper<'_>, args: &ArgMatches) -> Result<()>;

    fn as_ejectable(&self) -> Option<&dyn EjectableCommand> {
        None
    }

    fn as_validatable(&self) -> Option<&dyn ValidatableCommand> {
        None
    }
}

pub trait EjectableCommand {
    /// Returns the files and dependencies the project takes ownership of, or
    /// `None` when there is nothing to hand over.
    fn eject(&self, configuration: &ConfigurationHelper) -> Result<Option<EjectOutput>>;
}

pub trait ValidatableCommand {
    fn validate(&self, configuration: &ConfigurationHelper) -> Result<bool>;
}

#[cfg_attr(test, derive(ts_rs::TS))]
#[cfg_attr(test, ts(export, export_to = "bindings/"))]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EjectOutput {
    #[serde(default)]
    pub npm: NpmDependencies,
    #[serde(default)]
    pub copy: Option<CopyInstructions>,
    #[serde(default)]
    pub hints: Vec<String>,
}

#[cfg_attr(test, derive(ts_rs::TS))]
#[cfg_attr(test, ts(export, export_to = "bindings/"))]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NpmDependencies {
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

#[cfg_attr(test, derive(ts_rs::TS))]
#[cfg_attr(test, ts(export, export_to = "bindings/"))]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CopyInstructions {
    /// Base directory the entries are resolved against. Relative paths are
    /// relative to the ejecting package.
    pub path: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub configs: Vec<ConfigCopy>,
}

#[cfg_attr(test, derive(ts_rs::TS))]
#[cfg_attr(test, ts(export, export_to = "bindings/"))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigCopy {
    pub source_path: String,
    pub dest_path: String,
}
