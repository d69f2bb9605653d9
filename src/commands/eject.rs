use anyhow::{bail, Context, Result};
use clap::{ArgMatches, Args, FromArgMatches};
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::command::{Command, CommandHelper, CopyInstructions, EjectOutput};
use crate::error::EjectError;
use crate::npm::{DependencyInstaller, DependencyKind};
use crate::paths::{display_relative, eject_dir, namespaced, resolve_source};
use crate::registry::{command_key, CommandDescriptor, CommandsMap};

pub const CONFIRM_MESSAGE: &str = "Are you sure you want to eject (this is a permanent operation)?";

#[derive(Debug, Default, Args)]
pub struct EjectArgs {
    /// the group to eject commands from
    #[arg(short, long)]
    pub group: Option<String>,
    /// the command to eject - a `group` is required
    #[arg(short, long, requires = "group")]
    pub command: Option<String>,
}

pub trait Prompt {
    fn confirm(&self, message: &str) -> Result<bool>;
}

pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
            .context("failed to read eject confirmation")
    }
}

#[derive(Debug, Default)]
pub struct EjectResult {
    pub ejected: Vec<String>,
    pub files_copied: usize,
}

struct EjectedCommand {
    key: String,
    package_dir: Option<PathBuf>,
    output: EjectOutput,
}

/// Picks the commands an eject run applies to, in registry order.
pub fn select_candidates<'a>(
    commands: &'a CommandsMap,
    args: &EjectArgs,
) -> Result<Vec<&'a CommandDescriptor>, EjectError> {
    if let (Some(group), Some(command)) = (&args.group, &args.command) {
        let key = command_key(group, command);
        let descriptor = commands
            .get(&key)
            .ok_or_else(|| EjectError::NotFound(key.clone()))?;
        if descriptor.command.as_ejectable().is_none() {
            return Err(EjectError::NotEjectable(key));
        }
        return Ok(vec![descriptor]);
    }

    Ok(commands
        .descriptors()
        .filter(|d| !d.is_builtin())
        .filter(|d| args.group.as_ref().map_or(true, |g| &d.group == g))
        .filter(|d| d.command.as_ejectable().is_some())
        .collect())
}

/// Later outputs win on a package name collision.
fn merge_dependencies(
    ejected: &[EjectedCommand],
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut dependencies = BTreeMap::new();
    let mut dev_dependencies = BTreeMap::new();
    for command in ejected {
        dependencies.extend(command.output.npm.dependencies.clone());
        dev_dependencies.extend(command.output.npm.dev_dependencies.clone());
    }
    (dependencies, dev_dependencies)
}

pub fn cmd_eject(
    helper: &mut CommandHelper<'_>,
    args: &EjectArgs,
    prompt: &dyn Prompt,
    installer: &dyn DependencyInstaller,
) -> Result<EjectResult> {
    if !prompt.confirm(CONFIRM_MESSAGE)? {
        return Err(EjectError::Aborted.into());
    }

    let candidates = select_candidates(helper.commands, args)?;
    if candidates.is_empty() {
        writeln!(helper.out, "No commands have implemented eject")?;
        return Ok(EjectResult::default());
    }

    let mut ejected = Vec::new();
    for descriptor in candidates {
        let Some(ejectable) = descriptor.command.as_ejectable() else {
            continue;
        };
        let key = descriptor.key();
        debug!(command = %key, "ejecting");
        let output = ejectable.eject(helper.configuration)?.unwrap_or_default();
        ejected.push(EjectedCommand {
            key,
            package_dir: descriptor.path.clone(),
            output,
        });
    }

    let (dependencies, dev_dependencies) = merge_dependencies(&ejected);
    installer.install(&dependencies, DependencyKind::Production)?;
    installer.install(&dev_dependencies, DependencyKind::Development)?;

    let mut files_copied = 0;
    for command in &ejected {
        if let Some(copy) = &command.output.copy {
            writeln!(helper.out, "ejecting {}", command.key)?;
            files_copied += copy_ejected_files(helper, command, copy)?;
        }
    }

    writeln!(helper.out, "\nejection complete")?;
    let hints: Vec<&String> = ejected.iter().flat_map(|c| &c.output.hints).collect();
    if !hints.is_empty() {
        writeln!(helper.out, "\nhints:")?;
        for hint in hints {
            writeln!(helper.out, "  {}", hint)?;
        }
    }

    Ok(EjectResult {
        ejected: ejected.into_iter().map(|c| c.key).collect(),
        files_copied,
    })
}

fn copy_ejected_files(
    helper: &mut CommandHelper<'_>,
    command: &EjectedCommand,
    copy: &CopyInstructions,
) -> Result<usize> {
    let package_dir = command
        .package_dir
        .as_deref()
        .unwrap_or(helper.project_root);
    let dest_dir = eject_dir(helper.project_root, &command.key);

    // Every destination is checked before the first copy.
    let mut pairs: Vec<(PathBuf, PathBuf)> = Vec::new();
    for file in &copy.files {
        pairs.push((
            resolve_source(package_dir, &copy.path, file),
            namespaced(&dest_dir, file)?,
        ));
    }
    for config in &copy.configs {
        pairs.push((
            resolve_source(package_dir, &copy.path, &config.source_path),
            namespaced(&dest_dir, &config.dest_path)?,
        ));
    }

    let label = if helper.color {
        "creating".yellow().to_string()
    } else {
        "creating".to_string()
    };
    for (source, dest) in &pairs {
        writeln!(
            helper.out,
            " {} {}",
            label,
            display_relative(helper.project_root, dest)
        )?;
        copy_path(source, dest)?;
    }
    Ok(pairs.len())
}

fn copy_path(source: &Path, dest: &Path) -> Result<()> {
    if source.is_dir() {
        std::fs::create_dir_all(dest)
            .with_context(|| format!("failed to create directory {}", dest.display()))?;
        let entries = std::fs::read_dir(source)
            .with_context(|| format!("failed to read directory {}", source.display()))?;
        for entry in entries {
            let entry = entry?;
            copy_path(&entry.path(), &dest.join(entry.file_name()))?;
        }
        return Ok(());
    }

    if dest.exists() && same_file(source, dest) {
        bail!("refusing to copy {} onto itself", source.display());
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::copy(source, dest)
        .with_context(|| format!("failed to copy {} to {}", source.display(), dest.display()))?;
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub struct EjectCommand {
    prompt: Box<dyn Prompt>,
    installer: Box<dyn DependencyInstaller>,
}

impl EjectCommand {
    pub fn new(prompt: Box<dyn Prompt>, installer: Box<dyn DependencyInstaller>) -> Self {
        Self { prompt, installer }
    }
}

impl Command for EjectCommand {
    fn description(&self) -> &str {
        "Disconnect commands from the cli, copying their configuration into the project"
    }

    fn register(&self, cmd: clap::Command) -> clap::Command {
        EjectArgs::augment_args(cmd)
    }

    fn run(&self, helper: &mut CommandHelper<'_>, args: &ArgMatches) -> Result<()> {
        let args = EjectArgs::from_arg_matches(args)?;
        cmd_eject(helper, &args, self.prompt.as_ref(), self.installer.as_ref())?;
        Ok(())
    }
}
