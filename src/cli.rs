//! The clap tree is assembled at runtime from the commands map: one
//! subcommand per group, with named commands nested below it. A group's
//! default command owns the group's own flags.

use anyhow::{bail, Result};
use clap::ArgMatches;
use tracing::debug;

use crate::app::{BIN_NAME, CLI_VERSION};
use crate::command::CommandHelper;
use crate::registry::{command_key, CommandDescriptor, CommandsMap};

pub fn build_cli(commands: &CommandsMap) -> clap::Command {
    let mut cli = clap::Command::new(BIN_NAME)
        .about("Command line dispatcher for dojo commands")
        .version(CLI_VERSION)
        .subcommand_required(true)
        .arg_required_else_help(true);

    for (group, descriptors) in commands.groups() {
        cli = cli.subcommand(group_command(group, &descriptors));
    }
    cli
}

fn group_command(group: &str, descriptors: &[&CommandDescriptor]) -> clap::Command {
    let mut cmd = clap::Command::new(group.to_string());
    let default = descriptors.iter().find(|d| d.name.is_empty());
    let named: Vec<&&CommandDescriptor> = descriptors
        .iter()
        .filter(|d| !d.name.is_empty())
        .collect();

    match default {
        Some(descriptor) => {
            cmd = descriptor
                .command
                .register(cmd.about(descriptor.command.description().to_string()));
            if !named.is_empty() {
                cmd = cmd.args_conflicts_with_subcommands(true);
            }
        }
        None => {
            cmd = cmd
                .about(format!("{} commands", group))
                .subcommand_required(true)
                .arg_required_else_help(true);
        }
    }

    for descriptor in named {
        let sub = clap::Command::new(descriptor.name.clone())
            .about(descriptor.command.description().to_string());
        cmd = cmd.subcommand(descriptor.command.register(sub));
    }
    cmd
}

/// Maps parsed arguments back to the descriptor they select, together with
/// the matches that belong to that command.
pub fn resolve<'a>(
    commands: &'a CommandsMap,
    matches: &'a ArgMatches,
) -> Option<(&'a CommandDescriptor, &'a ArgMatches)> {
    let (group, group_matches) = matches.subcommand()?;
    match group_matches.subcommand() {
        Some((name, sub_matches)) => commands
            .get(&command_key(group, name))
            .map(|d| (d, sub_matches)),
        None => commands.get(group).map(|d| (d, group_matches)),
    }
}

/// Validates the command when it supports validation, then runs it.
pub fn dispatch(
    descriptor: &CommandDescriptor,
    helper: &mut CommandHelper<'_>,
    args: &ArgMatches,
) -> Result<()> {
    if let Some(validatable) = descriptor.command.as_validatable() {
        if !validatable.validate(helper.configuration)? {
            bail!("command {} failed validation", helper.command);
        }
    }
    debug!(command = %helper.command, "running");
    descriptor.command.run(helper, args)
}
