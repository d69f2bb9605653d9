use anyhow::Result;
use clap::{ArgMatches, Args, FromArgMatches};
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::debug;

use crate::app::{CLI_PACKAGE_NAME, CLI_VERSION};
use crate::command::{Command, CommandHelper};
use crate::manifest::read_manifest;
use crate::npm::{is_newer, InstalledPackage, LatestVersion, LatestVersionLookup};
use crate::registry::CommandsMap;

#[derive(Debug, Default, Args)]
pub struct VersionArgs {
    /// Output a list of installed commands and check if any can be updated to a more recent
    /// stable version.
    #[arg(short, long)]
    pub outdated: bool,
}

#[derive(Debug, Clone)]
pub struct CliInfo {
    pub name: String,
    pub version: String,
}

impl CliInfo {
    pub fn current() -> Self {
        Self {
            name: CLI_PACKAGE_NAME.to_string(),
            version: CLI_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VersionStatus {
    Current,
    Outdated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub package_name: String,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub upgrade_target: Option<String>,
    pub status: VersionStatus,
}

impl VersionInfo {
    fn unchecked(package: &InstalledPackage) -> Self {
        Self {
            package_name: package.name.clone(),
            current_version: package.version.clone(),
            latest_version: None,
            upgrade_target: None,
            status: VersionStatus::Unknown,
        }
    }
}

/// Installed, non-builtin commands whose package manifest can be read, in
/// registry order.
pub fn installed_packages(commands: &CommandsMap) -> Vec<InstalledPackage> {
    commands
        .descriptors()
        .filter(|d| !d.is_builtin())
        .filter_map(|d| d.path.as_deref())
        .filter_map(read_manifest)
        .map(|info| InstalledPackage {
            name: info.name,
            version: info.version,
        })
        .collect()
}

pub fn classify(package: &InstalledPackage, latest: Option<&LatestVersion>) -> VersionInfo {
    let mut info = VersionInfo::unchecked(package);
    let Some(latest) = latest else {
        return info;
    };
    info.latest_version = Some(latest.latest.clone());
    info.upgrade_target = latest.wanted.clone();

    info.status = match is_newer(&latest.latest, &package.version) {
        Some(true) => VersionStatus::Outdated,
        Some(false) => VersionStatus::Current,
        None => VersionStatus::Unknown,
    };
    info
}

pub fn cmd_version(
    commands: &CommandsMap,
    args: &VersionArgs,
    lookup: &dyn LatestVersionLookup,
    cli: &CliInfo,
    color: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let installed = installed_packages(commands);
    if installed.is_empty() {
        writeln!(out, "{}", format_no_commands(cli))?;
        return Ok(());
    }

    let infos: Vec<VersionInfo> = if args.outdated {
        writeln!(out, "Fetching latest version information...")?;
        let latest: BTreeMap<String, LatestVersion> = match lookup.latest_versions(&installed) {
            Ok(latest) => latest,
            Err(e) => {
                debug!("latest version lookup failed: {:#}", e);
                writeln!(out, "Something went wrong trying to fetch command versions")?;
                return Ok(());
            }
        };
        installed
            .iter()
            .map(|p| classify(p, latest.get(&p.name)))
            .collect()
    } else {
        installed.iter().map(VersionInfo::unchecked).collect()
    };

    writeln!(out, "{}", format_version_report(&infos, cli, color))?;
    Ok(())
}

fn running_line(cli: &CliInfo) -> String {
    format!("You are currently running {} {}", cli.name, cli.version)
}

pub fn format_no_commands(cli: &CliInfo) -> String {
    format!(
        "There are no registered commands available.\n{}",
        running_line(cli)
    )
}

fn render_version(info: &VersionInfo, color: bool) -> String {
    let version = &info.current_version;
    if info.status != VersionStatus::Outdated {
        return format!("{}@{}", info.package_name, version);
    }

    let latest = info.latest_version.as_deref().unwrap_or_default();
    if info.upgrade_target.as_deref() == Some(latest) {
        return if color {
            format!("{}@{}", info.package_name, version.yellow())
        } else {
            format!("{}@{}", info.package_name, version)
        };
    }

    let note = format!("(latest is {})", latest);
    if color {
        format!("{}@{}  {}", info.package_name, version.yellow(), note.red())
    } else {
        format!("{}@{}  {}", info.package_name, version, note)
    }
}

pub fn format_version_report(infos: &[VersionInfo], cli: &CliInfo, color: bool) -> String {
    let lines: Vec<String> = infos.iter().map(|i| render_version(i, color)).collect();
    format!(
        "The currently installed commands are:\n\n{}\n\n{}",
        lines.join("\n"),
        running_line(cli)
    )
}

pub struct VersionCommand {
    lookup: Box<dyn LatestVersionLookup>,
    cli: CliInfo,
}

impl VersionCommand {
    pub fn new(lookup: Box<dyn LatestVersionLookup>, cli: CliInfo) -> Self {
        Self { lookup, cli }
    }
}

impl Command for VersionCommand {
    fn description(&self) -> &str {
        "Provides version information for all installed commands and the cli itself"
    }

    fn register(&self, cmd: clap::Command) -> clap::Command {
        VersionArgs::augment_args(cmd)
    }

    fn run(&self, helper: &mut CommandHelper<'_>, args: &ArgMatches) -> Result<()> {
        let args = VersionArgs::from_arg_matches(args)?;
        cmd_version(
            helper.commands,
            &args,
            self.lookup.as_ref(),
            &self.cli,
            helper.color,
            helper.out,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CommandDescriptor;
    use crate::testutil::{descriptor, ScriptedLookup, StubCommand, TestEnv};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn cli() -> CliInfo {
        CliInfo {
            name: "dojo-cli".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    fn command_at(group: &str, name: &str, path: PathBuf) -> CommandDescriptor {
        descriptor(group, name, Some(path), Arc::new(StubCommand::new()))
    }

    fn run_version(
        commands: &CommandsMap,
        outdated: bool,
        lookup: &ScriptedLookup,
        color: bool,
    ) -> String {
        let mut out = Vec::new();
        cmd_version(commands, &VersionArgs { outdated }, lookup, &cli(), color, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn latest(latest: &str, wanted: Option<&str>) -> LatestVersion {
        LatestVersion {
            latest: latest.to_string(),
            wanted: wanted.map(str::to_string),
        }
    }

    #[test]
    fn no_installed_commands() {
        let commands = CommandsMap::default();
        let text = run_version(&commands, false, &ScriptedLookup::empty(), false);
        assert_eq!(
            text.trim(),
            "There are no registered commands available.\nYou are currently running dojo-cli 1.0.0"
        );
    }

    #[test]
    fn invalid_path_counts_as_not_installed() {
        let commands = CommandsMap::from_descriptors([command_at(
            "apple",
            "test",
            PathBuf::from("/path/that/does/not/exist"),
        )]);
        let text = run_version(&commands, false, &ScriptedLookup::empty(), false);
        assert!(text.starts_with("There are no registered commands available."));
    }

    #[test]
    fn lists_installed_versions_in_registry_order() {
        let env = TestEnv::new();
        let commands = CommandsMap::from_descriptors([
            command_at("apple", "test", env.create_package("valid-package", "1.0.1")),
            command_at("orange", "another", env.create_package("another-valid-package", "2.3.0")),
        ]);

        let text = run_version(&commands, false, &ScriptedLookup::empty(), false);
        insta::assert_snapshot!(text.trim_end(), @r"
        The currently installed commands are:

        valid-package@1.0.1
        another-valid-package@2.3.0

        You are currently running dojo-cli 1.0.0
        ");
    }

    #[test]
    fn builtin_commands_are_excluded() {
        let env = TestEnv::new();
        let commands = CommandsMap::from_descriptors([
            command_at("apple", "test", env.create_package("valid-package", "1.0.1")),
            CommandDescriptor::builtin("version", Arc::new(StubCommand::new())),
        ]);

        let text = run_version(&commands, false, &ScriptedLookup::empty(), false);
        assert!(text.contains("valid-package@1.0.1"));
        assert_eq!(text.matches('@').count(), 1);
    }

    #[test]
    fn outdated_without_newer_versions_is_unstyled() {
        let env = TestEnv::new();
        let commands = CommandsMap::from_descriptors([command_at(
            "apple",
            "test",
            env.create_package("valid-package", "1.0.1"),
        )]);

        let text = run_version(&commands, true, &ScriptedLookup::empty(), true);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Fetching latest version information...");
        assert_eq!(lines[1], "The currently installed commands are:");
        assert_eq!(lines[3], "valid-package@1.0.1");
    }

    #[test]
    fn outdated_with_compatible_upgrade_is_highlighted() {
        let env = TestEnv::new();
        let commands = CommandsMap::from_descriptors([command_at(
            "apple",
            "test",
            env.create_package("valid-package", "1.0.1"),
        )]);
        let lookup = ScriptedLookup::with([("valid-package", latest("1.2.3", Some("1.2.3")))]);

        let text = run_version(&commands, true, &lookup, true);
        assert!(text.contains(&format!("valid-package@{}\n", "1.0.1".yellow())));
        assert!(!text.contains("latest is"));
    }

    #[test]
    fn outdated_with_newer_major_is_annotated() {
        let env = TestEnv::new();
        let commands = CommandsMap::from_descriptors([command_at(
            "apple",
            "test",
            env.create_package("valid-package", "1.0.1"),
        )]);
        let lookup = ScriptedLookup::with([("valid-package", latest("2.0.0", Some("1.0.1")))]);

        let text = run_version(&commands, true, &lookup, true);
        let expected = format!(
            "valid-package@{}  {}",
            "1.0.1".yellow(),
            "(latest is 2.0.0)".red()
        );
        assert!(text.contains(&expected), "{}", text);
    }

    #[test]
    fn outdated_plain_output_keeps_annotation() {
        let env = TestEnv::new();
        let commands = CommandsMap::from_descriptors([command_at(
            "apple",
            "test",
            env.create_package("valid-package", "1.0.1"),
        )]);
        let lookup = ScriptedLookup::with([("valid-package", latest("2.0.0", None))]);

        let text = run_version(&commands, true, &lookup, false);
        assert!(text.contains("valid-package@1.0.1  (latest is 2.0.0)"));
    }

    #[test]
    fn lookup_failure_degrades_to_message() {
        let env = TestEnv::new();
        let commands = CommandsMap::from_descriptors([command_at(
            "apple",
            "test",
            env.create_package("valid-package", "1.0.1"),
        )]);

        let text = run_version(&commands, true, &ScriptedLookup::failing(), false);
        assert_eq!(
            text,
            "Fetching latest version information...\n\
             Something went wrong trying to fetch command versions\n"
        );
    }

    #[test]
    fn lookup_not_called_without_outdated() {
        let env = TestEnv::new();
        let commands = CommandsMap::from_descriptors([command_at(
            "apple",
            "test",
            env.create_package("valid-package", "1.0.1"),
        )]);
        let lookup = ScriptedLookup::failing();

        run_version(&commands, false, &lookup, false);
        assert_eq!(lookup.calls(), 0);
    }

    #[test]
    fn classify_statuses() {
        let package = InstalledPackage {
            name: "p".to_string(),
            version: "1.0.0".to_string(),
        };
        assert_eq!(classify(&package, None).status, VersionStatus::Unknown);
        assert_eq!(
            classify(&package, Some(&latest("1.0.0", Some("1.0.0")))).status,
            VersionStatus::Current
        );
        assert_eq!(
            classify(&package, Some(&latest("0.9.0", None))).status,
            VersionStatus::Current
        );
        assert_eq!(
            classify(&package, Some(&latest("1.1.0", Some("1.1.0")))).status,
            VersionStatus::Outdated
        );
        assert_eq!(
            classify(&package, Some(&latest("next", None))).status,
            VersionStatus::Unknown
        );
    }

    #[test]
    fn run_parses_outdated_flag() {
        let mut env = TestEnv::new();
        let package = env.create_package("valid-package", "1.0.1");
        let commands = CommandsMap::from_descriptors([command_at("apple", "test", package)]);
        let version = VersionCommand::new(Box::new(ScriptedLookup::failing()), cli());
        let matches = version
            .register(clap::Command::new("version"))
            .try_get_matches_from(["version", "--outdated"])
            .unwrap();

        version.run(&mut env.helper(&commands, false), &matches).unwrap();
        assert!(env.output().contains("Something went wrong"));
    }
}
