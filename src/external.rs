use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

use crate::app::COMMAND_CONFIG_ENV;
use crate::command::{
    Command as DojoCommand, CommandHelper, EjectOutput, EjectableCommand, ValidatableCommand,
};
use crate::config::ConfigurationHelper;
use crate::manifest::CommandDeclaration;
use crate::registry::command_key;

const ARGS_ID: &str = "args";

/// A command provided by an installed package's executable.
///
/// The executable is invoked as `<bin> run <args...>`, `<bin> eject` or
/// `<bin> validate`. Its configuration block is handed over as JSON in
/// `DOJO_COMMAND_CONFIG`.
#[derive(Debug)]
pub struct ExternalCommand {
    key: String,
    description: String,
    bin: PathBuf,
    package_dir: PathBuf,
    ejectable: bool,
    validatable: bool,
}

impl ExternalCommand {
    /// Returns `None` when the declaration has no executable, i.e. the package
    /// cannot be run.
    pub fn from_declaration(package_dir: &Path, declaration: &CommandDeclaration) -> Option<Self> {
        let bin = declaration.bin.as_ref()?;
        Some(Self {
            key: command_key(&declaration.group, &declaration.name),
            description: declaration.description.clone().unwrap_or_default(),
            bin: package_dir.join(bin),
            package_dir: package_dir.to_path_buf(),
            ejectable: declaration.eject,
            validatable: declaration.validate,
        })
    }

    fn invocation(
        &self,
        configuration: &ConfigurationHelper,
        hook: &str,
        cwd: &Path,
    ) -> Result<Command> {
        let block = configuration.get(Some(&self.key))?;
        let config_json =
            serde_json::to_string(&block).context("failed to serialize command config")?;

        let mut cmd = Command::new(&self.bin);
        cmd.arg(hook)
            .current_dir(cwd)
            .env(COMMAND_CONFIG_ENV, config_json);
        Ok(cmd)
    }

    fn spawn_failure(&self) -> String {
        format!("failed to run {} for command {}", self.bin.display(), self.key)
    }

    fn capture(&self, mut cmd: Command, hook: &str) -> Result<Output> {
        debug!(command = %self.key, hook, bin = %self.bin.display(), "invoking plugin");
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| self.spawn_failure())
    }
}

impl DojoCommand for ExternalCommand {
    fn description(&self) -> &str {
        &self.description
    }

    fn register(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            Arg::new(ARGS_ID)
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .help("Arguments passed through to the command"),
        )
    }

    fn run(&self, helper: &mut CommandHelper<'_>, args: &ArgMatches) -> Result<()> {
        let passthrough: Vec<&String> = args
            .get_many::<String>(ARGS_ID)
            .map(|values| values.collect())
            .unwrap_or_default();

        let mut cmd = self.invocation(helper.configuration, "run", helper.project_root)?;
        let status = cmd
            .args(passthrough)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| self.spawn_failure())?;

        if !status.success() {
            bail!(
                "command {} failed (exit code: {})",
                self.key,
                status
                    .code()
                    .map_or("signal".to_string(), |c| c.to_string())
            );
        }
        Ok(())
    }

    fn as_ejectable(&self) -> Option<&dyn EjectableCommand> {
        if self.ejectable {
            Some(self)
        } else {
            None
        }
    }

    fn as_validatable(&self) -> Option<&dyn ValidatableCommand> {
        if self.validatable {
            Some(self)
        } else {
            None
        }
    }
}

impl EjectableCommand for ExternalCommand {
    fn eject(&self, configuration: &ConfigurationHelper) -> Result<Option<EjectOutput>> {
        let cmd = self.invocation(configuration, "eject", &self.package_dir)?;
        let output = self.capture(cmd, "eject")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("eject failed for command {}\nstderr: {}", self.key, stderr.trim());
        }

        let stdout = String::from_utf8(output.stdout).context("eject output was not valid UTF-8")?;
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        let parsed: EjectOutput = serde_json::from_str(&stdout)
            .with_context(|| format!("failed to parse eject output of command {}", self.key))?;
        Ok(Some(parsed))
    }
}

impl ValidatableCommand for ExternalCommand {
    fn validate(&self, configuration: &ConfigurationHelper) -> Result<bool> {
        let cmd = self.invocation(configuration, "validate", &self.package_dir)?;
        let output = self.capture(cmd, "validate")?;
        Ok(output.status.success())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::{write_script, MemoryBackend};
    use serial_test::serial;

    fn declaration(eject: bool, validate: bool) -> CommandDeclaration {
        CommandDeclaration {
            group: "build".to_string(),
            name: "app".to_string(),
            description: Some("Build an application".to_string()),
            bin: Some(PathBuf::from("bin/build-app")),
            eject,
            validate,
        }
    }

    fn helper() -> ConfigurationHelper {
        ConfigurationHelper::new(Box::new(MemoryBackend::default()))
    }

    #[test]
    fn from_declaration_requires_bin() {
        let mut decl = declaration(false, false);
        decl.bin = None;
        assert!(ExternalCommand::from_declaration(Path::new("/pkg"), &decl).is_none());
    }

    #[test]
    fn capabilities_follow_declaration() {
        let plain =
            ExternalCommand::from_declaration(Path::new("/pkg"), &declaration(false, false))
                .unwrap();
        assert!(plain.as_ejectable().is_none());
        assert!(plain.as_validatable().is_none());

        let full = ExternalCommand::from_declaration(Path::new("/pkg"), &declaration(true, true))
            .unwrap();
        assert!(full.as_ejectable().is_some());
        assert!(full.as_validatable().is_some());
        assert_eq!(full.description(), "Build an application");
    }

    #[test]
    #[serial]
    fn eject_parses_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        write_script(
            &tmp.path().join("bin/build-app"),
            r#"echo '{"npm": {"devDependencies": {"webpack": "^4.0.0"}},
                     "copy": {"path": ".", "files": ["a.js"]}}'"#,
        );
        let cmd = ExternalCommand::from_declaration(tmp.path(), &declaration(true, false)).unwrap();

        let output = cmd.eject(&helper()).unwrap().unwrap();
        assert_eq!(output.npm.dev_dependencies["webpack"], "^4.0.0");
        assert_eq!(output.copy.unwrap().files, vec!["a.js"]);
    }

    #[test]
    #[serial]
    fn eject_empty_stdout_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        write_script(&tmp.path().join("bin/build-app"), "exit 0");
        let cmd = ExternalCommand::from_declaration(tmp.path(), &declaration(true, false)).unwrap();

        assert!(cmd.eject(&helper()).unwrap().is_none());
    }

    #[test]
    #[serial]
    fn eject_failure_carries_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        write_script(&tmp.path().join("bin/build-app"), "echo boom >&2; exit 3");
        let cmd = ExternalCommand::from_declaration(tmp.path(), &declaration(true, false)).unwrap();

        let err = cmd.eject(&helper()).unwrap_err().to_string();
        assert!(err.contains("eject failed for command build-app"), "{}", err);
        assert!(err.contains("boom"), "{}", err);
    }

    #[test]
    #[serial]
    fn eject_receives_config_block() {
        let tmp = tempfile::tempdir().unwrap();
        write_script(
            &tmp.path().join("bin/build-app"),
            r#"printf '{"hints": ["%s"]}' "$(echo "$DOJO_COMMAND_CONFIG" | tr -d '"')""#,
        );
        let cmd = ExternalCommand::from_declaration(tmp.path(), &declaration(true, false)).unwrap();
        let configuration = helper();
        let mut block = crate::config::Config::new();
        block.insert("mode".to_string(), serde_json::json!("dist"));
        configuration.save(block, "build-app").unwrap();

        let output = cmd.eject(&configuration).unwrap().unwrap();
        assert_eq!(output.hints, vec!["{mode:dist}"]);
    }

    #[test]
    #[serial]
    fn validate_maps_exit_status() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin/build-app");
        write_script(&bin, r#"[ "$1" = validate ] && exit 1; exit 0"#);
        let cmd = ExternalCommand::from_declaration(tmp.path(), &declaration(false, true)).unwrap();
        assert!(!cmd.validate(&helper()).unwrap());

        write_script(&bin, "exit 0");
        assert!(cmd.validate(&helper()).unwrap());
    }

    #[test]
    fn missing_executable_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let cmd = ExternalCommand::from_declaration(tmp.path(), &declaration(true, false)).unwrap();
        let err = cmd.eject(&helper()).unwrap_err().to_string();
        assert!(err.contains("failed to run"), "{}", err);
    }
}
