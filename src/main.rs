mod app;
mod cli;
mod command;
mod commands;
mod config;
mod error;
mod external;
mod manifest;
mod npm;
mod paths;
mod registry;
mod testutil;
mod update_notifier;

use anyhow::{bail, Result};
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::command::CommandHelper;
use crate::config::{ConfigurationHelper, FileBackend};
use crate::error::EjectError;
use crate::npm::{NpmInstaller, NpmRegistry};
use crate::registry::{CommandDescriptor, NodeModules};

fn main() {
    init_tracing();

    if let Err(e) = run() {
        if let Some(EjectError::Aborted) = e.downcast_ref::<EjectError>() {
            eprintln!("{}", e);
            return;
        }
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }

    if let Some(notice) = update_notifier::check_for_update(app::CLI_VERSION) {
        eprintln!("\n{}", notice.message());
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(app::LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn builtin_commands(project_root: &std::path::Path) -> Vec<CommandDescriptor> {
    let registry_url =
        std::env::var(app::REGISTRY_ENV).unwrap_or_else(|_| app::NPM_REGISTRY_URL.to_string());
    vec![
        CommandDescriptor::builtin(
            "version",
            Arc::new(commands::VersionCommand::new(
                Box::new(NpmRegistry::new(&registry_url)),
                commands::CliInfo::current(),
            )),
        ),
        CommandDescriptor::builtin(
            "eject",
            Arc::new(commands::EjectCommand::new(
                Box::new(commands::TerminalPrompt),
                Box::new(NpmInstaller::new(project_root.to_path_buf())),
            )),
        ),
    ]
}

fn run() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project_root = manifest::project_root(&cwd);
    debug!(root = %project_root.display(), "project root");

    let configuration = ConfigurationHelper::new(Box::new(FileBackend::in_project(&project_root)));
    let plugin_path = std::env::var_os(app::PLUGIN_PATH_ENV);
    let source = NodeModules::for_project(&project_root, plugin_path.as_deref());
    let commands = registry::discover(builtin_commands(&project_root), &source)?;
    debug!(count = commands.len(), "commands registered");

    let matches = cli::build_cli(&commands).get_matches();
    let Some((descriptor, args)) = cli::resolve(&commands, &matches) else {
        bail!("no command selected\n  hint: run `{} --help` to list commands", app::BIN_NAME);
    };
    let key = descriptor.key();

    let stdout = std::io::stdout();
    let color = stdout.is_terminal();
    let mut out = stdout.lock();
    let mut helper = CommandHelper {
        command: &key,
        commands: &commands,
        configuration: &configuration,
        project_root: &project_root,
        out: &mut out,
        color,
    };
    cli::dispatch(descriptor, &mut helper, args)
}
