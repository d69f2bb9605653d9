#![cfg(test)]

use anyhow::{anyhow, bail, Result};
use clap::ArgMatches;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use crate::command::{
    Command, CommandHelper, EjectOutput, EjectableCommand, ValidatableCommand,
};
use crate::commands::Prompt;
use crate::config::{Config, ConfigBackend, ConfigurationHelper};
use crate::manifest::{CommandDeclaration, PackageManifest};
use crate::npm::{
    DependencyInstaller, DependencyKind, InstalledPackage, LatestVersion, LatestVersionLookup,
};
use crate::registry::{CommandDescriptor, CommandsMap, RawPackage};

// --- Configuration ---

/// In-memory store shared between clones, so a test can keep a handle while
/// the helper owns the boxed backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    store: Rc<RefCell<Option<Config>>>,
    writes: Rc<Cell<usize>>,
}

impl MemoryBackend {
    pub fn with(config: Config) -> Self {
        let backend = Self::default();
        *backend.store.borrow_mut() = Some(config);
        backend
    }

    pub fn snapshot(&self) -> Option<Config> {
        self.store.borrow().clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

impl ConfigBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Config>> {
        Ok(self.snapshot())
    }

    fn store(&self, config: &Config) -> Result<()> {
        *self.store.borrow_mut() = Some(config.clone());
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

// --- Commands ---

enum EjectBehavior {
    Unsupported,
    Output(Option<EjectOutput>),
    Fail(String),
}

pub struct StubCommand {
    eject: EjectBehavior,
    valid: Option<bool>,
    eject_calls: AtomicUsize,
    run_calls: AtomicUsize,
}

impl StubCommand {
    pub fn new() -> Self {
        Self {
            eject: EjectBehavior::Unsupported,
            valid: None,
            eject_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
        }
    }

    pub fn ejectable(output: Option<EjectOutput>) -> Self {
        Self {
            eject: EjectBehavior::Output(output),
            ..Self::new()
        }
    }

    pub fn failing_eject(message: &str) -> Self {
        Self {
            eject: EjectBehavior::Fail(message.to_string()),
            ..Self::new()
        }
    }

    pub fn validating(valid: bool) -> Self {
        Self {
            valid: Some(valid),
            ..Self::new()
        }
    }

    pub fn eject_calls(&self) -> usize {
        self.eject_calls.load(Ordering::SeqCst)
    }

    pub fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }
}

impl Command for StubCommand {
    fn description(&self) -> &str {
        "stub command"
    }

    fn run(&self, helper: &mut CommandHelper<'_>, _args: &ArgMatches) -> Result<()> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        writeln!(helper.out, "ran {}", helper.command)?;
        Ok(())
    }

    fn as_ejectable(&self) -> Option<&dyn EjectableCommand> {
        match self.eject {
            EjectBehavior::Unsupported => None,
            _ => Some(self),
        }
    }

    fn as_validatable(&self) -> Option<&dyn ValidatableCommand> {
        self.valid.map(|_| self as &dyn ValidatableCommand)
    }
}

impl EjectableCommand for StubCommand {
    fn eject(&self, _configuration: &ConfigurationHelper) -> Result<Option<EjectOutput>> {
        self.eject_calls.fetch_add(1, Ordering::SeqCst);
        match &self.eject {
            EjectBehavior::Output(output) => Ok(output.clone()),
            EjectBehavior::Fail(message) => Err(anyhow!("{}", message)),
            EjectBehavior::Unsupported => bail!("eject not supported"),
        }
    }
}

impl ValidatableCommand for StubCommand {
    fn validate(&self, _configuration: &ConfigurationHelper) -> Result<bool> {
        Ok(self.valid.unwrap_or(true))
    }
}

pub fn descriptor(
    group: &str,
    name: &str,
    path: Option<PathBuf>,
    command: Arc<dyn Command>,
) -> CommandDescriptor {
    CommandDescriptor {
        group: group.to_string(),
        name: name.to_string(),
        path,
        installed: true,
        command,
    }
}

// --- Collaborators ---

#[derive(Default)]
pub struct RecordingInstaller {
    calls: RefCell<Vec<(BTreeMap<String, String>, DependencyKind)>>,
}

impl RecordingInstaller {
    /// Only non-empty installs are recorded, matching what reaches npm.
    pub fn calls(&self) -> Vec<(BTreeMap<String, String>, DependencyKind)> {
        self.calls.borrow().clone()
    }
}

impl DependencyInstaller for RecordingInstaller {
    fn install(&self, dependencies: &BTreeMap<String, String>, kind: DependencyKind) -> Result<()> {
        if !dependencies.is_empty() {
            self.calls.borrow_mut().push((dependencies.clone(), kind));
        }
        Ok(())
    }
}

pub struct ScriptedPrompt {
    answer: bool,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn answer(answer: bool) -> Self {
        Self {
            answer,
            asked: RefCell::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, message: &str) -> Result<bool> {
        self.asked.borrow_mut().push(message.to_string());
        Ok(self.answer)
    }
}

pub struct ScriptedLookup {
    result: Option<BTreeMap<String, LatestVersion>>,
    calls: Cell<usize>,
}

impl ScriptedLookup {
    pub fn empty() -> Self {
        Self::with([])
    }

    pub fn with<const N: usize>(entries: [(&str, LatestVersion); N]) -> Self {
        Self {
            result: Some(
                entries
                    .into_iter()
                    .map(|(name, latest)| (name.to_string(), latest))
                    .collect(),
            ),
            calls: Cell::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl LatestVersionLookup for ScriptedLookup {
    fn latest_versions(
        &self,
        _packages: &[InstalledPackage],
    ) -> Result<BTreeMap<String, LatestVersion>> {
        self.calls.set(self.calls.get() + 1);
        self.result
            .clone()
            .ok_or_else(|| anyhow!("registry unreachable"))
    }
}

// --- HTTP ---

type Route = (String, u16, String);

/// Serves canned JSON bodies by request path from a local port and returns
/// the base URL. Unrouted paths answer 404.
pub fn serve_json(routes: &[(&str, u16, &str)]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let routes: Arc<Vec<Route>> = Arc::new(
        routes
            .iter()
            .map(|(path, status, body)| (path.to_string(), *status, body.to_string()))
            .collect(),
    );
    std::thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let routes = Arc::clone(&routes);
            std::thread::spawn(move || respond(stream, &routes));
        }
    });
    url
}

fn respond(mut stream: TcpStream, routes: &[Route]) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    reader.read_line(&mut request_line).unwrap();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).unwrap_or(0) == 0 || header == "\r\n" {
            break;
        }
    }

    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let (status, body) = routes
        .iter()
        .find(|(route, _, _)| route == path)
        .map_or((404, "{}"), |(_, status, body)| (*status, body.as_str()));
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let _ = write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
}

// --- Filesystem fixtures ---

pub fn raw_package(path: &str, group: &str, name: &str) -> RawPackage {
    RawPackage {
        path: PathBuf::from(path),
        manifest: PackageManifest {
            name: format!("dojo-cli-{}", crate::registry::command_key(group, name)),
            version: "1.0.0".to_string(),
            dojo: Some(CommandDeclaration {
                group: group.to_string(),
                name: name.to_string(),
                description: None,
                bin: Some(PathBuf::from("bin/cmd")),
                eject: false,
                validate: false,
            }),
        },
    }
}

pub fn write_package(
    dir: &Path,
    name: &str,
    version: &str,
    declaration: Option<CommandDeclaration>,
) {
    std::fs::create_dir_all(dir).unwrap();
    let manifest = PackageManifest {
        name: name.to_string(),
        version: version.to_string(),
        dojo: declaration,
    };
    std::fs::write(
        dir.join(crate::app::MANIFEST_FILENAME),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
}

#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A throwaway project directory with its own `.dojorc` store and a
/// captured output buffer.
pub struct TestEnv {
    _dir: TempDir,
    root: PathBuf,
    configuration: ConfigurationHelper,
    out: Vec<u8>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir.path().to_path_buf();
        let configuration =
            ConfigurationHelper::new(Box::new(crate::config::FileBackend::in_project(&root)));
        Self {
            _dir: dir,
            root,
            configuration,
            out: Vec::new(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }

    /// Installs a package under `node_modules` and returns its directory.
    pub fn create_package(&self, name: &str, version: &str) -> PathBuf {
        let dir = self.root.join("node_modules").join(name);
        write_package(&dir, name, version, None);
        dir
    }

    pub fn write_file(&self, path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn helper<'a>(&'a mut self, commands: &'a CommandsMap, color: bool) -> CommandHelper<'a> {
        CommandHelper {
            command: "test",
            commands,
            configuration: &self.configuration,
            project_root: &self.root,
            out: &mut self.out,
            color,
        }
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.out).to_string()
    }
}
