use anyhow::Result;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::app::{
    BUILTIN_PATH, MANIFEST_FILENAME, PLUGIN_PREFIX, PLUGIN_SCOPE, SCOPED_PLUGIN_PREFIX,
};
use crate::command::Command;
use crate::error::RegistryError;
use crate::external::ExternalCommand;
use crate::manifest::PackageManifest;

#[derive(Clone)]
pub struct CommandDescriptor {
    pub group: String,
    /// Empty for the group's default command.
    pub name: String,
    pub path: Option<PathBuf>,
    pub installed: bool,
    pub command: Arc<dyn Command>,
}

impl CommandDescriptor {
    pub fn builtin(group: &str, command: Arc<dyn Command>) -> Self {
        Self {
            group: group.to_string(),
            name: String::new(),
            path: Some(PathBuf::from(BUILTIN_PATH)),
            installed: true,
            command,
        }
    }

    pub fn key(&self) -> String {
        command_key(&self.group, &self.name)
    }

    pub fn is_builtin(&self) -> bool {
        self.path
            .as_deref()
            .is_some_and(|p| p == Path::new(BUILTIN_PATH))
    }
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("path", &self.path)
            .field("installed", &self.installed)
            .finish_non_exhaustive()
    }
}

pub fn command_key(group: &str, name: &str) -> String {
    if name.is_empty() {
        group.to_string()
    } else {
        format!("{}-{}", group, name)
    }
}

/// Every addressable command, keyed by `group` or `group-name`, in discovery
/// order. Built once per invocation and read-only afterwards.
#[derive(Debug, Default)]
pub struct CommandsMap {
    commands: IndexMap<String, CommandDescriptor>,
}

impl CommandsMap {
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = CommandDescriptor>) -> Self {
        let mut map = CommandsMap::default();
        for descriptor in descriptors {
            map.insert(descriptor);
        }
        map
    }

    /// A later descriptor for an existing key replaces the earlier one but
    /// keeps its position.
    fn insert(&mut self, descriptor: CommandDescriptor) {
        let key = descriptor.key();
        if let Some(previous) = self.commands.insert(key.clone(), descriptor) {
            debug!(
                key = %key,
                replaced = ?previous.path,
                "command key claimed again, later package wins"
            );
        }
    }

    pub fn get(&self, key: &str) -> Option<&CommandDescriptor> {
        self.commands.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandDescriptor)> {
        self.commands.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Descriptors grouped by group name, groups in first-seen order.
    pub fn groups(&self) -> IndexMap<&str, Vec<&CommandDescriptor>> {
        let mut groups: IndexMap<&str, Vec<&CommandDescriptor>> = IndexMap::new();
        for descriptor in self.commands.values() {
            groups
                .entry(descriptor.group.as_str())
                .or_default()
                .push(descriptor);
        }
        groups
    }
}

/// An installed package as reported by a [`PackageSource`], before it has
/// been checked for the command contract.
#[derive(Debug, Clone)]
pub struct RawPackage {
    pub path: PathBuf,
    pub manifest: PackageManifest,
}

pub trait PackageSource {
    fn list_packages(&self) -> Result<Vec<RawPackage>>;
}

/// Builds the map from built-in commands followed by installed packages.
/// Packages that do not declare a runnable command are skipped.
pub fn build(builtins: Vec<CommandDescriptor>, packages: Vec<RawPackage>) -> CommandsMap {
    let mut map = CommandsMap::from_descriptors(builtins);

    for package in packages {
        match load_command(&package) {
            Some(descriptor) => {
                debug!(
                    key = %descriptor.key(),
                    path = %package.path.display(),
                    "registered command"
                );
                map.insert(descriptor);
            }
            None => {
                debug!(package = %package.manifest.name, "package does not provide a command");
            }
        }
    }

    map
}

pub fn discover(
    builtins: Vec<CommandDescriptor>,
    source: &dyn PackageSource,
) -> Result<CommandsMap> {
    let packages = source.list_packages()?;
    Ok(build(builtins, packages))
}

fn load_command(package: &RawPackage) -> Option<CommandDescriptor> {
    let declaration = package.manifest.dojo.as_ref()?;
    let command = ExternalCommand::from_declaration(&package.path, declaration)?;
    Some(CommandDescriptor {
        group: declaration.group.clone(),
        name: declaration.name.clone(),
        path: Some(package.path.clone()),
        installed: true,
        command: Arc::new(command),
    })
}

/// Lists `dojo-cli-*` and `@dojo/cli-*` packages under a set of
/// `node_modules`-style directories.
pub struct NodeModules {
    search_paths: Vec<PathBuf>,
}

impl NodeModules {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// `<project>/node_modules` followed by every entry of `extra`, which
    /// uses the platform's path-list syntax.
    pub fn for_project(project_root: &Path, extra: Option<&std::ffi::OsStr>) -> Self {
        let mut search_paths = vec![project_root.join("node_modules")];
        if let Some(extra) = extra {
            search_paths.extend(std::env::split_paths(extra).filter(|p| !p.as_os_str().is_empty()));
        }
        Self::new(search_paths)
    }

    fn scan_dir(&self, dir: &Path, prefix: &str, found: &mut Vec<RawPackage>) -> Result<()> {
        let scan_err = |source| RegistryError::Scan {
            path: dir.to_path_buf(),
            source,
        };

        let entries = std::fs::read_dir(dir).map_err(scan_err)?;
        for entry in entries {
            let entry = entry.map_err(scan_err)?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.starts_with(prefix) {
                continue;
            }
            let path = entry.path();
            if !path.join(MANIFEST_FILENAME).is_file() {
                continue;
            }
            match PackageManifest::read(&path) {
                Ok(manifest) => found.push(RawPackage { path, manifest }),
                Err(e) => warn!("skipping {}: {:#}", path.display(), e),
            }
        }
        Ok(())
    }
}

impl PackageSource for NodeModules {
    fn list_packages(&self) -> Result<Vec<RawPackage>> {
        let mut found = Vec::new();

        for base in &self.search_paths {
            if !base.is_dir() {
                debug!(path = %base.display(), "plugin search path missing, skipping");
                continue;
            }
            self.scan_dir(base, PLUGIN_PREFIX, &mut found)?;

            let scope = base.join(PLUGIN_SCOPE);
            if scope.is_dir() {
                self.scan_dir(&scope, SCOPED_PLUGIN_PREFIX, &mut found)?;
            }
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::CommandDeclaration;
    use crate::testutil::{raw_package, write_package, StubCommand};

    fn names(map: &CommandsMap) -> Vec<&str> {
        map.iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn command_key_default_and_named() {
        assert_eq!(command_key("build", ""), "build");
        assert_eq!(command_key("build", "app"), "build-app");
    }

    #[test]
    fn build_keys_by_group_and_name() {
        let map = build(
            vec![],
            vec![
                raw_package("/pkgs/a", "build", "app"),
                raw_package("/pkgs/b", "test", ""),
            ],
        );
        assert_eq!(names(&map), vec!["build-app", "test"]);
        assert_eq!(map.get("test").unwrap().name, "");
        assert_eq!(
            map.get("build-app").unwrap().path,
            Some(PathBuf::from("/pkgs/a"))
        );
    }

    #[test]
    fn build_default_and_named_in_same_group_coexist() {
        let map = build(
            vec![],
            vec![
                raw_package("/pkgs/default", "build", ""),
                raw_package("/pkgs/named", "build", "app"),
            ],
        );
        assert_eq!(names(&map), vec!["build", "build-app"]);
        let groups = map.groups();
        assert_eq!(groups["build"].len(), 2);
    }

    #[test]
    fn build_collision_later_package_wins_in_place() {
        let map = build(
            vec![],
            vec![
                raw_package("/pkgs/first", "build", "app"),
                raw_package("/pkgs/other", "test", "unit"),
                raw_package("/pkgs/second", "build", "app"),
            ],
        );
        assert_eq!(names(&map), vec!["build-app", "test-unit"]);
        assert_eq!(
            map.get("build-app").unwrap().path,
            Some(PathBuf::from("/pkgs/second"))
        );
    }

    #[test]
    fn build_skips_packages_without_runnable_command() {
        let mut no_bin = raw_package("/pkgs/no-bin", "build", "app");
        if let Some(decl) = no_bin.manifest.dojo.as_mut() {
            decl.bin = None;
        }
        let mut plain = raw_package("/pkgs/plain", "x", "");
        plain.manifest.dojo = None;

        let map = build(vec![], vec![no_bin, plain]);
        assert!(map.is_empty());
    }

    #[test]
    fn build_places_builtins_first() {
        let builtin = CommandDescriptor::builtin("version", Arc::new(StubCommand::new()));
        let map = build(vec![builtin], vec![raw_package("/pkgs/a", "build", "")]);
        assert_eq!(names(&map), vec!["version", "build"]);
        assert!(map.get("version").unwrap().is_builtin());
        assert!(!map.get("build").unwrap().is_builtin());
    }

    #[test]
    fn build_capabilities_follow_declaration() {
        let mut ejectable = raw_package("/pkgs/a", "build", "app");
        if let Some(decl) = ejectable.manifest.dojo.as_mut() {
            decl.eject = true;
        }
        let map = build(vec![], vec![ejectable, raw_package("/pkgs/b", "test", "")]);
        assert!(map.get("build-app").unwrap().command.as_ejectable().is_some());
        assert!(map.get("test").unwrap().command.as_ejectable().is_none());
    }

    #[test]
    fn discover_lists_plain_and_scoped_packages() {
        let tmp = tempfile::tempdir().unwrap();
        let modules = tmp.path().join("node_modules");
        let decl = |group: &str| CommandDeclaration {
            group: group.to_string(),
            name: String::new(),
            description: None,
            bin: Some(PathBuf::from("bin/cmd")),
            eject: false,
            validate: false,
        };
        write_package(
            &modules.join("dojo-cli-build-app"),
            "dojo-cli-build-app",
            "1.0.0",
            Some(decl("build")),
        );
        write_package(
            &modules.join("@dojo").join("cli-test"),
            "@dojo/cli-test",
            "2.0.0",
            Some(decl("test")),
        );
        write_package(&modules.join("left-pad"), "left-pad", "1.3.0", None);

        let source = NodeModules::for_project(tmp.path(), None);
        let packages = source.list_packages().unwrap();
        let mut found: Vec<&str> = packages.iter().map(|p| p.manifest.name.as_str()).collect();
        found.sort();
        assert_eq!(found, vec!["@dojo/cli-test", "dojo-cli-build-app"]);

        let map = discover(vec![], &source).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn discover_skips_missing_search_paths_and_bad_manifests() {
        let tmp = tempfile::tempdir().unwrap();
        let broken = tmp.path().join("node_modules").join("dojo-cli-broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(MANIFEST_FILENAME), "{").unwrap();

        let source = NodeModules::new(vec![
            tmp.path().join("does-not-exist"),
            tmp.path().join("node_modules"),
        ]);
        assert!(source.list_packages().unwrap().is_empty());
    }

    #[test]
    fn for_project_appends_extra_paths() {
        let extra = std::env::join_paths(["/opt/dojo/plugins", "/usr/lib/dojo"]).unwrap();
        let source = NodeModules::for_project(Path::new("/work/app"), Some(extra.as_os_str()));
        assert_eq!(
            source.search_paths,
            vec![
                PathBuf::from("/work/app/node_modules"),
                PathBuf::from("/opt/dojo/plugins"),
                PathBuf::from("/usr/lib/dojo"),
            ]
        );
    }

    struct FailingSource;

    impl PackageSource for FailingSource {
        fn list_packages(&self) -> Result<Vec<RawPackage>> {
            Err(RegistryError::Scan {
                path: PathBuf::from("/node_modules"),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }
            .into())
        }
    }

    #[test]
    fn discover_propagates_scan_failure() {
        let err = discover(vec![], &FailingSource).unwrap_err();
        assert!(err.downcast_ref::<RegistryError>().is_some());
    }
}
