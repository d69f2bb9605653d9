use anyhow::{anyhow, bail, Context, Result};
use semver::{Version, VersionReq};
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;
use ureq::Agent;

// --- Installation ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DependencyKind {
    Production,
    Development,
}

impl DependencyKind {
    fn save_flag(self) -> &'static str {
        match self {
            DependencyKind::Production => "--save",
            DependencyKind::Development => "--save-dev",
        }
    }
}

pub trait DependencyInstaller {
    /// Adds `dependencies` (package name to version range) to the project
    /// manifest and installs them.
    fn install(
        &self,
        dependencies: &BTreeMap<String, String>,
        kind: DependencyKind,
    ) -> Result<()>;
}

pub struct NpmInstaller {
    program: String,
    project_root: PathBuf,
}

impl NpmInstaller {
    pub fn new(project_root: PathBuf) -> Self {
        Self::with_program("npm", project_root)
    }

    pub fn with_program(program: &str, project_root: PathBuf) -> Self {
        Self {
            program: program.to_string(),
            project_root,
        }
    }
}

impl DependencyInstaller for NpmInstaller {
    fn install(
        &self,
        dependencies: &BTreeMap<String, String>,
        kind: DependencyKind,
    ) -> Result<()> {
        if dependencies.is_empty() {
            return Ok(());
        }

        let specs: Vec<String> = dependencies
            .iter()
            .map(|(name, range)| format!("{}@{}", name, range))
            .collect();
        debug!(?kind, ?specs, "installing dependencies");

        let status = Command::new(&self.program)
            .arg("install")
            .arg(kind.save_flag())
            .args(&specs)
            .current_dir(&self.project_root)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("failed to run {} install", self.program))?;

        if !status.success() {
            bail!(
                "{} install {} failed (exit code: {})",
                self.program,
                kind.save_flag(),
                status
                    .code()
                    .map_or("signal".to_string(), |c| c.to_string())
            );
        }
        Ok(())
    }
}

// --- Latest version lookup ---

#[derive(Debug, Clone, PartialEq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatestVersion {
    pub latest: String,
    /// Highest published version compatible with the installed one.
    pub wanted: Option<String>,
}

pub trait LatestVersionLookup {
    /// Packages the registry does not know are absent from the result. Any
    /// other failure fails the whole lookup.
    fn latest_versions(
        &self,
        packages: &[InstalledPackage],
    ) -> Result<BTreeMap<String, LatestVersion>>;
}

#[derive(Deserialize)]
struct Packument {
    #[serde(rename = "dist-tags", default)]
    dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    versions: BTreeMap<String, IgnoredAny>,
}

pub struct NpmRegistry {
    base_url: String,
    agent: Agent,
}

impl NpmRegistry {
    pub fn new(base_url: &str) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(10)))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: config.into(),
        }
    }

    fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name.replace('/', "%2f"))
    }

    fn fetch(&self, package: &InstalledPackage) -> Result<Option<LatestVersion>> {
        let url = self.package_url(&package.name);
        debug!(%url, "fetching packument");

        let response = self
            .agent
            .get(&url)
            .header("Accept", "application/vnd.npm.install-v1+json")
            .header(
                "User-Agent",
                &format!("{}/{}", crate::app::CLI_PACKAGE_NAME, crate::app::CLI_VERSION),
            )
            .call();

        let mut response = match response {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to fetch {}", url)),
        };
        let packument: Packument = response
            .body_mut()
            .read_json()
            .with_context(|| format!("failed to parse registry response for {}", package.name))?;

        Ok(resolve_latest(&packument, &package.version))
    }
}

impl LatestVersionLookup for NpmRegistry {
    fn latest_versions(
        &self,
        packages: &[InstalledPackage],
    ) -> Result<BTreeMap<String, LatestVersion>> {
        let results: Vec<Result<Option<LatestVersion>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = packages
                .iter()
                .map(|package| scope.spawn(move || self.fetch(package)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(anyhow!("version lookup thread panicked")))
                })
                .collect()
        });

        let mut latest = BTreeMap::new();
        for (package, result) in packages.iter().zip(results) {
            if let Some(info) = result? {
                latest.insert(package.name.clone(), info);
            }
        }
        Ok(latest)
    }
}

fn resolve_latest(packument: &Packument, current: &str) -> Option<LatestVersion> {
    let latest = packument.dist_tags.get("latest")?.clone();
    let wanted = max_satisfying(current, packument.versions.keys());
    Some(LatestVersion { latest, wanted })
}

/// Highest of `versions` within the caret range of `current`.
fn max_satisfying<'a>(
    current: &str,
    versions: impl Iterator<Item = &'a String>,
) -> Option<String> {
    let req = VersionReq::parse(&format!("^{}", current)).ok()?;
    versions
        .filter_map(|v| Version::parse(v).ok())
        .filter(|v| req.matches(v))
        .max()
        .map(|v| v.to_string())
}

/// Whether `latest` is a higher semver than `current`; `None` when either
/// does not parse.
pub fn is_newer(latest: &str, current: &str) -> Option<bool> {
    let latest = Version::parse(latest).ok()?;
    let current = Version::parse(current).ok()?;
    Some(latest > current)
}
