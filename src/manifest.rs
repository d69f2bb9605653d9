use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::app::MANIFEST_FILENAME;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub dojo: Option<CommandDeclaration>,
}

/// The `dojo` block of a package manifest, declaring which command the
/// package provides and which capabilities it implements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandDeclaration {
    pub group: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bin: Option<PathBuf>,
    #[serde(default)]
    pub eject: bool,
    #[serde(default)]
    pub validate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestInfo {
    pub name: String,
    pub version: String,
}

impl PackageManifest {
    pub fn read(package_dir: &Path) -> Result<PackageManifest> {
        let path = package_dir.join(MANIFEST_FILENAME);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read package manifest {}", path.display()))?;
        let manifest: PackageManifest = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse package manifest {}", path.display()))?;
        Ok(manifest)
    }
}

/// Reads the name and version of the package that owns `path`.
///
/// `path` may be the package directory or any file inside it; the nearest
/// ancestor holding a manifest wins. Returns `None` when the path does not
/// exist or no parseable manifest is found, which callers treat as "not an
/// installed package".
pub fn read_manifest(path: &Path) -> Option<ManifestInfo> {
    if !path.exists() {
        return None;
    }
    let start = if path.is_file() { path.parent()? } else { path };
    let package_dir = find_package_dir(start)?;
    let manifest = PackageManifest::read(&package_dir).ok()?;
    Some(ManifestInfo {
        name: manifest.name,
        version: manifest.version,
    })
}

fn find_package_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(MANIFEST_FILENAME).is_file())
        .map(Path::to_path_buf)
}

/// The directory of the project the CLI is operating on: the nearest
/// ancestor of `cwd` with a package manifest, or `cwd` itself.
pub fn project_root(cwd: &Path) -> PathBuf {
    find_package_dir(cwd).unwrap_or_else(|| cwd.to_path_buf())
}
