use anyhow::{bail, Result};
use std::path::{Component, Path, PathBuf};

use crate::app::EJECT_DIR;

/// Directory that receives the files ejected by the command with `key`.
pub fn eject_dir(project_root: &Path, key: &str) -> PathBuf {
    project_root.join(EJECT_DIR).join(key)
}

/// Joins a plugin-supplied relative `entry` onto `dest_dir`. Absolute
/// entries, `..` and empty entries are rejected so the result always stays
/// below `dest_dir`.
pub fn namespaced(dest_dir: &Path, entry: &str) -> Result<PathBuf> {
    let mut path = dest_dir.to_path_buf();
    let mut depth = 0;
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(part) => {
                path.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!(
                    "refusing to copy to {:?}: destinations must be relative paths inside {}",
                    entry,
                    dest_dir.display()
                );
            }
        }
    }
    if depth == 0 {
        bail!("empty copy destination for {}", dest_dir.display());
    }
    Ok(path)
}

/// Resolves `entry` against the copy base, which is itself relative to the
/// package directory unless absolute.
pub fn resolve_source(package_dir: &Path, base: &str, entry: &str) -> PathBuf {
    package_dir.join(base).join(entry)
}

/// `path` shown relative to the project root with a leading `./`, or as-is
/// when it lives elsewhere.
pub fn display_relative(project_root: &Path, path: &Path) -> String {
    match path.strip_prefix(project_root) {
        Ok(rel) => format!("./{}", rel.display()),
        Err(_) => path.display().to_string(),
    }
}
