use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use ureq::Agent;

use crate::app::{CLI_PACKAGE_NAME, CRATES_IO_URL, NO_UPDATE_NOTIFIER_ENV};
use crate::npm::is_newer;

const CHECK_INTERVAL_HOURS: i64 = 24;

pub struct UpdateNotice {
    pub current: String,
    pub latest: String,
}

impl UpdateNotice {
    pub fn message(&self) -> String {
        format!(
            "Update available: {} {} -> {}\nRun `cargo install {}` to update.",
            CLI_PACKAGE_NAME, self.current, self.latest, CLI_PACKAGE_NAME
        )
    }
}

// --- State ---

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    update_check: Option<UpdateCheckState>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UpdateCheckState {
    last_checked: DateTime<Utc>,
    latest_version: String,
}

impl UpdateCheckState {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let interval = chrono::Duration::hours(CHECK_INTERVAL_HOURS);
        now.signed_duration_since(self.last_checked) >= interval
    }
}

/// TOML file remembering the last published version seen on crates.io.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    /// `state.toml` in the platform state directory, or the cache directory
    /// where there is none.
    pub fn default_location() -> Option<Self> {
        let proj = directories::ProjectDirs::from("", "", crate::app::BIN_NAME)?;
        let dir = proj
            .state_dir()
            .map(|d| d.to_path_buf())
            .unwrap_or_else(|| proj.cache_dir().to_path_buf());
        Some(Self::at(dir.join("state.toml")))
    }

    /// A missing or unreadable file counts as no previous check.
    fn load(&self) -> Option<UpdateCheckState> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match toml::from_str::<StateFile>(&contents) {
            Ok(state) => state.update_check,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "update check: ignoring bad state");
                None
            }
        }
    }

    fn save(&self, latest_version: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = StateFile {
            update_check: Some(UpdateCheckState {
                last_checked: now,
                latest_version: latest_version.to_string(),
            }),
        };
        let content = toml::to_string_pretty(&file)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

// --- Network ---

#[derive(Deserialize)]
struct CrateResponse {
    #[serde(rename = "crate")]
    krate: CrateInfo,
}

#[derive(Deserialize)]
struct CrateInfo {
    max_stable_version: String,
}

fn fetch_latest_version(crates_url: &str, current: &str) -> Option<String> {
    let url = format!("{}/{}", crates_url.trim_end_matches('/'), CLI_PACKAGE_NAME);
    debug!(%url, "update check: fetching");

    let config = Agent::config_builder()
        .timeout_global(Some(Duration::from_millis(500)))
        .build();
    let agent: Agent = config.into();

    let resp: CrateResponse = agent
        .get(&url)
        .header("User-Agent", &format!("{}/{}", CLI_PACKAGE_NAME, current))
        .call()
        .ok()?
        .body_mut()
        .read_json::<CrateResponse>()
        .ok()?;

    Some(resp.krate.max_stable_version)
}

// --- Public API ---

pub fn is_enabled() -> bool {
    std::env::var_os(NO_UPDATE_NOTIFIER_ENV).is_none()
}

/// Called after successful commands. Returns Some if an update is available.
/// Hits the network at most once per interval; every failure yields None.
pub fn check_for_update(current: &str) -> Option<UpdateNotice> {
    if !is_enabled() {
        debug!("update check: disabled by environment");
        return None;
    }
    let store = StateStore::default_location()?;
    pending_update(&store, CRATES_IO_URL, current, Utc::now())
}

fn pending_update(
    store: &StateStore,
    crates_url: &str,
    current: &str,
    now: DateTime<Utc>,
) -> Option<UpdateNotice> {
    let latest = match store.load() {
        Some(cached) if !cached.is_stale(now) => {
            debug!(latest = %cached.latest_version, "update check: cache fresh");
            cached.latest_version
        }
        _ => {
            debug!("update check: cache missing or stale, fetching");
            let latest = fetch_latest_version(crates_url, current)?;
            if let Err(e) = store.save(&latest, now) {
                debug!(error = %format!("{:#}", e), "update check: state not saved");
            }
            latest
        }
    };

    match is_newer(&latest, current) {
        Some(true) => Some(UpdateNotice {
            current: current.to_string(),
            latest,
        }),
        _ => None,
    }
}
