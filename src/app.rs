pub const BIN_NAME: &str = "dojo";
pub const CLI_PACKAGE_NAME: &str = env!("CARGO_PKG_NAME");
pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path recorded for commands compiled into the dispatcher itself. Never a
/// real filesystem location.
pub const BUILTIN_PATH: &str = "<builtin>";

pub const CONFIG_FILENAME: &str = ".dojorc";
pub const MANIFEST_FILENAME: &str = "package.json";
pub const EJECT_DIR: &str = "config";

/// Directory name prefixes that mark an installed package as a command candidate.
pub const PLUGIN_PREFIX: &str = "dojo-cli-";
pub const PLUGIN_SCOPE: &str = "@dojo";
pub const SCOPED_PLUGIN_PREFIX: &str = "cli-";

pub const NPM_REGISTRY_URL: &str = "https://registry.npmjs.org";
pub const CRATES_IO_URL: &str = "https://crates.io/api/v1/crates";

pub const PLUGIN_PATH_ENV: &str = "DOJO_PLUGIN_PATH";
pub const REGISTRY_ENV: &str = "DOJO_NPM_REGISTRY";
pub const NO_UPDATE_NOTIFIER_ENV: &str = "DOJO_NO_UPDATE_NOTIFIER";
pub const LOG_ENV: &str = "DOJO_LOG";
pub const COMMAND_CONFIG_ENV: &str = "DOJO_COMMAND_CONFIG";
