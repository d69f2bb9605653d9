use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EjectError {
    /// The user declined the confirmation prompt.
    #[error("Aborting eject")]
    Aborted,
    #[error("'eject' is not defined for command {0}")]
    NotEjectable(String),
    #[error("command {0} does not exist")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to scan installed packages in {}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
