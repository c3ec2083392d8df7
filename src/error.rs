use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("read response from {url}: {source}")]
    Read {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("fetch of {url} stopped before producing a result")]
    Interrupted { url: String },
}

#[derive(Debug, Error)]
#[error("cached catalog not available at {}: {source}", .path.display())]
pub struct NotFoundError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
#[error("malformed catalog: {0}")]
pub struct ParseError(#[from] pub serde_json::Error);

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("catalog unavailable (live: {live}; cache: {cached})")]
    Unavailable {
        live: NetworkError,
        cached: NotFoundError,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("cannot overwrite the installer app ({package})")]
    SelfOverwrite { package: String },
    #[error("{id} does not publish a package to install")]
    MissingPackage { id: String },
    #[error("install of {package} failed: {reason}")]
    Delegate { package: String, reason: String },
}

#[derive(Debug, Error)]
#[error("remove temporary icon {}: {source}", .path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Failure category recorded on a task, readable by the renderer without the
/// full error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Install,
    Cleanup,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Install => "install",
            ErrorKind::Cleanup => "cleanup",
        }
    }
}
