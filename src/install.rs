use crate::{
    catalog::CatalogEntry,
    config::InstallerConfig,
    error::{CleanupError, ErrorKind, InstallError},
    resource::{Resource, ResourceFetcher},
    tasks::{TaskHandle, TaskLedger},
};
use anyhow::{bail, Context, Result};
use std::{
    env, fs,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
    sync::{mpsc, Arc},
    thread,
};
use tracing::{error, info, warn};

/// The external tool that actually builds and installs a package.
pub trait Installer: Send + Sync {
    fn install(&self, package: &str, icon_path: &Path) -> Result<()>;
}

impl<F> Installer for F
where
    F: Fn(&str, &Path) -> Result<()> + Send + Sync,
{
    fn install(&self, package: &str, icon_path: &Path) -> Result<()> {
        self(package, icon_path)
    }
}

/// Runs e.g. `fyne get -icon <icon> <package>`. The icon flag is left out when
/// no icon could be downloaded.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
    icon_flag: Option<String>,
}

impl CommandInstaller {
    pub fn from_config(config: &InstallerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            icon_flag: config.icon_flag.clone().filter(|flag| !flag.is_empty()),
        }
    }

    fn command_args(&self, package: &str, icon_path: &Path) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(flag) = &self.icon_flag {
            if !icon_path.as_os_str().is_empty() {
                args.push(flag.clone());
                args.push(icon_path.display().to_string());
            }
        }
        args.push(package.to_string());
        args
    }
}

impl Installer for CommandInstaller {
    fn install(&self, package: &str, icon_path: &Path) -> Result<()> {
        let output = Command::new(&self.program)
            .args(self.command_args(package, icon_path))
            .output()
            .with_context(|| format!("run {}", self.program))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let tail = tail[tail.len().saturating_sub(3)..].join("; ");
        if tail.is_empty() {
            bail!("{} exited with {}", self.program, output.status);
        }
        bail!("{} exited with {}: {tail}", self.program, output.status);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Started,
    IconAcquired,
    Delegated,
    Succeeded,
    Failed,
    CleanedUp,
}

#[derive(Debug)]
pub struct InstallReport {
    pub task_index: usize,
    pub stages: Vec<InstallStage>,
    pub outcome: Result<(), InstallError>,
    pub cleanup: Result<(), CleanupError>,
}

impl InstallReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub struct InstallOrchestrator {
    self_package: String,
    fetcher: ResourceFetcher,
    installer: Arc<dyn Installer>,
    ledger: Arc<TaskLedger>,
    temp_dir: PathBuf,
}

impl InstallOrchestrator {
    pub fn new(
        self_package: impl Into<String>,
        fetcher: ResourceFetcher,
        installer: Arc<dyn Installer>,
        ledger: Arc<TaskLedger>,
    ) -> Self {
        Self {
            self_package: self_package.into(),
            fetcher,
            installer,
            ledger,
            temp_dir: env::temp_dir(),
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Blocks until the installer returns and the temporary icon is gone.
    pub fn install(&self, entry: &CatalogEntry) -> Result<InstallReport, InstallError> {
        let task = self.begin(entry)?;
        Ok(self.run(task, entry))
    }

    /// Checks that the entry may be installed and queues its task. Call this on
    /// the dispatching thread so ledger order follows request order. A refusal
    /// creates no task.
    pub fn begin(&self, entry: &CatalogEntry) -> Result<TaskHandle, InstallError> {
        let package = entry.source.package.trim();
        if package.is_empty() {
            warn!("{} has no package to install", entry.id);
            return Err(InstallError::MissingPackage {
                id: entry.id.clone(),
            });
        }
        if package == self.self_package.trim() {
            warn!("refusing to overwrite the installer app ({package})");
            return Err(InstallError::SelfOverwrite {
                package: package.to_string(),
            });
        }
        Ok(self.ledger.append(format!("Queued {}", entry.name)))
    }

    /// Drives a queued task to completion. Everything after `begin` is reported
    /// through the returned `InstallReport`.
    pub fn run(&self, task: TaskHandle, entry: &CatalogEntry) -> InstallReport {
        let package = entry.source.package.trim();
        let mut stages = vec![InstallStage::Started];
        task.start(format!("Fetching icon for {}...", entry.name));
        info!("installing {} ({package})", entry.name);

        let icon_path = self.acquire_icon(&entry.icon);
        stages.push(InstallStage::IconAcquired);
        task.set_message(format!("Installing {}...", entry.name));

        stages.push(InstallStage::Delegated);
        let delegated = self
            .installer
            .install(package, icon_path.as_deref().unwrap_or_else(|| Path::new("")));
        let outcome = match delegated {
            Ok(()) => {
                info!("installed {} ({package})", entry.name);
                task.finish(format!("Installed {}", entry.name));
                stages.push(InstallStage::Succeeded);
                Ok(())
            }
            Err(err) => {
                let reason = format!("{err:#}");
                error!("install of {package} failed: {reason}");
                task.fail(
                    ErrorKind::Install,
                    format!("Failed to install {}: {reason}", entry.name),
                );
                stages.push(InstallStage::Failed);
                Err(InstallError::Delegate {
                    package: package.to_string(),
                    reason,
                })
            }
        };

        let cleanup = remove_icon(icon_path.as_deref());
        if let Err(err) = &cleanup {
            warn!("{err}");
            if outcome.is_ok() {
                task.fail(
                    ErrorKind::Cleanup,
                    format!("Installed {}, but {err}", entry.name),
                );
            }
        }
        stages.push(InstallStage::CleanedUp);

        InstallReport {
            task_index: task.index(),
            stages,
            outcome,
            cleanup,
        }
    }

    /// Downloads the icon into a temp file on a worker thread. `None` when the
    /// entry has no icon or it could not be fetched or written.
    fn acquire_icon(&self, url: &str) -> Option<PathBuf> {
        let (tx, rx) = mpsc::sync_channel(1);
        let fetcher = self.fetcher.clone();
        let url = url.to_string();
        let dir = self.temp_dir.clone();
        thread::spawn(move || {
            let path = match fetcher.fetch(&url) {
                Ok(Some(icon)) => write_temp_icon(&dir, &icon)
                    .map_err(|err| error!("failed to write temporary icon: {err:#}"))
                    .ok(),
                Ok(None) => None,
                Err(err) => {
                    error!("failed to access icon url {url}: {err}");
                    None
                }
            };
            let _ = tx.send(path);
        });
        rx.recv().ok().flatten()
    }
}

fn write_temp_icon(dir: &Path, icon: &Resource) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("appshelf-icon-")
        .suffix(".png")
        .tempfile_in(dir)
        .context("create temporary icon file")?;
    file.write_all(&icon.bytes).context("write temporary icon")?;
    let (_, path) = file.keep().context("keep temporary icon")?;
    Ok(path)
}

fn remove_icon(path: Option<&Path>) -> Result<(), CleanupError> {
    let Some(path) = path else {
        return Ok(());
    };
    fs::remove_file(path).map_err(|source| CleanupError {
        path: path.to_path_buf(),
        source,
    })
}
