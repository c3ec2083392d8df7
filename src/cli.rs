use crate::{
    catalog::{Catalog, CatalogEntry},
    config::{self, AppConfig},
    error::InstallError,
    http::{HttpClient, UreqClient},
    install::{CommandInstaller, InstallOrchestrator, InstallReport},
    resource::{DetailImages, Resource, ResourceFetcher},
    source::CatalogSource,
    tasks::{TaskLedger, TaskSnapshot},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::Level;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

#[derive(Debug, PartialEq, Eq)]
struct GlobalOptions {
    format: OutputFormat,
    verbosity: Verbosity,
    offline: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    List { filter: Option<String> },
    Show(String),
    Icon { id: String, out: Option<PathBuf> },
    Install(Vec<String>),
    Config,
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("appshelf v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let config = AppConfig::load_or_create()?;
            init_logging(&config, global.verbosity);
            let session = Session::new(config, global);
            session.run(command)
        }
    }
}

fn init_logging(config: &AppConfig, verbosity: Verbosity) {
    let level = match verbosity {
        Verbosity::Quiet => Level::ERROR,
        Verbosity::Verbose => Level::DEBUG,
        Verbosity::Normal => config.log_level.parse().unwrap_or(Level::INFO),
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn parse_args(args: &[String]) -> Result<(GlobalOptions, CliCommand)> {
    let (global, tokens) = parse_global_options(args)?;
    let Some(head) = tokens.first() else {
        return Ok((global, CliCommand::Help));
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "--help" | "-h" | "help" => CliCommand::Help,
        "--version" | "-V" | "version" => CliCommand::Version,
        "list" | "ls" => parse_list(rest)?,
        "show" => {
            let id = rest
                .first()
                .ok_or_else(|| anyhow::anyhow!("show requires an app id"))?;
            CliCommand::Show(id.to_string())
        }
        "icon" => parse_icon(rest)?,
        "install" => {
            if rest.is_empty() {
                bail!("install requires one or more app ids");
            }
            CliCommand::Install(rest.to_vec())
        }
        "config" => CliCommand::Config,
        other => bail!("Unknown command: {other} (see 'appshelf help')"),
    };
    Ok((global, command))
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut verbosity = Verbosity::Normal;
    let mut offline = false;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = OutputFormat::parse(value)
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {value}"))?;
            continue;
        }
        match arg.as_str() {
            "--format" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--format requires a value"))?;
                format = OutputFormat::parse(value)
                    .ok_or_else(|| anyhow::anyhow!("Unknown format: {value}"))?;
            }
            "-v" | "--verbose" => verbosity = Verbosity::Verbose,
            "-q" | "--quiet" => verbosity = Verbosity::Quiet,
            "--offline" => offline = true,
            _ => tokens.push(arg.to_string()),
        }
    }

    Ok((
        GlobalOptions {
            format,
            verbosity,
            offline,
        },
        tokens,
    ))
}

fn parse_list(args: &[String]) -> Result<CliCommand> {
    let mut filter = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--filter" => {
                if let Some(value) = iter.next() {
                    filter = Some(value.to_string());
                } else {
                    bail!("--filter requires a value");
                }
            }
            value if value.starts_with("--filter=") => {
                filter = Some(value.trim_start_matches("--filter=").to_string());
            }
            other => bail!("Unexpected argument: {other}"),
        }
    }
    Ok(CliCommand::List { filter })
}

fn parse_icon(args: &[String]) -> Result<CliCommand> {
    let mut id = None;
    let mut out = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--out" | "-o" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--out requires a path"))?;
                out = Some(PathBuf::from(value));
            }
            value if id.is_none() => id = Some(value.to_string()),
            other => bail!("Unexpected argument: {other}"),
        }
    }
    let id = id.ok_or_else(|| anyhow::anyhow!("icon requires an app id"))?;
    Ok(CliCommand::Icon { id, out })
}

struct Session {
    config: AppConfig,
    global: GlobalOptions,
    client: Arc<dyn HttpClient>,
}

impl Session {
    fn new(config: AppConfig, global: GlobalOptions) -> Self {
        Self {
            config,
            global,
            client: Arc::new(UreqClient),
        }
    }

    fn run(&self, command: CliCommand) -> Result<()> {
        match command {
            CliCommand::List { filter } => self.list(filter.as_deref()),
            CliCommand::Show(id) => self.show(&id),
            CliCommand::Icon { id, out } => self.icon(&id, out),
            CliCommand::Install(ids) => self.install(&ids),
            CliCommand::Config => self.print_config(),
            CliCommand::Help | CliCommand::Version => Ok(()),
        }
    }

    fn load_catalog(&self) -> Result<Catalog> {
        let source = CatalogSource::new(
            Arc::clone(&self.client),
            self.config.catalog_url.clone(),
            self.config.cache_path.clone(),
        );
        let compat = self.config.compatibility();
        let catalog = if self.global.offline {
            source.load_cached_catalog(&compat)
        } else {
            source.load_catalog(self.config.catalog_timeout(), &compat)
        };
        catalog.context("load app catalog")
    }

    fn fetcher(&self) -> ResourceFetcher {
        ResourceFetcher::new(Arc::clone(&self.client))
    }

    fn list(&self, filter: Option<&str>) -> Result<()> {
        let catalog = self.load_catalog()?;
        let needle = filter.map(str::to_lowercase);
        let entries: Vec<&CatalogEntry> = catalog
            .entries()
            .iter()
            .filter(|entry| match &needle {
                Some(needle) => {
                    entry.name.to_lowercase().contains(needle)
                        || entry.summary.to_lowercase().contains(needle)
                }
                None => true,
            })
            .collect();

        match self.global.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
            OutputFormat::Text => {
                for line in list_lines(&catalog, &entries, filter) {
                    println!("{line}");
                }
            }
        }
        Ok(())
    }

    fn show(&self, id: &str) -> Result<()> {
        let catalog = self.load_catalog()?;
        let entry = find_entry(&catalog, id)?;
        let images = DetailImages::request(&self.fetcher(), entry).resolve();
        let detail = entry.detail();

        match self.global.format {
            OutputFormat::Json => {
                #[derive(Serialize)]
                struct ShowOutput<'a> {
                    #[serde(flatten)]
                    detail: &'a crate::catalog::EntryDetail,
                    icon: String,
                    screenshot: Option<String>,
                }
                let output = ShowOutput {
                    detail: &detail,
                    icon: images.icon.label(),
                    screenshot: images.screenshot.as_ref().map(|shot| shot.name.clone()),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                println!("Name: {}", detail.name);
                println!("Developer: {}", detail.developer);
                println!("Website: {}", detail.website_host);
                println!("Summary: {}", detail.summary);
                println!("Date: {}   Version: {}", detail.date, detail.version);
                println!("Package: {}", detail.package);
                println!("Icon: {}", images.icon.label());
                match &images.screenshot {
                    Some(shot) => println!("Screenshot: {} ({} bytes)", shot.name, shot.bytes.len()),
                    None => println!("Screenshot: none"),
                }
            }
        }
        Ok(())
    }

    fn icon(&self, id: &str, out: Option<PathBuf>) -> Result<()> {
        let catalog = self.load_catalog()?;
        let entry = find_entry(&catalog, id)?;
        let Some(icon) = self.fetcher().fetch_with_fallback(&entry.icon, &Resource::warning())
        else {
            println!("{} has no icon", entry.name);
            return Ok(());
        };
        let path = out.unwrap_or_else(|| icon_output_path(entry, &icon));
        fs::write(&path, &icon.bytes).with_context(|| format!("write {}", path.display()))?;
        println!("Saved {} ({} bytes)", path.display(), icon.bytes.len());
        Ok(())
    }

    fn install(&self, ids: &[String]) -> Result<()> {
        let catalog = self.load_catalog()?;
        let entries = ids
            .iter()
            .map(|id| find_entry(&catalog, id).cloned())
            .collect::<Result<Vec<_>>>()?;

        let ledger = TaskLedger::new();
        let orchestrator = Arc::new(InstallOrchestrator::new(
            self.config.self_package.clone(),
            self.fetcher(),
            Arc::new(CommandInstaller::from_config(&self.config.installer)),
            Arc::clone(&ledger),
        ));

        // Tasks are queued here, one entry at a time, so ledger order is request order.
        let workers: Vec<(CatalogEntry, Result<JoinHandle<InstallReport>, InstallError>)> = entries
            .into_iter()
            .map(|entry| {
                let worker = orchestrator.begin(&entry).map(|task| {
                    let orchestrator = Arc::clone(&orchestrator);
                    let worker_entry = entry.clone();
                    thread::spawn(move || orchestrator.run(task, &worker_entry))
                });
                (entry, worker)
            })
            .collect();

        let mut shown = Vec::new();
        loop {
            let finished = workers
                .iter()
                .all(|(_, worker)| worker.as_ref().map_or(true, JoinHandle::is_finished));
            if ledger.consume_dirty() && self.global.format == OutputFormat::Text {
                render_tasks(&ledger, &mut shown);
            }
            if finished {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        let mut summaries = Vec::new();
        for (entry, worker) in workers {
            let result = match worker {
                Err(err) => Err(err),
                Ok(handle) => match handle.join() {
                    Ok(report) => Ok(report),
                    Err(_) => bail!("install worker for {} panicked", entry.id),
                },
            };
            summaries.push(InstallSummary::new(&entry, result));
        }

        match self.global.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
            OutputFormat::Text => {
                for summary in &summaries {
                    summary.print();
                }
            }
        }

        let failed = summaries.iter().filter(|s| s.status != "installed").count();
        if failed > 0 {
            bail!("{failed} of {} install(s) did not succeed", summaries.len());
        }
        Ok(())
    }

    fn print_config(&self) -> Result<()> {
        let path = config::config_path()?;
        match self.global.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&self.config)?),
            OutputFormat::Text => {
                println!("Config file: {}", path.display());
                println!("Catalog URL: {}", self.config.catalog_url);
                println!("Cache file: {}", self.config.cache_path.display());
                println!(
                    "HTTP timeout: {} ({:?})",
                    self.config.http_timeout,
                    self.config.catalog_timeout()
                );
                println!("Window: {}x{}", self.config.window_x, self.config.window_y);
                println!("Self package: {}", self.config.self_package);
                println!("Compatibility: {}", self.config.compatibility.join(", "));
                let installer = &self.config.installer;
                println!(
                    "Installer: {} {} {}",
                    installer.program,
                    installer.args.join(" "),
                    installer.icon_flag.as_deref().unwrap_or("")
                );
            }
        }
        Ok(())
    }
}

fn find_entry<'a>(catalog: &'a Catalog, id: &str) -> Result<&'a CatalogEntry> {
    catalog
        .find(id)
        .or_else(|| catalog.entries().iter().find(|entry| entry.name == id))
        .ok_or_else(|| anyhow::anyhow!("Unknown app: {id}"))
}

fn list_lines(catalog: &Catalog, entries: &[&CatalogEntry], filter: Option<&str>) -> Vec<String> {
    if catalog.is_empty() {
        return vec!["No apps available".to_string()];
    }
    if entries.is_empty() {
        return vec![format!("No apps match \"{}\"", filter.unwrap_or_default())];
    }
    entries
        .iter()
        .map(|entry| {
            format!(
                "{name:<28} {version:<8} {id}",
                name = entry.name,
                version = entry.version,
                id = entry.id
            )
        })
        .collect()
}

/// The URL basename when it is a usable file name, otherwise `<id>.png`.
fn icon_output_path(entry: &CatalogEntry, icon: &Resource) -> PathBuf {
    let name = icon.name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(&['/', '\\'][..]) {
        let stem: String = entry
            .id
            .chars()
            .map(|ch| if matches!(ch, '/' | '\\') { '_' } else { ch })
            .collect();
        return PathBuf::from(format!("{stem}.png"));
    }
    PathBuf::from(name)
}

/// Prints every task whose snapshot differs from what was last shown.
fn render_tasks(ledger: &TaskLedger, shown: &mut Vec<Option<TaskSnapshot>>) {
    if ledger.is_empty() {
        return;
    }
    let len = ledger.len();
    shown.resize(len, None);
    for (index, last) in shown.iter_mut().enumerate() {
        let Some(snapshot) = ledger.get(index) else {
            continue;
        };
        if last.as_ref() == Some(&snapshot) {
            continue;
        }
        println!("{}", task_line(index, &snapshot));
        *last = Some(snapshot);
    }
}

fn task_line(index: usize, task: &TaskSnapshot) -> String {
    let status = match (task.running, task.error) {
        (true, _) => "..".to_string(),
        (false, None) => "ok".to_string(),
        (false, Some(kind)) => format!("!! {}", kind.label()),
    };
    format!("[{:>2}] {status:<12} {}", index + 1, task.message)
}

#[derive(Serialize)]
struct InstallSummary {
    id: String,
    name: String,
    task: Option<usize>,
    status: &'static str,
    error: Option<String>,
    cleanup_error: Option<String>,
}

impl InstallSummary {
    fn new(entry: &CatalogEntry, result: Result<InstallReport, InstallError>) -> Self {
        let (task, status, error, cleanup_error) = match result {
            Err(err @ InstallError::SelfOverwrite { .. }) => {
                (None, "refused", Some(err.to_string()), None)
            }
            Err(err) => (None, "skipped", Some(err.to_string()), None),
            Ok(report) => {
                let status = if report.succeeded() { "installed" } else { "failed" };
                let error = report.outcome.as_ref().err().map(ToString::to_string);
                let cleanup_error = report.cleanup.as_ref().err().map(ToString::to_string);
                (Some(report.task_index), status, error, cleanup_error)
            }
        };
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            task,
            status,
            error,
            cleanup_error,
        }
    }

    fn print(&self) {
        match (self.status, &self.error) {
            ("installed", _) => println!("Installed: {} was installed successfully", self.name),
            ("refused", Some(error)) => println!("System app: {error}"),
            (_, Some(error)) => println!("Error: {error}"),
            (_, None) => println!("Error: {} did not install", self.name),
        }
        if let Some(cleanup) = &self.cleanup_error {
            println!("Error: {cleanup}");
        }
    }
}

fn print_help() {
    println!("appshelf v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  appshelf list [--filter <text>]     List available apps");
    println!("  appshelf show <id>                  Show app details and load its images");
    println!("  appshelf icon <id> [--out <path>]   Save an app icon");
    println!("  appshelf install <id>...            Install one or more apps");
    println!("  appshelf config                     Show the effective configuration");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                Output format");
    println!("  --offline                           Use the cached catalog only");
    println!("  -v, --verbose                       Debug logging");
    println!("  -q, --quiet                         Errors only");
    println!("  -h, --help                          Show help");
    println!("  -V, --version                       Show version");
}
