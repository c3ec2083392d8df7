use crate::{catalog, source};
use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(1);
pub const SELF_PACKAGE: &str = "fyne.io/apps";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_http_timeout")]
    pub http_timeout: String,
    #[serde(default = "default_window_x")]
    pub window_x: u32,
    #[serde(default = "default_window_y")]
    pub window_y: u32,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_self_package")]
    pub self_package: String,
    #[serde(default = "catalog::default_requirements")]
    pub compatibility: Vec<String>,
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub icon_flag: Option<String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            program: "fyne".to_string(),
            args: vec!["get".to_string()],
            icon_flag: Some("-icon".to_string()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_timeout: default_http_timeout(),
            window_x: default_window_x(),
            window_y: default_window_y(),
            catalog_url: default_catalog_url(),
            cache_path: default_cache_path(),
            self_package: default_self_package(),
            compatibility: catalog::default_requirements(),
            installer: InstallerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let path = config_path()?;
        Self::load_or_create_at(&path)
    }

    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path).context("read app config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            return Ok(config);
        }

        let config = AppConfig::default();
        config.save_to(path)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create app config dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    /// Catalog timeout from the `http_timeout` preference, one second if it does not parse.
    pub fn catalog_timeout(&self) -> Duration {
        match parse_duration(&self.http_timeout) {
            Ok(timeout) => timeout,
            Err(err) => {
                warn!("failed to parse settings http-timeout, falling back to 1 second: {err:#}");
                DEFAULT_HTTP_TIMEOUT
            }
        }
    }

    pub fn compatibility(&self) -> catalog::Compatibility {
        catalog::Compatibility::new(&self.compatibility)
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(base_data_dir()?.join("config.json"))
}

/// Go-style duration strings: `300ms`, `1.5s`, `1m30s`, `2h`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let value = raw.trim();
    if value.is_empty() {
        bail!("empty duration");
    }
    if value == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos: u128 = 0;
    let mut rest = value;
    while !rest.is_empty() {
        let number_len = rest
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            bail!("invalid duration {raw:?}");
        }
        let number = &rest[..number_len];
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|ch: char| ch.is_ascii_digit() || ch == '.')
            .unwrap_or(rest.len());
        let unit_nanos: u128 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            "" => bail!("missing unit in duration {raw:?}"),
            unit => bail!("unknown unit {unit:?} in duration {raw:?}"),
        };
        rest = &rest[unit_len..];

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            bail!("invalid duration {raw:?}");
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .with_context(|| format!("invalid duration {raw:?}"))?
        };
        let mut part = whole.saturating_mul(unit_nanos);
        if !fraction.is_empty() {
            let digits = fraction.len().min(18) as u32;
            let fraction: u128 = fraction[..digits as usize]
                .parse()
                .with_context(|| format!("invalid duration {raw:?}"))?;
            part = part.saturating_add(fraction * unit_nanos / 10u128.pow(digits));
        }
        total_nanos = total_nanos.saturating_add(part);
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000)
        .with_context(|| format!("duration out of range {raw:?}"))?;
    Ok(Duration::new(secs, (total_nanos % 1_000_000_000) as u32))
}

fn default_http_timeout() -> String {
    "1s".to_string()
}

fn default_window_x() -> u32 {
    800
}

fn default_window_y() -> u32 {
    600
}

fn default_catalog_url() -> String {
    source::CATALOG_URL.to_string()
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(source::CACHE_PATH)
}

fn default_self_package() -> String {
    SELF_PACKAGE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("appshelf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_go_durations() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_bad_durations() {
        for raw in ["", "5", "s", "10 parsecs", "1x", "-1s"] {
            assert!(parse_duration(raw).is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn bad_timeout_falls_back_to_one_second() {
        let config = AppConfig {
            http_timeout: "soon".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.catalog_timeout(), DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn creates_then_reloads_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let created = AppConfig::load_or_create_at(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.self_package, SELF_PACKAGE);

        let mut edited = created.clone();
        edited.http_timeout = "5s".to_string();
        edited.save_to(&path).unwrap();
        let reloaded = AppConfig::load_or_create_at(&path).unwrap();
        assert_eq!(reloaded.catalog_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"http_timeout":"2s","window_x":1024}"#).unwrap();
        let config = AppConfig::load_or_create_at(&path).unwrap();
        assert_eq!(config.window_x, 1024);
        assert_eq!(config.window_y, 600);
        assert_eq!(config.installer.program, "fyne");
        assert!(config.compatibility().allows(""));
    }
}
