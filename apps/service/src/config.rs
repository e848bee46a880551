use std::collections::BTreeMap;
use std::time::Duration;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::dispatch::DispatchConfig;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: Telegram,
    pub storage: Storage,
    pub report: ReportSettings,
    pub probe: ProbeSettings,
    /// Server name -> address
    pub servers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Telegram {
    pub token: String,
    pub poll_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub interval_seconds: u64,
    pub fetch_timeout_seconds: u64,
    pub pacing_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub count: u32,
    pub timeout_seconds: u64,
}

impl Default for Telegram {
    fn default() -> Self {
        Self { token: String::new(), poll_timeout_seconds: 30 }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self { sqlite_path: "sqlite3.db".into() }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self { interval_seconds: 300, fetch_timeout_seconds: 5, pacing_millis: 100 }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self { count: 4, timeout_seconds: 10 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pingwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pingwatch/config.toml"))
}

/// Load `.env` (or `dotenv_path`), then install the tracing subscriber
///
/// The file is read first so `RUST_LOG` and `RUST_LOG_FORMAT` set there apply.
pub fn init_logging(dotenv_path: Option<&path::Path>) {
    let loaded = match dotenv_path {
        Some(path) => dotenvy::from_path(path).map(|_| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };

    logger::init_tracing();

    match loaded {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) => warn!(".env file not loaded: {}", e),
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let token = if self.telegram.token.is_empty() { "<unset>" } else { "<redacted>" };

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Telegram")?;
        write_1(f, "Token", &token)?;
        write_1(f, "Poll Timeout (s)", &self.telegram.poll_timeout_seconds)?;
        write_title_1(f, "Storage")?;
        write_1(f, "SQLite Path", &self.storage.sqlite_path)?;
        write_title_1(f, "Report")?;
        write_1(f, "Interval (s)", &self.report.interval_seconds)?;
        write_1(f, "Fetch Timeout (s)", &self.report.fetch_timeout_seconds)?;
        write_1(f, "Pacing (ms)", &self.report.pacing_millis)?;
        write_title_1(f, "Probe")?;
        write_1(f, "Count", &self.probe.count)?;
        write_1(f, "Timeout (s)", &self.probe.timeout_seconds)?;
        write_title_1(f, "Servers")?;
        for (name, address) in &self.servers {
            write_1(f, name, address)?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pingwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str()).map_err(|err| Error::ParseFailed(err.to_string()))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|err| Error::ParseFailed(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        std::fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply `TELEGRAM_BOT_TOKEN`, `SQLITE_PATH` and `SERVERS` from the environment
    pub fn apply_env(&mut self) -> Result<(), Error> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.token = token;
        }
        if let Some(path) = lookup("SQLITE_PATH").filter(|v| !v.is_empty()) {
            self.storage.sqlite_path = path;
        }
        if let Some(raw) = lookup("SERVERS").filter(|v| !v.trim().is_empty()) {
            self.servers = serde_json::from_str(&raw)
                .map_err(|e| Error::ParseFailed(format!("invalid SERVERS JSON: {}", e)))?;
        }
        Ok(())
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.telegram.token.trim().is_empty() {
            return Err(Error::Invalid("telegram token is required".into()));
        }
        if self.servers.is_empty() {
            return Err(Error::Invalid("at least one server is required".into()));
        }
        if let Some((name, _)) =
            self.servers.iter().find(|(name, address)| name.trim().is_empty() || address.trim().is_empty())
        {
            return Err(Error::Invalid(format!("server {:?} needs a non-empty name and address", name)));
        }
        // Each server renders as exactly one report line
        if let Some((name, _)) = self
            .servers
            .iter()
            .find(|(name, address)| name.chars().any(char::is_control) || address.chars().any(char::is_control))
        {
            return Err(Error::Invalid(format!("server {:?} contains control characters", name)));
        }
        if self.report.interval_seconds == 0 {
            return Err(Error::Invalid("report interval must be at least one second".into()));
        }
        if self.report.fetch_timeout_seconds == 0 {
            return Err(Error::Invalid("recipient fetch timeout must be at least one second".into()));
        }
        if self.probe.count == 0 {
            return Err(Error::Invalid("probe count must be at least one".into()));
        }
        if self.probe.timeout_seconds == 0 {
            return Err(Error::Invalid("probe timeout must be at least one second".into()));
        }
        if self.probe.timeout_seconds < u64::from(self.probe.count) {
            warn!(
                count = self.probe.count,
                timeout_seconds = self.probe.timeout_seconds,
                "Probe timeout is shorter than the ping run, reachable servers may be reported as timed out"
            );
        }
        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report.interval_seconds)
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            fetch_timeout: Duration::from_secs(self.report.fetch_timeout_seconds),
            pacing: Duration::from_millis(self.report.pacing_millis),
        }
    }
}
