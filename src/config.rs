//! Server and client configuration: an INI-like `key = value` reader (§6)
//! plus the client-side JSON sidecar describing bootstrap mirrors.
//!
//! The grammar here is small enough (five lines of actual logic: split on
//! the first `=`, trim, dispatch on the key) that pulling in a generic
//! `config`/`ini` crate would be the kind of needless dependency this corpus
//! avoids elsewhere; the original's own config reader is hand-rolled for the
//! same reason.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::request::limits;

/// Log verbosity, matching the five levels in §6's `log_level` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A single validation error, reported by field name so a caller can see
/// which key was at fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Parsed and validated server configuration (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub index_dir: PathBuf,
    pub methylome_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub log_level: LogLevel,
    pub n_threads: u32,
    pub max_resident: u32,
    pub min_bin_size: u32,
    pub max_intervals: u32,
    pub pid_file: Option<PathBuf>,
}

const KNOWN_KEYS: &[&str] = &[
    "hostname",
    "port",
    "index_dir",
    "methylome_dir",
    "log_file",
    "log_level",
    "n_threads",
    "max_resident",
    "min_bin_size",
    "max_intervals",
    "pid_file",
];

impl ServerConfig {
    /// Parse `key = value` lines; `#`-prefixed and blank lines are ignored.
    /// Unknown keys are a parse error at this stage, before validation.
    pub fn parse(contents: &str) -> Result<HashMap<String, String>, ConfigError> {
        let mut fields = HashMap::new();
        for (line_no, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError {
                    field: format!("line {}", line_no + 1),
                    message: format!("expected 'key = value', got: {raw_line:?}"),
                });
            };
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            if !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(ConfigError {
                    field: key,
                    message: "unknown configuration key".to_string(),
                });
            }
            fields.insert(key, value);
        }
        Ok(fields)
    }

    /// Parse and validate a complete server config from file contents.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let fields = Self::parse(contents)?;
        Self::from_fields(&fields)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError {
            field: "path".to_string(),
            message: e.to_string(),
        })?;
        Self::from_str(&contents)
    }

    fn from_fields(fields: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |key: &str| -> Result<String, ConfigError> {
            fields.get(key).cloned().ok_or_else(|| ConfigError {
                field: key.to_string(),
                message: "missing required key".to_string(),
            })
        };
        let parse_int = |key: &str, value: &str| -> Result<u32, ConfigError> {
            value.parse::<u32>().map_err(|_| ConfigError {
                field: key.to_string(),
                message: format!("expected an unsigned integer, got {value:?}"),
            })
        };

        let hostname = required("hostname")?;
        let port: u16 = required("port")?.parse().map_err(|_| ConfigError {
            field: "port".to_string(),
            message: "expected a u16 port number".to_string(),
        })?;
        let index_dir = PathBuf::from(required("index_dir")?);
        let methylome_dir = PathBuf::from(required("methylome_dir")?);
        let log_file = fields.get("log_file").map(PathBuf::from);
        let log_level = match fields.get("log_level") {
            Some(raw) => LogLevel::parse(raw).ok_or_else(|| ConfigError {
                field: "log_level".to_string(),
                message: format!("unrecognized log level {raw:?}"),
            })?,
            None => LogLevel::default(),
        };
        let n_threads = match fields.get("n_threads") {
            Some(raw) => parse_int("n_threads", raw)?,
            None => 1,
        };
        if !(1..=1024).contains(&n_threads) {
            return Err(ConfigError {
                field: "n_threads".to_string(),
                message: "must be in 1..=1024".to_string(),
            });
        }
        let max_resident = match fields.get("max_resident") {
            Some(raw) => parse_int("max_resident", raw)?,
            None => crate::methylome_set::DEFAULT_MAX_LIVE_METHYLOMES,
        };
        if !(1..=8192).contains(&max_resident) {
            return Err(ConfigError {
                field: "max_resident".to_string(),
                message: "must be in 1..=8192".to_string(),
            });
        }
        let min_bin_size = match fields.get("min_bin_size") {
            Some(raw) => parse_int("min_bin_size", raw)?,
            None => limits::min_bin_size(),
        };
        let max_intervals = match fields.get("max_intervals") {
            Some(raw) => parse_int("max_intervals", raw)?,
            None => limits::max_intervals(),
        };
        let pid_file = fields.get("pid_file").map(PathBuf::from);

        Ok(Self {
            hostname,
            port,
            index_dir,
            methylome_dir,
            log_file,
            log_level,
            n_threads,
            max_resident,
            min_bin_size,
            max_intervals,
            pid_file,
        })
    }

    /// Apply this config's limits to the process-wide atomics consulted by
    /// [`crate::request::Request::validate`]. Called once at server startup.
    pub fn install_limits(&self) {
        limits::set_max_intervals(self.max_intervals);
        limits::set_min_bin_size(self.min_bin_size);
    }

    /// Serialize back to the `key = value` form §6 describes, inverse of
    /// [`Self::from_str`] modulo comments and key ordering.
    #[must_use]
    pub fn to_ini_string(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("hostname = {}\n", self.hostname));
        s.push_str(&format!("port = {}\n", self.port));
        s.push_str(&format!("index_dir = {}\n", self.index_dir.display()));
        s.push_str(&format!("methylome_dir = {}\n", self.methylome_dir.display()));
        if let Some(log_file) = &self.log_file {
            s.push_str(&format!("log_file = {}\n", log_file.display()));
        }
        s.push_str(&format!("log_level = {}\n", self.log_level));
        s.push_str(&format!("n_threads = {}\n", self.n_threads));
        s.push_str(&format!("max_resident = {}\n", self.max_resident));
        s.push_str(&format!("min_bin_size = {}\n", self.min_bin_size));
        s.push_str(&format!("max_intervals = {}\n", self.max_intervals));
        if let Some(pid_file) = &self.pid_file {
            s.push_str(&format!("pid_file = {}\n", pid_file.display()));
        }
        s
    }
}

/// One bootstrap mirror entry, as carried in the client's `system_config`
/// JSON sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDataResource {
    pub hostname: String,
    pub port: u16,
    pub label: String,
}

/// System-wide metadata for the client: the set of known bootstrap mirrors,
/// read from a JSON sidecar under the client config directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub sources: Vec<RemoteDataResource>,
}

impl SystemConfig {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| ConfigError {
            field: "path".to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ConfigError {
            field: "system_config".to_string(),
            message: e.to_string(),
        })
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| ConfigError {
            field: "system_config".to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path.as_ref(), json).map_err(|e| ConfigError {
            field: "path".to_string(),
            message: e.to_string(),
        })
    }
}

/// Client-side configuration: where to connect, and where methylomes/indexes
/// live locally once downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub index_dir: Option<PathBuf>,
    pub methylome_dir: Option<PathBuf>,
    pub config_dir: PathBuf,
}

impl ClientConfig {
    /// Resolve the default config directory: `$HOME/.config/transferase`,
    /// matching the original's `HOME`-derived default (§6 "Environment").
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("transferase"))
    }

    #[must_use]
    pub fn new(config_dir: Option<PathBuf>) -> Option<Self> {
        let config_dir = config_dir.or_else(Self::default_config_dir)?;
        Some(Self {
            hostname: None,
            port: None,
            index_dir: None,
            methylome_dir: None,
            config_dir,
        })
    }

    #[must_use]
    pub fn system_config_path(&self) -> PathBuf {
        self.config_dir.join("system_config.json")
    }
}
