use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_RPC_HOST: &str = "localhost";
pub const DEFAULT_RPC_PORT: u16 = 8334;
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_STORE_URL: &str = "http://localhost:5984";
pub const DEFAULT_STORE_DB: &str = "bit";
pub const DEFAULT_NODE_RPS: u32 = 50;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid settings file {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Connection details for the node's JSON-RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRpcConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl Default for NodeRpcConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            user: String::new(),
            pass: String::new(),
        }
    }
}

impl NodeRpcConfig {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Where the winning node configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit,
    SettingsFile(PathBuf),
    NodeConfFile(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Explicit => write!(f, "explicit"),
            ConfigSource::SettingsFile(path) => write!(f, "settings file {}", path.display()),
            ConfigSource::NodeConfFile(path) => write!(f, "node config {}", path.display()),
            ConfigSource::Defaults => write!(f, "defaults"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNodeConfig {
    pub config: NodeRpcConfig,
    pub source: ConfigSource,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

#[derive(Deserialize)]
struct SettingsFile {
    host: Option<String>,
    port: Option<PortValue>,
    user: Option<String>,
    pass: Option<String>,
}

/// Resolves node RPC settings.
///
/// Layers, first match wins:
/// 1. `explicit` (built from CLI flags)
/// 2. the local JSON settings file
/// 3. the node's own `key=value` config file
/// 4. built-in defaults (`localhost:8334`, empty credentials)
///
/// A missing or unreadable file falls through to the next layer. A file that exists but
/// cannot be parsed is an error.
pub fn resolve_node_config(
    explicit: Option<NodeRpcConfig>,
    settings_path: &Path,
    node_conf_path: Option<&Path>,
) -> Result<ResolvedNodeConfig, ConfigError> {
    if let Some(config) = explicit {
        return Ok(ResolvedNodeConfig {
            config,
            source: ConfigSource::Explicit,
        });
    }

    if let Some(contents) = read_optional(settings_path) {
        let config = parse_settings_file(settings_path, &contents)?;
        return Ok(ResolvedNodeConfig {
            config,
            source: ConfigSource::SettingsFile(settings_path.to_path_buf()),
        });
    }

    if let Some(path) = node_conf_path {
        if let Some(contents) = read_optional(path) {
            let config = parse_node_conf(&contents)?;
            return Ok(ResolvedNodeConfig {
                config,
                source: ConfigSource::NodeConfFile(path.to_path_buf()),
            });
        }
    }

    Ok(ResolvedNodeConfig {
        config: NodeRpcConfig::default(),
        source: ConfigSource::Defaults,
    })
}

/// Location of the node's config file under the current user's home directory.
pub fn default_node_conf_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| PathBuf::from(home).join(".namecoin").join("namecoin.conf"))
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(
                event = "config_file_unreadable",
                path = %path.display(),
                error = %err,
                "skipping unreadable config file"
            );
            None
        }
    }
}

fn parse_settings_file(path: &Path, contents: &str) -> Result<NodeRpcConfig, ConfigError> {
    let settings: SettingsFile =
        serde_json::from_str(contents).map_err(|source| ConfigError::Settings {
            path: path.to_path_buf(),
            source,
        })?;

    let mut config = NodeRpcConfig::default();
    if let Some(host) = settings.host {
        config.host = host;
    }
    match settings.port {
        Some(PortValue::Number(port)) => config.port = port,
        Some(PortValue::Text(raw)) => config.port = parse_port("port", &raw)?,
        None => {}
    }
    if let Some(user) = settings.user {
        config.user = user;
    }
    if let Some(pass) = settings.pass {
        config.pass = pass;
    }
    Ok(config)
}

/// Parses the subset of a namecoind config file needed to reach its RPC server.
pub fn parse_node_conf(contents: &str) -> Result<NodeRpcConfig, ConfigError> {
    let mut config = NodeRpcConfig::default();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "host" | "rpcconnect" => config.host = value.to_string(),
            "rpcport" => config.port = parse_port("rpcport", value)?,
            "rpcuser" => config.user = value.to_string(),
            "rpcpassword" => config.pass = value.to_string(),
            _ => {}
        }
    }

    Ok(config)
}

fn parse_port(key: &str, raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        })
}

/// Store and runtime settings read from the environment.
pub struct Config {
    /// CouchDB server URL. Default: `http://localhost:5984`
    pub store_url: String,
    /// Default: `bit`
    pub store_db: String,
    /// Node request budget. Default: 50
    pub node_rps: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_url = env::var("STORE_URL").unwrap_or_else(|_| DEFAULT_STORE_URL.to_string());
        let store_db = env::var("STORE_DB").unwrap_or_else(|_| DEFAULT_STORE_DB.to_string());

        let node_rps = match env::var("NODE_RPS") {
            Ok(val) => val
                .parse::<u32>()
                .ok()
                .filter(|rps| *rps > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "NODE_RPS".to_string(),
                    value: val,
                })?,
            Err(_) => DEFAULT_NODE_RPS,
        };

        Ok(Self {
            store_url,
            store_db,
            node_rps,
        })
    }
}
