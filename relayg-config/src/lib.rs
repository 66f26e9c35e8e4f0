//! The declarative source model: what operators write, before the engine
//! reworks it into gateway-facing entities. Loaded from a snapshot file in
//! json, yaml, or toml form, chosen by extension.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported snapshot format: {path}")]
    UnsupportedFormat { path: PathBuf },
}

/// A complete desired-state document for one sync invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub ssls: Vec<Ssl>,
    /// Plugin name to config. Ordered so repeated loads enumerate rules the
    /// same way.
    #[serde(default)]
    pub global_rules: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub plugins: HashMap<String, Value>,
    /// The service's own upstream. Required by the transfer.
    #[serde(default)]
    pub upstream: Option<Upstream>,
    /// Named sibling upstreams published as standalone entities.
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub plugins: HashMap<String, Value>,
    #[serde(default)]
    pub timeout: Option<Timeout>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(default)]
    pub nodes: Vec<UpstreamNode>,
    #[serde(rename = "type", default)]
    pub lb_type: String,
    #[serde(default)]
    pub hash_on: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub pass_host: String,
    #[serde(default)]
    pub upstream_host: String,
    #[serde(default)]
    pub retries: Option<i64>,
    #[serde(default)]
    pub retry_timeout: Option<i64>,
    #[serde(default)]
    pub timeout: Option<Timeout>,
    #[serde(default)]
    pub checks: Option<HealthCheck>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamNode {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
    #[serde(default)]
    pub connect: u32,
    #[serde(default)]
    pub send: u32,
    #[serde(default)]
    pub read: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub active: Option<ActiveCheck>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveCheck {
    #[serde(rename = "type", default)]
    pub check_type: String,
    #[serde(default)]
    pub timeout: u32,
    #[serde(default)]
    pub http_path: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub https_verify_cert: bool,
    #[serde(default)]
    pub req_headers: Vec<String>,
    #[serde(default)]
    pub healthy: Health,
    #[serde(default)]
    pub unhealthy: Unhealthy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub interval: u32,
    #[serde(default)]
    pub http_statuses: Vec<u32>,
    #[serde(default)]
    pub successes: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unhealthy {
    #[serde(default)]
    pub http_failures: u32,
    #[serde(default)]
    pub tcp_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslType {
    Server,
    Client,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ssl {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(rename = "type", default)]
    pub ssl_type: Option<SslType>,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
    #[serde(default)]
    pub snis: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub key: String,
}

/// Read and parse a snapshot file; the extension selects the format.
pub fn load_snapshot(path: &Path) -> Result<Snapshot, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    match ext {
        "json" => serde_json::from_str(&content).map_err(|err| parse_error(path, err)),
        "yaml" | "yml" => serde_yml::from_str(&content).map_err(|err| parse_error(path, err)),
        "toml" => toml::from_str(&content).map_err(|err| parse_error(path, err)),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

fn parse_error(path: &Path, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
