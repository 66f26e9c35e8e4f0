use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{is_false, is_zero_u32, Metadata, Object, Resource, ResourceKind, Timeout};
use crate::error::CoreError;

static NODE_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._\-:]+$").unwrap());

/// Load-balancing algorithm for an upstream.
///
/// Source values `least_conn` and `ewma` have no downstream equivalent and
/// normalize to round-robin, as does anything unrecognized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionType {
    #[default]
    RoundRobin,
    Random,
    Fnv,
    Ketama,
}

impl SelectionType {
    pub fn from_source(value: &str) -> Self {
        match value {
            "roundrobin" => SelectionType::RoundRobin,
            "random" => SelectionType::Random,
            "chash" => SelectionType::Fnv,
            "ketama" => SelectionType::Ketama,
            _ => SelectionType::RoundRobin,
        }
    }
}

/// What the consistent-hash selector hashes on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashOn {
    #[default]
    Vars,
    Head,
    Cookie,
}

impl HashOn {
    pub fn from_source(value: &str) -> Self {
        match value {
            "vars" => HashOn::Vars,
            "header" => HashOn::Head,
            "cookie" => HashOn::Cookie,
            _ => HashOn::Vars,
        }
    }
}

/// Protocol used towards upstream nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
    Grpc,
    Grpcs,
}

impl Scheme {
    pub fn from_source(value: &str) -> Self {
        match value {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            "grpc" => Scheme::Grpc,
            "grpcs" => Scheme::Grpcs,
            _ => Scheme::Http,
        }
    }
}

/// Host header handling towards upstream nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassHost {
    #[default]
    Pass,
    Rewrite,
    Node,
}

impl PassHost {
    pub fn from_source(value: &str) -> Self {
        match value {
            "pass" => PassHost::Pass,
            "rewrite" => PassHost::Rewrite,
            _ => PassHost::Pass,
        }
    }
}

/// Probe protocol for active health checking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveCheckType {
    Tcp,
    #[default]
    Http,
    Https,
}

impl ActiveCheckType {
    pub fn from_source(value: &str) -> Self {
        match value {
            "tcp" => ActiveCheckType::Tcp,
            "http" => ActiveCheckType::Http,
            "https" => ActiveCheckType::Https,
            _ => ActiveCheckType::Http,
        }
    }
}

/// A set of backend nodes plus the policy for reaching them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Timeout>,
    /// `host:port` keys mapped to weights.
    pub nodes: HashMap<String, u32>,
    #[serde(rename = "type", default)]
    pub lb_type: SelectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<HealthCheck>,
    #[serde(default)]
    pub hash_on: HashOn,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default)]
    pub pass_host: PassHost,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_host: Option<String>,
}

impl Upstream {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.meta.id.is_empty() {
            return Err(CoreError::invalid("id", "id is required"));
        }
        if self.nodes.is_empty() {
            return Err(CoreError::invalid("nodes", "nodes cannot be empty"));
        }
        for key in self.nodes.keys() {
            if !NODE_KEY_RE.is_match(key) {
                return Err(CoreError::invalid(
                    "nodes",
                    format!("invalid node key: {key}"),
                ));
            }
        }
        if self.pass_host == PassHost::Rewrite && self.upstream_host.is_none() {
            return Err(CoreError::invalid(
                "upstream_host",
                "upstream_host is required when pass_host is rewrite",
            ));
        }
        Ok(())
    }

    /// Hash key, defaulting to the request URI.
    pub fn effective_key(&self) -> &str {
        if self.key.is_empty() {
            "uri"
        } else {
            &self.key
        }
    }
}

impl Resource for Upstream {
    const KIND: ResourceKind = ResourceKind::Upstream;

    fn id(&self) -> &str {
        &self.meta.id
    }

    fn name(&self) -> &str {
        &self.meta.name
    }

    fn labels(&self) -> Option<&HashMap<String, String>> {
        Some(&self.meta.labels)
    }

    fn into_object(self) -> Object {
        Object::Upstream(self)
    }
}

/// Health checking configuration. Only active probing is modelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<ActiveCheck>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveCheck {
    #[serde(rename = "type", default)]
    pub check_type: ActiveCheckType,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub timeout: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub https_verify_certificate: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub req_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<Health>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy: Option<Unhealthy>,
}

impl ActiveCheck {
    pub fn effective_timeout(&self) -> u32 {
        if self.timeout == 0 {
            1
        } else {
            self.timeout
        }
    }

    pub fn effective_http_path(&self) -> &str {
        if self.http_path.is_empty() {
            "/"
        } else {
            &self.http_path
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Health {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<u32>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub successes: u32,
}

impl Health {
    pub fn effective_interval(&self) -> u32 {
        if self.interval == 0 {
            1
        } else {
            self.interval
        }
    }

    pub fn effective_http_statuses(&self) -> Vec<u32> {
        if self.http_statuses.is_empty() {
            vec![200, 302]
        } else {
            self.http_statuses.clone()
        }
    }

    pub fn effective_successes(&self) -> u32 {
        if self.successes == 0 {
            2
        } else {
            self.successes
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unhealthy {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub http_failures: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub tcp_failures: u32,
}

impl Unhealthy {
    pub fn effective_http_failures(&self) -> u32 {
        if self.http_failures == 0 {
            5
        } else {
            self.http_failures
        }
    }

    pub fn effective_tcp_failures(&self) -> u32 {
        if self.tcp_failures == 0 {
            2
        } else {
            self.tcp_failures
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_upstream(nodes: Vec<(&str, u32)>) -> Upstream {
        Upstream {
            meta: Metadata {
                id: "us1".into(),
                name: "test-upstream".into(),
                ..Default::default()
            },
            nodes: nodes.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn validate_accepts_plain_upstream() {
        let us = make_upstream(vec![("127.0.0.1:8080", 100)]);
        assert!(us.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_nodes() {
        let us = make_upstream(vec![]);
        assert!(matches!(
            us.validate(),
            Err(CoreError::InvalidEntity { field: "nodes", .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_node_key() {
        let us = make_upstream(vec![("127.0.0.1:8080 evil", 1)]);
        assert!(us.validate().is_err());
    }

    #[test]
    fn validate_rewrite_requires_upstream_host() {
        let mut us = make_upstream(vec![("a:1", 1)]);
        us.pass_host = PassHost::Rewrite;
        assert!(us.validate().is_err());
        us.upstream_host = Some("example.com".into());
        assert!(us.validate().is_ok());
    }

    #[test]
    fn enum_normalization() {
        assert_eq!(SelectionType::from_source("chash"), SelectionType::Fnv);
        assert_eq!(
            SelectionType::from_source("least_conn"),
            SelectionType::RoundRobin
        );
        assert_eq!(SelectionType::from_source("ewma"), SelectionType::RoundRobin);
        assert_eq!(SelectionType::from_source("bogus"), SelectionType::RoundRobin);
        assert_eq!(HashOn::from_source("header"), HashOn::Head);
        assert_eq!(HashOn::from_source(""), HashOn::Vars);
        assert_eq!(Scheme::from_source("grpcs"), Scheme::Grpcs);
        assert_eq!(Scheme::from_source("ftp"), Scheme::Http);
        assert_eq!(PassHost::from_source("rewrite"), PassHost::Rewrite);
        assert_eq!(PassHost::from_source(""), PassHost::Pass);
        assert_eq!(ActiveCheckType::from_source("tcp"), ActiveCheckType::Tcp);
        assert_eq!(ActiveCheckType::from_source(""), ActiveCheckType::Http);
    }

    #[test]
    fn enum_wire_names() {
        assert_eq!(
            serde_json::to_value(SelectionType::RoundRobin).unwrap(),
            serde_json::json!("roundrobin")
        );
        assert_eq!(
            serde_json::to_value(PassHost::Node).unwrap(),
            serde_json::json!("node")
        );
    }

    #[test]
    fn health_defaults() {
        let health = Health::default();
        assert_eq!(health.effective_interval(), 1);
        assert_eq!(health.effective_http_statuses(), vec![200, 302]);
        assert_eq!(health.effective_successes(), 2);

        let unhealthy = Unhealthy::default();
        assert_eq!(unhealthy.effective_http_failures(), 5);
        assert_eq!(unhealthy.effective_tcp_failures(), 2);

        let active = ActiveCheck::default();
        assert_eq!(active.effective_timeout(), 1);
        assert_eq!(active.effective_http_path(), "/");
    }

    #[test]
    fn effective_key_defaults_to_uri() {
        let mut us = make_upstream(vec![("a:1", 1)]);
        assert_eq!(us.effective_key(), "uri");
        us.key = "remote_addr".into();
        assert_eq!(us.effective_key(), "remote_addr");
    }

    #[test]
    fn clone_is_deep() {
        let mut us = make_upstream(vec![("127.0.0.1:8080", 100)]);
        us.checks = Some(HealthCheck {
            active: Some(ActiveCheck {
                req_headers: vec!["User-Agent: probe".into()],
                ..Default::default()
            }),
        });
        let copy = us.clone();
        assert_eq!(us, copy);

        let mut mutated = copy.clone();
        mutated.nodes.insert("10.0.0.1:80".into(), 1);
        assert_ne!(us, mutated);
        assert_eq!(us, copy);
    }
}
