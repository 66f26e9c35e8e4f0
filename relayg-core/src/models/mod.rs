pub mod globals;
pub mod route;
pub mod service;
pub mod ssl;
pub mod upstream;

pub use globals::*;
pub use route::*;
pub use service::*;
pub use ssl::*;
pub use upstream::*;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Label key carrying the kind of the declarative object an entity came from.
pub const LABEL_KIND: &str = "k8s/kind";
/// Label key carrying the namespace of the declarative object.
pub const LABEL_NAMESPACE: &str = "k8s/namespace";
/// Label key carrying the name of the declarative object.
pub const LABEL_NAME: &str = "k8s/name";

/// Plugin configurations keyed by plugin name. Payloads are opaque to the
/// engine and are cloned structurally with the owning entity.
pub type Plugins = HashMap<String, Value>;

pub(crate) fn is_zero_u32(n: &u32) -> bool {
    *n == 0
}

pub(crate) fn is_false(b: &bool) -> bool {
    !*b
}

/// Shared identity envelope carried by every target entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Connect/send/read timeouts in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub connect: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub send: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub read: u32,
}

/// The five kinds of entity the downstream gateway consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Route,
    Service,
    Upstream,
    Ssl,
    GlobalRule,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Route,
        ResourceKind::Service,
        ResourceKind::Upstream,
        ResourceKind::Ssl,
        ResourceKind::GlobalRule,
    ];

    /// Lowercase singular name, as used in table names and etcd keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Route => "route",
            ResourceKind::Service => "service",
            ResourceKind::Upstream => "upstream",
            ResourceKind::Ssl => "ssl",
            ResourceKind::GlobalRule => "global_rule",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A target entity of any kind. Generic store operations dispatch on the
/// variant; serialization yields the plain entity document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Object {
    Route(Route),
    Service(Service),
    Upstream(Upstream),
    Ssl(Ssl),
    GlobalRule(GlobalRule),
}

impl Object {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Object::Route(_) => ResourceKind::Route,
            Object::Service(_) => ResourceKind::Service,
            Object::Upstream(_) => ResourceKind::Upstream,
            Object::Ssl(_) => ResourceKind::Ssl,
            Object::GlobalRule(_) => ResourceKind::GlobalRule,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Object::Route(r) => &r.meta.id,
            Object::Service(s) => &s.meta.id,
            Object::Upstream(u) => &u.meta.id,
            Object::Ssl(s) => &s.meta.id,
            Object::GlobalRule(g) => &g.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Object::Route(r) => &r.meta.name,
            Object::Service(s) => &s.meta.name,
            Object::Upstream(u) => &u.meta.name,
            Object::Ssl(s) => &s.meta.name,
            Object::GlobalRule(g) => &g.id,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Object::Route(r) => r.validate(),
            Object::Service(s) => s.validate(),
            Object::Upstream(u) => u.validate(),
            Object::Ssl(s) => s.validate(),
            Object::GlobalRule(g) => g.validate(),
        }
    }
}

/// Behaviour every storable target entity shares. `Clone` doubles as the
/// deep-copy operation: all reachable state is owned, so a clone never
/// aliases the original.
pub trait Resource: Clone + PartialEq {
    const KIND: ResourceKind;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn labels(&self) -> Option<&HashMap<String, String>>;
    fn into_object(self) -> Object;

    /// Identifier of the entity this one refers to, when the reference is
    /// hierarchical (a route's service).
    fn parent_id(&self) -> Option<&str> {
        None
    }
}
