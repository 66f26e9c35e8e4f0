use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{is_zero_u32, Metadata, Object, Plugins, Resource, ResourceKind, Timeout, Upstream};
use crate::error::CoreError;

/// A single matchable entry point routed to a service or upstream.
///
/// Exactly one of the backend references must be populated: an inline
/// upstream, an `upstream_id`, or a `service_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub plugins: Plugins,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Upstream>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Timeout>,
}

impl Route {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.meta.id.is_empty() {
            return Err(CoreError::invalid("id", "id is required"));
        }
        if self.uri.is_none() && self.uris.is_empty() {
            return Err(CoreError::invalid("uris", "uri or uris is required"));
        }
        if self.upstream.is_none() && self.upstream_id.is_none() && self.service_id.is_none() {
            return Err(CoreError::invalid(
                "upstream",
                "upstream, upstream_id, or service_id is required",
            ));
        }
        if let Some(upstream) = &self.upstream {
            upstream.validate()?;
        }
        Ok(())
    }

    /// Match URIs, merging the singular and plural forms.
    pub fn effective_uris(&self) -> Vec<&str> {
        match &self.uri {
            Some(uri) => vec![uri.as_str()],
            None => self.uris.iter().map(String::as_str).collect(),
        }
    }

    /// Match hosts, merging the singular and plural forms.
    pub fn effective_hosts(&self) -> Vec<&str> {
        match &self.host {
            Some(host) => vec![host.as_str()],
            None => self.hosts.iter().map(String::as_str).collect(),
        }
    }
}

impl Resource for Route {
    const KIND: ResourceKind = ResourceKind::Route;

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
        Object::Route(self)
    }

    fn parent_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_route() -> Route {
        Route {
            meta: Metadata {
                id: "r1".into(),
                name: "test-route".into(),
                ..Default::default()
            },
            uris: vec!["/api".into()],
            service_id: Some("s1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn validate_accepts_route_with_service_ref() {
        assert!(make_route().validate().is_ok());
    }

    #[test]
    fn validate_requires_uri() {
        let mut route = make_route();
        route.uris.clear();
        assert!(matches!(
            route.validate(),
            Err(CoreError::InvalidEntity { field: "uris", .. })
        ));
        route.uri = Some("/one".into());
        assert!(route.validate().is_ok());
    }

    #[test]
    fn validate_requires_backend_reference() {
        let mut route = make_route();
        route.service_id = None;
        assert!(route.validate().is_err());
        route.upstream_id = Some("u1".into());
        assert!(route.validate().is_ok());
    }

    #[test]
    fn effective_uris_prefers_singular() {
        let mut route = make_route();
        assert_eq!(route.effective_uris(), vec!["/api"]);
        route.uri = Some("/only".into());
        assert_eq!(route.effective_uris(), vec!["/only"]);
    }

    #[test]
    fn serializes_wire_fields() {
        let route = make_route();
        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["uris"][0], "/api");
        assert_eq!(json["service_id"], "s1");
        assert!(json.get("priority").is_none());
        assert!(json.get("upstream").is_none());
    }
}
