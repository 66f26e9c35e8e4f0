use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Metadata, Object, Plugins, Resource, ResourceKind, Upstream};
use crate::error::CoreError;

/// A reusable backend definition routes attach to. Carries either an inline
/// upstream or a reference to a standalone one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub plugins: Plugins,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Upstream>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}

impl Service {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.meta.id.is_empty() {
            return Err(CoreError::invalid("id", "id is required"));
        }
        if self.upstream.is_none() && self.upstream_id.is_none() {
            return Err(CoreError::invalid(
                "upstream",
                "upstream or upstream_id is required",
            ));
        }
        if let Some(upstream) = &self.upstream {
            upstream.validate()?;
        }
        Ok(())
    }
}

impl Resource for Service {
    const KIND: ResourceKind = ResourceKind::Service;

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
        Object::Service(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_upstream_reference() {
        let mut service = Service {
            meta: Metadata {
                id: "s1".into(),
                name: "test-service".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(service.validate().is_err());

        service.upstream_id = Some("u1".into());
        assert!(service.validate().is_ok());
    }

    #[test]
    fn validate_checks_inline_upstream() {
        let service = Service {
            meta: Metadata {
                id: "s1".into(),
                ..Default::default()
            },
            upstream: Some(Upstream {
                meta: Metadata {
                    id: "u1".into(),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        // inline upstream has no nodes
        assert!(service.validate().is_err());
    }
}
