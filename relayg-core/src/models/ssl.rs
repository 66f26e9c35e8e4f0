use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Metadata, Object, Resource, ResourceKind};
use crate::error::CoreError;

/// A single server certificate bound to a set of SNIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ssl {
    #[serde(flatten)]
    pub meta: Metadata,
    pub cert: String,
    pub key: String,
    pub snis: Vec<String>,
}

impl Ssl {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.meta.id.is_empty() {
            return Err(CoreError::invalid("id", "id is required"));
        }
        if self.snis.is_empty() {
            return Err(CoreError::invalid("snis", "snis cannot be empty"));
        }
        if self.cert.is_empty() {
            return Err(CoreError::invalid("cert", "cert is required"));
        }
        if self.key.is_empty() {
            return Err(CoreError::invalid("key", "key is required"));
        }
        Ok(())
    }
}

impl Resource for Ssl {
    const KIND: ResourceKind = ResourceKind::Ssl;

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
        Object::Ssl(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_all_fields() {
        let mut ssl = Ssl {
            meta: Metadata {
                id: "ssl-1".into(),
                ..Default::default()
            },
            cert: "cert-data".into(),
            key: "key-data".into(),
            snis: vec!["example.com".into()],
        };
        assert!(ssl.validate().is_ok());

        ssl.snis.clear();
        assert!(matches!(
            ssl.validate(),
            Err(CoreError::InvalidEntity { field: "snis", .. })
        ));

        ssl.snis = vec!["example.com".into()];
        ssl.cert.clear();
        assert!(ssl.validate().is_err());
    }
}
