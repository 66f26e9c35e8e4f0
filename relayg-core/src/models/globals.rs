use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Object, Plugins, Resource, ResourceKind};
use crate::error::CoreError;

/// A plugin applied to every request. One rule per plugin: the id is the
/// plugin name and the plugin map holds exactly that entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub plugins: Plugins,
}

impl GlobalRule {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.is_empty() {
            return Err(CoreError::invalid("id", "id is required"));
        }
        Ok(())
    }
}

impl Resource for GlobalRule {
    const KIND: ResourceKind = ResourceKind::GlobalRule;

    fn id(&self) -> &str {
        &self.id
    }

    // Global rules carry no human label; the plugin name doubles as one.
    fn name(&self) -> &str {
        &self.id
    }

    fn labels(&self) -> Option<&HashMap<String, String>> {
        None
    }

    fn into_object(self) -> Object {
        Object::GlobalRule(self)
    }
}
