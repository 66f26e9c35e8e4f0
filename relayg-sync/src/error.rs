use relayg_adapter::BridgeError;
use relayg_config::ConfigError;
use relayg_core::CoreError;
use thiserror::Error;

/// Everything that can go wrong between reading a snapshot and pushing its
/// events to the bridge.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The snapshot is missing something the transfer requires.
    #[error("invalid source {entity}: {reason}")]
    InvalidSource { entity: String, reason: String },

    #[error(transparent)]
    Load(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CoreError),

    #[error("serialize event value: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sync cancelled")]
    Cancelled,

    #[error("bridge event channel closed")]
    BridgeClosed,

    #[error("failed to start etcd bridge: {0}")]
    Startup(#[from] BridgeError),

    #[error("unknown resource type: {0}")]
    UnknownType(String),

    /// The event stream and the cache disagree about what exists.
    #[error("event stream drifted from cache state: {0}")]
    Drift(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Tag an error with the pipeline stage it surfaced in. Cancellation
    /// passes through untagged.
    pub(crate) fn at_stage(self, stage: &'static str) -> SyncError {
        match self {
            SyncError::Cancelled => SyncError::Cancelled,
            err => SyncError::Stage {
                stage,
                source: Box::new(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapping_names_the_stage() {
        let err = SyncError::InvalidSource {
            entity: "service web".into(),
            reason: "upstream is required".into(),
        }
        .at_stage("transfer");
        assert_eq!(
            err.to_string(),
            "transfer stage failed: invalid source service web: upstream is required"
        );
    }

    #[test]
    fn cancellation_is_never_wrapped() {
        assert!(matches!(
            SyncError::Cancelled.at_stage("apply"),
            SyncError::Cancelled
        ));
    }
}
