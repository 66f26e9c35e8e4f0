//! The pipeline coordinator: load a snapshot, rework it into target
//! entities, diff against the cache, apply each event, and push the whole
//! batch to the bridge as one message.
//!
//! One execution at a time per engine. A failure mid-apply leaves the cache
//! partially advanced; the contract is to retry with a fresh snapshot, and
//! the next diff converges from wherever the cache ended up.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use relayg_adapter::{EtcdBridge, Event as BridgeEvent, EventKind as BridgeEventKind};
use relayg_config::load_snapshot;
use relayg_core::{MemStore, ResourceKind};

use crate::differ::{ChangeEvent, DiffOptions, Differ, EventKind, UpdateOrder};
use crate::error::SyncError;
use crate::transfer::transfer_snapshot;

/// Where the bridge listens unless configured otherwise.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:12379";

/// Root of every key the engine writes.
pub const KEY_ROOT_PREFIX: &str = "/apisix";

/// Source-side resource kinds selectable per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Service,
    Ssl,
    GlobalRule,
}

impl FromStr for SourceKind {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "service" => Ok(SourceKind::Service),
            "ssl" => Ok(SourceKind::Ssl),
            "global_rule" => Ok(SourceKind::GlobalRule),
            other => Err(SyncError::UnknownType(other.to_string())),
        }
    }
}

/// Expand source kinds into the target kinds they produce. A source
/// service fans out into services and routes.
pub fn expand_source_kinds(kinds: &[SourceKind]) -> Vec<ResourceKind> {
    let mut out = Vec::new();
    for kind in kinds {
        match kind {
            SourceKind::Service => {
                push_unique(&mut out, ResourceKind::Service);
                push_unique(&mut out, ResourceKind::Route);
            }
            SourceKind::Ssl => push_unique(&mut out, ResourceKind::Ssl),
            SourceKind::GlobalRule => push_unique(&mut out, ResourceKind::GlobalRule),
        }
    }
    out
}

fn push_unique(kinds: &mut Vec<ResourceKind>, kind: ResourceKind) {
    if !kinds.contains(&kind) {
        kinds.push(kind);
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub listen_addr: SocketAddr,
    pub update_order: UpdateOrder,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            listen_addr: DEFAULT_LISTEN_ADDR.parse().expect("default listen address"),
            update_order: UpdateOrder::default(),
        }
    }
}

/// One sync invocation: a snapshot file plus the scope it applies to.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub file: PathBuf,
    pub labels: HashMap<String, String>,
    pub types: Vec<SourceKind>,
}

/// What one invocation did, for callers and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub total: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

pub struct SyncEngine {
    cache: Arc<MemStore>,
    differ: Differ,
    bridge: EtcdBridge,
    update_order: UpdateOrder,
}

impl SyncEngine {
    /// Build the engine and bind the bridge listener. A bind failure here
    /// is fatal: without the bridge there is nowhere to push events.
    pub async fn new(opts: EngineOptions) -> Result<Self, SyncError> {
        let cache = Arc::new(MemStore::new()?);
        let differ = Differ::new(cache.clone());
        let bridge = EtcdBridge::bind(opts.listen_addr).await?;
        Ok(SyncEngine {
            cache,
            differ,
            bridge,
            update_order: opts.update_order,
        })
    }

    pub fn cache(&self) -> &Arc<MemStore> {
        &self.cache
    }

    pub fn bridge(&self) -> &EtcdBridge {
        &self.bridge
    }

    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        request: &SyncRequest,
    ) -> Result<SyncReport, SyncError> {
        checkpoint(cancel)?;
        debug!(file = %request.file.display(), "loading snapshot");
        let snapshot = load_snapshot(&request.file)
            .map_err(SyncError::from)
            .map_err(|err| err.at_stage("load"))?;

        checkpoint(cancel)?;
        debug!("reworking source resources into target entities");
        let transferred = transfer_snapshot(&snapshot).map_err(|err| err.at_stage("transfer"))?;

        checkpoint(cancel)?;
        let diff_opts = DiffOptions {
            labels: request.labels.clone(),
            kinds: expand_source_kinds(&request.types),
            update_order: self.update_order,
        };
        let events = self
            .differ
            .diff(&transferred, &diff_opts)
            .map_err(|err| err.at_stage("diff"))?;
        info!(total_events = events.len(), "diff completed");

        checkpoint(cancel)?;
        let mut report = SyncReport {
            total: events.len(),
            ..Default::default()
        };
        let mut batch = Vec::with_capacity(events.len());
        for event in &events {
            self.apply(event).map_err(|err| err.at_stage("apply"))?;
            batch.push(to_bridge_event(event).map_err(|err| err.at_stage("emit"))?);
            match event.kind {
                EventKind::Create => report.creates += 1,
                EventKind::Update => report.updates += 1,
                EventKind::Delete => report.deletes += 1,
            }
        }

        checkpoint(cancel)?;
        if batch.is_empty() {
            info!("no events to push to bridge");
        } else {
            let sender = self.bridge.sender();
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                sent = sender.send(batch) => {
                    sent.map_err(|_| SyncError::BridgeClosed.at_stage("emit"))?;
                }
            }
            info!(total_events = report.total, "events pushed to bridge");
        }

        Ok(report)
    }

    fn apply(&self, event: &ChangeEvent) -> Result<(), SyncError> {
        match event.kind {
            EventKind::Create | EventKind::Update => {
                let value = event.new.as_ref().ok_or_else(|| {
                    SyncError::Drift(format!("{} {} has no new value", event.resource, event.id))
                })?;
                self.cache.insert(value)?;
            }
            EventKind::Delete => {
                let value = event.old.as_ref().ok_or_else(|| {
                    SyncError::Drift(format!("{} {} has no old value", event.resource, event.id))
                })?;
                self.cache.delete(value)?;
            }
        }
        Ok(())
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

fn to_bridge_event(event: &ChangeEvent) -> Result<BridgeEvent, SyncError> {
    let key = format!("{}/{}/{}", KEY_ROOT_PREFIX, event.resource, event.id);
    let (kind, value) = match event.kind {
        EventKind::Delete => (BridgeEventKind::Delete, None),
        kind => {
            let new = event.new.as_ref().ok_or_else(|| {
                SyncError::Drift(format!("{} {} has no new value", event.resource, event.id))
            })?;
            let bridge_kind = if kind == EventKind::Create {
                BridgeEventKind::Add
            } else {
                BridgeEventKind::Update
            };
            (bridge_kind, Some(serde_json::to_vec(new)?))
        }
    };
    Ok(BridgeEvent { key, kind, value })
}
