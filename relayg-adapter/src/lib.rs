//! The bridge between the sync engine and downstream watchers. Event
//! batches arrive on a typed channel, land in a revisioned keyspace, and
//! are rebroadcast to in-process observers. The bridge also owns the TCP
//! listener collaborators connect to; connections receive a JSON snapshot
//! of the keyspace.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, warn};

/// Capacity of the inbound batch channel. Senders block once the bridge
/// stops draining.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

const APPLIED_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Wire-level change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

/// One keyspace mutation. `value` is absent for deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub key: String,
    pub kind: EventKind,
    pub value: Option<Vec<u8>>,
}

/// A stored key with etcd-style revision bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub value: Vec<u8>,
    pub create_revision: u64,
    pub mod_revision: u64,
}

#[derive(Debug, Default)]
struct KeyspaceInner {
    revision: u64,
    entries: BTreeMap<String, KeyValue>,
}

/// The materialized view downstream watchers read. Every applied event
/// advances the revision.
#[derive(Debug, Default)]
pub struct Keyspace {
    inner: RwLock<KeyspaceInner>,
}

impl Keyspace {
    fn apply(&self, events: &[Event]) {
        let mut inner = self.inner.write();
        for event in events {
            inner.revision += 1;
            let revision = inner.revision;
            match event.kind {
                EventKind::Add | EventKind::Update => {
                    let value = event.value.clone().unwrap_or_default();
                    match inner.entries.entry(event.key.clone()) {
                        Entry::Occupied(mut occupied) => {
                            let kv = occupied.get_mut();
                            kv.value = value;
                            kv.mod_revision = revision;
                        }
                        Entry::Vacant(vacant) => {
                            vacant.insert(KeyValue {
                                value,
                                create_revision: revision,
                                mod_revision: revision,
                            });
                        }
                    }
                }
                EventKind::Delete => {
                    inner.entries.remove(&event.key);
                }
            }
        }
    }

    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    pub fn get(&self, key: &str) -> Option<KeyValue> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// The whole keyspace as one JSON document, values rendered as text.
    pub fn dump(&self) -> serde_json::Value {
        let inner = self.inner.read();
        let kvs: Vec<serde_json::Value> = inner
            .entries
            .iter()
            .map(|(key, kv)| {
                serde_json::json!({
                    "key": key,
                    "value": String::from_utf8_lossy(&kv.value),
                    "create_revision": kv.create_revision,
                    "mod_revision": kv.mod_revision,
                })
            })
            .collect();
        serde_json::json!({ "revision": inner.revision, "kvs": kvs })
    }
}

struct BridgeWorker {
    listener: TcpListener,
    rx: mpsc::Receiver<Vec<Event>>,
    keyspace: Arc<Keyspace>,
    applied: broadcast::Sender<Vec<Event>>,
}

impl BridgeWorker {
    async fn run(&mut self) {
        loop {
            tokio::select! {
                batch = self.rx.recv() => match batch {
                    Some(events) => {
                        debug!(count = events.len(), "applying event batch");
                        self.keyspace.apply(&events);
                        let _ = self.applied.send(events);
                    }
                    None => {
                        debug!("event channel closed, bridge worker stopping");
                        return;
                    }
                },
                conn = self.listener.accept() => match conn {
                    Ok((stream, peer)) => {
                        let keyspace = self.keyspace.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_snapshot(stream, keyspace).await {
                                warn!(%peer, error = %err, "snapshot connection failed");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
            }
        }
    }
}

async fn serve_snapshot(mut stream: TcpStream, keyspace: Arc<Keyspace>) -> std::io::Result<()> {
    let mut payload = keyspace.dump().to_string();
    payload.push('\n');
    stream.write_all(payload.as_bytes()).await?;
    stream.shutdown().await
}

// A worker panic must not silently take the bridge down: the join boundary
// catches it and the worker restarts with its state intact.
async fn supervise(worker: Arc<Mutex<BridgeWorker>>) {
    loop {
        let owned = worker.clone();
        let handle = tokio::spawn(async move { owned.lock().await.run().await });
        match handle.await {
            Ok(()) => break,
            Err(err) if err.is_panic() => {
                error!("bridge worker panicked, restarting");
            }
            Err(_) => break,
        }
    }
}

/// Handle to the running bridge. Owns the listener for its whole life; the
/// inbound channel and the keyspace are shared out to the engine.
pub struct EtcdBridge {
    local_addr: SocketAddr,
    tx: mpsc::Sender<Vec<Event>>,
    applied: broadcast::Sender<Vec<Event>>,
    keyspace: Arc<Keyspace>,
}

impl EtcdBridge {
    /// Bind the listener and start the worker. A bind failure is fatal to
    /// engine construction.
    pub async fn bind(addr: SocketAddr) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BridgeError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BridgeError::Bind { addr, source })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (applied, _) = broadcast::channel(APPLIED_CHANNEL_CAPACITY);
        let keyspace = Arc::new(Keyspace::default());

        let worker = Arc::new(Mutex::new(BridgeWorker {
            listener,
            rx,
            keyspace: keyspace.clone(),
            applied: applied.clone(),
        }));
        tokio::spawn(supervise(worker));
        debug!(%local_addr, "etcd bridge listening");

        Ok(EtcdBridge {
            local_addr,
            tx,
            applied,
            keyspace,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Inbound end of the batch channel.
    pub fn sender(&self) -> mpsc::Sender<Vec<Event>> {
        self.tx.clone()
    }

    /// Observe batches after they have been applied to the keyspace.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Event>> {
        self.applied.subscribe()
    }

    pub fn keyspace(&self) -> Arc<Keyspace> {
        self.keyspace.clone()
    }
}
