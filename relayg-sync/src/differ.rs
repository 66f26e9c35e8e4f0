//! Snapshot-versus-cache diff. Emits the minimal set of change events and
//! orders them so no referent is missing while a referrer exists: deletes
//! run children-first, creates run parents-first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use relayg_core::{
    KindLabelSelector, ListOptions, MemStore, Object, Resource, ResourceKind, LABEL_KIND,
    LABEL_NAME, LABEL_NAMESPACE,
};

use crate::error::SyncError;
use crate::transfer::TransferredSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    // Deletes flush first so replacement ids never coexist with stale ones.
    fn priority(self) -> u8 {
        match self {
            EventKind::Delete => 0,
            EventKind::Update => 1,
            EventKind::Create => 2,
        }
    }
}

/// One observed difference between the snapshot and the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub resource: ResourceKind,
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub old: Option<Object>,
    pub new: Option<Object>,
}

/// Which resource-type order updates follow. Teardown matches deletes
/// (children first); setup matches creates for consumers that prefer
/// parent-first updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateOrder {
    #[default]
    Teardown,
    Setup,
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Selector labels scoping the cache view. The snapshot itself is
    /// expected to be pre-scoped by the caller.
    pub labels: HashMap<String, String>,
    /// Target kinds to diff; empty means all of them.
    pub kinds: Vec<ResourceKind>,
    pub update_order: UpdateOrder,
}

pub struct Differ {
    cache: Arc<MemStore>,
}

impl Differ {
    pub fn new(cache: Arc<MemStore>) -> Self {
        Differ { cache }
    }

    pub fn diff(
        &self,
        new: &TransferredSet,
        opts: &DiffOptions,
    ) -> Result<Vec<ChangeEvent>, SyncError> {
        let scoped = scoped_list_options(&opts.labels);
        let mut events = Vec::new();

        if included(opts, ResourceKind::Route) {
            events.extend(diff_resources(&new.routes, self.cache.list_routes(&scoped)?));
        }
        if included(opts, ResourceKind::Service) {
            events.extend(diff_resources(
                &new.services,
                self.cache.list_services(&scoped)?,
            ));
        }
        if included(opts, ResourceKind::Upstream) {
            events.extend(diff_resources(
                &new.upstreams,
                self.cache.list_upstreams(&scoped)?,
            ));
        }
        if included(opts, ResourceKind::Ssl) {
            events.extend(diff_resources(&new.ssls, self.cache.list_ssls(&scoped)?));
        }
        if included(opts, ResourceKind::GlobalRule) {
            // global rules carry no kind labels; the selector cannot apply
            events.extend(diff_resources(
                &new.global_rules,
                self.cache.list_global_rules(&ListOptions::default())?,
            ));
        }

        sort_events(&mut events, opts.update_order);
        Ok(events)
    }
}

fn included(opts: &DiffOptions, kind: ResourceKind) -> bool {
    opts.kinds.is_empty() || opts.kinds.contains(&kind)
}

fn scoped_list_options(labels: &HashMap<String, String>) -> ListOptions {
    if labels.is_empty() {
        return ListOptions::default();
    }
    KindLabelSelector {
        kind: labels.get(LABEL_KIND).cloned().unwrap_or_default(),
        namespace: labels.get(LABEL_NAMESPACE).cloned().unwrap_or_default(),
        name: labels.get(LABEL_NAME).cloned().unwrap_or_default(),
    }
    .into()
}

fn diff_resources<T: Resource>(new_items: &[T], cached_items: Vec<T>) -> Vec<ChangeEvent> {
    let mut new_by_id: BTreeMap<&str, &T> = BTreeMap::new();
    for item in new_items {
        new_by_id.insert(item.id(), item);
    }
    let mut cached_by_id: BTreeMap<String, T> = BTreeMap::new();
    for item in cached_items {
        cached_by_id.insert(item.id().to_string(), item);
    }

    let mut events = Vec::new();
    for (id, item) in &new_by_id {
        match cached_by_id.get(*id) {
            Some(cached) if cached == *item => {}
            Some(cached) => events.push(ChangeEvent {
                kind: EventKind::Update,
                resource: T::KIND,
                id: (*id).to_string(),
                name: item.name().to_string(),
                parent_id: item.parent_id().map(str::to_string),
                old: Some(cached.clone().into_object()),
                new: Some((*item).clone().into_object()),
            }),
            None => events.push(ChangeEvent {
                kind: EventKind::Create,
                resource: T::KIND,
                id: (*id).to_string(),
                name: item.name().to_string(),
                parent_id: item.parent_id().map(str::to_string),
                old: None,
                new: Some((*item).clone().into_object()),
            }),
        }
    }

    for (id, cached) in &cached_by_id {
        if !new_by_id.contains_key(id.as_str()) {
            events.push(ChangeEvent {
                kind: EventKind::Delete,
                resource: T::KIND,
                id: id.clone(),
                name: cached.name().to_string(),
                parent_id: cached.parent_id().map(str::to_string),
                old: Some(cached.clone().into_object()),
                new: None,
            });
        }
    }

    events
}

// Children before parents: a deleted service must outlive the routes that
// point at it.
fn teardown_rank(kind: ResourceKind) -> u8 {
    match kind {
        ResourceKind::Route => 0,
        ResourceKind::Service => 1,
        ResourceKind::Upstream => 2,
        ResourceKind::Ssl => 3,
        ResourceKind::GlobalRule => 4,
    }
}

// Parents before children: a created route must find its service.
fn setup_rank(kind: ResourceKind) -> u8 {
    match kind {
        ResourceKind::GlobalRule => 0,
        ResourceKind::Ssl => 1,
        ResourceKind::Upstream => 2,
        ResourceKind::Service => 3,
        ResourceKind::Route => 4,
    }
}

pub(crate) fn sort_events(events: &mut [ChangeEvent], update_order: UpdateOrder) {
    events.sort_by_key(|event| {
        let rank = match event.kind {
            EventKind::Delete => teardown_rank(event.resource),
            EventKind::Update => match update_order {
                UpdateOrder::Teardown => teardown_rank(event.resource),
                UpdateOrder::Setup => setup_rank(event.resource),
            },
            EventKind::Create => setup_rank(event.resource),
        };
        (event.kind.priority(), rank)
    });
}
