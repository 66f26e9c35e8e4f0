//! In-memory state store: one typed table per resource kind, a unique
//! primary index on id, and a composite label index for selector reads.
//!
//! Every returned object is a deep copy; mutating it never changes the
//! store, and re-inserting is the only way to write a change back.

mod index;

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::error::CoreError;
use crate::models::{GlobalRule, Object, Resource, ResourceKind, Route, Service, Ssl, Upstream};
use index::{entity_key, selector_key};

/// Scopes a list to entities labelled with a specific declarative origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindLabelSelector {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Options for list operations. Without a selector the primary index is
/// iterated in id order.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub kind_label_selector: Option<KindLabelSelector>,
}

impl From<KindLabelSelector> for ListOptions {
    fn from(selector: KindLabelSelector) -> Self {
        ListOptions {
            kind_label_selector: Some(selector),
        }
    }
}

struct TableSpec {
    name: &'static str,
    label_indexed: bool,
}

const SCHEMA: [TableSpec; 5] = [
    TableSpec {
        name: "route",
        label_indexed: true,
    },
    TableSpec {
        name: "service",
        label_indexed: true,
    },
    TableSpec {
        name: "upstream",
        label_indexed: true,
    },
    TableSpec {
        name: "ssl",
        label_indexed: true,
    },
    TableSpec {
        name: "global_rule",
        label_indexed: false,
    },
];

fn validate_schema() -> Result<(), CoreError> {
    let mut seen = BTreeSet::new();
    for spec in &SCHEMA {
        if spec.name.is_empty() {
            return Err(CoreError::Schema("table name cannot be empty".into()));
        }
        if !seen.insert(spec.name) {
            return Err(CoreError::Schema(format!("duplicate table: {}", spec.name)));
        }
    }
    Ok(())
}

fn label_indexed(kind: ResourceKind) -> bool {
    SCHEMA
        .iter()
        .find(|spec| spec.name == kind.as_str())
        .is_some_and(|spec| spec.label_indexed)
}

struct Table<T: Resource> {
    by_id: BTreeMap<String, T>,
    label: Option<BTreeMap<Vec<u8>, BTreeSet<String>>>,
}

impl<T: Resource> Table<T> {
    fn new() -> Self {
        Table {
            by_id: BTreeMap::new(),
            label: label_indexed(T::KIND).then(BTreeMap::new),
        }
    }

    fn upsert(&mut self, obj: T) {
        let id = obj.id().to_string();
        let prev_key = self
            .by_id
            .get(&id)
            .and_then(|prev| prev.labels().and_then(entity_key));
        if let Some(key) = prev_key {
            self.unindex(&key, &id);
        }
        if let Some(index) = self.label.as_mut() {
            if let Some(key) = obj.labels().and_then(entity_key) {
                index.entry(key).or_default().insert(id.clone());
            }
        }
        self.by_id.insert(id, obj);
    }

    fn remove(&mut self, id: &str) -> Option<T> {
        let prev = self.by_id.remove(id)?;
        if let Some(key) = prev.labels().and_then(entity_key) {
            self.unindex(&key, id);
        }
        Some(prev)
    }

    fn unindex(&mut self, key: &[u8], id: &str) {
        if let Some(index) = self.label.as_mut() {
            if let Some(ids) = index.get_mut(key) {
                ids.remove(id);
                if ids.is_empty() {
                    index.remove(key);
                }
            }
        }
    }

    fn get(&self, id: &str) -> Option<T> {
        self.by_id.get(id).cloned()
    }

    fn list(&self, opts: &ListOptions) -> Result<Vec<T>, CoreError> {
        match &opts.kind_label_selector {
            None => Ok(self.by_id.values().cloned().collect()),
            Some(selector) => {
                let index = self.label.as_ref().ok_or_else(|| {
                    CoreError::Schema(format!("table {} has no label index", T::KIND))
                })?;
                let key = selector_key(selector);
                Ok(index
                    .get(&key)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| self.by_id.get(id).cloned())
                            .collect()
                    })
                    .unwrap_or_default())
            }
        }
    }
}

struct Tables {
    route: Table<Route>,
    service: Table<Service>,
    upstream: Table<Upstream>,
    ssl: Table<Ssl>,
    global_rule: Table<GlobalRule>,
}

impl Tables {
    fn new() -> Self {
        Tables {
            route: Table::new(),
            service: Table::new(),
            upstream: Table::new(),
            ssl: Table::new(),
            global_rule: Table::new(),
        }
    }

    fn contains(&self, kind: ResourceKind, id: &str) -> bool {
        match kind {
            ResourceKind::Route => self.route.by_id.contains_key(id),
            ResourceKind::Service => self.service.by_id.contains_key(id),
            ResourceKind::Upstream => self.upstream.by_id.contains_key(id),
            ResourceKind::Ssl => self.ssl.by_id.contains_key(id),
            ResourceKind::GlobalRule => self.global_rule.by_id.contains_key(id),
        }
    }

    fn remove(&mut self, kind: ResourceKind, id: &str) {
        match kind {
            ResourceKind::Route => {
                self.route.remove(id);
            }
            ResourceKind::Service => {
                self.service.remove(id);
            }
            ResourceKind::Upstream => {
                self.upstream.remove(id);
            }
            ResourceKind::Ssl => {
                self.ssl.remove(id);
            }
            ResourceKind::GlobalRule => {
                self.global_rule.remove(id);
            }
        }
    }
}

enum PendingOp {
    Insert(Object),
    Remove(ResourceKind, String),
}

/// A write transaction. Operations are staged and only touch the tables on
/// `commit`; dropping the transaction without committing discards them.
struct WriteTxn<'a> {
    tables: RwLockWriteGuard<'a, Tables>,
    pending: Vec<PendingOp>,
}

impl<'a> WriteTxn<'a> {
    fn new(tables: RwLockWriteGuard<'a, Tables>) -> Self {
        WriteTxn {
            tables,
            pending: Vec::new(),
        }
    }

    fn stage_insert(&mut self, obj: Object) {
        self.pending.push(PendingOp::Insert(obj));
    }

    fn stage_delete(&mut self, kind: ResourceKind, id: &str) -> Result<(), CoreError> {
        if !self.exists(kind, id) {
            return Err(CoreError::NotFound);
        }
        self.pending.push(PendingOp::Remove(kind, id.to_string()));
        Ok(())
    }

    fn exists(&self, kind: ResourceKind, id: &str) -> bool {
        for op in self.pending.iter().rev() {
            match op {
                PendingOp::Insert(obj) if obj.kind() == kind && obj.id() == id => return true,
                PendingOp::Remove(k, staged) if *k == kind && staged == id => return false,
                _ => {}
            }
        }
        self.tables.contains(kind, id)
    }

    fn commit(mut self) {
        let pending = std::mem::take(&mut self.pending);
        for op in pending {
            match op {
                PendingOp::Insert(Object::Route(r)) => self.tables.route.upsert(r),
                PendingOp::Insert(Object::Service(s)) => self.tables.service.upsert(s),
                PendingOp::Insert(Object::Upstream(u)) => self.tables.upstream.upsert(u),
                PendingOp::Insert(Object::Ssl(s)) => self.tables.ssl.upsert(s),
                PendingOp::Insert(Object::GlobalRule(g)) => self.tables.global_rule.upsert(g),
                PendingOp::Remove(kind, id) => self.tables.remove(kind, &id),
            }
        }
    }
}

/// The in-process cache of everything the downstream gateway has been told.
/// Volatile: state lives only as long as the process.
pub struct MemStore {
    tables: RwLock<Tables>,
}

impl MemStore {
    pub fn new() -> Result<Self, CoreError> {
        validate_schema()?;
        Ok(MemStore {
            tables: RwLock::new(Tables::new()),
        })
    }

    fn write(&self) -> WriteTxn<'_> {
        WriteTxn::new(self.tables.write())
    }

    // Generic operations dispatching on the object variant.

    pub fn insert(&self, obj: &Object) -> Result<(), CoreError> {
        match obj {
            Object::Route(r) => self.insert_route(r),
            Object::Service(s) => self.insert_service(s),
            Object::Upstream(u) => self.insert_upstream(u),
            Object::Ssl(s) => self.insert_ssl(s),
            Object::GlobalRule(g) => self.insert_global_rule(g),
        }
    }

    pub fn delete(&self, obj: &Object) -> Result<(), CoreError> {
        match obj {
            Object::Route(r) => self.delete_route(r),
            Object::Service(s) => self.delete_service(s),
            Object::Upstream(u) => self.delete_upstream(u),
            Object::Ssl(s) => self.delete_ssl(s),
            Object::GlobalRule(g) => self.delete_global_rule(g),
        }
    }

    // Typed operations. Inserts upsert by id and store a deep copy; deletes
    // report NotFound for absent ids; reads return deep copies.

    pub fn insert_route(&self, route: &Route) -> Result<(), CoreError> {
        self.insert_object(route.clone().into_object())
    }

    pub fn insert_service(&self, service: &Service) -> Result<(), CoreError> {
        self.insert_object(service.clone().into_object())
    }

    pub fn insert_upstream(&self, upstream: &Upstream) -> Result<(), CoreError> {
        self.insert_object(upstream.clone().into_object())
    }

    pub fn insert_ssl(&self, ssl: &Ssl) -> Result<(), CoreError> {
        self.insert_object(ssl.clone().into_object())
    }

    pub fn insert_global_rule(&self, rule: &GlobalRule) -> Result<(), CoreError> {
        self.insert_object(rule.clone().into_object())
    }

    pub fn delete_route(&self, route: &Route) -> Result<(), CoreError> {
        self.delete_by_id(ResourceKind::Route, route.id())
    }

    pub fn delete_service(&self, service: &Service) -> Result<(), CoreError> {
        self.delete_by_id(ResourceKind::Service, service.id())
    }

    pub fn delete_upstream(&self, upstream: &Upstream) -> Result<(), CoreError> {
        self.delete_by_id(ResourceKind::Upstream, upstream.id())
    }

    pub fn delete_ssl(&self, ssl: &Ssl) -> Result<(), CoreError> {
        self.delete_by_id(ResourceKind::Ssl, ssl.id())
    }

    pub fn delete_global_rule(&self, rule: &GlobalRule) -> Result<(), CoreError> {
        self.delete_by_id(ResourceKind::GlobalRule, rule.id())
    }

    pub fn get_route(&self, id: &str) -> Result<Route, CoreError> {
        self.tables.read().route.get(id).ok_or(CoreError::NotFound)
    }

    pub fn get_service(&self, id: &str) -> Result<Service, CoreError> {
        self.tables
            .read()
            .service
            .get(id)
            .ok_or(CoreError::NotFound)
    }

    pub fn get_upstream(&self, id: &str) -> Result<Upstream, CoreError> {
        self.tables
            .read()
            .upstream
            .get(id)
            .ok_or(CoreError::NotFound)
    }

    pub fn get_ssl(&self, id: &str) -> Result<Ssl, CoreError> {
        self.tables.read().ssl.get(id).ok_or(CoreError::NotFound)
    }

    pub fn get_global_rule(&self, id: &str) -> Result<GlobalRule, CoreError> {
        self.tables
            .read()
            .global_rule
            .get(id)
            .ok_or(CoreError::NotFound)
    }

    pub fn list_routes(&self, opts: &ListOptions) -> Result<Vec<Route>, CoreError> {
        self.tables.read().route.list(opts)
    }

    pub fn list_services(&self, opts: &ListOptions) -> Result<Vec<Service>, CoreError> {
        self.tables.read().service.list(opts)
    }

    pub fn list_upstreams(&self, opts: &ListOptions) -> Result<Vec<Upstream>, CoreError> {
        self.tables.read().upstream.list(opts)
    }

    pub fn list_ssls(&self, opts: &ListOptions) -> Result<Vec<Ssl>, CoreError> {
        self.tables.read().ssl.list(opts)
    }

    pub fn list_global_rules(&self, opts: &ListOptions) -> Result<Vec<GlobalRule>, CoreError> {
        self.tables.read().global_rule.list(opts)
    }

    fn insert_object(&self, obj: Object) -> Result<(), CoreError> {
        let mut txn = self.write();
        txn.stage_insert(obj);
        txn.commit();
        Ok(())
    }

    fn delete_by_id(&self, kind: ResourceKind, id: &str) -> Result<(), CoreError> {
        let mut txn = self.write();
        txn.stage_delete(kind, id)?;
        txn.commit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, LABEL_KIND, LABEL_NAME, LABEL_NAMESPACE};
    use std::collections::HashMap;

    const TEST_ROUTE_ID: &str = "route-1";

    fn kind_labels(kind: &str, namespace: &str, name: &str) -> HashMap<String, String> {
        HashMap::from([
            (LABEL_KIND.to_string(), kind.to_string()),
            (LABEL_NAMESPACE.to_string(), namespace.to_string()),
            (LABEL_NAME.to_string(), name.to_string()),
        ])
    }

    fn make_route(id: &str, name: &str, labels: HashMap<String, String>) -> Route {
        Route {
            meta: Metadata {
                id: id.into(),
                name: name.into(),
                labels,
                ..Default::default()
            },
            uris: vec!["/api".into()],
            ..Default::default()
        }
    }

    #[test]
    fn new_store() {
        assert!(MemStore::new().is_ok());
    }

    #[test]
    fn route_crud() {
        let store = MemStore::new().unwrap();
        let route = make_route(
            TEST_ROUTE_ID,
            "test-route",
            kind_labels("Ingress", "default", "test"),
        );

        store.insert_route(&route).unwrap();

        let retrieved = store.get_route(TEST_ROUTE_ID).unwrap();
        assert_eq!(retrieved.meta.id, TEST_ROUTE_ID);
        assert_eq!(retrieved.meta.name, "test-route");

        let routes = store.list_routes(&ListOptions::default()).unwrap();
        assert_eq!(routes.len(), 1);

        store.delete_route(&route).unwrap();
        assert_eq!(store.get_route(TEST_ROUTE_ID), Err(CoreError::NotFound));
    }

    #[test]
    fn delete_absent_is_not_found() {
        let store = MemStore::new().unwrap();
        let route = make_route("ghost", "ghost", HashMap::new());
        assert_eq!(store.delete_route(&route), Err(CoreError::NotFound));
    }

    #[test]
    fn upstream_and_global_rule_crud() {
        let store = MemStore::new().unwrap();

        let upstream = Upstream {
            meta: Metadata {
                id: "upstream-1".into(),
                name: "test-upstream".into(),
                ..Default::default()
            },
            nodes: HashMap::from([("127.0.0.1:8080".to_string(), 100)]),
            ..Default::default()
        };
        store.insert_upstream(&upstream).unwrap();
        assert_eq!(store.get_upstream("upstream-1").unwrap().meta.name, "test-upstream");
        assert_eq!(store.list_upstreams(&ListOptions::default()).unwrap().len(), 1);
        store.delete_upstream(&upstream).unwrap();

        let rule = GlobalRule {
            id: "prometheus".into(),
            plugins: HashMap::from([("prometheus".to_string(), serde_json::json!({}))]),
        };
        store.insert_global_rule(&rule).unwrap();
        assert_eq!(store.get_global_rule("prometheus").unwrap(), rule);
        store.delete_global_rule(&rule).unwrap();
        assert_eq!(store.get_global_rule("prometheus"), Err(CoreError::NotFound));
    }

    #[test]
    fn update_by_reinsert() {
        let store = MemStore::new().unwrap();
        store
            .insert_route(&make_route(TEST_ROUTE_ID, "test-route", HashMap::new()))
            .unwrap();

        let mut updated = make_route(TEST_ROUTE_ID, "updated-route", HashMap::new());
        updated.uris = vec!["/api/v2".into()];
        store.insert_route(&updated).unwrap();

        let retrieved = store.get_route(TEST_ROUTE_ID).unwrap();
        assert_eq!(retrieved.meta.name, "updated-route");
        assert_eq!(retrieved.uris, vec!["/api/v2".to_string()]);
        assert_eq!(store.list_routes(&ListOptions::default()).unwrap().len(), 1);
    }

    #[test]
    fn list_with_label_selector() {
        let store = MemStore::new().unwrap();
        store
            .insert_route(&make_route(
                TEST_ROUTE_ID,
                TEST_ROUTE_ID,
                kind_labels("Ingress", "default", "ing-1"),
            ))
            .unwrap();
        store
            .insert_route(&make_route(
                "route-2",
                "route-2",
                kind_labels("Ingress", "default", "ing-2"),
            ))
            .unwrap();
        store
            .insert_route(&make_route(
                "route-3",
                "route-3",
                kind_labels("Ingress", "kube-system", "ing-3"),
            ))
            .unwrap();

        let all = store.list_routes(&ListOptions::default()).unwrap();
        assert_eq!(all.len(), 3);

        let selector = KindLabelSelector {
            kind: "Ingress".into(),
            namespace: "default".into(),
            name: "ing-1".into(),
        };
        let filtered = store.list_routes(&selector.clone().into()).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].meta.id, TEST_ROUTE_ID);

        // selector misses entities that carry only some of the labels
        let partial = make_route(
            "route-4",
            "route-4",
            HashMap::from([(LABEL_KIND.to_string(), "Ingress".to_string())]),
        );
        store.insert_route(&partial).unwrap();
        let filtered = store.list_routes(&selector.into()).unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn label_index_follows_updates() {
        let store = MemStore::new().unwrap();
        store
            .insert_route(&make_route(
                TEST_ROUTE_ID,
                TEST_ROUTE_ID,
                kind_labels("Ingress", "default", "ing-1"),
            ))
            .unwrap();

        // relabel the same id into another namespace
        store
            .insert_route(&make_route(
                TEST_ROUTE_ID,
                TEST_ROUTE_ID,
                kind_labels("Ingress", "kube-system", "ing-1"),
            ))
            .unwrap();

        let old_scope = KindLabelSelector {
            kind: "Ingress".into(),
            namespace: "default".into(),
            name: "ing-1".into(),
        };
        assert!(store.list_routes(&old_scope.into()).unwrap().is_empty());

        let new_scope = KindLabelSelector {
            kind: "Ingress".into(),
            namespace: "kube-system".into(),
            name: "ing-1".into(),
        };
        assert_eq!(store.list_routes(&new_scope.into()).unwrap().len(), 1);
    }

    #[test]
    fn selector_on_unindexed_table_is_a_schema_error() {
        let store = MemStore::new().unwrap();
        let selector = KindLabelSelector::default();
        assert!(matches!(
            store.list_global_rules(&selector.into()),
            Err(CoreError::Schema(_))
        ));
    }

    #[test]
    fn generic_insert_delete() {
        let store = MemStore::new().unwrap();
        let route = make_route(TEST_ROUTE_ID, "test-route", HashMap::new());

        store.insert(&Object::Route(route.clone())).unwrap();
        assert_eq!(store.get_route(TEST_ROUTE_ID).unwrap().meta.id, TEST_ROUTE_ID);

        store.delete(&Object::Route(route)).unwrap();
        assert_eq!(store.get_route(TEST_ROUTE_ID), Err(CoreError::NotFound));
    }

    #[test]
    fn returned_objects_are_isolated_copies() {
        let store = MemStore::new().unwrap();
        let mut route = make_route(TEST_ROUTE_ID, "test-route", HashMap::new());
        route.plugins.insert(
            "cors".into(),
            serde_json::json!({"allow_origins": "https://example.com"}),
        );
        store.insert_route(&route).unwrap();

        let mut retrieved = store.get_route(TEST_ROUTE_ID).unwrap();
        retrieved.meta.name = "modified".into();
        retrieved.uris[0] = "/modified".into();
        retrieved.plugins.remove("cors");

        let fresh = store.get_route(TEST_ROUTE_ID).unwrap();
        assert_eq!(fresh.meta.name, "test-route");
        assert_eq!(fresh.uris[0], "/api");
        assert!(fresh.plugins.contains_key("cors"));

        // the caller's original is equally untouched by the store
        route.uris[0] = "/caller".into();
        assert_eq!(store.get_route(TEST_ROUTE_ID).unwrap().uris[0], "/api");
    }

    #[test]
    fn list_order_is_stable() {
        let store = MemStore::new().unwrap();
        for id in ["b", "a", "c"] {
            store
                .insert_route(&make_route(id, id, HashMap::new()))
                .unwrap();
        }
        let first: Vec<String> = store
            .list_routes(&ListOptions::default())
            .unwrap()
            .into_iter()
            .map(|r| r.meta.id)
            .collect();
        let second: Vec<String> = store
            .list_routes(&ListOptions::default())
            .unwrap()
            .into_iter()
            .map(|r| r.meta.id)
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["a", "b", "c"]);
    }
}
