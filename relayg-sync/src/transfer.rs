//! Rework of source snapshot entities into the target model. The mapping is
//! deterministic: identities derive from names via SHA-1, so the same
//! snapshot always produces the same ids.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use sha1::{Digest, Sha1};

use relayg_config as source;
use relayg_core::{
    ActiveCheck, ActiveCheckType, GlobalRule, HashOn, Health, HealthCheck, Metadata, PassHost,
    Route, Scheme, SelectionType, Service, Ssl, Timeout, Unhealthy, Upstream,
};

use crate::error::SyncError;

/// Everything one snapshot produces, grouped by target kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferredSet {
    pub routes: Vec<Route>,
    pub services: Vec<Service>,
    pub upstreams: Vec<Upstream>,
    pub ssls: Vec<Ssl>,
    pub global_rules: Vec<GlobalRule>,
}

/// Lowercase hex SHA-1 of the input.
pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convert a whole snapshot, failing fast on the first invalid entity.
pub fn transfer_snapshot(snapshot: &source::Snapshot) -> Result<TransferredSet, SyncError> {
    let mut set = TransferredSet::default();

    for service in &snapshot.services {
        let (converted, routes, upstreams) = transfer_service(service)?;
        set.services.push(converted);
        set.routes.extend(routes);
        set.upstreams.extend(upstreams);
    }

    for ssl in &snapshot.ssls {
        set.ssls.extend(transfer_ssl(ssl)?);
    }

    set.global_rules
        .extend(transfer_global_rules(&snapshot.global_rules));

    Ok(set)
}

/// Convert one source service into a target service, its routes, and the
/// standalone upstreams it publishes.
///
/// The service's own upstream stays embedded in the target service and is
/// additionally published as a top-level upstream, so downstream ordering
/// can create it before the service that uses it. Named sibling upstreams
/// pass through unchanged.
pub fn transfer_service(
    svc: &source::Service,
) -> Result<(Service, Vec<Route>, Vec<Upstream>), SyncError> {
    let source_upstream = svc.upstream.as_ref().ok_or_else(|| SyncError::InvalidSource {
        entity: entity_label("service", &svc.meta),
        reason: "upstream is required".into(),
    })?;

    let service_id = derive_service_id(svc);

    let mut inline = convert_upstream(source_upstream);
    if inline.meta.id.is_empty() {
        // anonymous inline upstream: identity comes from the owning service
        inline.meta.id = sha1_hex(&format!("{}.upstream", svc.meta.name));
    }

    let service = Service {
        meta: convert_metadata(&svc.meta, service_id.clone()),
        plugins: svc.plugins.clone(),
        upstream: Some(inline.clone()),
        upstream_id: None,
        hosts: svc.hosts.clone(),
    };

    let routes = svc
        .routes
        .iter()
        .map(|route| convert_route(route, svc, &service_id))
        .collect();

    let mut upstreams = Vec::with_capacity(svc.upstreams.len() + 1);
    upstreams.push(inline);
    for (i, upstream) in svc.upstreams.iter().enumerate() {
        let mut converted = convert_upstream(upstream);
        if converted.meta.id.is_empty() {
            converted.meta.id = sha1_hex(&format!("{}.upstream.{}", svc.meta.name, i));
        }
        upstreams.push(converted);
    }

    Ok((service, routes, upstreams))
}

/// Fan a source SSL out into one target SSL per certificate, all sharing
/// the source SNIs. Client certificates are not supported downstream and
/// yield nothing.
pub fn transfer_ssl(ssl: &source::Ssl) -> Result<Vec<Ssl>, SyncError> {
    if ssl.ssl_type == Some(source::SslType::Client) {
        return Ok(Vec::new());
    }
    if ssl.certificates.is_empty() {
        return Err(SyncError::InvalidSource {
            entity: entity_label("ssl", &ssl.meta),
            reason: "no certificates".into(),
        });
    }
    if ssl.snis.is_empty() {
        return Err(SyncError::InvalidSource {
            entity: entity_label("ssl", &ssl.meta),
            reason: "no snis".into(),
        });
    }

    Ok(ssl
        .certificates
        .iter()
        .enumerate()
        .map(|(i, cert)| Ssl {
            meta: convert_metadata(&ssl.meta, derive_ssl_id(ssl, i)),
            cert: cert.certificate.clone(),
            key: cert.key.clone(),
            snis: ssl.snis.clone(),
        })
        .collect())
}

/// Explode the global-rule map: one target rule per plugin, the plugin name
/// doubling as the rule id.
pub fn transfer_global_rules(rules: &BTreeMap<String, Value>) -> Vec<GlobalRule> {
    rules
        .iter()
        .map(|(name, config)| GlobalRule {
            id: name.clone(),
            plugins: HashMap::from([(name.clone(), config.clone())]),
        })
        .collect()
}

fn derive_service_id(svc: &source::Service) -> String {
    if !svc.meta.id.is_empty() {
        svc.meta.id.clone()
    } else {
        sha1_hex(&svc.meta.name)
    }
}

fn derive_route_id(route: &source::Route, svc: &source::Service) -> String {
    if !route.meta.id.is_empty() {
        route.meta.id.clone()
    } else {
        sha1_hex(&format!("{}.{}", svc.meta.name, route.meta.name))
    }
}

// Single certificate keeps the source identity when it has one; fan-out
// derives per-index ids.
fn derive_ssl_id(ssl: &source::Ssl, index: usize) -> String {
    if ssl.certificates.len() == 1 && !ssl.meta.id.is_empty() {
        return ssl.meta.id.clone();
    }
    if ssl.certificates.len() == 1 && !ssl.meta.name.is_empty() {
        return sha1_hex(&ssl.meta.name);
    }
    if !ssl.meta.name.is_empty() {
        return sha1_hex(&format!("{}.{}", ssl.meta.name, index));
    }
    if !ssl.meta.id.is_empty() {
        return format!("{}-{}", ssl.meta.id, index);
    }
    sha1_hex(&format!("ssl-{index}"))
}

fn convert_metadata(meta: &source::Metadata, id: String) -> Metadata {
    Metadata {
        id,
        name: meta.name.clone(),
        desc: meta.desc.clone(),
        labels: meta.labels.clone(),
    }
}

fn convert_route(route: &source::Route, svc: &source::Service, service_id: &str) -> Route {
    Route {
        meta: convert_metadata(&route.meta, derive_route_id(route, svc)),
        uri: None,
        uris: route.uris.clone(),
        methods: route.methods.clone(),
        host: None,
        hosts: route.hosts.clone(),
        priority: route.priority.unwrap_or(0) as u32,
        plugins: route.plugins.clone(),
        upstream: None,
        upstream_id: None,
        service_id: Some(service_id.to_string()),
        timeout: route.timeout.map(convert_timeout),
    }
}

fn convert_upstream(upstream: &source::Upstream) -> Upstream {
    let id = if !upstream.meta.id.is_empty() {
        upstream.meta.id.clone()
    } else if !upstream.meta.name.is_empty() {
        sha1_hex(&upstream.meta.name)
    } else {
        String::new()
    };

    Upstream {
        meta: convert_metadata(&upstream.meta, id),
        retries: upstream.retries.map(|r| r as u32),
        retry_timeout: upstream.retry_timeout.map(|t| t as u64),
        timeout: upstream.timeout.map(convert_timeout),
        nodes: convert_nodes(&upstream.nodes),
        lb_type: SelectionType::from_source(&upstream.lb_type),
        checks: upstream.checks.as_ref().and_then(convert_health_check),
        hash_on: HashOn::from_source(&upstream.hash_on),
        key: upstream.key.clone(),
        scheme: Scheme::from_source(&upstream.scheme),
        pass_host: PassHost::from_source(&upstream.pass_host),
        upstream_host: (!upstream.upstream_host.is_empty())
            .then(|| upstream.upstream_host.clone()),
    }
}

fn convert_nodes(nodes: &[source::UpstreamNode]) -> HashMap<String, u32> {
    nodes
        .iter()
        .map(|node| (format!("{}:{}", node.host, node.port), node.weight))
        .collect()
}

fn convert_timeout(timeout: source::Timeout) -> Timeout {
    Timeout {
        connect: timeout.connect,
        send: timeout.send,
        read: timeout.read,
    }
}

// Raw values carry over as-is; defaults are applied by the target model's
// accessors, not baked into the stored entity.
fn convert_health_check(check: &source::HealthCheck) -> Option<HealthCheck> {
    let active = check.active.as_ref()?;
    Some(HealthCheck {
        active: Some(ActiveCheck {
            check_type: ActiveCheckType::from_source(&active.check_type),
            timeout: active.timeout,
            http_path: active.http_path.clone(),
            host: (!active.host.is_empty()).then(|| active.host.clone()),
            port: (active.port != 0).then_some(active.port),
            https_verify_certificate: active.https_verify_cert,
            req_headers: active.req_headers.clone(),
            healthy: Some(Health {
                interval: active.healthy.interval,
                http_statuses: active.healthy.http_statuses.clone(),
                successes: active.healthy.successes,
            }),
            unhealthy: Some(Unhealthy {
                http_failures: active.unhealthy.http_failures,
                tcp_failures: active.unhealthy.tcp_failures,
            }),
        }),
    })
}

fn entity_label(kind: &str, meta: &source::Metadata) -> String {
    if !meta.name.is_empty() {
        format!("{kind} {}", meta.name)
    } else if !meta.id.is_empty() {
        format!("{kind} {}", meta.id)
    } else {
        format!("unnamed {kind}")
    }
}
