mod logging;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use relayg_sync::{
    EngineOptions, SourceKind, SyncEngine, SyncRequest, UpdateOrder, DEFAULT_LISTEN_ADDR,
};

#[derive(Parser, Debug)]
#[command(version, about = "RelayGate — sync declarative gateway config into an etcd-style keyspace")]
struct Args {
    /// Snapshot file (json/yaml/toml)
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Scope selector, repeatable: k8s/kind=Ingress etc.
    #[arg(long = "label-selector", value_name = "KEY=VALUE")]
    label_selector: Vec<String>,

    /// Source resource types to sync (service, ssl, global_rule); all when omitted
    #[arg(long = "include-resource-type", value_name = "TYPE")]
    include_resource_type: Vec<String>,

    /// Bridge listen address
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Order updates like deletes (teardown) or like creates (setup)
    #[arg(long, default_value = "teardown")]
    update_order: String,

    /// Log output: plain, json, or pretty
    #[arg(long, default_value = "plain")]
    log_format: String,
}

fn parse_labels(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut labels = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("label selector `{pair}` is not KEY=VALUE");
        };
        labels.insert(key.to_string(), value.to_string());
    }
    Ok(labels)
}

fn parse_update_order(value: &str) -> Result<UpdateOrder> {
    match value {
        "teardown" => Ok(UpdateOrder::Teardown),
        "setup" => Ok(UpdateOrder::Setup),
        other => bail!("unknown update order: {other}"),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_format)?;

    let labels = parse_labels(&args.label_selector)?;
    let types = args
        .include_resource_type
        .iter()
        .map(|value| value.parse::<SourceKind>())
        .collect::<Result<Vec<_>, _>>()
        .context("parse --include-resource-type")?;

    let engine = SyncEngine::new(EngineOptions {
        listen_addr: args.listen,
        update_order: parse_update_order(&args.update_order)?,
    })
    .await
    .context("start sync engine")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let request = SyncRequest {
        file: args.file,
        labels,
        types,
    };
    let report = engine.execute(&cancel, &request).await?;
    info!(
        total = report.total,
        creates = report.creates,
        updates = report.updates,
        deletes = report.deletes,
        "sync complete"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_as_key_value_pairs() {
        let labels = parse_labels(&[
            "k8s/kind=Ingress".to_string(),
            "k8s/namespace=default".to_string(),
        ])
        .unwrap();
        assert_eq!(labels.get("k8s/kind"), Some(&"Ingress".to_string()));
        assert_eq!(labels.get("k8s/namespace"), Some(&"default".to_string()));

        assert!(parse_labels(&["oops".to_string()]).is_err());
    }

    #[test]
    fn update_order_values() {
        assert_eq!(parse_update_order("teardown").unwrap(), UpdateOrder::Teardown);
        assert_eq!(parse_update_order("setup").unwrap(), UpdateOrder::Setup);
        assert!(parse_update_order("sideways").is_err());
    }
}
