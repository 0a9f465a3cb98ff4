use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use petasos_core::app::{NodeBuilder, PetasosConfig, PetasosNode};
use petasos_core::domain::{
    ActionableTaskId, ClusterMode, ExecutionStatus, FulfillerComponentId, FulfillmentTask,
    FulfillmentTaskId, MetricSet, ServiceName, SubscriptionSummary, SystemMode,
};
use petasos_core::impls::{InMemoryCluster, InMemoryCollector};

const LADON: &str = "ladon";

fn load_config() -> anyhow::Result<PetasosConfig> {
    match std::env::var("PETASOS_CONFIG") {
        Ok(path) => PetasosConfig::from_path(&path)
            .with_context(|| format!("loading PETASOS_CONFIG={path}")),
        Err(_) => Ok(PetasosConfig::default()),
    }
}

/// `base` with the node section replaced for one member of the demo cluster.
fn node_config(base: &PetasosConfig, service: &str, address: &str) -> PetasosConfig {
    let mut config = base.clone();
    config.node.service_name = service.to_string();
    config.node.address = address.to_string();
    config.node.cluster_mode = ClusterMode::Clustered;
    config.node.system_mode = SystemMode::Clustered;
    config
}

fn ladon(
    cluster: &InMemoryCluster,
    base: &PetasosConfig,
    address: &str,
) -> anyhow::Result<PetasosNode> {
    let config = node_config(base, LADON, address);
    let (transport, inbound) = cluster.join(config.node.service_name(), config.node.address());
    let node = NodeBuilder::new(config)
        .transport(transport, inbound)
        .accept_redirects()
        .build()?;
    Ok(node)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let base = load_config()?;
    let cluster = InMemoryCluster::new("petasos-demo");

    // The collector joins first so every ladon node sees it on startup.
    let collector = Arc::new(InMemoryCollector::new());
    let collector_config = node_config(&base, &base.collector.service_name, "collector-0");
    let (transport, inbound) = cluster.join(
        collector_config.node.service_name(),
        collector_config.node.address(),
    );
    let _collector_node = NodeBuilder::new(collector_config)
        .transport(transport, inbound)
        .collector(collector.clone())
        .build()?;

    let first = ladon(&cluster, &base, "ladon-0")?;
    let second = ladon(&cluster, &base, "ladon-1")?;
    let drain = first.start_audit_drain();

    // Two attempts at one actionable task: only one may execute.
    let actionable = ActionableTaskId::from_ulid(Ulid::new());
    let attempt = |component: &str| {
        FulfillmentTask::new(
            FulfillmentTaskId::from_ulid(Ulid::new()),
            actionable,
            FulfillerComponentId::new(component),
            serde_json::json!({ "resource": "Patient/42" }),
        )
    };
    let a = first
        .coordinator()
        .register_fulfillment_task(attempt("wup.ingress"), false)
        .await?;
    let b = second
        .coordinator()
        .register_fulfillment_task(attempt("wup.ingress"), false)
        .await?;
    let (a_granted, b_granted) = (
        a.job_card.as_ref().is_some_and(|card| card.may_execute()),
        b.job_card.as_ref().is_some_and(|card| card.may_execute()),
    );
    info!(a_granted, b_granted, "execution privileges decided");
    if a_granted == b_granted {
        bail!("expected exactly one attempt to hold the grant");
    }

    let (winner, loser, loser_node) = if a_granted {
        (&a, &b, &second)
    } else {
        (&b, &a, &first)
    };
    let winner_node = if a_granted { &first } else { &second };
    winner_node
        .coordinator()
        .notify_execution_start(winner.task_id)
        .await?;
    winner_node
        .coordinator()
        .notify_execution_finish(winner.task_id)
        .await?;
    let retried = loser_node
        .coordinator()
        .request_execution_privilege(loser.task_id)
        .await?;
    info!(granted = retried.may_execute(), "second attempt asked again");

    // ladon-0 is the first member of the service, so the hand-over lands there.
    let handed = FulfillmentTask::new(
        FulfillmentTaskId::from_ulid(Ulid::new()),
        ActionableTaskId::from_ulid(Ulid::new()),
        FulfillerComponentId::new("wup.egress"),
        serde_json::Value::Null,
    );
    let accepted = second
        .redirector()
        .redirect_task(&ServiceName::new(LADON), handed)
        .await;
    info!(accepted = accepted.is_some(), "redirect finished");

    let collector_service = base.collector.service_name();
    let replicator = first.replicator();
    let processed = first.coordinator().tasks_in_status(ExecutionStatus::Finished).len();
    replicator
        .replicate_metric_set(
            &collector_service,
            MetricSet::new("wup.ingress", Utc::now()).with("finished", processed as f64),
        )
        .await;
    replicator
        .replicate_topology(&collector_service, replicator.local_topology())
        .await;
    replicator
        .replicate_subscription_summary(
            &collector_service,
            SubscriptionSummary {
                subscriber: "wup.egress".into(),
                topics: vec!["fhir.Patient".into()],
                captured_at: Utc::now(),
            },
        )
        .await;

    let report = first.audit().flush_once().await;
    info!(delivered = report.delivered, "audit flushed");

    let stats = drain.shutdown_and_join().await;
    info!(
        audit_events = collector.audit_events().len(),
        metric_updates = collector.metric_updates().len(),
        topology_snapshots = collector.topology_snapshots().len(),
        subscription_summaries = collector.subscription_summaries().len(),
        diverted = stats.diverted,
        "demo finished"
    );
    Ok(())
}
