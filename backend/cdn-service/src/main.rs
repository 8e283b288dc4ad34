use anyhow::Context;
use cdn_service::models::regions;
use cdn_service::services::{CdnController, EdgeNode, OriginBucket};
use cdn_service::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        service = %config.service_name,
        edge_index = config.edge_index.as_str(),
        max_attempts = config.retry.max_attempts,
        "Starting cdn-service demo"
    );

    let controller = Arc::new(CdnController::from_config(&config));
    let origin = OriginBucket::new(Arc::clone(controller.registry()));
    origin.add_listener("controller", controller.clone());

    let mumbai =
        Arc::new(EdgeNode::new("edge-mumbai", "AP").with_latency(Duration::from_millis(20)));
    let california =
        Arc::new(EdgeNode::new("edge-california", "US").with_latency(Duration::from_millis(5)));
    controller.register_edge(&mumbai);
    controller.register_edge(&california);

    // Regional upload: only the AP edge is a push target
    let first = origin
        .upload_with_body("logo.png", "s3://origin/logo.png", b"logo-v1", regions(["AP"]))
        .await?;
    tracing::info!(
        version = first.outcome.content.version,
        "Uploaded logo.png for AP"
    );

    // Same bytes again: deduplicated, nothing published
    let repeat = origin
        .upload_with_body("logo.png", "s3://origin/logo.png", b"logo-v1", regions(["AP"]))
        .await?;
    tracing::info!(
        distribution_required = repeat.outcome.distribution_required,
        "Re-uploaded identical logo.png"
    );

    // Global upload while Mumbai is unreachable: its push exhausts retries
    mumbai.set_unreachable(true);
    let banner = origin
        .upload_with_body(
            "banner.jpg",
            "s3://origin/banner.jpg",
            b"banner-v1",
            regions(Vec::<String>::new()),
        )
        .await?;
    for report in &banner.distributions {
        tracing::info!(
            report = %serde_json::to_string(report)?,
            "Distribution report for banner.jpg"
        );
    }
    mumbai.set_unreachable(false);

    // Mumbai missed the push, so its read pulls from origin
    let payload = mumbai.read(controller.as_ref(), "banner.jpg").await?;
    tracing::info!(payload = %payload, pulls = mumbai.pull_count(), "Mumbai served banner.jpg");

    // California holds a fresh pushed copy and serves locally
    let payload = california.read(controller.as_ref(), "banner.jpg").await?;
    tracing::info!(
        payload = %payload,
        pulls = california.pull_count(),
        "California served banner.jpg"
    );

    // Invalidation marks every cached copy stale without pushing
    let invalidation = controller.invalidate_globally("banner.jpg")?;
    tracing::info!(edges = ?invalidation.marked_stale, "Invalidated banner.jpg");
    california.read(controller.as_ref(), "banner.jpg").await?;

    tracing::info!(
        registry = %serde_json::to_string_pretty(&controller.registry().snapshot())?,
        "Registry snapshot"
    );
    tracing::info!(
        edges = %serde_json::to_string_pretty(&controller.edge_snapshots())?,
        "Edge snapshots"
    );
    tracing::info!(
        stats = %serde_json::to_string(&controller.publisher().stats())?,
        "Delivery stats"
    );

    // Dropping the last handle takes the edge out of every fan-out
    drop(california);
    tracing::info!(
        live_subscribers = controller.publisher().subscriber_count(),
        "California edge dropped"
    );

    Ok(())
}
