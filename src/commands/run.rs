use anyhow::Result;
use sitewatch::config::Config;
use sitewatch::monitor::{CustomerOutcome, RunOrchestrator};
use sitewatch::notify::LogSink;
use sitewatch::types::RunType;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::warn;

use super::open_store;

pub async fn run_monitor(config: Config, run_type: RunType, json: bool) -> Result<()> {
    let store = Arc::new(open_store(&config)?);
    let orchestrator = RunOrchestrator::from_config(&config, store, Arc::new(LogSink))?;

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let summary = orchestrator.run(run_type).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("\n{} run {}", summary.run_type, summary.run_id);
    println!("==========================================");
    println!(
        "Customers: {} total, {} succeeded, {} failed, {} skipped ({} ms)",
        summary.total, summary.succeeded, summary.failed, summary.skipped, summary.elapsed_ms
    );
    for result in &summary.customers {
        let status = match &result.outcome {
            CustomerOutcome::Succeeded { findings } => format!("ok, {} new findings", findings),
            CustomerOutcome::Failed { error } => format!("failed: {}", error),
            CustomerOutcome::Skipped => "skipped".to_string(),
        };
        println!(
            "  {:<24} {}  [critical {}, warning {}, info {}]",
            result.name, status, result.counts.critical, result.counts.warning, result.counts.info
        );
        if let Some(coverage) = summary.coverage_of(&result.customer_id) {
            println!(
                "    urls {}/{} sampled, {} ok, {} errors, {} x 429, {} x 404, {} broken links",
                coverage.sampled_urls,
                coverage.total_urls,
                coverage.success_count,
                coverage.error_count,
                coverage.http_429_count,
                coverage.http_404_count,
                coverage.broken_link_count
            );
        }
    }
    Ok(())
}
