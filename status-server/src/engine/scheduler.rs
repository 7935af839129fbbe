//! Evaluation loop
//!
//! Periodic ticks and report store change events both end up in
//! [`ConsensusEvaluator::evaluate_line`], which serializes per line.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::consensus::{ConsensusEvaluator, LineOutcome};
use super::report_store::ReportStoreEvent;

pub async fn run_evaluation_loop(
    evaluator: Arc<ConsensusEvaluator>,
    mut changes: mpsc::Receiver<ReportStoreEvent>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!("Consensus evaluation loop started (every {:?})", every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match evaluator.evaluate_all().await {
                    Ok(summary) if summary.started + summary.solved + summary.cleared > 0 || !summary.failed.is_empty() => {
                        tracing::info!(
                            "Evaluated {} lines: {} started, {} solved, {} cleared, {} failed",
                            summary.evaluated, summary.started, summary.solved, summary.cleared, summary.failed.len()
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Consensus evaluation pass failed: {}", e),
                }
            }
            Some(event) = changes.recv() => {
                match evaluator.evaluate_line_id(&event.line_id).await {
                    Ok(LineOutcome::Unchanged) => {}
                    Ok(outcome) => tracing::debug!("Line {} after {:?} report: {:?}", event.line_id, event.kind, outcome),
                    Err(e) => tracing::warn!("Consensus evaluation failed for line {}: {}", event.line_id, e),
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("Consensus evaluation loop stopped");
}
