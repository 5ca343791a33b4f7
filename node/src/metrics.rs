//! # Prometheus Metrics
//!
//! Operational metrics for the engine, scraped at `/metrics` on the metrics
//! port. Everything is registered in a dedicated registry with the
//! `shieldmint` prefix.
//!
//! The counters are fed from the ledger's event stream by
//! [`spawn_event_recorder`]; gauges are refreshed from the ledger after each
//! event.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use shieldmint_protocol::ledger::{LedgerEvent, StatusCounts, VaultLedger};
use shieldmint_protocol::monitor::LiquidationMonitor;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Ledger events by kind (`created`, `minted`, `mint_rejected`, ...).
    pub ledger_events_total: IntCounterVec,
    /// Vaults by lifecycle status.
    pub vaults: IntGaugeVec,
    /// Vaults awaiting operator review.
    pub review_queue: IntGauge,
    /// Current binding epoch.
    pub binding_epoch: IntGauge,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("shieldmint".into()), None)?;

        let ledger_events_total = IntCounterVec::new(
            Opts::new("ledger_events_total", "Ledger events by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(ledger_events_total.clone()))?;

        let vaults = IntGaugeVec::new(Opts::new("vaults", "Vaults by lifecycle status"), &["status"])?;
        registry.register(Box::new(vaults.clone()))?;

        let review_queue = IntGauge::new("review_queue", "Vaults flagged for operator review")?;
        registry.register(Box::new(review_queue.clone()))?;

        let binding_epoch = IntGauge::new("binding_epoch", "Current proof binding epoch")?;
        registry.register(Box::new(binding_epoch.clone()))?;

        Ok(Self {
            registry,
            ledger_events_total,
            vaults,
            review_queue,
            binding_epoch,
        })
    }

    pub fn record_event(&self, event: &LedgerEvent) {
        self.ledger_events_total.with_label_values(&[event.kind()]).inc();
    }

    pub fn observe_counts(&self, counts: StatusCounts) {
        self.vaults.with_label_values(&["active"]).set(counts.active as i64);
        self.vaults.with_label_values(&["liquidating"]).set(counts.liquidating as i64);
        self.vaults.with_label_values(&["closed"]).set(counts.closed as i64);
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Update metrics from ledger events until the ledger goes away.
pub fn spawn_event_recorder(
    metrics: SharedMetrics,
    ledger: Arc<VaultLedger>,
    monitor: Arc<LiquidationMonitor>,
) -> JoinHandle<()> {
    let mut events = ledger.subscribe();
    metrics.observe_counts(ledger.status_counts());
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => metrics.record_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "metrics recorder lagged behind ledger events");
                }
                Err(RecvError::Closed) => break,
            }
            metrics.observe_counts(ledger.status_counts());
            metrics.review_queue.set(monitor.review_queue().len() as i64);
            metrics.binding_epoch.set(ledger.verifier().epoch() as i64);
        }
    })
}

/// `GET /metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shieldmint_protocol::types::{OwnerId, VaultId};

    #[test]
    fn events_and_counts_are_exported() {
        let metrics = NodeMetrics::new().expect("registry");
        metrics.record_event(&LedgerEvent::VaultCreated {
            vault_id: VaultId(1),
            owner: OwnerId::new("alice"),
            at: Utc::now(),
        });
        metrics.observe_counts(StatusCounts {
            active: 3,
            liquidating: 1,
            closed: 0,
        });
        let text = metrics.encode().expect("encode");
        assert!(text.contains("shieldmint_ledger_events_total{kind=\"created\"} 1"));
        assert!(text.contains("shieldmint_vaults{status=\"active\"} 3"));
    }
}
