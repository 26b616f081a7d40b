//! # Event Monitor
//!
//! The long-lived subscriber that turns the raw event stream into read
//! models and fraud alerts. Delivery from the bus is at-least-once, so the
//! monitor dedupes by event id before any side effect: re-processing the
//! same redemption event must not double-count a projection row or
//! double-fire an alert.
//!
//! Indeterminate check outcomes are logged at warn with their reason —
//! a check that could not run is an operational signal, not something to
//! swallow.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::config::MONITOR_DEDUP_CAPACITY;
use crate::event::EventEnvelope;
use crate::fraud::{CheckOutcome, FraudAlert, FraudAnalyzer};
use crate::projection::ProjectionStore;

/// What happened to one delivered envelope.
#[derive(Debug, PartialEq, Eq)]
pub enum Processed {
    /// Fresh event: projected, analyzed, alerts forwarded.
    Applied { alerts: usize },
    /// Already-seen event id: dropped before any side effect.
    Duplicate,
}

/// Folds the event stream into projections and fraud alerts.
pub struct EventMonitor {
    projections: Arc<dyn ProjectionStore>,
    analyzer: Arc<FraudAnalyzer>,
    alert_tx: mpsc::UnboundedSender<FraudAlert>,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
}

impl EventMonitor {
    /// Creates a monitor and the channel its alerts flow out of.
    pub fn new(
        projections: Arc<dyn ProjectionStore>,
        analyzer: Arc<FraudAnalyzer>,
    ) -> (Self, mpsc::UnboundedReceiver<FraudAlert>) {
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        (
            Self {
                projections,
                analyzer,
                alert_tx,
                seen: HashSet::new(),
                seen_order: VecDeque::new(),
            },
            alert_rx,
        )
    }

    /// Processes one envelope. Exposed for tests; [`run`](Self::run) is the
    /// production entry point.
    pub async fn process(&mut self, envelope: &EventEnvelope) -> Processed {
        if !self.remember(&envelope.event_id) {
            tracing::debug!(event_id = %envelope.event_id, "duplicate event delivery dropped");
            return Processed::Duplicate;
        }

        self.projections.apply(envelope);

        let mut alert_count = 0;
        for outcome in self.analyzer.assess(envelope).await {
            match outcome {
                CheckOutcome::Pass => {}
                CheckOutcome::Alert(alert) => {
                    tracing::warn!(
                        kind = %alert.kind,
                        severity = %alert.severity,
                        subject = %alert.subject,
                        "fraud alert raised"
                    );
                    alert_count += 1;
                    // A dropped receiver means nobody is listening for
                    // alerts anymore; the alert still exists in the logs.
                    let _ = self.alert_tx.send(alert);
                }
                CheckOutcome::Indeterminate { reason } => {
                    tracing::warn!(
                        event_id = %envelope.event_id,
                        %reason,
                        "fraud check could not be evaluated"
                    );
                }
            }
        }

        Processed::Applied {
            alerts: alert_count,
        }
    }

    /// Consumes envelopes from the bus until it closes. Lagged receivers
    /// log the gap and continue — the projection self-heals as later
    /// events arrive, and dedup makes any upstream replay safe.
    pub async fn run(mut self, mut rx: broadcast::Receiver<EventEnvelope>) {
        tracing::info!("event monitor started");
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    self.process(&envelope).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event monitor lagged behind the bus");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("event bus closed, monitor stopping");
                    break;
                }
            }
        }
    }

    /// Records an event id; returns false if it was already known. The
    /// memory is bounded — oldest ids are evicted first.
    fn remember(&mut self, event_id: &str) -> bool {
        if self.seen.contains(event_id) {
            return false;
        }
        self.seen.insert(event_id.to_string());
        self.seen_order.push_back(event_id.to_string());
        while self.seen_order.len() > MONITOR_DEDUP_CAPACITY {
            if let Some(evicted) = self.seen_order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::InMemoryContentStore;
    use crate::event::{EventBus, GeoPoint, LedgerEvent};
    use crate::fraud::{AuthorityDirectory, FraudConfig};
    use crate::projection::InMemoryProjectionStore;

    struct AllowAll;

    impl AuthorityDirectory for AllowAll {
        fn may_create_zones(&self, _actor: &str) -> bool {
            true
        }
    }

    struct DenyAll;

    impl AuthorityDirectory for DenyAll {
        fn may_create_zones(&self, _actor: &str) -> bool {
            false
        }
    }

    fn monitor_with(
        authority: Arc<dyn AuthorityDirectory>,
    ) -> (
        EventMonitor,
        mpsc::UnboundedReceiver<FraudAlert>,
        Arc<InMemoryProjectionStore>,
    ) {
        let projections = Arc::new(InMemoryProjectionStore::new());
        let analyzer = Arc::new(FraudAnalyzer::new(
            FraudConfig::default(),
            authority,
            Arc::new(InMemoryContentStore::new()),
        ));
        let (monitor, alert_rx) = EventMonitor::new(projections.clone(), analyzer);
        (monitor, alert_rx, projections)
    }

    fn redeemed(voucher: &str) -> EventEnvelope {
        EventEnvelope::new(
            format!("tx-{}", voucher),
            LedgerEvent::VoucherRedeemed {
                redemption_id: format!("red-{}", voucher),
                voucher_id: voucher.into(),
                vendor_id: "ven-1".into(),
                zone_id: "z1".into(),
                amount: 10_000,
                category: "food".into(),
                geo: None,
            },
        )
    }

    #[tokio::test]
    async fn fresh_event_is_projected() {
        let (mut monitor, _alerts, projections) = monitor_with(Arc::new(AllowAll));
        let result = monitor.process(&redeemed("vch-1")).await;

        assert_eq!(result, Processed::Applied { alerts: 0 });
        assert_eq!(projections.redemption_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_does_not_double_count() {
        let (mut monitor, _alerts, projections) = monitor_with(Arc::new(AllowAll));
        let env = redeemed("vch-1");

        assert_eq!(monitor.process(&env).await, Processed::Applied { alerts: 0 });
        assert_eq!(monitor.process(&env).await, Processed::Duplicate);
        assert_eq!(projections.redemption_count(), 1);
    }

    #[tokio::test]
    async fn alerts_flow_to_the_sink_exactly_once() {
        let (mut monitor, mut alerts, _projections) = monitor_with(Arc::new(DenyAll));
        let env = EventEnvelope::new(
            "tx-z".into(),
            LedgerEvent::ZoneCreated {
                zone_id: "z1".into(),
                name: "Flood Response".into(),
                center: GeoPoint::new(0.0, 0.0),
                radius_meters: 1_000.0,
                initial_funding: 1_000,
                creator: "rogue".into(),
            },
        );

        assert_eq!(monitor.process(&env).await, Processed::Applied { alerts: 1 });
        assert!(alerts.try_recv().is_ok());

        // Re-delivery of the same envelope must not re-fire the alert.
        assert_eq!(monitor.process(&env).await, Processed::Duplicate);
        assert!(alerts.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_drains_the_bus_until_close() {
        let (monitor, _alerts, projections) = monitor_with(Arc::new(AllowAll));
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        let handle = tokio::spawn(monitor.run(rx));

        bus.publish(redeemed("vch-1"));
        bus.publish(redeemed("vch-2"));
        drop(bus);

        handle.await.unwrap();
        assert_eq!(projections.redemption_count(), 2);
    }
}
