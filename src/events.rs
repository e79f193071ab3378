//! Lifecycle events for the notification layer.

use jiff::Timestamp;
use serde::Serialize;
use stallkeep_core::{Channel, RejectionReason};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Something the notification/webhook layer may want to deliver.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    #[serde(rename = "submission.submitted")]
    SubmissionSubmitted {
        submission_id: Uuid,
        listing: String,
        version: String,
    },
    #[serde(rename = "submission.approved")]
    SubmissionApproved {
        submission_id: Uuid,
        listing: String,
        version: String,
        approver_id: String,
    },
    #[serde(rename = "submission.rejected")]
    SubmissionRejected {
        submission_id: Uuid,
        listing: String,
        reason: RejectionReason,
        can_resubmit: bool,
    },
    #[serde(rename = "submission.changes_requested")]
    ChangesRequested {
        submission_id: Uuid,
        listing: String,
        changes: usize,
        deadline: Timestamp,
    },
    #[serde(rename = "version.published")]
    VersionPublished {
        listing: String,
        version: String,
        channel: Channel,
    },
    #[serde(rename = "version.yanked")]
    VersionYanked {
        listing: String,
        version: String,
        reason: String,
    },
    #[serde(rename = "installation.installed")]
    Installed {
        installation_id: Uuid,
        listing: String,
        tenant_id: String,
        version: String,
        trial: bool,
    },
    #[serde(rename = "installation.uninstalled")]
    Uninstalled {
        installation_id: Uuid,
        listing: String,
        tenant_id: String,
    },
    #[serde(rename = "installation.updated")]
    Updated {
        installation_id: Uuid,
        listing: String,
        tenant_id: String,
        from: String,
        to: String,
    },
    #[serde(rename = "installation.suspended")]
    InstallationSuspended {
        installation_id: Uuid,
        listing: String,
        tenant_id: String,
        reason: String,
    },
    #[serde(rename = "trial.expired")]
    TrialExpired {
        installation_id: Uuid,
        listing: String,
        tenant_id: String,
    },
}

impl LifecycleEvent {
    /// Dotted event name, as serialized in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::SubmissionSubmitted { .. } => "submission.submitted",
            LifecycleEvent::SubmissionApproved { .. } => "submission.approved",
            LifecycleEvent::SubmissionRejected { .. } => "submission.rejected",
            LifecycleEvent::ChangesRequested { .. } => "submission.changes_requested",
            LifecycleEvent::VersionPublished { .. } => "version.published",
            LifecycleEvent::VersionYanked { .. } => "version.yanked",
            LifecycleEvent::Installed { .. } => "installation.installed",
            LifecycleEvent::Uninstalled { .. } => "installation.uninstalled",
            LifecycleEvent::Updated { .. } => "installation.updated",
            LifecycleEvent::InstallationSuspended { .. } => "installation.suspended",
            LifecycleEvent::TrialExpired { .. } => "trial.expired",
        }
    }
}

/// Broadcast-based bus for lifecycle events.
///
/// Publishing never blocks and never fails; with no subscribers the event
/// is dropped. A subscriber that falls behind receives `RecvError::Lagged`.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yanked(i: usize) -> LifecycleEvent {
        LifecycleEvent::VersionYanked {
            listing: "order-export".into(),
            version: format!("1.0.{i}"),
            reason: "broken".into(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(yanked(1));

        assert_eq!(rx1.recv().await.unwrap().name(), "version.yanked");
        assert_eq!(rx2.recv().await.unwrap().name(), "version.yanked");
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(yanked(1));
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(yanked(i));
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            other => panic!("expected Lagged, got {other:?}"),
        }
    }

    #[test]
    fn type_tag_matches_name() {
        let event = LifecycleEvent::TrialExpired {
            installation_id: Uuid::nil(),
            listing: "order-export".into(),
            tenant_id: "t-1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(json["tenant_id"], "t-1");
    }
}
