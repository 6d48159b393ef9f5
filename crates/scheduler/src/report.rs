//! Periodic scheduler reports and notifications.

use serde::Serialize;

use crate::queue::{PriorityBreakdown, QueueStatus};

/// Snapshot produced on every stats tick. Building one mutates nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerReport {
    pub generated_at: u64,
    pub queue: QueueStatus,
    pub pending_by_priority: PriorityBreakdown,
    pub storage_utilization: f64,
    pub network_efficiency: f64,
    pub recommendations: Vec<String>,
}

/// Event pushed to [`IngestionScheduler::subscribe`](crate::IngestionScheduler::subscribe) receivers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerNotification {
    Completed {
        item_id: String,
        fingerprint: Option<String>,
    },
    Retrying {
        item_id: String,
        attempt: u32,
        reason: String,
    },
    Failed {
        item_id: String,
        attempts: u32,
        reason: String,
    },
    Report(SchedulerReport),
}

pub(crate) struct Thresholds {
    pub utilization_low: f64,
    pub backlog_high: usize,
}

pub(crate) fn recommendations(
    thresholds: &Thresholds,
    queue: &QueueStatus,
    storage_utilization: f64,
) -> Vec<String> {
    let mut out = Vec::new();
    if storage_utilization < thresholds.utilization_low {
        out.push(format!(
            "storage utilization {:.1}% below {:.1}%: merge or retire idle nodes",
            storage_utilization, thresholds.utilization_low
        ));
    }
    if queue.pending > thresholds.backlog_high {
        out.push(format!(
            "queue backlog high: {} pending (threshold {})",
            queue.pending, thresholds.backlog_high
        ));
    }
    if queue.failed > 0 {
        out.push(format!("{} failed items require attention", queue.failed));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Thresholds = Thresholds {
        utilization_low: 30.0,
        backlog_high: 50,
    };

    #[test]
    fn test_healthy_state_has_no_recommendations() {
        let q = QueueStatus {
            pending: 50,
            ..QueueStatus::default()
        };
        assert!(recommendations(&T, &q, 30.0).is_empty());
    }

    #[test]
    fn test_all_recommendations() {
        let q = QueueStatus {
            pending: 51,
            failed: 2,
            ..QueueStatus::default()
        };
        let recs = recommendations(&T, &q, 12.5);
        assert_eq!(recs.len(), 3);
        assert!(recs[0].starts_with("storage utilization 12.5%"));
        assert!(recs[1].starts_with("queue backlog high: 51"));
        assert_eq!(recs[2], "2 failed items require attention");
    }

    #[test]
    fn test_notification_serializes_with_kind_tag() {
        let n = SchedulerNotification::Failed {
            item_id: "item-1".into(),
            attempts: 4,
            reason: "down".into(),
        };
        let json = serde_json::to_value(&n).expect("json");
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["attempts"], 4);
    }
}
