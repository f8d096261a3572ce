use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;
use crate::observability;

const CHANNEL_CAPACITY: usize = 256;

/// What a notice is about. The gateway routes on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    RequestSubmitted,
    FirstStageDecision,
    FinalDecision,
    ReviewOverridden,
    ProbationCompleted,
}

/// Fire-and-forget message toward the notification gateway:
/// `(recipient employee, event kind, payload)`. Delivery is best-effort and
/// never gates the state change that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub employee_id: Ulid,
    pub kind: NoticeKind,
    pub payload: serde_json::Value,
}

impl Notice {
    /// Signal to a first-stage reviewer that their approval was overridden
    /// by a final-stage rejection.
    pub fn review_overridden(reviewer: Ulid, request_id: Ulid, reason: &str) -> Self {
        Self {
            employee_id: reviewer,
            kind: NoticeKind::ReviewOverridden,
            payload: json!({
                "request_id": request_id.to_string(),
                "reason": reason,
            }),
        }
    }
}

/// Derive the default notice for a committed event: addressed to the
/// employee the event concerns. Registry events produce none.
pub(crate) fn notice_for_event(event: &Event) -> Option<Notice> {
    match event {
        Event::RequestSubmitted {
            id,
            employee_id,
            range,
            days,
            ..
        } => Some(Notice {
            employee_id: *employee_id,
            kind: NoticeKind::RequestSubmitted,
            payload: json!({
                "request_id": id.to_string(),
                "start": range.start,
                "end": range.end,
                "days": days,
            }),
        }),
        Event::FirstStageApproved { id, employee_id, .. } => Some(Notice {
            employee_id: *employee_id,
            kind: NoticeKind::FirstStageDecision,
            payload: json!({ "request_id": id.to_string(), "approved": true }),
        }),
        Event::FirstStageRejected {
            id,
            employee_id,
            reason,
            ..
        } => Some(Notice {
            employee_id: *employee_id,
            kind: NoticeKind::FirstStageDecision,
            payload: json!({
                "request_id": id.to_string(),
                "approved": false,
                "reason": reason,
            }),
        }),
        Event::FinalApproved {
            id,
            employee_id,
            days,
            ..
        } => Some(Notice {
            employee_id: *employee_id,
            kind: NoticeKind::FinalDecision,
            payload: json!({
                "request_id": id.to_string(),
                "approved": true,
                "days": days,
            }),
        }),
        Event::FinalRejected {
            id,
            employee_id,
            reason,
            ..
        } => Some(Notice {
            employee_id: *employee_id,
            kind: NoticeKind::FinalDecision,
            payload: json!({
                "request_id": id.to_string(),
                "approved": false,
                "reason": reason,
            }),
        }),
        Event::ProbationCompleted {
            id,
            employee_id,
            at,
        } => Some(Notice {
            employee_id: *employee_id,
            kind: NoticeKind::ProbationCompleted,
            payload: json!({
                "probation_id": id.to_string(),
                "completed_at": at,
            }),
        }),
        _ => None,
    }
}

/// Broadcast hub for per-employee notices. The notification gateway
/// subscribes here; the engine only ever sends.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notices addressed to an employee. Creates the channel if
    /// needed.
    pub fn subscribe(&self, employee_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(employee_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notice. Never blocks; a notice nobody is listening for is
    /// counted and dropped.
    pub fn send(&self, notice: Notice) {
        let Some(sender) = self.channels.get(&notice.employee_id) else {
            metrics::counter!(observability::NOTICES_DROPPED_TOTAL).increment(1);
            return;
        };
        if sender.send(notice).is_err() {
            metrics::counter!(observability::NOTICES_DROPPED_TOTAL).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let employee = Ulid::new();
        let mut rx = hub.subscribe(employee);

        let notice = Notice {
            employee_id: employee,
            kind: NoticeKind::RequestSubmitted,
            payload: json!({ "days": 3 }),
        };
        hub.send(notice.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, notice);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — must not panic or block
        hub.send(Notice {
            employee_id: Ulid::new(),
            kind: NoticeKind::FinalDecision,
            payload: json!({}),
        });
    }

    #[test]
    fn registry_events_produce_no_notice() {
        let event = Event::RuleSet {
            status: crate::model::EmploymentStatus::Regular,
            term: crate::model::TermKind::Regular,
            category: None,
            days: 15,
        };
        assert!(notice_for_event(&event).is_none());
    }
}
