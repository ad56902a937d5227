use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

use crate::domain::controller_model::utils::id::RequestId;
use crate::domain::controller_model::utils::interval::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    New,
    Modified,
    Deleted,
}

/// Message for the owner of a reservation. Queued by the scheduler and handed to the sink at the end
/// of a run, only for reservations whose transaction was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationNotification {
    pub notification_type: NotificationType,
    pub request_id: Option<RequestId>,
    pub interval: Interval,
    pub description: String,
}

impl fmt::Display for ReservationNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let request = self.request_id.as_ref().map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
        write!(f, "[{:?}] request {}: {}", self.notification_type, request, self.description)
    }
}

pub trait NotificationSink: fmt::Debug + Send + Sync {
    fn notify(&self, notification: ReservationNotification);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, notification: ReservationNotification) {
        log::info!("Notification {}", notification);
    }
}

/// Keeps notifications in memory until they are drained.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    queue: Mutex<Vec<ReservationNotification>>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<ReservationNotification> {
        match self.queue.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl NotificationSink for NotificationQueue {
    fn notify(&self, notification: ReservationNotification) {
        match self.queue.lock() {
            Ok(mut queue) => queue.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}
