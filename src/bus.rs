//! Fan-out of schedule changes to live subscribers.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use utoipa::ToSchema;

use crate::models::{BlockId, InstanceId, SeriesId};
use crate::scheduler::SeriesEditOutcome;
use crate::split::DeleteOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleNotification {
    #[serde(rename_all = "camelCase")]
    SeriesCreated { series_id: SeriesId },
    #[serde(rename_all = "camelCase")]
    SeriesUpdated { series_id: SeriesId },
    #[serde(rename_all = "camelCase")]
    SeriesDeleted { series_id: SeriesId },
    SeriesEdited { outcome: SeriesEditOutcome },
    #[serde(rename_all = "camelCase")]
    OccurrenceChanged {
        series_id: SeriesId,
        instance_id: InstanceId,
    },
    OccurrenceDeleted { outcome: DeleteOutcome },
    #[serde(rename_all = "camelCase")]
    AttendanceRecorded { instance_id: InstanceId },
    #[serde(rename_all = "camelCase")]
    BlockCreated { block_id: BlockId },
    #[serde(rename_all = "camelCase")]
    BlockDeleted { block_id: BlockId },
}

/// Publish/subscribe handle shared by the HTTP layer. Clones share one channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ScheduleNotification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns how many subscribers received the notification.
    pub fn publish(&self, notification: ScheduleNotification) -> usize {
        match self.sender.send(notification) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("no live subscribers, notification dropped");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleNotification> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
