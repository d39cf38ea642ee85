use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::InstanceStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Completed,
    Canceled,
    Rescheduled,
}

impl From<InstanceStatus> for EventStatus {
    fn from(value: InstanceStatus) -> Self {
        match value {
            InstanceStatus::Scheduled => EventStatus::Scheduled,
            InstanceStatus::Canceled => EventStatus::Canceled,
            InstanceStatus::Rescheduled => EventStatus::Rescheduled,
            InstanceStatus::Completed => EventStatus::Completed,
        }
    }
}

/// Status of an occurrence: an explicit terminal value stored on an override
/// wins, otherwise anything dated before `today` is completed.
pub fn occurrence_status(
    effective_date: NaiveDate,
    today: NaiveDate,
    stored: Option<InstanceStatus>,
) -> EventStatus {
    match stored {
        Some(status) if status.is_terminal() => status.into(),
        _ if effective_date < today => EventStatus::Completed,
        _ => EventStatus::Scheduled,
    }
}
