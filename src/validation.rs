use chrono::{DateTime, NaiveDate, Utc};

use crate::error::ApiError;
use crate::models::{CoachId, ParticipantId, TimeWindow};
use crate::occurrence_index::Viewer;

/// Parses an RFC 3339 instant or a plain `YYYY-MM-DD` date. Plain dates resolve to
/// the start of the day, or its last instant when `end_of_day` is set.
pub fn parse_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date or datetime: {raw}")))?;
    let day = TimeWindow::for_day(date)
        .ok_or_else(|| ApiError::BadRequest(format!("date out of range: {raw}")))?;
    Ok(if end_of_day { day.end } else { day.start })
}

pub fn validate_window(from: &str, to: &str, max_days: u32) -> Result<TimeWindow, ApiError> {
    let start = parse_bound(from, false)?;
    let end = parse_bound(to, true)?;
    let window = TimeWindow::new(start, end)
        .ok_or_else(|| ApiError::BadRequest("from must not be after to".into()))?;
    if window.days() > i64::from(max_days) {
        return Err(ApiError::BadRequest(format!(
            "window must not exceed {max_days} days"
        )));
    }
    Ok(window)
}

pub fn validate_viewer(
    coach_id: Option<CoachId>,
    participant_id: Option<ParticipantId>,
) -> Result<Viewer, ApiError> {
    match (coach_id, participant_id) {
        (Some(coach_id), None) => Ok(Viewer::Coach(coach_id)),
        (None, Some(participant_id)) => Ok(Viewer::Participant(participant_id)),
        _ => Err(ApiError::BadRequest(
            "exactly one of coachId or participantId is required".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_parse_bound() {
        assert_eq!(
            parse_bound("2024-01-08", false).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
        );
        assert!(parse_bound("2024-01-08", true).unwrap() > Utc.with_ymd_and_hms(2024, 1, 8, 23, 59, 59).unwrap());
        assert_eq!(
            parse_bound("2024-01-08T10:00:00+02:00", true).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 8, 8, 0, 0).unwrap()
        );
        assert!(parse_bound("next tuesday", false).is_err());
    }

    #[test]
    fn test_validate_window() {
        let window = validate_window("2024-01-01", "2024-01-15", 62).unwrap();
        assert_eq!(window.days(), 15);
        assert!(validate_window("2024-01-15", "2024-01-01", 62).is_err());
        assert!(validate_window("2024-01-01", "2024-06-01", 62).is_err());
    }

    #[test]
    fn test_validate_viewer() {
        assert_eq!(validate_viewer(Some(3), None).unwrap(), Viewer::Coach(3));
        assert_eq!(validate_viewer(None, Some(4)).unwrap(), Viewer::Participant(4));
        assert!(validate_viewer(None, None).is_err());
        assert!(validate_viewer(Some(3), Some(4)).is_err());
    }
}
