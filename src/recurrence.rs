//! Weekly recurrence rules and their expansion into occurrence start instants.
//!
//! Weekdays are numbered 0 = Sunday through 6 = Saturday, both when rules are
//! parsed from requests and when they are expanded.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};
use rrule::{NWeekday, RRule, RRuleError, RRuleSet, Tz};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::models::TimeWindow;

/// Upper bound on occurrences read from one rule set.
const MAX_OCCURRENCES: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    /// Anything the engine cannot expand. Kept so a bad rule renders as empty instead of failing.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default, deserialize_with = "weekday_numbers")]
    #[schema(value_type = Vec<u8>)]
    pub days_of_week: BTreeSet<u8>,
}

/// Accepts any integers and keeps the ones naming a weekday.
fn weekday_numbers<'de, D>(deserializer: D) -> Result<BTreeSet<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<i64>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|day| u8::try_from(day).ok())
        .filter(|day| weekday_from_number(*day).is_some())
        .collect())
}

pub fn weekday_number(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

pub fn weekday_from_number(number: u8) -> Option<Weekday> {
    (number <= 6).then(|| (0..number).fold(Weekday::Sun, |day, _| day.succ()))
}

impl RecurrenceRule {
    pub fn weekly(days: impl IntoIterator<Item = Weekday>) -> Self {
        Self {
            frequency: Frequency::Weekly,
            days_of_week: days.into_iter().map(weekday_number).collect(),
        }
    }

    /// True when the rule can produce at least one occurrence.
    pub fn is_expandable(&self) -> bool {
        self.frequency == Frequency::Weekly && !self.weekdays().is_empty()
    }

    pub fn weekdays(&self) -> Vec<Weekday> {
        self.days_of_week
            .iter()
            .filter_map(|day| weekday_from_number(*day))
            .collect()
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        self.days_of_week.contains(&weekday_number(date.weekday()))
    }

    /// Swap the weekday of `from` for the weekday of `to`, used when an edit moves an occurrence.
    pub fn with_moved_weekday(&self, from: NaiveDate, to: NaiveDate) -> Self {
        let mut days_of_week = self.days_of_week.clone();
        days_of_week.remove(&weekday_number(from.weekday()));
        days_of_week.insert(weekday_number(to.weekday()));
        Self {
            frequency: self.frequency,
            days_of_week,
        }
    }

    fn to_rule_set(
        &self,
        start: DateTime<Utc>,
        recurrence_end: Option<NaiveDate>,
    ) -> Result<RRuleSet, RRuleError> {
        let tz: Tz = Utc.into();
        let by_weekday = self.weekdays().into_iter().map(NWeekday::Every).collect();
        let mut rule = RRule::new(rrule::Frequency::Weekly).by_weekday(by_weekday);
        if let Some(until) = recurrence_end {
            let next_midnight = until.and_time(NaiveTime::MIN).and_utc() + TimeDelta::days(1);
            let end_of_day = next_midnight - TimeDelta::seconds(1);
            rule = rule.until(end_of_day.with_timezone(&tz));
        }
        rule.build(start.with_timezone(&tz))
    }
}

/// Occurrence start instants of a template inside `window`, ascending.
///
/// Without a rule the template occurs once, at `start`. With a rule, every matching
/// weekday from `start` on is produced, up to the end of `recurrence_end` (inclusive).
pub fn expand(
    start: DateTime<Utc>,
    rule: Option<&RecurrenceRule>,
    recurrence_end: Option<NaiveDate>,
    window: &TimeWindow,
) -> Vec<DateTime<Utc>> {
    let Some(rule) = rule else {
        return if window.contains(start) {
            vec![start]
        } else {
            Vec::new()
        };
    };

    if !rule.is_expandable() {
        warn!(?rule, "recurrence rule cannot be expanded, rendering no occurrences");
        return Vec::new();
    }
    if recurrence_end.is_some_and(|until| until < start.date_naive()) {
        return Vec::new();
    }

    let rule_set = match rule.to_rule_set(start, recurrence_end) {
        Ok(rule_set) => rule_set,
        Err(err) => {
            warn!(?rule, error = %err, "recurrence rule rejected, rendering no occurrences");
            return Vec::new();
        }
    };

    // after/before are exclusive bounds.
    let tz: Tz = Utc.into();
    let result = rule_set
        .after((window.start - TimeDelta::seconds(1)).with_timezone(&tz))
        .before((window.end + TimeDelta::seconds(1)).with_timezone(&tz))
        .all(MAX_OCCURRENCES);
    if result.limited {
        warn!(?rule, "recurrence expansion hit the occurrence limit");
    }

    let time = start.time();
    result
        .dates
        .into_iter()
        .map(|occurrence| occurrence.date_naive())
        // DTSTART itself only counts when it falls on a rule weekday.
        .filter(|day| rule.matches(*day))
        .map(|day| day.and_time(time).and_utc())
        .filter(|instant| *instant >= start && window.contains(*instant))
        .collect()
}
