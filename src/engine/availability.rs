use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Daily opening policy shared by every provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingHours {
    /// Minutes after UTC midnight.
    pub open_minute: u32,
    pub close_minute: u32,
    pub closed_days: Vec<Weekday>,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            open_minute: 9 * 60,
            close_minute: 18 * 60,
            closed_days: vec![Weekday::Sun],
        }
    }
}

impl WorkingHours {
    pub fn is_closed(&self, date: NaiveDate) -> bool {
        self.closed_days.contains(&date.weekday())
    }

    /// Span of a slot starting at `slot` (`HH:MM`) on `date`, validated
    /// against the opening policy.
    pub fn slot_span(&self, date: NaiveDate, slot: &str, duration_minutes: u32) -> Result<Span, EngineError> {
        if duration_minutes == 0 {
            return Err(EngineError::InvalidInput("service has no duration"));
        }
        if self.is_closed(date) {
            return Err(EngineError::InvalidSlot(format!("{date} is a closed day")));
        }
        let start = parse_hhmm(slot)?;
        if start < self.open_minute || start + duration_minutes > self.close_minute {
            return Err(EngineError::InvalidSlot(format!(
                "{slot} +{duration_minutes}m falls outside {}-{}",
                format_hhmm(self.open_minute),
                format_hhmm(self.close_minute)
            )));
        }
        Ok(Span::from_minutes(
            day_start(date) + Ms::from(start) * MINUTE_MS,
            duration_minutes,
        ))
    }
}

/// UTC midnight of `date`.
pub(crate) fn day_start(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

pub(crate) fn day_span(date: NaiveDate) -> Span {
    let start = day_start(date);
    Span::new(start, start + DAY_MS)
}

pub fn parse_hhmm(slot: &str) -> Result<u32, EngineError> {
    let t = NaiveTime::parse_from_str(slot, "%H:%M")
        .map_err(|_| EngineError::InvalidSlot(format!("{slot:?} is not HH:MM")))?;
    Ok(t.hour() * 60 + t.minute())
}

pub fn format_hhmm(minute_of_day: u32) -> String {
    format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Free slot starts (minutes after midnight), ascending.
///
/// Candidates tile the working day in steps of `duration` from opening time;
/// the last candidate ends at or before closing time. `blocked` holds
/// offsets from midnight (ms), sorted and merged.
pub fn free_slot_starts<'a>(
    hours: &WorkingHours,
    duration: u32,
    blocked: &'a [Span],
) -> impl Iterator<Item = u32> + 'a {
    let open = hours.open_minute;
    let close = hours.close_minute;
    let step = duration.max(1) as usize;
    let candidates = if duration == 0 || open + duration > close {
        0..0
    } else {
        open..close - duration + 1
    };
    candidates.step_by(step).filter(move |&start| {
        let candidate = Span::from_minutes(Ms::from(start) * MINUTE_MS, duration);
        !blocked.iter().any(|b| b.overlaps(&candidate))
    })
}

/// Offset of a booking from the start of `day`, clamped to the day.
/// Partial minutes round outward.
fn blocked_minutes(span: &Span, day: &Span) -> Span {
    let start = (span.start.max(day.start) - day.start) / MINUTE_MS;
    let end_ms = span.end.min(day.end) - day.start;
    let end = (end_ms + MINUTE_MS - 1) / MINUTE_MS;
    Span::new(start * MINUTE_MS, end * MINUTE_MS)
}

impl Engine {
    /// Free `HH:MM` slot starts for a service on a UTC calendar day.
    /// Recomputed on every call from the provider's active bookings.
    pub async fn available_slots(
        &self,
        service_id: Ulid,
        date: NaiveDate,
        exclude_booking_id: Option<Ulid>,
    ) -> Result<Vec<String>, EngineError> {
        let service = self
            .catalog
            .get_service(service_id)
            .await
            .ok_or(EngineError::NotFound("service", service_id))?;

        let hours = &self.config.hours;
        if hours.is_closed(date) {
            return Ok(Vec::new());
        }

        let day = day_span(date);
        let mut blocked: Vec<Span> = match self.existing_ledger(&service.provider_id) {
            Some(ledger) => {
                let guard = ledger.read().await;
                guard
                    .active_overlapping(&day)
                    .filter(|b| Some(b.id) != exclude_booking_id)
                    .map(|b| blocked_minutes(&b.span, &day))
                    .collect()
            }
            None => Vec::new(),
        };
        blocked.sort_by_key(|s| s.start);
        let blocked = merge_overlapping(&blocked);

        Ok(free_slot_starts(hours, service.duration_minutes, &blocked)
            .map(format_hhmm)
            .collect())
    }
}
