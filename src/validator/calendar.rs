use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike, Weekday};

use crate::limits::*;
use crate::model::{overlaps, Span};

use super::Finding;

const OPENING_HOURS: &str = "09:00-13:00, 14:00-18:00";

fn is_weekend(t: &NaiveDateTime) -> bool {
    matches!(t.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Whether a timestamp falls in an opening band, boundaries included.
pub fn in_opening_hours(t: &NaiveDateTime) -> bool {
    let secs = t.num_seconds_from_midnight();
    (MORNING_OPEN_SECS..=MORNING_CLOSE_SECS).contains(&secs)
        || (AFTERNOON_OPEN_SECS..=AFTERNOON_CLOSE_SECS).contains(&secs)
}

fn at_secs(t: &NaiveDateTime, secs: u32) -> NaiveDateTime {
    t.date().and_time(NaiveTime::MIN) + chrono::Duration::seconds(secs as i64)
}

/// Weekday, opening-hours, ordering and length rules. Needs no stored data.
pub(crate) fn check(span: &Span) -> Finding {
    let mut finding = Finding::default();

    if is_weekend(&span.start) {
        finding.error(format!(
            "appointments are only possible Monday to Friday; the start falls on a {}",
            span.start.format("%A")
        ));
    }
    if is_weekend(&span.end) && span.end.date() != span.start.date() {
        finding.error(format!(
            "appointments are only possible Monday to Friday; the end falls on a {}",
            span.end.format("%A")
        ));
    }

    let mut endpoints_ok = true;
    for (label, t) in [("start", &span.start), ("end", &span.end)] {
        if !in_opening_hours(t) {
            endpoints_ok = false;
            finding.error(format!(
                "{label} time {} is outside opening hours ({OPENING_HOURS})",
                t.format("%H:%M")
            ));
        }
    }
    if endpoints_ok {
        let closed_from = at_secs(&span.start, MORNING_CLOSE_SECS);
        let closed_until = at_secs(&span.start, AFTERNOON_OPEN_SECS);
        if overlaps(span.start, span.end, closed_from, closed_until) {
            finding.error("appointment overlaps the midday closure (13:00-14:00)");
        }
    }

    if span.start >= span.end {
        finding.error("start time must be before end time");
    }
    if span.start.date() != span.end.date() {
        finding.error("appointment must start and end on the same day");
    }

    if !span.is_empty() {
        let minutes = span.duration_minutes();
        if minutes < MIN_APPOINTMENT_MINUTES {
            finding.error(format!(
                "appointment must last at least {MIN_APPOINTMENT_MINUTES} minutes"
            ));
        }
        if minutes > MAX_APPOINTMENT_MINUTES {
            finding.error("appointment cannot last longer than 4 hours");
            finding.warn(format!("unusually long appointment ({minutes} minutes)"));
        }
    }

    finding
}
