use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::repo::Repository;

use super::EngineError;

const BANDS: [(u32, u32); 2] = [
    (MORNING_OPEN_SECS, MORNING_CLOSE_SECS),
    (AFTERNOON_OPEN_SECS, AFTERNOON_CLOSE_SECS),
];

fn is_working_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn at_secs(date: NaiveDate, secs: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + chrono::Duration::seconds(secs as i64)
}

/// Opening bands of every weekday touched by `window`, clamped to it.
pub fn working_spans(window: &Span) -> Vec<Span> {
    let mut spans = Vec::new();
    if window.is_empty() {
        return spans;
    }
    let last = window.end.date();
    let mut date = window.start.date();
    while date <= last {
        if is_working_day(date) {
            for (open, close) in BANDS {
                let band = Span::new(at_secs(date, open), at_secs(date, close));
                if band.overlaps(window) {
                    spans.push(band.clamp_to(window));
                }
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    spans
}

/// Monday-to-Friday dates in `first..=last`.
pub fn working_days(first: NaiveDate, last: NaiveDate) -> u32 {
    if first > last {
        return 0;
    }
    let days = (last - first).num_days() + 1;
    let weeks = days / 7;
    let offset = first.weekday().num_days_from_monday() as i64;
    let tail = (0..days % 7)
        .filter(|d| (offset + d) % 7 < 5)
        .count() as i64;
    u32::try_from(weeks * 5 + tail).unwrap_or(u32::MAX)
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

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

/// Cut each working span into `slot_minutes` pieces; a trailing remainder
/// becomes a short slot.
fn slot_grid(working: &[Span], slot_minutes: Minutes) -> Vec<Span> {
    let step = chrono::Duration::minutes(slot_minutes);
    let mut slots = Vec::new();
    for w in working {
        let mut start = w.start;
        while start < w.end {
            let end = (start + step).min(w.end);
            slots.push(Span::new(start, end));
            start = end;
        }
    }
    slots
}

/// `1 - booked / capacity` as a whole percentage, clamped to 0..=100.
pub(crate) fn availability_percent(booked: u32, capacity: u32) -> u8 {
    if capacity == 0 {
        return 0;
    }
    let free = 1.0 - f64::from(booked) / f64::from(capacity);
    (free * 100.0).round().clamp(0.0, 100.0) as u8
}

pub(crate) fn compute<R: Repository + ?Sized>(
    repo: &R,
    collection_id: Ulid,
    window: Span,
) -> Result<AvailabilityReport, EngineError> {
    if window.is_empty() {
        return Err(EngineError::InvalidInput(
            "availability window must start before it ends".into(),
        ));
    }
    if (window.end - window.start).num_days() > MAX_AVAILABILITY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("availability window too wide"));
    }
    let collection = repo
        .collection_by_id(collection_id)?
        .ok_or(EngineError::NotFound(collection_id))?;

    let appointments = repo.appointments_overlapping(collection_id, &window, None)?;

    let mut client_names: HashMap<Ulid, String> = HashMap::new();
    let mut conflicts = Vec::with_capacity(appointments.len());
    for a in &appointments {
        if !client_names.contains_key(&a.client_id) {
            let name = repo.client_by_id(a.client_id)?.map(|c| c.name).unwrap_or_default();
            client_names.insert(a.client_id, name);
        }
        conflicts.push(ConflictEntry {
            appointment_id: a.id,
            client_id: a.client_id,
            client_name: client_names[&a.client_id].clone(),
            collection_id,
            collection_name: collection.name.clone(),
            start: a.start,
            end: a.end,
        });
    }

    let mut booked: Vec<Span> = appointments
        .iter()
        .map(|a| a.span().clamp_to(&window))
        .filter(|s| !s.is_empty())
        .collect();
    booked.sort_by_key(|s| s.start);
    let booked = merge_overlapping(&booked);

    let working = working_spans(&window);
    let free = subtract_intervals(&working, &booked);
    let slots = slot_grid(&working, SLOT_MINUTES);
    let occupied = slots
        .iter()
        .filter(|slot| booked.iter().any(|b| b.overlaps(slot)))
        .count() as u32;
    let total = slots.len() as u32;

    Ok(AvailabilityReport {
        collection_id,
        window,
        is_available: conflicts.is_empty(),
        conflicts,
        slot_minutes: SLOT_MINUTES,
        total_slots: total,
        occupied_slots: occupied,
        free_slots: total - occupied,
        free,
    })
}

pub(crate) fn stats<R: Repository + ?Sized>(
    repo: &R,
    collection_id: Ulid,
    slots_per_day: u32,
) -> Result<CollectionStats, EngineError> {
    let collection = repo
        .collection_by_id(collection_id)?
        .ok_or(EngineError::NotFound(collection_id))?;
    let days = working_days(collection.start_date, collection.end_date);
    let total_capacity = days.saturating_mul(slots_per_day);
    let period = collection.period();
    let booked = repo
        .appointments_in_collection(collection_id)?
        .iter()
        .filter(|a| period.contains_span(&a.span()))
        .count() as u32;

    Ok(CollectionStats {
        collection_id,
        working_days: days,
        slots_per_day,
        total_capacity,
        booked,
        availability_percent: availability_percent(booked, total_capacity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        date(day).and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(at(10, 9, 0), at(10, 10, 0))];
        let remove = vec![Span::new(at(10, 10, 0), at(10, 11, 0))];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(at(10, 9, 0), at(10, 13, 0))];
        let remove = vec![Span::new(at(10, 10, 0), at(10, 12, 0))];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(at(10, 9, 0), at(10, 10, 0)),
                Span::new(at(10, 12, 0), at(10, 13, 0)),
            ]
        );
    }

    #[test]
    fn subtract_spanning_several_bases() {
        let base = vec![
            Span::new(at(10, 9, 0), at(10, 13, 0)),
            Span::new(at(10, 14, 0), at(10, 18, 0)),
        ];
        let remove = vec![Span::new(at(10, 12, 0), at(10, 15, 0))];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(at(10, 9, 0), at(10, 12, 0)),
                Span::new(at(10, 15, 0), at(10, 18, 0)),
            ]
        );
    }

    #[test]
    fn merge_overlapping_and_adjacent() {
        let spans = vec![
            Span::new(at(10, 9, 0), at(10, 10, 0)),
            Span::new(at(10, 10, 0), at(10, 11, 0)),
            Span::new(at(10, 10, 30), at(10, 11, 30)),
            Span::new(at(10, 14, 0), at(10, 15, 0)),
        ];
        assert_eq!(
            merge_overlapping(&spans),
            vec![
                Span::new(at(10, 9, 0), at(10, 11, 30)),
                Span::new(at(10, 14, 0), at(10, 15, 0)),
            ]
        );
    }

    #[test]
    fn working_spans_skip_weekend_and_clamp() {
        // Fri 14 10:00 → Mon 17 10:00
        let window = Span::new(at(14, 10, 0), at(17, 10, 0));
        let spans = working_spans(&window);
        assert_eq!(
            spans,
            vec![
                Span::new(at(14, 10, 0), at(14, 13, 0)),
                Span::new(at(14, 14, 0), at(14, 18, 0)),
                Span::new(at(17, 9, 0), at(17, 10, 0)),
            ]
        );
    }

    #[test]
    fn working_days_counts_weekdays() {
        // Mon 10 .. Sun 16
        assert_eq!(working_days(date(10), date(16)), 5);
        assert_eq!(working_days(date(15), date(16)), 0);
        assert_eq!(working_days(date(10), date(10)), 1);
        assert_eq!(working_days(date(11), date(10)), 0);
        // Sat 15 .. Wed 26
        assert_eq!(working_days(date(15), date(26)), 8);
    }

    #[test]
    fn calendar_edges_do_not_overflow() {
        let last = NaiveDate::MAX;
        assert!(working_days(last, last) <= 1);
        assert!(working_days(NaiveDate::MIN, last) > 0);

        let window = Span::new(last.and_hms_opt(9, 0, 0).unwrap(), NaiveDateTime::MAX);
        let spans = working_spans(&window);
        assert!(spans.iter().all(|s| window.contains_span(s)));
    }

    #[test]
    fn slot_grid_partitions_bands() {
        let working = working_spans(&Span::day(date(10)));
        let slots = slot_grid(&working, 30);
        assert_eq!(slots.len(), 16);
        assert_eq!(slots[0], Span::new(at(10, 9, 0), at(10, 9, 30)));
        assert_eq!(slots[8].start, at(10, 14, 0));
    }

    #[test]
    fn percent_rounds_and_clamps() {
        assert_eq!(availability_percent(0, 40), 100);
        assert_eq!(availability_percent(10, 40), 75);
        assert_eq!(availability_percent(1, 3), 67);
        assert_eq!(availability_percent(50, 40), 0);
        assert_eq!(availability_percent(0, 0), 0);
    }
}
