use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

use crate::limits::DEFAULT_VISIT_DURATION_MINUTES;

/// Whole minutes, the unit every duration rule is expressed in.
pub type Minutes = i64;

// ── Interval arithmetic ──────────────────────────────────────────

/// Two half-open intervals overlap when each starts before the other ends.
/// Touching endpoints (`a_end == b_start`) do not overlap.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// True when `[inner_start, inner_end)` lies entirely within `[outer_start, outer_end)`.
pub fn contains<T: PartialOrd>(outer_start: T, outer_end: T, inner_start: T, inner_end: T) -> bool {
    outer_start <= inner_start && inner_end <= outer_end
}

/// Half-open interval `[start, end)` of local wall-clock time.
///
/// Unlike a stored appointment, a span built from a proposal may be empty or
/// inverted; the calendar rules are what reject those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// The whole calendar day `[date 00:00, date+1 00:00)`.
    pub fn day(date: NaiveDate) -> Self {
        Self::days(date, date)
    }

    /// Inclusive date range, the last day running to midnight.
    pub fn days(first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            start: first.and_time(NaiveTime::MIN),
            end: last
                .succ_opt()
                .map_or(NaiveDateTime::MAX, |next| next.and_time(NaiveTime::MIN)),
        }
    }

    pub fn duration_minutes(&self) -> Minutes {
        (self.end - self.start).num_minutes()
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        contains(self.start, self.end, other.start, other.end)
    }

    /// Grow the span by `minutes` on both sides, saturating at the ends of
    /// the representable calendar.
    pub fn widen(&self, minutes: Minutes) -> Span {
        let pad = chrono::Duration::minutes(minutes);
        Span::new(
            self.start.checked_sub_signed(pad).unwrap_or(NaiveDateTime::MIN),
            self.end.checked_add_signed(pad).unwrap_or(NaiveDateTime::MAX),
        )
    }

    pub fn clamp_to(&self, window: &Span) -> Span {
        Span::new(self.start.max(window.start), self.end.min(window.end))
    }
}

// ── Reference data ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A time-boxed exhibition; `start_date..=end_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Ulid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Collection {
    /// The exhibition period, end date included up to midnight.
    pub fn period(&self) -> Span {
        Span::days(self.start_date, self.end_date)
    }
}

fn default_visit_duration() -> Minutes {
    DEFAULT_VISIT_DURATION_MINUTES
}

fn default_priority() -> u8 {
    1
}

/// Per-(client, collection) visit terms. At most one exists per pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    pub client_id: Ulid,
    pub collection_id: Ulid,
    #[serde(default = "default_visit_duration")]
    pub visit_duration_minutes: Minutes,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

// ── Appointments ─────────────────────────────────────────────────

/// An appointment that does not exist yet, or the target state of a reschedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAppointment {
    pub client_id: Ulid,
    pub collection_id: Ulid,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub note: Option<String>,
}

impl ProposedAppointment {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_id: Ulid,
    pub collection_id: Ulid,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub note: Option<String>,
}

impl Appointment {
    pub fn from_proposal(id: Ulid, proposal: ProposedAppointment) -> Self {
        Self {
            id,
            client_id: proposal.client_id,
            collection_id: proposal.collection_id,
            start: proposal.start,
            end: proposal.end,
            note: proposal.note,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn to_proposal(&self) -> ProposedAppointment {
        ProposedAppointment {
            client_id: self.client_id,
            collection_id: self.collection_id,
            start: self.start,
            end: self.end,
            note: self.note.clone(),
        }
    }
}

// ── Tagged updates ───────────────────────────────────────────────

/// Distinguishes "field absent" (`None`) from "field explicitly null" (`Some(None)`).
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Every editable field, per entity. Anything else is rejected at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum UpdateRequest {
    Appointment {
        id: Ulid,
        patch: AppointmentPatch,
    },
    Collection {
        id: Ulid,
        patch: CollectionPatch,
    },
    Agreement {
        client_id: Ulid,
        collection_id: Ulid,
        patch: AgreementPatch,
    },
    Client {
        id: Ulid,
        patch: ClientPatch,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppointmentPatch {
    #[serde(default)]
    pub client_id: Option<Ulid>,
    #[serde(default)]
    pub collection_id: Option<Ulid>,
    #[serde(default)]
    pub start: Option<NaiveDateTime>,
    #[serde(default)]
    pub end: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "double_option")]
    pub note: Option<Option<String>>,
}

impl AppointmentPatch {
    /// Whether the patch changes anything the scheduling rules look at.
    pub fn touches_schedule(&self) -> bool {
        self.client_id.is_some()
            || self.collection_id.is_some()
            || self.start.is_some()
            || self.end.is_some()
    }

    pub fn apply(&self, current: &Appointment) -> Appointment {
        Appointment {
            id: current.id,
            client_id: self.client_id.unwrap_or(current.client_id),
            collection_id: self.collection_id.unwrap_or(current.collection_id),
            start: self.start.unwrap_or(current.start),
            end: self.end.unwrap_or(current.end),
            note: self.note.clone().unwrap_or_else(|| current.note.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

impl CollectionPatch {
    pub fn apply(&self, current: &Collection) -> Collection {
        Collection {
            id: current.id,
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            start_date: self.start_date.unwrap_or(current.start_date),
            end_date: self.end_date.unwrap_or(current.end_date),
            color: self.color.clone().unwrap_or_else(|| current.color.clone()),
            notes: self.notes.clone().unwrap_or_else(|| current.notes.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgreementPatch {
    #[serde(default)]
    pub visit_duration_minutes: Option<Minutes>,
    #[serde(default)]
    pub priority: Option<u8>,
}

impl AgreementPatch {
    pub fn apply(&self, current: &Agreement) -> Agreement {
        Agreement {
            client_id: current.client_id,
            collection_id: current.collection_id,
            visit_duration_minutes: self
                .visit_duration_minutes
                .unwrap_or(current.visit_duration_minutes),
            priority: self.priority.unwrap_or(current.priority),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
}

impl ClientPatch {
    pub fn apply(&self, current: &Client) -> Client {
        Client {
            id: current.id,
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            email: self.email.clone().unwrap_or_else(|| current.email.clone()),
            phone: self.phone.clone().unwrap_or_else(|| current.phone.clone()),
        }
    }
}

// ── Journal records ──────────────────────────────────────────────

/// Flat, self-contained state changes. This is the journal record format and
/// the payload of change notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ClientSaved { client: Client },
    CollectionSaved { collection: Collection },
    AgreementSaved { agreement: Agreement },
    AppointmentBooked { appointment: Appointment },
    AppointmentRescheduled { appointment: Appointment },
    AppointmentCancelled { id: Ulid, collection_id: Ulid },
}

// ── Query result types ───────────────────────────────────────────

/// Per-rule outcome flags. Every flag starts out `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checks {
    pub time_constraints: bool,
    pub overlap: bool,
    pub client_availability: bool,
    pub collection_period: bool,
    pub duration: bool,
    pub daily_capacity: bool,
}

impl Default for Checks {
    fn default() -> Self {
        Self {
            time_constraints: true,
            overlap: true,
            client_availability: true,
            collection_period: true,
            duration: true,
            daily_capacity: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checks: Checks,
    pub duration_minutes: Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub appointment_id: Ulid,
    pub client_id: Ulid,
    pub client_name: String,
    pub collection_id: Ulid,
    pub collection_name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub collection_id: Ulid,
    pub window: Span,
    pub is_available: bool,
    pub conflicts: Vec<ConflictEntry>,
    pub slot_minutes: Minutes,
    pub total_slots: u32,
    pub occupied_slots: u32,
    pub free_slots: u32,
    /// Working time inside the window not taken by any appointment.
    pub free: Vec<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub collection_id: Ulid,
    pub working_days: u32,
    pub slots_per_day: u32,
    pub total_capacity: u32,
    pub booked: u32,
    pub availability_percent: u8,
}

/// A committed appointment with the report that admitted it (warnings included).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub appointment: Appointment,
    pub report: ValidationReport,
}
