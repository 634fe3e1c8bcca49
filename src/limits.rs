use crate::model::Minutes;

// ── Business calendar ────────────────────────────────────────────

/// Opening bands in seconds from midnight. Boundaries are inclusive.
pub const MORNING_OPEN_SECS: u32 = 9 * 3600;
pub const MORNING_CLOSE_SECS: u32 = 13 * 3600;
pub const AFTERNOON_OPEN_SECS: u32 = 14 * 3600;
pub const AFTERNOON_CLOSE_SECS: u32 = 18 * 3600;

pub const MIN_APPOINTMENT_MINUTES: Minutes = 30;
/// Longer than this is rejected and flagged as unusual.
pub const MAX_APPOINTMENT_MINUTES: Minutes = 4 * 60;

/// Visit length when no agreement exists for the (client, collection) pair.
pub const DEFAULT_VISIT_DURATION_MINUTES: Minutes = 120;

/// Neighbouring appointments of the same client closer than this get a warning.
pub const CLIENT_BUFFER_MINUTES: Minutes = 120;

// ── Capacity defaults ────────────────────────────────────────────

pub const DEFAULT_COLLECTION_DAILY_CAP: u32 = 8;
pub const DEFAULT_CLIENT_DAILY_CAP: u32 = 2;
pub const DEFAULT_SLOTS_PER_DAY: u32 = 8;

/// Granularity of the availability slot grid.
pub const SLOT_MINUTES: Minutes = 30;

// ── Input limits ─────────────────────────────────────────────────

pub const MAX_AVAILABILITY_WINDOW_DAYS: i64 = 366;
pub const MAX_BATCH_SIZE: usize = 1000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTE_LEN: usize = 4096;
pub const MAX_LINE_LEN: usize = 1 << 20;
pub const MAX_LISTEN_CHANNELS: usize = 64;

// ── Calendar range ───────────────────────────────────────────────

/// Years accepted for appointment and collection dates.
pub const EARLIEST_YEAR: i32 = 1900;
pub const LATEST_YEAR: i32 = 9999;
