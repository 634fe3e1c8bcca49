mod availability;
mod calendar;
mod capacity;
mod conflict;
mod duration;
mod error;
mod period;

pub use availability::{merge_overlapping, subtract_intervals, working_days, working_spans};
pub use calendar::in_opening_hours;
pub use error::EngineError;

use chrono::{Datelike, NaiveDate};
use tracing::debug;
use ulid::Ulid;

use crate::config::SchedulingPolicy;
use crate::limits::{EARLIEST_YEAR, LATEST_YEAR};
use crate::model::*;
use crate::repo::Repository;

/// Errors and warnings produced by one rule.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Finding {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Finding {
    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A validation run still collecting findings.
#[derive(Debug)]
struct PendingReport {
    errors: Vec<String>,
    warnings: Vec<String>,
    checks: Checks,
    duration_minutes: Minutes,
}

impl PendingReport {
    fn new(duration_minutes: Minutes) -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            checks: Checks::default(),
            duration_minutes,
        }
    }

    /// Append a finding's messages and return whether it passed.
    fn absorb(&mut self, finding: Finding) -> bool {
        let passed = finding.passed();
        self.errors.extend(finding.errors);
        self.warnings.extend(finding.warnings);
        passed
    }

    fn resolve(self) -> ValidationReport {
        ValidationReport {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
            checks: self.checks,
            duration_minutes: self.duration_minutes,
        }
    }
}

/// The scheduling rule engine. Stateless between calls: every decision is a
/// function of its arguments and what the repository returns at call time.
pub struct Validator<'a, R: Repository + ?Sized> {
    repo: &'a R,
    policy: &'a SchedulingPolicy,
}

impl<'a, R: Repository + ?Sized> Validator<'a, R> {
    pub fn new(repo: &'a R, policy: &'a SchedulingPolicy) -> Self {
        Self { repo, policy }
    }

    /// Run every rule against `proposal` and aggregate the outcome.
    ///
    /// `exclude_id` is the appointment's own id when rescheduling; it is
    /// excluded from every repository query. Rule violations never return
    /// `Err`. Repository failures and dates outside the supported calendar
    /// do, and they abort the run.
    pub fn validate(
        &self,
        proposal: &ProposedAppointment,
        exclude_id: Option<Ulid>,
    ) -> Result<ValidationReport, EngineError> {
        ensure_in_calendar("appointment", [proposal.start.date(), proposal.end.date()])?;
        let span = proposal.span();
        let mut report = PendingReport::new(span.duration_minutes());

        report.checks.time_constraints = report.absorb(calendar::check(&span));
        report.checks.collection_period = report.absorb(period::check(self.repo, proposal)?);
        report.checks.overlap =
            report.absorb(conflict::same_collection(self.repo, proposal, exclude_id)?);
        report.checks.daily_capacity = report.absorb(capacity::collection_daily(
            self.repo,
            proposal,
            exclude_id,
            self.policy.collection_daily_cap,
        )?);
        let cross = report.absorb(conflict::other_collections(self.repo, proposal, exclude_id)?);
        let client_cap = report.absorb(capacity::client_daily(
            self.repo,
            proposal,
            exclude_id,
            self.policy.client_daily_cap,
        )?);
        report.checks.client_availability = cross && client_cap;
        report.absorb(capacity::client_slack(self.repo, proposal, exclude_id)?);
        report.checks.duration = report.absorb(duration::check(self.repo, proposal)?);

        let report = report.resolve();
        debug!(
            client = %proposal.client_id,
            collection = %proposal.collection_id,
            valid = report.is_valid,
            errors = report.errors.len(),
            "validated appointment"
        );
        Ok(report)
    }

    /// Validate each entry on its own against the same repository state.
    /// Entries never see each other.
    pub fn validate_batch(
        &self,
        items: &[(ProposedAppointment, Option<Ulid>)],
    ) -> Result<Vec<ValidationReport>, EngineError> {
        items
            .iter()
            .map(|(proposal, exclude_id)| self.validate(proposal, *exclude_id))
            .collect()
    }

    pub fn compute_availability(
        &self,
        collection_id: Ulid,
        window_start: chrono::NaiveDateTime,
        window_end: chrono::NaiveDateTime,
    ) -> Result<AvailabilityReport, EngineError> {
        ensure_in_calendar("availability window", [window_start.date(), window_end.date()])?;
        availability::compute(self.repo, collection_id, Span::new(window_start, window_end))
    }

    pub fn collection_stats(&self, collection_id: Ulid) -> Result<CollectionStats, EngineError> {
        availability::stats(self.repo, collection_id, self.policy.slots_per_day)
    }
}

/// Every date must fall in `EARLIEST_YEAR..=LATEST_YEAR`.
pub(crate) fn ensure_in_calendar(
    what: &str,
    dates: impl IntoIterator<Item = NaiveDate>,
) -> Result<(), EngineError> {
    for date in dates {
        if !(EARLIEST_YEAR..=LATEST_YEAR).contains(&date.year()) {
            return Err(EngineError::InvalidInput(format!(
                "{what} date {date} is outside the supported calendar \
                 ({EARLIEST_YEAR}-{LATEST_YEAR})"
            )));
        }
    }
    Ok(())
}

/// Display format for timestamps inside messages.
pub(crate) fn display_time(t: &chrono::NaiveDateTime) -> String {
    t.format("%a %d %b %Y %H:%M").to_string()
}

pub(crate) fn display_date(d: &chrono::NaiveDate) -> String {
    d.format("%d %b %Y").to_string()
}
