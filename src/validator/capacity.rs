use ulid::Ulid;

use crate::limits::CLIENT_BUFFER_MINUTES;
use crate::model::ProposedAppointment;
use crate::repo::{DayScope, RepoError, Repository};

use super::conflict::collection_name;
use super::{display_date, Finding};

/// A collection takes at most `cap` appointments per calendar day.
pub(crate) fn collection_daily<R: Repository + ?Sized>(
    repo: &R,
    proposal: &ProposedAppointment,
    exclude_id: Option<Ulid>,
    cap: Option<u32>,
) -> Result<Finding, RepoError> {
    let mut finding = Finding::default();
    let Some(cap) = cap else {
        return Ok(finding);
    };
    let date = proposal.start.date();
    let scope = DayScope::Collection(proposal.collection_id);
    let booked = repo.appointments_on_date(scope, date, exclude_id)?;
    if booked.len() >= cap as usize {
        finding.error(format!(
            "daily appointment limit reached for this collection ({cap} per day)"
        ));
    }
    Ok(finding)
}

/// A client takes at most `cap` appointments per calendar day, all collections together.
pub(crate) fn client_daily<R: Repository + ?Sized>(
    repo: &R,
    proposal: &ProposedAppointment,
    exclude_id: Option<Ulid>,
    cap: Option<u32>,
) -> Result<Finding, RepoError> {
    let mut finding = Finding::default();
    let Some(cap) = cap else {
        return Ok(finding);
    };
    let date = proposal.start.date();
    let scope = DayScope::Client(proposal.client_id);
    let booked = repo.appointments_on_date(scope, date, exclude_id)?;
    if booked.len() >= cap as usize {
        finding.error(format!(
            "client already has {} appointment(s) on {}; the daily limit is {cap}",
            booked.len(),
            display_date(&date)
        ));
    }
    Ok(finding)
}

/// Warn about the client's appointments that sit close to, but do not
/// overlap, the proposed one. Never produces errors.
pub(crate) fn client_slack<R: Repository + ?Sized>(
    repo: &R,
    proposal: &ProposedAppointment,
    exclude_id: Option<Ulid>,
) -> Result<Finding, RepoError> {
    let mut finding = Finding::default();
    let span = proposal.span();
    if span.is_empty() {
        return Ok(finding);
    }
    let buffered = span.widen(CLIENT_BUFFER_MINUTES);
    for appointment in repo.appointments_for_client(proposal.client_id, exclude_id)? {
        let other = appointment.span();
        if other.overlaps(&span) || !other.overlaps(&buffered) {
            continue;
        }
        let name = collection_name(repo, appointment.collection_id)?;
        finding.warn(format!(
            "client has another appointment within 2 hours: {name} {}-{}",
            other.start.format("%H:%M"),
            other.end.format("%H:%M")
        ));
    }
    Ok(finding)
}
