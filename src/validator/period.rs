use crate::model::{contains, ProposedAppointment};
use crate::repo::{RepoError, Repository};

use super::{display_date, Finding};

/// The appointment must sit inside the collection's exhibition period.
pub(crate) fn check<R: Repository + ?Sized>(
    repo: &R,
    proposal: &ProposedAppointment,
) -> Result<Finding, RepoError> {
    let mut finding = Finding::default();
    let Some(collection) = repo.collection_by_id(proposal.collection_id)? else {
        finding.error("collection not found");
        return Ok(finding);
    };
    let period = collection.period();
    if !contains(period.start, period.end, proposal.start, proposal.end) {
        finding.error(format!(
            "appointment must fall within the collection period ({} - {})",
            display_date(&collection.start_date),
            display_date(&collection.end_date)
        ));
    }
    Ok(finding)
}
