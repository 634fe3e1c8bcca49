use crate::limits::DEFAULT_VISIT_DURATION_MINUTES;
use crate::model::ProposedAppointment;
use crate::repo::{RepoError, Repository};

use super::Finding;

/// The visit must last exactly as long as the client's agreement for the
/// collection prescribes.
pub(crate) fn check<R: Repository + ?Sized>(
    repo: &R,
    proposal: &ProposedAppointment,
) -> Result<Finding, RepoError> {
    let mut finding = Finding::default();
    let required = repo
        .agreement_for(proposal.client_id, proposal.collection_id)?
        .map_or(DEFAULT_VISIT_DURATION_MINUTES, |a| a.visit_duration_minutes);
    let requested = proposal.span().duration_minutes();
    if requested != required {
        finding.error(format!(
            "appointment must last exactly {required} minutes for this client and collection \
             (requested {requested})"
        ));
    }
    Ok(finding)
}
