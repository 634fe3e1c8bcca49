use std::collections::HashMap;

use ulid::Ulid;

use crate::model::ProposedAppointment;
use crate::repo::{RepoError, Repository};

use super::{display_time, Finding};

/// Another appointment in the same collection occupies part of the slot.
pub(crate) fn same_collection<R: Repository + ?Sized>(
    repo: &R,
    proposal: &ProposedAppointment,
    exclude_id: Option<Ulid>,
) -> Result<Finding, RepoError> {
    let mut finding = Finding::default();
    let clashes =
        repo.appointments_overlapping(proposal.collection_id, &proposal.span(), exclude_id)?;
    if !clashes.is_empty() {
        finding.error("this time slot is already booked for the collection");
    }
    Ok(finding)
}

/// The client is already expected at another collection at the same time.
pub(crate) fn other_collections<R: Repository + ?Sized>(
    repo: &R,
    proposal: &ProposedAppointment,
    exclude_id: Option<Ulid>,
) -> Result<Finding, RepoError> {
    let mut finding = Finding::default();
    let span = proposal.span();
    let clashes: Vec<_> = repo
        .appointments_for_client(proposal.client_id, exclude_id)?
        .into_iter()
        .filter(|a| a.collection_id != proposal.collection_id && a.span().overlaps(&span))
        .collect();
    if clashes.is_empty() {
        return Ok(finding);
    }

    let mut names: HashMap<Ulid, String> = HashMap::new();
    let mut described = Vec::with_capacity(clashes.len());
    for appointment in &clashes {
        let name = match names.get(&appointment.collection_id) {
            Some(name) => name.clone(),
            None => {
                let name = collection_name(repo, appointment.collection_id)?;
                names.insert(appointment.collection_id, name.clone());
                name
            }
        };
        described.push(format!("{name} ({})", display_time(&appointment.start)));
    }
    finding.error(format!(
        "client already has an appointment at this time: {}",
        described.join(", ")
    ));
    Ok(finding)
}

/// Display name of a collection, falling back to its id.
pub(crate) fn collection_name<R: Repository + ?Sized>(
    repo: &R,
    collection_id: Ulid,
) -> Result<String, RepoError> {
    Ok(repo
        .collection_by_id(collection_id)?
        .map(|c| c.name)
        .unwrap_or_else(|| collection_id.to_string()))
}
