use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;
use crate::observability::VALIDATIONS_TOTAL;
use crate::validator::{EngineError, Validator};

use super::{LockKey, Scheduler};

impl Scheduler {
    fn validator(&self) -> Validator<'_, crate::store::InMemoryStore> {
        Validator::new(&self.store, &self.policy)
    }

    pub(super) fn run_validation(
        &self,
        proposal: &ProposedAppointment,
        exclude_id: Option<Ulid>,
    ) -> Result<ValidationReport, EngineError> {
        let report = self.validator().validate(proposal, exclude_id)?;
        let outcome = if report.is_valid { "valid" } else { "invalid" };
        metrics::counter!(VALIDATIONS_TOTAL, "outcome" => outcome).increment(1);
        Ok(report)
    }

    /// Read-only check. Takes no locks; the answer may be stale by the time
    /// a booking arrives, which `book` re-checks under its locks.
    pub fn validate(
        &self,
        proposal: &ProposedAppointment,
        exclude_id: Option<Ulid>,
    ) -> Result<ValidationReport, EngineError> {
        self.run_validation(proposal, exclude_id)
    }

    /// Validate every entry against one consistent snapshot: all affected
    /// collections and clients stay locked until the whole batch is done.
    /// Nothing is written.
    pub async fn validate_batch(
        &self,
        items: &[(ProposedAppointment, Option<Ulid>)],
    ) -> Result<Vec<ValidationReport>, EngineError> {
        if items.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let _guards = self
            .lock_all(items.iter().flat_map(|(p, _)| LockKey::for_proposal(p)))
            .await;
        items
            .iter()
            .map(|(proposal, exclude_id)| self.run_validation(proposal, *exclude_id))
            .collect()
    }

    pub fn compute_availability(
        &self,
        collection_id: Ulid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<AvailabilityReport, EngineError> {
        self.validator().compute_availability(collection_id, start, end)
    }

    pub fn collection_stats(&self, collection_id: Ulid) -> Result<CollectionStats, EngineError> {
        self.validator().collection_stats(collection_id)
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.store.get_appointment(id)
    }
}
