use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::REJECTIONS_TOTAL;

use super::{JournalCommand, LockKey, Scheduler};
use crate::validator::{ensure_in_calendar, EngineError};

fn check_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{what} name must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn check_note(note: &Option<String>) -> Result<(), EngineError> {
    if note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
        return Err(EngineError::LimitExceeded("note too long"));
    }
    Ok(())
}

fn check_collection(collection: &Collection) -> Result<(), EngineError> {
    check_name(&collection.name, "collection")?;
    check_note(&collection.notes)?;
    if collection.start_date > collection.end_date {
        return Err(EngineError::InvalidInput(
            "collection start date must not be after its end date".into(),
        ));
    }
    ensure_in_calendar("collection", [collection.start_date, collection.end_date])
}

fn check_agreement(agreement: &Agreement) -> Result<(), EngineError> {
    if agreement.visit_duration_minutes <= 0 {
        return Err(EngineError::InvalidInput(
            "visit duration must be a positive number of minutes".into(),
        ));
    }
    if !(1..=3).contains(&agreement.priority) {
        return Err(EngineError::InvalidInput("priority must be 1, 2 or 3".into()));
    }
    Ok(())
}

impl Scheduler {
    pub async fn register_client(&self, client: Client) -> Result<(), EngineError> {
        check_name(&client.name, "client")?;
        if self.store.get_client(&client.id).is_some() {
            return Err(EngineError::AlreadyExists(client.id));
        }
        self.persist_and_apply(Event::ClientSaved { client }).await
    }

    pub async fn register_collection(&self, collection: Collection) -> Result<(), EngineError> {
        check_collection(&collection)?;
        let _guards = self.lock_all([LockKey::Collection(collection.id)]).await;
        if self.store.get_collection(&collection.id).is_some() {
            return Err(EngineError::AlreadyExists(collection.id));
        }
        self.persist_and_apply(Event::CollectionSaved { collection }).await
    }

    /// Create or replace the agreement for a (client, collection) pair.
    pub async fn set_agreement(&self, agreement: Agreement) -> Result<(), EngineError> {
        check_agreement(&agreement)?;
        let _guards = self
            .lock_all([
                LockKey::Collection(agreement.collection_id),
                LockKey::Client(agreement.client_id),
            ])
            .await;
        if self.store.get_client(&agreement.client_id).is_none() {
            return Err(EngineError::NotFound(agreement.client_id));
        }
        if self.store.get_collection(&agreement.collection_id).is_none() {
            return Err(EngineError::NotFound(agreement.collection_id));
        }
        self.persist_and_apply(Event::AgreementSaved { agreement }).await
    }

    /// Validate and commit a new appointment while holding its collection
    /// and client locks.
    pub async fn book(&self, proposal: ProposedAppointment) -> Result<Booking, EngineError> {
        check_note(&proposal.note)?;
        let _guards = self.lock_proposal(&proposal).await;
        let report = self.admit(&proposal, None, "book")?;
        let appointment = Appointment::from_proposal(Ulid::new(), proposal);
        self.persist_and_apply(Event::AppointmentBooked {
            appointment: appointment.clone(),
        })
        .await?;
        info!(
            id = %appointment.id,
            collection = %appointment.collection_id,
            warnings = report.warnings.len(),
            "appointment booked"
        );
        Ok(Booking { appointment, report })
    }

    /// Move an existing appointment. The appointment's own booking never
    /// counts against the new slot.
    pub async fn reschedule(
        &self,
        id: Ulid,
        proposal: ProposedAppointment,
    ) -> Result<Booking, EngineError> {
        check_note(&proposal.note)?;
        let before = self.store.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let mut keys = LockKey::for_proposal(&proposal).to_vec();
        keys.extend(LockKey::for_proposal(&before.to_proposal()));
        let _guards = self.lock_all(keys).await;

        // Re-read under the locks: a concurrent writer may have moved or
        // cancelled it while we waited.
        let current = self.store.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        if current.collection_id != before.collection_id || current.client_id != before.client_id {
            return Err(EngineError::InvalidInput(
                "appointment changed concurrently; retry".into(),
            ));
        }

        let report = self.admit(&proposal, Some(id), "reschedule")?;
        let appointment = Appointment::from_proposal(id, proposal);
        self.persist_and_apply(Event::AppointmentRescheduled {
            appointment: appointment.clone(),
        })
        .await?;
        if current.collection_id != appointment.collection_id {
            // Listeners of the collection it left see the move too.
            self.notify.send(
                current.collection_id,
                &Event::AppointmentRescheduled {
                    appointment: appointment.clone(),
                },
            );
        }
        info!(%id, collection = %appointment.collection_id, "appointment rescheduled");
        Ok(Booking { appointment, report })
    }

    pub async fn cancel(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let existing = self.store.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let _guards = self.lock_proposal(&existing.to_proposal()).await;
        let existing = self.store.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        self.persist_and_apply(Event::AppointmentCancelled {
            id,
            collection_id: existing.collection_id,
        })
        .await?;
        info!(%id, collection = %existing.collection_id, "appointment cancelled");
        Ok(existing)
    }

    /// Apply a whitelisted patch. Appointment patches that move the
    /// appointment go through [`Scheduler::reschedule`] and return its report.
    pub async fn apply_update(
        &self,
        update: UpdateRequest,
    ) -> Result<Option<ValidationReport>, EngineError> {
        match update {
            UpdateRequest::Appointment { id, patch } => {
                let current = self.store.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
                if patch.touches_schedule() {
                    let proposal = patch.apply(&current).to_proposal();
                    let booking = self.reschedule(id, proposal).await?;
                    return Ok(Some(booking.report));
                }
                check_note(&patch.note.clone().flatten())?;
                let _guards = self.lock_proposal(&current.to_proposal()).await;
                let current = self.store.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
                let appointment = patch.apply(&current);
                self.persist_and_apply(Event::AppointmentRescheduled { appointment })
                    .await?;
                Ok(None)
            }
            UpdateRequest::Collection { id, patch } => {
                let _guards = self.lock_all([LockKey::Collection(id)]).await;
                let current = self.store.get_collection(&id).ok_or(EngineError::NotFound(id))?;
                let collection = patch.apply(&current);
                check_collection(&collection)?;
                self.persist_and_apply(Event::CollectionSaved { collection }).await?;
                Ok(None)
            }
            UpdateRequest::Agreement {
                client_id,
                collection_id,
                patch,
            } => {
                let _guards = self
                    .lock_all([LockKey::Collection(collection_id), LockKey::Client(client_id)])
                    .await;
                let current = self
                    .store
                    .get_agreement(client_id, collection_id)
                    .ok_or(EngineError::NotFound(collection_id))?;
                let agreement = patch.apply(&current);
                check_agreement(&agreement)?;
                self.persist_and_apply(Event::AgreementSaved { agreement }).await?;
                Ok(None)
            }
            UpdateRequest::Client { id, patch } => {
                let current = self.store.get_client(&id).ok_or(EngineError::NotFound(id))?;
                let client = patch.apply(&current);
                check_name(&client.name, "client")?;
                self.persist_and_apply(Event::ClientSaved { client }).await?;
                Ok(None)
            }
        }
    }

    /// Validate under the caller's locks; a failing report becomes `Rejected`.
    fn admit(
        &self,
        proposal: &ProposedAppointment,
        exclude_id: Option<Ulid>,
        op: &'static str,
    ) -> Result<ValidationReport, EngineError> {
        let report = self.run_validation(proposal, exclude_id)?;
        if !report.is_valid {
            metrics::counter!(REJECTIONS_TOTAL, "op" => op).increment(1);
            info!(
                op,
                client = %proposal.client_id,
                collection = %proposal.collection_id,
                errors = ?report.errors,
                "appointment rejected"
            );
            return Err(EngineError::Rejected(Box::new(report)));
        }
        Ok(report)
    }

    /// Rewrite the journal as the minimal event list for the current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _exclusive = self.compaction.write().await;
        let events = self.store.snapshot_events();
        let records = events.len();
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| {
                warn!("journal compaction failed: {e}");
                EngineError::JournalError(e.to_string())
            })?;
        info!(records, "journal compacted");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
