use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// Whose appointments a per-day query counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayScope {
    Collection(Ulid),
    Client(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// The backing store could not be reached or refused the read.
    Unavailable(String),
    /// The store answered with data that violates its own invariants.
    Corrupt(String),
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoError::Unavailable(e) => write!(f, "repository unavailable: {e}"),
            RepoError::Corrupt(e) => write!(f, "repository returned corrupt data: {e}"),
        }
    }
}

impl std::error::Error for RepoError {}

/// Read access to scheduling data. The validator depends on nothing else.
///
/// Every `exclude_id` is the id of the appointment being rescheduled; rows with
/// that id must never be returned.
pub trait Repository: Send + Sync {
    /// Appointments of `collection_id` whose interval overlaps `span`.
    fn appointments_overlapping(
        &self,
        collection_id: Ulid,
        span: &Span,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Appointment>, RepoError>;

    /// All appointments of a client, across every collection.
    fn appointments_for_client(
        &self,
        client_id: Ulid,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Appointment>, RepoError>;

    /// Appointments starting on `date`, for a collection or a client.
    fn appointments_on_date(
        &self,
        scope: DayScope,
        date: NaiveDate,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Appointment>, RepoError>;

    fn appointments_in_collection(
        &self,
        collection_id: Ulid,
    ) -> Result<Vec<Appointment>, RepoError>;

    fn agreement_for(
        &self,
        client_id: Ulid,
        collection_id: Ulid,
    ) -> Result<Option<Agreement>, RepoError>;

    fn collection_by_id(&self, id: Ulid) -> Result<Option<Collection>, RepoError>;

    fn client_by_id(&self, id: Ulid) -> Result<Option<Client>, RepoError>;
}
