use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;
use crate::repo::{DayScope, RepoError, Repository};

/// One collection's appointments, sorted by `start`.
#[derive(Debug, Clone, Default)]
pub struct AppointmentBook {
    appointments: Vec<Appointment>,
}

impl AppointmentBook {
    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    /// Insert maintaining sort order by start.
    pub fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.start, |a| a.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    /// Appointments overlapping `query`. Entries starting at or after
    /// `query.end` are skipped by binary search.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self.appointments.partition_point(|a| a.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span().overlaps(query))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.iter()
    }
}

/// Concurrent in-memory repository. State changes arrive only as [`Event`]s,
/// so the journal can rebuild it exactly.
pub struct InMemoryStore {
    clients: DashMap<Ulid, Client>,
    collections: DashMap<Ulid, Collection>,
    agreements: DashMap<(Ulid, Ulid), Agreement>,
    appointments: DashMap<Ulid, Appointment>,
    /// Collection id → its appointments ordered by start.
    books: DashMap<Ulid, AppointmentBook>,
    /// Client id → ids of the client's appointments.
    client_index: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            collections: DashMap::new(),
            agreements: DashMap::new(),
            appointments: DashMap::new(),
            books: DashMap::new(),
            client_index: DashMap::new(),
        }
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let store = Self::new();
        for event in events {
            store.apply_event(event);
        }
        store
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn get_client(&self, id: &Ulid) -> Option<Client> {
        self.clients.get(id).map(|e| e.value().clone())
    }

    pub fn get_collection(&self, id: &Ulid) -> Option<Collection> {
        self.collections.get(id).map(|e| e.value().clone())
    }

    pub fn get_agreement(&self, client_id: Ulid, collection_id: Ulid) -> Option<Agreement> {
        self.agreements
            .get(&(client_id, collection_id))
            .map(|e| e.value().clone())
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    fn client_appointments(&self, client_id: Ulid) -> Vec<Appointment> {
        let ids = self
            .client_index
            .get(&client_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_appointment(id)).collect()
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::ClientSaved { client } => {
                self.clients.insert(client.id, client.clone());
            }
            Event::CollectionSaved { collection } => {
                self.books.entry(collection.id).or_default();
                self.collections.insert(collection.id, collection.clone());
            }
            Event::AgreementSaved { agreement } => {
                self.agreements.insert(
                    (agreement.client_id, agreement.collection_id),
                    agreement.clone(),
                );
            }
            Event::AppointmentBooked { appointment } => {
                self.insert_appointment(appointment.clone());
            }
            Event::AppointmentRescheduled { appointment } => {
                self.remove_appointment(&appointment.id);
                self.insert_appointment(appointment.clone());
            }
            Event::AppointmentCancelled { id, .. } => {
                self.remove_appointment(id);
            }
        }
    }

    fn insert_appointment(&self, appointment: Appointment) {
        self.books
            .entry(appointment.collection_id)
            .or_default()
            .insert(appointment.clone());
        self.client_index
            .entry(appointment.client_id)
            .or_default()
            .push(appointment.id);
        self.appointments.insert(appointment.id, appointment);
    }

    fn remove_appointment(&self, id: &Ulid) -> Option<Appointment> {
        let (_, appointment) = self.appointments.remove(id)?;
        if let Some(mut book) = self.books.get_mut(&appointment.collection_id) {
            book.remove(*id);
        }
        if let Some(mut ids) = self.client_index.get_mut(&appointment.client_id) {
            ids.retain(|a| a != id);
        }
        Some(appointment)
    }

    /// The minimal event list that rebuilds the current state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut clients: Vec<Client> = self.clients.iter().map(|e| e.value().clone()).collect();
        clients.sort_by_key(|c| c.id);
        let mut collections: Vec<Collection> =
            self.collections.iter().map(|e| e.value().clone()).collect();
        collections.sort_by_key(|c| c.id);
        let mut agreements: Vec<Agreement> =
            self.agreements.iter().map(|e| e.value().clone()).collect();
        agreements.sort_by_key(|a| (a.client_id, a.collection_id));
        let mut appointments: Vec<Appointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        appointments.sort_by_key(|a| a.id);

        let mut events = Vec::with_capacity(
            clients.len() + collections.len() + agreements.len() + appointments.len(),
        );
        events.extend(clients.into_iter().map(|client| Event::ClientSaved { client }));
        events.extend(
            collections
                .into_iter()
                .map(|collection| Event::CollectionSaved { collection }),
        );
        events.extend(
            agreements
                .into_iter()
                .map(|agreement| Event::AgreementSaved { agreement }),
        );
        events.extend(
            appointments
                .into_iter()
                .map(|appointment| Event::AppointmentBooked { appointment }),
        );
        events
    }
}

fn keep(appointment: &Appointment, exclude_id: Option<Ulid>) -> bool {
    exclude_id != Some(appointment.id)
}

impl Repository for InMemoryStore {
    fn appointments_overlapping(
        &self,
        collection_id: Ulid,
        span: &Span,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Appointment>, RepoError> {
        let Some(book) = self.books.get(&collection_id) else {
            return Ok(Vec::new());
        };
        Ok(book
            .overlapping(span)
            .filter(|a| keep(a, exclude_id))
            .cloned()
            .collect())
    }

    fn appointments_for_client(
        &self,
        client_id: Ulid,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Appointment>, RepoError> {
        let mut found = self.client_appointments(client_id);
        found.retain(|a| keep(a, exclude_id));
        found.sort_by_key(|a| a.start);
        Ok(found)
    }

    fn appointments_on_date(
        &self,
        scope: DayScope,
        date: NaiveDate,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<Appointment>, RepoError> {
        let on_date = |a: &Appointment| a.start.date() == date && keep(a, exclude_id);
        match scope {
            DayScope::Collection(collection_id) => {
                let Some(book) = self.books.get(&collection_id) else {
                    return Ok(Vec::new());
                };
                let day = Span::day(date);
                // Every same-day start overlaps the day; the filter drops
                // appointments spilling in from the day before.
                Ok(book.overlapping(&day).filter(|a| on_date(a)).cloned().collect())
            }
            DayScope::Client(client_id) => {
                let mut found = self.client_appointments(client_id);
                found.retain(|a| on_date(a));
                found.sort_by_key(|a| a.start);
                Ok(found)
            }
        }
    }

    fn appointments_in_collection(
        &self,
        collection_id: Ulid,
    ) -> Result<Vec<Appointment>, RepoError> {
        Ok(self
            .books
            .get(&collection_id)
            .map(|book| book.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn agreement_for(
        &self,
        client_id: Ulid,
        collection_id: Ulid,
    ) -> Result<Option<Agreement>, RepoError> {
        Ok(self.get_agreement(client_id, collection_id))
    }

    fn collection_by_id(&self, id: Ulid) -> Result<Option<Collection>, RepoError> {
        Ok(self.get_collection(&id))
    }

    fn client_by_id(&self, id: Ulid) -> Result<Option<Client>, RepoError> {
        Ok(self.get_client(&id))
    }
}
