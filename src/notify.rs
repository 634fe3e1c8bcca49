use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// The collection a change belongs to. Client records belong to none.
pub fn collection_of(event: &Event) -> Option<Ulid> {
    match event {
        Event::CollectionSaved { collection } => Some(collection.id),
        Event::AgreementSaved { agreement } => Some(agreement.collection_id),
        Event::AppointmentBooked { appointment }
        | Event::AppointmentRescheduled { appointment } => Some(appointment.collection_id),
        Event::AppointmentCancelled { collection_id, .. } => Some(*collection_id),
        Event::ClientSaved { .. } => None,
    }
}

/// Per-collection change feed.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn subscribe(&self, collection_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(collection_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish to listeners of `collection_id`. No-op without listeners.
    pub fn send(&self, collection_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&collection_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel once its last receiver is gone.
    pub fn prune(&self, collection_id: &Ulid) {
        self.channels
            .remove_if(collection_id, |_, sender| sender.receiver_count() == 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
