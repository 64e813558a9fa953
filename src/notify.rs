use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/NOTIFY per vehicle. Every applied event is
/// published under its vehicle id; slow subscribers lag, they never block
/// the mutation path.
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

    /// Subscribe to notifications for a vehicle. Creates the channel if needed.
    pub fn subscribe(&self, vehicle_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(vehicle_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, vehicle_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&vehicle_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a vehicle is removed).
    pub fn remove(&self, vehicle_id: &Ulid) {
        self.channels.remove(vehicle_id);
    }
}
