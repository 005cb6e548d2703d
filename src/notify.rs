use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub: one channel per resource group. Every committed event
/// is published to the group's subscribers (admin dashboards, embedders
/// watching for approvals).
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
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

    /// Subscribe to notifications for a group. Creates the channel if needed.
    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, group: &str, event: &Event) {
        if let Some(sender) = self.channels.get(group) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a group is deleted).
    pub fn remove(&self, group: &str) {
        self.channels.remove(group);
    }
}
