//! Process-local fan-out hubs, one broadcast channel per school. The Redis
//! subscriber feeds events in; every WebSocket connection of that school
//! holds a receiver. Group names are always server-derived.

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::dto::ws::ChannelEvent;

pub struct SchoolGroups {
    hubs: DashMap<i64, broadcast::Sender<ChannelEvent>>,
    capacity: usize,
}

impl SchoolGroups {
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            capacity,
        }
    }

    /// Join the school's group, creating the hub on first subscriber.
    pub fn subscribe(&self, school_id: i64) -> broadcast::Receiver<ChannelEvent> {
        self.hubs
            .entry(school_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver an event to every local subscriber of the school, returning
    /// how many received it. Hubs with no subscribers are pruned.
    pub fn send(&self, school_id: i64, event: ChannelEvent) -> usize {
        let Some(hub) = self.hubs.get(&school_id) else {
            return 0;
        };
        match hub.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                drop(hub);
                self.hubs
                    .remove_if(&school_id, |_, sender| sender.receiver_count() == 0);
                0
            }
        }
    }

    pub fn group_count(&self) -> usize {
        self.hubs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalidate(school_id: i64, revision: i64) -> ChannelEvent {
        ChannelEvent::Invalidate {
            school_id,
            revision,
            ts: 0,
        }
    }

    #[tokio::test]
    async fn events_reach_only_the_matching_school() {
        let groups = SchoolGroups::new(16);
        let mut rx_a = groups.subscribe(1);
        let mut rx_b = groups.subscribe(2);

        assert_eq!(groups.send(1, invalidate(1, 5)), 1);
        assert_eq!(rx_a.recv().await.unwrap().revision(), 5);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn sending_to_an_empty_school_is_harmless() {
        let groups = SchoolGroups::new(16);
        assert_eq!(groups.send(99, invalidate(99, 1)), 0);
    }

    #[tokio::test]
    async fn dead_hubs_are_pruned() {
        let groups = SchoolGroups::new(16);
        let rx = groups.subscribe(1);
        drop(rx);
        assert_eq!(groups.send(1, invalidate(1, 5)), 0);
        assert_eq!(groups.group_count(), 0);
    }
}
