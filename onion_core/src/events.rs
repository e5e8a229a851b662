/*! Notifications about path building and clock skew
*/

use tokio::sync::broadcast;

/// How many events a slow subscriber may lag behind.
const EVENTS_CAPACITY: usize = 64;

/// Something observers of onion routing may want to show.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Event {
    /// Path building started.
    BuildingPaths,
    /// New paths were built.
    PathsBuilt,
    /// A path was repaired or dropped.
    PathsChanged,
    /// A destination rejected our clock.
    ClockOutOfSync,
}

/// Broadcast channel of `Event`s.
#[derive(Clone, Debug)]
pub struct Events {
    tx: broadcast::Sender<Event>,
}

impl Events {
    /// Create new `Events`.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENTS_CAPACITY);
        Events { tx }
    }

    /// Publish an event. Events nobody listens to are lost.
    pub fn publish(&self, event: Event) {
        trace!("Publishing {:?}", event);
        // no subscribers is not an error
        let _ = self.tx.send(event);
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for Events {
    fn default() -> Self {
        Events::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let events = Events::new();
        let mut rx = events.subscribe();
        events.publish(Event::BuildingPaths);
        events.publish(Event::PathsBuilt);
        assert_eq!(rx.recv().await.unwrap(), Event::BuildingPaths);
        assert_eq!(rx.recv().await.unwrap(), Event::PathsBuilt);
    }

    #[test]
    fn publish_without_subscribers() {
        Events::new().publish(Event::ClockOutOfSync);
    }
}
