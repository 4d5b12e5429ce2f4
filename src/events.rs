//! Engine notifications for UI subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::dispatch::DispatchOutcome;
use crate::incident::{IncidentId, IncidentState};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged { state: IncidentState },
    CountdownTick { incident: IncidentId, remaining_secs: u64 },
    DispatchCompleted { incident: IncidentId, outcome: DispatchOutcome },
}

/// Broadcast fan-out of engine events. Emitting never blocks; subscribers
/// that fall behind by more than the channel capacity miss the oldest
/// events.
#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        log::debug!("[EVENT] {:?}", event);
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_every_subscriber() {
        let events = EventSender::new(8);
        let mut a = events.subscribe();
        let mut b = events.subscribe();

        events.emit(EngineEvent::StateChanged {
            state: IncidentState::Suspected,
        });

        let expected = EngineEvent::StateChanged {
            state: IncidentState::Suspected,
        };
        assert_eq!(a.recv().await.unwrap(), expected);
        assert_eq!(b.recv().await.unwrap(), expected);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let events = EventSender::new(8);
        events.emit(EngineEvent::CountdownTick {
            incident: 1,
            remaining_secs: 3,
        });
    }

    #[test]
    fn test_event_json() {
        let json = serde_json::to_value(EngineEvent::CountdownTick {
            incident: 7,
            remaining_secs: 2,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event": "countdown_tick", "incident": 7, "remaining_secs": 2})
        );
    }
}
