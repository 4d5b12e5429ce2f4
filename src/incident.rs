//! Incident lifecycle, from first qualifying sample to cooldown.
//!
//! ```text
//!          detect(Low)             expired
//!  Idle ─────────────► Suspected ─────────► Confirmed ──► Dispatching ──► Cooldown
//!   │ ▲                   │                    ▲                             │
//!   │ └──── cancel() ─────┘                    │                             │
//!   └────────────── detect(High) / manual ─────┘                             │
//!   ▲                                                                        │
//!   └──────────────────────────── cooldown elapsed ──────────────────────────┘
//! ```
//!
//! The machine is synchronous and owns no timers; the engine drives it and
//! guards it with a single lock. Every transition that concerns a specific
//! incident takes its id, so a late countdown expiry or dispatch completion
//! for an incident that is no longer current is a no-op.

use serde::{Deserialize, Serialize};

use crate::classifier::SeverityTier;
use crate::error::{SosError, SosResult};
use crate::location::GeoFix;

pub type IncidentId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentState {
    /// Gate open, no active incident
    Idle,
    /// Low-severity detection, countdown running
    Suspected,
    /// Severe impact, expired countdown or manual SOS
    Confirmed,
    /// Waiting on location and notifications
    Dispatching,
    /// Gate closed
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    Impact,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub tier: SeverityTier,
    pub trigger: Trigger,
    pub state: IncidentState,
    pub location: Option<GeoFix>,
}

pub struct IncidentStateMachine {
    state: IncidentState,
    active: Option<Incident>,
    next_id: IncidentId,
}

impl IncidentStateMachine {
    pub fn new() -> Self {
        Self {
            state: IncidentState::Idle,
            active: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> IncidentState {
        self.state
    }

    pub fn active(&self) -> Option<&Incident> {
        self.active.as_ref()
    }

    /// Start an incident for a qualifying sample.
    ///
    /// Returns the new incident, whose state tells the caller what to run
    /// next: `Suspected` needs a countdown, `Confirmed` needs a dispatch.
    /// Returns `None` when the gate is closed, the tier is `None`, or an
    /// incident is already active.
    pub fn detect(&mut self, tier: SeverityTier, gate_open: bool) -> Option<Incident> {
        if !gate_open || self.state != IncidentState::Idle {
            return None;
        }

        let state = match tier {
            SeverityTier::None => return None,
            SeverityTier::Low => IncidentState::Suspected,
            SeverityTier::High => IncidentState::Confirmed,
        };

        Some(self.open(tier, Trigger::Impact, state))
    }

    /// User-requested SOS. Bypasses the gate but never overlaps an
    /// active incident.
    pub fn manual(&mut self) -> SosResult<Incident> {
        match self.state {
            IncidentState::Idle | IncidentState::Cooldown => {
                Ok(self.open(SeverityTier::High, Trigger::Manual, IncidentState::Confirmed))
            }
            _ => Err(SosError::IncidentActive),
        }
    }

    /// Abort a suspected incident. Lands in `Cooldown` only if something
    /// else already closed the gate.
    pub fn cancel(&mut self, gate_open: bool) -> Option<Incident> {
        if self.state != IncidentState::Suspected {
            return None;
        }

        let incident = self.active.take();
        self.transition(if gate_open {
            IncidentState::Idle
        } else {
            IncidentState::Cooldown
        });
        incident
    }

    pub fn countdown_expired(&mut self, id: IncidentId) -> Option<Incident> {
        if self.state != IncidentState::Suspected || !self.is_current(id) {
            return None;
        }
        self.transition(IncidentState::Confirmed);
        self.active.clone()
    }

    pub fn begin_dispatch(&mut self, id: IncidentId) -> bool {
        if self.state != IncidentState::Confirmed || !self.is_current(id) {
            return false;
        }
        self.transition(IncidentState::Dispatching);
        true
    }

    /// Dispatch finished, whatever the outcome. The incident is discarded.
    pub fn resolve(&mut self, id: IncidentId, location: Option<GeoFix>) -> Option<Incident> {
        if self.state != IncidentState::Dispatching || !self.is_current(id) {
            return None;
        }
        self.transition(IncidentState::Cooldown);
        self.active.take().map(|mut incident| {
            incident.location = location;
            incident.state = IncidentState::Cooldown;
            incident
        })
    }

    /// Gate was force-closed. Only an idle machine changes state; an
    /// active incident carries on.
    pub fn force_reset(&mut self) -> bool {
        if self.state != IncidentState::Idle {
            return false;
        }
        self.transition(IncidentState::Cooldown);
        true
    }

    pub fn cooldown_elapsed(&mut self) -> bool {
        if self.state != IncidentState::Cooldown {
            return false;
        }
        self.transition(IncidentState::Idle);
        true
    }

    fn open(&mut self, tier: SeverityTier, trigger: Trigger, state: IncidentState) -> Incident {
        let incident = Incident {
            id: self.next_id,
            tier,
            trigger,
            state,
            location: None,
        };
        self.next_id += 1;
        self.active = Some(incident.clone());
        self.transition(state);
        incident
    }

    fn is_current(&self, id: IncidentId) -> bool {
        self.active.as_ref().map(|i| i.id == id).unwrap_or(false)
    }

    fn transition(&mut self, to: IncidentState) {
        log::debug!("[INCIDENT] {:?} -> {:?}", self.state, to);
        self.state = to;
        if let Some(incident) = self.active.as_mut() {
            incident.state = to;
        }
    }
}

impl Default for IncidentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_detection_is_suspected() {
        let mut machine = IncidentStateMachine::new();
        assert_eq!(machine.state(), IncidentState::Idle);

        let incident = machine.detect(SeverityTier::Low, true).unwrap();
        assert_eq!(incident.state, IncidentState::Suspected);
        assert_eq!(incident.tier, SeverityTier::Low);
        assert_eq!(machine.state(), IncidentState::Suspected);
    }

    #[test]
    fn test_high_detection_skips_suspected() {
        let mut machine = IncidentStateMachine::new();
        let incident = machine.detect(SeverityTier::High, true).unwrap();
        assert_eq!(incident.state, IncidentState::Confirmed);

        assert!(machine.begin_dispatch(incident.id));
        assert_eq!(machine.state(), IncidentState::Dispatching);

        let fix = GeoFix::new(1.0, 2.0);
        let resolved = machine.resolve(incident.id, Some(fix)).unwrap();
        assert_eq!(resolved.location, Some(fix));
        assert_eq!(machine.state(), IncidentState::Cooldown);
        assert!(machine.active().is_none());

        assert!(machine.cooldown_elapsed());
        assert_eq!(machine.state(), IncidentState::Idle);
    }

    #[test]
    fn test_none_tier_and_closed_gate_are_ignored() {
        let mut machine = IncidentStateMachine::new();
        assert!(machine.detect(SeverityTier::None, true).is_none());
        assert!(machine.detect(SeverityTier::High, false).is_none());
        assert!(machine.detect(SeverityTier::Low, false).is_none());
        assert_eq!(machine.state(), IncidentState::Idle);
    }

    #[test]
    fn test_detections_while_active_are_dropped() {
        let mut machine = IncidentStateMachine::new();
        let first = machine.detect(SeverityTier::Low, true).unwrap();

        assert!(machine.detect(SeverityTier::High, true).is_none());
        assert_eq!(machine.active().unwrap().id, first.id);

        machine.countdown_expired(first.id).unwrap();
        assert!(machine.detect(SeverityTier::Low, true).is_none());

        machine.begin_dispatch(first.id);
        assert!(machine.detect(SeverityTier::High, true).is_none());

        machine.resolve(first.id, None);
        assert!(machine.detect(SeverityTier::High, true).is_none());
        assert_eq!(machine.state(), IncidentState::Cooldown);
    }

    #[test]
    fn test_cancel_only_while_suspected() {
        let mut machine = IncidentStateMachine::new();
        assert!(machine.cancel(true).is_none());

        let incident = machine.detect(SeverityTier::Low, true).unwrap();
        let cancelled = machine.cancel(true).unwrap();
        assert_eq!(cancelled.id, incident.id);
        assert_eq!(machine.state(), IncidentState::Idle);

        // Expiry for the cancelled incident arrives late
        assert!(machine.countdown_expired(incident.id).is_none());
        assert_eq!(machine.state(), IncidentState::Idle);

        let severe = machine.detect(SeverityTier::High, true).unwrap();
        assert!(machine.cancel(true).is_none());
        assert_eq!(machine.state(), IncidentState::Confirmed);
        assert!(machine.begin_dispatch(severe.id));
        assert!(machine.cancel(true).is_none());
        assert_eq!(machine.state(), IncidentState::Dispatching);
    }

    #[test]
    fn test_cancel_with_closed_gate_enters_cooldown() {
        let mut machine = IncidentStateMachine::new();
        machine.detect(SeverityTier::Low, true).unwrap();
        machine.cancel(false).unwrap();
        assert_eq!(machine.state(), IncidentState::Cooldown);
    }

    #[test]
    fn test_expiry_after_cancel_race() {
        let mut machine = IncidentStateMachine::new();
        let incident = machine.detect(SeverityTier::Low, true).unwrap();

        // Expiry wins: cancel is then a no-op
        assert!(machine.countdown_expired(incident.id).is_some());
        assert!(machine.cancel(true).is_none());
        assert_eq!(machine.state(), IncidentState::Confirmed);

        // A second expiry never re-confirms
        assert!(machine.countdown_expired(incident.id).is_none());
    }

    #[test]
    fn test_stale_ids_are_rejected() {
        let mut machine = IncidentStateMachine::new();
        let incident = machine.detect(SeverityTier::High, true).unwrap();
        assert!(!machine.begin_dispatch(incident.id + 1));
        assert!(machine.begin_dispatch(incident.id));
        assert!(machine.resolve(incident.id + 1, None).is_none());
        assert_eq!(machine.state(), IncidentState::Dispatching);
    }

    #[test]
    fn test_force_reset() {
        let mut machine = IncidentStateMachine::new();
        assert!(machine.force_reset());
        assert_eq!(machine.state(), IncidentState::Cooldown);
        assert!(!machine.force_reset());

        assert!(machine.cooldown_elapsed());
        machine.detect(SeverityTier::Low, true).unwrap();
        assert!(!machine.force_reset());
        assert_eq!(machine.state(), IncidentState::Suspected);
    }

    #[test]
    fn test_manual_sos() {
        let mut machine = IncidentStateMachine::new();
        let incident = machine.manual().unwrap();
        assert_eq!(incident.trigger, Trigger::Manual);
        assert_eq!(incident.state, IncidentState::Confirmed);
        assert_eq!(machine.manual(), Err(SosError::IncidentActive));

        machine.begin_dispatch(incident.id);
        machine.resolve(incident.id, None);

        // Allowed again during cooldown
        let again = machine.manual().unwrap();
        assert!(again.id > incident.id);
    }

    #[test]
    fn test_incident_ids_increase() {
        let mut machine = IncidentStateMachine::new();
        let a = machine.detect(SeverityTier::Low, true).unwrap();
        machine.cancel(true);
        let b = machine.detect(SeverityTier::Low, true).unwrap();
        assert!(b.id > a.id);
    }
}
