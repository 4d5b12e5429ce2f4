//! The accident detection engine.
//!
//! `SosEngine` is a cheap, cloneable handle. All incident state lives
//! behind one mutex together with the countdown, so a cancel, a countdown
//! expiry and a new detection can never interleave halfway through a
//! transition. The lock is never held across an `.await`; dispatch runs on
//! its own task and re-takes the lock only to record the result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::battery::BatteryGauge;
use crate::classifier::{MotionClassifier, SeverityTier};
use crate::config::EngineConfig;
use crate::contacts::ContactStore;
use crate::cooldown::CooldownGate;
use crate::countdown::CountdownTimer;
use crate::dispatch::{DispatchCoordinator, DispatchOutcome};
use crate::error::{SosError, SosResult};
use crate::events::{EngineEvent, EventSender};
use crate::incident::{Incident, IncidentId, IncidentState, IncidentStateMachine};
use crate::location::LocationSource;
use crate::notify::NotificationTransport;
use crate::records::RecordStore;
use crate::sensors::MotionSample;
use crate::status::MonitorStatus;

/// External services the engine talks to.
pub struct Collaborators {
    pub location: Arc<dyn LocationSource>,
    pub contacts: Arc<dyn ContactStore>,
    pub transport: Arc<dyn NotificationTransport>,
    pub records: Arc<dyn RecordStore>,
    pub battery: Arc<dyn BatteryGauge>,
}

#[derive(Clone)]
pub struct SosEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    runtime: Handle,
    classifier: MotionClassifier,
    core: Mutex<Core>,
    gate: CooldownGate,
    coordinator: DispatchCoordinator,
    battery: Arc<dyn BatteryGauge>,
    events: EventSender,
    counters: Counters,
    started_at: Mutex<Option<Instant>>,
    intake: Mutex<Option<JoinHandle<()>>>,
}

struct Core {
    machine: IncidentStateMachine,
    countdown: CountdownTimer,
}

#[derive(Default)]
struct Counters {
    samples: AtomicU64,
    detected: AtomicU64,
    cancelled: AtomicU64,
    dispatches: AtomicU64,
}

impl SosEngine {
    /// Must be called from inside a tokio runtime; the engine schedules its
    /// timers and dispatch tasks on that runtime.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> SosResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SosError::NoRuntime)?;

        let coordinator = DispatchCoordinator::new(
            collaborators.location,
            collaborators.contacts,
            collaborators.transport,
            collaborators.records,
        );

        let inner = Inner {
            classifier: MotionClassifier::with_thresholds(config.low_threshold, config.high_threshold),
            core: Mutex::new(Core {
                machine: IncidentStateMachine::new(),
                countdown: CountdownTimer::new(config.tick()),
            }),
            gate: CooldownGate::new(),
            coordinator,
            battery: collaborators.battery,
            events: EventSender::new(config.event_capacity),
            counters: Counters::default(),
            started_at: Mutex::new(None),
            intake: Mutex::new(None),
            runtime,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Consume samples from `rx` until the sender side closes or `stop()`
    /// is called.
    pub fn start(&self, mut rx: mpsc::Receiver<MotionSample>) -> SosResult<()> {
        let mut intake = self
            .inner
            .intake
            .lock()
            .map_err(|_| SosError::Internal("intake lock poisoned".to_string()))?;
        if intake.as_ref().map(|task| !task.is_finished()).unwrap_or(false) {
            return Err(SosError::Internal("engine already started".to_string()));
        }

        if let Ok(mut started_at) = self.inner.started_at.lock() {
            *started_at = Some(Instant::now());
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *intake = Some(self.inner.runtime.spawn(async move {
            while let Some(sample) = rx.recv().await {
                match weak.upgrade() {
                    Some(inner) => SosEngine { inner }.on_motion_sample(sample),
                    None => break,
                }
            }
            log::info!("[ENGINE] Sample intake finished");
        }));

        log::info!("[ENGINE] Monitoring started");
        Ok(())
    }

    /// Stop sample intake. A running countdown or dispatch still completes.
    pub fn stop(&self) {
        let task = match self.inner.intake.lock() {
            Ok(mut intake) => intake.take(),
            Err(_) => {
                log::error!("[ENGINE] Intake lock poisoned, cannot stop");
                return;
            }
        };
        if let Some(task) = task {
            task.abort();
            log::info!("[ENGINE] Monitoring stopped");
        }
    }

    pub fn on_motion_sample(&self, sample: MotionSample) {
        let inner = &self.inner;
        inner.counters.samples.fetch_add(1, Ordering::Relaxed);

        let tier = inner.classifier.classify(&sample);
        if tier == SeverityTier::None {
            return;
        }

        let mut core = match self.lock_core() {
            Ok(core) => core,
            Err(err) => {
                log::error!("[ENGINE] Dropping sample: {}", err);
                return;
            }
        };

        let incident = match core.machine.detect(tier, inner.gate.is_open()) {
            Some(incident) => incident,
            None => {
                log::debug!(
                    "[ENGINE] Ignoring {:?} sample ({:.1} m/s²) in {:?}",
                    tier,
                    sample.magnitude(),
                    core.machine.state()
                );
                return;
            }
        };

        inner.counters.detected.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "[ENGINE] Incident {} detected: {:?} impact, {:.1} m/s²",
            incident.id,
            tier,
            sample.magnitude()
        );
        self.publish(incident.state);

        match incident.state {
            IncidentState::Suspected => self.start_countdown(&mut core, incident.id),
            _ => self.launch_dispatch(&mut core, incident),
        }
    }

    /// Abort the suspected incident. Returns false when there is nothing to
    /// cancel, including when the countdown has already expired.
    pub fn request_cancel(&self) -> bool {
        let mut core = match self.lock_core() {
            Ok(core) => core,
            Err(err) => {
                log::error!("[ENGINE] Cancel failed: {}", err);
                return false;
            }
        };

        if core.machine.state() != IncidentState::Suspected || !core.countdown.cancel() {
            return false;
        }

        match core.machine.cancel(self.inner.gate.is_open()) {
            Some(incident) => {
                self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                log::info!("[ENGINE] Incident {} cancelled by user", incident.id);
                self.publish(core.machine.state());
                true
            }
            None => false,
        }
    }

    /// Close the gate for the cooldown interval, whatever the incident state.
    pub fn force_reset(&self) {
        let deadline = {
            let mut core = match self.lock_core() {
                Ok(core) => core,
                Err(err) => {
                    log::error!("[ENGINE] Reset failed: {}", err);
                    return;
                }
            };
            let deadline = self.inner.gate.close_for(self.inner.config.cooldown());
            if core.machine.force_reset() {
                self.publish(IncidentState::Cooldown);
            }
            deadline
        };
        log::info!("[ENGINE] Gate force-closed for {}s", self.inner.config.cooldown_secs);
        self.schedule_reopen(deadline);
    }

    /// Send an SOS without a detected impact.
    pub fn trigger_manual_sos(&self) -> SosResult<IncidentId> {
        if self.inner.coordinator.contacts().is_empty() {
            return Err(SosError::NoContacts);
        }

        let mut core = self.lock_core()?;
        let incident = core.machine.manual()?;
        let id = incident.id;

        self.inner.counters.detected.fetch_add(1, Ordering::Relaxed);
        log::warn!("[ENGINE] Incident {} raised manually", id);
        self.publish(incident.state);
        self.launch_dispatch(&mut core, incident);
        Ok(id)
    }

    pub fn current_state(&self) -> IncidentState {
        match self.inner.core.lock() {
            Ok(core) => core.machine.state(),
            Err(poisoned) => poisoned.into_inner().machine.state(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> MonitorStatus {
        let inner = &self.inner;
        let active_secs = inner
            .started_at
            .lock()
            .ok()
            .and_then(|started| *started)
            .map(|started| started.elapsed().as_secs())
            .unwrap_or(0);

        let mut status = MonitorStatus::new(self.current_state())
            .with_gps_accuracy(inner.coordinator.location().last_accuracy())
            .with_battery(inner.battery.percent());
        status.active_secs = active_secs;
        status.gate_open = inner.gate.is_open();
        status.cooldown_remaining_secs = inner.gate.remaining().as_secs_f64();
        status.samples = inner.counters.samples.load(Ordering::Relaxed);
        status.incidents_detected = inner.counters.detected.load(Ordering::Relaxed);
        status.incidents_cancelled = inner.counters.cancelled.load(Ordering::Relaxed);
        status.dispatches = inner.counters.dispatches.load(Ordering::Relaxed);
        status
    }

    fn lock_core(&self) -> SosResult<MutexGuard<'_, Core>> {
        self.inner
            .core
            .lock()
            .map_err(|_| SosError::Internal("engine state lock poisoned".to_string()))
    }

    fn publish(&self, state: IncidentState) {
        log::info!("[ENGINE] State: {:?}", state);
        self.inner.events.emit(EngineEvent::StateChanged { state });
    }

    fn start_countdown(&self, core: &mut Core, id: IncidentId) {
        let events = self.inner.events.clone();
        let weak = Arc::downgrade(&self.inner);

        core.countdown.start(
            &self.inner.runtime,
            self.inner.config.countdown_secs,
            move |remaining| {
                events.emit(EngineEvent::CountdownTick {
                    incident: id,
                    remaining_secs: remaining,
                })
            },
            move || {
                if let Some(inner) = weak.upgrade() {
                    SosEngine { inner }.on_countdown_expired(id);
                }
            },
        );
        log::info!(
            "[ENGINE] Incident {}: auto-send in {}s unless cancelled",
            id,
            self.inner.config.countdown_secs
        );
    }

    fn on_countdown_expired(&self, id: IncidentId) {
        let mut core = match self.lock_core() {
            Ok(core) => core,
            Err(err) => {
                log::error!("[ENGINE] Countdown expiry lost: {}", err);
                return;
            }
        };
        if let Some(incident) = core.machine.countdown_expired(id) {
            log::warn!("[ENGINE] Incident {}: countdown expired", id);
            self.publish(incident.state);
            self.launch_dispatch(&mut core, incident);
        }
    }

    /// Move a confirmed incident to `Dispatching` and run the coordinator on
    /// its own task. The task is never aborted.
    fn launch_dispatch(&self, core: &mut Core, incident: Incident) {
        if !core.machine.begin_dispatch(incident.id) {
            return;
        }
        self.publish(IncidentState::Dispatching);

        let engine = self.clone();
        self.inner.runtime.spawn(async move {
            let outcome = engine.inner.coordinator.dispatch(&incident).await;
            engine.finish_dispatch(incident.id, outcome);
        });
    }

    fn finish_dispatch(&self, id: IncidentId, outcome: DispatchOutcome) {
        let inner = &self.inner;
        inner.counters.dispatches.fetch_add(1, Ordering::Relaxed);
        for err in outcome.errors() {
            log::warn!("[ENGINE] Incident {}: {}", id, err);
        }

        let deadline = {
            let mut core = match self.lock_core() {
                Ok(core) => core,
                Err(err) => {
                    log::error!("[ENGINE] Dispatch result lost: {}", err);
                    return;
                }
            };
            let resolved = core.machine.resolve(id, outcome.fix());
            let deadline = inner.gate.close_for(inner.config.cooldown());
            if resolved.is_some() {
                self.publish(IncidentState::Cooldown);
            }
            inner.events.emit(EngineEvent::DispatchCompleted {
                incident: id,
                outcome,
            });
            deadline
        };
        self.schedule_reopen(deadline);
    }

    /// Return to `Idle` once the gate reopens. A later `close_for` moves the
    /// deadline and schedules its own reopen, so this one becomes a no-op.
    fn schedule_reopen(&self, deadline: Instant) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            sleep_until(deadline).await;
            let engine = match weak.upgrade() {
                Some(inner) => SosEngine { inner },
                None => return,
            };
            let mut core = match engine.lock_core() {
                Ok(core) => core,
                Err(err) => {
                    log::error!("[ENGINE] Reopen skipped: {}", err);
                    return;
                }
            };
            if engine.inner.gate.is_open() && core.machine.cooldown_elapsed() {
                log::info!("[ENGINE] Cooldown over, monitoring resumed");
                engine.publish(IncidentState::Idle);
            }
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut intake) = self.intake.lock() {
            if let Some(task) = intake.take() {
                task.abort();
            }
        }
    }
}
