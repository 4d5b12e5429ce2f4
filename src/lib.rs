//! Accident detection and SOS dispatch.
//!
//! Motion samples are classified by magnitude; a suspected accident starts
//! a cancellable countdown, a severe one is confirmed immediately. A
//! confirmed incident records the position and notifies every emergency
//! contact, after which new incidents are suppressed for a cooldown period.

pub mod battery;
pub mod classifier;
pub mod config;
pub mod contacts;
pub mod cooldown;
pub mod countdown;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod incident;
pub mod location;
pub mod notify;
pub mod records;
pub mod sensors;
pub mod status;

pub use battery::{BatteryGauge, FixedBattery, TermuxBattery};
pub use classifier::{MotionClassifier, SeverityTier};
pub use config::EngineConfig;
pub use contacts::{ContactList, ContactStore, InMemoryContactStore, JsonContactStore};
pub use dispatch::{Attempt, Delivery, DispatchCoordinator, DispatchOutcome, DispatchReport};
pub use engine::{Collaborators, SosEngine};
pub use error::{CallError, LocationError, SendError, SosError, SosResult, StoreError};
pub use events::EngineEvent;
pub use incident::{Incident, IncidentId, IncidentState, Trigger};
pub use location::{FixedLocationSource, GeoFix, GpsSignal, LocationSource, TermuxLocationSource};
pub use notify::{LogTransport, NotificationTransport, TermuxTransport};
pub use records::{AccidentRecord, InMemoryRecordStore, JsonlRecordStore, RecordStore};
pub use sensors::MotionSample;
pub use status::MonitorStatus;
