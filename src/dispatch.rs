//! Turns a confirmed incident into a stored record and outbound SOS
//! notifications.
//!
//! Every collaborator failure is folded into the returned
//! [`DispatchOutcome`]; `dispatch` itself cannot fail.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

use crate::contacts::{ContactList, ContactStore};
use crate::error::{LocationError, SosError};
use crate::incident::Incident;
use crate::location::{GeoFix, LocationSource};
use crate::notify::{sos_message, NotificationTransport};
use crate::records::{AccidentRecord, RecordStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Delivery {
    Sent,
    Failed(String),
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

/// Result of one SMS or call attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub number: String,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub record: AccidentRecord,
    /// Set when the record could not be persisted
    pub store_error: Option<String>,
    pub sms: Vec<Attempt>,
    pub call: Attempt,
}

impl DispatchReport {
    pub fn failed_attempts(&self) -> usize {
        self.sms.iter().filter(|a| !a.delivery.is_sent()).count()
            + usize::from(!self.call.delivery.is_sent())
    }

    pub fn total_attempts(&self) -> usize {
        self.sms.len() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Every SMS and the call went through
    Dispatched(DispatchReport),
    /// At least one SMS or the call failed
    PartialSendFailure(DispatchReport),
    NoContacts {
        record: AccidentRecord,
        store_error: Option<String>,
    },
    PermissionDenied,
    LocationUnavailable {
        reason: String,
    },
}

impl DispatchOutcome {
    pub fn record(&self) -> Option<&AccidentRecord> {
        match self {
            DispatchOutcome::Dispatched(report) | DispatchOutcome::PartialSendFailure(report) => {
                Some(&report.record)
            }
            DispatchOutcome::NoContacts { record, .. } => Some(record),
            DispatchOutcome::PermissionDenied | DispatchOutcome::LocationUnavailable { .. } => None,
        }
    }

    pub fn fix(&self) -> Option<GeoFix> {
        self.record().map(AccidentRecord::fix)
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched(_))
    }

    /// Problems worth telling the user about, empty for a clean dispatch.
    pub fn errors(&self) -> Vec<SosError> {
        let mut errors = Vec::new();
        let store_error = match self {
            DispatchOutcome::Dispatched(report) => report.store_error.as_ref(),
            DispatchOutcome::PartialSendFailure(report) => {
                errors.push(SosError::PartialSendFailure {
                    failed: report.failed_attempts(),
                    attempted: report.total_attempts(),
                });
                report.store_error.as_ref()
            }
            DispatchOutcome::NoContacts { store_error, .. } => {
                errors.push(SosError::NoContacts);
                store_error.as_ref()
            }
            DispatchOutcome::PermissionDenied => {
                errors.push(SosError::PermissionDenied);
                None
            }
            DispatchOutcome::LocationUnavailable { reason } => {
                errors.push(SosError::LocationUnavailable(reason.clone()));
                None
            }
        };
        if let Some(reason) = store_error {
            errors.push(SosError::StoreFailure(reason.clone()));
        }
        errors
    }
}

pub struct DispatchCoordinator {
    location: Arc<dyn LocationSource>,
    contacts: Arc<dyn ContactStore>,
    transport: Arc<dyn NotificationTransport>,
    records: Arc<dyn RecordStore>,
}

impl DispatchCoordinator {
    pub fn new(
        location: Arc<dyn LocationSource>,
        contacts: Arc<dyn ContactStore>,
        transport: Arc<dyn NotificationTransport>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            location,
            contacts,
            transport,
            records,
        }
    }

    pub fn contacts(&self) -> ContactList {
        self.contacts.current_contacts()
    }

    pub fn location(&self) -> &Arc<dyn LocationSource> {
        &self.location
    }

    pub async fn dispatch(&self, incident: &Incident) -> DispatchOutcome {
        log::info!(
            "[DISPATCH] Incident {} ({:?}, {:?}): acquiring location",
            incident.id,
            incident.trigger,
            incident.tier
        );

        let fix = match self.location.last_or_fresh_fix().await {
            Ok(fix) => fix,
            Err(LocationError::PermissionDenied) => {
                log::error!("[DISPATCH] Incident {}: location permission denied", incident.id);
                return DispatchOutcome::PermissionDenied;
            }
            Err(LocationError::Unavailable(reason)) => {
                log::error!("[DISPATCH] Incident {}: no location fix: {}", incident.id, reason);
                return DispatchOutcome::LocationUnavailable { reason };
            }
        };

        let record = AccidentRecord::now(fix);
        let contacts = self.contacts.current_contacts();
        let message = sos_message(&fix);

        let (store_error, notified) =
            tokio::join!(self.persist(&record), self.notify(&contacts, &message));

        let (sms, call) = match notified {
            Some(results) => results,
            None => {
                log::warn!("[DISPATCH] Incident {}: no emergency contacts", incident.id);
                return DispatchOutcome::NoContacts { record, store_error };
            }
        };

        let report = DispatchReport {
            record,
            store_error,
            sms,
            call,
        };
        if report.failed_attempts() == 0 {
            log::info!(
                "[DISPATCH] Incident {}: SOS sent to {} contact(s)",
                incident.id,
                report.sms.len()
            );
            DispatchOutcome::Dispatched(report)
        } else {
            log::warn!(
                "[DISPATCH] Incident {}: {} of {} notifications failed",
                incident.id,
                report.failed_attempts(),
                report.total_attempts()
            );
            DispatchOutcome::PartialSendFailure(report)
        }
    }

    async fn persist(&self, record: &AccidentRecord) -> Option<String> {
        match self.records.append(record).await {
            Ok(()) => None,
            Err(err) => {
                log::error!("[DISPATCH] Failed to store record {}: {}", record.id, err);
                Some(err.to_string())
            }
        }
    }

    /// SMS to every contact, then one call to the first. `None` when
    /// there is nobody to notify.
    async fn notify(&self, contacts: &ContactList, message: &str) -> Option<(Vec<Attempt>, Attempt)> {
        let first = contacts.first()?.to_string();

        let sends = contacts.numbers().iter().map(|number| async move {
            let delivery = match self.transport.send_sms(number, message).await {
                Ok(()) => Delivery::Sent,
                Err(err) => {
                    log::warn!("[DISPATCH] {}", err);
                    Delivery::Failed(err.reason)
                }
            };
            Attempt {
                number: number.clone(),
                delivery,
            }
        });
        let sms = join_all(sends).await;

        let delivery = match self.transport.place_call(&first).await {
            Ok(()) => Delivery::Sent,
            Err(err) => {
                log::warn!("[DISPATCH] {}", err);
                Delivery::Failed(err.reason)
            }
        };

        Some((
            sms,
            Attempt {
                number: first,
                delivery,
            },
        ))
    }
}
