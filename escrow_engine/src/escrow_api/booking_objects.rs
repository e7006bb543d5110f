//! Request types for booking transitions. Each one carries exactly the fields its transition accepts and is checked
//! with `validate` before it reaches the state machine.
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Amount, PackageId, TravelId},
    traits::{BookingError, TransitionUpdate},
};

fn required(value: &str, name: &'static str) -> Result<String, BookingError> {
    let value = value.trim();
    if value.is_empty() {
        Err(BookingError::MissingProof(name))
    } else {
        Ok(value.to_string())
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBookingRequest {
    pub travel_id: TravelId,
    pub package_id: PackageId,
    pub amount: Amount,
}

/// The three artifacts that prove a package changed hands at pick-up. Filenames of already stored files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PickUpProof {
    #[serde(default)]
    pub photo: String,
    #[serde(default)]
    pub sender_signature: String,
    #[serde(default)]
    pub traveler_signature: String,
}

impl PickUpProof {
    pub fn validate(&self) -> Result<TransitionUpdate, BookingError> {
        Ok(TransitionUpdate::PickUp {
            photo: required(&self.photo, "photo")?,
            sender_signature: required(&self.sender_signature, "sender_signature")?,
            traveler_signature: required(&self.traveler_signature, "traveler_signature")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropOffProof {
    #[serde(default)]
    pub photo: String,
    #[serde(default)]
    pub receiver_signature: String,
    #[serde(default)]
    pub traveler_signature: String,
}

impl DropOffProof {
    pub fn validate(&self) -> Result<TransitionUpdate, BookingError> {
        Ok(TransitionUpdate::DropOff {
            photo: required(&self.photo, "photo")?,
            receiver_signature: required(&self.receiver_signature, "receiver_signature")?,
            traveler_signature: required(&self.traveler_signature, "traveler_signature")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemReport {
    pub reason: String,
}

impl ProblemReport {
    pub fn validate(&self) -> Result<TransitionUpdate, BookingError> {
        let reason = self.reason.trim();
        if reason.is_empty() {
            return Err(BookingError::MissingReason);
        }
        Ok(TransitionUpdate::Problem { reason: reason.to_string() })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionsUnmetReport {
    #[serde(default)]
    pub details: Option<String>,
}

impl ConditionsUnmetReport {
    pub fn validate(&self) -> Result<TransitionUpdate, BookingError> {
        Ok(TransitionUpdate::ConditionsUnmet { details: optional(&self.details) })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

impl RejectRequest {
    pub fn validate(&self) -> Result<TransitionUpdate, BookingError> {
        Ok(TransitionUpdate::Reject { reason: optional(&self.reason) })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

impl CancelRequest {
    pub fn reason(&self) -> Option<String> {
        optional(&self.reason)
    }
}
